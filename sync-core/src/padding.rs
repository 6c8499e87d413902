//! Checkpoint padding.
//!
//! Plaintext is rounded up to the smallest configured checkpoint that can
//! hold it plus one marker byte. The layout is `data || 0x80 || 0x00*`, so
//! the usable capacity of a checkpoint is `checkpoint - 1` bytes.
//!
//! Padding only blurs the size of each message. How often snapshots are
//! taken and how fast a document's row count grows stay visible to the relay.

use crate::error::WireError;

/// Byte written immediately after the data.
pub const PADDING_MARKER: u8 = 0x80;

/// Default checkpoint table: 256 B up to 8 MiB, growing by 8x.
pub const DEFAULT_CHECKPOINTS: [usize; 6] = [256, 2_048, 16_384, 131_072, 1_048_576, 8_388_608];

/// Check that a checkpoint table is usable.
///
/// The table may be in any order but must be non-empty and every entry must
/// have room for at least the marker byte.
pub fn validate_checkpoints(checkpoints: &[usize]) -> Result<(), WireError> {
    if checkpoints.is_empty() {
        return Err(WireError::InvalidCheckpoints {
            reason: "table is empty".into(),
        });
    }
    if checkpoints.contains(&0) {
        return Err(WireError::InvalidCheckpoints {
            reason: "checkpoint of 0 bytes cannot hold the marker".into(),
        });
    }
    Ok(())
}

/// Smallest checkpoint that fits `len` bytes of data plus the marker.
pub fn checkpoint_for(len: usize, checkpoints: &[usize]) -> Option<usize> {
    let needed = len.checked_add(1)?;
    checkpoints.iter().copied().filter(|&c| c >= needed).min()
}

/// Pad `data` to the smallest fitting checkpoint.
///
/// Fails with [`WireError::DataTooLong`] when no checkpoint can hold it.
pub fn pad(data: &[u8], checkpoints: &[usize]) -> Result<Vec<u8>, WireError> {
    let size = checkpoint_for(data.len(), checkpoints).ok_or_else(|| WireError::DataTooLong {
        len: data.len(),
        capacity: checkpoints.iter().max().map_or(0, |c| c.saturating_sub(1)),
    })?;

    let mut padded = vec![0u8; size];
    padded[..data.len()].copy_from_slice(data);
    padded[data.len()] = PADDING_MARKER;
    Ok(padded)
}

/// Strip padding added by [`pad`].
///
/// Skips trailing zero bytes; the first non-zero byte from the end must be
/// the marker.
pub fn unpad(padded: &[u8]) -> Result<&[u8], WireError> {
    let marker_at = padded
        .iter()
        .rposition(|&b| b != 0)
        .ok_or(WireError::InvalidPadding)?;
    if padded[marker_at] != PADDING_MARKER {
        return Err(WireError::InvalidPadding);
    }
    Ok(&padded[..marker_at])
}
