//! Frame transport for the relay protocol.
//!
//! Each [`Frame`] travels as a 4-byte big-endian length prefix followed by
//! its MessagePack encoding. Clients use the same functions.

use crate::error::{ProtocolError, ProtocolResult};
use sealed_sync_types::Frame;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum encoded frame size (32MB, room for the largest sealed update).
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// Read one frame.
///
/// Returns `Ok(None)` if the peer closed the stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> ProtocolResult<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    Frame::from_bytes(&buf)
        .map(Some)
        .map_err(|e| ProtocolError::InvalidFrame {
            reason: e.to_string(),
        })
}

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.to_bytes().map_err(|e| ProtocolError::InvalidFrame {
        reason: e.to_string(),
    })?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: bytes.len(),
            limit: MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
