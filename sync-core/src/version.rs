//! Schema version tags.
//!
//! A tag is one length byte followed by that many printable ASCII bytes.
//! It sits in front of the encrypted payload so a reader can reject an
//! incompatible message before spending any effort on decryption.

use crate::error::WireError;

/// Longest version string that fits the one-byte length.
pub const MAX_VERSION_LEN: usize = u8::MAX as usize;

/// Current schema version plus the versions this client can still read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersions {
    current: String,
    compatible: Vec<String>,
}

impl SchemaVersions {
    /// Versions accepting only `current`.
    pub fn new(current: impl Into<String>) -> Self {
        Self {
            current: current.into(),
            compatible: Vec::new(),
        }
    }

    /// Also accept messages tagged with `version`.
    pub fn with_compatible(mut self, version: impl Into<String>) -> Self {
        self.compatible.push(version.into());
        self
    }

    /// Version written on outgoing messages.
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Older versions still accepted on incoming messages.
    pub fn compatible(&self) -> &[String] {
        &self.compatible
    }

    /// Check every configured version is a valid tag.
    pub fn validate(&self) -> Result<(), WireError> {
        validate_tag(&self.current)?;
        self.compatible.iter().try_for_each(|v| validate_tag(v))
    }

    /// Bytes the tag adds in front of a message.
    pub fn tag_len(&self) -> usize {
        1 + self.current.len()
    }

    /// Whether messages tagged `version` are readable.
    pub fn accepts(&self, version: &str) -> bool {
        self.current == version || self.compatible.iter().any(|v| v == version)
    }

    /// Prefix `message` with the current version tag.
    pub fn add_version(&self, message: &[u8]) -> Result<Vec<u8>, WireError> {
        validate_tag(&self.current)?;
        let mut out = Vec::with_capacity(self.tag_len() + message.len());
        out.push(self.current.len() as u8);
        out.extend_from_slice(self.current.as_bytes());
        out.extend_from_slice(message);
        Ok(out)
    }

    /// Split off the version tag and check it is accepted.
    ///
    /// Returns the remaining message and the version it was tagged with, so
    /// callers can branch into version-specific decoding.
    pub fn strip_and_validate<'a>(
        &self,
        message: &'a [u8],
    ) -> Result<(&'a [u8], String), WireError> {
        let (&len, rest) = message
            .split_first()
            .ok_or_else(|| WireError::malformed("missing version tag"))?;
        let len = len as usize;
        if rest.len() < len {
            return Err(WireError::malformed(format!(
                "version tag of {len} bytes overruns message"
            )));
        }
        let (tag, body) = rest.split_at(len);
        let version = String::from_utf8_lossy(tag).into_owned();
        if !self.accepts(&version) {
            return Err(WireError::UnsupportedVersion { found: version });
        }
        Ok((body, version))
    }
}

fn validate_tag(version: &str) -> Result<(), WireError> {
    if version.is_empty() {
        return Err(WireError::InvalidVersionTag {
            reason: "empty".into(),
        });
    }
    if version.len() > MAX_VERSION_LEN {
        return Err(WireError::InvalidVersionTag {
            reason: format!("{} bytes, max {MAX_VERSION_LEN}", version.len()),
        });
    }
    if !version.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(WireError::InvalidVersionTag {
            reason: format!("{version:?} is not printable ASCII"),
        });
    }
    Ok(())
}
