//! Length-prefixed list encoding.
//!
//! A list is the concatenation of its elements, each preceded by its length
//! as an unsigned 32-bit little-endian integer. The typed variant adds a
//! one-byte tag per element so binary and string items can be mixed.
//!
//! ```text
//! plain:  [len u32 LE][bytes] [len u32 LE][bytes] ...
//! typed:  [tag u8][len u32 LE][bytes] ...
//! ```

use crate::error::WireError;

/// Size of the length prefix in front of every element.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Tag byte for a binary element in a typed list.
pub const TAG_BINARY: u8 = 0;

/// Tag byte for a UTF-8 string element in a typed list.
pub const TAG_STRING: u8 = 1;

/// Encode an ordered list of byte buffers.
///
/// Returns [`WireError::ElementTooLarge`] if an element exceeds `u32::MAX`.
pub fn encode_list<B: AsRef<[u8]>>(items: &[B]) -> Result<Vec<u8>, WireError> {
    let total: usize = items
        .iter()
        .map(|item| LENGTH_PREFIX_SIZE + item.as_ref().len())
        .sum();
    let mut out = Vec::with_capacity(total);
    for item in items {
        write_element(&mut out, item.as_ref())?;
    }
    Ok(out)
}

/// Decode a list produced by [`encode_list`], borrowing from the input.
pub fn decode_list_ref(data: &[u8]) -> Result<Vec<&[u8]>, WireError> {
    let mut items = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let (item, tail) = read_element(rest)?;
        items.push(item);
        rest = tail;
    }
    Ok(items)
}

/// Decode a list produced by [`encode_list`].
///
/// An empty input decodes to an empty list. A truncated prefix or an element
/// running past the end of the input is [`WireError::MalformedEncoding`].
pub fn decode_list(data: &[u8]) -> Result<Vec<Vec<u8>>, WireError> {
    Ok(decode_list_ref(data)?
        .into_iter()
        .map(<[u8]>::to_vec)
        .collect())
}

/// One element of a typed list.
#[derive(Clone, PartialEq, Eq)]
pub enum ListItem {
    /// Opaque bytes.
    Binary(Vec<u8>),
    /// UTF-8 text.
    String(String),
}

impl ListItem {
    fn tag(&self) -> u8 {
        match self {
            ListItem::Binary(_) => TAG_BINARY,
            ListItem::String(_) => TAG_STRING,
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            ListItem::Binary(bytes) => bytes,
            ListItem::String(text) => text.as_bytes(),
        }
    }

    /// Borrow the bytes if this is a binary item.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            ListItem::Binary(bytes) => Some(bytes),
            ListItem::String(_) => None,
        }
    }

    /// Borrow the text if this is a string item.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ListItem::String(text) => Some(text),
            ListItem::Binary(_) => None,
        }
    }
}

impl std::fmt::Debug for ListItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListItem::Binary(bytes) => write!(f, "Binary([{} bytes])", bytes.len()),
            ListItem::String(text) => f.debug_tuple("String").field(text).finish(),
        }
    }
}

/// Encode a list of tagged items.
pub fn encode_typed_list(items: &[ListItem]) -> Result<Vec<u8>, WireError> {
    let total: usize = items
        .iter()
        .map(|item| 1 + LENGTH_PREFIX_SIZE + item.bytes().len())
        .sum();
    let mut out = Vec::with_capacity(total);
    for item in items {
        out.push(item.tag());
        write_element(&mut out, item.bytes())?;
    }
    Ok(out)
}

/// Decode a list produced by [`encode_typed_list`].
///
/// Unknown tags and string elements that are not valid UTF-8 are
/// [`WireError::MalformedEncoding`].
pub fn decode_typed_list(data: &[u8]) -> Result<Vec<ListItem>, WireError> {
    let mut items = Vec::new();
    let mut rest = data;
    while let Some((&tag, tail)) = rest.split_first() {
        let (bytes, tail) = read_element(tail)?;
        let item = match tag {
            TAG_BINARY => ListItem::Binary(bytes.to_vec()),
            TAG_STRING => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| WireError::malformed("string element is not valid UTF-8"))?;
                ListItem::String(text.to_owned())
            }
            other => {
                return Err(WireError::malformed(format!(
                    "unknown element tag {other}"
                )))
            }
        };
        items.push(item);
        rest = tail;
    }
    Ok(items)
}

fn write_element(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| WireError::ElementTooLarge { len: bytes.len() })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_element(data: &[u8]) -> Result<(&[u8], &[u8]), WireError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(WireError::malformed(format!(
            "truncated length prefix ({} bytes left)",
            data.len()
        )));
    }
    let (prefix, rest) = data.split_at(LENGTH_PREFIX_SIZE);
    let mut len_bytes = [0u8; LENGTH_PREFIX_SIZE];
    len_bytes.copy_from_slice(prefix);
    let len = u32::from_le_bytes(len_bytes) as usize;
    if rest.len() < len {
        return Err(WireError::malformed(format!(
            "element of {len} bytes overruns input ({} bytes left)",
            rest.len()
        )));
    }
    Ok(rest.split_at(len))
}
