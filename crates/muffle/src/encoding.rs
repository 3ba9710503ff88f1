//! Encoding policies: what a snapshot hands back.
//!
//! Units always buffer raw bytes. The policy decides how a snapshot is
//! presented: `Vec<u8>` keeps the bytes, `String` decodes them as UTF-8 and
//! replaces invalid sequences with U+FFFD.

use std::fmt::Debug;

/// Output type of a capture unit.
pub trait Encoding: Debug + Default + Clone + PartialEq + 'static {
    /// True when snapshots are raw bytes.
    const BINARY: bool;

    fn decode(bytes: Vec<u8>) -> Self;

    /// Bytes to write back to an original destination.
    fn as_bytes(&self) -> &[u8];

    fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Append `other`, keeping earlier content first.
    fn append(&mut self, other: Self);
}

impl Encoding for Vec<u8> {
    const BINARY: bool = true;

    fn decode(bytes: Vec<u8>) -> Self {
        bytes
    }

    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn append(&mut self, mut other: Self) {
        Vec::append(self, &mut other);
    }
}

impl Encoding for String {
    const BINARY: bool = false;

    fn decode(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }

    fn as_bytes(&self) -> &[u8] {
        str::as_bytes(self)
    }

    fn append(&mut self, other: Self) {
        self.push_str(&other);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_replaces_invalid_utf8() {
        let text = String::decode(vec![b'o', b'k', 0xff, b'!']);
        assert_eq!(text, "ok\u{fffd}!");
    }

    #[test]
    fn test_binary_keeps_bytes() {
        let bytes = Vec::<u8>::decode(vec![0xff, 0x00]);
        assert_eq!(bytes, vec![0xff, 0x00]);
    }

    #[test]
    fn test_append_keeps_order() {
        let mut text = String::from("a");
        Encoding::append(&mut text, String::from("b"));
        assert_eq!(text, "ab");

        let mut bytes = vec![1u8];
        Encoding::append(&mut bytes, vec![2u8]);
        assert_eq!(bytes, vec![1, 2]);
    }
}
