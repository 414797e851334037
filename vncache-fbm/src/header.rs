//! FBM header block codec.
//!
//! A header block is a sequence of `(1-byte command, UTF-8 value, 0xFF)`
//! triples terminated by a zero-length triple: a lone `0xFF` in command
//! position. `0xFF` never occurs inside UTF-8 text, so values need no
//! escaping. Command byte values are bit-exact interop requirements.

use bytes::{BufMut, BytesMut};
use smallvec::SmallVec;

use crate::error::{FbmError, Result};

/// Response status header (response frames only).
pub const CMD_STATUS: u8 = 0x01;
/// Requested action (request frames only).
pub const CMD_ACTION: u8 = 0x02;
/// Primary object id.
pub const CMD_OBJECT_ID: u8 = 0xAA;
/// Rename target on upsert; new id in change-dequeue responses.
pub const CMD_NEW_OBJECT_ID: u8 = 0xAB;
/// Value terminator and end-of-headers marker.
pub const TERMINATOR: u8 = 0xFF;

/// Request actions with their wire tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Get,
    Upsert,
    Delete,
    Dequeue,
}

impl Action {
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Get => "g",
            Self::Upsert => "u",
            Self::Delete => "d",
            Self::Dequeue => "dq",
        }
    }

    pub fn from_token(token: &str) -> Result<Self> {
        match token {
            "g" => Ok(Self::Get),
            "u" => Ok(Self::Upsert),
            "d" => Ok(Self::Delete),
            "dq" => Ok(Self::Dequeue),
            other => Err(FbmError::UnknownToken(other.to_string())),
        }
    }
}

/// Response statuses with their wire tokens.
///
/// `Deleted` and `Modified` are carried only by change-dequeue responses;
/// every other response uses the `ok`/`err`/`nf` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Err,
    NotFound,
    Deleted,
    Modified,
}

impl Status {
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Err => "err",
            Self::NotFound => "nf",
            Self::Deleted => "deleted",
            Self::Modified => "modified",
        }
    }

    pub fn from_token(token: &str) -> Result<Self> {
        match token {
            "ok" => Ok(Self::Ok),
            "err" => Ok(Self::Err),
            "nf" => Ok(Self::NotFound),
            "deleted" => Ok(Self::Deleted),
            "modified" => Ok(Self::Modified),
            other => Err(FbmError::UnknownToken(other.to_string())),
        }
    }
}

/// One decoded header field: command byte plus borrowed value text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderField<'a> {
    pub command: u8,
    pub value: &'a str,
}

/// Decoded header block, value slices borrowing from the frame buffer.
pub type HeaderFields<'a> = SmallVec<[HeaderField<'a>; 4]>;

/// Append one `(command, value, 0xFF)` triple.
pub fn put_field(buf: &mut BytesMut, command: u8, value: &str) {
    buf.put_u8(command);
    buf.put_slice(value.as_bytes());
    buf.put_u8(TERMINATOR);
}

/// Append the end-of-headers marker.
pub fn finish(buf: &mut BytesMut) {
    buf.put_u8(TERMINATOR);
}

/// Parse the header block at the start of `src`.
///
/// Returns the fields and the number of bytes consumed (body starts at that
/// offset). `max_header` bounds the size of the whole block including the
/// end marker.
pub fn parse(src: &[u8], max_header: usize) -> Result<(HeaderFields<'_>, usize)> {
    let mut fields = HeaderFields::new();
    let mut pos = 0usize;

    loop {
        if pos >= src.len() {
            return Err(FbmError::Truncated);
        }
        if pos >= max_header {
            return Err(FbmError::HeaderTooLarge {
                size: pos + 1,
                max: max_header,
            });
        }

        let command = src[pos];
        pos += 1;
        if command == TERMINATOR {
            // zero-length triple: end of headers
            return Ok((fields, pos));
        }
        if !matches!(
            command,
            CMD_STATUS | CMD_ACTION | CMD_OBJECT_ID | CMD_NEW_OBJECT_ID
        ) {
            return Err(FbmError::UnknownCommand(command));
        }

        let rest = &src[pos..];
        let value_len = rest
            .iter()
            .position(|&b| b == TERMINATOR)
            .ok_or(FbmError::Truncated)?;
        if pos + value_len + 1 > max_header {
            return Err(FbmError::HeaderTooLarge {
                size: pos + value_len + 1,
                max: max_header,
            });
        }
        let value = std::str::from_utf8(&rest[..value_len]).map_err(|_| FbmError::BadValue)?;
        fields.push(HeaderField { command, value });
        pos += value_len + 1;
    }
}

/// First value carried under `command`, if any.
#[must_use]
pub fn find<'a>(fields: &HeaderFields<'a>, command: u8) -> Option<&'a str> {
    fields.iter().find(|f| f.command == command).map(|f| f.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_tables_are_bit_exact() {
        assert_eq!(Action::Get.token(), "g");
        assert_eq!(Action::Upsert.token(), "u");
        assert_eq!(Action::Delete.token(), "d");
        assert_eq!(Action::Dequeue.token(), "dq");
        assert_eq!(Status::Ok.token(), "ok");
        assert_eq!(Status::Err.token(), "err");
        assert_eq!(Status::NotFound.token(), "nf");
        assert_eq!(Status::Deleted.token(), "deleted");
        assert_eq!(Status::Modified.token(), "modified");
        assert_eq!(CMD_STATUS, 0x01);
        assert_eq!(CMD_ACTION, 0x02);
        assert_eq!(CMD_OBJECT_ID, 0xAA);
        assert_eq!(CMD_NEW_OBJECT_ID, 0xAB);
    }

    #[test]
    fn test_write_parse_roundtrip() {
        let mut buf = BytesMut::new();
        put_field(&mut buf, CMD_ACTION, "u");
        put_field(&mut buf, CMD_OBJECT_ID, "user:1");
        put_field(&mut buf, CMD_NEW_OBJECT_ID, "user:2");
        finish(&mut buf);
        buf.put_slice(b"body bytes");

        let (fields, consumed) = parse(&buf, 1024).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(find(&fields, CMD_ACTION), Some("u"));
        assert_eq!(find(&fields, CMD_OBJECT_ID), Some("user:1"));
        assert_eq!(find(&fields, CMD_NEW_OBJECT_ID), Some("user:2"));
        assert_eq!(&buf[consumed..], b"body bytes");
    }

    #[test]
    fn test_exact_byte_layout() {
        let mut buf = BytesMut::new();
        put_field(&mut buf, CMD_ACTION, "g");
        put_field(&mut buf, CMD_OBJECT_ID, "abcd");
        finish(&mut buf);
        assert_eq!(
            &buf[..],
            &[0x02, b'g', 0xFF, 0xAA, b'a', b'b', b'c', b'd', 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_empty_header_block() {
        let (fields, consumed) = parse(&[0xFF, 1, 2, 3], 16).unwrap();
        assert!(fields.is_empty());
        assert_eq!(consumed, 1);
    }

    #[test]
    fn test_truncated_block_rejected() {
        assert!(matches!(parse(&[], 16), Err(FbmError::Truncated)));
        assert!(matches!(
            parse(&[CMD_ACTION, b'g'], 16),
            Err(FbmError::Truncated)
        ));
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(matches!(
            parse(&[0x7E, b'x', 0xFF, 0xFF], 16),
            Err(FbmError::UnknownCommand(0x7E))
        ));
    }

    #[test]
    fn test_oversize_header_rejected() {
        let mut buf = BytesMut::new();
        put_field(&mut buf, CMD_OBJECT_ID, &"k".repeat(64));
        finish(&mut buf);
        assert!(matches!(
            parse(&buf, 16),
            Err(FbmError::HeaderTooLarge { .. })
        ));
    }

    #[test]
    fn test_non_utf8_value_rejected() {
        let buf = [CMD_OBJECT_ID, 0xC3, 0x28, 0xFF, 0xFF];
        assert!(matches!(parse(&buf, 16), Err(FbmError::BadValue)));
    }

    #[test]
    fn test_unknown_tokens_rejected() {
        assert!(Action::from_token("x").is_err());
        assert!(Status::from_token("okay").is_err());
    }
}
