//! Whole-frame encode/decode.
//!
//! A frame is one WebSocket binary message: 4-byte big-endian message id,
//! header block, then the remaining bytes as opaque body. Ids are positive
//! for requests and echoed on responses; id 0 is reserved for out-of-band
//! control and is refused in both directions.
//!
//! Both encoders refuse to produce, and both decoders to accept, a frame
//! larger than the negotiated per-connection maximum.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FbmError, Result};
use crate::header::{self, Action, Status, CMD_ACTION, CMD_NEW_OBJECT_ID, CMD_OBJECT_ID, CMD_STATUS};

/// Negotiated per-connection size limits.
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    /// Upper bound on the header block, bytes.
    pub max_header: usize,
    /// Upper bound on a whole frame, bytes.
    pub max_message: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_header: 8192,
            max_message: 1 << 20,
        }
    }
}

/// A decoded request frame.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: u32,
    pub action: Action,
    pub object_id: Option<String>,
    pub new_object_id: Option<String>,
    pub body: Bytes,
}

/// A decoded response frame.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: u32,
    pub status: Status,
    pub object_id: Option<String>,
    pub new_object_id: Option<String>,
    pub body: Bytes,
}

impl Response {
    /// Plain status-only response.
    #[must_use]
    pub fn status(id: u32, status: Status) -> Self {
        Self {
            id,
            status,
            object_id: None,
            new_object_id: None,
            body: Bytes::new(),
        }
    }

    /// `ok` response carrying body bytes (GET hits).
    #[must_use]
    pub fn ok_with_body(id: u32, body: Bytes) -> Self {
        Self {
            id,
            status: Status::Ok,
            object_id: None,
            new_object_id: None,
            body,
        }
    }

    /// Change-dequeue response: `deleted` or `modified` with the event ids
    /// in header fields and no body.
    #[must_use]
    pub fn change_event(
        id: u32,
        deleted: bool,
        current_id: &str,
        alternate_id: Option<&str>,
    ) -> Self {
        Self {
            id,
            status: if deleted { Status::Deleted } else { Status::Modified },
            object_id: Some(current_id.to_string()),
            new_object_id: alternate_id.map(str::to_string),
            body: Bytes::new(),
        }
    }
}

/// Encode a request. Fails when the result would exceed the limits.
pub fn encode_request(req: &Request, limits: &FrameLimits) -> Result<Bytes> {
    if req.id == 0 {
        return Err(FbmError::IdReserved);
    }
    let mut buf = BytesMut::with_capacity(64 + req.body.len());
    buf.put_u32(req.id);
    header::put_field(&mut buf, CMD_ACTION, req.action.token());
    if let Some(id) = &req.object_id {
        header::put_field(&mut buf, CMD_OBJECT_ID, id);
    }
    if let Some(id) = &req.new_object_id {
        header::put_field(&mut buf, CMD_NEW_OBJECT_ID, id);
    }
    header::finish(&mut buf);
    check_header_len(buf.len() - 4, limits)?;
    buf.put_slice(&req.body);
    check_message_len(buf.len(), limits)?;
    Ok(buf.freeze())
}

/// Encode a response. Fails when the result would exceed the limits.
pub fn encode_response(resp: &Response, limits: &FrameLimits) -> Result<Bytes> {
    if resp.id == 0 {
        return Err(FbmError::IdReserved);
    }
    let mut buf = BytesMut::with_capacity(64 + resp.body.len());
    buf.put_u32(resp.id);
    header::put_field(&mut buf, CMD_STATUS, resp.status.token());
    if let Some(id) = &resp.object_id {
        header::put_field(&mut buf, CMD_OBJECT_ID, id);
    }
    if let Some(id) = &resp.new_object_id {
        header::put_field(&mut buf, CMD_NEW_OBJECT_ID, id);
    }
    header::finish(&mut buf);
    check_header_len(buf.len() - 4, limits)?;
    buf.put_slice(&resp.body);
    check_message_len(buf.len(), limits)?;
    Ok(buf.freeze())
}

/// Decode a request frame.
pub fn decode_request(frame: &Bytes, limits: &FrameLimits) -> Result<Request> {
    let (id, fields, body) = split_frame(frame, limits)?;
    let action = header::find(&fields, CMD_ACTION)
        .ok_or_else(|| FbmError::UnknownToken("missing action".to_string()))?;
    let action = Action::from_token(action)?;
    Ok(Request {
        id,
        action,
        object_id: header::find(&fields, CMD_OBJECT_ID).map(str::to_string),
        new_object_id: header::find(&fields, CMD_NEW_OBJECT_ID).map(str::to_string),
        body,
    })
}

/// Decode a response frame.
pub fn decode_response(frame: &Bytes, limits: &FrameLimits) -> Result<Response> {
    let (id, fields, body) = split_frame(frame, limits)?;
    let status = header::find(&fields, CMD_STATUS)
        .ok_or_else(|| FbmError::UnknownToken("missing status".to_string()))?;
    let status = Status::from_token(status)?;
    Ok(Response {
        id,
        status,
        object_id: header::find(&fields, CMD_OBJECT_ID).map(str::to_string),
        new_object_id: header::find(&fields, CMD_NEW_OBJECT_ID).map(str::to_string),
        body,
    })
}

fn split_frame<'a>(
    frame: &'a Bytes,
    limits: &FrameLimits,
) -> Result<(u32, header::HeaderFields<'a>, Bytes)> {
    check_message_len(frame.len(), limits)?;
    if frame.len() < 4 {
        return Err(FbmError::Truncated);
    }
    let id = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
    if id == 0 {
        return Err(FbmError::IdReserved);
    }
    let (fields, consumed) = header::parse(&frame[4..], limits.max_header)?;
    let body = frame.slice(4 + consumed..);
    Ok((id, fields, body))
}

fn check_message_len(len: usize, limits: &FrameLimits) -> Result<()> {
    if len > limits.max_message {
        return Err(FbmError::MessageTooLarge {
            size: len,
            max: limits.max_message,
        });
    }
    Ok(())
}

fn check_header_len(len: usize, limits: &FrameLimits) -> Result<()> {
    if len > limits.max_header {
        return Err(FbmError::HeaderTooLarge {
            size: len,
            max: limits.max_header,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> FrameLimits {
        FrameLimits::default()
    }

    #[test]
    fn test_request_roundtrip() {
        let req = Request {
            id: 7,
            action: Action::Upsert,
            object_id: Some("user:1".to_string()),
            new_object_id: None,
            body: Bytes::from_static(b"alpha"),
        };
        let wire = encode_request(&req, &limits()).unwrap();
        let back = decode_request(&wire, &limits()).unwrap();
        assert_eq!(back.id, 7);
        assert_eq!(back.action, Action::Upsert);
        assert_eq!(back.object_id.as_deref(), Some("user:1"));
        assert!(back.new_object_id.is_none());
        assert_eq!(back.body, Bytes::from_static(b"alpha"));
    }

    #[test]
    fn test_request_wire_layout() {
        let req = Request {
            id: 1,
            action: Action::Get,
            object_id: Some("abcd".to_string()),
            new_object_id: None,
            body: Bytes::new(),
        };
        let wire = encode_request(&req, &limits()).unwrap();
        assert_eq!(
            &wire[..],
            &[
                0, 0, 0, 1, // message id
                0x02, b'g', 0xFF, // action
                0xAA, b'a', b'b', b'c', b'd', 0xFF, // object id
                0xFF, // end of headers
            ]
        );
    }

    #[test]
    fn test_response_roundtrip_with_body() {
        let resp = Response::ok_with_body(42, Bytes::from_static(b"payload"));
        let wire = encode_response(&resp, &limits()).unwrap();
        let back = decode_response(&wire, &limits()).unwrap();
        assert_eq!(back.id, 42);
        assert_eq!(back.status, Status::Ok);
        assert_eq!(back.body, Bytes::from_static(b"payload"));
    }

    #[test]
    fn test_change_event_response_shape() {
        let resp = Response::change_event(9, false, "old1", Some("new1"));
        let wire = encode_response(&resp, &limits()).unwrap();
        let back = decode_response(&wire, &limits()).unwrap();
        assert_eq!(back.status, Status::Modified);
        assert_eq!(back.object_id.as_deref(), Some("old1"));
        assert_eq!(back.new_object_id.as_deref(), Some("new1"));
        assert!(back.body.is_empty());

        let resp = Response::change_event(10, true, "gone", None);
        let wire = encode_response(&resp, &limits()).unwrap();
        let back = decode_response(&wire, &limits()).unwrap();
        assert_eq!(back.status, Status::Deleted);
        assert!(back.new_object_id.is_none());
    }

    #[test]
    fn test_id_zero_is_reserved() {
        let req = Request {
            id: 0,
            action: Action::Get,
            object_id: Some("abcd".to_string()),
            new_object_id: None,
            body: Bytes::new(),
        };
        assert!(matches!(
            encode_request(&req, &limits()),
            Err(FbmError::IdReserved)
        ));

        // id 0 on the wire is refused on decode too
        let wire = Bytes::from_static(&[0, 0, 0, 0, 0xFF]);
        assert!(matches!(
            decode_request(&wire, &limits()),
            Err(FbmError::IdReserved)
        ));
    }

    #[test]
    fn test_oversize_body_refused_on_encode() {
        let small = FrameLimits {
            max_header: 64,
            max_message: 32,
        };
        let req = Request {
            id: 1,
            action: Action::Upsert,
            object_id: Some("user:1".to_string()),
            new_object_id: None,
            body: Bytes::from(vec![0u8; 64]),
        };
        assert!(matches!(
            encode_request(&req, &small),
            Err(FbmError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_oversize_frame_refused_on_decode() {
        let small = FrameLimits {
            max_header: 64,
            max_message: 16,
        };
        let wire = Bytes::from(vec![0u8; 32]);
        assert!(matches!(
            decode_response(&wire, &small),
            Err(FbmError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_missing_action_is_an_error() {
        let mut buf = BytesMut::new();
        buf.put_u32(5);
        header::put_field(&mut buf, CMD_OBJECT_ID, "user:1");
        header::finish(&mut buf);
        let wire = buf.freeze();
        assert!(decode_request(&wire, &limits()).is_err());
    }
}
