//! Wire-level frame tests: byte-exact layouts and multiplexed id matching.

use bytes::Bytes;
use vncache_fbm::frame::{decode_request, decode_response, encode_request, encode_response};
use vncache_fbm::frame::{FrameLimits, Request, Response};
use vncache_fbm::header::{Action, Status};

fn limits() -> FrameLimits {
    FrameLimits::default()
}

#[test]
fn upsert_request_bytes_are_exact() {
    let request = Request {
        id: 1,
        action: Action::Upsert,
        object_id: Some("user:1".to_string()),
        new_object_id: None,
        body: Bytes::from_static(b"alpha"),
    };
    let wire = encode_request(&request, &limits()).unwrap();

    let mut expected = vec![0u8, 0, 0, 1];
    expected.extend_from_slice(&[0x02, b'u', 0xFF]);
    expected.extend_from_slice(b"\xAAuser:1\xFF");
    expected.push(0xFF);
    expected.extend_from_slice(b"alpha");
    assert_eq!(&wire[..], &expected[..]);
}

#[test]
fn ok_response_with_body_decodes_back() {
    let wire = encode_response(
        &Response::ok_with_body(1, Bytes::from_static(b"alpha")),
        &limits(),
    )
    .unwrap();
    let response = decode_response(&wire, &limits()).unwrap();
    assert_eq!(response.id, 1);
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.body, Bytes::from_static(b"alpha"));
}

#[test]
fn interleaved_responses_keep_their_ids() {
    // Encode responses out of request order; ids alone must carry the
    // correlation.
    let ids = [7u32, 3, 9, 1];
    let wires: Vec<Bytes> = ids
        .iter()
        .map(|&id| {
            encode_response(
                &Response::ok_with_body(id, Bytes::from(format!("body:{id}"))),
                &limits(),
            )
            .unwrap()
        })
        .collect();

    for (wire, &id) in wires.iter().zip(&ids) {
        let response = decode_response(wire, &limits()).unwrap();
        assert_eq!(response.id, id);
        assert_eq!(response.body, Bytes::from(format!("body:{id}")));
    }
}

#[test]
fn dequeue_request_has_no_object_id() {
    let request = Request {
        id: 2,
        action: Action::Dequeue,
        object_id: None,
        new_object_id: None,
        body: Bytes::new(),
    };
    let wire = encode_request(&request, &limits()).unwrap();
    assert_eq!(&wire[..], &[0, 0, 0, 2, 0x02, b'd', b'q', 0xFF, 0xFF]);

    let back = decode_request(&wire, &limits()).unwrap();
    assert_eq!(back.action, Action::Dequeue);
    assert!(back.object_id.is_none());
    assert!(back.body.is_empty());
}

#[test]
fn rename_request_round_trips_both_ids() {
    let request = Request {
        id: 5,
        action: Action::Upsert,
        object_id: Some("old-name".to_string()),
        new_object_id: Some("new-name".to_string()),
        body: Bytes::from_static(b"v2"),
    };
    let wire = encode_request(&request, &limits()).unwrap();
    let back = decode_request(&wire, &limits()).unwrap();
    assert_eq!(back.object_id.as_deref(), Some("old-name"));
    assert_eq!(back.new_object_id.as_deref(), Some("new-name"));
    assert_eq!(back.body, Bytes::from_static(b"v2"));
}

#[test]
fn negotiated_limits_bound_both_directions() {
    let tight = FrameLimits {
        max_header: 32,
        max_message: 64,
    };

    // Sender refuses to build an oversize frame.
    let request = Request {
        id: 1,
        action: Action::Upsert,
        object_id: Some("key-name".to_string()),
        new_object_id: None,
        body: Bytes::from(vec![0u8; 128]),
    };
    assert!(encode_request(&request, &tight).is_err());

    // Receiver refuses to accept one.
    let oversized = Bytes::from(vec![0u8; 128]);
    assert!(decode_request(&oversized, &tight).is_err());
}
