//! Header codec for requests and responses, plus request validation.
//!
//! Everything here is a pure function over byte slices so it can be exercised
//! without a connection. All multi-byte integers are little-endian.

use crate::error::SessionError;
use crate::protocol::{Operation, Status, HEADER_SIZE, SIZE_FIELD, VERSION};

/// Fixed response prefix: version (1) | status (2) | name_len (2)
pub const RESPONSE_PREFIX_SIZE: usize = 5;

/// One decoded request header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub client_id: u32,
    pub version: u8,
    pub op: u8,
    /// Declared filename length, as sent
    pub name_len: u16,
    /// Filename bytes actually present in the datagram (may be shorter than declared)
    pub filename: Vec<u8>,
    /// Declared payload size; only decoded for store requests
    pub size: Option<u32>,
}

impl Request {
    /// Build a well-formed request for the current protocol version.
    pub fn new(client_id: u32, op: Operation, filename: &[u8], size: Option<u32>) -> Self {
        Self {
            client_id,
            version: VERSION,
            op: op.code(),
            name_len: filename.len().min(u16::MAX as usize) as u16,
            filename: filename.to_vec(),
            size,
        }
    }

    pub fn filename_lossy(&self) -> String {
        String::from_utf8_lossy(&self.filename).into_owned()
    }
}

/// Decode a request header from the first datagram of a session.
///
/// Returns the request and the number of bytes the header occupied; anything after
/// that offset is early payload. Only a datagram shorter than the fixed prefix fails
/// here. A short filename is left for [`validate`].
pub fn decode_request(buf: &[u8]) -> Result<(Request, usize), SessionError> {
    if buf.len() < HEADER_SIZE {
        return Err(SessionError::Truncated {
            got: buf.len(),
            need: HEADER_SIZE,
        });
    }

    let client_id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let version = buf[4];
    let op = buf[5];
    let name_len = u16::from_le_bytes([buf[6], buf[7]]);

    let name_end = (HEADER_SIZE + name_len as usize).min(buf.len());
    let filename = buf[HEADER_SIZE..name_end].to_vec();
    let mut consumed = name_end;

    let size = if op == crate::protocol::op::STORE && buf.len() >= name_end + SIZE_FIELD {
        let s = &buf[name_end..name_end + SIZE_FIELD];
        consumed += SIZE_FIELD;
        Some(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    } else {
        None
    };

    Ok((
        Request {
            client_id,
            version,
            op,
            name_len,
            filename,
            size,
        },
        consumed,
    ))
}

/// Encode a request header (client side). The size field is written only when present.
pub fn encode_request(req: &Request) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + req.filename.len() + SIZE_FIELD);
    out.extend_from_slice(&req.client_id.to_le_bytes());
    out.push(req.version);
    out.push(req.op);
    out.extend_from_slice(&req.name_len.to_le_bytes());
    out.extend_from_slice(&req.filename);
    if let Some(size) = req.size {
        out.extend_from_slice(&size.to_le_bytes());
    }
    out
}

/// Check a decoded request before dispatch.
///
/// A store header without a size field passes; the handler reads the size as zero.
pub fn validate(req: &Request) -> Result<Operation, SessionError> {
    if req.version != VERSION {
        return Err(SessionError::UnsupportedVersion {
            got: req.version,
            expected: VERSION,
        });
    }
    let op = Operation::from_code(req.op).ok_or(SessionError::UnknownOperation(req.op))?;
    if req.name_len as usize != req.filename.len() {
        return Err(SessionError::NameLengthMismatch {
            declared: req.name_len,
            actual: req.filename.len(),
        });
    }
    Ok(op)
}

/// Response header fields.
///
/// `Reply::default()` is status 0, no filename, no size; the builder methods fill in
/// the rest. A zero size is never put on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub filename: Vec<u8>,
    pub size: u32,
}

impl Reply {
    pub fn new(status: Status) -> Self {
        Self {
            status: status.code(),
            ..Self::default()
        }
    }

    pub fn with_filename(mut self, name: &[u8]) -> Self {
        self.filename = name.to_vec();
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }
}

/// Build the response header bytes.
/// Format: VERSION (1) | STATUS (2) | NAME_LEN (2) | NAME (NAME_LEN) | SIZE (4, only if nonzero)
pub fn encode_response(reply: &Reply) -> Vec<u8> {
    let name = &reply.filename[..reply.filename.len().min(u16::MAX as usize)];
    let mut header = Vec::with_capacity(RESPONSE_PREFIX_SIZE + name.len() + SIZE_FIELD);
    header.push(VERSION);
    header.extend_from_slice(&reply.status.to_le_bytes());
    header.extend_from_slice(&(name.len() as u16).to_le_bytes());
    header.extend_from_slice(name);
    if reply.size != 0 {
        header.extend_from_slice(&reply.size.to_le_bytes());
    }
    header
}

/// Parse the fixed response prefix.
/// Returns: (version, status, name_len)
pub fn parse_response_prefix(prefix: &[u8; RESPONSE_PREFIX_SIZE]) -> (u8, u16, u16) {
    let version = prefix[0];
    let status = u16::from_le_bytes([prefix[1], prefix[2]]);
    let name_len = u16::from_le_bytes([prefix[3], prefix[4]]);
    (version, status, name_len)
}

/// Decode a complete response header held in memory.
/// A trailing size field is read when at least four bytes follow the filename.
pub fn decode_response(buf: &[u8]) -> Result<(u8, Reply), SessionError> {
    if buf.len() < RESPONSE_PREFIX_SIZE {
        return Err(SessionError::Truncated {
            got: buf.len(),
            need: RESPONSE_PREFIX_SIZE,
        });
    }
    let mut prefix = [0u8; RESPONSE_PREFIX_SIZE];
    prefix.copy_from_slice(&buf[..RESPONSE_PREFIX_SIZE]);
    let (version, status, name_len) = parse_response_prefix(&prefix);

    let name_end = RESPONSE_PREFIX_SIZE + name_len as usize;
    if buf.len() < name_end {
        return Err(SessionError::Truncated {
            got: buf.len(),
            need: name_end,
        });
    }
    let filename = buf[RESPONSE_PREFIX_SIZE..name_end].to_vec();
    let size = if buf.len() >= name_end + SIZE_FIELD {
        let s = &buf[name_end..name_end + SIZE_FIELD];
        u32::from_le_bytes([s[0], s[1], s[2], s[3]])
    } else {
        0
    };
    Ok((
        version,
        Reply {
            status,
            filename,
            size,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::op;

    #[test]
    fn test_decode_store_request_with_early_payload() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&0x0102_0304u32.to_le_bytes());
        wire.push(VERSION);
        wire.push(op::STORE);
        wire.extend_from_slice(&5u16.to_le_bytes());
        wire.extend_from_slice(b"a.txt");
        wire.extend_from_slice(&3u32.to_le_bytes());
        wire.extend_from_slice(b"xyz");

        let (req, consumed) = decode_request(&wire).unwrap();
        assert_eq!(req.client_id, 0x0102_0304);
        assert_eq!(req.op, op::STORE);
        assert_eq!(req.filename, b"a.txt");
        assert_eq!(req.size, Some(3));
        assert_eq!(consumed, HEADER_SIZE + 5 + SIZE_FIELD);
        assert_eq!(&wire[consumed..], b"xyz");
        assert_eq!(validate(&req).unwrap(), Operation::Store);
    }

    #[test]
    fn test_decode_ignores_size_for_non_store() {
        let req = Request::new(7, Operation::Fetch, b"f", None);
        let mut wire = encode_request(&req);
        wire.extend_from_slice(&[9, 9, 9, 9]);
        let (decoded, consumed) = decode_request(&wire).unwrap();
        assert_eq!(decoded.size, None);
        assert_eq!(consumed, HEADER_SIZE + 1);
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_decode_truncated_prefix() {
        let err = decode_request(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, SessionError::Truncated { got: 3, need: 8 }));
    }

    #[test]
    fn test_validate_rejects_short_filename() {
        // Declares 10 name bytes but only 4 arrive
        let mut wire = Vec::new();
        wire.extend_from_slice(&1u32.to_le_bytes());
        wire.push(VERSION);
        wire.push(op::DELETE);
        wire.extend_from_slice(&10u16.to_le_bytes());
        wire.extend_from_slice(b"abcd");

        let (req, _) = decode_request(&wire).unwrap();
        assert_eq!(req.filename, b"abcd");
        match validate(&req) {
            Err(SessionError::NameLengthMismatch { declared, actual }) => {
                assert_eq!(declared, 10);
                assert_eq!(actual, 4);
            }
            other => panic!("expected name length mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_version_and_op() {
        let mut req = Request::new(1, Operation::List, b"", None);
        req.version = VERSION + 1;
        assert!(matches!(
            validate(&req),
            Err(SessionError::UnsupportedVersion { .. })
        ));

        let mut req = Request::new(1, Operation::List, b"", None);
        req.op = 99;
        assert!(matches!(
            validate(&req),
            Err(SessionError::UnknownOperation(99))
        ));
    }

    #[test]
    fn test_validate_store_without_size_passes() {
        let req = Request::new(1, Operation::Store, b"abc", None);
        let wire = encode_request(&req);
        assert_eq!(wire.len(), HEADER_SIZE + 3);
        let (decoded, consumed) = decode_request(&wire).unwrap();
        assert_eq!(decoded.size, None);
        assert_eq!(consumed, wire.len());
        assert_eq!(validate(&decoded).unwrap(), Operation::Store);
    }

    #[test]
    fn test_encode_response_minimal() {
        let bytes = encode_response(&Reply::new(Status::NoContent));
        assert_eq!(bytes, vec![VERSION, 0xEA, 0x03, 0, 0]);
    }

    #[test]
    fn test_encode_response_full() {
        let reply = Reply::new(Status::Fetched)
            .with_filename(b"ab")
            .with_size(0x0A0B_0C0D);
        let bytes = encode_response(&reply);
        assert_eq!(
            bytes,
            vec![VERSION, 210, 0, 2, 0, b'a', b'b', 0x0D, 0x0C, 0x0B, 0x0A]
        );
        // Same input, same bytes
        assert_eq!(bytes, encode_response(&reply.clone()));
    }

    #[test]
    fn test_default_reply() {
        let reply = Reply::default();
        assert_eq!(reply.status, 0);
        assert!(reply.filename.is_empty());
        assert_eq!(reply.size, 0);
        assert_eq!(encode_response(&reply), vec![VERSION, 0, 0, 0, 0]);
    }

    #[test]
    fn test_response_round_trip() {
        let replies = vec![
            Reply::new(Status::Stored).with_filename(b"report.pdf"),
            Reply::new(Status::Fetched)
                .with_filename(b"x")
                .with_size(1),
            Reply::new(Status::Listed)
                .with_filename(&[b'Q'; 36])
                .with_size(3),
            Reply::new(Status::InternalError),
            Reply::new(Status::FileNotFound).with_filename(&[0xFF, 0x00, 0x10]),
        ];
        for reply in replies {
            let (version, decoded) = decode_response(&encode_response(&reply)).unwrap();
            assert_eq!(version, VERSION);
            assert_eq!(decoded, reply);
        }
    }

    #[test]
    fn test_decode_response_truncated_name() {
        let mut bytes = encode_response(&Reply::new(Status::Stored).with_filename(b"abcdef"));
        bytes.truncate(RESPONSE_PREFIX_SIZE + 2);
        assert!(decode_response(&bytes).is_err());
    }
}
