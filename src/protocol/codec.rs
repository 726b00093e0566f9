//! GETFILE header encoding and decoding.
//!
//! Every function in this module is pure: it works on byte slices and never
//! touches a socket. Incremental decoders report [`Frame::Incomplete`] while the
//! `\r\n\r\n` terminator has not fully arrived, and [`Frame::Complete`] with the
//! number of bytes that belong to the header once it has. Bytes following the
//! terminator are left untouched for the caller to treat as body content.
//!
//! # Wire Format
//!
//! ```text
//! GETFILE GET <path>\r\n\r\n
//! GETFILE OK <length>\r\n\r\n<length bytes of content>
//! GETFILE FILE_NOT_FOUND \r\n\r\n
//! GETFILE ERROR \r\n\r\n
//! GETFILE INVALID\r\n\r\n
//! ```
use std::fmt;

use thiserror::Error;

pub const SCHEME: &str = "GETFILE";
pub const METHOD: &str = "GET";
pub const TERMINATOR: &[u8] = b"\r\n\r\n";

const OK_PREFIX: &str = "GETFILE OK ";
const FILE_NOT_FOUND_HEADER: &[u8] = b"GETFILE FILE_NOT_FOUND \r\n\r\n";
const ERROR_HEADER: &[u8] = b"GETFILE ERROR \r\n\r\n";
// No trailing space, unlike the other statuses.
const INVALID_HEADER: &[u8] = b"GETFILE INVALID\r\n\r\n";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("header is missing the \\r\\n\\r\\n terminator")]
    MissingTerminator,

    #[error("header is not valid UTF-8")]
    NotUtf8,

    #[error("expected scheme '{SCHEME}', found '{0}'")]
    Scheme(String),

    #[error("expected method '{METHOD}', found '{0}'")]
    Method(String),

    #[error("expected {expected} header tokens, found {found}")]
    TokenCount { expected: usize, found: usize },

    #[error("empty header token")]
    EmptyToken,

    #[error("unknown status '{0}'")]
    UnknownStatus(String),

    #[error("invalid content length '{0}'")]
    ContentLength(String),

    #[error("status {status} {reason}")]
    StatusLength { status: Status, reason: &'static str },
}

/// Result of running an incremental decoder over a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<T> {
    /// The header is complete; `consumed` bytes (terminator included) belong to it.
    Complete { value: T, consumed: usize },
    /// The terminator has not arrived yet.
    Incomplete,
}

/// Transfer status, as carried in the response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    FileNotFound,
    Error,
    Invalid,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::FileNotFound => "FILE_NOT_FOUND",
            Status::Error => "ERROR",
            Status::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Status {
    type Error = ProtocolError;

    fn try_from(value: &str) -> Result<Self, ProtocolError> {
        match value {
            "OK" => Ok(Status::Ok),
            "FILE_NOT_FOUND" => Ok(Status::FileNotFound),
            "ERROR" => Ok(Status::Error),
            "INVALID" => Ok(Status::Invalid),
            s => Err(ProtocolError::UnknownStatus(s.to_string())),
        }
    }
}

/// A parsed `GETFILE GET <path>` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    path: String,
}

impl Request {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn into_path(self) -> String {
        self.path
    }
}

/// Response header. Only `Ok` carries a content length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHeader {
    Ok { content_length: u64 },
    FileNotFound,
    Error,
    Invalid,
}

impl ResponseHeader {
    /// Builds a header from a status and an optional length, rejecting pairs
    /// where the length is present for anything but `OK` or missing for `OK`.
    pub fn new(status: Status, content_length: Option<u64>) -> Result<Self, ProtocolError> {
        match (status, content_length) {
            (Status::Ok, Some(content_length)) => Ok(ResponseHeader::Ok { content_length }),
            (Status::Ok, None) => Err(ProtocolError::StatusLength {
                status,
                reason: "requires a content length",
            }),
            (_, Some(_)) => Err(ProtocolError::StatusLength {
                status,
                reason: "must not carry a content length",
            }),
            (Status::FileNotFound, None) => Ok(ResponseHeader::FileNotFound),
            (Status::Error, None) => Ok(ResponseHeader::Error),
            (Status::Invalid, None) => Ok(ResponseHeader::Invalid),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            ResponseHeader::Ok { .. } => Status::Ok,
            ResponseHeader::FileNotFound => Status::FileNotFound,
            ResponseHeader::Error => Status::Error,
            ResponseHeader::Invalid => Status::Invalid,
        }
    }

    pub fn content_length(&self) -> Option<u64> {
        match self {
            ResponseHeader::Ok { content_length } => Some(*content_length),
            _ => None,
        }
    }
}

pub fn encode_request(path: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SCHEME.len() + METHOD.len() + path.len() + 6);
    buf.extend_from_slice(SCHEME.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(METHOD.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(path.as_bytes());
    buf.extend_from_slice(TERMINATOR);
    buf
}

/// Decodes a complete request. A buffer without a terminator is invalid.
pub fn decode_request(bytes: &[u8]) -> Result<Request, ProtocolError> {
    match parse_request(bytes)? {
        Frame::Complete { value, .. } => Ok(value),
        Frame::Incomplete => Err(ProtocolError::MissingTerminator),
    }
}

/// Incremental request decoder.
pub fn parse_request(bytes: &[u8]) -> Result<Frame<Request>, ProtocolError> {
    let Some((head, consumed)) = split_header(bytes) else {
        return Ok(Frame::Incomplete);
    };
    let head = std::str::from_utf8(head).map_err(|_| ProtocolError::NotUtf8)?;

    let tokens = head.split(' ').collect::<Vec<&str>>();
    if tokens.len() != 3 {
        return Err(ProtocolError::TokenCount {
            expected: 3,
            found: tokens.len(),
        });
    }
    if tokens.iter().any(|t| t.is_empty()) {
        return Err(ProtocolError::EmptyToken);
    }
    if tokens[0] != SCHEME {
        return Err(ProtocolError::Scheme(tokens[0].to_string()));
    }
    if tokens[1] != METHOD {
        return Err(ProtocolError::Method(tokens[1].to_string()));
    }

    Ok(Frame::Complete {
        value: Request::new(tokens[2]),
        consumed,
    })
}

pub fn encode_response_header(header: &ResponseHeader) -> Vec<u8> {
    match header {
        ResponseHeader::Ok { content_length } => {
            let mut buf = format!("{OK_PREFIX}{content_length}").into_bytes();
            buf.extend_from_slice(TERMINATOR);
            buf
        }
        ResponseHeader::FileNotFound => FILE_NOT_FOUND_HEADER.to_vec(),
        ResponseHeader::Error => ERROR_HEADER.to_vec(),
        ResponseHeader::Invalid => INVALID_HEADER.to_vec(),
    }
}

/// Incremental response header decoder.
///
/// Tokens are separated by any amount of whitespace, so both
/// `GETFILE INVALID\r\n\r\n` and `GETFILE INVALID \r\n\r\n` are accepted.
pub fn decode_response_header(bytes: &[u8]) -> Result<Frame<ResponseHeader>, ProtocolError> {
    let Some((head, consumed)) = split_header(bytes) else {
        return Ok(Frame::Incomplete);
    };
    let head = std::str::from_utf8(head).map_err(|_| ProtocolError::NotUtf8)?;

    let tokens = head.split_ascii_whitespace().collect::<Vec<&str>>();
    let Some(scheme) = tokens.first() else {
        return Err(ProtocolError::TokenCount {
            expected: 2,
            found: 0,
        });
    };
    if *scheme != SCHEME {
        return Err(ProtocolError::Scheme(scheme.to_string()));
    }

    let status = match tokens.get(1) {
        Some(status) => Status::try_from(*status)?,
        None => {
            return Err(ProtocolError::TokenCount {
                expected: 2,
                found: tokens.len(),
            });
        }
    };

    let header = match status {
        Status::Ok => {
            if tokens.len() != 3 {
                return Err(ProtocolError::TokenCount {
                    expected: 3,
                    found: tokens.len(),
                });
            }
            let length = tokens[2];
            if !length.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ProtocolError::ContentLength(length.to_string()));
            }
            let content_length = length
                .parse::<u64>()
                .map_err(|_| ProtocolError::ContentLength(length.to_string()))?;
            ResponseHeader::Ok { content_length }
        }
        status => {
            if tokens.len() != 2 {
                return Err(ProtocolError::TokenCount {
                    expected: 2,
                    found: tokens.len(),
                });
            }
            ResponseHeader::new(status, None)?
        }
    };

    Ok(Frame::Complete {
        value: header,
        consumed,
    })
}

/// Locates the first terminator. Returns the bytes before it and the header
/// length including the terminator.
fn split_header(bytes: &[u8]) -> Option<(&[u8], usize)> {
    bytes
        .windows(TERMINATOR.len())
        .position(|w| w == TERMINATOR)
        .map(|end| (&bytes[..end], end + TERMINATOR.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_encoding() {
        assert_eq!(encode_request("/a.txt"), b"GETFILE GET /a.txt\r\n\r\n");
    }

    #[test]
    fn request_decoding() {
        let req = decode_request(b"GETFILE GET /courses/file.html\r\n\r\n").unwrap();
        assert_eq!(req.path(), "/courses/file.html");
    }

    #[test]
    fn request_rejects_malformed() {
        let inputs: Vec<(&[u8], ProtocolError)> = vec![
            (
                &b"GETFILE PUT /a\r\n\r\n"[..],
                ProtocolError::Method("PUT".to_string()),
            ),
            (
                &b"GETFLE GET /a\r\n\r\n"[..],
                ProtocolError::Scheme("GETFLE".to_string()),
            ),
            (&b"GETFILE GET /a"[..], ProtocolError::MissingTerminator),
            (
                &b"GETFILE GET /a extra\r\n\r\n"[..],
                ProtocolError::TokenCount {
                    expected: 3,
                    found: 4,
                },
            ),
            (
                &b"GETFILE GET\r\n\r\n"[..],
                ProtocolError::TokenCount {
                    expected: 3,
                    found: 2,
                },
            ),
            (
                &b"GETFILE  GET /a\r\n\r\n"[..],
                ProtocolError::TokenCount {
                    expected: 3,
                    found: 4,
                },
            ),
            (&b"GETFILE GET \r\n\r\n"[..], ProtocolError::EmptyToken),
        ];

        for (input, expected) in inputs {
            assert_eq!(decode_request(input), Err(expected));
        }
    }

    #[test]
    fn request_incremental() {
        assert_eq!(parse_request(b"GETFILE GET /a\r\n\r").unwrap(), Frame::Incomplete);

        let frame = parse_request(b"GETFILE GET /a\r\n\r\nleftover").unwrap();
        assert_eq!(
            frame,
            Frame::Complete {
                value: Request::new("/a"),
                consumed: 18
            }
        );
    }

    #[test]
    fn status_words() {
        for status in [Status::Ok, Status::FileNotFound, Status::Error, Status::Invalid] {
            assert_eq!(Status::try_from(status.as_str()), Ok(status));
        }
        assert_eq!(
            Status::try_from("ok"),
            Err(ProtocolError::UnknownStatus("ok".to_string()))
        );
    }

    #[test]
    fn response_literals() {
        let inputs = vec![
            (ResponseHeader::Ok { content_length: 1000 }, &b"GETFILE OK 1000\r\n\r\n"[..]),
            (ResponseHeader::FileNotFound, &b"GETFILE FILE_NOT_FOUND \r\n\r\n"[..]),
            (ResponseHeader::Error, &b"GETFILE ERROR \r\n\r\n"[..]),
            (ResponseHeader::Invalid, &b"GETFILE INVALID\r\n\r\n"[..]),
        ];

        for (header, expected) in inputs {
            assert_eq!(encode_response_header(&header), expected);
        }
    }

    #[test]
    fn response_round_trip() {
        let pairs = vec![
            (Status::Ok, Some(0)),
            (Status::Ok, Some(1)),
            (Status::Ok, Some(u64::MAX)),
            (Status::FileNotFound, None),
            (Status::Error, None),
            (Status::Invalid, None),
        ];

        for (status, length) in pairs {
            let header = ResponseHeader::new(status, length).unwrap();
            let bytes = encode_response_header(&header);
            let decoded = decode_response_header(&bytes).unwrap();

            assert_eq!(
                decoded,
                Frame::Complete {
                    value: header,
                    consumed: bytes.len()
                }
            );
            assert_eq!(header.status(), status);
            assert_eq!(header.content_length(), length);
        }
    }

    #[test]
    fn response_header_pairing() {
        assert!(ResponseHeader::new(Status::Ok, None).is_err());
        assert!(ResponseHeader::new(Status::Error, Some(3)).is_err());
        assert!(ResponseHeader::new(Status::Invalid, Some(0)).is_err());
    }

    #[test]
    fn response_partial_terminator_needs_more_data() {
        let full = b"GETFILE OK 12\r\n\r\n";
        for end in 0..full.len() {
            assert_eq!(
                decode_response_header(&full[..end]).unwrap(),
                Frame::Incomplete,
                "prefix of length {end}"
            );
        }
    }

    #[test]
    fn response_consumed_excludes_body() {
        let mut bytes = b"GETFILE OK 5\r\n\r\n".to_vec();
        bytes.extend_from_slice(b"he\r\n\r\nllo");

        let Frame::Complete { value, consumed } = decode_response_header(&bytes).unwrap() else {
            panic!("expected a complete header");
        };
        assert_eq!(value, ResponseHeader::Ok { content_length: 5 });
        assert_eq!(&bytes[consumed..], b"he\r\n\r\nllo");
    }

    #[test]
    fn response_tolerates_trailing_space() {
        let frame = decode_response_header(b"GETFILE INVALID \r\n\r\n").unwrap();
        assert!(matches!(
            frame,
            Frame::Complete {
                value: ResponseHeader::Invalid,
                ..
            }
        ));
    }

    #[test]
    fn response_rejects_malformed() {
        let inputs: Vec<&[u8]> = vec![
            &b"GETFILE OK\r\n\r\n"[..],
            &b"GETFILE OK -1\r\n\r\n"[..],
            &b"GETFILE OK 1x\r\n\r\n"[..],
            &b"GETFILE ERROR 10\r\n\r\n"[..],
            &b"GETFILE MAYBE\r\n\r\n"[..],
            &b"HTTP/1.1 200 OK\r\n\r\n"[..],
            &b"\r\n\r\n"[..],
        ];

        for input in inputs {
            assert!(decode_response_header(input).is_err(), "{input:?}");
        }
    }
}
