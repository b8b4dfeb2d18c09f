//! Wire codec for forward/response frames (spec §4.5).
//!
//! Forward frame (gateway -> controller):
//! `FWD: <requestId>\r\n<METHOD> <path> HTTP/<version>\r\n<headers>\r\n\r\n<body>`
//!
//! Response frame (controller -> gateway): `RES: <requestId>\n<body>`, split
//! at the first `\n`. Only the header portion is UTF-8-validated; the body
//! is opaque bytes.

use axum::http::{HeaderMap, Method, Version};
use std::fmt;
use std::str::FromStr;

/// A four-hex-digit request id, unique within a single device's pending table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u16);

impl RequestId {
    pub fn from_u16(v: u16) -> Self {
        Self(v)
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(());
        }
        u16::from_str_radix(s, 16).map(RequestId).map_err(|_| ())
    }
}

fn http_version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    }
}

/// Encodes a forward frame to send to the controller over its socket.
///
/// Header ordering is preserved from the incoming request; header names are
/// not canonicalized.
pub fn encode_forward_frame(
    id: RequestId,
    method: &Method,
    path: &str,
    version: Version,
    headers: &HeaderMap,
    body: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 256);
    out.extend_from_slice(format!("FWD: {id}\r\n").as_bytes());
    out.extend_from_slice(
        format!("{} {} HTTP/{}\r\n", method, path, http_version_str(version)).as_bytes(),
    );
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

#[derive(Debug, PartialEq, Eq)]
pub struct ResponseFrame {
    pub request_id: RequestId,
    pub body: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// No line terminator found, so there is no header/body split point.
    NoTerminator,
    /// Header portion is not valid UTF-8.
    InvalidHeaderUtf8,
    /// Header portion doesn't match `RES: [0-9a-f]{4}`.
    Malformed,
}

/// Decodes a response frame. `data` is the fully reassembled message bytes —
/// text, a single buffer, or a concatenated fragment list all arrive here the
/// same way, since the transport (axum/tungstenite) already reassembles
/// message boundaries before handing control to the application.
pub fn decode_response_frame(data: &[u8]) -> Result<ResponseFrame, DecodeError> {
    let newline_pos = data.iter().position(|&b| b == b'\n').ok_or(DecodeError::NoTerminator)?;
    let header_bytes = &data[..newline_pos];
    let header = std::str::from_utf8(header_bytes).map_err(|_| DecodeError::InvalidHeaderUtf8)?;

    let rid_str = header.strip_prefix("RES: ").ok_or(DecodeError::Malformed)?;
    let request_id = RequestId::from_str(rid_str).map_err(|_| DecodeError::Malformed)?;

    let body = data[newline_pos + 1..].to_vec();
    Ok(ResponseFrame { request_id, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderName;

    #[test]
    fn round_trip_forward_frame_header() {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-a"), "1".parse().unwrap());
        headers.insert(HeaderName::from_static("x-b"), "2".parse().unwrap());
        let id = RequestId::from_u16(0xa1b2);
        let frame = encode_forward_frame(id, &Method::POST, "/status", Version::HTTP_11, &headers, b"hello");
        let text = String::from_utf8(frame).unwrap();
        assert!(text.starts_with("FWD: a1b2\r\nPOST /status HTTP/1.1\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn decode_valid_response_frame() {
        let frame = decode_response_frame(b"RES: 0000\nOK").unwrap();
        assert_eq!(frame.request_id, RequestId::from_u16(0));
        assert_eq!(frame.body, b"OK");
    }

    #[test]
    fn decode_extremes_round_trip() {
        for id in [0x0000u16, 0xffff] {
            let rid = RequestId::from_u16(id);
            let raw = format!("RES: {rid}\nbody");
            let decoded = decode_response_frame(raw.as_bytes()).unwrap();
            assert_eq!(decoded.request_id, rid);
        }
    }

    #[test]
    fn decode_rejects_bad_id_shape() {
        assert_eq!(
            decode_response_frame(b"RES: zzzz\nbody"),
            Err(DecodeError::Malformed)
        );
        assert_eq!(
            decode_response_frame(b"RES: 12\nbody"),
            Err(DecodeError::Malformed)
        );
        assert_eq!(
            decode_response_frame(b"RES: ABCD\nbody"),
            Err(DecodeError::Malformed)
        );
    }

    #[test]
    fn decode_rejects_invalid_header_utf8() {
        let mut data = b"RES: 00".to_vec();
        data.push(0xff);
        data.extend_from_slice(b"0\nbody");
        assert_eq!(decode_response_frame(&data), Err(DecodeError::InvalidHeaderUtf8));
    }

    #[test]
    fn decode_does_not_reparse_body_containing_frame_like_bytes() {
        let frame = decode_response_frame(b"RES: 0000\nRES: 0000\n").unwrap();
        assert_eq!(frame.request_id, RequestId::from_u16(0));
        assert_eq!(frame.body, b"RES: 0000\n");
    }

    #[test]
    fn decode_missing_terminator() {
        assert_eq!(decode_response_frame(b"RES: 0000"), Err(DecodeError::NoTerminator));
    }
}
