//! BITS and HTTP header parsing
//!
//! The upload protocol rides on a handful of custom headers plus the
//! standard `Content-Range` / `Content-Length` pair. All values are plain
//! ASCII; anything that does not parse is a client error.

use axum::http::HeaderMap;

use crate::error::BitsError;

/// `BITS-Packet-Type`: request packet kind, `Ack` in responses.
pub const PACKET_TYPE: &str = "BITS-Packet-Type";
/// `BITS-Session-Id`: braced UUID naming the upload session.
pub const SESSION_ID: &str = "BITS-Session-Id";
/// `BITS-Supported-Protocols`: whitespace-separated GUIDs (create-session).
pub const SUPPORTED_PROTOCOLS: &str = "BITS-Supported-Protocols";
/// `BITS-Protocol`: the GUID chosen by the server (create-session ack).
pub const PROTOCOL: &str = "BITS-Protocol";
/// `BITS-Received-Content-Range`: bytes committed to disk so far.
pub const RECEIVED_CONTENT_RANGE: &str = "BITS-Received-Content-Range";
/// `BITS-Error-Code`: 8-hex-digit error code on error acks.
pub const ERROR_CODE: &str = "BITS-Error-Code";
/// `BITS-Error-Context`: 8-hex-digit error context on error acks.
pub const ERROR_CONTEXT: &str = "BITS-Error-Context";

/// The packet types a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Ping,
    CreateSession,
    CancelSession,
    CloseSession,
    Fragment,
}

impl PacketType {
    /// Case-insensitive parse of the `BITS-Packet-Type` request header.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "ping" => Some(Self::Ping),
            "create-session" => Some(Self::CreateSession),
            "cancel-session" => Some(Self::CancelSession),
            "close-session" => Some(Self::CloseSession),
            "fragment" => Some(Self::Fragment),
            _ => None,
        }
    }
}

/// A parsed `Content-Range: bytes A-B/C` header.
///
/// `start` and `end` are inclusive byte offsets; `total` is the full file
/// length. Invariant after parsing: `start <= end < total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ContentRange {
    /// Number of bytes the fragment covers.
    pub fn fragment_len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Whether this fragment is the last one of the file.
    pub fn is_final(&self) -> bool {
        self.end + 1 == self.total
    }
}

/// Parses `bytes A-B/C` with A, B, C decimal u64.
///
/// Rejects malformed strings, `A > B`, and `C <= B`.
pub fn parse_content_range(value: &str) -> Result<ContentRange, BitsError> {
    let malformed = || BitsError::BadRequest(format!("malformed Content-Range: {value:?}"));

    let rest = value.strip_prefix("bytes ").ok_or_else(malformed)?;
    let (range, total) = rest.split_once('/').ok_or_else(malformed)?;
    let (start, end) = range.split_once('-').ok_or_else(malformed)?;

    let start: u64 = start.parse().map_err(|_| malformed())?;
    let end: u64 = end.parse().map_err(|_| malformed())?;
    let total: u64 = total.parse().map_err(|_| malformed())?;

    if start > end {
        return Err(BitsError::BadRequest(format!(
            "Content-Range start {start} past end {end}"
        )));
    }
    if total <= end {
        return Err(BitsError::BadRequest(format!(
            "Content-Range end {end} past total {total}"
        )));
    }

    Ok(ContentRange { start, end, total })
}

/// Parses the `Content-Length` header as a decimal u64.
pub fn parse_content_length(headers: &HeaderMap) -> Result<u64, BitsError> {
    let value = header_str(headers, axum::http::header::CONTENT_LENGTH.as_str())
        .ok_or_else(|| BitsError::BadRequest("missing Content-Length".into()))?;
    value
        .parse()
        .map_err(|_| BitsError::BadRequest(format!("malformed Content-Length: {value:?}")))
}

/// Splits `BITS-Supported-Protocols` into its whitespace-separated tokens.
pub fn supported_protocols(headers: &HeaderMap) -> Vec<&str> {
    header_str(headers, SUPPORTED_PROTOCOLS)
        .map(|v| v.split_whitespace().collect())
        .unwrap_or_default()
}

/// Header value as `&str`, `None` when absent or not ASCII.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
