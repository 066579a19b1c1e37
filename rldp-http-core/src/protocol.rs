//! HTTP-over-RLDP message set: queries this node sends or serves, and their answers.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Version string carried in every request, regardless of the caller's HTTP version.
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Default chunk size when pulling a body (128 KiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 1 << 17;

/// Default cap on an answer: two chunks plus room for headers.
pub const DEFAULT_MAX_ANSWER_SIZE: u64 = 2 * DEFAULT_CHUNK_SIZE as u64 + 1024;

/// Request identifier, random per request. Also names the request's staged body.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub [u8; 16]);

impl RequestId {
    pub fn random() -> Self {
        RequestId(uuid::Uuid::new_v4().into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub url: String,
    pub version: String,
    pub headers: Vec<Header>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub version: String,
    pub status_code: u16,
    pub reason: String,
    pub headers: Vec<Header>,
    /// True when no body follows; otherwise the requester pulls it with `GetNextPayloadPart`.
    pub no_payload: bool,
}

/// Pull query for the next chunk of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetNextPayloadPart {
    pub id: RequestId,
    pub seqno: u32,
    pub max_chunk_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadPart {
    pub data: Bytes,
    /// Only meaningful on the last part.
    pub trailer: Vec<Header>,
    pub is_last: bool,
}

/// Everything that travels as an RLDP query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Query {
    Request(Request),
    GetNextPayloadPart(GetNextPayloadPart),
}

/// Everything that travels as an RLDP answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Answer {
    Response(Response),
    PayloadPart(PayloadPart),
}

impl Answer {
    /// Short name for error messages about unexpected answers.
    pub fn kind(&self) -> &'static str {
        match self {
            Answer::Response(_) => "Response",
            Answer::PayloadPart(_) => "PayloadPart",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let a = RequestId::random();
        let b = RequestId::random();
        assert_ne!(a, b);
    }

    #[test]
    fn request_id_displays_as_hex() {
        let id = RequestId([0x0f; 16]);
        assert_eq!(id.to_string(), "0f".repeat(16));
    }

    #[test]
    fn max_answer_fits_two_chunks() {
        assert_eq!(DEFAULT_CHUNK_SIZE, 131072);
        assert!(DEFAULT_MAX_ANSWER_SIZE > 2 * DEFAULT_CHUNK_SIZE as u64);
    }
}
