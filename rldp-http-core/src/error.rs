//! Transport errors. Every variant names the host or stream it concerns.

use std::net::SocketAddr;

use crate::address::AddressError;
use crate::identity::AdnlId;
use crate::protocol::RequestId;
use crate::wire::WireError;

/// Error type returned by collaborators (directory, resolver, link layer).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request has no host")]
    MissingHost,
    #[error("failed to parse adnl address {host}: {source}")]
    InvalidAddress {
        host: String,
        #[source]
        source: AddressError,
    },
    #[error("failed to resolve host {host} after {attempts} attempts: {source}")]
    ResolutionFailed {
        host: String,
        attempts: u32,
        #[source]
        source: BoxError,
    },
    #[error("domain {host} has no site record")]
    MissingSiteRecord { host: String },
    #[error("failed to find address of {host} ({key}) in DHT: {source}")]
    DirectoryLookupFailed {
        host: String,
        key: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to connect to rldp servers {tried:?} of host {host}: {source}")]
    AllEndpointsUnreachable {
        host: String,
        tried: Vec<SocketAddr>,
        #[source]
        source: BoxError,
    },
    #[error("offset {offset} out of range for stream of {len} bytes")]
    OffsetOutOfRange { offset: u64, len: u64 },
    #[error("unknown request id {0}")]
    UnknownStream(RequestId),
    #[error("failed to query rldp response part {seqno}: {source}")]
    StreamingFailed {
        seqno: u32,
        #[source]
        source: Box<Error>,
    },
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("failed to send answer: {0}")]
    AnswerFailed(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("request timed out")]
    Timeout,
}

impl Error {
    pub(crate) fn query(context: &str, err: impl std::fmt::Display) -> Self {
        Error::QueryFailed(format!("{}: {}", context, err))
    }

    pub(crate) fn directory(host: &str, key: &AdnlId, source: BoxError) -> Self {
        Error::DirectoryLookupFailed {
            host: host.to_string(),
            key: key.to_hex(),
            source,
        }
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        Error::query("malformed message", err)
    }
}
