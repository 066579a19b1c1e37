//! Encoding of queries and answers: bincode payload with a size guard.
//! RLDP delivers whole messages, so no length prefix is needed.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::{Answer, Query};

const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024; // 16 MiB

/// Encode a query for `LinkSession::query`.
pub fn encode_query(query: &Query) -> Result<Vec<u8>, WireError> {
    encode(query)
}

/// Encode an answer for `LinkSession::send_answer`.
pub fn encode_answer(answer: &Answer) -> Result<Vec<u8>, WireError> {
    encode(answer)
}

pub fn decode_query(bytes: &[u8]) -> Result<Query, WireError> {
    decode(bytes)
}

pub fn decode_answer(bytes: &[u8]) -> Result<Answer, WireError> {
    decode(bytes)
}

fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    let payload = bincode::serialize(msg)?;
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(WireError::TooLarge(payload.len()));
    }
    Ok(payload)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    if bytes.len() > MAX_MESSAGE_LEN {
        return Err(WireError::TooLarge(bytes.len()));
    }
    Ok(bincode::deserialize(bytes)?)
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("message too large: {0} bytes")]
    TooLarge(usize),
}
