//! Transport tuning. Deserializable so hosts can embed it in their own config files.

use std::time::Duration;

use serde::Deserialize;

use crate::protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ANSWER_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Chunk size requested when pulling a response body (default 128 KiB).
    pub chunk_size: u32,
    /// Largest answer accepted from the link layer.
    pub max_answer_size: u64,
    /// Per-query timeout handed to the link layer (default 30s).
    pub query_timeout_ms: u64,
    /// Deadline for answering a peer's pull query (default 15s).
    pub answer_timeout_ms: u64,
    /// Name resolution attempts before giving up (default 3).
    pub resolve_attempts: u32,
    /// Pause between failed resolution attempts (default 50ms).
    pub resolve_retry_delay_ms: u64,
    /// Upper bound on a pulled response body (default 64 MiB).
    pub max_body_size: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_answer_size: DEFAULT_MAX_ANSWER_SIZE,
            query_timeout_ms: 30_000,
            answer_timeout_ms: 15_000,
            resolve_attempts: 3,
            resolve_retry_delay_ms: 50,
            max_body_size: 64 * 1024 * 1024,
        }
    }
}

impl TransportConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn answer_timeout(&self) -> Duration {
        Duration::from_millis(self.answer_timeout_ms)
    }

    pub fn resolve_retry_delay(&self) -> Duration {
        Duration::from_millis(self.resolve_retry_delay_ms)
    }
}
