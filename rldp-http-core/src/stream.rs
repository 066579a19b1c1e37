//! Pull-based body streaming.
//!
//! Outbound bodies are staged in a [`StreamTable`] under their request id and served
//! chunk by chunk when the peer sends `GetNextPayloadPart`. Inbound bodies are pulled
//! from the peer the same way by [`pull_body`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

use crate::error::Error;
use crate::link::{self, InboundQuery, LinkSession, QueryHandler};
use crate::protocol::{Answer, GetNextPayloadPart, Header, PayloadPart, Query, RequestId};
use crate::wire;

/// A staged request body. Never mutated once registered.
#[derive(Debug)]
pub struct ActiveStream {
    data: Bytes,
    created_at: Instant,
}

impl ActiveStream {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

/// Staged bodies of in-flight requests, shared by every session's pull handler.
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: RwLock<HashMap<RequestId, Arc<ActiveStream>>>,
}

impl StreamTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stage `data` under `id`. The entry lives until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, id: RequestId, data: Bytes) -> StreamGuard {
        let stream = Arc::new(ActiveStream {
            data,
            created_at: Instant::now(),
        });
        self.streams.write().insert(id, stream);
        StreamGuard {
            table: Arc::clone(self),
            id,
        }
    }

    pub fn get(&self, id: &RequestId) -> Option<Arc<ActiveStream>> {
        self.streams.read().get(id).cloned()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.streams.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }

    fn remove(&self, id: &RequestId) {
        self.streams.write().remove(id);
    }
}

/// Removes its stream from the table when dropped, on success, error or cancellation alike.
#[derive(Debug)]
pub struct StreamGuard {
    table: Arc<StreamTable>,
    id: RequestId,
}

impl StreamGuard {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}

/// Cut the chunk a pull query asks for.
pub fn next_part(stream: &ActiveStream, pull: &GetNextPayloadPart) -> Result<PayloadPart, Error> {
    if pull.max_chunk_size == 0 {
        return Err(Error::QueryFailed("zero max chunk size".into()));
    }
    let len = stream.data.len() as u64;
    let chunk = pull.max_chunk_size as u64;
    let offset = pull.seqno as u64 * chunk;
    if offset >= len {
        return Err(Error::OffsetOutOfRange { offset, len });
    }
    let till = (offset + chunk).min(len);
    Ok(PayloadPart {
        data: stream.data.slice(offset as usize..till as usize),
        trailer: Vec::new(),
        is_last: till == len,
    })
}

/// Query handler installed on each session: answers the peer's pulls of staged bodies.
pub struct PullServer {
    table: Arc<StreamTable>,
    link: Weak<dyn LinkSession>,
    answer_timeout: Duration,
}

impl PullServer {
    pub fn new(
        table: Arc<StreamTable>,
        link: Weak<dyn LinkSession>,
        answer_timeout: Duration,
    ) -> Self {
        Self {
            table,
            link,
            answer_timeout,
        }
    }

    fn answer_for(&self, pull: &GetNextPayloadPart) -> Result<PayloadPart, Error> {
        let stream = self
            .table
            .get(&pull.id)
            .ok_or(Error::UnknownStream(pull.id))?;
        let part = next_part(&stream, pull)?;
        tracing::debug!(
            id = %pull.id,
            seqno = pull.seqno,
            len = part.data.len(),
            last = part.is_last,
            staged_ms = stream.created_at().elapsed().as_millis() as u64,
            "serving payload part"
        );
        Ok(part)
    }
}

#[async_trait]
impl QueryHandler for PullServer {
    async fn on_query(&self, query: InboundQuery) -> Result<(), Error> {
        let pull = match wire::decode_query(&query.payload)? {
            Query::GetNextPayloadPart(pull) => pull,
            Query::Request(req) => {
                return Err(Error::QueryFailed(format!(
                    "unexpected http request {} {} from peer",
                    req.method, req.url
                )));
            }
        };
        let part = self.answer_for(&pull)?;
        let payload = Bytes::from(wire::encode_answer(&Answer::PayloadPart(part))?);

        let link = self
            .link
            .upgrade()
            .ok_or_else(|| Error::AnswerFailed("session closed".into()))?;
        let send = link.send_answer(query.id, query.max_answer_size, payload, self.answer_timeout);
        match tokio::time::timeout(self.answer_timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                tracing::warn!(
                    id = %pull.id,
                    seqno = pull.seqno,
                    error = %err,
                    "failed to send payload part"
                );
                Err(Error::AnswerFailed(err.to_string()))
            }
            Err(_) => {
                tracing::warn!(id = %pull.id, seqno = pull.seqno, "payload part answer timed out");
                Err(Error::AnswerFailed("deadline exceeded".into()))
            }
        }
    }
}

/// Limits for pulling a body.
#[derive(Debug, Clone, Copy)]
pub struct PullLimits {
    pub chunk_size: u32,
    pub max_answer_size: u64,
    pub query_timeout: Duration,
    pub max_body_size: u64,
}

/// A reassembled inbound body with the trailers sent alongside it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PulledBody {
    pub data: Bytes,
    pub trailer: Vec<Header>,
}

/// Pull a body with seqno 0, 1, 2, ... until the peer marks a part as last.
/// Any failure discards what was received and is reported as `StreamingFailed`.
pub async fn pull_body(
    link: &dyn LinkSession,
    id: RequestId,
    limits: PullLimits,
) -> Result<PulledBody, Error> {
    let mut buf = BytesMut::new();
    let mut trailer = Vec::new();
    let mut seqno: u32 = 0;
    loop {
        let part = pull_part(link, id, seqno, limits)
            .await
            .map_err(|source| Error::StreamingFailed {
                seqno,
                source: Box::new(source),
            })?;
        if buf.len() as u64 + part.data.len() as u64 > limits.max_body_size {
            return Err(Error::StreamingFailed {
                seqno,
                source: Box::new(Error::QueryFailed(format!(
                    "body exceeds {} bytes",
                    limits.max_body_size
                ))),
            });
        }
        buf.extend_from_slice(&part.data);
        trailer.extend(part.trailer);
        if part.is_last {
            break;
        }
        seqno = seqno.checked_add(1).ok_or_else(|| Error::StreamingFailed {
            seqno,
            source: Box::new(Error::QueryFailed("sequence number overflow".into())),
        })?;
    }
    tracing::debug!(
        id = %id,
        parts = u64::from(seqno) + 1,
        len = buf.len(),
        "pulled response body"
    );
    Ok(PulledBody {
        data: buf.freeze(),
        trailer,
    })
}

async fn pull_part(
    link: &dyn LinkSession,
    id: RequestId,
    seqno: u32,
    limits: PullLimits,
) -> Result<PayloadPart, Error> {
    let query = Query::GetNextPayloadPart(GetNextPayloadPart {
        id,
        seqno,
        max_chunk_size: limits.chunk_size,
    });
    match link::exchange(link, &query, limits.max_answer_size, limits.query_timeout).await? {
        Answer::PayloadPart(part) => Ok(part),
        other => Err(Error::QueryFailed(format!(
            "expected PayloadPart, got {}",
            other.kind()
        ))),
    }
}
