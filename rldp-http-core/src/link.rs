//! Link layer seam: an encrypted ADNL channel carrying RLDP queries and answers.
//! Implementations live outside this crate; the transport only drives these traits.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{BoxError, Error};
use crate::identity::PublicKey;
use crate::protocol::{Answer, Query};
use crate::wire;

/// RLDP query identifier, chosen by the querying side.
pub type QueryId = [u8; 32];

/// A query received from the peer, to be answered with `LinkSession::send_answer`.
#[derive(Debug, Clone)]
pub struct InboundQuery {
    pub id: QueryId,
    pub max_answer_size: u64,
    pub payload: Bytes,
}

/// Called by the link layer for every query the peer sends over a session.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn on_query(&self, query: InboundQuery) -> Result<(), Error>;
}

/// Called once when the link layer loses the connection.
pub type DisconnectHandler = Box<dyn Fn() + Send + Sync>;

#[async_trait]
pub trait LinkSession: Send + Sync {
    /// Send a query and wait for its answer.
    async fn query(
        &self,
        payload: Bytes,
        max_answer_size: u64,
        timeout: Duration,
    ) -> Result<Bytes, BoxError>;

    /// Answer a query previously delivered to the query handler.
    async fn send_answer(
        &self,
        query_id: QueryId,
        max_answer_size: u64,
        payload: Bytes,
        deadline: Duration,
    ) -> Result<(), BoxError>;

    fn set_query_handler(&self, handler: Arc<dyn QueryHandler>);

    fn set_disconnect_handler(&self, handler: DisconnectHandler);
}

/// Opens a secure session to one endpoint of a peer.
#[async_trait]
pub trait LinkConnector: Send + Sync {
    async fn connect(
        &self,
        peer_key: &PublicKey,
        addr: SocketAddr,
    ) -> Result<Arc<dyn LinkSession>, BoxError>;
}

/// Send one query over `link` and decode its answer.
pub async fn exchange(
    link: &dyn LinkSession,
    query: &Query,
    max_answer_size: u64,
    timeout: Duration,
) -> Result<Answer, Error> {
    let payload = Bytes::from(wire::encode_query(query)?);
    let answer = link
        .query(payload, max_answer_size, timeout)
        .await
        .map_err(|err| Error::query("rldp query", err))?;
    Ok(wire::decode_answer(&answer)?)
}
