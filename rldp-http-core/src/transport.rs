//! Client transport: sends `http` requests to ADNL sites over RLDP.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::Error;
use crate::link::{self, LinkConnector};
use crate::mapper::{self, ResponseBody};
use crate::protocol::{Answer, Query, RequestId};
use crate::resolve::{Directory, NameResolver, PeerResolver};
use crate::session::{PeerSession, SessionManager};
use crate::stream::{self, PullLimits, PulledBody, StreamTable};

/// Per-request deadline. Attach to `Request::extensions_mut()`; a
/// `CancellationToken` may be attached the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout(pub Duration);

pub struct Transport {
    sessions: SessionManager,
    streams: Arc<StreamTable>,
    config: TransportConfig,
}

impl Transport {
    pub fn new(
        directory: Arc<dyn Directory>,
        resolver: Arc<dyn NameResolver>,
        connector: Arc<dyn LinkConnector>,
        config: TransportConfig,
    ) -> Self {
        let streams = StreamTable::new();
        let resolver = PeerResolver::new(
            resolver,
            config.resolve_attempts,
            config.resolve_retry_delay(),
        );
        let sessions = SessionManager::new(
            resolver,
            directory,
            connector,
            streams.clone(),
            config.answer_timeout(),
        );
        Self {
            sessions,
            streams,
            config,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Bodies of in-flight requests waiting to be pulled by their peers.
    pub fn streams(&self) -> &Arc<StreamTable> {
        &self.streams
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Perform one request. Honors a `CancellationToken` and a `RequestTimeout` found in
    /// the request's extensions; dropping the future cancels it as well.
    pub async fn round_trip(
        &self,
        req: http::Request<Bytes>,
    ) -> Result<http::Response<ResponseBody>, Error> {
        let cancel = req.extensions().get::<CancellationToken>().cloned();
        let timeout = req.extensions().get::<RequestTimeout>().map(|t| t.0);

        let work = async move {
            match timeout {
                Some(t) => tokio::time::timeout(t, self.dispatch(req))
                    .await
                    .map_err(|_| Error::Timeout)?,
                None => self.dispatch(req).await,
            }
        };
        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Error::Cancelled),
                    res = work => res,
                }
            }
            None => work.await,
        }
    }

    async fn dispatch(
        &self,
        req: http::Request<Bytes>,
    ) -> Result<http::Response<ResponseBody>, Error> {
        let target = request_target(&req).ok_or(Error::MissingHost)?;
        let session = self.sessions.acquire(&target.key).await?;

        let id = RequestId::random();
        let message = mapper::build_request(&req, &target.authority, id);
        // Staged until this function returns, whichever way it returns.
        let _staged = if req.body().is_empty() {
            None
        } else {
            Some(self.streams.register(id, req.body().clone()))
        };

        let result = self.exchange(&session, id, message).await;
        if let Err(err) = &result {
            tracing::warn!(
                host = %session.host(),
                id = %id,
                error = %err,
                "rldp http request failed"
            );
        }
        result
    }

    async fn exchange(
        &self,
        session: &PeerSession,
        id: RequestId,
        message: crate::protocol::Request,
    ) -> Result<http::Response<ResponseBody>, Error> {
        let host = session.host();
        tracing::debug!(
            host = %host,
            peer = %session.peer().to_hex(),
            id = %id,
            method = %message.method,
            url = %message.url,
            "sending http request"
        );
        let answer = link::exchange(
            session.link(),
            &Query::Request(message),
            self.config.max_answer_size,
            self.config.query_timeout(),
        )
        .await
        .map_err(|err| match err {
            Error::QueryFailed(msg) => {
                Error::QueryFailed(format!("http request to {}: {}", host, msg))
            }
            other => other,
        })?;
        let response = match answer {
            Answer::Response(response) => response,
            other => {
                return Err(Error::QueryFailed(format!(
                    "http request to {}: expected Response, got {}",
                    host,
                    other.kind()
                )));
            }
        };

        let body = if response.no_payload {
            PulledBody::default()
        } else {
            stream::pull_body(session.link(), id, self.pull_limits()).await?
        };
        mapper::build_response(response, body)
    }

    fn pull_limits(&self) -> PullLimits {
        PullLimits {
            chunk_size: self.config.chunk_size,
            max_answer_size: self.config.max_answer_size,
            query_timeout: self.config.query_timeout(),
            max_body_size: self.config.max_body_size,
        }
    }
}

/// Where a request goes: the authority as the caller gave it, for the `Host` header,
/// and the lowercased host without port that sessions are cached under.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    authority: String,
    key: String,
}

/// Target from the URI authority, else from the `Host` header.
fn request_target(req: &http::Request<Bytes>) -> Option<Target> {
    let authority = match req.uri().authority() {
        Some(authority) => authority.clone(),
        None => {
            let value = req.headers().get(http::header::HOST)?.to_str().ok()?;
            value.trim().parse::<http::uri::Authority>().ok()?
        }
    };
    if authority.host().is_empty() {
        return None;
    }
    Some(Target {
        key: authority.host().to_ascii_lowercase(),
        authority: authority.as_str().to_string(),
    })
}
