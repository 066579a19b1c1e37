//! In-memory directory, name service and link layer for transport tests.
//! The mock peer behaves like an RLDP HTTP server: it pulls request bodies through the
//! query handler the transport installs, and serves response bodies to pull queries.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use rldp_http_core::link::{DisconnectHandler, InboundQuery, QueryHandler, QueryId};
use rldp_http_core::protocol::{
    Answer, GetNextPayloadPart, Header, PayloadPart, Query, Request, Response,
};
use rldp_http_core::wire;
use rldp_http_core::{
    AdnlId, BoxError, Directory, Domain, LinkConnector, LinkSession, NameResolver, PeerAddresses,
    PublicKey, Transport, TransportConfig,
};

pub const SITE_KEY: [u8; 32] = [0x11; 32];
pub const DNS_HOST: &str = "site.ton";

/// What the peer does with requests.
pub struct MockSite {
    pub status: u16,
    pub headers: Vec<Header>,
    pub body: Bytes,
    pub trailer: Vec<Header>,
    /// Chunk size the peer uses to pull request bodies.
    pub pull_chunk: u32,
    /// Fail pulls of the response body from this seqno on.
    pub fail_body_from: Option<u32>,
    pub fail_requests: AtomicBool,
    pub hang: AtomicBool,
    pub received: Mutex<Vec<Received>>,
    /// Asked, while serving a request, whether the transport still stages its body.
    pub inspect: Mutex<Option<Arc<dyn Fn(&Request) -> bool + Send + Sync>>>,
}

impl Default for MockSite {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Bytes::new(),
            trailer: Vec::new(),
            pull_chunk: 1 << 17,
            fail_body_from: None,
            fail_requests: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            received: Mutex::new(Vec::new()),
            inspect: Mutex::new(None),
        }
    }
}

/// A request as seen by the peer, with the body it pulled.
#[derive(Debug, Clone)]
pub struct Received {
    pub request: Request,
    pub body: Vec<u8>,
    /// (seqno, part length, is_last) for every part the peer pulled.
    pub parts: Vec<(u32, usize, bool)>,
    /// Whether the transport still had the body staged when the response was sent.
    pub staged_during_exchange: bool,
}

impl Received {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

pub struct MockLink {
    site: Arc<MockSite>,
    handler: Mutex<Option<Arc<dyn QueryHandler>>>,
    on_disconnect: Mutex<Option<DisconnectHandler>>,
    answers: Mutex<HashMap<QueryId, Bytes>>,
    next_query: AtomicU32,
    /// Request id of the last request, whose response body pulls refer to.
    last_request: Mutex<Option<Request>>,
}

impl MockLink {
    fn new(site: Arc<MockSite>) -> Self {
        Self {
            site,
            handler: Mutex::new(None),
            on_disconnect: Mutex::new(None),
            answers: Mutex::new(HashMap::new()),
            next_query: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn disconnect(&self) {
        if let Some(handler) = self.on_disconnect.lock().as_ref() {
            handler();
        }
    }

    fn handler(&self) -> Result<Arc<dyn QueryHandler>, BoxError> {
        self.handler
            .lock()
            .clone()
            .ok_or_else(|| "no query handler installed".into())
    }

    async fn pull_request_body(
        &self,
        req: &Request,
    ) -> Result<(Vec<u8>, Vec<(u32, usize, bool)>), BoxError> {
        let declared = req
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("content-length"))
            .and_then(|h| h.value.parse::<u64>().ok())
            .unwrap_or(0);
        let mut body = Vec::new();
        let mut parts = Vec::new();
        if declared == 0 {
            return Ok((body, parts));
        }
        let handler = self.handler()?;
        let mut seqno = 0;
        loop {
            let mut id = [0u8; 32];
            id[..4].copy_from_slice(&self.next_query.fetch_add(1, Ordering::SeqCst).to_le_bytes());
            let pull = Query::GetNextPayloadPart(GetNextPayloadPart {
                id: req.id,
                seqno,
                max_chunk_size: self.site.pull_chunk,
            });
            handler
                .on_query(InboundQuery {
                    id,
                    max_answer_size: 1 << 20,
                    payload: Bytes::from(wire::encode_query(&pull)?),
                })
                .await?;
            let answer = self
                .answers
                .lock()
                .remove(&id)
                .ok_or("handler did not answer")?;
            let part = match wire::decode_answer(&answer)? {
                Answer::PayloadPart(part) => part,
                other => return Err(format!("unexpected answer {:?}", other).into()),
            };
            parts.push((seqno, part.data.len(), part.is_last));
            body.extend_from_slice(&part.data);
            if part.is_last {
                return Ok((body, parts));
            }
            seqno += 1;
        }
    }

    fn serve_body(&self, pull: &GetNextPayloadPart) -> Result<PayloadPart, BoxError> {
        if let Some(from) = self.site.fail_body_from {
            if pull.seqno >= from {
                return Err(format!("peer lost part {}", pull.seqno).into());
            }
        }
        let known = self.last_request.lock().as_ref().map(|r| r.id);
        if known != Some(pull.id) {
            return Err("unknown request id".into());
        }
        let len = self.site.body.len();
        let offset = pull.seqno as usize * pull.max_chunk_size as usize;
        if offset >= len {
            return Err("offset out of range".into());
        }
        let till = (offset + pull.max_chunk_size as usize).min(len);
        Ok(PayloadPart {
            data: self.site.body.slice(offset..till),
            trailer: if till == len {
                self.site.trailer.clone()
            } else {
                Vec::new()
            },
            is_last: till == len,
        })
    }
}

#[async_trait]
impl LinkSession for MockLink {
    async fn query(
        &self,
        payload: Bytes,
        _max_answer_size: u64,
        _timeout: Duration,
    ) -> Result<Bytes, BoxError> {
        let answer = match wire::decode_query(&payload)? {
            Query::Request(req) => {
                if self.site.hang.load(Ordering::SeqCst) {
                    std::future::pending::<()>().await;
                }
                if self.site.fail_requests.load(Ordering::SeqCst) {
                    return Err("peer reset the query".into());
                }
                let (body, parts) = self.pull_request_body(&req).await?;
                let staged_during_exchange = self
                    .site
                    .inspect
                    .lock()
                    .clone()
                    .map(|inspect| inspect(&req))
                    .unwrap_or(false);
                self.site.received.lock().push(Received {
                    request: req.clone(),
                    body,
                    parts,
                    staged_during_exchange,
                });
                *self.last_request.lock() = Some(req);
                Answer::Response(Response {
                    version: "HTTP/1.1".into(),
                    status_code: self.site.status,
                    reason: "OK".into(),
                    headers: self.site.headers.clone(),
                    no_payload: self.site.body.is_empty(),
                })
            }
            Query::GetNextPayloadPart(pull) => Answer::PayloadPart(self.serve_body(&pull)?),
        };
        Ok(Bytes::from(wire::encode_answer(&answer)?))
    }

    async fn send_answer(
        &self,
        query_id: QueryId,
        _max_answer_size: u64,
        payload: Bytes,
        _deadline: Duration,
    ) -> Result<(), BoxError> {
        self.answers.lock().insert(query_id, payload);
        Ok(())
    }

    fn set_query_handler(&self, handler: Arc<dyn QueryHandler>) {
        *self.handler.lock() = Some(handler);
    }

    fn set_disconnect_handler(&self, handler: DisconnectHandler) {
        *self.on_disconnect.lock() = Some(handler);
    }
}

#[derive(Default)]
pub struct MockDirectory {
    pub peers: Mutex<HashMap<AdnlId, PeerAddresses>>,
    pub lookups: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl Directory for MockDirectory {
    async fn find_addresses(&self, key: &AdnlId) -> Result<PeerAddresses, BoxError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err("dht timeout".into());
        }
        self.peers
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| "value not found".into())
    }
}

#[derive(Default)]
pub struct MockResolver {
    pub records: Mutex<HashMap<String, AdnlId>>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl NameResolver for MockResolver {
    async fn resolve(&self, domain: &str) -> Result<Domain, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let record = self
            .records
            .lock()
            .get(domain)
            .copied()
            .ok_or_else(|| format!("no such domain {}", domain))?;
        Ok(Domain::new(domain, Some(record)))
    }
}

pub struct MockConnector {
    pub site: Arc<MockSite>,
    /// Endpoints that refuse connections.
    pub refuse: Mutex<Vec<SocketAddr>>,
    pub attempts: Mutex<Vec<SocketAddr>>,
    pub links: Mutex<Vec<Arc<MockLink>>>,
}

#[async_trait]
impl LinkConnector for MockConnector {
    async fn connect(
        &self,
        _peer_key: &PublicKey,
        addr: SocketAddr,
    ) -> Result<Arc<dyn LinkSession>, BoxError> {
        self.attempts.lock().push(addr);
        if self.refuse.lock().contains(&addr) {
            return Err(format!("handshake with {} timed out", addr).into());
        }
        let link = Arc::new(MockLink::new(self.site.clone()));
        self.links.lock().push(link.clone());
        Ok(link as Arc<dyn LinkSession>)
    }
}

pub struct Harness {
    pub transport: Arc<Transport>,
    pub site: Arc<MockSite>,
    pub directory: Arc<MockDirectory>,
    pub resolver: Arc<MockResolver>,
    pub connector: Arc<MockConnector>,
}

impl Harness {
    pub fn new(site: MockSite) -> Self {
        Self::with_config(site, TransportConfig::default())
    }

    pub fn with_config(site: MockSite, mut config: TransportConfig) -> Self {
        config.resolve_retry_delay_ms = 1;
        let site = Arc::new(site);
        let key = AdnlId::from_bytes(SITE_KEY);
        let directory = Arc::new(MockDirectory::default());
        directory.peers.lock().insert(
            key,
            PeerAddresses {
                addresses: vec![endpoint(1)],
                public_key: PublicKey::from_bytes([0x22; 32]),
            },
        );
        let resolver = Arc::new(MockResolver::default());
        resolver.records.lock().insert(DNS_HOST.to_string(), key);
        let connector = Arc::new(MockConnector {
            site: site.clone(),
            refuse: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
        });
        let transport = Arc::new(Transport::new(
            directory.clone(),
            resolver.clone(),
            connector.clone(),
            config,
        ));
        Harness {
            transport,
            site,
            directory,
            resolver,
            connector,
        }
    }

    /// Literal host of the mock site.
    pub fn literal_host(&self) -> String {
        format!("{}.adnl", AdnlId::from_bytes(SITE_KEY))
    }

    pub fn set_addresses(&self, addresses: Vec<SocketAddr>) {
        let key = AdnlId::from_bytes(SITE_KEY);
        if let Some(peer) = self.directory.peers.lock().get_mut(&key) {
            peer.addresses = addresses;
        }
    }

    /// Have the peer record whether a request's body is still staged when it is served.
    pub fn watch_staging(&self) {
        let streams = self.transport.streams().clone();
        *self.site.inspect.lock() = Some(Arc::new(move |req: &Request| streams.contains(&req.id)));
    }

    pub fn lookups(&self) -> usize {
        self.directory.lookups.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Received> {
        self.site.received.lock().clone()
    }
}

pub fn endpoint(n: u8) -> SocketAddr {
    SocketAddr::from(([192, 0, 2, n], 30303))
}

pub fn get(url: &str) -> http::Request<Bytes> {
    http::Request::builder()
        .method("GET")
        .uri(url)
        .body(Bytes::new())
        .unwrap()
}

pub fn post(url: &str, body: Vec<u8>) -> http::Request<Bytes> {
    http::Request::builder()
        .method("POST")
        .uri(url)
        .header("Content-Type", "application/octet-stream")
        .body(Bytes::from(body))
        .unwrap()
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
