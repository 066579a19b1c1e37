//! Session manager: one RLDP session per hostname, created on first use.
//!
//! Establishment is single-flight per host: concurrent first requests for a host wait
//! on a per-host lock and pick up the session the first one installed. Each session
//! carries its own liveness flag, cleared by the link layer's disconnect callback, so
//! a disconnect is never lost to ordering with the cache insert. Dead sessions are
//! pruned the next time the cache is consulted.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedMutexGuard, RwLock};

use crate::error::{BoxError, Error};
use crate::identity::AdnlId;
use crate::link::{LinkConnector, LinkSession};
use crate::resolve::{Directory, PeerResolver};
use crate::stream::{PullServer, StreamTable};

/// A live session to the peer serving one hostname.
pub struct PeerSession {
    host: String,
    peer: AdnlId,
    addr: SocketAddr,
    generation: u64,
    alive: Arc<AtomicBool>,
    link: Arc<dyn LinkSession>,
}

impl PeerSession {
    /// Cache key the session is stored under.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn peer(&self) -> AdnlId {
        self.peer
    }

    /// Endpoint the session was established to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Distinguishes successive sessions to the same host.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once the link layer has reported a disconnect.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn link(&self) -> &dyn LinkSession {
        self.link.as_ref()
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("host", &self.host)
            .field("peer", &self.peer)
            .field("addr", &self.addr)
            .field("generation", &self.generation)
            .field("alive", &self.is_alive())
            .finish()
    }
}

type FlightMap = parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

pub struct SessionManager {
    resolver: PeerResolver,
    directory: Arc<dyn Directory>,
    connector: Arc<dyn LinkConnector>,
    streams: Arc<StreamTable>,
    answer_timeout: Duration,
    sessions: RwLock<HashMap<String, Arc<PeerSession>>>,
    connecting: FlightMap,
    next_generation: AtomicU64,
}

impl SessionManager {
    pub fn new(
        resolver: PeerResolver,
        directory: Arc<dyn Directory>,
        connector: Arc<dyn LinkConnector>,
        streams: Arc<StreamTable>,
        answer_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            directory,
            connector,
            streams,
            answer_timeout,
            sessions: RwLock::new(HashMap::new()),
            connecting: parking_lot::Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Session for `host`, establishing one if none is cached.
    pub async fn acquire(&self, host: &str) -> Result<Arc<PeerSession>, Error> {
        if let Some(session) = self.cached(host).await {
            tracing::debug!(
                host = %host,
                peer = %session.peer().to_hex(),
                generation = session.generation,
                "reusing rldp session"
            );
            return Ok(session);
        }

        let _flight = Flight::join(&self.connecting, host).await;
        // Whoever held the flight before us may have installed a session.
        if let Some(session) = self.cached(host).await {
            return Ok(session);
        }

        let session = self.establish(host).await?;
        self.sessions
            .write()
            .await
            .insert(session.host().to_string(), session.clone());
        Ok(session)
    }

    /// Drop the cached session for `host`, if any.
    pub async fn evict(&self, host: &str) -> bool {
        self.sessions.write().await.remove(host).is_some()
    }

    /// Number of cached live sessions.
    pub async fn len(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, session| {
            let alive = session.is_alive();
            if !alive {
                log_pruned(session);
            }
            alive
        });
        sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn cached(&self, host: &str) -> Option<Arc<PeerSession>> {
        let session = self.sessions.read().await.get(host).cloned()?;
        if session.is_alive() {
            return Some(session);
        }
        let mut sessions = self.sessions.write().await;
        // Another caller may already have replaced it with a newer session.
        if sessions
            .get(host)
            .is_some_and(|current| current.generation == session.generation)
        {
            sessions.remove(host);
            log_pruned(&session);
        }
        None
    }

    async fn establish(&self, host: &str) -> Result<Arc<PeerSession>, Error> {
        let resolved = self.resolver.resolve(host).await?;
        let peer = self
            .directory
            .find_addresses(&resolved.key)
            .await
            .map_err(|err| Error::directory(host, &resolved.key, err))?;

        let mut tried = Vec::with_capacity(peer.addresses.len());
        let mut last_err: Option<BoxError> = None;
        for addr in peer.addresses {
            match self.connector.connect(&peer.public_key, addr).await {
                Ok(link) => {
                    let session = self.install(host, resolved.key, addr, link);
                    tracing::info!(
                        host = %host,
                        addr = %addr,
                        literal = resolved.is_literal,
                        generation = session.generation,
                        "rldp session established"
                    );
                    return Ok(session);
                }
                Err(err) => {
                    tracing::warn!(
                        host = %host,
                        addr = %addr,
                        error = %err,
                        "rldp endpoint unreachable"
                    );
                    tried.push(addr);
                    last_err = Some(err);
                }
            }
        }
        Err(Error::AllEndpointsUnreachable {
            host: host.to_string(),
            tried,
            source: last_err.unwrap_or_else(|| "directory returned no addresses".into()),
        })
    }

    fn install(
        &self,
        host: &str,
        peer: AdnlId,
        addr: SocketAddr,
        link: Arc<dyn LinkSession>,
    ) -> Arc<PeerSession> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let alive = Arc::new(AtomicBool::new(true));

        link.set_query_handler(Arc::new(PullServer::new(
            self.streams.clone(),
            Arc::downgrade(&link),
            self.answer_timeout,
        )));

        let flag = alive.clone();
        link.set_disconnect_handler(Box::new(move || {
            flag.store(false, Ordering::Release);
        }));

        Arc::new(PeerSession {
            host: host.to_string(),
            peer,
            addr,
            generation,
            alive,
            link,
        })
    }
}

fn log_pruned(session: &PeerSession) {
    tracing::info!(
        host = %session.host(),
        generation = session.generation,
        "rldp session disconnected"
    );
}

/// Membership in the single in-flight establishment for a host. Removes the host's
/// lock from the map once nobody else is waiting on it.
struct Flight<'a> {
    map: &'a FlightMap,
    host: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    permit: Option<OwnedMutexGuard<()>>,
}

impl<'a> Flight<'a> {
    async fn join(map: &'a FlightMap, host: &str) -> Flight<'a> {
        let lock = map
            .lock()
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let mut flight = Flight {
            map,
            host: host.to_string(),
            lock,
            permit: None,
        };
        flight.permit = Some(flight.lock.clone().lock_owned().await);
        flight
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.permit.take();
        let mut map = self.map.lock();
        // One reference in the map, one here: no other caller is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.host);
        }
    }
}
