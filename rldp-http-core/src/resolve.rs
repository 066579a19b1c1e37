//! Peer resolution: hostname to directory key, by literal address or name service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::address;
use crate::error::{BoxError, Error};
use crate::identity::{AdnlId, PublicKey};

/// A resolved domain. Only the site record matters to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    name: String,
    site_record: Option<AdnlId>,
}

impl Domain {
    pub fn new(name: impl Into<String>, site_record: Option<AdnlId>) -> Self {
        Self {
            name: name.into(),
            site_record,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// ADNL address the domain's site is served from.
    pub fn site_record(&self) -> Option<AdnlId> {
        self.site_record
    }
}

#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> Result<Domain, BoxError>;
}

/// Endpoints a peer is reachable at, in preference order, and its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddresses {
    pub addresses: Vec<SocketAddr>,
    pub public_key: PublicKey,
}

/// DHT lookup of a peer by its ADNL address.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_addresses(&self, key: &AdnlId) -> Result<PeerAddresses, BoxError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub key: AdnlId,
    pub is_literal: bool,
}

/// Resolves hostnames, retrying the name service a bounded number of times.
pub struct PeerResolver {
    resolver: Arc<dyn NameResolver>,
    attempts: u32,
    retry_delay: Duration,
}

impl PeerResolver {
    pub fn new(resolver: Arc<dyn NameResolver>, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            resolver,
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    /// Literal `.adnl` hosts are decoded locally; anything else goes to the name service.
    pub async fn resolve(&self, host: &str) -> Result<Resolved, Error> {
        if let Some(literal) = address::strip_literal_suffix(host) {
            let key = address::decode(literal).map_err(|source| Error::InvalidAddress {
                host: host.to_string(),
                source,
            })?;
            return Ok(Resolved {
                key: AdnlId::from_bytes(key),
                is_literal: true,
            });
        }

        let mut attempt = 0;
        let domain = loop {
            attempt += 1;
            match self.resolver.resolve(host).await {
                Ok(domain) => break domain,
                Err(err) if attempt >= self.attempts => {
                    return Err(Error::ResolutionFailed {
                        host: host.to_string(),
                        attempts: attempt,
                        source: err,
                    });
                }
                Err(err) => {
                    tracing::debug!(
                        host = %host,
                        attempt,
                        error = %err,
                        "resolve failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        };

        let key = domain.site_record().ok_or_else(|| Error::MissingSiteRecord {
            host: host.to_string(),
        })?;
        tracing::debug!(
            host = %host,
            domain = %domain.name(),
            attempts = attempt,
            "domain resolved"
        );
        Ok(Resolved {
            key,
            is_literal: false,
        })
    }
}
