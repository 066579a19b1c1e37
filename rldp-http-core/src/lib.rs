//! HTTP over RLDP.
//! Resolves `.ton`/`.adnl` hosts, keeps one ADNL session per host, and carries
//! request and response bodies as pull-based chunk streams.

pub mod address;
pub mod config;
pub mod error;
pub mod identity;
pub mod link;
pub mod mapper;
pub mod protocol;
pub mod resolve;
pub mod session;
pub mod stream;
pub mod transport;
pub mod wire;

pub use config::TransportConfig;
pub use error::{BoxError, Error};
pub use identity::{AdnlId, PublicKey};
pub use link::{
    DisconnectHandler, InboundQuery, LinkConnector, LinkSession, QueryHandler, QueryId,
};
pub use mapper::{ReasonPhrase, ResponseBody};
pub use resolve::{Directory, Domain, NameResolver, PeerAddresses};
pub use transport::{RequestTimeout, Transport};
