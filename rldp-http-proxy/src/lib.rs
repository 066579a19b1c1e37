//! Local forward proxy: plain HTTP/1.1 clients in, RLDP out.

pub mod config;
pub mod proxy;

pub use config::ProxyConfig;
pub use proxy::{run_proxy, serve};
