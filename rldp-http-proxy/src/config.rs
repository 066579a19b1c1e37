//! Load proxy config from file and environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use rldp_http_core::TransportConfig;
use serde::Deserialize;

/// Proxy configuration. File: ~/.config/rldp-http/config.toml or /etc/rldp-http/config.toml.
/// Env overrides: RLDP_HTTP_PROXY_PORT, RLDP_HTTP_CHUNK_SIZE, RLDP_HTTP_QUERY_TIMEOUT_MS.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Proxy listen port on localhost (default 8080).
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    /// Transport tuning, the `[transport]` table.
    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_proxy_port() -> u16 {
    8080
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy_port: default_proxy_port(),
            transport: TransportConfig::default(),
        }
    }
}

impl ProxyConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.proxy_port))
    }

    /// Apply overrides; `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(p) = parsed::<u16>(&lookup, "RLDP_HTTP_PROXY_PORT") {
            self.proxy_port = p;
        }
        if let Some(n) = parsed::<u32>(&lookup, "RLDP_HTTP_CHUNK_SIZE") {
            self.transport.chunk_size = n;
        }
        if let Some(ms) = parsed::<u64>(&lookup, "RLDP_HTTP_QUERY_TIMEOUT_MS") {
            self.transport.query_timeout_ms = ms;
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable override");
            None
        }
    }
}

/// Load config: default, then config file (if present), then env vars.
pub fn load() -> ProxyConfig {
    let mut c = load_file().unwrap_or_default();
    c.apply_env(|key| std::env::var(key).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/rldp-http/config.toml"));
    }
    out.push(PathBuf::from("/etc/rldp-http/config.toml"));
    out
}

/// First existing file wins; a broken one is reported and skipped.
fn load_file() -> Option<ProxyConfig> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    let text = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cannot read config");
            return None;
        }
    };
    match toml::from_str::<ProxyConfig>(&text) {
        Ok(c) => Some(c),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "invalid config, using defaults");
            None
        }
    }
}
