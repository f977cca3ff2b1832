//! Relay configuration.

use crate::channel::WireFormat;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default bind address for the relay HTTP listener.
pub const DEFAULT_BIND: &str = "127.0.0.1:8081";
/// Default host name in the synthetic origin.
pub const DEFAULT_PUBLIC_HOST: &str = "localhost";
/// Default directory for rewritten import maps.
pub const DEFAULT_STORAGE_DIR: &str = "dist";
/// Default extractor program.
pub const DEFAULT_EXTRACTOR: &str = "deno";
/// Default bound on waiting for remote file content.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;

/// Runtime configuration for a relay instance.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the HTTP listener binds to. Port 0 picks an ephemeral port.
    pub bind: SocketAddr,
    /// Host name the extractor uses to reach this relay.
    pub public_host: String,
    /// Directory holding one rewritten import map per session key.
    pub storage_dir: PathBuf,
    /// Extractor program invoked as `<program> doc --import-map <map> --json <specifier>`.
    pub extractor: PathBuf,
    /// Wire format for every channel accepted by this relay.
    pub wire_format: WireFormat,
    /// Upper bound on waiting for a `FileContentResponse`.
    pub fetch_timeout: Duration,
}

impl RelayConfig {
    /// Synthetic origin for a relay listening on `port`.
    pub fn base_url(&self, port: u16) -> String {
        format!("http://{}:{}", self.public_host, port)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8081)),
            public_host: DEFAULT_PUBLIC_HOST.to_string(),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            extractor: PathBuf::from(DEFAULT_EXTRACTOR),
            wire_format: WireFormat::Text,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}
