//! HTTP front end of the relay.
//!
//! One listener serves both the client WebSocket endpoint and the plain GETs
//! the extractor issues while resolving imports against the synthetic origin.

mod routes;

pub use routes::{handle, RelayService, WS_PATH};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::extractor::Extractor;
use crate::session::SessionRegistry;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A bound relay, ready to accept connections.
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    service: RelayService,
}

impl RelayServer {
    /// Bind the listener and derive the synthetic origin from the bound port.
    pub async fn bind(config: RelayConfig, extractor: Arc<dyn Extractor>) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.bind).await?;
        let local_addr = listener.local_addr()?;
        let base_url = config.base_url(local_addr.port());

        let registry = Arc::new(SessionRegistry::new(&config, base_url, extractor));
        let service = RelayService::new(registry.clone(), config.wire_format);

        info!(
            bind = %local_addr,
            origin = %registry.base_url(),
            storage_dir = %config.storage_dir.display(),
            wire_format = ?config.wire_format,
            "Relay bound"
        );
        Ok(Self {
            listener,
            local_addr,
            registry,
            service,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Synthetic origin the extractor fetches from.
    pub fn base_url(&self) -> &str {
        self.registry.base_url()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Accept connections until `cancel` fires, then close every session.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), RelayError> {
        info!("Relay listening on http://{}", self.local_addr);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Relay shutting down");
                    break;
                }
                res = self.listener.accept() => {
                    let (stream, peer) = res?;
                    let svc = self.service.clone();
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let conn = http1::Builder::new()
                            .serve_connection(io, TowerToHyperService::new(svc))
                            .with_upgrades();
                        if let Err(err) = conn.await {
                            debug!(peer = %peer, "http connection error: {err}");
                        }
                    });
                }
            }
        }

        self.registry.shutdown_all().await;
        let stats = self.registry.stats().await;
        info!(
            doc_requests = stats.total_doc_requests,
            coalesced = stats.coalesced_doc_requests,
            import_maps_written = stats.import_maps_written,
            "Relay stopped"
        );
        Ok(())
    }
}
