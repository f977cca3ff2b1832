//! Session registry: live sessions plus the tables they share.

use super::types::{Session, SessionInfo};
use super::SessionChannel;
use crate::cache::{content_hash, Coalescer, ContentStore, Pending};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::extractor::Extractor;
use crate::import_map::{validate_session_key, ImportMapResolver};
use crate::protocol::{DocTarget, ServerMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Cache key of one documentation generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GenerationKey {
    /// Session-relative file or URL, dropped when the session ends.
    Session { session_id: String, path: String },
    /// Inline content, shared by every session for the life of the process.
    Content { hash: String },
}

/// Session key for a `BeginSession`: the explicit id if given, otherwise the
/// hex SHA-256 of the raw import map config.
pub fn session_key(explicit: Option<&str>, import_map_config: &str) -> String {
    match explicit {
        Some(id) => id.to_string(),
        None => content_hash(import_map_config.as_bytes()),
    }
}

/// Owner of every session and of the generation and content tables.
pub struct SessionRegistry {
    /// Map of session ID to session. A reconnect with the same ID replaces
    /// the previous entry.
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    generations: Coalescer<GenerationKey, Arc<str>>,
    content: ContentStore,
    import_maps: ImportMapResolver,
    extractor: Arc<dyn Extractor>,
    base_url: String,
    fetch_timeout: Duration,
}

impl SessionRegistry {
    /// Create a registry serving files under `base_url`.
    pub fn new(config: &RelayConfig, base_url: impl Into<String>, extractor: Arc<dyn Extractor>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            sessions: RwLock::new(HashMap::new()),
            generations: Coalescer::new(),
            content: ContentStore::new(),
            import_maps: ImportMapResolver::new(config.storage_dir.clone(), base_url.clone()),
            extractor,
            base_url,
            fetch_timeout: config.fetch_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve the import map for a new session and register it.
    pub async fn begin_session(
        &self,
        channel: Arc<SessionChannel>,
        import_map_config: &str,
        session_id: Option<&str>,
        cwd: &str,
    ) -> Result<Arc<Session>, RelayError> {
        let key = session_key(session_id, import_map_config);
        validate_session_key(&key)?;
        let import_map = self.import_maps.resolve(&key, import_map_config).await?;

        let session = Arc::new(Session::new(key.clone(), cwd.to_string(), import_map, channel));
        let replaced = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(key.clone(), session.clone())
        };

        if let Some(old) = replaced {
            info!(
                session_id = %key,
                old_connection_id = %old.info.connection_id,
                connection_id = %session.info.connection_id,
                "Session taken over by new channel"
            );
        } else {
            info!(
                session_id = %key,
                cwd = %cwd,
                connection_id = %session.info.connection_id,
                "Session started"
            );
        }
        Ok(session)
    }

    /// Get the live session for `session_id`.
    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Start (or join) the generation for `target` and push its result to the
    /// session's client when it completes.
    pub fn request_doc(&self, session: &Arc<Session>, target: DocTarget) -> Result<(), RelayError> {
        let path = target.path().to_string();
        let pending = match target {
            DocTarget::Remote { path } => {
                let specifier = session.specifier_for(&self.base_url, &path)?;
                let key = GenerationKey::Session {
                    session_id: session.id().to_string(),
                    path,
                };
                let extractor = self.extractor.clone();
                let import_map = session.import_map().to_path_buf();
                self.generations.get_or_spawn(key, move || {
                    let generation = extractor.generate(&specifier, &import_map);
                    async move { generation.await.map(Arc::<str>::from) }
                })
            }
            DocTarget::Inline {
                path,
                content,
                hash,
            } => {
                let specifier = format!("{}?hash={hash}", session.specifier_for(&self.base_url, &path)?);
                // Stored before generation so the extractor's fetch finds it.
                self.content.insert(&hash, &content);
                let origin = session.origin(&self.base_url);
                let root = session.cwd().trim_end_matches('/').to_string();
                let extractor = self.extractor.clone();
                let import_map = session.import_map().to_path_buf();
                self.generations.get_or_spawn(GenerationKey::Content { hash }, move || {
                    let generation = extractor.generate(&specifier, &import_map);
                    async move {
                        generation
                            .await
                            .map(|doc_nodes| Arc::<str>::from(doc_nodes.replace(&origin, &root)))
                    }
                })
            }
        };

        tokio::spawn(push_on_completion(session.channel().clone(), path, pending));
        Ok(())
    }

    /// Content of `relative` in session `session_id`, fetched from the client
    /// when not yet known.
    pub async fn fetch_file(&self, session_id: &str, relative: &str) -> Result<Arc<str>, RelayError> {
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| RelayError::NotFound(format!("session {session_id}")))?;
        let path = session.client_path(relative)?;
        debug!(session_id = %session_id, path = %path, "Fetching file for extractor");
        session
            .files()
            .resolve(&path, session.channel(), self.fetch_timeout)
            .await
    }

    /// Inline content stored under `hash`.
    pub fn fetch_content(&self, hash: &str) -> Result<Arc<str>, RelayError> {
        self.content
            .get(hash)
            .ok_or_else(|| RelayError::NotFound(format!("content {hash}")))
    }

    /// Deliver a `FileContentResponse` to the session's pending request.
    pub fn file_content_received(&self, session: &Session, path: &str, content: &str) {
        if session.files().fulfil(path, content) {
            self.content.insert(&content_hash(content.as_bytes()), content);
            debug!(session_id = %session.id(), path = %path, "File content delivered");
        } else {
            warn!(session_id = %session.id(), path = %path, "Discarding unexpected file content");
        }
    }

    /// Tear down `session` after its channel closed.
    ///
    /// Pending file requests fail at once. If a newer channel has taken over
    /// the session ID, the registry entry and cached generations stay.
    pub async fn end_session(&self, session: &Arc<Session>) {
        let current = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(session.id()) {
                Some(live) if Arc::ptr_eq(live, session) => {
                    sessions.remove(session.id());
                    true
                }
                _ => false,
            }
        };

        session.channel().close();
        let released = session.files().release_all();

        let evicted = if current {
            let id = session.id();
            self.generations.evict_where(
                |key| matches!(key, GenerationKey::Session { session_id, .. } if session_id == id),
            )
        } else {
            0
        };

        info!(
            session_id = %session.id(),
            connection_id = %session.info.connection_id,
            released_requests = released,
            evicted_generations = evicted,
            "Session ended"
        );
        self.generations.log_stats();
    }

    /// List all sessions.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        sessions.values().map(|s| s.info.clone()).collect()
    }

    /// Get registry statistics.
    pub async fn stats(&self) -> RegistryStats {
        let sessions = self.sessions.read().await;
        let generation = self.generations.stats();
        RegistryStats {
            total_sessions: sessions.len(),
            pending_file_requests: sessions.values().map(|s| s.files().pending_count()).sum(),
            cached_generations: self.generations.len(),
            content_entries: self.content.len(),
            total_doc_requests: generation.total_requests,
            coalesced_doc_requests: generation.coalesced_requests,
            import_maps_written: self.import_maps.rewrites(),
        }
    }

    /// Close every session's channel. Each session loop then tears itself down.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let sessions = self.sessions.read().await;
            sessions.values().cloned().collect()
        };
        for session in sessions {
            debug!(session_id = %session.id(), "Closing session for shutdown");
            session.channel().close();
        }
    }
}

async fn push_on_completion(channel: Arc<SessionChannel>, path: String, pending: Pending<Arc<str>>) {
    match pending.wait().await {
        Ok(doc_nodes) => {
            // Checked at send time; the generation may outlive the channel.
            let response = ServerMessage::DocResponse {
                path: path.clone(),
                doc_nodes: doc_nodes.to_string(),
            };
            match channel.send(&response) {
                Ok(()) => debug!(connection_id = %channel.id(), path = %path, "Pushed doc response"),
                Err(RelayError::ChannelClosed) => {
                    debug!(connection_id = %channel.id(), path = %path, "Channel closed, doc response suppressed")
                }
                Err(e) => warn!(connection_id = %channel.id(), path = %path, error = %e, "Failed to push doc response"),
            }
        }
        Err(e) => {
            warn!(connection_id = %channel.id(), path = %path, error = %e, "Documentation generation failed");
        }
    }
}

/// Statistics about the registry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub total_sessions: usize,
    pub pending_file_requests: usize,
    pub cached_generations: usize,
    pub content_entries: usize,
    pub total_doc_requests: u64,
    pub coalesced_doc_requests: u64,
    pub import_maps_written: u64,
}
