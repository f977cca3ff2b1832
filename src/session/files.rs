//! Per-session file-content proxy.
//!
//! An HTTP GET from the extractor blocks here until the client answers the
//! matching `FileContentRequest`, the channel closes, or the fetch timeout
//! expires. Each path has at most one outstanding request; later GETs for the
//! same path subscribe to it. A request that timed out is sent again by the
//! next GET for its path, and a late reply still settles every waiter.

use super::SessionChannel;
use crate::error::RelayError;
use crate::protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, warn};

type Promise = watch::Sender<Option<Arc<str>>>;

struct PendingFile {
    promise: Promise,
    /// Set when a waiter gave up; the next GET re-sends the request.
    stale: bool,
}

#[derive(Default)]
struct FileState {
    resolved: HashMap<String, Arc<str>>,
    pending: HashMap<String, PendingFile>,
    released: bool,
}

/// Resolved and pending file contents of one session, keyed by client path.
#[derive(Default)]
pub struct FileTable {
    state: Mutex<FileState>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content of `path`, fetching it from the client through `channel` if it
    /// is not known yet.
    pub async fn resolve(
        &self,
        path: &str,
        channel: &SessionChannel,
        fetch_timeout: Duration,
    ) -> Result<Arc<str>, RelayError> {
        let promise = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(content) = state.resolved.get(path) {
                return Ok(content.clone());
            }
            match state.pending.get(path) {
                Some(pending) if !pending.stale => {
                    debug!(path = %path, "Joining pending file request");
                    pending.promise.subscribe()
                }
                _ => {
                    if state.released || channel.is_closed() {
                        return Err(RelayError::ChannelClosed);
                    }
                    channel.send(&ServerMessage::FileContentRequest {
                        path: path.to_string(),
                    })?;
                    debug!(path = %path, connection_id = %channel.id(), "Requested file content");
                    match state.pending.get_mut(path) {
                        Some(pending) => {
                            pending.stale = false;
                            pending.promise.subscribe()
                        }
                        None => {
                            let (tx, rx) = watch::channel(None);
                            state.pending.insert(
                                path.to_string(),
                                PendingFile {
                                    promise: tx,
                                    stale: false,
                                },
                            );
                            rx
                        }
                    }
                }
            }
        };

        let closed = channel.closed_token();
        let wait = async {
            tokio::select! {
                biased;
                _ = closed.cancelled() => Err(RelayError::ChannelClosed),
                content = settled(promise) => content.ok_or(RelayError::ChannelClosed),
            }
        };
        match timeout(fetch_timeout, wait).await {
            Ok(content) => content,
            Err(_) => {
                self.mark_stale(path);
                warn!(path = %path, timeout = ?fetch_timeout, "File content request timed out");
                Err(RelayError::Timeout(fetch_timeout))
            }
        }
    }

    fn mark_stale(&self, path: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pending) = state.pending.get_mut(path) {
            pending.stale = true;
        }
    }

    /// Settle the pending request for `path`.
    ///
    /// Returns `false` when nothing is waiting: a duplicate, a late reply after
    /// release, or an unsolicited response. Those are discarded.
    pub fn fulfil(&self, path: &str, content: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(pending) = state.pending.remove(path) else {
            return false;
        };
        let content: Arc<str> = Arc::from(content);
        state.resolved.insert(path.to_string(), content.clone());
        pending.promise.send_replace(Some(content));
        true
    }

    /// Fail every pending request and refuse new ones. Idempotent.
    pub fn release_all(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.released = true;
        state.resolved.clear();
        let released = state.pending.len();
        // Dropping the senders wakes every waiter with no value.
        state.pending.clear();
        released
    }

    pub fn pending_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.pending.len()
    }

    pub fn resolved_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.resolved.len()
    }
}

async fn settled(mut promise: watch::Receiver<Option<Arc<str>>>) -> Option<Arc<str>> {
    promise
        .wait_for(Option::is_some)
        .await
        .ok()
        .and_then(|content| content.clone())
}
