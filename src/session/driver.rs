//! Per-channel session receive loop.
//!
//! `AwaitingBegin -> Active -> Closed`. The first message must be a
//! `BeginSession`; afterwards doc requests go to the generation cache and file
//! content responses settle pending proxy requests. Whatever ends the loop,
//! the session is torn down before returning.

use super::registry::SessionRegistry;
use super::SessionChannel;
use crate::error::RelayError;
use crate::protocol::{ClientMessage, DocTarget};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drive one channel until it closes.
pub async fn run_session(registry: Arc<SessionRegistry>, channel: Arc<SessionChannel>) {
    let connection_id = channel.id();

    let first = match channel.recv().await {
        Ok(message) => message,
        Err(_) => {
            debug!(connection_id = %connection_id, "Channel closed before session began");
            return;
        }
    };
    let kind = first.kind();
    let ClientMessage::BeginSession {
        import_map_config,
        session_id,
        cwd,
    } = first
    else {
        warn!(
            connection_id = %connection_id,
            kind = kind,
            "Protocol violation: first message must be begin_session"
        );
        channel.close();
        return;
    };

    let session = match registry
        .begin_session(channel.clone(), &import_map_config, session_id.as_deref(), &cwd)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            error!(connection_id = %connection_id, error = %e, "Failed to begin session");
            channel.close();
            return;
        }
    };

    loop {
        let message = match channel.recv().await {
            Ok(message) => message,
            Err(RelayError::ChannelClosed) => break,
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "Receive failed");
                break;
            }
        };
        debug!(session_id = %session.id(), kind = message.kind(), "Dispatching message");

        match message {
            ClientMessage::DocRequest {
                path,
                content,
                hash,
            } => {
                let target = DocTarget::classify(path, content, hash);
                let path = target.path().to_string();
                if let Err(e) = registry.request_doc(&session, target) {
                    warn!(session_id = %session.id(), path = %path, error = %e, "Rejected doc request");
                }
            }
            ClientMessage::FileContentResponse { path, content } => {
                registry.file_content_received(&session, &path, &content);
            }
            ClientMessage::BeginSession { .. } => {
                warn!(session_id = %session.id(), "Protocol violation: session already begun");
                break;
            }
        }
    }

    registry.end_session(&session).await;
    info!(session_id = %session.id(), connection_id = %connection_id, "Channel closed");
}
