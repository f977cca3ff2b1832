//! Channel message types.
//!
//! Every message is a JSON object whose `kind` field selects the variant, so
//! dispatch is a plain `match` instead of probing for optional fields.

use serde::{Deserialize, Serialize};

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Must be the first message on a channel.
    BeginSession {
        /// Raw import map JSON as declared by the client.
        import_map_config: String,
        /// Explicit session identifier; derived from the config when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Client working directory the synthetic origin mirrors.
        cwd: String,
    },
    /// Request documentation for a file.
    DocRequest {
        path: String,
        /// Inline file content; marks the request as content-addressed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hash: Option<String>,
    },
    /// Reply to a [`ServerMessage::FileContentRequest`].
    FileContentResponse { path: String, content: String },
}

impl ClientMessage {
    /// Variant name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::BeginSession { .. } => "begin_session",
            ClientMessage::DocRequest { .. } => "doc_request",
            ClientMessage::FileContentResponse { .. } => "file_content_response",
        }
    }
}

/// Messages sent by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Result push, correlated by path.
    DocResponse { path: String, doc_nodes: String },
    /// Pull for file bytes that only exist on the client.
    FileContentRequest { path: String },
}

/// Identity of a documentation request after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocTarget {
    /// File fetched from the client on demand.
    Remote { path: String },
    /// File supplied inline, addressed by its hash.
    Inline {
        path: String,
        content: String,
        hash: String,
    },
}

impl DocTarget {
    /// Classify the optional `content`/`hash` pair of a doc request.
    ///
    /// Content without a hash is hashed here; a hash without content cannot be
    /// served and is treated as a remote request.
    pub fn classify(path: String, content: Option<String>, hash: Option<String>) -> Self {
        match (content, hash) {
            (Some(content), Some(hash)) => DocTarget::Inline {
                path,
                content,
                hash,
            },
            (Some(content), None) => {
                let hash = crate::cache::content_hash(content.as_bytes());
                DocTarget::Inline {
                    path,
                    content,
                    hash,
                }
            }
            (None, _) => DocTarget::Remote { path },
        }
    }

    pub fn path(&self) -> &str {
        match self {
            DocTarget::Remote { path } | DocTarget::Inline { path, .. } => path,
        }
    }
}
