//! Documentation relay.
//!
//! Lets a documentation extractor that can only read local paths or HTTP URLs
//! analyze source files that exist only on a remote developer machine. The
//! relay impersonates an HTTP origin for the extractor and fetches the actual
//! bytes on demand from the client over a WebSocket channel.
//!
//! # Architecture
//!
//! - **Channel**: typed duplex messaging over one WebSocket, in plain text or
//!   gzip-compressed binary frames.
//!
//! - **ImportMapResolver**: rewrites the client's import map so that `"./"`
//!   targets point at the relay, once per session key.
//!
//! - **SessionRegistry**: owns live sessions, the generation cache (at most
//!   one extractor run per request identity) and the content-addressed store.
//!
//! - **FileTable**: per-session proxy that turns an extractor GET into a
//!   `FileContentRequest` round trip over the channel.
//!
//! - **RelayServer**: hyper HTTP/1 listener serving `/ws` upgrades and the
//!   extractor's content GETs.
//!
//! # Protocol
//!
//! ## Client to relay
//! - `begin_session`: import map config, optional session id, working directory
//! - `doc_request`: path, optionally with inline content and hash
//! - `file_content_response`: bytes for a previously requested path
//!
//! ## Relay to client
//! - `doc_response`: serialized doc nodes for a path
//! - `file_content_request`: path whose bytes the extractor needs

use std::path::PathBuf;

pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod extractor;
pub mod import_map;
pub mod protocol;
pub mod server;
pub mod session;

pub use channel::{Channel, WireFormat};
pub use config::RelayConfig;
pub use error::{GenerationFailure, RelayError};
pub use extractor::{DenoDoc, ExtractFuture, Extractor};
pub use import_map::ImportMapResolver;
pub use protocol::{ClientMessage, DocTarget, ServerMessage};
pub use server::{RelayServer, RelayService};
pub use session::{run_session, Session, SessionInfo, SessionRegistry};

/// Expand `~/` prefix to the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    path.strip_prefix("~/")
        .and_then(|stripped| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(stripped)))
        .unwrap_or_else(|| PathBuf::from(path))
}
