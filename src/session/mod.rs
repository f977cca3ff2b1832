//! Session management.
//!
//! One session per client channel. Sessions are keyed by an explicit id or by
//! a digest of the client's import map config; a reconnect with the same key
//! takes the session over.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      SessionRegistry                          │
//! │  sessions: HashMap<String, Arc<Session>>                      │
//! │  generations: Coalescer<GenerationKey, doc nodes>             │
//! │  content: ContentStore (hash -> bytes)                        │
//! │  import_maps: ImportMapResolver                               │
//! └──────────────────────────────────────────────────────────────┘
//!        ▲ run_session (per channel)          ▲ HTTP GET /<id>/<path>
//!        │                                    │ HTTP GET /?hash=<hash>
//! ┌──────────────┐                     ┌──────────────┐
//! │ Channel      │ ◀── FileContent ─── │ FileTable    │
//! │ (WebSocket)  │ ─── Response ─────▶ │ (per session)│
//! └──────────────┘                     └──────────────┘
//! ```

mod driver;
mod files;
mod registry;
mod types;

pub use driver::run_session;
pub use files::FileTable;
pub use registry::{session_key, GenerationKey, RegistryStats, SessionRegistry};
pub use types::{Session, SessionInfo};

use crate::channel::Channel;
use crate::protocol::{ClientMessage, ServerMessage};

/// Server side of a client channel.
pub type SessionChannel = Channel<ServerMessage, ClientMessage>;
