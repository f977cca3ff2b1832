//! Session and session info types.

use super::files::FileTable;
use super::SessionChannel;
use crate::error::RelayError;
use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Characters escaped in a URL path segment, plus `%` itself.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Information about a session (serializable for logs and status output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session key: explicit id or digest of the import map config.
    pub id: String,
    /// Client working directory mirrored under `/<id>/`.
    pub cwd: String,
    /// Rewritten import map handed to the extractor.
    pub import_map: PathBuf,
    /// Identifier of the owning channel.
    pub connection_id: String,
    /// When the session began.
    pub created_at: DateTime<Utc>,
}

/// A live session bound to its channel.
pub struct Session {
    /// Session metadata.
    pub info: SessionInfo,
    channel: Arc<SessionChannel>,
    files: FileTable,
}

impl Session {
    /// Create a session owned by `channel`.
    pub fn new(id: String, cwd: String, import_map: PathBuf, channel: Arc<SessionChannel>) -> Self {
        Self {
            info: SessionInfo {
                id,
                cwd,
                import_map,
                connection_id: channel.id().to_string(),
                created_at: Utc::now(),
            },
            channel,
            files: FileTable::new(),
        }
    }

    /// Get the session ID.
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn cwd(&self) -> &str {
        &self.info.cwd
    }

    pub fn import_map(&self) -> &Path {
        &self.info.import_map
    }

    pub fn channel(&self) -> &Arc<SessionChannel> {
        &self.channel
    }

    pub fn files(&self) -> &FileTable {
        &self.files
    }

    /// `cwd` without its trailing separator; empty for `/`.
    fn root(&self) -> &str {
        self.info.cwd.trim_end_matches('/')
    }

    /// URL prefix under which this session's files are served.
    pub fn origin(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.info.id)
    }

    /// Module specifier handed to the extractor for a client `path`.
    ///
    /// URLs pass through unchanged. Local paths must live under `cwd`.
    pub fn specifier_for(&self, base_url: &str, path: &str) -> Result<String, RelayError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_string());
        }
        let relative = path
            .strip_prefix(self.root())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| {
                RelayError::NotFound(format!("{path} is outside {}", self.info.cwd))
            })?;
        let encoded: Vec<String> = relative
            .split('/')
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect();
        Ok(format!("{}/{}", self.origin(base_url), encoded.join("/")))
    }

    /// Client path for a percent-encoded path relative to the session origin.
    pub fn client_path(&self, relative: &str) -> Result<String, RelayError> {
        let decoded = percent_decode_str(relative.trim_start_matches('/'))
            .decode_utf8()
            .map_err(|_| RelayError::NotFound(format!("{relative} is not a UTF-8 path")))?;
        Ok(format!("{}/{}", self.root(), decoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{test_pair, Channel, WireFormat};
    use crate::protocol::{ClientMessage, ServerMessage};

    const BASE: &str = "http://localhost:8081";

    async fn open_session(cwd: &str) -> (Session, Channel<ClientMessage, ServerMessage>) {
        let (server, client) = test_pair(WireFormat::Text).await;
        let session = Session::new(
            "s1".to_string(),
            cwd.to_string(),
            PathBuf::from("dist/s1/import_map.json"),
            Arc::new(server),
        );
        (session, client)
    }

    #[tokio::test]
    async fn maps_paths_to_specifiers_and_back() {
        let (session, _client) = open_session("/proj").await;
        assert_eq!(
            session.specifier_for(BASE, "/proj/src/x.ts").expect("under cwd"),
            "http://localhost:8081/s1/src/x.ts"
        );
        assert_eq!(
            session.client_path("src/x.ts").expect("decodes"),
            "/proj/src/x.ts"
        );
        assert_eq!(session.origin(BASE), "http://localhost:8081/s1");
        assert_eq!(session.info.connection_id, session.channel().id().to_string());
    }

    #[tokio::test]
    async fn trailing_slash_and_root_cwd() {
        let (session, _client) = open_session("/proj/").await;
        assert_eq!(
            session.specifier_for(BASE, "/proj/x.ts").expect("under cwd"),
            "http://localhost:8081/s1/x.ts"
        );

        let (root, _client) = open_session("/").await;
        assert_eq!(
            root.specifier_for(BASE, "/x.ts").expect("under root"),
            "http://localhost:8081/s1/x.ts"
        );
        assert_eq!(root.client_path("x.ts").expect("decodes"), "/x.ts");
    }

    #[tokio::test]
    async fn names_with_spaces_survive_the_url_round_trip() {
        let (session, _client) = open_session("/proj").await;
        let specifier = session
            .specifier_for(BASE, "/proj/src/my file ü.ts")
            .expect("under cwd");
        assert_eq!(specifier, "http://localhost:8081/s1/src/my%20file%20%C3%BC.ts");

        let relative = specifier
            .strip_prefix("http://localhost:8081/s1/")
            .expect("session origin");
        assert_eq!(
            session.client_path(relative).expect("decodes"),
            "/proj/src/my file ü.ts"
        );
        assert_eq!(
            session.client_path("100%25.ts").expect("decodes"),
            "/proj/100%.ts"
        );
        assert!(matches!(
            session.client_path("bad%FF.ts"),
            Err(RelayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn urls_pass_through_and_foreign_paths_are_rejected() {
        let (session, _client) = open_session("/proj").await;
        assert_eq!(
            session
                .specifier_for(BASE, "https://deno.land/std/mod.ts")
                .expect("url"),
            "https://deno.land/std/mod.ts"
        );
        for path in ["/other/x.ts", "/projx/y.ts", "/proj", "relative.ts"] {
            assert!(
                matches!(session.specifier_for(BASE, path), Err(RelayError::NotFound(_))),
                "{path} should be rejected"
            );
        }
    }
}
