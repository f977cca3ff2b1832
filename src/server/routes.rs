//! Request routing.
//!
//! | Request                         | Response                                   |
//! |---------------------------------|--------------------------------------------|
//! | `/ws` with `Upgrade: websocket` | 101, channel driven by `run_session`       |
//! | `/ws` without upgrade           | 501                                        |
//! | any path with `?hash=<hash>`    | inline content, 400 if unknown             |
//! | `/<session>/<path>`             | file content via the client, 400/504       |
//! | anything else                   | 400                                        |

use crate::channel::{Channel, WireFormat};
use crate::error::RelayError;
use crate::session::{run_session, SessionRegistry};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{
    HeaderValue, CONNECTION, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE,
};
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tower_service::Service;
use tracing::{debug, error, info};

/// Path of the WebSocket endpoint.
pub const WS_PATH: &str = "/ws";

/// HTTP service shared by every connection of one relay.
#[derive(Clone)]
pub struct RelayService {
    registry: Arc<SessionRegistry>,
    wire_format: WireFormat,
}

impl RelayService {
    pub fn new(registry: Arc<SessionRegistry>, wire_format: WireFormat) -> Self {
        Self {
            registry,
            wire_format,
        }
    }
}

impl<B> Service<Request<B>> for RelayService
where
    B: Send + 'static,
{
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let registry = self.registry.clone();
        let wire_format = self.wire_format;
        Box::pin(async move { Ok(handle(registry, wire_format, req).await) })
    }
}

/// Route one request.
pub async fn handle<B>(
    registry: Arc<SessionRegistry>,
    wire_format: WireFormat,
    req: Request<B>,
) -> Response<Full<Bytes>>
where
    B: Send + 'static,
{
    let path = req.uri().path().to_string();
    if path == WS_PATH {
        return upgrade(registry, wire_format, req);
    }

    let hash = query_param(req.uri().query(), "hash").map(str::to_string);
    drop(req);

    let result = if let Some(hash) = hash {
        registry.fetch_content(&hash)
    } else {
        match split_session_path(&path) {
            Some((session_id, relative)) => registry.fetch_file(session_id, relative).await,
            None => Err(RelayError::NotFound(format!("no route for {path}"))),
        }
    };

    match result {
        Ok(content) => {
            let mut resp = text(StatusCode::OK, content.to_string());
            if let Some(media_type) = media_type(&path) {
                resp.headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(media_type));
            }
            resp
        }
        Err(e) => {
            debug!(path = %path, error = %e, "Content request failed");
            text(e.status_code(), e.to_string())
        }
    }
}

fn upgrade<B>(
    registry: Arc<SessionRegistry>,
    wire_format: WireFormat,
    mut req: Request<B>,
) -> Response<Full<Bytes>>
where
    B: Send + 'static,
{
    let wants_websocket = req
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if !wants_websocket {
        return text(StatusCode::NOT_IMPLEMENTED, String::new());
    }
    let Some(key) = req.headers().get(SEC_WEBSOCKET_KEY) else {
        return text(StatusCode::BAD_REQUEST, "missing Sec-WebSocket-Key".to_string());
    };
    let accept = match HeaderValue::from_str(&derive_accept_key(key.as_bytes())) {
        Ok(accept) => accept,
        Err(e) => return text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match Channel::accept(on_upgrade, wire_format).await {
            Ok(channel) => {
                info!(connection_id = %channel.id(), format = ?wire_format, "Channel opened");
                run_session(registry, Arc::new(channel)).await;
            }
            Err(e) => error!(error = %e, "WebSocket upgrade failed"),
        }
    });

    let mut resp = text(StatusCode::SWITCHING_PROTOCOLS, String::new());
    let headers = resp.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    resp
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp
}

/// Value of `name` in a query string.
fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// `/<session>/<relative>` with both parts non-empty.
fn split_session_path(path: &str) -> Option<(&str, &str)> {
    let (session_id, relative) = path.strip_prefix('/')?.split_once('/')?;
    if session_id.is_empty() || relative.is_empty() {
        None
    } else {
        Some((session_id, relative))
    }
}

/// Media type the extractor expects for a module, by extension.
fn media_type(path: &str) -> Option<&'static str> {
    let (_, ext) = path.rsplit_once('.')?;
    match ext {
        "ts" | "mts" | "cts" => Some("application/typescript; charset=utf-8"),
        "tsx" => Some("text/tsx; charset=utf-8"),
        "js" | "mjs" | "cjs" => Some("application/javascript; charset=utf-8"),
        "jsx" => Some("text/jsx; charset=utf-8"),
        "json" => Some("application/json; charset=utf-8"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::content_hash;
    use crate::config::RelayConfig;
    use crate::channel::test_pair;
    use crate::extractor::DenoDoc;
    use crate::protocol::{ClientMessage, ServerMessage};
    use crate::session::SessionChannel;
    use http_body_util::BodyExt;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> Arc<SessionRegistry> {
        let config = RelayConfig {
            storage_dir: dir.path().to_path_buf(),
            ..RelayConfig::default()
        };
        Arc::new(SessionRegistry::new(
            &config,
            "http://localhost:8081",
            Arc::new(DenoDoc::new("deno")),
        ))
    }

    async fn get(registry: &Arc<SessionRegistry>, uri: &str) -> (StatusCode, String) {
        let req = Request::get(uri).body(()).expect("request");
        let resp = handle(registry.clone(), WireFormat::Text, req).await;
        let status = resp.status();
        let body = resp.into_body().collect().await.expect("body").to_bytes();
        (status, String::from_utf8(body.to_vec()).expect("utf-8"))
    }

    #[test]
    fn parses_query_and_paths() {
        assert_eq!(query_param(Some("a=1&hash=abc"), "hash"), Some("abc"));
        assert_eq!(query_param(Some("hashx=1"), "hash"), None);
        assert_eq!(query_param(None, "hash"), None);

        assert_eq!(split_session_path("/s1/src/x.ts"), Some(("s1", "src/x.ts")));
        assert_eq!(split_session_path("/s1/"), None);
        assert_eq!(split_session_path("//x.ts"), None);
        assert_eq!(split_session_path("/x.ts"), None);
    }

    #[test]
    fn media_types_by_extension() {
        assert_eq!(
            media_type("/s1/x.ts"),
            Some("application/typescript; charset=utf-8")
        );
        assert_eq!(media_type("/s1/README"), None);
    }

    #[tokio::test]
    async fn websocket_path_without_upgrade_is_not_implemented() {
        let dir = TempDir::new().expect("tempdir");
        let (status, _) = get(&registry(&dir), "/ws").await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn upgrade_returns_accept_key() {
        let dir = TempDir::new().expect("tempdir");
        let req = Request::get("/ws")
            .header(UPGRADE, "websocket")
            .header(CONNECTION, "Upgrade")
            .header(SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(())
            .expect("request");
        let resp = handle(registry(&dir), WireFormat::Text, req).await;
        assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(
            resp.headers()[SEC_WEBSOCKET_ACCEPT],
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[tokio::test]
    async fn encoded_file_names_reach_the_client_decoded() {
        let dir = TempDir::new().expect("tempdir");
        let registry = registry(&dir);
        let (server, client): (SessionChannel, Channel<ClientMessage, ServerMessage>) =
            test_pair(WireFormat::Text).await;
        let session = registry
            .begin_session(Arc::new(server), "{}", Some("s1"), "/proj")
            .await
            .expect("begin");

        let reply = async {
            let ServerMessage::FileContentRequest { path } =
                client.recv().await.expect("file request")
            else {
                panic!("expected a file request");
            };
            assert_eq!(path, "/proj/my file.ts");
            registry.file_content_received(&session, &path, "export {}");
        };
        let ((status, body), ()) = tokio::join!(get(&registry, "/s1/my%20file.ts"), reply);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "export {}");
    }

    #[tokio::test]
    async fn unknown_hash_is_a_bad_request() {
        let dir = TempDir::new().expect("tempdir");
        let registry = registry(&dir);
        let hash = content_hash(b"export {}");
        for uri in ["/s1/x.ts?hash=unknown".to_string(), format!("/?hash={hash}")] {
            let (status, _) = get(&registry, &uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn unknown_session_and_bad_paths_are_bad_requests() {
        let dir = TempDir::new().expect("tempdir");
        let registry = registry(&dir);
        for uri in ["/nope/x.ts", "/", "/x.ts"] {
            let (status, _) = get(&registry, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        }
    }
}
