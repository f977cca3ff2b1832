//! Import map rewriting.
//!
//! A client declares its module resolution with an import map whose
//! self-references (`"./"`) point at its own project root. The extractor runs
//! here, so those targets are rewritten to `<origin>/<session_key>/` and
//! the result is stored at `<storage_dir>/<session_key>/import_map.json`.
//! An existing file for a key is reused as-is, including across restarts.

use crate::error::RelayError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

/// Import target that refers to the client's project root.
pub const SELF_REFERENCE: &str = "./";
/// File name of a stored import map.
pub const IMPORT_MAP_FILE: &str = "import_map.json";

/// Check that a session key is usable as a directory name and URL segment.
pub fn validate_session_key(key: &str) -> Result<(), RelayError> {
    let valid = !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(RelayError::Configuration(format!(
            "invalid session key: {key:?}"
        )))
    }
}

/// Creates rewritten import maps, at most once per session key.
pub struct ImportMapResolver {
    storage_dir: PathBuf,
    base_url: String,
    creating: Mutex<HashMap<String, Arc<OnceCell<PathBuf>>>>,
    rewrites: AtomicU64,
}

impl ImportMapResolver {
    pub fn new(storage_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            creating: Mutex::new(HashMap::new()),
            rewrites: AtomicU64::new(0),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Target that self-references are rewritten to.
    pub fn origin_for(&self, session_key: &str) -> String {
        format!("{}/{}/", self.base_url, session_key)
    }

    /// Number of import maps this resolver has rewritten and written.
    pub fn rewrites(&self) -> u64 {
        self.rewrites.load(Ordering::Relaxed)
    }

    /// Location of the rewritten import map for `session_key`.
    ///
    /// Concurrent calls for the same key share one creation. A failed creation
    /// is not remembered; the next call tries again.
    pub async fn resolve(&self, session_key: &str, raw_config: &str) -> Result<PathBuf, RelayError> {
        validate_session_key(session_key)?;
        let cell = {
            let mut creating = self.creating.lock().unwrap_or_else(|e| e.into_inner());
            creating
                .entry(session_key.to_string())
                .or_default()
                .clone()
        };
        let path = cell
            .get_or_try_init(|| self.create_if_missing(session_key, raw_config))
            .await?;
        Ok(path.clone())
    }

    async fn create_if_missing(&self, session_key: &str, raw_config: &str) -> Result<PathBuf, RelayError> {
        let folder = self.storage_dir.join(session_key);
        let path = folder.join(IMPORT_MAP_FILE);
        if tokio::fs::try_exists(&path).await? {
            debug!(session_key = %session_key, path = %path.display(), "Reusing stored import map");
            return Ok(path);
        }

        // Parse before touching the filesystem so a bad config leaves nothing behind.
        let rewritten = rewrite_import_map(raw_config, &self.origin_for(session_key))?;

        tokio::fs::create_dir_all(&folder).await?;
        let tmp = folder.join(format!("{IMPORT_MAP_FILE}.{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, rewritten).await?;
        tokio::fs::rename(&tmp, &path).await?;
        self.rewrites.fetch_add(1, Ordering::Relaxed);

        info!(session_key = %session_key, path = %path.display(), "Created import map");
        Ok(path)
    }
}

/// Rewrite every `"./"` import target to `origin`.
///
/// The config must be a JSON object. A missing or null `imports` is an empty
/// mapping; other top-level keys pass through untouched.
pub fn rewrite_import_map(raw_config: &str, origin: &str) -> Result<String, RelayError> {
    let mut parsed: Map<String, Value> = serde_json::from_str(raw_config)
        .map_err(|e| RelayError::Configuration(format!("not a JSON object: {e}")))?;

    match parsed.get_mut("imports") {
        None | Some(Value::Null) => {}
        Some(Value::Object(imports)) => {
            for (specifier, target) in imports.iter_mut() {
                match target {
                    Value::String(t) if t == SELF_REFERENCE => {
                        *target = Value::String(origin.to_string());
                    }
                    Value::String(_) => {}
                    _ => {
                        return Err(RelayError::Configuration(format!(
                            "import target for {specifier:?} is not a string"
                        )))
                    }
                }
            }
        }
        Some(_) => {
            return Err(RelayError::Configuration(
                "`imports` must be an object".to_string(),
            ))
        }
    }

    Ok(serde_json::to_string(&parsed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const BASE: &str = "http://localhost:8081";

    #[test]
    fn rewrites_only_self_references() {
        let out = rewrite_import_map(
            r#"{"imports":{"a":"./","b":"https://deno.land/x/b/"},"scopes":{}}"#,
            "http://localhost:8081/s1/",
        )
        .expect("valid config");
        let value: Value = serde_json::from_str(&out).expect("json");
        assert_eq!(
            value,
            json!({
                "imports": {"a": "http://localhost:8081/s1/", "b": "https://deno.land/x/b/"},
                "scopes": {}
            })
        );
    }

    #[test]
    fn missing_imports_is_empty() {
        let out = rewrite_import_map("{}", "http://x/").expect("valid config");
        assert_eq!(out, "{}");
    }

    #[test]
    fn rejects_bad_shapes() {
        for raw in ["not json", "[1,2]", r#"{"imports":[]}"#, r#"{"imports":{"a":1}}"#] {
            assert!(
                matches!(rewrite_import_map(raw, "http://x/"), Err(RelayError::Configuration(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn session_keys() {
        assert!(validate_session_key("abc-123_x.y").is_ok());
        for key in ["", ".", "..", "a/b", "../etc", "a b"] {
            assert!(validate_session_key(key).is_err(), "{key:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let resolver = ImportMapResolver::new(dir.path(), BASE);
        let raw = r#"{"imports":{"a":"./"}}"#;

        let first = resolver.resolve("s1", raw).await.expect("resolve");
        let second = resolver.resolve("s1", raw).await.expect("resolve");
        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("s1").join(IMPORT_MAP_FILE));
        assert_eq!(resolver.rewrites(), 1);

        let stored: Value =
            serde_json::from_str(&std::fs::read_to_string(&first).expect("read")).expect("json");
        assert_eq!(stored, json!({"imports": {"a": "http://localhost:8081/s1/"}}));
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_creation() {
        let dir = TempDir::new().expect("tempdir");
        let resolver = ImportMapResolver::new(dir.path(), BASE);
        let raw = r#"{"imports":{"a":"./"}}"#;

        let (a, b, c) = tokio::join!(
            resolver.resolve("k", raw),
            resolver.resolve("k", raw),
            resolver.resolve("k", raw)
        );
        assert_eq!(a.expect("a"), b.expect("b"));
        assert!(c.is_ok());
        assert_eq!(resolver.rewrites(), 1);
    }

    #[tokio::test]
    async fn stored_map_survives_restart() {
        let dir = TempDir::new().expect("tempdir");
        let path = ImportMapResolver::new(dir.path(), BASE)
            .resolve("s1", r#"{"imports":{"a":"./"}}"#)
            .await
            .expect("resolve");

        let restarted = ImportMapResolver::new(dir.path(), BASE);
        let again = restarted
            .resolve("s1", r#"{"imports":{"other":"./"}}"#)
            .await
            .expect("resolve");
        assert_eq!(path, again);
        assert_eq!(restarted.rewrites(), 0);
        assert!(std::fs::read_to_string(&again).expect("read").contains("\"a\""));
    }

    #[tokio::test]
    async fn failed_creation_persists_nothing_and_can_retry() {
        let dir = TempDir::new().expect("tempdir");
        let resolver = ImportMapResolver::new(dir.path(), BASE);

        let err = resolver.resolve("s1", "{broken").await;
        assert!(matches!(err, Err(RelayError::Configuration(_))));
        assert!(!dir.path().join("s1").exists());

        let path = resolver
            .resolve("s1", r#"{"imports":{}}"#)
            .await
            .expect("retry succeeds");
        assert!(path.exists());
    }
}
