//! Documentation extractor invocation.
//!
//! The relay treats the extractor as an opaque generator: given a module
//! specifier and an import map it produces a JSON array of doc nodes. The
//! production implementation shells out to `deno doc`.

use crate::error::GenerationFailure;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Serialized doc nodes for a module that produced no documentation.
pub const EMPTY_DOC_NODES: &str = "[]";

/// Future returned by [`Extractor::generate`].
pub type ExtractFuture = Pin<Box<dyn Future<Output = Result<String, GenerationFailure>> + Send>>;

/// Produces serialized doc nodes for one module.
pub trait Extractor: Send + Sync {
    /// Generate documentation for `specifier`, resolving imports through the
    /// import map at `import_map`.
    fn generate(&self, specifier: &str, import_map: &Path) -> ExtractFuture;
}

/// Build the extractor command-line arguments.
///
/// ```text
/// deno doc --import-map <map> --json <specifier>
/// ```
pub fn deno_doc_args(import_map: &Path, specifier: &str) -> Vec<String> {
    vec![
        "doc".to_string(),
        "--import-map".to_string(),
        import_map.display().to_string(),
        "--json".to_string(),
        specifier.to_string(),
    ]
}

/// Runs `<program> doc` as a sub-process per generation.
#[derive(Debug, Clone)]
pub struct DenoDoc {
    program: PathBuf,
}

impl DenoDoc {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Extractor for DenoDoc {
    fn generate(&self, specifier: &str, import_map: &Path) -> ExtractFuture {
        let program = self.program.clone();
        let args = deno_doc_args(import_map, specifier);
        let specifier = specifier.to_string();

        Box::pin(async move {
            debug!(program = %program.display(), specifier = %specifier, "Running extractor");
            // The child is not killed when the waiter goes away; its result
            // is still cached for later requests.
            let output = Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| {
                    GenerationFailure::new(format!("failed to run {}: {e}", program.display()))
                })?;

            if !output.status.success() {
                warn!(
                    specifier = %specifier,
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Extractor exited with failure"
                );
                return Ok(EMPTY_DOC_NODES.to_string());
            }

            String::from_utf8(output.stdout).map_err(|e| {
                GenerationFailure::new(format!("extractor output is not UTF-8: {e}"))
            })
        })
    }
}
