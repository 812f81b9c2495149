//! Bounded retry loop that turns a document into stored diagnostics.
//!
//! Each attempt sends `instruction + text` to the backend, records the raw
//! reply, and tries to parse it. A malformed reply is retried with the retry
//! instruction as prefix; a backend failure or timeout ends the run at once.
//! Every write carries the [`DocumentVersion`] the run started from, so a
//! run overtaken by a newer edit stops as [`AnalysisError::Superseded`]
//! without touching the store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fuzz_types::{Backend, BackendError};

use crate::diagnostics::{MalformedAnalysis, parse_diagnostics};
use crate::documents::{DocumentStore, StoreError};
use crate::types::DocumentVersion;

pub const MAX_ANALYSIS_ATTEMPTS: u32 = 5;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

pub const DEFAULT_RETRY_PROMPT: &str = "Your previous reply could not be parsed. \
Reply with ONLY a JSON array. Each element must be an object with the keys \
\"line_number\" (1-based integer), \"severity\" (\"advisory\" or \"mandatory\"), \
\"source\", \"rule\" and \"description\". Do not add prose or code fences. \
The document follows.\n";

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("analysis still malformed after {attempts} attempts")]
    Malformed {
        attempts: u32,
        #[source]
        source: MalformedAnalysis,
    },
    #[error("{uri} changed while {version} was being analysed")]
    Superseded {
        uri: String,
        version: DocumentVersion,
    },
    #[error("backend did not answer within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("failed to load retry prompt {}: {message}", path.display())]
    RetryPrompt { path: PathBuf, message: String },
    #[error(transparent)]
    Store(StoreError),
}

/// Where the retry instruction comes from.
///
/// File prompts are re-read on every retry so edits take effect without a
/// restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPrompt {
    Inline(String),
    File(PathBuf),
}

impl Default for RetryPrompt {
    fn default() -> Self {
        Self::Inline(DEFAULT_RETRY_PROMPT.to_string())
    }
}

impl RetryPrompt {
    pub async fn load(&self) -> Result<String, AnalysisError> {
        match self {
            Self::Inline(text) => Ok(text.clone()),
            Self::File(path) => {
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| AnalysisError::RetryPrompt {
                        path: path.clone(),
                        message: e.to_string(),
                    })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub retry_prompt: RetryPrompt,
    pub call_timeout: Duration,
    pub max_attempts: u32,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            retry_prompt: RetryPrompt::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_attempts: MAX_ANALYSIS_ATTEMPTS,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisReport {
    pub version: DocumentVersion,
    pub attempts: u32,
    pub diagnostics: usize,
}

pub struct Analyzer {
    backend: Arc<dyn Backend>,
    store: Arc<DocumentStore>,
    options: AnalysisOptions,
}

impl Analyzer {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<DocumentStore>, options: AnalysisOptions) -> Self {
        Self {
            backend,
            store,
            options,
        }
    }

    /// Analyse `text`, which was stored for `uri` as `version`.
    pub async fn analyze(
        &self,
        uri: &str,
        version: DocumentVersion,
        text: &str,
    ) -> Result<AnalysisReport, AnalysisError> {
        let max_attempts = self.options.max_attempts.max(1);
        let mut instruction = String::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.ensure_current(uri, version)?;

            let input = compose_input(&instruction, text);
            let raw = tokio::time::timeout(
                self.options.call_timeout,
                self.backend.analyse_document(uri, &input),
            )
            .await
            .map_err(|_| AnalysisError::Timeout(self.options.call_timeout))??;

            self.store
                .store_analysis(uri, version, &raw)
                .map_err(store_error)?;

            match parse_diagnostics(uri, &raw) {
                Ok(diagnostics) => {
                    let count = diagnostics.len();
                    self.store
                        .update_diagnostics(uri, version, diagnostics)
                        .map_err(store_error)?;
                    tracing::info!(uri, attempt, diagnostics = count, "Analysis complete");
                    return Ok(AnalysisReport {
                        version,
                        attempts: attempt,
                        diagnostics: count,
                    });
                }
                Err(source) if attempt < max_attempts => {
                    tracing::warn!(
                        uri,
                        attempt,
                        max_attempts,
                        "Analysis attempt malformed, retrying: {}",
                        source.reason()
                    );
                    instruction = match self.options.retry_prompt.load().await {
                        Ok(prompt) => prompt,
                        Err(e) => {
                            tracing::warn!(uri, "{e}; using the built-in retry prompt");
                            DEFAULT_RETRY_PROMPT.to_string()
                        }
                    };
                }
                Err(source) => {
                    tracing::warn!(
                        uri,
                        attempt,
                        max_attempts,
                        "Analysis attempt malformed, giving up: {}",
                        source.reason()
                    );
                    return Err(AnalysisError::Malformed {
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    fn ensure_current(&self, uri: &str, version: DocumentVersion) -> Result<(), AnalysisError> {
        match self.store.version(uri) {
            Ok(current) if current == version => Ok(()),
            Ok(_) => Err(AnalysisError::Superseded {
                uri: uri.to_string(),
                version,
            }),
            Err(e) => Err(AnalysisError::Store(e)),
        }
    }
}

/// A stale write means a newer edit owns the document.
fn store_error(err: StoreError) -> AnalysisError {
    match err {
        StoreError::Stale { uri, expected, .. } => AnalysisError::Superseded {
            uri,
            version: expected,
        },
        other => AnalysisError::Store(other),
    }
}

/// Prefix the document with the instruction, on its own line.
fn compose_input(instruction: &str, text: &str) -> String {
    if instruction.is_empty() {
        text.to_string()
    } else if instruction.ends_with('\n') {
        format!("{instruction}{text}")
    } else {
        format!("{instruction}\n{text}")
    }
}
