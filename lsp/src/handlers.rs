//! One handler per editor capability.
//!
//! Handlers take typed protocol params and return typed results; the
//! dispatch loop in [`crate::server`] owns (de)serialization. Lifecycle and
//! generated-code notifications are sent best-effort through the shared
//! [`Transport`] and never fail the request they belong to.

use std::sync::Arc;
use std::time::Duration;

use fuzz_types::{Backend, BackendError, BackendFut};
use lsp_types::{
    CodeAction, CodeActionParams, CompletionItem, CompletionParams, DidChangeTextDocumentParams,
    DidOpenTextDocumentParams, DidSaveTextDocumentParams, DocumentDiagnosticParams, Hover,
    HoverContents, HoverParams, MarkupContent, MarkupKind,
};
use serde::Serialize;

use crate::actions::{
    ActionDataError, CodeActionData, explained_line, line_edit, offered_actions, target_line,
};
use crate::analysis::{AnalysisError, AnalysisOptions, Analyzer, DEFAULT_CALL_TIMEOUT};
use crate::completion::{
    CursorContext, DEFAULT_COMPLETION_PROMPT, OutOfRange, completion_items, escape_generated,
};
use crate::content::{ContentError, read_document};
use crate::diagnostics::{hover_markup, to_lsp_diagnostic};
use crate::documents::{DocumentStore, StoreError};
use crate::protocol::{
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, notifications,
};
use crate::transport::Transport;
use crate::types::{Diagnostic, DocumentVersion};

pub const DEFAULT_SERVER_NAME: &str = "fuzzlsp";

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    InvalidActionData(#[from] ActionDataError),
    #[error(transparent)]
    OutOfRange(#[from] OutOfRange),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("backend did not answer within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// JSON-RPC error code reported to the client.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidParams(_) | Self::InvalidActionData(_) | Self::OutOfRange(_) => {
                INVALID_PARAMS
            }
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::ShuttingDown => INVALID_REQUEST,
            _ => INTERNAL_ERROR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Reported as the `source` of every diagnostic.
    pub name: String,
    /// System prompt for completion and generation.
    pub completion_prompt: String,
    /// Bound on every backend round-trip made by a handler.
    pub call_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVER_NAME.to_string(),
            completion_prompt: DEFAULT_COMPLETION_PROMPT.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Full pull-diagnostics report (`kind: "full"`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    pub kind: &'static str,
    pub items: Vec<lsp_types::Diagnostic>,
}

impl DiagnosticReport {
    fn full(items: Vec<lsp_types::Diagnostic>) -> Self {
        Self {
            kind: "full",
            items,
        }
    }
}

/// Text accepted into the store and waiting for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedDocument {
    uri: String,
    version: DocumentVersion,
    text: String,
}

impl StagedDocument {
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn version(&self) -> DocumentVersion {
        self.version
    }
}

pub struct Handlers {
    options: ServerOptions,
    store: Arc<DocumentStore>,
    backend: Arc<dyn Backend>,
    analyzer: Analyzer,
    transport: Arc<Transport>,
}

impl Handlers {
    pub fn new(
        options: ServerOptions,
        analysis: AnalysisOptions,
        backend: Arc<dyn Backend>,
        transport: Arc<Transport>,
    ) -> Self {
        let store = Arc::new(DocumentStore::new());
        let analyzer = Analyzer::new(Arc::clone(&backend), Arc::clone(&store), analysis);
        Self {
            options,
            store,
            backend,
            analyzer,
            transport,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.options.name
    }

    #[must_use]
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Tell the client no analysis is running yet.
    pub async fn initialized(&self) {
        self.transport
            .notify_best_effort(
                notifications::ANALYSIS_DONE,
                notifications::ANALYSIS_DONE_LABEL,
            )
            .await;
    }

    // ------------------------------------------------------------------
    // Document sync
    // ------------------------------------------------------------------

    pub async fn did_open(&self, params: DidOpenTextDocumentParams) -> Result<(), HandlerError> {
        let staged = self.stage_open(params)?;
        self.analyze_staged(staged).await
    }

    pub async fn did_change(&self, params: DidChangeTextDocumentParams) -> Result<(), HandlerError> {
        let staged = self.stage_change(params)?;
        self.analyze_staged(staged).await
    }

    pub async fn did_save(&self, params: DidSaveTextDocumentParams) -> Result<(), HandlerError> {
        let staged = self.stage_save(params).await?;
        self.analyze_staged(staged).await
    }

    pub fn stage_open(
        &self,
        params: DidOpenTextDocumentParams,
    ) -> Result<Option<StagedDocument>, HandlerError> {
        let doc = params.text_document;
        self.stage(doc.uri.as_str(), doc.text)
    }

    /// Full sync: the last content change carries the whole document.
    pub fn stage_change(
        &self,
        params: DidChangeTextDocumentParams,
    ) -> Result<Option<StagedDocument>, HandlerError> {
        let uri = params.text_document.uri;
        let Some(change) = params.content_changes.into_iter().last() else {
            tracing::debug!(uri = %uri, "didChange without content changes");
            return Ok(None);
        };
        if change.range.is_some() {
            tracing::warn!(uri = %uri, "Ranged change received under full sync; treating as full text");
        }
        self.stage(uri.as_str(), change.text)
    }

    /// Uses the saved text when the client included it, else the file on disk.
    pub async fn stage_save(
        &self,
        params: DidSaveTextDocumentParams,
    ) -> Result<Option<StagedDocument>, HandlerError> {
        let uri = params.text_document.uri;
        let text = match params.text {
            Some(text) => text,
            None => read_document(uri.as_str()).await?,
        };
        self.stage(uri.as_str(), text)
    }

    /// Write `text` to the store. `None` when it is already the stored text.
    ///
    /// Staging is synchronous so the dispatch loop can apply edits in
    /// arrival order before handing analysis off to a task.
    pub fn stage(&self, uri: &str, text: String) -> Result<Option<StagedDocument>, HandlerError> {
        match self.store.store(uri, &text) {
            Ok(version) => Ok(Some(StagedDocument {
                uri: uri.to_string(),
                version,
                text,
            })),
            Err(StoreError::Unchanged { .. }) => {
                tracing::debug!(uri, "Text unchanged; skipping analysis");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run the analysis for staged text, wrapped in lifecycle notifications.
    pub async fn analyze_staged(&self, staged: Option<StagedDocument>) -> Result<(), HandlerError> {
        let Some(StagedDocument { uri, version, text }) = staged else {
            return Ok(());
        };

        self.transport
            .notify_best_effort(
                notifications::ANALYSIS_STARTED,
                notifications::ANALYSIS_STARTED_LABEL,
            )
            .await;
        let outcome = self.analyzer.analyze(&uri, version, &text).await;
        self.transport
            .notify_best_effort(
                notifications::ANALYSIS_DONE,
                notifications::ANALYSIS_DONE_LABEL,
            )
            .await;

        match outcome {
            Ok(report) => {
                tracing::debug!(uri, %version, attempts = report.attempts, "Document analysed");
                Ok(())
            }
            Err(AnalysisError::Superseded { .. }) => {
                tracing::debug!(uri, %version, "Analysis superseded by a newer edit");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Read paths
    // ------------------------------------------------------------------

    /// Pull diagnostics. An unknown document yields an empty report.
    pub fn diagnostic(&self, params: &DocumentDiagnosticParams) -> DiagnosticReport {
        let uri = &params.text_document.uri;
        let items = self
            .known_diagnostics(uri.as_str())
            .iter()
            .map(|d| to_lsp_diagnostic(d, uri, &self.options.name))
            .collect();
        DiagnosticReport::full(items)
    }

    /// First diagnostic on the hovered line, or empty markup.
    pub fn hover(&self, params: &HoverParams) -> Hover {
        let position = &params.text_document_position_params;
        let value = self
            .known_diagnostics(position.text_document.uri.as_str())
            .iter()
            .find(|d| on_line(d, position.position.line))
            .map(hover_markup)
            .unwrap_or_default();
        Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value,
            }),
            range: None,
        }
    }

    pub fn code_action(
        &self,
        params: &CodeActionParams,
    ) -> Result<Option<Vec<CodeAction>>, HandlerError> {
        let uri = &params.text_document.uri;
        let line = params.range.start.line;
        let relevant = self
            .known_diagnostics(uri.as_str())
            .iter()
            .filter(|d| on_line(d, line))
            .count();
        if relevant == 0 {
            tracing::debug!(uri = %uri, line, "No diagnostics on line; no code actions");
            return Ok(None);
        }
        offered_actions(uri, params.range)
            .map(Some)
            .map_err(|e| HandlerError::Internal(e.to_string()))
    }

    fn known_diagnostics(&self, uri: &str) -> Vec<Diagnostic> {
        self.store.get_diagnostics(uri).unwrap_or_else(|e| {
            tracing::debug!(uri, "No diagnostics yet: {e}");
            Vec::new()
        })
    }

    // ------------------------------------------------------------------
    // Backend-assisted requests
    // ------------------------------------------------------------------

    pub async fn completion(
        &self,
        params: CompletionParams,
    ) -> Result<Vec<CompletionItem>, HandlerError> {
        let position = params.text_document_position;
        let uri = position.text_document.uri.as_str();
        let text = self.current_text(uri).await?;
        let context = CursorContext::extract(&text, position.position.line, position.position.character)?;
        let prompt = self.options.completion_prompt.as_str();

        let candidates = self
            .call(self.backend.complete_code(uri, &context.prefix, prompt))
            .await?;
        let generated = self
            .call(
                self.backend
                    .generate_code(uri, &context.prefix, &context.suffix, prompt),
            )
            .await?;

        self.transport
            .notify_best_effort(
                notifications::SHOW_GENERATED_CODE,
                &escape_generated(&generated),
            )
            .await;

        Ok(completion_items(&candidates, &generated))
    }

    /// Fill in the edit for an action produced by [`code_action`](Self::code_action).
    pub async fn code_action_resolve(
        &self,
        mut action: CodeAction,
    ) -> Result<CodeAction, HandlerError> {
        let data = CodeActionData::from_value(action.data.as_ref())?;
        let uri = data.uri();
        let range = data.range();
        let text = self.current_text(uri.as_str()).await?;
        let line = target_line(&text, range)?;

        let new_text = match &data {
            CodeActionData::Refactor { .. } => {
                self.call(self.backend.refactor_code_line(line)).await?
            }
            CodeActionData::Explain { .. } => {
                let explanation = self.call(self.backend.explain_code_issue(line)).await?;
                explained_line(&explanation, line)
            }
        };

        action.edit = Some(line_edit(uri, range.start.line, line, new_text));
        Ok(action)
    }

    /// Stored text, or the file on disk for a document never seen.
    async fn current_text(&self, uri: &str) -> Result<String, HandlerError> {
        match self.store.text(uri) {
            Ok(text) => Ok(text),
            Err(StoreError::UnknownDocument { .. }) => Ok(read_document(uri).await?),
            Err(e) => Err(e.into()),
        }
    }

    async fn call<T>(&self, fut: BackendFut<'_, T>) -> Result<T, HandlerError> {
        let timeout = self.options.call_timeout;
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| HandlerError::Timeout(timeout))?
            .map_err(HandlerError::from)
    }
}

/// `line` is 0-based; diagnostics are 1-based.
fn on_line(diag: &Diagnostic, line: u32) -> bool {
    line.checked_add(1) == Some(diag.line_number())
}
