//! Core domain types for FuzzLSP.
//!
//! This crate contains pure domain types with no IO and no runtime dependency.
//! The language server core consumes text-generating backends exclusively
//! through the [`Backend`] capability trait defined here; concrete clients
//! live in `fuzz-providers`.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Backend Selection
// ============================================================================

/// Supported text-generation backends.
///
/// Resolved once at startup and never looked up per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Ollama,
    #[serde(rename = "openai")]
    OpenAI,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ollama => "ollama",
            BackendKind::OpenAI => "openai",
        }
    }

    #[must_use]
    pub fn env_var(&self) -> Option<&'static str> {
        match self {
            BackendKind::Ollama => None,
            BackendKind::OpenAI => Some("OPENAI_API_KEY"),
        }
    }

    #[must_use]
    pub fn default_model(&self) -> &'static str {
        match self {
            BackendKind::Ollama => "llama3.1",
            BackendKind::OpenAI => "gpt-4o-mini",
        }
    }

    #[must_use]
    pub fn default_base_url(&self) -> &'static str {
        match self {
            BackendKind::Ollama => "http://localhost:11434",
            BackendKind::OpenAI => "https://api.openai.com",
        }
    }

    /// Parse backend from string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Some(BackendKind::Ollama),
            "openai" | "gpt" => Some(BackendKind::OpenAI),
            _ => None,
        }
    }

    #[must_use]
    pub fn all() -> &'static [BackendKind] {
        &[BackendKind::Ollama, BackendKind::OpenAI]
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// An API credential. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey(<redacted>)")
    }
}

impl ApiKey {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

// ============================================================================
// Backend Capability
// ============================================================================

/// Failure reported by a backend itself (network, HTTP status, model output
/// that could not be decoded at the transport level).
///
/// Never retried by the analysis pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend is not configured: {0}")]
    NotConfigured(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("could not decode backend reply: {0}")]
    Decode(String),
    #[error("backend returned an empty reply")]
    EmptyReply,
}

/// Backend call future type alias.
pub type BackendFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// The narrow capability surface the language server needs from an LLM.
///
/// Object safe so the chosen implementation can be injected as
/// `Arc<dyn Backend>`.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Validate configuration and, optionally, connectivity.
    fn start(&self) -> BackendFut<'_, ()>;

    /// Produce raw analysis text for a document. The text is expected (but
    /// not guaranteed) to describe a list of diagnostics.
    fn analyse_document<'a>(&'a self, uri: &'a str, text: &'a str) -> BackendFut<'a, String>;

    fn complete_code<'a>(
        &'a self,
        uri: &'a str,
        prefix: &'a str,
        system_prompt: &'a str,
    ) -> BackendFut<'a, Vec<String>>;

    fn generate_code<'a>(
        &'a self,
        uri: &'a str,
        prefix: &'a str,
        suffix: &'a str,
        system_prompt: &'a str,
    ) -> BackendFut<'a, String>;

    fn refactor_code_line<'a>(&'a self, line: &'a str) -> BackendFut<'a, String>;

    fn explain_code_issue<'a>(&'a self, line: &'a str) -> BackendFut<'a, String>;
}
