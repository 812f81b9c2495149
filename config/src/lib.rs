//! FuzzLSP configuration.
//!
//! Settings come from `~/.fuzzlsp/config.toml` (or an explicit path), every
//! section optional, and are then overridden by command-line flags:
//!
//! ```toml
//! [server]
//! name = "fuzzlsp"
//!
//! [backend]
//! kind = "openai"
//! model = "gpt-4o-mini"
//! api_key = "${OPENAI_API_KEY}"
//! temperature = 0.2
//! connect_test = true
//!
//! [prompts]
//! analysis = "prompts/analysis.txt"
//! retry = "prompts/retry.txt"
//! completion = "You are a coding assistant."
//!
//! [analysis]
//! timeout_secs = 120
//! max_attempts = 5
//! ```
//!
//! Relative prompt paths in the file are resolved against the file's own
//! directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fuzz_types::{ApiKey, BackendKind};
use serde::Deserialize;

pub const DEFAULT_SERVER_NAME: &str = "fuzzlsp";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FuzzConfig {
    pub server: Option<ServerConfig>,
    pub backend: Option<BackendConfig>,
    pub prompts: Option<PromptsConfig>,
    pub analysis: Option<AnalysisConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Diagnostic `source` label.
    pub name: Option<String>,
}

#[derive(Default, Deserialize)]
pub struct BackendConfig {
    pub kind: Option<BackendKind>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// May reference environment variables as `${NAME}`.
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub connect_test: bool,
}

// Manual Debug impl to keep the key out of logs.
impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field(
                "api_key",
                &if self.api_key.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("connect_test", &self.connect_test)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PromptsConfig {
    /// File holding the analysis system prompt.
    pub analysis: Option<PathBuf>,
    /// File holding the instruction prepended when analysis output is malformed.
    pub retry: Option<PathBuf>,
    /// Inline system prompt for completion and code generation.
    pub completion: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalysisConfig {
    pub timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unable to read prompt file {}: {source}", path.display())]
    Prompt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Prompt { path, .. } => Some(path),
            ConfigError::Zero { .. } => None,
        }
    }
}

/// Replace every `${NAME}` with the value of the environment variable `NAME`
/// (empty when unset). An unclosed `${` is kept verbatim.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let name = &after[..close];
        if !name.is_empty() {
            out.push_str(&std::env::var(name).unwrap_or_default());
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".fuzzlsp").join("config.toml"))
}

pub fn load_prompt(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Prompt {
        path: path.to_path_buf(),
        source,
    })
}

impl FuzzConfig {
    /// Load the default config file. A missing file is not an error.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file");
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), %source, "Failed to read config");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|source| {
            tracing::warn!(path = %path.display(), %source, "Failed to parse config");
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;

        if let Some(base) = path.parent() {
            config.anchor_prompt_paths(base);
        }
        Ok(config)
    }

    fn anchor_prompt_paths(&mut self, base: &Path) {
        let Some(prompts) = self.prompts.as_mut() else {
            return;
        };
        for path in [prompts.analysis.as_mut(), prompts.retry.as_mut()]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Merge flags over file values and fill in defaults.
    pub fn resolve(self, overrides: Overrides) -> Result<Settings, ConfigError> {
        let server = self.server.unwrap_or_default();
        let backend = self.backend.unwrap_or_default();
        let prompts = self.prompts.unwrap_or_default();
        let analysis = self.analysis.unwrap_or_default();

        let kind = overrides.backend.or(backend.kind).unwrap_or_default();

        let api_key = backend
            .api_key
            .as_deref()
            .map(expand_env_vars)
            .filter(|key| !key.trim().is_empty())
            .or_else(|| kind.env_var().and_then(|var| std::env::var(var).ok()))
            .map(ApiKey::new);

        let timeout_secs = analysis.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::Zero {
                field: "analysis.timeout_secs",
            });
        }
        let max_attempts = analysis.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "analysis.max_attempts",
            });
        }

        Ok(Settings {
            server_name: server
                .name
                .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string()),
            backend: kind,
            model: overrides
                .model
                .or(backend.model)
                .unwrap_or_else(|| kind.default_model().to_string()),
            base_url: backend
                .base_url
                .unwrap_or_else(|| kind.default_base_url().to_string()),
            api_key,
            temperature: backend.temperature,
            max_tokens: backend.max_tokens,
            connect_test: overrides.connect_test || backend.connect_test,
            analysis_prompt_file: overrides.prompt_file.or(prompts.analysis),
            retry_prompt_file: overrides.retry_prompt_file.or(prompts.retry),
            completion_prompt: prompts.completion,
            call_timeout: Duration::from_secs(timeout_secs),
            max_attempts,
        })
    }
}

/// Values given on the command line. `None`/`false` defer to the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend: Option<BackendKind>,
    pub model: Option<String>,
    pub prompt_file: Option<PathBuf>,
    pub retry_prompt_file: Option<PathBuf>,
    pub connect_test: bool,
}

/// Fully resolved settings handed to the server and backend constructors.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server_name: String,
    pub backend: BackendKind,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<ApiKey>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub connect_test: bool,
    pub analysis_prompt_file: Option<PathBuf>,
    pub retry_prompt_file: Option<PathBuf>,
    pub completion_prompt: Option<String>,
    pub call_timeout: Duration,
    pub max_attempts: u32,
}

impl Settings {
    /// The analysis system prompt, if a prompt file is configured.
    pub fn analysis_prompt(&self) -> Result<Option<String>, ConfigError> {
        self.analysis_prompt_file
            .as_deref()
            .map(load_prompt)
            .transpose()
    }
}
