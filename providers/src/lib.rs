//! Text-generation backends for FuzzLSP.
//!
//! [`LlmBackend`] implements the [`Backend`] capability over one of two chat
//! APIs, selected once at startup by [`BackendKind`]:
//!
//! - [`openai`] - OpenAI chat completions (`POST {base}/v1/chat/completions`)
//! - [`ollama`] - Ollama chat (`POST {base}/api/chat`, non-streaming)
//!
//! Every call is a single system + user exchange. HTTP failures go through
//! the [`retry`] policy and surface as [`BackendError`]; the language server
//! never sees a `reqwest` type.

pub mod ollama;
pub mod openai;
pub mod retry;

use std::time::Duration;

use fuzz_types::{ApiKey, Backend, BackendError, BackendFut, BackendKind};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use fuzz_types;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 8;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Whole-request timeout for the HTTP client. The language server applies its
/// own, usually shorter, per-call deadline on top.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// System prompt used for analysis when no prompt file is configured.
pub const DEFAULT_ANALYSIS_PROMPT: &str = "You are a static analysis tool. Review the source \
file you are given and report problems as a JSON array. Each element must be an object with \
the keys \"line_number\" (1-based integer), \"severity\" (\"mandatory\" for defects that \
must be fixed, \"advisory\" for everything else), \"source\" (the offending code), \"rule\" (a short rule name) and \
\"description\" (one sentence). Reply with the JSON array only. Reply with [] if there is \
nothing to report.";

pub const REFACTOR_INSTRUCTION: &str = "Rewrite the following line of code so that it no longer \
contains the problem it has. Reply with the rewritten line only, without explanation or \
Markdown.";

pub const EXPLAIN_INSTRUCTION: &str = "Explain in one or two sentences what is wrong with the \
following line of code. Reply with plain text only.";

const CURSOR_MARKER: &str = "<CURSOR>";

/// Connection settings for a backend, resolved from configuration and flags.
#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub kind: BackendKind,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<ApiKey>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Probe the service from [`Backend::start`].
    pub connect_test: bool,
    pub analysis_prompt: String,
    pub request_timeout: Duration,
    pub retry: retry::RetryConfig,
}

impl LlmOptions {
    /// Defaults for `kind`: its default model and base URL, the key from its
    /// environment variable if one is set.
    #[must_use]
    pub fn for_kind(kind: BackendKind) -> Self {
        let api_key = kind
            .env_var()
            .and_then(|var| std::env::var(var).ok())
            .map(ApiKey::new);
        Self {
            kind,
            model: kind.default_model().to_string(),
            base_url: kind.default_base_url().to_string(),
            api_key,
            temperature: None,
            max_tokens: None,
            connect_test: false,
            analysis_prompt: DEFAULT_ANALYSIS_PROMPT.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: retry::RetryConfig::default(),
        }
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

/// One chat turn, shared by both wire formats.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

impl<'a> ChatMessage<'a> {
    #[must_use]
    pub const fn system(content: &'a str) -> Self {
        Self {
            role: "system",
            content,
        }
    }

    #[must_use]
    pub const fn user(content: &'a str) -> Self {
        Self {
            role: "user",
            content,
        }
    }
}

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
}

/// HTTP client used by every backend. Plain HTTP stays allowed because a
/// local Ollama listens on `http://localhost`.
pub fn http_client_with_timeout(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    base_client_builder().timeout(timeout).build()
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Turn a retry outcome into a 2xx response or a [`BackendError`].
pub(crate) async fn handle_response(
    outcome: retry::RetryOutcome,
) -> Result<reqwest::Response, BackendError> {
    let response = match outcome {
        retry::RetryOutcome::Success(resp) | retry::RetryOutcome::HttpError(resp) => resp,
        retry::RetryOutcome::ConnectionError { attempts, source } => {
            return Err(BackendError::Request(format!(
                "failed after {attempts} attempts: {source}"
            )));
        }
        retry::RetryOutcome::NonRetryable(e) => {
            return Err(BackendError::Request(e.to_string()));
        }
    };

    let status = response.status();
    if !status.is_success() {
        let message = read_capped_error_body(response).await;
        return Err(BackendError::Api {
            status: status.as_u16(),
            message,
        });
    }

    Ok(response)
}

pub(crate) async fn send_retried_request<F>(
    build_request: F,
    retry_config: &retry::RetryConfig,
) -> Result<reqwest::Response, BackendError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let outcome = retry::send_with_retry(build_request, retry_config).await;
    handle_response(outcome).await
}

pub(crate) async fn decode_json<T>(response: reqwest::Response) -> Result<T, BackendError>
where
    T: DeserializeOwned,
{
    response
        .json::<T>()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

/// Drop a Markdown code fence wrapped around the whole reply.
#[must_use]
pub fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Skip the info string (e.g. `rust`) on the opening fence line.
    match body.split_once('\n') {
        Some((_, inner)) => inner.trim(),
        None => body.trim(),
    }
}

/// Split a completion reply into candidates: one per non-empty line, fence
/// lines excluded.
#[must_use]
pub fn completion_lines(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with("```"))
        .map(String::from)
        .collect()
}

fn non_empty(reply: &str) -> Result<String, BackendError> {
    let text = strip_code_fence(reply);
    if text.is_empty() {
        return Err(BackendError::EmptyReply);
    }
    Ok(text.to_string())
}

fn fill_in_the_middle(prefix: &str, suffix: &str) -> String {
    format!(
        "Write the code that belongs at {CURSOR_MARKER}. Reply with that code only.\n\n\
         {prefix}{CURSOR_MARKER}{suffix}"
    )
}

/// The wire client behind an [`LlmBackend`].
#[derive(Debug, Clone)]
pub enum ChatClient {
    OpenAi(openai::OpenAiClient),
    Ollama(ollama::OllamaClient),
}

impl ChatClient {
    pub fn new(options: &LlmOptions) -> Result<Self, BackendError> {
        let http = http_client_with_timeout(options.request_timeout)
            .map_err(|e| BackendError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(match options.kind {
            BackendKind::OpenAI => Self::OpenAi(openai::OpenAiClient::new(http, options)),
            BackendKind::Ollama => Self::Ollama(ollama::OllamaClient::new(http, options)),
        })
    }

    pub async fn chat(&self, messages: &[ChatMessage<'_>]) -> Result<String, BackendError> {
        match self {
            Self::OpenAi(client) => client.chat(messages).await,
            Self::Ollama(client) => client.chat(messages).await,
        }
    }
}

/// [`Backend`] implementation over a chat API.
#[derive(Debug, Clone)]
pub struct LlmBackend {
    kind: BackendKind,
    client: ChatClient,
    analysis_prompt: String,
    connect_test: bool,
}

impl LlmBackend {
    pub fn new(options: &LlmOptions) -> Result<Self, BackendError> {
        Ok(Self {
            kind: options.kind,
            client: ChatClient::new(options)?,
            analysis_prompt: options.analysis_prompt.clone(),
            connect_test: options.connect_test,
        })
    }

    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn ask(&self, system: &str, user: &str) -> Result<String, BackendError> {
        self.client
            .chat(&[ChatMessage::system(system), ChatMessage::user(user)])
            .await
    }
}

impl Backend for LlmBackend {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    fn start(&self) -> BackendFut<'_, ()> {
        Box::pin(async move {
            match &self.client {
                ChatClient::OpenAi(client) => client.check_key(),
                ChatClient::Ollama(client) if self.connect_test => client.probe().await,
                ChatClient::Ollama(_) => Ok(()),
            }?;
            tracing::info!(backend = self.name(), "Backend ready");
            Ok(())
        })
    }

    fn analyse_document<'a>(&'a self, uri: &'a str, text: &'a str) -> BackendFut<'a, String> {
        Box::pin(async move {
            tracing::debug!(%uri, bytes = text.len(), "Requesting analysis");
            self.ask(&self.analysis_prompt, text).await
        })
    }

    fn complete_code<'a>(
        &'a self,
        uri: &'a str,
        prefix: &'a str,
        system_prompt: &'a str,
    ) -> BackendFut<'a, Vec<String>> {
        Box::pin(async move {
            tracing::debug!(%uri, "Requesting completions");
            let reply = self.ask(system_prompt, prefix).await?;
            Ok(completion_lines(&reply))
        })
    }

    fn generate_code<'a>(
        &'a self,
        uri: &'a str,
        prefix: &'a str,
        suffix: &'a str,
        system_prompt: &'a str,
    ) -> BackendFut<'a, String> {
        Box::pin(async move {
            tracing::debug!(%uri, "Requesting generated code");
            let reply = self
                .ask(system_prompt, &fill_in_the_middle(prefix, suffix))
                .await?;
            Ok(strip_code_fence(&reply).to_string())
        })
    }

    fn refactor_code_line<'a>(&'a self, line: &'a str) -> BackendFut<'a, String> {
        Box::pin(async move { non_empty(&self.ask(REFACTOR_INSTRUCTION, line).await?) })
    }

    fn explain_code_issue<'a>(&'a self, line: &'a str) -> BackendFut<'a, String> {
        Box::pin(async move { non_empty(&self.ask(EXPLAIN_INSTRUCTION, line).await?) })
    }
}
