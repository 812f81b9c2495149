//! Ollama chat client.
//!
//! `POST {base}/api/chat` with `stream: false`; the reply text is
//! `message.content`. `GET {base}/api/tags` doubles as a connectivity probe.

use fuzz_types::BackendError;
use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;
use crate::{ChatMessage, LlmOptions, decode_json, send_retried_request};

pub const CHAT_PATH: &str = "/api/chat";
pub const TAGS_PATH: &str = "/api/tags";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage<'a>],
    stream: bool,
    #[serde(skip_serializing_if = "ModelOptions::is_empty")]
    options: ModelOptions,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
struct ModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl ModelOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.num_predict.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    chat_url: String,
    tags_url: String,
    model: String,
    options: ModelOptions,
    retry: RetryConfig,
}

impl OllamaClient {
    #[must_use]
    pub fn new(http: reqwest::Client, options: &LlmOptions) -> Self {
        Self {
            http,
            chat_url: options.endpoint(CHAT_PATH),
            tags_url: options.endpoint(TAGS_PATH),
            model: options.model.clone(),
            options: ModelOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
            retry: options.retry.clone(),
        }
    }

    /// Check that the server answers at all.
    pub async fn probe(&self) -> Result<(), BackendError> {
        send_retried_request(|| self.http.get(&self.tags_url), &self.retry).await?;
        tracing::debug!(url = %self.tags_url, "Ollama reachable");
        Ok(())
    }

    pub async fn chat(&self, messages: &[ChatMessage<'_>]) -> Result<String, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: self.options,
        };

        let response =
            send_retried_request(|| self.http.post(&self.chat_url).json(&body), &self.retry)
                .await?;

        let reply: ChatResponse = decode_json(response).await?;
        if reply.message.content.trim().is_empty() {
            return Err(BackendError::EmptyReply);
        }
        Ok(reply.message.content)
    }
}
