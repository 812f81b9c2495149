//! OpenAI chat completions client.
//!
//! Non-streaming `POST {base}/v1/chat/completions` with bearer
//! authentication. The reply text is `choices[0].message.content`.

use fuzz_types::{ApiKey, BackendError};
use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;
use crate::{ChatMessage, LlmOptions, decode_json, send_retried_request};

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage<'a>],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<ApiKey>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    retry: RetryConfig,
}

impl OpenAiClient {
    #[must_use]
    pub fn new(http: reqwest::Client, options: &LlmOptions) -> Self {
        Self {
            http,
            url: options.endpoint(CHAT_COMPLETIONS_PATH),
            api_key: options.api_key.clone(),
            model: options.model.clone(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            retry: options.retry.clone(),
        }
    }

    fn key(&self) -> Result<&ApiKey, BackendError> {
        self.api_key
            .as_ref()
            .filter(|key| !key.is_blank())
            .ok_or_else(|| BackendError::NotConfigured("OpenAI API key is not set".to_string()))
    }

    pub fn check_key(&self) -> Result<(), BackendError> {
        self.key().map(|_| ())
    }

    pub async fn chat(&self, messages: &[ChatMessage<'_>]) -> Result<String, BackendError> {
        let key = self.key()?;
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = send_retried_request(
            || {
                self.http
                    .post(&self.url)
                    .bearer_auth(key.expose_secret())
                    .json(&body)
            },
            &self.retry,
        )
        .await?;

        let reply: ChatResponse = decode_json(response).await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(BackendError::EmptyReply)
    }
}
