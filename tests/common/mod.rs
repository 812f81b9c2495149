//! Shared fixtures for the integration suite.
//!
//! A [`Session`] runs the real server stack (handlers, analyzer, transport,
//! `LlmBackend`) over in-memory pipes, with a wiremock server standing in
//! for Ollama. [`OllamaScript`] decides each reply from the system prompt of
//! the incoming chat request.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use fuzz_lsp::codec::{FrameReader, encode_frame};
use fuzz_lsp::{AnalysisOptions, Handlers, RetryPrompt, Server, ServerOptions, Transport};
use fuzz_providers::retry::RetryConfig;
use fuzz_providers::{EXPLAIN_INSTRUCTION, LlmBackend, LlmOptions, REFACTOR_INSTRUCTION};
use fuzz_types::{Backend, BackendKind};

pub const ANALYSIS_PROMPT: &str = "test analysis prompt";
pub const COMPLETION_PROMPT: &str = "test completion prompt";
pub const RETRY_PROMPT: &str = "test retry: answer with JSON only";

pub const URI: &str = "file:///project/src/main.c";
pub const TEXT: &str = "int x = 1\nfoo();\nreturn x;\n";
pub const GOOD_ANALYSIS: &str = r#"[{"line_number": 2, "severity": "mandatory", "source": "foo();", "rule": "undeclared", "description": "foo is not declared"}]"#;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted Ollama `/api/chat` responder.
#[derive(Default)]
pub struct OllamaScript {
    analyses: Mutex<VecDeque<String>>,
    completions: String,
    generated: String,
    refactor: String,
    explanation: String,
    failure: Option<u16>,
}

impl OllamaScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyses<'a>(mut self, replies: impl IntoIterator<Item = &'a str>) -> Self {
        self.analyses = Mutex::new(replies.into_iter().map(String::from).collect());
        self
    }

    pub fn completions(mut self, reply: &str) -> Self {
        self.completions = reply.to_string();
        self
    }

    pub fn generated(mut self, reply: &str) -> Self {
        self.generated = reply.to_string();
        self
    }

    pub fn refactor(mut self, reply: &str) -> Self {
        self.refactor = reply.to_string();
        self
    }

    pub fn explanation(mut self, reply: &str) -> Self {
        self.explanation = reply.to_string();
        self
    }

    /// Answer every request with this HTTP status.
    pub fn failing(mut self, status: u16) -> Self {
        self.failure = Some(status);
        self
    }
}

impl Respond for OllamaScript {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if let Some(status) = self.failure {
            return ResponseTemplate::new(status).set_body_string("backend unavailable");
        }

        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let system = body["messages"][0]["content"].as_str().unwrap_or_default();
        let user = body["messages"][1]["content"].as_str().unwrap_or_default();

        let reply = match system {
            ANALYSIS_PROMPT => lock(&self.analyses)
                .pop_front()
                .unwrap_or_else(|| "[]".to_string()),
            COMPLETION_PROMPT if user.contains("<CURSOR>") => self.generated.clone(),
            COMPLETION_PROMPT => self.completions.clone(),
            REFACTOR_INSTRUCTION => self.refactor.clone(),
            EXPLAIN_INSTRUCTION => self.explanation.clone(),
            _ => String::new(),
        };

        ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-model",
            "message": {"role": "assistant", "content": reply},
            "done": true
        }))
    }
}

/// A running server plus the client ends of its pipes.
pub struct Session {
    pub mock: MockServer,
    writer: DuplexStream,
    reader: FrameReader<DuplexStream>,
    server: JoinHandle<anyhow::Result<()>>,
}

impl Session {
    pub async fn start(script: OllamaScript) -> Self {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(script)
            .mount(&mock)
            .await;

        let options = LlmOptions {
            base_url: mock.uri(),
            model: "test-model".to_string(),
            analysis_prompt: ANALYSIS_PROMPT.to_string(),
            retry: RetryConfig::none(),
            ..LlmOptions::for_kind(BackendKind::Ollama)
        };
        let backend: Arc<dyn Backend> = Arc::new(LlmBackend::new(&options).unwrap());
        backend.start().await.unwrap();

        let (client_out, server_in) = tokio::io::duplex(1 << 16);
        let (server_out, client_in) = tokio::io::duplex(1 << 16);
        let handlers = Handlers::new(
            ServerOptions {
                completion_prompt: COMPLETION_PROMPT.to_string(),
                ..ServerOptions::default()
            },
            AnalysisOptions {
                retry_prompt: RetryPrompt::Inline(RETRY_PROMPT.to_string()),
                ..AnalysisOptions::default()
            },
            backend,
            Arc::new(Transport::new(server_out)),
        );
        let server = Server::new(handlers);

        Self {
            mock,
            writer: client_out,
            reader: FrameReader::new(client_in),
            server: tokio::spawn(async move { server.run(server_in).await }),
        }
    }

    pub async fn send(&mut self, message: Value) {
        self.send_raw(&encode_frame(message.to_string().as_bytes()))
            .await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await;
    }

    pub async fn request(&mut self, id: u64, method: &str, params: Value) -> Value {
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        self.next_with_id(id).await
    }

    pub async fn next_frame(&mut self) -> Option<Value> {
        self.reader.read_frame().await.unwrap()
    }

    pub async fn next_with_id(&mut self, id: u64) -> Value {
        loop {
            let frame = self.next_frame().await.expect("server closed the stream");
            if frame["id"] == id {
                return frame;
            }
        }
    }

    pub async fn next_notification(&mut self, method: &str) -> Value {
        loop {
            let frame = self.next_frame().await.expect("server closed the stream");
            if frame["method"] == method {
                return frame;
            }
        }
    }

    /// Open a document and wait until its analysis has finished.
    pub async fn open(&mut self, uri: &str, text: &str) {
        self.notify(
            "textDocument/didOpen",
            json!({"textDocument": {"uri": uri, "languageId": "c", "version": 1, "text": text}}),
        )
        .await;
        self.next_notification("analysisDone").await;
    }

    pub async fn change(&mut self, uri: &str, version: i32, text: &str) {
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": {"uri": uri, "version": version},
                "contentChanges": [{"text": text}]
            }),
        )
        .await;
    }

    pub async fn diagnostics(&mut self, id: u64, uri: &str) -> Vec<Value> {
        let reply = self
            .request(id, "textDocument/diagnostic", json!({"textDocument": {"uri": uri}}))
            .await;
        reply["result"]["items"].as_array().cloned().unwrap_or_default()
    }

    /// Chat requests the mock received, as parsed bodies.
    pub async fn chat_requests(&self) -> Vec<Value> {
        self.mock
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/api/chat")
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }

    /// `shutdown` then `exit`; returns the server's result.
    pub async fn finish(&mut self) -> anyhow::Result<()> {
        let reply = self.request(9_999, "shutdown", Value::Null).await;
        assert_eq!(reply["result"], Value::Null);
        self.notify("exit", Value::Null).await;
        self.join().await
    }

    /// Close the client's write half and wait for the server.
    pub async fn hang_up(&mut self) -> anyhow::Result<()> {
        self.writer.shutdown().await.unwrap();
        self.join().await
    }

    pub async fn join(&mut self) -> anyhow::Result<()> {
        (&mut self.server).await.unwrap()
    }
}

pub fn position(line: u32, character: u32) -> Value {
    json!({"textDocument": {"uri": URI}, "position": {"line": line, "character": character}})
}

pub fn line_range(line: u32) -> Value {
    json!({"start": {"line": line, "character": 0}, "end": {"line": line, "character": 0}})
}
