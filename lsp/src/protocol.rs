//! JSON-RPC envelopes, method names and the advertised capabilities.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Methods the server answers or listens for.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";
    pub const DID_OPEN: &str = "textDocument/didOpen";
    pub const DID_CHANGE: &str = "textDocument/didChange";
    pub const DID_SAVE: &str = "textDocument/didSave";
    pub const DIAGNOSTIC: &str = "textDocument/diagnostic";
    pub const HOVER: &str = "textDocument/hover";
    pub const COMPLETION: &str = "textDocument/completion";
    pub const CODE_ACTION: &str = "textDocument/codeAction";
    pub const CODE_ACTION_RESOLVE: &str = "codeAction/resolve";
}

/// Custom notifications sent to the client.
pub mod notifications {
    pub const ANALYSIS_STARTED: &str = "analysisStarted";
    pub const ANALYSIS_DONE: &str = "analysisDone";
    pub const SHOW_GENERATED_CODE: &str = "window/showGeneratedCode";

    /// Payload labels for the lifecycle notifications.
    pub const ANALYSIS_STARTED_LABEL: &str = "AnalysisStarted";
    pub const ANALYSIS_DONE_LABEL: &str = "AnalysisDone";
}

#[derive(Debug, Serialize)]
pub struct Notification<'a, P: ?Sized> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: &'a P,
}

impl<'a, P: ?Sized> Notification<'a, P> {
    pub fn new(method: &'a str, params: &'a P) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// A reply to something we sent; the server never issues requests, so
    /// these are only logged.
    Response { id: Value },
}

pub fn parse_incoming(frame: &Value) -> Option<IncomingMessage> {
    let id = frame.get("id").filter(|id| !id.is_null());
    let method = frame
        .get("method")
        .and_then(Value::as_str)
        .map(String::from);
    let params = frame.get("params").cloned().unwrap_or(Value::Null);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_result_or_error) {
        (Some(id), Some(method), _) => Some(IncomingMessage::Request {
            id: id.clone(),
            method,
            params,
        }),
        (None, Some(method), _) => Some(IncomingMessage::Notification { method, params }),
        (Some(id), None, true) => Some(IncomingMessage::Response { id: id.clone() }),
        _ => None,
    }
}

/// Capabilities advertised in the `initialize` reply.
#[must_use]
pub fn server_capabilities() -> Value {
    serde_json::json!({
        "textDocumentSync": {
            "openClose": true,
            "change": 1,
            "save": { "includeText": true }
        },
        "hoverProvider": true,
        "completionProvider": {
            "triggerCharacters": ["."],
            "resolveProvider": false
        },
        "codeActionProvider": {
            "codeActionKinds": ["refactor.rewrite", "quickfix"],
            "resolveProvider": true
        },
        "diagnosticProvider": {
            "interFileDependencies": false,
            "workspaceDiagnostics": false
        }
    })
}

#[must_use]
pub fn initialize_result(server_name: &str) -> Value {
    serde_json::json!({
        "capabilities": server_capabilities(),
        "serverInfo": {
            "name": server_name,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}
