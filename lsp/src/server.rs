//! JSON-RPC dispatch loop.
//!
//! Frames are read in order on one task. Requests are answered on spawned
//! tasks so a slow backend call never blocks the loop. Document-sync
//! notifications are staged into the store inline, in arrival order, and
//! only their analysis is spawned.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::task::{JoinError, JoinSet};

use crate::codec::FrameReader;
use crate::handlers::{HandlerError, Handlers, StagedDocument};
use crate::protocol::{
    INVALID_REQUEST, IncomingMessage, Response, initialize_result, methods, parse_incoming,
};

pub struct Server {
    handlers: Arc<Handlers>,
    shutdown_requested: Arc<AtomicBool>,
}

impl Server {
    pub fn new(handlers: Handlers) -> Self {
        Self {
            handlers: Arc::new(handlers),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    /// Serve until `exit`, end of input, or an unreadable frame.
    ///
    /// On `exit` in-flight work is cancelled; otherwise it is awaited before
    /// the transport is closed.
    pub async fn run<R>(&self, input: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = FrameReader::new(input);
        let mut tasks = JoinSet::new();
        let mut exiting = false;

        let outcome = loop {
            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }

            let frame = match reader.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("Client closed the connection");
                    break Ok(());
                }
                Err(e) => {
                    tracing::warn!("Failed to read frame: {e:#}");
                    break Err(e);
                }
            };

            match parse_incoming(&frame) {
                Some(IncomingMessage::Request { id, method, params }) => {
                    let handlers = Arc::clone(&self.handlers);
                    let shutdown = Arc::clone(&self.shutdown_requested);
                    tasks.spawn(async move {
                        answer(&handlers, &shutdown, id, &method, params).await;
                    });
                }
                Some(IncomingMessage::Notification { method, .. }) if method == methods::EXIT => {
                    tracing::info!("Exit requested");
                    exiting = true;
                    break Ok(());
                }
                Some(IncomingMessage::Notification { method, params }) => {
                    self.notification(&mut tasks, &method, params).await;
                }
                Some(IncomingMessage::Response { id }) => {
                    tracing::trace!("Ignoring response from client for id {id}");
                }
                None => {
                    tracing::debug!("Ignoring malformed JSON-RPC frame");
                    if let Some(id) = frame.get("id").filter(|id| !id.is_null()) {
                        let response =
                            Response::failure(id.clone(), INVALID_REQUEST, "Invalid request");
                        if let Err(e) = self.handlers.transport().respond(&response).await {
                            tracing::warn!("Failed to send response: {e}");
                        }
                    }
                }
            }
        };

        if exiting && !tasks.is_empty() {
            tracing::info!(pending = tasks.len(), "Cancelling in-flight work on exit");
            tasks.abort_all();
        }
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        self.handlers.transport().close().await;
        outcome
    }

    async fn notification(&self, tasks: &mut JoinSet<()>, method: &str, params: Value) {
        let staged = match method {
            methods::INITIALIZED => {
                let handlers = Arc::clone(&self.handlers);
                tasks.spawn(async move { handlers.initialized().await });
                return;
            }
            methods::DID_OPEN => decode(params).and_then(|p| self.handlers.stage_open(p)),
            methods::DID_CHANGE => decode(params).and_then(|p| self.handlers.stage_change(p)),
            methods::DID_SAVE => match decode(params) {
                Ok(p) => self.handlers.stage_save(p).await,
                Err(e) => Err(e),
            },
            _ => {
                tracing::trace!(method, "Ignoring notification");
                return;
            }
        };

        match staged {
            Ok(Some(staged)) => self.spawn_analysis(tasks, method, staged),
            Ok(None) => {}
            Err(e) => tracing::warn!(method, "Notification failed: {e}"),
        }
    }

    fn spawn_analysis(&self, tasks: &mut JoinSet<()>, method: &str, staged: StagedDocument) {
        let handlers = Arc::clone(&self.handlers);
        let method = method.to_string();
        tasks.spawn(async move {
            let uri = staged.uri().to_string();
            if let Err(e) = handlers.analyze_staged(Some(staged)).await {
                tracing::warn!(method, uri, "Analysis failed: {e}");
            }
        });
    }
}

async fn answer(handlers: &Handlers, shutdown: &AtomicBool, id: Value, method: &str, params: Value) {
    let response = match dispatch(handlers, shutdown, method, params).await {
        Ok(result) => Response::success(id, result),
        Err(e) => {
            tracing::debug!(method, "Request failed: {e}");
            Response::failure(id, e.code(), e.to_string())
        }
    };
    if let Err(e) = handlers.transport().respond(&response).await {
        tracing::warn!(method, "Failed to send response: {e}");
    }
}

async fn dispatch(
    handlers: &Handlers,
    shutdown: &AtomicBool,
    method: &str,
    params: Value,
) -> Result<Value, HandlerError> {
    if shutdown.load(Ordering::Acquire) && method != methods::SHUTDOWN {
        return Err(HandlerError::ShuttingDown);
    }

    match method {
        methods::INITIALIZE => Ok(initialize_result(handlers.name())),
        methods::SHUTDOWN => {
            shutdown.store(true, Ordering::Release);
            Ok(Value::Null)
        }
        methods::DIAGNOSTIC => encode(&handlers.diagnostic(&decode(params)?)),
        methods::HOVER => encode(&handlers.hover(&decode(params)?)),
        methods::COMPLETION => encode(&handlers.completion(decode(params)?).await?),
        methods::CODE_ACTION => encode(&handlers.code_action(&decode(params)?)?),
        methods::CODE_ACTION_RESOLVE => {
            encode(&handlers.code_action_resolve(decode(params)?).await?)
        }
        other => Err(HandlerError::MethodNotFound(other.to_string())),
    }
}

fn decode<T: DeserializeOwned>(params: Value) -> Result<T, HandlerError> {
    serde_json::from_value(params).map_err(|e| HandlerError::InvalidParams(e.to_string()))
}

fn encode<T: Serialize>(result: &T) -> Result<Value, HandlerError> {
    serde_json::to_value(result).map_err(|e| HandlerError::Internal(e.to_string()))
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined
        && e.is_panic()
    {
        tracing::error!("Handler task panicked: {e}");
    }
}
