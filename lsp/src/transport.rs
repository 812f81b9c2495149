//! Outbound half of the connection, shared by every handler.
//!
//! All notifications and responses go through one [`Transport`], whose
//! writer sits behind an async mutex: a frame is serialized first, then the
//! lock is held for exactly one `write_frame`, so frames never interleave.

use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;

use crate::codec::FrameWriter;
use crate::protocol::{Notification, Response};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not attached to a connection")]
    Unavailable,
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write message: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Transport {
    writer: Mutex<Option<FrameWriter<BoxedWriter>>>,
}

impl Transport {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Mutex::new(Some(FrameWriter::new(Box::new(writer)))),
        }
    }

    /// A transport with no connection; every write fails with
    /// [`TransportError::Unavailable`] until [`attach`](Self::attach).
    #[must_use]
    pub fn detached() -> Self {
        Self {
            writer: Mutex::new(None),
        }
    }

    /// Attach (or replace) the underlying connection.
    pub async fn attach<W>(&self, writer: W)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        *self.writer.lock().await = Some(FrameWriter::new(Box::new(writer)));
    }

    pub async fn is_attached(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Send `{"jsonrpc":"2.0","method":…,"params":…}` as one frame.
    pub async fn notify<P>(&self, method: &str, params: &P) -> Result<(), TransportError>
    where
        P: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(&Notification::new(method, params))?;
        self.write(&body).await
    }

    /// Like [`notify`](Self::notify), but failures are logged and dropped.
    pub async fn notify_best_effort<P>(&self, method: &str, params: &P)
    where
        P: Serialize + ?Sized,
    {
        if let Err(e) = self.notify(method, params).await {
            tracing::warn!(method, "Notification dropped: {e}");
        }
    }

    pub async fn respond(&self, response: &Response) -> Result<(), TransportError> {
        let body = serde_json::to_vec(response)?;
        self.write(&body).await
    }

    /// Release the connection. Safe to call more than once.
    pub async fn close(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.shutdown().await
        {
            tracing::debug!("Error shutting down transport: {e}");
        }
    }

    async fn write(&self, body: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Unavailable)?;
        writer.write_frame(body).await?;
        Ok(())
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::detached()
    }
}
