//! `Content-Length` framing for JSON-RPC over a byte stream.
//!
//! Every message is `Content-Length: N\r\n\r\n` followed by exactly `N`
//! bytes of body. [`FrameWriter`] emits a frame as a single write so that a
//! header is never separated from its body; [`FrameReader`] parses inbound
//! frames for the dispatch loop.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum inbound frame size (4 MiB).
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

/// Build the complete on-wire bytes for one message body.
#[must_use]
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Writes framed messages to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one already-serialized body with its header, then flush.
    pub async fn write_frame(&mut self, body: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(&encode_frame(body)).await?;
        self.writer.flush().await
    }

    /// Flush and shut down the underlying writer.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.writer.flush().await?;
        self.writer.shutdown().await
    }
}

/// Reads framed JSON messages from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame and decode its body as JSON.
    ///
    /// Returns `Ok(None)` on a clean EOF between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(body) = self.read_body().await? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&body).context("parsing JSON-RPC frame")?;
        Ok(Some(value))
    }

    async fn read_body(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(length) = self.read_headers().await? else {
            return Ok(None);
        };
        if length > MAX_FRAME_BYTES {
            bail!("{CONTENT_LENGTH} {length} exceeds maximum {MAX_FRAME_BYTES}");
        }

        let mut body = vec![0u8; length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;
        Ok(Some(body))
    }

    /// Consume header lines up to the blank separator.
    ///
    /// `Ok(None)` only when EOF arrives before any header byte.
    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut length = None;
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;
            if read == 0 {
                if started {
                    bail!("unexpected EOF while reading headers");
                }
                return Ok(None);
            }
            started = true;

            let header = line.trim();
            if header.is_empty() {
                break;
            }
            let Some((name, value)) = header.split_once(':') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let parsed = value
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("invalid {CONTENT_LENGTH} value {value:?}"))?;
                length = Some(parsed);
            }
        }

        match length {
            Some(length) => Ok(Some(length)),
            None => bail!("missing {CONTENT_LENGTH} header"),
        }
    }
}
