//! SMTP line protocol: commands, replies, extensions, and the timed channel
//! the session drives them over.

mod command;
mod extension;
mod reply;

pub use command::Command;
pub use extension::{AuthMechanism, Extension, ServerInfo};
pub use reply::{Reply, ReplyCode, is_last_reply_line, parse_reply};

use std::future::Future;
use std::io;
use std::time::Duration;

use tracing::trace;

use crate::connection::SmtpStream;
use crate::error::{Error, Result};

/// Upper bound on lines in one reply.
const MAX_REPLY_LINES: usize = 256;

/// An [`SmtpStream`] whose every read and write is bounded by a timeout.
#[derive(Debug)]
pub struct Channel {
    stream: SmtpStream,
    timeout: Duration,
}

impl Channel {
    /// Wraps a stream.
    #[must_use]
    pub const fn new(stream: SmtpStream, timeout: Duration) -> Self {
        Self { stream, timeout }
    }

    /// Returns true if the underlying stream is TLS-encrypted.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.stream.is_secure()
    }

    /// Returns the underlying stream.
    #[must_use]
    pub fn into_stream(self) -> SmtpStream {
        self.stream
    }

    /// Reads one complete (possibly multi-line) reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on I/O failure, timeout, or a malformed
    /// reply.
    pub async fn read_reply(&mut self) -> Result<Reply> {
        let timeout = self.timeout;
        let stream = &mut self.stream;
        let lines = bounded(timeout, "reply", async move {
            let mut lines = Vec::new();
            loop {
                let line = stream.read_line().await?;
                trace!(direction = "S", "{line}");
                let last = is_last_reply_line(&line);
                lines.push(line);
                if last {
                    return Ok(lines);
                }
                if lines.len() >= MAX_REPLY_LINES {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "reply has too many lines",
                    ));
                }
            }
        })
        .await?;
        parse_reply(&lines)
    }

    /// Sends a command and reads its reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on I/O failure, timeout, or a malformed
    /// reply. Server rejections are returned as a normal [`Reply`].
    pub async fn command(&mut self, cmd: &Command) -> Result<Reply> {
        trace!(direction = "C", "{}", cmd.redacted());
        self.write_raw(&cmd.serialize()).await?;
        self.read_reply().await
    }

    /// Writes raw bytes (message data).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on I/O failure or timeout.
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        bounded(self.timeout, "write", self.stream.write_all(data)).await
    }

    /// Shuts the stream down, bounded by the channel timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the shutdown fails or times out.
    pub async fn shutdown(&mut self) -> Result<()> {
        bounded(self.timeout, "shutdown", self.stream.shutdown()).await
    }
}

async fn bounded<T>(
    timeout: Duration,
    what: &str,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::Protocol(format!("{what} failed: {e}"))),
        Err(_) => Err(Error::Protocol(format!(
            "{what} timed out after {}s",
            timeout.as_secs_f64()
        ))),
    }
}

/// Normalizes line endings to CRLF, dot-stuffs, and appends the
/// terminating `.` line.
#[must_use]
pub fn encode_data(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 32 + 5);
    let body = message.strip_suffix(b"\n").unwrap_or(message);
    let body = body.strip_suffix(b"\r").unwrap_or(body);

    if !body.is_empty() {
        for line in body.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }
    out.extend_from_slice(b".\r\n");
    out
}
