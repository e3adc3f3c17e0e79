//! Low-level SMTP stream handling.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Longest reply line accepted, CRLF included (RFC 5321 allows 512).
pub const MAX_LINE_LENGTH: u64 = 4096;

/// Any bidirectional byte stream a session can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Type-erased connection, plain or TLS-wrapped.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Buffered SMTP stream with its security status.
pub struct SmtpStream {
    reader: BufReader<BoxedStream>,
    secure: bool,
}

impl std::fmt::Debug for SmtpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpStream")
            .field("secure", &self.secure)
            .field("buffered", &self.reader.buffer().len())
            .finish_non_exhaustive()
    }
}

impl SmtpStream {
    /// Wraps a plaintext connection.
    #[must_use]
    pub fn plain(stream: BoxedStream) -> Self {
        Self {
            reader: BufReader::new(stream),
            secure: false,
        }
    }

    /// Wraps a connection that already completed a TLS handshake.
    #[must_use]
    pub fn secured(stream: BoxedStream) -> Self {
        Self {
            reader: BufReader::new(stream),
            secure: true,
        }
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.secure
    }

    /// Reads one line, without its line terminator.
    ///
    /// Bytes that are not valid UTF-8 (e.g. a Latin-1 banner) are replaced
    /// with U+FFFD rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` if the peer closed the connection and
    /// `InvalidData` if the line exceeds [`MAX_LINE_LENGTH`].
    pub async fn read_line(&mut self) -> io::Result<String> {
        let mut line = Vec::new();
        let n = (&mut self.reader)
            .take(MAX_LINE_LENGTH)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            ));
        }
        if line.last() != Some(&b'\n') && n as u64 >= MAX_LINE_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "reply line too long",
            ));
        }
        let text = String::from_utf8_lossy(&line);
        Ok(text.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Writes and flushes data.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let inner = self.reader.get_mut();
        inner.write_all(data).await?;
        inner.flush().await
    }

    /// Shuts down the write half.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.reader.get_mut().shutdown().await
    }

    /// Returns the raw connection for a TLS upgrade.
    ///
    /// Any bytes the server sent ahead of the handshake would be
    /// interpreted as if they arrived over TLS, so their presence is an
    /// error and the connection is handed back untouched.
    ///
    /// # Errors
    ///
    /// Returns the stream itself if it is already secure or has unread
    /// buffered bytes.
    pub fn into_upgradable(self) -> Result<BoxedStream, Self> {
        if self.secure || !self.reader.buffer().is_empty() {
            return Err(self);
        }
        Ok(self.reader.into_inner())
    }
}
