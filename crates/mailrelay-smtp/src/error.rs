//! Error types for relay connection and session operations.

use std::io;
use std::net::SocketAddr;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure class of an [`Error`].
///
/// The probe and send front ends print this as the `<kind>` token of their
/// one-line failure summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Configuration rejected before any network I/O.
    Config,
    /// Name resolution produced no usable address.
    Resolution,
    /// Every candidate address failed to connect.
    Connection,
    /// TLS handshake, certificate or version negotiation failure.
    Tls,
    /// Unexpected or malformed reply, or a timeout mid-exchange.
    Protocol,
    /// Credentials rejected by the server.
    Auth,
    /// Envelope address failed validation.
    InvalidAddress,
    /// Operation called from the wrong session state.
    InvalidState,
}

impl ErrorKind {
    /// Returns the machine-readable name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config_error",
            Self::Resolution => "resolution_error",
            Self::Connection => "connection_error",
            Self::Tls => "tls_error",
            Self::Protocol => "protocol_error",
            Self::Auth => "auth_error",
            Self::InvalidAddress => "invalid_address",
            Self::InvalidState => "invalid_state",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No address could be resolved for the host.
    #[error("cannot resolve {host}: {reason}")]
    Resolution {
        /// Host name as configured.
        host: String,
        /// Resolver failure or filtering outcome.
        reason: String,
    },

    /// The last candidate address failed to connect.
    #[error("connect to {addr} failed: {source}")]
    Connection {
        /// Address of the last attempted candidate.
        addr: SocketAddr,
        /// Error of the last attempt.
        #[source]
        source: io::Error,
    },

    /// TLS error.
    #[error("{0}")]
    Tls(String),

    /// Protocol error (unexpected response, I/O failure or timeout mid-exchange).
    #[error("{0}")]
    Protocol(String),

    /// Server returned an error reply.
    #[error("server replied {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Reply text.
        message: String,
    },

    /// Credentials rejected.
    #[error("authentication rejected ({code}): {message}")]
    Auth {
        /// Reply code (usually 535).
        code: u16,
        /// Reply text.
        message: String,
    },

    /// Invalid email address.
    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    /// Invalid state for operation.
    #[error("invalid state for operation: {0}")]
    InvalidState(String),
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Classifies this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Resolution { .. } => ErrorKind::Resolution,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Tls(_) => ErrorKind::Tls,
            Self::Protocol(_) | Self::SmtpError { .. } => ErrorKind::Protocol,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::InvalidAddress(_) => ErrorKind::InvalidAddress,
            Self::InvalidState(_) => ErrorKind::InvalidState,
        }
    }

    /// Returns true if this is a TLS-layer failure.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Returns true if this is a permanent server rejection (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::SmtpError { code, .. } | Self::Auth { code, .. } => *code >= 500 && *code < 600,
            _ => false,
        }
    }

    /// Returns true if this is a transient server rejection (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::SmtpError { code, .. } | Self::Auth { code, .. } => *code >= 400 && *code < 500,
            _ => false,
        }
    }
}
