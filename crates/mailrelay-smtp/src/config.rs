//! Relay connection configuration.
//!
//! A [`ConnectionConfig`] is built once per invocation through
//! [`ConnectionConfigBuilder`] and never changes afterwards. All validation
//! happens in the builder, before any network I/O.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default timeout applied to every blocking network step.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default client identity sent in EHLO/HELO.
pub const DEFAULT_HELO_NAME: &str = "localhost";

/// Transport security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// No encryption. **Credentials travel in cleartext.**
    None,
    /// Start with plaintext, upgrade with STARTTLS (port 587).
    #[default]
    StartTls,
    /// TLS from the start (port 465).
    Ssl,
}

impl TlsMode {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Ssl => 465,
            Self::None | Self::StartTls => 587,
        }
    }

    /// Returns the configuration name of this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::StartTls => "starttls",
            Self::Ssl => "ssl",
        }
    }
}

impl std::fmt::Display for TlsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TlsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "starttls" => Ok(Self::StartTls),
            "ssl" => Ok(Self::Ssl),
            _ => Err(Error::Config(format!(
                "invalid TLS mode '{s}' (expected none/starttls/ssl)"
            ))),
        }
    }
}

/// Address family preference for name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    /// Whatever the platform resolver returns, in its order.
    #[default]
    Auto,
    /// IPv4 only.
    Ipv4,
    /// IPv6 only.
    Ipv6,
}

impl AddressFamily {
    /// Returns true if `addr` belongs to this family preference.
    #[must_use]
    pub const fn admits(self, addr: &SocketAddr) -> bool {
        match self {
            Self::Auto => true,
            Self::Ipv4 => addr.is_ipv4(),
            Self::Ipv6 => addr.is_ipv6(),
        }
    }

    /// Returns the configuration name of this preference.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" | "any" => Ok(Self::Auto),
            "ipv4" | "4" | "inet" | "af_inet" => Ok(Self::Ipv4),
            "ipv6" | "6" | "inet6" | "af_inet6" => Ok(Self::Ipv6),
            _ => Err(Error::Config(format!(
                "invalid address family '{s}' (expected auto/ipv4/ipv6)"
            ))),
        }
    }
}

/// TLS protocol version, ordered oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// TLS 1.0
    V1_0,
    /// TLS 1.1
    V1_1,
    /// TLS 1.2
    V1_2,
    /// TLS 1.3
    V1_3,
}

/// Accepted spellings of each TLS version.
const TLS_VERSION_ALIASES: &[(&str, TlsVersion)] = &[
    ("1", TlsVersion::V1_0),
    ("1.0", TlsVersion::V1_0),
    ("tls1", TlsVersion::V1_0),
    ("tls1.0", TlsVersion::V1_0),
    ("1.1", TlsVersion::V1_1),
    ("tls1.1", TlsVersion::V1_1),
    ("1.2", TlsVersion::V1_2),
    ("tls1.2", TlsVersion::V1_2),
    ("1.3", TlsVersion::V1_3),
    ("tls1.3", TlsVersion::V1_3),
];

impl TlsVersion {
    /// All versions, oldest first.
    pub const ALL: [Self; 4] = [Self::V1_0, Self::V1_1, Self::V1_2, Self::V1_3];

    /// Returns the canonical name (`"1.2"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V1_1 => "1.1",
            Self::V1_2 => "1.2",
            Self::V1_3 => "1.3",
        }
    }

    /// Parses an optional version; blank input means "not set".
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown spelling.
    pub fn parse_optional(value: Option<&str>) -> Result<Option<Self>> {
        match value.map(str::trim) {
            None | Some("") => Ok(None),
            Some(v) => v.parse().map(Some),
        }
    }
}

impl std::fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TlsVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase();
        TLS_VERSION_ALIASES
            .iter()
            .find(|(alias, _)| *alias == needle)
            .map(|(_, version)| *version)
            .ok_or_else(|| {
                Error::Config(format!(
                    "invalid TLS version '{s}' (expected 1.0/1.1/1.2/1.3)"
                ))
            })
    }
}

/// Relay connection configuration.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Relay hostname, used verbatim for TLS name verification.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Security mode.
    pub tls_mode: TlsMode,
    /// Address family preference.
    pub address_family: AddressFamily,
    /// Lowest TLS version allowed.
    pub tls_min_version: Option<TlsVersion>,
    /// Highest TLS version allowed.
    pub tls_max_version: Option<TlsVersion>,
    /// Timeout applied to each connect attempt and each protocol step.
    pub connect_timeout: Duration,
    /// Client identity sent in EHLO/HELO.
    pub helo_name: String,
    /// Authentication username.
    pub username: Option<String>,
    /// Authentication password.
    pub password: Option<String>,
}

impl ConnectionConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new(host)
    }

    /// Returns the credentials used on the send path.
    ///
    /// Both halves must be present; a strict build guarantees that a
    /// username never comes without a password.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// Returns the credentials used by the prober.
    ///
    /// A missing password is sent as an empty string so the server's
    /// rejection can be reported.
    #[must_use]
    pub fn probe_credentials(&self) -> Option<(&str, &str)> {
        self.username
            .as_deref()
            .map(|user| (user, self.password.as_deref().unwrap_or("")))
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls_mode", &self.tls_mode)
            .field("address_family", &self.address_family)
            .field("tls_min_version", &self.tls_min_version)
            .field("tls_max_version", &self.tls_max_version)
            .field("connect_timeout", &self.connect_timeout)
            .field("helo_name", &self.helo_name)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    host: String,
    port: Option<u16>,
    tls_mode: TlsMode,
    address_family: AddressFamily,
    tls_min_version: Option<TlsVersion>,
    tls_max_version: Option<TlsVersion>,
    connect_timeout: Duration,
    helo_name: String,
    username: Option<String>,
    password: Option<String>,
}

impl ConnectionConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            tls_mode: TlsMode::default(),
            address_family: AddressFamily::default(),
            tls_min_version: None,
            tls_max_version: None,
            connect_timeout: DEFAULT_TIMEOUT,
            helo_name: DEFAULT_HELO_NAME.to_string(),
            username: None,
            password: None,
        }
    }

    /// Sets the port. Without it the port follows the TLS mode.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls_mode = mode;
        self
    }

    /// Sets the address family preference.
    #[must_use]
    pub const fn address_family(mut self, family: AddressFamily) -> Self {
        self.address_family = family;
        self
    }

    /// Sets the lowest acceptable TLS version.
    #[must_use]
    pub const fn tls_min_version(mut self, version: Option<TlsVersion>) -> Self {
        self.tls_min_version = version;
        self
    }

    /// Sets the highest acceptable TLS version.
    #[must_use]
    pub const fn tls_max_version(mut self, version: Option<TlsVersion>) -> Self {
        self.tls_max_version = version;
        self
    }

    /// Sets the per-step timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the EHLO/HELO client identity.
    #[must_use]
    pub fn helo_name(mut self, name: impl Into<String>) -> Self {
        self.helo_name = name.into();
        self
    }

    /// Sets the authentication username.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the authentication password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Builds the configuration for the send path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host is empty, the port or timeout
    /// is zero, `tls_min_version > tls_max_version`, or a username is set
    /// without a password.
    pub fn build(self) -> Result<ConnectionConfig> {
        if self.username.is_some() && self.password.is_none() {
            return Err(Error::Config(
                "a password is required when a username is set".into(),
            ));
        }
        self.finish()
    }

    /// Builds the configuration for probing.
    ///
    /// Same checks as [`build`](Self::build), except that a username
    /// without a password is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on any other validation failure.
    pub fn build_for_probe(self) -> Result<ConnectionConfig> {
        self.finish()
    }

    fn finish(self) -> Result<ConnectionConfig> {
        let host = self.host.trim().to_string();
        if host.is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.port == Some(0) {
            return Err(Error::Config("port must be between 1 and 65535".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".into()));
        }
        if let (Some(min), Some(max)) = (self.tls_min_version, self.tls_max_version)
            && min > max
        {
            return Err(Error::Config(format!(
                "tls_min_version ({min}) must be <= tls_max_version ({max})"
            )));
        }

        Ok(ConnectionConfig {
            host,
            port: self.port.unwrap_or_else(|| self.tls_mode.default_port()),
            tls_mode: self.tls_mode,
            address_family: self.address_family,
            tls_min_version: self.tls_min_version,
            tls_max_version: self.tls_max_version,
            connect_timeout: self.connect_timeout,
            helo_name: self.helo_name,
            username: self.username,
            password: self.password,
        })
    }
}
