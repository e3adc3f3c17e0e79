//! TLS policy: client configuration with version pinning, implicit
//! wrapping, and in-place STARTTLS upgrade.
//!
//! Certificates are verified against the platform trust store and the
//! literal configured host name, never a resolved IP.

use std::future::Future;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore, SupportedProtocolVersion};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::config::{ConnectionConfig, TlsVersion};
use crate::connection::{BoxedStream, SmtpStream};
use crate::error::{Error, Result};

/// Versions rustls can negotiate, oldest first.
static NEGOTIABLE: [(TlsVersion, &SupportedProtocolVersion); 2] = [
    (TlsVersion::V1_2, &rustls::version::TLS12),
    (TlsVersion::V1_3, &rustls::version::TLS13),
];

/// TLS handshake capability.
///
/// [`TlsPolicy`] is the production implementation; the two entry points
/// are provided on top of [`handshake`](Self::handshake).
pub trait Handshake: Sync {
    /// Runs a client handshake over `stream`, verifying `host`.
    fn handshake(
        &self,
        stream: BoxedStream,
        host: &str,
    ) -> impl Future<Output = Result<BoxedStream>> + Send;

    /// Implicit TLS: secures a freshly connected socket before any
    /// protocol bytes are exchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the handshake fails.
    fn wrap_before_protocol(
        &self,
        raw: BoxedStream,
        host: &str,
    ) -> impl Future<Output = Result<SmtpStream>> + Send {
        async move { Ok(SmtpStream::secured(self.handshake(raw, host).await?)) }
    }

    /// STARTTLS: secures an already-greeted plaintext stream in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the stream is already secure or the
    /// server pipelined bytes after its go-ahead, and [`Error::Tls`] if the
    /// handshake fails.
    fn upgrade_in_place(
        &self,
        stream: SmtpStream,
        host: &str,
    ) -> impl Future<Output = Result<SmtpStream>> + Send {
        async move {
            let raw = stream.into_upgradable().map_err(|stream| {
                if stream.is_secure() {
                    Error::InvalidState("stream is already TLS".into())
                } else {
                    Error::Protocol("server sent data before the TLS handshake".into())
                }
            })?;
            Ok(SmtpStream::secured(self.handshake(raw, host).await?))
        }
    }
}

/// rustls-backed TLS policy.
#[derive(Clone)]
pub struct TlsPolicy {
    config: Arc<ClientConfig>,
    versions: Vec<TlsVersion>,
}

impl std::fmt::Debug for TlsPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsPolicy")
            .field("versions", &self.versions)
            .field("config", &"<ClientConfig>")
            .finish()
    }
}

impl TlsPolicy {
    /// Builds a policy from the connection configuration, trusting the
    /// platform roots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if no negotiable version lies in the
    /// configured range.
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        Self::new(config.tls_min_version, config.tls_max_version)
    }

    /// Builds a policy for an optional version range, trusting the
    /// platform roots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if no negotiable version lies in the range.
    pub fn new(min: Option<TlsVersion>, max: Option<TlsVersion>) -> Result<Self> {
        // Check the range first so a bad pin fails without touching the
        // certificate store.
        negotiable_versions(min, max)?;
        Self::with_roots(min, max, platform_roots())
    }

    /// Builds a policy with an explicit trust store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if no negotiable version lies in the range.
    pub fn with_roots(
        min: Option<TlsVersion>,
        max: Option<TlsVersion>,
        roots: RootCertStore,
    ) -> Result<Self> {
        let selected = negotiable_versions(min, max)?;
        let protocol_versions: Vec<&'static SupportedProtocolVersion> =
            selected.iter().map(|(_, v)| *v).collect();

        let config = ClientConfig::builder_with_protocol_versions(&protocol_versions)
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            versions: selected.into_iter().map(|(v, _)| v).collect(),
        })
    }

    /// Versions this policy will offer, oldest first.
    #[must_use]
    pub fn versions(&self) -> &[TlsVersion] {
        &self.versions
    }
}

impl Handshake for TlsPolicy {
    async fn handshake(&self, stream: BoxedStream, host: &str) -> Result<BoxedStream> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| Error::Tls(format!("invalid TLS server name: {host}")))?;

        let connector = TlsConnector::from(Arc::clone(&self.config));
        let tls = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Tls(format!("TLS handshake with {host} failed: {e}")))?;

        let (_, conn) = tls.get_ref();
        debug!(
            version = ?conn.protocol_version(),
            suite = ?conn.negotiated_cipher_suite().map(|s| s.suite()),
            "TLS established"
        );
        Ok(Box::new(tls))
    }
}

fn negotiable_versions(
    min: Option<TlsVersion>,
    max: Option<TlsVersion>,
) -> Result<Vec<(TlsVersion, &'static SupportedProtocolVersion)>> {
    let selected: Vec<_> = NEGOTIABLE
        .iter()
        .copied()
        .filter(|(v, _)| min.is_none_or(|m| *v >= m) && max.is_none_or(|m| *v <= m))
        .collect();

    if selected.is_empty() {
        let show = |v: Option<TlsVersion>| v.map_or("any", TlsVersion::as_str);
        return Err(Error::Tls(format!(
            "no supported TLS version between {} and {} (supported: 1.2, 1.3)",
            show(min),
            show(max)
        )));
    }
    Ok(selected)
}

/// Loads the platform trust store, falling back to the bundled Mozilla
/// roots when none can be read.
fn platform_roots() -> RootCertStore {
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        debug!(error = %e, "skipping unreadable platform certificate");
    }

    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(loaded.certs);
    debug!(added, ignored, "loaded platform root certificates");

    if store.is_empty() {
        warn!("no platform root certificates available, using bundled roots");
        return RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
    }
    store
}
