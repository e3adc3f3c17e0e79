//! Connectivity probe: drives the handshake without sending mail and turns
//! the outcome into a one-line verdict plus troubleshooting hints.

use std::io::{self, Write};

use tracing::debug;

use crate::config::{AddressFamily, ConnectionConfig, TlsMode};
use crate::connection::Connect;
use crate::error::{Error, Result};
use crate::resolve::{AddressCandidate, Resolve, resolve_candidates};
use crate::session::TransportSession;
use crate::tls::Handshake;

/// Exit status for a successful run.
pub const EXIT_OK: u8 = 0;

/// Exit status for any classified failure.
pub const EXIT_FAILURE: u8 = 2;

/// Addresses listed on the `resolved_ips=` line.
const MAX_LISTED_ADDRESSES: usize = 10;

/// Handshake prober.
#[derive(Debug, Clone, Copy, Default)]
pub struct Prober {
    auth: bool,
}

impl Prober {
    /// Creates a prober; with `auth` it also tries the configured
    /// credentials.
    #[must_use]
    pub const fn new(auth: bool) -> Self {
        Self { auth }
    }

    /// Runs the probe, writing the verdict to `out`/`err`, and returns the
    /// process exit status.
    ///
    /// # Errors
    ///
    /// Only fails if writing to `out` or `err` fails.
    pub async fn run<R, C, H>(
        &self,
        config: &ConnectionConfig,
        resolver: &R,
        connector: &C,
        tls: &H,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> io::Result<u8>
    where
        R: Resolve,
        C: Connect,
        H: Handshake,
    {
        let addresses = listed_addresses(config, resolver).await;
        if !addresses.is_empty() {
            writeln!(out, "resolved_ips={}", join_addresses(&addresses))?;
        }

        match self.probe(config, resolver, connector, tls).await {
            Ok(()) => {
                writeln!(out, "probe=ok")?;
                Ok(EXIT_OK)
            }
            Err(e) => {
                report_failure(err, "probe", &e, config)?;
                Ok(EXIT_FAILURE)
            }
        }
    }

    /// Connects, upgrades in `starttls` mode and, when enabled and a
    /// username is configured, authenticates. The session is always closed.
    ///
    /// # Errors
    ///
    /// Returns the failure of the first step that went wrong.
    pub async fn probe<R, C, H>(
        &self,
        config: &ConnectionConfig,
        resolver: &R,
        connector: &C,
        tls: &H,
    ) -> Result<()>
    where
        R: Resolve,
        C: Connect,
        H: Handshake,
    {
        let mut session = TransportSession::open(config, resolver, connector, tls).await?;
        debug!(
            peer = ?session.peer().map(|p| p.addr),
            secure = session.is_secure(),
            "probe handshake complete"
        );

        let outcome = match config.probe_credentials() {
            Some((username, password)) if self.auth => {
                session.authenticate(username, password).await
            }
            _ => Ok(()),
        };
        session.close().await;
        outcome
    }
}

/// Resolves for display only, across both families; failures yield an
/// empty list.
async fn listed_addresses<R: Resolve>(
    config: &ConnectionConfig,
    resolver: &R,
) -> Vec<AddressCandidate> {
    match resolve_candidates(
        resolver,
        &config.host,
        config.port,
        AddressFamily::Auto,
        config.connect_timeout,
    )
    .await
    {
        Ok(mut candidates) => {
            candidates.truncate(MAX_LISTED_ADDRESSES);
            candidates
        }
        Err(e) => {
            debug!(error = %e, "address listing skipped");
            Vec::new()
        }
    }
}

fn join_addresses(addresses: &[AddressCandidate]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Writes `<stage>=failed <kind>: <message>` followed by the hint block.
///
/// # Errors
///
/// Fails only if writing fails.
pub fn report_failure(
    err: &mut impl Write,
    stage: &str,
    error: &Error,
    config: &ConnectionConfig,
) -> io::Result<()> {
    writeln!(err, "{}", failure_line(stage, error))?;
    err.write_all(render_hints(config.tls_mode, &config.host).as_bytes())
}

/// Formats the one-line failure summary.
#[must_use]
pub fn failure_line(stage: &str, error: &Error) -> String {
    format!("{stage}=failed {}: {error}", error.kind())
}

/// Troubleshooting hints keyed off the TLS mode.
#[must_use]
pub fn render_hints(tls_mode: TlsMode, host: &str) -> String {
    let (port, openssl) = match tls_mode {
        TlsMode::Ssl => (
            "465",
            format!("openssl s_client -connect {host}:465 -servername {host}"),
        ),
        TlsMode::StartTls | TlsMode::None => (
            "587",
            format!("openssl s_client -starttls smtp -connect {host}:587 -servername {host}"),
        ),
    };

    format!(
        "\n\
         Troubleshooting hints:\n\
         - If you see EOF/handshake failures, your network may be blocking SMTP ports (common for 465/587/25).\n\
         - Try {port} with the matching TLS mode (ssl->465, starttls->587), and test from a different network.\n\
         - Quick port test: nc -vz {host} {port}\n\
         - TLS test: {openssl}\n\
         - In sandboxed runs, network access may require escalated permissions.\n"
    )
}
