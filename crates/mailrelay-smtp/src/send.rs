//! One-shot message submission.

use tracing::info;

use crate::address::Envelope;
use crate::config::ConnectionConfig;
use crate::connection::Connect;
use crate::error::Result;
use crate::resolve::Resolve;
use crate::session::TransportSession;
use crate::tls::Handshake;

/// Opens a session, authenticates when credentials are configured, submits
/// `message` to `envelope`, and closes the session on every path.
///
/// # Errors
///
/// Returns the failure of the first step that went wrong.
pub async fn send_message<R, C, H>(
    config: &ConnectionConfig,
    resolver: &R,
    connector: &C,
    tls: &H,
    envelope: &Envelope,
    message: &[u8],
) -> Result<()>
where
    R: Resolve,
    C: Connect,
    H: Handshake,
{
    let mut session = TransportSession::open(config, resolver, connector, tls).await?;

    let mut outcome = Ok(());
    if let Some((username, password)) = config.credentials() {
        outcome = session.authenticate(username, password).await;
    }
    if outcome.is_ok() {
        outcome = session.send(envelope, message).await;
    }
    session.close().await;

    if outcome.is_ok() {
        info!(
            host = %config.host,
            recipients = envelope.recipients().len(),
            "message sent"
        );
    }
    outcome
}
