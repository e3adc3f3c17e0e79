//! Runtime-checked SMTP transport session.
//!
//! A [`TransportSession`] owns one relay connection from resolution to
//! teardown. Every operation checks the current [`SessionState`] first: a
//! call from the wrong state returns [`Error::InvalidState`] and leaves the
//! session untouched, while any network or protocol failure shuts the
//! session down and leaves it [`Closed`](SessionState::Closed).

use std::future::Future;
use std::time::Duration;

use base64::Engine;
use tracing::{debug, warn};

use crate::address::Envelope;
use crate::config::{AddressFamily, ConnectionConfig, TlsMode};
use crate::connection::{Connect, SmtpStream, establish};
use crate::error::{Error, Result};
use crate::protocol::{
    AuthMechanism, Channel, Command, Reply, ReplyCode, ServerInfo, encode_data,
};
use crate::resolve::{AddressCandidate, Resolve, resolve_candidates};
use crate::tls::Handshake;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing opened yet.
    Disconnected,
    /// Raw transport connected, no protocol bytes exchanged.
    Connected,
    /// Greeting exchanged.
    GreetedPlain,
    /// Channel secured, by implicit TLS or STARTTLS.
    TlsEstablished,
    /// Credentials accepted.
    Authenticated,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Check if transition is valid
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{
            Authenticated, Closed, Connected, Disconnected, GreetedPlain, TlsEstablished,
        };

        matches!(
            (self, next),
            (Disconnected, Connected)
                | (Connected, TlsEstablished | GreetedPlain)
                | (TlsEstablished | GreetedPlain, Authenticated)
                | (TlsEstablished, GreetedPlain)
                | (GreetedPlain, TlsEstablished)
                | (_, Closed)
        )
    }

    /// Transition to new state
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if `next` is not reachable from the
    /// current state.
    pub fn transition(&mut self, next: Self) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState(format!("cannot go from {self} to {next}")));
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::GreetedPlain => write!(f, "greeted_plain"),
            Self::TlsEstablished => write!(f, "tls_established"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// One relay connection and its handshake progress.
#[derive(Debug)]
pub struct TransportSession {
    state: SessionState,
    channel: Option<Channel>,
    server_info: Option<ServerInfo>,
    peer: Option<AddressCandidate>,
    host: String,
    port: u16,
    tls_mode: TlsMode,
    address_family: AddressFamily,
    helo_name: String,
    timeout: Duration,
}

impl TransportSession {
    /// Creates a disconnected session for `config`.
    #[must_use]
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            state: SessionState::Disconnected,
            channel: None,
            server_info: None,
            peer: None,
            host: config.host.clone(),
            port: config.port,
            tls_mode: config.tls_mode,
            address_family: config.address_family,
            helo_name: config.helo_name.clone(),
            timeout: config.connect_timeout,
        }
    }

    /// Connects, greets, and upgrades when the mode is `starttls`.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error; the session is closed by then.
    pub async fn open<R, C, H>(
        config: &ConnectionConfig,
        resolver: &R,
        connector: &C,
        tls: &H,
    ) -> Result<Self>
    where
        R: Resolve,
        C: Connect,
        H: Handshake,
    {
        let mut session = Self::new(config);
        session.connect(resolver, connector, tls).await?;
        session.greet().await?;
        if session.tls_mode == TlsMode::StartTls {
            session.upgrade(tls).await?;
        }
        Ok(session)
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true once the session can authenticate or send.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(
            self.state,
            SessionState::GreetedPlain
                | SessionState::TlsEstablished
                | SessionState::Authenticated
        ) && self.server_info.is_some()
    }

    /// Returns true if the channel is TLS-encrypted.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.channel.as_ref().is_some_and(Channel::is_secure)
    }

    /// Capabilities from the most recent greeting.
    #[must_use]
    pub const fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Candidate address the session connected to.
    #[must_use]
    pub const fn peer(&self) -> Option<AddressCandidate> {
        self.peer
    }

    /// Resolves the host, connects to the first reachable candidate and, in
    /// `ssl` mode, wraps the socket in TLS before any protocol bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless disconnected, otherwise
    /// [`Error::Resolution`], [`Error::Connection`] or [`Error::Tls`].
    pub async fn connect<R, C, H>(&mut self, resolver: &R, connector: &C, tls: &H) -> Result<()>
    where
        R: Resolve,
        C: Connect,
        H: Handshake,
    {
        self.require(&[SessionState::Disconnected], "connect")?;

        let resolved = resolve_candidates(
            resolver,
            &self.host,
            self.port,
            self.address_family,
            self.timeout,
        )
        .await;
        let candidates = match resolved {
            Ok(candidates) => candidates,
            Err(e) => return Err(self.abort(e).await),
        };

        let connected = establish(connector, &self.host, &candidates, self.timeout).await;
        let (peer, raw) = match connected {
            Ok(connected) => connected,
            Err(e) => return Err(self.abort(e).await),
        };
        self.peer = Some(peer);
        self.state.transition(SessionState::Connected)?;

        if self.tls_mode != TlsMode::Ssl {
            self.channel = Some(Channel::new(SmtpStream::plain(raw), self.timeout));
            return Ok(());
        }

        debug!(host = %self.host, "starting implicit TLS");
        let wrapped =
            handshake_bounded(self.timeout, tls.wrap_before_protocol(raw, &self.host)).await;
        match wrapped {
            Ok(stream) => {
                self.channel = Some(Channel::new(stream, self.timeout));
                self.state.transition(SessionState::TlsEstablished)
            }
            Err(e) => Err(self.abort(e).await),
        }
    }

    /// Reads the server banner and identifies with EHLO, falling back to
    /// HELO when EHLO is refused with a permanent error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if called out of order, otherwise the
    /// protocol failure that closed the session.
    pub async fn greet(&mut self) -> Result<()> {
        self.require(&[SessionState::Connected, SessionState::TlsEstablished], "greet")?;
        if self.server_info.is_some() {
            return Err(Error::InvalidState("session is already greeted".into()));
        }

        let greeted = self.exchange_greeting().await;
        match greeted {
            Ok(info) => {
                self.server_info = Some(info);
                self.state.transition(SessionState::GreetedPlain)
            }
            Err(e) => Err(self.abort(e).await),
        }
    }

    /// Upgrades the greeted plaintext channel with STARTTLS and greets again.
    ///
    /// Capabilities from the plaintext greeting are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless greeted in `starttls` mode,
    /// [`Error::Protocol`] if the server does not offer STARTTLS or refuses
    /// it, and [`Error::Tls`] if the handshake fails.
    pub async fn upgrade<H: Handshake>(&mut self, tls: &H) -> Result<()> {
        self.require(&[SessionState::GreetedPlain], "upgrade")?;
        if self.tls_mode != TlsMode::StartTls {
            return Err(Error::InvalidState(format!(
                "STARTTLS is not used in {} mode",
                self.tls_mode
            )));
        }

        let upgraded = self.starttls(tls).await;
        match upgraded {
            Ok(info) => {
                self.server_info = Some(info);
                Ok(())
            }
            Err(e) => Err(self.abort(e).await),
        }
    }

    /// Authenticates with PLAIN if advertised, otherwise LOGIN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if called out of order,
    /// [`Error::Protocol`] if the server offers neither mechanism, and
    /// [`Error::Auth`] if the credentials are rejected.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        self.require(
            &[SessionState::GreetedPlain, SessionState::TlsEstablished],
            "authenticate",
        )?;
        if self.server_info.is_none() {
            return Err(Error::InvalidState("authenticate before greeting".into()));
        }

        let outcome = self.login(username, password).await;
        match outcome {
            Ok(()) => self.state.transition(SessionState::Authenticated),
            Err(e) => Err(self.abort(e).await),
        }
    }

    /// Submits one message to the envelope's recipients.
    ///
    /// `message` is the RFC 5322 text; line endings are normalized and
    /// leading dots stuffed on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless ready, otherwise the protocol
    /// failure that closed the session.
    pub async fn send(&mut self, envelope: &Envelope, message: &[u8]) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::InvalidState(format!(
                "cannot send from {} state",
                self.state
            )));
        }

        let outcome = self.transfer(envelope, message).await;
        match outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(self.abort(e).await),
        }
    }

    /// Ends the session: QUIT, then shutdown, then the socket is dropped.
    ///
    /// Never fails and may be called from any state, repeatedly.
    pub async fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            match channel.command(&Command::Quit).await {
                Ok(reply) => debug!(code = %reply.code, "QUIT answered"),
                Err(e) => debug!(error = %e, "QUIT failed"),
            }
            if let Err(e) = channel.shutdown().await {
                debug!(error = %e, "shutdown failed");
            }
        }
        self.server_info = None;
        self.state = SessionState::Closed;
    }

    fn require(&self, allowed: &[SessionState], op: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "{op} is not valid in {} state",
                self.state
            )))
        }
    }

    fn channel(&mut self) -> Result<&mut Channel> {
        self.channel
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no open channel".into()))
    }

    async fn abort(&mut self, err: Error) -> Error {
        debug!(state = %self.state, error = %err, "closing session after failure");
        self.close().await;
        err
    }

    async fn exchange_greeting(&mut self) -> Result<ServerInfo> {
        let banner = self.channel()?.read_reply().await?;
        if banner.code != ReplyCode::SERVICE_READY {
            return Err(banner.into_error());
        }
        debug!(banner = %banner.message_text(), "server ready");
        self.identify().await
    }

    async fn identify(&mut self) -> Result<ServerInfo> {
        let hostname = self.helo_name.clone();
        let channel = self.channel()?;

        let reply = channel
            .command(&Command::Ehlo {
                hostname: hostname.clone(),
            })
            .await?;
        if reply.is_success() {
            return Ok(ServerInfo::from_ehlo(server_name(&reply), &reply));
        }
        if !reply.code.is_permanent() {
            return Err(reply.into_error());
        }

        debug!(code = %reply.code, "EHLO refused, falling back to HELO");
        let reply = channel.command(&Command::Helo { hostname }).await?;
        if !reply.is_success() {
            return Err(reply.into_error());
        }
        Ok(ServerInfo {
            hostname: server_name(&reply),
            legacy_helo: true,
            ..ServerInfo::default()
        })
    }

    async fn starttls<H: Handshake>(&mut self, tls: &H) -> Result<ServerInfo> {
        let advertised = self
            .server_info
            .as_ref()
            .is_some_and(ServerInfo::supports_starttls);
        if !advertised {
            return Err(Error::Protocol("server does not advertise STARTTLS".into()));
        }

        let reply = self.channel()?.command(&Command::StartTls).await?;
        if reply.code != ReplyCode::SERVICE_READY {
            return Err(reply.into_error());
        }

        let channel = self
            .channel
            .take()
            .ok_or_else(|| Error::InvalidState("no open channel".into()))?;
        self.server_info = None;

        debug!(host = %self.host, "upgrading with STARTTLS");
        let stream = handshake_bounded(
            self.timeout,
            tls.upgrade_in_place(channel.into_stream(), &self.host),
        )
        .await?;
        self.channel = Some(Channel::new(stream, self.timeout));
        self.state.transition(SessionState::TlsEstablished)?;

        self.identify().await
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let mechanism = self.select_mechanism()?;
        if !self.is_secure() {
            warn!(host = %self.host, "sending credentials over an unencrypted channel");
        }
        debug!(mechanism = mechanism.as_str(), "authenticating");
        let channel = self.channel()?;

        let reply = match mechanism {
            AuthMechanism::Plain => {
                let payload = encode(&format!("\0{username}\0{password}"));
                let reply = channel
                    .command(&Command::Auth {
                        mechanism,
                        initial_response: Some(payload.clone()),
                    })
                    .await?;
                // Servers without SASL-IR ask for the response separately.
                if reply.code == ReplyCode::AUTH_CONTINUE {
                    channel.command(&Command::AuthResponse(payload)).await?
                } else {
                    reply
                }
            }
            _ => {
                let reply = channel
                    .command(&Command::Auth {
                        mechanism: AuthMechanism::Login,
                        initial_response: None,
                    })
                    .await?;
                expect_challenge(reply)?;
                let reply = channel
                    .command(&Command::AuthResponse(encode(username)))
                    .await?;
                expect_challenge(reply)?;
                channel
                    .command(&Command::AuthResponse(encode(password)))
                    .await?
            }
        };

        if reply.is_success() {
            debug!("authenticated");
            return Ok(());
        }
        if reply.code.is_permanent() || reply.code.is_transient() {
            return Err(Error::Auth {
                code: reply.code.as_u16(),
                message: reply.message_text(),
            });
        }
        Err(reply.into_error())
    }

    fn select_mechanism(&self) -> Result<AuthMechanism> {
        let info = self
            .server_info
            .as_ref()
            .ok_or_else(|| Error::InvalidState("authenticate before greeting".into()))?;
        if !info.advertises_auth() {
            return Err(Error::Protocol("server does not advertise AUTH".into()));
        }

        let offered = info.auth_mechanisms();
        [AuthMechanism::Plain, AuthMechanism::Login]
            .into_iter()
            .find(|m| offered.contains(m))
            .ok_or_else(|| {
                let names: Vec<&str> = offered.iter().map(|m| m.as_str()).collect();
                Error::Protocol(format!(
                    "no supported AUTH mechanism (server offers: {})",
                    if names.is_empty() { "none".to_string() } else { names.join(" ") }
                ))
            })
    }

    async fn transfer(&mut self, envelope: &Envelope, message: &[u8]) -> Result<()> {
        let data = encode_data(message);
        if let Some(limit) = self.server_info.as_ref().and_then(ServerInfo::max_message_size)
            && limit > 0
            && data.len() > limit
        {
            return Err(Error::Protocol(format!(
                "message is {} bytes, server limit is {limit}",
                data.len()
            )));
        }

        let channel = self.channel()?;
        expect_success(
            channel
                .command(&Command::MailFrom {
                    from: envelope.from().clone(),
                })
                .await?,
        )?;
        for rcpt in envelope.recipients() {
            expect_success(channel.command(&Command::RcptTo { to: rcpt.clone() }).await?)?;
        }

        let reply = channel.command(&Command::Data).await?;
        if reply.code != ReplyCode::START_DATA {
            return Err(reply.into_error());
        }
        channel.write_raw(&data).await?;
        expect_success(channel.read_reply().await?)?;

        debug!(
            recipients = envelope.recipients().len(),
            bytes = data.len(),
            "message accepted"
        );
        Ok(())
    }
}

/// Bounds a TLS handshake; expiry is a TLS failure.
async fn handshake_bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut).await.map_err(|_| {
        Error::Tls(format!(
            "TLS handshake timed out after {}s",
            timeout.as_secs_f64()
        ))
    })?
}

fn server_name(reply: &Reply) -> String {
    reply
        .message
        .first()
        .and_then(|line| line.split_whitespace().next())
        .unwrap_or("unknown")
        .to_string()
}

fn encode(value: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

fn expect_success(reply: Reply) -> Result<()> {
    if reply.is_success() {
        Ok(())
    } else {
        Err(reply.into_error())
    }
}

fn expect_challenge(reply: Reply) -> Result<()> {
    match reply.code {
        ReplyCode::AUTH_CONTINUE => Ok(()),
        code if code.is_permanent() || code.is_transient() => Err(Error::Auth {
            code: code.as_u16(),
            message: reply.message_text(),
        }),
        _ => Err(reply.into_error()),
    }
}
