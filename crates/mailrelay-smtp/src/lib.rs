//! # mailrelay-smtp
//!
//! The connection layer of an SMTP relay client: everything that happens
//! before a message is handed over.
//!
//! ## Features
//!
//! - **Address-family aware dialing**: resolve under an `auto`/`ipv4`/`ipv6`
//!   preference, then try each candidate in order with its own timeout
//! - **TLS policy**: implicit TLS (port 465) or STARTTLS (port 587), with
//!   optional minimum/maximum protocol versions
//! - **Runtime-checked session**: connect, greet, upgrade, authenticate,
//!   send and close, each valid only from its source state
//! - **Probe**: run the handshake without sending and classify failures
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailrelay_smtp::{
//!     Address, ConnectionConfig, Envelope, SystemResolver, TcpConnector, TlsMode, TlsPolicy,
//!     send_message,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> mailrelay_smtp::Result<()> {
//!     let config = ConnectionConfig::builder("smtp.example.com")
//!         .tls_mode(TlsMode::StartTls)
//!         .username("user@example.com")
//!         .password("app-password")
//!         .build()?;
//!     let tls = TlsPolicy::from_config(&config)?;
//!
//!     let envelope = Envelope::new(
//!         Address::new("user@example.com")?,
//!         vec![Address::new("recipient@example.com")?],
//!     )?;
//!     let message = b"Subject: Test\r\n\r\nHello, World!\r\n";
//!
//!     send_message(&config, &SystemResolver, &TcpConnector, &tls, &envelope, message).await
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Disconnected ── connect ──→ Connected ── greet ──→ GreetedPlain ── upgrade ──→ TlsEstablished
//!                                 │                      ↑    │                        │
//!                          (ssl)  └──→ TlsEstablished ───┘    └──── authenticate ──────┴──→ Authenticated
//!
//! any state ── close / failure ──→ Closed
//! ```
//!
//! ## Modules
//!
//! - [`config`]: connection configuration and its builder
//! - [`resolve`]: name resolution into ordered candidates
//! - [`connection`]: per-candidate connect and the buffered line stream
//! - [`tls`]: TLS policy and handshakes
//! - [`protocol`]: commands, replies and extensions
//! - [`session`]: the transport session state machine
//! - [`probe`]: the connectivity probe

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
pub mod config;
pub mod connection;
mod error;
pub mod probe;
pub mod protocol;
pub mod resolve;
mod send;
pub mod session;
pub mod tls;

pub use address::{Address, Envelope};
pub use config::{
    AddressFamily, ConnectionConfig, ConnectionConfigBuilder, DEFAULT_TIMEOUT, TlsMode, TlsVersion,
};
pub use connection::{Connect, TcpConnector};
pub use error::{Error, ErrorKind, Result};
pub use probe::{EXIT_FAILURE, EXIT_OK, Prober};
pub use resolve::{AddressCandidate, Family, Resolve, SystemResolver};
pub use send::send_message;
pub use session::{SessionState, TransportSession};
pub use tls::{Handshake, TlsPolicy};
