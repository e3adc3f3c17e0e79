//! Ordered, per-candidate connection attempts.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use super::stream::{AsyncStream, BoxedStream};
use crate::error::{Error, Result};
use crate::resolve::AddressCandidate;

/// Connection factory capability.
///
/// The session never opens sockets itself; it asks a `Connect`
/// implementation for a raw stream to each candidate address.
pub trait Connect {
    /// Stream type produced by this factory.
    type Stream: AsyncStream + 'static;

    /// Opens a raw connection to `addr`.
    fn connect(&self, addr: SocketAddr) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// TCP connection factory.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connect for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Connects to the first reachable candidate, in order.
///
/// Each attempt gets the full `timeout`; there is no shared budget. Once a
/// connection succeeds the remaining candidates are not tried.
///
/// # Errors
///
/// Returns [`Error::Resolution`] when `candidates` is empty, otherwise
/// [`Error::Connection`] carrying the last candidate's failure.
pub async fn establish<C: Connect>(
    connector: &C,
    host: &str,
    candidates: &[AddressCandidate],
    timeout: Duration,
) -> Result<(AddressCandidate, BoxedStream)> {
    let mut last_error = None;

    for candidate in candidates {
        debug!(addr = %candidate.addr, "connecting");
        let outcome = match tokio::time::timeout(timeout, connector.connect(candidate.addr)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect timed out after {}s", timeout.as_secs_f64()),
            )),
        };
        match outcome {
            Ok(stream) => {
                debug!(addr = %candidate.addr, "connected");
                let stream: BoxedStream = Box::new(stream);
                return Ok((*candidate, stream));
            }
            Err(e) => {
                debug!(addr = %candidate.addr, error = %e, "candidate failed");
                last_error = Some((candidate.addr, e));
            }
        }
    }

    match last_error {
        Some((addr, source)) => Err(Error::Connection { addr, source }),
        None => Err(Error::Resolution {
            host: host.to_string(),
            reason: "no candidate addresses".into(),
        }),
    }
}
