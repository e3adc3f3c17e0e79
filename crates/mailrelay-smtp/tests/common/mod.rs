//! Shared fixtures: a scripted in-process SMTP relay and injectable
//! resolver / TLS doubles.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use mailrelay_smtp::connection::BoxedStream;
use mailrelay_smtp::{Error, Handshake, Resolve, Result};

/// Resolves every host to a fixed list of addresses.
pub struct StaticResolver(pub Vec<SocketAddr>);

impl Resolve for StaticResolver {
    async fn lookup(&self, _host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(self.0.clone())
    }
}

/// Records the server names it was asked to verify and passes the stream
/// through untouched.
#[derive(Clone, Default)]
pub struct RecordingTls {
    pub hosts: Arc<Mutex<Vec<String>>>,
}

impl RecordingTls {
    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().unwrap().clone()
    }
}

impl Handshake for RecordingTls {
    async fn handshake(&self, stream: BoxedStream, host: &str) -> Result<BoxedStream> {
        self.hosts.lock().unwrap().push(host.to_string());
        Ok(stream)
    }
}

/// Fails every handshake as a certificate error.
pub struct FailingTls;

impl Handshake for FailingTls {
    async fn handshake(&self, _stream: BoxedStream, host: &str) -> Result<BoxedStream> {
        Err(Error::Tls(format!(
            "invalid peer certificate: certificate not valid for name {host:?}"
        )))
    }
}

/// How the relay behaves after accepting.
#[derive(Clone, Copy)]
pub enum Behavior {
    /// ESMTP with STARTTLS and AUTH PLAIN LOGIN.
    Esmtp,
    /// Writes a banner and never reads; a TLS client sees garbage.
    PlaintextOnly,
}

/// One-connection scripted relay on a loopback port.
pub struct ScriptedRelay {
    pub addr: SocketAddr,
    handle: JoinHandle<Vec<String>>,
}

impl ScriptedRelay {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            match behavior {
                Behavior::Esmtp => serve_esmtp(socket).await,
                Behavior::PlaintextOnly => {
                    let (read, mut write) = socket.into_split();
                    let _ = write.write_all(b"220 relay.test ESMTP\r\n").await;
                    let mut lines = BufReader::new(read).lines();
                    while let Ok(Some(_)) = lines.next_line().await {}
                    Vec::new()
                }
            }
        });
        Self { addr, handle }
    }

    /// Every command and data line the relay received, in order.
    pub async fn transcript(self) -> Vec<String> {
        self.handle.await.unwrap()
    }
}

async fn serve_esmtp(socket: tokio::net::TcpStream) -> Vec<String> {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut received = Vec::new();
    write.write_all(b"220 relay.test ESMTP\r\n").await.unwrap();

    let mut in_data = false;
    while let Ok(Some(line)) = lines.next_line().await {
        received.push(line.clone());
        if in_data {
            if line == "." {
                in_data = false;
                write.write_all(b"250 2.0.0 queued\r\n").await.unwrap();
            }
            continue;
        }

        let reply: &[u8] = match line.split_whitespace().next().unwrap_or("") {
            "EHLO" => b"250-relay.test\r\n250-STARTTLS\r\n250-SIZE 1048576\r\n250 AUTH PLAIN LOGIN\r\n",
            "STARTTLS" => b"220 2.0.0 ready to start TLS\r\n",
            "AUTH" if line == "AUTH PLAIN AHUAcA==" => b"235 2.7.0 accepted\r\n",
            "AUTH" => b"535 5.7.8 bad credentials\r\n",
            "MAIL" | "RCPT" => b"250 2.1.0 ok\r\n",
            "DATA" => {
                in_data = true;
                b"354 end with <CRLF>.<CRLF>\r\n"
            }
            "QUIT" => b"221 2.0.0 bye\r\n",
            _ => b"502 5.5.2 unrecognized\r\n",
        };
        write.write_all(reply).await.unwrap();
        if line == "QUIT" {
            break;
        }
    }
    received
}
