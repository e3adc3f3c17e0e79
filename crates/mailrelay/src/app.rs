//! Mode dispatch for one invocation.

use std::io::{Read, Write};

use anyhow::{Context, bail};
use mailrelay_smtp::{
    EXIT_FAILURE, EXIT_OK, Prober, SystemResolver, TcpConnector, TlsPolicy, probe, send_message,
};
use tracing::debug;

use crate::cli::{Cli, Mode};
use crate::message::OutgoingMessage;
use crate::settings::{CONFIG_TEMPLATE, Env, Purpose, Settings, header_text};

/// Runs the selected mode and returns the process exit status.
///
/// Relay failures are reported on `err` with troubleshooting hints and
/// yield [`EXIT_FAILURE`]; invalid input is returned as an error.
///
/// # Errors
///
/// Returns an error for invalid settings, a missing subject or body, an
/// unreadable body file, or failed writes to `out`/`err`.
pub async fn run(
    cli: &Cli,
    env: Env<'_>,
    stdin: &mut impl Read,
    out: &mut impl Write,
    err: &mut impl Write,
) -> anyhow::Result<u8> {
    match cli.mode() {
        Mode::Template => {
            out.write_all(CONFIG_TEMPLATE.as_bytes())?;
            Ok(EXIT_OK)
        }
        Mode::CheckConfig => {
            let settings = Settings::resolve(cli, env, Purpose::Send)?;
            out.write_all(settings.render_check().as_bytes())?;
            Ok(EXIT_OK)
        }
        Mode::Probe => {
            let settings = Settings::resolve(cli, env, Purpose::Probe)?;
            let config = &settings.connection;
            let tls = match TlsPolicy::from_config(config) {
                Ok(tls) => tls,
                Err(e) => {
                    probe::report_failure(err, "probe", &e, config)?;
                    return Ok(EXIT_FAILURE);
                }
            };
            let code = Prober::new(cli.probe_auth)
                .run(config, &SystemResolver, &TcpConnector, &tls, out, err)
                .await?;
            Ok(code)
        }
        Mode::Send => send(cli, env, stdin, out, err).await,
    }
}

async fn send(
    cli: &Cli,
    env: Env<'_>,
    stdin: &mut impl Read,
    out: &mut impl Write,
    err: &mut impl Write,
) -> anyhow::Result<u8> {
    let settings = Settings::resolve(cli, env, Purpose::Send)?;

    let Some(subject) = cli.subject.clone().filter(|s| !s.is_empty()) else {
        bail!("--subject is required");
    };
    let subject = header_text("--subject", subject)?;
    let text = read_body(cli, stdin)?;
    let envelope = settings.envelope()?;

    let message = OutgoingMessage {
        from: envelope.from().clone(),
        from_name: settings.from_name.clone(),
        to: settings.to.clone(),
        cc: settings.cc.clone(),
        subject,
        text,
        html: cli.html.clone(),
    }
    .to_rfc5322();

    if cli.dry_run {
        writeln!(out, "{}", message.replace("\r\n", "\n"))?;
        return Ok(EXIT_OK);
    }

    let config = &settings.connection;
    let outcome = match TlsPolicy::from_config(config) {
        Ok(tls) => {
            send_message(
                config,
                &SystemResolver,
                &TcpConnector,
                &tls,
                &envelope,
                message.as_bytes(),
            )
            .await
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => Ok(EXIT_OK),
        Err(e) => {
            debug!(error = ?e, "send failed");
            probe::report_failure(err, "send", &e, config)?;
            Ok(EXIT_FAILURE)
        }
    }
}

/// Body from `--body`, `--body-file` or `--body-stdin`, in that order.
fn read_body(cli: &Cli, stdin: &mut impl Read) -> anyhow::Result<String> {
    if let Some(body) = &cli.body {
        return Ok(body.clone());
    }
    if let Some(path) = &cli.body_file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("failed to read body file {}", path.display()));
    }
    if cli.body_stdin {
        let mut body = String::new();
        stdin
            .read_to_string(&mut body)
            .context("failed to read body from stdin")?;
        return Ok(body);
    }
    bail!("Body is required (use --body / --body-file / --body-stdin)")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("mailrelay").chain(args.iter().copied()))
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    async fn invoke(cli: &Cli, env: Env<'_>, stdin: &[u8]) -> (anyhow::Result<u8>, String, String) {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let mut stdin = stdin;
        let code = run(cli, env, &mut stdin, &mut out, &mut err).await;
        (
            code,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[tokio::test]
    async fn template_mode_prints_template() {
        let (code, out, _) = invoke(&cli(&["--print-config-template"]), &env_from(&[]), b"").await;
        assert_eq!(code.unwrap(), EXIT_OK);
        assert_eq!(out, CONFIG_TEMPLATE);
    }

    #[tokio::test]
    async fn check_config_reports_settings() {
        let env = env_from(&[
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_TLS", "ssl"),
            ("EMAIL_FROM", "bot@example.com"),
            ("EMAIL_TO", "a@example.com"),
        ]);
        let (code, out, _) = invoke(&cli(&["--check-config"]), &env, b"").await;
        assert_eq!(code.unwrap(), EXIT_OK);
        assert!(out.starts_with("OK\nsmtp_host=smtp.example.com\nsmtp_port=465\nsmtp_tls=ssl\n"));
        assert!(out.ends_with("from=bot@example.com\nto=a@example.com\n"));
    }

    #[tokio::test]
    async fn check_config_rejects_missing_host() {
        let (code, out, _) = invoke(&cli(&["--check-config"]), &env_from(&[]), b"").await;
        assert!(code.unwrap_err().to_string().contains("--smtp-host is required"));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn dry_run_prints_message_from_stdin_body() {
        let env = env_from(&[("SMTP_HOST", "smtp.example.com")]);
        let args = cli(&[
            "--from",
            "bot@example.com",
            "--from-name",
            "Build Bot",
            "--to",
            "a@example.com",
            "--bcc",
            "hidden@example.com",
            "--subject",
            "Nightly",
            "--body-stdin",
            "--dry-run",
        ]);
        let (code, out, err) = invoke(&args, &env, b"all green\n").await;

        assert_eq!(code.unwrap(), EXIT_OK);
        assert!(err.is_empty());
        assert!(out.starts_with("From: Build Bot <bot@example.com>\nTo: a@example.com\n"));
        assert!(out.contains("Subject: Nightly\n"));
        assert!(out.ends_with("all green\n\n"));
        assert!(!out.contains("hidden@example.com"));
        assert!(!out.contains('\r'));
    }

    #[tokio::test]
    async fn send_requires_subject_and_body() {
        let env = env_from(&[
            ("SMTP_HOST", "h"),
            ("EMAIL_FROM", "a@example.com"),
            ("EMAIL_TO", "b@example.com"),
        ]);
        let (code, _, _) = invoke(&cli(&["--body", "x"]), &env, b"").await;
        assert!(code.unwrap_err().to_string().contains("--subject is required"));

        let (code, _, _) = invoke(&cli(&["--subject", "s"]), &env, b"").await;
        assert!(code.unwrap_err().to_string().contains("Body is required"));
    }

    #[tokio::test]
    async fn subject_with_line_break_is_rejected() {
        let env = env_from(&[
            ("SMTP_HOST", "h"),
            ("EMAIL_FROM", "a@example.com"),
            ("EMAIL_TO", "b@example.com"),
        ]);
        let args = cli(&[
            "--subject",
            "hi\r\nBcc: evil@example.net",
            "--body",
            "x",
            "--dry-run",
        ]);
        let (code, out, _) = invoke(&args, &env, b"").await;

        let err = code.unwrap_err();
        assert!(err.to_string().contains("--subject must not contain line breaks"), "{err}");
        assert!(out.is_empty());
    }

    /// Plaintext relay on loopback; returns the port and every received line.
    async fn plaintext_relay() -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            write.write_all(b"220 relay ESMTP\r\n").await.unwrap();
            let mut received = Vec::new();
            let mut in_data = false;
            while let Ok(Some(line)) = lines.next_line().await {
                received.push(line.clone());
                let reply: &[u8] = if in_data {
                    if line != "." {
                        continue;
                    }
                    in_data = false;
                    b"250 queued\r\n"
                } else {
                    match line.split_whitespace().next().unwrap_or("") {
                        "EHLO" => b"250-relay\r\n250 8BITMIME\r\n",
                        "MAIL" | "RCPT" => b"250 ok\r\n",
                        "DATA" => {
                            in_data = true;
                            b"354 go ahead\r\n"
                        }
                        "QUIT" => b"221 bye\r\n",
                        _ => b"500 unrecognized\r\n",
                    }
                };
                write.write_all(reply).await.unwrap();
                if line == "QUIT" {
                    break;
                }
            }
            received
        });
        (port, handle)
    }

    #[tokio::test]
    async fn send_delivers_to_every_recipient() {
        let (port, relay) = plaintext_relay().await;
        let port = port.to_string();
        let args = cli(&[
            "--smtp-host",
            "127.0.0.1",
            "--smtp-port",
            &port,
            "--smtp-tls",
            "none",
            "--address-family",
            "ipv4",
            "--from",
            "bot@example.com",
            "--to",
            "a@example.com",
            "--cc",
            "c@example.com",
            "--bcc",
            "d@example.com",
            "--subject",
            "Nightly",
            "--body",
            "all green",
        ]);
        let (code, out, err) = invoke(&args, &env_from(&[]), b"").await;

        assert_eq!(code.unwrap(), EXIT_OK, "{err}");
        assert!(out.is_empty());

        let received = relay.await.unwrap();
        assert_eq!(received[0], "EHLO localhost");
        assert_eq!(received[1], "MAIL FROM:<bot@example.com>");
        assert_eq!(
            &received[2..5],
            ["RCPT TO:<a@example.com>", "RCPT TO:<c@example.com>", "RCPT TO:<d@example.com>"]
        );
        assert_eq!(received[5], "DATA");
        assert!(received.contains(&"Subject: Nightly".to_string()));
        assert!(!received.iter().any(|l| l.starts_with("Bcc")));
        assert_eq!(received.last().map(String::as_str), Some("QUIT"));
    }

    #[tokio::test]
    async fn send_failure_is_reported_with_hints() {
        // Bind and drop so nothing listens on the port.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port().to_string()
        };
        let args = cli(&[
            "--smtp-host",
            "127.0.0.1",
            "--smtp-port",
            &port,
            "--smtp-tls",
            "none",
            "--from",
            "bot@example.com",
            "--to",
            "a@example.com",
            "--subject",
            "s",
            "--body",
            "b",
        ]);
        let (code, _, err) = invoke(&args, &env_from(&[]), b"").await;

        assert_eq!(code.unwrap(), EXIT_FAILURE);
        assert!(err.starts_with("send=failed connection_error: "), "{err}");
        assert!(err.contains("Troubleshooting hints:"));
    }
}
