//! Resolves flags and environment variables into validated settings.

use std::fmt::Write as _;
use std::time::Duration;

use mailrelay_smtp::{
    Address, AddressFamily, ConnectionConfig, Envelope, Error, Result, TlsMode, TlsVersion,
};

use crate::cli::Cli;

/// Environment lookup; `std::env::var(..).ok()` in production.
pub type Env<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Env var template printed by `--print-config-template`.
pub const CONFIG_TEMPLATE: &str = r#"# SMTP / mail env template (fill in and export)
export SMTP_HOST="smtp.example.com"
export SMTP_TLS="starttls"  # starttls | ssl | none
export SMTP_PORT="587"      # optional; defaults based on SMTP_TLS
export SMTP_ADDRESS_FAMILY="auto"  # auto | ipv4 | ipv6 (try ipv4 if your IPv6 path is broken)
export SMTP_TLS_MIN_VERSION=""     # optional, e.g. "1.2" to avoid broken TLS1.3 paths
export SMTP_TLS_MAX_VERSION=""     # optional, e.g. "1.2" to pin TLS1.2
export SMTP_HELO_NAME=""           # optional; defaults to "localhost"

# Optional auth (many providers require an app password / auth code)
export SMTP_USERNAME="user@example.com"
export SMTP_PASSWORD="<app-password-or-auth-code>"

# Message defaults
export EMAIL_FROM="user@example.com"
export EMAIL_TO="recipient@example.com,other@example.com"
"#;

/// How strictly to validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Connection settings only; a username may come without a password.
    Probe,
    /// Everything needed to send.
    Send,
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Relay connection.
    pub connection: ConnectionConfig,
    /// Envelope sender; always set for [`Purpose::Send`].
    pub from: Option<Address>,
    /// Display name for the From header.
    pub from_name: Option<String>,
    /// Primary recipients.
    pub to: Vec<Address>,
    /// Carbon-copy recipients.
    pub cc: Vec<Address>,
    /// Blind-copy recipients, envelope only.
    pub bcc: Vec<Address>,
}

impl Settings {
    /// Resolves settings from `cli`, falling back to `env`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for missing or malformed settings and
    /// [`Error::InvalidAddress`] for a bad address.
    pub fn resolve(cli: &Cli, env: Env<'_>, purpose: Purpose) -> Result<Self> {
        let host = pick(cli.smtp_host.as_deref(), env, &["SMTP_HOST", "MAIL_HOST"])
            .ok_or_else(|| Error::Config("--smtp-host is required (or env SMTP_HOST)".into()))?;

        let tls_mode: TlsMode = pick(cli.smtp_tls.as_deref(), env, &["SMTP_TLS", "MAIL_TLS"])
            .map_or(Ok(TlsMode::default()), |s| s.parse())?;

        let address_family: AddressFamily = pick(
            cli.address_family.as_deref(),
            env,
            &["SMTP_ADDRESS_FAMILY", "MAIL_ADDRESS_FAMILY"],
        )
        .map_or(Ok(AddressFamily::default()), |s| s.parse())?;

        let tls_min_version = TlsVersion::parse_optional(
            pick(
                cli.tls_min_version.as_deref(),
                env,
                &["SMTP_TLS_MIN_VERSION", "MAIL_TLS_MIN_VERSION"],
            )
            .as_deref(),
        )?;
        let tls_max_version = TlsVersion::parse_optional(
            pick(
                cli.tls_max_version.as_deref(),
                env,
                &["SMTP_TLS_MAX_VERSION", "MAIL_TLS_MAX_VERSION"],
            )
            .as_deref(),
        )?;

        let timeout = Duration::try_from_secs_f64(cli.timeout)
            .map_err(|_| Error::Config(format!("invalid --timeout {}", cli.timeout)))?;

        let mut builder = ConnectionConfig::builder(host)
            .tls_mode(tls_mode)
            .address_family(address_family)
            .tls_min_version(tls_min_version)
            .tls_max_version(tls_max_version)
            .connect_timeout(timeout);

        if let Some(port) = pick(cli.smtp_port.as_deref(), env, &["SMTP_PORT", "MAIL_PORT"]) {
            let port = port.parse::<u16>().map_err(|_| {
                Error::Config(format!("--smtp-port must be an integer, got '{port}'"))
            })?;
            builder = builder.port(port);
        }
        if let Some(name) = pick(cli.helo_name.as_deref(), env, &["SMTP_HELO_NAME"]) {
            builder = builder.helo_name(name);
        }

        let username = pick(
            cli.smtp_username.as_deref(),
            env,
            &["SMTP_USERNAME", "MAIL_USERNAME"],
        );
        if let Some(username) = &username {
            builder = builder.username(username.clone());
        }
        if let Some(password) = pick(
            cli.smtp_password.as_deref(),
            env,
            &["SMTP_PASSWORD", "MAIL_PASSWORD"],
        ) {
            builder = builder.password(password);
        }

        let connection = match purpose {
            Purpose::Probe => builder.build_for_probe()?,
            Purpose::Send => builder.build().map_err(|e| match e {
                Error::Config(msg) if username.is_some() && msg.contains("password") => {
                    Error::Config(
                        "--smtp-password is required when --smtp-username is set (or env SMTP_PASSWORD)"
                            .into(),
                    )
                }
                other => other,
            })?,
        };

        let from_name = pick(
            cli.from_name.as_deref(),
            env,
            &["EMAIL_FROM_NAME", "MAIL_FROM_NAME"],
        )
        .map(|name| header_text("--from-name", name))
        .transpose()?;

        if purpose == Purpose::Probe {
            return Ok(Self {
                connection,
                from: None,
                from_name,
                to: Vec::new(),
                cc: Vec::new(),
                bcc: Vec::new(),
            });
        }

        let from = pick(
            cli.from_addr.as_deref(),
            env,
            &["EMAIL_FROM", "MAIL_FROM", "MAIL_USERNAME", "SMTP_USERNAME"],
        )
        .ok_or_else(|| {
            Error::Config(
                "--from is required (or env EMAIL_FROM), example: \"no-reply@example.com\"".into(),
            )
        })?;
        let to = pick(cli.to.as_deref(), env, &["EMAIL_TO", "MAIL_TO"]).ok_or_else(|| {
            Error::Config(
                "--to is required (or env EMAIL_TO), example: \"a@example.com,b@example.com\""
                    .into(),
            )
        })?;

        let to = split_recipients(&to)?;
        if to.is_empty() {
            return Err(Error::Config(
                "--to must contain at least one recipient".into(),
            ));
        }

        Ok(Self {
            connection,
            from: Some(from.parse()?),
            from_name,
            to,
            cc: split_recipients(cli.cc.as_deref().unwrap_or(""))?,
            bcc: split_recipients(cli.bcc.as_deref().unwrap_or(""))?,
        })
    }

    /// Envelope over To, Cc and Bcc.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if there is no sender or no
    /// recipient.
    pub fn envelope(&self) -> Result<Envelope> {
        let from = self
            .from
            .clone()
            .ok_or_else(|| Error::InvalidAddress("no sender specified".into()))?;
        let recipients = self
            .to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .cloned()
            .collect();
        Envelope::new(from, recipients)
    }

    /// The `--check-config` report, secrets masked.
    #[must_use]
    pub fn render_check(&self) -> String {
        let c = &self.connection;
        let set = |v: Option<&String>| if v.is_some() { "<set>" } else { "<not set>" };
        let version = |v: Option<TlsVersion>| v.map_or("<default>", TlsVersion::as_str);

        let mut out = String::from("OK\n");
        let _ = writeln!(out, "smtp_host={}", c.host);
        let _ = writeln!(out, "smtp_port={}", c.port);
        let _ = writeln!(out, "smtp_tls={}", c.tls_mode);
        let _ = writeln!(out, "smtp_username={}", set(c.username.as_ref()));
        let _ = writeln!(out, "smtp_password={}", set(c.password.as_ref()));
        let _ = writeln!(out, "address_family={}", c.address_family);
        let _ = writeln!(out, "tls_min_version={}", version(c.tls_min_version));
        let _ = writeln!(out, "tls_max_version={}", version(c.tls_max_version));
        let _ = writeln!(
            out,
            "from={}",
            self.from.as_ref().map_or("", Address::as_str)
        );
        let _ = writeln!(out, "to={}", join(&self.to));
        out
    }
}

/// First non-empty value: the flag, then each env var in order.
fn pick(flag: Option<&str>, env: Env<'_>, names: &[&str]) -> Option<String> {
    flag.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| env_any(env, names))
}

/// First set, non-blank env var among `names`, trimmed.
pub fn env_any(env: Env<'_>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        env(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Accepts a header value only if it fits on one line.
///
/// # Errors
///
/// Returns [`Error::Config`] if `value` contains CR or LF.
pub fn header_text(flag: &str, value: String) -> Result<String> {
    if value.contains(['\r', '\n']) {
        return Err(Error::Config(format!(
            "{flag} must not contain line breaks"
        )));
    }
    Ok(value)
}

/// Splits on commas and semicolons, dropping blanks.
///
/// # Errors
///
/// Returns [`Error::InvalidAddress`] for the first malformed entry.
pub fn split_recipients(value: &str) -> Result<Vec<Address>> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Address::new)
        .collect()
}

/// Joins addresses with commas.
#[must_use]
pub fn join(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(Address::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::Parser;
    use mailrelay_smtp::ErrorKind;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("mailrelay").chain(args.iter().copied()))
    }

    #[test]
    fn env_fallback_order() {
        let env = env_from(&[
            ("SMTP_HOST", "  "),
            ("MAIL_HOST", "mail.example.com"),
            ("MAIL_USERNAME", "me@example.com"),
            ("MAIL_PASSWORD", "secret"),
            ("EMAIL_TO", "a@example.com; b@example.com,"),
        ]);
        let settings = Settings::resolve(&cli(&[]), &env, Purpose::Send).unwrap();

        assert_eq!(settings.connection.host, "mail.example.com");
        assert_eq!(settings.connection.port, 587);
        assert_eq!(settings.connection.tls_mode, TlsMode::StartTls);
        // From falls back to the username.
        assert_eq!(settings.from.unwrap().as_str(), "me@example.com");
        assert_eq!(join(&settings.to), "a@example.com,b@example.com");
    }

    #[test]
    fn flags_override_env() {
        let env = env_from(&[("SMTP_HOST", "env.example.com"), ("SMTP_TLS", "none")]);
        let settings = Settings::resolve(
            &cli(&["--smtp-host", "flag.example.com", "--smtp-tls", "ssl"]),
            &env,
            Purpose::Probe,
        )
        .unwrap();
        assert_eq!(settings.connection.host, "flag.example.com");
        assert_eq!(settings.connection.tls_mode, TlsMode::Ssl);
        assert_eq!(settings.connection.port, 465);
    }

    #[test]
    fn missing_host_is_config_error() {
        let err = Settings::resolve(&cli(&[]), &env_from(&[]), Purpose::Probe).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("--smtp-host"));
    }

    #[test]
    fn send_requires_password_with_username() {
        let args = cli(&[
            "--smtp-host",
            "smtp.example.com",
            "--smtp-username",
            "u",
            "--from",
            "a@example.com",
            "--to",
            "b@example.com",
        ]);
        let env = env_from(&[]);
        let err = Settings::resolve(&args, &env, Purpose::Send).unwrap_err();
        assert!(err.to_string().contains("--smtp-password is required"));

        let probe = Settings::resolve(&args, &env, Purpose::Probe).unwrap();
        assert_eq!(probe.connection.probe_credentials(), Some(("u", "")));
    }

    #[test]
    fn send_requires_recipients() {
        let env = env_from(&[("SMTP_HOST", "h"), ("EMAIL_FROM", "a@example.com")]);
        let err = Settings::resolve(&cli(&[]), &env, Purpose::Send).unwrap_err();
        assert!(err.to_string().contains("--to is required"));

        let err = Settings::resolve(&cli(&["--to", " ; , "]), &env, Purpose::Send).unwrap_err();
        assert!(err.to_string().contains("at least one recipient"));

        let err = Settings::resolve(&cli(&["--to", "not-an-address"]), &env, Purpose::Send)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAddress);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let env = env_from(&[("SMTP_HOST", "h")]);
        let cases: [&[&str]; 7] = [
            &["--smtp-port", "abc"],
            &["--smtp-port", "0"],
            &["--smtp-tls", "tls"],
            &["--address-family", "ipx"],
            &["--tls-min-version", "1.3", "--tls-max-version", "1.2"],
            &["--timeout", "0"],
            &["--timeout=-1"],
        ];
        for args in cases {
            let err = Settings::resolve(&cli(args), &env, Purpose::Probe).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "{args:?}");
        }
    }

    #[test]
    fn from_name_with_line_break_is_rejected() {
        let env = env_from(&[
            ("SMTP_HOST", "h"),
            ("EMAIL_FROM", "a@example.com"),
            ("EMAIL_TO", "b@example.com"),
            ("EMAIL_FROM_NAME", "Bot\r\nX-Injected: 1"),
        ]);
        let err = Settings::resolve(&cli(&[]), &env, Purpose::Send).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("--from-name must not contain line breaks"));

        let err = Settings::resolve(&cli(&["--from-name", "Bot\nBcc: x@example.net"]), &env, Purpose::Send)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn header_text_accepts_single_line() {
        assert_eq!(header_text("--subject", "Nightly build".into()).unwrap(), "Nightly build");
        assert!(header_text("--subject", "a\rb".into()).is_err());
    }

    #[test]
    fn envelope_includes_cc_and_bcc() {
        let env = env_from(&[("SMTP_HOST", "h")]);
        let settings = Settings::resolve(
            &cli(&[
                "--from",
                "a@example.com",
                "--to",
                "b@example.com",
                "--cc",
                "c@example.com",
                "--bcc",
                "d@example.com",
            ]),
            &env,
            Purpose::Send,
        )
        .unwrap();
        let envelope = settings.envelope().unwrap();
        assert_eq!(
            join(envelope.recipients()),
            "b@example.com,c@example.com,d@example.com"
        );
    }

    #[test]
    fn check_report_masks_secrets() {
        let env = env_from(&[
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_USERNAME", "u@example.com"),
            ("SMTP_PASSWORD", "hunter2"),
            ("SMTP_TLS_MIN_VERSION", "tls1.2"),
            ("EMAIL_TO", "x@example.com,y@example.com"),
        ]);
        let settings = Settings::resolve(&cli(&[]), &env, Purpose::Send).unwrap();
        let report = settings.render_check();

        assert!(!report.contains("hunter2"));
        assert_eq!(
            report,
            "OK\n\
             smtp_host=smtp.example.com\n\
             smtp_port=587\n\
             smtp_tls=starttls\n\
             smtp_username=<set>\n\
             smtp_password=<set>\n\
             address_family=auto\n\
             tls_min_version=1.2\n\
             tls_max_version=<default>\n\
             from=u@example.com\n\
             to=x@example.com,y@example.com\n"
        );
    }

    #[test]
    fn template_mentions_every_connection_variable() {
        for name in [
            "SMTP_HOST",
            "SMTP_TLS",
            "SMTP_PORT",
            "SMTP_ADDRESS_FAMILY",
            "SMTP_TLS_MIN_VERSION",
            "SMTP_TLS_MAX_VERSION",
            "SMTP_USERNAME",
            "SMTP_PASSWORD",
            "EMAIL_FROM",
            "EMAIL_TO",
        ] {
            assert!(CONFIG_TEMPLATE.contains(&format!("export {name}=")), "{name}");
        }
    }
}
