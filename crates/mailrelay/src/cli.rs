//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Send an email via SMTP (none/starttls/ssl), or probe the relay.
///
/// Every connection and message option falls back to environment
/// variables; see `--print-config-template`.
#[derive(Debug, Parser)]
#[command(name = "mailrelay", version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)] // Mode switches are independent flags
pub struct Cli {
    /// Print an env var template and exit (no send)
    #[arg(long)]
    pub print_config_template: bool,

    /// Validate required SMTP/message config and exit (no send)
    #[arg(long)]
    pub check_config: bool,

    /// Probe TCP/TLS connectivity (EHLO + STARTTLS/SSL handshake), then exit (no send)
    #[arg(long)]
    pub probe: bool,

    /// With --probe, also attempt SMTP AUTH if a username is set
    #[arg(long)]
    pub probe_auth: bool,

    /// Log the SMTP transcript to stderr (use with --probe or send)
    #[arg(long)]
    pub debug_smtp: bool,

    /// Address family: auto/ipv4/ipv6 (or env SMTP_ADDRESS_FAMILY / MAIL_ADDRESS_FAMILY)
    #[arg(long, value_name = "FAMILY")]
    pub address_family: Option<String>,

    /// Optional TLS min version: 1.0/1.1/1.2/1.3 (or env SMTP_TLS_MIN_VERSION / MAIL_TLS_MIN_VERSION)
    #[arg(long, value_name = "VERSION")]
    pub tls_min_version: Option<String>,

    /// Optional TLS max version: 1.0/1.1/1.2/1.3 (or env SMTP_TLS_MAX_VERSION / MAIL_TLS_MAX_VERSION)
    #[arg(long, value_name = "VERSION")]
    pub tls_max_version: Option<String>,

    /// SMTP host (or env SMTP_HOST / MAIL_HOST)
    #[arg(long, value_name = "HOST")]
    pub smtp_host: Option<String>,

    /// SMTP port (or env SMTP_PORT / MAIL_PORT); default depends on --smtp-tls
    #[arg(long, value_name = "PORT")]
    pub smtp_port: Option<String>,

    /// TLS mode: none, starttls, ssl (or env SMTP_TLS / MAIL_TLS)
    #[arg(long, value_name = "MODE")]
    pub smtp_tls: Option<String>,

    /// SMTP username (or env SMTP_USERNAME / MAIL_USERNAME)
    #[arg(long, value_name = "USER")]
    pub smtp_username: Option<String>,

    /// SMTP password (or env SMTP_PASSWORD / MAIL_PASSWORD)
    #[arg(long, value_name = "PASSWORD")]
    pub smtp_password: Option<String>,

    /// Client name sent in EHLO/HELO (or env SMTP_HELO_NAME)
    #[arg(long, value_name = "NAME")]
    pub helo_name: Option<String>,

    /// From address (or env EMAIL_FROM / MAIL_FROM; falls back to the username)
    #[arg(long = "from", value_name = "ADDRESS")]
    pub from_addr: Option<String>,

    /// Optional display name, e.g. "Build Bot" (or env EMAIL_FROM_NAME / MAIL_FROM_NAME)
    #[arg(long, value_name = "NAME")]
    pub from_name: Option<String>,

    /// To addresses, comma/semicolon separated (or env EMAIL_TO / MAIL_TO)
    #[arg(long, value_name = "ADDRESSES")]
    pub to: Option<String>,

    /// CC addresses (comma/semicolon separated)
    #[arg(long, value_name = "ADDRESSES")]
    pub cc: Option<String>,

    /// BCC addresses (comma/semicolon separated)
    #[arg(long, value_name = "ADDRESSES")]
    pub bcc: Option<String>,

    /// Email subject
    #[arg(long)]
    pub subject: Option<String>,

    /// Body text
    #[arg(long, conflicts_with_all = ["body_file", "body_stdin"])]
    pub body: Option<String>,

    /// Read body from file (utf-8)
    #[arg(long, value_name = "PATH", conflicts_with = "body_stdin")]
    pub body_file: Option<PathBuf>,

    /// Read body from stdin
    #[arg(long)]
    pub body_stdin: bool,

    /// Optional HTML body; when set, sends multipart (text + html)
    #[arg(long)]
    pub html: Option<String>,

    /// SMTP timeout in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 20.0)]
    pub timeout: f64,

    /// Print the message and exit without sending
    #[arg(long)]
    pub dry_run: bool,
}

/// What a run does, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `--print-config-template`
    Template,
    /// `--check-config`
    CheckConfig,
    /// `--probe`
    Probe,
    /// Build the message, then print it (`--dry-run`) or send it.
    Send,
}

impl Cli {
    /// Returns the selected mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        if self.print_config_template {
            Mode::Template
        } else if self.check_config {
            Mode::CheckConfig
        } else if self.probe {
            Mode::Probe
        } else {
            Mode::Send
        }
    }
}
