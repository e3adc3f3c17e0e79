//! `mailrelay` - send an email through an SMTP relay, or probe the relay.
//!
//! Connection settings come from flags or environment variables; run with
//! `--print-config-template` for the full list.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod app;
mod cli;
mod message;
mod settings;

use std::process::ExitCode;

use clap::Parser;
use mailrelay_smtp::EXIT_FAILURE;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let mut filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mailrelay=info,mailrelay_smtp=warn".into());
    if cli.debug_smtp
        && let Ok(directive) = "mailrelay_smtp=trace".parse::<Directive>()
    {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let env = |name: &str| std::env::var(name).ok();
    let outcome = runtime.block_on(app::run(
        &cli,
        &env,
        &mut std::io::stdin().lock(),
        &mut std::io::stdout().lock(),
        &mut std::io::stderr().lock(),
    ));

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
