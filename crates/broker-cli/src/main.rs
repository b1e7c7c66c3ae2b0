//! `instance-iterator-tool`: walks every instance known to a broker and
//! triggers an upgrade or recreate against each, to completion.
//!
//! Parses flags/env/config file, wires the Broker Services HTTP client and
//! a `TracingListener`, runs the iterator, and maps the result to a
//! process exit code: `0` success, `1` configuration error or iterator
//! failure, `2` flag-parsing failure (clap's own convention, unchanged).

mod config;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use broker_core::broker_services::BrokerServicesClient;
use broker_core::tracing_listener::TracingListener;
use broker_core::types::OperationType;
use broker_core::{Builder, IterateError};

/// A single `key=value` pair, used to build up `--canary-selection-params`.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE pair: {s}"))?;
    Ok((key.to_string(), value.to_string()))
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OperationTypeArg {
    Upgrade,
    Recreate,
}

impl From<OperationTypeArg> for OperationType {
    fn from(arg: OperationTypeArg) -> Self {
        match arg {
            OperationTypeArg::Upgrade => OperationType::Upgrade,
            OperationTypeArg::Recreate => OperationType::Recreate,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "instance-iterator-tool", about = "Drive a fleet-wide BOSH operation across every service instance")]
pub struct Cli {
    /// Broker management API base URL.
    #[arg(long, env = "BROKER_URL")]
    broker_url: Option<String>,

    /// Broker management API basic-auth username.
    #[arg(long, env = "BROKER_USERNAME")]
    broker_username: Option<String>,

    /// Broker management API basic-auth password.
    #[arg(long, env = "BROKER_PASSWORD")]
    broker_password: Option<String>,

    /// Operation to trigger against every instance.
    #[arg(long, value_enum)]
    operation_type: Option<OperationTypeArg>,

    /// Maximum number of operations in flight at once.
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Number of canary instances to process before the main phase.
    #[arg(long)]
    canaries: Option<usize>,

    /// Tag filter (`key=value`, may be repeated or comma-separated) used to
    /// select the canary pool instead of the first N instances.
    #[arg(long, value_delimiter = ',', value_parser = parse_key_val)]
    canary_selection_params: Vec<(String, String)>,

    /// Seconds to wait between polls of in-flight operations.
    #[arg(long)]
    polling_interval_secs: Option<u64>,

    /// Seconds to wait between retry attempts.
    #[arg(long)]
    attempt_interval_secs: Option<u64>,

    /// Maximum retry attempts per phase.
    #[arg(long)]
    attempt_limit: Option<usize>,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let (identity, settings) = match config::resolve(&cli) {
        Ok(resolved) => resolved,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    let client = Arc::new(BrokerServicesClient::new(
        identity.url,
        identity.username,
        identity.password,
        settings.operation_type,
    ));

    let cancellation = CancellationToken::new();
    tokio::spawn(watch_for_shutdown_signals(cancellation.clone()));

    let iterator = Builder::new(client.clone(), client.clone(), client, Arc::new(TracingListener))
        .with_max_in_flight(settings.max_in_flight)
        .with_canaries(settings.canaries)
        .with_canary_selection_params(settings.canary_selection_params)
        .with_polling_interval(settings.polling_interval)
        .with_attempt_interval(settings.attempt_interval)
        .with_attempt_limit(settings.attempt_limit)
        .with_cancellation_token(cancellation)
        .build();

    let iterator = match iterator {
        Ok(iterator) => iterator,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    match iterator.iterate().await {
        Ok(()) => std::process::exit(0),
        Err(err @ IterateError::Interrupted) => {
            tracing::warn!("{err}");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

/// Cancel `token` on the first SIGINT or SIGTERM. Runs for the life of the
/// process; the iterator observes the token between attempts and stops
/// triggering new operations, but leaves whatever is already in flight
/// running on the remote system.
async fn watch_for_shutdown_signals(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    token.cancel();
}
