//! topicbridge CLI
//!
//! Publish to and receive from a Google Cloud Pub/Sub topic configured
//! through `GCP_*` environment variables.

use clap::Parser;
use topicbridge_cli::{Cli, Command, commands};
use topicbridge_core::{AdapterConfig, CancellationToken, QueueAdapter};
use topicbridge_gcp::GcpConnector;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let adapter = QueueAdapter::new(cli.apply(AdapterConfig::from_env()), GcpConnector::new());
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Command::Publish(ref args) => {
            commands::publish::run(&adapter, args, cli.format, &mut stdout).await
        }
        Command::Subscribe(ref args) => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for ctrl-c");
                    return;
                }
                on_signal.cancel();
            });

            commands::subscribe::run(&adapter, args, cli.format, cancel, &mut stdout)
                .await
                .map(|_| ())
        }
    }
}
