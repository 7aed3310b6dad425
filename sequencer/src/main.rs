use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use coordination::etcd::EtcdCoordination;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use sequencer::cli::Cli;
use sequencer::config::Config;
use sequencer::coordinator::DistributedSequenceCoordinator;
use sequencer::group::Ec2GroupResolver;
use sequencer::sequencer::Sequencer;
use sequencer::types::SequenceId;

async fn run(cli: Cli) -> Result<SequenceId> {
    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables")?;
    info!(?config, "configuration loaded");

    let service = EtcdCoordination::new(config.etcd_config(&cli.connect));
    let coordinator =
        DistributedSequenceCoordinator::new(Arc::new(service), config.coordinator_config());
    let resolver = Ec2GroupResolver::from_region(&cli.region).await;
    let sequencer = Sequencer::new(Arc::new(resolver), coordinator);

    let generate = sequencer.generate(cli.generate_request());
    let id = match cli.timeout() {
        Some(timeout) => tokio::time::timeout(timeout, generate)
            .await
            .with_context(|| format!("no sequence id assigned within {timeout:?}"))??,
        None => generate.await?,
    };
    Ok(id)
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries only the assigned id
    let log_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .boxed();

    tracing_subscriber::registry().with(log_layer).init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(id) => {
            println!("{id}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, "failed to generate sequence id");
            ExitCode::FAILURE
        }
    }
}
