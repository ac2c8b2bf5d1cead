mod config;
mod error;
mod workload;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use config::Cli;
use error::BenchError;
use tessera_engine::Session;
use transport_sim::SimCluster;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "bench failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BenchError> {
    let config = cli.driver_config()?;
    tracing::info!(nodes = cli.nodes, prepares = cli.prepares, "tessera-bench starting");

    let cluster = Arc::new(SimCluster::new(cli.nodes));
    cluster.set_latency(Duration::from_millis(cli.latency_ms));
    let session = Arc::new(Session::new(cluster.clone(), config));

    // --- Ctrl-C aborts the workload ---
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, cancelling workload");
                token.cancel();
            }
        });
    }

    let summary = tokio::select! {
        _ = token.cancelled() => return Err(BenchError::Interrupted),
        summary = workload::run(session.clone(), cli.nodes, cli.prepares) => summary?,
    };

    tracing::info!(
        prepares = cluster.prepare_count(),
        executes = cluster.execute_count(),
        "cluster request totals"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
