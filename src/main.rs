//! A2A Hub server binary

use a2a_hub::config::HubConfig;
use a2a_hub::domain_types::{HeartbeatIntervalMs, MaxConnections, RetentionMaxAgeMs};
use a2a_hub::hub::{Hub, server};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

/// Agent-to-agent communication hub
#[derive(Debug, Parser)]
#[command(name = "a2a-hub", version, about)]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Maximum number of registered agents
    #[arg(long, default_value_t = 1000)]
    max_connections: usize,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value_t = 30_000)]
    heartbeat_interval_ms: u64,

    /// Global upper bound on topic retention age in milliseconds
    #[arg(long, default_value_t = 86_400_000)]
    message_retention_ms: u64,

    /// Disable in-memory topic history
    #[arg(long)]
    no_persistence: bool,

    /// Disable the /stats counters
    #[arg(long)]
    no_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("a2a_hub=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = HubConfig::builder()
        .port(args.port)
        .max_connections(
            MaxConnections::try_new(args.max_connections).context("invalid --max-connections")?,
        )
        .heartbeat_interval(
            HeartbeatIntervalMs::try_new(args.heartbeat_interval_ms)
                .context("invalid --heartbeat-interval-ms")?,
        )
        .message_retention(
            RetentionMaxAgeMs::try_new(args.message_retention_ms)
                .context("invalid --message-retention-ms")?,
        )
        .enable_persistence(!args.no_persistence)
        .enable_metrics(!args.no_metrics)
        .build()?;

    info!(
        port = config.port,
        max_connections = %config.max_connections,
        heartbeat_interval_ms = %config.heartbeat_interval,
        "starting A2A hub"
    );

    let hub = Hub::new(config);
    hub.start_background_tasks();

    let (listener, addr) = server::start_server(&hub).await?;
    info!(%addr, "hub listening");

    let app = server::create_app(hub.clone());
    let shutdown_token = hub.shutdown_token();

    let ctrl_c_hub = hub.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            ctrl_c_hub.shutdown();
        }
    });

    server::serve_with_graceful_shutdown(listener, app, shutdown_token).await?;

    info!("hub stopped");
    Ok(())
}
