//! EMS collector - event catcher and metrics collector for vSphere
//!
//! Runs one collector per process against a single management endpoint,
//! publishing canonical payloads to the broker's HTTP ingress.

use anyhow::Result;
use clap::{Parser, Subcommand};
use collector_lib::{
    events::EventCatcherBuilder,
    health::{components, HealthRegistry},
    metrics::MetricsSchedulerBuilder,
    observability::{CollectorMetrics, StructuredLogger},
    publish::{HttpPublisher, Publisher},
    session::ViJsonConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Event and metrics collector for vSphere management endpoints
#[derive(Parser)]
#[command(name = "ems-collector")]
#[command(author, version, long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON); environment overrides it
    #[arg(long, short, env = "COLLECTOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy, Debug)]
enum Command {
    /// Stream provider events to the broker
    Events,

    /// Sample VM performance counters on a fixed interval
    Metrics,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Events => components::EVENT_CATCHER,
            Command::Metrics => components::METRICS_COLLECTOR,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();

    let config = config::CollectorConfig::load(cli.config.as_deref())?;
    info!(
        ems_id = config.ems_id,
        host = %config.ems_hostname,
        collector = cli.command.name(),
        "Collector configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SESSION).await;
    health_registry.register(cli.command.name()).await;
    health_registry.register(components::PUBLISHER).await;

    let metrics = CollectorMetrics::new();

    let logger = StructuredLogger::new(config.ems_id);
    logger.log_startup(cli.command.name(), COLLECTOR_VERSION);

    let publisher: Arc<dyn Publisher> = Arc::new(HttpPublisher::new(
        &config.publisher_endpoint,
        config.publisher_client_ref.clone(),
        PUBLISH_TIMEOUT,
    )?);

    let cancel = CancellationToken::new();

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, cancel.clone()));
    let collector = {
        let cancel = cancel.clone();
        let health = health_registry.clone();
        tokio::spawn(async move {
            let result =
                run_collector(cli.command, config, publisher, health, cancel.clone()).await;
            cancel.cancel();
            result
        })
    };

    health_registry.set_ready(true).await;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {
            logger.log_shutdown("collector exited");
        }
    }

    // In-flight remote calls finish before the loop notices the stop
    collector.await??;
    api_handle.await??;
    info!("Shutdown complete");

    Ok(())
}

async fn run_collector(
    command: Command,
    config: config::CollectorConfig,
    publisher: Arc<dyn Publisher>,
    health: HealthRegistry,
    cancel: CancellationToken,
) -> Result<()> {
    let connector = ViJsonConnector::new(config.session_config());

    match command {
        Command::Events => {
            let settings = config.event_catcher_config();
            let catcher = EventCatcherBuilder::new()
                .ems_id(settings.ems_id)
                .page_size(settings.page_size)
                .max_wait(settings.max_wait)
                .reconnect_delay(settings.reconnect_delay)
                .publisher(publisher)
                .health(health)
                .cancel_token(cancel)
                .build()?;

            catcher.run(&connector).await;
        }
        Command::Metrics => {
            let scheduler = MetricsSchedulerBuilder::new()
                .config(config.metrics_config()?)
                .publisher(publisher)
                .health(health)
                .cancel_token(cancel)
                .build()?;

            scheduler.run(&connector).await;
        }
    }

    Ok(())
}
