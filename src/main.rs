use anyhow::Context;
use candidate_invitation_consumer::{
    api,
    config::{Config, ObservabilityConfig},
    messaging::{
        create_broker, init_consumer_metrics, ConsumerLifecycle, InvitationEvent, QueueConnector,
        StopHandle,
    },
    models::Assessment,
    processing::UpsertCoordinator,
    state::create_store,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "candidate-invitation-consumer")]
#[command(about = "Ingests candidate invitation events from RabbitMQ", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file, layered over the built-in defaults
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Consume invitations until interrupted (default)
    Run,

    /// Connect, declare the topology and print the queue status
    Check,

    /// Validate an invitation payload from a file and print the rows it would write
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };

    init_tracing(&config.observability);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Check => check(config).await,
        Command::Validate { file } => validate_file(&config, &file),
    }
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("candidate_invitation_consumer={}", observability.log_level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        service = %config.observability.service_name,
        "Starting candidate invitation consumer v{}",
        env!("CARGO_PKG_VERSION")
    );

    config.validate().context("invalid configuration")?;

    tracing::info!("Storage backend: {:?}", config.state.backend);
    let store = create_store(&config.state)?;
    let coordinator = Arc::new(UpsertCoordinator::new(store));

    let broker = create_broker(&config.broker)?;
    let connector = QueueConnector::new(broker, config.broker.topology(), coordinator)
        .with_max_message_bytes(config.broker.max_message_bytes)
        .with_processing_timeout(config.processing.timeout())
        .with_metrics(config.observability.metrics_enabled);

    let mut consumer = ConsumerLifecycle::new(connector);

    let stop = consumer.stop_handle();
    if config.observability.metrics_enabled {
        serve_metrics(&config.observability, stop.clone()).await;
    }

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        stop.stop();
    });

    consumer
        .connect()
        .await
        .context("failed to connect to the message broker")?;
    consumer.start_consuming().await?;

    tracing::info!("Shutting down gracefully...");
    Ok(())
}

/// Start the metrics listener. A bind failure is logged and consumption goes on.
async fn serve_metrics(observability: &ObservabilityConfig, stop: StopHandle) {
    init_consumer_metrics();

    let addr = observability.metrics_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::warn!("Failed to bind metrics endpoint on {}: {}", addr, e);
            tracing::warn!("Continuing without a metrics endpoint");
            return;
        }
    };

    tokio::spawn(async move {
        if let Err(e) = api::serve(listener, async move { stop.stopped().await }).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });
}

async fn check(config: Config) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;

    let broker = create_broker(&config.broker)?;
    let topology = config.broker.topology();
    let status = broker.queue_status(&topology).await?;

    let report = json!({
        "backend": broker.backend_name(),
        "exchange": topology.exchange,
        "queue": status.queue,
        "routing_key": topology.routing_key,
        "dead_letter_exchange": topology.dead_letter_exchange,
        "prefetch_count": topology.prefetch_count,
        "message_count": status.message_count,
        "consumer_count": status.consumer_count,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn validate_file(config: &Config, file: &Path) -> anyhow::Result<()> {
    let payload =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;

    if payload.len() > config.broker.max_message_bytes {
        anyhow::bail!(
            "payload of {} bytes exceeds the {} byte limit",
            payload.len(),
            config.broker.max_message_bytes
        );
    }

    let event = InvitationEvent::from_slice(&payload)?;
    let write = UpsertCoordinator::prepare(&event, chrono::Utc::now())?;

    let report = json!({
        "invitation_id": event.invitation_id,
        "assessment": Assessment::create(&write.assessment, write.timestamp),
        "candidate": {
            "id": write.candidate_id,
            "email": write.candidate_email,
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
