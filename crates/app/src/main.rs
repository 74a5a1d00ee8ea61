//! Pipeline process entry point.
//!
//! Subcommands:
//!
//! ```text
//! order-pipeline topology [--force]   declare or repair the broker topology
//! order-pipeline consume <family>     run a consumer family (orders | inventory | intake)
//! order-pipeline relay                run the outbox relay
//! order-pipeline replay [id]          replay ledgered dead letters
//! order-pipeline sync-stock           copy cache stock mirrors into the rows
//! ```

mod config;

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use broker::{AmqpBroker, Broker, topology};
use inventory::{RedisStockStore, ReservationEngine, ReservationEngineConfig, StockStore};
use pipeline::{
    ConsumerRuntime, DeadLetterIntake, EventPublisher, InventoryFamily, OrderEventsFamily,
    OrderOrchestrator, OrchestratorConfig, OutboxRelay, QueueFamily, Replayer, StockSync,
};
use store::PostgresStore;

use config::Config;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

type AppError = Box<dyn std::error::Error + Send + Sync>;
type AppResult<T> = std::result::Result<T, AppError>;

struct Services {
    broker: Arc<dyn Broker>,
    store: Arc<PostgresStore>,
    stock: Arc<dyn StockStore>,
    config: Config,
}

impl Services {
    async fn connect(config: Config) -> AppResult<Self> {
        let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::connect(&config.amqp_url).await?);
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        let store = Arc::new(PostgresStore::new(pool));
        store.run_migrations().await?;
        let stock: Arc<dyn StockStore> =
            Arc::new(RedisStockStore::connect(&config.redis_url).await?);
        Ok(Self {
            broker,
            store,
            stock,
            config,
        })
    }

    fn orchestrator(&self) -> OrderOrchestrator {
        let engine = ReservationEngine::new(self.stock.clone(), ReservationEngineConfig::default());
        let publisher = EventPublisher::new(self.broker.clone());
        OrderOrchestrator::new(
            self.store.clone(),
            engine,
            publisher,
            OrchestratorConfig {
                timeout_delay: Duration::from_secs(self.config.order_timeout_secs),
            },
        )
    }
}

async fn run_consumer(services: &Services, family: Arc<dyn QueueFamily>) -> AppResult<()> {
    let runtime = ConsumerRuntime::new(services.broker.clone(), family);
    // Fail fast: consuming against a misconfigured topology strands messages.
    runtime.declare_topology().await?;
    tokio::select! {
        result = runtime.run() => result.map_err(Into::into),
        () = shutdown_signal() => Ok(()),
    }
}

async fn run(config: Config, args: &[String]) -> AppResult<()> {
    match args.first().map(String::as_str) {
        Some("topology") => {
            let force = args.iter().any(|a| a == "--force");
            let services = Services::connect(config).await?;
            topology::declare_all(services.broker.as_ref(), force).await?;
            Ok(())
        }
        Some("consume") => {
            let services = Services::connect(config).await?;
            match args.get(1).map(String::as_str) {
                Some("orders") => {
                    let family = Arc::new(OrderEventsFamily::new(services.orchestrator()));
                    run_consumer(&services, family).await
                }
                Some("inventory") => {
                    let family = Arc::new(InventoryFamily::new(
                        services.store.clone(),
                        services.stock.clone(),
                    ));
                    run_consumer(&services, family).await
                }
                Some("intake") => {
                    topology::declare_all(services.broker.as_ref(), false).await?;
                    let intake =
                        DeadLetterIntake::new(services.broker.clone(), services.store.clone());
                    tokio::select! {
                        result = intake.run() => result.map_err(Into::into),
                        () = shutdown_signal() => Ok(()),
                    }
                }
                other => Err(format!(
                    "unknown consumer family {other:?}; expected orders, inventory, or intake"
                )
                .into()),
            }
        }
        Some("relay") => {
            let services = Services::connect(config).await?;
            let relay = OutboxRelay::new(services.store.clone(), services.broker.clone());
            tokio::select! {
                result = relay.run() => result.map_err(Into::into),
                () = shutdown_signal() => Ok(()),
            }
        }
        Some("replay") => {
            let id = args.get(1).map(|v| v.parse::<i64>()).transpose()?;
            let services = Services::connect(config).await?;
            let replayer = Replayer::new(services.broker.clone(), services.store.clone());
            let summary = replayer.replay(id).await?;
            tracing::info!(replayed = summary.replayed, failed = summary.failed, "replay done");
            Ok(())
        }
        Some("sync-stock") => {
            let services = Services::connect(config).await?;
            let sync = StockSync::new(services.store.clone(), services.stock.clone());
            let synced = sync.sync_all().await?;
            tracing::info!(synced, "stock sync done");
            Ok(())
        }
        other => Err(format!(
            "unknown command {other:?}; expected topology, consume, relay, replay, or sync-stock"
        )
        .into()),
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    prometheus_builder
        .install()
        .expect("failed to install Prometheus recorder");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(err) = run(config, &args).await {
        tracing::error!(error = %err, "fatal");
        std::process::exit(1);
    }
}
