//! Saga orchestrator entry point.

use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use bus::MessageBus;
use saga::{Dispatcher, InMemoryInventory, InMemoryOrders, Participant, SagaOrchestrator};
use saga_service::config::{Config, LogFormat};
use saga_service::{AppState, Backends, Simulation};
use saga_store::{InMemorySagaStore, PostgresSagaStore, SagaStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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

/// Resolves once the shutdown flag is raised or its sender is gone.
fn stopped(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn connect_store(config: &Config) -> Result<(Arc<dyn SagaStore>, &'static str), BoxError> {
    let Some(url) = &config.database_url else {
        return Ok((Arc::new(InMemorySagaStore::new()), "memory"));
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(url)
        .await?;
    let store = PostgresSagaStore::new(pool);
    store.run_migrations().await?;
    Ok((Arc::new(store), "postgres"))
}

#[cfg(feature = "kafka")]
fn connect_bus(config: &Config) -> Result<(Arc<dyn MessageBus>, &'static str), BoxError> {
    match &config.kafka_brokers {
        Some(brokers) => {
            let bus = bus::KafkaBus::new(bus::KafkaConfig::new(brokers.as_str()))?;
            Ok((Arc::new(bus), "kafka"))
        }
        None => Ok((Arc::new(saga_service::in_memory_bus()), "memory")),
    }
}

#[cfg(not(feature = "kafka"))]
fn connect_bus(config: &Config) -> Result<(Arc<dyn MessageBus>, &'static str), BoxError> {
    if config.kafka_brokers.is_some() {
        return Err("KAFKA_BROKERS is set but this build has no Kafka support (enable the `kafka` feature)".into());
    }
    Ok((Arc::new(saga_service::in_memory_bus()), "memory"))
}

/// Starts a participant on its own consumer group.
async fn spawn_participant<P>(
    participant: P,
    bus: &Arc<dyn MessageBus>,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>, BoxError>
where
    P: Participant + 'static,
{
    let subscription = bus.subscribe(&participant.topics(), participant.name()).await?;
    let poll_timeout = config.dispatcher.poll_timeout;
    Ok(tokio::spawn(async move {
        saga::run_participant(&participant, subscription, poll_timeout, stopped(shutdown)).await;
    }))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env()?;
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Connect the saga store and the bus
    let (store, store_backend) = connect_store(&config).await?;
    let (bus, bus_backend) = connect_bus(&config)?;
    tracing::info!(store = store_backend, bus = bus_backend, "backends ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 4. Start the simulated participants, if asked to
    let mut participants = Vec::new();
    let simulation = if config.simulate_participants && bus_backend != "memory" {
        tracing::warn!("simulated participants need the in-memory bus, not starting them");
        None
    } else if config.simulate_participants {
        let simulation = Simulation {
            orders: InMemoryOrders::new(bus.clone(), config.topics.clone()),
            inventory: InMemoryInventory::new(bus.clone(), config.topics.clone()),
        };
        participants.push(
            spawn_participant(simulation.orders.clone(), &bus, &config, shutdown_rx.clone()).await?,
        );
        participants.push(
            spawn_participant(simulation.inventory.clone(), &bus, &config, shutdown_rx.clone())
                .await?,
        );
        tracing::info!("simulated inventory and order participants started");
        Some(simulation)
    } else {
        None
    };

    // 5. Start the dispatch loop
    let orchestrator = SagaOrchestrator::new(store.clone(), bus.clone(), config.topics.clone());
    let subscription = bus
        .subscribe(&config.topics.orchestrator_inputs(), &config.consumer_group)
        .await?;
    let dispatcher = Dispatcher::new(Arc::new(orchestrator), config.dispatcher.clone())
        .spawn(subscription, stopped(shutdown_rx.clone()));

    // 6. Build the application
    let state = Arc::new(AppState {
        store,
        backends: Backends {
            store: store_backend,
            bus: bus_backend,
        },
        simulation,
    });
    let app = saga_service::create_app(state, metrics_handle);

    // 7. Serve until a shutdown signal, then drain the dispatch loop
    let addr = config.addr();
    tracing::info!(%addr, "starting saga service");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let stats = dispatcher.await?;
    for participant in participants {
        participant.await?;
    }

    tracing::info!(?stats, "saga service shut down gracefully");
    Ok(())
}
