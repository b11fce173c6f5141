use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pce_core::orchestrator::all_queue_names;
use pce_core::{
    create_authenticator, create_event_system, load_config, validate_config, Authenticator,
    DomainEvent, EventLog, EventLogWriter, FulfillmentService, FulfillmentStore, HttpRenderer,
    JobProcessor, JobQueue, LogFormat, OrderStore, PassthroughRenderer, PipelineOrchestrator,
    PipelineStore, ProviderRegistry, QueueManager, Renderer, ReturnService, SqliteEventLog,
    SqliteFulfillmentStore, SqliteJobQueue, SqliteOrderStore, SqlitePipelineStore,
    SqliteReturnStore, StageExecutor, StageWorkers, TrackingService, TrackingSweeper,
    TrackingUpdateHandler, WebhookIngest,
};
use pce_server::api::create_router;
use pce_server::state::{AppState, Services};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for the domain event channel
const EVENT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var("PCE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Logging format comes from the config, so load it first
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_logging(LogFormat::Pretty);
            return Err(e).with_context(|| format!("Failed to load config from {:?}", config_path));
        }
    };
    init_logging(config.server.log_format);
    info!("Loaded configuration from {:?}", config_path);

    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        config_hash = &config_hash[..16],
        auth = ?config.auth.method,
        database = ?config.database.path,
        "Configuration loaded"
    );

    // Create authenticator
    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!("Using authenticator: {}", authenticator.method_name());

    // Stores share one SQLite file
    let db_path = &config.database.path;
    let pipelines: Arc<dyn PipelineStore> = Arc::new(
        SqlitePipelineStore::new(db_path).context("Failed to open pipeline store")?,
    );
    let orders: Arc<dyn OrderStore> =
        Arc::new(SqliteOrderStore::new(db_path).context("Failed to open order store")?);
    let fulfillment_store: Arc<dyn FulfillmentStore> = Arc::new(
        SqliteFulfillmentStore::new(db_path).context("Failed to open fulfillment store")?,
    );
    let return_store = Arc::new(
        SqliteReturnStore::new(db_path).context("Failed to open return store")?,
    );
    let event_log: Arc<dyn EventLog> =
        Arc::new(SqliteEventLog::new(db_path).context("Failed to open event log")?);
    let queue: Arc<dyn JobQueue> = Arc::new(
        SqliteJobQueue::new(db_path, config.queue.clone()).context("Failed to open job queue")?,
    );
    info!("Stores initialized");

    // Event system
    let (events, mut dispatcher) = create_event_system(EVENT_BUFFER_SIZE);
    dispatcher.add_handler(Arc::new(EventLogWriter::new(Arc::clone(&event_log))));

    // Providers are required; a broken provider config stops startup
    let providers = Arc::new(
        ProviderRegistry::from_config(&config.providers)
            .context("Failed to configure providers")?,
    );
    providers
        .connect_all()
        .await
        .context("Failed to connect to providers")?;

    let renderer: Arc<dyn Renderer> = match &config.render.base_url {
        Some(base_url) => {
            info!("Using render service at {}", base_url);
            Arc::new(
                HttpRenderer::new(base_url.clone(), &config.render)
                    .context("Failed to create renderer")?,
            )
        }
        None => {
            info!("No render service configured; using design files as print files");
            Arc::new(PassthroughRenderer::new())
        }
    };

    // Services
    let tracking = Arc::new(
        TrackingService::new(Arc::clone(&fulfillment_store)).with_events(events.clone()),
    );
    let fulfillments = Arc::new(
        FulfillmentService::new(
            Arc::clone(&fulfillment_store),
            Arc::clone(&pipelines),
            Arc::clone(&orders),
            Arc::clone(&providers),
        )
        .with_tracking(Arc::clone(&tracking))
        .with_events(events.clone()),
    );
    dispatcher.add_handler(Arc::new(TrackingUpdateHandler::new(Arc::clone(&fulfillments))));
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    let orchestrator = Arc::new(
        PipelineOrchestrator::new(
            config.orchestrator.clone(),
            Arc::clone(&pipelines),
            Arc::clone(&queue),
            Arc::clone(&fulfillments),
        )
        .with_events(events.clone()),
    );
    let queues = Arc::new(QueueManager::new(Arc::clone(&queue), all_queue_names()));
    let returns = Arc::new(
        ReturnService::new(return_store, Arc::clone(&orders)).with_events(events.clone()),
    );
    if config.webhooks.require_signature && config.webhooks.tracking_secret.is_none() {
        warn!("No tracking webhook secret configured; tracking webhooks will be dropped");
    }
    let webhooks = Arc::new(
        WebhookIngest::new(
            Arc::clone(&queue),
            Arc::clone(&providers),
            Arc::clone(&tracking),
            Arc::clone(&fulfillments),
            config.webhooks.require_signature,
        )
        .with_tracking_secret(config.webhooks.tracking_secret.clone()),
    );

    events
        .emit(DomainEvent::ServiceStarted {
            version: VERSION.to_string(),
        })
        .await;

    // Background work
    let executor = Arc::new(StageExecutor::new(
        &config.orchestrator,
        Arc::clone(&orders),
        renderer,
        Arc::clone(&fulfillments),
        Arc::clone(&pipelines),
    ));
    let processor = Arc::new(JobProcessor::new(
        Arc::clone(&orchestrator),
        executor,
        Arc::clone(&webhooks),
        config.queue.visibility_timeout(),
    ));
    let workers = StageWorkers::new(processor, config.orchestrator.clone());
    workers.start().await;

    let sweeper = TrackingSweeper::new(Arc::clone(&tracking), config.tracking.clone());
    sweeper.start().await;

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        authenticator,
        Services {
            orchestrator,
            pipelines,
            queues,
            orders,
            fulfillments,
            tracking,
            returns,
            webhooks,
            event_log,
        },
    ));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    workers.stop().await;
    sweeper.stop().await;
    info!("Background workers stopped");

    events
        .emit(DomainEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // Every service holding an EventHandle must be gone before the
    // dispatcher's channel closes. The router and its state were dropped
    // when the server returned.
    drop(workers);
    drop(sweeper);
    drop(events);

    let _ = dispatcher_handle.await;
    info!("Event dispatcher stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
