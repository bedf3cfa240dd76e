//! API server entry point.

use api::auth::AuthConfig;
use api::config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workflow_store::{InMemoryStore, PostgresStore, WorkflowStore};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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

async fn serve<S: WorkflowStore>(
    store: S,
    config: Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    // 1. Wire state and start the saga worker
    let (state, worker) = api::create_default_state(store, &config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_task = tokio::spawn(worker.run(shutdown_rx));

    // 2. Build the application
    let app = api::create_app(
        state,
        metrics_handle,
        AuthConfig {
            auth_required: config.auth_required,
        },
    );

    // 3. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 4. Let in-flight transactions finish
    shutdown_tx.send_replace(true);
    worker_task.await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Install Prometheus metrics recorder
    let metrics_handle = api::routes::metrics::install_recorder()?;

    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresStore::connect(&url).await?;
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL workflow store");
            serve(store, config, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory workflow store");
            serve(InMemoryStore::new(), config, metrics_handle).await
        }
    }
}
