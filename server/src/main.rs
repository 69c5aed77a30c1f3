//! Raffle HTTP server.
//!
//! This binary:
//! - Connects to `PostgreSQL` and runs migrations
//! - Builds the Efí PIX client (or the mock, with `PAYMENT_GATEWAY=mock`)
//! - Starts the expiry sweeper and payment reconciliation loop
//! - Serves the API and, on a separate port, Prometheus metrics
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://... EFI_SANDBOX_CLIENT_ID=... cargo run --bin rifa-server
//! ```

use anyhow::Context;
use axum::{Router, routing::get};
use rifa_core::environment::SystemClock;
use rifa_core::gateway::PaymentGateway;
use rifa_pix::EfiClient;
use rifa_postgres::PostgresStore;
use rifa_runtime::metrics::MetricsServer;
use rifa_runtime::{ExpirySweeper, RaffleService};
use rifa_server::config::GatewayConfig;
use rifa_server::{AppState, Config, build_router};
use rifa_testing::MockPaymentGateway;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rifa=info,tower_http=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting raffle server");

    let config = Config::from_env().context("loading configuration")?;
    let service_config = config
        .reservation
        .service_config()
        .context("reading reservation timings")?;

    // Metrics
    let metrics_addr: SocketAddr = format!(
        "{}:{}",
        config.server.metrics_host, config.server.metrics_port
    )
    .parse()
    .context("metrics address")?;
    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start()?;
    spawn_metrics_listener(metrics).await?;

    // Store
    info!("Connecting to database...");
    let store = tokio::time::timeout(
        Duration::from_secs(config.postgres.connect_timeout),
        PostgresStore::connect(&config.postgres.url, config.postgres.max_connections),
    )
    .await
    .context("database connection timed out")??;
    store.migrate().await?;
    info!("Database ready");

    // Payment gateway
    let gateway: Arc<dyn PaymentGateway> = match &config.gateway {
        GatewayConfig::Efi(efi) => {
            info!(environment = ?efi.environment, "Using Efí PIX gateway");
            Arc::new(EfiClient::new(efi.as_ref().clone())?)
        }
        GatewayConfig::Mock { webhook_secret } => {
            warn!("Using the mock payment gateway; no real charges will be created");
            Arc::new(MockPaymentGateway::new(webhook_secret.clone()))
        }
    };

    let service = Arc::new(RaffleService::new(
        Arc::new(store),
        gateway,
        Arc::new(SystemClock),
        service_config,
    ));

    // Background sweeper
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let sweeper = ExpirySweeper::new(service.clone(), config.reservation.sweep_interval())
        .spawn(shutdown_rx);

    // HTTP server
    let app = build_router(AppState::new(service, config.admin.api_key.clone()));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "Raffle server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down gracefully...");
    let _ = shutdown_tx.send(());
    if tokio::time::timeout(Duration::from_secs(config.server.shutdown_timeout), sweeper)
        .await
        .is_err()
    {
        warn!("Sweeper did not stop within the shutdown timeout");
    }
    Ok(())
}

/// Serves `/metrics` on the metrics address.
async fn spawn_metrics_listener(metrics: MetricsServer) -> anyhow::Result<()> {
    let addr = metrics.addr();
    let metrics = Arc::new(metrics);
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = metrics.clone();
            async move { metrics.render().unwrap_or_default() }
        }),
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics listener {addr}"))?;
    info!(addr = %addr, "Metrics listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "Metrics listener stopped");
        }
    });
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
