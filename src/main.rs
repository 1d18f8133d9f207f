use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use shiptrack::{
    auth::{AuthProvider, MemoryAuth},
    config::{Backend, Config},
    document_client::RestDocumentStore,
    http::{AppState, build_router},
    identity_client::RestAuthClient,
    notify::LogNotifier,
    service::ShipmentService,
    store::{MemoryStore, ShipmentStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(config.log_json);

    let (store, auth): (Arc<dyn ShipmentStore>, Arc<dyn AuthProvider>) = match &config.backend {
        Backend::Memory => {
            warn!("using in-memory backend, data is lost on restart");
            (Arc::new(MemoryStore::new()), Arc::new(MemoryAuth::new()))
        }
        Backend::Remote(remote) => (
            Arc::new(RestDocumentStore::new(
                remote.store_url.clone(),
                remote.store_api_key.clone(),
                config.subscription_poll,
            )?),
            Arc::new(RestAuthClient::new(
                remote.auth_url.clone(),
                remote.auth_api_key.clone(),
            )?),
        ),
    };

    if config.admin_emails.is_empty() {
        warn!("ADMIN_EMAILS is empty, admin routes will reject everyone");
    }

    let service = ShipmentService::new(store, Arc::new(LogNotifier), config.payment_account());
    let app = build_router(AppState {
        service: Arc::new(service),
        auth,
        admins: Arc::new(config.admin_emails.clone()),
    });

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    info!(
        addr = %config.bind_addr,
        admins = config.admin_emails.len(),
        upi_id = %config.upi_id,
        "shiptrack listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("shiptrack stopped");
    Ok(())
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
