//! Relay Chat service
//!
//! # Servers
//!
//! - gRPC `ChatService` (default: 0.0.0.0:50051)
//! - HTTP health and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Install the Prometheus recorder
//! 3. Build the auth broker, admission control, registry and store
//! 4. Spawn the admission sweeper
//! 5. Start the health server
//! 6. Bind and serve gRPC, then mark ready
//! 7. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chat_service::admission::sweeper::run_sweeper;
use chat_service::admission::{AdmissionControl, RateLimitConfig};
use chat_service::auth::AuthBroker;
use chat_service::config::Config;
use chat_service::grpc::{self, ChatGrpcService, ChatServiceDeps};
use chat_service::observability::metrics::init_metrics_recorder;
use chat_service::observability::{operational_router, HealthState};
use chat_service::registry::ConnectionRegistry;
use chat_service::repositories::InMemoryStore;
use chat_service::session::StreamSession;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting chat service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        grpc_bind_address = %config.grpc_bind_address,
        health_bind_address = %config.health_bind_address,
        active_key_id = %config.active_key_id,
        signing_keys = config.signing_keys.len(),
        legacy_secret = config.legacy_secret.is_some(),
        rate_limit_rpm = config.rate_limit_rpm,
        rate_limit_burst = config.rate_limit_burst,
        tls = config.tls_enabled(),
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let broker = Arc::new(AuthBroker::from_config(&config).map_err(|e| {
        error!(error = %e, "Failed to build auth broker");
        e
    })?);

    let admission = Arc::new(AdmissionControl::new(RateLimitConfig {
        requests_per_minute: config.rate_limit_rpm,
        burst: config.rate_limit_burst,
        idle_eviction_window: Duration::from_secs(config.rate_limit_idle_seconds),
    }));

    let registry = Arc::new(ConnectionRegistry::new());
    let store = Arc::new(InMemoryStore::new());
    let session = StreamSession::new(Arc::clone(&registry), store.clone(), store.clone());

    let service = ChatGrpcService::new(ChatServiceDeps {
        broker: Arc::clone(&broker),
        admission: Arc::clone(&admission),
        accounts: store.clone(),
        conversations: store,
        session,
        bcrypt_cost: config.bcrypt_cost,
        stream_buffer_size: config.stream_buffer_size,
    });

    let shutdown_token = CancellationToken::new();
    let health_state = Arc::new(HealthState::new());

    // Admission sweeper
    let sweeper_token = shutdown_token.child_token();
    let sweep_interval = Duration::from_secs(config.rate_limit_sweep_seconds);
    tokio::spawn(run_sweeper(Arc::clone(&admission), sweep_interval, sweeper_token));

    // Health server
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let app = operational_router(Arc::clone(&health_state), prometheus_handle);
    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        let server = axum::serve(health_listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    // gRPC server
    let tls = match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => Some(grpc::load_tls_config(cert, key).await.map_err(|e| {
            error!(error = %e, "Failed to load TLS certificate or key");
            e
        })?),
        _ => None,
    };

    let grpc_addr: SocketAddr = config.grpc_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.grpc_bind_address, "Invalid gRPC bind address");
        format!("Invalid gRPC bind address: {e}")
    })?;
    let grpc_listener = tokio::net::TcpListener::bind(grpc_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %grpc_addr, "Failed to bind gRPC server");
            format!("Failed to bind gRPC server to {grpc_addr}: {e}")
        })?;

    let grpc_shutdown_token = shutdown_token.child_token();
    let grpc_task = tokio::spawn(grpc::serve(
        grpc_listener,
        service,
        broker,
        tls,
        async move {
            grpc_shutdown_token.cancelled().await;
            info!("gRPC server shutting down");
        },
    ));
    health_state.set_ready();
    info!(addr = %grpc_addr, "gRPC server started");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    health_state.set_not_ready();
    shutdown_token.cancel();

    match tokio::time::timeout(Duration::from_secs(10), grpc_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "gRPC server failed"),
        Ok(Err(e)) => error!(error = %e, "gRPC server task panicked"),
        Err(_) => error!("gRPC server did not stop within timeout"),
    }

    info!(
        open_connections = registry.total_connections(),
        "Chat service shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
