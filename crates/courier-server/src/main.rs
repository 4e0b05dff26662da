//! courier-server - management API binary.

use std::net::SocketAddr;

use courier_core::{CourierConfig, DeliveryRuntime};
use courier_server::{create_server, create_server_with_auth, AppState};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::from_default_env()
        .add_directive(Level::INFO.into())
        .add_directive("courier_server=debug".parse()?);

    let json = std::env::var("COURIER_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;

    let host = std::env::var("COURIER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("COURIER_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;
    let require_auth = std::env::var("COURIER_API_KEY")
        .map(|k| !k.is_empty())
        .unwrap_or(false);

    // A config file, if given, is the base; environment overrides on top
    let config = match std::env::var("COURIER_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration file");
            CourierConfig::from_file(&path)?.with_env_overrides()?
        }
        Err(_) => CourierConfig::from_env()?,
    };

    let mut runtime = DeliveryRuntime::new(config).await?;
    runtime.start().await?;
    info!("Delivery runtime started (worker + backfill)");

    let state = AppState::new(runtime);

    let app = if require_auth {
        info!("Authentication enabled");
        create_server_with_auth(state.clone())
    } else {
        info!("Authentication disabled");
        create_server(state.clone())
    };

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting courier-server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("Shutdown signal received, stopping delivery runtime...");
        })
        .await?;

    if let Some(mut runtime) = state.take_runtime().await {
        runtime.shutdown().await?;
    }

    info!("Server stopped cleanly");
    Ok(())
}
