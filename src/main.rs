// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, process::ExitCode, sync::Arc, time::Duration};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use portal_auth::{
    api::router,
    audit::metadata::CidrTableLocator,
    bootstrap,
    clock::SystemClock,
    config::AppConfig,
    logging,
    state::AppState,
    storage::Store,
};

/// How often expired sessions are purged.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Grace period for in-flight requests on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(config.log_format);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.insecure_jwt_secret {
        warn!("JWT_SECRET not set, using the development secret");
    }

    let addr = config.bind_addr()?;
    let tls = config.tls.clone();
    let geoip_table = config.geoip_table.clone();

    let store = Store::open(&config.database_path())?;
    info!(path = %config.database_path().display(), "Database opened");

    let mut state = AppState::new(config, store, Arc::new(SystemClock))?;
    if let Some(path) = geoip_table {
        let locator = CidrTableLocator::from_file(&path)?;
        info!(path = %path.display(), blocks = locator.len(), "GeoIP table loaded");
        state = state.with_geo_locator(Arc::new(locator));
    }

    let seed_state = state.clone();
    tokio::task::spawn_blocking(move || bootstrap::run(&seed_state)).await??;

    let shutdown = CancellationToken::new();
    let sweeper = state.sessions.clone().spawn_sweeper(SWEEP_INTERVAL, shutdown.clone());

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    let handle = Handle::new();
    let signal_handle = handle.clone();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.cancel();
        signal_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    match tls {
        Some(paths) => {
            // Install the ring crypto provider for rustls (must be done before any TLS operations)
            if rustls::crypto::ring::default_provider().install_default().is_err() {
                warn!("rustls crypto provider already installed");
            }
            let tls_config = RustlsConfig::from_pem_file(&paths.cert, &paths.key).await?;
            info!(%addr, "Portal auth server listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app)
                .await?;
        }
        None => {
            info!(%addr, "Portal auth server listening on http (docs at /docs)");
            axum_server::bind(addr).handle(handle).serve(app).await?;
        }
    }

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Session sweeper did not stop cleanly");
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C. If the signal cannot be installed it never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
