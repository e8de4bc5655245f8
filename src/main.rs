// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::time::Duration;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_server::{
    api::router,
    auth::TokenService,
    config::{Config, LogFormat},
    providers::WalletProviderClient,
    services::WalletService,
    state::AppState,
    storage::Store,
};

const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Must precede any TLS use, including reqwest's client
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(config.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), ?config, "Starting Parley server");
    if config.jwt_secret_generated {
        tracing::warn!(
            "JWT_SECRET not set; using a random secret, tokens will not survive a restart"
        );
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create data directory {}", config.data_dir.display()))?;
    let store = Store::open(&config.database_path()).context("cannot open database")?;

    let tokens = TokenService::new(&config.jwt_secret, &config.jwt_issuer, config.token_ttl_secs);
    let shutdown = CancellationToken::new();
    let mut state = AppState::new(store, tokens).with_shutdown(shutdown.clone());

    match config.wallet.clone() {
        Some(wallet_config) => {
            let client =
                WalletProviderClient::new(wallet_config).context("invalid wallet provider")?;
            info!(currency = %client.currency(), "Wallet provider configured");
            let accounts = state.accounts.clone();
            state = state.with_wallet(WalletService::new(client, accounts));
        }
        None => info!("Wallet provider not configured; wallet endpoints return 503"),
    }

    let presence = state.presence.clone();
    let app = router(state);

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
            let dropped = presence.clear();
            info!(connections = dropped, "Real-time connections closed");
        });
    }

    match &config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .context("cannot load TLS certificate")?;
            let handle = axum_server::Handle::new();
            {
                let handle = handle.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    shutdown.cancelled().await;
                    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                });
            }

            info!(addr = %config.bind_addr, "Listening on https (docs at /docs)");
            axum_server::bind_rustls(config.bind_addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server failed")?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(config.bind_addr)
                .await
                .with_context(|| format!("cannot bind {}", config.bind_addr))?;

            info!(addr = %config.bind_addr, "Listening on http (docs at /docs)");
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .context("HTTP server failed")?;
        }
    }

    info!("Server stopped");
    Ok(())
}
