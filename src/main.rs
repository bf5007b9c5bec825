// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{error::Error, net::SocketAddr, sync::Arc, time::Duration};

use axum_server::tls_rustls::RustlsConfig;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use estate_guard::{
    api::router,
    auth::{
        mfa::StaticCodeMfaVerifier, password::PasswordVerifier, AuthGateway, AuthSecrets, Stores,
    },
    config::{SecurityConfig, SecuritySettings, ServerConfig, LOG_FORMAT_ENV},
    state::AppState,
    storage::{seed::seed_admin, AuthDatabase},
};

type BoxError = Box<dyn Error + Send + Sync>;

/// Time in-flight requests get to finish once shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BoxError> {
    let config = ServerConfig::from_env()?;
    tracing::info!(?config, "Loaded configuration");

    std::fs::create_dir_all(&config.data_dir)?;
    let db = Arc::new(AuthDatabase::open(&config.database_path())?);
    tracing::info!(path = %config.database_path().display(), "Opened database");

    if let Some(admin) = &config.seed_admin {
        let passwords = PasswordVerifier::new(&config.password_pepper)?;
        seed_admin(db.as_ref(), db.as_ref(), &passwords, admin, Utc::now()).await?;
    }

    let settings = SecuritySettings::new(SecurityConfig::load(db.as_ref()).await);
    tracing::info!(security = ?settings.snapshot().await, "Security tunables loaded");

    let mut gateway = AuthGateway::new(
        Stores::shared(db.clone()),
        AuthSecrets {
            jwt_secret: config.jwt_secret.clone(),
            pepper: config.password_pepper.clone(),
        },
        settings,
    )?
    .with_mfa_issuer(config.mfa_issuer.clone());
    if let Some(code) = &config.mfa_demo_code {
        tracing::warn!("MFA_DEMO_CODE is set: TOTP verification is bypassed");
        gateway = gateway.with_mfa_verifier(Arc::new(StaticCodeMfaVerifier::new(code.clone())));
    }

    let shutdown = CancellationToken::new();
    let state = AppState::new(Arc::new(gateway), db.clone(), db.clone(), db)
        .with_shutdown(shutdown.clone())
        .with_request_timeout(config.request_timeout);
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
            }
            shutdown.cancel();
        }
    });

    let addr = config.bind_addr;
    match &config.tls {
        Some((cert, key)) => {
            if rustls::crypto::ring::default_provider()
                .install_default()
                .is_err()
            {
                tracing::debug!("rustls crypto provider already installed");
            }
            let tls_config = RustlsConfig::from_pem_file(cert, key).await?;

            let handle = axum_server::Handle::new();
            tokio::spawn({
                let handle = handle.clone();
                let shutdown = shutdown.clone();
                async move {
                    shutdown.cancelled().await;
                    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                }
            });

            tracing::info!("Estate Guard listening on https://{addr} (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app)
                .await?;
        }
        None => {
            tracing::warn!("TLS_CERT_PATH not set; serving plain HTTP");
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!("Estate Guard listening on http://{addr} (docs at /docs)");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await?;
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}
