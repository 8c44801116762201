// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stoa_auth_gateway::keystore::KeyStore;
use stoa_auth_gateway::metrics::Metrics;
use stoa_auth_gateway::tenant::{RegistryContext, TenantAuthRegistry};
use stoa_auth_gateway::{build_router, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config);

    tracing::info!(
        host = %config.host,
        port = config.port,
        keystore = %config.keystore_path.display(),
        tenants_file = %config.tenants_file.display(),
        "starting stoa-auth-gateway"
    );

    let password = config
        .keystore_password
        .as_ref()
        .context("KEYSTORE_PASSWORD must be set")?;
    let keys = Arc::new(
        KeyStore::open(&config.keystore_path, password)
            .with_context(|| format!("opening key store {}", config.keystore_path.display()))?,
    );

    let metrics = Metrics::new()?;
    let http_client = reqwest::Client::builder()
        .timeout(config.metadata_timeout())
        .build()?;

    let registry = TenantAuthRegistry::from_file(
        &config.tenants_file,
        &RegistryContext {
            keys,
            public_base_url: config.public_base_url.clone(),
            http_client,
            metrics: Some(metrics.clone()),
        },
    )?;
    if registry.is_empty() {
        tracing::warn!("no tenants configured, every tenant request will be rejected");
    }

    if config.prefetch_metadata {
        prefetch_metadata(&registry).await;
    }

    let state = AppState::new(registry, metrics);
    let health = state.health.clone();
    let app = build_router(state);

    // Create TCP listener
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "listening for connections");

    // Spawn graceful shutdown handler
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, initiating graceful shutdown");

        // Readiness probe answers 503 from here on
        health.mark_shutting_down();

        let _ = shutdown_tx_clone.send(());

        // Give some time for in-flight requests to complete
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let mut rx = shutdown_tx.subscribe();
            let _ = rx.recv().await;
        })
        .await?;

    tracing::info!("stoa-auth-gateway stopped");
    Ok(())
}

/// Resolve IdP metadata for every federated tenant. Failures are logged and
/// retried on first use.
async fn prefetch_metadata(registry: &TenantAuthRegistry) {
    for config in registry.tenants() {
        let Some(federation) = &config.federation else {
            continue;
        };
        match federation.identity_provider().await {
            Ok(idp) => tracing::info!(tenant = %config.tenant_id, idp = %idp.entity_id, "IdP metadata prefetched"),
            Err(e) => tracing::warn!(tenant = %config.tenant_id, error = %e, "IdP metadata prefetch failed"),
        }
    }
}

/// Initialize tracing based on configuration.
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
