//! edgeship coordinator entry point.
//!
//! Initialises tracing, loads configuration from `EDGESHIP_*` environment
//! variables, connects the state store and the bus, starts the bus
//! consumers and serves the HTTP ingress.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use axum_server::tls_rustls::RustlsConfig;
use edgeship_common::timing::HEARTBEAT_TIMEOUT;
use edgeship_common::valkey::{self, ValkeyBus};
use tracing_subscriber::EnvFilter;

use edgeship_coordinator::api::{self, ApiState};
use edgeship_coordinator::config::Config;
use edgeship_coordinator::forwarder::LogForwarder;
use edgeship_coordinator::ingest::{self, Ingest};
use edgeship_coordinator::store::ValkeyStore;
use edgeship_coordinator::watchdog::HeartbeatWatchdog;

#[tokio::main]
async fn main() -> Result<()> {
    valkey::install_crypto_provider();

    // 1. Initialise tracing with RUST_LOG env filter.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edgeship-coordinator starting");

    // 2. Configuration.
    let config = Config::from_env()?;
    let settings = config.valkey_settings()?;

    let forwarder = match &config.forwarder_config {
        Some(yaml) => {
            let forwarder = LogForwarder::from_yaml(yaml).context("unmarshalling log forwarder config")?;
            tracing::info!(repos = forwarder.len(), "log forwarding enabled");
            Some(Arc::new(forwarder))
        }
        None => None,
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        valkey = ?settings,
        tls_enabled = config.tls_cert.is_some(),
        "configuration loaded",
    );

    // 3. Store and bus connections, both verified with PING.
    let store = Arc::new(ValkeyStore::new(
        valkey::connect(&settings)
            .await
            .context("failed to initialise Valkey store connection")?,
    ));
    let bus = Arc::new(
        ValkeyBus::connect(&settings)
            .await
            .context("failed to initialise Valkey bus connection")?,
    );

    // 4. Bus consumers.
    let watchdog = Arc::new(HeartbeatWatchdog::new(HEARTBEAT_TIMEOUT));
    let ingest = Arc::new(Ingest::new(store.clone(), watchdog, forwarder));
    let _consumers = ingest::spawn(bus.as_ref(), ingest)
        .await
        .context("failed to subscribe to coordinator topics")?;

    // 5. HTTP ingress.
    let router = api::router(Arc::new(ApiState {
        store,
        bus: bus.clone(),
        api_key: config.api_key.clone(),
    }));

    let addr: std::net::SocketAddr = config
        .listen_addr
        .parse()
        .context("invalid listen address")?;

    let server = async {
        if let (Some(cert_path), Some(key_path)) = (&config.tls_cert, &config.tls_key) {
            tracing::info!("TLS enabled, loading cert from {}", cert_path);
            let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .context("failed to load TLS certificates")?;

            let handle = axum_server::Handle::new();
            let on_signal = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                on_signal.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });

            tracing::info!("coordinator ready on https://{}", config.listen_addr);
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(router.into_make_service())
                .await
                .context("HTTPS server error")
        } else {
            tracing::info!("coordinator ready on http://{} (TLS disabled)", config.listen_addr);
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .context("failed to bind TCP listener")?;
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("HTTP server error")
        }
    };

    // 6. Run until shutdown; losing the bus is fatal.
    tokio::select! {
        result = server => result?,
        reason = bus.connection_lost() => {
            tracing::error!(%reason, "lost connection to the message bus");
            bail!("message bus connection lost: {reason}");
        }
    }

    bus.quit().await;
    tracing::info!("edgeship-coordinator shut down");
    Ok(())
}

/// In-flight HTTPS requests get this long to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Wait for SIGINT (Ctrl-C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
