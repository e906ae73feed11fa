//! Valkey connection setup and the pub/sub implementation of [`MessageBus`].

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fred::prelude::*;
use fred::types::config::{TlsConfig, TlsConnector, TlsHostMapping};
use tokio::sync::{broadcast, mpsc};

use crate::bus::{BusError, MessageBus, SUBSCRIPTION_QUEUE, Subscription};
use crate::config::ValkeySettings;

/// Install ring as the process-wide rustls provider. Safe to call twice.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn load_root_store(ca_path: &Path) -> Result<rustls::RootCertStore> {
    let ca_file = File::open(ca_path)
        .with_context(|| format!("failed to open CA cert: {}", ca_path.display()))?;
    let mut ca_reader = BufReader::new(ca_file);
    let ca_certs = rustls_pemfile::certs(&mut ca_reader)
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse CA cert")?;

    let mut root_store = rustls::RootCertStore::empty();
    for cert in ca_certs {
        root_store
            .add(cert)
            .context("failed to add CA cert to root store")?;
    }
    Ok(root_store)
}

fn client_config(settings: &ValkeySettings) -> Result<Config> {
    let mut config = Config::from_url(&settings.url)
        .with_context(|| format!("invalid Valkey URL: {}", settings.url))?;

    if let Some(ca_path) = &settings.ca_path {
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(load_root_store(ca_path)?)
            .with_no_client_auth();
        config.tls = Some(TlsConfig {
            connector: TlsConnector::Rustls(Arc::new(tls_config).into()),
            hostnames: TlsHostMapping::None,
        });
    }
    if settings.user.is_some() {
        config.username.clone_from(&settings.user);
    }
    if settings.password.is_some() {
        config.password.clone_from(&settings.password);
    }
    Ok(config)
}

/// Build a client, connect it and verify the connection with PING.
pub async fn connect(settings: &ValkeySettings) -> Result<Client> {
    let config = client_config(settings)?;

    let client = Builder::from_config(config)
        .with_connection_config(|conn_config| {
            conn_config.connection_timeout = Duration::from_secs(5);
            conn_config.internal_command_timeout = Duration::from_secs(10);
        })
        .set_policy(ReconnectPolicy::new_exponential(0, 100, 5000, 5))
        .build()
        .context("failed to build Valkey client")?;

    client
        .init()
        .await
        .context("failed to connect to Valkey")?;

    client
        .ping::<String>(None)
        .await
        .context("Valkey startup PING failed")?;

    tracing::info!(
        url = %settings.url,
        tls = settings.tls_requested(),
        "Valkey connection ready"
    );
    Ok(client)
}

/// Pub/sub bus over Valkey channels.
///
/// A connection in subscriber mode cannot publish, so publishing and
/// subscribing use separate connections.
#[derive(Clone)]
pub struct ValkeyBus {
    publisher: Client,
    subscriber: Client,
}

impl ValkeyBus {
    pub async fn connect(settings: &ValkeySettings) -> Result<Self> {
        let publisher = connect(settings).await?;
        let subscriber = publisher.clone_new();
        subscriber
            .init()
            .await
            .context("failed to open Valkey subscriber connection")?;
        Ok(Self {
            publisher,
            subscriber,
        })
    }

    /// Resolves when either connection reports an error. Subscriptions are
    /// not restored after a reconnect, so callers treat this as fatal.
    pub async fn connection_lost(&self) -> String {
        let mut publisher_errors = self.publisher.error_rx();
        let mut subscriber_errors = self.subscriber.error_rx();
        let event = tokio::select! {
            e = publisher_errors.recv() => e,
            e = subscriber_errors.recv() => e,
        };
        match event {
            Ok(err) => format!("{err:?}"),
            Err(e) => format!("error channel closed: {e}"),
        }
    }

    pub async fn quit(&self) {
        if let Err(e) = self.subscriber.quit().await {
            tracing::debug!(error = %e, "subscriber quit failed");
        }
        if let Err(e) = self.publisher.quit().await {
            tracing::debug!(error = %e, "publisher quit failed");
        }
    }
}

#[async_trait]
impl MessageBus for ValkeyBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        self.publisher
            .publish::<(), _, _>(topic, payload)
            .await
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        // Take the receiver before subscribing so no early message is missed.
        let mut messages = self.subscriber.message_rx();
        self.subscriber
            .subscribe(topic)
            .await
            .map_err(|e| BusError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_QUEUE);
        let channel = topic.to_string();
        tokio::spawn(async move {
            loop {
                match messages.recv().await {
                    Ok(message) => {
                        if &*message.channel != channel.as_str() {
                            continue;
                        }
                        let Some(payload) = message.value.as_string() else {
                            tracing::warn!(topic = %channel, "dropping non-text pub/sub payload");
                            continue;
                        };
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(topic = %channel, skipped, "subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!(topic = %channel, "subscription task finished");
        });

        tracing::info!(topic, "subscribed");
        Ok(Subscription::new(topic, rx))
    }
}
