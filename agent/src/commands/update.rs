//! Update command: the long-running agent process.
//!
//! Steps:
//! 1. Read the self-update marker, before any connection exists
//! 2. Connect to the bus, verified with PING
//! 3. Report a finished self-update, if any
//! 4. Start the consumer, heartbeat and log-forwarding tasks
//! 5. Run until a shutdown signal or the bus connection is lost

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use edgeship_common::MessageBus;
use edgeship_common::valkey::ValkeyBus;

use crate::app::AppContext;
use crate::application::services::daemon::{self, Agent};
use crate::application::services::self_update;

/// Run the agent until shutdown.
///
/// # Errors
///
/// Returns an error if the bus cannot be reached or the connection is lost.
pub async fn run(ctx: &AppContext) -> Result<()> {
    let deployer = Arc::clone(&ctx.deployer);
    let pending = self_update::take_pending(ctx.fs.as_ref(), deployer.paths()).await;

    let settings = ctx.config.valkey_settings();
    tracing::info!(
        host = %ctx.host,
        valkey = ?settings,
        transient = ctx.config.inventory_transient,
        "agent starting"
    );
    let bus = Arc::new(
        ValkeyBus::connect(&settings)
            .await
            .context("failed to initialise Valkey bus connection")?,
    );

    if let Some(pending) = pending {
        self_update::resume(
            bus.as_ref(),
            ctx.fs.as_ref(),
            deployer.paths(),
            &ctx.host,
            deployer.self_app(),
            &pending,
        )
        .await;
    }

    let agent = Arc::new(Agent::new(
        &ctx.host,
        ctx.config.inventory_transient,
        deployer,
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        ctx.journal(),
    ));
    let _tasks = daemon::spawn(agent)
        .await
        .context("failed to subscribe to agent topics")?;
    tracing::info!(host = %ctx.host, "agent ready");

    tokio::select! {
        () = shutdown_signal() => {}
        reason = bus.connection_lost() => {
            tracing::error!(%reason, "lost connection to the message bus");
            bail!("message bus connection lost: {reason}");
        }
    }

    bus.quit().await;
    tracing::info!("agent shut down");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = terminate => {}
        () = interrupt => {}
    }
    tracing::info!("received shutdown signal");
}
