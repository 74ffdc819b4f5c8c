//! Signaling Controller
//!
//! Signaling coordination service for real-time game sessions.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Redis connection (`SignalingStore`)
//! 3. Initialize the relay with the store
//! 4. Spawn the periodic sweep task (idle sessions + user-index cleanup)
//! 5. Wait for shutdown signal
//!
//! The TCP gateway that feeds inbound messages to the relay (and delivers
//! its fan-out decisions) lives outside this crate; the relay itself never
//! touches sockets.

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use common::secret::ExposeSecret;
use signaling_controller::config::Config;
use signaling_controller::relay::SignalingRelay;
use signaling_controller::store::SignalingStore;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signaling_controller=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Signaling Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        sc_id = %config.sc_id,
        session_ttl_seconds = config.session_ttl_seconds,
        message_ttl_seconds = config.message_ttl_seconds,
        default_max_participants = config.default_max_participants,
        idle_timeout_minutes = config.idle_timeout_minutes,
        sweep_interval_seconds = config.sweep_interval_seconds,
        "Configuration loaded successfully"
    );

    // Initialize Redis connection (MUST succeed - fail startup if it doesn't)
    info!("Connecting to Redis...");
    let store = SignalingStore::new(config.redis_url.expose_secret())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to Redis");
            e
        })?
        .with_ttls(config.session_ttl_seconds, config.message_ttl_seconds);
    info!("Redis connection established");

    let relay = Arc::new(SignalingRelay::with_store(store.clone()));
    info!("Relay initialized");

    let shutdown_token = CancellationToken::new();

    // Spawn periodic sweep task (idle session reclaim + user-index cleanup)
    let sweep_token = shutdown_token.child_token();
    let sweep_relay = Arc::clone(&relay);
    let sweep_store = store.clone();
    let idle = chrono::Duration::minutes(config.idle_timeout_minutes);
    let sweep_interval = Duration::from_secs(config.sweep_interval_seconds);
    tokio::spawn(async move {
        run_sweep_task(sweep_relay, sweep_store, idle, sweep_interval, sweep_token).await;
    });
    info!("Sweep task started");

    // Wait for shutdown signal
    info!("Signaling Controller running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    shutdown_token.cancel();

    // Give tasks time to shut down
    tokio::time::sleep(Duration::from_secs(1)).await;

    info!("Signaling Controller shutdown complete");
    Ok(())
}

/// Periodic sweep: end idle sessions and reclaim orphaned user-index sets.
///
/// Primary key expiry is TTL-driven in Redis; this task covers the two cases
/// TTL cannot: live in-memory sessions that went idle, and index sets whose
/// session blobs expired underneath them. It never exits on store errors -
/// a missed sweep is retried on the next tick.
async fn run_sweep_task(
    relay: Arc<SignalingRelay>,
    store: SignalingStore,
    idle: chrono::Duration,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(
        interval_secs = interval.as_secs(),
        idle_minutes = idle.num_minutes(),
        "Sweep task: Entering loop"
    );

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Sweep task: Shutting down");
                break;
            }
            _ = ticker.tick() => {
                let result = relay.sweep_idle(idle).await;
                if !result.outbound.is_empty() {
                    info!(
                        ended = result.outbound.len(),
                        "Sweep task: Ended idle sessions"
                    );
                }

                match store.cleanup_user_index().await {
                    Ok(removed) if removed > 0 => {
                        info!(removed = removed, "Sweep task: Cleaned stale user index entries");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Sweep task: User index cleanup failed, will retry");
                    }
                }
            }
        }
    }

    info!("Sweep task: Stopped");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
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
