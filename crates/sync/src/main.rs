//! `casehub-sync` -- headless case synchronizer.
//!
//! Connects to the bot's event stream for one guild, keeps the case cache
//! in sync and logs list and connection changes until Ctrl-C.
//!
//! # Environment variables
//!
//! | Variable                      | Required | Default | Description                          |
//! |-------------------------------|----------|---------|--------------------------------------|
//! | `CASEHUB_API_URL`             | yes      | --      | REST base URL, e.g. `https://bot.example/api` |
//! | `CASEHUB_EVENTS_URL`          | yes      | --      | Event stream URL, e.g. `wss://bot.example/events` |
//! | `CASEHUB_GUILD_ID`            | yes      | --      | Guild to synchronize                 |
//! | `CASEHUB_SESSION_TOKEN`       | no       | --      | Bearer token for API and stream      |
//! | `CASEHUB_RECONNECT_DELAY_MS`  | no       | `5000`  | Fixed delay before reconnecting      |
//! | `CASEHUB_RESYNC_ON_RECONNECT` | no       | `true`  | Refetch after every reconnect        |
//! | `CASEHUB_REQUEST_TIMEOUT_SECS`| no       | `30`    | REST request timeout                 |

use std::sync::Arc;

use casehub_sync::api::CaseApi;
use casehub_sync::client::WsConnector;
use casehub_sync::config::SyncConfig;
use casehub_sync::controller::{ControllerOptions, SyncController};
use casehub_sync::reconnect::ReconnectPolicy;
use casehub_sync::session::SessionStore;
use casehub_sync::stream::EventStreamClient;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "casehub_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SyncConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        guild_id = %config.guild_id,
        api_url = %config.api_url,
        events_url = %config.events_url,
        reconnect_delay_ms = config.reconnect_delay.as_millis() as u64,
        "Starting casehub-sync",
    );

    let session = SessionStore::new(config.session_token.clone());
    let api = CaseApi::new(config.api_url.clone(), session.clone(), config.request_timeout)
    .unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build HTTP client");
        std::process::exit(1);
    });
    let api = Arc::new(api);

    let cancel = CancellationToken::new();
    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();

    let stream = EventStreamClient::new(
        WsConnector::new(config.events_url.clone(), session),
        Arc::clone(&api),
        ReconnectPolicy {
            delay: config.reconnect_delay,
        },
        updates_tx,
        cancel.clone(),
    )
    .spawn();

    let mut controller = SyncController::new(
        api,
        ControllerOptions {
            resync_on_reconnect: config.resync_on_reconnect,
        },
    );
    controller.set_guild(Some(config.guild_id.clone()));

    let mut last_state = controller.connection_state();
    let mut last_total = None;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                break;
            }
            alive = controller.step(&mut updates_rx) => {
                if !alive {
                    break;
                }
            }
        }

        let state = controller.connection_state();
        if state != last_state {
            tracing::info!(?state, "Event stream connection changed");
            last_state = state;
        }

        let list = controller.list();
        if !list.loading && last_total != Some((list.total, list.items.len())) {
            last_total = Some((list.total, list.items.len()));
            tracing::info!(
                total = list.total,
                shown = list.items.len(),
                error = ?list.error,
                selected = ?controller.cache().selected_id(),
                "Case list updated",
            );
        }
    }

    cancel.cancel();
    if let Err(e) = stream.await {
        tracing::warn!(error = %e, "Event stream task ended abnormally");
    }
    tracing::info!("casehub-sync stopped");
}
