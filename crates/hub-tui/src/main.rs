mod action;
mod app;
mod app_state;
mod component;
mod components;
mod controller;
mod mpv;
mod playback;
mod theme;
mod widgets;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{broadcast, mpsc};

use hub_proto::api::{HttpApi, HubApi};
use hub_proto::config::{Config, BACKEND_URL_ENV};
use hub_proto::session::{Intent, SessionState};

use crate::controller::{BroadcastMessage, Controller, ControllerEvent, SessionStore};
use crate::mpv::MpvOutput;
use crate::playback::{PlaybackCommand, PlaybackSession};

/// Terminal client for the Global Music Hub: browse radio stations, listen,
/// and leave comments.
#[derive(Parser, Debug)]
#[command(name = "music-hub", version)]
struct Args {
    /// Backend base URL (overrides config and $MUSIC_HUB_BACKEND_URL)
    #[arg(long)]
    backend_url: Option<String>,

    /// Display name used when posting comments
    #[arg(long)]
    author: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = hub_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("music-hub.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; default to debug for app code but suppress noisy
    // connection-level DEBUG from HTTP client internals (hyper_util, reqwest).
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("music-hub log: {}", log_path.display());
    tracing::info!("music-hub starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("config: using defaults ({})", e);
        let mut config = Config::default();
        config.apply_env_override(std::env::var(BACKEND_URL_ENV).ok());
        config
    });
    if let Some(url) = args.backend_url {
        config.api.base_url = url;
    }
    let author = args.author.unwrap_or_else(|| config.user.display_name.clone());
    tracing::info!("backend: {}", config.api.base_url);

    let api: Arc<dyn HubApi> = Arc::new(HttpApi::new(&config.api.base_url)?);

    // ── Channels ─────────────────────────────────────────────────────────────
    let (broadcast_tx, broadcast_rx) = broadcast::channel::<BroadcastMessage>(1024);
    let (event_tx, event_rx) = mpsc::channel::<ControllerEvent>(1024);
    let (playback_tx, playback_rx) = mpsc::channel::<PlaybackCommand>(64);

    // ── Playback session ─────────────────────────────────────────────────────
    let session = PlaybackSession::new(
        MpvOutput::new(config.playback.default_volume),
        Duration::from_secs(config.playback.start_timeout_secs),
    );
    let playback_task = tokio::spawn(session.run(playback_rx, event_tx.clone()));

    // ── Controller ───────────────────────────────────────────────────────────
    let initial = SessionState::new(author, config.api.station_limit);
    let store = Arc::new(SessionStore::new(initial.clone()));
    let controller = Controller::new(
        Arc::clone(&store),
        api,
        playback_tx,
        event_tx.clone(),
        broadcast_tx.clone(),
    );
    let controller_task = tokio::spawn(controller.run(event_rx));

    event_tx
        .send(ControllerEvent::Intent(Intent::Startup))
        .await
        .map_err(|_| anyhow::anyhow!("controller exited before startup"))?;

    // ── Run TUI ──────────────────────────────────────────────────────────────
    let shutdown_tx = event_tx.clone();
    let app = app::App::new(store, initial, event_tx);
    let result = app.run(broadcast_rx).await;
    let _ = shutdown_tx.send(ControllerEvent::Shutdown).await;

    if let Err(e) = controller_task.await {
        tracing::error!("controller task failed: {}", e);
    }
    if let Err(e) = playback_task.await {
        tracing::error!("playback task failed: {}", e);
    }
    tracing::info!("music-hub exiting");
    result
}
