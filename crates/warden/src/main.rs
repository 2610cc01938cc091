//! # Warden - Telegram group gatekeeper
//!
//! Challenges new members with a captcha before they may post, enforces
//! timed mutes, and serves moderator commands.
//!
//! ## Architecture
//! ```text
//! Telegram → Dispatcher → Gate / Mutes / Moderator → Platform
//!                               ↓
//!                       Store (Redis) + Scheduler
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teloxide::dptree;
use teloxide::prelude::*;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use warden_common::UserId;

mod audit;
mod captcha;
mod clock;
mod config;
mod dispatch;
mod gate;
mod moderation;
mod platform;
mod routes;
mod scheduler;
mod state;
mod store;

#[cfg(test)]
mod testing;

use crate::config::{AppConfig, ConfigHandle};
use platform::{Platform, TelegramPlatform};
use state::AppState;

/// Warden - join gate and moderation bot
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path, also where /config changes are saved
    #[arg(short, long, default_value = "config/warden.toml")]
    config: String,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    token: String,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Status listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Keep state in memory instead of Redis
    #[arg(long, default_value = "false")]
    memory_store: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting Warden v{}", env!("CARGO_PKG_VERSION"));

    let app_config = AppConfig::load(&args.config, &args)?;
    info!(path = %args.config, "Configuration loaded");

    let store = store::connect(app_config.store, &app_config.redis_url)
        .await
        .context("Failed to open store")?;
    info!(backend = store.backend_name(), "Store connected");

    let bot = Bot::new(&args.token);
    let me = bot
        .get_me()
        .await
        .context("Failed to reach the Telegram Bot API")?;
    let bot_username = me.user.username.clone().unwrap_or_else(|| "bot".into());
    info!(username = %bot_username, "Authorized");

    let listen_addr = app_config.listen_addr.clone();
    let sweep_interval = Duration::from_secs(app_config.gate.sweep_interval_secs);

    let config = ConfigHandle::spawn(app_config, Some(PathBuf::from(&args.config)));
    let platform: Arc<dyn Platform> = Arc::new(TelegramPlatform::new(bot.clone()));
    let state = AppState::new(
        config,
        store,
        platform,
        UserId(me.user.id.0 as i64),
        &bot_username,
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Subscribe before the startup sweep so its outcomes are counted
    tokio::spawn(audit::audit_worker(
        state.stats.clone(),
        state.gate.subscribe(),
        shutdown_tx.subscribe(),
    ));

    state.sweep().await;
    tokio::spawn(sweeper_worker(
        state.clone(),
        sweep_interval,
        shutdown_tx.subscribe(),
    ));

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind {listen_addr}"))?;
    info!("Status endpoints listening on {}", listen_addr);

    let app = routes::create_router(state.clone());
    let mut server_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
    });

    info!("Start polling as @{}", bot_username);

    Dispatcher::builder(bot, dispatch::schema())
        .dependencies(dptree::deps![state.clone(), me])
        .distribution_function(|_| None::<std::convert::Infallible>)
        .default_handler(|_| async {})
        .error_handler(LoggingErrorHandler::with_custom_text("Dispatcher error"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
    state.scheduler.abort_all();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Status server error"),
        Err(e) => warn!(error = %e, "Status server task failed"),
    }

    info!("Warden shutdown complete");
    Ok(())
}

/// Periodic recovery sweep, until shutdown
async fn sweeper_worker(
    state: AppState,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => state.sweep().await,
            _ = shutdown.recv() => {
                tracing::debug!("Sweeper shutting down");
                break;
            }
        }
    }
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
