//! # Keystone Demo Binary
//!
//! Boots a runtime with the sample game services, plays one scripted
//! session through the bus and then ticks until Ctrl+C.
//!
//! ## Configuration
//!
//! - first CLI argument or `KEYSTONE_CONFIG`: path to a TOML config file
//! - `KEYSTONE_*` variables override individual values (see `config.rs`)
//! - `KEYSTONE_LOG_LEVEL` / `RUST_LOG`, `KEYSTONE_JSON_LOGS`: logging

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use keystone_bus::{Event, EventKind};
use keystone_runtime::wiring::{
    register_game_services, subscribe_game_handlers, ProgressionTracker, Wallet, GOLD,
};
use keystone_runtime::{KeystoneRuntime, RuntimeConfig};
use keystone_telemetry::{encode_metrics, init_telemetry, log_event, TelemetryConfig};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Simulated warm-up of the analytics backend.
const ANALYTICS_WARMUP: Duration = Duration::from_millis(250);

fn config_path() -> Option<PathBuf> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("KEYSTONE_CONFIG").ok())
        .map(PathBuf::from)
}

/// One scripted play session.
async fn play_demo_session(runtime: &KeystoneRuntime) -> Result<()> {
    let container = runtime.container();
    let bus = runtime.bus();
    let progression = container.resolve::<ProgressionTracker>()?;
    let wallet = container.resolve::<dyn Wallet>()?;

    let player = "player-1";
    let session_id = Uuid::new_v4();
    bus.publish_async(Event::SessionStarted {
        player_id: player.to_string(),
        session_id,
    })?;

    let level = progression.grant_experience(player, 2_400)?;
    info!(player, level, "Granted starting experience");

    let price = 150;
    let balance = wallet.debit(player, GOLD, price)?;
    bus.publish(Event::ItemPurchased {
        player_id: player.to_string(),
        item_id: "sword-of-dawn".to_string(),
        currency: GOLD.to_string(),
        price: price.unsigned_abs(),
    })?;
    info!(player, balance, "Bought an item");

    // Give the scheduler a few ticks to run async handlers.
    tokio::time::sleep(runtime.config().scheduler.tick_interval() * 4).await;

    bus.publish_async(Event::SessionEnded {
        player_id: player.to_string(),
        session_id,
        duration_secs: 42,
    })?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::for_service("keystone");
    let _telemetry = init_telemetry(&telemetry).context("Failed to initialize telemetry")?;

    let config = RuntimeConfig::load(config_path().as_deref()).context("Failed to load configuration")?;
    let runtime = Arc::new(KeystoneRuntime::new(config).context("Invalid runtime configuration")?);

    register_game_services(&runtime.container(), ANALYTICS_WARMUP);
    let order = runtime.start().context("Service initialization failed")?;
    for (position, key) in order.iter().enumerate() {
        debug!("  {}. {}", position + 1, key);
    }
    subscribe_game_handlers(&runtime.bus(), &runtime.container())?;

    runtime.bus().on_handler_error(|failure| {
        log_event!(
            warn,
            "bus",
            "Handler failed",
            event = %failure.kind,
            handler_id = %failure.handler_id,
            error = %failure.error
        );
    });

    let scheduler = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.run().await })
    };

    play_demo_session(&runtime).await?;
    let level_ups = runtime.bus().statistics(EventKind::LevelUp);
    info!(
        published = level_ups.published,
        async_completed = level_ups.async_completed,
        "LevelUp statistics"
    );

    info!("Runtime is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.request_shutdown();
    let ticks = scheduler.await.context("Scheduler task failed")?;
    info!(ticks, "Scheduler stopped");

    match encode_metrics() {
        Ok(metrics) => debug!("Prometheus metrics:\n{}", metrics),
        Err(err) => warn!("Failed to encode metrics: {}", err),
    }
    let status = serde_json::to_string_pretty(&runtime.status())?;
    info!("Final status:\n{}", status);

    runtime.shutdown();
    Ok(())
}
