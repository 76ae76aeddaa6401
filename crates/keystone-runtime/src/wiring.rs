//! # Game Service Wiring
//!
//! Sample services that show how a game backend plugs into the runtime.
//!
//! ```text
//!                ┌────────────────────┐
//!                │  dyn EventPublisher │ (the bus, registered by the runtime)
//!                └─────────┬──────────┘
//!             ┌────────────┴────────────┐
//!             ▼                         ▼
//!     ┌──────────────┐         ┌───────────────────┐
//!     │  dyn Wallet  │◄────────│ ProgressionTracker │
//!     │ (LedgerWallet)│         └───────────────────┘
//!     └──────────────┘
//!
//!     ┌───────────────────┐   CurrencyChanged (sync)
//!     │ AnalyticsRecorder │◄── LevelUp (async)
//!     └───────────────────┘
//! ```
//!
//! Services never hold the bus itself, only `Arc<dyn EventPublisher>`.

use async_trait::async_trait;
use keystone_bus::{BusError, Event, EventBus, EventKind, EventPublisher, HandlerError, HandlerId};
use keystone_types::{ContainerError, Service, ServiceError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::container::{Constructed, Registration, ServiceContainer};

/// Experience needed per level.
pub const XP_PER_LEVEL: u64 = 1000;

/// Gold granted per level reached.
pub const LEVEL_REWARD_GOLD: i64 = 100;

pub const GOLD: &str = "gold";

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Insufficient {currency}: need {needed}, have {available}")]
    InsufficientFunds {
        currency: String,
        needed: i64,
        available: i64,
    },

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error(transparent)]
    Publish(#[from] BusError),
}

/// Player balances by currency.
pub trait Wallet: Send + Sync {
    fn balance(&self, player_id: &str, currency: &str) -> i64;

    /// Add funds, returning the new balance.
    fn credit(&self, player_id: &str, currency: &str, amount: i64) -> Result<i64, WalletError>;

    /// Remove funds, returning the new balance.
    fn debit(&self, player_id: &str, currency: &str, amount: i64) -> Result<i64, WalletError>;
}

// =============================================================================
// WALLET
// =============================================================================

/// In-memory wallet that announces every balance change.
pub struct LedgerWallet {
    balances: RwLock<HashMap<(String, String), i64>>,
    publisher: Arc<dyn EventPublisher>,
}

impl LedgerWallet {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            publisher,
        }
    }

    fn apply(&self, player_id: &str, currency: &str, delta: i64) -> Result<i64, WalletError> {
        let balance = {
            let mut balances = self.balances.write();
            let entry = balances
                .entry((player_id.to_string(), currency.to_string()))
                .or_insert(0);
            if *entry + delta < 0 {
                return Err(WalletError::InsufficientFunds {
                    currency: currency.to_string(),
                    needed: -delta,
                    available: *entry,
                });
            }
            *entry += delta;
            *entry
        };

        self.publisher.publish(Event::CurrencyChanged {
            player_id: player_id.to_string(),
            currency: currency.to_string(),
            delta,
            balance,
        })?;
        Ok(balance)
    }
}

impl Wallet for LedgerWallet {
    fn balance(&self, player_id: &str, currency: &str) -> i64 {
        self.balances
            .read()
            .get(&(player_id.to_string(), currency.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn credit(&self, player_id: &str, currency: &str, amount: i64) -> Result<i64, WalletError> {
        if amount <= 0 {
            return Err(WalletError::InvalidAmount(amount));
        }
        self.apply(player_id, currency, amount)
    }

    fn debit(&self, player_id: &str, currency: &str, amount: i64) -> Result<i64, WalletError> {
        if amount <= 0 {
            return Err(WalletError::InvalidAmount(amount));
        }
        self.apply(player_id, currency, -amount)
    }
}

impl Service for LedgerWallet {
    fn name(&self) -> &'static str {
        "LedgerWallet"
    }

    fn dispose(&self) {
        let accounts = self.balances.read().len();
        debug!("[Wallet] Disposing ledger with {} accounts", accounts);
    }
}

// =============================================================================
// PROGRESSION
// =============================================================================

/// Tracks experience, levels players up and pays level rewards.
pub struct ProgressionTracker {
    experience: RwLock<HashMap<String, u64>>,
    wallet: Arc<dyn Wallet>,
    publisher: Arc<dyn EventPublisher>,
}

impl ProgressionTracker {
    pub fn new(wallet: Arc<dyn Wallet>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            experience: RwLock::new(HashMap::new()),
            wallet,
            publisher,
        }
    }

    #[must_use]
    pub fn level_for(total: u64) -> u32 {
        u32::try_from(total / XP_PER_LEVEL).unwrap_or(u32::MAX).saturating_add(1)
    }

    #[must_use]
    pub fn level(&self, player_id: &str) -> u32 {
        Self::level_for(self.experience.read().get(player_id).copied().unwrap_or(0))
    }

    /// Add experience. Returns the player's level afterwards.
    pub fn grant_experience(&self, player_id: &str, amount: u64) -> Result<u32, WalletError> {
        let (before, total) = {
            let mut experience = self.experience.write();
            let total = experience.entry(player_id.to_string()).or_insert(0);
            let before = *total;
            *total = total.saturating_add(amount);
            (before, *total)
        };

        self.publisher.publish(Event::ExperienceGained {
            player_id: player_id.to_string(),
            amount,
            total,
        })?;

        let old_level = Self::level_for(before);
        let new_level = Self::level_for(total);
        for level in (old_level + 1)..=new_level {
            self.publisher.publish(Event::LevelUp {
                player_id: player_id.to_string(),
                level,
            })?;
            self.wallet
                .credit(player_id, GOLD, LEVEL_REWARD_GOLD * i64::from(level))?;
        }
        Ok(new_level)
    }
}

impl Service for ProgressionTracker {
    fn name(&self) -> &'static str {
        "ProgressionTracker"
    }
}

// =============================================================================
// ANALYTICS
// =============================================================================

/// Collects analytics records. Reports unhealthy until its async warm-up
/// has finished.
pub struct AnalyticsRecorder {
    records: Mutex<Vec<Event>>,
    ready: AtomicBool,
    warmup: Duration,
}

impl AnalyticsRecorder {
    pub fn new(warmup: Duration) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            ready: AtomicBool::new(false),
            warmup,
        }
    }

    pub fn record(&self, name: &str, properties: serde_json::Value) {
        self.records.lock().push(Event::AnalyticsTracked {
            name: name.to_string(),
            properties,
        });
    }

    #[must_use]
    pub fn records(&self) -> Vec<Event> {
        self.records.lock().clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Service for AnalyticsRecorder {
    fn name(&self) -> &'static str {
        "AnalyticsRecorder"
    }

    fn has_async_initializer(&self) -> bool {
        true
    }

    async fn initialize_async(&self) -> Result<(), ServiceError> {
        tokio::time::sleep(self.warmup).await;
        self.ready.store(true, Ordering::Release);
        info!("[Analytics] Warm-up complete");
        Ok(())
    }

    fn health_check(&self) -> Result<(), ServiceError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(ServiceError::Unhealthy("warm-up in progress".into()))
        }
    }

    fn dispose(&self) {
        debug!("[Analytics] Dropping {} records", self.records.lock().len());
    }
}

// =============================================================================
// WIRING
// =============================================================================

/// Register the sample services. Requires `dyn EventPublisher` to be
/// registered, which the runtime does on creation.
pub fn register_game_services(container: &ServiceContainer, analytics_warmup: Duration) {
    container.register(
        Registration::<dyn Wallet>::singleton(|deps| {
            let wallet = Arc::new(LedgerWallet::new(deps.get::<dyn EventPublisher>()?));
            Ok(Constructed::new(wallet.clone() as Arc<dyn Wallet>, wallet))
        })
        .depends_on::<dyn EventPublisher>()
        .implemented_by::<LedgerWallet>()
        .priority(10),
    );

    container.register(
        Registration::<ProgressionTracker>::singleton(|deps| {
            Ok(Constructed::service(Arc::new(ProgressionTracker::new(
                deps.get::<dyn Wallet>()?,
                deps.get::<dyn EventPublisher>()?,
            ))))
        })
        .depends_on::<dyn Wallet>()
        .depends_on::<dyn EventPublisher>()
        .priority(20),
    );

    container.register(
        Registration::<AnalyticsRecorder>::singleton(move |_| {
            Ok(Constructed::service(Arc::new(AnalyticsRecorder::new(
                analytics_warmup,
            ))))
        })
        .priority(30),
    );
}

/// Route game events into the analytics recorder.
pub fn subscribe_game_handlers(
    bus: &EventBus,
    container: &ServiceContainer,
) -> Result<Vec<HandlerId>, ContainerError> {
    let analytics = container.resolve::<AnalyticsRecorder>()?;

    let recorder = analytics.clone();
    let currency = bus.subscribe(EventKind::CurrencyChanged, 100, move |event| {
        let Event::CurrencyChanged {
            player_id,
            currency,
            delta,
            balance,
        } = event
        else {
            return Err(HandlerError::failed("unexpected event"));
        };
        recorder.record(
            "currency_changed",
            serde_json::json!({
                "player_id": player_id,
                "currency": currency,
                "delta": delta,
                "balance": balance,
            }),
        );
        Ok(())
    });

    let recorder = analytics;
    let level_up = bus.subscribe_async(EventKind::LevelUp, 100, None, move |event, token| {
        let recorder = recorder.clone();
        async move {
            if token.is_cancelled() {
                return Err(HandlerError::Cancelled);
            }
            if let Event::LevelUp { player_id, level } = &*event {
                recorder.record(
                    "level_up",
                    serde_json::json!({ "player_id": player_id, "level": level }),
                );
            }
            Ok(())
        }
    });

    info!("[Wiring] Game handlers subscribed");
    Ok(vec![currency, level_up])
}
