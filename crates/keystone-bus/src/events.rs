//! # Keystone Events
//!
//! Defines every event type that flows through the bus. Handlers subscribe by
//! [`EventKind`], the fieldless tag of [`Event`], so dispatch is an exhaustive
//! match instead of a runtime type lookup.

use keystone_types::ServiceStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// All events that can be published to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // =========================================================================
    // ECONOMY
    // =========================================================================
    /// A player's balance in one currency moved.
    CurrencyChanged {
        player_id: String,
        currency: String,
        delta: i64,
        balance: i64,
    },

    /// An item was bought with in-game currency.
    ItemPurchased {
        player_id: String,
        item_id: String,
        currency: String,
        price: u64,
    },

    // =========================================================================
    // PROGRESSION
    // =========================================================================
    ExperienceGained {
        player_id: String,
        amount: u64,
        total: u64,
    },

    LevelUp {
        player_id: String,
        level: u32,
    },

    AchievementUnlocked {
        player_id: String,
        achievement_id: String,
    },

    // =========================================================================
    // SOCIAL
    // =========================================================================
    FriendAdded {
        player_id: String,
        friend_id: String,
    },

    GuildJoined {
        player_id: String,
        guild_id: String,
    },

    // =========================================================================
    // MONETIZATION
    // =========================================================================
    /// A real-money purchase settled.
    PurchaseCompleted {
        player_id: String,
        product_id: String,
        amount_cents: u64,
        currency: String,
    },

    AdWatched {
        player_id: String,
        placement: String,
        rewarded: bool,
    },

    // =========================================================================
    // ANALYTICS
    // =========================================================================
    /// Free-form analytics record.
    AnalyticsTracked {
        name: String,
        properties: serde_json::Value,
    },

    // =========================================================================
    // SESSION
    // =========================================================================
    SessionStarted {
        player_id: String,
        session_id: Uuid,
    },

    SessionEnded {
        player_id: String,
        session_id: Uuid,
        duration_secs: u64,
    },

    // =========================================================================
    // SYSTEM
    // =========================================================================
    /// Emitted by the health monitor when a service changes status.
    ServiceHealthChanged {
        service: String,
        status: ServiceStatus,
        previous: Option<ServiceStatus>,
        error: Option<String>,
    },

    /// Application-defined event. A `Null` payload is rejected by
    /// validation.
    Custom {
        name: String,
        payload: serde_json::Value,
    },
}

impl Event {
    /// Tag used for subscription and metrics.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::CurrencyChanged { .. } => EventKind::CurrencyChanged,
            Self::ItemPurchased { .. } => EventKind::ItemPurchased,
            Self::ExperienceGained { .. } => EventKind::ExperienceGained,
            Self::LevelUp { .. } => EventKind::LevelUp,
            Self::AchievementUnlocked { .. } => EventKind::AchievementUnlocked,
            Self::FriendAdded { .. } => EventKind::FriendAdded,
            Self::GuildJoined { .. } => EventKind::GuildJoined,
            Self::PurchaseCompleted { .. } => EventKind::PurchaseCompleted,
            Self::AdWatched { .. } => EventKind::AdWatched,
            Self::AnalyticsTracked { .. } => EventKind::AnalyticsTracked,
            Self::SessionStarted { .. } => EventKind::SessionStarted,
            Self::SessionEnded { .. } => EventKind::SessionEnded,
            Self::ServiceHealthChanged { .. } => EventKind::ServiceHealthChanged,
            Self::Custom { .. } => EventKind::Custom,
        }
    }

    /// Whether the event carries no payload at all.
    #[must_use]
    pub fn is_null_payload(&self) -> bool {
        matches!(
            self,
            Self::Custom {
                payload: serde_json::Value::Null,
                ..
            }
        )
    }

    /// JSON rendering kept in the history buffer.
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Value {
        match self {
            Self::Custom { name, payload } => serde_json::json!({ "name": name, "payload": payload }),
            other => serde_json::to_value(other).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Shorthand for a custom event.
    pub fn custom(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Custom {
            name: name.into(),
            payload,
        }
    }
}

/// Fieldless tag for [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    CurrencyChanged,
    ItemPurchased,
    ExperienceGained,
    LevelUp,
    AchievementUnlocked,
    FriendAdded,
    GuildJoined,
    PurchaseCompleted,
    AdWatched,
    AnalyticsTracked,
    SessionStarted,
    SessionEnded,
    ServiceHealthChanged,
    Custom,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 14] = [
        Self::CurrencyChanged,
        Self::ItemPurchased,
        Self::ExperienceGained,
        Self::LevelUp,
        Self::AchievementUnlocked,
        Self::FriendAdded,
        Self::GuildJoined,
        Self::PurchaseCompleted,
        Self::AdWatched,
        Self::AnalyticsTracked,
        Self::SessionStarted,
        Self::SessionEnded,
        Self::ServiceHealthChanged,
        Self::Custom,
    ];

    /// Stable name used as the performance-metric key.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CurrencyChanged => "CurrencyChanged",
            Self::ItemPurchased => "ItemPurchased",
            Self::ExperienceGained => "ExperienceGained",
            Self::LevelUp => "LevelUp",
            Self::AchievementUnlocked => "AchievementUnlocked",
            Self::FriendAdded => "FriendAdded",
            Self::GuildJoined => "GuildJoined",
            Self::PurchaseCompleted => "PurchaseCompleted",
            Self::AdWatched => "AdWatched",
            Self::AnalyticsTracked => "AnalyticsTracked",
            Self::SessionStarted => "SessionStarted",
            Self::SessionEnded => "SessionEnded",
            Self::ServiceHealthChanged => "ServiceHealthChanged",
            Self::Custom => "Custom",
        }
    }

    /// Look a kind up by its [`as_str`](Self::as_str) name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// The subsystem family the kind belongs to.
    #[must_use]
    pub fn domain(&self) -> EventDomain {
        match self {
            Self::CurrencyChanged | Self::ItemPurchased => EventDomain::Economy,
            Self::ExperienceGained | Self::LevelUp | Self::AchievementUnlocked => {
                EventDomain::Progression
            }
            Self::FriendAdded | Self::GuildJoined => EventDomain::Social,
            Self::PurchaseCompleted | Self::AdWatched => EventDomain::Monetization,
            Self::AnalyticsTracked => EventDomain::Analytics,
            Self::SessionStarted | Self::SessionEnded => EventDomain::Session,
            Self::ServiceHealthChanged | Self::Custom => EventDomain::System,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subsystem families, used for grouping in logs and dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventDomain {
    Economy,
    Progression,
    Social,
    Monetization,
    Analytics,
    Session,
    System,
}
