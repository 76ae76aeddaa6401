//! # Runtime Choreography
//!
//! The runtime ties the container, the bus and the health monitor to one
//! scheduler tick:
//!
//! ```text
//! [ProgressionTracker] ──ExperienceGained / LevelUp──→ [EventBus]
//!          │                                              │
//!          ↓ credit                                       ↓ async handler
//!   [LedgerWallet] ──CurrencyChanged──→ [EventBus] ──→ [AnalyticsRecorder]
//!
//! tick: drain queued events → advance supervisor → health round (when due)
//! ```
//!
//! ## Test Categories
//!
//! 1. **Happy Path**: a scripted session reaches analytics through the tick
//! 2. **Health**: status transitions are announced once on the bus
//! 3. **Async Initialization**: initializer outcomes land in the container

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use uuid::Uuid;

    use keystone_bus::{Event, EventKind};
    use keystone_runtime::wiring::{
        register_game_services, subscribe_game_handlers, AnalyticsRecorder, ProgressionTracker,
        Wallet, GOLD, LEVEL_REWARD_GOLD,
    };
    use keystone_runtime::{AsyncInitStatus, ContainerState, KeystoneRuntime, RuntimeConfig};
    use keystone_types::{Service, ServiceError, ServiceKey, ServiceStatus};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn runtime() -> KeystoneRuntime {
        let mut config = RuntimeConfig::default();
        // Health rounds only when a test asks for one.
        config.health.health_check_interval_ms = 3_600_000;
        KeystoneRuntime::new(config).unwrap()
    }

    /// Tick until `done` holds or `max_ticks` pass.
    async fn tick_until(runtime: &KeystoneRuntime, max_ticks: usize, done: impl Fn() -> bool) {
        for _ in 0..max_ticks {
            runtime.tick();
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// A service whose health is toggled from the test.
    struct Matchmaker {
        healthy: Arc<AtomicBool>,
    }

    impl Service for Matchmaker {
        fn health_check(&self) -> Result<(), ServiceError> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ServiceError::Unhealthy("queue stalled".into()))
            }
        }
    }

    // =============================================================================
    // HAPPY PATH
    // =============================================================================

    #[tokio::test]
    async fn test_session_flows_from_services_to_analytics() {
        let runtime = runtime();
        let container = runtime.container();
        register_game_services(&container, Duration::from_millis(1));
        runtime.start().unwrap();
        subscribe_game_handlers(&runtime.bus(), &container).unwrap();

        let progression = container.resolve::<ProgressionTracker>().unwrap();
        let wallet = container.resolve::<dyn Wallet>().unwrap();
        let analytics = container.resolve::<AnalyticsRecorder>().unwrap();

        let level = progression.grant_experience("p1", 2_500).unwrap();
        assert_eq!(level, 3);
        assert_eq!(
            wallet.balance("p1", GOLD),
            LEVEL_REWARD_GOLD * 2 + LEVEL_REWARD_GOLD * 3
        );

        // Currency changes reach analytics synchronously, level-ups on a tick.
        let level_ups = |analytics: &AnalyticsRecorder| {
            analytics
                .records()
                .iter()
                .filter(|event| {
                    matches!(event, Event::AnalyticsTracked { name, .. } if name == "level_up")
                })
                .count()
        };
        assert_eq!(level_ups(&analytics), 0);
        tick_until(&runtime, 200, || level_ups(&analytics) == 2).await;
        assert_eq!(level_ups(&analytics), 2);
        assert_eq!(runtime.bus().statistics(EventKind::LevelUp).async_completed, 2);
    }

    #[tokio::test]
    async fn test_queued_events_wait_for_the_tick() {
        let runtime = runtime();
        let bus = runtime.bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(EventKind::SessionEnded, 0, move |event| {
            if let Event::SessionEnded { duration_secs, .. } = event {
                sink.lock().push(*duration_secs);
            }
            Ok(())
        });

        let session_id = Uuid::new_v4();
        for duration_secs in [10, 20, 30] {
            bus.publish_async(Event::SessionEnded {
                player_id: "p1".to_string(),
                session_id,
                duration_secs,
            })
            .unwrap();
        }
        assert!(seen.lock().is_empty());

        let report = runtime.tick();
        assert_eq!(report.drained, 3);
        assert_eq!(*seen.lock(), vec![10, 20, 30]);
    }

    // =============================================================================
    // HEALTH
    // =============================================================================

    #[tokio::test]
    async fn test_health_transitions_are_published_once() {
        let runtime = runtime();
        let healthy = Arc::new(AtomicBool::new(true));
        let flag = healthy.clone();
        runtime.container().register_singleton(move |_| {
            Ok(Matchmaker {
                healthy: flag.clone(),
            })
        });
        runtime.start().unwrap();

        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        runtime
            .bus()
            .subscribe(EventKind::ServiceHealthChanged, 0, move |event| {
                if let Event::ServiceHealthChanged {
                    status, previous, ..
                } = event
                {
                    sink.lock().push((*previous, *status));
                }
                Ok(())
            });

        // Healthy and unchanged: nothing to announce.
        assert!(runtime.check_health().is_healthy());
        assert!(changes.lock().is_empty());

        healthy.store(false, Ordering::SeqCst);
        let report = runtime.check_health();
        assert_eq!(report.unhealthy, vec![ServiceKey::of::<Matchmaker>()]);
        assert_eq!(report.notifications, 1);

        // Still unhealthy: no repeat notification.
        assert_eq!(runtime.check_health().notifications, 0);

        healthy.store(true, Ordering::SeqCst);
        runtime.check_health();

        assert_eq!(
            *changes.lock(),
            vec![
                (Some(ServiceStatus::Healthy), ServiceStatus::Unhealthy),
                (Some(ServiceStatus::Unhealthy), ServiceStatus::Healthy),
            ]
        );
        let record = runtime.health().health_of::<Matchmaker>().unwrap();
        assert!(record.is_healthy);
        assert_eq!(record.error_count, 2);
        assert!(!runtime.status().degraded);
    }

    // =============================================================================
    // ASYNC INITIALIZATION
    // =============================================================================

    #[tokio::test]
    async fn test_async_initializer_completes_on_tick() {
        let runtime = runtime();
        let container = runtime.container();
        register_game_services(&container, Duration::from_millis(5));
        runtime.start().unwrap();

        let key = ServiceKey::of::<AnalyticsRecorder>();
        assert_eq!(
            container.async_init_status(&key),
            Some(AsyncInitStatus::Pending)
        );
        assert!(runtime.status().degraded);

        tick_until(&runtime, 500, || {
            container.async_init_status(&key) == Some(AsyncInitStatus::Completed)
        })
        .await;
        assert_eq!(
            container.async_init_status(&key),
            Some(AsyncInitStatus::Completed)
        );
        assert!(container.resolve::<AnalyticsRecorder>().unwrap().is_ready());
        assert!(runtime.check_health().is_healthy());
    }

    #[tokio::test]
    async fn test_shutdown_disposes_everything() {
        let runtime = runtime();
        let container = runtime.container();
        register_game_services(&container, Duration::from_millis(1));
        runtime.start().unwrap();
        subscribe_game_handlers(&runtime.bus(), &container).unwrap();
        assert!(runtime.bus().handler_count() > 0);

        runtime.shutdown();

        let status = runtime.status();
        assert_eq!(status.container_state, ContainerState::Cleared);
        assert_eq!(status.live_instances, 0);
        assert_eq!(status.registered_services, 0);
        assert_eq!(runtime.bus().handler_count(), 0);
        assert!(runtime.supervisor().is_idle());
    }
}
