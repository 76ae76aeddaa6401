//! # Event Dispatch Flows
//!
//! Publishing through the bus with mixed sync and async subscribers:
//!
//! ```text
//! publish() ──→ sync handlers (priority order, isolated failures)
//!          └──→ async handlers ──→ Supervisor ──advance()──→ completion | timeout
//! publish_async() ──→ queue ──drain_queued()──→ publish()
//! ```

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use uuid::Uuid;

    use keystone_bus::{
        BusConfig, BusError, Event, EventBus, EventKind, HandlerError, Supervisor, UnitOutcome,
    };

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn bus() -> EventBus {
        EventBus::new(BusConfig::default())
    }

    fn level_up(level: u32) -> Event {
        Event::LevelUp {
            player_id: "p1".to_string(),
            level,
        }
    }

    fn session_started() -> Event {
        Event::SessionStarted {
            player_id: "p1".to_string(),
            session_id: Uuid::new_v4(),
        }
    }

    /// Advance the bus supervisor until it goes idle or `max_wait` passes.
    async fn settle(bus: &EventBus, max_wait: Duration) -> Vec<keystone_bus::UnitReport> {
        let supervisor = bus.supervisor();
        let mut reports = bus.advance();
        let deadline = tokio::time::Instant::now() + max_wait;
        while !supervisor.is_idle() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(2)).await;
            reports.extend(bus.advance());
        }
        reports
    }

    // =============================================================================
    // SYNC DISPATCH
    // =============================================================================

    #[test]
    fn test_handlers_run_in_priority_order() {
        let bus = bus();
        let order = Arc::new(Mutex::new(Vec::new()));

        for priority in [3, 1, 2] {
            let order = order.clone();
            bus.subscribe(EventKind::LevelUp, priority, move |_| {
                order.lock().push(priority);
                Ok(())
            });
        }

        assert_eq!(bus.publish(level_up(2)).unwrap(), 3);
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_equal_priority_keeps_subscription_order() {
        let bus = bus();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(EventKind::LevelUp, 0, move |_| {
                order.lock().push(label);
                Ok(())
            });
        }

        bus.publish(level_up(2)).unwrap();
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_handlers_do_not_stop_dispatch() {
        let bus = bus();
        let reached = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(EventKind::LevelUp, 1, |_| Err(HandlerError::failed("quest log offline")));
        bus.subscribe(EventKind::LevelUp, 2, |_| panic!("leaderboard exploded"));
        let counter = reached.clone();
        bus.subscribe(EventKind::LevelUp, 3, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let seen = failures.clone();
        bus.on_handler_error(move |failure| seen.lock().push(failure.error.clone()));

        assert!(bus.publish(level_up(5)).is_ok());
        assert_eq!(reached.load(Ordering::SeqCst), 1);

        let failures = failures.lock();
        assert_eq!(failures.len(), 2);
        assert!(failures
            .iter()
            .all(|err| matches!(err, BusError::HandlerInvocation { .. })));
        assert!(failures[1].to_string().contains("leaderboard exploded"));
        assert_eq!(bus.statistics(EventKind::LevelUp).handler_failures, 2);
    }

    #[test]
    fn test_unsubscribed_handler_is_not_called() {
        let bus = bus();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = bus.subscribe(EventKind::LevelUp, 0, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(level_up(2)).unwrap();
        assert!(bus.unsubscribe(EventKind::LevelUp, id));
        assert!(!bus.unsubscribe(EventKind::LevelUp, id));
        assert_eq!(bus.publish(level_up(3)).unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_null_payload_is_rejected_before_dispatch() {
        let bus = bus();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        bus.subscribe(EventKind::Custom, 0, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = bus
            .publish(Event::custom("telemetry", serde_json::Value::Null))
            .unwrap_err();
        assert_eq!(err, BusError::NullPayload(EventKind::Custom));
        assert!(bus
            .publish_async(Event::custom("telemetry", serde_json::Value::Null))
            .is_err());

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(bus.history(10).is_empty());
        assert_eq!(bus.pending_async(), 0);
    }

    #[test]
    fn test_history_keeps_most_recent_events() {
        let bus = EventBus::new(BusConfig {
            max_history: 3,
            ..BusConfig::default()
        });
        for level in 1..=5 {
            bus.publish(level_up(level)).unwrap();
        }

        let history = bus.history(10);
        assert_eq!(history.len(), 3);
        let ids: Vec<u64> = history.iter().map(|r| r.sequence_id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(history[2].payload["LevelUp"]["level"], 5);
        assert_eq!(bus.history(1)[0].sequence_id, 5);
    }

    #[test]
    fn test_performance_tracks_every_dispatch() {
        let bus = bus();
        bus.subscribe(EventKind::LevelUp, 0, |_| Ok(()));
        for level in 1..=7 {
            bus.publish(level_up(level)).unwrap();
        }

        let metric = bus.performance("LevelUp").unwrap();
        assert_eq!(metric.count, 7);
        assert_eq!(metric.avg_duration, metric.total_duration / 7);
        assert!(metric.min_duration <= metric.max_duration);
        assert_eq!(bus.statistics(EventKind::LevelUp).published, 7);
    }

    // =============================================================================
    // DEFERRED PUBLISH
    // =============================================================================

    #[test]
    fn test_queued_events_drain_in_fifo_order() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(EventKind::LevelUp, 0, move |event| {
            if let Event::LevelUp { level, .. } = event {
                sink.lock().push(*level);
            }
            Ok(())
        });

        for level in [7, 8, 9] {
            bus.publish_async(level_up(level)).unwrap();
        }
        assert!(seen.lock().is_empty());
        assert_eq!(bus.pending_async(), 3);

        assert_eq!(bus.drain_queued(), 3);
        assert_eq!(*seen.lock(), vec![7, 8, 9]);
        assert_eq!(bus.drain_queued(), 0);
    }

    // =============================================================================
    // ASYNC HANDLERS
    // =============================================================================

    #[tokio::test]
    async fn test_async_handler_completion_is_reported() {
        let bus = bus();
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = completions.clone();
        bus.on_handler_completed(move |completion| {
            assert_eq!(completion.kind, EventKind::SessionStarted);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.subscribe_async(EventKind::SessionStarted, 0, None, |_, _| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<(), HandlerError>(())
        });

        assert_eq!(bus.publish(session_started()).unwrap(), 1);
        let reports = settle(&bus, Duration::from_secs(1)).await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, UnitOutcome::Completed);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert!(bus.performance("async:SessionStarted").is_some());
    }

    #[tokio::test]
    async fn test_slow_async_handler_times_out() {
        let bus = bus();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let seen = failures.clone();
        bus.on_handler_error(move |failure| seen.lock().push(failure.error.clone()));

        let cancelled = Arc::new(AtomicUsize::new(0));
        let flag = cancelled.clone();
        bus.subscribe_async(
            EventKind::SessionStarted,
            0,
            Some(Duration::from_millis(20)),
            move |_, token| {
                let flag = flag.clone();
                async move {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                        _ = token.cancelled() => {
                            flag.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    Ok::<(), HandlerError>(())
                }
            },
        );

        bus.publish(session_started()).unwrap();
        let reports = settle(&bus, Duration::from_secs(2)).await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, UnitOutcome::TimedOut);
        let failures = failures.lock();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0],
            BusError::AsyncHandlerTimeout { timeout, .. } if timeout == Duration::from_millis(20)
        ));
        assert_eq!(bus.statistics(EventKind::SessionStarted).timeouts, 1);
        // The future was dropped at the deadline, so it never saw the token.
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_async_handler_is_isolated() {
        let bus = bus();
        let reached = Arc::new(AtomicUsize::new(0));
        bus.subscribe_async(EventKind::SessionStarted, 0, None, |_, _| async {
            Err::<(), HandlerError>(HandlerError::failed("analytics backend down"))
        });
        let counter = reached.clone();
        bus.subscribe(EventKind::SessionStarted, 1, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(session_started()).unwrap();
        assert_eq!(reached.load(Ordering::SeqCst), 1);

        let reports = settle(&bus, Duration::from_secs(1)).await;
        assert!(matches!(
            &reports[0].outcome,
            UnitOutcome::Failed(message) if message.contains("analytics backend down")
        ));
        let stats = bus.statistics(EventKind::SessionStarted);
        assert_eq!(stats.handler_failures, 1);
        assert_eq!(stats.async_completed, 0);
    }

    #[tokio::test]
    async fn test_shared_supervisor_sees_bus_units() {
        let supervisor = Arc::new(Supervisor::new());
        let bus = EventBus::with_supervisor(BusConfig::default(), supervisor.clone());
        bus.subscribe_async(EventKind::SessionStarted, 0, None, |_, _| async {
            Ok::<(), HandlerError>(())
        });

        bus.publish(session_started()).unwrap();
        assert_eq!(supervisor.pending_count(), 1);

        let reports = settle(&bus, Duration::from_secs(1)).await;
        assert_eq!(reports.len(), 1);
        assert!(supervisor.is_idle());
    }
}
