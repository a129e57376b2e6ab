//! Integration tests for the resilient-call orchestrator: caching,
//! deduplication, rate limiting, circuit breaking, retries, and alerting
//! through the public entry point.

use integrations_resilience::{
    Alert, AlertHandler, CallContext, CallError, CircuitBreakerConfig, DefaultResilienceOrchestrator,
    ErrorKind, HealthConfig, OperationResult, Priority, RateLimiterConfig, ResilienceConfig,
    ResilienceOrchestrator, RetryConfig, SchedulerConfig, TimeoutConfig,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn quick_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
    }
}

#[tokio::test]
async fn test_cache_ttl_scenario() {
    // set("k", "v", ttl=1000ms): a read at t=500ms returns "v", a read at
    // t=1500ms misses and re-executes.
    let orchestrator = DefaultResilienceOrchestrator::new(ResilienceConfig::default());
    let invocations = Arc::new(AtomicU32::new(0));

    let run = |orchestrator: Arc<DefaultResilienceOrchestrator>, invocations: Arc<AtomicU32>| async move {
        let value: String = orchestrator
            .execute(
                "k",
                CallContext::new().cache_ttl(Duration::from_millis(1000)),
                move || {
                    let invocations = invocations.clone();
                    async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        Ok("v".to_string())
                    }
                },
            )
            .await
            .unwrap();
        value
    };

    let orchestrator = Arc::new(orchestrator);
    assert_eq!(run(orchestrator.clone(), invocations.clone()).await, "v");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(run(orchestrator.clone(), invocations.clone()).await, "v");
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(run(orchestrator.clone(), invocations.clone()).await, "v");
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_dedupe_scenario_two_concurrent_callers() {
    // Two concurrent calls with the same key and a 50ms factory: both get the
    // identical resolved value and the factory ran once.
    let orchestrator = Arc::new(DefaultResilienceOrchestrator::new(
        ResilienceConfig::default(),
    ));
    let invocations = Arc::new(AtomicU32::new(0));

    let spawn_call = |orchestrator: Arc<DefaultResilienceOrchestrator>,
                      invocations: Arc<AtomicU32>| {
        tokio::spawn(async move {
            let value: OperationResult<String> = orchestrator
                .execute("x", CallContext::new(), move || {
                    let invocations = invocations.clone();
                    async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("result".to_string())
                    }
                })
                .await;
            value
        })
    };

    let first = spawn_call(orchestrator.clone(), invocations.clone());
    let second = spawn_call(orchestrator.clone(), invocations.clone());

    assert_eq!(first.await.unwrap().unwrap(), "result");
    assert_eq!(second.await.unwrap().unwrap(), "result");
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_circuit_breaker_scenario_fail_fast_then_trial() {
    // failure_threshold=5: five consecutive failures open the circuit, the
    // sixth call fails fast as a non-retryable network error without invoking
    // the operation, and after the cooldown a trial call goes through.
    let config = ResilienceConfig::new()
        .retry(quick_retry(0))
        .circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_millis(60),
            ..Default::default()
        });
    let orchestrator = DefaultResilienceOrchestrator::new(config);
    let invocations = Arc::new(AtomicU32::new(0));

    for _ in 0..5 {
        let invocations = invocations.clone();
        let result: OperationResult<u32> = orchestrator
            .execute("ai:chat", CallContext::new(), move || {
                let invocations = invocations.clone();
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::Network {
                        message: "connection refused".into(),
                    })
                }
            })
            .await;
        let error = result.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Network);
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 5);

    let result: OperationResult<u32> = orchestrator
        .execute("ai:chat", CallContext::new(), {
            let invocations = invocations.clone();
            move || {
                let invocations = invocations.clone();
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            }
        })
        .await;
    let error = result.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Network);
    assert!(!error.retryable);
    assert!(error.retry_after().is_some());
    assert_eq!(invocations.load(Ordering::SeqCst), 5);

    tokio::time::sleep(Duration::from_millis(90)).await;
    let result: OperationResult<u32> = orchestrator
        .execute("ai:chat", CallContext::new(), {
            let invocations = invocations.clone();
            move || {
                let invocations = invocations.clone();
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            }
        })
        .await;
    assert_eq!(result.unwrap(), 1);
    assert_eq!(invocations.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_retry_counts_by_error_kind() {
    // A network error consumes max_retries + 1 attempts; a validation error
    // never triggers more than one.
    let orchestrator = DefaultResilienceOrchestrator::new(
        ResilienceConfig::new().retry(quick_retry(3)),
    );

    let attempts = Arc::new(AtomicU32::new(0));
    let result: OperationResult<u32> = orchestrator
        .execute("ai:unreachable", CallContext::new(), {
            let attempts = attempts.clone();
            move || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::Network {
                        message: "unreachable".into(),
                    })
                }
            }
        })
        .await;
    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    let attempts = Arc::new(AtomicU32::new(0));
    let result: OperationResult<u32> = orchestrator
        .execute("ai:bad-request", CallContext::new(), {
            let attempts = attempts.clone();
            move || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::Validation {
                        message: "prompt too long".into(),
                    })
                }
            }
        })
        .await;
    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rate_limiter_grows_under_healthy_traffic() {
    // Every call succeeds quickly, so the adaptive limit only ever rises,
    // bounded by twice the base limit.
    let config = ResilienceConfig::new().rate_limiter(RateLimiterConfig {
        base_limit: 50,
        min_samples: 1,
        ..Default::default()
    });
    let orchestrator = DefaultResilienceOrchestrator::new(config);

    let mut previous = 50;
    for index in 0..20 {
        let key = format!("trends:item-{index}");
        let result: OperationResult<u32> = orchestrator
            .execute(&key, CallContext::new().identity("tenant-1"), || async {
                Ok(1)
            })
            .await;
        assert!(result.is_ok());

        let current = orchestrator.current_rate_limit("tenant-1").unwrap();
        assert!(current >= previous);
        previous = current;
    }
    assert!(previous <= 100);
}

#[tokio::test]
async fn test_priority_queue_drains_high_first() {
    let config = ResilienceConfig::new().scheduler(SchedulerConfig { max_concurrent: 1 });
    let orchestrator = Arc::new(DefaultResilienceOrchestrator::new(config));
    let order = Arc::new(Mutex::new(Vec::new()));

    // Occupy the single slot long enough to queue both waiters behind it.
    let blocker = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let _: u32 = orchestrator
                .execute("blocker", CallContext::new(), || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(0)
                })
                .await
                .unwrap();
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let spawn_tagged = |orchestrator: Arc<DefaultResilienceOrchestrator>,
                        order: Arc<Mutex<Vec<&'static str>>>,
                        key: &'static str,
                        priority: Priority| {
        tokio::spawn(async move {
            let _: u32 = orchestrator
                .execute(key, CallContext::new().priority(priority), move || {
                    let order = order.clone();
                    async move {
                        order.lock().push(key);
                        Ok(0)
                    }
                })
                .await
                .unwrap();
        })
    };

    let normal = spawn_tagged(
        orchestrator.clone(),
        order.clone(),
        "report:batch",
        Priority::Normal,
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    let high = spawn_tagged(
        orchestrator.clone(),
        order.clone(),
        "ai:interactive",
        Priority::High,
    );

    blocker.await.unwrap();
    high.await.unwrap();
    normal.await.unwrap();

    // The high-priority call was enqueued later but ran first.
    assert_eq!(*order.lock(), vec!["ai:interactive", "report:batch"]);
}

#[tokio::test]
async fn test_cancel_queued_call() {
    let config = ResilienceConfig::new().scheduler(SchedulerConfig { max_concurrent: 1 });
    let orchestrator = Arc::new(DefaultResilienceOrchestrator::new(config));

    let blocker = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let _: u32 = orchestrator
                .execute("blocker", CallContext::new(), || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(0)
                })
                .await
                .unwrap();
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let victim = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .execute("report:doomed", CallContext::new(), || async { Ok(0u32) })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(orchestrator.cancel_queued("report:doomed"), 1);
    let error = victim.await.unwrap().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Canceled);
    assert!(!error.retryable);

    blocker.await.unwrap();
}

#[tokio::test]
async fn test_timeout_keeps_orphan_visible_until_settled() {
    let config = ResilienceConfig::new()
        .retry(quick_retry(0))
        .timeout(TimeoutConfig {
            default_timeout: Duration::from_millis(30),
        });
    let orchestrator = DefaultResilienceOrchestrator::new(config);

    let result: OperationResult<u32> = orchestrator
        .execute("ai:glacial", CallContext::new(), || async {
            tokio::time::sleep(Duration::from_millis(120)).await;
            Ok(1)
        })
        .await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);

    let orphans = orchestrator.active_timeouts();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].operation, "ai:glacial");

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(orchestrator.active_timeouts().is_empty());
}

struct CollectingChannel {
    alerts: Mutex<Vec<Alert>>,
}

impl AlertHandler for CollectingChannel {
    fn on_alert(&self, alert: &Alert) {
        self.alerts.lock().push(alert.clone());
    }
}

#[tokio::test]
async fn test_alerts_fire_and_unsubscribe_stops_them() {
    let config = ResilienceConfig::new()
        .retry(quick_retry(0))
        .health(HealthConfig {
            min_calls: 3,
            error_rate_threshold: 0.5,
            alert_cooldown: Duration::from_secs(600),
            ..Default::default()
        });
    let orchestrator = DefaultResilienceOrchestrator::new(config);

    let channel = Arc::new(CollectingChannel {
        alerts: Mutex::new(Vec::new()),
    });
    let subscription = orchestrator.subscribe_alerts(channel.clone());

    for _ in 0..4 {
        let result: OperationResult<u32> = orchestrator
            .execute("ai:broken", CallContext::new(), || async {
                Err(CallError::Server {
                    message: "boom".into(),
                    status_code: Some(500),
                })
            })
            .await;
        assert!(result.is_err());
    }

    let collected = channel.alerts.lock().len();
    assert!(collected >= 1, "expected at least one alert");

    assert!(orchestrator.unsubscribe_alerts(subscription));
    let result: OperationResult<u32> = orchestrator
        .execute("ai:broken", CallContext::new(), || async {
            Err(CallError::Server {
                message: "boom".into(),
                status_code: Some(500),
            })
        })
        .await;
    assert!(result.is_err());
    assert_eq!(channel.alerts.lock().len(), collected);
}

#[tokio::test]
async fn test_health_report_snapshot_for_dashboards() {
    let orchestrator = DefaultResilienceOrchestrator::new(
        ResilienceConfig::new().retry(quick_retry(0)),
    );

    let _: u32 = orchestrator
        .execute("news:feed", CallContext::new(), || async { Ok(1) })
        .await
        .unwrap();
    let _: OperationResult<u32> = orchestrator
        .execute("ai:broken", CallContext::new(), || async {
            Err(CallError::Auth {
                message: "expired key".into(),
            })
        })
        .await;

    let report = orchestrator.health_report(None);
    assert_eq!(report.operations.len(), 2);

    let broken = report
        .operations
        .iter()
        .find(|health| health.operation == "ai:broken")
        .unwrap();
    assert_eq!(broken.failure_count, 1);
    assert_eq!(broken.last_error_kind, Some(ErrorKind::Auth));

    // The snapshot serializes for dashboard export.
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"ai:broken\""));
}
