mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{FakeService, Op};
use pawsync_core::mutation::budget_alerts_key;
use pawsync_core::{RefreshOutcome, StatusConfig, SyncContext, SyncError};

const ALERTS: &str = "alerts";

fn setup() -> (Arc<FakeService>, SyncContext) {
    let fake = FakeService::new();
    fake.set_derived(ALERTS, json!([{"budgetId": "B1", "percentage": 0.92}]));
    let ctx = SyncContext::new(fake.clone());
    (fake, ctx)
}

fn fail_times(fake: &FakeService, n: usize) {
    for _ in 0..n {
        fake.fail_next(Op::Derived, SyncError::Network("offline".to_string()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_refresh_writes_payload_to_store() {
    let (fake, ctx) = setup();
    let refresher = ctx.status_refresher(ALERTS, budget_alerts_key());

    assert_eq!(refresher.refresh().await, RefreshOutcome::Refreshed);

    assert_eq!(fake.calls(Op::Derived), 1);
    let payload = ctx.store().get(&budget_alerts_key()).unwrap();
    assert_eq!(payload[0]["budgetId"], "B1");
    assert_eq!(refresher.state().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_attempts_inside_min_interval_are_rate_limited() {
    let (fake, ctx) = setup();
    let refresher = ctx.status_refresher(ALERTS, budget_alerts_key());

    refresher.refresh().await;
    assert_eq!(refresher.refresh().await, RefreshOutcome::RateLimited);
    tokio::time::advance(Duration::from_secs(29)).await;
    assert_eq!(refresher.refresh().await, RefreshOutcome::RateLimited);
    assert_eq!(fake.calls(Op::Derived), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(refresher.refresh().await, RefreshOutcome::Refreshed);
    assert_eq!(fake.calls(Op::Derived), 2);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_in_flight_is_not_repeated() {
    let (fake, ctx) = setup();
    let refresher = ctx.status_refresher(ALERTS, budget_alerts_key());

    let release = fake.gate(Op::Derived);
    let second = Arc::clone(&refresher);
    let (first, again) = tokio::join!(refresher.refresh(), async move {
        let again = second.refresh().await;
        let _ = release.send(());
        again
    });

    assert_eq!(first, RefreshOutcome::Refreshed);
    assert_eq!(again, RefreshOutcome::InFlight);
    assert_eq!(fake.calls(Op::Derived), 1);
    assert!(!refresher.state().in_flight);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_and_stays_open_until_reset() {
    let (fake, ctx) = setup();
    let refresher = ctx.status_refresher(ALERTS, budget_alerts_key());
    fail_times(&fake, 3);

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        outcomes.push(refresher.refresh().await);
        tokio::time::advance(Duration::from_secs(31)).await;
    }
    assert_eq!(
        outcomes,
        vec![
            RefreshOutcome::Failed {
                consecutive_failures: 1,
                backoff: Duration::from_secs(1)
            },
            RefreshOutcome::Failed {
                consecutive_failures: 2,
                backoff: Duration::from_secs(2)
            },
            RefreshOutcome::Failed {
                consecutive_failures: 3,
                backoff: Duration::from_secs(4)
            },
        ]
    );
    assert!(refresher.is_circuit_open());

    // Even long after the backoff the breaker holds
    tokio::time::advance(Duration::from_secs(3600)).await;
    assert_eq!(refresher.refresh().await, RefreshOutcome::CircuitOpen);
    assert_eq!(fake.calls(Op::Derived), 3);
    assert_eq!(refresher.state().consecutive_failures, 3);

    refresher.reset();
    assert_eq!(refresher.refresh().await, RefreshOutcome::Refreshed);
    assert_eq!(refresher.state().consecutive_failures, 0);
    assert_eq!(fake.calls(Op::Derived), 4);
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_count() {
    let (fake, ctx) = setup();
    let refresher = ctx.status_refresher(ALERTS, budget_alerts_key());
    fail_times(&fake, 2);

    refresher.refresh().await;
    tokio::time::advance(Duration::from_secs(31)).await;
    refresher.refresh().await;
    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(refresher.state().consecutive_failures, 2);

    assert_eq!(refresher.refresh().await, RefreshOutcome::Refreshed);
    assert_eq!(refresher.state().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_polling_halts_once_breaker_opens() {
    let fake = FakeService::new();
    fail_times(&fake, 10);
    let ctx = SyncContext::new(fake.clone()).with_status_config(StatusConfig {
        min_interval: Duration::from_secs(1),
        ..StatusConfig::default()
    });
    let refresher = ctx.status_refresher(ALERTS, budget_alerts_key());

    let polling = tokio::time::timeout(
        Duration::from_secs(600),
        refresher.run_polling(Duration::from_secs(5)),
    )
    .await;

    assert!(polling.is_ok());
    assert_eq!(fake.calls(Op::Derived), 3);
    assert!(refresher.is_circuit_open());
}

#[tokio::test]
async fn test_context_hands_out_one_refresher_per_name() {
    let (_fake, ctx) = setup();
    let a = ctx.status_refresher(ALERTS, budget_alerts_key());
    let b = ctx.status_refresher(ALERTS, budget_alerts_key());
    assert!(Arc::ptr_eq(&a, &b));
}
