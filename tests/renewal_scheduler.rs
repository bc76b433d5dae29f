//! Renewal scheduler ticks against the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use billing_engine::application::scheduler::LEASE_NAME;
use billing_engine::domain::billing::{SubscriptionStatus, FREE_PLAN_CODE};
use billing_engine::ports::{SchedulerLease, SubscriptionRepository};

use common::{user, Harness, Sent};

// ════════════════════════════════════════════════════════════════════════════════
// Reminders
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn reminder_is_sent_once_within_the_cooldown() {
    let h = Harness::new();
    let sub = h.subscription_started("alice", "basic", 27).await;
    let scheduler = h.scheduler("worker-a");

    let first = scheduler.tick().await.unwrap();
    assert_eq!(first.reminders_sent, 1);
    let stamped = SubscriptionRepository::find_by_id(h.store.as_ref(), &sub.id)
        .await
        .unwrap()
        .unwrap();
    assert!(stamped.reminder_sent_at.is_some());

    let second = scheduler.tick().await.unwrap();
    assert_eq!(second.reminders_sent, 0);

    let reminders: Vec<_> = h
        .notifier
        .sent()
        .into_iter()
        .filter(|s| matches!(s, Sent::Reminder(..)))
        .collect();
    assert_eq!(reminders.len(), 1);
    assert!(matches!(&reminders[0], Sent::Reminder(u, days) if *u == user("alice") && (2..=3).contains(days)));
}

#[tokio::test]
async fn failed_reminder_is_not_stamped() {
    let h = Harness::new();
    let sub = h.subscription_started("bob", "pro", 27).await;
    h.notifier.set_failing(true);

    let report = h.scheduler("worker-a").tick().await.unwrap();

    assert_eq!(report.reminders_sent, 0);
    assert_eq!(report.reminder_failures, 1);
    let row = SubscriptionRepository::find_by_id(h.store.as_ref(), &sub.id)
        .await
        .unwrap()
        .unwrap();
    assert!(row.reminder_sent_at.is_none());

    h.notifier.set_failing(false);
    let retry = h.scheduler("worker-a").tick().await.unwrap();
    assert_eq!(retry.reminders_sent, 1);
}

#[tokio::test]
async fn free_and_far_off_rows_get_no_reminder() {
    let h = Harness::new();
    h.lifecycle.activate_free(&user("carol")).await.unwrap();
    h.subscription_started("dave", "basic", 2).await;

    let report = h.scheduler("worker-a").tick().await.unwrap();

    assert_eq!(report.reminders_sent, 0);
    assert!(h.notifier.sent().is_empty());
}

// ════════════════════════════════════════════════════════════════════════════════
// Expiry
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn lapsed_subscription_expires_into_exactly_one_free_row() {
    let h = Harness::new();
    let erin = user("erin");
    let sub = h.subscription_started("erin", "enterprise", 40).await;

    let report = h.scheduler("worker-a").tick().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.downgraded, 1);

    let closed = SubscriptionRepository::find_by_id(h.store.as_ref(), &sub.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed.status, SubscriptionStatus::Expired);

    let live = h.store.find_live_by_user(&erin).await.unwrap().unwrap();
    assert_eq!(live.plan_code, FREE_PLAN_CODE);
    assert_eq!(h.store.live_count(&erin).await, 1);

    let again = h.scheduler("worker-a").tick().await.unwrap();
    assert_eq!(again.expired, 0);
    assert_eq!(h.store.subscriptions_for(&erin).await.len(), 2);
}

#[tokio::test]
async fn store_outage_is_counted_not_fatal() {
    let h = Harness::new();
    h.subscription_started("frank", "basic", 40).await;
    h.store.set_fail_writes(true);

    let report = h.scheduler("worker-a").tick().await.unwrap();

    assert_eq!(report.expired, 0);
    assert_eq!(report.failures, 1);
}

// ════════════════════════════════════════════════════════════════════════════════
// Coordination
// ════════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn only_the_lease_holder_works() {
    let h = Harness::new();
    h.subscription_started("gina", "basic", 40).await;
    assert!(h
        .store
        .try_acquire(LEASE_NAME, "worker-b", Duration::from_secs(60))
        .await
        .unwrap());

    let report = h.scheduler("worker-a").tick().await.unwrap();
    assert!(report.skipped_no_lease);
    assert_eq!(report.expired, 0);

    h.store.release(LEASE_NAME, "worker-b").await.unwrap();
    let report = h.scheduler("worker-a").tick().await.unwrap();
    assert_eq!(report.expired, 1);
}

#[tokio::test]
async fn background_loop_ticks_and_stops() {
    let h = Harness::new();
    h.subscription_started("hank", "basic", 40).await;
    let scheduler = Arc::new(h.scheduler("worker-a"));

    scheduler.start().await.unwrap();
    // The first interval tick fires immediately.
    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.stop().await;

    let stats = scheduler.stats().await;
    assert!(!stats.running);
    assert!(stats.last_tick.is_some());
    assert_eq!(h.store.find_live_by_user(&user("hank")).await.unwrap().unwrap().plan_code, FREE_PLAN_CODE);
}
