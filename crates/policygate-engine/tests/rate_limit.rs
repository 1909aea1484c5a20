#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use serde_json::json;

use policygate_core::{MemoryStore, Policy, PolicyManager, RequestContext, SharedStore, Store};
use policygate_engine::clock::ManualClock;
use policygate_engine::policies::{RateLimitPolicy, CONFIG_KEY};

const START: i64 = 1_700_000_000;

async fn chain(clock: &Arc<ManualClock>) -> (PolicyManager, Arc<RateLimitPolicy>) {
    let limiter = Arc::new(RateLimitPolicy::new("standard", 3, 60).with_clock(clock.clone()));
    let mut pm = PolicyManager::default();
    pm.add_policy(limiter.clone()).await.unwrap();
    (pm, limiter)
}

#[tokio::test]
async fn three_allowed_then_denied_then_window_slides() {
    let clock = Arc::new(ManualClock::at_unix(START));
    let (pm, _) = chain(&clock).await;

    for expected_remaining in [2, 1, 0] {
        let mut ctx = RequestContext::new("alice");
        let r = pm.check_pre_exec_policies(&mut ctx).await.unwrap();
        assert!(r.allowed());
        assert_eq!(ctx.metadata["standard_remaining"], json!(expected_remaining));
        clock.advance_secs(1);
    }

    let mut ctx = RequestContext::new("alice");
    let r = pm.check_pre_exec_policies(&mut ctx).await.unwrap();
    assert!(r.is_denied());
    assert_eq!(r.policy_name(), "standard");
    assert_eq!(r.reason(), "Rate limit exceeded: 3 requests per 60s");
    assert_eq!(r.metadata()["remaining"], json!(0));
    assert_eq!(r.metadata()["reset_at"], json!((START + 60) as f64));
    assert!(!ctx.metadata.contains_key("standard_remaining"));

    clock.advance_secs(61);
    let mut ctx = RequestContext::new("alice");
    assert!(pm.check_pre_exec_policies(&mut ctx).await.unwrap().allowed());
}

#[tokio::test]
async fn users_are_counted_separately() {
    let clock = Arc::new(ManualClock::at_unix(START));
    let (pm, _) = chain(&clock).await;

    for _ in 0..4 {
        let mut ctx = RequestContext::new("alice");
        pm.check_pre_exec_policies(&mut ctx).await.unwrap();
    }
    let mut ctx = RequestContext::new("alice");
    assert!(!pm.check_pre_exec_policies(&mut ctx).await.unwrap().allowed());

    let mut ctx = RequestContext::new("bob");
    let r = pm.check_pre_exec_policies(&mut ctx).await.unwrap();
    assert!(r.allowed());
    assert_eq!(ctx.metadata["standard_remaining"], json!(2));
}

#[tokio::test]
async fn timestamps_are_stored_per_user() {
    let clock = Arc::new(ManualClock::at_unix(START));
    let (pm, limiter) = chain(&clock).await;

    let mut ctx = RequestContext::new("alice");
    pm.check_pre_exec_policies(&mut ctx).await.unwrap();

    let state = pm
        .store()
        .get(limiter.namespace(), "alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state, json!({ "timestamps": [START as f64] }));
    assert_eq!(limiter.namespace(), "rate_limit:standard");
}

#[tokio::test]
async fn set_limits_persists_and_applies() {
    let clock = Arc::new(ManualClock::at_unix(START));
    let (pm, limiter) = chain(&clock).await;

    limiter.set_limits(1, 30).await.unwrap();
    let stored = pm
        .store()
        .get(limiter.config_namespace(), CONFIG_KEY)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, json!({ "max_requests": 1, "window_seconds": 30 }));

    let mut ctx = RequestContext::new("carol");
    assert!(pm.check_pre_exec_policies(&mut ctx).await.unwrap().allowed());
    let mut ctx = RequestContext::new("carol");
    let r = pm.check_pre_exec_policies(&mut ctx).await.unwrap();
    assert_eq!(r.reason(), "Rate limit exceeded: 1 requests per 30s");
}

#[tokio::test]
async fn user_named_like_the_config_key_cannot_clobber_limits() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::at_unix(START));
    let limiter = RateLimitPolicy::new("standard", 2, 60).with_clock(clock.clone());
    limiter.setup(store.clone()).await.unwrap();

    let mut ctx = RequestContext::new(CONFIG_KEY);
    assert!(limiter.pre_execute(&mut ctx).await.unwrap().allowed());
    assert_eq!(
        store.get(limiter.config_namespace(), CONFIG_KEY).await.unwrap(),
        Some(json!({ "max_requests": 2, "window_seconds": 60 }))
    );
    assert_eq!(
        store.get(limiter.namespace(), CONFIG_KEY).await.unwrap(),
        Some(json!({ "timestamps": [START as f64] }))
    );

    let restarted = RateLimitPolicy::new("standard", 100, 60).with_clock(clock);
    restarted.bind_store(store);
    let mut ctx = RequestContext::new("alice");
    assert!(restarted.pre_execute(&mut ctx).await.unwrap().allowed());
    assert_eq!(restarted.limits().max_requests, 2);
}

#[tokio::test]
async fn unsynced_limiter_reloads_limits_from_store() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let first = RateLimitPolicy::new("standard", 2, 60);
    first.setup(store.clone()).await.unwrap();

    let clock = Arc::new(ManualClock::at_unix(START));
    let restarted = RateLimitPolicy::new("standard", 100, 60).with_clock(clock);
    restarted.bind_store(store);

    for _ in 0..2 {
        let mut ctx = RequestContext::new("dave");
        assert!(restarted.pre_execute(&mut ctx).await.unwrap().allowed());
    }
    let mut ctx = RequestContext::new("dave");
    assert!(restarted.pre_execute(&mut ctx).await.unwrap().is_denied());
    assert_eq!(restarted.limits().max_requests, 2);
}

#[tokio::test]
async fn evaluation_before_setup_is_a_config_error() {
    let limiter = RateLimitPolicy::new("standard", 1, 1);
    let mut ctx = RequestContext::new("erin");
    let err = limiter.pre_execute(&mut ctx).await.unwrap_err();
    assert_eq!(err.error_type().as_str(), "PolicyConfigError");
}

#[test]
fn export_reports_limits() {
    let limiter = RateLimitPolicy::new("standard", 3, 60);
    let e = limiter.export();
    assert_eq!(e.policy_type, "rate_limit");
    assert_eq!(e.config, json!({ "max_requests": 3, "window_seconds": 60 }));
    assert_eq!(serde_json::to_value(&e.phase).unwrap(), json!(["pre"]));
}
