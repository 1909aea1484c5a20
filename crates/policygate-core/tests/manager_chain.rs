//! Chain ordering, short-circuit and export behavior of `PolicyManager`.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use policygate_core::policy::{Phase, BOTH_PHASES};
use policygate_core::{
    ManagerExport, Policy, PolicyManager, PolicyResult, RequestContext, Result, SharedStore,
};

#[derive(Clone, Copy)]
enum Verdict {
    Allow,
    Deny,
    Pend,
}

struct Spy {
    name: String,
    pre: Verdict,
    post: Verdict,
    pre_calls: AtomicUsize,
    post_calls: AtomicUsize,
    setups: AtomicUsize,
}

impl Spy {
    fn new(name: &str, pre: Verdict, post: Verdict) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            pre,
            post,
            pre_calls: AtomicUsize::new(0),
            post_calls: AtomicUsize::new(0),
            setups: AtomicUsize::new(0),
        })
    }

    fn verdict(&self, v: Verdict) -> PolicyResult {
        match v {
            Verdict::Allow => PolicyResult::allow(&self.name),
            Verdict::Deny => PolicyResult::deny(&self.name, format!("{} says no", self.name)),
            Verdict::Pend => PolicyResult::pend(&self.name, "waiting").with_meta("ticket", "t-1"),
        }
    }
}

#[async_trait]
impl Policy for Spy {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy_type(&self) -> &'static str {
        "spy"
    }

    fn phases(&self) -> &'static [Phase] {
        BOTH_PHASES
    }

    fn config(&self) -> serde_json::Value {
        json!({ "limit": 3, "ratio": 0.25, "tags": ["a", "b"], "nested": { "on": true, "none": null } })
    }

    async fn setup(&self, _store: SharedStore) -> Result<()> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pre_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        self.pre_calls.fetch_add(1, Ordering::SeqCst);
        ctx.metadata.insert(format!("{}_seen", self.name), json!(true));
        Ok(self.verdict(self.pre))
    }

    async fn post_execute(&self, _ctx: &mut RequestContext) -> Result<PolicyResult> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict(self.post))
    }
}

async fn manager_with(spies: &[Arc<Spy>]) -> PolicyManager {
    let mut pm = PolicyManager::default();
    for p in spies {
        pm.add_policy(p.clone()).await.unwrap();
    }
    pm
}

#[tokio::test]
async fn all_allow_returns_anonymous_allow() {
    let spies = vec![
        Spy::new("a", Verdict::Allow, Verdict::Allow),
        Spy::new("b", Verdict::Allow, Verdict::Allow),
    ];
    let pm = manager_with(&spies).await;
    let mut ctx = RequestContext::new("alice");

    let res = pm.check_pre_exec_policies(&mut ctx).await.unwrap();
    assert!(res.allowed());
    assert_eq!(res.policy_name(), "");
    assert_eq!(ctx.metadata["a_seen"], json!(true));
    assert_eq!(ctx.metadata["b_seen"], json!(true));
}

#[tokio::test]
async fn denial_at_each_index_short_circuits() {
    for n in 1..=5usize {
        for k in 0..n {
            let spies: Vec<_> = (0..n)
                .map(|i| {
                    let v = if i == k { Verdict::Deny } else { Verdict::Allow };
                    Spy::new(&format!("p{i}"), v, Verdict::Allow)
                })
                .collect();
            let pm = manager_with(&spies).await;
            let mut ctx = RequestContext::new("alice");

            let res = pm.check_pre_exec_policies(&mut ctx).await.unwrap();
            assert!(res.is_denied());
            assert_eq!(res.policy_name(), format!("p{k}"));

            for (i, p) in spies.iter().enumerate() {
                let expected = usize::from(i <= k);
                assert_eq!(p.pre_calls.load(Ordering::SeqCst), expected, "n={n} k={k} i={i}");
            }
        }
    }
}

#[tokio::test]
async fn pending_stops_chain_and_is_reported_as_pending() {
    let spies = vec![
        Spy::new("a", Verdict::Allow, Verdict::Allow),
        Spy::new("review", Verdict::Allow, Verdict::Pend),
        Spy::new("after", Verdict::Allow, Verdict::Allow),
    ];
    let pm = manager_with(&spies).await;
    let mut ctx = RequestContext::new("alice");

    let res = pm.check_post_exec_policies(&mut ctx).await.unwrap();
    assert!(!res.allowed());
    assert!(res.pending());
    assert!(!res.is_denied());
    assert_eq!(res.policy_name(), "review");
    assert_eq!(res.metadata()["ticket"], json!("t-1"));
    assert_eq!(spies[2].post_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn setup_runs_once_per_registration() {
    let spies = vec![Spy::new("a", Verdict::Allow, Verdict::Allow)];
    let pm = manager_with(&spies).await;
    assert_eq!(spies[0].setups.load(Ordering::SeqCst), 1);
    assert_eq!(pm.len(), 1);
}

#[tokio::test]
async fn registration_order_is_preserved() {
    for n in 0..6usize {
        let names: Vec<String> = (0..n).rev().map(|i| format!("policy_{i}")).collect();
        let spies: Vec<_> = names
            .iter()
            .map(|name| Spy::new(name, Verdict::Allow, Verdict::Allow))
            .collect();
        let pm = manager_with(&spies).await;

        assert_eq!(pm.list_policies(), names);
        let export = pm.export();
        assert_eq!(export.policy_count, n);
        let exported: Vec<String> = export.policies.iter().map(|p| p.name.clone()).collect();
        assert_eq!(exported, names);
    }
}

#[tokio::test]
async fn get_policy_finds_first_match() {
    let spies = vec![
        Spy::new("a", Verdict::Allow, Verdict::Allow),
        Spy::new("b", Verdict::Deny, Verdict::Allow),
    ];
    let pm = manager_with(&spies).await;

    assert_eq!(pm.get_policy("b").unwrap().name(), "b");
    assert!(pm.get_policy("missing").is_none());
}

#[tokio::test]
async fn export_survives_json_round_trip() {
    let spies = vec![
        Spy::new("a", Verdict::Allow, Verdict::Allow),
        Spy::new("b", Verdict::Allow, Verdict::Allow),
    ];
    let pm = manager_with(&spies).await;
    let export = pm.export();

    let raw = serde_json::to_string(&export).unwrap();
    let back: ManagerExport = serde_json::from_str(&raw).unwrap();
    assert_eq!(back, export);

    let value = serde_json::to_value(&export).unwrap();
    assert_eq!(value["policy_count"], json!(2));
    let first = &value["policies"][0];
    assert_eq!(first["type"], json!("spy"));
    assert_eq!(first["version"], json!("1.0"));
    assert_eq!(first["enabled"], json!(true));
    assert_eq!(first["phase"], json!(["pre", "post"]));
    assert_eq!(first["config"]["ratio"], json!(0.25));
    assert_eq!(export.policies[0].to_value(), *first);
}

#[tokio::test]
async fn into_verdict_maps_outcomes() {
    let denied = PolicyResult::deny("p", "nope").into_verdict().unwrap_err();
    assert_eq!(denied.error_type().as_str(), "PolicyDenied");

    let pending = PolicyResult::pend("p", "later").into_verdict().unwrap_err();
    assert_eq!(pending.error_type().as_str(), "PolicyPending");

    assert!(PolicyResult::allow("p").into_verdict().is_ok());
}
