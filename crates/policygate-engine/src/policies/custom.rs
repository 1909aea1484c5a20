//! Wrap a plain predicate as a policy.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use policygate_core::error::Result;
use policygate_core::policy::{Phase, Policy, BOTH_PHASES, POST_ONLY, PRE_ONLY};
use policygate_core::{PolicyResult, RequestContext};

/// Which phase(s) run the predicate. The other phase allows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckPhase {
    #[default]
    Pre,
    Post,
    Both,
}

impl CheckPhase {
    fn covers(self, phase: Phase) -> bool {
        matches!(
            (self, phase),
            (CheckPhase::Both, _) | (CheckPhase::Pre, Phase::Pre) | (CheckPhase::Post, Phase::Post)
        )
    }
}

type SyncCheck = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;
type AsyncCheck = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, bool> + Send + Sync>;

enum Check {
    Sync(SyncCheck),
    Async(AsyncCheck),
}

pub struct CustomPolicy {
    name: String,
    phase: CheckPhase,
    check: Check,
    deny_reason: String,
}

impl CustomPolicy {
    /// `check` returns `true` to allow.
    pub fn new<F>(name: impl Into<String>, phase: CheckPhase, check: F) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            phase,
            check: Check::Sync(Arc::new(check)),
            deny_reason: "Custom policy check failed".to_string(),
        }
    }

    /// Async predicate. It gets a snapshot of the context, so it cannot
    /// write metadata.
    pub fn new_async<F, Fut>(name: impl Into<String>, phase: CheckPhase, check: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let boxed: AsyncCheck =
            Arc::new(move |ctx| -> BoxFuture<'static, bool> { Box::pin(check(ctx)) });
        Self {
            name: name.into(),
            phase,
            check: Check::Async(boxed),
            deny_reason: "Custom policy check failed".to_string(),
        }
    }

    pub fn with_deny_reason(mut self, reason: impl Into<String>) -> Self {
        self.deny_reason = reason.into();
        self
    }

    async fn run(&self, phase: Phase, ctx: &RequestContext) -> PolicyResult {
        if !self.phase.covers(phase) {
            return PolicyResult::allow(&self.name);
        }
        let passed = match &self.check {
            Check::Sync(f) => f(ctx),
            Check::Async(f) => f(ctx.clone()).await,
        };
        if passed {
            PolicyResult::allow(&self.name)
        } else {
            PolicyResult::deny(&self.name, self.deny_reason.clone())
        }
    }
}

#[async_trait]
impl Policy for CustomPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy_type(&self) -> &'static str {
        "custom"
    }

    fn description(&self) -> &'static str {
        "Custom callable-based policy"
    }

    fn phases(&self) -> &'static [Phase] {
        match self.phase {
            CheckPhase::Pre => PRE_ONLY,
            CheckPhase::Post => POST_ONLY,
            CheckPhase::Both => BOTH_PHASES,
        }
    }

    fn config(&self) -> Value {
        json!({
            "phase": self.phase,
            "deny_reason": self.deny_reason,
            "has_check": true,
        })
    }

    async fn pre_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        Ok(self.run(Phase::Pre, ctx).await)
    }

    async fn post_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        Ok(self.run(Phase::Post, ctx).await)
    }
}
