//! Boolean combinators over other policies.
//!
//! Composites forward `setup` to every child and nest the children's
//! exports under `config.policies` (`config.policy` for `Not`).

use async_trait::async_trait;
use serde_json::{json, Value};

use policygate_core::error::Result;
use policygate_core::policy::{Phase, Policy, SharedPolicy, BOTH_PHASES};
use policygate_core::{PolicyResult, RequestContext, SharedStore};

fn joined_names(children: &[SharedPolicy]) -> String {
    children
        .iter()
        .map(|p| p.name())
        .collect::<Vec<_>>()
        .join(",")
}

fn child_exports(children: &[SharedPolicy]) -> Vec<Value> {
    children.iter().map(|p| p.export().to_value()).collect()
}

async fn run_phase(
    policy: &SharedPolicy,
    phase: Phase,
    ctx: &mut RequestContext,
) -> Result<PolicyResult> {
    match phase {
        Phase::Pre => policy.pre_execute(ctx).await,
        Phase::Post => policy.post_execute(ctx).await,
    }
}

async fn setup_all(children: &[SharedPolicy], store: &SharedStore) -> Result<()> {
    for child in children {
        child.setup(store.clone()).await?;
    }
    Ok(())
}

/// Passes only if every child passes. Stops at the first non-allow.
pub struct AllOf {
    name: String,
    children: Vec<SharedPolicy>,
}

impl AllOf {
    pub fn new(children: Vec<SharedPolicy>) -> Self {
        Self {
            name: format!("all_of({})", joined_names(&children)),
            children,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    async fn evaluate(&self, phase: Phase, ctx: &mut RequestContext) -> Result<PolicyResult> {
        for child in &self.children {
            let result = run_phase(child, phase, ctx).await?;
            if !result.allowed() {
                return Ok(result);
            }
        }
        Ok(PolicyResult::allow(&self.name))
    }
}

#[async_trait]
impl Policy for AllOf {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy_type(&self) -> &'static str {
        "all_of"
    }

    fn description(&self) -> &'static str {
        "Passes only if all child policies pass"
    }

    fn phases(&self) -> &'static [Phase] {
        BOTH_PHASES
    }

    fn config(&self) -> Value {
        json!({
            "operator": "all_of",
            "policies": child_exports(&self.children),
        })
    }

    async fn setup(&self, store: SharedStore) -> Result<()> {
        setup_all(&self.children, &store).await
    }

    async fn pre_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        self.evaluate(Phase::Pre, ctx).await
    }

    async fn post_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        self.evaluate(Phase::Post, ctx).await
    }
}

/// Passes as soon as one child passes; otherwise returns the last child's
/// verdict as-is.
pub struct AnyOf {
    name: String,
    children: Vec<SharedPolicy>,
}

impl AnyOf {
    pub fn new(children: Vec<SharedPolicy>) -> Self {
        Self {
            name: format!("any_of({})", joined_names(&children)),
            children,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    async fn evaluate(&self, phase: Phase, ctx: &mut RequestContext) -> Result<PolicyResult> {
        let mut last_denial = None;
        for child in &self.children {
            let result = run_phase(child, phase, ctx).await?;
            if result.allowed() {
                return Ok(PolicyResult::allow(&self.name));
            }
            last_denial = Some(result);
        }
        Ok(last_denial
            .unwrap_or_else(|| PolicyResult::deny(&self.name, "No child policies configured")))
    }
}

#[async_trait]
impl Policy for AnyOf {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy_type(&self) -> &'static str {
        "any_of"
    }

    fn description(&self) -> &'static str {
        "Passes if at least one child policy passes"
    }

    fn phases(&self) -> &'static [Phase] {
        BOTH_PHASES
    }

    fn config(&self) -> Value {
        json!({
            "operator": "any_of",
            "policies": child_exports(&self.children),
        })
    }

    async fn setup(&self, store: SharedStore) -> Result<()> {
        setup_all(&self.children, &store).await
    }

    async fn pre_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        self.evaluate(Phase::Pre, ctx).await
    }

    async fn post_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        self.evaluate(Phase::Post, ctx).await
    }
}

/// Inverts one child: allow becomes deny, anything else becomes allow.
///
/// A pending child is not special-cased and therefore turns into an allow.
pub struct Not {
    name: String,
    child: SharedPolicy,
    deny_reason: String,
}

impl Not {
    pub fn new(child: SharedPolicy) -> Self {
        Self {
            name: format!("not({})", child.name()),
            deny_reason: format!("Inverted policy '{}' passed (expected denial)", child.name()),
            child,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_deny_reason(mut self, reason: impl Into<String>) -> Self {
        self.deny_reason = reason.into();
        self
    }

    fn invert(&self, result: PolicyResult) -> PolicyResult {
        if result.allowed() {
            return PolicyResult::deny(&self.name, self.deny_reason.clone());
        }
        if result.pending() {
            tracing::warn!(
                policy = %self.name,
                child = %result.policy_name(),
                "pending child result inverted into an allow"
            );
        }
        PolicyResult::allow(&self.name)
    }
}

#[async_trait]
impl Policy for Not {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy_type(&self) -> &'static str {
        "not"
    }

    fn description(&self) -> &'static str {
        "Inverts a policy's result"
    }

    fn phases(&self) -> &'static [Phase] {
        BOTH_PHASES
    }

    fn config(&self) -> Value {
        json!({
            "operator": "not",
            "policy": self.child.export().to_value(),
            "deny_reason": self.deny_reason,
        })
    }

    async fn setup(&self, store: SharedStore) -> Result<()> {
        self.child.setup(store).await
    }

    async fn pre_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        let result = self.child.pre_execute(ctx).await?;
        Ok(self.invert(result))
    }

    async fn post_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        let result = self.child.post_execute(ctx).await?;
        Ok(self.invert(result))
    }
}
