//! Post-phase hold for human review.
//!
//! Every response is stashed in the store under a fresh review id and the
//! verdict is pending, unless the optional automated reviewer approves it
//! on the spot.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use policygate_core::error::Result;
use policygate_core::policy::{Phase, Policy, POST_ONLY};
use policygate_core::{PolicyResult, RequestContext, SharedStore, StoreSlot};

use super::parse_config;
use crate::factory::FromConfig;

const NS_PREFIX: &str = "manual_review";

/// Automated reviewer: gets the review payload, answers `{"approved": bool}`.
pub type ReviewFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManualReviewConfig {}

pub struct ManualReviewPolicy {
    name: String,
    namespace: String,
    reviewer: Option<ReviewFn>,
    store: StoreSlot,
}

fn new_review_id() -> String {
    Uuid::new_v4().simple().to_string().chars().take(12).collect()
}

impl ManualReviewPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            namespace: format!("{NS_PREFIX}:{name}"),
            name,
            reviewer: None,
            store: StoreSlot::new(),
        }
    }

    pub fn with_reviewer(mut self, reviewer: ReviewFn) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns `false` if the review id is unknown.
    pub async fn approve(&self, review_id: &str) -> Result<bool> {
        self.resolve(review_id, "approved", None).await
    }

    pub async fn reject(&self, review_id: &str, reason: &str) -> Result<bool> {
        self.resolve(review_id, "rejected", Some(reason)).await
    }

    async fn resolve(&self, review_id: &str, status: &str, reason: Option<&str>) -> Result<bool> {
        let store = self.store.get(&self.name)?;
        let Some(Value::Object(mut payload)) = store.get(&self.namespace, review_id).await? else {
            return Ok(false);
        };
        payload.insert("status".into(), json!(status));
        if let Some(reason) = reason {
            payload.insert("reject_reason".into(), json!(reason));
        }
        store
            .set(&self.namespace, review_id, Value::Object(payload))
            .await?;
        Ok(true)
    }

    /// Review payloads still waiting for a decision, in key order.
    pub async fn pending_reviews(&self) -> Result<Vec<Value>> {
        let store = self.store.get(&self.name)?;
        let mut pending = Vec::new();
        for key in store.list_keys(&self.namespace).await? {
            if let Some(entry) = store.get(&self.namespace, &key).await? {
                if entry.get("status").and_then(Value::as_str) == Some("pending") {
                    pending.push(entry);
                }
            }
        }
        Ok(pending)
    }
}

#[async_trait]
impl Policy for ManualReviewPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy_type(&self) -> &'static str {
        <Self as FromConfig>::POLICY_TYPE
    }

    fn description(&self) -> &'static str {
        "Holds responses for manual review before delivery"
    }

    fn phases(&self) -> &'static [Phase] {
        POST_ONLY
    }

    fn config(&self) -> Value {
        json!({ "has_review_callback": self.reviewer.is_some() })
    }

    async fn setup(&self, store: SharedStore) -> Result<()> {
        self.store.attach(store);
        Ok(())
    }

    async fn post_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        let store = self.store.get(&self.name)?;
        let review_id = new_review_id();
        let mut payload = json!({
            "review_id": review_id,
            "user_id": ctx.user_id(),
            "input": ctx.input(),
            "output": ctx.output(),
            "timestamp": ctx.timestamp.to_rfc3339(),
            "status": "pending",
        });

        if let Some(reviewer) = &self.reviewer {
            let verdict = reviewer(payload.clone()).await?;
            if verdict.get("approved").and_then(Value::as_bool) == Some(true) {
                payload["status"] = json!("approved");
                store.set(&self.namespace, &review_id, payload).await?;
                return Ok(PolicyResult::allow(&self.name));
            }
        }

        store.set(&self.namespace, &review_id, payload).await?;
        tracing::debug!(policy = %self.name, review_id = %review_id, "response held for review");
        Ok(
            PolicyResult::pend(&self.name, "Response held for manual review")
                .with_meta("review_id", review_id),
        )
    }
}

impl FromConfig for ManualReviewPolicy {
    const POLICY_TYPE: &'static str = "manual_review";

    fn from_config(name: &str, config: &Value) -> Result<Self> {
        let ManualReviewConfig {} = parse_config(name, config)?;
        Ok(Self::new(name))
    }
}
