//! Sliding-window request limiter, one timestamp list per user.
//!
//! User timestamps live in `rate_limit:{name}` keyed by user id. The limits
//! live apart in `rate_limit:{name}:config`, so no user id can shadow them.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use policygate_core::error::{GateError, Result};
use policygate_core::policy::{Phase, Policy, PRE_ONLY};
use policygate_core::{PolicyResult, RequestContext, SharedStore};

use super::parse_config;
use super::persisted::Persisted;
use crate::clock::{unix_seconds, SharedClock, SystemClock};
use crate::factory::FromConfig;

const NS_PREFIX: &str = "rate_limit";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    pub max_requests: u64,
    pub window_seconds: u64,
}

pub struct RateLimitPolicy {
    name: String,
    namespace: String,
    limits: Persisted<RateLimitConfig>,
    clock: SharedClock,
}

impl RateLimitPolicy {
    pub fn new(name: impl Into<String>, max_requests: u64, window_seconds: u64) -> Self {
        let name = name.into();
        let namespace = format!("{NS_PREFIX}:{name}");
        let limits = Persisted::new(
            &name,
            format!("{namespace}:config"),
            RateLimitConfig {
                max_requests,
                window_seconds,
            },
        );
        Self {
            name,
            namespace,
            limits,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Namespace holding the persisted limits under `CONFIG_KEY`.
    pub fn config_namespace(&self) -> &str {
        self.limits.namespace()
    }

    pub fn limits(&self) -> RateLimitConfig {
        self.limits.snapshot()
    }

    /// Change the limits at runtime.
    pub async fn set_limits(&self, max_requests: u64, window_seconds: u64) -> Result<()> {
        self.limits
            .update(|l| {
                l.max_requests = max_requests;
                l.window_seconds = window_seconds;
            })
            .await
    }

    /// Attach a store without priming it; limits are reloaded from the store.
    pub fn bind_store(&self, store: SharedStore) {
        self.limits.bind(store);
    }
}

fn stored_timestamps(state: Option<&Value>) -> Vec<f64> {
    state
        .and_then(|s| s.get("timestamps"))
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Policy for RateLimitPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy_type(&self) -> &'static str {
        <Self as FromConfig>::POLICY_TYPE
    }

    fn description(&self) -> &'static str {
        "Limits request rate per user within a time window"
    }

    fn phases(&self) -> &'static [Phase] {
        PRE_ONLY
    }

    fn config(&self) -> Value {
        let l = self.limits.snapshot();
        json!({
            "max_requests": l.max_requests,
            "window_seconds": l.window_seconds,
        })
    }

    async fn setup(&self, store: SharedStore) -> Result<()> {
        self.limits.setup(store).await
    }

    async fn pre_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        self.limits.reload_if_stale().await?;
        let RateLimitConfig {
            max_requests,
            window_seconds,
        } = self.limits.snapshot();
        let store = self.limits.store()?;
        let ns = self.namespace.as_str();

        let now = unix_seconds(self.clock.now());
        let window = window_seconds as f64;
        let cutoff = now - window;

        let state = store.get(ns, ctx.user_id()).await?;
        let mut timestamps = stored_timestamps(state.as_ref());
        timestamps.retain(|ts| *ts > cutoff);

        if timestamps.len() as u64 >= max_requests {
            let reset_at = timestamps.first().copied().unwrap_or(now) + window;
            tracing::debug!(policy = %self.name, user = %ctx.user_id(), "rate limit exhausted");
            return Ok(PolicyResult::deny(
                &self.name,
                format!("Rate limit exceeded: {max_requests} requests per {window_seconds}s"),
            )
            .with_meta("remaining", 0)
            .with_meta("reset_at", reset_at));
        }

        timestamps.push(now);
        let used = timestamps.len() as u64;
        store
            .set(ns, ctx.user_id(), json!({ "timestamps": timestamps }))
            .await?;

        ctx.metadata
            .insert(format!("{}_remaining", self.name), json!(max_requests - used));
        Ok(PolicyResult::allow(&self.name))
    }
}

impl FromConfig for RateLimitPolicy {
    const POLICY_TYPE: &'static str = "rate_limit";

    fn from_config(name: &str, config: &Value) -> Result<Self> {
        let cfg: RateLimitConfig = parse_config(name, config)?;
        if cfg.window_seconds == 0 {
            return Err(GateError::config(name, "window_seconds must be at least 1"));
        }
        Ok(Self::new(name, cfg.max_requests, cfg.window_seconds))
    }
}
