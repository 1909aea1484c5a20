//! Subscriber gate. Payment happens elsewhere; whoever processes it calls
//! `add_users` / `remove_users`. Plan fields are exported only.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use policygate_core::error::Result;
use policygate_core::policy::{Phase, Policy, PRE_ONLY};
use policygate_core::{PolicyResult, RequestContext, SharedStore};

use super::parse_config;
use super::persisted::Persisted;
use crate::factory::FromConfig;

const NS_PREFIX: &str = "bundle_subscription";

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleSubscriptionConfig {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub plan_name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub billing_cycle: String,
    #[serde(default)]
    pub invoice_url: String,
}

impl Default for BundleSubscriptionConfig {
    fn default() -> Self {
        Self {
            users: Vec::new(),
            plan_name: String::new(),
            price: 0.0,
            currency: default_currency(),
            billing_cycle: String::new(),
            invoice_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Subscribers {
    #[serde(default)]
    users: BTreeSet<String>,
}

pub struct BundleSubscriptionPolicy {
    name: String,
    plan_name: String,
    price: f64,
    currency: String,
    billing_cycle: String,
    invoice_url: String,
    subscribers: Persisted<Subscribers>,
}

impl BundleSubscriptionPolicy {
    pub fn new(name: impl Into<String>, cfg: BundleSubscriptionConfig) -> Self {
        let name = name.into();
        let subscribers = Persisted::new(
            &name,
            format!("{NS_PREFIX}:{name}"),
            Subscribers {
                users: cfg.users.into_iter().collect(),
            },
        );
        Self {
            name,
            plan_name: cfg.plan_name,
            price: cfg.price,
            currency: cfg.currency,
            billing_cycle: cfg.billing_cycle,
            invoice_url: cfg.invoice_url,
            subscribers,
        }
    }

    pub fn namespace(&self) -> &str {
        self.subscribers.namespace()
    }

    pub fn users(&self) -> BTreeSet<String> {
        self.subscribers.read(|s| s.users.clone())
    }

    pub async fn add_users<S: AsRef<str> + Sync>(&self, user_ids: &[S]) -> Result<()> {
        self.subscribers
            .update(|s| {
                s.users
                    .extend(user_ids.iter().map(|u| u.as_ref().to_string()))
            })
            .await
    }

    pub async fn remove_users<S: AsRef<str> + Sync>(&self, user_ids: &[S]) -> Result<()> {
        self.subscribers
            .update(|s| {
                for u in user_ids {
                    s.users.remove(u.as_ref());
                }
            })
            .await
    }

    pub fn bind_store(&self, store: SharedStore) {
        self.subscribers.bind(store);
    }
}

#[async_trait]
impl Policy for BundleSubscriptionPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy_type(&self) -> &'static str {
        <Self as FromConfig>::POLICY_TYPE
    }

    fn description(&self) -> &'static str {
        "Gates access behind an active subscription"
    }

    fn phases(&self) -> &'static [Phase] {
        PRE_ONLY
    }

    fn config(&self) -> Value {
        json!({
            "plan_name": self.plan_name,
            "price": self.price,
            "currency": self.currency,
            "billing_cycle": self.billing_cycle,
            "invoice_url": self.invoice_url,
        })
    }

    async fn setup(&self, store: SharedStore) -> Result<()> {
        self.subscribers.setup(store).await
    }

    async fn pre_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        self.subscribers.reload_if_stale().await?;

        let user = ctx.user_id();
        if self.subscribers.read(|s| s.users.contains(user)) {
            return Ok(PolicyResult::allow(&self.name));
        }

        let mut reason = format!("User '{user}' does not have an active subscription");
        if !self.plan_name.is_empty() {
            reason.push_str(&format!(" to plan '{}'", self.plan_name));
        }
        let mut denied = PolicyResult::deny(&self.name, reason);
        if !self.invoice_url.is_empty() {
            denied = denied.with_meta("invoice_url", self.invoice_url.clone());
        }
        Ok(denied)
    }
}

impl FromConfig for BundleSubscriptionPolicy {
    const POLICY_TYPE: &'static str = "bundle_subscription";

    fn from_config(name: &str, config: &Value) -> Result<Self> {
        Ok(Self::new(name, parse_config(name, config)?))
    }
}
