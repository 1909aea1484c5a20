//! Requires a verified attribution URL before access.
//!
//! Verification goes through an async verifier if one is set, otherwise
//! through the per-user `verified_urls` list kept in the store.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};

use policygate_core::error::Result;
use policygate_core::policy::{Phase, Policy, PRE_ONLY};
use policygate_core::{PolicyResult, RequestContext, SharedStore, StoreSlot};

use super::parse_config;
use crate::factory::FromConfig;

const NS_PREFIX: &str = "attribution";

/// `(user_id, url) -> verified`.
pub type VerifyFn = Arc<dyn Fn(String, String) -> BoxFuture<'static, bool> + Send + Sync>;

fn default_url_key() -> String {
    "attribution_url".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributionConfig {
    #[serde(default = "default_url_key")]
    pub url_input_key: String,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            url_input_key: default_url_key(),
        }
    }
}

pub struct AttributionPolicy {
    name: String,
    namespace: String,
    url_key: String,
    verifier: Option<VerifyFn>,
    store: StoreSlot,
}

impl AttributionPolicy {
    pub fn new(name: impl Into<String>, cfg: AttributionConfig) -> Self {
        let name = name.into();
        Self {
            namespace: format!("{NS_PREFIX}:{name}"),
            name,
            url_key: cfg.url_input_key,
            verifier: None,
            store: StoreSlot::new(),
        }
    }

    pub fn with_verifier(mut self, verifier: VerifyFn) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn verified_urls(&self, store: &SharedStore, user_id: &str) -> Result<Vec<Value>> {
        let state = store.get(&self.namespace, user_id).await?;
        Ok(state
            .as_ref()
            .and_then(|s| s.get("verified_urls"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Record `url` as verified for `user_id`.
    pub async fn add_verified_url(&self, user_id: &str, url: &str) -> Result<()> {
        let store = self.store.get(&self.name)?;
        let mut urls = self.verified_urls(&store, user_id).await?;
        let url = Value::String(url.to_string());
        if !urls.contains(&url) {
            urls.push(url);
        }
        store
            .set(&self.namespace, user_id, json!({ "verified_urls": urls }))
            .await
    }

    async fn check_store(&self, user_id: &str, url: &str) -> Result<bool> {
        if url.is_empty() {
            return Ok(false);
        }
        let store = self.store.get(&self.name)?;
        let urls = self.verified_urls(&store, user_id).await?;
        Ok(urls.iter().any(|u| u.as_str() == Some(url)))
    }
}

#[async_trait]
impl Policy for AttributionPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy_type(&self) -> &'static str {
        <Self as FromConfig>::POLICY_TYPE
    }

    fn description(&self) -> &'static str {
        "Requires verified attribution before access"
    }

    fn phases(&self) -> &'static [Phase] {
        PRE_ONLY
    }

    fn config(&self) -> Value {
        json!({
            "url_input_key": self.url_key,
            "has_verify_callback": self.verifier.is_some(),
        })
    }

    async fn setup(&self, store: SharedStore) -> Result<()> {
        self.store.attach(store);
        Ok(())
    }

    async fn pre_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        let url = ctx
            .input()
            .get(&self.url_key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let user = ctx.user_id().to_string();

        let verified = match &self.verifier {
            Some(verify) => verify(user, url).await,
            None => self.check_store(&user, &url).await?,
        };
        if !verified {
            return Ok(PolicyResult::deny(
                &self.name,
                "Attribution not verified. Provide a valid attribution URL.",
            ));
        }

        ctx.metadata
            .insert(format!("{}_verified", self.name), Value::Bool(true));
        Ok(PolicyResult::allow(&self.name))
    }
}

impl FromConfig for AttributionPolicy {
    const POLICY_TYPE: &'static str = "attribution";

    fn from_config(name: &str, config: &Value) -> Result<Self> {
        Ok(Self::new(name, parse_config(name, config)?))
    }
}
