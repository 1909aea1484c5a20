//! Type tag -> constructor table.
//!
//! Each `PolicyFactory` owns its registry; nothing here is global, so tests
//! and embedders can register extra types without affecting one another.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use policygate_core::error::{GateError, Result};
use policygate_core::{Policy, SharedPolicy};

use crate::policies::{
    AccessGroupPolicy, AttributionPolicy, BundleSubscriptionPolicy, ManualReviewPolicy,
    PromptFilterPolicy, RateLimitPolicy, TokenLimitPolicy, TransactionPolicy,
};

/// Composite tags, resolved by the factory itself.
pub const COMPOSITE_TYPES: &[&str] = &["all_of", "any_of", "not"];

/// A policy buildable from `{name, config}`.
pub trait FromConfig: Policy + Sized + 'static {
    /// Tag the type declares for itself; must equal the registration tag.
    const POLICY_TYPE: &'static str;

    fn from_config(name: &str, config: &Value) -> Result<Self>;
}

pub type PolicyCtor = Arc<dyn Fn(&str, &Value) -> Result<SharedPolicy> + Send + Sync>;

#[derive(Clone)]
pub struct PolicyRegistry {
    ctors: HashMap<String, PolicyCtor>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl PolicyRegistry {
    /// Registry without any types.
    pub fn empty() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut r = Self::empty();
        r.insert::<AccessGroupPolicy>();
        r.insert::<RateLimitPolicy>();
        r.insert::<TokenLimitPolicy>();
        r.insert::<PromptFilterPolicy>();
        r.insert::<AttributionPolicy>();
        r.insert::<ManualReviewPolicy>();
        r.insert::<TransactionPolicy>();
        r.insert::<BundleSubscriptionPolicy>();
        r
    }

    fn insert<P: FromConfig>(&mut self) {
        let ctor: PolicyCtor = Arc::new(|name: &str, config: &Value| -> Result<SharedPolicy> {
            let policy: SharedPolicy = Arc::new(P::from_config(name, config)?);
            Ok(policy)
        });
        self.ctors.insert(P::POLICY_TYPE.to_string(), ctor);
    }

    fn check_tag(tag: &str) -> Result<()> {
        if tag.trim().is_empty() {
            return Err(GateError::config(tag, "policy type tag must not be empty"));
        }
        if COMPOSITE_TYPES.contains(&tag) {
            return Err(GateError::config(
                tag,
                format!("'{tag}' is reserved for composite policies"),
            ));
        }
        Ok(())
    }

    /// Register `P` under `tag`. Fails if `P` declares a different tag.
    pub fn register<P: FromConfig>(&mut self, tag: &str) -> Result<()> {
        Self::check_tag(tag)?;
        if P::POLICY_TYPE != tag {
            return Err(GateError::config(
                tag,
                format!(
                    "policy type declares '{}' but is being registered as '{tag}'",
                    P::POLICY_TYPE
                ),
            ));
        }
        self.insert::<P>();
        tracing::debug!(tag, "policy type registered");
        Ok(())
    }

    /// Register an ad-hoc constructor.
    pub fn register_fn<F>(&mut self, tag: &str, ctor: F) -> Result<()>
    where
        F: Fn(&str, &Value) -> Result<SharedPolicy> + Send + Sync + 'static,
    {
        Self::check_tag(tag)?;
        self.ctors.insert(tag.to_string(), Arc::new(ctor));
        tracing::debug!(tag, "policy constructor registered");
        Ok(())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.ctors.contains_key(tag) || COMPOSITE_TYPES.contains(&tag)
    }

    /// Every tag the factory accepts, composites included, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .ctors
            .keys()
            .cloned()
            .chain(COMPOSITE_TYPES.iter().map(|t| t.to_string()))
            .collect();
        tags.sort();
        tags
    }

    pub(crate) fn constructor(&self, tag: &str) -> Option<&PolicyCtor> {
        self.ctors.get(tag)
    }
}
