//! Built-in policies.
//!
//! Stateful policies (`rate_limit`, `access_group`, `bundle_subscription`)
//! mirror their configuration into the store under `_config` and reload it
//! on evaluation until they have synced in this process. Composites build
//! policies out of other policies.

mod access_group;
mod attribution;
mod bundle_subscription;
mod composite;
mod custom;
mod manual_review;
mod persisted;
mod prompt_filter;
mod rate_limit;
mod token_limit;
mod transaction;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use policygate_core::error::{GateError, Result};

pub use access_group::{AccessGroupConfig, AccessGroupPolicy, RESOLVED_DOCUMENTS_KEY};
pub use attribution::{AttributionConfig, AttributionPolicy, VerifyFn};
pub use bundle_subscription::{BundleSubscriptionConfig, BundleSubscriptionPolicy};
pub use composite::{AllOf, AnyOf, Not};
pub use custom::{CheckPhase, CustomPolicy};
pub use manual_review::{ManualReviewConfig, ManualReviewPolicy, ReviewFn};
pub use persisted::CONFIG_KEY;
pub use prompt_filter::{FilterFn, PromptFilterConfig, PromptFilterPolicy};
pub use rate_limit::{RateLimitConfig, RateLimitPolicy};
pub use token_limit::{TokenCounter, TokenLimitConfig, TokenLimitPolicy};
pub use transaction::{TransactionConfig, TransactionPolicy};

/// Parse a policy's `config` object; `null` counts as `{}`.
pub(crate) fn parse_config<T: DeserializeOwned>(policy: &str, config: &Value) -> Result<T> {
    let value = if config.is_null() {
        Value::Object(Map::new())
    } else {
        config.clone()
    };
    serde_json::from_value(value).map_err(|e| GateError::config(policy, e.to_string()))
}

/// Text stored at `key`; non-string values are rendered as JSON.
pub(crate) fn text_field(map: &Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
