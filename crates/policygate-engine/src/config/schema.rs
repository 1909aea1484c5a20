use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use policygate_core::error::{GateError, Result};

use crate::store::StoreConfig;

/// One `{name, type, config}` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub policy_type: String,
    #[serde(default)]
    pub config: Value,
}

impl PolicyConfig {
    pub fn new(name: impl Into<String>, policy_type: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            policy_type: policy_type.into(),
            config,
        }
    }
}

/// A policy-set file: store plus an ordered policy list.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySetConfig {
    pub version: u32,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

impl PolicySetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(GateError::config(
                "policy_set",
                format!("unsupported version {}", self.version),
            ));
        }
        self.store.validate()?;
        validate_policy_list(&self.policies)
    }
}

/// Names must be non-empty and unique, types non-empty.
pub fn validate_policy_list(policies: &[PolicyConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for p in policies {
        if p.name.trim().is_empty() {
            return Err(GateError::config("policy_set", "policy name must not be empty"));
        }
        if p.policy_type.trim().is_empty() {
            return Err(GateError::config(&p.name, "policy type must not be empty"));
        }
        if !seen.insert(p.name.as_str()) {
            return Err(GateError::config(&p.name, "duplicate policy name"));
        }
    }
    Ok(())
}
