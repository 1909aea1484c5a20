//! Policy-set config loader (strict parsing).

pub mod schema;

use std::fs;
use std::path::Path;

use policygate_core::error::{GateError, Result};
use policygate_core::PolicyManager;

use crate::factory::{PolicyFactory, PolicyRegistry};
use crate::store::open_store;

pub use schema::{validate_policy_list, PolicyConfig, PolicySetConfig};

pub fn load_from_file(path: impl AsRef<Path>) -> Result<PolicySetConfig> {
    let path = path.as_ref();
    let s = fs::read_to_string(path).map_err(|e| {
        GateError::Internal(format!("read config failed ({}): {e}", path.display()))
    })?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<PolicySetConfig> {
    let cfg: PolicySetConfig = serde_yaml::from_str(s)
        .map_err(|e| GateError::config("policy_set", format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

impl PolicySetConfig {
    /// Open the store, build every policy and register them in order.
    pub async fn build_manager(&self, registry: PolicyRegistry) -> Result<PolicyManager> {
        let store = open_store(&self.store)?;
        let mut factory = PolicyFactory::with_registry(registry);
        let policies = factory.create_all(&self.policies)?;

        let mut manager = PolicyManager::new(store);
        for policy in policies {
            manager.add_policy(policy).await?;
        }
        tracing::info!(policies = manager.len(), "policy chain built");
        Ok(manager)
    }
}
