//! Build policies from declarative `{name, type, config}` entries.
//!
//! Entries are processed in order. Composites name their children, and a
//! child must have been created by an earlier entry.

mod registry;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use policygate_core::error::{GateError, Result};
use policygate_core::SharedPolicy;

use crate::config::PolicyConfig;
use crate::policies::{parse_config, AllOf, AnyOf, Not};

pub use registry::{FromConfig, PolicyCtor, PolicyRegistry, COMPOSITE_TYPES};

const DEFAULT_NOT_DENY_REASON: &str = "Policy condition not met";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupRefs {
    #[serde(default)]
    policies: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NotRef {
    #[serde(default)]
    policy: String,
    #[serde(default)]
    deny_reason: Option<String>,
}

pub struct PolicyFactory {
    registry: PolicyRegistry,
    instances: HashMap<String, SharedPolicy>,
}

impl Default for PolicyFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyFactory {
    /// Factory with the built-in types.
    pub fn new() -> Self {
        Self::with_registry(PolicyRegistry::with_builtins())
    }

    pub fn with_registry(registry: PolicyRegistry) -> Self {
        Self {
            registry,
            instances: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PolicyRegistry {
        &mut self.registry
    }

    /// Create every entry in order. The first failure aborts the batch.
    pub fn create_all(&mut self, configs: &[PolicyConfig]) -> Result<Vec<SharedPolicy>> {
        let mut created = Vec::with_capacity(configs.len());
        for cfg in configs {
            let policy = self.create_one(cfg).map_err(|e| match e {
                GateError::Factory { .. } => e,
                other => factory_error(cfg, other.to_string()),
            })?;
            tracing::debug!(policy = %cfg.name, policy_type = %cfg.policy_type, "policy created");
            self.instances.insert(cfg.name.clone(), Arc::clone(&policy));
            created.push(policy);
        }
        Ok(created)
    }

    /// A policy created by this factory, by name.
    pub fn get_instance(&self, name: &str) -> Option<SharedPolicy> {
        self.instances.get(name).cloned()
    }

    fn create_one(&self, cfg: &PolicyConfig) -> Result<SharedPolicy> {
        match cfg.policy_type.as_str() {
            "all_of" | "any_of" | "not" => self.create_composite(cfg),
            tag => match self.registry.constructor(tag) {
                Some(ctor) => ctor(&cfg.name, &cfg.config),
                None => Err(factory_error(
                    cfg,
                    format!(
                        "Unknown policy type: '{tag}'. Available types: {}",
                        self.registry.registered_types().join(", ")
                    ),
                )),
            },
        }
    }

    fn create_composite(&self, cfg: &PolicyConfig) -> Result<SharedPolicy> {
        let kind = cfg.policy_type.as_str();
        if kind == "not" {
            let refs: NotRef = parse_config(&cfg.name, &cfg.config)?;
            if refs.policy.is_empty() {
                return Err(factory_error(
                    cfg,
                    format!("not policy '{}' requires 'policy' reference", cfg.name),
                ));
            }
            let child = self.resolve(cfg, &refs.policy)?;
            let reason = refs
                .deny_reason
                .unwrap_or_else(|| DEFAULT_NOT_DENY_REASON.to_string());
            return Ok(Arc::new(
                Not::new(child)
                    .with_name(&cfg.name)
                    .with_deny_reason(reason),
            ));
        }

        let refs: GroupRefs = parse_config(&cfg.name, &cfg.config)?;
        if refs.policies.is_empty() {
            return Err(factory_error(
                cfg,
                format!("{kind} policy '{}' requires 'policies' list", cfg.name),
            ));
        }
        let children = refs
            .policies
            .iter()
            .map(|child| self.resolve(cfg, child))
            .collect::<Result<Vec<_>>>()?;
        let policy: SharedPolicy = if kind == "all_of" {
            Arc::new(AllOf::new(children).with_name(&cfg.name))
        } else {
            Arc::new(AnyOf::new(children).with_name(&cfg.name))
        };
        Ok(policy)
    }

    fn resolve(&self, referrer: &PolicyConfig, name: &str) -> Result<SharedPolicy> {
        self.instances.get(name).cloned().ok_or_else(|| {
            factory_error(
                referrer,
                format!(
                    "Policy '{r}' references '{name}', but '{name}' is not defined. \
                     Ensure '{name}' is defined before '{r}' in the policies list.",
                    r = referrer.name
                ),
            )
        })
    }
}

fn factory_error(cfg: &PolicyConfig, message: impl Into<String>) -> GateError {
    GateError::Factory {
        policy: cfg.name.clone(),
        policy_type: cfg.policy_type.clone(),
        message: message.into(),
    }
}
