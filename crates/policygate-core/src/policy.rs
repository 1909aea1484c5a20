//! The single abstraction every enforcement unit implements.
//!
//! A policy has a stable `name`, a type tag, and up to two checks: one run
//! before the handler (`pre_execute`) and one after (`post_execute`). Both
//! default to allow, so implementations only override the phases they care
//! about and list them in `phases()`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::context::RequestContext;
use crate::error::Result;
use crate::result::PolicyResult;
use crate::store::SharedStore;

/// Version reported in exports unless a policy overrides it.
pub const DEFAULT_POLICY_VERSION: &str = "1.0";

/// Evaluation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pre,
    Post,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Pre => "pre",
            Phase::Post => "post",
        }
    }
}

pub const PRE_ONLY: &[Phase] = &[Phase::Pre];
pub const POST_ONLY: &[Phase] = &[Phase::Post];
pub const BOTH_PHASES: &[Phase] = &[Phase::Pre, Phase::Post];

pub type SharedPolicy = Arc<dyn Policy>;

#[async_trait]
pub trait Policy: Send + Sync {
    /// Unique identifier, stable for the lifetime of registration.
    fn name(&self) -> &str;

    /// Type tag (`rate_limit`, `all_of`, ...). Matches the factory tag.
    fn policy_type(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    fn version(&self) -> &'static str {
        DEFAULT_POLICY_VERSION
    }

    fn enabled(&self) -> bool {
        true
    }

    /// Phases this policy actually checks.
    fn phases(&self) -> &'static [Phase];

    /// Static configuration snapshot (JSON object).
    fn config(&self) -> Value {
        Value::Object(Map::new())
    }

    /// Called once at registration with the manager's shared store.
    async fn setup(&self, _store: SharedStore) -> Result<()> {
        Ok(())
    }

    async fn pre_execute(&self, _ctx: &mut RequestContext) -> Result<PolicyResult> {
        Ok(PolicyResult::allow(self.name()))
    }

    async fn post_execute(&self, _ctx: &mut RequestContext) -> Result<PolicyResult> {
        Ok(PolicyResult::allow(self.name()))
    }

    fn export(&self) -> PolicyExport {
        PolicyExport {
            name: self.name().to_string(),
            policy_type: self.policy_type().to_string(),
            version: self.version().to_string(),
            enabled: self.enabled(),
            description: self.description().to_string(),
            phase: self.phases().to_vec(),
            config: self.config(),
        }
    }
}

/// JSON-serializable snapshot of one policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyExport {
    pub name: String,
    #[serde(rename = "type")]
    pub policy_type: String,
    pub version: String,
    pub enabled: bool,
    pub description: String,
    pub phase: Vec<Phase>,
    pub config: Value,
}

impl PolicyExport {
    /// Same shape as the serialized form, for nesting inside composite configs.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "type": self.policy_type,
            "version": self.version,
            "enabled": self.enabled,
            "description": self.description,
            "phase": self.phase.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            "config": self.config,
        })
    }
}
