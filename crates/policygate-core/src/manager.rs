//! Chain evaluator.
//!
//! Policies run in registration order. Each phase stops at the first result
//! that is not an allow (denial or pending) and returns it untouched; later
//! policies are not invoked. Registration is append-only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::Result;
use crate::policy::{PolicyExport, SharedPolicy};
use crate::result::PolicyResult;
use crate::store::{MemoryStore, SharedStore};

/// Manager snapshot: every policy's export, in chain order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerExport {
    pub policies: Vec<PolicyExport>,
    pub policy_count: usize,
}

pub struct PolicyManager {
    store: SharedStore,
    policies: Vec<SharedPolicy>,
}

impl Default for PolicyManager {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }
}

impl PolicyManager {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            policies: Vec::new(),
        }
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    /// Inject the shared store, then append. Registration order is evaluation order.
    pub async fn add_policy(&mut self, policy: SharedPolicy) -> Result<()> {
        policy.setup(self.store()).await?;
        tracing::debug!(policy = %policy.name(), position = self.policies.len(), "policy registered");
        self.policies.push(policy);
        Ok(())
    }

    pub async fn check_pre_exec_policies(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        for policy in &self.policies {
            let result = policy.pre_execute(ctx).await?;
            if !result.allowed() {
                tracing::debug!(
                    policy = %result.policy_name(),
                    pending = result.pending(),
                    reason = %result.reason(),
                    "pre-exec chain stopped"
                );
                return Ok(result);
            }
        }
        Ok(PolicyResult::allow(""))
    }

    pub async fn check_post_exec_policies(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        for policy in &self.policies {
            let result = policy.post_execute(ctx).await?;
            if !result.allowed() {
                tracing::debug!(
                    policy = %result.policy_name(),
                    pending = result.pending(),
                    reason = %result.reason(),
                    "post-exec chain stopped"
                );
                return Ok(result);
            }
        }
        Ok(PolicyResult::allow(""))
    }

    /// First registered policy with this name.
    pub fn get_policy(&self, name: &str) -> Option<SharedPolicy> {
        self.policies.iter().find(|p| p.name() == name).cloned()
    }

    pub fn list_policies(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn export(&self) -> ManagerExport {
        let policies: Vec<PolicyExport> = self.policies.iter().map(|p| p.export()).collect();
        ManagerExport {
            policy_count: policies.len(),
            policies,
        }
    }
}
