//! Membership gate that grants a fixed document list.
//!
//! Members pass and have the group's documents merged into
//! `metadata["resolved_documents"]`; several groups in one chain accumulate
//! a de-duplicated union in chain order.

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

const NS_PREFIX: &str = "access_group";

/// Metadata key holding the accumulated document ids.
pub const RESOLVED_DOCUMENTS_KEY: &str = "resolved_documents";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessGroupConfig {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub documents: Vec<String>,
}

/// Shape persisted under `_config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GroupState {
    #[serde(default)]
    owner: String,
    #[serde(default)]
    users: BTreeSet<String>,
    #[serde(default)]
    documents: Vec<String>,
}

pub struct AccessGroupPolicy {
    name: String,
    state: Persisted<GroupState>,
}

impl AccessGroupPolicy {
    pub fn new(name: impl Into<String>, cfg: AccessGroupConfig) -> Self {
        let name = name.into();
        let state = GroupState {
            owner: cfg.owner,
            users: cfg.users.into_iter().collect(),
            documents: cfg.documents,
        };
        Self {
            state: Persisted::new(&name, format!("{NS_PREFIX}:{name}"), state),
            name,
        }
    }

    pub fn namespace(&self) -> &str {
        self.state.namespace()
    }

    pub fn owner(&self) -> String {
        self.state.read(|s| s.owner.clone())
    }

    pub fn users(&self) -> BTreeSet<String> {
        self.state.read(|s| s.users.clone())
    }

    pub fn documents(&self) -> Vec<String> {
        self.state.read(|s| s.documents.clone())
    }

    pub async fn add_users<S: AsRef<str> + Sync>(&self, user_ids: &[S]) -> Result<()> {
        self.state
            .update(|s| {
                s.users
                    .extend(user_ids.iter().map(|u| u.as_ref().to_string()))
            })
            .await
    }

    pub async fn remove_users<S: AsRef<str> + Sync>(&self, user_ids: &[S]) -> Result<()> {
        self.state
            .update(|s| {
                for u in user_ids {
                    s.users.remove(u.as_ref());
                }
            })
            .await
    }

    /// Append documents not already granted, keeping their order.
    pub async fn add_documents<S: AsRef<str> + Sync>(&self, doc_ids: &[S]) -> Result<()> {
        self.state
            .update(|s| {
                for d in doc_ids {
                    let d = d.as_ref();
                    if !s.documents.iter().any(|x| x == d) {
                        s.documents.push(d.to_string());
                    }
                }
            })
            .await
    }

    pub async fn remove_documents<S: AsRef<str> + Sync>(&self, doc_ids: &[S]) -> Result<()> {
        self.state
            .update(|s| {
                s.documents
                    .retain(|d| !doc_ids.iter().any(|x| x.as_ref() == d))
            })
            .await
    }

    /// Attach a store without priming it; membership is reloaded from `_config`.
    pub fn bind_store(&self, store: SharedStore) {
        self.state.bind(store);
    }
}

/// Existing entries first, then `granted`, first occurrence wins.
fn merge_documents(existing: Option<&Value>, granted: &[String]) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::new();
    let prior = existing
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .cloned();
    for doc in prior.chain(granted.iter().map(|d| Value::String(d.clone()))) {
        if !merged.contains(&doc) {
            merged.push(doc);
        }
    }
    merged
}

#[async_trait]
impl Policy for AccessGroupPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy_type(&self) -> &'static str {
        <Self as FromConfig>::POLICY_TYPE
    }

    fn description(&self) -> &'static str {
        "Controls who can access which documents"
    }

    fn phases(&self) -> &'static [Phase] {
        PRE_ONLY
    }

    fn config(&self) -> Value {
        self.state.read(|s| {
            json!({
                "owner": s.owner,
                "users": s.users,
                "documents": s.documents,
            })
        })
    }

    async fn setup(&self, store: SharedStore) -> Result<()> {
        self.state.setup(store).await
    }

    async fn pre_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        self.state.reload_if_stale().await?;

        let user = ctx.user_id().to_string();
        let granted = self
            .state
            .read(|s| s.users.contains(&user).then(|| s.documents.clone()));
        let Some(granted) = granted else {
            return Ok(PolicyResult::deny(
                &self.name,
                format!(
                    "User '{user}' is not a member of access group '{}'",
                    self.name
                ),
            ));
        };

        let merged = merge_documents(ctx.metadata.get(RESOLVED_DOCUMENTS_KEY), &granted);
        ctx.metadata
            .insert(RESOLVED_DOCUMENTS_KEY.to_string(), Value::Array(merged));
        Ok(PolicyResult::allow(&self.name))
    }
}

impl FromConfig for AccessGroupPolicy {
    const POLICY_TYPE: &'static str = "access_group";

    fn from_config(name: &str, config: &Value) -> Result<Self> {
        Ok(Self::new(name, parse_config(name, config)?))
    }
}
