//! Verdict produced by a single pre/post check.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{GateError, Result};

/// Immutable outcome of one policy evaluation.
///
/// Fields are private so that `pending` can only ever be set together with
/// `allowed = false`; build values through [`PolicyResult::allow`],
/// [`PolicyResult::deny`] or [`PolicyResult::pend`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyResult {
    allowed: bool,
    policy_name: String,
    reason: String,
    pending: bool,
    metadata: Map<String, Value>,
}

impl PolicyResult {
    pub fn allow(policy_name: impl Into<String>) -> Self {
        Self {
            allowed: true,
            policy_name: policy_name.into(),
            reason: String::new(),
            pending: false,
            metadata: Map::new(),
        }
    }

    pub fn deny(policy_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            policy_name: policy_name.into(),
            reason: reason.into(),
            pending: false,
            metadata: Map::new(),
        }
    }

    /// Not allowed yet, awaiting out-of-band resolution.
    pub fn pend(policy_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            policy_name: policy_name.into(),
            reason: reason.into(),
            pending: true,
            metadata: Map::new(),
        }
    }

    /// Attach one structured detail (retry hints, ticket ids, ...).
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn allowed(&self) -> bool {
        self.allowed
    }

    pub fn pending(&self) -> bool {
        self.pending
    }

    /// Terminal refusal (not allowed and not pending).
    pub fn is_denied(&self) -> bool {
        !self.allowed && !self.pending
    }

    pub fn policy_name(&self) -> &str {
        &self.policy_name
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Turn a non-allow verdict into `GateError::Denied` / `GateError::Pending`.
    pub fn into_verdict(self) -> Result<Self> {
        if self.allowed {
            Ok(self)
        } else if self.pending {
            Err(GateError::Pending(Box::new(self)))
        } else {
            Err(GateError::Denied(Box::new(self)))
        }
    }
}
