//! Wire types of the runner protocol (one JSON request in, one JSON
//! response out).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use policygate_core::{ErrorType, GateError, PolicyResult};

use crate::config::PolicyConfig;
use crate::store::StoreConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    Model,
    #[default]
    DataSource,
}

impl EndpointType {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointType::Model => "model",
            EndpointType::DataSource => "data_source",
        }
    }
}

/// Chat message for model endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionContext {
    pub user_id: String,
    #[serde(default)]
    pub endpoint_slug: String,
    #[serde(default)]
    pub endpoint_type: EndpointType,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerInput {
    #[serde(rename = "type")]
    pub endpoint_type: EndpointType,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<Message>>,
    pub context: ExecutionContext,
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub handler_path: String,
    #[serde(default)]
    pub work_dir: String,
    /// Passed through to the input map for ledger confirmation.
    #[serde(default)]
    pub transaction_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyResultSchema {
    pub allowed: bool,
    #[serde(default)]
    pub policy_name: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl PolicyResultSchema {
    /// Whole chain allowed.
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            policy_name: String::new(),
            reason: String::new(),
            pending: false,
            metadata: Map::new(),
        }
    }
}

impl From<&PolicyResult> for PolicyResultSchema {
    fn from(r: &PolicyResult) -> Self {
        Self {
            allowed: r.allowed(),
            policy_name: r.policy_name().to_string(),
            reason: r.reason().to_string(),
            pending: r.pending(),
            metadata: r.metadata().clone(),
        }
    }
}

/// Response envelope. Every field is always present on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerOutput {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_type: String,
    #[serde(default)]
    pub policy_result: Option<PolicyResultSchema>,
}

impl RunnerOutput {
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: String::new(),
            error_type: String::new(),
            policy_result: Some(PolicyResultSchema::allowed()),
        }
    }

    /// Denied or pending verdict from the chain.
    pub fn denied(result: &PolicyResult) -> Self {
        let error = if result.reason().is_empty() {
            "Policy denied".to_string()
        } else {
            result.reason().to_string()
        };
        Self {
            success: false,
            result: Value::Null,
            error,
            error_type: ErrorType::Denied.as_str().to_string(),
            policy_result: Some(PolicyResultSchema::from(result)),
        }
    }

    pub fn failure(kind: ErrorType, error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: error.into(),
            error_type: kind.as_str().to_string(),
            policy_result: None,
        }
    }

    pub fn from_error(err: &GateError) -> Self {
        match err {
            GateError::Denied(r) | GateError::Pending(r) => Self::denied(r),
            other => Self::failure(other.error_type(), other.to_string()),
        }
    }

    /// Process exit code for this response.
    pub fn exit_code(&self) -> u8 {
        if self.success {
            0
        } else {
            1
        }
    }
}
