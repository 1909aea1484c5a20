//! Shared error type across policygate crates.

use thiserror::Error;

use crate::result::PolicyResult;

/// Error categories reported on the runner wire (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Malformed or inconsistent policy configuration.
    Config,
    /// Persistence operation failed.
    Store,
    /// Policy construction from declarative config failed.
    Factory,
    /// External handler could not be located or loaded.
    HandlerLoad,
    /// External handler ran and failed.
    Execution,
    /// Request envelope could not be parsed.
    Validation,
    /// A policy refused the request.
    Denied,
    /// A policy deferred its verdict.
    Pending,
    /// Anything else.
    Internal,
}

impl ErrorType {
    /// String representation used in JSON responses (`error_type`).
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Config => "PolicyConfigError",
            ErrorType::Store => "StoreError",
            ErrorType::Factory => "PolicyFactoryError",
            ErrorType::HandlerLoad => "HandlerLoadError",
            ErrorType::Execution => "ExecutionError",
            ErrorType::Validation => "ValidationError",
            ErrorType::Denied => "PolicyDenied",
            ErrorType::Pending => "PolicyPending",
            ErrorType::Internal => "InternalError",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, GateError>;

/// Unified error type used by core and engine.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("policy '{policy}' misconfigured: {message}")]
    Config { policy: String, message: String },
    #[error("store error during '{operation}': {detail}")]
    Store {
        operation: &'static str,
        detail: String,
    },
    #[error("failed to create policy '{policy}' of type '{policy_type}': {message}")]
    Factory {
        policy: String,
        policy_type: String,
        message: String,
    },
    #[error("{0}")]
    HandlerLoad(String),
    #[error("{0}")]
    Execution(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("access denied by policy '{}': {}", .0.policy_name(), .0.reason())]
    Denied(Box<PolicyResult>),
    #[error("policy '{}' is pending: {}", .0.policy_name(), .0.reason())]
    Pending(Box<PolicyResult>),
    #[error("internal: {0}")]
    Internal(String),
}

impl GateError {
    pub fn config(policy: impl Into<String>, message: impl Into<String>) -> Self {
        GateError::Config {
            policy: policy.into(),
            message: message.into(),
        }
    }

    pub fn store(operation: &'static str, detail: impl ToString) -> Self {
        GateError::Store {
            operation,
            detail: detail.to_string(),
        }
    }

    /// Map internal error to a stable wire category.
    pub fn error_type(&self) -> ErrorType {
        match self {
            GateError::Config { .. } => ErrorType::Config,
            GateError::Store { .. } => ErrorType::Store,
            GateError::Factory { .. } => ErrorType::Factory,
            GateError::HandlerLoad(_) => ErrorType::HandlerLoad,
            GateError::Execution(_) => ErrorType::Execution,
            GateError::Validation(_) => ErrorType::Validation,
            GateError::Denied(_) => ErrorType::Denied,
            GateError::Pending(_) => ErrorType::Pending,
            GateError::Internal(_) => ErrorType::Internal,
        }
    }
}
