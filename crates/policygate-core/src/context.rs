use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Per-request data flowing through the chain.
///
/// Created once by the caller, mutated in place by policies, discarded after
/// the cycle. `user_id` and `input` are fixed at construction; `metadata` is
/// the only channel policies use to hand derived data downstream.
#[derive(Debug, Clone)]
pub struct RequestContext {
    user_id: String,
    input: Map<String, Value>,
    output: Map<String, Value>,
    /// Shared scratchpad. Use `"{policy_name}_{field}"` style keys.
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            input: Map::new(),
            output: Map::new(),
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_input(mut self, input: Map<String, Value>) -> Self {
        self.input = input;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn input(&self) -> &Map<String, Value> {
        &self.input
    }

    pub fn output(&self) -> &Map<String, Value> {
        &self.output
    }

    /// Set by the caller after the handler ran, before the post-phase.
    pub fn set_output(&mut self, output: Map<String, Value>) {
        self.output = output;
    }
}
