//! Input/output size budgets. Counts characters unless a counter is supplied.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use policygate_core::error::Result;
use policygate_core::policy::{Phase, Policy, BOTH_PHASES};
use policygate_core::{PolicyResult, RequestContext};

use super::{parse_config, text_field};
use crate::factory::FromConfig;

pub type TokenCounter = Arc<dyn Fn(&str) -> u64 + Send + Sync>;

fn default_input_path() -> String {
    "query".to_string()
}

fn default_output_path() -> String {
    "response".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenLimitConfig {
    /// `None` leaves the input side unchecked.
    #[serde(default)]
    pub max_input_tokens: Option<u64>,
    #[serde(default)]
    pub max_output_tokens: Option<u64>,
    #[serde(default = "default_input_path")]
    pub input_path: String,
    #[serde(default = "default_output_path")]
    pub output_path: String,
}

impl Default for TokenLimitConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: None,
            max_output_tokens: None,
            input_path: default_input_path(),
            output_path: default_output_path(),
        }
    }
}

pub struct TokenLimitPolicy {
    name: String,
    cfg: TokenLimitConfig,
    counter: Option<TokenCounter>,
}

impl TokenLimitPolicy {
    pub fn new(name: impl Into<String>, cfg: TokenLimitConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            counter: None,
        }
    }

    pub fn with_counter<F>(mut self, counter: F) -> Self
    where
        F: Fn(&str) -> u64 + Send + Sync + 'static,
    {
        self.counter = Some(Arc::new(counter));
        self
    }

    fn count(&self, text: &str) -> u64 {
        match &self.counter {
            Some(f) => f(text),
            None => text.chars().count() as u64,
        }
    }

    fn check(
        &self,
        side: &str,
        limit: Option<u64>,
        source: &Map<String, Value>,
        path: &str,
    ) -> std::result::Result<Option<u64>, PolicyResult> {
        let Some(limit) = limit else {
            return Ok(None);
        };
        let count = self.count(&text_field(source, path));
        if count > limit {
            return Err(PolicyResult::deny(
                &self.name,
                format!("{side} tokens ({count}) exceed limit ({limit})"),
            )
            .with_meta("token_count", count)
            .with_meta("limit", limit));
        }
        Ok(Some(count))
    }
}

#[async_trait]
impl Policy for TokenLimitPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy_type(&self) -> &'static str {
        <Self as FromConfig>::POLICY_TYPE
    }

    fn description(&self) -> &'static str {
        "Enforces maximum token/character counts on input and output"
    }

    fn phases(&self) -> &'static [Phase] {
        BOTH_PHASES
    }

    fn config(&self) -> Value {
        json!({
            "max_input_tokens": self.cfg.max_input_tokens,
            "max_output_tokens": self.cfg.max_output_tokens,
            "input_path": self.cfg.input_path,
            "output_path": self.cfg.output_path,
            "has_custom_counter": self.counter.is_some(),
        })
    }

    async fn pre_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        let checked = self.check(
            "Input",
            self.cfg.max_input_tokens,
            ctx.input(),
            &self.cfg.input_path,
        );
        match checked {
            Err(denied) => Ok(denied),
            Ok(counted) => {
                if let Some(count) = counted {
                    ctx.metadata
                        .insert(format!("{}_input_tokens", self.name), json!(count));
                }
                Ok(PolicyResult::allow(&self.name))
            }
        }
    }

    async fn post_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        let checked = self.check(
            "Output",
            self.cfg.max_output_tokens,
            ctx.output(),
            &self.cfg.output_path,
        );
        match checked {
            Err(denied) => Ok(denied),
            Ok(counted) => {
                if let Some(count) = counted {
                    ctx.metadata
                        .insert(format!("{}_output_tokens", self.name), json!(count));
                }
                Ok(PolicyResult::allow(&self.name))
            }
        }
    }
}

impl FromConfig for TokenLimitPolicy {
    const POLICY_TYPE: &'static str = "token_limit";

    fn from_config(name: &str, config: &Value) -> Result<Self> {
        Ok(Self::new(name, parse_config(name, config)?))
    }
}
