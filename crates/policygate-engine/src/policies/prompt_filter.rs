//! Content filter: case-insensitive regex patterns plus an optional
//! predicate, applied to the input (pre) and/or the output (post).

use std::sync::Arc;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use policygate_core::error::{GateError, Result};
use policygate_core::policy::{Phase, Policy, BOTH_PHASES};
use policygate_core::{PolicyResult, RequestContext};

use super::{parse_config, text_field};
use crate::factory::FromConfig;

/// Returns `true` when the text must be blocked.
pub type FilterFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

fn default_true() -> bool {
    true
}

fn default_input_path() -> String {
    "query".to_string()
}

fn default_output_path() -> String {
    "response".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptFilterConfig {
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default = "default_input_path")]
    pub input_path: String,
    #[serde(default = "default_output_path")]
    pub output_path: String,
    #[serde(default = "default_true")]
    pub check_input: bool,
    #[serde(default = "default_true")]
    pub check_output: bool,
}

impl Default for PromptFilterConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            input_path: default_input_path(),
            output_path: default_output_path(),
            check_input: true,
            check_output: true,
        }
    }
}

pub struct PromptFilterPolicy {
    name: String,
    cfg: PromptFilterConfig,
    compiled: Vec<Regex>,
    filter: Option<FilterFn>,
}

impl PromptFilterPolicy {
    /// Fails with a config error on the first pattern that does not compile.
    pub fn new(name: impl Into<String>, cfg: PromptFilterConfig) -> Result<Self> {
        let name = name.into();
        let compiled = cfg
            .patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| GateError::config(&name, format!("invalid pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name,
            cfg,
            compiled,
            filter: None,
        })
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    fn is_blocked(&self, text: &str) -> bool {
        self.compiled.iter().any(|re| re.is_match(text))
            || self.filter.as_ref().is_some_and(|f| f(text))
    }

    fn screen(&self, source: &Map<String, Value>, path: &str, reason: &str) -> PolicyResult {
        if self.is_blocked(&text_field(source, path)) {
            tracing::debug!(policy = %self.name, field = %path, "content filter matched");
            PolicyResult::deny(&self.name, reason)
        } else {
            PolicyResult::allow(&self.name)
        }
    }
}

#[async_trait]
impl Policy for PromptFilterPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy_type(&self) -> &'static str {
        <Self as FromConfig>::POLICY_TYPE
    }

    fn description(&self) -> &'static str {
        "Blocks input or output matching forbidden patterns"
    }

    fn phases(&self) -> &'static [Phase] {
        BOTH_PHASES
    }

    fn config(&self) -> Value {
        json!({
            "patterns": self.cfg.patterns,
            "has_filter_fn": self.filter.is_some(),
            "input_path": self.cfg.input_path,
            "output_path": self.cfg.output_path,
            "check_input": self.cfg.check_input,
            "check_output": self.cfg.check_output,
        })
    }

    async fn pre_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        if !self.cfg.check_input {
            return Ok(PolicyResult::allow(&self.name));
        }
        Ok(self.screen(ctx.input(), &self.cfg.input_path, "Input blocked by content filter"))
    }

    async fn post_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        if !self.cfg.check_output {
            return Ok(PolicyResult::allow(&self.name));
        }
        Ok(self.screen(ctx.output(), &self.cfg.output_path, "Output blocked by content filter"))
    }
}

impl FromConfig for PromptFilterPolicy {
    const POLICY_TYPE: &'static str = "prompt_filter";

    fn from_config(name: &str, config: &Value) -> Result<Self> {
        Self::new(name, parse_config(name, config)?)
    }
}
