//! Post-phase ledger confirmation.
//!
//! The caller reserved funds beforehand and put a confirmation token
//! (`transferId.salt.expiresAt.signature`) in the request input. After the
//! handler succeeds the transfer is confirmed over HTTP; every failure mode
//! (missing token, timeout, unreachable ledger, non-200) is a denial.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use policygate_core::error::{GateError, Result};
use policygate_core::policy::{Phase, Policy, POST_ONLY};
use policygate_core::{PolicyResult, RequestContext};

use super::parse_config;
use crate::factory::FromConfig;

pub const LEDGER_URL_ENV: &str = "LEDGER_URL";
pub const LEDGER_API_TOKEN_ENV: &str = "LEDGER_API_TOKEN";

fn default_token_field() -> String {
    "transaction_token".to_string()
}

fn default_timeout() -> f64 {
    30.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransactionConfig {
    /// Falls back to `LEDGER_URL`.
    #[serde(default)]
    pub ledger_url: Option<String>,
    /// Falls back to `LEDGER_API_TOKEN`.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_token_field")]
    pub token_field: String,
    /// Seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default)]
    pub price_per_request: f64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            ledger_url: None,
            api_token: None,
            token_field: default_token_field(),
            timeout: default_timeout(),
            price_per_request: 0.0,
        }
    }
}

pub struct TransactionPolicy {
    name: String,
    ledger_url: String,
    api_token: String,
    token_field: String,
    timeout_secs: f64,
    timeout: Duration,
    price_per_request: f64,
    client: reqwest::Client,
}

fn non_empty_or_env(value: Option<String>, var: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(var).ok())
        .unwrap_or_default()
}

/// First segment of a four-part token.
fn transfer_id(token: &str) -> Option<&str> {
    let parts: Vec<&str> = token.split('.').collect();
    match parts.as_slice() {
        [id, _, _, _] if !id.is_empty() => Some(*id),
        _ => None,
    }
}

impl TransactionPolicy {
    pub fn new(name: impl Into<String>, cfg: TransactionConfig) -> Result<Self> {
        let name = name.into();
        let timeout = Duration::try_from_secs_f64(cfg.timeout)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                GateError::config(&name, "timeout must be a positive number of seconds")
            })?;
        let ledger_url = non_empty_or_env(cfg.ledger_url, LEDGER_URL_ENV)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            ledger_url,
            api_token: non_empty_or_env(cfg.api_token, LEDGER_API_TOKEN_ENV),
            token_field: cfg.token_field,
            timeout_secs: cfg.timeout,
            timeout,
            price_per_request: cfg.price_per_request,
            client: reqwest::Client::new(),
            name,
        })
    }

    fn deny(&self, reason: impl Into<String>) -> PolicyResult {
        PolicyResult::deny(&self.name, reason)
    }
}

#[async_trait]
impl Policy for TransactionPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy_type(&self) -> &'static str {
        <Self as FromConfig>::POLICY_TYPE
    }

    fn description(&self) -> &'static str {
        "Confirms transactions with an external ledger after execution"
    }

    fn phases(&self) -> &'static [Phase] {
        POST_ONLY
    }

    fn config(&self) -> Value {
        json!({
            "ledger_url": (!self.ledger_url.is_empty()).then_some(&self.ledger_url),
            "token_field": self.token_field,
            "timeout": self.timeout_secs,
            "has_api_token": !self.api_token.is_empty(),
            "price_per_request": self.price_per_request,
        })
    }

    async fn post_execute(&self, ctx: &mut RequestContext) -> Result<PolicyResult> {
        let token = match ctx.input().get(&self.token_field).and_then(Value::as_str) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => {
                let reason = format!("{} required in request input", self.token_field);
                return Ok(self.deny(reason));
            }
        };
        let Some(transfer) = transfer_id(&token) else {
            return Ok(self.deny("Invalid token format: could not extract transfer ID"));
        };
        if self.ledger_url.is_empty() {
            return Ok(self.deny(
                "Ledger URL not configured (set ledger_url or LEDGER_URL env var)",
            ));
        }
        if self.api_token.is_empty() {
            return Ok(self.deny(
                "Ledger API token not configured (set api_token or LEDGER_API_TOKEN env var)",
            ));
        }

        let url = format!("{}/v1/transfers/{}/confirm", self.ledger_url, transfer);
        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Idempotency-Key", Uuid::new_v4().to_string())
            .json(&json!({ "confirmation_token": token }))
            .send();

        let verdict = match tokio::time::timeout(self.timeout, request).await {
            Err(_) => self.deny(format!(
                "Ledger confirmation timed out after {} seconds",
                self.timeout_secs
            )),
            Ok(Err(e)) if e.is_timeout() => self.deny(format!(
                "Ledger confirmation timed out after {} seconds",
                self.timeout_secs
            )),
            Ok(Err(e)) if e.is_connect() => self.deny("Could not connect to ledger"),
            Ok(Err(e)) => self.deny(format!("Ledger confirmation error: {e}")),
            Ok(Ok(resp)) if resp.status() == StatusCode::OK => {
                ctx.metadata
                    .insert(format!("{}_confirmed", self.name), Value::Bool(true));
                PolicyResult::allow(&self.name)
            }
            Ok(Ok(resp)) => self.deny(format!(
                "Ledger confirmation failed: HTTP {}",
                resp.status().as_u16()
            )),
        };
        if !verdict.allowed() {
            tracing::warn!(
                policy = %self.name,
                transfer = %transfer,
                reason = %verdict.reason(),
                "ledger confirmation refused"
            );
        }
        Ok(verdict)
    }
}

impl FromConfig for TransactionPolicy {
    const POLICY_TYPE: &'static str = "transaction";

    fn from_config(name: &str, config: &Value) -> Result<Self> {
        Self::new(name, parse_config(name, config)?)
    }
}
