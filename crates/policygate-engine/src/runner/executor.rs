//! One full cycle: store -> chain -> pre -> handler -> post -> envelope.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::Instrument;

use policygate_core::error::{ErrorType, GateError, Result};
use policygate_core::{PolicyManager, RequestContext, SharedStore};

use super::handler::{load_handler, HandlerRequest, SharedHandler};
use super::schema::{EndpointType, RunnerInput, RunnerOutput};
use crate::factory::{PolicyFactory, PolicyRegistry};
use crate::store::open_store;

/// Drives one request through the chain and the handler.
///
/// The store, handler and registry can be injected; otherwise they come
/// from the request (`store`, `handler_path`) and the built-in registry.
#[derive(Clone, Default)]
pub struct Executor {
    store: Option<SharedStore>,
    handler: Option<SharedHandler>,
    registry: PolicyRegistry,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_handler(mut self, handler: SharedHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_registry(mut self, registry: PolicyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Never fails: errors and panics become a failure envelope.
    pub async fn execute(&self, input: RunnerInput) -> RunnerOutput {
        let span = tracing::info_span!(
            "runner.execute",
            user = %input.context.user_id,
            endpoint = %input.context.endpoint_slug,
            endpoint_type = input.endpoint_type.as_str(),
        );
        let this = self.clone();
        let task = tokio::spawn(async move { this.run(input).await }.instrument(span));

        match task.await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, error_type = e.error_type().as_str(), "cycle failed");
                RunnerOutput::from_error(&e)
            }
            Err(join) => {
                let detail = if join.is_panic() {
                    panic_message(join.into_panic())
                } else {
                    "execution cancelled".to_string()
                };
                tracing::error!(%detail, "cycle aborted");
                RunnerOutput::failure(ErrorType::Internal, detail)
            }
        }
    }

    async fn run(&self, input: RunnerInput) -> Result<RunnerOutput> {
        let store = match &self.store {
            Some(s) => Arc::clone(s),
            None => {
                let cfg = input.store.clone();
                tokio::task::spawn_blocking(move || open_store(&cfg))
                    .await
                    .map_err(|e| GateError::store("open", e))??
            }
        };

        let mut factory = PolicyFactory::with_registry(self.registry.clone());
        let policies = factory.create_all(&input.policies)?;
        let mut manager = PolicyManager::new(store);
        for policy in policies {
            manager.add_policy(policy).await?;
        }

        let mut ctx = RequestContext::new(input.context.user_id.clone())
            .with_input(build_input(&input))
            .with_metadata(input.context.metadata.clone());

        let pre = manager.check_pre_exec_policies(&mut ctx).await?;
        if !pre.allowed() {
            tracing::info!(
                policy = %pre.policy_name(),
                pending = pre.pending(),
                "pre-phase refused"
            );
            return Ok(RunnerOutput::denied(&pre));
        }

        let handler: SharedHandler = match &self.handler {
            Some(h) => Arc::clone(h),
            None => Arc::new(load_handler(&input.handler_path, &input.work_dir)?),
        };
        let request = HandlerRequest {
            endpoint_type: input.endpoint_type,
            input: handler_input(&input),
            metadata: ctx.metadata.clone(),
        };
        let result = handler
            .call(request)
            .await
            .map_err(|e| GateError::Execution(format!("Handler execution failed: {e}")))?;

        ctx.set_output(output_map(&result));
        let post = manager.check_post_exec_policies(&mut ctx).await?;
        if !post.allowed() {
            tracing::info!(
                policy = %post.policy_name(),
                pending = post.pending(),
                "post-phase refused"
            );
            return Ok(RunnerOutput::denied(&post));
        }

        tracing::info!("cycle succeeded");
        Ok(RunnerOutput::success(result))
    }
}

/// Input map seen by policies. Message lists also get a flattened `query`
/// so content checks treat both endpoint kinds alike.
pub fn build_input(input: &RunnerInput) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("type".into(), json!(input.endpoint_type.as_str()));
    if let Some(q) = &input.query {
        map.insert("query".into(), json!(q));
    }
    if let Some(messages) = &input.messages {
        map.insert("messages".into(), json!(messages));
        if !map.contains_key("query") {
            let flat = messages
                .iter()
                .filter(|m| !m.content.is_empty())
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            map.insert("query".into(), json!(flat));
        }
    }
    if let Some(token) = &input.transaction_token {
        map.insert("transaction_token".into(), json!(token));
    }
    map
}

fn handler_input(input: &RunnerInput) -> Value {
    match input.endpoint_type {
        EndpointType::Model => json!(input.messages.as_deref().unwrap_or_default()),
        EndpointType::DataSource => json!(input.query.as_deref().unwrap_or_default()),
    }
}

/// Objects are used as-is; anything else is wrapped under `result`.
fn output_map(result: &Value) -> Map<String, Value> {
    match result {
        Value::Object(m) => m.clone(),
        other => {
            let mut m = Map::new();
            m.insert("result".into(), other.clone());
            m
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic during execution: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic during execution: {s}")
    } else {
        "panic during execution".to_string()
    }
}
