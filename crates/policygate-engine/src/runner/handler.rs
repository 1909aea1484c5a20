//! User handlers invoked between the two phases.
//!
//! `load_handler` resolves a path to an isolated [`ProcessHandler`]: an
//! executable that receives `{type, input, metadata}` as JSON on stdin and
//! answers on stdout. Embedders can pass closures instead through
//! [`FnHandler`] and [`AsyncFnHandler`].

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use policygate_core::error::{GateError, Result};

use super::schema::EndpointType;

/// What a handler receives.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerRequest {
    #[serde(rename = "type")]
    pub endpoint_type: EndpointType,
    /// Query string (data sources) or message list (models).
    pub input: Value,
    /// Context metadata after the pre-phase.
    pub metadata: Map<String, Value>,
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request: HandlerRequest) -> Result<Value>;
}

pub type SharedHandler = Arc<dyn Handler>;

/// Handler that returns immediately.
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(HandlerRequest) -> Result<Value> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(HandlerRequest) -> Result<Value> + Send + Sync,
{
    async fn call(&self, request: HandlerRequest) -> Result<Value> {
        (self.f)(request)
    }
}

type BoxedAsyncFn = Arc<dyn Fn(HandlerRequest) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Handler whose result resolves later.
#[derive(Clone)]
pub struct AsyncFnHandler {
    f: BoxedAsyncFn,
}

impl AsyncFnHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(HandlerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |req| -> BoxFuture<'static, Result<Value>> { Box::pin(f(req)) }),
        }
    }
}

#[async_trait]
impl Handler for AsyncFnHandler {
    async fn call(&self, request: HandlerRequest) -> Result<Value> {
        (self.f)(request).await
    }
}

/// External executable run once per call.
#[derive(Debug, Clone)]
pub struct ProcessHandler {
    program: PathBuf,
    work_dir: Option<PathBuf>,
}

impl ProcessHandler {
    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }
}

fn exec_err(program: &Path, what: &str, e: impl std::fmt::Display) -> GateError {
    GateError::Execution(format!("{what} '{}': {e}", program.display()))
}

#[async_trait]
impl Handler for ProcessHandler {
    async fn call(&self, request: HandlerRequest) -> Result<Value> {
        let payload = serde_json::to_vec(&request)
            .map_err(|e| exec_err(&self.program, "cannot encode input for", e))?;

        let mut cmd = Command::new(&self.program);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| exec_err(&self.program, "cannot start", e))?;

        // feed stdin while draining stdout so neither pipe fills up
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&payload).await {
                // the program may exit without reading its input
                Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            }
        };
        let (fed, out) = tokio::join!(feed, child.wait_with_output());
        let out = out.map_err(|e| exec_err(&self.program, "cannot wait for", e))?;
        fed.map_err(|e| exec_err(&self.program, "cannot write input to", e))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(GateError::Execution(format!(
                "'{}' exited with {}: {}",
                self.program.display(),
                out.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&out.stdout);
        let text = stdout.trim();
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
    }
}

/// Resolve `handler_path` to a runnable handler. `work_dir`, if not empty,
/// becomes the program's working directory.
pub fn load_handler(handler_path: &str, work_dir: &str) -> Result<ProcessHandler> {
    if handler_path.trim().is_empty() {
        return Err(GateError::HandlerLoad("handler_path is empty".into()));
    }
    let path = Path::new(handler_path);
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(GateError::HandlerLoad(format!(
                "Handler file not found: {handler_path}"
            )));
        }
        Err(e) => {
            return Err(GateError::HandlerLoad(format!(
                "Failed to load handler {handler_path}: {e}"
            )));
        }
    };
    if !meta.is_file() {
        return Err(GateError::HandlerLoad(format!(
            "Handler path is not a file: {handler_path}"
        )));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(GateError::HandlerLoad(format!(
                "Handler is not executable: {handler_path}"
            )));
        }
    }

    let work_dir = if work_dir.trim().is_empty() {
        None
    } else {
        let dir = PathBuf::from(work_dir);
        if !dir.is_dir() {
            return Err(GateError::HandlerLoad(format!(
                "Handler work_dir is not a directory: {work_dir}"
            )));
        }
        Some(dir)
    };

    tracing::debug!(handler = %handler_path, "handler loaded");
    Ok(ProcessHandler {
        program: path.canonicalize().unwrap_or_else(|_| path.to_path_buf()),
        work_dir,
    })
}
