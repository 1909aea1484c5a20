//! policygate runner
//!
//! - `run` (default): one JSON request on stdin, one JSON response on
//!   stdout, exit 0 only on success
//! - `export --config <file>`: build the chain from a policy-set file and
//!   print its export
//!
//! Logs go to stderr; stdout carries the protocol only.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing_subscriber::{fmt, EnvFilter};

use policygate_core::{ErrorType, GateError};
use policygate_engine::config;
use policygate_engine::factory::PolicyRegistry;
use policygate_engine::runner::{Executor, RunnerInput, RunnerOutput};

/// Emitted if even the failure envelope cannot be serialized.
const FALLBACK_OUTPUT: &str = r#"{"success":false,"result":null,"error":"failed to serialize runner output","error_type":"InternalError","policy_result":null}"#;

#[derive(Parser)]
#[command(name = "policygate-runner", version, about = "Policy-enforced handler runner")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one request read from stdin.
    Run,
    /// Print the export of a policy-set file.
    Export {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run().await,
        Command::Export { config } => export(config).await,
    }
}

async fn run() -> ExitCode {
    let output = match read_request().await {
        Ok(input) => Executor::new().execute(input).await,
        Err(e) => RunnerOutput::from_error(&e),
    };
    emit(&output);
    ExitCode::from(output.exit_code())
}

async fn read_request() -> Result<RunnerInput, GateError> {
    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .map_err(|e| GateError::Validation(format!("cannot read stdin: {e}")))?;
    serde_json::from_str(&raw).map_err(|e| GateError::Validation(e.to_string()))
}

fn emit(output: &RunnerOutput) {
    match serde_json::to_string(output) {
        Ok(line) => println!("{line}"),
        Err(e) => {
            tracing::error!(error = %e, "runner output serialization failed");
            println!("{FALLBACK_OUTPUT}");
        }
    }
}

async fn export(path: PathBuf) -> ExitCode {
    let built = match config::load_from_file(&path) {
        Ok(cfg) => cfg.build_manager(PolicyRegistry::with_builtins()).await,
        Err(e) => Err(e),
    };
    let manager = match built {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, config = %path.display(), "export failed");
            emit(&RunnerOutput::from_error(&e));
            return ExitCode::FAILURE;
        }
    };
    match serde_json::to_string_pretty(&manager.export()) {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            emit(&RunnerOutput::failure(ErrorType::Internal, e.to_string()));
            ExitCode::FAILURE
        }
    }
}
