//! CLI front-end: reads newline-delimited JSON RPC requests from stdin,
//! writes newline-delimited JSON responses to stdout. Stand-in transport
//! for an embedding application's own (e.g. MCP) wire protocol.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use lateral_engine::config::EngineConfig;
use lateral_engine::engine::{self, SessionOperation, WorkflowEngine};
use lateral_engine::persistence::FsPersistence;
use lateral_engine::plan::PlanRequest;
use lateral_engine::telemetry::BufferedTelemetry;
use lateral_engine::validation::{DiscoverRequest, ExecuteStepRequest};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lateral-engine", about = "Lateral-thinking workflow engine")]
struct Cli {
    /// Directory persisted sessions are stored under.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Path to a JSON file with an EngineConfig override.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum RpcRequest {
    DiscoverTechniques(DiscoverRequest),
    PlanThinkingSession(PlanRequest),
    ExecuteThinkingStep(ExecuteStepRequest),
    SessionOperation(SessionOperation),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let bytes = std::fs::read(path)?;
            serde_json::from_slice(&bytes)?
        }
        None => EngineConfig::default(),
    };

    let persistence = Arc::new(FsPersistence::new(cli.data_dir));
    let telemetry = Arc::new(BufferedTelemetry::new(config.telemetry.clone()));
    let workflow_engine = WorkflowEngine::new(config, persistence, telemetry)?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&workflow_engine, &line).await;
        writeln!(out, "{response}")?;
        out.flush()?;
    }

    workflow_engine.stop();
    Ok(())
}

async fn handle_line(workflow_engine: &WorkflowEngine, line: &str) -> String {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            return engine::into_envelope(&lateral_engine::EngineError::InvalidInput(e.to_string())).to_string();
        }
    };

    let result = match request {
        RpcRequest::DiscoverTechniques(req) => workflow_engine
            .discover_techniques(req)
            .and_then(|r| serde_json::to_value(r).map_err(Into::into)),
        RpcRequest::PlanThinkingSession(req) => workflow_engine
            .plan_thinking_session(req)
            .and_then(|r| serde_json::to_value(r).map_err(Into::into)),
        RpcRequest::ExecuteThinkingStep(req) => workflow_engine
            .execute_thinking_step(req)
            .await
            .and_then(|r| serde_json::to_value(r).map_err(Into::into)),
        RpcRequest::SessionOperation(op) => match workflow_engine.session_operation(op).await {
            Ok(r) => serde_json::to_value(r).map_err(Into::into),
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(value) => value.to_string(),
        Err(e) => engine::into_envelope(&e).to_string(),
    }
}
