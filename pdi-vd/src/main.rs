//! pdi-vd - Verification & decision pipeline CLI
//!
//! Reads an analysis request (JSON), runs verification, scoring and
//! synthesis, and prints the intelligence report as JSON on stdout.
//! Logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pdi_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use pdi_common::events::{EventBus, PipelineEvent};
use pdi_vd::db::{MemoryStore, ResultStore, SqliteStore};
use pdi_vd::synthesis::HttpSynthesizer;
use pdi_vd::types::CategoryResult;
use pdi_vd::{AnalysisRequest, PipelineConfig, PipelineOrchestrator};
use serde::Deserialize;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const SERVICE_NAME: &str = "pdi-vd";

/// Command-line arguments for pdi-vd
#[derive(Parser, Debug)]
#[command(name = "pdi-vd")]
#[command(about = "Verification & decision pipeline for pharmaceutical intelligence")]
#[command(version)]
struct Cli {
    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline over an analysis request
    Run {
        /// Analysis request (JSON object, or an array for a batch)
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        runtime: RuntimeArgs,

        /// Override the worker pool size
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Re-run scoring, verdicts and synthesis over merged category results
    Reassess {
        /// Merged results (JSON: {request_id?, drug_name, results: [...]})
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        runtime: RuntimeArgs,
    },

    /// Validate the configuration and print it as TOML
    CheckConfig,
}

#[derive(Args, Debug)]
struct RuntimeArgs {
    /// SQLite database for results and audit records (in-memory when absent)
    #[arg(long, env = "PDI_DB")]
    db: Option<PathBuf>,

    /// Base URL of an OpenAI-compatible endpoint for narratives
    #[arg(long, env = "PDI_LLM_BASE_URL")]
    llm_base_url: Option<String>,

    #[arg(long, env = "PDI_LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,

    #[arg(long, env = "PDI_LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,
}

/// Input of the `reassess` command
#[derive(Debug, Deserialize)]
struct ReassessInput {
    #[serde(default = "Uuid::new_v4")]
    request_id: Uuid,
    drug_name: String,
    results: Vec<CategoryResult>,
}

/// A single request or a batch
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RequestInput {
    Single(AnalysisRequest),
    Batch(Vec<AnalysisRequest>),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::CheckConfig => {
            let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
            info!("Configuration is valid");
        }
        Command::Run { input, runtime, workers } => {
            let mut config = config;
            if let Some(workers) = workers {
                config.orchestration.worker_pool_size = workers;
            }
            let orchestrator = build_orchestrator(config, &runtime).await?;

            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read request {}", input.display()))?;
            let requests = match serde_json::from_str::<RequestInput>(&text).context("Invalid request JSON")? {
                RequestInput::Single(request) => vec![request],
                RequestInput::Batch(requests) => requests,
            };

            let mut reports = Vec::with_capacity(requests.len());
            for outcome in orchestrator.process_batch(requests).await {
                reports.push(outcome.context("Request failed")?);
            }
            if reports.len() == 1 {
                println!("{}", serde_json::to_string_pretty(&reports[0])?);
            } else {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            }
        }
        Command::Reassess { input, runtime } => {
            let orchestrator = build_orchestrator(config, &runtime).await?;

            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read results {}", input.display()))?;
            let parsed: ReassessInput = serde_json::from_str(&text).context("Invalid results JSON")?;

            let report = orchestrator
                .reassess(parsed.request_id, &parsed.drug_name, parsed.results)
                .await
                .context("Reassessment failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Resolve and load the configuration (CLI → env → user file → defaults)
fn load_config(cli_path: Option<&Path>) -> Result<PipelineConfig> {
    let (path, source) = resolve_config_path(cli_path, CONFIG_ENV_VAR, SERVICE_NAME);
    match path {
        Some(path) => {
            info!("Configuration: {} (from {})", path.display(), source);
            Ok(PipelineConfig::load(&path)?)
        }
        None => {
            info!("Configuration: {}", source);
            let config = PipelineConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn build_orchestrator(config: PipelineConfig, runtime: &RuntimeArgs) -> Result<PipelineOrchestrator> {
    let store: Arc<dyn ResultStore> = match &runtime.db {
        Some(path) => Arc::new(
            SqliteStore::open(path)
                .await
                .with_context(|| format!("Failed to open database {}", path.display()))?,
        ),
        None => {
            debug!("No database configured, results kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let event_bus = EventBus::new(config.orchestration.event_capacity);
    spawn_event_logger(&event_bus);

    let mut orchestrator = PipelineOrchestrator::new(config, store)?.with_event_bus(event_bus);

    match &runtime.llm_base_url {
        Some(base_url) => {
            let synthesizer = HttpSynthesizer::new(base_url, &runtime.llm_model, runtime.llm_api_key.clone())
                .map_err(|e| anyhow::anyhow!("Failed to initialize narrative client: {}", e))?;
            info!("Narratives: {} ({})", synthesizer.endpoint(), runtime.llm_model);
            orchestrator = orchestrator.with_synthesizer(Arc::new(synthesizer));
        }
        None => warn!("No LLM endpoint configured, categories will be delivered without narratives"),
    }

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling in-flight categories");
            cancel.cancel();
        }
    });

    Ok(orchestrator)
}

/// Log pipeline events until the bus closes
fn spawn_event_logger(bus: &EventBus) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::StageStarted { category, stage, .. } => {
            debug!(category = %category, stage = %stage, "Stage started");
        }
        PipelineEvent::CategoryFinished { category, status, reason, .. } => {
            info!(category = %category, status = %status, reason = reason.as_deref().unwrap_or(""), "Category finished");
        }
        PipelineEvent::VerdictReached { route, decision, confidence, .. } => {
            info!(route = %route, decision = %decision, confidence, "Verdict reached");
        }
        other => debug!(event = other.event_type(), request_id = %other.request_id(), "Pipeline event"),
    }
}
