//! `exec-fetch` CLI entry-point.
//!
//! Available sub-commands:
//! - `fetch`     : fetch executions for a window and print them as JSON.
//! - `by-trigger`: same, keeping only one trigger kind.
//! - `classify`  : run structural trigger inference over a file of raw rows.
//!
//! Logs go to stderr; stdout carries only JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pipeline::classify::infer_trigger;
use pipeline::{
    ExecutionPipeline, ExecutionQuery, PipelineConfig, ProgressEvent, ReconcileOptions, TimeWindow,
};
use records::{ExecutionRecord, RawExecution, TriggerKind};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use transport::{HttpTransport, QueryTransport};

#[derive(Parser)]
#[command(
    name = "exec-fetch",
    about = "Adaptive execution retrieval and enrichment",
    version
)]
struct Cli {
    /// Query service endpoint.
    #[arg(long, env = "EXEC_FETCH_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Bearer token sent with every request.
    #[arg(long, env = "EXEC_FETCH_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// JSON pipeline configuration; unset fields keep their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct WindowArgs {
    /// Oldest end of the window, in days ago.
    #[arg(long, default_value_t = 7.0)]
    days: f64,

    /// Newest end of the window, in days ago.
    #[arg(long, default_value_t = 0.0)]
    newest_days: f64,

    /// Tenant id to fetch; repeat for several. Defaults to the configured tenant.
    #[arg(long = "tenant", short = 't')]
    tenants: Vec<String>,

    /// Only executions of this workflow.
    #[arg(long)]
    workflow: Option<String>,

    /// Run a reconciliation pass and print the merged result.
    #[arg(long)]
    reconcile: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch executions and print them as a JSON array.
    Fetch {
        #[command(flatten)]
        window: WindowArgs,

        /// Skip trigger enrichment.
        #[arg(long)]
        no_enrich: bool,
    },
    /// Fetch enriched executions with one trigger kind.
    ByTrigger {
        /// cron, webhook, app-platform, form-submission, sub-workflow,
        /// manual-or-test, skipped or unknown.
        kind: TriggerKind,

        #[command(flatten)]
        window: WindowArgs,
    },
    /// Classify raw execution rows offline, without any remote lookup.
    Classify {
        /// JSON file holding an array of raw execution rows.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Fetch { window, no_enrich } => {
            let mut pipeline = connect(cli.endpoint, cli.token, config)?;
            let query = build_query(&window).enrich(!no_enrich);
            let mut records = pipeline.fetch(&query).await?;
            if window.reconcile {
                reconcile(&mut pipeline, &mut records).await;
            }
            print_records(&records)?;
        }
        Command::ByTrigger { kind, window } => {
            let mut pipeline = connect(cli.endpoint, cli.token, config)?;
            let mut records = pipeline.fetch(&build_query(&window)).await?;
            if window.reconcile {
                reconcile(&mut pipeline, &mut records).await;
            }
            records.retain(|record| record.trigger_kind() == Some(kind));
            print_records(&records)?;
        }
        Command::Classify { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read file {}", path.display()))?;
            let rows: Vec<RawExecution> = serde_json::from_str(&content)
                .context("file is not a JSON array of execution rows")?;

            let mut needs_context = 0;
            for row in rows {
                let record = ExecutionRecord::from(row);
                let inferred = infer_trigger(&record, &config.enrichment);
                if inferred.is_none() {
                    needs_context += 1;
                }
                println!("{}", json!({ "id": record.id, "trigger": inferred }));
            }
            info!(needs_context, "classification done");
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid config {}", path.display()))
}

fn connect(
    endpoint: Option<String>,
    token: Option<String>,
    config: PipelineConfig,
) -> Result<ExecutionPipeline> {
    let Some(endpoint) = endpoint else {
        bail!("no endpoint: pass --endpoint or set EXEC_FETCH_ENDPOINT");
    };
    let mut http = HttpTransport::new(endpoint);
    if let Some(token) = token {
        http = http.with_token(token);
    }
    info!(endpoint = http.endpoint(), "using query service");
    let transport: Arc<dyn QueryTransport> = Arc::new(http);
    Ok(ExecutionPipeline::new(transport, config)?)
}

fn build_query(args: &WindowArgs) -> ExecutionQuery {
    let mut query = ExecutionQuery::new(TimeWindow::between(args.newest_days, args.days));
    if !args.tenants.is_empty() {
        query = query.tenants(args.tenants.iter().cloned());
    }
    if let Some(workflow) = &args.workflow {
        query = query.workflow(workflow.clone());
    }
    query
}

async fn reconcile(pipeline: &mut ExecutionPipeline, records: &mut Vec<ExecutionRecord>) {
    if !pipeline.has_outstanding_work() {
        info!("nothing to reconcile");
        return;
    }
    let (tx, mut rx) = mpsc::unbounded_channel();
    let logger = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Started { total } => info!(total, "reconcile started"),
                ProgressEvent::Advanced { completed, total, recovered } => {
                    info!(completed, total, recovered, "reconcile progress")
                }
                ProgressEvent::TenantAbandoned { tenant_id } => {
                    warn!(tenant_id = %tenant_id, "tenant abandoned")
                }
                ProgressEvent::Finished { summary } => info!(?summary, "reconcile finished"),
            }
        }
    });

    pipeline
        .reconcile(records, ReconcileOptions::default().with_progress(tx))
        .await;
    if let Err(e) = logger.await {
        warn!(error = %e, "progress logger failed");
    }
}

fn print_records(records: &[ExecutionRecord]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(records)?);
    Ok(())
}
