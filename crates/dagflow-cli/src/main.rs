use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dagflow_core::config::EngineConfig;
use dagflow_core::dag::{CancelToken, Engine, ExecutionMode, FinishedContext, OverallStatus};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "dagflow", version, about = "DAG workflow execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and execute a workflow description.
    Run(RunArgs),
    /// Load a workflow and report validation diagnostics without running it.
    Validate(WorkflowArgs),
    /// Render a workflow's graph as Graphviz DOT.
    Export(ExportArgs),
    /// Execute a workflow and print the resulting metrics snapshot.
    Metrics(MetricsArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    #[command(flatten)]
    workflow: WorkflowArgs,
    /// Concurrency discipline for this run. Defaults to the workflow's own
    /// setting, then the engine config default.
    #[arg(long, value_enum)]
    mode: Option<Mode>,
    /// JSON object of inputs passed to every node.
    #[arg(long, default_value = "{}")]
    inputs: String,
    /// Print the finished execution context as JSON instead of a summary.
    #[arg(long)]
    json: bool,
    /// Print the metrics snapshot after the run completes.
    #[arg(long)]
    metrics: bool,
    /// Path to an engine config TOML. Defaults to `./dagflow.toml` if present.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(clap::Args)]
struct WorkflowArgs {
    /// Path to the workflow description (TOML).
    workflow: PathBuf,
}

#[derive(clap::Args)]
struct ExportArgs {
    #[command(flatten)]
    workflow: WorkflowArgs,
    /// Write the DOT output to a file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
struct MetricsArgs {
    #[command(flatten)]
    workflow: WorkflowArgs,
    /// Concurrency discipline for this run. Defaults to the workflow's own
    /// setting, then the engine config default.
    #[arg(long, value_enum)]
    mode: Option<Mode>,
    /// JSON object of inputs passed to every node.
    #[arg(long, default_value = "{}")]
    inputs: String,
    /// Path to an engine config TOML. Defaults to `./dagflow.toml` if present.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Copy, Clone, ValueEnum)]
enum Mode {
    Sequential,
    Parallel,
    Hybrid,
}

impl From<Mode> for ExecutionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Sequential => ExecutionMode::Sequential,
            Mode::Parallel => ExecutionMode::Parallel,
            Mode::Hybrid => ExecutionMode::Hybrid,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dagflow_core::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Validate(args) => validate(args),
        Command::Export(args) => export(args),
        Command::Metrics(args) => metrics(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading engine config {}", path.display()))?,
        None => EngineConfig::load_or_default(),
    };

    let inputs: Value = serde_json::from_str(&args.inputs).context("parsing --inputs as JSON")?;

    let engine = Engine::new(config);
    let dag_id = engine
        .load_path(&args.workflow.workflow)
        .with_context(|| format!("loading workflow {}", args.workflow.workflow.display()))?;

    let finished = engine
        .execute(&dag_id, inputs, args.mode.map(Into::into), false, Some(CancelToken::new()))
        .await
        .context("executing workflow")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&finished)?);
    } else {
        print_summary(&finished);
    }

    if args.metrics {
        println!("{}", serde_json::to_string_pretty(&engine.metrics())?);
    }

    if finished.overall_status != OverallStatus::Success {
        bail!("workflow '{dag_id}' did not complete successfully");
    }

    Ok(())
}

fn validate(args: WorkflowArgs) -> Result<()> {
    let engine = Engine::with_default_config();
    let dag_id = engine
        .load_path(&args.workflow)
        .with_context(|| format!("loading workflow {}", args.workflow.display()))?;
    let diagnostics = engine.diagnostics(&dag_id).expect("just loaded");

    println!(
        "workflow '{dag_id}' is valid: {} nodes, {} edges",
        diagnostics.node_count, diagnostics.edge_count
    );
    if !diagnostics.orphan_nodes.is_empty() {
        println!(
            "orphan nodes (no dependencies, nothing depends on them): {}",
            diagnostics.orphan_nodes.join(", ")
        );
    }
    if !diagnostics.unreachable_nodes.is_empty() {
        println!(
            "unreachable nodes (not reachable from any root): {}",
            diagnostics.unreachable_nodes.join(", ")
        );
    }

    Ok(())
}

fn export(args: ExportArgs) -> Result<()> {
    let engine = Engine::with_default_config();
    let dag_id = engine
        .load_path(&args.workflow.workflow)
        .with_context(|| format!("loading workflow {}", args.workflow.workflow.display()))?;
    let dot = engine.export_dot(&dag_id).expect("just loaded");

    match args.output {
        Some(path) => std::fs::write(&path, &dot)
            .with_context(|| format!("writing DOT output to {}", path.display()))?,
        None => print!("{dot}"),
    }

    Ok(())
}

async fn metrics(args: MetricsArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading engine config {}", path.display()))?,
        None => EngineConfig::load_or_default(),
    };

    let inputs: Value = serde_json::from_str(&args.inputs).context("parsing --inputs as JSON")?;

    let engine = Engine::new(config);
    let dag_id = engine
        .load_path(&args.workflow.workflow)
        .with_context(|| format!("loading workflow {}", args.workflow.workflow.display()))?;

    engine
        .execute(&dag_id, inputs, args.mode.map(Into::into), false, Some(CancelToken::new()))
        .await
        .context("executing workflow")?;

    println!("{}", serde_json::to_string_pretty(&engine.metrics())?);
    Ok(())
}

fn print_summary(finished: &FinishedContext) {
    println!("dag_id: {}", finished.dag_id);
    println!("execution_id: {}", finished.execution_id);
    println!("overall_status: {:?}", finished.overall_status);
    println!("nodes_executed: {}", finished.nodes_executed());
    println!("successful_nodes: {}", finished.successful_nodes());
    println!("failed_nodes: {}", finished.failed_nodes());
    println!("wall_duration_ms: {}", finished.wall_duration().as_millis());

    let mut names: Vec<&String> = finished.per_node_status.keys().collect();
    names.sort();
    for name in names {
        println!("  {name}: {:?}", finished.per_node_status[name]);
        if let Some(error) = finished.per_node_error.get(name) {
            println!("    error: {error}");
        }
    }
}
