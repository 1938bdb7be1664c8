//! dagrun - run a graph of dependent commands.
//!
//! Usage:
//!   dagrun run <FILE>       Run every task in the task file
//!   dagrun validate <FILE>  Check the task file and its dependency graph
//!   dagrun list <FILE>      List tasks in execution order

use clap::{Parser, Subcommand};
use dagrun::render::drive;
use dagrun::{Interrupt, TaskGraph, TaskSetBuilder, TracingRenderer, run_task_graph};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// dagrun - run a graph of dependent commands
#[derive(Parser)]
#[command(name = "dagrun")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every task in a task file
    Run {
        /// Path to the task YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Maximum concurrent tasks (overrides the file, default: 4)
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Exit with an error when any task failed
        #[arg(long)]
        strict: bool,

        /// Print the run summary as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Validate a task file without running it
    Validate {
        /// Path to the task YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List tasks in execution order
    List {
        /// Path to the task YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so `--json` output stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            jobs,
            strict,
            json,
        } => {
            run_tasks(file, jobs, strict, json).await?;
        }
        Commands::Validate { file } => {
            validate_tasks(file)?;
        }
        Commands::List { file } => {
            list_tasks(file)?;
        }
    }

    Ok(())
}

/// Run all tasks in a file, rendering progress as log lines.
async fn run_tasks(
    file: PathBuf,
    jobs: Option<usize>,
    strict: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading tasks from: {}", file.display());
    let (config, tasks) = TaskSetBuilder::load(&file)?;

    let interrupt = Interrupt::new();
    let mut options = TaskSetBuilder::run_options(&config).interrupt(interrupt.clone());
    if let Some(jobs) = jobs {
        options = options.concurrency(jobs);
    }
    info!(
        tasks = tasks.len(),
        concurrency = options.get_concurrency(),
        "starting run"
    );

    let snapshots = options.subscribe();
    let renderer = tokio::spawn(async move {
        let mut renderer = TracingRenderer::new();
        drive(&mut renderer, snapshots).await;
    });

    let run = run_task_graph(tasks, options);
    tokio::pin!(run);
    let summary = tokio::select! {
        result = &mut run => result?,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping running tasks");
            interrupt.trigger();
            run.await?
        }
    };
    renderer.await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if !summary.blocked_task_ids.is_empty() {
        let ids: Vec<&str> = summary.blocked_task_ids.iter().map(|id| id.as_str()).collect();
        warn!("Not run because a dependency failed: {}", ids.join(", "));
    }

    if strict {
        summary.into_result()?;
    }
    Ok(())
}

/// Validate a task file and its dependency graph.
fn validate_tasks(file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating tasks in: {}", file.display());

    let result = TaskSetBuilder::load(&file)
        .map_err(Box::<dyn std::error::Error>::from)
        .and_then(|(_, tasks)| TaskGraph::build(tasks).map_err(Into::into));

    match result {
        Ok(graph) => {
            info!("All {} task(s) are valid", graph.len());
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e)
        }
    }
}

/// List tasks in topological order with their dependencies.
fn list_tasks(file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let (config, tasks) = TaskSetBuilder::load(&file)?;
    let graph = TaskGraph::build(tasks)?;

    println!("Tasks in {}:", file.display());
    if let Some(concurrency) = config.concurrency {
        println!("  Concurrency: {}", concurrency);
    }
    println!();

    for task_id in graph.topological_order() {
        let deps = graph.dependencies_of(task_id);
        let name = graph.task(task_id).map(|t| t.name()).unwrap_or_default();
        let label = if name == task_id.as_str() {
            task_id.to_string()
        } else {
            format!("{} ({})", task_id, name)
        };

        if deps.is_empty() {
            println!("  - {}", label);
        } else {
            let dep_names: Vec<&str> = deps.iter().map(|d| d.as_str()).collect();
            println!("  - {} (depends on: {})", label, dep_names.join(", "));
        }
    }

    Ok(())
}
