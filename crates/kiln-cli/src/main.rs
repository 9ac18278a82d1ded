//! Kiln CLI - plan, apply, build and repair from the command line
//!
//! Usage:
//!   kiln init                    Write .kiln/config.toml with defaults
//!   kiln run <request>           Plan and apply a change, then build and repair
//!   kiln ask <question>          Ask a question without touching the project
//!   kiln build                   Build once and print diagnostics

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kiln_agent::{AgentClient, AgentPlanner};
use kiln_core::KilnConfig;
use kiln_orchestrator::{
    direct_response, ActivityLogger, CancellationToken, ChannelObserver, Orchestrator, PipelineRun,
    RunOptions, TracingObserver,
};
use kiln_project::{
    AffinityToken, BuildDriver, CargoProjectTree, CommandBuildDriver, ProjectTree,
    WorkspaceMutator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "Plan, apply, build and repair project changes")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root
    #[arg(short = 'C', long, default_value = ".", global = true)]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default .kiln/config.toml
    Init {
        /// Replace an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Run the pipeline on a change request
    Run {
        /// What to change, in plain words
        request: String,

        /// Run tests after a successful build
        #[arg(long)]
        tests: bool,

        /// Override the configured number of build attempts
        #[arg(long, value_name = "N")]
        max_attempts: Option<u32>,
    },

    /// Ask a question; nothing is written to the project
    Ask {
        question: String,
    },

    /// Clean and build once, printing diagnostics
    Build,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let root = cli
        .project
        .canonicalize()
        .with_context(|| format!("Project directory {:?} not found", cli.project))?;

    match cli.command {
        Commands::Init { force } => cmd_init(&root, force).await,
        Commands::Run {
            request,
            tests,
            max_attempts,
        } => cmd_run(&root, request, tests, max_attempts, cli.verbose).await,
        Commands::Ask { question } => cmd_ask(&root, question).await,
        Commands::Build => cmd_build(&root).await,
    }
}

async fn cmd_init(root: &Path, force: bool) -> Result<()> {
    let config_path = root.join(".kiln/config.toml");
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    KilnConfig::write_default(root).context("Failed to write default config")?;

    println!("Initialized Kiln in {}", root.display());
    println!("Created:");
    println!("  .kiln/config.toml");
    match KilnConfig::detect_language(root) {
        Some(language) => println!("Detected project language: {:?}", language),
        None => println!("No project detected; set [build].build in the config"),
    }
    Ok(())
}

fn load_config(root: &Path) -> Result<KilnConfig> {
    KilnConfig::load_or_default(root).context("Failed to load .kiln/config.toml")
}

fn project_tree(root: &Path, config: &KilnConfig) -> CargoProjectTree {
    let tree = CargoProjectTree::new(root);
    match &config.project.name {
        Some(name) => tree.with_name(name.clone()),
        None => tree,
    }
}

/// Model-backed planner; needs no build commands
fn build_planner(root: &Path, config: &KilnConfig) -> Result<AgentPlanner> {
    let tree = project_tree(root, config);
    let files = match tree.current_project() {
        Some(project) => tree.project_files(&project).unwrap_or_else(|e| {
            warn!("Could not list project files: {}", e);
            Vec::new()
        }),
        None => Vec::new(),
    };

    let client = AgentClient::from_config(&config.models).context("Invalid [models] config")?;
    Ok(AgentPlanner::new(client, root)
        .with_file_listing(files)
        .with_mode(config.pipeline.modification_mode))
}

/// Wire the production collaborators from configuration
fn build_orchestrator(root: &Path, config: &KilnConfig) -> Result<Orchestrator> {
    let planner = build_planner(root, config)?;
    let affinity = AffinityToken::new();

    let mutator = WorkspaceMutator::new(root, project_tree(root, config))
        .with_mode(config.pipeline.modification_mode)
        .with_protected_files(config.project.protected_files.clone())
        .with_affinity(affinity.clone());

    let builder =
        CommandBuildDriver::from_config(config, root).context("Failed to resolve build commands")?;

    Ok(Orchestrator::new(
        Arc::new(planner),
        Arc::new(mutator),
        Arc::new(builder),
        config.pipeline.clone(),
    )
    .with_affinity(affinity))
}

async fn cmd_run(
    root: &Path,
    request: String,
    tests: bool,
    max_attempts: Option<u32>,
    verbose: bool,
) -> Result<()> {
    let config = load_config(root)?;
    let orchestrator = build_orchestrator(root, &config)?;

    let activity = Arc::new(ActivityLogger::new(root.join(".kiln")));
    orchestrator.subscribe(activity.clone()).await;
    if verbose {
        orchestrator.subscribe(Arc::new(TracingObserver)).await;
    }

    let (observer, mut events) = ChannelObserver::new();
    let printer_id = orchestrator.subscribe(Arc::new(observer)).await;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", event);
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run (applied changes are kept)");
            interrupt.cancel();
        }
    });

    let mut options = RunOptions::new().with_cancel(cancel);
    if tests {
        options = options.with_tests(true);
    }
    if let Some(n) = max_attempts {
        options = options.with_max_attempts(n);
    }

    let run = orchestrator.run(&request, options).await?;

    // Closing the channel lets the printer drain and exit
    orchestrator.unsubscribe(printer_id).await;
    printer.await.context("Progress printer failed")?;

    activity.log_summary(&run).await;
    print_run(&run);

    run.into_result()?;
    Ok(())
}

fn print_run(run: &PipelineRun) {
    println!();
    println!("Run {}: {}", run.id, run.summary());

    if let Some(report) = &run.apply_report {
        println!("  Changes: {}", report.summary());
        for item in report.failed() {
            if let Err(e) = &item.result {
                println!("    failed {} {}: {}", item.kind, item.target, e);
            }
        }
    }

    for attempt in &run.attempts {
        match (&attempt.outcome, &attempt.error) {
            (Some(outcome), _) => println!("  Attempt {}: {}", attempt.attempt, outcome.summary()),
            (None, Some(error)) => println!("  Attempt {}: error: {}", attempt.attempt, error),
            (None, None) => println!("  Attempt {}: no result", attempt.attempt),
        }
        for fix in &attempt.fixes {
            println!(
                "    fix {}:{} {}",
                fix.path,
                fix.line,
                if fix.applied { "applied" } else { "not applied" }
            );
        }
    }

    if let Some(outcome) = run.last_outcome().filter(|o| !o.success) {
        for diagnostic in &outcome.diagnostics {
            println!("  {}", diagnostic);
        }
    }

    if let Some(advisory) = run.test_failure() {
        println!("  Warning: {}", advisory);
    }
}

async fn cmd_ask(root: &Path, question: String) -> Result<()> {
    let config = load_config(root)?;
    let planner = build_planner(root, &config)?;

    let answer = direct_response(&planner, &question).await;
    println!("{}", answer);
    Ok(())
}

async fn cmd_build(root: &Path) -> Result<()> {
    let config = load_config(root)?;
    let builder =
        CommandBuildDriver::from_config(&config, root).context("Failed to resolve build commands")?;

    info!("Building with `{}`", builder.commands().build);
    builder.clean().await.context("Clean failed")?;
    let outcome = builder.build().await.context("Build failed to run")?;

    for diagnostic in &outcome.diagnostics {
        println!("{}", diagnostic);
    }
    println!("Build {}", outcome.summary());

    if !outcome.success {
        bail!("build failed");
    }
    Ok(())
}
