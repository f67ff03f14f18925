//! `webpilot` command line: run goals, replay stored sequences, inspect
//! the persistent memory stores.
//!
//! Exit codes mirror the episode outcome taxonomy: 0 success, 1
//! unrecoverable failure, 2 budget exhaustion, 3 cancellation.

mod commands;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use webpilot_agent::{Agent, AgentConfig};
use webpilot_traits::{MockPageDriver, PageDriver};

#[derive(Parser)]
#[command(name = "webpilot", about = "Autonomous browser-automation agent", version)]
struct Cli {
    /// Verbose (debug-level) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one goal
    Run {
        /// The natural-language goal
        goal: Vec<String>,
        /// Run against an empty in-memory page instead of a real browser
        /// (model wiring check)
        #[arg(long)]
        dry_run: bool,
    },
    /// Re-execute a stored skill's or episode's action sequence
    Replay {
        /// Skill or episode id
        id: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Operate on the persisted memory stores
    Inspect {
        #[command(subcommand)]
        target: InspectTarget,
    },
}

#[derive(Subcommand)]
enum InspectTarget {
    /// Memory store operations
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
}

#[derive(Subcommand)]
pub enum MemoryAction {
    /// Summarize the stores and list recent entries
    List,
    /// Delete every entry from every store
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Dump all stores as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<std::path::PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

/// The kernel is driver-agnostic; the CLI can only supply the in-memory
/// dry-run driver. Real sessions wire a `PageDriver` through the library
/// API (or a bridge listening on `AGENT_DEBUG_BROWSER_PORT`).
fn build_driver(config: &AgentConfig, dry_run: bool) -> Result<Arc<dyn PageDriver>> {
    if dry_run {
        let driver = MockPageDriver::new();
        driver.set_current_url("about:blank");
        return Ok(Arc::new(driver));
    }
    if let Some(port) = config.debug_browser_port {
        anyhow::bail!(
            "AGENT_DEBUG_BROWSER_PORT={port} is set, but no driver bridge is installed; \
             wire a webpilot_traits::PageDriver through the library API, or use --dry-run"
        );
    }
    anyhow::bail!(
        "no page driver configured; wire a webpilot_traits::PageDriver through the \
         library API, or use --dry-run to exercise the model loop"
    )
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = AgentConfig::from_env();

    let code = match run(cli, config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli, config: AgentConfig) -> Result<i32> {
    match cli.command {
        Commands::Run { goal, dry_run } => {
            let goal = goal.join(" ");
            if goal.trim().is_empty() {
                anyhow::bail!("empty goal");
            }
            let driver = build_driver(&config, dry_run)?;
            let agent = Agent::with_http_model(driver, config)?;
            let _background = agent.spawn_background_tasks();
            let (answer, episode) = agent.run(&goal).await;
            println!("{answer}");
            Ok(episode.outcome.exit_code())
        }
        Commands::Replay { id, dry_run } => {
            let driver = build_driver(&config, dry_run)?;
            let agent = Agent::with_http_model(driver, config)?;
            let episode = agent.replay(&id).await?;
            for line in &episode.trace {
                println!("{line}");
            }
            Ok(episode.outcome.exit_code())
        }
        Commands::Inspect { target } => {
            let InspectTarget::Memory { action } = target;
            commands::inspect_memory(&config, action)?;
            Ok(0)
        }
    }
}
