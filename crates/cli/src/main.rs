//! Strata CLI - run queries through the tiered engine from a terminal
//!
//! One-shot questions, an interactive chat session, routing inspection and a
//! sandbox health check.

mod commands;
mod output;
mod repl;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use strata::{Engine, StrataConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Strata - tiered request engine
#[derive(Parser)]
#[command(name = "strata")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Route queries to fast, analytical or agentic processing modes")]
#[command(long_about = r#"
Strata scores each query and routes it to a processing mode. Simple questions
are answered once and cached, analytical work runs once without caching, and
agentic workflows such as deep research are retried on transient failures.

Examples:
  strata ask "What is 2+2?"
  strata ask --mode deep_research --stream "State of grid-scale storage"
  strata route "Compare Python and Rust, then plot the results"
  strata chat
"#)]
struct Cli {
    /// Configuration file (defaults to ./strata.toml when present)
    #[arg(short, long, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a single query
    Ask {
        query: String,

        /// Force a processing mode instead of routing
        #[arg(short, long)]
        mode: Option<String>,

        /// Print lifecycle events as they happen
        #[arg(short, long)]
        stream: bool,

        /// Conversation to read history from and append to
        #[arg(long)]
        conversation: Option<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start an interactive session that keeps conversation history
    Chat {
        /// Force a processing mode for every turn
        #[arg(short, long)]
        mode: Option<String>,
    },

    /// Show the routing decision for a query without running it
    Route { query: String },

    /// List the registered processing modes
    Modes,

    /// Run a trivial snippet in the code sandbox
    SandboxCheck {
        /// Use the host interpreter instead of a container
        #[arg(long)]
        local: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("strata={log_level},strata_cli={log_level},warn").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = StrataConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ask {
            query,
            mode,
            stream,
            conversation,
            json,
        } => {
            let engine = Engine::from_config(config);
            let options = commands::AskOptions {
                mode,
                stream,
                conversation,
                json,
            };
            let result = commands::ask(&engine, &query, options).await;
            engine.shutdown().await;
            result?;
        }
        Commands::Chat { mode } => {
            let engine = Engine::from_config(config);
            let result = match repl::ChatRepl::new(&engine, mode) {
                Ok(mut repl) => repl.run().await,
                Err(e) => Err(e),
            };
            engine.shutdown().await;
            result?;
        }
        Commands::Route { query } => {
            let engine = Engine::from_config(config);
            commands::route(&engine, &query);
        }
        Commands::Modes => {
            let engine = Engine::from_config(config);
            commands::list_modes(&engine);
        }
        Commands::SandboxCheck { local } => {
            commands::sandbox_check(config, local).await?;
        }
    }

    Ok(())
}
