//! cortex - protocol runtime CLI.
//!
//! Reference surface over the core library: packet and episode
//! validation, and template compilation into episode JSONL logs.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;

/// cortex - cognitive-agent protocol runtime
#[derive(Parser, Debug)]
#[command(name = "cortex")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a packet or an episode log
    #[command(subcommand)]
    Validate(ValidateCommands),

    /// Compile a template into an episode JSONL log
    Compile {
        /// Template identifier (A-H)
        template: String,

        /// Correlation id for the episode (fresh if omitted)
        correlation_id: Option<String>,

        /// Declared stakes level (LOW, MEDIUM, HIGH, CRITICAL)
        #[arg(long, default_value = "MEDIUM")]
        stakes: String,

        /// Quality tier (SUBPAR, PAR, SUPERB)
        #[arg(long, default_value = "PAR")]
        tier: String,

        /// Tools state (tools_ok, tools_partial, tools_down)
        #[arg(long, default_value = "tools_ok")]
        tools_state: String,

        /// Intent summary bound into every envelope
        #[arg(long, default_value = "compiled episode")]
        intent: String,

        /// Token budget
        #[arg(long, default_value = "2000")]
        budget_tokens: u64,

        /// Tool call budget
        #[arg(long, default_value = "8")]
        budget_tool_calls: u64,

        /// Time budget in seconds
        #[arg(long, default_value = "300")]
        budget_time_seconds: u64,

        /// Output path (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ValidateCommands {
    /// Run the schema validator over a single packet JSON file
    Packet {
        /// Path to the packet JSON file
        file: PathBuf,
    },

    /// Run schema, FSM, and invariant validation over an episode log
    Episode {
        /// Path to the episode JSONL file
        file: PathBuf,

        /// Skip evidence-freshness checks (stale logs replay cleanly)
        #[arg(long)]
        no_timestamp_checks: bool,

        /// FSM state the episode's ledger starts in
        #[arg(long, default_value = "S0_IDLE")]
        initial_state: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match run(cli) {
        Ok(passed) => {
            if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        },
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        },
    }
}

fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Validate(ValidateCommands::Packet { file }) => {
            commands::validate::validate_packet(&file)
        },
        Commands::Validate(ValidateCommands::Episode {
            file,
            no_timestamp_checks,
            initial_state,
        }) => commands::validate::validate_episode(&file, no_timestamp_checks, &initial_state),
        Commands::Compile {
            template,
            correlation_id,
            stakes,
            tier,
            tools_state,
            intent,
            budget_tokens,
            budget_tool_calls,
            budget_time_seconds,
            output,
        } => {
            let options = commands::compile::CompileOptions {
                template,
                correlation_id,
                stakes,
                tier,
                tools_state,
                intent,
                budget_tokens,
                budget_tool_calls,
                budget_time_seconds,
                output,
            };
            commands::compile::compile_template(&options)
        },
    }
}
