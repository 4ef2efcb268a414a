//! CLI parse: clap types for Foundry. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Foundry CLI - crash-resumable code generation pipelines
#[derive(Parser)]
#[command(name = "foundry")]
#[command(about = "Drive plan, generate, test and correct pipelines with checkpointed resume")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new run and wait for it to finish (Ctrl-C requests a stop)
    Run {
        /// Project title
        #[arg(long)]
        title: String,
        /// What to build
        #[arg(long, default_value = "")]
        description: String,
        /// Target kind (cli, web, library...)
        #[arg(long, default_value = "cli")]
        target: String,
        /// JSON plan file for the local planner
        #[arg(long)]
        plan: PathBuf,
        /// Extra request metadata as key=value (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,
        /// Skip the research phase for this run
        #[arg(long)]
        no_research: bool,
        /// Do not stream live progress to stderr
        #[arg(long)]
        quiet: bool,
    },
    /// Resume a run from its last checkpoint
    Resume {
        run_id: String,
        /// Do not stream live progress to stderr
        #[arg(long)]
        quiet: bool,
    },
    /// Resume every run left unfinished by a previous process
    Recover,
    /// Show one run
    Status {
        run_id: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List runs, newest first
    List {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show recorded events for a run
    Events {
        run_id: String,
        /// Only events with a sequence number greater than this
        #[arg(long)]
        after: Option<u64>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Output format (toml or json)
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Validate the effective configuration
    Validate,
}
