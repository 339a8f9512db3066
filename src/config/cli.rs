use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the verbatim binary.
#[derive(Debug, Parser)]
#[command(
    name = "verbatim",
    version,
    about = "Replay query scripts against a verbatim cache overlay"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VERBATIM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: CacheOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a JSON operation script against an overlay over the in-memory store.
    Replay(ReplayArgs),
    /// Summarize a snapshot file.
    Inspect(InspectArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Register an operation name for bypass; repeat for several. Replaces
    /// the configured list.
    #[arg(long = "bypass-query", value_name = "NAME", global = true)]
    pub bypass_queries: Vec<String>,

    /// Override the overwrite policy (always|first_write_wins).
    #[arg(long = "overwrite-policy", value_name = "POLICY", global = true)]
    pub overwrite_policy: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct ReplayArgs {
    /// Script file: a JSON array of operations.
    #[arg(value_name = "SCRIPT", value_hint = ValueHint::FilePath)]
    pub script: PathBuf,

    /// Restore this snapshot before running the script.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub restore: Option<PathBuf>,

    /// Write the final snapshot to this path.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub extract: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct InspectArgs {
    /// Snapshot file produced by `replay --extract`.
    #[arg(value_name = "SNAPSHOT", value_hint = ValueHint::FilePath)]
    pub snapshot: PathBuf,
}
