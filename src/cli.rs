use clap::{Parser, Subcommand};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG: &str = ".shipcheck.toml";

/// shipcheck: deployment-risk checklists for pull requests
#[derive(Parser, Debug, Clone)]
#[command(name = "shipcheck", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Path to config file (default: .shipcheck.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Character budget for the diff sent to the model
    #[arg(long, global = true)]
    pub max_diff_chars: Option<usize>,

    /// Quiet period before a change is analyzed, in milliseconds
    #[arg(long, global = true)]
    pub debounce_ms: Option<u64>,

    /// Model name to request
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Compute and print the checklist without writing to the platform
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Analyze a pull request and post or update its checklist
    Analyze {
        /// Pull request number
        number: u64,
    },
    /// Re-evaluate the merge gate from the current checklist comment
    Check {
        /// Pull request number
        number: u64,
    },
    /// Classify a unified diff offline (reads stdin when --diff is omitted)
    Classify {
        /// Path to a unified diff file
        #[arg(long)]
        diff: Option<String>,
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// List the effective rule catalog
    Rules {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Read newline-delimited JSON events from stdin and dispatch them
    Listen,
}
