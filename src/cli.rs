use clap::{Parser, Subcommand};
use pinmonl_common::JobState;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pinmonl")]
#[command(author, version, about = "Bookmark monitor and repository metadata crawler")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the job workers and the refresh loop until interrupted
    Start,

    /// Bookmark a URL and queue it for monitoring
    Add {
        /// URL to bookmark
        url: String,
    },

    /// Fetch reports for a URL from every matching provider
    Guess {
        /// Repository URL
        url: String,

        /// Providers to skip
        #[arg(long, value_delimiter = ',')]
        without: Vec<String>,
    },

    /// List job records, newest first
    Jobs {
        /// Only show jobs in this state
        #[arg(long, value_parser = parse_state)]
        state: Option<JobState>,

        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// List registered providers
    Providers,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

fn parse_state(raw: &str) -> Result<JobState, String> {
    raw.parse()
}
