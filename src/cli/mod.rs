pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract prices, stock and offers for every store link of a dataset
    Run(RunArgs),

    /// Size a sharded run and print per-shard commands
    Plan(PlanArgs),

    /// Fold shard outputs back into the master dataset
    Merge {
        /// Master dataset
        #[arg(short, long)]
        input: PathBuf,

        /// Shard output files, applied in order
        #[arg(short, long, num_args = 1.., required = true)]
        shards: Vec<PathBuf>,

        /// Merged output file
        #[arg(short, long)]
        output: PathBuf,

        /// Site profile providing the link identifier
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Dataset to process
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output file, defaults to a timestamped file next to the input
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Site profile to use
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Configuration file, overrides the profile
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// First record of the input to consider
    #[arg(long, default_value_t = 0)]
    pub start_index: usize,

    /// Number of records to consider
    #[arg(long)]
    pub max_entries: Option<usize>,

    /// Zero-based shard this process handles
    #[arg(long, requires = "total_shards")]
    pub shard_index: Option<usize>,

    #[arg(long, requires = "shard_index")]
    pub total_shards: Option<usize>,

    /// Tasks per browser before it is renewed
    #[arg(long)]
    pub session_batch_size: Option<u32>,

    /// Concurrent browser sessions
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Ignore the cache and visited log
    #[arg(long)]
    pub force_rescan: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// Dataset to plan for
    #[arg(short, long)]
    pub input: PathBuf,

    /// Site profile providing the link identifier
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Desired completion time in minutes
    #[arg(short, long)]
    pub target_minutes: Option<f64>,

    /// Average seconds spent per URL
    #[arg(long, default_value_t = 3.0)]
    pub avg_seconds: f64,

    /// Use exactly this many units before caps apply
    #[arg(long)]
    pub units: Option<usize>,

    /// Upper bound on units
    #[arg(long)]
    pub max_units: Option<usize>,

    /// Units allowed per CPU core
    #[arg(long, default_value_t = 1.0)]
    pub cpu_utilization: f64,

    /// Memory available to the run
    #[arg(long)]
    pub memory_mb: Option<u64>,

    #[arg(long, default_value_t = 350)]
    pub memory_per_unit_mb: u64,

    #[arg(long, default_value_t = 800)]
    pub memory_overhead_mb: u64,

    #[arg(long, default_value_t = 150)]
    pub session_batch_size: u32,

    /// Base name for shard outputs
    #[arg(long)]
    pub output_base: Option<String>,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => {
            info!("Starting run on {}", args.input.display());
            commands::run(args).await
        }
        Commands::Plan(args) => {
            info!("Planning shards for {}", args.input.display());
            commands::plan(args).await
        }
        Commands::Merge { input, shards, output, profile } => {
            info!("Merging {} shards into {}", shards.len(), input.display());
            commands::merge(input, shards, output, profile).await
        }
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles().await
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name).await
            } else {
                info!("Showing current configuration");
                commands::show_config().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "harvester",
            "run",
            "--input",
            "all_data.json",
            "--shard-index",
            "1",
            "--total-shards",
            "4",
            "--session-batch-size",
            "150",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.shard_index, Some(1));
                assert_eq!(args.total_shards, Some(4));
                assert_eq!(args.session_batch_size, Some(150));
                assert!(!args.force_rescan);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_shard_index_needs_total() {
        assert!(Cli::try_parse_from(["harvester", "run", "--input", "a.json", "--shard-index", "0"]).is_err());
    }

    #[test]
    fn test_merge_takes_many_shards() {
        let cli = Cli::try_parse_from([
            "harvester", "merge", "-i", "all.json", "-s", "a.json", "b.json", "-o", "merged.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Merge { shards, .. } => assert_eq!(shards.len(), 2),
            _ => panic!("expected merge"),
        }
    }
}
