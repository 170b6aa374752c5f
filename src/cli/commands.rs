use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::config::HarvestConfig;
use crate::cli::{PlanArgs, RunArgs};
use crate::crawler::controller::{RunController, RunRequest};
use crate::crawler::task::ShardInfo;
use crate::planner::shard::{plan as plan_shards, PlanInput, ShardPlan};
use crate::storage::dataset::Dataset;
use crate::storage::merge::merge_shards;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Resolve the configuration from an explicit file, a profile or the default
fn load_config(profile: Option<&str>, file: Option<&Path>) -> Result<HarvestConfig> {
    match (file, profile) {
        (Some(path), _) => HarvestConfig::load_from_file(path),
        (None, Some(name)) => HarvestConfig::load_profile(name)
            .context(format!("Failed to load profile: {}", name)),
        (None, None) => HarvestConfig::load_default(),
    }
}

/// Apply command line overrides on top of a loaded configuration
fn apply_overrides(config: &mut HarvestConfig, args: &RunArgs) {
    if let Some(workers) = args.workers {
        config.pool.workers = workers;
    }

    if let Some(batch) = args.session_batch_size {
        config.pool.max_tasks_before_renewal = batch;
    }

    if args.force_rescan {
        config.storage.force_rescan = true;
    }
}

/// Build the run request described by the command line
fn run_request(args: &RunArgs) -> RunRequest {
    let mut request = RunRequest::new(&args.input);
    request.output_path = args.output.clone();
    request.start_index = args.start_index;
    request.max_entries = args.max_entries;
    request.shard = match (args.shard_index, args.total_shards) {
        (Some(index), Some(total)) => Some(ShardInfo { index, total }),
        _ => None,
    };
    request
}

/// Run an extraction to completion, stopping cleanly on Ctrl-C
pub async fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.profile.as_deref(), args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    let controller = Arc::new(RunController::with_chrome(config));
    let output = controller.start(run_request(&args)).await?;
    info!("Writing results to {}", output.display());

    let interrupt = {
        let controller = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight tasks");
                if let Err(e) = controller.stop().await {
                    warn!("Stop failed: {}", e);
                }
            }
        })
    };

    let progress = {
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let status = controller.status().await;
                if !status.is_running {
                    break;
                }
                info!("Progress {}/{} ({})", status.progress, status.total, status.current_url);
            }
        })
    };

    let result = controller.wait().await;
    interrupt.abort();
    progress.abort();

    let summary = result?;
    let status = controller.status().await;

    println!("Output: {}", output.display());
    println!("Extracted: {}", summary.succeeded);
    println!("Cached: {}", summary.cached);
    println!("Skipped: {}", summary.skipped);
    println!("Failed: {}", summary.failed);
    println!("Browser renewals: {}", summary.renewals);

    if summary.paused {
        println!("Paused with {} tasks pending; rerun to resume", summary.pending);
    } else if summary.pending > 0 {
        println!("Stopped with {} tasks pending", summary.pending);
    }

    if let Some(error) = status.error {
        println!("Last error: {}", error);
    }

    Ok(())
}

/// Count the tasks of a dataset and size a sharded run for them
pub fn build_plan(args: &PlanArgs, identifier: &str) -> Result<ShardPlan> {
    let dataset = Dataset::load(&args.input)?;
    let total_tasks = dataset.discover_tasks(identifier, 0, None).len();

    let input = PlanInput {
        input_file: args.input.display().to_string(),
        total_tasks,
        avg_seconds_per_task: args.avg_seconds,
        target_minutes: args.target_minutes,
        forced_units: args.units,
        max_units: args.max_units,
        cpu_utilization: args.cpu_utilization,
        total_memory_mb: args.memory_mb,
        memory_per_unit_mb: args.memory_per_unit_mb,
        memory_overhead_mb: args.memory_overhead_mb,
        session_batch_size: args.session_batch_size,
        output_base: args.output_base.clone(),
        ..Default::default()
    };

    Ok(plan_shards(&input))
}

/// Print a shard plan
pub async fn plan(args: PlanArgs) -> Result<()> {
    let config = load_config(args.profile.as_deref(), None)?;
    let plan = build_plan(&args, &config.site.link_identifier)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Unique URLs: {}", plan.total_tasks);
    if let Some(needed) = plan.needed_for_target {
        println!("Units needed for target: {}", needed);
    }
    println!("CPU cap: {} ({} cores)", plan.cpu_cap, plan.cpu_cores);
    if let Some(cap) = plan.memory_cap {
        println!("Memory cap: {}", cap);
    }
    println!("Units: {}", plan.final_units);
    println!("Expected runtime: {:.2} minutes", plan.expected_runtime_minutes);
    println!();

    for assignment in &plan.assignments {
        println!(
            "# shard {}/{}: tasks {}..{}",
            assignment.index + 1,
            assignment.total,
            assignment.tasks.start,
            assignment.tasks.end
        );
        println!("{}", assignment.command);
    }

    println!();
    println!("# when every shard has finished");
    println!("{}", plan.merge_instruction);

    Ok(())
}

/// Merge shard outputs into the master dataset and write the result
pub async fn merge(input: PathBuf, shards: Vec<PathBuf>, output: PathBuf, profile: Option<String>) -> Result<()> {
    let config = load_config(profile.as_deref(), None)?;

    let mut master = Dataset::load(&input)?;
    let shard_data = shards
        .iter()
        .map(|path| Dataset::load(path))
        .collect::<Result<Vec<_>>>()?;

    let report = merge_shards(&mut master, &shard_data, &config.site.link_identifier)?;
    master.save(&output)?;

    println!("Shards merged: {}", report.shards);
    println!("Links matched: {}", report.matched_links);
    println!("Locations updated: {}", report.updated_locations);
    println!("Unmatched shard links: {}", report.unmatched_links);
    println!("Links left as in the input: {}", report.unchanged_links);
    println!("Output: {}", output.display());

    Ok(())
}

/// List all available configuration profiles
pub async fn list_profiles() -> Result<()> {
    let profiles = HarvestConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Manage a specific configuration profile
pub async fn manage_profile(profile_name: String) -> Result<()> {
    match HarvestConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", serde_yaml::to_string(&config)?);
        }
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let mut config = HarvestConfig::default();
            config.site.name = profile_name.clone();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub async fn show_config() -> Result<()> {
    let config = HarvestConfig::load_default()?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::shard::shard_output_name;
    use clap::Parser;
    use serde_json::json;
    use std::fs;
    use tokio_test::{assert_err, assert_ok};

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["harvester", "run", "--input", "all_data.json"];
        argv.extend_from_slice(extra);
        match crate::cli::Cli::try_parse_from(argv).unwrap().command {
            crate::cli::Commands::Run(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_overrides_and_request() {
        let args = run_args(&["--workers", "6", "--session-batch-size", "40", "--force-rescan", "--shard-index", "2", "--total-shards", "5"]);
        let mut config = HarvestConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.pool.workers, 6);
        assert_eq!(config.pool.max_tasks_before_renewal, 40);
        assert!(config.storage.force_rescan);

        let request = run_request(&args);
        assert_eq!(request.shard, Some(ShardInfo { index: 2, total: 5 }));
        assert!(request.output_path.is_none());
    }

    #[test]
    fn test_load_config_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("site.yaml");
        fs::write(&path, "site:\n  name: shop\n  link_identifier: shop\n").unwrap();

        let config = assert_ok!(load_config(Some("ignored"), Some(&path)));
        assert_eq!(config.site.link_identifier, "shop");
        assert_err!(load_config(None, Some(&tmp.path().join("missing.yaml"))));
    }

    #[test]
    fn test_build_plan_counts_unique_urls() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("all_data.json");
        let data = json!([
            { "model": "A", "store_links": [
                { "name": "Shop", "url": "https://shop.example/p/1" },
                { "name": "Other", "url": "https://other.example/p/1" }
            ]},
            { "model": "B", "store_links": [{ "name": "Shop", "url": "https://shop.example/p/1/" }] },
            { "model": "C", "store_links": [{ "name": "Shop", "url": "https://shop.example/p/2" }] }
        ]);
        fs::write(&input, data.to_string()).unwrap();

        let args = PlanArgs {
            input,
            profile: None,
            target_minutes: None,
            avg_seconds: 3.0,
            units: Some(2),
            max_units: None,
            cpu_utilization: 1.0,
            memory_mb: None,
            memory_per_unit_mb: 350,
            memory_overhead_mb: 800,
            session_batch_size: 150,
            output_base: Some("run".to_string()),
            json: false,
        };

        let plan = build_plan(&args, "shop").unwrap();
        assert_eq!(plan.total_tasks, 2);
        assert_eq!(plan.assignments.len(), plan.final_units);
        assert_eq!(plan.assignments[0].output_file, shard_output_name("run", 0, plan.final_units));
    }
}
