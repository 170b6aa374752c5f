use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

/// Inputs for sizing a sharded run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanInput {
    /// Input dataset, used for naming and emitted commands
    pub input_file: String,
    pub total_tasks: usize,
    pub avg_seconds_per_task: f64,
    /// Desired wall-clock completion time
    pub target_minutes: Option<f64>,
    /// Use exactly this many units before caps apply
    pub forced_units: Option<usize>,
    /// Hard upper bound after every other cap
    pub max_units: Option<usize>,
    pub cpu_cores: usize,
    /// Units allowed per core
    pub cpu_utilization: f64,
    pub total_memory_mb: Option<u64>,
    pub memory_per_unit_mb: u64,
    /// Memory reserved for everything else on the host
    pub memory_overhead_mb: u64,
    /// Tasks per browser before renewal, passed to each unit
    pub session_batch_size: u32,
    /// Base name for shard outputs; derived from the input when absent
    pub output_base: Option<String>,
}

impl Default for PlanInput {
    fn default() -> Self {
        Self {
            input_file: "all_data.json".to_string(),
            total_tasks: 0,
            avg_seconds_per_task: 3.0,
            target_minutes: None,
            forced_units: None,
            max_units: None,
            cpu_cores: std::thread::available_parallelism().map_or(1, |n| n.get()),
            cpu_utilization: 1.0,
            total_memory_mb: None,
            memory_per_unit_mb: 350,
            memory_overhead_mb: 800,
            session_batch_size: 150,
            output_base: None,
        }
    }
}

/// One unit of a sharded run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardAssignment {
    /// Zero-based shard index
    pub index: usize,
    pub total: usize,
    /// Discovered tasks handled by this unit
    pub tasks: Range<usize>,
    pub output_file: String,
    pub command: String,
}

/// Sizing decision plus per-unit launch details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardPlan {
    pub input_file: String,
    pub total_tasks: usize,
    pub avg_seconds_per_task: f64,
    pub target_minutes: Option<f64>,
    pub needed_for_target: Option<usize>,
    pub cpu_cores: usize,
    pub cpu_cap: usize,
    pub memory_cap: Option<usize>,
    pub requested_units: Option<usize>,
    pub final_units: usize,
    pub expected_runtime_minutes: f64,
    pub output_base: String,
    pub merge_instruction: String,
    pub assignments: Vec<ShardAssignment>,
}

/// `ceil(total * avg_seconds / target_seconds)`, at least 1
pub fn needed_units(total_tasks: usize, avg_seconds: f64, target_seconds: f64) -> usize {
    if target_seconds <= 0.0 {
        return 1;
    }
    ((total_tasks as f64 * avg_seconds) / target_seconds).ceil().max(1.0) as usize
}

pub fn cpu_cap(cores: usize, utilization: f64) -> usize {
    (cores as f64 * utilization).ceil() as usize
}

/// Units that fit in memory; `None` when no per-unit size is known
pub fn memory_cap(total_mb: u64, overhead_mb: u64, per_unit_mb: u64) -> Option<usize> {
    if per_unit_mb == 0 {
        return None;
    }
    Some((total_mb.saturating_sub(overhead_mb) / per_unit_mb) as usize)
}

/// Split `0..total` into `units` contiguous ranges whose sizes differ by at most one.
///
/// Earlier ranges take the remainder. Ranges are disjoint and together cover
/// every index; with more units than items the trailing ranges are empty.
pub fn partition(total: usize, units: usize) -> Vec<Range<usize>> {
    let units = units.max(1);
    let base = total / units;
    let extra = total % units;

    let mut ranges = Vec::with_capacity(units);
    let mut start = 0;
    for i in 0..units {
        let len = base + usize::from(i < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// The range of tasks owned by one shard
pub fn shard_range(total: usize, index: usize, units: usize) -> Result<Range<usize>> {
    if units == 0 || index >= units {
        anyhow::bail!("Shard index {} out of range for {} shards", index, units);
    }
    Ok(partition(total, units)[index].clone())
}

/// `<base>.shard<i>of<n>.json`, numbered from 1
pub fn shard_output_name(base: &str, index: usize, total: usize) -> String {
    format!("{}.shard{}of{}.json", base, index + 1, total)
}

fn default_output_base(input_file: &str) -> String {
    let stem = Path::new(input_file)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    format!("{}_{}", stem, chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

/// Size a sharded run and describe every unit
pub fn plan(input: &PlanInput) -> ShardPlan {
    let needed_for_target = input
        .target_minutes
        .map(|minutes| needed_units(input.total_tasks, input.avg_seconds_per_task, minutes * 60.0));

    let cpu_cap = cpu_cap(input.cpu_cores, input.cpu_utilization);
    let memory_cap = input
        .total_memory_mb
        .and_then(|total| memory_cap(total, input.memory_overhead_mb, input.memory_per_unit_mb));

    let mut units = input.forced_units.or(needed_for_target).unwrap_or(1);

    // A zero cap means the figure is unknown, not that nothing fits
    for cap in [Some(cpu_cap), memory_cap, input.max_units].into_iter().flatten() {
        if cap > 0 {
            units = units.min(cap);
        }
    }
    let units = units.max(1);

    let expected_runtime_minutes =
        (input.total_tasks as f64 * input.avg_seconds_per_task / units as f64 / 60.0 * 100.0).round() / 100.0;

    let output_base = input
        .output_base
        .clone()
        .unwrap_or_else(|| default_output_base(&input.input_file));

    let assignments = partition(input.total_tasks, units)
        .into_iter()
        .enumerate()
        .map(|(index, tasks)| {
            let output_file = shard_output_name(&output_base, index, units);
            let command = format!(
                "harvester run --input {} --output {} --shard-index {} --total-shards {} --session-batch-size {}",
                input.input_file, output_file, index, units, input.session_batch_size
            );
            ShardAssignment {
                index,
                total: units,
                tasks,
                output_file,
                command,
            }
        })
        .collect();

    let merge_instruction = format!(
        "harvester merge --input {} --shards {}.shard*of{}.json --output {}.merged.json",
        input.input_file, output_base, units, output_base
    );

    ShardPlan {
        input_file: input.input_file.clone(),
        total_tasks: input.total_tasks,
        avg_seconds_per_task: input.avg_seconds_per_task,
        target_minutes: input.target_minutes,
        needed_for_target,
        cpu_cores: input.cpu_cores,
        cpu_cap,
        memory_cap,
        requested_units: input.forced_units,
        final_units: units,
        expected_runtime_minutes,
        output_base,
        merge_instruction,
        assignments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(total: usize) -> PlanInput {
        PlanInput {
            total_tasks: total,
            cpu_cores: 8,
            output_base: Some("all_data_run".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_needed_units() {
        // 1000 tasks at 3s within 15 minutes
        assert_eq!(needed_units(1000, 3.0, 900.0), 4);
        assert_eq!(needed_units(300, 3.0, 900.0), 1);
        assert_eq!(needed_units(0, 3.0, 900.0), 1);
        assert_eq!(needed_units(10, 3.0, 0.0), 1);
    }

    #[test]
    fn test_caps() {
        assert_eq!(cpu_cap(8, 1.0), 8);
        assert_eq!(cpu_cap(6, 0.5), 3);
        assert_eq!(cpu_cap(3, 0.5), 2);
        assert_eq!(memory_cap(4000, 800, 350), Some(9));
        assert_eq!(memory_cap(500, 800, 350), Some(0));
        assert_eq!(memory_cap(4000, 800, 0), None);
    }

    #[test]
    fn test_partition_is_disjoint_and_covering() {
        for (total, units) in [(10, 3), (3, 5), (0, 2), (7, 1), (100, 7)] {
            let ranges = partition(total, units);
            assert_eq!(ranges.len(), units);

            let mut next = 0;
            for range in &ranges {
                assert_eq!(range.start, next);
                next = range.end;
            }
            assert_eq!(next, total);

            let sizes: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
            assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
        }
        assert_eq!(partition(10, 3), vec![0..4, 4..7, 7..10]);
    }

    #[test]
    fn test_shard_range_bounds() {
        assert_eq!(shard_range(10, 2, 3).unwrap(), 7..10);
        assert!(shard_range(10, 3, 3).is_err());
        assert!(shard_range(10, 0, 0).is_err());
    }

    #[test]
    fn test_plan_applies_caps() {
        let mut request = input(1000);
        request.target_minutes = Some(5.0);
        // 1000 * 3 / 300 = 10 needed, cpu cap 8, memory cap 9
        request.total_memory_mb = Some(4000);
        let plan = plan(&request);
        assert_eq!(plan.needed_for_target, Some(10));
        assert_eq!(plan.final_units, 8);
        assert_eq!(plan.expected_runtime_minutes, 6.25);

        request.max_units = Some(2);
        assert_eq!(super::plan(&request).final_units, 2);

        request.max_units = None;
        request.forced_units = Some(3);
        assert_eq!(super::plan(&request).final_units, 3);
    }

    #[test]
    fn test_plan_outputs_and_commands() {
        let mut request = input(10);
        request.forced_units = Some(3);
        let plan = plan(&request);

        assert_eq!(plan.assignments.len(), 3);
        assert_eq!(plan.assignments[0].output_file, "all_data_run.shard1of3.json");
        assert_eq!(plan.assignments[2].output_file, "all_data_run.shard3of3.json");
        assert_eq!(plan.assignments[1].tasks, 4..7);
        assert!(plan.assignments[2]
            .command
            .contains("--shard-index 2 --total-shards 3"));
        assert!(plan.merge_instruction.contains("all_data_run.merged.json"));
    }

    #[test]
    fn test_plan_without_target_is_single_unit() {
        let plan = plan(&input(50));
        assert_eq!(plan.final_units, 1);
        assert_eq!(plan.expected_runtime_minutes, 2.5);
    }
}
