use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::storage::dataset::Dataset;
use crate::storage::normalize::normalize_url;

/// Outcome of folding shard outputs into a master dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Shards processed
    pub shards: usize,

    /// Shard links whose URL matched a master link
    pub matched_links: usize,

    /// Master store-link objects that received fields
    pub updated_locations: usize,

    /// Shard links with results but no matching master URL
    pub unmatched_links: usize,

    /// Shard links whose fields equal the master's, i.e. not processed by that shard
    pub unchanged_links: usize,
}

/// Fold shard outputs into `master`, in order.
///
/// Every shard output is a full copy of the master with its own URLs filled
/// in. A shard link whose result fields still equal the master's fields for
/// that URL was not processed by the shard and is skipped, so stale results
/// already present in the master never overwrite a fresh value from another
/// shard. Other shard links copy their fields into each master link with the
/// same normalized URL; later shards overwrite earlier ones field by field.
/// Master links without a match are left as they are and no new records are
/// ever added.
pub fn merge_shards(master: &mut Dataset, shards: &[Dataset], identifier: &str) -> Result<MergeReport> {
    let mut index: HashMap<String, Vec<String>> = HashMap::new();
    let mut baseline: HashMap<String, Map<String, Value>> = HashMap::new();
    for link in master.links(identifier) {
        let key = normalize_url(&link.url);
        baseline
            .entry(key.clone())
            .or_insert_with(|| master.result_fields(&link.pointer));
        index.entry(key).or_default().push(link.pointer);
    }

    let mut report = MergeReport {
        shards: shards.len(),
        ..Default::default()
    };

    for (shard_no, shard) in shards.iter().enumerate() {
        for link in shard.links(identifier) {
            let fields = shard.result_fields(&link.pointer);
            if fields.is_empty() {
                continue;
            }

            let key = normalize_url(&link.url);
            if baseline.get(&key) == Some(&fields) {
                report.unchanged_links += 1;
                continue;
            }

            match index.get(&key) {
                Some(pointers) => {
                    report.matched_links += 1;
                    report.updated_locations += master.apply_fields(pointers, &fields)?;
                }
                None => {
                    debug!("Shard {} link has no master record: {}", shard_no + 1, link.url);
                    report.unmatched_links += 1;
                }
            }
        }
    }

    info!(
        "Merged {} shards: {} links matched, {} unmatched",
        report.shards, report.matched_links, report.unmatched_links
    );
    Ok(report)
}
