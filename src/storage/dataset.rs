use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::crawler::task::{Snapshot, Task};
use crate::storage::checkpoint::write_atomic;
use crate::storage::normalize::normalize_url;

/// A store link found while walking the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRef {
    /// JSON pointer to the store-link object
    pub pointer: String,

    /// URL as written in the dataset
    pub url: String,

    /// Index of the top-level record containing the link
    pub record: usize,
}

/// Working dataset: an array of source records with nested `store_links`
#[derive(Debug, Clone)]
pub struct Dataset {
    root: Value,
}

fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn link_matches(link: &Map<String, Value>, identifier: &str) -> bool {
    if identifier.is_empty() {
        return true;
    }
    let identifier = identifier.to_lowercase();
    let field = |name: &str| {
        link.get(name)
            .and_then(Value::as_str)
            .map_or(false, |v| v.to_lowercase().contains(&identifier))
    };
    field("name") || field("url")
}

fn walk(node: &Value, pointer: &str, record: usize, identifier: &str, found: &mut Vec<LinkRef>) {
    match node {
        Value::Object(map) => {
            if let Some(Value::Array(links)) = map.get("store_links") {
                for (i, link) in links.iter().enumerate() {
                    let Value::Object(link_map) = link else { continue };
                    let url = link_map.get("url").and_then(Value::as_str).unwrap_or("").trim();
                    if !url.is_empty() && link_matches(link_map, identifier) {
                        found.push(LinkRef {
                            pointer: format!("{}/store_links/{}", pointer, i),
                            url: url.to_string(),
                            record,
                        });
                    }
                }
            }

            for (key, value) in map {
                if key != "store_links" {
                    let child = format!("{}/{}", pointer, escape_pointer_token(key));
                    walk(value, &child, record, identifier, found);
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk(item, &format!("{}/{}", pointer, i), record, identifier, found);
            }
        }
        _ => {}
    }
}

impl Dataset {
    /// Load a dataset file; the top level must be a JSON array
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read dataset: {}", path.display()))?;
        let root: Value = serde_json::from_str(&contents)
            .context(format!("Failed to parse dataset: {}", path.display()))?;
        let dataset = Self::from_value(root)?;
        info!("Loaded {} records from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    pub fn from_value(root: Value) -> Result<Self> {
        if !root.is_array() {
            anyhow::bail!("Dataset must be a JSON array of records");
        }
        Ok(Self { root })
    }

    pub fn value(&self) -> &Value {
        &self.root
    }

    /// Number of top-level records
    pub fn len(&self) -> usize {
        self.root.as_array().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All matching store links, in document order
    pub fn links(&self, identifier: &str) -> Vec<LinkRef> {
        let mut found = Vec::new();
        if let Value::Array(records) = &self.root {
            for (i, record) in records.iter().enumerate() {
                walk(record, &format!("/{}", i), i, identifier, &mut found);
            }
        }
        found
    }

    /// Group matching links into tasks keyed by normalized URL.
    ///
    /// Only records in `start..start + max` are considered. Tasks keep the
    /// order in which their URL was first seen.
    pub fn discover_tasks(&self, identifier: &str, start: usize, max: Option<usize>) -> Vec<Task> {
        let end = max.map_or(usize::MAX, |m| start.saturating_add(m));
        let mut tasks: Vec<Task> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();

        for link in self.links(identifier) {
            if link.record < start || link.record >= end {
                continue;
            }

            let key = normalize_url(&link.url);
            let index = *by_key.entry(key.clone()).or_insert_with(|| {
                tasks.push(Task::new(link.url.clone(), key, tasks.len()));
                tasks.len() - 1
            });
            tasks[index].locations.push(link.pointer);
        }

        debug!("Discovered {} unique URLs", tasks.len());
        tasks
    }

    /// Write every snapshot field into each dataset location of the task
    pub fn apply(&mut self, task: &Task, snapshot: &Snapshot) -> Result<usize> {
        let fields = match serde_json::to_value(snapshot)? {
            Value::Object(fields) => fields,
            _ => anyhow::bail!("Snapshot did not serialize to an object"),
        };
        self.apply_fields(&task.locations, &fields)
    }

    /// Copy `fields` into the objects at `pointers`, returning how many were updated
    pub fn apply_fields(&mut self, pointers: &[String], fields: &Map<String, Value>) -> Result<usize> {
        let mut updated = 0;
        for pointer in pointers {
            let target = self
                .root
                .pointer_mut(pointer)
                .and_then(Value::as_object_mut)
                .context(format!("No store link at {}", pointer))?;
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
            updated += 1;
        }
        Ok(updated)
    }

    /// Fields from `Snapshot::FIELDS` present on the object at `pointer`
    pub fn result_fields(&self, pointer: &str) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(Value::Object(link)) = self.root.pointer(pointer) {
            for name in Snapshot::FIELDS {
                if let Some(value) = link.get(name) {
                    fields.insert(name.to_string(), value.clone());
                }
            }
        }
        fields
    }

    /// Persist atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Dataset {
        Dataset::from_value(json!([
            {
                "model": "Phone X",
                "store_links": [
                    { "name": "Amazon", "url": "https://www.amazon.in/dp/B01?ref_=a" },
                    { "name": "Flipkart", "url": "https://www.flipkart.com/p/1" }
                ],
                "variants": [
                    { "ram": "8GB", "store_links": [
                        { "name": "amazon", "url": "https://www.amazon.in/dp/B02" }
                    ]}
                ]
            },
            {
                "model": "Phone Y",
                "store_links": [
                    { "name": "Amazon", "url": "https://www.amazon.in/dp/B01" },
                    { "name": "Amazon", "url": "" }
                ]
            }
        ]))
        .unwrap()
    }

    #[test]
    fn test_discovery_groups_duplicates() {
        let dataset = sample();
        let tasks = dataset.discover_tasks("amazon", 0, None);

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].key, "https://www.amazon.in/dp/B01");
        assert_eq!(tasks[0].locations, vec!["/0/store_links/0", "/1/store_links/0"]);
        assert_eq!(tasks[1].locations, vec!["/0/variants/0/store_links/0"]);
    }

    #[test]
    fn test_discovery_respects_record_window() {
        let dataset = sample();
        let tasks = dataset.discover_tasks("amazon", 1, Some(1));
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].locations, vec!["/1/store_links/0"]);

        assert!(dataset.discover_tasks("amazon", 5, None).is_empty());
        assert_eq!(dataset.discover_tasks("", 0, None).len(), 3);
    }

    #[test]
    fn test_apply_writes_fields() {
        let mut dataset = sample();
        let tasks = dataset.discover_tasks("amazon", 0, None);
        let snapshot = Snapshot {
            price: Some(15999.0),
            in_stock: None,
            ranked_offers: vec![],
            platform_url: Some("https://www.amazon.in/dp/B01".to_string()),
            product_name_via_url: Some("Phone X".to_string()),
            with_exchange_price: None,
        };

        assert_eq!(dataset.apply(&tasks[0], &snapshot).unwrap(), 2);
        let link = dataset.value().pointer("/1/store_links/0").unwrap();
        assert_eq!(link["price"], json!(15999.0));
        assert_eq!(link["in_stock"], Value::Null);
        assert_eq!(link["name"], json!("Amazon"));

        let fields = dataset.result_fields("/1/store_links/0");
        assert_eq!(fields.len(), Snapshot::FIELDS.len());
        assert!(dataset.result_fields("/0/store_links/1").is_empty());
    }

    #[test]
    fn test_rejects_non_array() {
        assert!(Dataset::from_value(json!({"a": 1})).is_err());
    }
}
