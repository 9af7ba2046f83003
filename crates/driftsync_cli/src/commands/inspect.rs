//! Inspect command - shows per-collection row counts by sync status.

use super::{open_store, CliError, OutputFormat};
use driftsync_core::{LocalStore, SyncStatus};
use driftsync_storage::{RowQuery, StoreBackend};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    pub path: String,
    pub file_size: u64,
    pub total_rows: usize,
    pub pending_rows: usize,
    pub collections: Vec<CollectionInfo>,
}

/// Counts for one collection.
#[derive(Debug, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub rows: usize,
    pub pending: usize,
    /// Row count per status name. Unknown codes show as `code:<n>`.
    pub by_status: BTreeMap<String, usize>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), CliError> {
    let format = OutputFormat::parse(format)?;
    let store = open_store(path)?;
    let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let result = collect(&store, path, file_size)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text(&result),
    }
    Ok(())
}

/// Gathers counts from an open store.
pub fn collect<B: StoreBackend>(
    store: &LocalStore<B>,
    path: &Path,
    file_size: u64,
) -> Result<InspectResult, CliError> {
    let mut collections = Vec::new();
    for name in store.backend().collections()? {
        let rows = store.backend().query(&RowQuery::collection(name.as_str()))?;

        let mut by_status = BTreeMap::new();
        let mut pending = 0;
        for row in &rows {
            let label = match SyncStatus::from_code(row.status) {
                Some(status) => {
                    if status.is_pending() {
                        pending += 1;
                    }
                    status.to_string()
                }
                None => format!("code:{}", row.status),
            };
            *by_status.entry(label).or_insert(0) += 1;
        }

        collections.push(CollectionInfo {
            name,
            rows: rows.len(),
            pending,
            by_status,
        });
    }
    collections.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(InspectResult {
        path: path.display().to_string(),
        file_size,
        total_rows: collections.iter().map(|c| c.rows).sum(),
        pending_rows: collections.iter().map(|c| c.pending).sum(),
        collections,
    })
}

fn print_text(result: &InspectResult) {
    println!("driftsync Store Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {}", format_size(result.file_size));
    println!("Rows: {} ({} pending)", result.total_rows, result.pending_rows);

    if result.collections.is_empty() {
        println!();
        println!("Store is empty.");
        return;
    }

    for collection in &result.collections {
        println!();
        println!(
            "{} - {} rows, {} pending",
            collection.name, collection.rows, collection.pending
        );
        for (status, count) in &collection.by_status {
            println!("  {status:<16} {count:>8}");
        }
    }
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
