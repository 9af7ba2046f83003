//! Pending command - lists rows awaiting remote acknowledgement.

use super::{open_store, CliError, OutputFormat};
use driftsync_core::{LocalStore, SortDirection, SortField, SyncStatus};
use driftsync_storage::StoreBackend;
use serde::Serialize;
use std::path::Path;

/// One pending row.
#[derive(Debug, Serialize)]
pub struct PendingEntry {
    pub id: String,
    pub request_time: i64,
    pub status: String,
    pub operation: String,
    pub body_size: usize,
}

/// Runs the pending command.
pub fn run(
    path: &Path,
    collection: &str,
    limit: Option<usize>,
    format: &str,
) -> Result<(), CliError> {
    let format = OutputFormat::parse(format)?;
    let store = open_store(path)?;
    let entries = collect(&store, collection, limit)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No pending rows in '{collection}'.");
            }
            for entry in &entries {
                println!(
                    "{:>14}  {:<7} {:<15} {} ({} bytes)",
                    entry.request_time, entry.operation, entry.status, entry.id, entry.body_size
                );
            }
        }
    }
    Ok(())
}

/// Returns every pending row of `collection`, oldest first, across the
/// three pending statuses.
pub fn collect<B: StoreBackend>(
    store: &LocalStore<B>,
    collection: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingEntry>, CliError> {
    let mut rows = Vec::new();
    for status in SyncStatus::PENDING {
        rows.extend(store.query_by_status(
            collection,
            status,
            SortField::RequestTime,
            SortDirection::Ascending,
        )?);
    }
    rows.sort_by(|a, b| {
        a.request_time
            .cmp(&b.request_time)
            .then_with(|| a.id.cmp(&b.id))
    });
    if let Some(limit) = limit {
        rows.truncate(limit);
    }

    Ok(rows
        .into_iter()
        .map(|row| PendingEntry {
            operation: row
                .status
                .operation()
                .map(|op| op.to_string())
                .unwrap_or_default(),
            status: row.status.to_string(),
            id: row.id,
            request_time: row.request_time,
            body_size: row.body.len(),
        })
        .collect())
}
