//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records, statuses and pending batches
//! that maintain the invariants the sync laws rely on.

use crate::fixtures::Note;
use driftsync_core::{SyncOperation, SyncStatus};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating record ids.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{1,12}").expect("Invalid regex")
}

/// Strategy for generating request times.
pub fn request_time_strategy() -> impl Strategy<Value = i64> {
    0i64..1_000_000
}

/// Strategy for generating any status.
pub fn status_strategy() -> impl Strategy<Value = SyncStatus> {
    prop::sample::select(SyncStatus::ALL.to_vec())
}

/// Strategy for generating statuses a row can be stored at.
pub fn resident_status_strategy() -> impl Strategy<Value = SyncStatus> {
    status_strategy().prop_filter("DeleteSynced is never stored", |s| s.is_resident())
}

/// Strategy for generating operations.
pub fn operation_strategy() -> impl Strategy<Value = SyncOperation> {
    prop::sample::select(SyncOperation::ALL.to_vec())
}

/// Strategy for generating a note.
pub fn note_strategy() -> impl Strategy<Value = Note> {
    (
        record_id_strategy(),
        request_time_strategy(),
        "[ -~]{0,32}",
        prop::collection::vec("[a-z]{1,8}", 0..4),
    )
        .prop_map(|(id, request_time, title, tags)| {
            Note::new(id, request_time, title).with_tags(tags)
        })
}

/// Strategy for generating notes with distinct ids.
pub fn unique_notes_strategy(max: usize) -> impl Strategy<Value = Vec<Note>> {
    prop::collection::vec(note_strategy(), 0..max).prop_map(|notes| {
        let by_id: BTreeMap<String, Note> =
            notes.into_iter().map(|n| (n.id.clone(), n)).collect();
        by_id.into_values().collect()
    })
}

/// Strategy for generating notes with distinct ids, each paired with a
/// resident status.
pub fn stored_notes_strategy(max: usize) -> impl Strategy<Value = Vec<(Note, SyncStatus)>> {
    unique_notes_strategy(max).prop_flat_map(|notes| {
        let len = notes.len();
        (
            Just(notes),
            prop::collection::vec(resident_status_strategy(), len),
        )
            .prop_map(|(notes, statuses)| notes.into_iter().zip(statuses).collect())
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
