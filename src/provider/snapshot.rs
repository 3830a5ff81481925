//! Immutable secret snapshots and the cell that publishes them.
//!
//! A snapshot is built once from a complete listing and never mutated.
//! Publishing swaps the whole `Arc` so readers see either the old or the new
//! mapping, never a mix of both.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Snapshot
// ============================================================================

/// The flat key/value data produced by one successful fetch.
#[derive(Clone, PartialEq, Eq)]
pub struct Snapshot {
    generation: u64,
    fetched_at: Option<DateTime<Utc>>,
    data: HashMap<String, String>,
}

impl Snapshot {
    /// The snapshot a provider starts with.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            fetched_at: None,
            data: HashMap::new(),
        }
    }

    fn fetched(generation: u64, data: HashMap<String, String>) -> Self {
        Self {
            generation,
            fetched_at: Some(Utc::now()),
            data,
        }
    }

    /// 0 for the empty snapshot, then strictly increasing per publish.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the data was fetched, `None` for the empty snapshot.
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.data.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.data
    }

    /// Copy of the data with every value masked, for display.
    pub fn redacted(&self) -> HashMap<String, String> {
        self.data
            .iter()
            .map(|(k, v)| (k.clone(), mask_value(v)))
            .collect()
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("generation", &self.generation)
            .field("fetched_at", &self.fetched_at)
            .field("keys", &self.keys())
            .finish()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

// ============================================================================
// Publication
// ============================================================================

/// Holds the current snapshot. Reads are lock-free; publishers take turns
/// so the visible generation only moves forward.
pub(crate) struct SnapshotCell {
    current: ArcSwap<Snapshot>,
    publish: Mutex<()>,
}

impl SnapshotCell {
    pub(crate) fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::empty()),
            publish: Mutex::new(()),
        }
    }

    pub(crate) fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Replace the current snapshot wholesale.
    pub(crate) fn publish(&self, data: HashMap<String, String>) -> Arc<Snapshot> {
        let _turn = self.publish.lock();
        let generation = self.current.load().generation + 1;
        let snapshot = Arc::new(Snapshot::fetched(generation, data));
        self.current.store(Arc::clone(&snapshot));
        snapshot
    }
}

/// Mask a secret value for display.
///
/// Short values are fully hidden. Longer ones keep a three-character prefix
/// (enough to tell `sk-` from `ghp`) and their length; the tail is never shown.
pub fn mask_value(value: &str) -> String {
    const SHOWN: usize = 3;
    const MIN_LEN: usize = 12;

    let len = value.chars().count();
    if len == 0 {
        return String::new();
    }
    if len < MIN_LEN {
        return "********".to_string();
    }
    let prefix: String = value.chars().take(SHOWN).collect();
    format!("{prefix}… ({len} chars)")
}
