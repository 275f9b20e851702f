//! Client rate-state ledger.

use std::collections::HashMap;

/// Rate state tracked for one client identifier.
///
/// `window_start` is `None` until the first counting window opens, so a
/// window legitimately opened at unix time 0 is distinct from "no window
/// yet". `last_seen` is updated on every request from the identifier,
/// regardless of the admission outcome, and drives TTL eviction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientRecord {
    /// Requests counted in the current window
    pub count: u32,
    /// Unix timestamp at which the current window opened
    pub window_start: Option<u64>,
    /// Unix timestamp of the most recent request
    pub last_seen: u64,
}

/// In-memory table mapping client identifier to rate state.
///
/// The ledger is pure data plus accessors. It never decides admission or
/// eviction; callers own the lock and the policy.
#[derive(Debug, Default)]
pub struct Ledger {
    records: HashMap<String, ClientRecord>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the record for an identifier, creating a zeroed one if absent.
    pub fn get_or_create(&mut self, identifier: &str) -> &mut ClientRecord {
        self.records
            .entry(identifier.to_string())
            .or_insert_with(ClientRecord::default)
    }

    /// Look up a record without creating it.
    pub fn get(&self, identifier: &str) -> Option<&ClientRecord> {
        self.records.get(identifier)
    }

    /// Remove a single record.
    pub fn remove(&mut self, identifier: &str) -> Option<ClientRecord> {
        self.records.remove(identifier)
    }

    /// Keep only records for which the predicate returns `true`, returning
    /// the identifiers of the removed records.
    ///
    /// Every entry is visited exactly once; removing an entry never skips
    /// its neighbors.
    pub fn retain(
        &mut self,
        mut keep: impl FnMut(&str, &ClientRecord) -> bool,
    ) -> Vec<String> {
        let mut evicted = Vec::new();
        self.records.retain(|identifier, record| {
            if keep(identifier, record) {
                true
            } else {
                evicted.push(identifier.clone());
                false
            }
        });
        evicted
    }

    /// Number of tracked identifiers.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop all records. Primarily useful for testing.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
