//! Partitioning of found vs. existing registrations by logical identity.

use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;
use serde::Serialize;
use crate::error::{RegistryError, Result};
use crate::registration::LogicalIdentity;

/// Work derived from comparing a scan against the registry.
#[derive(Debug)]
pub struct Partition<T> {
    /// Found, with no existing counterpart
    pub to_add: Vec<T>,
    /// Existing entity paired with what was found for it
    pub to_update: Vec<(T, T)>,
    /// Existing, no longer found
    pub to_remove: Vec<T>,
}

/// Split `found` and `existing` by logical key.
///
/// Repeated keys in `found` keep the first entry. When several existing
/// entities share a key the first one is matched and the rest are removed.
pub fn partition<T: LogicalIdentity>(found: Vec<T>, existing: Vec<T>) -> Partition<T> {
    let mut found_by_key: HashMap<T::Key, T> = HashMap::new();
    let mut found_order = Vec::new();
    for item in found {
        let key = item.logical_key();
        if !found_by_key.contains_key(&key) {
            found_order.push(key.clone());
            found_by_key.insert(key, item);
        }
    }

    let mut matched = HashSet::new();
    let mut to_update = Vec::new();
    let mut to_remove = Vec::new();
    for item in existing {
        let key = item.logical_key();
        match found_by_key.remove(&key) {
            Some(found) => {
                to_update.push((item, found));
                matched.insert(key);
            }
            None => to_remove.push(item),
        }
    }

    let to_add = found_order
        .into_iter()
        .filter(|key| !matched.contains(key))
        .filter_map(|key| found_by_key.remove(&key))
        .collect();

    Partition { to_add, to_update, to_remove }
}

/// Per-item result of reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Added,
    Updated,
    Removed,
    Unchanged,
}

/// Counters reported by a reconciliation run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl ReconcileStats {
    pub fn count(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Added => self.added += 1,
            ItemOutcome::Updated => self.updated += 1,
            ItemOutcome::Removed => self.removed += 1,
            ItemOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// Count an item, isolating its failure. Only cancellation stops the batch.
    pub fn record(&mut self, kind: &str, id: &str, result: Result<ItemOutcome>) -> Result<()> {
        match result {
            Ok(outcome) => self.count(outcome),
            Err(RegistryError::Cancelled) => return Err(RegistryError::Cancelled),
            Err(e) => {
                tracing::error!(kind, id, error = %e, "Failed to reconcile registry entry, skipping");
                self.unchanged += 1;
            }
        }
        Ok(())
    }

    /// No adds, updates or removals
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

impl AddAssign for ReconcileStats {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.updated += other.updated;
        self.removed += other.removed;
        self.unchanged += other.unchanged;
    }
}
