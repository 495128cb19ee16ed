//! Change tracking for declared keys.
//!
//! The tracker records the original value of every declared key modified since the
//! last committed baseline. Entries clean themselves up when a key is written back
//! to its original value, so a recorded original never equals the live value
//! (the only exception is an entry forced with [`ChangeTracker::will_change`]).

use bson::Bson;
use std::collections::BTreeMap;

/// An `(old, new)` pair.
pub type Change = (Bson, Bson);

/// Changes captured before a persistence operation, committed only if it succeeds.
pub type ChangeSnapshot = BTreeMap<String, Change>;

#[derive(Clone, Debug, Default)]
pub struct ChangeTracker {
    originals: BTreeMap<String, Bson>,
    previous: BTreeMap<String, Change>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a write of `new` over `old` for a declared key.
    pub fn record(&mut self, key: &str, old: Bson, new: &Bson) {
        if old != *new && !self.originals.contains_key(key) {
            self.originals.insert(key.to_string(), old);
        }

        if self.originals.get(key) == Some(new) {
            self.originals.remove(key);
        }
    }

    /// Marks a key dirty using `current` as its baseline.
    pub fn will_change(&mut self, key: &str, current: Bson) {
        self.originals
            .entry(key.to_string())
            .or_insert(current);
    }

    pub fn is_changed(&self, key: &str) -> bool {
        self.originals.contains_key(key)
    }

    pub fn has_changes(&self) -> bool {
        !self.originals.is_empty()
    }

    /// Original value of a changed key.
    pub fn original(&self, key: &str) -> Option<&Bson> {
        self.originals.get(key)
    }

    /// Changed key names, sorted.
    pub fn changed(&self) -> Vec<String> {
        self.originals.keys().cloned().collect()
    }

    /// Changed keys with their originals.
    pub fn originals(&self) -> &BTreeMap<String, Bson> {
        &self.originals
    }

    /// Drops the entry of a key, returning its original.
    pub fn forget(&mut self, key: &str) -> Option<Bson> {
        self.originals.remove(key)
    }

    /// Pairs every changed key with its live value.
    pub fn snapshot<F>(&self, current: F) -> ChangeSnapshot
    where
        F: Fn(&str) -> Bson,
    {
        self.originals
            .iter()
            .map(|(key, old)| (key.clone(), (old.clone(), current(key))))
            .collect()
    }

    /// Makes `snapshot` the previous changes and starts a clean baseline.
    pub fn commit(&mut self, snapshot: ChangeSnapshot) {
        self.previous = snapshot;
        self.originals.clear();
    }

    /// Starts a clean baseline without touching the previous changes.
    pub fn clear(&mut self) {
        self.originals.clear();
    }

    pub fn previous_changes(&self) -> &BTreeMap<String, Change> {
        &self.previous
    }

    pub fn previous_change(&self, key: &str) -> Option<&Change> {
        self.previous.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(value: &str) -> Bson {
        Bson::String(value.to_string())
    }

    #[test]
    fn first_original_wins() {
        let mut tracker = ChangeTracker::new();
        tracker.record("name", s("a"), &s("b"));
        tracker.record("name", s("b"), &s("c"));

        assert_eq!(tracker.original("name"), Some(&s("a")));
    }

    #[test]
    fn reverting_cleans_the_entry() {
        let mut tracker = ChangeTracker::new();
        tracker.record("name", s("a"), &s("b"));
        tracker.record("name", s("b"), &s("a"));

        assert!(!tracker.is_changed("name"));
        assert!(!tracker.has_changes());
    }

    #[test]
    fn same_value_is_not_a_change() {
        let mut tracker = ChangeTracker::new();
        tracker.record("age", Bson::Null, &Bson::Null);

        assert!(!tracker.has_changes());
    }

    #[test]
    fn commit_moves_snapshot_to_previous() {
        let mut tracker = ChangeTracker::new();
        tracker.record("name", s("Original"), &s("Changed"));

        let snapshot = tracker.snapshot(|_| s("Changed"));
        tracker.commit(snapshot);

        assert!(!tracker.has_changes());
        assert_eq!(tracker.previous_change("name"), Some(&(s("Original"), s("Changed"))));
    }

    #[test]
    fn will_change_uses_current_value() {
        let mut tracker = ChangeTracker::new();
        tracker.will_change("tags", Bson::Array(vec![]));

        assert!(tracker.is_changed("tags"));
        assert_eq!(tracker.original("tags"), Some(&Bson::Array(vec![])));
    }
}
