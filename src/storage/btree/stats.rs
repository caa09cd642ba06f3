use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::storage::btree::editor::{SetKind, SetOutcome};

/// Counters copied out of [`BTreeStats`] at one instant.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeStatsSnapshot {
    /// Descents that ended on a leaf.
    pub leaf_searches: u64,
    /// Internal pages routed through on the way down.
    pub internal_searches: u64,
    /// Cells added to leaves.
    pub inserts: u64,
    /// Overwrites that kept the payload's end offset.
    pub in_place_updates: u64,
    /// Overwrites that moved the payload.
    pub relocations: u64,
    /// Cells removed from leaves.
    pub deletes: u64,
    /// Pages compacted while writing.
    pub defragmentations: u64,
    /// Leaves halved.
    pub leaf_splits: u64,
    /// Internal pages halved.
    pub internal_splits: u64,
    /// New roots grown above a split root.
    pub root_splits: u64,
}

/// Which kind of page a split produced a sibling for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SplitKind {
    Leaf,
    Internal,
    Root,
}

/// Write and search counters shared by a tree and whoever holds its handle.
#[derive(Default, Debug)]
pub struct BTreeStats {
    leaf_searches: AtomicU64,
    internal_searches: AtomicU64,
    inserts: AtomicU64,
    in_place_updates: AtomicU64,
    relocations: AtomicU64,
    deletes: AtomicU64,
    defragmentations: AtomicU64,
    leaf_splits: AtomicU64,
    internal_splits: AtomicU64,
    root_splits: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, AtomicOrdering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(AtomicOrdering::Relaxed)
}

impl BTreeStats {
    /// Counts one page visited by a descent.
    pub(crate) fn record_search(&self, is_leaf: bool) {
        bump(if is_leaf {
            &self.leaf_searches
        } else {
            &self.internal_searches
        });
    }

    /// Counts a successful leaf `set`.
    pub(crate) fn record_set(&self, outcome: SetOutcome) {
        bump(match outcome.kind {
            SetKind::Inserted => &self.inserts,
            SetKind::UpdatedInPlace => &self.in_place_updates,
            SetKind::Relocated => &self.relocations,
        });
        if outcome.defragmented {
            bump(&self.defragmentations);
        }
    }

    pub(crate) fn record_delete(&self) {
        bump(&self.deletes);
    }

    /// Counts a compaction the tree asked for outside of `set`.
    pub(crate) fn record_defragmentation(&self) {
        bump(&self.defragmentations);
    }

    pub(crate) fn record_split(&self, kind: SplitKind) {
        bump(match kind {
            SplitKind::Leaf => &self.leaf_splits,
            SplitKind::Internal => &self.internal_splits,
            SplitKind::Root => &self.root_splits,
        });
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        BTreeStatsSnapshot {
            leaf_searches: read(&self.leaf_searches),
            internal_searches: read(&self.internal_searches),
            inserts: read(&self.inserts),
            in_place_updates: read(&self.in_place_updates),
            relocations: read(&self.relocations),
            deletes: read(&self.deletes),
            defragmentations: read(&self.defragmentations),
            leaf_splits: read(&self.leaf_splits),
            internal_splits: read(&self.internal_splits),
            root_splits: read(&self.root_splits),
        }
    }

    /// Logs a snapshot at `info` under the `slotted::stats` target.
    pub fn emit_tracing(&self) {
        let snap = self.snapshot();
        tracing::info!(
            target: "slotted::stats",
            leaf_searches = snap.leaf_searches,
            internal_searches = snap.internal_searches,
            inserts = snap.inserts,
            in_place_updates = snap.in_place_updates,
            relocations = snap.relocations,
            deletes = snap.deletes,
            defragmentations = snap.defragmentations,
            leaf_splits = snap.leaf_splits,
            internal_splits = snap.internal_splits,
            root_splits = snap.root_splits,
            "btree stats snapshot"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_set_routes_to_kind_counter() {
        let stats = BTreeStats::default();
        stats.record_set(SetOutcome {
            kind: SetKind::Inserted,
            defragmented: false,
        });
        stats.record_set(SetOutcome {
            kind: SetKind::Relocated,
            defragmented: true,
        });
        let snap = stats.snapshot();
        assert_eq!(snap.inserts, 1);
        assert_eq!(snap.relocations, 1);
        assert_eq!(snap.in_place_updates, 0);
        assert_eq!(snap.defragmentations, 1);
    }

    #[test]
    fn searches_and_splits_are_counted_by_kind() {
        let stats = BTreeStats::default();
        stats.record_search(false);
        stats.record_search(false);
        stats.record_search(true);
        stats.record_split(SplitKind::Leaf);
        stats.record_split(SplitKind::Root);
        let snap = stats.snapshot();
        assert_eq!((snap.internal_searches, snap.leaf_searches), (2, 1));
        assert_eq!((snap.leaf_splits, snap.internal_splits, snap.root_splits), (1, 0, 1));
    }
}
