//! Work item tallies
//!
//! A tally counts the work items of a node per status bucket. There are two
//! flavours:
//!
//! - [`LeafTally`]: owned by nodes without children and mutated directly by
//!   work item events. Each live item sits in exactly one bucket, so the
//!   total can never drift from the sum of the buckets.
//! - [`TallyCounts`]: plain counters. Parent nodes and asset links hold one
//!   of these and recompute it from scratch from their children, never
//!   patching it incrementally.

use std::collections::HashMap;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::types::WorkItemId;

/// Read-only queries shared by both tally flavours
pub trait WorkItemTally {
    /// Snapshot of the per-bucket counters
    fn counts(&self) -> TallyCounts;

    /// True when nothing is waiting, scheduled or cooking and every item
    /// ended either cooked or errored.
    fn all_complete(&self) -> bool {
        let c = self.counts();
        c.waiting == 0 && c.cooking == 0 && c.scheduled == 0 && c.total == c.cooked + c.errored
    }

    fn any_failed(&self) -> bool {
        self.counts().errored > 0
    }

    fn any_pending(&self) -> bool {
        let c = self.counts();
        c.total > 0 && (c.waiting > 0 || c.cooking > 0 || c.scheduled > 0)
    }

    /// Cooked share of all items, formatted for display (e.g. `"50.0%"`)
    fn progress_text(&self) -> String {
        let c = self.counts();
        let ratio = if c.total > 0 {
            c.cooked as f64 / c.total as f64 * 100.0
        } else {
            0.0
        };
        format!("{:.1}%", ratio)
    }
}

/// Per-bucket work item counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyCounts {
    pub total: usize,
    pub waiting: usize,
    pub scheduled: usize,
    pub cooking: usize,
    pub cooked: usize,
    pub errored: usize,
    pub cancelled: usize,
}

impl TallyCounts {
    /// Reset every counter to zero
    pub fn zero_all(&mut self) {
        *self = Self::default();
    }
}

impl WorkItemTally for TallyCounts {
    fn counts(&self) -> TallyCounts {
        *self
    }
}

impl Add for TallyCounts {
    type Output = TallyCounts;

    fn add(mut self, rhs: TallyCounts) -> TallyCounts {
        self += rhs;
        self
    }
}

impl AddAssign for TallyCounts {
    fn add_assign(&mut self, rhs: TallyCounts) {
        self.total += rhs.total;
        self.waiting += rhs.waiting;
        self.scheduled += rhs.scheduled;
        self.cooking += rhs.cooking;
        self.cooked += rhs.cooked;
        self.errored += rhs.errored;
        self.cancelled += rhs.cancelled;
    }
}

impl std::iter::Sum for TallyCounts {
    fn sum<I: Iterator<Item = TallyCounts>>(iter: I) -> Self {
        iter.fold(TallyCounts::default(), |acc, c| acc + c)
    }
}

/// Status bucket of a tracked work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TallyBucket {
    Waiting,
    Scheduled,
    Cooking,
    Cooked,
    Errored,
    Cancelled,
}

/// Tally of a node without children, keyed by work item id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeafTally {
    items: HashMap<WorkItemId, TallyBucket>,
}

impl LeafTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move an item into `bucket`, leaving any previous bucket
    pub fn record(&mut self, work_item_id: WorkItemId, bucket: TallyBucket) {
        self.items.insert(work_item_id, bucket);
    }

    /// Track a newly added item as waiting unless it is already tracked
    pub fn record_created(&mut self, work_item_id: WorkItemId) {
        self.items.entry(work_item_id).or_insert(TallyBucket::Waiting);
    }

    /// Stop tracking an item
    pub fn remove(&mut self, work_item_id: WorkItemId) -> Option<TallyBucket> {
        self.items.remove(&work_item_id)
    }

    /// Keep only the items for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(WorkItemId) -> bool) {
        self.items.retain(|id, _| keep(*id));
    }

    pub fn bucket_of(&self, work_item_id: WorkItemId) -> Option<TallyBucket> {
        self.items.get(&work_item_id).copied()
    }

    pub fn zero_all(&mut self) {
        self.items.clear();
    }
}

impl WorkItemTally for LeafTally {
    fn counts(&self) -> TallyCounts {
        let mut counts = TallyCounts {
            total: self.items.len(),
            ..TallyCounts::default()
        };
        for bucket in self.items.values() {
            match bucket {
                TallyBucket::Waiting => counts.waiting += 1,
                TallyBucket::Scheduled => counts.scheduled += 1,
                TallyBucket::Cooking => counts.cooking += 1,
                TallyBucket::Cooked => counts.cooked += 1,
                TallyBucket::Errored => counts.errored += 1,
                TallyBucket::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}

/// Tally held by a graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeTally {
    /// Mutated directly by this node's work item events
    Leaf(LeafTally),
    /// Sum of the leaf nodes nested below this node
    Aggregated(TallyCounts),
}

impl Default for NodeTally {
    fn default() -> Self {
        NodeTally::Leaf(LeafTally::default())
    }
}

impl NodeTally {
    pub fn zero_all(&mut self) {
        match self {
            NodeTally::Leaf(tally) => tally.zero_all(),
            NodeTally::Aggregated(counts) => counts.zero_all(),
        }
    }

    /// Leaf tally for direct mutation, if this is a leaf
    pub fn as_leaf_mut(&mut self) -> Option<&mut LeafTally> {
        match self {
            NodeTally::Leaf(tally) => Some(tally),
            NodeTally::Aggregated(_) => None,
        }
    }
}

impl WorkItemTally for NodeTally {
    fn counts(&self) -> TallyCounts {
        match self {
            NodeTally::Leaf(tally) => tally.counts(),
            NodeTally::Aggregated(counts) => *counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket_sum(c: &TallyCounts) -> usize {
        c.waiting + c.scheduled + c.cooking + c.cooked + c.errored + c.cancelled
    }

    #[test]
    fn test_leaf_tally_moves_between_buckets() {
        let mut tally = LeafTally::new();
        tally.record_created(1);
        tally.record_created(2);
        tally.record(1, TallyBucket::Cooking);
        tally.record(1, TallyBucket::Cooked);
        tally.record(2, TallyBucket::Errored);

        let c = tally.counts();
        assert_eq!(c.total, 2);
        assert_eq!(c.cooked, 1);
        assert_eq!(c.errored, 1);
        assert_eq!(c.cooking, 0);
        assert_eq!(c.total, bucket_sum(&c));
        assert!(tally.all_complete());
        assert!(tally.any_failed());
        assert!(!tally.any_pending());
    }

    #[test]
    fn test_record_created_does_not_reset_tracked_item() {
        let mut tally = LeafTally::new();
        tally.record(7, TallyBucket::Cooked);
        tally.record_created(7);
        assert_eq!(tally.bucket_of(7), Some(TallyBucket::Cooked));
    }

    #[test]
    fn test_remove_and_zero_all() {
        let mut tally = LeafTally::new();
        tally.record_created(1);
        tally.record(2, TallyBucket::Scheduled);
        assert!(tally.any_pending());

        assert_eq!(tally.remove(1), Some(TallyBucket::Waiting));
        assert_eq!(tally.remove(1), None);
        assert_eq!(tally.counts().total, 1);

        tally.zero_all();
        assert_eq!(tally.counts(), TallyCounts::default());
        // An empty tally counts as complete
        assert!(tally.all_complete());
        assert!(!tally.any_pending());
    }

    #[test]
    fn test_counts_arithmetic() {
        let a = TallyCounts {
            total: 3,
            waiting: 1,
            cooked: 2,
            ..Default::default()
        };
        let b = TallyCounts {
            total: 1,
            errored: 1,
            ..Default::default()
        };
        let sum: TallyCounts = vec![a, b].into_iter().sum();
        assert_eq!(sum.total, 4);
        assert_eq!(sum.errored, 1);
        assert_eq!(sum.cooked, a.cooked);
        assert_eq!(a + b, sum);
    }

    #[test]
    fn test_progress_text() {
        let mut tally = LeafTally::new();
        assert_eq!(tally.progress_text(), "0.0%");
        tally.record(1, TallyBucket::Cooked);
        tally.record(2, TallyBucket::Cooking);
        assert_eq!(tally.progress_text(), "50.0%");
    }

    #[test]
    fn test_node_tally_leaf_access() {
        let mut tally = NodeTally::default();
        tally.as_leaf_mut().unwrap().record_created(4);
        assert_eq!(tally.counts().waiting, 1);

        let mut aggregated = NodeTally::Aggregated(TallyCounts {
            total: 2,
            cooked: 2,
            ..Default::default()
        });
        assert!(aggregated.as_leaf_mut().is_none());
        aggregated.zero_all();
        assert_eq!(aggregated.counts().total, 0);
    }
}
