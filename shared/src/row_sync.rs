//! Bookkeeping between an append-only backing sequence and a windowed view.
//!
//! Positions are indices into the backing sequence. A position starts out
//! pending when it is appended and becomes loaded the first time a claim
//! returns it. Each position is returned by at most one claim.

use std::collections::BTreeSet;
use std::ops::Range;

#[derive(Debug, Default, Clone)]
pub struct RowSyncTracker {
    available: usize,
    loaded: BTreeSet<usize>,
    pending: BTreeSet<usize>,
}

impl RowSyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `count` positions appended at the end and returns them.
    pub fn record_appended(&mut self, count: usize) -> Range<usize> {
        let start = self.available;
        self.available += count;
        self.pending.extend(start..self.available);
        start..self.available
    }

    /// Catches up with a backing sequence that is now `available` long.
    /// Shrinking is ignored since the sequence never shrinks.
    pub fn sync_to(&mut self, available: usize) -> Range<usize> {
        self.record_appended(available.saturating_sub(self.available))
    }

    /// Positions appended since the last claim, in ascending order.
    ///
    /// They are marked loaded, so a second call with no append in between
    /// returns nothing.
    pub fn claim_new_positions(&mut self) -> Vec<usize> {
        let pending = std::mem::take(&mut self.pending);
        let claimed: Vec<usize> = pending
            .into_iter()
            .filter(|p| !self.loaded.contains(p))
            .collect();
        self.loaded.extend(claimed.iter().copied());
        claimed
    }

    /// The visible positions whose data has arrived but which have not been
    /// shown yet, in ascending order. Positions past the end of the backing
    /// sequence are placeholders and are left for a later claim.
    pub fn claim_visible_unloaded<I>(&mut self, visible: I) -> Vec<usize>
    where
        I: IntoIterator<Item = usize>,
    {
        let claimed: BTreeSet<usize> = visible
            .into_iter()
            .filter(|p| *p < self.available && !self.loaded.contains(p))
            .collect();
        for position in &claimed {
            self.pending.remove(position);
            self.loaded.insert(*position);
        }
        claimed.into_iter().collect()
    }

    pub fn available(&self) -> usize {
        self.available
    }

    pub fn is_loaded(&self, position: usize) -> bool {
        self.loaded.contains(&position)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn loaded_len(&self) -> usize {
        self.loaded.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn new_positions_are_claimed_once_in_order() {
        let mut tracker = RowSyncTracker::new();
        assert_eq!(tracker.record_appended(2), 0..2);
        assert_eq!(tracker.claim_new_positions(), vec![0, 1]);

        assert_eq!(tracker.record_appended(1), 2..3);
        assert_eq!(tracker.claim_new_positions(), vec![2]);
        assert!(tracker.claim_new_positions().is_empty());
    }

    #[test]
    fn visible_claim_skips_loaded_and_placeholder_rows() {
        let mut tracker = RowSyncTracker::new();
        tracker.record_appended(5);
        tracker.claim_new_positions();
        tracker.record_appended(5);

        // rows 0..5 are already on screen, 10..12 have no data yet
        assert_eq!(tracker.claim_visible_unloaded(3..12), vec![5, 6, 7, 8, 9]);
        assert!(tracker.claim_visible_unloaded(3..12).is_empty());
        assert!(tracker.claim_new_positions().is_empty());
        assert!(!tracker.is_loaded(10));
    }

    #[test]
    fn visible_claim_dedups_and_sorts() {
        let mut tracker = RowSyncTracker::new();
        tracker.record_appended(4);
        assert_eq!(tracker.claim_visible_unloaded([3, 1, 3, 1]), vec![1, 3]);
        assert_eq!(tracker.claim_new_positions(), vec![0, 2]);
    }

    #[test]
    fn sync_to_only_moves_forward() {
        let mut tracker = RowSyncTracker::new();
        assert_eq!(tracker.sync_to(3), 0..3);
        assert_eq!(tracker.sync_to(1), 3..3);
        assert_eq!(tracker.available(), 3);
        assert_eq!(tracker.pending_len(), 3);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Append(usize),
        ClaimNew,
        ClaimVisible(Vec<usize>),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..6).prop_map(Op::Append),
            Just(Op::ClaimNew),
            prop::collection::vec(0usize..40, 0..8).prop_map(Op::ClaimVisible),
        ]
    }

    proptest! {
        #[test]
        fn claim_after_append_returns_exactly_the_new_positions(
            ops in prop::collection::vec(op(), 0..20),
            k in 1usize..10,
        ) {
            let mut tracker = RowSyncTracker::new();
            for op in ops {
                match op {
                    Op::Append(n) => { tracker.record_appended(n); }
                    Op::ClaimNew => { tracker.claim_new_positions(); }
                    Op::ClaimVisible(v) => { tracker.claim_visible_unloaded(v); }
                }
            }
            tracker.claim_new_positions();

            let appended = tracker.record_appended(k);
            let claimed = tracker.claim_new_positions();
            prop_assert_eq!(claimed, appended.collect::<Vec<_>>());
            prop_assert!(tracker.claim_new_positions().is_empty());
        }

        #[test]
        fn no_position_is_stranded_or_claimed_twice(ops in prop::collection::vec(op(), 0..30)) {
            let mut tracker = RowSyncTracker::new();
            let mut seen = BTreeSet::new();
            for op in ops {
                let claimed = match op {
                    Op::Append(n) => { tracker.record_appended(n); Vec::new() }
                    Op::ClaimNew => tracker.claim_new_positions(),
                    Op::ClaimVisible(v) => tracker.claim_visible_unloaded(v),
                };
                for p in claimed {
                    prop_assert!(seen.insert(p), "position {} claimed twice", p);
                }
            }
            for p in tracker.claim_new_positions() {
                prop_assert!(seen.insert(p));
            }
            prop_assert_eq!(seen.len(), tracker.available());
            prop_assert!((0..tracker.available()).all(|p| tracker.is_loaded(p)));
        }
    }
}
