//! Leaf bin storage (spec §4.1, component C2).
use std::rc::Rc;

use crate::props::{InsertProps, TraverseProps};
use crate::value::IntervalValue;

/// A cursor over the sorted insertion batch, shared across the bins a single
/// insert descends through. Threading a cursor (rather than splicing the
/// batch in place) keeps the borrow checker happy while preserving the
/// spec's invariant that each entry is consumed exactly once.
pub struct InsertCursor<'d, V> {
    data: &'d [Rc<V>],
    pos: usize,
}

impl<'d, V: IntervalValue> InsertCursor<'d, V> {
    pub fn new(data: &'d [Rc<V>]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn peek(&self) -> Option<&Rc<V>> {
        self.data.get(self.pos)
    }

    pub fn advance(&mut self) -> Option<&Rc<V>> {
        let item = self.data.get(self.pos);
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    /// Entries left to consume. Invariant 6 (§8): a façade-level insert must
    /// drain this to zero unless the caller supplied its own cursor
    /// position to resume from (the `dataIndex` option in the source).
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Peeks ahead (without consuming) for every distinct start coordinate
    /// in `[from, to)`, used by the leaf-level insert path to pre-compute
    /// which key boundaries it needs before descending slot by slot.
    pub fn starts_within(&self, from: i64, to: i64) -> Vec<i64> {
        let mut out = Vec::new();
        for entry in &self.data[self.pos..] {
            let s = entry.start();
            if s >= to {
                break;
            }
            if s >= from && out.last() != Some(&s) {
                out.push(s);
            }
        }
        out
    }
}

/// The outcome of removing entries from a bin.
pub enum BinRemoveOutcome {
    /// The bin still holds data.
    Remains,
    /// Both lists are now empty; the caller should replace this slot with
    /// the filler (`Empty` or `Unloaded`, per the remove call's `convert_to`).
    Gone,
}

/// Leaf-level storage for a single coordinate sub-range. Holds intervals
/// starting exactly at `start` (`start_list`) and intervals flowing in from
/// the left (`continued_list`).
#[derive(Clone, Debug)]
pub struct DataBin<V: IntervalValue> {
    start: i64,
    start_list: Vec<Rc<V>>,
    continued_list: Vec<Rc<V>>,
}

impl<V: IntervalValue> DataBin<V> {
    pub fn new(start: i64) -> Self {
        Self {
            start,
            start_list: Vec::new(),
            continued_list: Vec::new(),
        }
    }

    pub fn with_lists(start: i64, start_list: Vec<Rc<V>>, continued_list: Vec<Rc<V>>) -> Self {
        Self {
            start,
            start_list,
            continued_list,
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn start_list(&self) -> &[Rc<V>] {
        &self.start_list
    }

    pub fn continued_list(&self) -> &[Rc<V>] {
        &self.continued_list
    }

    pub fn is_empty(&self) -> bool {
        self.start_list.is_empty() && self.continued_list.is_empty()
    }

    /// Runs the §4.1 insert procedure against the shared cursor.
    ///
    /// `carry` is the continued-list handed down from the bin immediately
    /// to the left (or the seed `continuedList` on the first bin of a
    /// multi-range insert); it is merged into `self.continued_list` and left
    /// untouched for the caller to recompute into the next bin's carry via
    /// [`DataBin::carry_forward`].
    ///
    /// Returns the maximum `end` observed among entries newly placed in
    /// this bin's `start_list`, used by the caller to grow
    /// `postInsertionOpRange.end`.
    pub fn insert(
        &mut self,
        cursor: &mut InsertCursor<V>,
        carry: &[Rc<V>],
        props: &mut InsertProps<V>,
    ) -> Option<i64> {
        // Step 1: fold cursor entries that start strictly before this bin
        // into a local carry extension, firing dataCallback once each.
        let mut extra_carry = Vec::new();
        while let Some(next) = cursor.peek() {
            if next.start() >= self.start {
                break;
            }
            let entry = cursor.advance().expect("peeked Some").clone();
            if let Some(cb) = props.data_callback.as_mut() {
                cb(&entry);
            }
            if entry.end() > self.start {
                extra_carry.push(entry);
            }
        }

        // Step 2: merge carry-forward (filtered to entries that still reach
        // this bin) into our own continued_list.
        for entry in carry.iter().chain(extra_carry.iter()) {
            if entry.end() <= self.start {
                continue;
            }
            if !self
                .continued_list
                .iter()
                .any(|existing| Rc::ptr_eq(existing, entry))
            {
                self.continued_list.push(entry.clone());
            }
        }
        self.continued_list.sort_by(|a, b| V::compare(a, b));

        // Step 3: consume entries whose start equals this bin's start.
        let mut new_entries = Vec::new();
        while let Some(next) = cursor.peek() {
            if next.start() != self.start {
                break;
            }
            new_entries.push(cursor.advance().expect("peeked Some").clone());
        }

        let mut max_end = new_entries.iter().map(|e| e.end()).max();

        if new_entries.is_empty() {
            // Nothing new at this coordinate; leave start_list as-is.
        } else if !props.add_new {
            for entry in &new_entries {
                if let Some(cb) = props.data_callback.as_mut() {
                    cb(entry);
                }
            }
            self.start_list = new_entries;
        } else {
            for entry in new_entries {
                let is_dup = !props.allow_duplicates
                    && self.start_list.iter().any(|e| e.equal_to(&entry));
                if is_dup {
                    continue;
                }
                if let Some(cb) = props.data_callback.as_mut() {
                    cb(&entry);
                }
                self.start_list.push(entry);
            }
            self.start_list.sort_by(|a, b| V::compare(a, b));
        }

        if max_end.is_none() {
            max_end = self.start_list.iter().map(|e| e.end()).max();
        }
        max_end
    }

    /// The continued-list to hand to the bin starting at `next_start`:
    /// everything this bin holds (its own `start_list` plus whatever
    /// flowed into it) that still reaches past `next_start`.
    pub fn carry_forward(&self, next_start: i64) -> Vec<Rc<V>> {
        let mut out: Vec<Rc<V>> = self
            .start_list
            .iter()
            .chain(self.continued_list.iter())
            .filter(|e| e.end() > next_start)
            .cloned()
            .collect();
        out.sort_by(|a, b| V::compare(a, b));
        out
    }

    /// Removes entries starting at this bin's coordinate. `target`
    /// identifies which entry (or entries, if `exact_match` is false and
    /// several share the start coordinate) to drop.
    pub fn remove(&mut self, target: &V, exact_match: bool, props: &mut InsertProps<V>) -> BinRemoveOutcome {
        self.start_list.retain(|e| {
            let matches = if exact_match {
                e.equal_to(target)
            } else {
                e.start() == target.start()
            };
            if matches {
                if let Some(cb) = props.data_callback.as_mut() {
                    cb(e);
                }
            }
            !matches
        });
        if self.is_empty() {
            BinRemoveOutcome::Gone
        } else {
            BinRemoveOutcome::Remains
        }
    }

    /// Invokes the data callback on every interval in this bin. On the
    /// first bin of a traversal range both lists are visited; on later
    /// bins only `start_list` is, so that an interval spanning many bins is
    /// only ever handed to the callback once (spec §4.1, §8 invariant 3).
    ///
    /// Returns `false` the moment a filter or callback returns falsy and
    /// `breakOnFalse` is set, so the caller can halt the wider traversal.
    pub fn traverse(&self, is_first_bin: bool, props: &mut TraverseProps<V>) -> bool {
        if is_first_bin {
            for entry in self.continued_list.iter().chain(self.start_list.iter()) {
                if !self.visit_one(entry, props) {
                    return false;
                }
            }
        } else {
            for entry in self.start_list.iter() {
                if !self.visit_one(entry, props) {
                    return false;
                }
            }
        }
        true
    }

    /// Visits one entry. Only the data callback's return value can abort the
    /// wider traversal (when `break_on_false` is set); a filter rejecting an
    /// entry just skips it (spec §8 scenario S4: filtering out minus-strand
    /// entries under `breakOnFalse` still yields every matching entry across
    /// the whole range, it does not stop at the first rejection).
    fn visit_one(&self, entry: &Rc<V>, props: &mut TraverseProps<V>) -> bool {
        if let Some(filter) = props.data_filter.as_mut() {
            if !filter(entry) {
                return true;
            }
        }
        if let Some(cb) = props.data_callback.as_mut() {
            let keep_going = cb(entry);
            if !keep_going && props.break_on_false {
                return false;
            }
        }
        true
    }

    /// Attempts to absorb `right` (spec §4.1 "merge-after"). Returns `true`
    /// when `right`'s `start_list` was empty and it can be dropped by the
    /// caller (everything it held is implied by `self`). Otherwise projects
    /// `self`'s own lists forward into `right.continued_list`, without
    /// replacing any entry already present there with a structurally-equal
    /// foreign clone (identity of stored data is preserved).
    pub fn merge_after(&self, right: &mut DataBin<V>) -> bool {
        if right.start_list.is_empty() {
            return true;
        }
        for entry in self.start_list.iter().chain(self.continued_list.iter()) {
            if entry.end() <= right.start {
                continue;
            }
            let already_present = right
                .continued_list
                .iter()
                .any(|existing| Rc::ptr_eq(existing, entry) || existing.equal_to(entry));
            if !already_present {
                right.continued_list.push(entry.clone());
            }
        }
        right.continued_list.sort_by(|a, b| V::compare(a, b));
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::GenomicInterval;

    fn iv(start: i64, end: i64) -> Rc<GenomicInterval<u32>> {
        Rc::new(GenomicInterval::new("chr1", start, end, 0))
    }

    #[test]
    fn insert_replaces_start_list_when_add_new_false() {
        let mut bin = DataBin::new(10);
        let data = vec![iv(10, 20), iv(10, 30)];
        let mut cursor = InsertCursor::new(&data);
        let mut props = InsertProps::default();
        bin.insert(&mut cursor, &[], &mut props);
        assert_eq!(bin.start_list().len(), 2);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn insert_merge_append_suppresses_duplicates() {
        let mut bin = DataBin::new(10);
        bin.start_list.push(iv(10, 20));
        let data = vec![iv(10, 20)];
        let mut cursor = InsertCursor::new(&data);
        let mut props = InsertProps {
            add_new: true,
            allow_duplicates: false,
            ..Default::default()
        };
        bin.insert(&mut cursor, &[], &mut props);
        assert_eq!(bin.start_list().len(), 1);
    }

    #[test]
    fn carry_forward_drops_entries_that_end_before_next_bin() {
        let bin = DataBin::with_lists(10, vec![iv(10, 15), iv(10, 100)], vec![]);
        let carried = bin.carry_forward(50);
        assert_eq!(carried.len(), 1);
        assert_eq!(carried[0].end, 100);
    }

    #[test]
    fn merge_after_absorbs_empty_right_neighbor() {
        let left = DataBin::with_lists(10, vec![iv(10, 100)], vec![]);
        let mut right = DataBin::new(50);
        assert!(left.merge_after(&mut right));
    }

    #[test]
    fn merge_after_projects_without_replacing_existing_identity() {
        let stored = iv(10, 100);
        let left = DataBin::with_lists(10, vec![stored.clone()], vec![]);
        let mut right = DataBin::with_lists(50, vec![iv(50, 60)], vec![stored.clone()]);
        let absorbed = left.merge_after(&mut right);
        assert!(!absorbed);
        // The right bin's own copy of `stored` must remain the same Rc, not
        // be replaced by a foreign clone pushed from the left projection.
        assert!(right.continued_list.iter().any(|e| Rc::ptr_eq(e, &stored)));
        assert_eq!(
            right.continued_list.iter().filter(|e| e.start == 10).count(),
            1
        );
    }
}
