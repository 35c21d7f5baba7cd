//! The public tree façade (spec §4, §6, component C4).
use std::rc::Rc;

use tracing::{info, instrument};
use typed_builder::TypedBuilder;

use crate::bin::InsertCursor;
use crate::error::{SubRangeFailure, TreeError};
use crate::node::{Arena, NodeKey};
use crate::props::{Filler, InsertProps, RemoveProps, TraverseProps};
use crate::range::ChrRange;
use crate::value::IntervalValue;
use crate::wither::WitherClock;

/// Construction-time configuration for an [`IntervalTree`].
///
/// Built with the `typed-builder`-derived builder, e.g.
/// `TreeConfig::builder().branching_factor(64).build()`.
#[derive(Debug, Clone, TypedBuilder)]
pub struct TreeConfig {
    /// Maximum children (inner) or slots (leaf) per node before a split is
    /// triggered. Spec §3 calls this `B`.
    #[builder(default = 50)]
    pub branching_factor: usize,

    /// Generations a node's fetched data survives before a wither pass
    /// releases it back to `Unloaded`/`Empty`. `0` (the default) disables
    /// withering entirely.
    #[builder(default = 0)]
    pub life_span: u64,

    /// What `remove` leaves behind when a bin becomes empty and what an
    /// as-yet-unfetched slot starts as.
    #[builder(default = Filler::Unloaded)]
    pub default_filler: Filler,

    /// When set, the tree has no notion of "unfetched" data: every slot
    /// starts life as `Empty` rather than `Unloaded`, and withering (if
    /// enabled) also resets to `Empty`. Suited to trees built entirely
    /// from in-memory data with no external data source to re-fetch from.
    #[builder(default = false)]
    pub local_only: bool,

    /// Maintain `prev`/`next` sibling links between nodes created by a
    /// split (spec §3 "Inner node" optional sibling links). Costs a little
    /// bookkeeping on every split; only worth it if a caller plans to walk
    /// the tree laterally rather than through `traverse`.
    #[builder(default = false)]
    pub sibling_links: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig::builder().build()
    }
}

impl TreeConfig {
    fn filler(&self) -> Filler {
        if self.local_only {
            Filler::Empty
        } else {
            self.default_filler
        }
    }
}

/// A bin-partitioned, withering interval tree over a single chromosome's
/// coordinate space (spec §1 overview). Construct with [`IntervalTree::new`]
/// and a covering [`ChrRange`]; the tree only ever answers queries inside
/// that range, widening it with [`IntervalTree::insert`] is not supported —
/// resize by constructing a new tree, or widen the original covering
/// range up front.
pub struct IntervalTree<V: IntervalValue> {
    arena: Arena<V>,
    root: NodeKey,
    covering_range: ChrRange,
    config: TreeConfig,
    clock: WitherClock,
}

impl<V: IntervalValue> IntervalTree<V> {
    /// Creates an empty tree covering `range`.
    pub fn new(range: ChrRange, config: TreeConfig) -> Self {
        let clock = WitherClock::new(config.life_span);
        let mut arena = Arena::new();
        let root = arena.new_root_leaf(&range, config.filler(), clock.current_gen());
        Self {
            arena,
            root,
            covering_range: range,
            config,
            clock,
        }
    }

    pub fn covering_range(&self) -> &ChrRange {
        &self.covering_range
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Inserts `data` (already sorted by [`IntervalValue::compare`]) over
    /// `range` (spec §4.2 "Insert", §6.1). `data` must all fall within
    /// `range`; entries are consumed from a single cursor so every one is
    /// placed exactly once across the bins it touches.
    #[instrument(skip(self, data, props), fields(range = %range))]
    pub fn insert(
        &mut self,
        range: &ChrRange,
        data: &[Rc<V>],
        props: &mut InsertProps<V>,
    ) -> Result<(), TreeError> {
        if !self.covering_range.overlaps(range) {
            return Err(TreeError::InvalidRange {
                message: format!("{range} lies outside covering range {}", self.covering_range),
            });
        }
        let clipped = self.covering_range.truncated_to(range).ok_or_else(|| TreeError::InvalidRange {
            message: format!("{range} does not overlap covering range {}", self.covering_range),
        })?;

        let mut cursor = InsertCursor::new(data);
        let mut carry = props.continued_list.clone();
        let mut post_insertion_end = clipped.start;

        self.arena.insert(
            self.root,
            &clipped,
            &mut cursor,
            &mut carry,
            props,
            &mut post_insertion_end,
            self.config.branching_factor,
            self.clock.current_gen(),
            self.config.sibling_links,
        )?;

        if cursor.remaining() > 0 {
            return Err(TreeError::InconsistentContinuedList {
                range: clipped,
                message: format!("{} entries left unplaced after insert", cursor.remaining()),
            });
        }

        if self.arena.needs_root_growth(self.root, self.config.branching_factor) {
            info!(branching_factor = self.config.branching_factor, "growing root level");
            self.root = self
                .arena
                .grow_root(self.root, self.config.branching_factor, self.clock.current_gen(), self.config.sibling_links);
        }

        Ok(())
    }

    /// Inserts several disjoint `(range, data)` batches, collecting every
    /// sub-range failure into one [`TreeError::AggregatedInsert`] instead
    /// of stopping at the first error (spec §6.4 "Aggregated insert").
    pub fn insert_many(
        &mut self,
        batches: &[(ChrRange, Vec<Rc<V>>)],
        make_props: impl Fn() -> InsertProps<V>,
    ) -> Result<(), TreeError> {
        let mut failures = Vec::new();
        for (range, data) in batches {
            let mut props = make_props();
            if let Err(err) = self.insert(range, data, &mut props) {
                let sample_entries = data.iter().take(3).map(|e| e.region_to_string()).collect();
                failures.push(SubRangeFailure {
                    range: range.clone(),
                    message: err.to_string(),
                    sample_entries,
                });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TreeError::AggregatedInsert { failures })
        }
    }

    /// Removes a single entry matching `target` (spec §4.3 "Remove",
    /// §6.1). Looks up the bin at `target.start()`; `exact_match` (via
    /// `props.exact_match`) decides whether any entry starting there is
    /// removed or only a structurally-equal one.
    #[instrument(skip(self, target, props))]
    pub fn remove(&mut self, target: &V, props: &mut RemoveProps<V>) -> Result<(), TreeError> {
        let range = ChrRange::new_unchecked(target.chr().to_string(), target.start(), target.end());
        if !self.covering_range.overlaps(&range) {
            return Err(TreeError::InvalidRange {
                message: format!("{range} lies outside covering range {}", self.covering_range),
            });
        }
        let filler = props.convert_to.unwrap_or_else(|| self.config.filler());
        self.arena.remove(self.root, target, props, filler);

        // Spec §4.3 "Remove": rebalancing is not done inline during the
        // descent, so the façade restructures (and root-shrinks) after the
        // fact instead.
        self.arena
            .restructure(self.root, self.config.branching_factor, self.clock.current_gen(), self.config.sibling_links);
        self.root = self.arena.shrink_root(self.root);
        Ok(())
    }

    /// Walks every entry overlapping `range` (spec §4.2 "Traverse", §6.1).
    /// Advances the wither generation once traversal completes, unless
    /// `props.do_not_wither` is set.
    #[instrument(skip(self, range, props), fields(range = %range))]
    pub fn traverse(&mut self, range: &ChrRange, props: &mut TraverseProps<V>) -> Result<(), TreeError> {
        let clipped = self.covering_range.truncated_to(range).ok_or_else(|| TreeError::InvalidRange {
            message: format!("{range} does not overlap covering range {}", self.covering_range),
        })?;
        let mut not_first_call = false;
        self.arena.traverse(self.root, &clipped, props, &mut not_first_call)?;

        if !props.do_not_wither && self.clock.is_enabled() {
            self.clock.advance();
            self.root = self.arena.wither(
                self.root,
                self.clock.current_gen(),
                self.clock.life_span(),
                self.config.filler(),
                self.config.branching_factor,
                self.config.sibling_links,
            );
        }
        Ok(())
    }

    /// Collects the coordinate sub-ranges of `range` that are still
    /// `Unloaded` (spec §4.2 "Uncached range query", §6.1).
    pub fn get_uncached_range(&self, range: &ChrRange) -> Result<Vec<ChrRange>, TreeError> {
        let clipped = self.covering_range.truncated_to(range).ok_or_else(|| TreeError::InvalidRange {
            message: format!("{range} does not overlap covering range {}", self.covering_range),
        })?;
        let mut out = Vec::new();
        self.arena.collect_uncached(self.root, &clipped, &mut out);
        Ok(out)
    }

    /// Whether any part of `range` is still `Unloaded`.
    pub fn has_uncached_range(&self, range: &ChrRange) -> Result<bool, TreeError> {
        let clipped = self.covering_range.truncated_to(range).ok_or_else(|| TreeError::InvalidRange {
            message: format!("{range} does not overlap covering range {}", self.covering_range),
        })?;
        Ok(self.arena.has_uncached(self.root, &clipped))
    }

    /// Resets the whole tree back to a single filler slot (spec §4.3
    /// "Clear"). The covering range is unchanged.
    pub fn clear(&mut self) {
        self.arena.clear_to_filler(self.root, &self.covering_range, self.config.filler(), self.clock.current_gen());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::GenomicInterval;

    fn iv(start: i64, end: i64) -> Rc<GenomicInterval<&'static str>> {
        Rc::new(GenomicInterval::new("chr1", start, end, "D"))
    }

    fn new_tree() -> IntervalTree<GenomicInterval<&'static str>> {
        let range = ChrRange::new("chr1", 1, 2000).unwrap();
        IntervalTree::new(range, TreeConfig::builder().branching_factor(4).build())
    }

    #[test]
    fn insert_then_traverse_visits_each_entry_once() {
        let mut tree = new_tree();
        let data = vec![iv(10, 50), iv(20, 60), iv(100, 150)];
        let mut props = InsertProps {
            add_new: true,
            ..Default::default()
        };
        tree.insert(&ChrRange::new("chr1", 1, 2000).unwrap(), &data, &mut props).unwrap();

        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut tprops = TraverseProps::<GenomicInterval<&'static str>>::default();
        tprops.data_callback = Some(Box::new(move |e| {
            seen_clone.borrow_mut().push((e.start, e.end));
            true
        }));
        tree.traverse(&ChrRange::new("chr1", 1, 2000).unwrap(), &mut tprops).unwrap();
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn insert_outside_covering_range_errors() {
        let mut tree = new_tree();
        let data = vec![iv(10, 50)];
        let mut props = InsertProps::default();
        let result = tree.insert(&ChrRange::new("chr2", 1, 100).unwrap(), &data, &mut props);
        assert!(result.is_err());
    }

    #[test]
    fn clear_resets_to_filler() {
        let mut tree = new_tree();
        let data = vec![iv(10, 50)];
        let mut props = InsertProps {
            add_new: true,
            ..Default::default()
        };
        tree.insert(&ChrRange::new("chr1", 1, 2000).unwrap(), &data, &mut props).unwrap();
        tree.clear();
        let uncached = tree.get_uncached_range(&ChrRange::new("chr1", 1, 2000).unwrap()).unwrap();
        assert_eq!(uncached.len(), 1);
    }

    #[test]
    fn get_uncached_range_reports_unfetched_span() {
        let tree = new_tree();
        let uncached = tree.get_uncached_range(&ChrRange::new("chr1", 1, 2000).unwrap()).unwrap();
        assert_eq!(uncached.len(), 1);
        assert_eq!((uncached[0].start, uncached[0].end), (1, 2000));
    }

    /// A window entirely inside one bin must hand every interval flowing
    /// through it to the callback exactly once, in sorted order — covering
    /// both the continued-list and the start-list halves of that bin.
    #[test]
    fn traverse_window_within_one_bin_yields_overlapping_entries_in_sorted_order() {
        let range = ChrRange::new("chr1", 1, 2000).unwrap();
        let mut tree = IntervalTree::new(range.clone(), TreeConfig::builder().branching_factor(50).build());

        let d = |start, end, strand: Option<crate::value::Strand>| {
            let mut g = GenomicInterval::new("chr1", start, end, ());
            if let Some(s) = strand {
                g = g.with_strand(s);
            }
            Rc::new(g)
        };
        use crate::value::Strand::{Forward, Reverse};
        let d1 = d(5, 150, Some(Reverse));
        let d4 = d(12, 1200, Some(Reverse));
        let d5 = d(12, 1201, Some(Forward));
        let d7 = d(123, 456, Some(Reverse));
        let d8 = d(123, 789, Some(Forward));
        let d0 = d(3, 8, None);
        let d2 = d(5, 100, Some(Forward));
        let d3 = d(9, 10, Some(Forward));
        let d6 = d(51, 100, None);
        let d9 = d(234, 789, None);

        let mut data = vec![d0, d1.clone(), d2, d3, d4.clone(), d5.clone(), d6, d7.clone(), d8.clone(), d9];
        data.sort_by(|a, b| GenomicInterval::<()>::compare(a, b));

        let mut props = InsertProps {
            add_new: true,
            ..Default::default()
        };
        tree.insert(&range, &data, &mut props).unwrap();

        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut tprops = TraverseProps::default();
        tprops.data_callback = Some(Box::new(move |e: &Rc<GenomicInterval<()>>| {
            seen_clone.borrow_mut().push(e.clone());
            true
        }));
        tree.traverse(&ChrRange::new("chr1", 140, 200).unwrap(), &mut tprops).unwrap();

        let seen = seen.borrow();
        assert_eq!(*seen, vec![d1, d4, d5, d7, d8]);
    }

    /// A second `insert` of the same data over the same range must be a
    /// pure no-op: it fires no `data_callback` and leaves the
    /// already-loaded region alone (spec §8 invariant 2).
    #[test]
    fn second_insert_over_same_region_fires_no_callbacks() {
        let mut tree = new_tree();
        let range = ChrRange::new("chr1", 1, 2000).unwrap();
        let data = vec![iv(10, 50), iv(20, 60), iv(100, 150)];

        let mut first = InsertProps {
            add_new: true,
            ..Default::default()
        };
        tree.insert(&range, &data, &mut first).unwrap();

        let fired = Rc::new(std::cell::RefCell::new(0usize));
        let fired_clone = fired.clone();
        let mut second = InsertProps {
            add_new: true,
            data_callback: Some(Box::new(move |_| *fired_clone.borrow_mut() += 1)),
            ..Default::default()
        };
        tree.insert(&range, &data, &mut second).unwrap();
        assert_eq!(*fired.borrow(), 0);

        // The region is still fully loaded and still holds exactly the
        // entries from the first insert.
        assert!(!tree.has_uncached_range(&range).unwrap());
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut tprops = TraverseProps::default();
        tprops.data_callback = Some(Box::new(move |e: &Rc<GenomicInterval<&'static str>>| {
            seen_clone.borrow_mut().push((e.start, e.end));
            true
        }));
        tree.traverse(&range, &mut tprops).unwrap();
        assert_eq!(seen.borrow().len(), 3);
    }

    /// A multi-entry remove pass across a tree grown tall enough to split
    /// must leave every remaining entry intact and still reachable — the
    /// post-remove `restructure`/`shrink_root` pass (spec §4.3 "Remove")
    /// must rebalance without ever losing or duplicating data.
    #[test]
    fn remove_then_traverse_finds_only_the_surviving_entries() {
        let range = ChrRange::new("chr1", 1, 2000).unwrap();
        let mut tree = IntervalTree::new(range.clone(), TreeConfig::builder().branching_factor(4).build());

        let data: Vec<_> = (0..12).map(|i| iv(1 + i * 150, 1 + i * 150 + 50)).collect();
        let mut props = InsertProps {
            add_new: true,
            ..Default::default()
        };
        tree.insert(&range, &data, &mut props).unwrap();

        // Remove every other entry, converting the vacated slots to `Empty`
        // rather than the default `Unloaded` so the traversal below doesn't
        // need `allow_null` to step over them.
        let mut removed = Vec::new();
        for entry in data.iter().step_by(2) {
            let mut rprops = RemoveProps {
                convert_to: Some(Filler::Empty),
                ..Default::default()
            };
            tree.remove(entry, &mut rprops).unwrap();
            removed.push((entry.start, entry.end));
        }

        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut tprops = TraverseProps::default();
        tprops.data_callback = Some(Box::new(move |e: &Rc<GenomicInterval<&'static str>>| {
            seen_clone.borrow_mut().push((e.start, e.end));
            true
        }));
        tree.traverse(&range, &mut tprops).unwrap();

        let expected: Vec<_> = data
            .iter()
            .map(|e| (e.start, e.end))
            .filter(|e| !removed.contains(e))
            .collect();
        assert_eq!(*seen.borrow(), expected);
    }
}
