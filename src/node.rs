//! The B+-tree-derived inner node index (spec §4.2, component C3).
//!
//! Nodes live in a [`slab::Slab`] arena owned by the tree façade
//! ([`crate::tree::IntervalTree`]) and refer to each other by [`NodeKey`].
//! This mirrors the arena-of-indices shape the spec's design notes call for
//! when modelling cyclic sibling references (§9: "model these as
//! non-owning indices into the tree's node store").
use std::rc::Rc;

use slab::Slab;
use tracing::{trace, warn};

use crate::bin::{BinRemoveOutcome, DataBin, InsertCursor};
use crate::error::TreeError;
use crate::props::{Filler, InsertProps, RemoveProps, TraverseProps};
use crate::range::ChrRange;
use crate::slot::Slot;
use crate::value::IntervalValue;

/// An index into the tree's node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeKey(usize);

/// Either the node's children are other inner nodes (`reverse_depth > 0`)
/// or leaf-level slots (`reverse_depth == 0`); a node is never a mix of the
/// two (spec §3 invariant 3: "all leaf-level nodes share the same
/// reverseDepth = 0").
#[derive(Clone, Debug)]
pub enum Children<V: IntervalValue> {
    Inner(Vec<NodeKey>),
    Leaf(Vec<Slot<V>>),
}

impl<V: IntervalValue> Children<V> {
    pub fn len(&self) -> usize {
        match self {
            Children::Inner(v) => v.len(),
            Children::Leaf(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A B+-tree inner node. `keys[0..n]` bound `children[0..n-1]` such that
/// `keys[i]` is the start of `children[i]` and `keys[i+1]` is its end
/// (spec §3 "Inner node").
#[derive(Clone, Debug)]
pub struct InnerNode<V: IntervalValue> {
    keys: Vec<i64>,
    children: Children<V>,
    reverse_depth: u32,
    is_root: bool,
    /// Generation this node was created in; withering compares this against
    /// the tree's current generation (spec §4.4).
    birth_gen: u64,
    prev: Option<NodeKey>,
    next: Option<NodeKey>,
}

impl<V: IntervalValue> InnerNode<V> {
    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    pub fn children(&self) -> &Children<V> {
        &self.children
    }

    pub fn reverse_depth(&self) -> u32 {
        self.reverse_depth
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn birth_gen(&self) -> u64 {
        self.birth_gen
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn span(&self) -> (i64, i64) {
        (
            *self.keys.first().expect("node always has >=1 key"),
            *self.keys.last().expect("node always has >=1 key"),
        )
    }

    fn leaf_slots(&self) -> &[Slot<V>] {
        match &self.children {
            Children::Leaf(v) => v,
            Children::Inner(_) => panic!("leaf_slots called on a non-leaf node"),
        }
    }

    fn leaf_slots_mut(&mut self) -> &mut Vec<Slot<V>> {
        match &mut self.children {
            Children::Leaf(v) => v,
            Children::Inner(_) => panic!("leaf_slots_mut called on a non-leaf node"),
        }
    }

    fn inner_children(&self) -> &[NodeKey] {
        match &self.children {
            Children::Inner(v) => v,
            Children::Leaf(_) => panic!("inner_children called on a leaf node"),
        }
    }

    fn inner_children_mut(&mut self) -> &mut Vec<NodeKey> {
        match &mut self.children {
            Children::Inner(v) => v,
            Children::Leaf(_) => panic!("inner_children_mut called on a leaf node"),
        }
    }

    /// Index of the slot/child whose span contains `coord`, i.e. the
    /// largest `i` with `keys[i] <= coord`.
    fn slot_index_for(&self, coord: i64) -> usize {
        match self.keys.binary_search(&coord) {
            Ok(i) if i < self.children.len() => i,
            Ok(i) => i - 1,
            Err(i) => i - 1,
        }
    }
}

/// The node arena. Wraps a [`Slab`] so the tree façade only ever deals in
/// [`NodeKey`]s, never raw indices.
pub struct Arena<V: IntervalValue> {
    nodes: Slab<InnerNode<V>>,
}

impl<V: IntervalValue> Arena<V> {
    pub fn new() -> Self {
        Self { nodes: Slab::new() }
    }

    pub fn get(&self, key: NodeKey) -> &InnerNode<V> {
        &self.nodes[key.0]
    }

    fn get_mut(&mut self, key: NodeKey) -> &mut InnerNode<V> {
        &mut self.nodes[key.0]
    }

    /// Creates the single-slot root a fresh (or cleared) tree starts with.
    pub fn new_root_leaf(&mut self, range: &ChrRange, filler: Filler, gen: u64) -> NodeKey {
        let node = InnerNode {
            keys: vec![range.start, range.end],
            children: Children::Leaf(vec![Slot::filler(filler)]),
            reverse_depth: 0,
            is_root: true,
            birth_gen: gen,
            prev: None,
            next: None,
        };
        NodeKey(self.nodes.insert(node))
    }

    // ---- insert (spec §4.2 "Insert") -----------------------------------

    /// Truncates `range` to this node's own span and descends, recursing
    /// through inner levels or installing/updating leaf slots.
    pub fn insert(
        &mut self,
        key: NodeKey,
        range: &ChrRange,
        cursor: &mut InsertCursor<V>,
        carry: &mut Vec<Rc<V>>,
        props: &mut InsertProps<V>,
        post_insertion_end: &mut i64,
        branching_factor: usize,
        gen: u64,
        sibling_links: bool,
    ) -> Result<(), TreeError> {
        let (node_start, node_end) = self.get(key).span();
        let clipped = range
            .truncated_to(&ChrRange::new_unchecked(range.chr.clone(), node_start, node_end))
            .ok_or_else(|| TreeError::InvalidRange {
                message: format!("range {range} does not overlap node span [{node_start}, {node_end})"),
            })?;

        if self.get(key).reverse_depth > 0 {
            self.insert_inner(key, &clipped, cursor, carry, props, post_insertion_end, branching_factor, gen, sibling_links)?;
        } else {
            self.insert_leaf(key, &clipped, cursor, carry, props, post_insertion_end);
        }
        self.restructure_children(key, branching_factor, gen, sibling_links);
        Ok(())
    }

    fn insert_inner(
        &mut self,
        key: NodeKey,
        range: &ChrRange,
        cursor: &mut InsertCursor<V>,
        carry: &mut Vec<Rc<V>>,
        props: &mut InsertProps<V>,
        post_insertion_end: &mut i64,
        branching_factor: usize,
        gen: u64,
        sibling_links: bool,
    ) -> Result<(), TreeError> {
        let child_keys = self.get(key).inner_children().to_vec();
        let node_keys = self.get(key).keys.clone();
        for i in 0..child_keys.len() {
            let (child_start, child_end) = (node_keys[i], node_keys[i + 1]);
            let child_range = match range.truncated_to(&ChrRange::new_unchecked(range.chr.clone(), child_start, child_end)) {
                Some(r) => r,
                None => continue,
            };
            self.insert(
                child_keys[i],
                &child_range,
                cursor,
                carry,
                props,
                post_insertion_end,
                branching_factor,
                gen,
                sibling_links,
            )?;
        }
        // Rebuild keys from children's own spans, since recursion may have
        // split or merged grandchildren.
        let mut new_keys = Vec::with_capacity(child_keys.len() + 1);
        for (i, &ck) in child_keys.iter().enumerate() {
            let (start, end) = self.get(ck).span();
            if i == 0 {
                new_keys.push(start);
            }
            new_keys.push(end);
        }
        self.get_mut(key).keys = new_keys;
        Ok(())
    }

    fn insert_leaf(
        &mut self,
        key: NodeKey,
        range: &ChrRange,
        cursor: &mut InsertCursor<V>,
        carry: &mut Vec<Rc<V>>,
        props: &mut InsertProps<V>,
        post_insertion_end: &mut i64,
    ) {
        // Establish a key boundary at every coordinate a bin must start at:
        // the range edges, and every distinct interval start the cursor
        // will place within this range.
        let interesting: Vec<i64> = cursor.starts_within(range.start, range.end);
        self.ensure_boundary(key, range.start);
        self.ensure_boundary(key, range.end);
        for coord in interesting {
            self.ensure_boundary(key, coord);
        }

        let node = self.get(key);
        let idx_lo = node.keys.binary_search(&range.start).expect("boundary ensured");
        let idx_hi = node.keys.binary_search(&range.end).expect("boundary ensured");

        for i in idx_lo..idx_hi {
            let node = self.get_mut(key);
            let slot_start = node.keys[i];
            let next_start = node.keys[i + 1];

            if let Slot::Loaded(bin) = &node.leaf_slots()[i] {
                // Idempotency (spec §4.3 point 3, §8 invariant 2): a bin
                // that already holds data from a prior insert is left
                // untouched — entries the cursor would otherwise place
                // here are dropped instead of re-applied, so a repeated
                // insert over the same region fires no callbacks and
                // leaves the tree structurally unchanged.
                while cursor.peek().map(|e| e.start() == slot_start).unwrap_or(false) {
                    cursor.advance();
                }
                *carry = bin.carry_forward(next_start);
                continue;
            }

            let has_incoming = !carry.is_empty() || cursor.peek().map(|e| e.start() <= slot_start).unwrap_or(false);

            if has_incoming {
                let mut bin = match std::mem::replace(&mut node.leaf_slots_mut()[i], Slot::Empty) {
                    Slot::Loaded(existing) => existing,
                    _ => DataBin::new(slot_start),
                };
                let max_end = bin.insert(cursor, carry, props);
                if let Some(me) = max_end {
                    *post_insertion_end = (*post_insertion_end).max(me);
                }
                *carry = bin.carry_forward(next_start);
                self.get_mut(key).leaf_slots_mut()[i] = Slot::Loaded(bin);
            } else {
                carry.clear();
                if matches!(self.get(key).leaf_slots()[i], Slot::Unloaded) {
                    self.get_mut(key).leaf_slots_mut()[i] = Slot::Empty;
                }
            }
        }

        self.compact_adjacent_leaf_slots(key);
    }

    /// Inserts a key boundary at `coord` if one isn't already present,
    /// splitting the slot it falls inside (spec §4.2 "Split"). No-op on
    /// inner (non-leaf) nodes; boundaries are only created at leaf level.
    fn ensure_boundary(&mut self, key: NodeKey, coord: i64) {
        let node = self.get_mut(key);
        if node.keys.binary_search(&coord).is_ok() {
            return;
        }
        let idx = node.slot_index_for(coord);
        let slots = node.leaf_slots_mut();
        let old = slots[idx].clone();
        let (left, right) = split_slot(old, coord);
        slots[idx] = left;
        slots.insert(idx + 1, right);
        node.keys.insert(idx + 1, coord);
    }

    /// Merges adjacent mergeable leaf slots after an insert touches a span
    /// (spec §4.2 "After each slot decision, attempt to merge the new slot
    /// with its left neighbor").
    ///
    /// Accesses `node.children` and `node.keys` as disjoint fields of the
    /// same `&mut InnerNode` rather than through the `leaf_slots_mut`
    /// helper: going through a method call would tie `slots`'s borrow to
    /// the whole node for as long as it's live, making the later
    /// `node.keys.remove` call next to it a borrow-checker error.
    fn compact_adjacent_leaf_slots(&mut self, key: NodeKey) {
        let node = self.get_mut(key);
        let slots = match &mut node.children {
            Children::Leaf(v) => v,
            Children::Inner(_) => panic!("compact_adjacent_leaf_slots called on a non-leaf node"),
        };
        let mut lo = 0usize;
        while lo + 1 < slots.len() {
            let (left_part, right_part) = slots.split_at_mut(lo + 1);
            let left = &left_part[lo];
            let right = &mut right_part[0];
            let merged = if left.same_filler(&*right) {
                true
            } else {
                match (left, &mut *right) {
                    (Slot::Loaded(l), Slot::Loaded(r)) => l.merge_after(r),
                    _ => false,
                }
            };
            if merged {
                slots.remove(lo + 1);
                node.keys.remove(lo + 1);
            } else {
                lo += 1;
            }
        }
    }

    // ---- traverse (spec §4.2 "Traverse") --------------------------------

    /// Descends into every slot/child whose span overlaps `range`, invoking
    /// `props`'s callbacks. `not_first_call` tracks whether an earlier bin
    /// in this traversal has already emitted its `continued_list`, so later
    /// bins don't re-emit intervals that flow through them (spec §8
    /// invariant 3: each overlapping interval is visited exactly once).
    pub fn traverse(
        &self,
        key: NodeKey,
        range: &ChrRange,
        props: &mut TraverseProps<V>,
        not_first_call: &mut bool,
    ) -> Result<bool, TreeError> {
        let node = self.get(key);
        if let Some(filter) = props.node_filter.as_mut() {
            if !filter(node) {
                return Ok(true);
            }
        }
        let mut node_handled = false;
        if let Some(cb) = props.node_callback.as_mut() {
            let keep_going = cb(node);
            node_handled = true;
            if !keep_going && props.break_on_false {
                return Ok(false);
            }
        }
        if node_handled && !props.both_calls {
            return Ok(true);
        }

        match &node.children {
            Children::Inner(child_keys) => {
                for i in 0..child_keys.len() {
                    let (cs, ce) = (node.keys[i], node.keys[i + 1]);
                    let Some(sub) = range.truncated_to(&ChrRange::new_unchecked(range.chr.clone(), cs, ce)) else {
                        continue;
                    };
                    if !self.traverse(child_keys[i], &sub, props, not_first_call)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Children::Leaf(slots) => {
                for i in 0..slots.len() {
                    let (cs, ce) = (node.keys[i], node.keys[i + 1]);
                    if range.truncated_to(&ChrRange::new_unchecked(range.chr.clone(), cs, ce)).is_none() {
                        continue;
                    }
                    match &slots[i] {
                        Slot::Empty => continue,
                        Slot::Unloaded => {
                            if props.allow_null {
                                continue;
                            }
                            return Err(TreeError::DataNotReady {
                                range: ChrRange::new_unchecked(range.chr.clone(), cs, ce),
                            });
                        }
                        Slot::Loaded(bin) => {
                            let is_first = !*not_first_call;
                            if !bin.traverse(is_first, props) {
                                return Ok(false);
                            }
                            *not_first_call = true;
                        }
                    }
                }
                Ok(true)
            }
        }
    }

    // ---- uncached range (spec §4.2 "Uncached range query") -------------

    pub fn collect_uncached(&self, key: NodeKey, range: &ChrRange, out: &mut Vec<ChrRange>) {
        let node = self.get(key);
        match &node.children {
            Children::Inner(child_keys) => {
                for i in 0..child_keys.len() {
                    let (cs, ce) = (node.keys[i], node.keys[i + 1]);
                    if let Some(sub) = range.truncated_to(&ChrRange::new_unchecked(range.chr.clone(), cs, ce)) {
                        self.collect_uncached(child_keys[i], &sub, out);
                    }
                }
            }
            Children::Leaf(slots) => {
                for i in 0..slots.len() {
                    let (cs, ce) = (node.keys[i], node.keys[i + 1]);
                    let Some(sub) = range.truncated_to(&ChrRange::new_unchecked(range.chr.clone(), cs, ce)) else {
                        continue;
                    };
                    if matches!(slots[i], Slot::Unloaded) {
                        push_merged(out, sub);
                    }
                }
            }
        }
    }

    pub fn has_uncached(&self, key: NodeKey, range: &ChrRange) -> bool {
        let node = self.get(key);
        match &node.children {
            Children::Inner(child_keys) => {
                for i in 0..child_keys.len() {
                    let (cs, ce) = (node.keys[i], node.keys[i + 1]);
                    if let Some(sub) = range.truncated_to(&ChrRange::new_unchecked(range.chr.clone(), cs, ce)) {
                        if self.has_uncached(child_keys[i], &sub) {
                            return true;
                        }
                    }
                }
                false
            }
            Children::Leaf(slots) => {
                for i in 0..slots.len() {
                    let (cs, ce) = (node.keys[i], node.keys[i + 1]);
                    if range.truncated_to(&ChrRange::new_unchecked(range.chr.clone(), cs, ce)).is_some()
                        && matches!(slots[i], Slot::Unloaded)
                    {
                        return true;
                    }
                }
                false
            }
        }
    }

    // ---- remove (spec §4.2 "Remove") ------------------------------------

    /// Locates the slot containing `target.start()` and recurses to it.
    /// Removal never deletes inner nodes or shrinks the tree's shape; a
    /// bin that becomes empty is simply replaced by `filler`, and adjacent
    /// filler slots are compacted the same way an insert would (spec §4.3
    /// "Remove").
    pub fn remove(&mut self, key: NodeKey, target: &V, props: &mut RemoveProps<V>, filler: Filler) {
        let is_leaf_level = self.get(key).reverse_depth == 0;
        let idx = self.get(key).slot_index_for(target.start());

        if !is_leaf_level {
            let child_key = self.get(key).inner_children()[idx];
            self.remove(child_key, target, props, filler);
            return;
        }

        let outcome = self
            .get_mut(key)
            .leaf_slots_mut()
            .get_mut(idx)
            .and_then(Slot::as_bin_mut)
            .map(|bin| {
                let mut inner_props = InsertProps {
                    data_callback: props.data_callback.take(),
                    ..Default::default()
                };
                let outcome = bin.remove(target, props.exact_match, &mut inner_props);
                props.data_callback = inner_props.data_callback;
                outcome
            });
        if let Some(BinRemoveOutcome::Gone) = outcome {
            self.get_mut(key).leaf_slots_mut()[idx] = Slot::filler(filler);
            self.compact_adjacent_leaf_slots(key);
        }
    }

    // ---- balancing (spec §4.2 "Balancing") ------------------------------

    /// Re-balances the immediate children of `key` to keep their child
    /// counts within `[ceil(B/2), B]` (spec §3 "B+ balance invariants",
    /// §4.2 "Balancing"). Operates only within this node's own child
    /// vector: pulling a slot from a sibling across a *different* parent
    /// (the spec's `crossBorder` merge) is not implemented — an
    /// undersized boundary child with no in-parent sibling to redistribute
    /// with is logged and left as-is rather than propagated further
    /// (documented as an open question in DESIGN.md).
    fn restructure_children(&mut self, key: NodeKey, branching_factor: usize, gen: u64, sibling_links: bool) {
        let is_leaf_level = self.get(key).reverse_depth == 0;
        if is_leaf_level {
            return; // leaf slots are balanced by compact_adjacent_leaf_slots; they are not separately-owned nodes.
        }

        let lower = branching_factor.div_ceil(2);
        loop {
            let child_keys = self.get(key).inner_children().to_vec();
            if child_keys.len() <= 1 {
                break;
            }
            let mut changed = false;
            for i in 0..child_keys.len() {
                let count = self.get(child_keys[i]).child_count();
                if count > branching_factor {
                    self.split_child(key, i, branching_factor, gen, sibling_links);
                    changed = true;
                    break;
                }
                if count < lower {
                    if self.try_fix_undersized_child(key, i, branching_factor, lower) {
                        changed = true;
                        break;
                    } else {
                        trace!(child = i, count, lower, "child below minimum, no in-parent sibling to rebalance with");
                    }
                }
            }
            if !changed {
                break;
            }
            self.rebuild_keys_from_children(key);
        }
    }

    fn rebuild_keys_from_children(&mut self, key: NodeKey) {
        let child_keys = self.get(key).inner_children().to_vec();
        let mut new_keys = Vec::with_capacity(child_keys.len() + 1);
        for (i, &ck) in child_keys.iter().enumerate() {
            let (start, end) = self.get(ck).span();
            if i == 0 {
                new_keys.push(start);
            }
            new_keys.push(end);
        }
        self.get_mut(key).keys = new_keys;
    }

    /// Splits an oversized child (`count > B`) into roughly-equal siblings
    /// (spec §4.2 "Balancing" point 2) and installs the new siblings next
    /// to it in `key`'s own children.
    fn split_child(&mut self, key: NodeKey, index: usize, branching_factor: usize, gen: u64, sibling_links: bool) {
        let child_key = self.get(key).inner_children()[index];
        let new_keys = self.split_node_in_place(child_key, branching_factor, gen, sibling_links);
        let children = self.get_mut(key).inner_children_mut();
        for (offset, nk) in new_keys.into_iter().enumerate() {
            children.insert(index + 1 + offset, nk);
        }
    }

    /// Divides `key`'s own children (leaf slots or inner node keys) into
    /// groups of at most `branching_factor`, keeping the first group in
    /// place and returning freshly-created siblings for the rest. The
    /// leaf-level keys that bound each group of slots come along for the
    /// ride, so the new leaf nodes' `keys` stay consistent without a
    /// separate re-derivation step (unlike inner nodes, whose keys are
    /// always rebuilt from their children's own spans).
    fn split_node_in_place(&mut self, key: NodeKey, branching_factor: usize, gen: u64, sibling_links: bool) -> Vec<NodeKey> {
        let reverse_depth = self.get(key).reverse_depth;
        let group_count = self.get(key).child_count().div_ceil(branching_factor).max(1);
        let mut created = Vec::new();

        // Take the full children set out of `key` so we can split it
        // without holding a borrow of `self` across the `self.nodes.insert`
        // calls that create the new sibling nodes.
        let taken = std::mem::replace(&mut self.get_mut(key).children, Children::Leaf(Vec::new()));

        match taken {
            Children::Inner(mut children) => {
                let total = children.len();
                let per_group = total.div_ceil(group_count);
                let remainder: Vec<NodeKey> = children.split_off(per_group.min(total));
                self.get_mut(key).children = Children::Inner(children);

                let mut remainder = remainder;
                while !remainder.is_empty() {
                    let take = per_group.min(remainder.len());
                    let group: Vec<NodeKey> = remainder.drain(..take).collect();
                    let keys = rebuild_keys_for(self, &group);
                    let new_node = InnerNode {
                        keys,
                        children: Children::Inner(group),
                        reverse_depth,
                        is_root: false,
                        birth_gen: gen,
                        prev: None,
                        next: None,
                    };
                    created.push(NodeKey(self.nodes.insert(new_node)));
                }
            }
            Children::Leaf(all_slots) => {
                let all_keys = self.get(key).keys.clone();
                let total_slots = all_slots.len();
                let per_group = total_slots.div_ceil(group_count);

                // `all_keys[i]`/`all_keys[i+1]` bound `all_slots[i]`, so a
                // group of slots `[lo, hi)` is bounded by `all_keys[lo..=hi]`.
                let first_group_end = per_group.min(total_slots);
                self.get_mut(key).keys = all_keys[0..=first_group_end].to_vec();
                self.get_mut(key).children = Children::Leaf(all_slots[0..first_group_end].to_vec());

                let mut lo = first_group_end;
                while lo < total_slots {
                    let hi = (lo + per_group).min(total_slots);
                    let group_keys = all_keys[lo..=hi].to_vec();
                    let group_slots = all_slots[lo..hi].to_vec();
                    let new_node = InnerNode {
                        keys: group_keys,
                        children: Children::Leaf(group_slots),
                        reverse_depth,
                        is_root: false,
                        birth_gen: gen,
                        prev: None,
                        next: None,
                    };
                    created.push(NodeKey(self.nodes.insert(new_node)));
                    lo = hi;
                }
            }
        }
        if sibling_links {
            self.wire_siblings(key, &created);
        }
        created
    }

    fn wire_siblings(&mut self, first: NodeKey, rest: &[NodeKey]) {
        let mut prev = first;
        for &next in rest {
            self.get_mut(prev).next = Some(next);
            self.get_mut(next).prev = Some(prev);
            prev = next;
        }
    }

    /// Tries to fix a child with fewer than `lower` grandchildren by
    /// redistributing with, or merging into, an adjacent sibling that
    /// shares the same parent. Returns whether a fix was applied.
    fn try_fix_undersized_child(&mut self, key: NodeKey, index: usize, branching_factor: usize, _lower: usize) -> bool {
        let children = self.get(key).inner_children().to_vec();
        let neighbor_index = if index + 1 < children.len() {
            Some(index + 1)
        } else if index > 0 {
            Some(index - 1)
        } else {
            None
        };
        let Some(neighbor_index) = neighbor_index else {
            return false;
        };
        let (left_index, right_index) = if neighbor_index > index {
            (index, neighbor_index)
        } else {
            (neighbor_index, index)
        };
        let left_key = children[left_index];
        let right_key = children[right_index];
        let combined = self.get(left_key).child_count() + self.get(right_key).child_count();

        if combined > branching_factor {
            self.redistribute(left_key, right_key);
        } else {
            warn!(left_index, right_index, combined, "merging undersized children");
            self.merge_into_left(left_key, right_key);
            self.get_mut(key).inner_children_mut().remove(right_index);
        }
        true
    }

    /// Moves children between two adjacent nodes so their counts are as
    /// even as possible.
    ///
    /// Leaf-level nodes keep their own `keys` boundaries in lockstep with
    /// the slot each one bounds — `rebuild_keys_from_children` only applies
    /// to inner nodes (it derives a key from each child's own span, and
    /// leaf slots have no span of their own), so the leaf branch threads
    /// the boundary that crosses from one sibling to the other by hand
    /// instead of re-deriving it afterward.
    fn redistribute(&mut self, left_key: NodeKey, right_key: NodeKey) {
        let reverse_depth = self.get(left_key).reverse_depth;
        if reverse_depth == 0 {
            let mut left_keys = self.get(left_key).keys.clone();
            let mut left_slots = self.get(left_key).leaf_slots().to_vec();
            let mut right_keys = self.get(right_key).keys.clone();
            let mut right_slots = self.get(right_key).leaf_slots().to_vec();

            let total = left_slots.len() + right_slots.len();
            let target_left = total / 2;
            while left_slots.len() < target_left {
                left_slots.push(right_slots.remove(0));
                right_keys.remove(0);
                left_keys.push(right_keys[0]);
            }
            while left_slots.len() > target_left {
                right_slots.insert(0, left_slots.pop().unwrap());
                left_keys.pop();
                let boundary = *left_keys.last().expect("leaf node always has >=1 key");
                right_keys.insert(0, boundary);
            }
            self.get_mut(left_key).keys = left_keys;
            self.get_mut(left_key).children = Children::Leaf(left_slots);
            self.get_mut(right_key).keys = right_keys;
            self.get_mut(right_key).children = Children::Leaf(right_slots);
        } else {
            let (mut left_children, mut right_children) = (
                self.get(left_key).inner_children().to_vec(),
                self.get(right_key).inner_children().to_vec(),
            );
            let total = left_children.len() + right_children.len();
            let target_left = total / 2;
            while left_children.len() < target_left {
                left_children.push(right_children.remove(0));
            }
            while left_children.len() > target_left {
                right_children.insert(0, left_children.pop().unwrap());
            }
            self.get_mut(left_key).children = Children::Inner(left_children);
            self.get_mut(right_key).children = Children::Inner(right_children);
            self.rebuild_keys_from_children(left_key);
            self.rebuild_keys_from_children(right_key);
        }
    }

    /// Merges `right_key`'s children into `left_key` and frees `right_key`.
    /// Leaf-level nodes append `right_key`'s own key boundaries (minus the
    /// shared one at the seam) instead of going through
    /// `rebuild_keys_from_children`, which only derives keys from a
    /// non-leaf child's own span — see `redistribute` above.
    fn merge_into_left(&mut self, left_key: NodeKey, right_key: NodeKey) {
        let right_node = self.nodes.remove(right_key.0);
        let right_next = right_node.next;
        let right_keys = right_node.keys.clone();
        let right_is_leaf = matches!(right_node.children, Children::Leaf(_));
        match (&mut self.get_mut(left_key).children, right_node.children) {
            (Children::Leaf(left), Children::Leaf(right)) => left.extend(right),
            (Children::Inner(left), Children::Inner(right)) => left.extend(right),
            _ => panic!("mismatched child shapes during merge"),
        }
        if right_is_leaf {
            let mut left_keys = self.get(left_key).keys.clone();
            left_keys.extend(right_keys.into_iter().skip(1));
            self.get_mut(left_key).keys = left_keys;
        } else {
            self.rebuild_keys_from_children(left_key);
        }
        if let Some(next) = right_next {
            self.get_mut(left_key).next = Some(next);
            self.get_mut(next).prev = Some(left_key);
        } else {
            self.get_mut(left_key).next = None;
        }
    }

    /// Root-specific policy (spec §4.2 point 4): promotes `key`'s sole
    /// child to be the new root when `key` has collapsed to a single
    /// non-leaf child. Returns the new root key if a promotion happened.
    pub fn promote_sole_child_if_possible(&mut self, key: NodeKey) -> Option<NodeKey> {
        let node = self.get(key);
        if node.reverse_depth == 0 || node.child_count() > 1 {
            return None;
        }
        let sole = self.get(key).inner_children()[0];
        self.nodes.remove(key.0);
        self.get_mut(sole).is_root = true;
        Some(sole)
    }

    /// Repeatedly promotes a sole surviving child to root (spec §4.2 point
    /// 4, §4.3 "shrink the tree by promoting a sole child when the root has
    /// childCount <= 1 and reverseDepth > 0"), collapsing as many levels as
    /// have decayed to a single child in a row. Returns the resulting root
    /// key.
    pub fn shrink_root(&mut self, key: NodeKey) -> NodeKey {
        let mut root = key;
        while let Some(new_root) = self.promote_sole_child_if_possible(root) {
            root = new_root;
        }
        root
    }

    /// Full bottom-up rebalance of `key`'s subtree (spec §4.3 "Remove":
    /// "rebalancing is not done inline; the façade calls restructure after
    /// a batch of removals"). `restructure_children` only fixes one node's
    /// immediate children and is driven automatically by `insert`'s own
    /// recursive descent; `remove` has no such per-level callback on its
    /// way back up, so the façade walks the whole subtree once here
    /// instead.
    pub fn restructure(&mut self, key: NodeKey, branching_factor: usize, gen: u64, sibling_links: bool) {
        if self.get(key).reverse_depth == 0 {
            return;
        }
        let children = self.get(key).inner_children().to_vec();
        for child in children {
            self.restructure(child, branching_factor, gen, sibling_links);
        }
        self.restructure_children(key, branching_factor, gen, sibling_links);
    }

    /// Whether `key`'s child count exceeds the branching factor (used by
    /// the façade to decide whether the root itself needs to grow a
    /// level).
    pub fn needs_root_growth(&self, key: NodeKey, branching_factor: usize) -> bool {
        self.get(key).child_count() > branching_factor
    }

    /// Grows the tree by one level: splits the overflowing root's own
    /// children into siblings and wraps them all under a brand-new root.
    /// Returns the new root key.
    pub fn grow_root(&mut self, key: NodeKey, branching_factor: usize, gen: u64, sibling_links: bool) -> NodeKey {
        let reverse_depth = self.get(key).reverse_depth;
        self.get_mut(key).is_root = false;
        let siblings = self.split_node_in_place(key, branching_factor, gen, sibling_links);
        let mut children = vec![key];
        children.extend(siblings);
        let keys = rebuild_keys_for(self, &children);
        let new_root = InnerNode {
            keys,
            children: Children::Inner(children),
            reverse_depth: reverse_depth + 1,
            is_root: true,
            birth_gen: gen,
            prev: None,
            next: None,
        };
        NodeKey(self.nodes.insert(new_root))
    }

    /// Clears `key`'s subtree back to a single filler slot and frees its
    /// descendants (spec §4.3 "Clear").
    pub fn clear_to_filler(&mut self, key: NodeKey, range: &ChrRange, filler: Filler, gen: u64) {
        if let Children::Inner(children) = self.get(key).children.clone() {
            for child in children {
                self.free_subtree(child);
            }
        }
        let node = self.get_mut(key);
        node.keys = vec![range.start, range.end];
        node.children = Children::Leaf(vec![Slot::filler(filler)]);
        node.reverse_depth = 0;
        node.birth_gen = gen;
        node.prev = None;
        node.next = None;
    }

    /// Removes `key` and every descendant from the arena.
    fn free_subtree(&mut self, key: NodeKey) {
        let node = self.nodes.remove(key.0);
        if let Children::Inner(children) = node.children {
            for child in children {
                self.free_subtree(child);
            }
        }
    }

    // ---- withering (spec §4.4, component C5) ----------------------------

    /// Entry point for a wither pass over `key`'s subtree (spec §4.4: a
    /// wither pass replaces aged data with filler, "then invokes
    /// restructure to rebalance any affected ancestors"). No-ops when
    /// `life_span` is zero (withering disabled). Returns the (possibly new)
    /// root key, since a wither pass that drains every slot below an inner
    /// node can leave it eligible for root-shrink the same way a batch of
    /// removals can.
    pub fn wither(
        &mut self,
        key: NodeKey,
        current_gen: u64,
        life_span: u64,
        filler: Filler,
        branching_factor: usize,
        sibling_links: bool,
    ) -> NodeKey {
        if life_span == 0 {
            return key; // withering disabled
        }
        self.wither_subtree(key, current_gen, life_span, filler);
        self.restructure(key, branching_factor, current_gen, sibling_links);
        self.shrink_root(key)
    }

    /// Ages `key`'s subtree. A leaf-level node (`reverse_depth == 0`) whose
    /// `birth_gen` is more than `life_span` generations behind
    /// `current_gen` has its fetched data released: every non-`Unloaded`
    /// slot reverts to `filler` and the node's own `birth_gen` is bumped to
    /// `current_gen`, as if freshly created. The released slots are then
    /// eligible for `compact_adjacent_leaf_slots` to merge into wider
    /// filler runs, and the caller (`wither`) restructures ancestors
    /// afterward — so a leaf level that withers down to uniform filler
    /// still collapses the same way a batch of removals would (DESIGN.md
    /// records this as the chosen granularity: withering only ever
    /// releases leaf-level data, it does not free and replace whole
    /// multi-level subtrees the way `clear_to_filler` does for the root).
    fn wither_subtree(&mut self, key: NodeKey, current_gen: u64, life_span: u64, filler: Filler) {
        let node = self.get(key);
        let age = current_gen.wrapping_sub(node.birth_gen);
        let reverse_depth = node.reverse_depth;

        if reverse_depth == 0 {
            if age > life_span {
                let (start, end) = node.span();
                trace!(start, end, age, life_span, "withering leaf data");
                let slots = self.get_mut(key).leaf_slots_mut();
                for slot in slots.iter_mut() {
                    if !matches!(slot, Slot::Unloaded) {
                        *slot = Slot::filler(filler);
                    }
                }
                self.get_mut(key).birth_gen = current_gen;
                self.compact_adjacent_leaf_slots(key);
            }
            return;
        }

        let children = node.inner_children().to_vec();
        for child in children {
            self.wither_subtree(child, current_gen, life_span, filler);
        }
    }
}

impl<V: IntervalValue> Default for Arena<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn rebuild_keys_for<V: IntervalValue>(arena: &Arena<V>, children: &[NodeKey]) -> Vec<i64> {
    let mut keys = Vec::with_capacity(children.len() + 1);
    for (i, &ck) in children.iter().enumerate() {
        let (start, end) = arena.get(ck).span();
        if i == 0 {
            keys.push(start);
        }
        keys.push(end);
    }
    keys
}

fn split_slot<V: IntervalValue>(slot: Slot<V>, coord: i64) -> (Slot<V>, Slot<V>) {
    match slot {
        Slot::Unloaded => (Slot::Unloaded, Slot::Unloaded),
        Slot::Empty => (Slot::Empty, Slot::Empty),
        Slot::Loaded(bin) => {
            let continued_for_right = bin.carry_forward(coord);
            let left = DataBin::with_lists(bin.start(), bin.start_list().to_vec(), bin.continued_list().to_vec());
            let right = DataBin::with_lists(coord, Vec::new(), continued_for_right);
            (Slot::Loaded(left), Slot::Loaded(right))
        }
    }
}

fn push_merged(out: &mut Vec<ChrRange>, range: ChrRange) {
    if let Some(last) = out.last_mut() {
        if last.chr == range.chr && last.end >= range.start {
            last.end = last.end.max(range.end);
            return;
        }
    }
    out.push(range);
}
