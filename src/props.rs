//! Options structs for insert/remove/traverse (spec §6.1).
//!
//! The source passes a single loosely-typed `props` object with optional
//! callback fields through every operation. Here each operation gets its
//! own typed options struct whose callback fields are `Option<Box<dyn
//! FnMut(...)>>`, matching the "model as an options struct whose fields are
//! typed function references" guidance in spec §9.
use std::rc::Rc;

use crate::node::InnerNode;
use crate::value::IntervalValue;

/// The filler installed in a slot once its contents are gone: either
/// "not yet fetched" or "known to be empty". Outside `local_only` trees,
/// `remove` defaults to `Unloaded`; `local_only` trees only ever use
/// `Empty` (they have no notion of unloaded data).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filler {
    Unloaded,
    Empty,
}

/// Options for `IntervalTree::insert`.
pub struct InsertProps<V: IntervalValue> {
    /// When `false` (the default), a new batch of entries at a given start
    /// coordinate *replaces* the bin's `start_list`. When `true`, entries are
    /// merged in, with `allow_duplicates` controlling whether
    /// structurally-equal entries are kept or suppressed.
    pub add_new: bool,
    pub allow_duplicates: bool,
    /// Seed continued-list for a multi-range insert that starts mid-stream.
    pub continued_list: Vec<Rc<V>>,
    pub data_callback: Option<Box<dyn FnMut(&Rc<V>)>>,
}

impl<V: IntervalValue> Default for InsertProps<V> {
    fn default() -> Self {
        Self {
            add_new: false,
            allow_duplicates: false,
            continued_list: Vec::new(),
            data_callback: None,
        }
    }
}

/// Options for `IntervalTree::remove`.
pub struct RemoveProps<V: IntervalValue> {
    /// Remove by value-equality (`equal_to`) rather than by start
    /// coordinate alone.
    pub exact_match: bool,
    pub convert_to: Option<Filler>,
    pub data_callback: Option<Box<dyn FnMut(&Rc<V>)>>,
}

impl<V: IntervalValue> Default for RemoveProps<V> {
    fn default() -> Self {
        Self {
            exact_match: false,
            convert_to: None,
            data_callback: None,
        }
    }
}

/// Options for `IntervalTree::traverse`.
pub struct TraverseProps<V: IntervalValue> {
    pub data_callback: Option<Box<dyn FnMut(&Rc<V>) -> bool>>,
    pub data_filter: Option<Box<dyn FnMut(&Rc<V>) -> bool>>,
    pub node_callback: Option<Box<dyn FnMut(&InnerNode<V>) -> bool>>,
    pub node_filter: Option<Box<dyn FnMut(&InnerNode<V>) -> bool>>,
    /// When both a node callback and a data callback fire for the same
    /// subtree, `both_calls` decides whether firing the node callback
    /// suppresses the data callback (the default, `false`: node callback
    /// wins and data callback is skipped for that subtree).
    pub both_calls: bool,
    /// Permit descending through `Unloaded` slots instead of raising
    /// `DataNotReady`.
    pub allow_null: bool,
    pub break_on_false: bool,
    /// Suppress the wither generation advance this traversal would
    /// otherwise trigger.
    pub do_not_wither: bool,
}

impl<V: IntervalValue> Default for TraverseProps<V> {
    fn default() -> Self {
        Self {
            data_callback: None,
            data_filter: None,
            node_callback: None,
            node_filter: None,
            both_calls: false,
            allow_null: false,
            break_on_false: false,
            do_not_wither: false,
        }
    }
}
