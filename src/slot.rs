//! The three-way bin slot state (spec §3, "Bin slot").
use crate::bin::DataBin;
use crate::props::Filler;
use crate::value::IntervalValue;

/// What a leaf-level slot currently holds.
#[derive(Clone, Debug)]
pub enum Slot<V: IntervalValue> {
    /// No data has been fetched for this sub-range yet.
    Unloaded,
    /// The sub-range is known to contain no intervals.
    Empty,
    /// A populated leaf bin.
    Loaded(DataBin<V>),
}

impl<V: IntervalValue> Slot<V> {
    pub fn filler(kind: Filler) -> Self {
        match kind {
            Filler::Unloaded => Slot::Unloaded,
            Filler::Empty => Slot::Empty,
        }
    }

    pub fn is_unloaded(&self) -> bool {
        matches!(self, Slot::Unloaded)
    }

    pub fn is_empty_slot(&self) -> bool {
        matches!(self, Slot::Empty)
    }

    pub fn as_bin(&self) -> Option<&DataBin<V>> {
        match self {
            Slot::Loaded(bin) => Some(bin),
            _ => None,
        }
    }

    pub fn as_bin_mut(&mut self) -> Option<&mut DataBin<V>> {
        match self {
            Slot::Loaded(bin) => Some(bin),
            _ => None,
        }
    }

    /// Whether two filler slots are the same kind of filler (`Empty==Empty`
    /// or `Unloaded==Unloaded`). Populated bins are never "the same filler";
    /// they merge via `DataBin::merge_after` instead (spec §4.2 "Merge").
    pub fn same_filler(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Slot::Empty, Slot::Empty) | (Slot::Unloaded, Slot::Unloaded)
        )
    }
}
