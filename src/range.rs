//! `ChrRange` for capturing per-chromosome coordinate ranges.
use std::fmt::{Debug, Display, Formatter};

use crate::error::TreeError;

/// A half-open coordinate range `[start, end)` on a single chromosome.
///
/// This is the "covering range" unit the tree is built over and the unit
/// callers pass to `insert`/`traverse`/`get_uncached_range`. It carries no
/// payload of its own; the opaque interval values stored in the tree
/// (`IntervalValue`) carry the same `chr`/`start`/`end` shape plus a payload.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct ChrRange {
    pub chr: String,
    pub start: i64,
    pub end: i64,
}

impl ChrRange {
    /// Constructs a new range, validating `start < end`.
    ///
    /// # Example
    /// ```rust
    /// use interval_bin_tree::ChrRange;
    /// let range = ChrRange::new("chr1", 1, 2000).unwrap();
    /// assert_eq!(range.start, 1);
    /// assert_eq!(range.end, 2000);
    /// ```
    pub fn new(chr: impl Into<String>, start: i64, end: i64) -> Result<Self, TreeError> {
        if start >= end {
            return Err(TreeError::InvalidRange {
                message: format!("start {start} must be strictly less than end {end}"),
            });
        }
        Ok(Self {
            chr: chr.into(),
            start,
            end,
        })
    }

    /// Constructs a range without validating `start < end`. Used internally
    /// where the caller has already established the invariant (e.g. slicing
    /// an already-valid range at an interior key).
    pub(crate) fn new_unchecked(chr: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            chr: chr.into(),
            start,
            end,
        }
    }

    /// Whether this range overlaps `other` (same chromosome, coordinates
    /// intersect as half-open intervals).
    pub fn overlaps(&self, other: &ChrRange) -> bool {
        self.chr == other.chr && self.start < other.end && other.start < self.end
    }

    /// Clips `self` down to the overlap with `other`. Returns `None` if they
    /// do not overlap.
    pub fn truncated_to(&self, other: &ChrRange) -> Option<ChrRange> {
        if !self.overlaps(other) {
            return None;
        }
        Some(ChrRange::new_unchecked(
            self.chr.clone(),
            self.start.max(other.start),
            self.end.min(other.end),
        ))
    }

    pub fn region_to_string(&self) -> String {
        format!("{}:{}-{}", self.chr, self.start, self.end)
    }
}

impl Debug for ChrRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.region_to_string())
    }
}

impl Display for ChrRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.region_to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_rejects_empty_range() {
        assert!(ChrRange::new("chr1", 10, 10).is_err());
        assert!(ChrRange::new("chr1", 10, 5).is_err());
    }

    #[test]
    fn overlaps_requires_same_chromosome() {
        let a = ChrRange::new("chr1", 0, 10).unwrap();
        let b = ChrRange::new("chr2", 0, 10).unwrap();
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn truncated_to_clips_to_intersection() {
        let a = ChrRange::new("chr1", 0, 100).unwrap();
        let b = ChrRange::new("chr1", 50, 200).unwrap();
        let c = a.truncated_to(&b).unwrap();
        assert_eq!((c.start, c.end), (50, 100));
    }

    #[test]
    fn truncated_to_none_when_disjoint() {
        let a = ChrRange::new("chr1", 0, 10).unwrap();
        let b = ChrRange::new("chr1", 20, 30).unwrap();
        assert!(a.truncated_to(&b).is_none());
    }
}
