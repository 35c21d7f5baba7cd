//! The opaque interval value contract (spec §6.2, component C1).
//!
//! The tree is generic over `V: IntervalValue` and never inspects the
//! payload itself; it only needs `chr`/`start`/`end`, a total order, and an
//! equality predicate. [`GenomicInterval`] is a concrete reference
//! implementation used by the test suite and is a reasonable default for
//! callers that don't already have their own chromosomal-region type.
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};

/// Strand orientation of a genomic feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Display for Strand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Strand::Forward => "+",
            Strand::Reverse => "-",
        })
    }
}

/// The contract every interval value stored in the tree must satisfy.
///
/// Structural equality (`equal_to`) is required rather than optional here
/// (unlike the source's `equalTo`, which falls back to reference identity
/// when the caller supplies no predicate): Rust has no ambient notion of
/// "no predicate given", so implementers state their own equality. For the
/// common case of plain data this is just `#[derive(PartialEq)]`.
pub trait IntervalValue: Clone + PartialEq {
    fn chr(&self) -> &str;
    fn start(&self) -> i64;
    fn end(&self) -> i64;
    fn strand(&self) -> Option<Strand> {
        None
    }

    /// Structurally equal: same chromosome/coordinates and the payload's
    /// own equality predicate agrees. The default is `PartialEq`.
    fn equal_to(&self, other: &Self) -> bool {
        self == other
    }

    /// Total order: start asc, then end asc, then an implementation-defined
    /// tiebreak. The default tiebreak is strand (forward before reverse,
    /// unstranded last), which is enough to make the order total for
    /// `GenomicInterval` and is a reasonable default for callers that don't
    /// need a richer tiebreak.
    fn compare(a: &Self, b: &Self) -> Ordering {
        a.start()
            .cmp(&b.start())
            .then_with(|| a.end().cmp(&b.end()))
            .then_with(|| strand_rank(a.strand()).cmp(&strand_rank(b.strand())))
    }

    /// Whether `self` and `other` overlap as half-open `[start, end)`
    /// intervals on the same chromosome.
    fn overlaps(&self, other: &Self) -> bool {
        self.chr() == other.chr() && self.start() < other.end() && other.start() < self.end()
    }

    /// Expands `self` to additionally cover `other`, when the two are
    /// touching or overlapping (`self.end() >= other.start()` on the same
    /// chromosome). Returns whether the expansion happened.
    fn assimilate(&mut self, other: &Self) -> bool;

    /// Absorbs `other` as a directly-following successor, extending `self`
    /// to `other.end()`. Used when two runs of the same logical feature are
    /// concatenated back together (e.g. after a merge of adjacent bins).
    fn concat(&mut self, other: &Self) {
        self.assimilate(other);
    }

    /// The coordinate ranges covered by `self` but not by `other`, as
    /// `(start, end)` pairs on `self.chr()`. Empty if `other` fully covers
    /// `self`.
    fn get_minus(&self, other: &Self) -> Vec<(i64, i64)> {
        if self.chr() != other.chr() || !self.overlaps(other) {
            return vec![(self.start(), self.end())];
        }
        let mut out = Vec::new();
        if self.start() < other.start() {
            out.push((self.start(), other.start()));
        }
        if other.end() < self.end() {
            out.push((other.end(), self.end()));
        }
        out
    }

    fn region_to_string(&self) -> String {
        format!("{}:{}-{}", self.chr(), self.start(), self.end())
    }
}

fn strand_rank(strand: Option<Strand>) -> u8 {
    match strand {
        Some(Strand::Forward) => 0,
        Some(Strand::Reverse) => 1,
        None => 2,
    }
}

/// A reference chromosomal-region value: `(chr, start, end)` plus an
/// optional strand and an arbitrary payload.
#[derive(Debug, Clone, PartialEq)]
pub struct GenomicInterval<P = ()> {
    pub chr: String,
    pub start: i64,
    pub end: i64,
    pub strand: Option<Strand>,
    pub payload: P,
}

impl<P: Clone + PartialEq> GenomicInterval<P> {
    pub fn new(chr: impl Into<String>, start: i64, end: i64, payload: P) -> Self {
        Self {
            chr: chr.into(),
            start,
            end,
            strand: None,
            payload,
        }
    }

    pub fn with_strand(mut self, strand: Strand) -> Self {
        self.strand = Some(strand);
        self
    }
}

impl<P: Clone + PartialEq> IntervalValue for GenomicInterval<P> {
    fn chr(&self) -> &str {
        &self.chr
    }

    fn start(&self) -> i64 {
        self.start
    }

    fn end(&self) -> i64 {
        self.end
    }

    fn strand(&self) -> Option<Strand> {
        self.strand
    }

    fn assimilate(&mut self, other: &Self) -> bool {
        if self.chr != other.chr || self.end < other.start || other.end < self.start {
            return false;
        }
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
        true
    }
}

impl<P: Display> Display for GenomicInterval<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.chr, self.start, self.end)?;
        if let Some(strand) = self.strand {
            write!(f, "({strand})")?;
        }
        write!(f, " {}", self.payload)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compare_orders_by_start_then_end_then_strand() {
        let a = GenomicInterval::new("chr1", 5, 100, 0).with_strand(Strand::Reverse);
        let b = GenomicInterval::new("chr1", 5, 100, 0).with_strand(Strand::Forward);
        assert_eq!(IntervalValue::compare(&b, &a), Ordering::Less);
    }

    #[test]
    fn get_minus_returns_uncovered_flanks() {
        let a = GenomicInterval::new("chr1", 0, 100, 0);
        let b = GenomicInterval::new("chr1", 20, 50, 0);
        assert_eq!(a.get_minus(&b), vec![(0, 20), (50, 100)]);
    }

    #[test]
    fn assimilate_expands_when_touching() {
        let mut a = GenomicInterval::new("chr1", 0, 10, 0);
        let b = GenomicInterval::new("chr1", 10, 20, 0);
        assert!(a.assimilate(&b));
        assert_eq!((a.start, a.end), (0, 20));
    }

    #[test]
    fn assimilate_rejects_disjoint() {
        let mut a = GenomicInterval::new("chr1", 0, 10, 0);
        let b = GenomicInterval::new("chr1", 20, 30, 0);
        assert!(!a.assimilate(&b));
    }
}
