//! Error taxonomy (spec §7).
use thiserror::Error;

use crate::range::ChrRange;

/// Errors surfaced by the public `IntervalTree` API.
///
/// `CannotBalance` is deliberately absent from this enum: it is an
/// internal-only signal passed between inner-node levels during
/// `restructure` (spec §4.2 point 3) and is always caught by the nearest
/// ancestor. It must never escape the root.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TreeError {
    /// The requested range is malformed (`start >= end`) or does not
    /// overlap the structure it was applied to.
    #[error("invalid range: {message}")]
    InvalidRange { message: String },

    /// A traversal crossed an `Unloaded` slot without `allow_null`.
    #[error("data not ready for range {range}")]
    DataNotReady { range: ChrRange },

    /// The tree was constructed with an inner-node or leaf constructor that
    /// does not satisfy the node contract (e.g. a leaf constructor that
    /// does not produce leaf-shaped nodes).
    #[error("constructor mismatch: {message}")]
    ConstructorMismatch { message: String },

    /// Pre-insertion canonicalization found a stored bin that precedes an
    /// external entry claiming the same start, and could not reconcile the
    /// two `continuedList`s.
    #[error("inconsistent continued list at {range}: {message}")]
    InconsistentContinuedList { range: ChrRange, message: String },

    /// An abstract operation was invoked without a concrete implementation.
    #[error("not implemented: {op}")]
    NotImplemented { op: &'static str },

    /// A batch insert failed over one or more sub-ranges. Carries one
    /// message per failing sub-range, each with up to three offending
    /// entries serialized in best-effort text form (spec §6.4).
    #[error("aggregated insert error over {} sub-range(s): {}", .failures.len(), render_failures(.failures))]
    AggregatedInsert { failures: Vec<SubRangeFailure> },
}

/// One failing sub-range from an aggregated insert, plus the first three
/// offending entries (best-effort `Debug` text, since the interval value
/// type is generic and not required to implement `Display`).
#[derive(Debug, Clone, PartialEq)]
pub struct SubRangeFailure {
    pub range: ChrRange,
    pub message: String,
    pub sample_entries: Vec<String>,
}

fn render_failures(failures: &[SubRangeFailure]) -> String {
    failures
        .iter()
        .map(|f| {
            let samples = if f.sample_entries.is_empty() {
                String::new()
            } else {
                format!(" [{}]", f.sample_entries.join(", "))
            };
            format!("{}: {}{}", f.range, f.message, samples)
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn aggregated_insert_renders_one_line_per_failure() {
        let err = TreeError::AggregatedInsert {
            failures: vec![
                SubRangeFailure {
                    range: ChrRange::new("chr1", 0, 10).unwrap(),
                    message: "inconsistent continued list".into(),
                    sample_entries: vec!["D0".into(), "D1".into()],
                },
                SubRangeFailure {
                    range: ChrRange::new("chr1", 20, 30).unwrap(),
                    message: "constructor mismatch".into(),
                    sample_entries: vec![],
                },
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("chr1:0-10"));
        assert!(rendered.contains("chr1:20-30"));
        assert!(rendered.contains("D0, D1"));
    }
}
