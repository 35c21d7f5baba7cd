//! A bin-partitioned, withering interval tree for coordinate-keyed
//! genomic-browsing caches.
//!
//! The tree indexes half-open `[start, end)` intervals on a single
//! chromosome (or any other single-dimension coordinate space) through a
//! B+-tree-derived hierarchy of inner nodes over leaf-level [`bin::DataBin`]
//! storage. Leaves track which sub-ranges have been fetched
//! ([`props::Filler`]) so a caller backed by a remote data source can ask
//! [`tree::IntervalTree::get_uncached_range`] what still needs fetching, and
//! a generational wither pass ([`wither`]) reclaims fetched data that has
//! gone cold without dropping the tree's shape.
//!
//! See [`tree::IntervalTree`] for the entry point.
pub mod bin;
pub mod error;
pub mod node;
pub mod props;
pub mod range;
pub mod slot;
pub mod tree;
pub mod value;
pub mod wither;

pub use error::{SubRangeFailure, TreeError};
pub use props::{Filler, InsertProps, RemoveProps, TraverseProps};
pub use range::ChrRange;
pub use tree::{IntervalTree, TreeConfig};
pub use value::{GenomicInterval, IntervalValue, Strand};
