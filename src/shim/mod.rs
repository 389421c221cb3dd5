//! The index as a host database sees it: key patterns, JSON predicates, builds and cursors.

mod access;
mod cursor;
pub(crate) mod document;
mod meta;
mod predicate;
mod spec;

pub use access::{BuildReport, KdAccessMethod, RecordLocation, RecordSource};
pub use cursor::{CursorState, KdCursor};
pub use meta::IndexMeta;
pub use predicate::{parse_predicate, suitability, Suitability};
pub use spec::{IndexSpec, ScalarField};
