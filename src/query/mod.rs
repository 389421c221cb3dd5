//! Query parameters shared by the searcher, the devices and the CPU executor.

mod query_box;
mod region;

pub use query_box::QueryBox;
pub use region::{point_in_polygon, Region};

pub(crate) use query_box::{contains as box_contains, overlaps as box_overlaps};
pub(crate) use region::descriptor_contains;

use crate::kdtree::PAD_REF;

/// One logical sub-query: a box plus any number of polygon post-filters.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub query_box: QueryBox,
    pub regions: Vec<Region>,
}

impl QuerySpec {
    /// A query over `query_box` with no regions.
    pub fn new(query_box: QueryBox) -> Self {
        Self {
            query_box,
            regions: vec![],
        }
    }

    /// A query matching every record in `dims` dimensions.
    pub fn open(dims: usize) -> Self {
        Self::new(QueryBox::open(dims))
    }

    /// Add a polygon post-filter.
    pub fn with_region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }

    /// Number of dimensions.
    pub fn dims(&self) -> usize {
        self.query_box.dims()
    }

    /// Whether a `D + 1` wide record matches. Padding records never match.
    #[inline]
    pub fn matches(&self, record: &[u64]) -> bool {
        let dims = self.dims();
        record[dims] != PAD_REF
            && self.query_box.contains(&record[..dims])
            && self.regions.iter().all(|r| r.contains(record))
    }
}
