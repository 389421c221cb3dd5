use geo_traits::{CoordTrait, RectTrait};

use crate::codec::OrderedKey;

/// Per-dimension inclusive bounds in key space.
///
/// Stored interleaved as `[lower0, upper0, lower1, upper1, …]`, the same layout as a leaf range,
/// so a box can be staged into device memory as is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryBox {
    bounds: Vec<u64>,
}

impl QueryBox {
    /// A box that matches every key in `dims` dimensions.
    pub fn open(dims: usize) -> Self {
        let mut bounds = Vec::with_capacity(2 * dims);
        for _ in 0..dims {
            bounds.push(0);
            bounds.push(u64::MAX);
        }
        Self { bounds }
    }

    /// Build a box from interleaved `[lower, upper]` pairs.
    ///
    /// ## Panics
    ///
    /// - If `bounds` has an odd length.
    pub fn from_bounds(bounds: Vec<u64>) -> Self {
        assert_eq!(bounds.len() % 2, 0, "bounds must come in pairs");
        Self { bounds }
    }

    /// Number of dimensions.
    pub fn dims(&self) -> usize {
        self.bounds.len() / 2
    }

    #[inline]
    /// Inclusive lower bound of `dim`.
    pub fn lower(&self, dim: usize) -> u64 {
        self.bounds[2 * dim]
    }

    #[inline]
    /// Inclusive upper bound of `dim`.
    pub fn upper(&self, dim: usize) -> u64 {
        self.bounds[2 * dim + 1]
    }

    /// The interleaved bounds.
    pub fn as_slice(&self) -> &[u64] {
        &self.bounds
    }

    /// Replace the bounds of one dimension.
    pub fn set(&mut self, dim: usize, lower: u64, upper: u64) -> &mut Self {
        self.bounds[2 * dim] = lower;
        self.bounds[2 * dim + 1] = upper;
        self
    }

    /// Narrow one dimension to its intersection with `[lower, upper]`.
    pub fn intersect(&mut self, dim: usize, lower: u64, upper: u64) -> &mut Self {
        self.bounds[2 * dim] = self.bounds[2 * dim].max(lower);
        self.bounds[2 * dim + 1] = self.bounds[2 * dim + 1].min(upper);
        self
    }

    /// Narrow one dimension with bounds given in their original domain.
    pub fn intersect_values<N: OrderedKey>(&mut self, dim: usize, lower: N, upper: N) -> &mut Self {
        self.intersect(dim, lower.encode(), upper.encode())
    }

    /// Narrow two float dimensions to a rectangle.
    pub fn intersect_rect(
        &mut self,
        x_dim: usize,
        y_dim: usize,
        rect: &impl RectTrait<T = f64>,
    ) -> &mut Self {
        let (min, max) = (rect.min(), rect.max());
        self.intersect_values(x_dim, min.x(), max.x());
        self.intersect_values(y_dim, min.y(), max.y())
    }

    /// `true` when some dimension has `lower > upper`, so nothing can match.
    pub fn is_empty(&self) -> bool {
        self.bounds.chunks_exact(2).any(|b| b[0] > b[1])
    }

    /// Whether the first `dims` values of `record` lie inside the box.
    #[inline]
    pub fn contains(&self, record: &[u64]) -> bool {
        contains(&self.bounds, record)
    }

    /// Whether the box intersects a leaf range in every dimension.
    #[inline]
    pub fn overlaps(&self, range: &[u64]) -> bool {
        overlaps(&self.bounds, range)
    }
}

/// Interval membership on every dimension of interleaved `bounds`.
#[inline]
pub(crate) fn contains(bounds: &[u64], record: &[u64]) -> bool {
    bounds
        .chunks_exact(2)
        .zip(record)
        .all(|(b, v)| b[0] <= *v && *v <= b[1])
}

/// Interval overlap on every dimension of two interleaved ranges.
#[inline]
pub(crate) fn overlaps(bounds: &[u64], range: &[u64]) -> bool {
    bounds
        .chunks_exact(2)
        .zip(range.chunks_exact(2))
        .all(|(q, r)| !(r[0] > q[1] || q[0] > r[1]))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::encode_f64;

    #[test]
    fn open_box_matches_everything() {
        let b = QueryBox::open(3);
        assert_eq!(b.dims(), 3);
        assert!(b.contains(&[0, u64::MAX, 17]));
        assert!(b.overlaps(&[0, 0, 5, 6, u64::MAX, u64::MAX]));
        assert!(!b.is_empty());
    }

    #[test]
    fn intersections_narrow() {
        let mut b = QueryBox::open(2);
        b.intersect(0, 10, 20).intersect(0, 15, 30);
        assert_eq!((b.lower(0), b.upper(0)), (15, 20));
        assert!(b.contains(&[15, 0]));
        assert!(b.contains(&[20, 0]));
        assert!(!b.contains(&[21, 0]));

        b.intersect(1, 50, 40);
        assert!(b.is_empty());
    }

    #[test]
    fn overlap_is_inclusive() {
        let b = QueryBox::from_bounds(vec![10, 20, 10, 20]);
        assert!(b.overlaps(&[20, 30, 0, 10]));
        assert!(!b.overlaps(&[21, 30, 0, 10]));
        assert!(!b.overlaps(&[0, 9, 0, 100]));
    }

    #[test]
    fn rect_bounds() {
        let rect = geo_0_31::Rect::new(
            geo_0_31::coord! { x: -1.5, y: 2.0 },
            geo_0_31::coord! { x: 3.0, y: 4.0 },
        );
        let mut b = QueryBox::open(3);
        b.intersect_rect(0, 2, &rect);
        assert_eq!(b.lower(0), encode_f64(-1.5));
        assert_eq!(b.upper(2), encode_f64(4.0));
        assert_eq!((b.lower(1), b.upper(1)), (0, u64::MAX));
    }
}
