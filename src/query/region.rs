use geo_traits::{CoordTrait, LineStringTrait, PolygonTrait};

use crate::codec::KeyType;
use crate::error::{KdError, Result};

/// A polygon bound to a pair of record dimensions.
///
/// Regions only post-filter records that already passed the query box; the box should contain the
/// region's bounding rectangle for tree pruning to be effective.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    x_dim: usize,
    y_dim: usize,
    x_type: KeyType,
    y_type: KeyType,
    /// Interleaved `[x0, y0, x1, y1, …]`; every ring is closed.
    vertices: Vec<f64>,
}

impl Region {
    /// Create a region from one ring of `[x, y]` vertices. The ring is closed if it is not already.
    pub fn new(
        x_dim: usize,
        y_dim: usize,
        x_type: KeyType,
        y_type: KeyType,
        ring: &[[f64; 2]],
    ) -> Result<Self> {
        let mut region = Self {
            x_dim,
            y_dim,
            x_type,
            y_type,
            vertices: Vec::with_capacity(2 * ring.len() + 2),
        };
        region.push_ring(ring.iter().copied())?;
        Ok(region)
    }

    /// Create a region from a polygon; interior rings become holes under the even-odd rule.
    pub fn from_polygon(
        x_dim: usize,
        y_dim: usize,
        x_type: KeyType,
        y_type: KeyType,
        polygon: &impl PolygonTrait<T = f64>,
    ) -> Result<Self> {
        let mut region = Self {
            x_dim,
            y_dim,
            x_type,
            y_type,
            vertices: vec![],
        };
        let exterior = polygon
            .exterior()
            .ok_or_else(|| KdError::InvalidPredicate("polygon has no exterior ring".into()))?;
        region.push_ring(exterior.coords().map(|c| [c.x(), c.y()]))?;
        for interior in polygon.interiors() {
            region.push_ring(interior.coords().map(|c| [c.x(), c.y()]))?;
        }
        Ok(region)
    }

    fn push_ring(&mut self, ring: impl Iterator<Item = [f64; 2]>) -> Result<()> {
        let start = self.vertices.len();
        for [x, y] in ring {
            if !x.is_finite() || !y.is_finite() {
                return Err(KdError::InvalidPredicate(format!(
                    "polygon vertex ({}, {}) is not finite",
                    x, y
                )));
            }
            self.vertices.push(x);
            self.vertices.push(y);
        }
        let ring = &self.vertices[start..];
        let distinct = if ring.len() >= 4 && ring[..2] == ring[ring.len() - 2..] {
            ring.len() / 2 - 1
        } else {
            ring.len() / 2
        };
        if distinct < 3 {
            return Err(KdError::InvalidPredicate(format!(
                "polygon ring needs at least 3 vertices, got {}",
                distinct
            )));
        }
        if ring[..2] != ring[ring.len() - 2..] {
            let (x, y) = (ring[0], ring[1]);
            self.vertices.push(x);
            self.vertices.push(y);
        }
        Ok(())
    }

    /// Dimension holding the x coordinate.
    pub fn x_dim(&self) -> usize {
        self.x_dim
    }

    /// Dimension holding the y coordinate.
    pub fn y_dim(&self) -> usize {
        self.y_dim
    }

    /// The interleaved vertices of every ring.
    pub fn vertices(&self) -> &[f64] {
        &self.vertices
    }

    /// `[x_dim, y_dim, x_tag, y_tag]`, the table row staged next to the vertices.
    pub fn descriptor(&self) -> [u32; 4] {
        [
            self.x_dim as u32,
            self.y_dim as u32,
            self.x_type.tag().into(),
            self.y_type.tag().into(),
        ]
    }

    /// Bounding rectangle of the vertices as `(min, max)`.
    pub fn bounds(&self) -> ([f64; 2], [f64; 2]) {
        let mut min = [f64::INFINITY; 2];
        let mut max = [f64::NEG_INFINITY; 2];
        for v in self.vertices.chunks_exact(2) {
            for axis in 0..2 {
                min[axis] = min[axis].min(v[axis]);
                max[axis] = max[axis].max(v[axis]);
            }
        }
        (min, max)
    }

    /// Decode the region's dimensions of `record` and test membership.
    #[inline]
    pub fn contains(&self, record: &[u64]) -> bool {
        let x = self.x_type.decode_to_f64(record[self.x_dim]);
        let y = self.y_type.decode_to_f64(record[self.y_dim]);
        point_in_polygon(&self.vertices, x, y)
    }
}

/// Test a staged region row against a record; `descriptor` is [`Region::descriptor`].
#[inline]
pub(crate) fn descriptor_contains(descriptor: &[u32], vertices: &[f64], record: &[u64]) -> bool {
    let decode = |dim: u32, tag: u32| {
        let key = record[dim as usize];
        if tag == KeyType::Integer.tag() as u32 {
            KeyType::Integer.decode_to_f64(key)
        } else {
            KeyType::Float.decode_to_f64(key)
        }
    };
    let x = decode(descriptor[0], descriptor[2]);
    let y = decode(descriptor[1], descriptor[3]);
    point_in_polygon(vertices, x, y)
}

/// Even-odd ray casting over interleaved vertices made of one or more closed rings.
///
/// A ring ends at the first vertex equal to its starting vertex; the next vertex starts a new
/// ring. An empty vertex list contains every point.
pub fn point_in_polygon(vertices: &[f64], x: f64, y: f64) -> bool {
    let n = vertices.len() / 2;
    if n == 0 {
        return true;
    }
    let vx = |i: usize| vertices[2 * i];
    let vy = |i: usize| vertices[2 * i + 1];

    let mut inside = false;
    let (mut first_x, mut first_y) = (vx(0), vy(0));
    let mut j = 0;
    let mut i = 1;
    while i < n {
        if (vy(i) > y) != (vy(j) > y) && x < (vx(j) - vx(i)) * (y - vy(i)) / (vy(j) - vy(i)) + vx(i)
        {
            inside = !inside;
        }
        if vx(i) == first_x && vy(i) == first_y {
            // ring closed: skip the edge into the next ring
            i += 1;
            if i < n {
                first_x = vx(i);
                first_y = vy(i);
            }
        }
        j = i;
        i += 1;
    }
    inside
}
