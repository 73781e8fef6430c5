//! Axis-aligned index regions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest image dimension the pipeline handles.
pub const MAX_DIMENSION: usize = 4;

/// An axis-aligned block of pixel indices: a start index plus a size per axis.
///
/// Axis 0 varies fastest in linear buffer offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRegion {
    dimension: usize,
    index: [i64; MAX_DIMENSION],
    size: [usize; MAX_DIMENSION],
}

impl ImageRegion {
    /// Builds a region from per-axis start indices and sizes.
    ///
    /// # Panics
    /// If the slices differ in length or the dimension is outside `1..=4`.
    /// Use [`ImageRegion::try_new`] for untrusted input.
    pub fn new(index: &[i64], size: &[usize]) -> Self {
        match Self::try_new(index, size) {
            Some(region) => region,
            None => panic!(
                "invalid region: index has {} axes, size has {} axes (1..={} allowed)",
                index.len(),
                size.len(),
                MAX_DIMENSION
            ),
        }
    }

    pub fn try_new(index: &[i64], size: &[usize]) -> Option<Self> {
        let dimension = index.len();
        if dimension == 0 || dimension > MAX_DIMENSION || size.len() != dimension {
            return None;
        }
        let mut region = Self { dimension, index: [0; MAX_DIMENSION], size: [0; MAX_DIMENSION] };
        region.index[..dimension].copy_from_slice(index);
        region.size[..dimension].copy_from_slice(size);
        Some(region)
    }

    /// A region starting at the origin index.
    pub fn from_size(size: &[usize]) -> Self {
        Self::new(&[0; MAX_DIMENSION][..size.len()], size)
    }

    pub fn dimension(&self) -> usize { self.dimension }
    pub fn index(&self) -> &[i64] { &self.index[..self.dimension] }
    pub fn size(&self) -> &[usize] { &self.size[..self.dimension] }

    /// One past the last index along `axis`.
    #[inline]
    pub fn upper(&self, axis: usize) -> i64 {
        self.index[axis] + self.size[axis] as i64
    }

    pub fn number_of_pixels(&self) -> usize {
        self.size().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.size().iter().any(|&s| s == 0)
    }

    pub fn contains_index(&self, idx: &[i64]) -> bool {
        idx.len() == self.dimension
            && (0..self.dimension).all(|d| idx[d] >= self.index[d] && idx[d] < self.upper(d))
    }

    /// True when every pixel of `self` is also a pixel of `other`.
    /// An empty region is inside any region of the same dimension.
    pub fn is_inside(&self, other: &ImageRegion) -> bool {
        if self.dimension != other.dimension {
            return false;
        }
        if self.is_empty() {
            return true;
        }
        (0..self.dimension).all(|d| self.index[d] >= other.index[d] && self.upper(d) <= other.upper(d))
    }

    /// Smallest region covering both. Empty operands do not widen the result.
    pub fn union(&self, other: &ImageRegion) -> ImageRegion {
        debug_assert_eq!(self.dimension, other.dimension);
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        let mut out = *self;
        for d in 0..self.dimension {
            let lo = self.index[d].min(other.index[d]);
            let hi = self.upper(d).max(other.upper(d));
            out.index[d] = lo;
            out.size[d] = (hi - lo) as usize;
        }
        out
    }

    /// Overlap of the two regions, or `None` when they do not intersect.
    pub fn crop(&self, other: &ImageRegion) -> Option<ImageRegion> {
        if self.dimension != other.dimension {
            return None;
        }
        let mut out = *self;
        for d in 0..self.dimension {
            let lo = self.index[d].max(other.index[d]);
            let hi = self.upper(d).min(other.upper(d));
            if hi <= lo {
                return None;
            }
            out.index[d] = lo;
            out.size[d] = (hi - lo) as usize;
        }
        Some(out)
    }

    /// Grows the region by `radius` pixels on both sides of every axis.
    pub fn pad(&self, radius: usize) -> ImageRegion {
        let mut out = *self;
        for d in 0..self.dimension {
            out.index[d] -= radius as i64;
            out.size[d] += 2 * radius;
        }
        out
    }

    /// Linear offset of `idx` within a buffer laid out over this region.
    /// The caller guarantees `idx` lies inside the region.
    #[inline]
    pub fn offset_of(&self, idx: &[i64]) -> usize {
        let mut offset = 0usize;
        let mut stride = 1usize;
        for d in 0..self.dimension {
            offset += (idx[d] - self.index[d]) as usize * stride;
            stride *= self.size[d];
        }
        offset
    }

    /// Distance in samples between neighbours along `axis`.
    #[inline]
    pub fn stride(&self, axis: usize) -> usize {
        self.size[..axis].iter().product()
    }

    /// Visits every index of the region, axis 0 fastest.
    pub fn indices(&self) -> RegionIndices {
        RegionIndices {
            region: *self,
            cursor: self.index,
            remaining: self.number_of_pixels(),
        }
    }
}

impl fmt::Display for ImageRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[index={:?}, size={:?}]", self.index(), self.size())
    }
}

/// Iterator returned by [`ImageRegion::indices`].
pub struct RegionIndices {
    region: ImageRegion,
    cursor: [i64; MAX_DIMENSION],
    remaining: usize,
}

impl Iterator for RegionIndices {
    type Item = [i64; MAX_DIMENSION];

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.cursor;
        self.remaining -= 1;
        for d in 0..self.region.dimension {
            self.cursor[d] += 1;
            if self.cursor[d] < self.region.upper(d) {
                break;
            }
            self.cursor[d] = self.region.index[d];
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for RegionIndices {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_union_is_bounding_box() {
        let a = ImageRegion::new(&[0, 0], &[4, 4]);
        let b = ImageRegion::new(&[2, 3], &[4, 4]);
        let u = a.union(&b);
        assert_eq!(u.index(), &[0, 0]);
        assert_eq!(u.size(), &[6, 7]);
    }

    #[test]
    fn test_union_ignores_empty_operand() {
        let a = ImageRegion::new(&[1, 1], &[2, 2]);
        let empty = ImageRegion::new(&[-50, 90], &[0, 3]);
        assert_eq!(a.union(&empty), a);
        assert_eq!(empty.union(&a), a);
    }

    #[rstest]
    #[case(&[0, 0], &[10, 10], true)]
    #[case(&[2, 2], &[3, 3], true)]
    #[case(&[8, 8], &[3, 3], false)]
    #[case(&[-1, 0], &[2, 2], false)]
    fn test_is_inside(#[case] index: &[i64], #[case] size: &[usize], #[case] expected: bool) {
        let whole = ImageRegion::from_size(&[10, 10]);
        assert_eq!(ImageRegion::new(index, size).is_inside(&whole), expected);
    }

    #[test]
    fn test_pad_then_crop_stays_within_bounds() {
        let whole = ImageRegion::from_size(&[8, 8]);
        let corner = ImageRegion::new(&[0, 5], &[2, 3]);
        let padded = corner.pad(1).crop(&whole).unwrap();
        assert_eq!(padded.index(), &[0, 4]);
        assert_eq!(padded.size(), &[3, 4]);
    }

    #[test]
    fn test_crop_disjoint_is_none() {
        let a = ImageRegion::from_size(&[4]);
        let b = ImageRegion::new(&[4], &[2]);
        assert!(a.crop(&b).is_none());
    }

    #[test]
    fn test_offsets_follow_axis_zero_fastest() {
        let r = ImageRegion::new(&[1, 2, 3], &[4, 5, 6]);
        assert_eq!(r.offset_of(&[1, 2, 3]), 0);
        assert_eq!(r.offset_of(&[2, 2, 3]), 1);
        assert_eq!(r.offset_of(&[1, 3, 3]), 4);
        assert_eq!(r.offset_of(&[1, 2, 4]), 20);
        assert_eq!(r.stride(2), 20);
    }

    #[test]
    fn test_indices_visits_every_pixel_in_buffer_order() {
        let r = ImageRegion::new(&[5, -1], &[2, 3]);
        let all: Vec<_> = r.indices().collect();
        assert_eq!(all.len(), 6);
        for (i, idx) in all.iter().enumerate() {
            assert_eq!(r.offset_of(&idx[..2]), i);
        }
    }

    #[test]
    fn test_try_new_rejects_bad_dimensions() {
        assert!(ImageRegion::try_new(&[], &[]).is_none());
        assert!(ImageRegion::try_new(&[0; 5], &[1; 5]).is_none());
        assert!(ImageRegion::try_new(&[0, 0], &[1]).is_none());
    }
}
