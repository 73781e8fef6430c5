//! Image derivative by central differencing.
//!
//! `d_k = (s[i + e_k] - s[i - e_k]) / (2 * spacing_k)` on every axis `k`, scaled by the
//! physical spacing. Continuous indices and physical points are rounded to the nearest
//! pixel first; nothing is interpolated.

use crate::image::{nearest_index, ImageData, ImageMetadata, ImageRegion, Scalar, MAX_DIMENSION};
use smallvec::SmallVec;

/// One partial derivative per image axis.
pub type Derivative = SmallVec<[f64; MAX_DIMENSION]>;

pub struct CentralDifferenceFunction<'a, T: Scalar> {
    samples: &'a [T],
    buffered_region: ImageRegion,
    metadata: &'a ImageMetadata,
}

impl<'a, T: Scalar> CentralDifferenceFunction<'a, T> {
    /// Binds to an image's buffer; `None` if its samples are not `T`.
    pub fn new(image: &'a ImageData) -> Option<Self> {
        Some(Self {
            samples: image.buffer().as_slice::<T>()?,
            buffered_region: *image.buffered_region(),
            metadata: image.metadata(),
        })
    }

    pub fn from_parts(samples: &'a [T], buffered_region: ImageRegion, metadata: &'a ImageMetadata) -> Result<Self, String> {
        if samples.len() != buffered_region.number_of_pixels() {
            return Err(format!(
                "{} samples cannot cover region {}",
                samples.len(),
                buffered_region
            ));
        }
        if buffered_region.dimension() != metadata.dimension() {
            return Err("buffered region and metadata disagree on dimension".to_string());
        }
        Ok(Self { samples, buffered_region, metadata })
    }

    pub fn dimension(&self) -> usize { self.buffered_region.dimension() }

    /// True when the whole stencil (`idx ± 1` on every axis) lies in the buffer, i.e.
    /// when [`Self::evaluate_at_index_unchecked`] may be called at `idx`.
    pub fn is_inside_buffer(&self, idx: &[i64]) -> bool {
        let r = &self.buffered_region;
        idx.len() == r.dimension()
            && (0..r.dimension()).all(|d| idx[d] - 1 >= r.index()[d] && idx[d] + 1 < r.upper(d))
    }

    pub fn is_continuous_index_inside_buffer(&self, cindex: &[f64]) -> bool {
        cindex.len() == self.dimension() && self.is_inside_buffer(&nearest_index(cindex)[..self.dimension()])
    }

    pub fn is_point_inside_buffer(&self, point: &[f64]) -> bool {
        point.len() == self.dimension()
            && self.is_continuous_index_inside_buffer(&self.metadata.point_to_continuous_index(point))
    }

    /// Checked evaluation; `None` when the stencil would leave the buffer.
    pub fn evaluate_at_index(&self, idx: &[i64]) -> Option<Derivative> {
        if !self.is_inside_buffer(idx) {
            return None;
        }
        // SAFETY: bounds established just above.
        Some(unsafe { self.evaluate_at_index_unchecked(idx) })
    }

    /// Evaluates without any bounds checking.
    ///
    /// # Safety
    /// [`Self::is_inside_buffer`] must hold for `idx`. Out-of-buffer reads are
    /// undefined behavior.
    pub unsafe fn evaluate_at_index_unchecked(&self, idx: &[i64]) -> Derivative {
        let dim = self.dimension();
        let center = self.buffered_region.offset_of(idx);
        let base = self.samples.as_ptr();
        let spacing = self.metadata.spacing();
        let mut derivative = Derivative::with_capacity(dim);
        for d in 0..dim {
            let stride = self.buffered_region.stride(d);
            let ahead = (*base.add(center + stride)).to_f64();
            let behind = (*base.add(center - stride)).to_f64();
            derivative.push((ahead - behind) / (2.0 * spacing[d]));
        }
        derivative
    }

    /// Single partial derivative along `axis`; `None` if `idx ± 1` along that axis
    /// (or `idx` itself) leaves the buffer.
    pub fn partial_at_index(&self, idx: &[i64], axis: usize) -> Option<f64> {
        let r = &self.buffered_region;
        if axis >= r.dimension() || !r.contains_index(idx) {
            return None;
        }
        if idx[axis] - 1 < r.index()[axis] || idx[axis] + 1 >= r.upper(axis) {
            return None;
        }
        let center = r.offset_of(idx);
        let stride = r.stride(axis);
        let ahead = self.samples[center + stride].to_f64();
        let behind = self.samples[center - stride].to_f64();
        Some((ahead - behind) / (2.0 * self.metadata.spacing()[axis]))
    }

    /// Evaluates at the pixel nearest to a continuous index.
    pub fn evaluate_at_continuous_index(&self, cindex: &[f64]) -> Option<Derivative> {
        if cindex.len() != self.dimension() {
            return None;
        }
        let idx = nearest_index(cindex);
        self.evaluate_at_index(&idx[..self.dimension()])
    }

    /// Evaluates at the pixel nearest to a physical point.
    pub fn evaluate(&self, point: &[f64]) -> Option<Derivative> {
        if point.len() != self.dimension() {
            return None;
        }
        self.evaluate_at_continuous_index(&self.metadata.point_to_continuous_index(point))
    }
}
