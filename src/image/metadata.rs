//! Output information: largest possible region plus the physical grid.

use super::region::{ImageRegion, MAX_DIMENSION};
use serde::{Deserialize, Serialize};

/// Everything a node can say about its output without computing pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    largest_region: ImageRegion,
    spacing: [f64; MAX_DIMENSION],
    origin: [f64; MAX_DIMENSION],
}

impl ImageMetadata {
    /// Validates and builds the metadata. Spacing must be non-zero and finite
    /// on every axis, and all slices must match the region's dimension.
    pub fn new(largest_region: ImageRegion, spacing: &[f64], origin: &[f64]) -> Result<Self, String> {
        let dim = largest_region.dimension();
        if spacing.len() != dim || origin.len() != dim {
            return Err(format!(
                "region has {} axes but spacing has {} and origin has {}",
                dim,
                spacing.len(),
                origin.len()
            ));
        }
        if let Some(axis) = spacing.iter().position(|&s| s == 0.0 || !s.is_finite()) {
            return Err(format!("spacing along axis {} is {}, must be finite and non-zero", axis, spacing[axis]));
        }
        let mut meta = Self {
            largest_region,
            spacing: [1.0; MAX_DIMENSION],
            origin: [0.0; MAX_DIMENSION],
        };
        meta.spacing[..dim].copy_from_slice(spacing);
        meta.origin[..dim].copy_from_slice(origin);
        Ok(meta)
    }

    /// Unit spacing, zero origin.
    pub fn with_region(largest_region: ImageRegion) -> Self {
        Self {
            largest_region,
            spacing: [1.0; MAX_DIMENSION],
            origin: [0.0; MAX_DIMENSION],
        }
    }

    pub fn dimension(&self) -> usize { self.largest_region.dimension() }
    pub fn largest_region(&self) -> &ImageRegion { &self.largest_region }
    pub fn spacing(&self) -> &[f64] { &self.spacing[..self.dimension()] }
    pub fn origin(&self) -> &[f64] { &self.origin[..self.dimension()] }

    /// Same grid, different extent.
    pub fn with_largest_region(&self, region: ImageRegion) -> Self {
        Self { largest_region: region, ..*self }
    }

    /// Physical coordinates of a pixel index.
    pub fn index_to_point(&self, idx: &[i64]) -> Vec<f64> {
        (0..self.dimension())
            .map(|d| self.origin[d] + idx[d] as f64 * self.spacing[d])
            .collect()
    }

    /// Continuous (fractional) index of a physical point.
    pub fn point_to_continuous_index(&self, point: &[f64]) -> Vec<f64> {
        (0..self.dimension())
            .map(|d| (point[d] - self.origin[d]) / self.spacing[d])
            .collect()
    }
}

/// Rounds a continuous index to the nearest pixel index, halves away from zero.
pub fn nearest_index(cindex: &[f64]) -> [i64; MAX_DIMENSION] {
    let mut idx = [0i64; MAX_DIMENSION];
    for (d, &c) in cindex.iter().enumerate().take(MAX_DIMENSION) {
        idx[d] = c.round() as i64;
    }
    idx
}
