//! Image data objects flowing along pipeline edges.
pub mod buffer;
pub mod metadata;
pub mod region;

pub use buffer::{BufferOwnership, ImageBuffer, SampleSlice, Scalar, ScalarType};
pub use metadata::{nearest_index, ImageMetadata};
pub use region::{ImageRegion, MAX_DIMENSION};

use std::sync::Arc;

/// A node's generated output: its information, the region actually held in
/// memory, and the samples for that region.
#[derive(Debug)]
pub struct ImageData {
    metadata: ImageMetadata,
    buffered_region: ImageRegion,
    buffer: Arc<ImageBuffer>,
}

impl ImageData {
    /// Pairs a buffer with the region it covers. Fails if the sample count does not
    /// match the region or the region escapes the largest region.
    pub fn new(metadata: ImageMetadata, buffered_region: ImageRegion, buffer: ImageBuffer) -> Result<Self, String> {
        Self::from_shared(metadata, buffered_region, Arc::new(buffer))
    }

    /// Like [`ImageData::new`] but shares an existing buffer without copying.
    pub fn from_shared(metadata: ImageMetadata, buffered_region: ImageRegion, buffer: Arc<ImageBuffer>) -> Result<Self, String> {
        if buffered_region.number_of_pixels() != buffer.len() {
            return Err(format!(
                "buffer holds {} samples, region {} needs {}",
                buffer.len(),
                buffered_region,
                buffered_region.number_of_pixels()
            ));
        }
        if !buffered_region.is_inside(metadata.largest_region()) {
            return Err(format!(
                "buffered region {} lies outside largest region {}",
                buffered_region,
                metadata.largest_region()
            ));
        }
        Ok(Self { metadata, buffered_region, buffer })
    }

    pub fn metadata(&self) -> &ImageMetadata { &self.metadata }
    pub fn buffered_region(&self) -> &ImageRegion { &self.buffered_region }
    pub fn buffer(&self) -> &ImageBuffer { &self.buffer }
    pub fn shared_buffer(&self) -> &Arc<ImageBuffer> { &self.buffer }

    /// Write access, only when no other image shares the buffer.
    pub fn buffer_mut(&mut self) -> Option<&mut ImageBuffer> { Arc::get_mut(&mut self.buffer) }
    pub fn scalar_type(&self) -> ScalarType { self.buffer.scalar_type() }

    /// Reads one sample as `f64`; `None` outside the buffered region.
    pub fn sample_f64(&self, idx: &[i64]) -> Option<f64> {
        if !self.buffered_region.contains_index(idx) {
            return None;
        }
        self.buffer.samples().get_f64(self.buffered_region.offset_of(idx))
    }
}
