//! Source node wrapping a caller-supplied buffer.

use crate::error::{PipelineError, PipelineResult};
use crate::graph::{GenerateContext, InformationContext, ProcessObject};
use crate::image::{BufferOwnership, ImageBuffer, ImageData, ImageMetadata, ImageRegion, Scalar, MAX_DIMENSION};
use crate::store::TimeStamp;
use smallvec::SmallVec;
use std::any::Any;
use std::sync::Arc;

type AxisValues = SmallVec<[f64; MAX_DIMENSION]>;

/// Exposes an in-memory buffer as the start of a pipeline.
///
/// The output always covers the whole region, so the buffer is handed downstream
/// without a copy. Spacing defaults to 1 and origin to 0 on every axis.
pub struct ImportImageFilter {
    region: Option<ImageRegion>,
    spacing: AxisValues,
    origin: AxisValues,
    buffer: Option<Arc<ImageBuffer>>,
    // Address and length of the last imported pointer, so re-importing the same
    // memory does not count as a change.
    import_key: Option<(usize, usize)>,
    modified: TimeStamp,
}

impl Default for ImportImageFilter {
    fn default() -> Self { Self::new() }
}

impl ImportImageFilter {
    pub fn new() -> Self {
        Self {
            region: None,
            spacing: AxisValues::new(),
            origin: AxisValues::new(),
            buffer: None,
            import_key: None,
            modified: TimeStamp::now(),
        }
    }

    pub fn region(&self) -> Option<&ImageRegion> { self.region.as_ref() }

    pub fn set_region(&mut self, region: ImageRegion) {
        if self.region != Some(region) {
            self.region = Some(region);
            self.modified.modify();
        }
    }

    pub fn spacing(&self) -> &[f64] { &self.spacing }

    pub fn set_spacing(&mut self, spacing: &[f64]) {
        if self.spacing.as_slice() != spacing {
            self.spacing = AxisValues::from_slice(spacing);
            self.modified.modify();
        }
    }

    pub fn origin(&self) -> &[f64] { &self.origin }

    pub fn set_origin(&mut self, origin: &[f64]) {
        if self.origin.as_slice() != origin {
            self.origin = AxisValues::from_slice(origin);
            self.modified.modify();
        }
    }

    /// Imports samples the pipeline owns from now on.
    pub fn set_buffer<T: Scalar>(&mut self, samples: Vec<T>) {
        self.buffer = Some(Arc::new(ImageBuffer::from_vec(samples)));
        self.import_key = None;
        self.modified.modify();
    }

    /// Imports caller memory without copying. A null `ptr` clears the import.
    ///
    /// With `let_filter_manage_memory == false` the caller frees the memory, and must
    /// keep it alive and unmodified for as long as any output of this node (or of a
    /// node downstream that shares it) is alive. With `true` the memory is released
    /// with `libc::free` once the last output sharing it is dropped.
    ///
    /// Re-importing the same memory is not a change to the pixels, but a different
    /// `let_filter_manage_memory` is always applied, to this node's buffer and to every
    /// cached output sharing it.
    ///
    /// # Safety
    /// See [`ImageBuffer::from_raw_parts`].
    pub unsafe fn set_import_pointer<T: Scalar>(&mut self, ptr: *mut T, len: usize, let_filter_manage_memory: bool) {
        let key = (ptr as usize, len);
        if self.import_key == Some(key) {
            if let Some(buffer) = &self.buffer {
                buffer.set_release(let_filter_manage_memory);
                return;
            }
        }
        self.buffer = ImageBuffer::from_raw_parts(ptr, len, let_filter_manage_memory).map(Arc::new);
        self.import_key = self.buffer.as_ref().map(|_| key);
        self.modified.modify();
    }

    pub fn buffer_ownership(&self) -> Option<BufferOwnership> {
        self.buffer.as_ref().map(|b| b.ownership())
    }

    /// Call after writing into imported memory in place.
    pub fn modified(&mut self) {
        self.modified.modify();
    }
}

impl ProcessObject for ImportImageFilter {
    fn type_name(&self) -> &'static str { "ImportImageFilter" }
    fn modified_time(&self) -> TimeStamp { self.modified }

    fn generate_output_information(&mut self, ctx: &InformationContext) -> PipelineResult<ImageMetadata> {
        let region = self
            .region
            .ok_or_else(|| PipelineError::invalid_metadata(ctx.node_name, "no region set on import"))?;
        let buffer = self
            .buffer
            .as_ref()
            .ok_or_else(|| PipelineError::invalid_metadata(ctx.node_name, "no buffer imported"))?;
        if buffer.len() != region.number_of_pixels() {
            return Err(PipelineError::BufferSizeMismatch {
                node_name: ctx.node_name.to_string(),
                region,
                expected: region.number_of_pixels(),
                actual: buffer.len(),
            });
        }

        let dim = region.dimension();
        let unit = [1.0; MAX_DIMENSION];
        let zero = [0.0; MAX_DIMENSION];
        let spacing = if self.spacing.is_empty() { &unit[..dim] } else { self.spacing.as_slice() };
        let origin = if self.origin.is_empty() { &zero[..dim] } else { self.origin.as_slice() };
        ImageMetadata::new(region, spacing, origin).map_err(|msg| PipelineError::invalid_metadata(ctx.node_name, msg))
    }

    fn generate_data(&mut self, ctx: &GenerateContext) -> PipelineResult<ImageData> {
        let buffer = self
            .buffer
            .clone()
            .ok_or_else(|| PipelineError::generation_failed(ctx.node_name, *ctx.requested, "no buffer imported"))?;
        ImageData::from_shared(*ctx.output, *ctx.output.largest_region(), buffer)
            .map_err(|msg| PipelineError::generation_failed(ctx.node_name, *ctx.requested, msg))
    }

    fn as_any(&self) -> &dyn Any { self }
    fn as_any_mut(&mut self) -> &mut dyn Any { self }
}
