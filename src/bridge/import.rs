//! Source node pulling its image from a foreign pipeline through [`BridgeCallbacks`].

use super::ffi::*;
use crate::error::{CallbackSlot, PipelineError, PipelineResult};
use crate::graph::{GenerateContext, InformationContext, ProcessObject};
use crate::image::{ImageBuffer, ImageData, ImageMetadata, ImageRegion, ScalarType, MAX_DIMENSION};
use crate::store::TimeStamp;
use libc::{c_int, c_void};
use std::any::Any;
use std::ffi::CStr;
use std::sync::Arc;
use tracing::{debug, trace};

/// Imports a 1-3 dimensional, single-component image from a foreign pipeline.
///
/// The foreign side keeps ownership of its buffer. Outputs borrow it without a
/// copy, so the foreign buffer must stay valid and unchanged until the next update
/// of this node and until every output generated from it has been dropped.
pub struct ExternalPipelineBridge {
    dimension: usize,
    callbacks: BridgeCallbacks,
    scalar_type: Option<ScalarType>,
    modified: TimeStamp,
}

// SAFETY: the raw user-data pointer is only dereferenced by the foreign callbacks,
// always on the thread running the update. Whoever installs the callbacks promises
// they may be called from whichever thread updates the pipeline.
unsafe impl Send for ExternalPipelineBridge {}

macro_rules! callback_accessors {
    ($($set:ident, $get:ident => $field:ident : $ty:ty;)*) => {
        $(
            pub fn $set(&mut self, callback: Option<$ty>) {
                if self.callbacks.$field.map(|f| f as usize) != callback.map(|f| f as usize) {
                    self.callbacks.$field = callback;
                    self.modified.modify();
                }
            }

            pub fn $get(&self) -> Option<$ty> { self.callbacks.$field }
        )*
    };
}

impl ExternalPipelineBridge {
    /// `dimension` is checked when information is first requested.
    pub fn new(dimension: usize) -> Self {
        Self::with_callbacks(dimension, BridgeCallbacks::default())
    }

    pub fn with_callbacks(dimension: usize, callbacks: BridgeCallbacks) -> Self {
        Self { dimension, callbacks, scalar_type: None, modified: TimeStamp::now() }
    }

    pub fn dimension(&self) -> usize { self.dimension }
    pub fn callbacks(&self) -> &BridgeCallbacks { &self.callbacks }

    /// Scalar type reported by the foreign side at the last information pass.
    pub fn scalar_type(&self) -> Option<ScalarType> { self.scalar_type }

    callback_accessors! {
        set_update_information_callback, update_information_callback => update_information: UpdateInformation_CB;
        set_pipeline_modified_callback, pipeline_modified_callback => pipeline_modified: PipelineModified_CB;
        set_whole_extent_callback, whole_extent_callback => whole_extent: WholeExtent_CB;
        set_spacing_callback, spacing_callback => spacing: Spacing_CB;
        set_origin_callback, origin_callback => origin: Origin_CB;
        set_scalar_type_callback, scalar_type_callback => scalar_type: ScalarType_CB;
        set_number_of_components_callback, number_of_components_callback => number_of_components: NumberOfComponents_CB;
        set_propagate_update_extent_callback, propagate_update_extent_callback => propagate_update_extent: PropagateUpdateExtent_CB;
        set_update_data_callback, update_data_callback => update_data: UpdateData_CB;
        set_data_extent_callback, data_extent_callback => data_extent: DataExtent_CB;
        set_buffer_pointer_callback, buffer_pointer_callback => buffer_pointer: BufferPointer_CB;
    }

    pub fn callback_user_data(&self) -> *mut c_void { self.callbacks.user_data }

    pub fn set_callback_user_data(&mut self, user_data: *mut c_void) {
        if self.callbacks.user_data != user_data {
            self.callbacks.user_data = user_data;
            self.modified.modify();
        }
    }

    fn check_dimension(&self, node_name: &str) -> PipelineResult<()> {
        if (1..=FOREIGN_AXES).contains(&self.dimension) {
            Ok(())
        } else {
            Err(PipelineError::UnsupportedDimension { node_name: node_name.to_string(), dimension: self.dimension })
        }
    }

    fn read_region(&self, node_name: &str, ptr: *const c_int, what: &str) -> PipelineResult<ImageRegion> {
        // SAFETY: the callback contract promises six readable ints when non-null.
        unsafe { extent_to_region(ptr, self.dimension) }
            .ok_or_else(|| PipelineError::invalid_metadata(node_name, format!("{} callback returned null", what)))
    }

    fn read_axes(&self, node_name: &str, ptr: *const f64, what: &str) -> PipelineResult<[f64; MAX_DIMENSION]> {
        if ptr.is_null() {
            return Err(PipelineError::invalid_metadata(node_name, format!("{} callback returned null", what)));
        }
        let mut axes = [0.0; MAX_DIMENSION];
        // SAFETY: the callback contract promises three readable doubles.
        let values = unsafe { std::slice::from_raw_parts(ptr, FOREIGN_AXES) };
        axes[..self.dimension].copy_from_slice(&values[..self.dimension]);
        Ok(axes)
    }
}

/// Fetches a callback or reports the unset slot.
fn required<T>(node_name: &str, slot: CallbackSlot, callback: Option<T>) -> PipelineResult<T> {
    callback.ok_or_else(|| PipelineError::BridgeNotConfigured { node_name: node_name.to_string(), slot })
}

/// Reads an inclusive `(low, high)` extent into a region of `dimension` axes.
///
/// # Safety
/// `ptr` must be null or point to [`EXTENT_LEN`] readable ints.
unsafe fn extent_to_region(ptr: *const c_int, dimension: usize) -> Option<ImageRegion> {
    if ptr.is_null() {
        return None;
    }
    let extent = std::slice::from_raw_parts(ptr, EXTENT_LEN);
    let mut index = [0i64; MAX_DIMENSION];
    let mut size = [0usize; MAX_DIMENSION];
    for d in 0..dimension {
        let (lo, hi) = (extent[2 * d] as i64, extent[2 * d + 1] as i64);
        index[d] = lo;
        size[d] = (hi - lo + 1).max(0) as usize;
    }
    ImageRegion::try_new(&index[..dimension], &size[..dimension])
}

/// Inclusive extent of a region; axes past its dimension are `(0, 0)`.
fn region_to_extent(region: &ImageRegion) -> [c_int; EXTENT_LEN] {
    let mut extent = [0 as c_int; EXTENT_LEN];
    for d in 0..region.dimension().min(FOREIGN_AXES) {
        extent[2 * d] = region.index()[d] as c_int;
        extent[2 * d + 1] = (region.upper(d) - 1) as c_int;
    }
    extent
}

impl ProcessObject for ExternalPipelineBridge {
    fn type_name(&self) -> &'static str { "ExternalPipelineBridge" }
    fn modified_time(&self) -> TimeStamp { self.modified }

    fn refresh_information(&mut self, node_name: &str) -> PipelineResult<()> {
        let ud = self.callbacks.user_data;
        let update = required(node_name, CallbackSlot::UpdateInformation, self.callbacks.update_information)?;
        update(ud);

        let modified = required(node_name, CallbackSlot::PipelineModified, self.callbacks.pipeline_modified)?;
        if modified(ud) != 0 {
            debug!(node = %node_name, "foreign pipeline modified");
            self.modified.modify();
        }
        Ok(())
    }

    fn generate_output_information(&mut self, ctx: &InformationContext) -> PipelineResult<ImageMetadata> {
        let name = ctx.node_name;
        self.check_dimension(name)?;
        let ud = self.callbacks.user_data;

        let whole = required(name, CallbackSlot::WholeExtent, self.callbacks.whole_extent)?;
        let region = self.read_region(name, whole(ud), "whole extent")?;

        let spacing = required(name, CallbackSlot::Spacing, self.callbacks.spacing)?;
        let spacing = self.read_axes(name, spacing(ud), "spacing")?;

        let origin = required(name, CallbackSlot::Origin, self.callbacks.origin)?;
        let origin = self.read_axes(name, origin(ud), "origin")?;

        let scalar = required(name, CallbackSlot::ScalarType, self.callbacks.scalar_type)?;
        let type_ptr = scalar(ud);
        if type_ptr.is_null() {
            return Err(PipelineError::invalid_metadata(name, "scalar type callback returned null"));
        }
        // SAFETY: non-null and NUL-terminated per the callback contract.
        let type_name = unsafe { CStr::from_ptr(type_ptr) }.to_string_lossy();
        let scalar_type = ScalarType::from_name(&type_name).ok_or_else(|| PipelineError::UnsupportedScalarType {
            node_name: name.to_string(),
            type_name: type_name.to_string(),
        })?;

        let components = required(name, CallbackSlot::NumberOfComponents, self.callbacks.number_of_components)?;
        let components = components(ud);
        if components != 1 {
            return Err(PipelineError::MultiComponentRejected { node_name: name.to_string(), components });
        }

        self.scalar_type = Some(scalar_type);
        trace!(node = %name, region = %region, scalar = %scalar_type, "foreign information read");
        let dim = self.dimension;
        ImageMetadata::new(region, &spacing[..dim], &origin[..dim]).map_err(|msg| PipelineError::invalid_metadata(name, msg))
    }

    fn propagate_requested_region(&mut self, node_name: &str, requested: &ImageRegion) -> PipelineResult<()> {
        let propagate = required(node_name, CallbackSlot::PropagateUpdateExtent, self.callbacks.propagate_update_extent)?;
        let mut extent = region_to_extent(requested);
        trace!(node = %node_name, ?extent, "forwarding update extent");
        propagate(self.callbacks.user_data, extent.as_mut_ptr());
        Ok(())
    }

    fn generate_data(&mut self, ctx: &GenerateContext) -> PipelineResult<ImageData> {
        let name = ctx.node_name;
        let ud = self.callbacks.user_data;

        let update = required(name, CallbackSlot::UpdateData, self.callbacks.update_data)?;
        update(ud);

        let data_extent = required(name, CallbackSlot::DataExtent, self.callbacks.data_extent)?;
        let region = self.read_region(name, data_extent(ud), "data extent")?;

        let scalar_type = self
            .scalar_type
            .ok_or_else(|| PipelineError::generation_failed(name, *ctx.requested, "scalar type unknown"))?;
        let pointer = required(name, CallbackSlot::BufferPointer, self.callbacks.buffer_pointer)?;
        // SAFETY: the foreign side guarantees `region`'s worth of samples of the
        // reported scalar type at this address. It keeps ownership (release = false).
        let buffer = unsafe { ImageBuffer::from_foreign(pointer(ud), scalar_type, region.number_of_pixels(), false) }
            .ok_or_else(|| PipelineError::generation_failed(name, *ctx.requested, "buffer pointer callback returned null"))?;

        ImageData::from_shared(*ctx.output, region, Arc::new(buffer))
            .map_err(|msg| PipelineError::generation_failed(name, *ctx.requested, msg))
    }

    fn as_any(&self) -> &dyn Any { self }
    fn as_any_mut(&mut self) -> &mut dyn Any { self }
}
