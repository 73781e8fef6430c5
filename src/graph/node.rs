//! The generation contract every pipeline node implements.

use crate::error::PipelineResult;
use crate::image::{ImageData, ImageMetadata, ImageRegion};
use crate::settings::PipelineSettings;
use crate::store::TimeStamp;
use smallvec::SmallVec;
use std::any::Any;
use std::sync::Arc;

/// Input side of the information pass.
pub struct InformationContext<'a> {
    pub node_name: &'a str,
    /// Freshly updated metadata of each input, in slot order.
    pub inputs: &'a [ImageMetadata],
    pub settings: &'a PipelineSettings,
}

/// Input side of request propagation.
pub struct RegionContext<'a> {
    pub node_name: &'a str,
    pub output: &'a ImageMetadata,
    /// Region consumers need from this node (already merged).
    pub requested: &'a ImageRegion,
    pub inputs: &'a [ImageMetadata],
}

/// Input side of data generation.
pub struct GenerateContext<'a> {
    pub node_name: &'a str,
    pub output: &'a ImageMetadata,
    pub requested: &'a ImageRegion,
    /// Up-to-date input data, each covering at least the region this node asked for.
    pub inputs: &'a [Arc<ImageData>],
    pub settings: &'a PipelineSettings,
}

/// One unit of computation in the dataflow graph.
///
/// The executor drives the three phases in order: information (upstream first),
/// request propagation (downstream first), then data generation (upstream first,
/// skipped when the cached output is still current).
pub trait ProcessObject: Send {
    /// Short, human-readable kind of node, used in pipeline printouts.
    fn type_name(&self) -> &'static str;

    /// Number of required input slots.
    fn number_of_inputs(&self) -> usize { 0 }

    /// Stamp of the last parameter change.
    fn modified_time(&self) -> TimeStamp;

    /// Hook run at the start of the information pass, before inputs' metadata is read.
    /// Nodes fed from outside the graph refresh their source here and may bump their
    /// own modification stamp.
    fn refresh_information(&mut self, _node_name: &str) -> PipelineResult<()> { Ok(()) }

    /// Derives output metadata from input metadata and the node's parameters.
    /// Must not touch pixel data.
    fn generate_output_information(&mut self, ctx: &InformationContext) -> PipelineResult<ImageMetadata>;

    /// Regions needed from each input to produce `ctx.requested`. The default asks
    /// every input for the same region, cropped to that input's largest region.
    fn input_requested_regions(&self, ctx: &RegionContext) -> SmallVec<[ImageRegion; 2]> {
        ctx.inputs
            .iter()
            .map(|input| crop_or_empty(ctx.requested, input.largest_region()))
            .collect()
    }

    /// Called once the merged request for this node is known.
    fn propagate_requested_region(&mut self, _node_name: &str, _requested: &ImageRegion) -> PipelineResult<()> { Ok(()) }

    /// Produces output covering at least `ctx.requested`.
    fn generate_data(&mut self, ctx: &GenerateContext) -> PipelineResult<ImageData>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// `region ∩ bounds`, or an empty region anchored at `bounds` when they do not meet.
pub fn crop_or_empty(region: &ImageRegion, bounds: &ImageRegion) -> ImageRegion {
    region.crop(bounds).unwrap_or_else(|| {
        let zeros = [0usize; crate::image::MAX_DIMENSION];
        ImageRegion::new(bounds.index(), &zeros[..bounds.dimension()])
    })
}
