// Crate root: a lazy, demand-driven image pipeline.
// Nodes describe their output first, are told which region is wanted, and only
// then generate pixels, reusing cached output whenever nothing upstream changed.

pub mod analysis;
pub mod bridge;
pub mod compute;
pub mod display;
pub mod error;
pub mod filters;
pub mod function;
pub mod graph;
pub mod image;
pub mod pipeline;
pub mod settings;
pub mod store;

#[cfg(test)]
mod testing;

pub use bridge::{BridgeCallbacks, ExternalPipelineBridge};
pub use compute::PipelineExecutor;
pub use error::{CallbackSlot, PipelineError, PipelineResult};
pub use filters::{DerivativeImageFilter, DerivativeOutput, ImportImageFilter};
pub use function::{CentralDifferenceFunction, Derivative};
pub use graph::ProcessObject;
pub use image::{BufferOwnership, ImageBuffer, ImageData, ImageMetadata, ImageRegion, ScalarType};
pub use pipeline::Pipeline;
pub use settings::PipelineSettings;
pub use store::{NodeId, TimeStamp};

#[cfg(feature = "single-flight")]
pub use compute::SharedPipeline;

/// Version of the core library, for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
