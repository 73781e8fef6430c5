//! Drives the pipeline: information, requested regions, then data.
pub mod engine;
pub mod ledger;
pub mod propagate;
#[cfg(feature = "single-flight")]
pub mod coalesce;

pub use engine::PipelineExecutor;
pub use ledger::{CachedOutput, Information, Ledger};
pub use propagate::{RegionPropagator, RequestedRegions};
#[cfg(feature = "single-flight")]
pub use coalesce::SharedPipeline;
