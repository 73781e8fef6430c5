//! The node contract and the contexts passed through each pipeline phase.
pub mod node;

pub use node::{crop_or_empty, GenerateContext, InformationContext, ProcessObject, RegionContext};
