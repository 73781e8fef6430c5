//! Error types shared by every pipeline stage.

use crate::image::ImageRegion;
use crate::store::NodeId;
use thiserror::Error;

/// The named callback slots of the external pipeline bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackSlot {
    UpdateInformation,
    PipelineModified,
    WholeExtent,
    Spacing,
    Origin,
    ScalarType,
    NumberOfComponents,
    PropagateUpdateExtent,
    UpdateData,
    DataExtent,
    BufferPointer,
}

impl std::fmt::Display for CallbackSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CallbackSlot::UpdateInformation => "UpdateInformation",
            CallbackSlot::PipelineModified => "PipelineModified",
            CallbackSlot::WholeExtent => "WholeExtent",
            CallbackSlot::Spacing => "Spacing",
            CallbackSlot::Origin => "Origin",
            CallbackSlot::ScalarType => "ScalarType",
            CallbackSlot::NumberOfComponents => "NumberOfComponents",
            CallbackSlot::PropagateUpdateExtent => "PropagateUpdateExtent",
            CallbackSlot::UpdateData => "UpdateData",
            CallbackSlot::DataExtent => "DataExtent",
            CallbackSlot::BufferPointer => "BufferPointer",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Node '{node_name}' has no input connected at slot {slot}")]
    MissingInput { node_id: NodeId, node_name: String, slot: usize },

    #[error("Requested region {requested} of node '{node_name}' lies outside its largest region {largest}")]
    RegionOutOfBounds { node_id: NodeId, node_name: String, requested: ImageRegion, largest: ImageRegion },

    #[error("Bridge '{node_name}': callback slot {slot} is not configured")]
    BridgeNotConfigured { node_name: String, slot: CallbackSlot },

    #[error("Bridge '{node_name}': unsupported scalar type '{type_name}'")]
    UnsupportedScalarType { node_name: String, type_name: String },

    #[error("Bridge '{node_name}': {components} components per pixel, only 1 is supported")]
    MultiComponentRejected { node_name: String, components: i32 },

    #[error("Bridge '{node_name}': dimension {dimension} outside the supported range 1..=3")]
    UnsupportedDimension { node_name: String, dimension: usize },

    #[error("Node '{node_name}': buffer holds {actual} samples, region {region} needs {expected}")]
    BufferSizeMismatch { node_name: String, region: ImageRegion, expected: usize, actual: usize },

    #[error("Invalid image information at '{node_name}': {msg}")]
    InvalidMetadata { node_name: String, msg: String },

    #[error("Node '{node_name}' failed to generate region {region}: {msg}")]
    GenerationFailed { node_name: String, region: ImageRegion, msg: String },

    #[error("Node {0:?} is not registered in this pipeline")]
    UnknownNode(NodeId),

    #[error("Node '{node_name}' has {count} input slots, slot {slot} does not exist")]
    InputSlotOutOfRange { node_name: String, slot: usize, count: usize },

    #[error("Connecting '{producer}' into '{consumer}' would create a cycle")]
    CycleDetected { producer: String, consumer: String },

    #[error("Settings error: {0}")]
    Settings(String),
}

impl PipelineError {
    pub fn invalid_metadata(node_name: &str, msg: impl Into<String>) -> Self {
        PipelineError::InvalidMetadata { node_name: node_name.to_string(), msg: msg.into() }
    }

    pub fn generation_failed(node_name: &str, region: ImageRegion, msg: impl Into<String>) -> Self {
        PipelineError::GenerationFailed { node_name: node_name.to_string(), region, msg: msg.into() }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
