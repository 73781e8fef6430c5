//! Node identity, modification stamps and the node arena.
pub mod registry;
pub mod types;

pub use registry::NodeRegistry;
pub use types::{NodeId, NodeMetadata, TimeStamp};
