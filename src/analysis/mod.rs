//! Graph analysis over the node registry.
pub mod topology;
