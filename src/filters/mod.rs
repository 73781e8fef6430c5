//! Concrete pipeline nodes.
pub mod derivative;
pub mod import;

pub use derivative::{DerivativeImageFilter, DerivativeOutput};
pub use import::ImportImageFilter;
