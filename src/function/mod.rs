//! Image functions: values computed at a single position of an input image.
pub mod central_difference;

pub use central_difference::{CentralDifferenceFunction, Derivative};
