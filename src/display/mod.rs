//! Human-readable pipeline printouts.
pub mod trace;

pub use trace::describe;
