//! Adapter letting a foreign, callback-driven pipeline feed this one.
pub mod ffi;
pub mod import;

pub use ffi::BridgeCallbacks;
pub use import::ExternalPipelineBridge;
