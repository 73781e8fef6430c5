//! Raw callback ABI of the external pipeline bridge.
//!
//! Every callback receives the same opaque user-data pointer. Extents are six
//! `int`s holding inclusive `(low, high)` pairs for x, y and z; spacing and
//! origin are three `double`s.

#![allow(non_camel_case_types)]

use libc::{c_char, c_int, c_void};

/// Number of `int`s in an extent array.
pub const EXTENT_LEN: usize = 6;
/// Number of axes an extent, spacing or origin array describes.
pub const FOREIGN_AXES: usize = 3;

// --- Callback Function Pointer Types ---

pub type UpdateInformation_CB = extern "C" fn(user_data: *mut c_void);

/// Non-zero when the foreign source changed since the previous call.
pub type PipelineModified_CB = extern "C" fn(user_data: *mut c_void) -> c_int;

pub type WholeExtent_CB = extern "C" fn(user_data: *mut c_void) -> *mut c_int;

pub type Spacing_CB = extern "C" fn(user_data: *mut c_void) -> *mut f64;

pub type Origin_CB = extern "C" fn(user_data: *mut c_void) -> *mut f64;

/// Returns a NUL-terminated scalar type name such as `"unsigned short"`.
pub type ScalarType_CB = extern "C" fn(user_data: *mut c_void) -> *const c_char;

pub type NumberOfComponents_CB = extern "C" fn(user_data: *mut c_void) -> c_int;

pub type PropagateUpdateExtent_CB = extern "C" fn(user_data: *mut c_void, extent: *mut c_int);

pub type UpdateData_CB = extern "C" fn(user_data: *mut c_void);

pub type DataExtent_CB = extern "C" fn(user_data: *mut c_void) -> *mut c_int;

pub type BufferPointer_CB = extern "C" fn(user_data: *mut c_void) -> *mut c_void;

/// The full set of callback slots plus the user data passed to each of them.
/// Any slot may be left unset; invoking an unset slot is an error, never a default.
#[derive(Debug, Clone, Copy)]
pub struct BridgeCallbacks {
    pub update_information: Option<UpdateInformation_CB>,
    pub pipeline_modified: Option<PipelineModified_CB>,
    pub whole_extent: Option<WholeExtent_CB>,
    pub spacing: Option<Spacing_CB>,
    pub origin: Option<Origin_CB>,
    pub scalar_type: Option<ScalarType_CB>,
    pub number_of_components: Option<NumberOfComponents_CB>,
    pub propagate_update_extent: Option<PropagateUpdateExtent_CB>,
    pub update_data: Option<UpdateData_CB>,
    pub data_extent: Option<DataExtent_CB>,
    pub buffer_pointer: Option<BufferPointer_CB>,
    pub user_data: *mut c_void,
}

impl Default for BridgeCallbacks {
    fn default() -> Self {
        Self {
            update_information: None,
            pipeline_modified: None,
            whole_extent: None,
            spacing: None,
            origin: None,
            scalar_type: None,
            number_of_components: None,
            propagate_update_extent: None,
            update_data: None,
            data_extent: None,
            buffer_pointer: None,
            user_data: std::ptr::null_mut(),
        }
    }
}
