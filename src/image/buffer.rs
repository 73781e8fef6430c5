//! Single-component pixel storage with explicit ownership.
//!
//! A buffer is either *pipeline-owned* (a `Vec<T>` the pipeline allocated, or
//! C-allocated memory whose ownership was transferred in) or *externally owned*
//! (memory the caller keeps alive and frees). The distinction is recorded at
//! construction and never inferred; only [`ImageBuffer::set_release`] moves it.

use libc::c_void;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};

/// The closed set of sample types a buffer may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ScalarType {
    /// Maps a scalar type name, as reported by a foreign pipeline, onto the closed set.
    /// `long` is taken to be 64 bits wide.
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name.trim() {
            "char" | "signed char" | "int8_t" | "i8" => ScalarType::I8,
            "unsigned char" | "uint8_t" | "u8" => ScalarType::U8,
            "short" | "int16_t" | "i16" => ScalarType::I16,
            "unsigned short" | "uint16_t" | "u16" => ScalarType::U16,
            "int" | "int32_t" | "i32" => ScalarType::I32,
            "unsigned int" | "uint32_t" | "u32" => ScalarType::U32,
            "long" | "long long" | "int64_t" | "i64" => ScalarType::I64,
            "unsigned long" | "unsigned long long" | "uint64_t" | "u64" => ScalarType::U64,
            "float" | "f32" => ScalarType::F32,
            "double" | "f64" => ScalarType::F64,
            _ => return None,
        };
        Some(ty)
    }

    pub fn size_in_bytes(&self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::I8 => "i8",
            ScalarType::U8 => "u8",
            ScalarType::I16 => "i16",
            ScalarType::U16 => "u16",
            ScalarType::I32 => "i32",
            ScalarType::U32 => "u32",
            ScalarType::I64 => "i64",
            ScalarType::U64 => "u64",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A primitive that can live in an [`ImageBuffer`].
pub trait Scalar: Copy + Send + Sync + 'static {
    const SCALAR_TYPE: ScalarType;
    fn to_f64(self) -> f64;
}

macro_rules! impl_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const SCALAR_TYPE: ScalarType = ScalarType::$variant;
                #[inline(always)]
                fn to_f64(self) -> f64 { self as f64 }
            }
        )*

        /// A typed, borrowed view of a buffer's samples.
        #[derive(Debug, Clone, Copy)]
        pub enum SampleSlice<'a> {
            $($variant(&'a [$ty]),)*
        }

        impl<'a> SampleSlice<'a> {
            pub fn len(&self) -> usize {
                match self { $(SampleSlice::$variant(s) => s.len(),)* }
            }

            pub fn is_empty(&self) -> bool { self.len() == 0 }

            pub fn get_f64(&self, offset: usize) -> Option<f64> {
                match self { $(SampleSlice::$variant(s) => s.get(offset).map(|v| v.to_f64()),)* }
            }
        }

        impl ImageBuffer {
            /// Typed view of the samples, dispatched on the runtime scalar type.
            pub fn samples(&self) -> SampleSlice<'_> {
                match self.scalar_type {
                    $(ScalarType::$variant => SampleSlice::$variant(self.view::<$ty>()),)*
                }
            }
        }
    };
}

impl_scalar! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

/// Runs `$body` with `$s` bound to the typed slice inside a [`SampleSlice`].
#[macro_export]
macro_rules! with_samples {
    ($slice:expr, $s:ident => $body:expr) => {
        match $slice {
            $crate::image::SampleSlice::I8($s) => $body,
            $crate::image::SampleSlice::U8($s) => $body,
            $crate::image::SampleSlice::I16($s) => $body,
            $crate::image::SampleSlice::U16($s) => $body,
            $crate::image::SampleSlice::I32($s) => $body,
            $crate::image::SampleSlice::U32($s) => $body,
            $crate::image::SampleSlice::I64($s) => $body,
            $crate::image::SampleSlice::U64($s) => $body,
            $crate::image::SampleSlice::F32($s) => $body,
            $crate::image::SampleSlice::F64($s) => $body,
        }
    };
}

/// Who is responsible for releasing a buffer's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferOwnership {
    /// The caller keeps the memory alive and frees it; the pipeline never does.
    External,
    /// The pipeline releases the memory when the buffer is dropped.
    Pipeline,
}

enum Storage {
    /// A `Vec<T>` boxed behind `Any`; `T` always matches `scalar_type`.
    Owned(Box<dyn Any + Send + Sync>),
    /// Memory the pipeline did not allocate. Freed with `libc::free` on drop iff `release`.
    Foreign { ptr: NonNull<c_void>, release: AtomicBool },
}

pub struct ImageBuffer {
    scalar_type: ScalarType,
    len: usize,
    storage: Storage,
}

// SAFETY: Owned storage is `Send + Sync` by construction. Foreign storage is only
// ever read through shared slices, and the constructors' contracts require the
// memory to stay valid and unmodified for the buffer's lifetime.
unsafe impl Send for ImageBuffer {}
unsafe impl Sync for ImageBuffer {}

impl ImageBuffer {
    /// Takes ownership of `samples`; the pipeline frees them.
    pub fn from_vec<T: Scalar>(samples: Vec<T>) -> Self {
        Self {
            scalar_type: T::SCALAR_TYPE,
            len: samples.len(),
            storage: Storage::Owned(Box::new(samples)),
        }
    }

    /// Wraps caller memory without copying. Returns `None` for a null pointer.
    ///
    /// With `let_pipeline_manage_memory == false` the caller keeps ownership and must
    /// keep `len` samples at `ptr` valid and unmodified until the buffer is dropped.
    /// With `true`, ownership passes to the buffer, which releases it with `libc::free`.
    ///
    /// # Safety
    /// `ptr` must point to `len` initialized, properly aligned `T` values. When
    /// ownership is transferred the memory must come from the C allocator
    /// (`malloc`/`calloc`/`realloc`) and must not be freed by anyone else.
    pub unsafe fn from_raw_parts<T: Scalar>(ptr: *mut T, len: usize, let_pipeline_manage_memory: bool) -> Option<Self> {
        Self::from_foreign(ptr as *mut c_void, T::SCALAR_TYPE, len, let_pipeline_manage_memory)
    }

    /// Untyped form of [`ImageBuffer::from_raw_parts`], used where the scalar type is only
    /// known at runtime.
    ///
    /// # Safety
    /// Same contract as [`ImageBuffer::from_raw_parts`], with `T` being the Rust type
    /// for `scalar_type`.
    pub unsafe fn from_foreign(ptr: *mut c_void, scalar_type: ScalarType, len: usize, release: bool) -> Option<Self> {
        let ptr = NonNull::new(ptr)?;
        Some(Self { scalar_type, len, storage: Storage::Foreign { ptr, release: AtomicBool::new(release) } })
    }

    pub fn scalar_type(&self) -> ScalarType { self.scalar_type }
    pub fn len(&self) -> usize { self.len }
    pub fn is_empty(&self) -> bool { self.len == 0 }

    pub fn ownership(&self) -> BufferOwnership {
        match &self.storage {
            Storage::Owned(_) => BufferOwnership::Pipeline,
            Storage::Foreign { release, .. } if release.load(Ordering::Acquire) => BufferOwnership::Pipeline,
            Storage::Foreign { .. } => BufferOwnership::External,
        }
    }

    /// Moves responsibility for freeing foreign memory to (`true`) or away from
    /// (`false`) the pipeline. Every holder of this buffer sees the change, so the
    /// memory is freed at most once, when the last of them drops. Returns `false`
    /// for pipeline-allocated storage, which is left untouched.
    ///
    /// # Safety
    /// With `release == true` the memory must satisfy the transfer contract of
    /// [`ImageBuffer::from_raw_parts`]. With `false` the caller takes back the duty
    /// to free it.
    pub unsafe fn set_release(&self, release: bool) -> bool {
        match &self.storage {
            Storage::Owned(_) => false,
            Storage::Foreign { release: flag, .. } => {
                flag.store(release, Ordering::Release);
                true
            }
        }
    }

    /// Typed read access; `None` if `T` is not the buffer's scalar type.
    pub fn as_slice<T: Scalar>(&self) -> Option<&[T]> {
        if T::SCALAR_TYPE != self.scalar_type {
            return None;
        }
        Some(self.view::<T>())
    }

    /// Typed write access. Only pipeline-allocated `Vec` storage can be written;
    /// foreign memory is never mutated. Reaching `&mut self` on a published buffer
    /// requires exclusive ownership of its `Arc`.
    pub fn as_mut_slice<T: Scalar>(&mut self) -> Option<&mut [T]> {
        match &mut self.storage {
            Storage::Owned(any) => any.downcast_mut::<Vec<T>>().map(|v| v.as_mut_slice()),
            Storage::Foreign { .. } => None,
        }
    }

    // The caller has already matched `T` against `scalar_type`.
    fn view<T: Scalar>(&self) -> &[T] {
        match &self.storage {
            Storage::Owned(any) => any.downcast_ref::<Vec<T>>().map(|v| v.as_slice()).unwrap_or(&[]),
            // SAFETY: guaranteed by the `from_foreign` contract.
            Storage::Foreign { ptr, .. } => unsafe { slice::from_raw_parts(ptr.as_ptr() as *const T, self.len) },
        }
    }
}

impl Drop for ImageBuffer {
    fn drop(&mut self) {
        if let Storage::Foreign { ptr, release } = &mut self.storage {
            if *release.get_mut() {
                // SAFETY: ownership was transferred with a C-allocated pointer.
                unsafe { libc::free(ptr.as_ptr()) };
            }
        }
    }
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("scalar_type", &self.scalar_type)
            .field("len", &self.len)
            .field("ownership", &self.ownership())
            .finish()
    }
}
