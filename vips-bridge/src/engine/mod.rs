//! The seam between the bridge and an engine implementation.
//!
//! The bridge never talks to libvips directly. Everything it needs from an
//! engine (lifecycle, reflective property access, the operation cache, memory
//! statistics, format discovery) goes through [`Engine`], and image handles keep
//! their objects alive through [`ImageRefs`].
//!
//! Two implementations ship with the crate:
//! - [`MemoryEngine`] - an in-process reference engine (always available)
//! - `NativeEngine` - libvips through `vips-sys` (feature `libvips`)

mod memory;
#[cfg(feature = "libvips")]
mod native;

pub use memory::MemoryEngine;
#[cfg(feature = "libvips")]
pub use native::NativeEngine;

use crate::image::ImageHeader;
use crate::value::{PropertyType, PropertyValue};
use serde::Serialize;
use std::fmt;
use std::io;
use std::sync::Arc;

/// An opaque token for an engine-owned object.
///
/// For the native engine this is the object pointer; other engines may use
/// any non-zero identifier. A `RawHandle` carries no ownership by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(usize);

impl RawHandle {
    /// Wrap a non-zero engine identifier.
    pub fn new(id: usize) -> Option<Self> {
        if id == 0 {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Wrap an object pointer, `None` for null.
    pub fn from_ptr<T>(ptr: *mut T) -> Option<Self> {
        Self::new(ptr as usize)
    }

    /// The raw identifier.
    pub fn id(self) -> usize {
        self.0
    }

    /// The identifier as an object pointer.
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

/// Version of the linked engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl EngineVersion {
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// Snapshot of the engine's tracked memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemoryStats {
    /// Bytes currently allocated.
    pub mem: u64,
    /// Highest value `mem` has reached.
    pub mem_highwater: u64,
    /// Number of live tracked allocations.
    pub allocs: u64,
}

/// Operations every engine backend provides.
///
/// Methods that take a [`RawHandle`] are `unsafe`: the handle must have been
/// produced by this engine and the caller must own a reference to it.
pub trait Engine: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Version of the engine implementation.
    fn version(&self) -> EngineVersion;

    /// Initialize the engine. `Err` carries the engine's status code.
    fn init(&self, program_name: &str) -> std::result::Result<(), i32>;

    /// Tear the engine down.
    fn shutdown(&self);

    /// Free per-thread caches owned by the calling thread.
    fn thread_shutdown(&self);

    fn set_concurrency(&self, level: usize);
    fn set_cache_max(&self, max_items: usize);
    fn set_cache_max_mem(&self, max_bytes: usize);
    fn set_leak_check(&self, enabled: bool);
    fn set_cache_trace(&self, enabled: bool);

    /// Evict every cached operation.
    fn cache_drop_all(&self);

    /// Tracked memory statistics.
    fn memory(&self) -> MemoryStats;

    /// Write a human-readable listing of live engine objects.
    fn dump_objects(&self, out: &mut dyn io::Write) -> io::Result<()>;

    /// Create a new operation with a reference count of one.
    fn operation_new(&self, name: &str) -> Option<RawHandle>;

    /// Declared type of a named argument of an operation.
    ///
    /// # Safety
    ///
    /// `operation` must be a live operation handle from this engine.
    unsafe fn argument_type(&self, operation: RawHandle, name: &str) -> Option<PropertyType>;

    /// Set a named input argument.
    ///
    /// # Safety
    ///
    /// `operation` must be a live operation handle from this engine.
    unsafe fn set_property(
        &self,
        operation: RawHandle,
        name: &str,
        value: &PropertyValue,
    ) -> std::result::Result<(), String>;

    /// Build the operation through the operation cache.
    ///
    /// On success the cache may have replaced `*operation` with an equivalent,
    /// already built operation; the caller then owns a reference to the
    /// replacement instead. On failure `*operation` is untouched.
    ///
    /// # Safety
    ///
    /// `*operation` must be a live operation handle from this engine that the
    /// caller owns a reference to.
    unsafe fn build(&self, operation: &mut RawHandle) -> std::result::Result<(), String>;

    /// Read a named argument. Image values come back with their own reference.
    ///
    /// # Safety
    ///
    /// `operation` must be a live operation handle from this engine.
    unsafe fn get_property(
        &self,
        operation: RawHandle,
        name: &str,
    ) -> std::result::Result<PropertyValue, String>;

    /// Drop references the operation holds on its output objects.
    ///
    /// # Safety
    ///
    /// `operation` must be a live operation handle from this engine.
    unsafe fn unref_outputs(&self, operation: RawHandle);

    /// Drop one reference to an operation.
    ///
    /// # Safety
    ///
    /// The caller must own the reference being dropped.
    unsafe fn unref(&self, operation: RawHandle);

    /// Loader operation for a file.
    fn find_load(&self, filename: &str) -> Option<String>;

    /// Loader operation for an in-memory buffer.
    fn find_load_buffer(&self, data: &[u8]) -> Option<String>;

    /// Saver operation for a file name.
    fn find_save(&self, filename: &str) -> Option<String>;

    /// Buffer saver operation for a file suffix such as `".png"`.
    fn find_save_buffer(&self, suffix: &str) -> Option<String>;
}

/// Reference counting and header access for engine-owned images.
pub trait ImageRefs: Send + Sync {
    /// Add one reference.
    ///
    /// # Safety
    ///
    /// `image` must be a live image handle from this engine.
    unsafe fn retain(&self, image: RawHandle);

    /// Drop one reference.
    ///
    /// # Safety
    ///
    /// The caller must own the reference being dropped.
    unsafe fn release(&self, image: RawHandle);

    /// Read the image header.
    ///
    /// # Safety
    ///
    /// `image` must be a live image handle from this engine.
    unsafe fn header(&self, image: RawHandle) -> ImageHeader;
}

/// The engine `Vips::global()` runs on.
#[cfg(feature = "libvips")]
pub fn default_engine() -> Arc<dyn Engine> {
    Arc::new(NativeEngine::new())
}

/// The engine `Vips::global()` runs on.
#[cfg(not(feature = "libvips"))]
pub fn default_engine() -> Arc<dyn Engine> {
    Arc::new(MemoryEngine::new())
}
