//! FFI bindings to libvips
//!
//! This crate declares the small slice of libvips (and of the GObject type and
//! property system underneath it) that is needed to drive operations by name:
//! library lifecycle, the operation cache, reflective argument lookup, `GValue`
//! marshaling, tracked-memory statistics and foreign loader/saver discovery.
//!
//! Everything here is `unsafe` and mirrors the C headers one to one. Use the
//! `vips-bridge` crate for a safe interface.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use libc::{c_char, c_double, c_int, c_uint, c_void, size_t};

// ========================================
// GLib / GObject
// ========================================

pub type gboolean = c_int;
pub type gpointer = *mut c_void;
pub type gchar = c_char;
pub type GType = size_t;

pub const GFALSE: gboolean = 0;
pub const GTRUE: gboolean = 1;

/// `G_TYPE_FUNDAMENTAL_SHIFT`
pub const G_TYPE_FUNDAMENTAL_SHIFT: GType = 2;

pub const G_TYPE_INVALID: GType = 0;
pub const G_TYPE_BOOLEAN: GType = 5 << G_TYPE_FUNDAMENTAL_SHIFT;
pub const G_TYPE_INT: GType = 6 << G_TYPE_FUNDAMENTAL_SHIFT;
pub const G_TYPE_UINT: GType = 7 << G_TYPE_FUNDAMENTAL_SHIFT;
pub const G_TYPE_INT64: GType = 10 << G_TYPE_FUNDAMENTAL_SHIFT;
pub const G_TYPE_UINT64: GType = 11 << G_TYPE_FUNDAMENTAL_SHIFT;
pub const G_TYPE_ENUM: GType = 12 << G_TYPE_FUNDAMENTAL_SHIFT;
pub const G_TYPE_FLAGS: GType = 13 << G_TYPE_FUNDAMENTAL_SHIFT;
pub const G_TYPE_DOUBLE: GType = 15 << G_TYPE_FUNDAMENTAL_SHIFT;
pub const G_TYPE_STRING: GType = 16 << G_TYPE_FUNDAMENTAL_SHIFT;
pub const G_TYPE_BOXED: GType = 18 << G_TYPE_FUNDAMENTAL_SHIFT;
pub const G_TYPE_OBJECT: GType = 20 << G_TYPE_FUNDAMENTAL_SHIFT;

/// Opaque `GObject` instance.
#[repr(C)]
pub struct GObject {
    _private: [u8; 0],
}

/// `GValue`: a type tag followed by two 64-bit data words.
///
/// Must be zeroed before `g_value_init` and released with `g_value_unset`.
#[repr(C)]
#[derive(Debug)]
pub struct GValue {
    pub g_type: GType,
    pub data: [u64; 2],
}

impl Default for GValue {
    fn default() -> Self {
        Self {
            g_type: G_TYPE_INVALID,
            data: [0; 2],
        }
    }
}

/// Leading public fields of `GParamSpec`.
///
/// Only ever accessed through pointers handed out by GObject.
#[repr(C)]
pub struct GParamSpec {
    pub g_type_instance: gpointer,
    pub name: *const gchar,
    pub flags: c_uint,
    pub value_type: GType,
    pub owner_type: GType,
}

extern "C" {
    pub fn g_object_ref(object: gpointer) -> gpointer;
    pub fn g_object_unref(object: gpointer);
    pub fn g_object_set_property(object: *mut GObject, name: *const gchar, value: *const GValue);
    pub fn g_object_get_property(object: *mut GObject, name: *const gchar, value: *mut GValue);

    pub fn g_value_init(value: *mut GValue, g_type: GType) -> *mut GValue;
    pub fn g_value_unset(value: *mut GValue);
    pub fn g_value_set_int(value: *mut GValue, v: c_int);
    pub fn g_value_get_int(value: *const GValue) -> c_int;
    pub fn g_value_set_double(value: *mut GValue, v: c_double);
    pub fn g_value_get_double(value: *const GValue) -> c_double;
    pub fn g_value_set_boolean(value: *mut GValue, v: gboolean);
    pub fn g_value_get_boolean(value: *const GValue) -> gboolean;
    pub fn g_value_set_string(value: *mut GValue, v: *const gchar);
    pub fn g_value_get_string(value: *const GValue) -> *const gchar;
    pub fn g_value_set_enum(value: *mut GValue, v: c_int);
    pub fn g_value_get_enum(value: *const GValue) -> c_int;
    pub fn g_value_set_object(value: *mut GValue, v: gpointer);
    pub fn g_value_get_object(value: *const GValue) -> gpointer;
    pub fn g_value_set_boxed(value: *mut GValue, v: *const c_void);

    pub fn g_type_fundamental(type_id: GType) -> GType;
    pub fn g_type_name(type_id: GType) -> *const gchar;
}

// ========================================
// libvips
// ========================================

/// Opaque `VipsObject`.
#[repr(C)]
pub struct VipsObject {
    _private: [u8; 0],
}

/// Opaque `VipsOperation`.
#[repr(C)]
pub struct VipsOperation {
    _private: [u8; 0],
}

/// Opaque `VipsImage`.
#[repr(C)]
pub struct VipsImage {
    _private: [u8; 0],
}

/// Opaque `VipsArea`, the refcounted base of blobs and arrays.
#[repr(C)]
pub struct VipsArea {
    _private: [u8; 0],
}

/// Opaque `VipsBlob`.
#[repr(C)]
pub struct VipsBlob {
    _private: [u8; 0],
}

/// Opaque `VipsArgumentClass`.
#[repr(C)]
pub struct VipsArgumentClass {
    _private: [u8; 0],
}

/// Opaque `VipsArgumentInstance`.
#[repr(C)]
pub struct VipsArgumentInstance {
    _private: [u8; 0],
}

extern "C" {
    // Lifecycle
    pub fn vips_init(argv0: *const c_char) -> c_int;
    pub fn vips_shutdown();
    pub fn vips_thread_shutdown();
    pub fn vips_version(flag: c_int) -> c_int;

    // Configuration
    pub fn vips_concurrency_set(concurrency: c_int);
    pub fn vips_cache_set_max(max: c_int);
    pub fn vips_cache_set_max_mem(max_mem: size_t);
    pub fn vips_cache_set_trace(trace: gboolean);
    pub fn vips_leak_set(leak: gboolean);

    // Operation cache
    pub fn vips_cache_operation_buildp(operation: *mut *mut VipsOperation) -> c_int;
    pub fn vips_cache_drop_all();

    // Objects and arguments
    pub fn vips_operation_new(name: *const c_char) -> *mut VipsOperation;
    pub fn vips_object_unref_outputs(object: *mut VipsObject);
    pub fn vips_object_get_argument(
        object: *mut VipsObject,
        name: *const c_char,
        pspec: *mut *mut GParamSpec,
        argument_class: *mut *mut VipsArgumentClass,
        argument_instance: *mut *mut VipsArgumentInstance,
    ) -> c_int;
    pub fn vips_object_print_all();

    // Errors
    pub fn vips_error_buffer() -> *const c_char;
    pub fn vips_error_clear();

    // Boxed values
    pub fn vips_blob_copy(data: *const c_void, length: size_t) -> *mut VipsBlob;
    pub fn vips_area_unref(area: *mut VipsArea);
    pub fn vips_value_get_blob(value: *const GValue, length: *mut size_t) -> *mut c_void;
    pub fn vips_value_set_array_double(value: *mut GValue, array: *const c_double, n: c_int);
    pub fn vips_value_get_array_double(value: *const GValue, n: *mut c_int) -> *mut c_double;
    pub fn vips_blob_get_type() -> GType;
    pub fn vips_array_double_get_type() -> GType;
    pub fn vips_image_get_type() -> GType;

    // Tracked memory
    pub fn vips_tracked_get_mem() -> size_t;
    pub fn vips_tracked_get_mem_highwater() -> size_t;
    pub fn vips_tracked_get_allocs() -> c_int;

    // Foreign format discovery
    pub fn vips_foreign_find_load(filename: *const c_char) -> *const c_char;
    pub fn vips_foreign_find_load_buffer(data: *const c_void, size: size_t) -> *const c_char;
    pub fn vips_foreign_find_save(filename: *const c_char) -> *const c_char;
    pub fn vips_foreign_find_save_buffer(suffix: *const c_char) -> *const c_char;

    // Image header
    pub fn vips_image_get_width(image: *const VipsImage) -> c_int;
    pub fn vips_image_get_height(image: *const VipsImage) -> c_int;
    pub fn vips_image_get_bands(image: *const VipsImage) -> c_int;
    pub fn vips_image_get_format(image: *const VipsImage) -> c_int;
    pub fn vips_image_get_coding(image: *const VipsImage) -> c_int;
    pub fn vips_image_get_interpretation(image: *const VipsImage) -> c_int;
    pub fn vips_image_get_xres(image: *const VipsImage) -> c_double;
    pub fn vips_image_get_yres(image: *const VipsImage) -> c_double;
    pub fn vips_image_get_xoffset(image: *const VipsImage) -> c_int;
    pub fn vips_image_get_yoffset(image: *const VipsImage) -> c_int;
}
