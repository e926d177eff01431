//! libvips through `vips-sys`.

use super::{Engine, EngineVersion, ImageRefs, MemoryStats, RawHandle};
use crate::image::{BandFormat, Coding, ImageHandle, ImageHeader, Interpretation};
use crate::value::{PropertyType, PropertyValue};
use libc::{c_int, c_void, size_t};
use std::ffi::{CStr, CString};
use std::io::{self, Write};
use std::ptr;
use std::sync::Arc;
use vips_sys::*;

/// Engine backed by the linked libvips.
pub struct NativeEngine {
    refs: Arc<dyn ImageRefs>,
}

impl Default for NativeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeEngine {
    pub fn new() -> Self {
        Self {
            refs: Arc::new(GObjectRefs),
        }
    }
}

/// Take and clear the libvips error buffer.
fn take_error() -> String {
    unsafe {
        let buffer = vips_error_buffer();
        let message = if buffer.is_null() {
            String::new()
        } else {
            CStr::from_ptr(buffer).to_string_lossy().trim_end().to_string()
        };
        vips_error_clear();
        if message.is_empty() {
            "unknown libvips error".to_string()
        } else {
            message
        }
    }
}

fn to_cstring(value: &str) -> Result<CString, String> {
    CString::new(value).map_err(|_| format!("{:?} contains an interior NUL byte", value))
}

fn clamp_int(value: usize) -> c_int {
    c_int::try_from(value).unwrap_or(c_int::MAX)
}

/// An initialized `GValue`, unset on drop.
struct OwnedValue(GValue);

impl OwnedValue {
    unsafe fn new(g_type: GType) -> Self {
        let mut value = OwnedValue(GValue::default());
        g_value_init(&mut value.0, g_type);
        value
    }

    fn as_ptr(&self) -> *const GValue {
        &self.0
    }

    fn as_mut_ptr(&mut self) -> *mut GValue {
        &mut self.0
    }
}

impl Drop for OwnedValue {
    fn drop(&mut self) {
        unsafe { g_value_unset(&mut self.0) };
    }
}

/// Declared `GType` of a named argument, `None` when there is no such argument.
unsafe fn argument_gtype(operation: RawHandle, name: &CStr) -> Option<GType> {
    let mut pspec: *mut GParamSpec = ptr::null_mut();
    let mut class: *mut VipsArgumentClass = ptr::null_mut();
    let mut instance: *mut VipsArgumentInstance = ptr::null_mut();
    let status = vips_object_get_argument(
        operation.as_ptr::<VipsObject>(),
        name.as_ptr(),
        &mut pspec,
        &mut class,
        &mut instance,
    );
    if status != 0 || pspec.is_null() {
        vips_error_clear();
        return None;
    }
    Some((*pspec).value_type)
}

unsafe fn property_type(g_type: GType) -> PropertyType {
    if g_type == vips_image_get_type() {
        return PropertyType::Image;
    }
    if g_type == vips_blob_get_type() {
        return PropertyType::Blob;
    }
    if g_type == vips_array_double_get_type() {
        return PropertyType::DoubleArray;
    }
    match g_type_fundamental(g_type) {
        G_TYPE_INT => PropertyType::Int,
        G_TYPE_DOUBLE => PropertyType::Double,
        G_TYPE_BOOLEAN => PropertyType::Bool,
        G_TYPE_STRING => PropertyType::String,
        G_TYPE_ENUM => PropertyType::Enum,
        _ => {
            let name = g_type_name(g_type);
            let name = if name.is_null() {
                format!("GType {}", g_type)
            } else {
                CStr::from_ptr(name).to_string_lossy().into_owned()
            };
            PropertyType::Unsupported(name)
        }
    }
}

impl Engine for NativeEngine {
    fn name(&self) -> &'static str {
        "libvips"
    }

    fn version(&self) -> EngineVersion {
        let part = |flag| unsafe { u32::try_from(vips_version(flag)).unwrap_or(0) };
        EngineVersion::new(part(0), part(1), part(2))
    }

    fn init(&self, program_name: &str) -> Result<(), i32> {
        let name = CString::new(program_name).unwrap_or_default();
        match unsafe { vips_init(name.as_ptr()) } {
            0 => Ok(()),
            code => {
                tracing::error!(error = %take_error(), "vips_init failed");
                Err(code)
            }
        }
    }

    fn shutdown(&self) {
        unsafe { vips_shutdown() };
    }

    fn thread_shutdown(&self) {
        unsafe { vips_thread_shutdown() };
    }

    fn set_concurrency(&self, level: usize) {
        unsafe { vips_concurrency_set(clamp_int(level)) };
    }

    fn set_cache_max(&self, max_items: usize) {
        unsafe { vips_cache_set_max(clamp_int(max_items)) };
    }

    fn set_cache_max_mem(&self, max_bytes: usize) {
        unsafe { vips_cache_set_max_mem(max_bytes as size_t) };
    }

    fn set_leak_check(&self, enabled: bool) {
        unsafe { vips_leak_set(enabled as gboolean) };
    }

    fn set_cache_trace(&self, enabled: bool) {
        unsafe { vips_cache_set_trace(enabled as gboolean) };
    }

    fn cache_drop_all(&self) {
        unsafe { vips_cache_drop_all() };
    }

    fn memory(&self) -> MemoryStats {
        unsafe {
            MemoryStats {
                mem: vips_tracked_get_mem() as u64,
                mem_highwater: vips_tracked_get_mem_highwater() as u64,
                allocs: u64::try_from(vips_tracked_get_allocs()).unwrap_or(0),
            }
        }
    }

    fn dump_objects(&self, out: &mut dyn io::Write) -> io::Result<()> {
        // libvips prints the listing on stdout itself
        writeln!(out, "libvips object listing follows on stdout")?;
        out.flush()?;
        unsafe { vips_object_print_all() };
        Ok(())
    }

    fn operation_new(&self, name: &str) -> Option<RawHandle> {
        let name = CString::new(name).ok()?;
        let operation = unsafe { vips_operation_new(name.as_ptr()) };
        if operation.is_null() {
            unsafe { vips_error_clear() };
        }
        RawHandle::from_ptr(operation)
    }

    unsafe fn argument_type(&self, operation: RawHandle, name: &str) -> Option<PropertyType> {
        let name = CString::new(name).ok()?;
        argument_gtype(operation, &name).map(|t| property_type(t))
    }

    unsafe fn set_property(
        &self,
        operation: RawHandle,
        name: &str,
        value: &PropertyValue,
    ) -> Result<(), String> {
        let c_name = to_cstring(name)?;
        let g_type =
            argument_gtype(operation, &c_name).ok_or_else(|| format!("no argument named {}", name))?;
        let declared = property_type(g_type);
        if declared != value.property_type() {
            return Err(format!(
                "argument {} expects {}, got {}",
                name,
                declared,
                value.property_type()
            ));
        }

        let mut g_value = OwnedValue::new(g_type);
        let target = g_value.as_mut_ptr();
        match value {
            PropertyValue::Int(v) => g_value_set_int(target, *v),
            PropertyValue::Double(v) => g_value_set_double(target, *v),
            PropertyValue::Bool(v) => g_value_set_boolean(target, *v as gboolean),
            PropertyValue::String(v) => g_value_set_string(target, v.as_ptr()),
            PropertyValue::Enum(v) => g_value_set_enum(target, *v),
            PropertyValue::Blob(v) => {
                let blob = vips_blob_copy(v.as_ptr() as *const c_void, v.len() as size_t);
                g_value_set_boxed(target, blob as *const c_void);
                vips_area_unref(blob as *mut VipsArea);
            }
            PropertyValue::DoubleArray(v) => {
                let n = c_int::try_from(v.len()).map_err(|_| "double array too long".to_string())?;
                vips_value_set_array_double(target, v.as_ptr(), n);
            }
            PropertyValue::Image(image) => {
                g_value_set_object(target, image.raw().as_ptr::<c_void>());
            }
        }
        g_object_set_property(
            operation.as_ptr::<GObject>(),
            c_name.as_ptr(),
            g_value.as_ptr(),
        );
        Ok(())
    }

    unsafe fn build(&self, operation: &mut RawHandle) -> Result<(), String> {
        let mut raw = operation.as_ptr::<VipsOperation>();
        if vips_cache_operation_buildp(&mut raw) != 0 {
            return Err(take_error());
        }
        *operation = RawHandle::from_ptr(raw).ok_or_else(|| "cache returned a null operation".to_string())?;
        Ok(())
    }

    unsafe fn get_property(&self, operation: RawHandle, name: &str) -> Result<PropertyValue, String> {
        let c_name = to_cstring(name)?;
        let g_type =
            argument_gtype(operation, &c_name).ok_or_else(|| format!("no argument named {}", name))?;
        let mut g_value = OwnedValue::new(g_type);
        g_object_get_property(
            operation.as_ptr::<GObject>(),
            c_name.as_ptr(),
            g_value.as_mut_ptr(),
        );
        let source = g_value.as_ptr();

        Ok(match property_type(g_type) {
            PropertyType::Int => PropertyValue::Int(g_value_get_int(source)),
            PropertyType::Double => PropertyValue::Double(g_value_get_double(source)),
            PropertyType::Bool => PropertyValue::Bool(g_value_get_boolean(source) != GFALSE),
            PropertyType::Enum => PropertyValue::Enum(g_value_get_enum(source)),
            PropertyType::String => {
                let text = g_value_get_string(source);
                if text.is_null() {
                    return Err(format!("{} is not set", name));
                }
                PropertyValue::String(CStr::from_ptr(text).to_owned())
            }
            PropertyType::Blob => {
                let mut length: size_t = 0;
                let data = vips_value_get_blob(source, &mut length);
                if data.is_null() {
                    PropertyValue::Blob(Vec::new())
                } else {
                    PropertyValue::Blob(std::slice::from_raw_parts(data as *const u8, length).to_vec())
                }
            }
            PropertyType::DoubleArray => {
                let mut n: c_int = 0;
                let data = vips_value_get_array_double(source, &mut n);
                let len = usize::try_from(n).unwrap_or(0);
                if data.is_null() || len == 0 {
                    PropertyValue::DoubleArray(Vec::new())
                } else {
                    PropertyValue::DoubleArray(std::slice::from_raw_parts(data, len).to_vec())
                }
            }
            PropertyType::Image => {
                let object = g_value_get_object(source);
                let raw = RawHandle::from_ptr(object).ok_or_else(|| format!("{} is not set", name))?;
                g_object_ref(object);
                PropertyValue::Image(ImageHandle::from_owned(raw, Arc::clone(&self.refs)))
            }
            PropertyType::Unsupported(type_name) => {
                return Err(format!("{} has unsupported type {}", name, type_name));
            }
        })
    }

    unsafe fn unref_outputs(&self, operation: RawHandle) {
        vips_object_unref_outputs(operation.as_ptr::<VipsObject>());
    }

    unsafe fn unref(&self, operation: RawHandle) {
        g_object_unref(operation.as_ptr::<c_void>());
    }

    fn find_load(&self, filename: &str) -> Option<String> {
        let filename = CString::new(filename).ok()?;
        found(unsafe { vips_foreign_find_load(filename.as_ptr()) })
    }

    fn find_load_buffer(&self, data: &[u8]) -> Option<String> {
        found(unsafe { vips_foreign_find_load_buffer(data.as_ptr() as *const c_void, data.len() as size_t) })
    }

    fn find_save(&self, filename: &str) -> Option<String> {
        let filename = CString::new(filename).ok()?;
        found(unsafe { vips_foreign_find_save(filename.as_ptr()) })
    }

    fn find_save_buffer(&self, suffix: &str) -> Option<String> {
        let suffix = CString::new(suffix).ok()?;
        found(unsafe { vips_foreign_find_save_buffer(suffix.as_ptr()) })
    }
}

/// Name returned by a finder, clearing the error buffer on a miss.
fn found(name: *const libc::c_char) -> Option<String> {
    if name.is_null() {
        unsafe { vips_error_clear() };
        return None;
    }
    Some(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
}

/// Image references through GObject reference counting.
struct GObjectRefs;

impl ImageRefs for GObjectRefs {
    unsafe fn retain(&self, image: RawHandle) {
        g_object_ref(image.as_ptr::<c_void>());
    }

    unsafe fn release(&self, image: RawHandle) {
        g_object_unref(image.as_ptr::<c_void>());
    }

    unsafe fn header(&self, image: RawHandle) -> ImageHeader {
        let image = image.as_ptr::<VipsImage>() as *const VipsImage;
        ImageHeader {
            width: vips_image_get_width(image),
            height: vips_image_get_height(image),
            bands: vips_image_get_bands(image),
            xres: vips_image_get_xres(image),
            yres: vips_image_get_yres(image),
            xoffset: vips_image_get_xoffset(image),
            yoffset: vips_image_get_yoffset(image),
            format: BandFormat::from_raw(vips_image_get_format(image)),
            coding: Coding::from_raw(vips_image_get_coding(image)),
            interpretation: Interpretation::from_raw(vips_image_get_interpretation(image)),
        }
    }
}
