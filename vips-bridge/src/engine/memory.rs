//! In-process reference engine.
//!
//! `MemoryEngine` implements the same object model libvips exposes to the
//! bridge: reference-counted operations and images, a reflective argument
//! schema per operation, a deduplicating operation cache, per-thread scratch
//! buffers and tracked allocation statistics. Its registry holds `black`,
//! `copy`, `avg` and a header-only PNG loader, enough to exercise every path of
//! the bridge without a native library.
//!
//! The format table answers the finders the way libvips does, with foreign
//! class names such as `VipsForeignLoadJpegFile`. It recognizes JPEG and PNG
//! but only the PNG loaders are runnable; nothing here decodes pixels.
//!
//! All state lives behind one mutex. Image handles handed out to callers point
//! back at the shared state; they must never be dropped while the lock is held.

use super::{Engine, EngineVersion, ImageRefs, MemoryStats, RawHandle};
use crate::image::{BandFormat, ImageHandle, ImageHeader, Interpretation};
use crate::value::{PropertyType, PropertyValue};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ffi::CString;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

/// Version the reference engine reports unless overridden.
const DEFAULT_VERSION: EngineVersion = EngineVersion::new(8, 15, 1);

/// Bytes of scratch memory a thread acquires on its first computation.
const SCRATCH_BYTES: usize = 64 * 1024;

/// Largest image, in band elements, the engine materializes.
const MAX_SAMPLES: usize = 1 << 26;

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];

type RunResult = std::result::Result<Vec<(&'static str, Stored)>, String>;

// ========================================
// Registry
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgType {
    Int,
    Double,
    Bool,
    String,
    Enum,
    Blob,
    DoubleArray,
    Image,
}

impl ArgType {
    fn property_type(self) -> PropertyType {
        match self {
            ArgType::Int => PropertyType::Int,
            ArgType::Double => PropertyType::Double,
            ArgType::Bool => PropertyType::Bool,
            ArgType::String => PropertyType::String,
            ArgType::Enum => PropertyType::Enum,
            ArgType::Blob => PropertyType::Blob,
            ArgType::DoubleArray => PropertyType::DoubleArray,
            ArgType::Image => PropertyType::Image,
        }
    }
}

struct ArgDef {
    name: &'static str,
    ty: ArgType,
    output: bool,
    required: bool,
}

const fn input(name: &'static str, ty: ArgType) -> ArgDef {
    ArgDef {
        name,
        ty,
        output: false,
        required: true,
    }
}

const fn optional(name: &'static str, ty: ArgType) -> ArgDef {
    ArgDef {
        name,
        ty,
        output: false,
        required: false,
    }
}

const fn output(name: &'static str, ty: ArgType) -> ArgDef {
    ArgDef {
        name,
        ty,
        output: true,
        required: true,
    }
}

struct OperationDef {
    name: &'static str,
    /// GObject class name; operations may be looked up by either name.
    class: &'static str,
    args: &'static [ArgDef],
    /// Side-effecting or file-reading operations bypass the cache.
    cacheable: bool,
    run: fn(&mut State, &Args<'_>) -> RunResult,
}

impl OperationDef {
    fn arg(&self, name: &str) -> Option<&'static ArgDef> {
        self.args.iter().find(|a| a.name == name)
    }
}

static REGISTRY: &[OperationDef] = &[
    OperationDef {
        name: "black",
        class: "VipsBlack",
        args: &[
            input("width", ArgType::Int),
            input("height", ArgType::Int),
            optional("bands", ArgType::Int),
            output("out", ArgType::Image),
        ],
        cacheable: true,
        run: run_black,
    },
    OperationDef {
        name: "copy",
        class: "VipsCopy",
        args: &[
            input("in", ArgType::Image),
            optional("interpretation", ArgType::Enum),
            optional("xres", ArgType::Double),
            optional("yres", ArgType::Double),
            optional("xoffset", ArgType::Int),
            optional("yoffset", ArgType::Int),
            output("out", ArgType::Image),
        ],
        cacheable: true,
        run: run_copy,
    },
    OperationDef {
        name: "avg",
        class: "VipsAvg",
        args: &[input("in", ArgType::Image), output("out", ArgType::Double)],
        cacheable: true,
        run: run_avg,
    },
    OperationDef {
        name: "pngload",
        class: "VipsForeignLoadPngFile",
        args: &[input("filename", ArgType::String), output("out", ArgType::Image)],
        cacheable: false,
        run: run_pngload,
    },
    OperationDef {
        name: "pngload_buffer",
        class: "VipsForeignLoadPngBuffer",
        args: &[input("buffer", ArgType::Blob), output("out", ArgType::Image)],
        cacheable: true,
        run: run_pngload_buffer,
    },
];

fn lookup(name: &str) -> Option<&'static OperationDef> {
    REGISTRY.iter().find(|d| d.name == name || d.class == name)
}

// ========================================
// Object model
// ========================================

/// A property value as held by an operation. Images are object ids whose
/// references are counted in the state, not through `ImageHandle`.
#[derive(Debug, Clone, PartialEq)]
enum Stored {
    Int(i32),
    Double(f64),
    Bool(bool),
    String(CString),
    Enum(i32),
    Blob(Vec<u8>),
    DoubleArray(Vec<f64>),
    Image(usize),
}

impl Stored {
    fn arg_type(&self) -> ArgType {
        match self {
            Stored::Int(_) => ArgType::Int,
            Stored::Double(_) => ArgType::Double,
            Stored::Bool(_) => ArgType::Bool,
            Stored::String(_) => ArgType::String,
            Stored::Enum(_) => ArgType::Enum,
            Stored::Blob(_) => ArgType::Blob,
            Stored::DoubleArray(_) => ArgType::DoubleArray,
            Stored::Image(_) => ArgType::Image,
        }
    }

    fn image_id(&self) -> Option<usize> {
        match self {
            Stored::Image(id) => Some(*id),
            _ => None,
        }
    }
}

struct OperationObject {
    def: &'static OperationDef,
    args: BTreeMap<&'static str, Stored>,
    built: bool,
}

struct ImageObject {
    header: ImageHeader,
    /// `None` for header-only images produced by the sniffing loaders.
    pixels: Option<Arc<Vec<f64>>>,
}

impl ImageObject {
    fn tracked_bytes(&self) -> usize {
        self.pixels.as_ref().map_or(0, |pixels| {
            pixels.len().saturating_mul(self.header.format.element_size())
        })
    }
}

enum Body {
    Operation(OperationObject),
    Image(ImageObject),
}

struct Object {
    refs: u32,
    body: Body,
}

struct CacheEntry {
    key: Vec<(&'static str, Stored)>,
    operation: usize,
}

struct Settings {
    concurrency: usize,
    cache_max: usize,
    cache_max_mem: usize,
    leak_check: bool,
    cache_trace: bool,
}

struct State {
    initialized: bool,
    next_id: usize,
    objects: HashMap<usize, Object>,
    /// Most recently used first.
    cache: VecDeque<CacheEntry>,
    scratch: HashMap<ThreadId, usize>,
    mem_highwater: u64,
    settings: Settings,
}

impl State {
    fn new() -> Self {
        Self {
            initialized: false,
            next_id: 1,
            objects: HashMap::new(),
            cache: VecDeque::new(),
            scratch: HashMap::new(),
            mem_highwater: 0,
            settings: Settings {
                concurrency: 1,
                cache_max: 1000,
                cache_max_mem: 100 * 1024 * 1024,
                leak_check: false,
                cache_trace: false,
            },
        }
    }

    fn insert(&mut self, body: Body) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, Object { refs: 1, body });
        self.note_usage();
        id
    }

    fn new_image(&mut self, header: ImageHeader, pixels: Option<Vec<f64>>) -> usize {
        self.insert(Body::Image(ImageObject {
            header,
            pixels: pixels.map(Arc::new),
        }))
    }

    fn retain(&mut self, id: usize) {
        if let Some(object) = self.objects.get_mut(&id) {
            object.refs += 1;
        }
    }

    /// Drop one reference, freeing objects whose count reaches zero along with
    /// the references they hold.
    fn unref(&mut self, id: usize) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(object) = self.objects.get_mut(&id) else {
                continue;
            };
            object.refs = object.refs.saturating_sub(1);
            if object.refs > 0 {
                continue;
            }
            if let Some(Object {
                body: Body::Operation(operation),
                ..
            }) = self.objects.remove(&id)
            {
                pending.extend(operation.args.values().filter_map(Stored::image_id));
            }
        }
    }

    fn operation(&self, id: usize) -> std::result::Result<&OperationObject, String> {
        match self.objects.get(&id) {
            Some(Object {
                body: Body::Operation(operation),
                ..
            }) => Ok(operation),
            _ => Err(format!("object {} is not a live operation", id)),
        }
    }

    fn operation_mut(&mut self, id: usize) -> std::result::Result<&mut OperationObject, String> {
        match self.objects.get_mut(&id) {
            Some(Object {
                body: Body::Operation(operation),
                ..
            }) => Ok(operation),
            _ => Err(format!("object {} is not a live operation", id)),
        }
    }

    fn image(&self, id: usize) -> Option<&ImageObject> {
        match self.objects.get(&id) {
            Some(Object {
                body: Body::Image(image),
                ..
            }) => Some(image),
            _ => None,
        }
    }

    fn current_mem(&self) -> u64 {
        let pixels: usize = self
            .objects
            .values()
            .map(|o| match &o.body {
                Body::Image(image) => image.tracked_bytes(),
                Body::Operation(_) => 0,
            })
            .sum();
        let scratch: usize = self.scratch.values().sum();
        (pixels + scratch) as u64
    }

    fn note_usage(&mut self) {
        self.mem_highwater = self.mem_highwater.max(self.current_mem());
    }

    fn acquire_scratch(&mut self) {
        self.scratch
            .entry(thread::current().id())
            .or_insert(SCRATCH_BYTES);
        self.note_usage();
    }

    fn cache_bytes(&self) -> usize {
        self.cache
            .iter()
            .filter_map(|entry| self.operation(entry.operation).ok())
            .flat_map(|operation| {
                operation
                    .def
                    .args
                    .iter()
                    .filter(|a| a.output)
                    .filter_map(|a| operation.args.get(a.name))
            })
            .filter_map(|stored| stored.image_id().and_then(|id| self.image(id)))
            .map(ImageObject::tracked_bytes)
            .sum()
    }

    fn trim_cache(&mut self) {
        while self.cache.len() > self.settings.cache_max
            || (!self.cache.is_empty() && self.cache_bytes() > self.settings.cache_max_mem)
        {
            if let Some(entry) = self.cache.pop_back() {
                self.unref(entry.operation);
            }
        }
    }

    fn drop_cache(&mut self) {
        while let Some(entry) = self.cache.pop_front() {
            self.unref(entry.operation);
        }
    }

    fn cache_key(operation: &OperationObject) -> Vec<(&'static str, Stored)> {
        operation
            .def
            .args
            .iter()
            .filter(|a| !a.output)
            .filter_map(|a| operation.args.get(a.name).map(|v| (a.name, v.clone())))
            .collect()
    }

    /// Build `*id`, possibly replacing it with an equal cached operation.
    fn build(&mut self, id: &mut usize) -> std::result::Result<(), String> {
        let operation = self.operation(*id)?;
        if operation.built {
            return Ok(());
        }
        let def = operation.def;
        if let Some(missing) = def
            .args
            .iter()
            .find(|a| a.required && !a.output && !operation.args.contains_key(a.name))
        {
            return Err(format!("{}: parameter {} not set", def.name, missing.name));
        }

        let key = Self::cache_key(operation);
        let values = operation.args.clone();
        if def.cacheable {
            if let Some(position) = self.cache.iter().position(|entry| {
                self.operation(entry.operation)
                    .map(|cached| cached.def.name == def.name)
                    .unwrap_or(false)
                    && entry.key == key
            }) {
                if let Some(entry) = self.cache.remove(position) {
                    let cached = entry.operation;
                    self.cache.push_front(entry);
                    if self.settings.cache_trace {
                        tracing::debug!(operation = def.name, "operation cache hit");
                    }
                    self.retain(cached);
                    self.unref(*id);
                    *id = cached;
                    return Ok(());
                }
            }
        }

        let args = Args {
            operation: def.name,
            values,
        };
        self.acquire_scratch();
        let outputs = (def.run)(self, &args)?;

        let operation = self.operation_mut(*id)?;
        let mut replaced = Vec::new();
        for (name, value) in outputs {
            replaced.extend(operation.args.insert(name, value).and_then(|p| p.image_id()));
        }
        operation.built = true;
        for image in replaced {
            self.unref(image);
        }
        self.note_usage();

        if def.cacheable {
            if self.settings.cache_trace {
                tracing::debug!(operation = def.name, "operation cache miss");
            }
            self.retain(*id);
            self.cache.push_front(CacheEntry {
                key,
                operation: *id,
            });
            self.trim_cache();
        }
        Ok(())
    }
}

// ========================================
// Engine
// ========================================

struct Shared {
    state: Mutex<State>,
    version: EngineVersion,
    init_status: i32,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Reference engine running entirely in this process.
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("version", &self.shared.version)
            .finish()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::from_parts(DEFAULT_VERSION, 0)
    }

    /// An engine that reports `version`.
    pub fn with_version(version: EngineVersion) -> Self {
        Self::from_parts(version, 0)
    }

    /// An engine whose initialization fails with `code`.
    pub fn failing_init(code: i32) -> Self {
        Self::from_parts(DEFAULT_VERSION, code)
    }

    fn from_parts(version: EngineVersion, init_status: i32) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::new()),
                version,
                init_status,
            }),
        }
    }

    /// Number of operations currently held by the operation cache.
    pub fn cached_operations(&self) -> usize {
        self.shared.lock().cache.len()
    }

    /// Names of every operation in the registry.
    pub fn operation_names() -> impl Iterator<Item = &'static str> {
        REGISTRY.iter().map(|d| d.name)
    }

    fn refs(&self) -> Arc<dyn ImageRefs> {
        self.shared.clone()
    }
}

impl Engine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn version(&self) -> EngineVersion {
        self.shared.version
    }

    fn init(&self, program_name: &str) -> std::result::Result<(), i32> {
        if self.shared.init_status != 0 {
            return Err(self.shared.init_status);
        }
        let mut state = self.shared.lock();
        if !state.initialized {
            tracing::trace!(program = program_name, "memory engine initialized");
            state.initialized = true;
        }
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.shared.lock();
        state.drop_cache();
        state.scratch.clear();
        if state.settings.leak_check && !state.objects.is_empty() {
            let operations = state
                .objects
                .values()
                .filter(|o| matches!(o.body, Body::Operation(_)))
                .count();
            tracing::warn!(
                objects = state.objects.len(),
                operations,
                images = state.objects.len() - operations,
                "objects alive at shutdown"
            );
        }
        state.initialized = false;
    }

    fn thread_shutdown(&self) {
        self.shared.lock().scratch.remove(&thread::current().id());
    }

    fn set_concurrency(&self, level: usize) {
        self.shared.lock().settings.concurrency = level;
    }

    fn set_cache_max(&self, max_items: usize) {
        let mut state = self.shared.lock();
        state.settings.cache_max = max_items;
        state.trim_cache();
    }

    fn set_cache_max_mem(&self, max_bytes: usize) {
        let mut state = self.shared.lock();
        state.settings.cache_max_mem = max_bytes;
        state.trim_cache();
    }

    fn set_leak_check(&self, enabled: bool) {
        self.shared.lock().settings.leak_check = enabled;
    }

    fn set_cache_trace(&self, enabled: bool) {
        self.shared.lock().settings.cache_trace = enabled;
    }

    fn cache_drop_all(&self) {
        self.shared.lock().drop_cache();
    }

    fn memory(&self) -> MemoryStats {
        let mut state = self.shared.lock();
        state.note_usage();
        MemoryStats {
            mem: state.current_mem(),
            mem_highwater: state.mem_highwater,
            allocs: (state.objects.len() + state.scratch.len()) as u64,
        }
    }

    fn dump_objects(&self, out: &mut dyn io::Write) -> io::Result<()> {
        let listing = {
            let state = self.shared.lock();
            let mut ids: Vec<_> = state.objects.keys().copied().collect();
            ids.sort_unstable();
            let mut listing = String::new();
            for id in ids {
                let Some(object) = state.objects.get(&id) else {
                    continue;
                };
                // Writing to a String cannot fail
                let _ = match &object.body {
                    Body::Operation(operation) => writeln!(
                        listing,
                        "{}: VipsOperation {} built={} refs={}",
                        id, operation.def.name, operation.built, object.refs
                    ),
                    Body::Image(image) => writeln!(
                        listing,
                        "{}: VipsImage {}x{} bands={} format={:?} refs={}",
                        id,
                        image.header.width,
                        image.header.height,
                        image.header.bands,
                        image.header.format,
                        object.refs
                    ),
                };
            }
            let _ = writeln!(
                listing,
                "{} objects, {} cached operations, concurrency {}",
                state.objects.len(),
                state.cache.len(),
                state.settings.concurrency
            );
            listing
        };
        io::Write::write_all(out, listing.as_bytes())
    }

    fn operation_new(&self, name: &str) -> Option<RawHandle> {
        let def = lookup(name)?;
        let id = self.shared.lock().insert(Body::Operation(OperationObject {
            def,
            args: BTreeMap::new(),
            built: false,
        }));
        RawHandle::new(id)
    }

    unsafe fn argument_type(&self, operation: RawHandle, name: &str) -> Option<PropertyType> {
        let state = self.shared.lock();
        let operation = state.operation(operation.id()).ok()?;
        operation.def.arg(name).map(|a| a.ty.property_type())
    }

    unsafe fn set_property(
        &self,
        operation: RawHandle,
        name: &str,
        value: &PropertyValue,
    ) -> std::result::Result<(), String> {
        let mut state = self.shared.lock();
        let def = state.operation(operation.id())?.def;
        let arg = def
            .arg(name)
            .ok_or_else(|| format!("{}: no argument named {}", def.name, name))?;
        if arg.output {
            return Err(format!("{}: {} is an output argument", def.name, name));
        }

        let stored = match value {
            PropertyValue::Int(v) => Stored::Int(*v),
            PropertyValue::Double(v) => Stored::Double(*v),
            PropertyValue::Bool(v) => Stored::Bool(*v),
            PropertyValue::String(v) => Stored::String(v.clone()),
            PropertyValue::Enum(v) => Stored::Enum(*v),
            PropertyValue::Blob(v) => Stored::Blob(v.clone()),
            PropertyValue::DoubleArray(v) => Stored::DoubleArray(v.clone()),
            PropertyValue::Image(image) => {
                let id = image.raw().id();
                if state.image(id).is_none() {
                    return Err(format!("{}: {} is not a live image", def.name, name));
                }
                Stored::Image(id)
            }
        };
        if stored.arg_type() != arg.ty {
            return Err(format!(
                "{}: argument {} expects {}, got {}",
                def.name,
                name,
                arg.ty.property_type(),
                value.property_type()
            ));
        }

        let target = state.operation(operation.id())?;
        if target.built {
            return Err(format!("{}: operation already built", def.name));
        }
        if let Some(id) = stored.image_id() {
            state.retain(id);
        }
        let previous = state.operation_mut(operation.id())?.args.insert(arg.name, stored);
        if let Some(id) = previous.as_ref().and_then(Stored::image_id) {
            state.unref(id);
        }
        Ok(())
    }

    unsafe fn build(&self, operation: &mut RawHandle) -> std::result::Result<(), String> {
        let mut id = operation.id();
        self.shared.lock().build(&mut id)?;
        if let Some(raw) = RawHandle::new(id) {
            *operation = raw;
        }
        Ok(())
    }

    unsafe fn get_property(
        &self,
        operation: RawHandle,
        name: &str,
    ) -> std::result::Result<PropertyValue, String> {
        let mut state = self.shared.lock();
        let target = state.operation(operation.id())?;
        let def = target.def;
        let stored = target
            .args
            .get(name)
            .cloned()
            .ok_or_else(|| format!("{}: parameter {} not set", def.name, name))?;

        Ok(match stored {
            Stored::Int(v) => PropertyValue::Int(v),
            Stored::Double(v) => PropertyValue::Double(v),
            Stored::Bool(v) => PropertyValue::Bool(v),
            Stored::String(v) => PropertyValue::String(v),
            Stored::Enum(v) => PropertyValue::Enum(v),
            Stored::Blob(v) => PropertyValue::Blob(v),
            Stored::DoubleArray(v) => PropertyValue::DoubleArray(v),
            Stored::Image(id) => {
                let raw = RawHandle::new(id)
                    .ok_or_else(|| format!("{}: {} holds a null image", def.name, name))?;
                state.retain(id);
                drop(state);
                // SAFETY: the reference taken above is handed to the handle.
                PropertyValue::Image(unsafe { ImageHandle::from_owned(raw, self.refs()) })
            }
        })
    }

    unsafe fn unref_outputs(&self, operation: RawHandle) {
        let mut state = self.shared.lock();
        let Ok(target) = state.operation_mut(operation.id()) else {
            return;
        };
        let def = target.def;
        let released: Vec<usize> = def
            .args
            .iter()
            .filter(|a| a.output)
            .filter_map(|a| target.args.remove(a.name))
            .filter_map(|stored| stored.image_id())
            .collect();
        for id in released {
            state.unref(id);
        }
    }

    unsafe fn unref(&self, operation: RawHandle) {
        self.shared.lock().unref(operation.id());
    }

    fn find_load(&self, filename: &str) -> Option<String> {
        let head = read_head(Path::new(filename))?;
        sniff(&head).map(|format| format.load.to_string())
    }

    fn find_load_buffer(&self, data: &[u8]) -> Option<String> {
        sniff(data).map(|format| format.load_buffer.to_string())
    }

    fn find_save(&self, filename: &str) -> Option<String> {
        by_suffix(filename).map(|format| format.save.to_string())
    }

    fn find_save_buffer(&self, suffix: &str) -> Option<String> {
        by_suffix(suffix).map(|format| format.save_buffer.to_string())
    }
}

impl ImageRefs for Shared {
    unsafe fn retain(&self, image: RawHandle) {
        self.lock().retain(image.id());
    }

    unsafe fn release(&self, image: RawHandle) {
        self.lock().unref(image.id());
    }

    unsafe fn header(&self, image: RawHandle) -> ImageHeader {
        self.lock()
            .image(image.id())
            .map(|i| i.header)
            .unwrap_or_else(|| ImageHeader::new(0, 0, 0, BandFormat::Notset))
    }
}

// ========================================
// Format table
// ========================================

/// One foreign format as the finders see it.
struct Format {
    magic: &'static [u8],
    suffixes: &'static [&'static str],
    load: &'static str,
    load_buffer: &'static str,
    save: &'static str,
    save_buffer: &'static str,
}

static FORMATS: &[Format] = &[
    Format {
        magic: JPEG_MAGIC,
        suffixes: &["jpg", "jpeg", "jpe"],
        load: "VipsForeignLoadJpegFile",
        load_buffer: "VipsForeignLoadJpegBuffer",
        save: "VipsForeignSaveJpegFile",
        save_buffer: "VipsForeignSaveJpegBuffer",
    },
    Format {
        magic: PNG_MAGIC,
        suffixes: &["png"],
        load: "VipsForeignLoadPngFile",
        load_buffer: "VipsForeignLoadPngBuffer",
        save: "VipsForeignSavePngFile",
        save_buffer: "VipsForeignSavePngBuffer",
    },
];

fn read_head(path: &Path) -> Option<Vec<u8>> {
    const HEAD: u64 = 64;
    let mut head = Vec::new();
    File::open(path).ok()?.take(HEAD).read_to_end(&mut head).ok()?;
    Some(head)
}

fn sniff(data: &[u8]) -> Option<&'static Format> {
    FORMATS.iter().find(|format| data.starts_with(format.magic))
}

/// Format for a file name or a bare suffix, ignoring any `[options]`.
fn by_suffix(name: &str) -> Option<&'static Format> {
    let name = name.split('[').next().unwrap_or(name);
    let suffix = match name.rfind('.') {
        Some(dot) => &name[dot + 1..],
        None => name,
    };
    FORMATS
        .iter()
        .find(|format| format.suffixes.iter().any(|s| s.eq_ignore_ascii_case(suffix)))
}

/// Header from a PNG `IHDR` chunk.
fn png_header(data: &[u8]) -> Option<ImageHeader> {
    if !data.starts_with(PNG_MAGIC) || data.get(12..16)? != b"IHDR" {
        return None;
    }
    let ihdr = data.get(16..26)?;
    let width = i32::try_from(u32::from_be_bytes([ihdr[0], ihdr[1], ihdr[2], ihdr[3]])).ok()?;
    let height = i32::try_from(u32::from_be_bytes([ihdr[4], ihdr[5], ihdr[6], ihdr[7]])).ok()?;
    let bands = match ihdr[9] {
        0 => 1,
        2 | 3 => 3,
        4 => 2,
        6 => 4,
        _ => return None,
    };
    let format = if ihdr[8] == 16 {
        BandFormat::Ushort
    } else {
        BandFormat::Uchar
    };
    Some(ImageHeader::new(width, height, bands, format))
}

// ========================================
// Operation implementations
// ========================================

/// Input values of one build, copied out of the operation.
struct Args<'a> {
    operation: &'a str,
    values: BTreeMap<&'static str, Stored>,
}

impl Args<'_> {
    fn missing(&self, name: &str) -> String {
        format!("{}: parameter {} not set", self.operation, name)
    }

    fn int(&self, name: &str) -> Option<i32> {
        match self.values.get(name) {
            Some(Stored::Int(v)) => Some(*v),
            _ => None,
        }
    }

    fn require_int(&self, name: &str) -> std::result::Result<i32, String> {
        self.int(name).ok_or_else(|| self.missing(name))
    }

    fn double(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(Stored::Double(v)) => Some(*v),
            _ => None,
        }
    }

    fn enumeration(&self, name: &str) -> Option<i32> {
        match self.values.get(name) {
            Some(Stored::Enum(v)) => Some(*v),
            _ => None,
        }
    }

    fn string(&self, name: &str) -> std::result::Result<String, String> {
        match self.values.get(name) {
            Some(Stored::String(v)) => Ok(v.to_string_lossy().into_owned()),
            _ => Err(self.missing(name)),
        }
    }

    fn blob(&self, name: &str) -> std::result::Result<&[u8], String> {
        match self.values.get(name) {
            Some(Stored::Blob(v)) => Ok(v),
            _ => Err(self.missing(name)),
        }
    }

    fn image<'s>(&self, state: &'s State, name: &str) -> std::result::Result<&'s ImageObject, String> {
        match self.values.get(name) {
            Some(Stored::Image(id)) => state
                .image(*id)
                .ok_or_else(|| format!("{}: {} is not a live image", self.operation, name)),
            _ => Err(self.missing(name)),
        }
    }
}

fn run_black(state: &mut State, args: &Args<'_>) -> RunResult {
    let width = args.require_int("width")?;
    let height = args.require_int("height")?;
    let bands = args.int("bands").unwrap_or(1);
    if width <= 0 || height <= 0 || bands <= 0 {
        return Err("black: width, height and bands must be positive".to_string());
    }
    let header = ImageHeader::new(width, height, bands, BandFormat::Uchar);
    let samples = header
        .sample_count()
        .filter(|&n| n <= MAX_SAMPLES)
        .ok_or_else(|| format!("black: image too large ({}x{}x{})", width, height, bands))?;
    let out = state.new_image(header, Some(vec![0.0; samples]));
    Ok(vec![("out", Stored::Image(out))])
}

fn run_copy(state: &mut State, args: &Args<'_>) -> RunResult {
    let source = args.image(state, "in")?;
    let mut header = source.header;
    let pixels = source.pixels.clone();
    if let Some(interpretation) = args.enumeration("interpretation") {
        header.interpretation = Interpretation::from_raw(interpretation);
    }
    if let Some(xres) = args.double("xres") {
        header.xres = xres;
    }
    if let Some(yres) = args.double("yres") {
        header.yres = yres;
    }
    if let Some(xoffset) = args.int("xoffset") {
        header.xoffset = xoffset;
    }
    if let Some(yoffset) = args.int("yoffset") {
        header.yoffset = yoffset;
    }
    let out = state.insert(Body::Image(ImageObject { header, pixels }));
    Ok(vec![("out", Stored::Image(out))])
}

fn run_avg(state: &mut State, args: &Args<'_>) -> RunResult {
    let image = args.image(state, "in")?;
    let pixels = image
        .pixels
        .as_ref()
        .ok_or_else(|| "avg: pixel data not available for header-only image".to_string())?;
    if pixels.is_empty() {
        return Err("avg: image has no pixels".to_string());
    }
    let mean = pixels.iter().sum::<f64>() / pixels.len() as f64;
    Ok(vec![("out", Stored::Double(mean))])
}

fn load_png(state: &mut State, loader: &str, source: &str, data: &[u8]) -> RunResult {
    let header = png_header(data).ok_or_else(|| format!("{}: {} is not a PNG file", loader, source))?;
    let out = state.new_image(header, None);
    Ok(vec![("out", Stored::Image(out))])
}

fn run_pngload(state: &mut State, args: &Args<'_>) -> RunResult {
    let filename = args.string("filename")?;
    let head = read_head(Path::new(&filename))
        .ok_or_else(|| format!("pngload: unable to read {}", filename))?;
    load_png(state, "pngload", &filename, &head)
}

fn run_pngload_buffer(state: &mut State, args: &Args<'_>) -> RunResult {
    load_png(state, "pngload_buffer", "buffer", args.blob("buffer")?)
}
