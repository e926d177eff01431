//! Comprehensive tests for vips-bridge
//!
//! Tests cover:
//! - Engine lifecycle (start, stop, restart, fatal start errors, configuration)
//! - Value marshaling through real operations
//! - Option sets
//! - Invocation (outputs, cache reuse, bind and build failures, cleanup)
//! - Loader and saver discovery by class name
//! - Per-thread caches and worker pools
//! - Memory statistics and object listings

use rayon::prelude::*;
use serial_test::serial;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::tempdir;
use vips_bridge::engine::MemoryEngine;
use vips_bridge::{
    BandFormat, Config, EngineState, EngineVersion, ImageHandle, ImageType, Interpretation,
    LoadSource, OptionSet, PropertyType, ValueBox, ValueKind, Vips, VipsError,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// A started lifecycle over a fresh reference engine.
fn started() -> (Vips, MemoryEngine) {
    init_tracing();
    let engine = MemoryEngine::new();
    let vips = Vips::with_engine(Arc::new(engine.clone()));
    vips.start(None).unwrap();
    (vips, engine)
}

fn black(vips: &Vips, width: i32, height: i32, bands: i32) -> ImageHandle {
    let mut options = OptionSet::new()
        .with_input("width", width)
        .unwrap()
        .with_input("height", height)
        .unwrap()
        .with_input("bands", bands)
        .unwrap()
        .with_output("out", ValueKind::Image)
        .unwrap();
    vips.call("black", &mut options).unwrap();
    match options.take("out") {
        Some(ValueBox::Image(image)) => image,
        other => panic!("Expected image output, got {:?}", other),
    }
}

fn avg(vips: &Vips, image: &ImageHandle) -> f64 {
    let mut options = OptionSet::new()
        .with_input("in", image)
        .unwrap()
        .with_output("out", ValueKind::Double)
        .unwrap();
    vips.call("avg", &mut options).unwrap();
    options.value("out").and_then(|v| v.as_double()).unwrap()
}

/// JPEG preamble: SOI and a JFIF APP0 segment.
fn jpeg_bytes() -> Vec<u8> {
    vec![
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00,
        0x01, 0x00, 0x01, 0x00, 0x00,
    ]
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut data = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];
    data.extend_from_slice(&13u32.to_be_bytes());
    data.extend_from_slice(b"IHDR");
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&[8, 2, 0, 0, 0]);
    data
}

fn write_fixture(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[test]
fn test_start_and_stop() {
    let (vips, _) = started();
    assert_eq!(vips.state(), EngineState::Running);
    assert!(vips.is_running());
    assert!(vips.version() >= EngineVersion::new(8, 0, 0));

    vips.stop();
    assert_eq!(vips.state(), EngineState::Stopped);
    assert!(!vips.is_running());
}

#[test]
fn test_stop_twice_is_noop() {
    let (vips, _) = started();
    let image = black(&vips, 3, 3, 1);
    vips.stop();
    let after_first = vips.stats();
    vips.stop();
    assert_eq!(vips.stats(), after_first);
    assert_eq!(vips.state(), EngineState::Stopped);
    drop(image);

    // Stopping a never-started engine does nothing either
    let idle = Vips::with_engine(Arc::new(MemoryEngine::new()));
    let before = idle.stats();
    idle.stop();
    assert_eq!(idle.stats(), before);
    assert_eq!(idle.state(), EngineState::NotStarted);
}

#[test]
fn test_restart_after_stop() {
    let (vips, _) = started();
    vips.stop();
    vips.start(None).unwrap();
    assert!(vips.is_running());
    let image = black(&vips, 2, 2, 1);
    assert_eq!(image.width(), 2);
}

#[test]
fn test_double_start_is_fatal() {
    let (vips, _) = started();
    match vips.start(None) {
        Err(e @ VipsError::AlreadyRunning) => assert!(e.is_fatal()),
        other => panic!("Expected AlreadyRunning, got {:?}", other),
    }
    // The running engine is untouched
    assert!(vips.is_running());
}

#[test]
fn test_version_too_old_is_fatal() {
    let vips = Vips::with_engine(Arc::new(MemoryEngine::with_version(EngineVersion::new(7, 40, 11))));
    let err = vips.start(None).unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("7.40.11"));
    assert!(!vips.is_running());
}

#[test]
fn test_start_with_json_config() {
    init_tracing();
    let engine = MemoryEngine::new();
    let vips = Vips::with_engine(Arc::new(engine.clone()));
    let config = Config::from_json(r#"{"max_cache_size": 1, "cache_trace": true}"#).unwrap();
    vips.start(Some(&config)).unwrap();

    let applied = vips.config();
    assert_eq!(applied.max_cache_size(), 1);
    assert!(applied.cache_trace());
    assert_eq!(applied.concurrency_level(), vips_bridge::DEFAULT_CONCURRENCY_LEVEL);

    drop(black(&vips, 1, 1, 1));
    drop(black(&vips, 2, 1, 1));
    assert_eq!(engine.cached_operations(), 1);
}

#[test]
fn test_invalid_config_rejected() {
    let result = Config::from_json(r#"{"max_cache_mem": -5}"#);
    assert!(matches!(result, Err(VipsError::InvalidConfiguration(_))));
}

#[test]
fn test_leak_test_wraps_start_and_stop() {
    init_tracing();
    let vips = Vips::with_engine(Arc::new(MemoryEngine::new()));
    let width = vips
        .leak_test(|vips| {
            assert!(vips.config().report_leaks());
            black(vips, 3, 5, 1).width()
        })
        .unwrap();
    assert_eq!(width, 3);
    assert_eq!(vips.state(), EngineState::Stopped);
    assert_eq!(vips.stats().allocs, 0);
}

// ============================================================================
// Global Instance Tests
// ============================================================================

#[test]
#[serial]
fn test_global_instance_lifecycle() {
    let vips = Vips::global();
    assert!(std::ptr::eq(vips, Vips::global()));

    vips.stop();
    if vips.state() == EngineState::NotStarted {
        assert!(matches!(vips.find_load_buffer(&[0]), Err(VipsError::NotRunning)));
    }
    vips.start(None).unwrap();
    assert!(vips.is_running());
    vips.stop();
    vips.stop();
    assert_eq!(vips.state(), EngineState::Stopped);
}

#[test]
#[serial]
#[cfg(not(feature = "libvips"))]
fn test_global_call_auto_starts() {
    let vips = Vips::global();
    vips.stop();
    assert!(!vips.is_running());

    let image = black(vips, 4, 4, 1);
    assert!(vips.is_running());
    assert_eq!(avg(vips, &image), 0.0);

    drop(image);
    vips.reset_thread_local_cache();
    vips.stop();
}

// ============================================================================
// Value Marshaling Tests
// ============================================================================

#[test]
fn test_round_trip_every_kind() {
    let (vips, _) = started();
    let image = black(&vips, 2, 2, 1);
    let values = vec![
        ValueBox::Int(i64::from(i32::MIN)),
        ValueBox::Double(-0.125),
        ValueBox::Bool(false),
        ValueBox::String("canyon.jpg".to_string()),
        ValueBox::Enum(Interpretation::Srgb.to_raw()),
        ValueBox::Blob(jpeg_bytes()),
        ValueBox::DoubleArray(vec![0.0, 1.0, 2.5]),
        ValueBox::Image(image.clone()),
    ];
    for value in values {
        let kind = value.kind();
        let engine_value = value.serialize(&kind.property_type()).unwrap();
        assert_eq!(ValueBox::deserialize(engine_value, kind).unwrap(), value);
    }
}

#[test]
fn test_int_is_widened_for_double_property() {
    let (vips, _) = started();
    let image = black(&vips, 1, 1, 1);
    let mut options = OptionSet::new()
        .with_input("in", &image)
        .unwrap()
        .with_input("xres", 3)
        .unwrap()
        .with_output("out", ValueKind::Image)
        .unwrap();
    vips.call("copy", &mut options).unwrap();
    let out = options.value("out").and_then(|v| v.as_image()).unwrap();
    assert_eq!(out.resolution_x(), 3.0);
}

#[test]
fn test_int_out_of_range_is_bind_error() {
    let (vips, _) = started();
    let mut options = OptionSet::new()
        .with_input("width", i64::from(i32::MAX) + 1)
        .unwrap()
        .with_input("height", 1)
        .unwrap();
    match vips.call("black", &mut options) {
        Err(VipsError::PropertyBind {
            property, reason, ..
        }) => {
            assert_eq!(property, "width");
            assert!(reason.contains("out of range"), "reason: {}", reason);
        }
        other => panic!("Expected PropertyBind, got {:?}", other),
    }
}

#[test]
fn test_int_bound_to_string_property_is_bind_error() {
    let (vips, _) = started();
    let before = vips.stats();

    let mut options = OptionSet::new()
        .with_input("filename", 5)
        .unwrap()
        .with_output("out", ValueKind::Image)
        .unwrap();
    match vips.call("pngload", &mut options) {
        Err(VipsError::PropertyBind {
            operation,
            property,
            ..
        }) => {
            assert_eq!(operation, "pngload");
            assert_eq!(property, "filename");
        }
        other => panic!("Expected PropertyBind, got {:?}", other),
    }

    // The operation was released and no transient copy is left
    assert_eq!(vips.stats().allocs, before.allocs);
    assert!(options.iter().all(|o| !o.holds_transient()));
}

#[test]
fn test_enum_inputs_from_header_types() {
    let (vips, _) = started();
    let image = black(&vips, 2, 2, 3);
    assert_eq!(image.interpretation(), Interpretation::Srgb);

    let mut options = OptionSet::new()
        .with_input("in", &image)
        .unwrap()
        .with_input("interpretation", Interpretation::Multiband)
        .unwrap()
        .with_output("out", ValueKind::Image)
        .unwrap();
    vips.call("copy", &mut options).unwrap();
    let out = options.value("out").and_then(|v| v.as_image()).unwrap();
    assert_eq!(out.interpretation(), Interpretation::Multiband);
    assert_eq!(out.bands(), 3);
}

// ============================================================================
// Option Set Tests
// ============================================================================

#[test]
fn test_duplicate_add_leaves_set_unchanged() {
    let mut options = OptionSet::new();
    options.input("in", 1).unwrap();
    options.output("out", ValueKind::Image).unwrap();

    let names_before: Vec<String> = options.iter().map(|o| o.name().to_string()).collect();
    match options.output("in", ValueKind::Int) {
        Err(VipsError::DuplicateOption { name }) => assert_eq!(name, "in"),
        Err(e) => panic!("Expected DuplicateOption, got {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
    let names_after: Vec<String> = options.iter().map(|o| o.name().to_string()).collect();
    assert_eq!(names_before, names_after);
    assert_eq!(options.value("in"), Some(&ValueBox::Int(1)));
}

#[test]
fn test_option_set_reusable_across_calls() {
    let (vips, _) = started();
    let image = black(&vips, 2, 2, 1);
    let mut options = OptionSet::new()
        .with_input("in", &image)
        .unwrap()
        .with_output("out", ValueKind::Double)
        .unwrap();
    vips.call("avg", &mut options).unwrap();
    vips.call("avg", &mut options).unwrap();
    assert_eq!(options.value("out"), Some(&ValueBox::Double(0.0)));
}

// ============================================================================
// Invocation Tests
// ============================================================================

#[test]
fn test_identity_op_returns_to_baseline() {
    let (vips, _) = started();
    let baseline = vips.stats();

    let input = black(&vips, 8, 4, 3);
    let mut options = OptionSet::new()
        .with_input("in", &input)
        .unwrap()
        .with_output("out", ValueKind::Image)
        .unwrap();
    vips.call("copy", &mut options).unwrap();

    let out = options.value("out").and_then(|v| v.as_image()).unwrap();
    assert_eq!(out.width(), 8);
    assert_eq!(out.height(), 4);
    assert_eq!(out.bands(), 3);
    assert_eq!(out.band_format(), BandFormat::Uchar);
    assert!(vips.stats().allocs > baseline.allocs);

    drop(options);
    drop(input);
    vips.drop_operation_cache();
    vips.reset_thread_local_cache();

    let after = vips.stats();
    assert_eq!(after.allocs, baseline.allocs);
    assert_eq!(after.mem, baseline.mem);
    assert!(after.mem_highwater >= 8 * 4 * 3);
}

#[test]
fn test_unknown_operation_leaves_stats_unchanged() {
    let (vips, _) = started();
    let before = vips.stats();
    let mut options = OptionSet::new().with_input("in", 1).unwrap();
    match vips.call("no_such_op", &mut options) {
        Err(VipsError::UnknownOperation { name }) => assert_eq!(name, "no_such_op"),
        other => panic!("Expected UnknownOperation, got {:?}", other),
    }
    assert_eq!(vips.stats(), before);
}

#[test]
fn test_cache_reuses_equal_operations() {
    let (vips, engine) = started();
    let first = black(&vips, 5, 5, 1);
    let allocs = vips.stats().allocs;

    let second = black(&vips, 5, 5, 1);
    assert_eq!(first, second);
    assert_eq!(vips.stats().allocs, allocs);
    assert_eq!(engine.cached_operations(), 1);

    vips.drop_operation_cache();
    assert_eq!(engine.cached_operations(), 0);
    // Handles keep their images alive after eviction
    assert_eq!(second.width(), 5);
}

#[test]
fn test_build_failure_reports_engine_message() {
    let (vips, _) = started();
    let mut options = OptionSet::new()
        .with_input("width", 0)
        .unwrap()
        .with_input("height", 3)
        .unwrap()
        .with_output("out", ValueKind::Image)
        .unwrap();
    match vips.call("black", &mut options) {
        Err(VipsError::EngineBuild { operation, message }) => {
            assert_eq!(operation, "black");
            assert!(message.contains("positive"), "message: {}", message);
        }
        other => panic!("Expected EngineBuild, got {:?}", other),
    }
    assert!(options.value("out").is_none());

    vips.reset_thread_local_cache();
    assert_eq!(vips.stats().allocs, 0);
}

#[test]
fn test_oversized_image_is_build_error() {
    let (vips, _) = started();
    let baseline = vips.stats();
    let mut options = OptionSet::new()
        .with_input("width", i32::MAX)
        .unwrap()
        .with_input("height", i32::MAX)
        .unwrap()
        .with_input("bands", i32::MAX)
        .unwrap()
        .with_output("out", ValueKind::Image)
        .unwrap();
    match vips.call("black", &mut options) {
        Err(VipsError::EngineBuild { operation, message }) => {
            assert_eq!(operation, "black");
            assert!(message.contains("too large"), "message: {}", message);
        }
        other => panic!("Expected EngineBuild, got {:?}", other),
    }
    assert!(options.value("out").is_none());

    vips.reset_thread_local_cache();
    assert_eq!(vips.stats().allocs, baseline.allocs);
}

// ============================================================================
// Format Resolution Tests
// ============================================================================

#[test]
fn test_loader_by_path_and_bytes_agree() {
    let (vips, _) = started();
    let dir = tempdir().unwrap();
    let data = jpeg_bytes();
    let path = write_fixture(&dir, "canyon.jpg", &data);

    let by_path = vips.resolve_loader(LoadSource::Path(&path)).unwrap();
    let by_bytes = vips.resolve_loader(LoadSource::Bytes(&data)).unwrap();
    assert_eq!(by_path, "VipsForeignLoadJpegFile");
    assert_eq!(by_bytes, "VipsForeignLoadJpegBuffer");
    assert_eq!(ImageType::from_loader(&by_path), ImageType::Jpeg);
    assert_eq!(ImageType::from_loader(&by_bytes), ImageType::Jpeg);
    assert_eq!(vips.determine_image_type(&data), ImageType::Jpeg);
}

#[test]
fn test_png_file_load_by_class_name() {
    let (vips, _) = started();
    let dir = tempdir().unwrap();
    let path = write_fixture(&dir, "tile.png", &png_bytes(12, 9));

    let loader = vips.find_load(&path).unwrap();
    assert_eq!(loader, "VipsForeignLoadPngFile");
    let mut options = OptionSet::new()
        .with_input("filename", path.to_str().unwrap())
        .unwrap()
        .with_output("out", ValueKind::Image)
        .unwrap();
    vips.call(&loader, &mut options).unwrap();
    let image = options.value("out").and_then(|v| v.as_image()).unwrap();
    assert_eq!((image.width(), image.height(), image.bands()), (12, 9, 3));
}

#[test]
fn test_saver_discovery() {
    let (vips, _) = started();
    assert_eq!(vips.find_save("out.png").unwrap(), "VipsForeignSavePngFile");
    assert_eq!(vips.find_save("out.JPG[Q=85]").unwrap(), "VipsForeignSaveJpegFile");
    assert_eq!(vips.find_save_buffer(".png").unwrap(), "VipsForeignSavePngBuffer");
    assert!(matches!(
        vips.find_save_buffer(".raw"),
        Err(VipsError::UnsupportedFormat { .. })
    ));
}

#[test]
fn test_png_buffer_load() {
    let (vips, _) = started();
    let data = png_bytes(31, 17);
    let loader = vips.find_load_buffer(&data).unwrap();
    assert_eq!(loader, "VipsForeignLoadPngBuffer");
    assert_eq!(vips.determine_image_type(&data), ImageType::Png);

    let mut options = OptionSet::new()
        .with_input("buffer", data)
        .unwrap()
        .with_output("out", ValueKind::Image)
        .unwrap();
    vips.call(&loader, &mut options).unwrap();
    let image = options.value("out").and_then(|v| v.as_image()).unwrap();
    assert_eq!((image.width(), image.height()), (31, 17));
    assert_eq!(image.interpretation(), Interpretation::Srgb);
}

#[test]
fn test_unsupported_formats() {
    let (vips, _) = started();
    let dir = tempdir().unwrap();
    let path = write_fixture(&dir, "notes.txt", b"plain text");

    assert!(matches!(
        vips.find_load(&path),
        Err(VipsError::UnsupportedFormat { .. })
    ));
    assert!(matches!(
        vips.find_load(dir.path().join("missing.jpg")),
        Err(VipsError::UnsupportedFormat { .. })
    ));
    assert!(matches!(
        vips.find_save("out.xyz"),
        Err(VipsError::UnsupportedFormat { .. })
    ));
    assert_eq!(vips.determine_image_type(b"GIF"), ImageType::Unknown);
}

#[test]
fn test_finders_require_start() {
    let vips = Vips::with_engine(Arc::new(MemoryEngine::new()));
    assert!(matches!(
        vips.find_load_buffer(&jpeg_bytes()),
        Err(VipsError::NotRunning)
    ));
    assert!(matches!(vips.find_save_buffer(".png"), Err(VipsError::NotRunning)));
}

#[test]
fn test_finders_do_not_change_stats() {
    let (vips, _) = started();
    let before = vips.stats();
    let _ = vips.find_load_buffer(&jpeg_bytes());
    let _ = vips.find_save("a.png");
    assert_eq!(vips.stats(), before);
}

// ============================================================================
// Thread Cache Tests
// ============================================================================

#[test]
fn test_thread_cache_guard_resets_worker_thread() {
    let (vips, _) = started();
    let vips = Arc::new(vips);

    let worker = Arc::clone(&vips);
    std::thread::spawn(move || {
        let _guard = worker.thread_cache_guard();
        let image = black(&worker, 2, 2, 1);
        assert_eq!(image.width(), 2);
    })
    .join()
    .unwrap();

    // Only the cached operation and its image remain
    assert_eq!(vips.stats().allocs, 2);
    vips.drop_operation_cache();
    assert_eq!(vips.stats().allocs, 0);
}

#[test]
fn test_worker_pool_parallel_calls() {
    let (vips, _) = started();
    let pool = vips.worker_pool(4).unwrap();
    assert_eq!(pool.current_num_threads(), 4);

    let widths: Vec<i32> = pool.install(|| {
        (1..=16)
            .into_par_iter()
            .map(|width| {
                let image = black(&vips, width, 2, 1);
                assert_eq!(avg(&vips, &image), 0.0);
                image.width()
            })
            .collect()
    });
    assert_eq!(widths, (1..=16).collect::<Vec<_>>());
}

#[test]
fn test_worker_pool_default_size() {
    let (vips, _) = started();
    // Zero lets rayon pick the thread count
    let pool = vips.worker_pool(0).unwrap();
    assert!(pool.current_num_threads() >= 1);
}

// ============================================================================
// Diagnostics Tests
// ============================================================================

#[test]
fn test_dump_objects() {
    let (vips, _) = started();
    let image = black(&vips, 6, 7, 1);
    let mut listing = Vec::new();
    vips.dump_objects(&mut listing).unwrap();
    let text = String::from_utf8(listing).unwrap();
    assert!(text.contains("VipsImage 6x7"), "listing: {}", text);
    assert!(text.contains("cached operations"));
    drop(image);
}

#[test]
fn test_stats_serialize_to_json() {
    let (vips, _) = started();
    let image = black(&vips, 10, 10, 1);
    let json = serde_json::to_value(vips.stats()).unwrap();
    assert_eq!(json["mem"].as_u64(), Some(100 + 64 * 1024));
    assert!(json["allocs"].as_u64().unwrap() >= 2);
    drop(image);
}

#[test]
fn test_unsupported_property_type_display() {
    let value = ValueBox::Double(1.0);
    let err = value
        .serialize(&PropertyType::Unsupported("VipsInterpolate".to_string()))
        .unwrap_err();
    assert!(matches!(err, VipsError::Marshal { .. }));
}
