use std::env;
use std::path::Path;

/// Libraries libvips' public API pulls in besides itself.
const GLIB_LIBS: [&str; 2] = ["gobject-2.0", "glib-2.0"];

/// Oldest libvips release the bindings are declared against.
const MIN_VERSION: &str = "8.0";

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=VIPS_LIB_DIR");

    // Priority 1: Manual override via VIPS_LIB_DIR
    if let Ok(lib_dir) = env::var("VIPS_LIB_DIR") {
        println!("cargo:warning=Using VIPS_LIB_DIR: {}", lib_dir);
        setup_linking(Path::new(&lib_dir));
        return;
    }

    // Priority 2: pkg-config, which emits the link flags and rerun hints itself
    match pkg_config::Config::new()
        .atleast_version(MIN_VERSION)
        .probe("vips")
    {
        Ok(library) => {
            for dir in &library.link_paths {
                println!("cargo:libdir={}", dir.display());
            }
        }
        Err(e) => {
            // The safe crate only references these symbols behind its
            // `libvips` feature, so a missing library is reported rather than fatal.
            println!(
                "cargo:warning=libvips not found ({}). Either:\n\
                 1. Set VIPS_LIB_DIR to the directory containing libvips\n\
                 2. Install libvips {}+ with its pkg-config file (vips.pc)",
                e.to_string().lines().next().unwrap_or("pkg-config lookup failed"),
                MIN_VERSION
            );
        }
    }
}

fn setup_linking(lib_dir: &Path) {
    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=dylib=vips");
    for lib in GLIB_LIBS {
        println!("cargo:rustc-link-lib=dylib={}", lib);
    }
    println!("cargo:libdir={}", lib_dir.display());

    // Add rpath for runtime library discovery (macOS/Linux)
    if cfg!(target_os = "macos") || cfg!(target_os = "linux") {
        println!("cargo:rustc-link-arg=-Wl,-rpath,{}", lib_dir.display());
    }
}
