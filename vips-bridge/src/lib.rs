//! # vips-bridge
//!
//! Invoke libvips operations by name, with typed values marshaled through the
//! engine's reflective property system.
//!
//! - **Any operation**: no per-operation bindings, operations are looked up by
//!   name at runtime
//! - **Typed values**: [`ValueBox`] conversions never truncate or wrap
//! - **Leak-free by construction**: operation references and transient copies
//!   are released by drop guards on every exit path
//! - **Process lifecycle**: start/stop, cache limits, per-thread cache teardown
//!   and memory statistics through [`Vips`]
//!
//! Without the `libvips` feature the crate runs on [`engine::MemoryEngine`], an
//! in-process reference engine.
//!
//! ## Quick Start
//!
//! ```
//! use vips_bridge::{OptionSet, ValueKind, Vips};
//!
//! let vips = Vips::global();
//! vips.start(None).ok();
//!
//! // Make a 16x16 three-band image, then average it
//! let mut black = OptionSet::new()
//!     .with_input("width", 16)?
//!     .with_input("height", 16)?
//!     .with_input("bands", 3)?
//!     .with_output("out", ValueKind::Image)?;
//! vips.call("black", &mut black)?;
//!
//! let image = black.take("out").unwrap();
//! let mut avg = OptionSet::new()
//!     .with_input("in", image)?
//!     .with_output("out", ValueKind::Double)?;
//! vips.call("avg", &mut avg)?;
//!
//! assert_eq!(avg.value("out").and_then(|v| v.as_double()), Some(0.0));
//! # Ok::<(), vips_bridge::VipsError>(())
//! ```

mod config;
pub mod engine;
mod error;
mod foreign;
mod image;
mod operation;
mod options;
mod value;
mod vips;

pub use config::{
    Config, DEFAULT_CONCURRENCY_LEVEL, DEFAULT_MAX_CACHE_MEM, DEFAULT_MAX_CACHE_SIZE,
};
pub use engine::{EngineVersion, MemoryStats};
pub use error::{Result, VipsError};
pub use foreign::{ImageType, LoadSource};
pub use image::{BandFormat, Coding, ImageHandle, ImageHeader, Interpretation};
pub use options::{Direction, OptionDescriptor, OptionSet};
pub use value::{PropertyType, PropertyValue, ValueBox, ValueKind};
pub use vips::{EngineState, ThreadCacheGuard, Vips, MIN_MAJOR_VERSION};
