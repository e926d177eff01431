//! Engine start-up configuration.

use crate::error::{Result, VipsError};
use serde::{Deserialize, Serialize};

/// Worker threads per pipeline when none is configured.
pub const DEFAULT_CONCURRENCY_LEVEL: usize = 1;
/// Operation cache memory ceiling when none is configured (100 MiB).
pub const DEFAULT_MAX_CACHE_MEM: usize = 100 * 1024 * 1024;
/// Operation cache entry limit when none is configured.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 1000;

/// Settings applied once when the engine starts.
///
/// Zero numeric fields mean "use the default". A `Config` can be built with the
/// chaining setters or read from JSON:
///
/// ```
/// use vips_bridge::Config;
///
/// let config = Config::new().set_concurrency_level(4).set_report_leaks(true);
/// assert_eq!(config.concurrency_level(), 4);
///
/// let parsed = Config::from_json(r#"{"max_cache_size": 50}"#)?;
/// assert_eq!(parsed.max_cache_size(), 50);
/// # Ok::<(), vips_bridge::VipsError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    concurrency_level: usize,
    max_cache_mem: usize,
    max_cache_size: usize,
    report_leaks: bool,
    cache_trace: bool,
}

impl Config {
    /// Create a configuration with every field at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| VipsError::InvalidConfiguration(e.to_string()))
    }

    /// Set the number of worker threads the engine uses per pipeline.
    ///
    /// Default: 1
    pub fn set_concurrency_level(mut self, level: usize) -> Self {
        self.concurrency_level = level;
        self
    }

    /// Set the memory ceiling of the operation cache in bytes.
    ///
    /// Default: 100 MiB
    pub fn set_max_cache_mem(mut self, bytes: usize) -> Self {
        self.max_cache_mem = bytes;
        self
    }

    /// Set the maximum number of operations kept in the cache.
    ///
    /// Default: 1000
    pub fn set_max_cache_size(mut self, items: usize) -> Self {
        self.max_cache_size = items;
        self
    }

    /// Report objects still alive when the engine shuts down.
    pub fn set_report_leaks(mut self, enabled: bool) -> Self {
        self.report_leaks = enabled;
        self
    }

    /// Trace operation cache hits and misses.
    pub fn set_cache_trace(mut self, enabled: bool) -> Self {
        self.cache_trace = enabled;
        self
    }

    pub fn concurrency_level(&self) -> usize {
        self.concurrency_level
    }

    pub fn max_cache_mem(&self) -> usize {
        self.max_cache_mem
    }

    pub fn max_cache_size(&self) -> usize {
        self.max_cache_size
    }

    pub fn report_leaks(&self) -> bool {
        self.report_leaks
    }

    pub fn cache_trace(&self) -> bool {
        self.cache_trace
    }

    /// Copy with every zero field replaced by its default.
    pub(crate) fn resolved(&self) -> Self {
        fn or_default(value: usize, default: usize) -> usize {
            if value == 0 {
                default
            } else {
                value
            }
        }

        Self {
            concurrency_level: or_default(self.concurrency_level, DEFAULT_CONCURRENCY_LEVEL),
            max_cache_mem: or_default(self.max_cache_mem, DEFAULT_MAX_CACHE_MEM),
            max_cache_size: or_default(self.max_cache_size, DEFAULT_MAX_CACHE_SIZE),
            report_leaks: self.report_leaks,
            cache_trace: self.cache_trace,
        }
    }
}
