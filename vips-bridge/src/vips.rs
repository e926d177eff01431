//! Engine lifecycle and the entry point for invoking operations.

use crate::config::Config;
use crate::engine::{default_engine, Engine, EngineVersion, MemoryStats};
use crate::error::{Result, VipsError};
use crate::operation;
use crate::options::OptionSet;
use std::io;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, info};

/// Program name passed to the engine at start-up.
const PROGRAM_NAME: &str = "vips-bridge";

/// Oldest engine major version accepted by `start`.
pub const MIN_MAJOR_VERSION: u32 = 8;

/// Lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    NotStarted,
    Running,
    Stopped,
}

#[derive(Debug)]
struct Lifecycle {
    state: EngineState,
    config: Config,
}

/// A started (or startable) engine.
///
/// `start` and `stop` are serialized by one lock. Invocations never take that
/// lock and may run concurrently from any number of threads.
///
/// # Example
///
/// ```
/// use vips_bridge::{OptionSet, ValueKind, Vips};
///
/// let vips = Vips::new();
/// vips.start(None)?;
///
/// let mut options = OptionSet::new()
///     .with_input("width", 8)?
///     .with_input("height", 8)?
///     .with_output("out", ValueKind::Image)?;
/// vips.call("black", &mut options)?;
///
/// let image = options.value("out").and_then(|v| v.as_image()).unwrap();
/// assert_eq!(image.width(), 8);
/// # Ok::<(), vips_bridge::VipsError>(())
/// ```
pub struct Vips {
    engine: Arc<dyn Engine>,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
}

impl Default for Vips {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Vips {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vips")
            .field("engine", &self.engine.name())
            .field("state", &self.state())
            .finish()
    }
}

impl Vips {
    /// A lifecycle over the default engine. Nothing is started yet.
    pub fn new() -> Self {
        Self::with_engine(default_engine())
    }

    /// A lifecycle over a specific engine.
    pub fn with_engine(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            lifecycle: Mutex::new(Lifecycle {
                state: EngineState::NotStarted,
                config: Config::default(),
            }),
            running: AtomicBool::new(false),
        }
    }

    /// The process-wide instance over the default engine.
    pub fn global() -> &'static Vips {
        static GLOBAL: OnceLock<Vips> = OnceLock::new();
        GLOBAL.get_or_init(Vips::new)
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the engine.
    ///
    /// Zero fields of `config` (or a missing config) take their defaults.
    /// A stopped engine may be started again.
    ///
    /// # Errors
    ///
    /// All of these are fatal, see [`VipsError::is_fatal`]:
    /// - `AlreadyRunning` if the engine is running
    /// - `VersionTooOld` if the engine's major version is below 8
    /// - `InitializationFailed` if the engine refuses to initialize
    pub fn start(&self, config: Option<&Config>) -> Result<()> {
        let mut lifecycle = self.lock();
        if lifecycle.state == EngineState::Running {
            return Err(VipsError::AlreadyRunning);
        }

        let version = self.engine.version();
        if version.major < MIN_MAJOR_VERSION {
            return Err(VipsError::VersionTooOld {
                found: version,
                required: MIN_MAJOR_VERSION,
            });
        }

        self.engine
            .init(PROGRAM_NAME)
            .map_err(|code| VipsError::InitializationFailed { code })?;

        let config = config.cloned().unwrap_or_default().resolved();
        self.engine.set_concurrency(config.concurrency_level());
        self.engine.set_cache_max(config.max_cache_size());
        self.engine.set_cache_max_mem(config.max_cache_mem());
        self.engine.set_leak_check(config.report_leaks());
        self.engine.set_cache_trace(config.cache_trace());

        info!(
            engine = self.engine.name(),
            version = %version,
            concurrency = config.concurrency_level(),
            max_cache_size = config.max_cache_size(),
            max_cache_mem = config.max_cache_mem(),
            "engine started"
        );

        lifecycle.config = config;
        lifecycle.state = EngineState::Running;
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop the engine. Does nothing unless it is running.
    pub fn stop(&self) {
        let mut lifecycle = self.lock();
        if lifecycle.state != EngineState::Running {
            return;
        }
        self.running.store(false, Ordering::Release);
        self.engine.shutdown();
        lifecycle.state = EngineState::Stopped;
        info!(engine = self.engine.name(), "engine stopped");
    }

    pub fn state(&self) -> EngineState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Configuration applied by the last successful `start`, with defaults
    /// filled in. Before the first start this is `Config::default()`.
    pub fn config(&self) -> Config {
        self.lock().config.clone()
    }

    /// Version of the underlying engine.
    pub fn version(&self) -> EngineVersion {
        self.engine.version()
    }

    /// Whether the engine has been started at least once.
    pub(crate) fn ensure_started(&self) -> Result<()> {
        if self.is_running() || self.state() != EngineState::NotStarted {
            Ok(())
        } else {
            Err(VipsError::NotRunning)
        }
    }

    pub(crate) fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    fn start_if_needed(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        debug!("engine not running, starting it with default configuration");
        match self.start(None) {
            Ok(()) | Err(VipsError::AlreadyRunning) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Invoke the operation `name` with `options`.
    ///
    /// Starts the engine with the default configuration if it is not running.
    /// Must not race with `stop`.
    ///
    /// # Errors
    ///
    /// - `UnknownOperation` if the engine has no such operation
    /// - `PropertyBind` if an input names no argument or cannot be converted
    /// - `EngineBuild` if the engine fails to execute the operation
    /// - `PropertyBind`/`Marshal` if an output cannot be read back
    pub fn call(&self, name: &str, options: &mut OptionSet) -> Result<()> {
        self.start_if_needed()?;
        operation::invoke(self.engine(), name, options)
    }

    /// Free the calling thread's engine-side caches.
    ///
    /// Call this before a thread that has used the engine exits.
    pub fn reset_thread_local_cache(&self) {
        self.engine.thread_shutdown();
    }

    /// Reset the calling thread's caches when the returned guard drops.
    pub fn thread_cache_guard(&self) -> ThreadCacheGuard<'_> {
        ThreadCacheGuard {
            vips: self,
            _not_send: PhantomData,
        }
    }

    /// Build a worker pool whose threads reset their engine caches on exit.
    pub fn worker_pool(&self, threads: usize) -> Result<rayon::ThreadPool> {
        let engine = Arc::clone(&self.engine);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("vips-worker-{}", index))
            .exit_handler(move |_| engine.thread_shutdown())
            .build()?;
        debug!(threads = pool.current_num_threads(), "worker pool built");
        Ok(pool)
    }

    /// Evict every operation from the operation cache.
    pub fn drop_operation_cache(&self) {
        self.engine.cache_drop_all();
    }

    /// Tracked memory statistics.
    pub fn stats(&self) -> MemoryStats {
        self.engine.memory()
    }

    /// Write a listing of live engine objects to `out`.
    pub fn dump_objects(&self, out: &mut dyn io::Write) -> Result<()> {
        self.engine.dump_objects(out)?;
        Ok(())
    }

    /// Run `f` between a leak-reporting start and a stop.
    ///
    /// The engine must not be running. The calling thread's caches are reset
    /// before stopping so they are not reported as leaks.
    pub fn leak_test<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Vips) -> R,
    {
        self.start(Some(&Config::new().set_report_leaks(true)))?;
        let result = f(self);
        self.reset_thread_local_cache();
        self.stop();
        Ok(result)
    }
}

/// Resets the owning thread's engine caches on drop.
///
/// Not `Send`: the reset applies to whichever thread drops the guard.
pub struct ThreadCacheGuard<'a> {
    vips: &'a Vips,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ThreadCacheGuard<'_> {
    fn drop(&mut self) {
        self.vips.reset_thread_local_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;

    fn vips() -> Vips {
        Vips::with_engine(Arc::new(MemoryEngine::new()))
    }

    #[test]
    fn test_state_transitions() {
        let vips = vips();
        assert_eq!(vips.state(), EngineState::NotStarted);
        vips.start(None).unwrap();
        assert_eq!(vips.state(), EngineState::Running);
        assert!(vips.is_running());
        vips.stop();
        assert_eq!(vips.state(), EngineState::Stopped);
        vips.stop();
        assert_eq!(vips.state(), EngineState::Stopped);
        vips.start(None).unwrap();
        assert!(vips.is_running());
    }

    #[test]
    fn test_double_start_is_fatal() {
        let vips = vips();
        vips.start(None).unwrap();
        let err = vips.start(None).unwrap_err();
        assert!(matches!(err, VipsError::AlreadyRunning));
        assert!(err.is_fatal());
        assert!(vips.is_running());
    }

    #[test]
    fn test_version_floor() {
        let vips = Vips::with_engine(Arc::new(MemoryEngine::with_version(EngineVersion::new(7, 42, 0))));
        match vips.start(None) {
            Err(VipsError::VersionTooOld { found, required }) => {
                assert_eq!(found.to_string(), "7.42.0");
                assert_eq!(required, 8);
            }
            other => panic!("Expected VersionTooOld, got {:?}", other),
        }
        assert_eq!(vips.state(), EngineState::NotStarted);
    }

    #[test]
    fn test_init_failure() {
        let vips = Vips::with_engine(Arc::new(MemoryEngine::failing_init(-1)));
        let err = vips.start(None).unwrap_err();
        assert!(matches!(err, VipsError::InitializationFailed { code: -1 }));
        assert!(err.is_fatal());
        assert!(!vips.is_running());
    }

    #[test]
    fn test_config_defaults_applied() {
        let vips = vips();
        vips.start(Some(&Config::new().set_max_cache_size(10))).unwrap();
        let config = vips.config();
        assert_eq!(config.max_cache_size(), 10);
        assert_eq!(config.concurrency_level(), crate::config::DEFAULT_CONCURRENCY_LEVEL);
        assert_eq!(config.max_cache_mem(), crate::config::DEFAULT_MAX_CACHE_MEM);
    }

    #[test]
    fn test_call_starts_engine() {
        let vips = vips();
        let mut options = OptionSet::new()
            .with_input("width", 1)
            .unwrap()
            .with_input("height", 1)
            .unwrap();
        vips.call("black", &mut options).unwrap();
        assert_eq!(vips.state(), EngineState::Running);
    }

    #[test]
    fn test_ensure_started() {
        let vips = vips();
        assert!(matches!(vips.ensure_started(), Err(VipsError::NotRunning)));
        vips.start(None).unwrap();
        vips.stop();
        assert!(vips.ensure_started().is_ok());
    }
}
