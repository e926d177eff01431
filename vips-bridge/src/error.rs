//! Error types for vips-bridge

use crate::engine::EngineVersion;
use thiserror::Error;

/// Result type for vips-bridge operations
pub type Result<T> = std::result::Result<T, VipsError>;

/// Error types for engine operations
#[derive(Error, Debug)]
pub enum VipsError {
    /// No loader or saver claims the input
    #[error("Unsupported image format: {input}")]
    UnsupportedFormat { input: String },

    /// Operation name is not in the engine's registry
    #[error("Unknown operation: {name}")]
    UnknownOperation { name: String },

    /// An input could not be set on the operation (unknown name or wrong type)
    #[error("Failed to bind property '{property}' on operation '{operation}': {reason}")]
    PropertyBind {
        operation: String,
        property: String,
        reason: String,
    },

    /// The engine's own execution of the operation failed
    #[error("Operation '{operation}' failed: {message}")]
    EngineBuild { operation: String, message: String },

    /// A value does not fit the kind it is being converted to or from
    #[error("Marshal error: {reason}")]
    Marshal { reason: String },

    /// An option with this name is already present in the set
    #[error("Duplicate option: {name}")]
    DuplicateOption { name: String },

    /// `start` was called while the engine is running
    #[error("Engine is already running")]
    AlreadyRunning,

    /// The linked engine is older than the supported floor
    #[error("Requires libvips version {required}+, found {found}")]
    VersionTooOld { found: EngineVersion, required: u32 },

    /// The engine refused to initialize
    #[error("Failed to start engine (code {code})")]
    InitializationFailed { code: i32 },

    /// The engine has never been started in this process
    #[error("Engine has not been started")]
    NotRunning,

    /// Invalid configuration values
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid input provided
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Failed to build a worker pool
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VipsError {
    /// Whether this error is an unrecoverable misconfiguration of the process.
    ///
    /// Fatal errors come from the lifecycle (double start, engine too old,
    /// engine init failure). Callers usually treat them as assertions.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VipsError::AlreadyRunning
                | VipsError::VersionTooOld { .. }
                | VipsError::InitializationFailed { .. }
        )
    }

    pub(crate) fn marshal(reason: impl Into<String>) -> Self {
        VipsError::Marshal {
            reason: reason.into(),
        }
    }
}
