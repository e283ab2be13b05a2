//! Error types for freegpu

use thiserror::Error;

/// Main error type for freegpu
#[derive(Error, Debug)]
pub enum FreeGpuError {
    /// The device-management tool could not be started
    #[error("Failed to run {program}: {source}")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The device-management tool ran but reported failure
    #[error("{program} exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// Unexpected text shape in a query result
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    /// The same bus id was reported twice in one inventory snapshot
    #[error("Duplicate bus id in device inventory: {0}")]
    DuplicateBusId(String),

    /// Malformed device-restriction variable
    #[error("Invalid device restriction {value:?}: {message}")]
    InvalidRestriction { value: String, message: String },

    /// A busy bus id that the inventory never reported
    #[error("Compute process on unknown bus id: {0}")]
    UnknownBusId(String),

    /// Every device has an active compute process
    #[error("No idle GPU: {total} device(s) reported, all busy")]
    NoIdleDevice { total: usize },

    /// Device runtime error
    #[error("Device error: {0}")]
    Device(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for freegpu operations
pub type FreeGpuResult<T> = Result<T, FreeGpuError>;

impl From<toml::de::Error> for FreeGpuError {
    fn from(err: toml::de::Error) -> Self {
        FreeGpuError::Config(format!("Failed to parse config: {}", err))
    }
}
