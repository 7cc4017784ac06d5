//! Error types for the SDR control plane.
//!
//! This module defines [`SdrError`], the single error taxonomy returned by the
//! argument parser, the backend registry, the session aggregator and the
//! presentation adapter. Using the `thiserror` crate, each failure mode carries
//! the data a caller needs to report it (offending input, channel index, the
//! allowed range) instead of a bare string.
//!
//! ## Error Hierarchy
//!
//! - **Construction errors**: `MalformedArgument`, `UnsupportedBackend`,
//!   `ChannelCountMismatch`, `InvalidTopology`, `NoDevicesFound`. These abort
//!   session creation; no backend handle survives them.
//! - **Parameter errors**: `ParameterOutOfRange`, `ChannelOutOfRange`,
//!   `BoardOutOfRange`, `NotSupported`. Returned to the caller of the setter
//!   that triggered them; session state is unchanged.
//! - **Backend errors**: `BackendCommunication` wraps a structured
//!   [`DriverError`] raised by a board object. Never retried automatically.
//! - **Configuration errors**: `Config` (figment extraction) and
//!   `Configuration` (semantic validation), plus `Io`.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Classification of a failure raised inside a board backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Device could not be opened.
    Initialization,
    /// Backend arguments were rejected.
    Configuration,
    /// Link to the device was lost or a transfer failed.
    Communication,
    /// Device reported a fault.
    Hardware,
    /// Operation did not complete in time.
    Timeout,
    /// Device rejected a value.
    InvalidParameter,
    /// Anything else.
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Structured failure reported by a backend.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Backend '{backend}' {kind} error: {message}")]
pub struct DriverError {
    /// Backend tag (`rtl`, `uhd`, ...).
    pub backend: String,
    /// Failure class.
    pub kind: DriverErrorKind,
    /// Human readable detail.
    pub message: String,
}

impl DriverError {
    /// Create a new driver error.
    pub fn new(backend: impl Into<String>, kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using [`SdrError`].
pub type SdrResult<T> = std::result::Result<T, SdrError>;

/// Primary error type for the SDR control plane.
///
/// Nothing in the crate swallows these: construction errors abort session
/// creation, runtime errors are returned to the caller that issued the call.
#[derive(Error, Debug)]
pub enum SdrError {
    /// The device argument string could not be tokenized.
    ///
    /// `position` is the byte offset where the problem was detected (for an
    /// unterminated quote this is the offset of the opening quote).
    #[error("Malformed device arguments at byte {position}: {reason} (input: {input:?})")]
    MalformedArgument {
        /// Full argument string.
        input: String,
        /// Byte offset of the failure.
        position: usize,
        /// Description of the problem.
        reason: String,
    },

    /// No registered backend claims the board's tag.
    #[error("No backend registered for device arguments '{0}'")]
    UnsupportedBackend(String),

    /// Per-board channel declarations do not sum to the declared total.
    #[error("Channel count mismatch: {declared} channels declared, boards provide {actual}")]
    ChannelCountMismatch {
        /// Declared total channel count.
        declared: usize,
        /// Sum of the per-board declarations.
        actual: usize,
    },

    /// The board/channel layout cannot be realised.
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// A value lies outside what the backend can apply and cannot be clamped
    /// (non-finite numbers, unknown stage/antenna/source names).
    #[error("Parameter '{parameter}' rejected value {value}: allowed {allowed}")]
    ParameterOutOfRange {
        /// Parameter name (`gain:LNA`, `antenna`, `clock_source`, ...).
        parameter: String,
        /// Offending value rendered as text.
        value: String,
        /// Human readable description of the allowed values.
        allowed: String,
    },

    /// A board backend failed while talking to its device.
    #[error("Backend communication failed: {0}")]
    BackendCommunication(#[from] DriverError),

    /// Logical channel index beyond the session's channel count.
    #[error("Channel {channel} out of range (session has {nchan} channels)")]
    ChannelOutOfRange {
        /// Requested channel.
        channel: usize,
        /// Number of logical channels.
        nchan: usize,
    },

    /// Board index beyond the session's board count.
    #[error("Board {board} out of range (session has {boards} boards)")]
    BoardOutOfRange {
        /// Requested board.
        board: usize,
        /// Number of boards.
        boards: usize,
    },

    /// The backend does not implement the operation at all.
    #[error("Operation '{operation}' not supported by backend '{backend}'")]
    NotSupported {
        /// Backend tag.
        backend: String,
        /// Operation name.
        operation: String,
    },

    /// The session synchronization sequence already ran.
    #[error("Session already started")]
    AlreadyStarted,

    /// Device discovery returned nothing for an empty argument string.
    #[error("No devices found")]
    NoDevicesFound,

    /// Semantic configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration file or environment could not be extracted.
    #[error("Configuration file error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for SdrError {
    fn from(err: figment::Error) -> Self {
        SdrError::Config(Box::new(err))
    }
}

impl SdrError {
    /// Shorthand for [`SdrError::ParameterOutOfRange`].
    pub fn out_of_range(
        parameter: impl Into<String>,
        value: impl std::fmt::Display,
        allowed: impl Into<String>,
    ) -> Self {
        SdrError::ParameterOutOfRange {
            parameter: parameter.into(),
            value: value.to_string(),
            allowed: allowed.into(),
        }
    }

    /// Shorthand for [`SdrError::NotSupported`].
    pub fn not_supported(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        SdrError::NotSupported {
            backend: backend.into(),
            operation: operation.into(),
        }
    }

    /// Whether the error happened while building a session.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            SdrError::MalformedArgument { .. }
                | SdrError::UnsupportedBackend(_)
                | SdrError::ChannelCountMismatch { .. }
                | SdrError::InvalidTopology(_)
                | SdrError::NoDevicesFound
        )
    }
}
