//! Error types for the SVBONY driver.
//!
//! Three layers, innermost first:
//!
//! - [`SdkError`]: one variant per non-success vendor status code. Every
//!   adapter call returns `Result<T, SdkError>`, so success is `Ok` and callers
//!   never see a partial result.
//! - [`CameraError`]: driver-level failures raised by the components
//!   (validation, busy state, missing capability) or wrapping an [`SdkError`]
//!   together with the SDK operation that produced it.
//! - [`ConfigError`]: settings and persisted-configuration failures.
//!
//! The public async API on [`crate::SvbonyDriver`] returns `anyhow::Result`;
//! the typed errors survive inside and can be recovered with `downcast_ref`.

use thiserror::Error;

// =============================================================================
// SDK status codes
// =============================================================================

/// Coarse classification of an SDK failure.
///
/// Polling loops only need to know whether a status is a [`StatusClass::Timeout`]
/// (retry) or anything else (terminal for the current operation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Timeout,
    InvalidState,
    DeviceRemoved,
    GeneralError,
}

impl std::fmt::Display for StatusClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StatusClass::Timeout => "timeout",
            StatusClass::InvalidState => "invalid_state",
            StatusClass::DeviceRemoved => "device_removed",
            StatusClass::GeneralError => "general_error",
        };
        write!(f, "{}", label)
    }
}

/// Non-success status returned by the vendor SDK.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkError {
    #[error("SVB_ERROR_INVALID_INDEX")]
    InvalidIndex,
    #[error("SVB_ERROR_INVALID_ID")]
    InvalidId,
    #[error("SVB_ERROR_INVALID_CONTROL_TYPE")]
    InvalidControlType,
    #[error("SVB_ERROR_CAMERA_CLOSED")]
    CameraClosed,
    #[error("SVB_ERROR_CAMERA_REMOVED")]
    CameraRemoved,
    #[error("SVB_ERROR_INVALID_PATH")]
    InvalidPath,
    #[error("SVB_ERROR_INVALID_FILEFORMAT")]
    InvalidFileFormat,
    #[error("SVB_ERROR_INVALID_SIZE")]
    InvalidSize,
    #[error("SVB_ERROR_INVALID_IMGTYPE")]
    InvalidImageType,
    #[error("SVB_ERROR_OUTOF_BOUNDARY")]
    OutOfBoundary,
    #[error("SVB_ERROR_TIMEOUT")]
    Timeout,
    #[error("SVB_ERROR_INVALID_SEQUENCE")]
    InvalidSequence,
    #[error("SVB_ERROR_BUFFER_TOO_SMALL")]
    BufferTooSmall,
    #[error("SVB_ERROR_VIDEO_MODE_ACTIVE")]
    VideoModeActive,
    #[error("SVB_ERROR_EXPOSURE_IN_PROGRESS")]
    ExposureInProgress,
    #[error("SVB_ERROR_GENERAL_ERROR")]
    GeneralError,
    #[error("SVB_ERROR_INVALID_MODE")]
    InvalidMode,
    #[error("SVB_ERROR_INVALID_DIRECTION")]
    InvalidDirection,
    #[error("SVB_ERROR_UNKNOW_SENSOR_TYPE")]
    UnknownSensorType,
    #[error("UNKNOWN ({0})")]
    Unknown(i32),
}

impl SdkError {
    /// Map a raw vendor status code. Returns `None` for `SVB_SUCCESS` (0).
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            0 => return None,
            1 => SdkError::InvalidIndex,
            2 => SdkError::InvalidId,
            3 => SdkError::InvalidControlType,
            4 => SdkError::CameraClosed,
            5 => SdkError::CameraRemoved,
            6 => SdkError::InvalidPath,
            7 => SdkError::InvalidFileFormat,
            8 => SdkError::InvalidSize,
            9 => SdkError::InvalidImageType,
            10 => SdkError::OutOfBoundary,
            11 => SdkError::Timeout,
            12 => SdkError::InvalidSequence,
            13 => SdkError::BufferTooSmall,
            14 => SdkError::VideoModeActive,
            15 => SdkError::ExposureInProgress,
            16 => SdkError::GeneralError,
            17 => SdkError::InvalidMode,
            18 => SdkError::InvalidDirection,
            19 => SdkError::UnknownSensorType,
            other => SdkError::Unknown(other),
        };
        Some(err)
    }

    /// Turn a raw status code into a `Result`.
    pub fn check(code: i32) -> Result<(), SdkError> {
        match Self::from_code(code) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    pub fn class(&self) -> StatusClass {
        match self {
            SdkError::Timeout => StatusClass::Timeout,
            SdkError::CameraRemoved => StatusClass::DeviceRemoved,
            SdkError::CameraClosed
            | SdkError::InvalidSequence
            | SdkError::VideoModeActive
            | SdkError::ExposureInProgress
            | SdkError::InvalidMode => StatusClass::InvalidState,
            _ => StatusClass::GeneralError,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SdkError::Timeout)
    }
}

// =============================================================================
// Driver errors
// =============================================================================

#[derive(Error, Debug)]
pub enum CameraError {
    /// An SDK call failed. `operation` names the call for the log line.
    #[error("{operation} failed ({source})")]
    Sdk {
        operation: &'static str,
        #[source]
        source: SdkError,
    },

    /// Sub-frame rejected before touching the hardware.
    #[error("Subframe out of range: {0}")]
    InvalidSubframe(String),

    /// The requested change needs acquisition to be stopped first.
    #[error("Camera busy: {0}")]
    Busy(String),

    /// The connected model lacks the capability.
    #[error("{feature} is not supported by {model}")]
    Unsupported { feature: &'static str, model: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Camera is not connected")]
    NotConnected,

    #[error("Camera is already connected")]
    AlreadyConnected,
}

impl CameraError {
    pub fn sdk(operation: &'static str, source: SdkError) -> Self {
        CameraError::Sdk { operation, source }
    }

    /// The SDK status behind this error, if it came from the SDK.
    pub fn sdk_status(&self) -> Option<SdkError> {
        match self {
            CameraError::Sdk { source, .. } => Some(*source),
            _ => None,
        }
    }
}

/// Error types for settings and persisted camera configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Parse or extraction failure (invalid TOML, wrong types, bad env value)
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Values that parse but make no sense
    #[error("Config validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),
}
