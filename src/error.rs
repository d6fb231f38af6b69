//! Custom error types for the robot control core.
//!
//! This module defines the primary error type, `RobotError`, shared by the pose tree,
//! the motion dispatcher and the serial protocol driver. Using the `thiserror` crate,
//! it provides a centralized and consistent way to handle the failures that can occur
//! between a logical motion request and the firmware acknowledging it.
//!
//! ## Error Hierarchy
//!
//! - **`ProtocolTimeout`**: No acknowledgment was observed for a command, neither in the
//!   normal exchange nor in the single recovery attempt. Carries the command and the
//!   bound used by the final attempt.
//! - **`FrameNotFound`** / **`DuplicateFrame`**: A pose tree operation referenced a frame
//!   that is absent, or tried to insert one that already exists.
//! - **`Precondition`**: A caller broke an operation contract, e.g. an axis outside
//!   `{x, y, z}`, an unmapped axis, or a `move` missing a value for a mapped axis.
//! - **`DeviceNotFound`**: Serial discovery found no port matching a name or vendor ID.
//! - **`InvalidResponse`**: The firmware answered, but not with something we can parse.
//! - **`Io`** / **`Serial`** / **`Json`**: Wrapped lower-level failures.
//!
//! By using `#[from]`, `RobotError` can be created from underlying error types,
//! simplifying error handling throughout the crate with the `?` operator.

use std::time::Duration;

use thiserror::Error;

use crate::pose_tree::Frame;

/// Convenience alias for results using the crate error type.
pub type RobotResult<T> = std::result::Result<T, RobotError>;

/// Errors raised by the pose tree, the mover and the serial protocol driver.
#[derive(Error, Debug)]
pub enum RobotError {
    /// The firmware never acknowledged a command, even after recovery.
    #[error("Recovery attempted - no valid response for command {command:?} in {timeout:?}")]
    ProtocolTimeout {
        /// Command text as written to the port.
        command: String,
        /// Timeout bound of the final (recovery) attempt.
        timeout: Duration,
    },

    /// A frame referenced by a pose tree operation is not in the snapshot.
    #[error("Frame not found in pose tree: {0}")]
    FrameNotFound(Frame),

    /// A frame being inserted is already present in the snapshot.
    #[error("Frame already present in pose tree: {0}")]
    DuplicateFrame(Frame),

    /// An operation contract was violated by the caller.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// No attached serial device matched the discovery criteria.
    #[error("No serial device found matching {0}")]
    DeviceNotFound(String),

    /// The firmware replied with something that could not be interpreted.
    #[error("Unexpected response to {command:?}: {response:?}")]
    InvalidResponse {
        /// Command that produced the response.
        command: String,
        /// Raw (already echo-stripped) response text.
        response: String,
    },

    /// Standard I/O failure on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by the serial port layer.
    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Failure encoding or decoding a stored record.
    #[error("Record serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A thread panicked while holding the motion driver.
    #[error("Motion driver lock poisoned")]
    DriverPoisoned,
}

impl RobotError {
    /// Shorthand for building a [`RobotError::Precondition`].
    pub fn precondition(message: impl Into<String>) -> Self {
        RobotError::Precondition(message.into())
    }
}
