//! Error taxonomy for acquisition and pose extraction.
//!
//! Errors fall into three classes:
//! - Fatal: the camera cannot be attached or the session is gone. Abort startup.
//! - Recoverable: a single grab cycle failed. Skip the cycle and retry later.
//! - Data: the image handed to the extractor is malformed.

use thiserror::Error;

use crate::frame::DeviceTag;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VisionError {
    #[error("camera {serial} could not be found")]
    DeviceNotFound { serial: String },

    #[error("a session needs between 1 and 4 devices, got {0}")]
    InvalidDeviceCount(usize),

    #[error("no frame from device {tag} before timeout")]
    FrameTimeout { tag: DeviceTag },

    #[error("device {tag} was not ready to trigger")]
    TriggerNotReady { tag: DeviceTag },

    #[error("device {tag} runtime error: {reason}")]
    Device { tag: DeviceTag, reason: String },

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("frame shape {actual} does not match buffer shape {expected}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("acquisition session has been shut down")]
    SessionClosed,
}

impl VisionError {
    /// True when the caller should simply retry on its next cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VisionError::FrameTimeout { .. }
                | VisionError::TriggerNotReady { .. }
                | VisionError::Device { .. }
                | VisionError::ShapeMismatch { .. }
        )
    }

    /// True for errors that must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VisionError::DeviceNotFound { .. }
                | VisionError::InvalidDeviceCount(_)
                | VisionError::SessionClosed
        )
    }

    pub(crate) fn device(tag: DeviceTag, reason: impl Into<String>) -> Self {
        VisionError::Device {
            tag,
            reason: reason.into(),
        }
    }
}

pub type VisionResult<T> = std::result::Result<T, VisionError>;
