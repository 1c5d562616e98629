//! Camera roles.
//!
//! A `Camera` binds one single-device `AcquisitionSession` to what the cell
//! does with its images:
//! - `Top`: overhead view; every capture is run through the pose extractor.
//! - `Detail`: close-up view; captures return the image only.
//!
//! `capture` never fails loudly. A grab that times out or hits a transient
//! device error yields `None` so a periodic action loop can skip the cycle.

use crate::error::VisionResult;
use crate::frame::{Frame, FrameShape};
use crate::pose::{PoseCandidate, PoseExtractor};
use crate::session::{AcquisitionSession, SessionConfig};
use crate::transport::DeviceTransport;

pub const DEFAULT_TOP_SERIAL: &str = "22290932";
pub const DEFAULT_DETAIL_SERIAL: &str = "21565643";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraRole {
    Top,
    Detail,
}

impl CameraRole {
    pub fn name(self) -> &'static str {
        match self {
            CameraRole::Top => "top",
            CameraRole::Detail => "detail",
        }
    }
}

/// Result of one successful capture.
#[derive(Clone, Debug)]
pub enum Capture {
    Top {
        image: Frame,
        poses: Vec<PoseCandidate>,
    },
    Detail {
        image: Frame,
    },
}

impl Capture {
    pub fn image(&self) -> &Frame {
        match self {
            Capture::Top { image, .. } | Capture::Detail { image } => image,
        }
    }

    /// Pose candidates; always empty for detail captures.
    pub fn poses(&self) -> &[PoseCandidate] {
        match self {
            Capture::Top { poses, .. } => poses,
            Capture::Detail { .. } => &[],
        }
    }
}

pub struct Camera {
    role: CameraRole,
    session: AcquisitionSession,
    extractor: Option<PoseExtractor>,
    buffer: Frame,
}

impl Camera {
    /// Attach the role's camera. A missing device is fatal for startup.
    pub fn open(
        role: CameraRole,
        transport: &mut dyn DeviceTransport,
        session: SessionConfig,
        extractor: PoseExtractor,
    ) -> VisionResult<Self> {
        let session = AcquisitionSession::open(transport, session)?;
        let buffer = Frame::blank_for(session.shape());
        let extractor = match role {
            CameraRole::Top => Some(extractor),
            CameraRole::Detail => None,
        };
        log::info!(
            "Camera: {} role on {:?}",
            role.name(),
            session.serials()
        );
        Ok(Self {
            role,
            session,
            extractor,
            buffer,
        })
    }

    pub fn top(transport: &mut dyn DeviceTransport, serial: Option<&str>) -> VisionResult<Self> {
        Self::open(
            CameraRole::Top,
            transport,
            SessionConfig::single(serial.or(Some(DEFAULT_TOP_SERIAL))),
            PoseExtractor::top(),
        )
    }

    pub fn detail(transport: &mut dyn DeviceTransport, serial: Option<&str>) -> VisionResult<Self> {
        Self::open(
            CameraRole::Detail,
            transport,
            SessionConfig::single(serial.or(Some(DEFAULT_DETAIL_SERIAL))),
            PoseExtractor::detail(),
        )
    }

    pub fn role(&self) -> CameraRole {
        self.role
    }

    pub fn shape(&self) -> FrameShape {
        self.session.shape()
    }

    pub fn session(&self) -> &AcquisitionSession {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_attached()
    }

    /// Grab, format and (for the top role) extract poses.
    ///
    /// Returns `None` when this cycle produced nothing usable.
    pub fn capture(&mut self) -> Option<Capture> {
        if let Err(err) = self.session.grab_frame(&mut self.buffer) {
            log::warn!("Camera {}: capture skipped: {}", self.role.name(), err);
            return None;
        }
        let image = self.buffer.clone();
        match &self.extractor {
            None => Some(Capture::Detail { image }),
            Some(extractor) => match extractor.extract(&image) {
                Ok(poses) => Some(Capture::Top { image, poses }),
                Err(err) => {
                    log::error!("Camera {}: pose extraction failed: {}", self.role.name(), err);
                    None
                }
            },
        }
    }

    /// Stop grabbing and close the device; the next capture reopens it.
    pub fn close(&mut self) {
        self.session.close();
    }

    /// Release the camera for good. Idempotent.
    pub fn shutdown(&mut self) {
        self.session.shutdown();
    }
}
