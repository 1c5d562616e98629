//! Acquisition session: N attached cameras sharing one frame sink.
//!
//! Lifecycle:
//!
//! ```text
//! Uninitialized -> Attached -> (open, read size, close)
//!               -> Opened -> Grabbing      (lazily, on the first grab)
//!               -> Stopped                 (close(); grabbing restarts on the next grab)
//!               -> Destroyed               (shutdown(); terminal, idempotent)
//! ```
//!
//! Every device is software-triggered and runs a latest-image-only grab loop. The
//! session owns the device handles; the transport's callback thread only
//! holds a `FramePublisher` into the session's private sink.

use std::sync::Arc;

use crate::error::{VisionError, VisionResult};
use crate::frame::{DeviceTag, Frame, FrameShape};
use crate::sink::{FrameSink, SinkStats};
use crate::transport::{CameraDevice, DeviceTransport};
use crate::trigger::{TriggerController, TriggerSettings};

pub const MAX_SESSION_DEVICES: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Attached,
    Opened,
    Grabbing,
    Stopped,
    Destroyed,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// One entry per device; `None` binds the first available device.
    pub serials: Vec<Option<String>>,
    /// Convert color frames to luma before handing them out.
    pub grayscale: bool,
    pub trigger: TriggerSettings,
}

impl SessionConfig {
    pub fn single(serial: Option<&str>) -> Self {
        Self {
            serials: vec![serial.map(str::to_string)],
            grayscale: true,
            trigger: TriggerSettings::single(),
        }
    }

    pub fn array<S: AsRef<str>>(serials: &[S]) -> Self {
        Self {
            serials: serials
                .iter()
                .map(|serial| Some(serial.as_ref().to_string()))
                .collect(),
            grayscale: true,
            trigger: TriggerSettings::array(),
        }
    }

    pub fn with_grayscale(mut self, grayscale: bool) -> Self {
        self.grayscale = grayscale;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerSettings) -> Self {
        self.trigger = trigger;
        self
    }
}

pub struct AcquisitionSession {
    devices: Vec<Box<dyn CameraDevice>>,
    shapes: Vec<FrameShape>,
    sink: Arc<FrameSink>,
    trigger: TriggerController,
    grayscale: bool,
    state: SessionState,
}

impl AcquisitionSession {
    /// Attach every configured device and read its frame size.
    ///
    /// Fails with `DeviceNotFound` when a serial cannot be located; nothing
    /// stays attached in that case.
    pub fn open(transport: &mut dyn DeviceTransport, config: SessionConfig) -> VisionResult<Self> {
        let count = config.serials.len();
        if count == 0 || count > MAX_SESSION_DEVICES {
            return Err(VisionError::InvalidDeviceCount(count));
        }

        let sink = Arc::new(FrameSink::new());
        let mut devices: Vec<Box<dyn CameraDevice>> = Vec::with_capacity(count);
        for (index, serial) in config.serials.iter().enumerate() {
            let publisher = sink.publisher(DeviceTag::new(index as u8));
            match transport.attach(serial.as_deref(), publisher) {
                Ok(device) => devices.push(device),
                Err(err) => {
                    log::error!(
                        "AcquisitionSession: camera {} could not be attached: {}",
                        serial.as_deref().unwrap_or("<first available>"),
                        err
                    );
                    release_all(&mut devices);
                    return Err(err);
                }
            }
        }

        let mut session = Self {
            devices,
            shapes: Vec::with_capacity(count),
            sink,
            trigger: TriggerController::new(config.trigger),
            grayscale: config.grayscale,
            state: SessionState::Attached,
        };
        if let Err(err) = session.read_shapes() {
            session.shutdown();
            return Err(err);
        }

        log::info!(
            "AcquisitionSession: cameras {:?} connected ({})",
            session.serials(),
            session
                .shapes
                .iter()
                .map(FrameShape::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(session)
    }

    // Open briefly to learn the frame size, then close so an idle session
    // does not hold the devices open.
    fn read_shapes(&mut self) -> VisionResult<()> {
        for device in self.devices.iter_mut() {
            device.open()?;
            let size = device.frame_size();
            device.close()?;
            let (width, height) = size?;
            let channels = if self.grayscale { 1 } else { device.channels() };
            self.shapes.push(FrameShape::new(width, height, channels));
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn serials(&self) -> Vec<String> {
        self.devices
            .iter()
            .map(|device| device.serial().to_string())
            .collect()
    }

    /// Shape of frames handed out for device 0.
    pub fn shape(&self) -> FrameShape {
        self.shapes[0]
    }

    /// Shapes of frames handed out, indexed by device tag.
    pub fn shapes(&self) -> &[FrameShape] {
        &self.shapes
    }

    /// Zero-filled buffers sized for `grab_frame_set`.
    pub fn blank_buffers(&self) -> Vec<Frame> {
        self.shapes.iter().copied().map(Frame::blank_for).collect()
    }

    pub fn grayscale(&self) -> bool {
        self.grayscale
    }

    pub fn is_attached(&self) -> bool {
        !matches!(
            self.state,
            SessionState::Uninitialized | SessionState::Destroyed
        )
    }

    pub fn is_grabbing(&self) -> bool {
        self.state == SessionState::Grabbing
    }

    pub fn sink_stats(&self) -> SinkStats {
        self.sink.stats()
    }

    pub fn trigger_settings(&self) -> &TriggerSettings {
        self.trigger.settings()
    }

    /// Grab one frame from a single-device session into `out`.
    ///
    /// On failure `out` keeps its previous contents and the caller should
    /// retry on its next cycle.
    pub fn grab_frame(&mut self, out: &mut Frame) -> VisionResult<()> {
        if self.devices.len() != 1 {
            return Err(VisionError::InvalidDeviceCount(self.devices.len()));
        }
        let frames = self.acquire()?;
        frames[0].copy_into(out)
    }

    /// Grab one frame per device into `out`, indexed by device tag.
    ///
    /// Either every buffer is filled from this grab or none is touched.
    pub fn grab_frame_set(&mut self, out: &mut [Frame]) -> VisionResult<()> {
        if out.len() != self.devices.len() {
            return Err(VisionError::InvalidDeviceCount(out.len()));
        }
        let frames = self.acquire()?;
        for (frame, buffer) in frames.iter().zip(out.iter()) {
            if frame.shape() != buffer.shape() {
                return Err(VisionError::ShapeMismatch {
                    expected: buffer.shape().to_string(),
                    actual: frame.shape().to_string(),
                });
            }
        }
        for (frame, buffer) in frames.iter().zip(out.iter_mut()) {
            frame.copy_into(buffer)?;
        }
        Ok(())
    }

    fn acquire(&mut self) -> VisionResult<Vec<Frame>> {
        if self.state == SessionState::Destroyed {
            return Err(VisionError::SessionClosed);
        }
        self.ensure_grabbing()?;

        match self.trigger.trigger_and_wait(&mut self.devices, &self.sink) {
            Ok(frames) => Ok(frames
                .into_iter()
                .map(|frame| frame.formatted(self.grayscale))
                .collect()),
            Err(err) => {
                log::warn!("AcquisitionSession: grab failed: {}", err);
                Err(err)
            }
        }
    }

    fn ensure_grabbing(&mut self) -> VisionResult<()> {
        if self.state == SessionState::Grabbing {
            return Ok(());
        }
        for device in self.devices.iter_mut() {
            if !device.is_open() {
                device.open()?;
            }
        }
        self.state = SessionState::Opened;
        for device in self.devices.iter_mut() {
            if !device.is_grabbing() {
                device.start_grabbing()?;
            }
        }
        self.state = SessionState::Grabbing;
        log::info!("AcquisitionSession: grabbing on {:?}", self.serials());
        Ok(())
    }

    /// Stop grabbing and close every device, keeping them attached.
    ///
    /// The next grab reopens them. Errors are logged and suppressed.
    pub fn close(&mut self) {
        if matches!(
            self.state,
            SessionState::Destroyed | SessionState::Uninitialized
        ) {
            return;
        }
        for device in self.devices.iter_mut() {
            if device.is_grabbing() {
                if let Err(err) = device.stop_grabbing() {
                    log::debug!("AcquisitionSession: stop {} failed: {}", device.serial(), err);
                }
            }
            if device.is_open() {
                if let Err(err) = device.close() {
                    log::debug!("AcquisitionSession: close {} failed: {}", device.serial(), err);
                }
            }
        }
        if self.state != SessionState::Attached {
            self.state = SessionState::Stopped;
        }
    }

    /// Stop, close and release every device, then tear down the sink.
    ///
    /// Safe to call repeatedly and while frames are still in flight.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        self.close();
        release_all(&mut self.devices);
        self.sink.close();
        self.state = SessionState::Destroyed;
        log::info!("AcquisitionSession: shut down");
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn release_all(devices: &mut [Box<dyn CameraDevice>]) {
    for device in devices.iter_mut() {
        if let Err(err) = device.release() {
            log::debug!("AcquisitionSession: release {} failed: {}", device.serial(), err);
        }
    }
}
