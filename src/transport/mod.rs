//! Device-transport contract.
//!
//! The core never talks to camera drivers directly. It depends on a transport
//! that can:
//! - Attach a device handle to a physical serial (or the first free device)
//! - Open/close the device and report its frame size
//! - Run a continuous grab loop that keeps only the latest image; older
//!   undelivered frames are dropped at the source
//! - Poll trigger readiness and execute numbered software triggers
//! - Deliver every completed frame through the `FramePublisher` it was given
//!   at attach time, on the transport's own thread, stamped with the number
//!   of the trigger that produced it
//!
//! Attaching implies software-trigger configuration: devices only produce a
//! frame when `execute_trigger` is called.
//!
//! `sim` provides an in-process transport for tests and the demo binary.

use std::time::Duration;

use crate::error::VisionResult;
use crate::frame::DeviceTag;
use crate::sink::FramePublisher;

pub mod sim;

pub use sim::{SceneObject, SimDeviceSpec, SimReadiness, SimScene, SimTransport};

/// Source of device handles.
pub trait DeviceTransport {
    /// Bind a handle to the device with `serial`, or to the first free device
    /// when `serial` is `None`. Frames from the device are delivered to
    /// `publisher`, which stamps them with its tag.
    fn attach(
        &mut self,
        serial: Option<&str>,
        publisher: FramePublisher,
    ) -> VisionResult<Box<dyn CameraDevice>>;
}

/// Handle to one attached physical camera.
///
/// Owned exclusively by an `AcquisitionSession`; the transport's callback
/// thread only ever sees the publisher.
pub trait CameraDevice: Send {
    fn serial(&self) -> &str;

    fn tag(&self) -> DeviceTag;

    fn open(&mut self) -> VisionResult<()>;

    fn close(&mut self) -> VisionResult<()>;

    fn is_open(&self) -> bool;

    /// Width and height of delivered frames. Requires an open device.
    fn frame_size(&self) -> VisionResult<(u32, u32)>;

    /// Channels per delivered pixel (1 mono, 3 color).
    fn channels(&self) -> u8 {
        1
    }

    /// Start the latest-image-only grab loop.
    fn start_grabbing(&mut self) -> VisionResult<()>;

    fn stop_grabbing(&mut self) -> VisionResult<()>;

    fn is_grabbing(&self) -> bool;

    /// Wait up to `timeout` for the device to accept a trigger.
    /// A zero timeout polls and returns immediately.
    fn wait_trigger_ready(&mut self, timeout: Duration) -> VisionResult<bool>;

    /// Fire a software trigger. Triggers are numbered from 1 per device.
    fn execute_trigger(&mut self) -> VisionResult<()>;

    /// Number of the most recent trigger, 0 before the first one.
    fn last_trigger(&self) -> u64;

    /// Detach and destroy the underlying device. The handle is dead afterwards.
    fn release(&mut self) -> VisionResult<()>;
}
