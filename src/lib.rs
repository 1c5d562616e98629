//! Pick Vision
//!
//! Triggered frame acquisition and pick-pose extraction for a robotic
//! pick-and-place cell.
//!
//! # Architecture
//!
//! Every grab follows the same path:
//!
//! 1. **Trigger**: the application thread fires a software trigger on each
//!    camera of a session.
//! 2. **Deliver**: the driver's callback thread publishes the frame into the
//!    session's `FrameSink`, one slot per device tag, latest frame wins.
//! 3. **Collect**: the application thread waits on the sink with a bounded
//!    timeout, retrying whole trigger cycles on a miss.
//! 4. **Extract**: the top camera's image is thresholded and every outer
//!    contour becomes an `(x, y, angle)` pick candidate.
//!
//! # Module Structure
//!
//! - `frame`: Pixel buffers, shapes and device tags
//! - `sink`: Per-session frame mailbox shared with the callback thread
//! - `transport`: Device driver contract and the simulated driver
//! - `trigger`: Trigger + bounded wait with retry
//! - `session`: Multi-device acquisition lifecycle
//! - `pose`: Contour-based pose extraction
//! - `camera`: Top/detail camera roles
//! - `config`: File + environment configuration

pub mod camera;
pub mod config;
pub mod error;
pub mod frame;
pub mod pose;
pub mod session;
pub mod sink;
pub mod transport;
pub mod trigger;

pub use camera::{Camera, CameraRole, Capture};
pub use config::RigConfig;
pub use error::{VisionError, VisionResult};
pub use frame::{DeviceTag, Frame, FrameShape};
pub use pose::{AngleConvention, ExtractorConfig, PoseCandidate, PoseExtractor, Roi};
pub use session::{AcquisitionSession, SessionConfig, SessionState, MAX_SESSION_DEVICES};
pub use sink::{FramePublisher, FrameSink, SinkStats};
pub use transport::{CameraDevice, DeviceTransport, SimTransport};
pub use trigger::{ReadinessPolicy, TriggerController, TriggerSettings};
