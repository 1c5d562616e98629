//! Software trigger + bounded wait.
//!
//! One cycle fires every device that is ready, then takes exactly one frame
//! per device from the sink. A cycle that misses any frame is repeated as a
//! whole, up to `max_retries` cycles in total. A caller never sees a partial
//! frame set: either every device delivered within the cycle or the call fails
//! naming the device that did not.
//!
//! Only a frame answering a device's latest trigger counts. A frame triggered
//! by an earlier, failed call may still land in the sink afterwards; it is
//! skipped rather than handed out one grab late.

use std::time::Duration;

use crate::error::{VisionError, VisionResult};
use crate::frame::Frame;
use crate::sink::FrameSink;
use crate::transport::CameraDevice;

pub const DEFAULT_TRIGGER_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_ARRAY_READY_WAIT: Duration = Duration::from_millis(10);

/// What to do with a device that is not ready to accept a trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadinessPolicy {
    /// Poll without waiting; skip the trigger for this cycle if not ready.
    Skip,
    /// Wait up to the given duration; fail the cycle if still not ready.
    Require(Duration),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerSettings {
    /// How long to wait for each device's frame within one cycle.
    pub timeout: Duration,
    /// Total number of trigger+wait cycles before giving up (at least 1).
    pub max_retries: u32,
    pub readiness: ReadinessPolicy,
}

impl TriggerSettings {
    /// Defaults for a single camera: a device that is busy is simply skipped.
    pub fn single() -> Self {
        Self {
            timeout: DEFAULT_TRIGGER_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            readiness: ReadinessPolicy::Skip,
        }
    }

    /// Defaults for a synchronized array: a device that is not ready fails the grab.
    pub fn array() -> Self {
        Self {
            readiness: ReadinessPolicy::Require(DEFAULT_ARRAY_READY_WAIT),
            ..Self::single()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    /// Upper bound on how long a failing `trigger_and_wait` can block.
    pub fn worst_case(&self, devices: usize) -> Duration {
        let ready_wait = match self.readiness {
            ReadinessPolicy::Skip => Duration::ZERO,
            ReadinessPolicy::Require(wait) => wait,
        };
        let per_cycle = self
            .timeout
            .saturating_add(ready_wait)
            .saturating_mul(devices.max(1) as u32);
        per_cycle.saturating_mul(self.max_retries.max(1))
    }
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self::single()
    }
}

#[derive(Clone, Debug)]
pub struct TriggerController {
    settings: TriggerSettings,
}

impl TriggerController {
    pub fn new(settings: TriggerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TriggerSettings {
        &self.settings
    }

    /// Trigger `devices` and collect one fresh frame per device, in slice order.
    pub fn trigger_and_wait(
        &self,
        devices: &mut [Box<dyn CameraDevice>],
        sink: &FrameSink,
    ) -> VisionResult<Vec<Frame>> {
        let result = self.run_cycles(devices, sink);
        if result.is_err() {
            for device in devices.iter() {
                sink.discard(device.tag());
            }
        }
        result
    }

    fn run_cycles(
        &self,
        devices: &mut [Box<dyn CameraDevice>],
        sink: &FrameSink,
    ) -> VisionResult<Vec<Frame>> {
        let cycles = self.settings.max_retries.max(1);
        let mut last_missing = None;

        for cycle in 1..=cycles {
            self.fire(devices)?;

            let mut frames = Vec::with_capacity(devices.len());
            let mut missing = None;
            for device in devices.iter() {
                // A device skipped as busy still owes the frame for its last trigger.
                let frame =
                    sink.take_since(device.tag(), device.last_trigger(), self.settings.timeout);
                match frame {
                    Some(frame) => frames.push(frame),
                    None => {
                        missing = Some(device.tag());
                        break;
                    }
                }
            }

            match missing {
                None => return Ok(frames),
                Some(tag) => {
                    log::debug!(
                        "TriggerController: no frame from {} in cycle {}/{}",
                        tag,
                        cycle,
                        cycles
                    );
                    last_missing = Some(tag);
                }
            }
        }

        match last_missing {
            Some(tag) => Err(VisionError::FrameTimeout { tag }),
            None => Err(VisionError::InvalidDeviceCount(devices.len())),
        }
    }

    fn fire(&self, devices: &mut [Box<dyn CameraDevice>]) -> VisionResult<()> {
        for device in devices.iter_mut() {
            let tag = device.tag();
            match self.settings.readiness {
                ReadinessPolicy::Skip => {
                    if !device.wait_trigger_ready(Duration::ZERO)? {
                        log::trace!("TriggerController: {} busy, trigger skipped", tag);
                        continue;
                    }
                }
                ReadinessPolicy::Require(wait) => {
                    if !device.wait_trigger_ready(wait)? {
                        return Err(VisionError::TriggerNotReady { tag });
                    }
                }
            }
            device.execute_trigger()?;
        }
        Ok(())
    }
}
