//! Simulated device transport.
//!
//! `SimTransport` stands in for the vendor driver layer in tests and in the
//! demo binary. Each attached device:
//! - Reports a fixed frame size and channel count
//! - Runs its own grab-loop thread once grabbing starts
//! - Renders a synthetic scene (dark rotated rectangles on a light
//!   background) for every software trigger
//! - Delivers frames through its `FramePublisher`, never through the caller
//!
//! Failure knobs: per-device latency, missed frames, devices that are never
//! ready to trigger, and serials that do not exist.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use rand::Rng;

use super::{CameraDevice, DeviceTransport};
use crate::error::{VisionError, VisionResult};
use crate::frame::{DeviceTag, Frame};
use crate::sink::FramePublisher;

/// A dark rectangle in the simulated scene.
///
/// `angle_deg` is the long axis measured counter-clockwise from the image's
/// horizontal axis with the image y axis pointing down.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneObject {
    pub center_x: f64,
    pub center_y: f64,
    pub length: f64,
    pub width: f64,
    pub angle_deg: f64,
    pub intensity: u8,
}

impl SceneObject {
    pub fn new(center_x: f64, center_y: f64, length: f64, width: f64, angle_deg: f64) -> Self {
        Self {
            center_x,
            center_y,
            length,
            width,
            angle_deg,
            intensity: 0,
        }
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        let theta = self.angle_deg.to_radians();
        let (dx, dy) = (x - self.center_x, y - self.center_y);
        // Long-axis direction in image coordinates is (cos, -sin).
        let along = dx * theta.cos() - dy * theta.sin();
        let across = dx * theta.sin() + dy * theta.cos();
        along.abs() <= self.length / 2.0 && across.abs() <= self.width / 2.0
    }
}

/// Synthetic scene rendered on every trigger.
#[derive(Clone, Debug, PartialEq)]
pub struct SimScene {
    pub background: u8,
    pub objects: Vec<SceneObject>,
    /// Maximum per-pixel noise amplitude added to the background.
    pub noise: u8,
}

impl Default for SimScene {
    fn default() -> Self {
        Self {
            background: 200,
            objects: Vec::new(),
            noise: 0,
        }
    }
}

impl SimScene {
    pub fn with_object(mut self, object: SceneObject) -> Self {
        self.objects.push(object);
        self
    }

    pub fn with_noise(mut self, noise: u8) -> Self {
        self.noise = noise;
        self
    }

    /// Render the scene at `width` × `height` with `channels` interleaved
    /// channels (gray replicated across color channels).
    pub fn render(&self, width: u32, height: u32, channels: u8) -> Frame {
        let channels = if channels == 3 { 3 } else { 1 };
        let mut rng = rand::thread_rng();
        let mut data = Vec::with_capacity(width as usize * height as usize * channels as usize);
        for y in 0..height {
            for x in 0..width {
                let (px, py) = (x as f64, y as f64);
                let value = match self.objects.iter().find(|o| o.contains(px, py)) {
                    Some(object) => object.intensity,
                    None if self.noise > 0 => self
                        .background
                        .saturating_sub(rng.gen_range(0..=self.noise)),
                    None => self.background,
                };
                for _ in 0..channels {
                    data.push(value);
                }
            }
        }
        Frame::new(data, width, height, channels)
            .unwrap_or_else(|_| Frame::blank(width, height, channels))
    }
}

/// Trigger readiness behavior of a simulated device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SimReadiness {
    #[default]
    Always,
    Never,
}

/// Description of one simulated camera.
#[derive(Clone, Debug)]
pub struct SimDeviceSpec {
    pub serial: String,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub scene: SimScene,
    /// Delay between trigger and delivery.
    pub latency: Duration,
    pub readiness: SimReadiness,
    /// Never deliver frames (the trigger is accepted, the event is lost).
    pub silent: bool,
}

impl SimDeviceSpec {
    pub fn new(serial: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            serial: serial.into(),
            width,
            height,
            channels: 1,
            scene: SimScene::default(),
            latency: Duration::ZERO,
            readiness: SimReadiness::Always,
            silent: false,
        }
    }

    pub fn color(mut self) -> Self {
        self.channels = 3;
        self
    }

    pub fn scene(mut self, scene: SimScene) -> Self {
        self.scene = scene;
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.readiness = SimReadiness::Never;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// In-process transport backed by `SimDeviceSpec`s.
#[derive(Default)]
pub struct SimTransport {
    specs: Vec<SimDeviceSpec>,
    attached: Arc<Mutex<HashSet<String>>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, spec: SimDeviceSpec) -> Self {
        self.specs.push(spec);
        self
    }

    fn is_attached(&self, serial: &str) -> bool {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(serial)
    }
}

impl DeviceTransport for SimTransport {
    fn attach(
        &mut self,
        serial: Option<&str>,
        publisher: FramePublisher,
    ) -> VisionResult<Box<dyn CameraDevice>> {
        let spec = match serial {
            Some(serial) => self
                .specs
                .iter()
                .find(|spec| spec.serial == serial && !self.is_attached(serial)),
            None => self.specs.iter().find(|spec| !self.is_attached(&spec.serial)),
        }
        .cloned()
        .ok_or_else(|| VisionError::DeviceNotFound {
            serial: serial.unwrap_or("<first available>").to_string(),
        })?;

        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.serial.clone());
        log::info!(
            "SimTransport: attached {} as {} ({}x{}x{})",
            spec.serial,
            publisher.tag(),
            spec.width,
            spec.height,
            spec.channels
        );
        Ok(Box::new(SimDevice::new(
            spec,
            publisher,
            Arc::clone(&self.attached),
        )))
    }
}

enum GrabCommand {
    Trigger(u64),
    Stop,
}

struct GrabLoop {
    commands: Sender<GrabCommand>,
    handle: JoinHandle<()>,
}

struct SimDevice {
    spec: SimDeviceSpec,
    publisher: FramePublisher,
    attached: Arc<Mutex<HashSet<String>>>,
    open: bool,
    released: bool,
    triggers: u64,
    grab_loop: Option<GrabLoop>,
}

impl SimDevice {
    fn new(
        spec: SimDeviceSpec,
        publisher: FramePublisher,
        attached: Arc<Mutex<HashSet<String>>>,
    ) -> Self {
        Self {
            spec,
            publisher,
            attached,
            open: false,
            released: false,
            triggers: 0,
            grab_loop: None,
        }
    }

    fn ensure_alive(&self) -> VisionResult<()> {
        if self.released {
            return Err(VisionError::device(self.tag(), "device has been released"));
        }
        Ok(())
    }

    fn run_grab_loop(
        spec: SimDeviceSpec,
        publisher: FramePublisher,
        commands: Receiver<GrabCommand>,
    ) {
        let mut frame_count = 0u64;
        while let Ok(GrabCommand::Trigger(mut trigger)) = commands.recv() {
            // Latest image only: triggers queued behind a slow exposure collapse
            // into one frame for the newest of them.
            let mut stop = false;
            for queued in commands.try_iter() {
                match queued {
                    GrabCommand::Trigger(next) => trigger = next,
                    GrabCommand::Stop => stop = true,
                }
            }
            if !spec.latency.is_zero() {
                thread::sleep(spec.latency);
            }
            frame_count += 1;
            if spec.silent {
                log::trace!("SimDevice {}: frame for trigger {} lost", spec.serial, trigger);
            } else {
                let frame = spec.scene.render(spec.width, spec.height, spec.channels);
                publisher.publish(trigger, frame);
            }
            if stop {
                break;
            }
        }
        log::debug!(
            "SimDevice {}: grab loop exited after {} frames",
            spec.serial,
            frame_count
        );
    }
}

impl CameraDevice for SimDevice {
    fn serial(&self) -> &str {
        &self.spec.serial
    }

    fn tag(&self) -> DeviceTag {
        self.publisher.tag()
    }

    fn open(&mut self) -> VisionResult<()> {
        self.ensure_alive()?;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> VisionResult<()> {
        if self.grab_loop.is_some() {
            return Err(VisionError::device(self.tag(), "close while grabbing"));
        }
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn frame_size(&self) -> VisionResult<(u32, u32)> {
        if !self.open {
            return Err(VisionError::device(self.tag(), "device is not open"));
        }
        Ok((self.spec.width, self.spec.height))
    }

    fn channels(&self) -> u8 {
        self.spec.channels
    }

    fn start_grabbing(&mut self) -> VisionResult<()> {
        self.ensure_alive()?;
        if !self.open {
            return Err(VisionError::device(self.tag(), "device is not open"));
        }
        if self.grab_loop.is_some() {
            return Ok(());
        }
        let (commands, receiver) = unbounded();
        let spec = self.spec.clone();
        let publisher = self.publisher.clone();
        let handle = thread::Builder::new()
            .name(format!("sim-grab-{}", self.spec.serial))
            .spawn(move || Self::run_grab_loop(spec, publisher, receiver))
            .map_err(|err| VisionError::device(self.tag(), err.to_string()))?;
        self.grab_loop = Some(GrabLoop { commands, handle });
        Ok(())
    }

    fn stop_grabbing(&mut self) -> VisionResult<()> {
        if let Some(grab_loop) = self.grab_loop.take() {
            let _ = grab_loop.commands.send(GrabCommand::Stop);
            if grab_loop.handle.join().is_err() {
                return Err(VisionError::device(self.tag(), "grab loop panicked"));
            }
        }
        Ok(())
    }

    fn is_grabbing(&self) -> bool {
        self.grab_loop.is_some()
    }

    fn wait_trigger_ready(&mut self, timeout: Duration) -> VisionResult<bool> {
        if self.grab_loop.is_none() {
            return Err(VisionError::device(self.tag(), "device is not grabbing"));
        }
        match self.spec.readiness {
            SimReadiness::Always => Ok(true),
            SimReadiness::Never => {
                if !timeout.is_zero() {
                    thread::sleep(timeout);
                }
                Ok(false)
            }
        }
    }

    fn execute_trigger(&mut self) -> VisionResult<()> {
        let tag = self.tag();
        let grab_loop = self
            .grab_loop
            .as_ref()
            .ok_or_else(|| VisionError::device(tag, "device is not grabbing"))?;
        let trigger = self.triggers + 1;
        grab_loop
            .commands
            .send(GrabCommand::Trigger(trigger))
            .map_err(|_| VisionError::device(tag, "grab loop is not running"))?;
        self.triggers = trigger;
        Ok(())
    }

    fn last_trigger(&self) -> u64 {
        self.triggers
    }

    fn release(&mut self) -> VisionResult<()> {
        if self.released {
            return Ok(());
        }
        self.stop_grabbing()?;
        self.open = false;
        self.released = true;
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.spec.serial);
        Ok(())
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::FrameSink;

    #[test]
    fn unknown_serial_is_not_found() {
        let mut transport = SimTransport::new().with_device(SimDeviceSpec::new("a", 8, 8));
        let sink = Arc::new(FrameSink::new());

        let err = transport
            .attach(Some("b"), sink.publisher(DeviceTag::new(0)))
            .err()
            .unwrap();
        assert_eq!(
            err,
            VisionError::DeviceNotFound {
                serial: "b".to_string()
            }
        );
    }

    #[test]
    fn first_available_skips_attached_devices() {
        let mut transport = SimTransport::new()
            .with_device(SimDeviceSpec::new("a", 8, 8))
            .with_device(SimDeviceSpec::new("b", 8, 8));
        let sink = Arc::new(FrameSink::new());

        let first = transport.attach(None, sink.publisher(DeviceTag::new(0))).unwrap();
        let second = transport.attach(None, sink.publisher(DeviceTag::new(1))).unwrap();
        assert_eq!(first.serial(), "a");
        assert_eq!(second.serial(), "b");
        assert!(transport.attach(None, sink.publisher(DeviceTag::new(2))).is_err());
    }

    #[test]
    fn trigger_delivers_a_tagged_frame() {
        let mut transport = SimTransport::new().with_device(SimDeviceSpec::new("a", 6, 4));
        let sink = Arc::new(FrameSink::new());
        let mut device = transport.attach(None, sink.publisher(DeviceTag::new(2))).unwrap();

        device.open().unwrap();
        assert_eq!(device.frame_size().unwrap(), (6, 4));
        device.start_grabbing().unwrap();
        assert!(device.wait_trigger_ready(Duration::ZERO).unwrap());
        device.execute_trigger().unwrap();
        assert_eq!(device.last_trigger(), 1);

        let frame = sink
            .take_since(DeviceTag::new(2), 1, Duration::from_secs(2))
            .unwrap();
        assert_eq!((frame.width(), frame.height()), (6, 4));
        device.release().unwrap();
        assert!(!device.is_grabbing());
    }

    #[test]
    fn scene_renders_dark_objects_on_light_background() {
        let scene = SimScene::default().with_object(SceneObject::new(5.0, 5.0, 4.0, 2.0, 0.0));
        let frame = scene.render(10, 10, 1);
        let px = |x: usize, y: usize| frame.pixels()[y * 10 + x];

        assert_eq!(px(5, 5), 0);
        assert_eq!(px(0, 0), 200);
        // 4 px long horizontally, 2 px tall.
        assert_eq!(px(7, 5), 0);
        assert_eq!(px(5, 7), 200);
    }
}
