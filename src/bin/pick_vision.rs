//! pick_vision - capture loop for the pick-and-place cell
//!
//! This binary:
//! 1. Loads the rig configuration (file + environment)
//! 2. Attaches the top and detail cameras (optionally a synchronized array)
//! 3. Captures at a fixed cadence, printing pick candidates as JSON lines
//! 4. Shuts every session down cleanly on Ctrl-C
//!
//! Cameras are served by the simulated transport, which renders a few dark
//! parts on a light background for every trigger.

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pick_vision::transport::{SceneObject, SimDeviceSpec, SimScene};
use pick_vision::{
    AcquisitionSession, Camera, CameraRole, Capture, PoseCandidate, RigConfig, SimTransport,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Triggered capture loop for the pick-and-place cell")]
struct Args {
    /// Number of capture cycles to run; 0 runs until Ctrl-C.
    #[arg(long, env = "PICK_VISION_CYCLES", default_value_t = 0)]
    cycles: u64,

    /// Delay between capture cycles in milliseconds.
    #[arg(long, env = "PICK_VISION_INTERVAL_MS", default_value_t = 200)]
    interval_ms: u64,

    /// Also grab synchronized frame sets from the configured camera array.
    #[arg(long)]
    array: bool,

    /// Width of simulated camera images.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Height of simulated camera images.
    #[arg(long, default_value_t = 480)]
    height: u32,
}

#[derive(Serialize)]
struct PoseLine<'a> {
    cycle: u64,
    camera: &'a str,
    poses: &'a [PoseCandidate],
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = RigConfig::load()?;
    let mut transport = simulated_rig(&cfg, &args);

    let mut top = Camera::open(
        CameraRole::Top,
        &mut transport,
        cfg.session(CameraRole::Top),
        cfg.extractor(CameraRole::Top),
    )
    .map_err(|e| anyhow!("top camera: {}", e))?;
    let mut detail = Camera::open(
        CameraRole::Detail,
        &mut transport,
        cfg.session(CameraRole::Detail),
        cfg.extractor(CameraRole::Detail),
    )
    .map_err(|e| anyhow!("detail camera: {}", e))?;

    let mut array = match (args.array, cfg.array_session()) {
        (true, Some(session)) => Some(
            AcquisitionSession::open(&mut transport, session)
                .map_err(|e| anyhow!("camera array: {}", e))?,
        ),
        (true, None) => {
            log::warn!("--array given but no array serials are configured");
            None
        }
        (false, _) => None,
    };
    let mut array_buffers = array
        .as_ref()
        .map(AcquisitionSession::blank_buffers)
        .unwrap_or_default();

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    log::info!(
        "pick_vision running: top={} detail={} array={:?}",
        top.shape(),
        detail.shape(),
        array.as_ref().map(AcquisitionSession::serials)
    );

    let interval = Duration::from_millis(args.interval_ms);
    let mut last_health_log = Instant::now();
    let mut cycle = 0u64;
    while running.load(Ordering::SeqCst) && (args.cycles == 0 || cycle < args.cycles) {
        cycle += 1;

        if let Some(capture) = top.capture() {
            print_poses(cycle, CameraRole::Top, &capture)?;
        }
        if let Some(capture) = detail.capture() {
            log::debug!("detail image {} captured", capture.image().shape());
        }
        if let Some(session) = array.as_mut() {
            match session.grab_frame_set(&mut array_buffers) {
                Ok(()) => log::debug!("array frame set {} captured", cycle),
                Err(e) => log::warn!("array frame set skipped: {}", e),
            }
        }

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            for camera in [&top, &detail] {
                let stats = camera.session().sink_stats();
                log::info!(
                    "{} camera connected={} delivered={} replaced={}",
                    camera.role().name(),
                    camera.is_connected(),
                    stats.delivered,
                    stats.replaced
                );
            }
            last_health_log = Instant::now();
        }

        std::thread::sleep(interval);
    }

    log::info!("stopping after {} cycles", cycle);
    if let Some(session) = array.as_mut() {
        session.shutdown();
    }
    top.shutdown();
    detail.shutdown();
    Ok(())
}

fn print_poses(cycle: u64, role: CameraRole, capture: &Capture) -> Result<()> {
    let line = PoseLine {
        cycle,
        camera: role.name(),
        poses: capture.poses(),
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

fn simulated_rig(cfg: &RigConfig, args: &Args) -> SimTransport {
    let (w, h) = (args.width as f64, args.height as f64);
    let parts = SimScene::default()
        .with_noise(8)
        .with_object(SceneObject::new(w * 0.3, h * 0.4, w * 0.2, h * 0.06, 25.0))
        .with_object(SceneObject::new(w * 0.7, h * 0.6, w * 0.15, h * 0.05, -60.0));
    let close_up = SimScene::default()
        .with_object(SceneObject::new(w * 0.5, h * 0.5, w * 0.5, h * 0.15, 10.0));

    let mut transport = SimTransport::new()
        .with_device(
            SimDeviceSpec::new(cfg.top.serial.clone(), args.width, args.height).scene(parts.clone()),
        )
        .with_device(
            SimDeviceSpec::new(cfg.detail.serial.clone(), args.width, args.height)
                .color()
                .scene(close_up),
        );
    for serial in &cfg.array {
        transport = transport.with_device(
            SimDeviceSpec::new(serial.clone(), args.width, args.height).scene(parts.clone()),
        );
    }
    transport
}
