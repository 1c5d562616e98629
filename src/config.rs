use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::camera::{CameraRole, DEFAULT_DETAIL_SERIAL, DEFAULT_TOP_SERIAL};
use crate::pose::{AngleConvention, ExtractorConfig, PoseExtractor, Roi};
use crate::session::{SessionConfig, MAX_SESSION_DEVICES};
use crate::trigger::{
    ReadinessPolicy, TriggerSettings, DEFAULT_ARRAY_READY_WAIT, DEFAULT_MAX_RETRIES,
    DEFAULT_TRIGGER_TIMEOUT,
};

/// Upper bound for the trigger timeout and the array ready wait.
pub const MAX_TRIGGER_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize, Default)]
struct RigConfigFile {
    top: Option<CameraConfigFile>,
    detail: Option<CameraConfigFile>,
    trigger: Option<TriggerConfigFile>,
    array: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    serial: Option<String>,
    grayscale: Option<bool>,
    threshold: Option<u8>,
    min_area_fraction: Option<f64>,
    dilate_radius: Option<u8>,
    angle_convention: Option<AngleConvention>,
    roi: Option<Roi>,
    flip_vertical: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct TriggerConfigFile {
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    array_ready_wait_ms: Option<u64>,
    array_readiness: Option<ReadinessMode>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ReadinessMode {
    Skip,
    Require,
}

/// Settings for one camera role.
#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub serial: String,
    pub grayscale: bool,
    pub extractor: ExtractorConfig,
}

#[derive(Debug, Clone)]
pub struct RigConfig {
    pub top: CameraSettings,
    pub detail: CameraSettings,
    /// Trigger settings for single-camera sessions.
    pub trigger: TriggerSettings,
    /// Trigger settings for the synchronized array.
    pub array_trigger: TriggerSettings,
    /// Serials of the synchronized array; empty when the rig has none.
    pub array: Vec<String>,
}

impl RigConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PICK_VISION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RigConfigFile) -> Self {
        let top = camera_settings(file.top, DEFAULT_TOP_SERIAL, ExtractorConfig::top());
        let detail = camera_settings(
            file.detail,
            DEFAULT_DETAIL_SERIAL,
            ExtractorConfig::detail(),
        );

        let trigger_file = file.trigger.unwrap_or_default();
        let timeout = trigger_file
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TRIGGER_TIMEOUT);
        let max_retries = trigger_file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        let trigger = TriggerSettings::single()
            .with_timeout(timeout)
            .with_max_retries(max_retries);

        let ready_wait = trigger_file
            .array_ready_wait_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_ARRAY_READY_WAIT);
        let readiness = match trigger_file.array_readiness.unwrap_or(ReadinessMode::Require) {
            ReadinessMode::Skip => ReadinessPolicy::Skip,
            ReadinessMode::Require => ReadinessPolicy::Require(ready_wait),
        };
        let array_trigger = TriggerSettings::array()
            .with_timeout(timeout)
            .with_max_retries(max_retries)
            .with_readiness(readiness);

        Self {
            top,
            detail,
            trigger,
            array_trigger,
            array: file.array.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(serial) = std::env::var("PICK_VISION_TOP_SERIAL") {
            if !serial.trim().is_empty() {
                self.top.serial = serial.trim().to_string();
            }
        }
        if let Ok(serial) = std::env::var("PICK_VISION_DETAIL_SERIAL") {
            if !serial.trim().is_empty() {
                self.detail.serial = serial.trim().to_string();
            }
        }
        if let Ok(timeout) = std::env::var("PICK_VISION_TRIGGER_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("PICK_VISION_TRIGGER_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            let timeout = Duration::from_millis(millis);
            self.trigger.timeout = timeout;
            self.array_trigger.timeout = timeout;
        }
        if let Ok(retries) = std::env::var("PICK_VISION_MAX_RETRIES") {
            let retries: u32 = retries
                .trim()
                .parse()
                .map_err(|_| anyhow!("PICK_VISION_MAX_RETRIES must be an integer"))?;
            self.trigger.max_retries = retries;
            self.array_trigger.max_retries = retries;
        }
        if let Ok(serials) = std::env::var("PICK_VISION_ARRAY_SERIALS") {
            let parsed = split_csv(&serials);
            if !parsed.is_empty() {
                self.array = parsed;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, camera) in [("top", &self.top), ("detail", &self.detail)] {
            if camera.serial.is_empty() {
                return Err(anyhow!("{} camera serial must not be empty", name));
            }
            let extractor = &camera.extractor;
            if extractor.threshold == 0 {
                return Err(anyhow!("{} threshold must be greater than zero", name));
            }
            if !(0.0..1.0).contains(&extractor.min_area_fraction) {
                return Err(anyhow!(
                    "{} min_area_fraction must be in [0, 1), got {}",
                    name,
                    extractor.min_area_fraction
                ));
            }
            if let Some(roi) = extractor.roi {
                if roi.width == 0 || roi.height == 0 {
                    return Err(anyhow!("{} roi must have a non-zero size", name));
                }
            }
        }
        if self.trigger.timeout.is_zero() {
            return Err(anyhow!("trigger timeout must be greater than zero"));
        }
        if self.trigger.timeout > MAX_TRIGGER_WAIT {
            return Err(anyhow!(
                "trigger timeout must not exceed {} ms",
                MAX_TRIGGER_WAIT.as_millis()
            ));
        }
        if let ReadinessPolicy::Require(wait) = self.array_trigger.readiness {
            if wait > MAX_TRIGGER_WAIT {
                return Err(anyhow!(
                    "array ready wait must not exceed {} ms",
                    MAX_TRIGGER_WAIT.as_millis()
                ));
            }
        }
        if self.trigger.max_retries == 0 {
            return Err(anyhow!("max_retries must be at least 1"));
        }
        if self.array.len() > MAX_SESSION_DEVICES {
            return Err(anyhow!(
                "array supports at most {} cameras, got {}",
                MAX_SESSION_DEVICES,
                self.array.len()
            ));
        }
        Ok(())
    }

    pub fn camera(&self, role: CameraRole) -> &CameraSettings {
        match role {
            CameraRole::Top => &self.top,
            CameraRole::Detail => &self.detail,
        }
    }

    pub fn session(&self, role: CameraRole) -> SessionConfig {
        let camera = self.camera(role);
        SessionConfig::single(Some(&camera.serial))
            .with_grayscale(camera.grayscale)
            .with_trigger(self.trigger)
    }

    pub fn extractor(&self, role: CameraRole) -> PoseExtractor {
        PoseExtractor::new(self.camera(role).extractor.clone())
    }

    /// Session for the synchronized array, if one is configured.
    pub fn array_session(&self) -> Option<SessionConfig> {
        if self.array.is_empty() {
            return None;
        }
        Some(SessionConfig::array(self.array.as_slice()).with_trigger(self.array_trigger))
    }
}

fn camera_settings(
    file: Option<CameraConfigFile>,
    default_serial: &str,
    defaults: ExtractorConfig,
) -> CameraSettings {
    let file = file.unwrap_or_default();
    CameraSettings {
        serial: file.serial.unwrap_or_else(|| default_serial.to_string()),
        grayscale: file.grayscale.unwrap_or(true),
        extractor: ExtractorConfig {
            threshold: file.threshold.unwrap_or(defaults.threshold),
            min_area_fraction: file
                .min_area_fraction
                .unwrap_or(defaults.min_area_fraction),
            dilate_radius: file.dilate_radius.unwrap_or(defaults.dilate_radius),
            angle_convention: file.angle_convention.unwrap_or(defaults.angle_convention),
            roi: file.roi.or(defaults.roi),
            flip_vertical: file.flip_vertical.unwrap_or(defaults.flip_vertical),
        },
    }
}

fn read_config_file(path: &Path) -> Result<RigConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
