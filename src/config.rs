// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::drivers::{DetectionMode, PipelineSettings, UnitTransform};
use crate::engine::SessionSettings;
use crate::ljm::LjmSettings;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device_type: String,
    pub connection_type: String,
    pub identifier: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_type: "T7".into(),
            connection_type: "USB".into(),
            identifier: "ANY".into(),
        }
    }
}

/// Threshold and engineering-unit calibration for one analog input.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub threshold: f64,
    pub offset: f64,
    pub sensitivity: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            offset: 0.0,
            sensitivity: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub first_ain_channel: u32,
    pub num_channels: usize,
    /// Requested rate; the device may settle on a slightly different one.
    pub scan_rate_hz: f64,
    /// Defaults to half a second of scans.
    pub scans_per_read: Option<usize>,
    pub ain_range_volts: f64,
    /// Hold-off period in seconds.
    pub buffer_period_s: f64,
    /// Channels beyond this list use `default_channel`.
    pub channels: Vec<ChannelConfig>,
    pub default_channel: ChannelConfig,
    /// Blocks allowed to wait for processing before reads stall.
    pub queue_depth: usize,
    pub parallel_channels: bool,
    /// Extra paired clock reads to average and log at start; 0 skips them.
    pub clock_calibration_reads: usize,
    pub events_path: Option<PathBuf>,
    pub samples_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            first_ain_channel: 0,
            num_channels: 3,
            scan_rate_hz: 30_000.0,
            scans_per_read: None,
            ain_range_volts: 10.0,
            buffer_period_s: 0.05,
            channels: Vec::new(),
            default_channel: ChannelConfig::default(),
            queue_depth: 4,
            parallel_channels: true,
            clock_calibration_reads: 0,
            events_path: None,
            samples_path: None,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_channels == 0 {
            bail!("num_channels must be at least 1");
        }
        if !(self.scan_rate_hz > 0.0) {
            bail!("scan_rate_hz must be positive, got {}", self.scan_rate_hz);
        }
        if self.scans_per_read == Some(0) || self.scans_per_read() == 0 {
            bail!("scans_per_read must be at least 1");
        }
        if !(self.buffer_period_s >= 0.0) {
            bail!("buffer_period_s must not be negative, got {}", self.buffer_period_s);
        }
        if self.queue_depth == 0 {
            bail!("queue_depth must be at least 1");
        }
        if self.channels.len() > self.num_channels {
            bail!(
                "{} channel entries configured for {} channels",
                self.channels.len(),
                self.num_channels
            );
        }
        for idx in 0..self.num_channels {
            let sensitivity = self.channel(idx).sensitivity;
            if sensitivity == 0.0 || !sensitivity.is_finite() {
                bail!("channel {idx} sensitivity must be finite and non-zero");
            }
        }
        Ok(())
    }

    pub fn channel(&self, idx: usize) -> ChannelConfig {
        self.channels
            .get(idx)
            .copied()
            .unwrap_or(self.default_channel)
    }

    pub fn scans_per_read(&self) -> usize {
        self.scans_per_read
            .unwrap_or((self.scan_rate_hz / 2.0) as usize)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        let channels: Vec<ChannelConfig> = (0..self.num_channels).map(|i| self.channel(i)).collect();
        PipelineSettings {
            transforms: channels
                .iter()
                .map(|c| UnitTransform::new(c.offset, c.sensitivity))
                .collect(),
            thresholds: channels.iter().map(|c| c.threshold).collect(),
            buffer_period: self.buffer_period_s,
            mode: if self.parallel_channels {
                DetectionMode::PerChannel
            } else {
                DetectionMode::Sequential
            },
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            pipeline: self.pipeline_settings(),
            queue_depth: self.queue_depth,
            clock_calibration_reads: self.clock_calibration_reads,
        }
    }

    pub fn ljm_settings(&self) -> LjmSettings {
        LjmSettings {
            device_type: self.device.device_type.clone(),
            connection_type: self.device.connection_type.clone(),
            identifier: self.device.identifier.clone(),
            first_ain_channel: self.first_ain_channel,
            num_channels: self.num_channels,
            scan_rate_hz: self.scan_rate_hz,
            scans_per_read: self.scans_per_read(),
            ain_range_volts: self.ain_range_volts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scans_per_read(), 15_000);
        assert_eq!(config.pipeline_settings().thresholds, vec![1.0; 3]);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{
            "num_channels": 2,
            "scan_rate_hz": 1000,
            "channels": [{ "threshold": 0.5, "sensitivity": 0.1 }],
            "parallel_channels": false
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.device.identifier, "ANY");
        assert_eq!(config.scans_per_read(), 500);
        let settings = config.pipeline_settings();
        assert_eq!(settings.thresholds, vec![0.5, 1.0]);
        assert_eq!(settings.transforms[0], UnitTransform::new(0.0, 0.1));
        assert_eq!(settings.mode, DetectionMode::Sequential);
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = AppConfig {
            num_channels: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.num_channels = 1;
        config.queue_depth = 0;
        assert!(config.validate().is_err());
        config.queue_depth = 1;
        config.channels = vec![ChannelConfig {
            sensitivity: 0.0,
            ..Default::default()
        }];
        assert!(config.validate().is_err());
        config.channels.clear();
        config.scan_rate_hz = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = AppConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(format!("{err:#}").contains("failed to read config file"));
    }
}
