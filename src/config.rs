//! Configuration
//!
//! All thresholds, cooldowns and limits live here. A JSON config file
//! (default `config.json`) can override any section; environment variables
//! override the service endpoints on top of that.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Camera device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture source: an RTSP URL or a V4L2 device path like /dev/video0
    pub source: String,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Rotation in degrees (0/90/180/270)
    pub rotation: i32,
    /// Per-capture timeout in milliseconds
    pub capture_timeout_ms: u64,
    /// Warm-up delay after opening the device, milliseconds
    pub warmup_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: "/dev/video0".to_string(),
            width: 1920,
            height: 1080,
            rotation: 0,
            capture_timeout_ms: 2000,
            warmup_ms: 2000,
        }
    }
}

/// Capture supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Target capture rate in frames per second
    pub target_fps: f64,
    /// A capture slower than this counts as a failure, milliseconds
    pub slow_capture_ms: u64,
    /// Consecutive slow/failed captures before a refresh is requested
    pub max_consecutive_failures: u32,
    /// Backoff after a failed capture, milliseconds
    pub failure_backoff_ms: u64,
    /// How long to wait for the capture task on shutdown, milliseconds
    pub join_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_fps: 30.0,
            slow_capture_ms: 100,
            max_consecutive_failures: 5,
            failure_backoff_ms: 200,
            join_timeout_ms: 2000,
        }
    }
}

impl CaptureConfig {
    /// Interval between capture attempts
    pub fn cadence(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(0.1))
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_capture_ms)
    }
}

/// Camera refresh policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Minimum seconds between two refreshes
    pub cooldown_secs: u64,
    /// Hardware settle pause between close and reopen, milliseconds
    pub settle_ms: u64,
    /// Buffer age that makes a frame stale, milliseconds
    pub max_stale_ms: u64,
    /// Buffer age that escalates to a forced refresh, milliseconds
    pub emergency_stale_ms: u64,
    /// Freshness watch interval, milliseconds
    pub check_interval_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 10,
            settle_ms: 1000,
            max_stale_ms: 500,
            emergency_stale_ms: 5000,
            check_interval_ms: 1000,
        }
    }
}

impl RefreshConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn max_stale(&self) -> Duration {
        Duration::from_millis(self.max_stale_ms)
    }

    pub fn emergency_stale(&self) -> Duration {
        Duration::from_millis(self.emergency_stale_ms)
    }
}

/// Detection orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Seconds between detection cycles (fractional)
    pub interval_secs: f64,
    /// Minimum confidence to accept a detection
    pub confidence_threshold: f32,
    /// Inference request timeout in seconds
    pub timeout_secs: u64,
    /// Class allow-list; anything else is ignored
    pub classes_of_interest: Vec<String>,
    /// Classes that trigger the garage automation
    pub automation_classes: Vec<String>,
    /// Save an annotated snapshot for each accepted detection
    pub save_snapshots: bool,
    /// Directory for detection snapshots
    pub snapshot_dir: PathBuf,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 0.5,
            confidence_threshold: 0.6,
            timeout_secs: 5,
            classes_of_interest: vec![
                "car".to_string(),
                "person".to_string(),
                "motorcycle".to_string(),
                "bicycle".to_string(),
                "truck".to_string(),
            ],
            automation_classes: vec!["my_car".to_string()],
            save_snapshots: true,
            snapshot_dir: PathBuf::from("detections"),
        }
    }
}

impl DetectionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs.max(0.01))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Notification policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    /// Notify when a person is detected
    pub notify_person: bool,
    /// Notify when a vehicle is detected
    pub notify_vehicle: bool,
    /// Attach the snapshot to the notification
    pub send_photo: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            notify_person: true,
            notify_vehicle: true,
            send_photo: true,
        }
    }
}

/// Pan-tilt mount driver, limits and home position
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanTiltConfig {
    /// Mount driver: "simulated" is the only built-in driver
    pub driver: String,
    pub pan_min: f32,
    pub pan_max: f32,
    pub tilt_min: f32,
    pub tilt_max: f32,
    pub home_pan: f32,
    pub home_tilt: f32,
}

impl Default for PanTiltConfig {
    fn default() -> Self {
        Self {
            driver: "simulated".to_string(),
            pan_min: -90.0,
            pan_max: 90.0,
            tilt_min: -45.0,
            tilt_max: 45.0,
            home_pan: 0.0,
            home_tilt: 0.0,
        }
    }
}

/// Object tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub enabled: bool,
    /// Normalized offset below which tracking does not move
    pub deadzone: f32,
    /// Degrees of correction per unit of normalized offset
    pub gain: f32,
    /// Servo speed for tracking moves (1-10)
    pub speed: u8,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deadzone: 0.1,
            gain: 5.0,
            speed: 10,
        }
    }
}

/// Patrol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatrolConfig {
    /// Seconds before patrol auto-resumes after an interrupt
    pub resume_delay_secs: u64,
    /// Default sweep speed (1-10)
    pub default_speed: u8,
    /// Where patrol positions are persisted
    pub positions_file: PathBuf,
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            resume_delay_secs: 5,
            default_speed: 5,
            positions_file: PathBuf::from("patrol_positions.json"),
        }
    }
}

impl PatrolConfig {
    pub fn resume_delay(&self) -> Duration {
        Duration::from_secs(self.resume_delay_secs)
    }
}

/// Automation (garage) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Master switch for the garage automation
    pub auto_open: bool,
    /// Minimum seconds between two garage triggers
    pub cooldown_secs: u64,
    /// Serial port of the garage transmitter
    pub flipper_port: PathBuf,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            auto_open: false,
            cooldown_secs: 300,
            flipper_port: PathBuf::from("/dev/ttyACM0"),
        }
    }
}

impl AutomationConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Remote inference server URL
    pub inference_url: String,
    /// Telegram bot token (empty disables the notifier)
    pub telegram_bot_token: String,
    /// Telegram chat id
    pub telegram_chat_id: String,
    pub camera: CameraConfig,
    pub capture: CaptureConfig,
    pub refresh: RefreshConfig,
    pub detection: DetectionConfig,
    pub notifications: NotificationConfig,
    pub pantilt: PanTiltConfig,
    pub tracking: TrackingConfig,
    pub patrol: PatrolConfig,
    pub automation: AutomationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            inference_url: "http://jetson.local:5001".to_string(),
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            camera: CameraConfig::default(),
            capture: CaptureConfig::default(),
            refresh: RefreshConfig::default(),
            detection: DetectionConfig::default(),
            notifications: NotificationConfig::default(),
            pantilt: PanTiltConfig::default(),
            tracking: TrackingConfig::default(),
            patrol: PatrolConfig::default(),
            automation: AutomationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Environment variables take precedence over the config file
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("INFERENCE_URL") {
            self.inference_url = url;
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.telegram_bot_token = token;
        }
        if let Ok(chat) = std::env::var("TELEGRAM_CHAT_ID") {
            self.telegram_chat_id = chat;
        }
        if let Ok(source) = std::env::var("CAMERA_SOURCE") {
            self.camera.source = source;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_policy() {
        let config = AppConfig::default();
        assert_eq!(config.capture.max_consecutive_failures, 5);
        assert_eq!(config.refresh.cooldown_secs, 10);
        assert_eq!(config.refresh.max_stale_ms, 500);
        assert_eq!(config.automation.cooldown_secs, 300);
        assert_eq!(config.patrol.resume_delay_secs, 5);
        assert!((config.tracking.deadzone - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"automation": {{"cooldown_secs": 60}}, "tracking": {{"gain": 8.0}}}}"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.automation.cooldown_secs, 60);
        assert!((config.tracking.gain - 8.0).abs() < f32::EPSILON);
        // untouched sections keep their defaults
        assert_eq!(config.refresh.cooldown_secs, 10);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load("/nonexistent/config.json").unwrap();
        assert_eq!(config.capture.slow_capture_ms, 100);
    }
}
