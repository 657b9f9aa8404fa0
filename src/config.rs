//! Configuration for the therapy box controller.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Serial device the sensor front-end is attached to
    pub serial_port: String,

    /// Line speed the port is expected to run at (the port itself must be
    /// configured before the controller opens it)
    pub baud_rate: u32,

    /// Baseline collection settings
    pub calibration: CalibrationConfig,

    /// Sensor window settings
    pub windows: WindowConfig,

    /// Upper bound between checks for a pending STOP
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// How long before the end of a track the re-evaluation fires
    #[serde(with = "duration_serde")]
    pub reevaluation_lead: Duration,

    /// Content folders per category
    pub music: MusicConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: default_serial_port().to_string(),
            baud_rate: 9600,
            calibration: CalibrationConfig::default(),
            windows: WindowConfig::default(),
            poll_interval: Duration::from_millis(100),
            reevaluation_lead: Duration::from_secs(60),
            music: MusicConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("music-therapy-box")
            .join("config.json")
    }

    /// Interval between two samples at the configured sampling rate.
    pub fn sample_interval(&self) -> Duration {
        self.windows.sample_interval()
    }
}

/// Baseline collection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Nominal length of the baseline phase; also the wall-clock timeout
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Number of conductance samples that completes calibration early
    pub sample_quota: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
            sample_quota: 50,
        }
    }
}

/// Sensor window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window used for the primary prediction cycle
    #[serde(with = "duration_serde")]
    pub long: Duration,
    /// Window used for mid-playback re-evaluation
    #[serde(with = "duration_serde")]
    pub short: Duration,
    /// Samples per second
    pub sampling_rate_hz: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            long: Duration::from_secs(60),
            short: Duration::from_secs(10),
            sampling_rate_hz: 10,
        }
    }
}

impl WindowConfig {
    /// Interval between two samples.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(1) / self.sampling_rate_hz.max(1)
    }
}

/// Folders holding the content for each category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicConfig {
    pub stress_relief: PathBuf,
    pub calming: PathBuf,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            stress_relief: PathBuf::from("music/stress_relief"),
            calming: PathBuf::from("music/calming"),
        }
    }
}

impl MusicConfig {
    /// Re-root both category folders under `dir`.
    pub fn under(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            stress_relief: dir.join("stress_relief"),
            calming: dir.join("calming"),
        }
    }
}

fn default_serial_port() -> &'static str {
    if cfg!(target_os = "windows") {
        "COM3"
    } else {
        "/dev/ttyUSB0"
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serde support for Duration, stored as milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.calibration.duration, Duration::from_secs(10));
        assert_eq!(config.calibration.sample_quota, 50);
        assert_eq!(config.windows.long, Duration::from_secs(60));
        assert_eq!(config.windows.short, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.reevaluation_lead, Duration::from_secs(60));
    }

    #[test]
    fn test_sample_interval_from_rate() {
        let config = Config::default();
        assert_eq!(config.sample_interval(), Duration::from_millis(100));

        let windows = WindowConfig {
            sampling_rate_hz: 0,
            ..WindowConfig::default()
        };
        assert_eq!(windows.sample_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let config = Config::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["poll_interval"], 100);
        assert_eq!(json["windows"]["long"], 60_000);

        let parsed: Config = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.windows.short, Duration::from_secs(10));
    }

    #[test]
    fn test_music_dir_override() {
        let music = MusicConfig::under("/srv/music");
        assert_eq!(music.calming, PathBuf::from("/srv/music/calming"));
        assert_eq!(music.stress_relief, PathBuf::from("/srv/music/stress_relief"));
    }
}
