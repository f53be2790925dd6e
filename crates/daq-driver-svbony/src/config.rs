//! Driver settings and persisted per-camera configuration.
//!
//! [`DriverSettings`] is layered with Figment:
//! 1. Defaults from `DriverSettings::default()`
//! 2. Optional TOML file
//! 3. Environment variables prefixed with `SVB_`, nested with `__`
//!    (`SVB_EXPOSURE_WORKAROUND__ENABLED=true`,
//!    `SVB_TEMPERATURE__POLL_INTERVAL_MS=500`)
//!
//! [`PersistedCameraConfig`] is the small TOML file written on disconnect and
//! read back on the next connect: control values plus the frame format, frame
//! speed and stretch selections.

use crate::components::controls::{BitStretch, ControlKind, FrameFormat, FrameSpeed};
use crate::error::ConfigError;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "SVB_";

// =============================================================================
// Runtime settings
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub exposure_workaround: ExposureWorkaroundSettings,
    pub temperature: TemperatureSettings,
    pub acquisition: AcquisitionSettings,
    pub connect: ConnectSettings,
    pub persistence: PersistenceSettings,
}

/// Discard exposure taken before every real exposure to flush stale sensor
/// data left by the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureWorkaroundSettings {
    pub enabled: bool,
    /// Valid range: 0.1 to 60
    pub duration_s: f64,
}

impl Default for ExposureWorkaroundSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_s: 0.5,
        }
    }
}

impl ExposureWorkaroundSettings {
    pub const MIN_DURATION_S: f64 = 0.1;
    pub const MAX_DURATION_S: f64 = 60.0;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(Self::MIN_DURATION_S..=Self::MAX_DURATION_S).contains(&self.duration_s) {
            return Err(ConfigError::ValidationError(format!(
                "exposure_workaround.duration_s must be within {}..={} (got {})",
                Self::MIN_DURATION_S,
                Self::MAX_DURATION_S,
                self.duration_s
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperatureSettings {
    pub poll_interval_ms: u64,
    /// Set-point requests closer than this to the current reading are no-ops
    pub threshold_c: f64,
    /// Smallest change worth publishing
    pub report_epsilon_c: f64,
    /// Target written on connect for cooled models
    pub default_target_c: f64,
}

impl Default for TemperatureSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            threshold_c: 0.25,
            report_epsilon_c: 0.05,
            default_target_c: 25.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// `get_frame` timeout while downloading an exposure
    pub frame_poll_timeout_ms: u32,
    /// Exposures longer than this get an info log line
    pub verbose_exposure_s: f64,
    /// Non-timeout stream errors tolerated before streaming stops
    pub stream_retry_limit: u32,
    pub target_fps: f64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            frame_poll_timeout_ms: 100,
            verbose_exposure_s: 3.0,
            stream_retry_limit: 0,
            target_fps: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectSettings {
    /// Delay after open before the camera answers queries reliably
    pub settle_ms: u64,
    /// Exposure written right after open to work around an SDK gain bug
    pub prime_exposure_us: i64,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            settle_ms: 500,
            prime_exposure_us: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// Directory for per-camera config files. Nothing is persisted when unset.
    pub config_dir: Option<PathBuf>,
}

impl DriverSettings {
    /// Defaults, then `path` (if it exists), then `SVB_*` environment.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(DriverSettings::default()));
        if let Some(path) = path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            } else {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            }
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    /// Defaults overlaid with a TOML document. Environment is not consulted.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(DriverSettings::default())).merge(Toml::string(toml)),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let settings: DriverSettings = figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.exposure_workaround.validate()?;

        let t = &self.temperature;
        if t.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "temperature.poll_interval_ms must be > 0".into(),
            ));
        }
        if t.threshold_c < 0.0 || t.report_epsilon_c < 0.0 {
            return Err(ConfigError::ValidationError(
                "temperature thresholds must be >= 0".into(),
            ));
        }

        let a = &self.acquisition;
        if a.frame_poll_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "acquisition.frame_poll_timeout_ms must be > 0".into(),
            ));
        }
        if !(a.target_fps > 0.0 && a.target_fps.is_finite()) {
            return Err(ConfigError::ValidationError(format!(
                "acquisition.target_fps must be a positive number (got {})",
                a.target_fps
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Persisted camera configuration
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedCameraConfig {
    /// Keyed by [`ControlKind::as_str`]
    #[serde(default)]
    pub controls: BTreeMap<String, i64>,
    #[serde(default)]
    pub format: FrameFormat,
    #[serde(default)]
    pub speed: FrameSpeed,
    #[serde(default)]
    pub stretch: BitStretch,
}

impl PersistedCameraConfig {
    /// `<dir>/<device name>.toml`, with characters unsafe in file names
    /// replaced by `_`.
    pub fn path_for(dir: &Path, device_name: &str) -> PathBuf {
        let file: String = device_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        dir.join(format!("{}.toml", file))
    }

    pub fn set_control(&mut self, kind: ControlKind, value: i64) {
        self.controls.insert(kind.as_str().to_string(), value);
    }

    /// Controls with a recognised key. Unknown keys are skipped.
    pub fn control_values(&self) -> Vec<(ControlKind, i64)> {
        self.controls
            .iter()
            .filter_map(|(name, value)| match ControlKind::from_name(name) {
                Some(kind) => Some((kind, *value)),
                None => {
                    tracing::warn!(key = %name, "Ignoring unknown control in saved config");
                    None
                }
            })
            .collect()
    }

    /// `Ok(None)` when no file exists yet.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let config = toml::from_str(&text)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
        Ok(Some(config))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteError(format!("{}: {}", parent.display(), e)))?;
        }
        let text =
            toml::to_string_pretty(self).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| ConfigError::WriteError(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "Camera config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = DriverSettings::default();
        assert!(!s.exposure_workaround.enabled);
        assert_eq!(s.exposure_workaround.duration_s, 0.5);
        assert_eq!(s.temperature.poll_interval_ms, 1000);
        assert_eq!(s.temperature.threshold_c, 0.25);
        assert_eq!(s.acquisition.frame_poll_timeout_ms, 100);
        assert_eq!(s.acquisition.stream_retry_limit, 0);
        assert_eq!(s.connect.settle_ms, 500);
        assert!(s.persistence.config_dir.is_none());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn toml_overrides_nested_fields() {
        let s = DriverSettings::from_toml_str(
            r#"
            [exposure_workaround]
            enabled = true
            duration_s = 1.5

            [acquisition]
            target_fps = 25.0
            "#,
        )
        .unwrap();
        assert!(s.exposure_workaround.enabled);
        assert_eq!(s.exposure_workaround.duration_s, 1.5);
        assert_eq!(s.acquisition.target_fps, 25.0);
        // untouched sections keep defaults
        assert_eq!(s.temperature.poll_interval_ms, 1000);
    }

    #[test]
    fn workaround_duration_is_validated() {
        let err = DriverSettings::from_toml_str("[exposure_workaround]\nduration_s = 90.0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn bad_types_are_parse_errors() {
        let err = DriverSettings::from_toml_str("[temperature]\npoll_interval_ms = \"fast\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svb.toml");
        std::fs::write(&path, "[connect]\nsettle_ms = 100\n").unwrap();

        std::env::set_var("SVB_CONNECT__PRIME_EXPOSURE_US", "500000");
        let s = DriverSettings::load(Some(&path));
        std::env::remove_var("SVB_CONNECT__PRIME_EXPOSURE_US");

        let s = s.unwrap();
        assert_eq!(s.connect.settle_ms, 100);
        assert_eq!(s.connect.prime_exposure_us, 500_000);
    }

    #[test]
    fn persisted_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = PersistedCameraConfig::path_for(dir.path(), "SVBONY SV305 1");
        assert!(path.ends_with("SVBONY_SV305_1.toml"));
        assert_eq!(PersistedCameraConfig::load(&path).unwrap(), None);

        let mut config = PersistedCameraConfig {
            format: FrameFormat::Raw8,
            speed: FrameSpeed::Fast,
            stretch: BitStretch::X4,
            ..Default::default()
        };
        config.set_control(ControlKind::Gain, 120);
        config.set_control(ControlKind::BlackLevel, 12);
        config.save(&path).unwrap();

        let loaded = PersistedCameraConfig::load(&path).unwrap().unwrap();
        assert_eq!(loaded, config);
        let mut values = loaded.control_values();
        values.sort();
        assert_eq!(
            values,
            vec![(ControlKind::Gain, 120), (ControlKind::BlackLevel, 12)]
        );
    }

    #[test]
    fn unknown_control_keys_are_skipped() {
        let config: PersistedCameraConfig =
            toml::from_str("format = \"raw16\"\n[controls]\ngain = 5\nhue = 3\n").unwrap();
        assert_eq!(config.control_values(), vec![(ControlKind::Gain, 5)]);
        assert_eq!(config.stretch, BitStretch::Off);
    }
}
