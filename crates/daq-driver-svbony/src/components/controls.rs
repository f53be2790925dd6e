//! Control registry
//!
//! Maps the driver's logical number controls onto SDK control ids. Bounds and
//! defaults are read once from the control caps at connect time and never
//! change afterwards. Values are not cached here: every `apply` goes straight
//! to the device and every `read` comes back from it.
//!
//! The switch-style settings (frame speed, frame format, bit stretch) also
//! live here as small enums with SDK conversions.

use crate::components::sdk::{ControlType, ImageType, SvbCamera};
use crate::error::CameraError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// =============================================================================
// Logical controls
// =============================================================================

/// Number controls exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Gain,
    Contrast,
    Sharpness,
    Saturation,
    WbRed,
    WbGreen,
    WbBlue,
    Gamma,
    /// Black level, shown to users as "offset"
    BlackLevel,
}

impl ControlKind {
    pub const ALL: [ControlKind; 9] = [
        ControlKind::Gain,
        ControlKind::Contrast,
        ControlKind::Sharpness,
        ControlKind::Saturation,
        ControlKind::WbRed,
        ControlKind::WbGreen,
        ControlKind::WbBlue,
        ControlKind::Gamma,
        ControlKind::BlackLevel,
    ];

    pub fn from_sdk(control: ControlType) -> Option<Self> {
        let kind = match control {
            ControlType::Gain => ControlKind::Gain,
            ControlType::Contrast => ControlKind::Contrast,
            ControlType::Sharpness => ControlKind::Sharpness,
            ControlType::Saturation => ControlKind::Saturation,
            ControlType::WbR => ControlKind::WbRed,
            ControlType::WbG => ControlKind::WbGreen,
            ControlType::WbB => ControlKind::WbBlue,
            ControlType::Gamma => ControlKind::Gamma,
            ControlType::BlackLevel => ControlKind::BlackLevel,
            _ => return None,
        };
        Some(kind)
    }

    pub fn to_sdk(self) -> ControlType {
        match self {
            ControlKind::Gain => ControlType::Gain,
            ControlKind::Contrast => ControlType::Contrast,
            ControlKind::Sharpness => ControlType::Sharpness,
            ControlKind::Saturation => ControlType::Saturation,
            ControlKind::WbRed => ControlType::WbR,
            ControlKind::WbGreen => ControlType::WbG,
            ControlKind::WbBlue => ControlType::WbB,
            ControlKind::Gamma => ControlType::Gamma,
            ControlKind::BlackLevel => ControlType::BlackLevel,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKind::Gain => "gain",
            ControlKind::Contrast => "contrast",
            ControlKind::Sharpness => "sharpness",
            ControlKind::Saturation => "saturation",
            ControlKind::WbRed => "wb_red",
            ControlKind::WbGreen => "wb_green",
            ControlKind::WbBlue => "wb_blue",
            ControlKind::Gamma => "gamma",
            ControlKind::BlackLevel => "offset",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }

    /// Colour balance controls only mean something on bayer sensors.
    pub fn is_colour_only(&self) -> bool {
        matches!(
            self,
            ControlKind::Saturation | ControlKind::WbRed | ControlKind::WbGreen | ControlKind::WbBlue
        )
    }
}

impl std::fmt::Display for ControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds and default of one discovered control.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlDescriptor {
    pub kind: ControlKind,
    pub sdk: ControlType,
    pub min: i64,
    pub max: i64,
    pub default: i64,
}

/// Exposure limits in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureBounds {
    pub min_s: f64,
    pub max_s: f64,
}

impl ExposureBounds {
    pub fn from_caps_us(min_us: i64, max_us: i64) -> Self {
        Self {
            min_s: min_us as f64 / 1_000_000.0,
            max_s: max_us as f64 / 1_000_000.0,
        }
    }

    pub fn clamp(&self, duration_s: f64) -> f64 {
        duration_s.max(self.min_s).min(self.max_s)
    }
}

impl Default for ExposureBounds {
    /// Used until the camera reports its exposure caps.
    fn default() -> Self {
        Self {
            min_s: 0.0,
            max_s: 3600.0,
        }
    }
}

// =============================================================================
// Switch settings
// =============================================================================

/// Result of selecting a switch option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Changed,
    /// The option was already active; nothing was sent to the camera
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSpeed {
    Slow,
    #[default]
    Normal,
    Fast,
}

impl FrameSpeed {
    pub fn from_svb(value: i64) -> Option<Self> {
        match value {
            0 => Some(FrameSpeed::Slow),
            1 => Some(FrameSpeed::Normal),
            2 => Some(FrameSpeed::Fast),
            _ => None,
        }
    }

    pub fn to_svb(self) -> i64 {
        match self {
            FrameSpeed::Slow => 0,
            FrameSpeed::Normal => 1,
            FrameSpeed::Fast => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameSpeed::Slow => "Slow",
            FrameSpeed::Normal => "Normal",
            FrameSpeed::Fast => "Fast",
        }
    }
}

/// Client-facing output format. Mono-only models map these onto the luma
/// image types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    #[default]
    Raw16,
    Raw8,
}

impl FrameFormat {
    pub fn image_type(self, mono_only: bool) -> ImageType {
        match (self, mono_only) {
            (FrameFormat::Raw16, false) => ImageType::Raw16,
            (FrameFormat::Raw8, false) => ImageType::Raw8,
            (FrameFormat::Raw16, true) => ImageType::Y16,
            (FrameFormat::Raw8, true) => ImageType::Y8,
        }
    }

    pub fn bit_depth(self) -> u32 {
        match self {
            FrameFormat::Raw16 => 16,
            FrameFormat::Raw8 => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameFormat::Raw16 => "Raw 16 bits",
            FrameFormat::Raw8 => "Raw 8 bits",
        }
    }
}

/// Left shift applied to 16-bit samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitStretch {
    #[default]
    Off,
    X2,
    X4,
    X8,
    X16,
}

impl BitStretch {
    pub fn shift(self) -> u8 {
        match self {
            BitStretch::Off => 0,
            BitStretch::X2 => 1,
            BitStretch::X4 => 2,
            BitStretch::X8 => 3,
            BitStretch::X16 => 4,
        }
    }

    pub fn from_shift(shift: u8) -> Option<Self> {
        match shift {
            0 => Some(BitStretch::Off),
            1 => Some(BitStretch::X2),
            2 => Some(BitStretch::X4),
            3 => Some(BitStretch::X8),
            4 => Some(BitStretch::X16),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BitStretch::Off => "Off",
            BitStretch::X2 => "x2",
            BitStretch::X4 => "x4",
            BitStretch::X8 => "x8",
            BitStretch::X16 => "x16",
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug)]
pub struct ControlRegistry {
    descriptors: Vec<ControlDescriptor>,
    exposure: ExposureBounds,
    frame_speed: Mutex<FrameSpeed>,
}

impl ControlRegistry {
    /// Read `count` control caps and initialise every recognised number
    /// control to its default.
    ///
    /// A failed caps query aborts discovery. A failed default write is logged
    /// and discovery continues. Control ids this driver does not know are
    /// skipped.
    pub fn discover(camera: &SvbCamera, count: usize) -> Result<Self, CameraError> {
        let mut descriptors = Vec::new();
        let mut exposure = ExposureBounds::default();

        for index in 0..count {
            let caps = camera.control_caps(index).map_err(|e| {
                tracing::error!(index, error = %e, "Get camera control caps failed");
                e
            })?;

            let Some(control) = caps.control_type() else {
                tracing::debug!(index, raw_type = caps.raw_type, name = %caps.name, "Ignoring unknown control");
                continue;
            };

            if control == ControlType::Exposure {
                exposure = ExposureBounds::from_caps_us(caps.min_value, caps.max_value);
                tracing::debug!(min_s = exposure.min_s, max_s = exposure.max_s, "Exposure bounds");
                continue;
            }

            let Some(kind) = ControlKind::from_sdk(control) else {
                continue;
            };
            if let Err(e) = camera.set_control(control, caps.default_value) {
                tracing::error!(control = %control, error = %e, "Camera set control default failed");
            }
            descriptors.push(ControlDescriptor {
                kind,
                sdk: control,
                min: caps.min_value,
                max: caps.max_value,
                default: caps.default_value,
            });
        }

        tracing::info!(
            controls = descriptors.len(),
            min_exposure_s = exposure.min_s,
            max_exposure_s = exposure.max_s,
            "Camera controls discovered"
        );

        Ok(Self {
            descriptors,
            exposure,
            frame_speed: Mutex::new(FrameSpeed::Normal),
        })
    }

    pub fn descriptors(&self) -> &[ControlDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, kind: ControlKind) -> Option<&ControlDescriptor> {
        self.descriptors.iter().find(|d| d.kind == kind)
    }

    pub fn exposure_bounds(&self) -> ExposureBounds {
        self.exposure
    }

    /// Write `value` to the device. Returns false (and logs) on failure.
    ///
    /// No range check beyond what the SDK enforces.
    pub fn apply(&self, camera: &SvbCamera, kind: ControlKind, value: i64) -> bool {
        let Some(descriptor) = self.descriptor(kind) else {
            tracing::warn!(control = %kind, "Camera has no such control");
            return false;
        };
        if let Err(e) = camera.set_control(descriptor.sdk, value) {
            tracing::error!(control = %descriptor.sdk, error = %e, "Camera set control failed");
            return false;
        }
        tracing::info!(control = %descriptor.sdk, value, "Camera control set");

        match camera.control(descriptor.sdk) {
            Ok((current, auto)) => {
                tracing::debug!(control = %descriptor.sdk, current, auto, "Control read back")
            }
            Err(e) => {
                tracing::error!(control = %descriptor.sdk, error = %e, "Camera get control failed")
            }
        }
        true
    }

    /// Current `(value, is_auto)` straight from the device.
    pub fn read(&self, camera: &SvbCamera, kind: ControlKind) -> Result<(i64, bool), CameraError> {
        match self.descriptor(kind) {
            Some(d) => camera.control(d.sdk),
            None => Err(CameraError::InvalidValue(format!(
                "control {} not reported by camera",
                kind
            ))),
        }
    }

    /// Values of every discovered control. Unreadable controls are skipped.
    pub fn snapshot(&self, camera: &SvbCamera) -> Vec<(ControlKind, i64)> {
        self.descriptors
            .iter()
            .filter_map(|d| match camera.control(d.sdk) {
                Ok((value, _)) => Some((d.kind, value)),
                Err(e) => {
                    tracing::warn!(control = %d.sdk, error = %e, "Skipping unreadable control");
                    None
                }
            })
            .collect()
    }

    pub fn frame_speed(&self) -> FrameSpeed {
        *self.frame_speed.lock()
    }

    /// Write the frame speed control unconditionally. Used at connect.
    pub fn init_frame_speed(&self, camera: &SvbCamera, speed: FrameSpeed) -> Result<(), CameraError> {
        camera.set_control(ControlType::FrameSpeedMode, speed.to_svb())?;
        *self.frame_speed.lock() = speed;
        Ok(())
    }

    pub fn set_frame_speed(
        &self,
        camera: &SvbCamera,
        speed: FrameSpeed,
    ) -> Result<SwitchOutcome, CameraError> {
        let mut current = self.frame_speed.lock();
        if *current == speed {
            tracing::info!(speed = speed.as_str(), "Frame rate is already set");
            return Ok(SwitchOutcome::Unchanged);
        }
        camera
            .set_control(ControlType::FrameSpeedMode, speed.to_svb())
            .map_err(|e| {
                tracing::error!(error = %e, "Camera set frame rate failed");
                e
            })?;
        *current = speed;
        tracing::info!(speed = speed.as_str(), "Frame rate is now set");
        Ok(SwitchOutcome::Changed)
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::components::mock::{ErrorConfig, ErrorScenario, MockCameraSpec, MockSdk, SdkCall};
    use crate::components::sdk::{ControlCaps, SvbSdk};
    use crate::error::SdkError;
    use std::sync::Arc;

    fn camera(spec: MockCameraSpec, errors: ErrorConfig) -> (Arc<MockSdk>, SvbCamera) {
        let sdk = Arc::new(MockSdk::builder().camera(spec).error_config(errors).build());
        sdk.open(0).unwrap();
        let cam = SvbCamera::new(sdk.clone(), 0);
        (sdk, cam)
    }

    fn discover(cam: &SvbCamera) -> ControlRegistry {
        let count = cam.num_controls().unwrap();
        ControlRegistry::discover(cam, count).unwrap()
    }

    #[test]
    fn discovery_sets_defaults_and_exposure_bounds() {
        let (sdk, cam) = camera(
            MockCameraSpec::sv305().with_exposure_range(100_000, 2_000_000_000),
            ErrorConfig::none(),
        );
        let registry = discover(&cam);

        assert_eq!(registry.descriptors().len(), 9);
        let bounds = registry.exposure_bounds();
        assert!((bounds.min_s - 0.1).abs() < 1e-9);
        assert!((bounds.max_s - 2000.0).abs() < 1e-9);

        let gain = registry.descriptor(ControlKind::Gain).unwrap();
        assert_eq!((gain.min, gain.max, gain.default), (0, 720, 10));

        // one initialising write per number control, none for exposure
        let writes = sdk.count_calls(|c| matches!(c, SdkCall::SetControl(..)));
        assert_eq!(writes, 9);
        assert_eq!(
            sdk.count_calls(|c| matches!(c, SdkCall::SetControl(ControlType::Exposure, _))),
            0
        );
    }

    #[test]
    fn unknown_controls_are_ignored() {
        let spec = MockCameraSpec::sv305().with_extra_control(ControlCaps {
            name: "Future".into(),
            description: String::new(),
            min_value: 0,
            max_value: 10,
            default_value: 5,
            auto_supported: false,
            writable: true,
            raw_type: 77,
        });
        let (_sdk, cam) = camera(spec, ErrorConfig::none());
        let registry = discover(&cam);
        assert_eq!(registry.descriptors().len(), 9);
    }

    #[test]
    fn caps_failure_aborts_discovery() {
        let (_sdk, cam) = camera(
            MockCameraSpec::sv305(),
            ErrorConfig::scenario(ErrorScenario::FailAfterN {
                operation: "SVBGetControlCaps",
                count: 3,
                error: SdkError::InvalidIndex,
            }),
        );
        let err = ControlRegistry::discover(&cam, 12).unwrap_err();
        assert_eq!(err.sdk_status(), Some(SdkError::InvalidIndex));
    }

    #[test]
    fn default_write_failure_is_tolerated() {
        let (_sdk, cam) = camera(
            MockCameraSpec::sv305(),
            ErrorConfig::scenario(ErrorScenario::Always {
                operation: "SVBSetControlValue",
                error: SdkError::GeneralError,
            }),
        );
        let registry = discover(&cam);
        assert_eq!(registry.descriptors().len(), 9);
    }

    #[test]
    fn mono_camera_has_no_colour_controls() {
        let (_sdk, cam) = camera(MockCameraSpec::sv305m_pro(), ErrorConfig::none());
        let registry = discover(&cam);
        assert!(registry.descriptor(ControlKind::WbRed).is_none());
        assert!(registry.descriptor(ControlKind::Gain).is_some());
    }

    #[test]
    fn apply_goes_to_device() {
        let (sdk, cam) = camera(MockCameraSpec::sv305(), ErrorConfig::none());
        let registry = discover(&cam);
        assert!(registry.apply(&cam, ControlKind::Gain, 120));
        assert_eq!(sdk.stored_control(0, ControlType::Gain), Some(120));
        assert_eq!(registry.read(&cam, ControlKind::Gain).unwrap(), (120, false));
    }

    #[test]
    fn apply_failure_returns_false() {
        let (sdk, cam) = camera(
            MockCameraSpec::sv305(),
            ErrorConfig::scenario(ErrorScenario::Always {
                operation: "SVBSetControlValue",
                error: SdkError::GeneralError,
            }),
        );
        let registry = discover(&cam);
        assert!(!registry.apply(&cam, ControlKind::Contrast, 80));
        assert_eq!(sdk.stored_control(0, ControlType::Contrast), Some(50));
    }

    #[test]
    fn snapshot_reads_all_controls() {
        let (_sdk, cam) = camera(MockCameraSpec::sv305(), ErrorConfig::none());
        let registry = discover(&cam);
        registry.apply(&cam, ControlKind::BlackLevel, 42);
        let snap = registry.snapshot(&cam);
        assert_eq!(snap.len(), 9);
        assert!(snap.contains(&(ControlKind::BlackLevel, 42)));
    }

    #[test]
    fn frame_speed_reselect_is_noop() {
        let (sdk, cam) = camera(MockCameraSpec::sv305(), ErrorConfig::none());
        let registry = discover(&cam);
        registry.init_frame_speed(&cam, FrameSpeed::Normal).unwrap();
        sdk.clear_calls();

        let outcome = registry.set_frame_speed(&cam, FrameSpeed::Normal).unwrap();
        assert_eq!(outcome, SwitchOutcome::Unchanged);
        assert!(sdk.calls().is_empty());

        let outcome = registry.set_frame_speed(&cam, FrameSpeed::Fast).unwrap();
        assert_eq!(outcome, SwitchOutcome::Changed);
        assert_eq!(sdk.stored_control(0, ControlType::FrameSpeedMode), Some(2));
        assert_eq!(registry.frame_speed(), FrameSpeed::Fast);
    }

    #[test]
    fn switch_conversions() {
        assert_eq!(FrameFormat::Raw16.image_type(true), ImageType::Y16);
        assert_eq!(FrameFormat::Raw8.image_type(false), ImageType::Raw8);
        assert_eq!(FrameFormat::Raw8.bit_depth(), 8);
        assert_eq!(BitStretch::from_shift(3), Some(BitStretch::X8));
        assert_eq!(BitStretch::X16.shift(), 4);
        assert_eq!(FrameSpeed::from_svb(0), Some(FrameSpeed::Slow));
        assert!(ExposureBounds::from_caps_us(100_000, 1_000_000).clamp(0.001) == 0.1);
    }
}
