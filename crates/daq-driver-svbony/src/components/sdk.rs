//! SVBONY SDK adapter
//!
//! Thin synchronous wrapper around the vendor camera API. The [`SvbSdk`] trait
//! is the seam between the driver and the SDK: `hardware.rs` implements it over
//! `svb-sys`, `mock.rs` implements it in memory. [`SvbCamera`] binds an SDK to
//! one camera id and tags every failure with the SDK call that produced it.
//!
//! No call here retries. Retry policy belongs to the caller.

use crate::error::{CameraError, SdkError};
use std::sync::Arc;

pub type SdkResult<T> = std::result::Result<T, SdkError>;

// =============================================================================
// Vendor enumerations
// =============================================================================

/// Camera controls known to the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlType {
    Gain,
    Exposure,
    Gamma,
    GammaContrast,
    WbR,
    WbG,
    WbB,
    Flip,
    FrameSpeedMode,
    Contrast,
    Sharpness,
    Saturation,
    AutoTargetBrightness,
    BlackLevel,
    CoolerEnable,
    TargetTemperature,
    CurrentTemperature,
    CoolerPower,
}

impl ControlType {
    pub fn from_svb(value: i32) -> Option<Self> {
        let kind = match value {
            0 => ControlType::Gain,
            1 => ControlType::Exposure,
            2 => ControlType::Gamma,
            3 => ControlType::GammaContrast,
            4 => ControlType::WbR,
            5 => ControlType::WbG,
            6 => ControlType::WbB,
            7 => ControlType::Flip,
            8 => ControlType::FrameSpeedMode,
            9 => ControlType::Contrast,
            10 => ControlType::Sharpness,
            11 => ControlType::Saturation,
            12 => ControlType::AutoTargetBrightness,
            13 => ControlType::BlackLevel,
            14 => ControlType::CoolerEnable,
            15 => ControlType::TargetTemperature,
            16 => ControlType::CurrentTemperature,
            17 => ControlType::CoolerPower,
            _ => return None,
        };
        Some(kind)
    }

    pub fn to_svb(self) -> i32 {
        match self {
            ControlType::Gain => 0,
            ControlType::Exposure => 1,
            ControlType::Gamma => 2,
            ControlType::GammaContrast => 3,
            ControlType::WbR => 4,
            ControlType::WbG => 5,
            ControlType::WbB => 6,
            ControlType::Flip => 7,
            ControlType::FrameSpeedMode => 8,
            ControlType::Contrast => 9,
            ControlType::Sharpness => 10,
            ControlType::Saturation => 11,
            ControlType::AutoTargetBrightness => 12,
            ControlType::BlackLevel => 13,
            ControlType::CoolerEnable => 14,
            ControlType::TargetTemperature => 15,
            ControlType::CurrentTemperature => 16,
            ControlType::CoolerPower => 17,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlType::Gain => "SVB_GAIN",
            ControlType::Exposure => "SVB_EXPOSURE",
            ControlType::Gamma => "SVB_GAMMA",
            ControlType::GammaContrast => "SVB_GAMMA_CONTRAST",
            ControlType::WbR => "SVB_WB_R",
            ControlType::WbG => "SVB_WB_G",
            ControlType::WbB => "SVB_WB_B",
            ControlType::Flip => "SVB_FLIP",
            ControlType::FrameSpeedMode => "SVB_FRAME_SPEED_MODE",
            ControlType::Contrast => "SVB_CONTRAST",
            ControlType::Sharpness => "SVB_SHARPNESS",
            ControlType::Saturation => "SVB_SATURATION",
            ControlType::AutoTargetBrightness => "SVB_AUTO_TARGET_BRIGHTNESS",
            ControlType::BlackLevel => "SVB_BLACK_LEVEL",
            ControlType::CoolerEnable => "SVB_COOLER_ENABLE",
            ControlType::TargetTemperature => "SVB_TARGET_TEMPERATURE",
            ControlType::CurrentTemperature => "SVB_CURRENT_TEMPERATURE",
            ControlType::CoolerPower => "SVB_COOLER_POWER",
        }
    }
}

impl std::fmt::Display for ControlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output image types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Raw8,
    Raw10,
    Raw12,
    Raw14,
    Raw16,
    Y8,
    Y10,
    Y12,
    Y14,
    Y16,
    Rgb24,
    Rgb32,
}

impl ImageType {
    pub fn from_svb(value: i32) -> Option<Self> {
        let t = match value {
            0 => ImageType::Raw8,
            1 => ImageType::Raw10,
            2 => ImageType::Raw12,
            3 => ImageType::Raw14,
            4 => ImageType::Raw16,
            5 => ImageType::Y8,
            6 => ImageType::Y10,
            7 => ImageType::Y12,
            8 => ImageType::Y14,
            9 => ImageType::Y16,
            10 => ImageType::Rgb24,
            11 => ImageType::Rgb32,
            _ => return None,
        };
        Some(t)
    }

    pub fn to_svb(self) -> i32 {
        match self {
            ImageType::Raw8 => 0,
            ImageType::Raw10 => 1,
            ImageType::Raw12 => 2,
            ImageType::Raw14 => 3,
            ImageType::Raw16 => 4,
            ImageType::Y8 => 5,
            ImageType::Y10 => 6,
            ImageType::Y12 => 7,
            ImageType::Y14 => 8,
            ImageType::Y16 => 9,
            ImageType::Rgb24 => 10,
            ImageType::Rgb32 => 11,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Raw8 => "SVB_IMG_RAW8",
            ImageType::Raw10 => "SVB_IMG_RAW10",
            ImageType::Raw12 => "SVB_IMG_RAW12",
            ImageType::Raw14 => "SVB_IMG_RAW14",
            ImageType::Raw16 => "SVB_IMG_RAW16",
            ImageType::Y8 => "SVB_IMG_Y8",
            ImageType::Y10 => "SVB_IMG_Y10",
            ImageType::Y12 => "SVB_IMG_Y12",
            ImageType::Y14 => "SVB_IMG_Y14",
            ImageType::Y16 => "SVB_IMG_Y16",
            ImageType::Rgb24 => "SVB_IMG_RGB24",
            ImageType::Rgb32 => "SVB_IMG_RGB32",
        }
    }

    pub fn pretty_name(&self) -> &'static str {
        match self {
            ImageType::Raw8 => "Raw 8 bit",
            ImageType::Raw10 => "Raw 10 bit",
            ImageType::Raw12 => "Raw 12 bit",
            ImageType::Raw14 => "Raw 14 bit",
            ImageType::Raw16 => "Raw 16 bit",
            ImageType::Y8 => "Luma",
            ImageType::Y10 => "Luma 10 bit",
            ImageType::Y12 => "Luma 12 bit",
            ImageType::Y14 => "Luma 14 bit",
            ImageType::Y16 => "Luma 16 bit",
            ImageType::Rgb24 => "RGB 24",
            ImageType::Rgb32 => "RGB 32",
        }
    }

    /// Bytes per pixel the SDK writes for this type.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            ImageType::Raw8 | ImageType::Y8 => 1,
            ImageType::Rgb24 => 3,
            ImageType::Rgb32 => 4,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BayerPattern {
    Rg,
    Bg,
    Gr,
    Gb,
}

impl BayerPattern {
    pub fn from_svb(value: i32) -> Self {
        match value {
            1 => BayerPattern::Bg,
            2 => BayerPattern::Gr,
            3 => BayerPattern::Gb,
            _ => BayerPattern::Rg,
        }
    }

    pub fn to_svb(self) -> i32 {
        match self {
            BayerPattern::Rg => 0,
            BayerPattern::Bg => 1,
            BayerPattern::Gr => 2,
            BayerPattern::Gb => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BayerPattern::Rg => "RGGB",
            BayerPattern::Bg => "BGGR",
            BayerPattern::Gr => "GRBG",
            BayerPattern::Gb => "GBRG",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMode {
    Normal,
    SoftTrigger,
    RiseEdge,
    FallEdge,
    DoubleEdge,
    HighLevel,
    LowLevel,
}

impl CameraMode {
    pub fn to_svb(self) -> i32 {
        match self {
            CameraMode::Normal => 0,
            CameraMode::SoftTrigger => 1,
            CameraMode::RiseEdge => 2,
            CameraMode::FallEdge => 3,
            CameraMode::DoubleEdge => 4,
            CameraMode::HighLevel => 5,
            CameraMode::LowLevel => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraMode::Normal => "Normal",
            CameraMode::SoftTrigger => "SoftTrigger",
            CameraMode::RiseEdge => "RiseEdge",
            CameraMode::FallEdge => "FallEdge",
            CameraMode::DoubleEdge => "DoubleEdge",
            CameraMode::HighLevel => "HighLevel",
            CameraMode::LowLevel => "LowLevel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideDirection {
    North,
    South,
    East,
    West,
}

impl GuideDirection {
    pub fn to_svb(self) -> i32 {
        match self {
            GuideDirection::North => 0,
            GuideDirection::South => 1,
            GuideDirection::East => 2,
            GuideDirection::West => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GuideDirection::North => "North",
            GuideDirection::South => "South",
            GuideDirection::East => "East",
            GuideDirection::West => "West",
        }
    }
}

// =============================================================================
// Data Structures
// =============================================================================

/// Identity of a connected camera as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    /// Model name, e.g. "SVBONY SV305"
    pub friendly_name: String,
    pub serial_number: String,
    pub port_type: String,
    pub device_id: u32,
    /// Id used for every subsequent SDK call
    pub camera_id: i32,
}

/// Static sensor properties queried once after open.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraProperty {
    pub max_width: u32,
    pub max_height: u32,
    pub is_color: bool,
    pub bayer_pattern: BayerPattern,
    pub supported_bins: Vec<u32>,
    pub supported_formats: Vec<ImageType>,
    pub max_bit_depth: u32,
    pub is_trigger_cam: bool,
}

/// Capabilities of one control slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCaps {
    pub name: String,
    pub description: String,
    pub min_value: i64,
    pub max_value: i64,
    pub default_value: i64,
    pub auto_supported: bool,
    pub writable: bool,
    /// Raw SDK control id. Ids newer than this driver do not map to a [`ControlType`].
    pub raw_type: i32,
}

impl ControlCaps {
    pub fn control_type(&self) -> Option<ControlType> {
        ControlType::from_svb(self.raw_type)
    }
}

// =============================================================================
// SDK seam
// =============================================================================

/// Synchronous vendor SDK surface.
///
/// Every method maps one SDK entry point. Implementations must be callable
/// from blocking worker threads.
pub trait SvbSdk: Send + Sync {
    fn connected_cameras(&self) -> Vec<CameraInfo>;
    fn sdk_version(&self) -> String;

    fn open(&self, camera_id: i32) -> SdkResult<()>;
    fn close(&self, camera_id: i32) -> SdkResult<()>;
    fn camera_property(&self, camera_id: i32) -> SdkResult<CameraProperty>;
    fn pixel_size(&self, camera_id: i32) -> SdkResult<f32>;
    fn num_controls(&self, camera_id: i32) -> SdkResult<usize>;
    fn control_caps(&self, camera_id: i32, index: usize) -> SdkResult<ControlCaps>;
    fn set_control_value(
        &self,
        camera_id: i32,
        control: ControlType,
        value: i64,
        auto: bool,
    ) -> SdkResult<()>;
    /// Returns `(value, is_auto)`.
    fn control_value(&self, camera_id: i32, control: ControlType) -> SdkResult<(i64, bool)>;
    fn set_output_image_type(&self, camera_id: i32, image_type: ImageType) -> SdkResult<()>;
    fn set_roi(&self, camera_id: i32, x: u32, y: u32, width: u32, height: u32, bin: u32)
        -> SdkResult<()>;
    fn set_mode(&self, camera_id: i32, mode: CameraMode) -> SdkResult<()>;
    fn start_capture(&self, camera_id: i32) -> SdkResult<()>;
    fn stop_capture(&self, camera_id: i32) -> SdkResult<()>;
    fn send_soft_trigger(&self, camera_id: i32) -> SdkResult<()>;
    /// Fill `buffer` with the next frame, waiting at most `timeout_ms`.
    fn get_frame(&self, camera_id: i32, buffer: &mut [u8], timeout_ms: u32) -> SdkResult<()>;
    fn pulse_guide(&self, camera_id: i32, direction: GuideDirection, duration_ms: u32)
        -> SdkResult<()>;
    fn set_auto_save(&self, camera_id: i32, enabled: bool) -> SdkResult<()>;
}

/// An [`SvbSdk`] bound to one camera id.
///
/// Cheap to clone; workers each hold their own copy.
#[derive(Clone)]
pub struct SvbCamera {
    sdk: Arc<dyn SvbSdk>,
    camera_id: i32,
}

impl std::fmt::Debug for SvbCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvbCamera")
            .field("camera_id", &self.camera_id)
            .finish()
    }
}

type CamResult<T> = std::result::Result<T, CameraError>;

impl SvbCamera {
    pub fn new(sdk: Arc<dyn SvbSdk>, camera_id: i32) -> Self {
        Self { sdk, camera_id }
    }

    pub fn camera_id(&self) -> i32 {
        self.camera_id
    }

    pub fn sdk(&self) -> &Arc<dyn SvbSdk> {
        &self.sdk
    }

    pub fn sdk_version(&self) -> String {
        self.sdk.sdk_version()
    }

    pub fn open(&self) -> CamResult<()> {
        self.sdk
            .open(self.camera_id)
            .map_err(|e| CameraError::sdk("SVBOpenCamera", e))
    }

    pub fn close(&self) -> CamResult<()> {
        self.sdk
            .close(self.camera_id)
            .map_err(|e| CameraError::sdk("SVBCloseCamera", e))
    }

    pub fn property(&self) -> CamResult<CameraProperty> {
        self.sdk
            .camera_property(self.camera_id)
            .map_err(|e| CameraError::sdk("SVBGetCameraProperty", e))
    }

    pub fn pixel_size(&self) -> CamResult<f32> {
        self.sdk
            .pixel_size(self.camera_id)
            .map_err(|e| CameraError::sdk("SVBGetSensorPixelSize", e))
    }

    pub fn num_controls(&self) -> CamResult<usize> {
        self.sdk
            .num_controls(self.camera_id)
            .map_err(|e| CameraError::sdk("SVBGetNumOfControls", e))
    }

    pub fn control_caps(&self, index: usize) -> CamResult<ControlCaps> {
        self.sdk
            .control_caps(self.camera_id, index)
            .map_err(|e| CameraError::sdk("SVBGetControlCaps", e))
    }

    pub fn set_control(&self, control: ControlType, value: i64) -> CamResult<()> {
        tracing::trace!(control = %control, value, "SVBSetControlValue");
        self.sdk
            .set_control_value(self.camera_id, control, value, false)
            .map_err(|e| CameraError::sdk("SVBSetControlValue", e))
    }

    pub fn control(&self, control: ControlType) -> CamResult<(i64, bool)> {
        self.sdk
            .control_value(self.camera_id, control)
            .map_err(|e| CameraError::sdk("SVBGetControlValue", e))
    }

    pub fn set_output_image_type(&self, image_type: ImageType) -> CamResult<()> {
        self.sdk
            .set_output_image_type(self.camera_id, image_type)
            .map_err(|e| CameraError::sdk("SVBSetOutputImageType", e))
    }

    pub fn set_roi(&self, x: u32, y: u32, width: u32, height: u32, bin: u32) -> CamResult<()> {
        tracing::trace!(x, y, width, height, bin, "SVBSetROIFormat");
        self.sdk
            .set_roi(self.camera_id, x, y, width, height, bin)
            .map_err(|e| CameraError::sdk("SVBSetROIFormat", e))
    }

    pub fn set_mode(&self, mode: CameraMode) -> CamResult<()> {
        self.sdk
            .set_mode(self.camera_id, mode)
            .map_err(|e| CameraError::sdk("SVBSetCameraMode", e))
    }

    pub fn start_capture(&self) -> CamResult<()> {
        self.sdk
            .start_capture(self.camera_id)
            .map_err(|e| CameraError::sdk("SVBStartVideoCapture", e))
    }

    pub fn stop_capture(&self) -> CamResult<()> {
        self.sdk
            .stop_capture(self.camera_id)
            .map_err(|e| CameraError::sdk("SVBStopVideoCapture", e))
    }

    pub fn send_soft_trigger(&self) -> CamResult<()> {
        self.sdk
            .send_soft_trigger(self.camera_id)
            .map_err(|e| CameraError::sdk("SVBSendSoftTrigger", e))
    }

    /// Raw status so polling loops can tell a timeout from a real failure.
    pub fn get_frame(&self, buffer: &mut [u8], timeout_ms: u32) -> SdkResult<()> {
        self.sdk.get_frame(self.camera_id, buffer, timeout_ms)
    }

    pub fn pulse_guide(&self, direction: GuideDirection, duration_ms: u32) -> CamResult<()> {
        self.sdk
            .pulse_guide(self.camera_id, direction, duration_ms)
            .map_err(|e| CameraError::sdk("SVBPulseGuide", e))
    }

    pub fn set_auto_save(&self, enabled: bool) -> CamResult<()> {
        self.sdk
            .set_auto_save(self.camera_id, enabled)
            .map_err(|e| CameraError::sdk("SVBSetAutoSaveParam", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_type_conversions() {
        for raw in 0..18 {
            let kind = ControlType::from_svb(raw);
            assert!(kind.is_some(), "control id {} should be known", raw);
            assert_eq!(kind.map(|k| k.to_svb()), Some(raw));
        }
        assert_eq!(ControlType::from_svb(99), None);
        assert_eq!(ControlType::BlackLevel.as_str(), "SVB_BLACK_LEVEL");
    }

    #[test]
    fn bayer_pattern_names() {
        assert_eq!(BayerPattern::from_svb(0).as_str(), "RGGB");
        assert_eq!(BayerPattern::from_svb(1).as_str(), "BGGR");
        assert_eq!(BayerPattern::from_svb(2).as_str(), "GRBG");
        assert_eq!(BayerPattern::from_svb(3).as_str(), "GBRG");
    }

    #[test]
    fn image_type_depths() {
        assert_eq!(ImageType::Raw8.bytes_per_pixel(), 1);
        assert_eq!(ImageType::Y16.bytes_per_pixel(), 2);
        assert_eq!(ImageType::Rgb24.bytes_per_pixel(), 3);
        assert_eq!(ImageType::from_svb(9), Some(ImageType::Y16));
        assert_eq!(ImageType::Y8.pretty_name(), "Luma");
    }

    #[test]
    fn unknown_caps_have_no_control_type() {
        let caps = ControlCaps {
            name: "Future".into(),
            description: String::new(),
            min_value: 0,
            max_value: 1,
            default_value: 0,
            auto_supported: false,
            writable: true,
            raw_type: 64,
        };
        assert_eq!(caps.control_type(), None);
    }
}
