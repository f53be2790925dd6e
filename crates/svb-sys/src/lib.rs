//! Low-level FFI declarations for the SVBONY camera SDK (`libSVBCameraSDK`).
//!
//! The vendor SDK exposes a small synchronous C API keyed by an integer camera
//! id. Every call returns an `SVB_ERROR_CODE`; `SVB_SUCCESS` is zero.
//!
//! # Safety
//!
//! All functions in this crate are `unsafe` as they are direct FFI bindings.
//! For a safe wrapper, use the `daq-driver-svbony` crate instead.
//!
//! # Features
//!
//! - `svb-sdk`: declare and link the SDK functions. Without this feature only
//!   the constants and `#[repr(C)]` structs are exported, which lets dependent
//!   crates build on machines without the SDK installed.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(missing_docs)]

use std::os::raw::{c_char, c_float, c_int, c_long, c_uchar, c_uint};

pub type SVB_BOOL = c_int;
pub const SVB_FALSE: SVB_BOOL = 0;
pub const SVB_TRUE: SVB_BOOL = 1;

// =============================================================================
// Error codes
// =============================================================================

pub type SVB_ERROR_CODE = c_int;
pub const SVB_SUCCESS: SVB_ERROR_CODE = 0;
pub const SVB_ERROR_INVALID_INDEX: SVB_ERROR_CODE = 1;
pub const SVB_ERROR_INVALID_ID: SVB_ERROR_CODE = 2;
pub const SVB_ERROR_INVALID_CONTROL_TYPE: SVB_ERROR_CODE = 3;
pub const SVB_ERROR_CAMERA_CLOSED: SVB_ERROR_CODE = 4;
pub const SVB_ERROR_CAMERA_REMOVED: SVB_ERROR_CODE = 5;
pub const SVB_ERROR_INVALID_PATH: SVB_ERROR_CODE = 6;
pub const SVB_ERROR_INVALID_FILEFORMAT: SVB_ERROR_CODE = 7;
pub const SVB_ERROR_INVALID_SIZE: SVB_ERROR_CODE = 8;
pub const SVB_ERROR_INVALID_IMGTYPE: SVB_ERROR_CODE = 9;
pub const SVB_ERROR_OUTOF_BOUNDARY: SVB_ERROR_CODE = 10;
pub const SVB_ERROR_TIMEOUT: SVB_ERROR_CODE = 11;
pub const SVB_ERROR_INVALID_SEQUENCE: SVB_ERROR_CODE = 12;
pub const SVB_ERROR_BUFFER_TOO_SMALL: SVB_ERROR_CODE = 13;
pub const SVB_ERROR_VIDEO_MODE_ACTIVE: SVB_ERROR_CODE = 14;
pub const SVB_ERROR_EXPOSURE_IN_PROGRESS: SVB_ERROR_CODE = 15;
pub const SVB_ERROR_GENERAL_ERROR: SVB_ERROR_CODE = 16;
pub const SVB_ERROR_INVALID_MODE: SVB_ERROR_CODE = 17;
pub const SVB_ERROR_INVALID_DIRECTION: SVB_ERROR_CODE = 18;
pub const SVB_ERROR_UNKNOW_SENSOR_TYPE: SVB_ERROR_CODE = 19;
pub const SVB_ERROR_END: SVB_ERROR_CODE = 20;

// =============================================================================
// Enumerations
// =============================================================================

pub type SVB_BAYER_PATTERN = c_int;
pub const SVB_BAYER_RG: SVB_BAYER_PATTERN = 0;
pub const SVB_BAYER_BG: SVB_BAYER_PATTERN = 1;
pub const SVB_BAYER_GR: SVB_BAYER_PATTERN = 2;
pub const SVB_BAYER_GB: SVB_BAYER_PATTERN = 3;

pub type SVB_IMG_TYPE = c_int;
pub const SVB_IMG_RAW8: SVB_IMG_TYPE = 0;
pub const SVB_IMG_RAW10: SVB_IMG_TYPE = 1;
pub const SVB_IMG_RAW12: SVB_IMG_TYPE = 2;
pub const SVB_IMG_RAW14: SVB_IMG_TYPE = 3;
pub const SVB_IMG_RAW16: SVB_IMG_TYPE = 4;
pub const SVB_IMG_Y8: SVB_IMG_TYPE = 5;
pub const SVB_IMG_Y10: SVB_IMG_TYPE = 6;
pub const SVB_IMG_Y12: SVB_IMG_TYPE = 7;
pub const SVB_IMG_Y14: SVB_IMG_TYPE = 8;
pub const SVB_IMG_Y16: SVB_IMG_TYPE = 9;
pub const SVB_IMG_RGB24: SVB_IMG_TYPE = 10;
pub const SVB_IMG_RGB32: SVB_IMG_TYPE = 11;
pub const SVB_IMG_END: SVB_IMG_TYPE = -1;

pub type SVB_GUIDE_DIRECTION = c_int;
pub const SVB_GUIDE_NORTH: SVB_GUIDE_DIRECTION = 0;
pub const SVB_GUIDE_SOUTH: SVB_GUIDE_DIRECTION = 1;
pub const SVB_GUIDE_EAST: SVB_GUIDE_DIRECTION = 2;
pub const SVB_GUIDE_WEST: SVB_GUIDE_DIRECTION = 3;

pub type SVB_CAMERA_MODE = c_int;
pub const SVB_MODE_NORMAL: SVB_CAMERA_MODE = 0;
pub const SVB_MODE_TRIG_SOFT: SVB_CAMERA_MODE = 1;
pub const SVB_MODE_TRIG_RISE_EDGE: SVB_CAMERA_MODE = 2;
pub const SVB_MODE_TRIG_FALL_EDGE: SVB_CAMERA_MODE = 3;
pub const SVB_MODE_TRIG_DOUBLE_EDGE: SVB_CAMERA_MODE = 4;
pub const SVB_MODE_TRIG_HIGH_LEVEL: SVB_CAMERA_MODE = 5;
pub const SVB_MODE_TRIG_LOW_LEVEL: SVB_CAMERA_MODE = 6;
pub const SVB_MODE_END: SVB_CAMERA_MODE = -1;

pub type SVB_CONTROL_TYPE = c_int;
pub const SVB_GAIN: SVB_CONTROL_TYPE = 0;
pub const SVB_EXPOSURE: SVB_CONTROL_TYPE = 1;
pub const SVB_GAMMA: SVB_CONTROL_TYPE = 2;
pub const SVB_GAMMA_CONTRAST: SVB_CONTROL_TYPE = 3;
pub const SVB_WB_R: SVB_CONTROL_TYPE = 4;
pub const SVB_WB_G: SVB_CONTROL_TYPE = 5;
pub const SVB_WB_B: SVB_CONTROL_TYPE = 6;
pub const SVB_FLIP: SVB_CONTROL_TYPE = 7;
pub const SVB_FRAME_SPEED_MODE: SVB_CONTROL_TYPE = 8;
pub const SVB_CONTRAST: SVB_CONTROL_TYPE = 9;
pub const SVB_SHARPNESS: SVB_CONTROL_TYPE = 10;
pub const SVB_SATURATION: SVB_CONTROL_TYPE = 11;
pub const SVB_AUTO_TARGET_BRIGHTNESS: SVB_CONTROL_TYPE = 12;
pub const SVB_BLACK_LEVEL: SVB_CONTROL_TYPE = 13;
pub const SVB_COOLER_ENABLE: SVB_CONTROL_TYPE = 14;
pub const SVB_TARGET_TEMPERATURE: SVB_CONTROL_TYPE = 15;
pub const SVB_CURRENT_TEMPERATURE: SVB_CONTROL_TYPE = 16;
pub const SVB_COOLER_POWER: SVB_CONTROL_TYPE = 17;

// =============================================================================
// Structures
// =============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SVB_CAMERA_INFO {
    pub FriendlyName: [c_char; 32],
    pub CameraSN: [c_char; 32],
    pub PortType: [c_char; 32],
    pub DeviceID: c_uint,
    pub CameraID: c_int,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SVB_CAMERA_PROPERTY {
    pub MaxHeight: c_long,
    pub MaxWidth: c_long,
    pub IsColorCam: SVB_BOOL,
    pub BayerPattern: SVB_BAYER_PATTERN,
    pub SupportedBins: [c_int; 16],
    pub SupportedVideoFormat: [SVB_IMG_TYPE; 8],
    pub MaxBitDepth: c_int,
    pub IsTriggerCam: SVB_BOOL,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SVB_CONTROL_CAPS {
    pub Name: [c_char; 64],
    pub Description: [c_char; 128],
    pub MaxValue: c_long,
    pub MinValue: c_long,
    pub DefaultValue: c_long,
    pub IsAutoSupported: SVB_BOOL,
    pub IsWritable: SVB_BOOL,
    pub ControlType: SVB_CONTROL_TYPE,
    pub Unused: [c_char; 32],
}

// =============================================================================
// Functions
// =============================================================================

#[cfg(feature = "svb-sdk")]
extern "C" {
    pub fn SVBGetNumOfConnectedCameras() -> c_int;
    pub fn SVBGetCameraInfo(pSVBCameraInfo: *mut SVB_CAMERA_INFO, iCameraIndex: c_int)
        -> SVB_ERROR_CODE;
    pub fn SVBGetCameraProperty(
        iCameraID: c_int,
        pCameraProperty: *mut SVB_CAMERA_PROPERTY,
    ) -> SVB_ERROR_CODE;
    pub fn SVBOpenCamera(iCameraID: c_int) -> SVB_ERROR_CODE;
    pub fn SVBCloseCamera(iCameraID: c_int) -> SVB_ERROR_CODE;
    pub fn SVBGetNumOfControls(iCameraID: c_int, piNumberOfControls: *mut c_int)
        -> SVB_ERROR_CODE;
    pub fn SVBGetControlCaps(
        iCameraID: c_int,
        iControlIndex: c_int,
        pControlCaps: *mut SVB_CONTROL_CAPS,
    ) -> SVB_ERROR_CODE;
    pub fn SVBGetControlValue(
        iCameraID: c_int,
        ControlType: SVB_CONTROL_TYPE,
        plValue: *mut c_long,
        pbAuto: *mut SVB_BOOL,
    ) -> SVB_ERROR_CODE;
    pub fn SVBSetControlValue(
        iCameraID: c_int,
        ControlType: SVB_CONTROL_TYPE,
        lValue: c_long,
        bAuto: SVB_BOOL,
    ) -> SVB_ERROR_CODE;
    pub fn SVBGetOutputImageType(iCameraID: c_int, pImageType: *mut SVB_IMG_TYPE)
        -> SVB_ERROR_CODE;
    pub fn SVBSetOutputImageType(iCameraID: c_int, ImageType: SVB_IMG_TYPE) -> SVB_ERROR_CODE;
    pub fn SVBSetROIFormat(
        iCameraID: c_int,
        iStartX: c_int,
        iStartY: c_int,
        iWidth: c_int,
        iHeight: c_int,
        iBin: c_int,
    ) -> SVB_ERROR_CODE;
    pub fn SVBStartVideoCapture(iCameraID: c_int) -> SVB_ERROR_CODE;
    pub fn SVBStopVideoCapture(iCameraID: c_int) -> SVB_ERROR_CODE;
    pub fn SVBGetVideoData(
        iCameraID: c_int,
        pBuffer: *mut c_uchar,
        lBuffSize: c_long,
        iWaitms: c_int,
    ) -> SVB_ERROR_CODE;
    pub fn SVBSetCameraMode(iCameraID: c_int, mode: SVB_CAMERA_MODE) -> SVB_ERROR_CODE;
    pub fn SVBSendSoftTrigger(iCameraID: c_int) -> SVB_ERROR_CODE;
    pub fn SVBPulseGuide(
        iCameraID: c_int,
        direction: SVB_GUIDE_DIRECTION,
        duration: c_int,
    ) -> SVB_ERROR_CODE;
    pub fn SVBGetSensorPixelSize(iCameraID: c_int, fPixelSize: *mut c_float) -> SVB_ERROR_CODE;
    pub fn SVBSetAutoSaveParam(iCameraID: c_int, enable: SVB_BOOL) -> SVB_ERROR_CODE;
    pub fn SVBGetSDKVersion() -> *const c_char;
}
