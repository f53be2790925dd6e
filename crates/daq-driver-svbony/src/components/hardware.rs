//! Vendor SDK backend
//!
//! [`SvbSdk`] implementation over the raw `svb-sys` declarations. Only built
//! with the `svb_sdk` feature.

#![allow(unsafe_code)]

use crate::components::sdk::{
    BayerPattern, CameraInfo, CameraMode, CameraProperty, ControlCaps, ControlType,
    GuideDirection, ImageType, SdkResult, SvbSdk,
};
use crate::error::SdkError;
use std::ffi::CStr;
use std::os::raw::{c_char, c_float, c_int, c_long};
use svb_sys::*;

/// Convert a fixed-size, NUL-terminated C string field.
fn field_to_string(field: &[c_char]) -> String {
    let bytes: Vec<u8> = field
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Process-wide handle onto `libSVBCameraSDK`.
///
/// The SDK keeps its own global state keyed by camera id, so this type carries
/// no fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct HardwareSdk;

impl HardwareSdk {
    pub fn new() -> Self {
        Self
    }
}

impl SvbSdk for HardwareSdk {
    fn connected_cameras(&self) -> Vec<CameraInfo> {
        // SAFETY: no arguments; SDK returns a count (negative on failure).
        let count = unsafe { SVBGetNumOfConnectedCameras() }.max(0);
        let mut cameras = Vec::with_capacity(count as usize);
        for index in 0..count {
            // SAFETY: SVB_CAMERA_INFO is POD; zeroed then filled by the SDK.
            let mut info: SVB_CAMERA_INFO = unsafe { std::mem::zeroed() };
            // SAFETY: info is a valid out pointer; index < count.
            let status = unsafe { SVBGetCameraInfo(&mut info, index) };
            if let Err(e) = SdkError::check(status) {
                tracing::warn!(index, status = %e, "SVBGetCameraInfo failed");
                continue;
            }
            cameras.push(CameraInfo {
                friendly_name: field_to_string(&info.FriendlyName),
                serial_number: field_to_string(&info.CameraSN),
                port_type: field_to_string(&info.PortType),
                device_id: info.DeviceID,
                camera_id: info.CameraID,
            });
        }
        cameras
    }

    fn sdk_version(&self) -> String {
        // SAFETY: returns a pointer to a static string owned by the SDK, or null.
        let ptr = unsafe { SVBGetSDKVersion() };
        if ptr.is_null() {
            return String::new();
        }
        // SAFETY: ptr is non-null and NUL-terminated per SDK contract.
        unsafe { CStr::from_ptr(ptr) }
            .to_string_lossy()
            .into_owned()
    }

    fn open(&self, camera_id: i32) -> SdkResult<()> {
        // SAFETY: plain integer argument.
        SdkError::check(unsafe { SVBOpenCamera(camera_id) })
    }

    fn close(&self, camera_id: i32) -> SdkResult<()> {
        // SAFETY: plain integer argument.
        SdkError::check(unsafe { SVBCloseCamera(camera_id) })
    }

    fn camera_property(&self, camera_id: i32) -> SdkResult<CameraProperty> {
        // SAFETY: SVB_CAMERA_PROPERTY is POD; zeroed then filled by the SDK.
        let mut prop: SVB_CAMERA_PROPERTY = unsafe { std::mem::zeroed() };
        // SAFETY: prop is a valid out pointer.
        SdkError::check(unsafe { SVBGetCameraProperty(camera_id, &mut prop) })?;
        Ok(CameraProperty {
            max_width: prop.MaxWidth.max(0) as u32,
            max_height: prop.MaxHeight.max(0) as u32,
            is_color: prop.IsColorCam == SVB_TRUE,
            bayer_pattern: BayerPattern::from_svb(prop.BayerPattern),
            supported_bins: prop
                .SupportedBins
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| b as u32)
                .collect(),
            supported_formats: prop
                .SupportedVideoFormat
                .iter()
                .take_while(|&&f| f != SVB_IMG_END)
                .filter_map(|&f| ImageType::from_svb(f))
                .collect(),
            max_bit_depth: prop.MaxBitDepth.max(0) as u32,
            is_trigger_cam: prop.IsTriggerCam == SVB_TRUE,
        })
    }

    fn pixel_size(&self, camera_id: i32) -> SdkResult<f32> {
        let mut size: c_float = 0.0;
        // SAFETY: size is a valid out pointer.
        SdkError::check(unsafe { SVBGetSensorPixelSize(camera_id, &mut size) })?;
        Ok(size)
    }

    fn num_controls(&self, camera_id: i32) -> SdkResult<usize> {
        let mut count: c_int = 0;
        // SAFETY: count is a valid out pointer.
        SdkError::check(unsafe { SVBGetNumOfControls(camera_id, &mut count) })?;
        Ok(count.max(0) as usize)
    }

    fn control_caps(&self, camera_id: i32, index: usize) -> SdkResult<ControlCaps> {
        // SAFETY: SVB_CONTROL_CAPS is POD; zeroed then filled by the SDK.
        let mut caps: SVB_CONTROL_CAPS = unsafe { std::mem::zeroed() };
        // SAFETY: caps is a valid out pointer; SDK validates the index.
        SdkError::check(unsafe { SVBGetControlCaps(camera_id, index as c_int, &mut caps) })?;
        Ok(ControlCaps {
            name: field_to_string(&caps.Name),
            description: field_to_string(&caps.Description),
            min_value: caps.MinValue as i64,
            max_value: caps.MaxValue as i64,
            default_value: caps.DefaultValue as i64,
            auto_supported: caps.IsAutoSupported == SVB_TRUE,
            writable: caps.IsWritable == SVB_TRUE,
            raw_type: caps.ControlType,
        })
    }

    fn set_control_value(
        &self,
        camera_id: i32,
        control: ControlType,
        value: i64,
        auto: bool,
    ) -> SdkResult<()> {
        let auto = if auto { SVB_TRUE } else { SVB_FALSE };
        // SAFETY: plain value arguments.
        SdkError::check(unsafe {
            SVBSetControlValue(camera_id, control.to_svb(), value as c_long, auto)
        })
    }

    fn control_value(&self, camera_id: i32, control: ControlType) -> SdkResult<(i64, bool)> {
        let mut value: c_long = 0;
        let mut auto: SVB_BOOL = SVB_FALSE;
        // SAFETY: value and auto are valid out pointers.
        SdkError::check(unsafe {
            SVBGetControlValue(camera_id, control.to_svb(), &mut value, &mut auto)
        })?;
        Ok((value as i64, auto == SVB_TRUE))
    }

    fn set_output_image_type(&self, camera_id: i32, image_type: ImageType) -> SdkResult<()> {
        // SAFETY: plain value arguments.
        SdkError::check(unsafe { SVBSetOutputImageType(camera_id, image_type.to_svb()) })
    }

    fn set_roi(
        &self,
        camera_id: i32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        bin: u32,
    ) -> SdkResult<()> {
        // SAFETY: plain value arguments; SDK validates bounds.
        SdkError::check(unsafe {
            SVBSetROIFormat(
                camera_id,
                x as c_int,
                y as c_int,
                width as c_int,
                height as c_int,
                bin as c_int,
            )
        })
    }

    fn set_mode(&self, camera_id: i32, mode: CameraMode) -> SdkResult<()> {
        // SAFETY: plain value arguments.
        SdkError::check(unsafe { SVBSetCameraMode(camera_id, mode.to_svb()) })
    }

    fn start_capture(&self, camera_id: i32) -> SdkResult<()> {
        // SAFETY: plain integer argument.
        SdkError::check(unsafe { SVBStartVideoCapture(camera_id) })
    }

    fn stop_capture(&self, camera_id: i32) -> SdkResult<()> {
        // SAFETY: plain integer argument.
        SdkError::check(unsafe { SVBStopVideoCapture(camera_id) })
    }

    fn send_soft_trigger(&self, camera_id: i32) -> SdkResult<()> {
        // SAFETY: plain integer argument.
        SdkError::check(unsafe { SVBSendSoftTrigger(camera_id) })
    }

    fn get_frame(&self, camera_id: i32, buffer: &mut [u8], timeout_ms: u32) -> SdkResult<()> {
        // SAFETY: buffer is a live, writable slice and the SDK writes at most
        // lBuffSize bytes into it.
        SdkError::check(unsafe {
            SVBGetVideoData(
                camera_id,
                buffer.as_mut_ptr(),
                buffer.len() as c_long,
                timeout_ms as c_int,
            )
        })
    }

    fn pulse_guide(
        &self,
        camera_id: i32,
        direction: GuideDirection,
        duration_ms: u32,
    ) -> SdkResult<()> {
        // SAFETY: plain value arguments.
        SdkError::check(unsafe {
            SVBPulseGuide(camera_id, direction.to_svb(), duration_ms as c_int)
        })
    }

    fn set_auto_save(&self, camera_id: i32, enabled: bool) -> SdkResult<()> {
        let flag = if enabled { SVB_TRUE } else { SVB_FALSE };
        // SAFETY: plain value arguments.
        SdkError::check(unsafe { SVBSetAutoSaveParam(camera_id, flag) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_field_stops_at_nul() {
        let mut field = [0 as c_char; 32];
        for (i, b) in b"SV305".iter().enumerate() {
            field[i] = *b as c_char;
        }
        assert_eq!(field_to_string(&field), "SV305");
    }
}
