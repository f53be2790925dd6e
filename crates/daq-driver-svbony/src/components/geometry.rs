//! Geometry & format manager
//!
//! Owns the sub-frame, binning factor, output format, bit depth and stretch
//! shift, plus the frame buffer the capture workers fill. Every ROI or format
//! change runs while holding the buffer lock, so it can never interleave with
//! a frame transfer, and is refused unless acquisition is idle.

use crate::components::acquisition::StateCell;
use crate::components::controls::{BitStretch, FrameFormat, SwitchOutcome};
use crate::components::sdk::SvbCamera;
use crate::error::CameraError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Sensor-side geometry and pixel format.
///
/// `x`, `y`, `width`, `height` are unbinned sensor pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryState {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub bin: u32,
    pub format: FrameFormat,
    pub bit_depth: u32,
    pub stretch: BitStretch,
    pub max_width: u32,
    pub max_height: u32,
}

impl GeometryState {
    pub fn full_frame(max_width: u32, max_height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width: max_width,
            height: max_height,
            bin: 1,
            format: FrameFormat::Raw16,
            bit_depth: 16,
            stretch: BitStretch::Off,
            max_width,
            max_height,
        }
    }

    /// Bytes the SDK writes for one frame (before binning).
    pub fn buffer_size(&self) -> usize {
        self.width as usize * self.height as usize * self.bit_depth as usize / 8
    }

    pub fn binned_size(&self) -> (u32, u32) {
        let bin = self.bin.max(1);
        (self.width / bin, self.height / bin)
    }

    pub fn is_binning_active(&self) -> bool {
        self.bin > 1
    }

    /// Sub-frame acceptance: in bounds, width a multiple of 8, height even.
    pub fn check_subframe(&self, x: u32, y: u32, width: u32, height: u32) -> Result<(), CameraError> {
        let in_bounds = x
            .checked_add(width)
            .is_some_and(|right| right <= self.max_width)
            && y
                .checked_add(height)
                .is_some_and(|bottom| bottom <= self.max_height);
        if !in_bounds || width % 8 != 0 || height % 2 != 0 {
            return Err(CameraError::InvalidSubframe(format!(
                "x={} y={} w={} h={} on {}x{} sensor",
                x, y, width, height, self.max_width, self.max_height
            )));
        }
        Ok(())
    }
}

/// Frame buffer shared between the manager and the capture workers.
pub type FrameBuffer = Arc<Mutex<Vec<u8>>>;

pub struct GeometryManager {
    camera: SvbCamera,
    mono_only: bool,
    state: Mutex<GeometryState>,
    buffer: FrameBuffer,
    acquisition: StateCell,
}

impl GeometryManager {
    pub fn new(
        camera: SvbCamera,
        max_width: u32,
        max_height: u32,
        mono_only: bool,
        acquisition: StateCell,
    ) -> Self {
        let state = GeometryState::full_frame(max_width, max_height);
        let buffer = Arc::new(Mutex::new(vec![0u8; state.buffer_size()]));
        Self {
            camera,
            mono_only,
            state: Mutex::new(state),
            buffer,
            acquisition,
        }
    }

    pub fn state(&self) -> GeometryState {
        self.state.lock().clone()
    }

    pub fn buffer(&self) -> FrameBuffer {
        self.buffer.clone()
    }

    pub fn stretch(&self) -> BitStretch {
        self.state.lock().stretch
    }

    fn ensure_idle(&self, what: &str) -> Result<(), CameraError> {
        let current = self.acquisition.get();
        if !current.is_idle() {
            tracing::warn!(state = %current, "Refusing {} while acquisition is active", what);
            return Err(CameraError::Busy(format!(
                "cannot change {} while {}",
                what, current
            )));
        }
        Ok(())
    }

    fn resize_buffer(buffer: &mut Vec<u8>, state: &GeometryState) {
        let size = state.buffer_size();
        buffer.clear();
        buffer.resize(size, 0);
        tracing::info!(size, "Frame buffer resized");
    }

    // =========================================================================
    // Connect-time setup
    // =========================================================================

    /// Select the connect-time format. Bit depth 16, stretch off.
    pub fn init_format(&self, format: FrameFormat) -> Result<(), CameraError> {
        let image_type = format.image_type(self.mono_only);
        self.camera.set_output_image_type(image_type)?;
        tracing::info!(image_type = image_type.as_str(), "Output format set");

        let mut buffer = self.buffer.lock();
        let mut state = self.state.lock();
        state.format = format;
        state.bit_depth = format.bit_depth();
        state.stretch = BitStretch::Off;
        Self::resize_buffer(&mut buffer, &state);
        Ok(())
    }

    /// Full-sensor ROI at bin 1 with zero offsets.
    pub fn init_full_frame(&self) -> Result<(), CameraError> {
        let mut buffer = self.buffer.lock();
        let mut state = self.state.lock();
        self.camera
            .set_roi(0, 0, state.max_width, state.max_height, 1)?;
        state.x = 0;
        state.y = 0;
        state.width = state.max_width;
        state.height = state.max_height;
        state.bin = 1;
        Self::resize_buffer(&mut buffer, &state);
        tracing::info!(
            width = state.width,
            height = state.height,
            "Camera set ROI"
        );
        Ok(())
    }

    // =========================================================================
    // Runtime changes
    // =========================================================================

    /// Change the sub-frame: validate, stop capture, set ROI, restart capture,
    /// then commit.
    ///
    /// Any failure leaves the committed geometry untouched.
    pub fn update_frame(&self, x: u32, y: u32, width: u32, height: u32) -> Result<(), CameraError> {
        self.ensure_idle("subframe")?;
        let mut buffer = self.buffer.lock();
        let mut state = self.state.lock();
        self.apply_frame(&mut buffer, &mut state, x, y, width, height)
    }

    fn apply_frame(
        &self,
        buffer: &mut Vec<u8>,
        state: &mut GeometryState,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<(), CameraError> {
        if let Err(e) = state.check_subframe(x, y, width, height) {
            tracing::error!(error = %e, "Subframe out of range");
            return Err(e);
        }

        self.camera.stop_capture().map_err(|e| {
            tracing::error!(error = %e, "Stop camera failed");
            e
        })?;
        self.camera.set_roi(x, y, width, height, 1).map_err(|e| {
            tracing::error!(error = %e, "Camera set subframe failed");
            e
        })?;
        tracing::info!(x, y, width, height, "Subframe set");
        self.camera.start_capture().map_err(|e| {
            tracing::error!(error = %e, "Start camera failed");
            e
        })?;

        state.x = x;
        state.y = y;
        state.width = width;
        state.height = height;
        Self::resize_buffer(buffer, state);
        Ok(())
    }

    /// Set a symmetric bin factor and reapply the current sub-frame.
    ///
    /// Binning is done in software; the SDK always reads out at bin 1.
    pub fn update_binning(&self, bin: u32) -> Result<(), CameraError> {
        self.ensure_idle("binning")?;
        if bin == 0 {
            return Err(CameraError::InvalidValue("bin factor must be >= 1".into()));
        }
        let mut buffer = self.buffer.lock();
        let mut state = self.state.lock();
        let previous = state.bin;
        state.bin = bin;
        let (x, y, w, h) = (state.x, state.y, state.width, state.height);
        if let Err(e) = self.apply_frame(&mut buffer, &mut state, x, y, w, h) {
            state.bin = previous;
            return Err(e);
        }
        tracing::info!(bin, "Binning set");
        Ok(())
    }

    /// Switch output format and recompute bit depth and buffer size.
    pub fn set_format(&self, format: FrameFormat) -> Result<SwitchOutcome, CameraError> {
        let current = self.state.lock().format;
        if current == format {
            tracing::info!(format = format.as_str(), "Frame format is already set");
            return Ok(SwitchOutcome::Unchanged);
        }
        self.ensure_idle("frame format")?;

        let mut buffer = self.buffer.lock();
        let image_type = format.image_type(self.mono_only);
        self.camera.set_output_image_type(image_type).map_err(|e| {
            tracing::error!(error = %e, "Camera set frame format failed");
            e
        })?;

        let mut state = self.state.lock();
        state.format = format;
        state.bit_depth = format.bit_depth();
        Self::resize_buffer(&mut buffer, &state);
        tracing::info!(format = format.as_str(), bit_depth = state.bit_depth, "Frame format is now set");
        Ok(SwitchOutcome::Changed)
    }

    /// Stretch is applied per delivered frame and can change at any time.
    pub fn set_stretch(&self, stretch: BitStretch) -> SwitchOutcome {
        let mut state = self.state.lock();
        if state.stretch == stretch {
            tracing::info!(stretch = stretch.as_str(), "Stretch factor is already set");
            return SwitchOutcome::Unchanged;
        }
        state.stretch = stretch;
        tracing::info!(stretch = stretch.as_str(), "Stretch factor is now set");
        SwitchOutcome::Changed
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::components::acquisition::{AcquisitionState, StateCell};
    use crate::components::mock::{ErrorConfig, ErrorScenario, MockCameraSpec, MockSdk, SdkCall};
    use crate::components::sdk::{ImageType, SvbSdk};
    use crate::error::SdkError;

    fn manager_with(errors: ErrorConfig) -> (Arc<MockSdk>, GeometryManager, StateCell) {
        let sdk = Arc::new(
            MockSdk::builder()
                .camera(MockCameraSpec::sv305())
                .error_config(errors)
                .build(),
        );
        sdk.open(0).unwrap();
        sdk.start_capture(0).unwrap();
        let state = StateCell::new(tokio::sync::broadcast::channel(8).0);
        let camera = SvbCamera::new(sdk.clone(), 0);
        let manager = GeometryManager::new(camera, 1920, 1080, false, state.clone());
        (sdk, manager, state)
    }

    fn manager() -> (Arc<MockSdk>, GeometryManager, StateCell) {
        manager_with(ErrorConfig::none())
    }

    #[test]
    fn subframe_acceptance_rule() {
        let s = GeometryState::full_frame(1920, 1080);
        assert!(s.check_subframe(0, 0, 1920, 1080).is_ok());
        assert!(s.check_subframe(8, 2, 1912, 1078).is_ok());
        assert!(s.check_subframe(8, 0, 1920, 1080).is_err());
        assert!(s.check_subframe(0, 0, 100, 100).is_err());
        assert!(s.check_subframe(0, 0, 104, 101).is_err());
        assert!(s.check_subframe(u32::MAX, 0, 8, 2).is_err());
    }

    #[test]
    fn update_frame_runs_stop_roi_start() {
        let (sdk, mgr, _) = manager();
        sdk.clear_calls();
        mgr.update_frame(16, 8, 640, 480).unwrap();
        assert_eq!(
            sdk.calls(),
            vec![
                SdkCall::StopCapture,
                SdkCall::SetRoi {
                    x: 16,
                    y: 8,
                    width: 640,
                    height: 480,
                    bin: 1
                },
                SdkCall::StartCapture,
            ]
        );
        let s = mgr.state();
        assert_eq!((s.x, s.y, s.width, s.height), (16, 8, 640, 480));
        assert_eq!(mgr.buffer().lock().len(), 640 * 480 * 2);
    }

    #[test]
    fn rejected_subframe_leaves_state_and_device_alone() {
        let (sdk, mgr, _) = manager();
        sdk.clear_calls();
        let before = mgr.state();
        let err = mgr.update_frame(0, 0, 1921, 1080).unwrap_err();
        assert!(matches!(err, CameraError::InvalidSubframe(_)));
        assert_eq!(mgr.state(), before);
        assert!(sdk.calls().is_empty());
    }

    #[test]
    fn sdk_failure_leaves_offsets() {
        let (_sdk, mgr, _) = manager_with(ErrorConfig::scenario(ErrorScenario::Always {
            operation: "SVBSetROIFormat",
            error: SdkError::GeneralError,
        }));
        let before = mgr.state();
        assert!(mgr.update_frame(8, 8, 64, 64).is_err());
        assert_eq!(mgr.state(), before);
    }

    #[test]
    fn binning_reapplies_subframe() {
        let (sdk, mgr, _) = manager();
        mgr.update_frame(0, 0, 640, 480).unwrap();
        sdk.clear_calls();
        mgr.update_binning(2).unwrap();
        assert!(sdk.calls().contains(&SdkCall::SetRoi {
            x: 0,
            y: 0,
            width: 640,
            height: 480,
            bin: 1
        }));
        let s = mgr.state();
        assert_eq!(s.bin, 2);
        assert_eq!(s.binned_size(), (320, 240));
        // buffer stays pre-binning
        assert_eq!(mgr.buffer().lock().len(), 640 * 480 * 2);
    }

    #[test]
    fn format_switch_resizes_buffer() {
        let (sdk, mgr, _) = manager();
        assert_eq!(mgr.set_format(FrameFormat::Raw8).unwrap(), SwitchOutcome::Changed);
        assert_eq!(sdk.image_type_of(0), Some(ImageType::Raw8));
        assert_eq!(mgr.state().bit_depth, 8);
        assert_eq!(mgr.buffer().lock().len(), 1920 * 1080);
        assert_eq!(mgr.set_format(FrameFormat::Raw8).unwrap(), SwitchOutcome::Unchanged);
    }

    #[test]
    fn changes_refused_while_busy() {
        let (sdk, mgr, state) = manager();
        state.set(AcquisitionState::StreamingActive);
        sdk.clear_calls();
        assert!(matches!(
            mgr.update_frame(0, 0, 640, 480),
            Err(CameraError::Busy(_))
        ));
        assert!(matches!(mgr.update_binning(2), Err(CameraError::Busy(_))));
        assert!(matches!(
            mgr.set_format(FrameFormat::Raw8),
            Err(CameraError::Busy(_))
        ));
        assert!(sdk.calls().is_empty());
        // stretch is post-processing only
        assert_eq!(mgr.set_stretch(BitStretch::X4), SwitchOutcome::Changed);
    }
}
