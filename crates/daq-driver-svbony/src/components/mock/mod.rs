//! Simulated SVBONY SDK
//!
//! In-memory [`SvbSdk`] used by the default `mock` feature, the unit tests and
//! the integration tests. It models the parts of the camera the driver relies
//! on:
//!
//! - open/close and capture start/stop state
//! - soft-trigger versus free-running (normal) mode frame delivery
//! - ROI bounds and alignment checks, output image type, control values
//! - a thermoelectric cooler with exponential temperature drift
//!
//! Every call is recorded as an [`SdkCall`] so tests can assert exact SDK
//! sequences. Faults are injected through [`ErrorConfig`].

pub mod errors;
pub mod rng;
pub mod timing;

pub use errors::{ErrorConfig, ErrorScenario};
pub use rng::MockRng;
pub use timing::{MockMode, TemperatureSimulation, TimingConfig};

use crate::components::sdk::{
    BayerPattern, CameraInfo, CameraMode, CameraProperty, ControlCaps, ControlType,
    GuideDirection, ImageType, SdkResult, SvbSdk,
};
use crate::error::SdkError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

// =============================================================================
// Camera specs
// =============================================================================

/// Static description of one simulated camera.
#[derive(Debug, Clone)]
pub struct MockCameraSpec {
    pub info: CameraInfo,
    pub property: CameraProperty,
    pub pixel_size: f32,
    pub controls: Vec<ControlCaps>,
}

fn caps(raw: ControlType, min: i64, max: i64, default: i64) -> ControlCaps {
    ControlCaps {
        name: raw.as_str().trim_start_matches("SVB_").to_string(),
        description: String::new(),
        min_value: min,
        max_value: max,
        default_value: default,
        auto_supported: false,
        writable: !matches!(
            raw,
            ControlType::CurrentTemperature | ControlType::CoolerPower
        ),
        raw_type: raw.to_svb(),
    }
}

impl MockCameraSpec {
    /// Generic model with the standard control set.
    pub fn model(friendly_name: &str, width: u32, height: u32, is_color: bool) -> Self {
        let mut controls = vec![
            caps(ControlType::Gain, 0, 720, 10),
            caps(ControlType::Exposure, 1_000, 1_000_000_000, 1_000_000),
            caps(ControlType::Gamma, 0, 1000, 100),
            caps(ControlType::Flip, 0, 3, 0),
            caps(ControlType::FrameSpeedMode, 0, 2, 1),
            caps(ControlType::Contrast, 0, 100, 50),
            caps(ControlType::Sharpness, 0, 100, 0),
            caps(ControlType::BlackLevel, 0, 255, 10),
        ];
        if is_color {
            controls.extend([
                caps(ControlType::WbR, 0, 255, 128),
                caps(ControlType::WbG, 0, 255, 128),
                caps(ControlType::WbB, 0, 255, 128),
                caps(ControlType::Saturation, 0, 255, 128),
            ]);
        }
        let formats = if is_color {
            vec![ImageType::Raw8, ImageType::Raw16, ImageType::Rgb24]
        } else {
            vec![ImageType::Raw8, ImageType::Raw16, ImageType::Y8, ImageType::Y16]
        };
        Self {
            info: CameraInfo {
                friendly_name: friendly_name.to_string(),
                serial_number: "0000000000000000".to_string(),
                port_type: "USB3.0".to_string(),
                device_id: 0x1234,
                camera_id: 0,
            },
            property: CameraProperty {
                max_width: width,
                max_height: height,
                is_color,
                bayer_pattern: BayerPattern::Gr,
                supported_bins: vec![1, 2, 3, 4],
                supported_formats: formats,
                max_bit_depth: 12,
                is_trigger_cam: false,
            },
            pixel_size: 2.9,
            controls,
        }
    }

    pub fn sv305() -> Self {
        Self::model("SVBONY SV305", 1920, 1080, true)
    }

    pub fn sv305_pro() -> Self {
        Self::model("SVBONY SV305PRO", 1920, 1080, true)
    }

    pub fn sv305m_pro() -> Self {
        Self::model("SVBONY SV305M PRO", 1920, 1080, false)
    }

    pub fn sv905c() -> Self {
        let mut spec = Self::model("SVBONY SV905C", 1280, 960, true);
        spec.pixel_size = 3.75;
        spec
    }

    pub fn sv405cc() -> Self {
        let mut spec = Self::model("SVBONY SV405CC", 4144, 2822, true);
        spec.pixel_size = 4.63;
        spec.property.bayer_pattern = BayerPattern::Rg;
        spec.property.max_bit_depth = 14;
        spec.controls.extend([
            caps(ControlType::CoolerEnable, 0, 1, 0),
            caps(ControlType::TargetTemperature, -350, 300, 0),
            caps(ControlType::CurrentTemperature, -500, 500, 250),
            caps(ControlType::CoolerPower, 0, 100, 0),
        ]);
        spec
    }

    pub fn with_camera_id(mut self, camera_id: i32) -> Self {
        self.info.camera_id = camera_id;
        self
    }

    pub fn with_friendly_name(mut self, name: &str) -> Self {
        self.info.friendly_name = name.to_string();
        self
    }

    /// Override the exposure control range, in microseconds.
    pub fn with_exposure_range(mut self, min_us: i64, max_us: i64) -> Self {
        for c in self.controls.iter_mut() {
            if c.control_type() == Some(ControlType::Exposure) {
                c.min_value = min_us;
                c.max_value = max_us;
            }
        }
        self
    }

    pub fn with_extra_control(mut self, caps: ControlCaps) -> Self {
        self.controls.push(caps);
        self
    }
}

// =============================================================================
// Call recording
// =============================================================================

/// State-changing SDK calls, in the order they were issued.
#[derive(Debug, Clone, PartialEq)]
pub enum SdkCall {
    Open,
    Close,
    SetAutoSave(bool),
    SetControl(ControlType, i64),
    SetImageType(ImageType),
    SetRoi {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        bin: u32,
    },
    SetMode(CameraMode),
    StartCapture,
    StopCapture,
    SoftTrigger,
    GetFrame { timeout_ms: u32 },
    PulseGuide(GuideDirection, u32),
}

// =============================================================================
// Per-camera state
// =============================================================================

#[derive(Debug)]
struct MockCameraState {
    spec: MockCameraSpec,
    open: bool,
    capturing: bool,
    mode: CameraMode,
    roi: (u32, u32, u32, u32, u32),
    image_type: ImageType,
    controls: HashMap<ControlType, i64>,
    pending_triggers: u32,
    triggered_at: Option<Instant>,
    frame_number: u64,
    temperature: TemperatureSimulation,
    last_temperature_update: Instant,
    auto_save: bool,
}

impl MockCameraState {
    fn new(spec: MockCameraSpec, ambient: f64, drift_rate: f64) -> Self {
        let controls = spec
            .controls
            .iter()
            .filter_map(|c| c.control_type().map(|t| (t, c.default_value)))
            .collect();
        let (w, h) = (spec.property.max_width, spec.property.max_height);
        let image_type = if spec.property.is_color {
            ImageType::Raw8
        } else {
            ImageType::Y8
        };
        Self {
            spec,
            open: false,
            capturing: false,
            mode: CameraMode::Normal,
            roi: (0, 0, w, h, 1),
            image_type,
            controls,
            pending_triggers: 0,
            triggered_at: None,
            frame_number: 0,
            temperature: TemperatureSimulation::new(ambient, drift_rate),
            last_temperature_update: Instant::now(),
            auto_save: true,
        }
    }

    fn has_cooler(&self) -> bool {
        self.controls.contains_key(&ControlType::CoolerEnable)
    }

    fn cooling_target(&self) -> Option<f64> {
        let enabled = self.controls.get(&ControlType::CoolerEnable).copied() == Some(1);
        if !enabled {
            return None;
        }
        self.controls
            .get(&ControlType::TargetTemperature)
            .map(|raw| *raw as f64 / 10.0)
    }

    fn advance_temperature(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_temperature_update).as_secs_f64();
        self.last_temperature_update = now;
        let target = self.cooling_target();
        self.temperature.update(dt, target);
    }

    fn frame_bytes(&self) -> usize {
        let (_, _, w, h, bin) = self.roi;
        let bin = bin.max(1);
        (w / bin) as usize * (h / bin) as usize * self.image_type.bytes_per_pixel()
    }

    fn exposure(&self) -> Duration {
        let us = self
            .controls
            .get(&ControlType::Exposure)
            .copied()
            .unwrap_or(0)
            .max(0);
        Duration::from_micros(us as u64)
    }

    /// Gradient pattern shifted by the frame number.
    fn fill(&mut self, buffer: &mut [u8], rng: &MockRng, noise: u16) {
        let (_, _, w, h, bin) = self.roi;
        let bin = bin.max(1);
        let (w, h) = (w / bin, h / bin);
        let frame_num = self.frame_number;
        self.frame_number += 1;
        let bpp = self.image_type.bytes_per_pixel();
        for y in 0..h {
            for x in 0..w {
                let base = ((x as u64 + y as u64 + frame_num) % 4096) as u16;
                let value = base.saturating_add(100).saturating_add(rng.noise(noise));
                let idx = (y * w + x) as usize * bpp;
                match bpp {
                    1 => buffer[idx] = (value & 0xFF) as u8,
                    _ => {
                        let bytes = value.to_le_bytes();
                        buffer[idx] = bytes[0];
                        buffer[idx + 1] = bytes[1];
                        for b in buffer[idx + 2..idx + bpp].iter_mut() {
                            *b = 0;
                        }
                    }
                }
            }
        }
    }
}

enum Readiness {
    Ready,
    Wait(Duration),
    NotAvailable(Duration),
}

// =============================================================================
// Builder
// =============================================================================

pub struct MockSdkBuilder {
    cameras: Vec<MockCameraSpec>,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    seed: Option<u64>,
    ambient_temperature: f64,
    temperature_drift_rate: f64,
    noise: u16,
    sdk_version: String,
}

impl MockSdkBuilder {
    pub fn new() -> Self {
        Self {
            cameras: Vec::new(),
            mode: MockMode::Instant,
            timing: TimingConfig::default(),
            error_config: ErrorConfig::none(),
            seed: None,
            ambient_temperature: 25.0,
            temperature_drift_rate: 0.1,
            noise: 0,
            sdk_version: "1.11.4".to_string(),
        }
    }

    /// Add a camera. Ids are assigned in insertion order unless the camera sets one.
    pub fn camera(mut self, spec: MockCameraSpec) -> Self {
        self.cameras.push(spec);
        self
    }

    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn timing_config(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn ambient_temperature(mut self, celsius: f64) -> Self {
        self.ambient_temperature = celsius;
        self
    }

    pub fn temperature_drift_rate(mut self, per_second: f64) -> Self {
        self.temperature_drift_rate = per_second;
        self
    }

    pub fn pixel_noise(mut self, amplitude: u16) -> Self {
        self.noise = amplitude;
        self
    }

    pub fn build(self) -> MockSdk {
        let cameras = self
            .cameras
            .into_iter()
            .enumerate()
            .map(|(i, mut spec)| {
                if spec.info.camera_id == 0 && i > 0 {
                    spec.info.camera_id = i as i32;
                }
                MockCameraState::new(spec, self.ambient_temperature, self.temperature_drift_rate)
            })
            .collect();
        MockSdk {
            cameras: Mutex::new(cameras),
            mode: self.mode,
            timing: self.timing,
            errors: self.error_config,
            rng: MockRng::new(self.seed),
            noise: self.noise,
            calls: Mutex::new(Vec::new()),
            frames_in_flight: AtomicU32::new(0),
            violations: AtomicU32::new(0),
            hold_frames: AtomicBool::new(false),
            frames_delivered: AtomicU64::new(0),
            sdk_version: self.sdk_version,
        }
    }
}

impl Default for MockSdkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// MockSdk
// =============================================================================

pub struct MockSdk {
    cameras: Mutex<Vec<MockCameraState>>,
    mode: MockMode,
    timing: TimingConfig,
    errors: ErrorConfig,
    rng: MockRng,
    noise: u16,
    calls: Mutex<Vec<SdkCall>>,
    frames_in_flight: AtomicU32,
    violations: AtomicU32,
    hold_frames: AtomicBool,
    frames_delivered: AtomicU64,
    sdk_version: String,
}

impl MockSdk {
    pub fn builder() -> MockSdkBuilder {
        MockSdkBuilder::new()
    }

    /// One SV305 in Instant mode.
    pub fn new() -> Self {
        Self::builder().camera(MockCameraSpec::sv305()).build()
    }

    fn record(&self, call: SdkCall) {
        self.calls.lock().push(call);
    }

    fn with_camera<T>(
        &self,
        camera_id: i32,
        f: impl FnOnce(&mut MockCameraState) -> SdkResult<T>,
    ) -> SdkResult<T> {
        let mut cameras = self.cameras.lock();
        let cam = cameras
            .iter_mut()
            .find(|c| c.spec.info.camera_id == camera_id)
            .ok_or(SdkError::InvalidId)?;
        f(cam)
    }

    fn with_open_camera<T>(
        &self,
        camera_id: i32,
        f: impl FnOnce(&mut MockCameraState) -> SdkResult<T>,
    ) -> SdkResult<T> {
        self.with_camera(camera_id, |cam| {
            if !cam.open {
                return Err(SdkError::CameraClosed);
            }
            f(cam)
        })
    }

    /// Geometry and mode changes must never overlap a frame transfer.
    fn note_reconfiguration(&self) {
        if self.frames_in_flight.load(Ordering::SeqCst) > 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn timeout_sleep(&self, timeout_ms: u32) -> Duration {
        match self.mode {
            MockMode::Instant => {
                Duration::from_millis((timeout_ms as u64).min(self.timing.instant_timeout_ms))
            }
            MockMode::Realistic => Duration::from_millis(timeout_ms as u64),
        }
    }

    fn readiness(&self, cam: &MockCameraState, timeout_ms: u32) -> Readiness {
        let timeout = Duration::from_millis(timeout_ms as u64);
        if self.hold_frames.load(Ordering::SeqCst) {
            return Readiness::NotAvailable(self.timeout_sleep(timeout_ms));
        }
        let readout = Duration::from_millis(self.timing.frame_readout_ms);
        match cam.mode {
            CameraMode::Normal => match self.mode {
                MockMode::Instant => Readiness::Wait(Duration::from_millis(
                    self.timing.instant_frame_interval_ms,
                )),
                MockMode::Realistic => {
                    let needed = cam.exposure() + readout;
                    if needed <= timeout {
                        Readiness::Wait(needed)
                    } else {
                        Readiness::NotAvailable(timeout)
                    }
                }
            },
            _ => {
                if cam.pending_triggers == 0 {
                    return Readiness::NotAvailable(self.timeout_sleep(timeout_ms));
                }
                match (self.mode, cam.triggered_at) {
                    (MockMode::Realistic, Some(at)) => {
                        let due = at + cam.exposure() + readout;
                        let now = Instant::now();
                        if due <= now {
                            Readiness::Ready
                        } else if due - now <= timeout {
                            Readiness::Wait(due - now)
                        } else {
                            Readiness::NotAvailable(timeout)
                        }
                    }
                    _ => Readiness::Ready,
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Test inspection helpers
    // -------------------------------------------------------------------------

    pub fn calls(&self) -> Vec<SdkCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn count_calls(&self, pred: impl Fn(&SdkCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn error_config(&self) -> &ErrorConfig {
        &self.errors
    }

    /// While held, every `get_frame` times out.
    pub fn hold_frames(&self, hold: bool) {
        self.hold_frames.store(hold, Ordering::SeqCst);
    }

    /// Reconfiguration calls observed while a frame transfer was in flight.
    pub fn concurrency_violations(&self) -> u32 {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::SeqCst)
    }

    pub fn stored_control(&self, camera_id: i32, control: ControlType) -> Option<i64> {
        self.with_camera(camera_id, |c| Ok(c.controls.get(&control).copied()))
            .ok()
            .flatten()
    }

    pub fn mode_of(&self, camera_id: i32) -> Option<CameraMode> {
        self.with_camera(camera_id, |c| Ok(c.mode)).ok()
    }

    pub fn roi_of(&self, camera_id: i32) -> Option<(u32, u32, u32, u32, u32)> {
        self.with_camera(camera_id, |c| Ok(c.roi)).ok()
    }

    pub fn image_type_of(&self, camera_id: i32) -> Option<ImageType> {
        self.with_camera(camera_id, |c| Ok(c.image_type)).ok()
    }

    pub fn is_open(&self, camera_id: i32) -> bool {
        self.with_camera(camera_id, |c| Ok(c.open)).unwrap_or(false)
    }

    pub fn is_capturing(&self, camera_id: i32) -> bool {
        self.with_camera(camera_id, |c| Ok(c.capturing))
            .unwrap_or(false)
    }

    pub fn auto_save_of(&self, camera_id: i32) -> Option<bool> {
        self.with_camera(camera_id, |c| Ok(c.auto_save)).ok()
    }

    /// Force the sensor temperature reading.
    pub fn set_sensor_temperature(&self, camera_id: i32, celsius: f64) {
        let _ = self.with_camera(camera_id, |c| {
            c.last_temperature_update = Instant::now();
            c.temperature.set_current(celsius);
            Ok(())
        });
    }

    /// Plug in another camera after construction (hot-plug style rescans).
    pub fn attach_camera(&self, spec: MockCameraSpec, ambient: f64) {
        self.cameras
            .lock()
            .push(MockCameraState::new(spec, ambient, 0.0));
    }
}

impl Default for MockSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl SvbSdk for MockSdk {
    fn connected_cameras(&self) -> Vec<CameraInfo> {
        self.cameras
            .lock()
            .iter()
            .map(|c| c.spec.info.clone())
            .collect()
    }

    fn sdk_version(&self) -> String {
        self.sdk_version.clone()
    }

    fn open(&self, camera_id: i32) -> SdkResult<()> {
        self.record(SdkCall::Open);
        self.errors.check_operation("SVBOpenCamera")?;
        self.with_camera(camera_id, |c| {
            c.open = true;
            Ok(())
        })
    }

    fn close(&self, camera_id: i32) -> SdkResult<()> {
        self.record(SdkCall::Close);
        self.errors.check_operation("SVBCloseCamera")?;
        self.with_camera(camera_id, |c| {
            c.open = false;
            c.capturing = false;
            Ok(())
        })
    }

    fn camera_property(&self, camera_id: i32) -> SdkResult<CameraProperty> {
        self.errors.check_operation("SVBGetCameraProperty")?;
        self.with_open_camera(camera_id, |c| Ok(c.spec.property.clone()))
    }

    fn pixel_size(&self, camera_id: i32) -> SdkResult<f32> {
        self.errors.check_operation("SVBGetSensorPixelSize")?;
        self.with_open_camera(camera_id, |c| Ok(c.spec.pixel_size))
    }

    fn num_controls(&self, camera_id: i32) -> SdkResult<usize> {
        self.errors.check_operation("SVBGetNumOfControls")?;
        self.with_open_camera(camera_id, |c| Ok(c.spec.controls.len()))
    }

    fn control_caps(&self, camera_id: i32, index: usize) -> SdkResult<ControlCaps> {
        self.errors.check_operation("SVBGetControlCaps")?;
        self.with_open_camera(camera_id, |c| {
            c.spec
                .controls
                .get(index)
                .cloned()
                .ok_or(SdkError::InvalidIndex)
        })
    }

    fn set_control_value(
        &self,
        camera_id: i32,
        control: ControlType,
        value: i64,
        _auto: bool,
    ) -> SdkResult<()> {
        self.record(SdkCall::SetControl(control, value));
        self.errors.check_operation("SVBSetControlValue")?;
        self.with_open_camera(camera_id, |c| {
            if matches!(
                control,
                ControlType::CurrentTemperature | ControlType::CoolerPower
            ) {
                return Err(SdkError::InvalidControlType);
            }
            let known = c
                .spec
                .controls
                .iter()
                .any(|caps| caps.control_type() == Some(control));
            if !known {
                return Err(SdkError::InvalidControlType);
            }
            if matches!(
                control,
                ControlType::CoolerEnable | ControlType::TargetTemperature
            ) {
                c.advance_temperature();
            }
            c.controls.insert(control, value);
            Ok(())
        })
    }

    fn control_value(&self, camera_id: i32, control: ControlType) -> SdkResult<(i64, bool)> {
        self.errors.check_operation("SVBGetControlValue")?;
        self.with_open_camera(camera_id, |c| match control {
            ControlType::CurrentTemperature if c.has_cooler() => {
                c.advance_temperature();
                Ok(((c.temperature.current() * 10.0).round() as i64, false))
            }
            ControlType::CoolerPower if c.has_cooler() => {
                c.advance_temperature();
                let target = c.cooling_target();
                Ok((c.temperature.cooler_power(target).round() as i64, false))
            }
            _ => c
                .controls
                .get(&control)
                .map(|v| (*v, false))
                .ok_or(SdkError::InvalidControlType),
        })
    }

    fn set_output_image_type(&self, camera_id: i32, image_type: ImageType) -> SdkResult<()> {
        self.record(SdkCall::SetImageType(image_type));
        self.note_reconfiguration();
        self.errors.check_operation("SVBSetOutputImageType")?;
        self.with_open_camera(camera_id, |c| {
            if !c.spec.property.supported_formats.contains(&image_type) {
                return Err(SdkError::InvalidImageType);
            }
            c.image_type = image_type;
            Ok(())
        })
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
        self.record(SdkCall::SetRoi {
            x,
            y,
            width,
            height,
            bin,
        });
        self.note_reconfiguration();
        self.errors.check_operation("SVBSetROIFormat")?;
        self.with_open_camera(camera_id, |c| {
            let p = &c.spec.property;
            if x + width > p.max_width || y + height > p.max_height {
                return Err(SdkError::OutOfBoundary);
            }
            if width == 0 || height == 0 || width % 8 != 0 || height % 2 != 0 {
                return Err(SdkError::InvalidSize);
            }
            if !p.supported_bins.contains(&bin) {
                return Err(SdkError::InvalidSize);
            }
            c.roi = (x, y, width, height, bin);
            Ok(())
        })
    }

    fn set_mode(&self, camera_id: i32, mode: CameraMode) -> SdkResult<()> {
        self.record(SdkCall::SetMode(mode));
        self.note_reconfiguration();
        self.errors.check_operation("SVBSetCameraMode")?;
        self.with_open_camera(camera_id, |c| {
            c.mode = mode;
            c.pending_triggers = 0;
            c.triggered_at = None;
            Ok(())
        })
    }

    fn start_capture(&self, camera_id: i32) -> SdkResult<()> {
        self.record(SdkCall::StartCapture);
        self.note_reconfiguration();
        self.errors.check_operation("SVBStartVideoCapture")?;
        self.with_open_camera(camera_id, |c| {
            c.capturing = true;
            Ok(())
        })
    }

    fn stop_capture(&self, camera_id: i32) -> SdkResult<()> {
        self.record(SdkCall::StopCapture);
        self.note_reconfiguration();
        self.errors.check_operation("SVBStopVideoCapture")?;
        self.with_open_camera(camera_id, |c| {
            c.capturing = false;
            c.pending_triggers = 0;
            c.triggered_at = None;
            Ok(())
        })
    }

    fn send_soft_trigger(&self, camera_id: i32) -> SdkResult<()> {
        self.record(SdkCall::SoftTrigger);
        self.errors.check_operation("SVBSendSoftTrigger")?;
        self.with_open_camera(camera_id, |c| {
            if !c.capturing || c.mode != CameraMode::SoftTrigger {
                return Err(SdkError::InvalidMode);
            }
            c.pending_triggers += 1;
            c.triggered_at = Some(Instant::now());
            Ok(())
        })
    }

    fn get_frame(&self, camera_id: i32, buffer: &mut [u8], timeout_ms: u32) -> SdkResult<()> {
        self.record(SdkCall::GetFrame { timeout_ms });
        self.errors.check_operation("SVBGetVideoData")?;

        let readiness = self.with_open_camera(camera_id, |c| {
            if !c.capturing {
                return Err(SdkError::InvalidSequence);
            }
            if buffer.len() < c.frame_bytes() {
                return Err(SdkError::BufferTooSmall);
            }
            Ok(self.readiness(c, timeout_ms))
        })?;

        self.frames_in_flight.fetch_add(1, Ordering::SeqCst);
        let result = match readiness {
            Readiness::NotAvailable(wait) => {
                std::thread::sleep(wait);
                Err(SdkError::Timeout)
            }
            Readiness::Wait(wait) => {
                std::thread::sleep(wait);
                Ok(())
            }
            Readiness::Ready => Ok(()),
        };
        let result = result.and_then(|_| {
            self.with_open_camera(camera_id, |c| {
                if !c.capturing {
                    return Err(SdkError::InvalidSequence);
                }
                if buffer.len() < c.frame_bytes() {
                    return Err(SdkError::BufferTooSmall);
                }
                if c.mode != CameraMode::Normal {
                    c.pending_triggers = c.pending_triggers.saturating_sub(1);
                }
                c.fill(buffer, &self.rng, self.noise);
                Ok(())
            })
        });
        self.frames_in_flight.fetch_sub(1, Ordering::SeqCst);
        if result.is_ok() {
            self.frames_delivered.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    fn pulse_guide(
        &self,
        camera_id: i32,
        direction: GuideDirection,
        duration_ms: u32,
    ) -> SdkResult<()> {
        self.record(SdkCall::PulseGuide(direction, duration_ms));
        self.errors.check_operation("SVBPulseGuide")?;
        self.with_open_camera(camera_id, |_| Ok(()))
    }

    fn set_auto_save(&self, camera_id: i32, enabled: bool) -> SdkResult<()> {
        self.record(SdkCall::SetAutoSave(enabled));
        self.errors.check_operation("SVBSetAutoSaveParam")?;
        self.with_open_camera(camera_id, |c| {
            c.auto_save = enabled;
            Ok(())
        })
    }
}
