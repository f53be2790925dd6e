//! Connect/disconnect sequencing, per-model quirks and device naming.
//!
//! Connecting is split in two halves around control discovery:
//! [`open_and_describe`] opens the camera and reads its static description, then
//! [`prepare_capture`] selects full frame, soft-trigger mode and starts
//! capture once the control registry and geometry exist. Any failure in
//! either half aborts the connection.

use crate::components::controls::{ControlRegistry, FrameFormat, FrameSpeed};
use crate::components::geometry::GeometryManager;
use crate::components::sdk::{
    BayerPattern, CameraInfo, CameraMode, CameraProperty, ControlType, GuideDirection, SvbCamera,
    SvbSdk,
};
use crate::config::ConnectSettings;
use crate::error::CameraError;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

pub const VENDOR_PREFIX: &str = "SVBONY ";

// =============================================================================
// Model quirks
// =============================================================================

/// Capability flags derived from the camera's friendly name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelQuirks {
    pub model: String,
    pub has_bayer: bool,
    pub has_st4: bool,
    pub has_cooler: bool,
    /// Only luma (Y8/Y16) output types are accepted
    pub mono_only: bool,
    pub bayer_pattern: BayerPattern,
}

impl ModelQuirks {
    pub fn detect(friendly_name: &str, property: &CameraProperty) -> Self {
        let model = friendly_name
            .strip_prefix(VENDOR_PREFIX)
            .unwrap_or(friendly_name)
            .trim()
            .to_string();

        let (has_bayer, has_st4, has_cooler, mono_only) = match model.as_str() {
            "SV305" => (true, false, false, false),
            "SV305PRO" => (true, true, false, false),
            "SV305M PRO" => (false, true, false, true),
            "SV905C" => (true, true, false, false),
            "SV405CC" => (true, false, true, false),
            _ => {
                tracing::warn!(model = %model, "Unknown camera model, using generic capabilities");
                (property.is_color, false, false, false)
            }
        };

        Self {
            model,
            has_bayer,
            has_st4,
            has_cooler,
            mono_only,
            bayer_pattern: property.bayer_pattern,
        }
    }

    pub fn is_mono(&self) -> bool {
        !self.has_bayer
    }
}

// =============================================================================
// Enumeration
// =============================================================================

/// Device name for a friendly name, carrying the vendor prefix exactly once.
pub fn device_base_name(friendly_name: &str) -> String {
    if friendly_name.starts_with(VENDOR_PREFIX) {
        friendly_name.to_string()
    } else {
        format!("{}{}", VENDOR_PREFIX, friendly_name)
    }
}

/// Hands out device names, suffixing " 1", " 2", ... on collision.
#[derive(Debug, Default)]
pub struct UniqueNamer {
    used: HashSet<String>,
}

impl UniqueNamer {
    pub fn new<I, S>(existing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            used: existing.into_iter().map(Into::into).collect(),
        }
    }

    pub fn make(&mut self, friendly_name: &str) -> String {
        let base = device_base_name(friendly_name);
        let mut name = base.clone();
        let mut index = 0;
        while self.used.contains(&name) {
            index += 1;
            name = format!("{} {}", base, index);
        }
        self.used.insert(name.clone());
        name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub info: CameraInfo,
}

/// Tracks names across rescans. A camera id seen before keeps its name;
/// ids that disappeared are forgotten.
#[derive(Debug, Default)]
pub struct CameraEnumerator {
    known: BTreeMap<i32, String>,
}

impl CameraEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rescan(&mut self, sdk: &dyn SvbSdk) -> Vec<DeviceDescriptor> {
        let previous = std::mem::take(&mut self.known);
        let mut namer = UniqueNamer::new(previous.values().cloned());
        let mut devices = Vec::new();

        for info in sdk.connected_cameras() {
            let name = match previous.get(&info.camera_id) {
                Some(name) => name.clone(),
                None => {
                    let name = namer.make(&info.friendly_name);
                    tracing::info!(camera_id = info.camera_id, name = %name, "Found camera");
                    name
                }
            };
            self.known.insert(info.camera_id, name.clone());
            devices.push(DeviceDescriptor { name, info });
        }
        devices
    }
}

// =============================================================================
// Connect / disconnect
// =============================================================================

/// Static description read at connect time.
#[derive(Debug, Clone)]
pub struct CameraDescription {
    pub property: CameraProperty,
    pub pixel_size_um: f32,
    pub control_count: usize,
    pub quirks: ModelQuirks,
}

/// Open the camera and read what it is. Leaves the camera open on success
/// and closed on failure.
pub fn open_and_describe(
    camera: &SvbCamera,
    info: &CameraInfo,
    settings: &ConnectSettings,
) -> Result<CameraDescription, CameraError> {
    tracing::info!(camera = %info.friendly_name, "Attempting to open camera");
    camera.open().map_err(|e| {
        tracing::error!(error = %e, "Error connecting to the camera");
        e
    })?;

    let described = describe(camera, info, settings);
    if described.is_err() {
        if let Err(e) = camera.close() {
            tracing::warn!(error = %e, "Closing camera after failed connect");
        }
    }
    described
}

fn describe(
    camera: &SvbCamera,
    info: &CameraInfo,
    settings: &ConnectSettings,
) -> Result<CameraDescription, CameraError> {
    std::thread::sleep(Duration::from_millis(settings.settle_ms));

    let property = camera.property()?;
    let pixel_size_um = camera.pixel_size()?;
    let control_count = camera.num_controls()?;

    if let Err(e) = camera.set_auto_save(false) {
        tracing::error!(error = %e, "Set autosave param failed");
    }

    // Works around a gain error in the SDK
    if let Err(e) = camera.set_control(ControlType::Exposure, settings.prime_exposure_us) {
        tracing::warn!(error = %e, "Priming exposure failed");
    }

    let quirks = ModelQuirks::detect(&info.friendly_name, &property);
    tracing::info!(
        model = %quirks.model,
        width = property.max_width,
        height = property.max_height,
        pixel_size_um,
        control_count,
        bayer = quirks.has_bayer,
        st4 = quirks.has_st4,
        cooler = quirks.has_cooler,
        "Camera properties"
    );

    Ok(CameraDescription {
        property,
        pixel_size_um,
        control_count,
        quirks,
    })
}

/// Second half of connect: frame speed, format, full frame, soft-trigger
/// mode, start capture.
pub fn prepare_capture(
    camera: &SvbCamera,
    registry: &ControlRegistry,
    geometry: &GeometryManager,
) -> Result<(), CameraError> {
    registry.init_frame_speed(camera, FrameSpeed::Normal)?;
    geometry.init_format(FrameFormat::Raw16)?;
    geometry.init_full_frame()?;

    camera.set_mode(CameraMode::SoftTrigger).map_err(|e| {
        tracing::error!(error = %e, "Camera soft trigger mode failed");
        e
    })?;
    tracing::info!("Camera soft trigger mode");

    camera.start_capture().map_err(|e| {
        tracing::error!(error = %e, "Start camera failed");
        e
    })?;
    tracing::info!("Camera is online");
    Ok(())
}

/// Stop capture and close. Failures are logged; the camera is closed
/// regardless.
pub fn shutdown(camera: &SvbCamera) {
    if let Err(e) = camera.stop_capture() {
        tracing::warn!(error = %e, "Stop capture on disconnect failed");
    }
    if let Err(e) = camera.close() {
        tracing::warn!(error = %e, "Close camera failed");
    }
}

// =============================================================================
// Guiding
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideOutcome {
    Ok,
    Alert,
}

pub fn pulse_guide(
    camera: &SvbCamera,
    quirks: &ModelQuirks,
    direction: GuideDirection,
    duration_ms: u32,
) -> GuideOutcome {
    if !quirks.has_st4 {
        tracing::warn!(model = %quirks.model, "Camera has no ST4 port");
        return GuideOutcome::Alert;
    }
    match camera.pulse_guide(direction, duration_ms) {
        Ok(()) => {
            tracing::debug!(direction = direction.as_str(), duration_ms, "Guide pulse");
            GuideOutcome::Ok
        }
        Err(e) => {
            tracing::error!(direction = direction.as_str(), error = %e, "Guide pulse failed");
            GuideOutcome::Alert
        }
    }
}
