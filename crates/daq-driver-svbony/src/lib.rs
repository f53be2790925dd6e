//! SVBONY Astronomy Camera Driver
//!
//! One [`SvbonyDriver`] per physical camera. The driver is composed of
//! components:
//! - Lifecycle: connect/disconnect sequencing and model quirks
//! - Controls: gain, offset, white balance and the other number controls
//! - Geometry: sub-frame, binning, output format, bit stretch
//! - Acquisition: single exposures and streaming on background workers
//! - Temperature: cooler regulation on cooled models
//!
//! The vendor SDK sits behind the [`SvbSdk`] trait. The `mock` feature
//! (default) provides a simulated SDK; `svb_sdk` links the real library.
//!
//! ```rust,ignore
//! let sdk = Arc::new(MockSdk::new());
//! let driver = SvbonyDriver::discover(sdk, DriverSettings::default()).remove(0);
//! driver.connect().await?;
//! let mut events = driver.subscribe();
//! driver.start_exposure(2.0).await?;
//! ```

pub mod capabilities;
pub mod components;
pub mod config;
pub mod error;
pub mod frame;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};

pub use crate::capabilities::{ExposureControl, FrameProducer, GuidePort, TemperatureControl};
pub use crate::components::acquisition::{AcquisitionEvent, AcquisitionState, ExposureRequest};
pub use crate::components::controls::{
    BitStretch, ControlDescriptor, ControlKind, ExposureBounds, FrameFormat, FrameSpeed,
    SwitchOutcome,
};
pub use crate::components::geometry::GeometryState;
pub use crate::components::lifecycle::{
    CameraDescription, CameraEnumerator, DeviceDescriptor, GuideOutcome, ModelQuirks,
};
pub use crate::components::sdk::{CameraInfo, GuideDirection, SvbCamera, SvbSdk};
pub use crate::components::temperature::{
    RegulatorStatus, SetTemperatureOutcome, TemperatureState,
};
pub use crate::config::{DriverSettings, PersistedCameraConfig};
pub use crate::error::{CameraError, ConfigError, SdkError};
pub use crate::frame::{Frame, FrameMetadata, PixelFormat};

use crate::components::acquisition::{frame_metadata, AcquisitionEngine, StateCell};
use crate::components::controls::ControlRegistry;
use crate::components::geometry::GeometryManager;
use crate::components::lifecycle;
use crate::components::temperature::TemperatureRegulator;
use crate::config::ExposureWorkaroundSettings;

/// Everything that exists only while connected.
///
/// Fields drop in declaration order: `acquisition` signals its workers
/// before the geometry and registry they borrow go away.
struct Session {
    acquisition: AcquisitionEngine,
    temperature: Option<TemperatureRegulator>,
    geometry: Arc<GeometryManager>,
    registry: Arc<ControlRegistry>,
    quirks: Arc<ModelQuirks>,
    description: CameraDescription,
    camera: SvbCamera,
}

impl Session {
    /// Full connect sequence. Blocking; run it off the async runtime.
    fn open(
        camera: SvbCamera,
        info: &CameraInfo,
        settings: &DriverSettings,
        events: broadcast::Sender<AcquisitionEvent>,
    ) -> Result<Self, CameraError> {
        let description = lifecycle::open_and_describe(&camera, info, &settings.connect)?;
        match Self::build(camera.clone(), description, settings, events) {
            Ok(session) => Ok(session),
            Err(e) => {
                lifecycle::shutdown(&camera);
                Err(e)
            }
        }
    }

    fn build(
        camera: SvbCamera,
        description: CameraDescription,
        settings: &DriverSettings,
        events: broadcast::Sender<AcquisitionEvent>,
    ) -> Result<Self, CameraError> {
        let registry = Arc::new(ControlRegistry::discover(&camera, description.control_count)?);
        let quirks = Arc::new(description.quirks.clone());

        let temperature = if quirks.has_cooler {
            let regulator = TemperatureRegulator::new(camera.clone(), settings.temperature);
            regulator.init();
            Some(regulator)
        } else {
            None
        };

        let state = StateCell::new(events.clone());
        let geometry = Arc::new(GeometryManager::new(
            camera.clone(),
            description.property.max_width,
            description.property.max_height,
            quirks.mono_only,
            state.clone(),
        ));

        lifecycle::prepare_capture(&camera, &registry, &geometry)?;

        let acquisition = AcquisitionEngine::new(
            camera.clone(),
            geometry.clone(),
            registry.clone(),
            quirks.clone(),
            state,
            events,
            settings.acquisition,
            settings.exposure_workaround,
        );

        Ok(Self {
            acquisition,
            temperature,
            geometry,
            registry,
            quirks,
            description,
            camera,
        })
    }

    /// Reapply saved control values and switch selections. Failures are
    /// logged and the rest of the config still applies.
    fn restore(&self, saved: &PersistedCameraConfig) {
        for (kind, value) in saved.control_values() {
            if self.registry.descriptor(kind).is_some() {
                self.registry.apply(&self.camera, kind, value);
            }
        }
        if let Err(e) = self.registry.set_frame_speed(&self.camera, saved.speed) {
            tracing::warn!(error = %e, "Could not restore frame speed");
        }
        if let Err(e) = self.geometry.set_format(saved.format) {
            tracing::warn!(error = %e, "Could not restore frame format");
        }
        self.geometry.set_stretch(saved.stretch);
    }

    fn snapshot_config(&self) -> PersistedCameraConfig {
        let mut config = PersistedCameraConfig::default();
        for (kind, value) in self.registry.snapshot(&self.camera) {
            config.set_control(kind, value);
        }
        let geometry = self.geometry.state();
        config.format = geometry.format;
        config.stretch = geometry.stretch;
        config.speed = self.registry.frame_speed();
        config
    }
}

/// Driver for one SVBONY camera.
pub struct SvbonyDriver {
    device: DeviceDescriptor,
    camera: SvbCamera,
    settings: DriverSettings,
    events: broadcast::Sender<AcquisitionEvent>,
    session: RwLock<Option<Arc<Session>>>,
    /// Serializes connect, disconnect and every reconfiguration
    op_lock: Mutex<()>,
}

impl SvbonyDriver {
    pub fn new(sdk: Arc<dyn SvbSdk>, device: DeviceDescriptor, settings: DriverSettings) -> Self {
        let (events, _) = broadcast::channel(16);
        let camera = SvbCamera::new(sdk, device.info.camera_id);
        Self {
            device,
            camera,
            settings,
            events,
            session: RwLock::new(None),
            op_lock: Mutex::new(()),
        }
    }

    /// One driver per connected camera, uniquely named.
    pub fn discover(sdk: Arc<dyn SvbSdk>, settings: DriverSettings) -> Vec<Self> {
        let devices = CameraEnumerator::new().rescan(sdk.as_ref());
        if devices.is_empty() {
            tracing::warn!("No SVBONY cameras detected");
        }
        devices
            .into_iter()
            .map(|device| Self::new(sdk.clone(), device, settings.clone()))
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.device.name
    }

    pub fn info(&self) -> &CameraInfo {
        &self.device.info
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn sdk_version(&self) -> String {
        self.camera.sdk_version()
    }

    pub fn is_connected(&self) -> bool {
        self.session.read().is_some()
    }

    /// Acquisition events. Available before connect.
    pub fn subscribe(&self) -> broadcast::Receiver<AcquisitionEvent> {
        self.events.subscribe()
    }

    fn session(&self) -> Result<Arc<Session>, CameraError> {
        self.session.read().clone().ok_or(CameraError::NotConnected)
    }

    /// Run `f` against the session on a blocking thread.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T, CameraError> + Send + 'static,
        T: Send + 'static,
    {
        let session = self.session()?;
        Ok(tokio::task::spawn_blocking(move || f(&session)).await??)
    }

    fn config_path(&self) -> Option<std::path::PathBuf> {
        self.settings
            .persistence
            .config_dir
            .as_deref()
            .map(|dir| PersistedCameraConfig::path_for(dir, &self.device.name))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub async fn connect(&self) -> Result<()> {
        let _op = self.op_lock.lock().await;
        if self.is_connected() {
            return Err(CameraError::AlreadyConnected.into());
        }

        let saved = match self.config_path() {
            Some(path) => PersistedCameraConfig::load(&path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring unreadable camera config");
                None
            }),
            None => None,
        };

        let camera = self.camera.clone();
        let info = self.device.info.clone();
        let settings = self.settings.clone();
        let events = self.events.clone();
        let session = tokio::task::spawn_blocking(move || {
            let session = Session::open(camera, &info, &settings, events)?;
            if let Some(saved) = saved {
                session.restore(&saved);
            }
            Ok::<_, CameraError>(session)
        })
        .await??;

        if let Some(regulator) = &session.temperature {
            regulator.start().await;
        }
        *self.session.write() = Some(Arc::new(session));
        tracing::info!(camera = %self.device.name, "Camera connected");
        Ok(())
    }

    /// Save config, stop acquisition, stop capture, close.
    pub async fn disconnect(&self) -> Result<()> {
        let _op = self.op_lock.lock().await;
        let Some(session) = self.session.write().take() else {
            tracing::debug!(camera = %self.device.name, "Already disconnected");
            return Ok(());
        };

        if let Some(path) = self.config_path() {
            let s = session.clone();
            let saved = tokio::task::spawn_blocking(move || s.snapshot_config().save(&path)).await?;
            if let Err(e) = saved {
                tracing::warn!(error = %e, "Saving camera config failed");
            }
        }

        session.acquisition.shutdown().await?;
        if let Some(regulator) = &session.temperature {
            regulator.stop().await;
        }

        let camera = session.camera.clone();
        tokio::task::spawn_blocking(move || lifecycle::shutdown(&camera)).await?;
        tracing::info!(camera = %self.device.name, "Camera disconnected");
        Ok(())
    }

    /// Stop acquisition before dropping the driver.
    pub async fn shutdown(&self) -> Result<()> {
        self.disconnect().await
    }

    pub fn description(&self) -> Result<CameraDescription> {
        Ok(self.session()?.description.clone())
    }

    pub fn quirks(&self) -> Result<ModelQuirks> {
        Ok((*self.session()?.quirks).clone())
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    pub fn acquisition_state(&self) -> AcquisitionState {
        self.session
            .read()
            .as_ref()
            .map(|s| s.acquisition.state())
            .unwrap_or(AcquisitionState::Idle)
    }

    pub fn exposure_bounds(&self) -> Result<ExposureBounds> {
        Ok(self.session()?.registry.exposure_bounds())
    }

    /// Start one exposure; the duration is clamped to the camera limits.
    pub async fn start_exposure(&self, seconds: f64) -> Result<f64> {
        let _op = self.op_lock.lock().await;
        let request = self.session()?.acquisition.start_exposure(seconds).await?;
        Ok(request.clamped_s)
    }

    pub async fn abort_exposure(&self) -> Result<()> {
        let _op = self.op_lock.lock().await;
        Ok(self.session()?.acquisition.abort().await?)
    }

    pub async fn start_streaming(&self) -> Result<()> {
        let _op = self.op_lock.lock().await;
        Ok(self.session()?.acquisition.start_streaming().await?)
    }

    pub async fn stop_streaming(&self) -> Result<()> {
        let _op = self.op_lock.lock().await;
        Ok(self.session()?.acquisition.stop_streaming().await?)
    }

    pub fn set_target_fps(&self, fps: f64) -> Result<()> {
        Ok(self.session()?.acquisition.set_target_fps(fps)?)
    }

    pub fn exposure_workaround(&self) -> Result<ExposureWorkaroundSettings> {
        Ok(self.session()?.acquisition.exposure_workaround())
    }

    pub fn set_exposure_workaround(&self, enabled: bool, duration_s: f64) -> Result<()> {
        Ok(self
            .session()?
            .acquisition
            .set_exposure_workaround(ExposureWorkaroundSettings {
                enabled,
                duration_s,
            })?)
    }

    // =========================================================================
    // Geometry and format
    // =========================================================================

    pub fn geometry(&self) -> Result<GeometryState> {
        Ok(self.session()?.geometry.state())
    }

    pub async fn set_subframe(&self, x: u32, y: u32, width: u32, height: u32) -> Result<()> {
        let _op = self.op_lock.lock().await;
        self.blocking(move |s| s.geometry.update_frame(x, y, width, height))
            .await
    }

    pub async fn set_binning(&self, bin: u32) -> Result<()> {
        let _op = self.op_lock.lock().await;
        self.blocking(move |s| s.geometry.update_binning(bin)).await
    }

    pub async fn set_format(&self, format: FrameFormat) -> Result<SwitchOutcome> {
        let _op = self.op_lock.lock().await;
        self.blocking(move |s| s.geometry.set_format(format)).await
    }

    pub async fn set_stretch(&self, stretch: BitStretch) -> Result<SwitchOutcome> {
        Ok(self.session()?.geometry.set_stretch(stretch))
    }

    pub async fn set_frame_speed(&self, speed: FrameSpeed) -> Result<SwitchOutcome> {
        let _op = self.op_lock.lock().await;
        self.blocking(move |s| s.registry.set_frame_speed(&s.camera, speed))
            .await
    }

    // =========================================================================
    // Controls
    // =========================================================================

    pub fn controls(&self) -> Result<Vec<ControlDescriptor>> {
        Ok(self.session()?.registry.descriptors().to_vec())
    }

    /// Write a number control. `Ok(false)` when the camera rejected it.
    pub async fn set_control(&self, kind: ControlKind, value: i64) -> Result<bool> {
        let _op = self.op_lock.lock().await;
        self.blocking(move |s| Ok(s.registry.apply(&s.camera, kind, value)))
            .await
    }

    pub async fn control(&self, kind: ControlKind) -> Result<i64> {
        self.blocking(move |s| s.registry.read(&s.camera, kind).map(|(value, _)| value))
            .await
    }

    /// Current values for frame headers.
    pub async fn frame_metadata(&self) -> Result<FrameMetadata> {
        self.blocking(|s| {
            Ok(frame_metadata(
                &s.camera,
                &s.registry,
                s.quirks.is_mono(),
                s.geometry.stretch(),
            ))
        })
        .await
    }

    fn regulator_session(&self) -> Result<Arc<Session>> {
        let session = self.session()?;
        if session.temperature.is_none() {
            return Err(CameraError::Unsupported {
                feature: "cooling",
                model: session.quirks.model.clone(),
            }
            .into());
        }
        Ok(session)
    }

    pub fn temperature_updates(&self) -> Result<broadcast::Receiver<TemperatureState>> {
        let session = self.regulator_session()?;
        match &session.temperature {
            Some(regulator) => Ok(regulator.subscribe()),
            None => Err(CameraError::NotConnected.into()),
        }
    }
}

#[async_trait]
impl ExposureControl for SvbonyDriver {
    async fn start_exposure(&self, seconds: f64) -> Result<f64> {
        SvbonyDriver::start_exposure(self, seconds).await
    }

    async fn abort_exposure(&self) -> Result<()> {
        SvbonyDriver::abort_exposure(self).await
    }

    fn exposure_left(&self) -> f64 {
        self.session
            .read()
            .as_ref()
            .map(|s| s.acquisition.exposure_left())
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl FrameProducer for SvbonyDriver {
    async fn start_stream(&self) -> Result<()> {
        self.start_streaming().await
    }

    async fn stop_stream(&self) -> Result<()> {
        self.stop_streaming().await
    }

    fn resolution(&self) -> (u32, u32) {
        self.session
            .read()
            .as_ref()
            .map(|s| {
                (
                    s.description.property.max_width,
                    s.description.property.max_height,
                )
            })
            .unwrap_or((0, 0))
    }

    fn is_streaming(&self) -> bool {
        self.acquisition_state() == AcquisitionState::StreamingActive
    }

    fn frame_count(&self) -> u64 {
        self.session
            .read()
            .as_ref()
            .map(|s| s.acquisition.frame_count())
            .unwrap_or(0)
    }

    async fn register_reliable_output(&self, tx: mpsc::Sender<Arc<Frame>>) -> Result<()> {
        self.session()?.acquisition.register_reliable_output(tx).await;
        Ok(())
    }
}

#[async_trait]
impl TemperatureControl for SvbonyDriver {
    async fn set_temperature(&self, celsius: f64) -> Result<SetTemperatureOutcome> {
        let _op = self.op_lock.lock().await;
        let session = self.regulator_session()?;
        Ok(tokio::task::spawn_blocking(move || match &session.temperature {
            Some(regulator) => regulator.set_temperature(celsius),
            None => Err(CameraError::NotConnected),
        })
        .await??)
    }

    async fn set_cooler(&self, enabled: bool) -> Result<SwitchOutcome> {
        let _op = self.op_lock.lock().await;
        let session = self.regulator_session()?;
        Ok(tokio::task::spawn_blocking(move || match &session.temperature {
            Some(regulator) => Ok(regulator.set_cooler(enabled)),
            None => Err(CameraError::NotConnected),
        })
        .await??)
    }

    async fn temperature(&self) -> Result<TemperatureState> {
        let session = self.regulator_session()?;
        match &session.temperature {
            Some(regulator) => Ok(regulator.state()),
            None => Err(CameraError::NotConnected.into()),
        }
    }
}

#[async_trait]
impl GuidePort for SvbonyDriver {
    async fn pulse_guide(&self, direction: GuideDirection, duration_ms: u32) -> Result<GuideOutcome> {
        let session = self.session()?;
        Ok(tokio::task::spawn_blocking(move || {
            lifecycle::pulse_guide(&session.camera, &session.quirks, direction, duration_ms)
        })
        .await?)
    }
}

impl Drop for SvbonyDriver {
    fn drop(&mut self) {
        if self.session.get_mut().is_some() {
            tracing::warn!(
                camera = %self.device.name,
                "SvbonyDriver dropped while connected. Call disconnect().await first; \
                 workers are only signalled to stop"
            );
        }
    }
}
