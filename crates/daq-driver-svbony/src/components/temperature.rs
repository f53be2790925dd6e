//! Temperature regulation for cooled models.
//!
//! The SDK reports temperatures in tenths of a degree. A background task
//! polls the sensor temperature and the cooler power at a fixed interval and
//! publishes a [`TemperatureState`] only when something observable changed.

use crate::components::controls::SwitchOutcome;
use crate::components::sdk::{ControlType, SvbCamera};
use crate::config::TemperatureSettings;
use crate::error::CameraError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Status light attached to the temperature and cooler readouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegulatorStatus {
    Idle,
    Ok,
    Busy,
    Alert,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureState {
    /// Last reported sensor temperature (°C)
    pub current_c: f64,
    /// Requested set-point (°C)
    pub target_c: f64,
    /// Cooler power (%)
    pub cooler_power: f64,
    pub cooler_enabled: bool,
    pub temperature_status: RegulatorStatus,
    pub cooler_status: RegulatorStatus,
}

/// Result of a set-point request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetTemperatureOutcome {
    /// Already within the threshold; nothing was sent to the camera
    AtTarget,
    /// Set-point written and cooler enabled; the poll reports progress
    Pending,
}

fn to_raw(celsius: f64) -> i64 {
    (celsius * 10.0) as i64
}

struct PollTask {
    quit: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct TemperatureRegulator {
    camera: SvbCamera,
    settings: TemperatureSettings,
    state: Arc<Mutex<TemperatureState>>,
    updates: broadcast::Sender<TemperatureState>,
    poll: tokio::sync::Mutex<Option<PollTask>>,
}

impl TemperatureRegulator {
    pub fn new(camera: SvbCamera, settings: TemperatureSettings) -> Self {
        let (updates, _) = broadcast::channel(16);
        let state = TemperatureState {
            current_c: settings.default_target_c,
            target_c: settings.default_target_c,
            cooler_power: 0.0,
            cooler_enabled: false,
            temperature_status: RegulatorStatus::Idle,
            cooler_status: RegulatorStatus::Idle,
        };
        Self {
            camera,
            settings,
            state: Arc::new(Mutex::new(state)),
            updates,
            poll: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> TemperatureState {
        *self.state.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TemperatureState> {
        self.updates.subscribe()
    }

    /// Connect-time defaults: set-point to the configured default, cooler off.
    /// Failures are logged only.
    pub fn init(&self) {
        let target = self.settings.default_target_c;
        if let Err(e) = self
            .camera
            .set_control(ControlType::TargetTemperature, to_raw(target))
        {
            tracing::error!(target_c = target, error = %e, "Setting default target temperature failed");
        }
        if let Err(e) = self.camera.set_control(ControlType::CoolerEnable, 0) {
            tracing::error!(error = %e, "Disabling cooler failed");
        }
        let mut s = self.state.lock();
        s.target_c = target;
        s.cooler_enabled = false;
    }

    /// Request a new set-point.
    pub fn set_temperature(&self, target_c: f64) -> Result<SetTemperatureOutcome, CameraError> {
        let current = self.state.lock().current_c;
        if (target_c - current).abs() < self.settings.threshold_c {
            tracing::info!(target_c, current_c = current, "Already at requested temperature");
            return Ok(SetTemperatureOutcome::AtTarget);
        }

        self.camera
            .set_control(ControlType::TargetTemperature, to_raw(target_c))
            .map_err(|e| {
                tracing::error!(target_c, error = %e, "Setting target temperature failed");
                e
            })?;
        self.camera
            .set_control(ControlType::CoolerEnable, 1)
            .map_err(|e| {
                tracing::error!(error = %e, "Enabling cooler failed");
                e
            })?;

        let mut s = self.state.lock();
        s.target_c = target_c;
        s.cooler_enabled = true;
        s.temperature_status = RegulatorStatus::Busy;
        tracing::info!("Setting CCD temperature to {:+06.2} C", target_c);
        Ok(SetTemperatureOutcome::Pending)
    }

    /// Switch the cooler. Selecting the current state is a no-op. An SDK
    /// failure is logged; the switch still records the selection.
    pub fn set_cooler(&self, enabled: bool) -> SwitchOutcome {
        let label = if enabled { "ON" } else { "OFF" };
        {
            let mut s = self.state.lock();
            if s.cooler_enabled == enabled {
                tracing::info!("Cooler is already {}", label);
                return SwitchOutcome::Unchanged;
            }
            s.cooler_enabled = enabled;
        }
        tracing::info!("Cooler is now {}", label);
        if let Err(e) = self
            .camera
            .set_control(ControlType::CoolerEnable, i64::from(enabled))
        {
            tracing::error!(enabled, error = %e, "Changing cooler state failed");
        }
        SwitchOutcome::Changed
    }

    /// One poll cycle. Returns the new state when it was published.
    pub fn poll_once(&self) -> Option<TemperatureState> {
        poll_once(
            &self.camera,
            &self.state,
            &self.updates,
            &self.settings,
        )
    }

    pub async fn start(&self) {
        let mut poll = self.poll.lock().await;
        if poll.is_some() {
            return;
        }
        let quit = Arc::new(AtomicBool::new(false));
        let camera = self.camera.clone();
        let state = self.state.clone();
        let updates = self.updates.clone();
        let settings = self.settings;
        let task_quit = quit.clone();

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(settings.poll_interval_ms.max(1)));
            loop {
                interval.tick().await;
                if task_quit.load(Ordering::SeqCst) {
                    break;
                }
                let camera = camera.clone();
                let state = state.clone();
                let updates = updates.clone();
                let cycle = tokio::task::spawn_blocking(move || {
                    poll_once(&camera, &state, &updates, &settings);
                })
                .await;
                if let Err(e) = cycle {
                    tracing::error!(error = %e, "Temperature poll task failed");
                    break;
                }
            }
            tracing::debug!("Temperature poll stopped");
        });

        tracing::debug!(interval_ms = settings.poll_interval_ms, "Temperature poll started");
        *poll = Some(PollTask { quit, handle });
    }

    pub async fn stop(&self) {
        if let Some(task) = self.poll.lock().await.take() {
            task.quit.store(true, Ordering::SeqCst);
            task.handle.abort();
            let _ = task.handle.await;
        }
    }
}

fn poll_once(
    camera: &SvbCamera,
    state: &Mutex<TemperatureState>,
    updates: &broadcast::Sender<TemperatureState>,
    settings: &TemperatureSettings,
) -> Option<TemperatureState> {
    let temperature = camera.control(ControlType::CurrentTemperature);
    let power = camera.control(ControlType::CoolerPower);

    let mut s = state.lock();
    let before = *s;

    let mut status = s.temperature_status;
    let mut current = s.current_c;
    match temperature {
        Ok((raw, _)) => {
            current = raw as f64 / 10.0;
            status = match status {
                RegulatorStatus::Alert => RegulatorStatus::Idle,
                RegulatorStatus::Busy if (current - s.target_c).abs() < settings.threshold_c => {
                    RegulatorStatus::Ok
                }
                other => other,
            };
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to get temperature");
            status = RegulatorStatus::Alert;
        }
    }
    if (current - s.current_c).abs() > settings.report_epsilon_c || status != s.temperature_status {
        s.current_c = current;
        s.temperature_status = status;
    }

    match power {
        Ok((value, _)) => {
            s.cooler_power = value as f64;
            s.cooler_status = if value > 0 {
                RegulatorStatus::Busy
            } else {
                RegulatorStatus::Idle
            };
        }
        Err(e) => {
            tracing::error!(error = %e, "Unable to get cooler power");
            s.cooler_status = RegulatorStatus::Alert;
        }
    }

    if *s == before {
        return None;
    }
    let published = *s;
    drop(s);
    tracing::trace!(
        current_c = published.current_c,
        cooler_power = published.cooler_power,
        "Temperature update"
    );
    let _ = updates.send(published);
    Some(published)
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::components::mock::{ErrorConfig, ErrorScenario, MockCameraSpec, MockSdk};
    use crate::error::SdkError;

    fn regulator() -> (Arc<MockSdk>, TemperatureRegulator) {
        let sdk = Arc::new(
            MockSdk::builder()
                .camera(MockCameraSpec::sv405cc())
                .ambient_temperature(20.0)
                .temperature_drift_rate(0.0)
                .build(),
        );
        let camera = SvbCamera::new(sdk.clone(), 0);
        camera.open().unwrap();
        (sdk, TemperatureRegulator::new(camera, TemperatureSettings::default()))
    }

    #[test]
    fn init_sets_default_target_and_disables_cooler() {
        let (sdk, reg) = regulator();
        reg.init();
        assert_eq!(sdk.stored_control(0, ControlType::TargetTemperature), Some(250));
        assert_eq!(sdk.stored_control(0, ControlType::CoolerEnable), Some(0));
        assert!(!reg.state().cooler_enabled);
    }

    #[test]
    fn close_set_point_is_a_no_op() {
        let (sdk, reg) = regulator();
        reg.init();
        sdk.clear_calls();
        // Reported temperature starts at the 25 C default.
        let outcome = reg.set_temperature(25.1).unwrap();
        assert_eq!(outcome, SetTemperatureOutcome::AtTarget);
        assert!(sdk.calls().is_empty());
        assert!(!reg.state().cooler_enabled);
        assert_eq!(reg.state().target_c, 25.0);
    }

    #[test]
    fn distant_set_point_enables_cooler() {
        let (sdk, reg) = regulator();
        let outcome = reg.set_temperature(-10.0).unwrap();
        assert_eq!(outcome, SetTemperatureOutcome::Pending);
        assert_eq!(sdk.stored_control(0, ControlType::TargetTemperature), Some(-100));
        assert_eq!(sdk.stored_control(0, ControlType::CoolerEnable), Some(1));
        let s = reg.state();
        assert!(s.cooler_enabled);
        assert_eq!(s.temperature_status, RegulatorStatus::Busy);
    }

    #[test]
    fn poll_reports_only_real_changes() {
        let (sdk, reg) = regulator();
        sdk.set_sensor_temperature(0, 20.0);
        let first = reg.poll_once().unwrap();
        assert_eq!(first.current_c, 20.0);
        assert_eq!(first.cooler_status, RegulatorStatus::Idle);

        // 0.02 C is below the reporting epsilon
        sdk.set_sensor_temperature(0, 20.02);
        assert!(reg.poll_once().is_none());
        assert_eq!(reg.state().current_c, 20.0);
    }

    #[test]
    fn read_failure_raises_alert() {
        let sdk = Arc::new(
            MockSdk::builder()
                .camera(MockCameraSpec::sv405cc())
                .error_config(ErrorConfig::scenario(ErrorScenario::Always {
                    operation: "SVBGetControlValue",
                    error: SdkError::GeneralError,
                }))
                .build(),
        );
        let camera = SvbCamera::new(sdk, 0);
        camera.open().unwrap();
        let reg = TemperatureRegulator::new(camera, TemperatureSettings::default());

        let s = reg.poll_once().unwrap();
        assert_eq!(s.temperature_status, RegulatorStatus::Alert);
        assert_eq!(s.cooler_status, RegulatorStatus::Alert);
        assert_eq!(s.current_c, 25.0);
    }

    #[test]
    fn reselecting_cooler_state_is_a_no_op() {
        let (sdk, reg) = regulator();
        sdk.clear_calls();
        assert_eq!(reg.set_cooler(false), SwitchOutcome::Unchanged);
        assert!(sdk.calls().is_empty());
        assert_eq!(reg.set_cooler(true), SwitchOutcome::Changed);
        assert_eq!(sdk.stored_control(0, ControlType::CoolerEnable), Some(1));
    }

    #[tokio::test]
    async fn poll_task_starts_and_stops() {
        let (_sdk, reg) = regulator();
        let mut rx = reg.subscribe();
        reg.start().await;
        let update = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.current_c, 20.0);
        reg.stop().await;
    }
}
