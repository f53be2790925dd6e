//! Shared helpers for the mock-SDK integration tests.

#![allow(dead_code)] // Not every test file uses every helper

use daq_driver_svbony::components::mock::{MockCameraSpec, MockSdk};
use daq_driver_svbony::{AcquisitionEvent, AcquisitionState, DriverSettings, SvbonyDriver};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Defaults without the connect settle delay.
pub fn fast_settings() -> DriverSettings {
    let mut settings = DriverSettings::default();
    settings.connect.settle_ms = 0;
    settings
}

pub fn sdk_with(spec: MockCameraSpec) -> Arc<MockSdk> {
    Arc::new(MockSdk::builder().camera(spec).build())
}

/// First discovered camera, connected.
pub async fn connected(sdk: Arc<MockSdk>) -> SvbonyDriver {
    connected_with(sdk, fast_settings()).await
}

pub async fn connected_with(sdk: Arc<MockSdk>, settings: DriverSettings) -> SvbonyDriver {
    init_tracing();
    let driver = SvbonyDriver::discover(sdk, settings).remove(0);
    driver.connect().await.unwrap();
    driver
}

/// Next event matching `pred`, skipping everything else (lag included).
pub async fn wait_for<F>(
    rx: &mut broadcast::Receiver<AcquisitionEvent>,
    timeout: Duration,
    mut pred: F,
) -> Option<AcquisitionEvent>
where
    F: FnMut(&AcquisitionEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Err(_) => return None,
            Ok(Ok(event)) if pred(&event) => return Some(event),
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => return None,
        }
    }
}

pub async fn wait_for_state(
    driver: &SvbonyDriver,
    state: AcquisitionState,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if driver.acquisition_state() == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    false
}

pub fn is_exposure_complete(event: &AcquisitionEvent) -> bool {
    matches!(event, AcquisitionEvent::ExposureComplete(_))
}

pub fn is_stream_frame(event: &AcquisitionEvent) -> bool {
    matches!(event, AcquisitionEvent::StreamFrame(_))
}
