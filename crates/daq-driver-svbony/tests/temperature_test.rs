//! Cooler control through the `TemperatureControl` capability.
//!
//! ```bash
//! cargo test -p daq-driver-svbony --test temperature_test
//! ```

#![cfg(feature = "mock")]

mod common;

use common::*;
use daq_driver_svbony::components::mock::{MockCameraSpec, SdkCall};
use daq_driver_svbony::components::sdk::ControlType;
use daq_driver_svbony::{
    CameraError, RegulatorStatus, SetTemperatureOutcome, SwitchOutcome, TemperatureControl,
};
use std::time::Duration;

fn cooled_settings() -> daq_driver_svbony::DriverSettings {
    let mut settings = fast_settings();
    settings.temperature.poll_interval_ms = 20;
    settings
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn set_point_close_to_current_is_a_no_op() {
    let sdk = sdk_with(MockCameraSpec::sv405cc());
    let driver = connected_with(sdk.clone(), cooled_settings()).await;
    assert_eq!(sdk.stored_control(0, ControlType::TargetTemperature), Some(250));
    assert_eq!(sdk.stored_control(0, ControlType::CoolerEnable), Some(0));
    sdk.clear_calls();

    let outcome = driver.set_temperature(25.1).await.unwrap();
    assert_eq!(outcome, SetTemperatureOutcome::AtTarget);
    assert_eq!(
        sdk.count_calls(|c| matches!(c, SdkCall::SetControl(ControlType::TargetTemperature, _))),
        0
    );
    driver.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_set_point_starts_cooling() {
    let sdk = sdk_with(MockCameraSpec::sv405cc());
    let driver = connected_with(sdk.clone(), cooled_settings()).await;
    let mut updates = driver.temperature_updates().unwrap();

    let outcome = driver.set_temperature(-10.0).await.unwrap();
    assert_eq!(outcome, SetTemperatureOutcome::Pending);
    assert_eq!(sdk.stored_control(0, ControlType::TargetTemperature), Some(-100));
    assert_eq!(sdk.stored_control(0, ControlType::CoolerEnable), Some(1));

    let state = driver.temperature().await.unwrap();
    assert_eq!(state.target_c, -10.0);
    assert!(state.cooler_enabled);

    // The poll picks up the cooler working
    let busy = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match updates.recv().await {
                Ok(s) if s.cooler_status == RegulatorStatus::Busy => return s,
                Ok(_) => continue,
                Err(e) => panic!("update channel failed: {}", e),
            }
        }
    })
    .await
    .expect("no cooler update");
    assert!(busy.cooler_power > 0.0);
    assert_eq!(busy.temperature_status, RegulatorStatus::Busy);

    assert_eq!(driver.set_cooler(false).await.unwrap(), SwitchOutcome::Changed);
    assert_eq!(sdk.stored_control(0, ControlType::CoolerEnable), Some(0));
    sdk.clear_calls();
    assert_eq!(driver.set_cooler(false).await.unwrap(), SwitchOutcome::Unchanged);
    assert_eq!(
        sdk.count_calls(|c| matches!(c, SdkCall::SetControl(ControlType::CoolerEnable, _))),
        0
    );
    assert!(!driver.temperature().await.unwrap().cooler_enabled);
    driver.disconnect().await.unwrap();
}

#[tokio::test]
async fn uncooled_model_rejects_temperature_requests() {
    let driver = connected(sdk_with(MockCameraSpec::sv305())).await;

    let err = driver.set_temperature(-5.0).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CameraError>(),
        Some(CameraError::Unsupported { feature: "cooling", .. })
    ));
    assert!(driver.temperature_updates().is_err());
    assert!(driver.temperature().await.is_err());
    driver.disconnect().await.unwrap();
}
