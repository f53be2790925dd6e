//! Exposure, streaming and abort against the simulated SDK.
//!
//! ```bash
//! cargo test -p daq-driver-svbony --test acquisition_test
//! RUST_LOG=debug cargo test -p daq-driver-svbony --test acquisition_test -- --nocapture
//! ```

#![cfg(feature = "mock")]

mod common;

use common::*;
use daq_driver_svbony::components::mock::{
    ErrorConfig, ErrorScenario, MockCameraSpec, MockSdk, SdkCall,
};
use daq_driver_svbony::components::sdk::{BayerPattern, CameraMode, ControlType};
use daq_driver_svbony::{
    AcquisitionEvent, AcquisitionState, CameraError, ExposureControl, FrameFormat,
    FrameProducer, PixelFormat, SdkError,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const FULL_ROI: SdkCall = SdkCall::SetRoi {
    x: 0,
    y: 0,
    width: 1920,
    height: 1080,
    bin: 1,
};

fn reset_sequence(roi: SdkCall) -> [SdkCall; 4] {
    [
        SdkCall::StopCapture,
        SdkCall::SetMode(CameraMode::SoftTrigger),
        roi,
        SdkCall::StartCapture,
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn short_exposure_is_clamped_and_delivered() {
    let sdk = sdk_with(MockCameraSpec::sv305().with_exposure_range(100_000, 2_000_000_000));
    let driver = connected(sdk.clone()).await;
    let mut events = driver.subscribe();
    sdk.clear_calls();

    let used = driver.start_exposure(0.001).await.unwrap();
    assert_eq!(used, 0.1);

    let event = wait_for(&mut events, Duration::from_secs(3), is_exposure_complete)
        .await
        .expect("exposure never completed");
    let AcquisitionEvent::ExposureComplete(frame) = event else {
        unreachable!()
    };

    assert_eq!(
        sdk.count_calls(|c| *c == SdkCall::SetControl(ControlType::Exposure, 100_000)),
        1
    );
    assert_eq!(sdk.count_calls(|c| *c == SdkCall::SoftTrigger), 1);
    assert_eq!(sdk.frames_delivered(), 1);

    assert_eq!((frame.width, frame.height, frame.bit_depth), (1920, 1080, 16));
    assert_eq!(frame.pixel_format, PixelFormat::Bayer(BayerPattern::Gr));
    assert_eq!(frame.exposure_s, 0.1);
    assert_eq!(frame.frame_number, 0);
    assert_eq!(frame.pixel(0, 0), Some(100));
    let meta = frame.metadata.as_ref().expect("exposures carry metadata");
    assert_eq!(meta.gain, Some(10));
    assert_eq!(meta.wb_red, Some(128));
    assert_eq!(meta.frame_speed, 1);

    assert_eq!(driver.acquisition_state(), AcquisitionState::Idle);
    assert_eq!(driver.exposure_left(), 0.0);
    driver.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn long_exposure_reports_progress_and_aborts_quickly() {
    let sdk = sdk_with(MockCameraSpec::sv305());
    let driver = connected(sdk.clone()).await;
    let mut events = driver.subscribe();

    driver.start_exposure(5.0).await.unwrap();
    let progress = wait_for(&mut events, Duration::from_secs(1), |e| {
        matches!(e, AcquisitionEvent::ExposureProgress { .. })
    })
    .await
    .expect("no progress reported");
    let AcquisitionEvent::ExposureProgress { remaining_s } = progress else {
        unreachable!()
    };
    assert_eq!(remaining_s.fract(), 0.0, "whole seconds while > 1 s left");
    assert!(remaining_s <= 5.0);

    // Land mid-way through the timer's whole-second sleep
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(
        wait_for_state(&driver, AcquisitionState::ExposureExposing, Duration::from_secs(1)).await
    );
    assert!(driver.exposure_left() > 3.0);
    sdk.clear_calls();

    let started = Instant::now();
    driver.abort_exposure().await.unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(300),
        "abort took {:?}",
        started.elapsed()
    );

    assert_eq!(driver.acquisition_state(), AcquisitionState::Idle);
    assert_eq!(sdk.calls(), reset_sequence(FULL_ROI).to_vec());
    assert_eq!(sdk.mode_of(0), Some(CameraMode::SoftTrigger));
    assert_eq!(sdk.frames_delivered(), 0);
    assert_eq!(driver.exposure_left(), 0.0);
    assert!(
        wait_for(&mut events, Duration::from_millis(200), is_exposure_complete)
            .await
            .is_none()
    );

    // Camera is usable again
    driver.start_exposure(0.01).await.unwrap();
    assert!(
        wait_for(&mut events, Duration::from_secs(3), is_exposure_complete)
            .await
            .is_some()
    );
    driver.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exposure_failure_returns_to_idle() {
    init_tracing();
    let sdk = Arc::new(
        MockSdk::builder()
            .camera(MockCameraSpec::sv305())
            .error_config(ErrorConfig::scenario(ErrorScenario::Always {
                operation: "SVBSendSoftTrigger",
                error: SdkError::GeneralError,
            }))
            .build(),
    );
    let driver = connected(sdk.clone()).await;
    let mut events = driver.subscribe();

    driver.start_exposure(0.5).await.unwrap();
    let failed = wait_for(&mut events, Duration::from_secs(2), |e| {
        matches!(e, AcquisitionEvent::ExposureFailed { .. })
    })
    .await
    .expect("failure not reported");
    let AcquisitionEvent::ExposureFailed { reason } = failed else {
        unreachable!()
    };
    assert!(reason.contains("soft trigger"), "reason: {}", reason);

    assert!(wait_for_state(&driver, AcquisitionState::Idle, Duration::from_secs(1)).await);
    assert_eq!(driver.exposure_left(), 0.0);
    assert_eq!(sdk.frames_delivered(), 0);
    driver.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn workaround_flushes_before_the_real_exposure() {
    let sdk = sdk_with(MockCameraSpec::sv305());
    let driver = connected(sdk.clone()).await;
    let mut events = driver.subscribe();

    let err = driver.set_exposure_workaround(true, 0.01).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CameraError>(),
        Some(CameraError::InvalidValue(_))
    ));
    driver.set_exposure_workaround(true, 0.1).unwrap();
    assert!(driver.exposure_workaround().unwrap().enabled);
    sdk.clear_calls();

    driver.start_exposure(0.2).await.unwrap();
    assert!(
        wait_for(&mut events, Duration::from_secs(3), is_exposure_complete)
            .await
            .is_some()
    );

    let calls = sdk.calls();
    assert_eq!(
        &calls[..5],
        &[
            SdkCall::StopCapture,
            SdkCall::SetControl(ControlType::Exposure, 100_000),
            SdkCall::SetMode(CameraMode::Normal),
            FULL_ROI,
            SdkCall::StartCapture,
        ]
    );
    assert!(matches!(calls[5], SdkCall::GetFrame { timeout_ms: 700 }));
    assert_eq!(&calls[6..10], &reset_sequence(FULL_ROI));
    assert_eq!(
        &calls[10..12],
        &[
            SdkCall::SetControl(ControlType::Exposure, 200_000),
            SdkCall::SoftTrigger,
        ]
    );
    // One flushed frame plus the real one
    assert_eq!(sdk.frames_delivered(), 2);
    driver.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn streaming_switches_to_normal_mode_and_back() {
    let sdk = sdk_with(MockCameraSpec::sv305());
    let driver = connected(sdk.clone()).await;
    driver.set_subframe(0, 0, 64, 32).await.unwrap();
    let mut events = driver.subscribe();
    sdk.clear_calls();

    driver.start_streaming().await.unwrap();
    assert!(driver.is_streaming());
    for _ in 0..3 {
        assert!(
            wait_for(&mut events, Duration::from_secs(2), is_stream_frame)
                .await
                .is_some()
        );
    }

    let roi = SdkCall::SetRoi {
        x: 0,
        y: 0,
        width: 64,
        height: 32,
        bin: 1,
    };
    let calls = sdk.calls();
    assert_eq!(
        &calls[..5],
        &[
            SdkCall::StopCapture,
            SdkCall::SetControl(ControlType::Exposure, 95_000),
            roi.clone(),
            SdkCall::SetMode(CameraMode::Normal),
            SdkCall::StartCapture,
        ]
    );
    assert!(matches!(calls[5], SdkCall::GetFrame { timeout_ms: 700 }));

    driver.stop_streaming().await.unwrap();
    assert!(
        wait_for(&mut events, Duration::from_secs(1), |e| matches!(
            e,
            AcquisitionEvent::StreamingStopped { error: None }
        ))
        .await
        .is_some()
    );
    let calls = sdk.calls();
    assert_eq!(&calls[calls.len() - 4..], &reset_sequence(roi));
    assert_eq!(sdk.mode_of(0), Some(CameraMode::SoftTrigger));
    assert_eq!(driver.acquisition_state(), AcquisitionState::Idle);
    assert!(driver.frame_count() >= 3);

    // Stopping again is harmless
    driver.stop_streaming().await.unwrap();
    driver.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reliable_output_sees_every_frame_in_order() {
    let sdk = sdk_with(MockCameraSpec::sv305m_pro());
    let driver = connected(sdk.clone()).await;
    driver.set_subframe(0, 0, 64, 32).await.unwrap();
    driver.set_target_fps(20.0).unwrap();

    let (tx, mut rx) = mpsc::channel(2);
    driver.register_reliable_output(tx).await.unwrap();
    driver.start_streaming().await.unwrap();

    for expected in 1..=8u64 {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("stream stalled")
            .expect("sender dropped");
        assert_eq!(frame.frame_number, expected);
        assert_eq!(frame.pixel_format, PixelFormat::Mono);
        assert!(frame.metadata.is_none());
        assert_eq!((frame.width, frame.height), (64, 32));
    }

    // The worker is parked on the full channel; stop must still finish
    tokio::time::timeout(Duration::from_secs(2), driver.stop_streaming())
        .await
        .expect("stop_streaming hung")
        .unwrap();
    assert!(
        sdk.count_calls(|c| *c == SdkCall::SetControl(ControlType::Exposure, 47_500)) >= 1
    );
    driver.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_read_error_stops_streaming() {
    init_tracing();
    let sdk = Arc::new(
        MockSdk::builder()
            .camera(MockCameraSpec::sv305())
            .error_config(ErrorConfig::scenario(ErrorScenario::FailAfterN {
                operation: "SVBGetVideoData",
                count: 3,
                error: SdkError::GeneralError,
            }))
            .build(),
    );
    let driver = connected(sdk.clone()).await;
    driver.set_subframe(0, 0, 64, 32).await.unwrap();
    let mut events = driver.subscribe();

    driver.start_streaming().await.unwrap();
    let stopped = wait_for(&mut events, Duration::from_secs(2), |e| {
        matches!(e, AcquisitionEvent::StreamingStopped { .. })
    })
    .await
    .expect("stream did not stop");
    let AcquisitionEvent::StreamingStopped { error } = stopped else {
        unreachable!()
    };
    assert!(error.is_some());

    assert!(wait_for_state(&driver, AcquisitionState::Idle, Duration::from_secs(1)).await);
    assert_eq!(sdk.mode_of(0), Some(CameraMode::SoftTrigger));
    assert_eq!(driver.frame_count(), 3);
    driver.stop_streaming().await.unwrap();
    driver.disconnect().await.unwrap();
}

/// A stop request racing a read error must reset the camera exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_racing_a_stream_error_resets_once() {
    init_tracing();
    let rates = HashMap::from([("SVBGetVideoData", 0.3)]);
    let sdk = Arc::new(
        MockSdk::builder()
            .camera(MockCameraSpec::sv305())
            .error_config(ErrorConfig::with_rates(rates, Some(11)))
            .build(),
    );
    let driver = connected(sdk.clone()).await;
    driver.set_subframe(0, 0, 64, 32).await.unwrap();
    sdk.clear_calls();

    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let rounds = 20;
    for _ in 0..rounds {
        driver.start_streaming().await.unwrap();
        tokio::time::sleep(Duration::from_millis(rng.gen_range(0..4))).await;
        driver.stop_streaming().await.unwrap();
        assert_eq!(driver.acquisition_state(), AcquisitionState::Idle);
    }

    assert_eq!(
        sdk.count_calls(|c| *c == SdkCall::SetMode(CameraMode::SoftTrigger)),
        rounds
    );
    assert_eq!(sdk.mode_of(0), Some(CameraMode::SoftTrigger));
    driver.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconfiguration_is_refused_while_streaming() {
    let sdk = sdk_with(MockCameraSpec::sv305());
    let driver = connected(sdk.clone()).await;
    driver.set_subframe(0, 0, 64, 32).await.unwrap();
    driver.start_streaming().await.unwrap();

    let busy = |e: anyhow::Error| matches!(e.downcast_ref::<CameraError>(), Some(CameraError::Busy(_)));
    assert!(busy(driver.set_subframe(0, 0, 128, 64).await.unwrap_err()));
    assert!(busy(driver.set_binning(2).await.unwrap_err()));
    assert!(busy(driver.set_format(FrameFormat::Raw8).await.unwrap_err()));
    assert!(busy(driver.start_exposure(1.0).await.unwrap_err()));
    assert!(busy(driver.start_streaming().await.unwrap_err()));
    assert_eq!(driver.geometry().unwrap().width, 64);

    // Abort also ends a stream
    let mut events = driver.subscribe();
    driver.abort_exposure().await.unwrap();
    assert!(
        wait_for(&mut events, Duration::from_secs(1), |e| matches!(
            e,
            AcquisitionEvent::StreamingStopped { error: None }
        ))
        .await
        .is_some()
    );
    assert_eq!(driver.acquisition_state(), AcquisitionState::Idle);
    assert_eq!(sdk.concurrency_violations(), 0);
    driver.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_while_streaming_stops_cleanly() {
    let sdk = sdk_with(MockCameraSpec::sv305());
    let driver = connected(sdk.clone()).await;
    driver.set_subframe(0, 0, 64, 32).await.unwrap();
    driver.start_streaming().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    driver.disconnect().await.unwrap();
    assert!(!sdk.is_open(0));
    assert!(!sdk.is_capturing(0));
    assert_eq!(driver.acquisition_state(), AcquisitionState::Idle);
}
