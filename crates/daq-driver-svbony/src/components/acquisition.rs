//! Acquisition state machine
//!
//! Owns single exposures and continuous streaming. Each runs on a blocking
//! worker (the SDK is synchronous); exposures get an extra async timer task
//! that publishes the time remaining. At most one capture worker exists at a
//! time, enforced by the `Idle -> *` transition in [`StateCell::begin`].
//!
//! Cancellation is cooperative: workers poll a quit flag between SDK calls.
//! Abort does not trust the worker to leave the camera in a sane mode and
//! always runs the reset sequence (stop, soft-trigger mode, last ROI, start).
//!
//! Every `get_frame` runs with the geometry frame-buffer lock held, and so
//! does every ROI, mode or format change.

use crate::components::controls::{BitStretch, ControlKind, ControlRegistry, ExposureBounds};
use crate::components::geometry::{GeometryManager, GeometryState};
use crate::components::lifecycle::ModelQuirks;
use crate::components::processing::{apply_stretch, bin_frame};
use crate::components::sdk::{CameraMode, ControlType, SvbCamera};
use crate::config::{AcquisitionSettings, ExposureWorkaroundSettings};
use crate::error::CameraError;
use crate::frame::{Frame, FrameMetadata, PixelFormat};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

// =============================================================================
// State and events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    ExposureStarting,
    ExposureExposing,
    ExposureDownloading,
    StreamingActive,
    Aborting,
}

impl AcquisitionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, AcquisitionState::Idle)
    }

    pub fn is_exposing(&self) -> bool {
        matches!(
            self,
            AcquisitionState::ExposureStarting
                | AcquisitionState::ExposureExposing
                | AcquisitionState::ExposureDownloading
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::ExposureStarting => "exposure_starting",
            AcquisitionState::ExposureExposing => "exposure_exposing",
            AcquisitionState::ExposureDownloading => "exposure_downloading",
            AcquisitionState::StreamingActive => "streaming",
            AcquisitionState::Aborting => "aborting",
        }
    }
}

impl std::fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications published on the engine's broadcast channel.
#[derive(Debug, Clone)]
pub enum AcquisitionEvent {
    StateChanged(AcquisitionState),
    /// Rounded to whole seconds while more than ~1 s remains
    ExposureProgress { remaining_s: f64 },
    ExposureComplete(Arc<Frame>),
    ExposureFailed { reason: String },
    StreamFrame(Arc<Frame>),
    /// `error` is set when the stream stopped on its own after an SDK failure
    StreamingStopped { error: Option<String> },
}

/// Shared acquisition state. Every transition is published as
/// [`AcquisitionEvent::StateChanged`].
#[derive(Clone, Debug)]
pub struct StateCell {
    state: Arc<Mutex<AcquisitionState>>,
    events: broadcast::Sender<AcquisitionEvent>,
}

impl StateCell {
    pub fn new(events: broadcast::Sender<AcquisitionEvent>) -> Self {
        Self {
            state: Arc::new(Mutex::new(AcquisitionState::Idle)),
            events,
        }
    }

    pub fn get(&self) -> AcquisitionState {
        *self.state.lock()
    }

    pub fn set(&self, next: AcquisitionState) {
        let previous = std::mem::replace(&mut *self.state.lock(), next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Acquisition state");
            let _ = self.events.send(AcquisitionEvent::StateChanged(next));
        }
    }

    /// Leave `Idle` for `next`, or fail with [`CameraError::Busy`].
    pub fn begin(&self, next: AcquisitionState) -> Result<(), CameraError> {
        {
            let mut state = self.state.lock();
            if !state.is_idle() {
                return Err(CameraError::Busy(format!(
                    "cannot start {} while {}",
                    next, *state
                )));
            }
            *state = next;
        }
        tracing::debug!(from = "idle", to = %next, "Acquisition state");
        let _ = self.events.send(AcquisitionEvent::StateChanged(next));
        Ok(())
    }
}

/// A clamped single-exposure request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureRequest {
    pub requested_s: f64,
    pub clamped_s: f64,
    pub workaround: bool,
}

impl ExposureRequest {
    pub fn new(requested_s: f64, bounds: ExposureBounds, workaround: bool) -> Self {
        Self {
            requested_s,
            clamped_s: bounds.clamp(requested_s),
            workaround,
        }
    }

    pub fn was_clamped(&self) -> bool {
        self.clamped_s != self.requested_s
    }
}

// =============================================================================
// Exposure progress
// =============================================================================

#[derive(Debug, Default)]
struct TrackerState {
    in_exposure: bool,
    downloaded: bool,
    left_s: f64,
}

/// Time remaining for the current exposure. Observational only.
#[derive(Debug, Clone, Default)]
pub struct ExposureTracker {
    inner: Arc<Mutex<TrackerState>>,
}

impl ExposureTracker {
    fn start(&self, duration_s: f64) {
        *self.inner.lock() = TrackerState {
            in_exposure: true,
            downloaded: false,
            left_s: duration_s,
        };
    }

    /// Timer update. Ignored once the frame has been downloaded.
    fn report(&self, left_s: f64) -> bool {
        let mut s = self.inner.lock();
        if s.downloaded || !s.in_exposure {
            return false;
        }
        s.left_s = left_s;
        true
    }

    fn downloaded(&self) {
        let mut s = self.inner.lock();
        s.downloaded = true;
        s.left_s = 0.0;
    }

    fn finish(&self) {
        let mut s = self.inner.lock();
        s.in_exposure = false;
        s.left_s = 0.0;
    }

    pub fn in_exposure(&self) -> bool {
        self.inner.lock().in_exposure
    }

    pub fn left_s(&self) -> f64 {
        self.inner.lock().left_s
    }
}

// =============================================================================
// Workers
// =============================================================================

struct Worker {
    quit: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn signal(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    async fn stop(self, role: &'static str) {
        self.signal();
        if let Err(e) = self.handle.await {
            tracing::warn!(role, error = %e, "Worker ended abnormally");
        }
    }

    /// Stop an async worker without waiting out its current sleep.
    async fn cancel(self, role: &'static str) {
        self.signal();
        self.handle.abort();
        match self.handle.await {
            Err(e) if !e.is_cancelled() => {
                tracing::warn!(role, error = %e, "Worker ended abnormally");
            }
            _ => {}
        }
    }
}

#[derive(Default)]
struct Workers {
    capture: Option<Worker>,
    timer: Option<Worker>,
}

impl Workers {
    /// Join workers that already finished on their own.
    async fn reap(&mut self) {
        if let Some(w) = self.capture.take() {
            w.stop("capture").await;
        }
        if let Some(w) = self.timer.take() {
            w.cancel("timer").await;
        }
    }
}

/// Sleep `duration` in short slices. Returns false if `quit` was raised.
fn sleep_unless_quit(quit: &AtomicBool, duration: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(10);
    let deadline = Instant::now() + duration;
    loop {
        if quit.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SLICE.min(deadline - now));
    }
}

/// Stop capture, select `mode`, reapply the last committed ROI at bin 1 and
/// restart capture. Failures are logged; the sequence always runs to the end.
pub fn reset_capture(camera: &SvbCamera, geometry: &GeometryManager, mode: CameraMode) {
    let buffer = geometry.buffer();
    let _guard = buffer.lock();
    let g = geometry.state();

    if let Err(e) = camera.stop_capture() {
        tracing::error!(error = %e, "Stop camera failed");
    }
    if let Err(e) = camera.set_mode(mode) {
        tracing::error!(mode = mode.as_str(), error = %e, "Camera mode change failed");
    }
    tracing::info!(mode = mode.as_str(), "Camera capture mode set");
    if let Err(e) = camera.set_roi(g.x, g.y, g.width, g.height, 1) {
        tracing::error!(error = %e, "Camera set subframe failed");
    }
    if let Err(e) = camera.start_capture() {
        tracing::error!(error = %e, "Start camera failed");
    }
}

/// Everything a blocking worker needs, cloned out of the engine.
#[derive(Clone)]
struct WorkerContext {
    camera: SvbCamera,
    geometry: Arc<GeometryManager>,
    registry: Arc<ControlRegistry>,
    quirks: Arc<ModelQuirks>,
    state: StateCell,
    events: broadcast::Sender<AcquisitionEvent>,
    settings: AcquisitionSettings,
    frame_count: Arc<AtomicU64>,
    tracker: ExposureTracker,
    quit: Arc<AtomicBool>,
}

impl WorkerContext {
    fn quitting(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    fn pixel_format(&self, geometry: &GeometryState) -> PixelFormat {
        if self.quirks.is_mono() || geometry.is_binning_active() {
            PixelFormat::Mono
        } else {
            PixelFormat::Bayer(self.quirks.bayer_pattern)
        }
    }

    /// Stretch in place (16-bit only), then bin into the delivered frame.
    fn process(
        &self,
        raw: &mut [u8],
        geometry: &GeometryState,
        exposure_s: f64,
        frame_number: u64,
    ) -> Frame {
        let shift = geometry.stretch.shift();
        if geometry.bit_depth == 16 && shift != 0 {
            apply_stretch(raw, shift);
        }
        let bytes_per_pixel = if geometry.bit_depth > 8 { 2 } else { 1 };
        let data = if geometry.is_binning_active() {
            bin_frame(
                raw,
                geometry.width,
                geometry.height,
                geometry.bin,
                bytes_per_pixel,
            )
        } else {
            raw.to_vec()
        };
        let (width, height) = geometry.binned_size();
        Frame {
            width,
            height,
            bit_depth: geometry.bit_depth,
            bin: geometry.bin,
            pixel_format: self.pixel_format(geometry),
            exposure_s,
            frame_number,
            timestamp: SystemTime::now(),
            data,
            metadata: None,
        }
    }
}

/// Control values and switch selections to attach to a frame. Colour-only
/// fields stay `None` on mono models.
pub fn frame_metadata(
    camera: &SvbCamera,
    registry: &ControlRegistry,
    mono: bool,
    stretch: BitStretch,
) -> FrameMetadata {
    let mut meta = FrameMetadata {
        frame_speed: registry.frame_speed().to_svb() as u8,
        stretch_shift: stretch.shift(),
        ..Default::default()
    };
    for (kind, value) in registry.snapshot(camera) {
        if mono && kind.is_colour_only() {
            continue;
        }
        let slot = match kind {
            ControlKind::Gain => &mut meta.gain,
            ControlKind::Contrast => &mut meta.contrast,
            ControlKind::Sharpness => &mut meta.sharpness,
            ControlKind::Gamma => &mut meta.gamma,
            ControlKind::BlackLevel => &mut meta.offset,
            ControlKind::Saturation => &mut meta.saturation,
            ControlKind::WbRed => &mut meta.wb_red,
            ControlKind::WbGreen => &mut meta.wb_green,
            ControlKind::WbBlue => &mut meta.wb_blue,
        };
        *slot = Some(value);
    }
    meta
}

// =============================================================================
// Exposure worker
// =============================================================================

fn run_exposure(ctx: WorkerContext, duration_s: f64, workaround: ExposureWorkaroundSettings) {
    let outcome = expose(&ctx, duration_s, workaround);
    match outcome {
        Ok(Some(mut frame)) => {
            frame.metadata = Some(frame_metadata(
                &ctx.camera,
                &ctx.registry,
                ctx.quirks.is_mono(),
                ctx.geometry.stretch(),
            ));

            match ctx.camera.control(ControlType::BlackLevel) {
                Ok((offset, _)) => tracing::info!(offset, "Current offset"),
                Err(e) => tracing::error!(error = %e, "Camera get black level failed"),
            }

            ctx.tracker.finish();
            if !ctx.quitting() {
                ctx.state.set(AcquisitionState::Idle);
            }
            let _ = ctx
                .events
                .send(AcquisitionEvent::ExposureComplete(Arc::new(frame)));
        }
        // Cancelled; the aborting side owns the state and the camera reset.
        Ok(None) => ctx.tracker.finish(),
        Err(reason) => {
            tracing::error!(%reason, "Exposure failed");
            ctx.tracker.finish();
            if !ctx.quitting() {
                ctx.state.set(AcquisitionState::Idle);
            }
            let _ = ctx.events.send(AcquisitionEvent::ExposureFailed { reason });
        }
    }
}

/// `Ok(None)` when cancelled.
fn expose(
    ctx: &WorkerContext,
    duration_s: f64,
    workaround: ExposureWorkaroundSettings,
) -> Result<Option<Frame>, String> {
    if workaround.enabled && workaround.duration_s > 0.0 && !discard_exposure(ctx, workaround.duration_s)? {
        return Ok(None);
    }

    tracing::debug!(duration_s, "Setting exposure");
    ctx.camera
        .set_control(ControlType::Exposure, (duration_s * 1_000_000.0) as i64)
        .map_err(|e| format!("Failed to set exposure duration ({})", e))?;

    if duration_s > ctx.settings.verbose_exposure_s {
        tracing::info!(duration_s, "Taking a long exposure");
    }

    ctx.camera
        .send_soft_trigger()
        .map_err(|e| format!("Failed to send soft trigger ({})", e))?;

    if ctx.quitting() {
        return Ok(None);
    }
    ctx.state.set(AcquisitionState::ExposureExposing);
    if !sleep_unless_quit(&ctx.quit, Duration::from_secs_f64(duration_s)) {
        return Ok(None);
    }
    ctx.state.set(AcquisitionState::ExposureDownloading);

    let buffer = ctx.geometry.buffer();
    let timeout_ms = ctx.settings.frame_poll_timeout_ms;
    let frame = loop {
        if ctx.quitting() {
            return Ok(None);
        }
        let mut guard = buffer.lock();
        match ctx.camera.get_frame(&mut guard[..], timeout_ms) {
            Ok(()) => {
                let geometry = ctx.geometry.state();
                break ctx.process(&mut guard[..], &geometry, duration_s, 0);
            }
            Err(e) if e.is_timeout() => continue,
            Err(e) => return Err(format!("Exposure failed, status {} ({})", e.class(), e)),
        }
    };

    ctx.tracker.downloaded();
    tracing::info!("Exposure done, downloading image");
    Ok(Some(frame))
}

/// Throw-away exposure in normal mode to flush stale sensor data.
///
/// `Ok(false)` when cancelled. Setup failures are only logged; a non-timeout
/// frame error fails the whole exposure.
fn discard_exposure(ctx: &WorkerContext, duration_s: f64) -> Result<bool, String> {
    let micros = (duration_s * 1_000_000.0) as i64;
    let wait_ms = (duration_s * 2000.0 + 500.0) as u32;
    let buffer = ctx.geometry.buffer();

    {
        let _guard = buffer.lock();
        let g = ctx.geometry.state();
        if let Err(e) = ctx.camera.stop_capture() {
            tracing::error!(error = %e, "Stop camera failed");
        }
        if let Err(e) = ctx.camera.set_control(ControlType::Exposure, micros) {
            tracing::error!(error = %e, "Failed to set exposure duration");
        }
        if let Err(e) = ctx.camera.set_mode(CameraMode::Normal) {
            tracing::error!(error = %e, "Camera normal mode failed");
        }
        if let Err(e) = ctx.camera.set_roi(g.x, g.y, g.width, g.height, 1) {
            tracing::error!(error = %e, "Camera set subframe failed");
        }
        if let Err(e) = ctx.camera.start_capture() {
            tracing::error!(error = %e, "Failed to start video capture");
        }
    }

    tracing::info!(duration_s, "Workaround exposure in progress");
    if !sleep_unless_quit(&ctx.quit, Duration::from_secs_f64(duration_s)) {
        return Ok(false);
    }

    loop {
        if ctx.quitting() {
            return Ok(false);
        }
        let status = {
            let mut guard = buffer.lock();
            ctx.camera.get_frame(&mut guard[..], wait_ms)
        };
        match status {
            Ok(()) => break,
            Err(e) if e.is_timeout() => std::thread::sleep(Duration::from_micros(100)),
            Err(e) => {
                reset_capture(&ctx.camera, &ctx.geometry, CameraMode::SoftTrigger);
                return Err(format!("Workaround exposure failed ({})", e));
            }
        }
    }

    reset_capture(&ctx.camera, &ctx.geometry, CameraMode::SoftTrigger);
    Ok(true)
}

/// Publish the time remaining until the worker finishes.
///
/// More than 1.1 s left: report whole seconds and wake on the next second
/// boundary. Otherwise report every 100 ms.
async fn run_timer(
    duration_s: f64,
    quit: Arc<AtomicBool>,
    tracker: ExposureTracker,
    events: broadcast::Sender<AcquisitionEvent>,
) {
    let started = Instant::now();
    loop {
        let mut delay = 0.1_f64;
        let mut left = (duration_s - started.elapsed().as_secs_f64()).max(0.0);
        if left > 1.1 {
            delay = (left - left.trunc()).max(0.005);
            left = left.round();
        }
        if left > 0.0 && tracker.report(left) {
            let _ = events.send(AcquisitionEvent::ExposureProgress { remaining_s: left });
        }

        tokio::time::sleep(Duration::from_secs_f64(delay)).await;

        if quit.load(Ordering::SeqCst) || !tracker.in_exposure() {
            return;
        }
    }
}

// =============================================================================
// Streaming worker
// =============================================================================

/// Lossless hand-off: waits for room in the channel until `quit` is raised.
/// Returns false once the receiver is gone.
fn forward_reliable(tx: &mpsc::Sender<Arc<Frame>>, frame: Arc<Frame>, quit: &AtomicBool) -> bool {
    let mut pending = frame;
    loop {
        match tx.try_send(pending) {
            Ok(()) => return true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                if quit.load(Ordering::SeqCst) {
                    return true;
                }
                pending = frame;
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return false,
        }
    }
}

fn run_stream(
    ctx: WorkerContext,
    target_fps: f64,
    reliable_tx: Option<mpsc::Sender<Arc<Frame>>>,
) {
    let interval_s = 1.0 / target_fps;
    let micros = (interval_s * 950_000.0) as i64;
    let wait_ms = (interval_s * 2000.0 + 500.0) as u32;
    let exposure_s = micros as f64 / 1_000_000.0;
    let buffer = ctx.geometry.buffer();
    let mut reliable_tx = reliable_tx;

    {
        let _guard = buffer.lock();
        let g = ctx.geometry.state();
        let (width, height) = g.binned_size();
        tracing::info!(
            width,
            height,
            format = ctx.pixel_format(&g).as_str(),
            exposure_us = micros,
            "Framing"
        );
        if let Err(e) = ctx.camera.stop_capture() {
            tracing::error!(error = %e, "Stop camera failed");
        }
        if let Err(e) = ctx.camera.set_control(ControlType::Exposure, micros) {
            tracing::error!(error = %e, "Failed to set exposure duration");
        }
        if let Err(e) = ctx.camera.set_roi(g.x, g.y, g.width, g.height, 1) {
            tracing::error!(error = %e, "Camera set subframe failed");
        }
        if let Err(e) = ctx.camera.set_mode(CameraMode::Normal) {
            tracing::error!(error = %e, "Camera normal mode failed");
        }
        if let Err(e) = ctx.camera.start_capture() {
            tracing::error!(error = %e, "Failed to start video capture");
        }
    }

    let retry_limit = ctx.settings.stream_retry_limit;
    let mut consecutive_errors = 0u32;

    let failure = loop {
        if ctx.quitting() {
            break None;
        }

        let frame = {
            let mut guard = buffer.lock();
            match ctx.camera.get_frame(&mut guard[..], wait_ms) {
                Ok(()) => {
                    consecutive_errors = 0;
                    let number = ctx.frame_count.fetch_add(1, Ordering::SeqCst) + 1;
                    let geometry = ctx.geometry.state();
                    Some(ctx.process(&mut guard[..], &geometry, exposure_s, number))
                }
                Err(e) if e.is_timeout() => None,
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors > retry_limit {
                        break Some(format!("Failed to read video data ({})", e));
                    }
                    tracing::warn!(
                        error = %e,
                        attempt = consecutive_errors,
                        retry_limit,
                        "Video data read failed, retrying"
                    );
                    None
                }
            }
        };

        match frame {
            Some(frame) => {
                let frame = Arc::new(frame);
                let _ = ctx.events.send(AcquisitionEvent::StreamFrame(frame.clone()));
                if let Some(tx) = &reliable_tx {
                    if !forward_reliable(tx, frame, &ctx.quit) {
                        tracing::warn!("Reliable frame receiver dropped");
                        reliable_tx = None;
                    }
                }
            }
            None => std::thread::sleep(Duration::from_micros(100)),
        }
    };

    // A stop request racing the failure owns the reset and the event.
    if let Some(error) = failure.filter(|_| !ctx.quitting()) {
        tracing::error!(%error, "Streaming stopped");
        reset_capture(&ctx.camera, &ctx.geometry, CameraMode::SoftTrigger);
        ctx.state.set(AcquisitionState::Idle);
        let _ = ctx
            .events
            .send(AcquisitionEvent::StreamingStopped { error: Some(error) });
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct AcquisitionEngine {
    camera: SvbCamera,
    geometry: Arc<GeometryManager>,
    registry: Arc<ControlRegistry>,
    quirks: Arc<ModelQuirks>,
    state: StateCell,
    events: broadcast::Sender<AcquisitionEvent>,
    settings: Mutex<AcquisitionSettings>,
    workaround: Mutex<ExposureWorkaroundSettings>,
    pub reliable_tx: Arc<tokio::sync::Mutex<Option<mpsc::Sender<Arc<Frame>>>>>,
    pub frame_count: Arc<AtomicU64>,
    tracker: ExposureTracker,
    workers: tokio::sync::Mutex<Workers>,
}

impl AcquisitionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera: SvbCamera,
        geometry: Arc<GeometryManager>,
        registry: Arc<ControlRegistry>,
        quirks: Arc<ModelQuirks>,
        state: StateCell,
        events: broadcast::Sender<AcquisitionEvent>,
        settings: AcquisitionSettings,
        workaround: ExposureWorkaroundSettings,
    ) -> Self {
        Self {
            camera,
            geometry,
            registry,
            quirks,
            state,
            events,
            settings: Mutex::new(settings),
            workaround: Mutex::new(workaround),
            reliable_tx: Arc::new(tokio::sync::Mutex::new(None)),
            frame_count: Arc::new(AtomicU64::new(0)),
            tracker: ExposureTracker::default(),
            workers: tokio::sync::Mutex::new(Workers::default()),
        }
    }

    fn context(&self, quit: Arc<AtomicBool>) -> WorkerContext {
        WorkerContext {
            camera: self.camera.clone(),
            geometry: self.geometry.clone(),
            registry: self.registry.clone(),
            quirks: self.quirks.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
            settings: *self.settings.lock(),
            frame_count: self.frame_count.clone(),
            tracker: self.tracker.clone(),
            quit,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state.get()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AcquisitionEvent> {
        self.events.subscribe()
    }

    pub fn exposure_left(&self) -> f64 {
        self.tracker.left_s()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::SeqCst)
    }

    pub fn exposure_workaround(&self) -> ExposureWorkaroundSettings {
        *self.workaround.lock()
    }

    pub fn set_exposure_workaround(
        &self,
        settings: ExposureWorkaroundSettings,
    ) -> Result<(), CameraError> {
        settings
            .validate()
            .map_err(|e| CameraError::InvalidValue(e.to_string()))?;
        *self.workaround.lock() = settings;
        tracing::info!(
            enabled = settings.enabled,
            duration_s = settings.duration_s,
            "Exposure workaround updated"
        );
        Ok(())
    }

    pub fn target_fps(&self) -> f64 {
        self.settings.lock().target_fps
    }

    /// Takes effect at the next stream start.
    pub fn set_target_fps(&self, fps: f64) -> Result<(), CameraError> {
        if !(fps > 0.0 && fps.is_finite()) {
            return Err(CameraError::InvalidValue(format!(
                "target fps must be positive (got {})",
                fps
            )));
        }
        self.settings.lock().target_fps = fps;
        Ok(())
    }

    /// Lossless consumer for streamed frames, used from the next stream start.
    pub async fn register_reliable_output(&self, tx: mpsc::Sender<Arc<Frame>>) {
        *self.reliable_tx.lock().await = Some(tx);
    }

    /// Clamp `duration_s` to the camera limits and start a single exposure.
    pub async fn start_exposure(&self, duration_s: f64) -> Result<ExposureRequest, CameraError> {
        let workaround = *self.workaround.lock();
        let request = ExposureRequest::new(
            duration_s,
            self.registry.exposure_bounds(),
            workaround.enabled,
        );
        if request.was_clamped() {
            tracing::warn!(
                requested_s = request.requested_s,
                clamped_s = request.clamped_s,
                "Exposure outside camera limits, clamping"
            );
        }

        self.state.begin(AcquisitionState::ExposureStarting)?;

        let mut workers = self.workers.lock().await;
        workers.reap().await;

        self.tracker.start(request.clamped_s);

        let quit = Arc::new(AtomicBool::new(false));
        let ctx = self.context(quit.clone());
        let clamped = request.clamped_s;
        let handle = tokio::task::spawn_blocking(move || run_exposure(ctx, clamped, workaround));
        workers.capture = Some(Worker { quit, handle });

        let timer_quit = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run_timer(
            clamped,
            timer_quit.clone(),
            self.tracker.clone(),
            self.events.clone(),
        ));
        workers.timer = Some(Worker {
            quit: timer_quit,
            handle,
        });

        Ok(request)
    }

    pub async fn start_streaming(&self) -> Result<(), CameraError> {
        self.state.begin(AcquisitionState::StreamingActive)?;

        let mut workers = self.workers.lock().await;
        workers.reap().await;

        self.frame_count.store(0, Ordering::SeqCst);
        let reliable_tx = self.reliable_tx.lock().await.clone();
        let fps = self.target_fps();

        let quit = Arc::new(AtomicBool::new(false));
        let ctx = self.context(quit.clone());
        let handle = tokio::task::spawn_blocking(move || run_stream(ctx, fps, reliable_tx));
        workers.capture = Some(Worker { quit, handle });
        Ok(())
    }

    pub async fn stop_streaming(&self) -> Result<(), CameraError> {
        let current = self.state.get();
        let mut workers = self.workers.lock().await;
        match current {
            AcquisitionState::StreamingActive => {}
            s if s.is_exposing() => {
                return Err(CameraError::Busy("exposure in progress".into()));
            }
            _ => {
                workers.reap().await;
                tracing::info!("Streaming is not active");
                return Ok(());
            }
        }

        if let Some(w) = workers.capture.take() {
            w.stop("stream").await;
        }
        drop(workers);

        if self.state.get().is_idle() {
            tracing::info!("Streaming already stopped after an error");
            return Ok(());
        }

        tracing::info!("Stop framing");
        self.reset(CameraMode::SoftTrigger).await;
        self.state.set(AcquisitionState::Idle);
        let _ = self
            .events
            .send(AcquisitionEvent::StreamingStopped { error: None });
        Ok(())
    }

    /// Cancel whatever is running, then reset the camera to soft-trigger mode
    /// with the last ROI.
    pub async fn abort(&self) -> Result<(), CameraError> {
        let current = self.state.get();
        if current.is_idle() {
            tracing::info!("Nothing to abort");
            self.workers.lock().await.reap().await;
            return Ok(());
        }

        tracing::info!(state = %current, "Aborting acquisition");
        let mut workers = self.workers.lock().await;
        let capture = workers.capture.take();
        let timer = workers.timer.take();
        drop(workers);

        if let Some(w) = &capture {
            w.signal();
        }
        if let Some(w) = &timer {
            w.signal();
        }
        self.state.set(AcquisitionState::Aborting);
        if let Some(w) = capture {
            w.stop("capture").await;
        }
        if let Some(w) = timer {
            w.cancel("timer").await;
        }
        self.tracker.finish();

        tracing::info!("Reset capture mode");
        self.reset(CameraMode::SoftTrigger).await;
        self.state.set(AcquisitionState::Idle);

        if current == AcquisitionState::StreamingActive {
            let _ = self
                .events
                .send(AcquisitionEvent::StreamingStopped { error: None });
        }
        Ok(())
    }

    /// Bring acquisition to `Idle` before disconnect.
    pub async fn shutdown(&self) -> Result<(), CameraError> {
        match self.state.get() {
            AcquisitionState::StreamingActive => self.stop_streaming().await,
            AcquisitionState::Idle => {
                self.workers.lock().await.reap().await;
                Ok(())
            }
            _ => self.abort().await,
        }
    }

    async fn reset(&self, mode: CameraMode) {
        let camera = self.camera.clone();
        let geometry = self.geometry.clone();
        let result =
            tokio::task::spawn_blocking(move || reset_capture(&camera, &geometry, mode)).await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Capture reset task failed");
        }
    }
}

impl Drop for AcquisitionEngine {
    fn drop(&mut self) {
        if let Ok(workers) = self.workers.try_lock() {
            if let Some(w) = &workers.capture {
                w.signal();
            }
            if let Some(w) = &workers.timer {
                w.signal();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_clamps_into_bounds() {
        let bounds = ExposureBounds {
            min_s: 0.1,
            max_s: 10.0,
        };
        let r = ExposureRequest::new(0.001, bounds, false);
        assert_eq!(r.clamped_s, 0.1);
        assert!(r.was_clamped());
        assert_eq!(ExposureRequest::new(20.0, bounds, false).clamped_s, 10.0);
        let ok = ExposureRequest::new(2.5, bounds, true);
        assert_eq!(ok.clamped_s, 2.5);
        assert!(!ok.was_clamped());
    }

    #[test]
    fn begin_only_from_idle() {
        let (tx, mut rx) = broadcast::channel(8);
        let cell = StateCell::new(tx);
        cell.begin(AcquisitionState::StreamingActive).unwrap();
        assert!(matches!(
            cell.begin(AcquisitionState::ExposureStarting),
            Err(CameraError::Busy(_))
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(AcquisitionEvent::StateChanged(AcquisitionState::StreamingActive))
        ));
        cell.set(AcquisitionState::Idle);
        assert!(cell.get().is_idle());
    }

    #[test]
    fn tracker_ignores_reports_after_download() {
        let t = ExposureTracker::default();
        t.start(5.0);
        assert!(t.report(3.0));
        assert_eq!(t.left_s(), 3.0);
        t.downloaded();
        assert!(!t.report(1.0));
        assert_eq!(t.left_s(), 0.0);
        t.finish();
        assert!(!t.in_exposure());
    }

    #[test]
    fn finish_clears_time_left() {
        let t = ExposureTracker::default();
        t.start(10.0);
        assert!(t.report(9.0));
        t.finish();
        assert_eq!(t.left_s(), 0.0);
        assert!(!t.report(8.0));
        assert_eq!(t.left_s(), 0.0);
    }

    #[test]
    fn sleep_returns_early_on_quit() {
        let quit = AtomicBool::new(true);
        let start = Instant::now();
        assert!(!sleep_unless_quit(&quit, Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        let quit = AtomicBool::new(false);
        assert!(sleep_unless_quit(&quit, Duration::from_millis(5)));
    }
}
