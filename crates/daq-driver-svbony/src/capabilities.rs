//! Capability traits
//!
//! Small async traits a host can program against without naming
//! [`SvbonyDriver`](crate::SvbonyDriver):
//!
//! - every camera implements `ExposureControl + FrameProducer`
//! - cooled models add `TemperatureControl`
//! - models with an ST4 port add `GuidePort`
//!
//! Each trait is `Send + Sync`, async via `#[async_trait]` and reports errors
//! as `anyhow::Result`.

use crate::components::controls::SwitchOutcome;
use crate::components::lifecycle::GuideOutcome;
use crate::components::sdk::GuideDirection;
use crate::components::temperature::{SetTemperatureOutcome, TemperatureState};
use crate::frame::Frame;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capability: timed single exposures
///
/// # Contract
/// - Durations are in seconds
/// - Out-of-range durations are clamped, never rejected
/// - Completion is reported asynchronously on the event channel
#[async_trait]
pub trait ExposureControl: Send + Sync {
    /// Start one exposure. Returns the duration actually used.
    async fn start_exposure(&self, seconds: f64) -> Result<f64>;

    /// Cancel the exposure in progress and reset the camera.
    async fn abort_exposure(&self) -> Result<()>;

    /// Seconds left in the current exposure, 0 when idle.
    fn exposure_left(&self) -> f64;
}

/// Capability: continuous frames
#[async_trait]
pub trait FrameProducer: Send + Sync {
    async fn start_stream(&self) -> Result<()>;

    async fn stop_stream(&self) -> Result<()>;

    /// Full sensor resolution (width, height)
    fn resolution(&self) -> (u32, u32);

    fn is_streaming(&self) -> bool;

    /// Frames delivered since the last stream start
    fn frame_count(&self) -> u64;

    /// Lossless frame consumer. Takes effect at the next stream start.
    async fn register_reliable_output(&self, tx: mpsc::Sender<Arc<Frame>>) -> Result<()>;
}

/// Capability: sensor cooling
#[async_trait]
pub trait TemperatureControl: Send + Sync {
    async fn set_temperature(&self, celsius: f64) -> Result<SetTemperatureOutcome>;

    async fn set_cooler(&self, enabled: bool) -> Result<SwitchOutcome>;

    async fn temperature(&self) -> Result<TemperatureState>;
}

/// Capability: ST4 pulse guiding
#[async_trait]
pub trait GuidePort: Send + Sync {
    async fn pulse_guide(&self, direction: GuideDirection, duration_ms: u32) -> Result<GuideOutcome>;
}
