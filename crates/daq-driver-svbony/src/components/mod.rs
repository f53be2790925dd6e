//! Driver components
//!
//! - `sdk`: vendor SDK seam and the per-camera handle
//! - `controls`: control discovery and switches
//! - `geometry`: ROI, binning, output format and the frame buffer
//! - `acquisition`: exposures, streaming, abort
//! - `temperature`: cooler regulation
//! - `lifecycle`: connect/disconnect, model quirks, naming

pub mod acquisition;
pub mod controls;
pub mod geometry;
#[cfg(feature = "svb_sdk")]
pub mod hardware;
pub mod lifecycle;
#[cfg(feature = "mock")]
pub mod mock;
pub mod processing;
pub mod sdk;
pub mod temperature;
