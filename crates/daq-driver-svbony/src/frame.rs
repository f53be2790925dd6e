//! Frames delivered by exposures and streaming.

use crate::components::sdk::BayerPattern;
use std::time::SystemTime;

/// Colour layout of the delivered pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Mono,
    Bayer(BayerPattern),
}

impl PixelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Mono => "MONO",
            PixelFormat::Bayer(p) => p.as_str(),
        }
    }
}

/// Control values in effect when the frame was taken.
///
/// Colour-only fields are `None` on mono sensors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameMetadata {
    pub gain: Option<i64>,
    pub contrast: Option<i64>,
    pub sharpness: Option<i64>,
    pub gamma: Option<i64>,
    pub offset: Option<i64>,
    pub saturation: Option<i64>,
    pub wb_red: Option<i64>,
    pub wb_green: Option<i64>,
    pub wb_blue: Option<i64>,
    /// Frame speed switch index (0 slow, 1 normal, 2 fast)
    pub frame_speed: u8,
    /// Bit shift applied by the stretch pass
    pub stretch_shift: u8,
}

/// One post-processed image.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width after binning
    pub width: u32,
    /// Height after binning
    pub height: u32,
    /// 8 or 16
    pub bit_depth: u32,
    pub bin: u32,
    pub pixel_format: PixelFormat,
    /// Exposure actually used, in seconds
    pub exposure_s: f64,
    /// Streaming sequence number, 0 for single exposures
    pub frame_number: u64,
    pub timestamp: SystemTime,
    /// Little-endian samples
    pub data: Vec<u8>,
    pub metadata: Option<FrameMetadata>,
}

impl Frame {
    pub fn bytes_per_pixel(&self) -> usize {
        if self.bit_depth > 8 {
            2
        } else {
            1
        }
    }

    /// Sample at (x, y), widened to u16.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.bytes_per_pixel();
        let idx = (y as usize * self.width as usize + x as usize) * bpp;
        match bpp {
            1 => self.data.get(idx).map(|v| *v as u16),
            _ => self
                .data
                .get(idx..idx + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]])),
        }
    }

    pub fn samples_u16(&self) -> Vec<u16> {
        match self.bytes_per_pixel() {
            1 => self.data.iter().map(|v| *v as u16).collect(),
            _ => self
                .data
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect(),
        }
    }
}
