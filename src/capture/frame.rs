use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Raw frame handle as delivered by the device backend
///
/// Owns the driver buffer slot identified by `id` until it is handed back
/// through [`CameraBackend::release_frame`]. Deliberately not `Clone`:
/// every delivered frame is released exactly once, on every code path.
///
/// [`CameraBackend::release_frame`]: crate::capture::backend::CameraBackend::release_frame
pub struct RawFrame {
    /// Driver buffer slot identifier
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Pixel formats the device can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Rgb8,
    Bgr8,
    BayerRg8,
    BayerGb8,
    BayerGr8,
    BayerBg8,
}

impl PixelFormat {
    /// Bytes per pixel as delivered by the device
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Mono8
            | PixelFormat::BayerRg8
            | PixelFormat::BayerGb8
            | PixelFormat::BayerGr8
            | PixelFormat::BayerBg8 => 1,
        }
    }
}

/// Canonical interleaved RGB image, independently owned
///
/// Produced by the normalizer after the driver buffer has been released, so
/// it can be freely shared. Cloning is cheap: `Bytes` is reference counted,
/// which is what lets the display path and the recognition queue share one
/// conversion result.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

impl NormalizedImage {
    /// Interleaved RGB, fixed at three channels
    pub const CHANNELS: usize = 3;

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}
