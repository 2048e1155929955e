//! Device backend boundary
//!
//! Mirrors the vendor SDK surface the pipeline consumes: start/stop
//! acquisition, timed frame wait, explicit buffer release. Device
//! enumeration and handle lifecycle live outside this boundary, so
//! implementations receive an already-opened device.

use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::capture::frame::{PixelFormat, RawFrame};

/// Backend status code convention: zero is success, anything else is a
/// backend-specific failure.
pub type StatusCode = i32;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("timed out waiting for a frame")]
    Timeout,
    #[error("backend call failed with status {0}")]
    Status(StatusCode),
}

impl BackendError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout)
    }
}

/// Frame acquisition backend
///
/// The pipeline calls this from its acquisition thread only; `Send` is
/// required so the backend can move there.
pub trait CameraBackend: Send {
    fn start_acquisition(&mut self) -> Result<(), BackendError>;

    fn stop_acquisition(&mut self) -> Result<(), BackendError>;

    /// Wait up to `timeout` for the next frame. The returned frame owns a
    /// driver buffer slot and must come back through [`release_frame`].
    ///
    /// [`release_frame`]: CameraBackend::release_frame
    fn get_frame(&mut self, timeout: Duration) -> Result<RawFrame, BackendError>;

    fn release_frame(&mut self, frame: RawFrame) -> Result<(), BackendError>;
}

/// Backend that synthesizes a scrolling test pattern
///
/// Stands in for real hardware when none is attached: the demo binary and
/// the integration tests run the full pipeline against it.
pub struct SyntheticBackend {
    width: u32,
    height: u32,
    format: PixelFormat,
    interval: Duration,
    grabbing: bool,
    next_id: u64,
    outstanding: u64,
}

impl SyntheticBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Mono8,
            interval: Duration::from_millis(33),
            grabbing: false,
            next_id: 0,
            outstanding: 0,
        }
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Buffer slots currently held by the acquisition path
    pub fn outstanding(&self) -> u64 {
        self.outstanding
    }
}

impl CameraBackend for SyntheticBackend {
    fn start_acquisition(&mut self) -> Result<(), BackendError> {
        if self.grabbing {
            return Err(BackendError::Status(-1));
        }
        self.grabbing = true;
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<(), BackendError> {
        self.grabbing = false;
        Ok(())
    }

    fn get_frame(&mut self, timeout: Duration) -> Result<RawFrame, BackendError> {
        if !self.grabbing {
            return Err(BackendError::Status(-2));
        }
        // Pace frame delivery like a real sensor would
        thread::sleep(self.interval.min(timeout));

        let bpp = self.format.bytes_per_pixel();
        let len = self.width as usize * self.height as usize * bpp;
        let phase = self.next_id as usize;
        let mut data = vec![0u8; len];
        for (i, px) in data.iter_mut().enumerate() {
            *px = ((i / bpp + phase) & 0xff) as u8;
        }

        self.next_id += 1;
        self.outstanding += 1;
        Ok(RawFrame {
            id: self.next_id,
            width: self.width,
            height: self.height,
            format: self.format,
            data,
        })
    }

    fn release_frame(&mut self, _frame: RawFrame) -> Result<(), BackendError> {
        self.outstanding = self.outstanding.saturating_sub(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_backend_requires_grabbing() {
        let mut backend = SyntheticBackend::new(4, 4).with_interval(Duration::ZERO);
        assert!(backend.get_frame(Duration::from_millis(1)).is_err());

        backend.start_acquisition().unwrap();
        let frame = backend.get_frame(Duration::from_millis(1)).unwrap();
        assert_eq!(frame.len(), 16);
        assert_eq!(backend.outstanding(), 1);

        backend.release_frame(frame).unwrap();
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn synthetic_backend_restart_is_rejected() {
        let mut backend = SyntheticBackend::new(4, 4);
        backend.start_acquisition().unwrap();
        assert!(backend.start_acquisition().is_err());
        backend.stop_acquisition().unwrap();
    }
}
