//! Argus: industrial camera code-scanning pipeline
//!
//! Pulls frames from an imaging backend, normalizes them to interleaved RGB,
//! throttles a display stream, and decodes QR/barcodes on a bounded
//! background path while deduplicating and persisting every first sighting.
//!
//! Acquisition and display never block on recognition: the recognition queue
//! drops work under pressure instead of stalling the producer.

pub mod capture;
pub mod pipeline;
pub mod recognize;
pub mod storage;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::normalize::DemosaicMethod;

pub use capture::frame::{NormalizedImage, PixelFormat, RawFrame};
pub use pipeline::events::{EventReceiver, EventSender, PipelineEvent};
pub use pipeline::{FramePipeline, PipelineState};
pub use recognize::{CodeKind, Detection};

/// System configuration
///
/// Constructed once and handed by value to the pipeline; components receive
/// the slices they need. There is deliberately no process-global instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub acquisition: AcquisitionConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Timeout for a single backend frame wait
    pub frame_timeout_ms: u64,
    /// Demosaic selector forwarded to the external pixel converter
    pub demosaic: DemosaicMethod,
    /// Consecutive non-timeout backend failures before backoff kicks in
    pub backoff_threshold: u32,
    /// Upper bound on the backoff delay
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Emit every Nth normalized frame to the display stream (1 = all)
    pub display_interval: u32,
    /// Hand every Nth normalized frame to recognition
    pub recognition_interval: u32,
    /// Recognition queue depth; 2 is the validated operating point
    pub queue_capacity: usize,
    /// Frames in the sliding frame-rate window
    pub fps_window: usize,
    /// Worker dequeue timeout, bounds how often the stop flag is re-checked
    pub dequeue_timeout_ms: u64,
    /// How long `stop()` waits for each pipeline thread before abandoning it
    pub join_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backing JSON snapshot for recognized codes
    pub path: PathBuf,
    /// Maximum entries kept in the dedup cache
    pub max_entries: usize,
    /// Snapshot size above which only the most recent entries are loaded
    pub max_file_size: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            frame_timeout_ms: 1000,
            demosaic: DemosaicMethod::Bilinear,
            backoff_threshold: 5,
            backoff_max_ms: 500,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            display_interval: 1,
            recognition_interval: 10,
            queue_capacity: 2,
            fps_window: 30,
            dequeue_timeout_ms: 500,
            join_timeout_ms: 2000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("recognized_codes.json"),
            max_entries: 10_000,
            max_file_size: 100 * 1024 * 1024,
        }
    }
}

impl AcquisitionConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl PipelineConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl Config {
    /// Load configuration from an optional TOML file, filling missing keys
    /// with defaults.
    pub fn load(name: &str) -> color_eyre::Result<Self> {
        let raw = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .build()?;
        Ok(raw.try_deserialize()?)
    }
}
