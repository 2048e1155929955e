//! Argus code-scanning pipeline demo
//!
//! Runs the full pipeline against the synthetic backend and logs published
//! events until Ctrl-C. Swap in a real `CameraBackend` to scan hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use argus::capture::backend::SyntheticBackend;
use argus::capture::normalize::NearestDemosaic;
use argus::pipeline::events;
use argus::recognize::QrDetector;
use argus::{Config, FramePipeline, PipelineEvent};
use color_eyre::Result;
use tracing::{debug, error, info};

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "argus=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Argus launching...");

    let config = Config::load("argus")?;

    let backend = Arc::new(Mutex::new(SyntheticBackend::new(640, 480)));
    let (tx, rx) = events::channel();
    let mut pipeline = FramePipeline::new(
        config,
        backend,
        Arc::new(NearestDemosaic),
        Box::new(QrDetector),
        tx,
    );
    pipeline.start()?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::Release))?;
    }

    let mut display_frames = 0u64;
    while !interrupted.load(Ordering::Acquire) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(PipelineEvent::Display(image)) => {
                display_frames += 1;
                if display_frames % 100 == 0 {
                    debug!(
                        display_frames,
                        width = image.width,
                        height = image.height,
                        "display stream"
                    );
                }
            }
            Ok(PipelineEvent::FrameRate(fps)) => info!(fps, "capture rate"),
            Ok(PipelineEvent::NewCodes(batch)) => info!(%batch, "new codes"),
            Ok(PipelineEvent::Detections(detections)) => {
                debug!(count = detections.len(), "detections")
            }
            Ok(PipelineEvent::Status(msg)) => info!(%msg),
            Ok(PipelineEvent::FatalError(msg)) => {
                error!(%msg);
                break;
            }
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    pipeline.stop();
    info!(codes = pipeline.store().len(), "Argus shutting down");
    Ok(())
}
