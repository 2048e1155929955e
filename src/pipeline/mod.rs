//! Frame pipeline orchestration
//!
//! Owns the acquisition loop, the display throttle, the bounded
//! recognition queue and worker, and the shutdown sequence. Acquisition
//! never blocks on recognition; a saturated queue drops work instead.

pub mod events;
pub mod queue;
mod worker;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::capture::backend::{BackendError, CameraBackend};
use crate::capture::frame::NormalizedImage;
use crate::capture::normalize::{self, DemosaicMethod, PixelConvert};
use crate::pipeline::events::{emit, EventSender, PipelineEvent};
use crate::pipeline::queue::RecognitionQueue;
use crate::pipeline::worker::RecognitionWorker;
use crate::recognize::CodeDetector;
use crate::storage::CodeStore;
use crate::Config;

/// Pipeline lifecycle
///
/// `Stopped` is terminal: restarting takes a fresh pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Acquiring,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline can only be started once")]
    AlreadyStarted,
    #[error("backend failed to start acquisition: {0}")]
    StartFailed(#[from] BackendError),
    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Core orchestrator: acquisition, display throttling, recognition
pub struct FramePipeline {
    config: Config,
    backend: Arc<Mutex<dyn CameraBackend>>,
    converter: Arc<dyn PixelConvert>,
    detector: Option<Box<dyn CodeDetector>>,
    store: Arc<CodeStore>,
    queue: Arc<RecognitionQueue>,
    events: EventSender,
    state: Arc<Mutex<PipelineState>>,
    running: Arc<AtomicBool>,
    acquisition_thread: Option<(JoinHandle<()>, flume::Receiver<()>)>,
    worker_thread: Option<(JoinHandle<()>, flume::Receiver<()>)>,
    cleaned_up: bool,
}

impl FramePipeline {
    pub fn new(
        config: Config,
        backend: Arc<Mutex<dyn CameraBackend>>,
        converter: Arc<dyn PixelConvert>,
        detector: Box<dyn CodeDetector>,
        events: EventSender,
    ) -> Self {
        let store = Arc::new(CodeStore::open(&config.storage));
        let queue = Arc::new(RecognitionQueue::new(config.pipeline.queue_capacity));
        Self {
            config,
            backend,
            converter,
            detector: Some(detector),
            store,
            queue,
            events,
            state: Arc::new(Mutex::new(PipelineState::Idle)),
            running: Arc::new(AtomicBool::new(false)),
            acquisition_thread: None,
            worker_thread: None,
            cleaned_up: false,
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Dedup store handle, for inspection and export
    pub fn store(&self) -> Arc<CodeStore> {
        Arc::clone(&self.store)
    }

    /// Launch the recognition worker, start backend acquisition, and enter
    /// the frame loop. Any failure releases partially acquired resources
    /// and leaves the pipeline in `Stopped`.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state != PipelineState::Idle {
                return Err(PipelineError::AlreadyStarted);
            }
            *state = PipelineState::Acquiring;
        }
        let detector = self.detector.take().ok_or(PipelineError::AlreadyStarted)?;

        emit(
            &self.events,
            PipelineEvent::Status("starting frame acquisition".into()),
        );
        self.running.store(true, Ordering::Release);

        // Worker first, so queued frames always have a consumer
        let recognition = RecognitionWorker {
            queue: Arc::clone(&self.queue),
            detector,
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            running: Arc::clone(&self.running),
            dequeue_timeout: self.config.pipeline.dequeue_timeout(),
        };
        self.worker_thread = Some(Self::spawn("argus-recognition", move || recognition.run())?);

        let started = self
            .backend
            .lock()
            .expect("backend lock poisoned")
            .start_acquisition();
        if let Err(e) = started {
            error!(error = %e, "failed to start acquisition");
            emit(
                &self.events,
                PipelineEvent::FatalError(format!("failed to start acquisition: {e}")),
            );
            self.running.store(false, Ordering::Release);
            self.shutdown();
            return Err(PipelineError::StartFailed(e));
        }

        let acquisition = AcquisitionLoop {
            backend: Arc::clone(&self.backend),
            converter: Arc::clone(&self.converter),
            demosaic: self.config.acquisition.demosaic,
            frame_timeout: self.config.acquisition.frame_timeout(),
            backoff_threshold: self.config.acquisition.backoff_threshold,
            backoff_max: Duration::from_millis(self.config.acquisition.backoff_max_ms),
            running: Arc::clone(&self.running),
            handler: FrameHandler::new(
                &self.config.pipeline,
                Arc::clone(&self.queue),
                self.events.clone(),
            ),
        };
        match Self::spawn("argus-acquisition", move || acquisition.run()) {
            Ok(handle) => self.acquisition_thread = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::Release);
                self.shutdown();
                return Err(e);
            }
        }

        *self.state.lock().expect("state lock poisoned") = PipelineState::Running;
        emit(
            &self.events,
            PipelineEvent::Status("frame acquisition started".into()),
        );
        info!("pipeline running");
        Ok(())
    }

    /// Request shutdown and release all device-level resources
    ///
    /// Safe to call in any state and idempotent. Cooperative only: threads
    /// are joined with a bounded timeout and abandoned with a warning if
    /// they fail to exit; device cleanup still runs afterwards.
    pub fn stop(&mut self) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                PipelineState::Stopped | PipelineState::Stopping => return,
                PipelineState::Idle => {
                    *state = PipelineState::Stopped;
                    return;
                }
                _ => *state = PipelineState::Stopping,
            }
        }
        info!("stop requested");
        self.running.store(false, Ordering::Release);
        self.shutdown();
    }

    /// Cleanup path shared by `stop()` and failed `start()`. Always ends in
    /// `Stopped` with acquisition stopped exactly once.
    fn shutdown(&mut self) {
        let timeout = self.config.pipeline.join_timeout();
        if let Some((handle, done)) = self.acquisition_thread.take() {
            Self::join_bounded("acquisition", handle, done, timeout);
        }
        if let Some((handle, done)) = self.worker_thread.take() {
            Self::join_bounded("recognition", handle, done, timeout);
        }

        if !self.cleaned_up {
            self.cleaned_up = true;
            match self.backend.lock() {
                Ok(mut backend) => {
                    if let Err(e) = backend.stop_acquisition() {
                        warn!(error = %e, "stop acquisition failed");
                    }
                }
                Err(_) => warn!("backend lock poisoned during cleanup"),
            }
            emit(
                &self.events,
                PipelineEvent::Status("acquisition stopped".into()),
            );
        }

        *self.state.lock().expect("state lock poisoned") = PipelineState::Stopped;
        info!("pipeline stopped");
    }

    fn spawn(
        name: &str,
        body: impl FnOnce() + Send + 'static,
    ) -> Result<(JoinHandle<()>, flume::Receiver<()>), PipelineError> {
        // The sender is dropped when the thread body returns, which is what
        // makes the bounded join below observable
        let (done_tx, done_rx) = flume::bounded::<()>(1);
        let handle = thread::Builder::new().name(name.into()).spawn(move || {
            let _done = done_tx;
            body();
        })?;
        Ok((handle, done_rx))
    }

    fn join_bounded(
        name: &str,
        handle: JoinHandle<()>,
        done: flume::Receiver<()>,
        timeout: Duration,
    ) {
        match done.recv_timeout(timeout) {
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!(thread = name, "pipeline thread panicked");
                }
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                // Abandon rather than block shutdown indefinitely
                warn!(thread = name, ?timeout, "thread did not exit in time, abandoning");
            }
        }
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Acquisition loop: pull, normalize, release, hand off
struct AcquisitionLoop {
    backend: Arc<Mutex<dyn CameraBackend>>,
    converter: Arc<dyn PixelConvert>,
    demosaic: DemosaicMethod,
    frame_timeout: Duration,
    backoff_threshold: u32,
    backoff_max: Duration,
    running: Arc<AtomicBool>,
    handler: FrameHandler,
}

impl AcquisitionLoop {
    fn run(mut self) {
        info!("acquisition loop started");
        let mut consecutive_failures = 0u32;

        while self.running.load(Ordering::Acquire) {
            let grabbed = {
                let mut backend = self.backend.lock().expect("backend lock poisoned");
                backend.get_frame(self.frame_timeout)
            };

            match grabbed {
                Ok(frame) => {
                    consecutive_failures = 0;
                    let normalized = normalize::normalize(&frame, &*self.converter, self.demosaic);
                    // Hand the driver its buffer back before anything else
                    // happens with the image, on success and failure alike
                    let released = self
                        .backend
                        .lock()
                        .expect("backend lock poisoned")
                        .release_frame(frame);
                    if let Err(e) = released {
                        warn!(error = %e, "frame release failed");
                    }

                    match normalized {
                        Ok(image) => self.handler.process(image),
                        Err(e) => debug!(error = %e, "frame conversion failed, skipping"),
                    }
                }
                Err(e) if e.is_timeout() => {
                    trace!("frame wait timed out");
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(error = %e, consecutive_failures, "frame acquisition error");
                    if consecutive_failures >= self.backoff_threshold {
                        let shift = (consecutive_failures - self.backoff_threshold).min(6);
                        let delay =
                            Duration::from_millis(10u64 << shift).min(self.backoff_max);
                        thread::sleep(delay);
                    }
                }
            }
        }
        info!("acquisition loop exiting");
    }
}

/// Per-frame handling, agnostic of which thread delivers frames
///
/// Works the same whether frames arrive from the internal loop or from a
/// backend callback context: everything it touches is owned or behind the
/// queue/event channels.
struct FrameHandler {
    queue: Arc<RecognitionQueue>,
    events: EventSender,
    display_interval: u64,
    recognition_interval: u64,
    frame_count: u64,
    fps_window: VecDeque<Instant>,
    fps_capacity: usize,
    last_rate_emit: Instant,
}

impl FrameHandler {
    fn new(config: &crate::PipelineConfig, queue: Arc<RecognitionQueue>, events: EventSender) -> Self {
        Self {
            queue,
            events,
            display_interval: config.display_interval.max(1) as u64,
            recognition_interval: config.recognition_interval.max(1) as u64,
            frame_count: 0,
            fps_window: VecDeque::with_capacity(config.fps_window.max(2)),
            fps_capacity: config.fps_window.max(2),
            last_rate_emit: Instant::now(),
        }
    }

    fn process(&mut self, image: NormalizedImage) {
        self.frame_count += 1;

        // Display decimation; emission order matches arrival order
        if self.frame_count % self.display_interval == 0 {
            emit(&self.events, PipelineEvent::Display(image.clone()));
        }

        // Independent, coarser recognition decimation. Queue-full is
        // backpressure, not an error.
        if self.frame_count % self.recognition_interval == 0 && !self.queue.try_enqueue(image) {
            debug!("recognition queue full, frame dropped");
        }

        self.track_rate();
    }

    /// Sliding-window frame-rate estimate, published about once a second
    fn track_rate(&mut self) {
        let now = Instant::now();
        self.fps_window.push_back(now);
        if self.fps_window.len() > self.fps_capacity {
            self.fps_window.pop_front();
        }
        if self.fps_window.len() < 2 || now - self.last_rate_emit < Duration::from_secs(1) {
            return;
        }
        let span = now - self.fps_window[0];
        if !span.is_zero() {
            let fps = (self.fps_window.len() - 1) as f64 / span.as_secs_f64();
            emit(&self.events, PipelineEvent::FrameRate(fps));
        }
        self.last_rate_emit = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineConfig;
    use bytes::Bytes;

    fn image() -> NormalizedImage {
        NormalizedImage {
            data: Bytes::from(vec![0u8; 3]),
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn decimation_counters_are_independent() {
        let config = PipelineConfig {
            display_interval: 2,
            recognition_interval: 3,
            queue_capacity: 8,
            ..PipelineConfig::default()
        };
        let queue = Arc::new(RecognitionQueue::new(config.queue_capacity));
        let (tx, rx) = events::channel();
        let mut handler = FrameHandler::new(&config, Arc::clone(&queue), tx);

        for _ in 0..6 {
            handler.process(image());
        }

        let displays = rx
            .drain()
            .filter(|e| matches!(e, PipelineEvent::Display(_)))
            .count();
        assert_eq!(displays, 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn queue_full_does_not_stall_display() {
        let config = PipelineConfig {
            display_interval: 1,
            recognition_interval: 1,
            queue_capacity: 2,
            ..PipelineConfig::default()
        };
        let queue = Arc::new(RecognitionQueue::new(config.queue_capacity));
        let (tx, rx) = events::channel();
        let mut handler = FrameHandler::new(&config, Arc::clone(&queue), tx);

        for _ in 0..5 {
            handler.process(image());
        }

        // Queue saturated at 2, but every frame still reached the display path
        let displays = rx
            .drain()
            .filter(|e| matches!(e, PipelineEvent::Display(_)))
            .count();
        assert_eq!(displays, 5);
        assert_eq!(queue.len(), 2);
    }
}
