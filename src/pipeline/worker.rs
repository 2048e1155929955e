//! Recognition worker thread
//!
//! Drains the recognition queue, runs the detector, records first
//! sightings in the dedup store, and publishes detection/result events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::capture::frame::NormalizedImage;
use crate::pipeline::events::{emit, EventSender, PipelineEvent};
use crate::pipeline::queue::RecognitionQueue;
use crate::recognize::CodeDetector;
use crate::storage::CodeStore;

pub(crate) struct RecognitionWorker {
    pub queue: Arc<RecognitionQueue>,
    pub detector: Box<dyn CodeDetector>,
    pub store: Arc<CodeStore>,
    pub events: EventSender,
    pub running: Arc<AtomicBool>,
    pub dequeue_timeout: Duration,
}

impl RecognitionWorker {
    /// Run until the stop flag clears. Blocks only on the timed dequeue.
    pub fn run(mut self) {
        info!("recognition worker started");
        while self.running.load(Ordering::Acquire) {
            let Some(image) = self.queue.dequeue(self.dequeue_timeout) else {
                // Timeout: loop around and re-check the stop flag
                continue;
            };
            self.process(&image);
        }
        info!("recognition worker exiting");
    }

    /// One frame, fully isolated: a failing detector or store logs and
    /// moves on, it never terminates the loop
    fn process(&mut self, image: &NormalizedImage) {
        let detections = match self.detector.detect(image) {
            Ok(detections) => detections,
            Err(e) => {
                warn!(error = %e, "detector failed, frame skipped");
                return;
            }
        };

        if !detections.is_empty() {
            let mut any_new = false;
            let mut batch = Vec::with_capacity(detections.len());
            for det in &detections {
                if self.store.add(&det.text, det.kind) {
                    any_new = true;
                }
                batch.push(det.tagged_text());
            }
            if any_new {
                emit(&self.events, PipelineEvent::NewCodes(batch.join(", ")));
            }
        }

        // Published regardless of dedup outcome so the presentation layer
        // can keep drawing overlays for already-seen codes
        emit(&self.events, PipelineEvent::Detections(detections));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::events;
    use crate::recognize::{CodeKind, Detection};
    use crate::StorageConfig;
    use bytes::Bytes;
    use color_eyre::Result;
    use tempfile::TempDir;

    struct FixedDetector(Vec<Detection>);

    impl CodeDetector for FixedDetector {
        fn detect(&mut self, _image: &NormalizedImage) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    fn image() -> NormalizedImage {
        NormalizedImage {
            data: Bytes::from(vec![0u8; 12]),
            width: 2,
            height: 2,
        }
    }

    fn detection(text: &str) -> Detection {
        Detection {
            kind: CodeKind::Qr,
            text: text.into(),
            boundary: vec![(0, 0), (4, 0), (4, 4), (0, 4)],
        }
    }

    fn worker(dir: &TempDir, detector: Box<dyn CodeDetector>) -> (RecognitionWorker, events::EventReceiver) {
        let (tx, rx) = events::channel();
        let store = Arc::new(CodeStore::open(&StorageConfig {
            path: dir.path().join("codes.json"),
            max_entries: 100,
            max_file_size: 1024 * 1024,
        }));
        let worker = RecognitionWorker {
            queue: Arc::new(RecognitionQueue::new(2)),
            detector,
            store,
            events: tx,
            running: Arc::new(AtomicBool::new(true)),
            dequeue_timeout: Duration::from_millis(10),
        };
        (worker, rx)
    }

    #[test]
    fn new_codes_published_once_detections_always() {
        let dir = TempDir::new().unwrap();
        let (mut w, rx) = worker(&dir, Box::new(FixedDetector(vec![detection("ABC123")])));

        w.process(&image());
        w.process(&image());

        let events: Vec<PipelineEvent> = rx.drain().collect();
        let new_codes: Vec<&PipelineEvent> = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::NewCodes(_)))
            .collect();
        let detections = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Detections(_)))
            .count();

        assert_eq!(new_codes.len(), 1);
        match new_codes[0] {
            PipelineEvent::NewCodes(batch) => assert_eq!(batch, "QR:ABC123"),
            _ => unreachable!(),
        }
        assert_eq!(detections, 2);
        assert_eq!(w.store.len(), 1);
    }

    #[test]
    fn empty_detection_list_still_publishes() {
        let dir = TempDir::new().unwrap();
        let (mut w, rx) = worker(&dir, Box::new(FixedDetector(Vec::new())));

        w.process(&image());

        let events: Vec<PipelineEvent> = rx.drain().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], PipelineEvent::Detections(d) if d.is_empty()));
    }

    #[test]
    fn detector_error_does_not_kill_processing() {
        struct Exploding;
        impl CodeDetector for Exploding {
            fn detect(&mut self, _image: &NormalizedImage) -> Result<Vec<Detection>> {
                Err(color_eyre::eyre::eyre!("decoder blew up"))
            }
        }

        let dir = TempDir::new().unwrap();
        let (mut w, rx) = worker(&dir, Box::new(Exploding));
        w.process(&image());
        assert!(rx.drain().next().is_none());
        assert!(w.store.is_empty());
    }
}
