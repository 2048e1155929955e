//! Bounded handoff between acquisition and recognition

use std::time::Duration;

use crate::capture::frame::NormalizedImage;

/// Fixed-capacity FIFO between the acquisition path and the recognition
/// worker
///
/// Capacity 2 is the validated operating point: recognition is the slow
/// path, so deeper queues only add latency without improving throughput.
/// A full queue rejects the producer's own frame rather than displacing a
/// queued one, and never blocks.
pub struct RecognitionQueue {
    tx: flume::Sender<NormalizedImage>,
    rx: flume::Receiver<NormalizedImage>,
}

impl RecognitionQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Non-blocking enqueue; `false` means full and the caller drops its
    /// image. This is the backpressure mechanism that keeps acquisition
    /// from ever stalling on recognition.
    pub fn try_enqueue(&self, image: NormalizedImage) -> bool {
        self.tx.try_send(image).is_ok()
    }

    /// Blocking dequeue with timeout, so the consumer can re-check its stop
    /// flag periodically instead of parking forever
    pub fn dequeue(&self, timeout: Duration) -> Option<NormalizedImage> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
