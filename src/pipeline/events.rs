//! Events published to the presentation layer

use tracing::trace;

use crate::capture::frame::NormalizedImage;
use crate::recognize::Detection;

/// Pipeline output stream
///
/// Display events preserve frame arrival order. Recognition events are not
/// 1:1 with display frames and may lag behind the currently displayed one.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Throttled display frame
    Display(NormalizedImage),
    /// Sliding-window frame-rate estimate
    FrameRate(f64),
    /// Full detection list of one recognized frame, for overlay drawing
    Detections(Vec<Detection>),
    /// Comma-separated `KIND:text` batch, emitted only when at least one
    /// code was newly stored
    NewCodes(String),
    Status(String),
    FatalError(String),
}

pub type EventSender = flume::Sender<PipelineEvent>;
pub type EventReceiver = flume::Receiver<PipelineEvent>;

/// Unbounded so a slow consumer can never stall acquisition or recognition
pub fn channel() -> (EventSender, EventReceiver) {
    flume::unbounded()
}

/// Publish without caring whether the consumer is still around
pub(crate) fn emit(tx: &EventSender, event: PipelineEvent) {
    if tx.send(event).is_err() {
        trace!("event receiver dropped");
    }
}
