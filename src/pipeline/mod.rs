//! Frame transport, shared controls and the processing loop

pub mod channel;
pub mod control;
pub mod processing;
pub mod stats;
pub mod worker;

use flume::{Receiver, Sender, TrySendError};
use tracing::trace;

use crate::capture::frame::Frame;
pub use channel::{Admission, ChannelRegistry, FrameChannel, OverflowPolicy};
pub use control::{ControlCell, ProcessingFlags, ProcessingSettings};
pub use processing::ProcessingWorker;
pub use stats::{RateTracker, ThreadStatistics};

/// Notifications a worker loop sends to the consumer.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A processed frame, with the pre-pipeline frame when requested
    Frame {
        processed: Frame,
        original: Option<Frame>,
    },
    Statistics(ThreadStatistics),
    /// Running count of frames handed to the recorder
    FramesWritten(u64),
    /// A playback source ran out of frames and the loop stopped
    EndOfStream,
}

/// Non-blocking event outlet. When the queue is full a per-frame event is
/// dropped, while a terminal event evicts the oldest queued one so the
/// consumer always sees it. A worker never waits on its consumer.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<WorkerEvent>,
    /// Our own handle on the queue head, used only for eviction
    rx: Receiver<WorkerEvent>,
}

impl EventSender {
    /// Bounded queue and its receiving end.
    pub fn bounded(capacity: usize) -> (Self, Receiver<WorkerEvent>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (
            Self {
                tx,
                rx: rx.clone(),
            },
            rx,
        )
    }

    pub fn send(&self, event: WorkerEvent) {
        let mut event = event;
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) if rejected.is_terminal() => {
                    if let Ok(evicted) = self.rx.try_recv() {
                        metrics::counter!("events_dropped").increment(1);
                        trace!("Event queue full, evicted {}", evicted.kind());
                    }
                    event = rejected;
                }
                Err(TrySendError::Full(rejected)) => {
                    metrics::counter!("events_dropped").increment(1);
                    trace!("Event queue full, dropped {}", rejected.kind());
                    return;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

impl WorkerEvent {
    /// Events that must reach the consumer even when it lags.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerEvent::EndOfStream)
    }

    fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::Frame { .. } => "frame",
            WorkerEvent::Statistics(_) => "statistics",
            WorkerEvent::FramesWritten(_) => "frames-written",
            WorkerEvent::EndOfStream => "end-of-stream",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (events, rx) = EventSender::bounded(1);
        events.send(WorkerEvent::FramesWritten(1));
        events.send(WorkerEvent::FramesWritten(2));
        assert!(matches!(rx.try_recv(), Ok(WorkerEvent::FramesWritten(1))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn end_of_stream_survives_a_full_queue() {
        let (events, rx) = EventSender::bounded(2);
        events.send(WorkerEvent::FramesWritten(1));
        events.send(WorkerEvent::FramesWritten(2));
        events.send(WorkerEvent::EndOfStream);

        let queued: Vec<WorkerEvent> = rx.try_iter().collect();
        assert_eq!(queued.len(), 2);
        assert!(matches!(queued[0], WorkerEvent::FramesWritten(2)));
        assert!(matches!(queued[1], WorkerEvent::EndOfStream));
    }

    #[test]
    fn disconnected_consumer_is_ignored() {
        let (events, rx) = EventSender::bounded(4);
        drop(rx);
        events.send(WorkerEvent::EndOfStream);
    }
}
