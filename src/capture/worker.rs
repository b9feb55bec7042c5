//! Capture loop: one thread per live source feeding its frame channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::frame::Frame;
use super::source::{ReadOutcome, Source, SourceGeometry};
use crate::error::{Error, Result};
use crate::pipeline::channel::{Admission, FrameChannel};
use crate::pipeline::stats::{RateTracker, ThreadStatistics, DEFAULT_STAT_WINDOW};
use crate::pipeline::worker::WorkerThread;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    #[default]
    Disconnected,
    Connecting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    /// Pin the capture thread to this CPU
    pub pin_core: Option<usize>,
    pub stat_window: usize,
}

#[derive(Default)]
struct CaptureShared {
    state: Mutex<CaptureState>,
    stats: Mutex<ThreadStatistics>,
}

impl CaptureShared {
    fn set_state(&self, state: CaptureState) {
        *self.state.lock() = state;
    }

    fn state(&self) -> CaptureState {
        *self.state.lock()
    }
}

/// Owns a live source while connected. Dropping the worker stops it.
pub struct CaptureWorker {
    channel: Arc<FrameChannel>,
    options: CaptureOptions,
    shared: Arc<CaptureShared>,
    geometry: Option<SourceGeometry>,
    thread: Option<WorkerThread>,
}

impl CaptureWorker {
    pub fn new(channel: Arc<FrameChannel>, options: CaptureOptions) -> Self {
        Self {
            channel,
            options,
            shared: Arc::default(),
            geometry: None,
            thread: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.shared.state()
    }

    /// Frame size and channel count of the connected source.
    pub fn geometry(&self) -> Option<SourceGeometry> {
        self.geometry
    }

    pub fn statistics(&self) -> ThreadStatistics {
        *self.shared.stats.lock()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(WorkerThread::is_running)
    }

    /// Open `source` and start the loop. The first frame is read here to fix
    /// the geometry; the loop pushes it before reading on.
    #[instrument(skip(self, source))]
    pub fn connect(&mut self, mut source: Box<dyn Source>, identifier: &str) -> Result<SourceGeometry> {
        self.stop();
        self.shared.set_state(CaptureState::Connecting);

        let first = match source.open(identifier).and_then(|()| source.read_frame()) {
            Ok(ReadOutcome::Frame(frame)) => frame,
            Ok(ReadOutcome::EndOfStream) => {
                source.release();
                self.shared.set_state(CaptureState::Disconnected);
                return Err(Error::SourceOpen(format!("{identifier}: no frames")));
            }
            Err(e) => {
                source.release();
                self.shared.set_state(CaptureState::Disconnected);
                return Err(e);
            }
        };
        let geometry = SourceGeometry {
            width: first.width,
            height: first.height,
            channels: first.channels,
        };
        info!(
            "Connected {identifier}: {}x{}x{}",
            geometry.width, geometry.height, geometry.channels
        );
        self.geometry = Some(geometry);

        let channel = Arc::clone(&self.channel);
        let shared = Arc::clone(&self.shared);
        let options = self.options.clone();
        let name = format!("capture-{}", self.channel.source_id());
        shared.set_state(CaptureState::Running);
        let spawned = WorkerThread::spawn(&name, move |stop| {
            run(source, first, &channel, &shared, &options, &stop)
        });
        match spawned {
            Ok(thread) => {
                self.thread = Some(thread);
                Ok(geometry)
            }
            Err(e) => {
                self.shared.set_state(CaptureState::Disconnected);
                self.geometry = None;
                Err(e)
            }
        }
    }

    /// Stop the loop and wait for the device to be released. A producer
    /// blocked on a full channel is woken first.
    pub fn stop(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            if thread.is_running() {
                self.shared.set_state(CaptureState::Stopping);
            }
            thread.request_stop();
            self.channel.wake_all();
            thread.join();
        }
        self.shared.set_state(CaptureState::Disconnected);
        self.geometry = None;
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pin_to_core(core: usize) {
    let found = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == core));
    match found {
        Some(id) if core_affinity::set_for_current(id) => debug!("Capture pinned to core {core}"),
        Some(_) => warn!("Could not pin capture to core {core}"),
        None => warn!("Core {core} does not exist, capture not pinned"),
    }
}

fn run(
    mut source: Box<dyn Source>,
    first: Frame,
    channel: &FrameChannel,
    shared: &CaptureShared,
    options: &CaptureOptions,
    stop: &AtomicBool,
) {
    if let Some(core) = options.pin_core {
        pin_to_core(core);
    }
    let window = if options.stat_window == 0 {
        DEFAULT_STAT_WINDOW
    } else {
        options.stat_window
    };
    let mut rate = RateTracker::new(window);
    rate.tick(Instant::now());

    let mut interrupted = channel.push_unless(first, stop) == Admission::Interrupted;
    while !interrupted && !stop.load(Ordering::Acquire) {
        let frame = match source.read_frame() {
            Ok(ReadOutcome::Frame(frame)) => frame,
            Ok(ReadOutcome::EndOfStream) => {
                warn!("Live source {} ended", channel.source_id());
                break;
            }
            Err(e) => {
                error!("Capture from {} failed: {e}", channel.source_id());
                break;
            }
        };
        rate.tick(Instant::now());
        rate.frame_done();
        *shared.stats.lock() = rate.snapshot();

        interrupted = channel.push_unless(frame, stop) == Admission::Interrupted;
    }

    source.release();
    shared.set_state(CaptureState::Disconnected);
    info!(
        "Capture from {} ended after {} frames",
        channel.source_id(),
        rate.snapshot().frames_processed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pattern::PatternSource;
    use crate::pipeline::channel::OverflowPolicy;
    use std::time::Duration;

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn connect_reports_geometry_and_fills_channel() {
        let channel = Arc::new(FrameChannel::new("cam", 4, OverflowPolicy::DropOldest).unwrap());
        let mut worker = CaptureWorker::new(Arc::clone(&channel), CaptureOptions::default());
        let geometry = worker
            .connect(Box::new(PatternSource::new(16, 8, 200.0)), "pattern")
            .unwrap();

        assert_eq!(
            geometry,
            SourceGeometry {
                width: 16,
                height: 8,
                channels: 3
            }
        );
        assert_eq!(worker.state(), CaptureState::Running);
        wait_for(|| channel.is_full());
        worker.stop();
        assert_eq!(worker.state(), CaptureState::Disconnected);
        assert!(worker.geometry().is_none());
    }

    #[test]
    fn read_failure_ends_loop_and_keeps_frames() {
        let channel = Arc::new(FrameChannel::new("flaky", 8, OverflowPolicy::DropOldest).unwrap());
        let mut worker = CaptureWorker::new(Arc::clone(&channel), CaptureOptions::default());
        worker
            .connect(Box::new(PatternSource::new(8, 8, 0.0).failing_after(3)), "pattern")
            .unwrap();

        wait_for(|| worker.state() == CaptureState::Disconnected);
        assert_eq!(channel.size(), 3);
        assert_eq!(worker.statistics().frames_processed, 2);
    }

    #[test]
    fn stop_releases_blocked_producer() {
        let channel = Arc::new(FrameChannel::new("slow", 1, OverflowPolicy::Block).unwrap());
        let mut worker = CaptureWorker::new(Arc::clone(&channel), CaptureOptions::default());
        worker
            .connect(Box::new(PatternSource::new(8, 8, 0.0)), "pattern")
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        worker.stop();
        assert_eq!(channel.size(), 1);
        assert!(!worker.is_running());
    }

    #[test]
    fn open_failure_leaves_worker_disconnected() {
        let channel = Arc::new(FrameChannel::new("bad", 2, OverflowPolicy::DropOldest).unwrap());
        let mut worker = CaptureWorker::new(channel, CaptureOptions::default());
        let result = worker.connect(Box::new(PatternSource::new(0, 0, 30.0)), "pattern");
        assert!(matches!(result, Err(Error::SourceOpen(_))));
        assert_eq!(worker.state(), CaptureState::Disconnected);
    }
}
