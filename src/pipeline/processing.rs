//! Processing loop: channel → ROI crop → stages → recorder → events

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::channel::FrameChannel;
use super::control::{ControlCell, ProcessingFlags, ProcessingSettings};
use super::stats::{RateTracker, ThreadStatistics};
use super::worker::WorkerThread;
use super::{EventSender, WorkerEvent};
use crate::capture::frame::{Frame, Roi};
use crate::capture::source::SourceGeometry;
use crate::error::{Error, Result};
use crate::record::{Recorder, SinkSpec};
use crate::stages::Pipeline;

/// State a caller shares with a loop that runs the pipeline. Used by both
/// the processing loop and playback.
pub struct ProcessingShared {
    pub control: ControlCell,
    pub recorder: Recorder,
    emit_original: AtomicBool,
    reset_background: AtomicBool,
    stats: Mutex<ThreadStatistics>,
}

impl ProcessingShared {
    pub fn new(control: ControlCell, recorder: Recorder) -> Self {
        Self {
            control,
            recorder,
            emit_original: AtomicBool::new(false),
            reset_background: AtomicBool::new(false),
            stats: Mutex::new(ThreadStatistics::default()),
        }
    }

    pub fn set_emit_original(&self, enabled: bool) {
        self.emit_original.store(enabled, Ordering::Release);
    }

    pub fn emit_original(&self) -> bool {
        self.emit_original.load(Ordering::Acquire)
    }

    /// Ask the owning loop for a fresh background model.
    pub fn request_background_reset(&self) {
        self.reset_background.store(true, Ordering::Release);
    }

    pub fn statistics(&self) -> ThreadStatistics {
        *self.stats.lock()
    }

    pub(crate) fn publish_statistics(&self, stats: ThreadStatistics, events: &EventSender) {
        *self.stats.lock() = stats;
        events.send(WorkerEvent::Statistics(stats));
    }

    /// Open the recorder for the current ROI. `fallback_fps` is used while
    /// no rate has been measured yet.
    pub fn start_record(
        &self,
        path: &Path,
        codec: &str,
        capture_original: bool,
        fallback_fps: f64,
    ) -> Result<()> {
        let (Some(roi), Some(geometry)) = (self.control.roi(), self.control.geometry()) else {
            return Err(Error::SinkOpen("no source connected".into()));
        };
        let snapshot = self.control.snapshot();
        let measured = self.statistics().average_fps;
        let fps = if measured > 0.0 {
            measured
        } else if snapshot.settings.framerate > 0.0 {
            snapshot.settings.framerate
        } else {
            fallback_fps
        };
        let spec = SinkSpec {
            path: path.to_path_buf(),
            codec: codec.to_string(),
            fps,
            width: if capture_original { roi.width * 2 } else { roi.width },
            height: roi.height,
            is_color: recording_is_color(&snapshot.flags, geometry),
        };
        self.recorder.start(spec, capture_original)
    }

    /// Close the recorder. Returns the frames written.
    pub fn stop_record(&self) -> u64 {
        self.recorder.stop().unwrap_or(0)
    }

    /// Run one frame through crop, stages, recorder and event emission.
    /// Returns false when the frame was skipped before the stages ran.
    pub(crate) fn process(
        &self,
        pipeline: &mut Pipeline,
        frame: Frame,
        events: &EventSender,
    ) -> bool {
        if self.reset_background.swap(false, Ordering::AcqRel) {
            debug!("Background model reset");
            pipeline.reset_background();
        }
        let snapshot = self.control.snapshot();

        let mut current = match snapshot.roi {
            Some(roi) => match frame.crop(&roi) {
                Ok(cropped) => cropped,
                Err(e) => {
                    debug!("Skipping frame {}: {e}", frame.sequence);
                    return false;
                }
            },
            None => frame,
        };

        let emit_original = self.emit_original();
        let keep_original = emit_original || self.recorder.is_side_by_side();
        let original = keep_original.then(|| current.clone());

        let started = Instant::now();
        pipeline.run(&mut current, &snapshot.flags, &snapshot.settings);
        metrics::histogram!("pipeline_time_us").record(started.elapsed().as_micros() as f64);

        match self.recorder.write(&current, original.as_ref()) {
            Ok(Some(written)) => events.send(WorkerEvent::FramesWritten(written)),
            Ok(None) => {}
            Err(e) => warn!("Recording frame {} failed: {e}", current.sequence),
        }

        events.send(WorkerEvent::Frame {
            processed: current,
            original: if emit_original { original } else { None },
        });
        true
    }
}

/// Gray when the grayscale stage is on or the source itself is gray.
pub fn recording_is_color(flags: &ProcessingFlags, geometry: SourceGeometry) -> bool {
    !flags.grayscale && geometry.channels != 1
}

/// Options for a processing loop.
#[derive(Debug, Clone)]
pub struct ProcessingOptions {
    pub stat_window: usize,
    /// Recording rate before any rate has been measured
    pub fallback_fps: f64,
    pub codec: String,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            stat_window: super::stats::DEFAULT_STAT_WINDOW,
            fallback_fps: 30.0,
            codec: crate::record::DEFAULT_CODEC.to_string(),
        }
    }
}

/// Consumes one source's channel on its own thread.
pub struct ProcessingWorker {
    source_id: String,
    channel: Arc<FrameChannel>,
    shared: Arc<ProcessingShared>,
    events: EventSender,
    options: ProcessingOptions,
    thread: Option<WorkerThread>,
}

impl ProcessingWorker {
    pub fn new(
        channel: Arc<FrameChannel>,
        shared: Arc<ProcessingShared>,
        events: EventSender,
        options: ProcessingOptions,
    ) -> Self {
        Self {
            source_id: channel.source_id().to_string(),
            channel,
            shared,
            events,
            options,
            thread: None,
        }
    }

    pub fn shared(&self) -> &Arc<ProcessingShared> {
        &self.shared
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(WorkerThread::is_running)
    }

    /// Start consuming frames from a source of the given geometry.
    pub fn start(&mut self, geometry: SourceGeometry) -> Result<()> {
        self.stop();
        self.shared.control.set_geometry(geometry);

        let channel = Arc::clone(&self.channel);
        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let window = self.options.stat_window;
        let source_id = self.source_id.clone();
        let thread = WorkerThread::spawn(&format!("process-{}", self.source_id), move |stop| {
            run(&source_id, &channel, &shared, &events, window, &stop)
        })?;
        self.thread = Some(thread);
        Ok(())
    }

    /// Stop the loop and wait for it. A loop blocked on an empty channel is
    /// woken first.
    pub fn stop(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            thread.request_stop();
            self.channel.wake_all();
            thread.join();
        }
    }

    /// Apply a new ROI. Frames already buffered are discarded.
    pub fn set_roi(&self, roi: Roi) -> Result<()> {
        self.shared.control.set_roi(roi)?;
        let dropped = self.channel.clear();
        debug!("ROI change discarded {dropped} buffered frames");
        Ok(())
    }

    pub fn set_flags(&self, flags: ProcessingFlags) {
        self.shared.control.set_flags(flags);
    }

    pub fn set_settings(&self, settings: ProcessingSettings) -> Result<()> {
        self.shared.control.set_settings(settings)
    }

    pub fn set_emit_original(&self, enabled: bool) {
        self.shared.set_emit_original(enabled);
    }

    pub fn reset_background(&self) {
        self.shared.request_background_reset();
    }

    pub fn start_record(&self, path: &Path, capture_original: bool) -> Result<()> {
        self.shared.start_record(
            path,
            &self.options.codec,
            capture_original,
            self.options.fallback_fps,
        )
    }

    pub fn stop_record(&self) -> u64 {
        self.shared.stop_record()
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recorder.is_recording()
    }

    pub fn statistics(&self) -> ThreadStatistics {
        self.shared.statistics()
    }
}

impl Drop for ProcessingWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    source_id: &str,
    channel: &FrameChannel,
    shared: &ProcessingShared,
    events: &EventSender,
    window: usize,
    stop: &AtomicBool,
) {
    info!("Processing {source_id}");
    let mut pipeline = Pipeline::new();
    let mut rate = RateTracker::new(window);

    while !stop.load(Ordering::Acquire) {
        // None means we were woken, re-check the flag
        let Some(frame) = channel.pop_unless(stop) else {
            continue;
        };
        if !shared.process(&mut pipeline, frame, events) {
            continue;
        }

        rate.tick(Instant::now());
        rate.frame_done();
        shared.publish_statistics(rate.snapshot(), events);
    }
    info!("Processing {source_id} stopped after {} frames", rate.snapshot().frames_processed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::channel::OverflowPolicy;
    use crate::record::MemorySink;
    use std::time::Duration;

    fn geometry() -> SourceGeometry {
        SourceGeometry {
            width: 8,
            height: 6,
            channels: 3,
        }
    }

    fn worker(channel: &Arc<FrameChannel>, sink: &MemorySink) -> (ProcessingWorker, flume::Receiver<WorkerEvent>) {
        let sink = sink.clone();
        let recorder = Recorder::new(Box::new(move || Box::new(sink.clone())));
        let shared = Arc::new(ProcessingShared::new(ControlCell::default(), recorder));
        let (events, rx) = EventSender::bounded(256);
        let worker = ProcessingWorker::new(Arc::clone(channel), shared, events, ProcessingOptions::default());
        (worker, rx)
    }

    fn next_frame(rx: &flume::Receiver<WorkerEvent>) -> (Frame, Option<Frame>) {
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).expect("no frame event") {
                WorkerEvent::Frame { processed, original } => return (processed, original),
                _ => continue,
            }
        }
    }

    #[test]
    fn stop_wakes_idle_loop() {
        let channel = Arc::new(FrameChannel::new("idle", 4, OverflowPolicy::DropOldest).unwrap());
        let (mut worker, _rx) = worker(&channel, &MemorySink::new());
        worker.start(geometry()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        worker.stop();
        assert!(!worker.is_running());
    }

    #[test]
    fn frames_are_cropped_to_roi() {
        let channel = Arc::new(FrameChannel::new("roi", 4, OverflowPolicy::DropOldest).unwrap());
        let (mut worker, rx) = worker(&channel, &MemorySink::new());
        worker.start(geometry()).unwrap();
        worker.set_roi(Roi::new(2, 1, 4, 3)).unwrap();
        worker.set_emit_original(true);

        channel.push(Frame::new(8, 6, 3));
        let (processed, original) = next_frame(&rx);
        assert_eq!((processed.width, processed.height), (4, 3));
        assert_eq!(original.map(|f| f.width), Some(4));
        worker.stop();
        assert_eq!(worker.statistics().frames_processed, 1);
    }

    #[test]
    fn roi_change_discards_buffered_frames() {
        let channel = Arc::new(FrameChannel::new("stale", 4, OverflowPolicy::DropOldest).unwrap());
        let (mut worker, rx) = worker(&channel, &MemorySink::new());
        worker.start(geometry()).unwrap();
        worker.stop();

        for _ in 0..3 {
            channel.push(Frame::new(8, 6, 3));
        }
        worker.set_roi(Roi::new(2, 1, 4, 3)).unwrap();
        assert!(channel.is_empty());

        channel.push(Frame::new(8, 6, 3));
        let frame = channel.try_pop().unwrap();
        assert!(worker.shared().process(&mut Pipeline::new(), frame, &worker.events));
        let (processed, _) = next_frame(&rx);
        assert_eq!((processed.width, processed.height), (4, 3));
    }

    #[test]
    fn skipped_frames_are_not_counted() {
        let channel = Arc::new(FrameChannel::new("skip", 4, OverflowPolicy::DropOldest).unwrap());
        let (mut worker, rx) = worker(&channel, &MemorySink::new());
        worker.start(geometry()).unwrap();
        worker.set_roi(Roi::new(2, 1, 4, 3)).unwrap();

        // Too small for the ROI, so the crop fails
        channel.push(Frame::new(3, 3, 3).with_sequence(1));
        channel.push(Frame::new(8, 6, 3).with_sequence(2));
        let (processed, _) = next_frame(&rx);
        assert_eq!(processed.sequence, 2);
        worker.stop();
        assert_eq!(worker.statistics().frames_processed, 1);
    }

    #[test]
    fn roi_outside_source_is_rejected() {
        let channel = Arc::new(FrameChannel::new("bad-roi", 4, OverflowPolicy::DropOldest).unwrap());
        let (mut worker, _rx) = worker(&channel, &MemorySink::new());
        worker.start(geometry()).unwrap();
        assert!(matches!(
            worker.set_roi(Roi::new(4, 0, 8, 6)),
            Err(Error::InvalidRoi { .. })
        ));
        assert_eq!(worker.shared().control.roi(), Some(Roi::full(8, 6)));
    }

    #[test]
    fn side_by_side_recording_of_gray_output() {
        let channel = Arc::new(FrameChannel::new("rec", 4, OverflowPolicy::DropOldest).unwrap());
        let sink = MemorySink::new();
        let (mut worker, rx) = worker(&channel, &sink);
        worker.set_flags(ProcessingFlags {
            grayscale: true,
            ..Default::default()
        });
        worker.start(geometry()).unwrap();
        worker.start_record(Path::new("unused"), true).unwrap();

        channel.push(Frame::from_raw(8, 6, 3, vec![120; 8 * 6 * 3]).unwrap());
        next_frame(&rx);
        worker.stop();

        let written = sink.frames();
        assert_eq!(written.len(), 1);
        assert_eq!((written[0].width, written[0].height, written[0].channels), (16, 6, 1));
        assert_eq!(worker.stop_record(), 1);
        assert!(!worker.is_recording());
    }

    #[test]
    fn record_without_source_fails() {
        let channel = Arc::new(FrameChannel::new("none", 4, OverflowPolicy::DropOldest).unwrap());
        let (worker, _rx) = worker(&channel, &MemorySink::new());
        assert!(matches!(
            worker.start_record(Path::new("unused"), false),
            Err(Error::SinkOpen(_))
        ));
    }
}
