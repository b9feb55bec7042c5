//! A live source wired end to end: channel, capture loop, processing loop

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::capture::source::{Source, SourceGeometry};
use crate::capture::worker::{CaptureOptions, CaptureState, CaptureWorker};
use crate::error::Result;
use crate::pipeline::channel::{ChannelRegistry, FrameChannel};
use crate::pipeline::control::ControlCell;
use crate::pipeline::processing::{ProcessingOptions, ProcessingShared, ProcessingWorker};
use crate::pipeline::stats::ThreadStatistics;
use crate::pipeline::EventSender;
use crate::record::Recorder;
use crate::Config;

/// Capture and processing for one source. The channel is registered on
/// connect and removed when the session is dropped.
pub struct LiveSession {
    source_id: String,
    registry: Arc<ChannelRegistry>,
    channel: Arc<FrameChannel>,
    capture: CaptureWorker,
    processing: ProcessingWorker,
}

impl LiveSession {
    /// Register a channel for `source_id`, open the source and start both
    /// loops.
    pub fn connect(
        registry: Arc<ChannelRegistry>,
        source_id: &str,
        source: Box<dyn Source>,
        control: ControlCell,
        recorder: Recorder,
        events: EventSender,
        config: &Config,
    ) -> Result<Self> {
        let channel = registry.add(
            source_id,
            config.pipeline.channel_capacity,
            config.pipeline.overflow,
        )?;
        let mut capture = CaptureWorker::new(
            Arc::clone(&channel),
            CaptureOptions {
                pin_core: config.capture.pin_core,
                stat_window: config.pipeline.stat_window,
            },
        );
        let shared = Arc::new(ProcessingShared::new(control, recorder));
        shared.set_emit_original(config.pipeline.emit_original);
        let mut processing = ProcessingWorker::new(
            Arc::clone(&channel),
            shared,
            events,
            ProcessingOptions {
                stat_window: config.pipeline.stat_window,
                fallback_fps: config.record.fallback_fps,
                codec: config.record.codec.clone(),
            },
        );

        let started = capture
            .connect(source, source_id)
            .and_then(|geometry| processing.start(geometry));
        if let Err(e) = started {
            registry.remove(source_id);
            return Err(e);
        }
        info!("Live session {source_id} up");
        Ok(Self {
            source_id: source_id.to_string(),
            registry,
            channel,
            capture,
            processing,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn channel(&self) -> &Arc<FrameChannel> {
        &self.channel
    }

    pub fn processing(&self) -> &ProcessingWorker {
        &self.processing
    }

    pub fn geometry(&self) -> Option<SourceGeometry> {
        self.capture.geometry()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn capture_statistics(&self) -> ThreadStatistics {
        self.capture.statistics()
    }

    pub fn processing_statistics(&self) -> ThreadStatistics {
        self.processing.statistics()
    }

    pub fn start_record(&self, path: &Path, capture_original: bool) -> Result<()> {
        self.processing.start_record(path, capture_original)
    }

    pub fn stop_record(&self) -> u64 {
        self.processing.stop_record()
    }

    /// Stop both loops and unregister the channel.
    pub fn disconnect(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.capture.stop();
        self.processing.stop();
        self.processing.shared().control.clear_geometry();
        if self.registry.remove(&self.source_id).is_some() {
            info!("Live session {} down", self.source_id);
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
