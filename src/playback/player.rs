use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, instrument, warn};

use super::pacing::{compute_wait, frame_at, frame_interval, nominal_fps};
use super::PlaybackState;
use crate::capture::frame::Roi;
use crate::capture::source::{ReadOutcome, Source, SourceGeometry, SourceProperty};
use crate::error::{Error, Result};
use crate::pipeline::control::{ProcessingFlags, ProcessingSettings};
use crate::pipeline::processing::ProcessingShared;
use crate::pipeline::stats::{RateTracker, ThreadStatistics, DEFAULT_STAT_WINDOW};
use crate::pipeline::{EventSender, WorkerEvent};
use crate::record::DEFAULT_CODEC;
use crate::stages::Pipeline;

#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// Play at this rate instead of the source's own
    pub fps_override: Option<f64>,
    pub looping: bool,
    pub stat_window: usize,
    pub codec: String,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            fps_override: None,
            looping: false,
            stat_window: DEFAULT_STAT_WINDOW,
            codec: DEFAULT_CODEC.to_string(),
        }
    }
}

struct Transport {
    state: PlaybackState,
    seek: Option<u64>,
}

struct PlayerShared {
    processing: ProcessingShared,
    transport: Mutex<Transport>,
    /// Interrupts the pacing wait
    wake: Condvar,
    /// Index of the next frame to be read
    position: AtomicU64,
    looping: AtomicBool,
}

impl PlayerShared {
    fn state(&self) -> PlaybackState {
        self.transport.lock().state
    }

    fn transition(&self, state: PlaybackState) {
        let mut transport = self.transport.lock();
        transport.state = state;
        transport.seek = None;
        self.wake.notify_all();
    }
}

/// Everything the loop thread owns while playing. Handed back on exit.
struct Session {
    source: Box<dyn Source>,
    pipeline: Pipeline,
    rate: RateTracker,
}

/// Plays a seekable source on its own thread.
///
/// The source lives with the loop thread while playing and comes back to the
/// player when the thread exits, so pausing, seeking while paused and
/// stopping never race the loop for the device.
pub struct Player {
    identifier: String,
    options: PlayerOptions,
    shared: Arc<PlayerShared>,
    events: EventSender,
    session: Option<Session>,
    thread: Option<JoinHandle<Session>>,
    fps: f64,
    frame_count: Option<u64>,
}

impl Player {
    pub fn new(
        source: Box<dyn Source>,
        identifier: impl Into<String>,
        processing: ProcessingShared,
        events: EventSender,
        options: PlayerOptions,
    ) -> Self {
        let session = Session {
            source,
            pipeline: Pipeline::new(),
            rate: RateTracker::new(options.stat_window),
        };
        Self {
            identifier: identifier.into(),
            shared: Arc::new(PlayerShared {
                processing,
                transport: Mutex::new(Transport {
                    state: PlaybackState::Stopped,
                    seek: None,
                }),
                wake: Condvar::new(),
                position: AtomicU64::new(0),
                looping: AtomicBool::new(options.looping),
            }),
            options,
            events,
            session: Some(session),
            thread: None,
            fps: nominal_fps(None, None),
            frame_count: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    /// Index of the next frame to be shown.
    pub fn position(&self) -> u64 {
        self.shared.position.load(Ordering::Acquire)
    }

    pub fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    pub fn nominal_fps(&self) -> f64 {
        self.fps
    }

    pub fn processing(&self) -> &ProcessingShared {
        &self.shared.processing
    }

    /// Open the source and learn its geometry, rate and length. Playback
    /// stays stopped at frame 0.
    #[instrument(skip(self), fields(identifier = %self.identifier))]
    pub fn open(&mut self) -> Result<SourceGeometry> {
        self.stop();
        self.open_source()
    }

    fn open_source(&mut self) -> Result<SourceGeometry> {
        let session = self.session.as_mut().ok_or(Error::SourceClosed)?;
        let source = &mut session.source;
        source.open(&self.identifier)?;

        let first = match source.read_frame() {
            Ok(ReadOutcome::Frame(frame)) => frame,
            Ok(ReadOutcome::EndOfStream) => {
                source.release();
                return Err(Error::SourceOpen(format!("{}: no frames", self.identifier)));
            }
            Err(e) => {
                source.release();
                return Err(e);
            }
        };
        if source.set_property(SourceProperty::PosFrames, 0.0).is_err() {
            source.release();
            source.open(&self.identifier)?;
        }

        let geometry = SourceGeometry {
            width: first.width,
            height: first.height,
            channels: first.channels,
        };
        self.fps = nominal_fps(self.options.fps_override, source.property(SourceProperty::Fps));
        self.frame_count = source
            .property(SourceProperty::FrameCount)
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n as u64);
        self.shared.position.store(0, Ordering::Release);

        let control = &self.shared.processing.control;
        if control.geometry() != Some(geometry) {
            control.set_geometry(geometry);
        }
        info!(
            "Opened {}: {}x{}x{}, {:.2} fps, {:?} frames",
            self.identifier, geometry.width, geometry.height, geometry.channels, self.fps, self.frame_count
        );
        Ok(geometry)
    }

    /// Start or resume. A no-op while playing.
    pub fn play(&mut self) -> Result<()> {
        self.reap();
        match self.state() {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Paused => {}
            PlaybackState::Stopped => {
                let opened = self.session.as_ref().is_some_and(|s| s.source.is_opened());
                if !opened {
                    self.open_source()?;
                }
                let session = self.session.as_mut().ok_or(Error::SourceClosed)?;
                if let Err(e) = session.source.set_property(SourceProperty::PosFrames, 0.0) {
                    debug!("Rewind before play: {e}");
                }
                session.rate.reset();
                self.shared.position.store(0, Ordering::Release);
            }
        }

        let session = self.session.take().ok_or(Error::SourceClosed)?;
        self.shared.transition(PlaybackState::Playing);

        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let interval = frame_interval(self.fps);
        let frame_count = self.frame_count;
        let spawned = thread::Builder::new()
            .name(format!("playback-{}", self.identifier))
            .spawn(move || run(session, &shared, &events, interval, frame_count));
        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                info!("Playing {} from frame {}", self.identifier, self.position());
                Ok(())
            }
            Err(e) => {
                self.shared.transition(PlaybackState::Stopped);
                Err(Error::Spawn(e))
            }
        }
    }

    /// Only valid while playing. The loop exits without advancing.
    pub fn pause(&mut self) -> Result<()> {
        self.reap();
        let state = self.state();
        if state != PlaybackState::Playing {
            return Err(Error::InvalidState {
                operation: "pause",
                state,
            });
        }
        self.shared.transition(PlaybackState::Paused);
        self.join();
        info!("Paused {} at frame {}", self.identifier, self.position());
        Ok(())
    }

    /// Stop from any state: position back to 0, source released.
    pub fn stop(&mut self) {
        self.shared.transition(PlaybackState::Stopped);
        self.join();
        if let Some(session) = self.session.as_mut() {
            session.source.release();
            session.rate.set_frames(0);
            self.shared
                .processing
                .publish_statistics(session.rate.snapshot(), &self.events);
        }
        self.shared.position.store(0, Ordering::Release);
    }

    /// Reposition to frame `index`. Paused playback stays paused; a playing
    /// loop restarts its pacing clock.
    pub fn seek(&mut self, index: u64) -> Result<()> {
        self.reap();
        let state = self.state();
        if state == PlaybackState::Stopped {
            return Err(Error::InvalidState {
                operation: "seek",
                state,
            });
        }
        if let Some(total) = self.frame_count {
            if index >= total {
                return Err(Error::InvalidSeek { index, total });
            }
        }

        match state {
            PlaybackState::Paused => {
                let session = self.session.as_mut().ok_or(Error::SourceClosed)?;
                session.source.set_property(SourceProperty::PosFrames, index as f64)?;
                self.shared.position.store(index, Ordering::Release);
            }
            _ => {
                let mut transport = self.shared.transport.lock();
                transport.seek = Some(index);
                self.shared.wake.notify_all();
            }
        }
        debug!("Seek to frame {index}");
        Ok(())
    }

    /// Seek by time, converted with the nominal rate.
    pub fn seek_time(&mut self, msec: f64) -> Result<()> {
        self.seek(frame_at(msec, self.fps))
    }

    pub fn set_looping(&self, looping: bool) {
        self.shared.looping.store(looping, Ordering::Release);
    }

    pub fn is_looping(&self) -> bool {
        self.shared.looping.load(Ordering::Acquire)
    }

    pub fn set_flags(&self, flags: ProcessingFlags) {
        self.shared.processing.control.set_flags(flags);
    }

    pub fn set_settings(&self, settings: ProcessingSettings) -> Result<()> {
        self.shared.processing.control.set_settings(settings)
    }

    pub fn set_roi(&self, roi: Roi) -> Result<()> {
        self.shared.processing.control.set_roi(roi)
    }

    pub fn set_emit_original(&self, enabled: bool) {
        self.shared.processing.set_emit_original(enabled);
    }

    pub fn reset_background(&self) {
        self.shared.processing.request_background_reset();
    }

    pub fn start_record(&self, path: &Path, capture_original: bool) -> Result<()> {
        self.shared
            .processing
            .start_record(path, &self.options.codec, capture_original, self.fps)
    }

    pub fn stop_record(&self) -> u64 {
        self.shared.processing.stop_record()
    }

    pub fn is_recording(&self) -> bool {
        self.shared.processing.recorder.is_recording()
    }

    pub fn statistics(&self) -> ThreadStatistics {
        self.shared.processing.statistics()
    }

    /// Collect a loop that ended on its own. A loop that left `Playing` is
    /// on its way out, so joining it is bounded.
    fn reap(&mut self) {
        let Some(handle) = self.thread.as_ref() else {
            return;
        };
        if handle.is_finished() || self.state() != PlaybackState::Playing {
            self.join();
        }
    }

    fn join(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        match handle.join() {
            Ok(session) => self.session = Some(session),
            Err(_) => {
                error!("Playback of {} panicked, source lost", self.identifier);
                self.shared.transition(PlaybackState::Stopped);
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut session: Session,
    shared: &PlayerShared,
    events: &EventSender,
    interval: Duration,
    frame_count: Option<u64>,
) -> Session {
    session.rate.restart_clock();

    loop {
        let seek = {
            let mut transport = shared.transport.lock();
            if transport.state != PlaybackState::Playing {
                break;
            }
            transport.seek.take()
        };
        if let Some(index) = seek {
            match session.source.set_property(SourceProperty::PosFrames, index as f64) {
                Ok(()) => {
                    shared.position.store(index, Ordering::Release);
                    session.rate.restart_clock();
                }
                Err(e) => warn!("Seek to frame {index} failed: {e}"),
            }
        }

        let started = Instant::now();
        let position = shared.position.load(Ordering::Acquire);
        let outcome = if frame_count.is_some_and(|total| position >= total) {
            Ok(ReadOutcome::EndOfStream)
        } else {
            session.source.read_frame()
        };

        match outcome {
            Ok(ReadOutcome::Frame(frame)) => {
                shared.position.store(position + 1, Ordering::Release);
                if shared.processing.process(&mut session.pipeline, frame, events) {
                    session.rate.tick(Instant::now());
                    session.rate.frame_done();
                    shared.processing.publish_statistics(session.rate.snapshot(), events);
                }
            }
            Ok(ReadOutcome::EndOfStream) => {
                if rewind_for_loop(&mut session, shared) {
                    continue;
                }
                end_of_stream(&mut session, shared, events);
                break;
            }
            Err(e) => {
                error!("Playback read failed: {e}");
                {
                    let mut transport = shared.transport.lock();
                    if transport.state == PlaybackState::Playing {
                        transport.state = PlaybackState::Stopped;
                    }
                }
                shared.position.store(0, Ordering::Release);
                session.source.release();
                break;
            }
        }

        let deadline = Instant::now() + compute_wait(interval, started.elapsed());
        let mut transport = shared.transport.lock();
        while transport.state == PlaybackState::Playing && transport.seek.is_none() {
            if shared.wake.wait_until(&mut transport, deadline).timed_out() {
                break;
            }
        }
    }
    session
}

fn rewind_for_loop(session: &mut Session, shared: &PlayerShared) -> bool {
    // Nothing read since the last rewind: looping would spin
    if !shared.looping.load(Ordering::Acquire) || shared.position.load(Ordering::Acquire) == 0 {
        return false;
    }
    match session.source.set_property(SourceProperty::PosFrames, 0.0) {
        Ok(()) => {
            debug!("Looping back to frame 0");
            shared.position.store(0, Ordering::Release);
            session.rate.restart_clock();
            true
        }
        Err(e) => {
            warn!("Cannot rewind for looping: {e}");
            false
        }
    }
}

fn end_of_stream(session: &mut Session, shared: &PlayerShared, events: &EventSender) {
    {
        let mut transport = shared.transport.lock();
        if transport.state == PlaybackState::Playing {
            transport.state = PlaybackState::Stopped;
        }
        transport.seek = None;
    }
    info!(
        "End of stream after {} frames",
        session.rate.snapshot().frames_processed
    );
    shared.position.store(0, Ordering::Release);
    session.source.release();
    session.rate.set_frames(0);
    shared.processing.publish_statistics(session.rate.snapshot(), events);
    events.send(WorkerEvent::EndOfStream);
}
