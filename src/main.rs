//! opencap: headless capture, processing and playback

use std::path::{Path, PathBuf};
use std::sync::Arc;

use color_eyre::Result;
use flume::Receiver;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::EnvFilter;

use opencap::capture::{ImageSequenceSource, PatternSource, Source};
use opencap::pipeline::{ChannelRegistry, ControlCell, EventSender, WorkerEvent};
use opencap::playback::{Player, PlayerOptions};
use opencap::record::Recorder;
use opencap::session::LiveSession;
use opencap::{CaptureConfig, Config, SourceKind};

/// Statistics are logged once per this many frames
const STATS_EVERY: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("opencap=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("opencap launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    opencap::CONFIG.store(Arc::new(config.clone()));

    let (events, rx) = EventSender::bounded(config.pipeline.event_capacity);
    let control = ControlCell::new(config.processing.flags, config.processing.settings)?;
    let recorder = Recorder::image_sequence();

    match config.playback.path.clone() {
        Some(path) => play_file(&path, &config, control, recorder, events, rx).await?,
        None => run_live(&config, control, recorder, events, rx).await?,
    }

    info!("opencap shutting down");
    Ok(())
}

async fn run_live(
    config: &Config,
    control: ControlCell,
    recorder: Recorder,
    events: EventSender,
    rx: Receiver<WorkerEvent>,
) -> Result<()> {
    let (source, identifier) = live_source(&config.capture)?;
    info!("Using capture source: {identifier}");

    let registry = Arc::new(ChannelRegistry::new());
    let session = LiveSession::connect(
        Arc::clone(&registry),
        &identifier,
        source,
        control,
        recorder,
        events,
        config,
    )?;
    if config.record.enabled {
        session.start_record(Path::new(&config.record.path), config.record.side_by_side)?;
    }

    pump_events(rx).await;

    let written = session.stop_record();
    if written > 0 {
        info!("Recorded {written} frames to {}", config.record.path);
    }
    let capture = session.capture_statistics();
    info!(
        "Captured {} frames at {:.1} fps",
        capture.frames_processed, capture.average_fps
    );
    session.disconnect();
    Ok(())
}

async fn play_file(
    path: &str,
    config: &Config,
    control: ControlCell,
    recorder: Recorder,
    events: EventSender,
    rx: Receiver<WorkerEvent>,
) -> Result<()> {
    let source = ImageSequenceSource::new(opencap::playback::pacing::FALLBACK_FPS);
    let processing = opencap::pipeline::processing::ProcessingShared::new(control, recorder);
    processing.set_emit_original(config.pipeline.emit_original);
    let mut player = Player::new(
        Box::new(source),
        path,
        processing,
        events,
        PlayerOptions {
            fps_override: config.playback.fps_override,
            looping: config.playback.looping,
            stat_window: config.pipeline.stat_window,
            codec: config.record.codec.clone(),
        },
    );

    let geometry = player.open()?;
    info!(
        "Playing {path}: {}x{} at {:.1} fps",
        geometry.width,
        geometry.height,
        player.nominal_fps()
    );
    if config.record.enabled {
        player.start_record(Path::new(&config.record.path), config.record.side_by_side)?;
    }
    player.play()?;

    pump_events(rx).await;

    player.stop();
    let written = player.stop_record();
    if written > 0 {
        info!("Recorded {written} frames to {}", config.record.path);
    }
    Ok(())
}

fn live_source(config: &CaptureConfig) -> Result<(Box<dyn Source>, String)> {
    match config.source {
        SourceKind::Pattern => {
            let source: Box<dyn Source> =
                Box::new(PatternSource::new(config.width, config.height, config.fps as f64));
            Ok((source, "pattern".to_string()))
        }
        #[cfg(feature = "v4l2")]
        SourceKind::V4l2 => {
            let mut config = config.clone();
            // Auto-detect capture device if needed
            if config.device.is_empty() {
                let found = opencap::capture::v4l2::auto_detect_device()?;
                config.device = found.path;
                config.format = found.format;
            }
            let source: Box<dyn Source> = Box::new(opencap::capture::V4l2Source::new(&config));
            Ok((source, config.device))
        }
        #[cfg(not(feature = "v4l2"))]
        SourceKind::V4l2 => Err(color_eyre::eyre::eyre!("built without the v4l2 feature")),
    }
}

/// Drain worker events until end of stream, Ctrl-C, or every sender is gone.
async fn pump_events(rx: Receiver<WorkerEvent>) {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {e}");
                }
                info!("Interrupted");
                break;
            }
            event = rx.recv_async() => match event {
                Ok(WorkerEvent::Frame { processed, original }) => {
                    trace!(
                        "Frame {} {}x{}{}",
                        processed.sequence,
                        processed.width,
                        processed.height,
                        if original.is_some() { " (+original)" } else { "" }
                    );
                }
                Ok(WorkerEvent::Statistics(stats)) => {
                    if stats.frames_processed > 0 && stats.frames_processed % STATS_EVERY == 0 {
                        info!(
                            "Processed {} frames, {:.1} fps",
                            stats.frames_processed, stats.average_fps
                        );
                    }
                }
                Ok(WorkerEvent::FramesWritten(written)) => debug!("{written} frames recorded"),
                Ok(WorkerEvent::EndOfStream) => {
                    info!("End of stream");
                    break;
                }
                Err(_) => break,
            },
        }
    }
}
