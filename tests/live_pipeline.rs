use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::Receiver;
use opencap::capture::{CaptureState, Frame, PatternSource, Roi};
use opencap::pipeline::{
    ChannelRegistry, ControlCell, EventSender, OverflowPolicy, ProcessingFlags, WorkerEvent,
};
use opencap::record::{MemorySink, Recorder};
use opencap::session::LiveSession;
use opencap::{Config, Error};

fn memory_recorder() -> (Recorder, MemorySink) {
    let sink = MemorySink::new();
    let handle = sink.clone();
    (Recorder::new(Box::new(move || Box::new(sink.clone()))), handle)
}

fn next_frame(rx: &Receiver<WorkerEvent>) -> (Frame, Option<Frame>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left).expect("no processed frame") {
            WorkerEvent::Frame { processed, original } => return (processed, original),
            _ => continue,
        }
    }
}

fn connect(
    registry: &Arc<ChannelRegistry>,
    id: &str,
    control: ControlCell,
    config: &Config,
) -> (LiveSession, Receiver<WorkerEvent>, MemorySink) {
    let (events, rx) = EventSender::bounded(512);
    let (recorder, sink) = memory_recorder();
    let session = LiveSession::connect(
        Arc::clone(registry),
        id,
        Box::new(PatternSource::new(32, 24, 120.0)),
        control,
        recorder,
        events,
        config,
    )
    .unwrap();
    (session, rx, sink)
}

#[test]
fn frames_flow_from_capture_to_consumer() {
    let registry = Arc::new(ChannelRegistry::new());
    let control = ControlCell::new(
        ProcessingFlags {
            flip: true,
            ..Default::default()
        },
        Default::default(),
    )
    .unwrap();
    let (session, rx, _sink) = connect(&registry, "cam0", control, &Config::default());

    assert!(registry.contains("cam0"));
    assert_eq!(session.capture_state(), CaptureState::Running);

    let mut last = None;
    for _ in 0..5 {
        let (frame, original) = next_frame(&rx);
        assert_eq!((frame.width, frame.height, frame.channels), (32, 24, 3));
        assert!(original.is_none());
        if let Some(previous) = last {
            assert!(frame.sequence > previous);
        }
        last = Some(frame.sequence);
    }

    session.disconnect();
    assert!(!registry.contains("cam0"));
}

#[test]
fn duplicate_source_is_refused() {
    let registry = Arc::new(ChannelRegistry::new());
    let config = Config::default();
    let (_session, _rx, _sink) = connect(&registry, "cam0", ControlCell::default(), &config);

    let (events, _rx2) = EventSender::bounded(8);
    let second = LiveSession::connect(
        Arc::clone(&registry),
        "cam0",
        Box::new(PatternSource::new(8, 8, 30.0)),
        ControlCell::default(),
        Recorder::image_sequence(),
        events,
        &config,
    );
    assert!(matches!(second, Err(Error::DuplicateChannel(_))));
}

#[test]
fn roi_and_side_by_side_recording() {
    let registry = Arc::new(ChannelRegistry::new());
    let mut config = Config::default();
    config.pipeline.emit_original = true;
    let (session, rx, sink) = connect(&registry, "cam1", ControlCell::default(), &config);

    session.processing().set_roi(Roi::new(8, 4, 16, 12)).unwrap();
    assert!(session
        .processing()
        .set_roi(Roi::new(20, 0, 16, 12))
        .is_err());

    session.start_record(Path::new("unused"), true).unwrap();
    let (frame, original) = loop {
        let (frame, original) = next_frame(&rx);
        if frame.width == 16 && session.processing().is_recording() {
            break (frame, original);
        }
    };
    assert_eq!(frame.height, 12);
    assert_eq!(original.map(|o| (o.width, o.height)), Some((16, 12)));

    // Let a few more frames through the recorder
    for _ in 0..3 {
        next_frame(&rx);
    }
    let written = session.stop_record();
    assert!(written >= 1);
    let recorded = sink.frames();
    assert!(recorded.iter().all(|f| f.width == 32 && f.height == 12));
}

#[test]
fn block_policy_holds_capture_at_capacity() {
    let registry = Arc::new(ChannelRegistry::new());
    let mut config = Config::default();
    config.pipeline.channel_capacity = 2;
    config.pipeline.overflow = OverflowPolicy::Block;
    let (session, rx, _sink) = connect(&registry, "cam2", ControlCell::default(), &config);

    // Consumer-side events pile up unread; the channel itself never exceeds capacity
    for _ in 0..20 {
        assert!(session.channel().size() <= 2);
        std::thread::sleep(Duration::from_millis(2));
    }
    next_frame(&rx);
    let stats = session.channel().stats();
    assert_eq!(stats.frames_dropped, 0);
    drop(session);
    assert!(registry.is_empty());
}
