use std::path::Path;
use std::time::Duration;

use flume::Receiver;
use image::RgbImage;
use opencap::capture::{ImageSequenceSource, MemorySource, Frame};
use opencap::pipeline::processing::ProcessingShared;
use opencap::pipeline::{ControlCell, EventSender, ProcessingFlags, WorkerEvent};
use opencap::playback::{PlaybackState, Player, PlayerOptions};
use opencap::record::Recorder;

fn write_clip(dir: &Path, frames: u8) {
    for i in 0..frames {
        let image = RgbImage::from_pixel(6, 4, image::Rgb([i * 20, 100, 200]));
        image.save(dir.join(format!("clip_{i:03}.png"))).unwrap();
    }
}

fn sequence_player(dir: &Path, fps: f64) -> (Player, Receiver<WorkerEvent>) {
    let (events, rx) = EventSender::bounded(1024);
    let processing = ProcessingShared::new(ControlCell::default(), Recorder::image_sequence());
    let player = Player::new(
        Box::new(ImageSequenceSource::new(fps)),
        dir.to_str().unwrap(),
        processing,
        events,
        PlayerOptions::default(),
    );
    (player, rx)
}

fn frames_until_end(rx: &Receiver<WorkerEvent>) -> Vec<Frame> {
    let mut frames = Vec::new();
    loop {
        match rx.recv_timeout(Duration::from_secs(5)).expect("playback stalled") {
            WorkerEvent::Frame { processed, .. } => frames.push(processed),
            WorkerEvent::EndOfStream => return frames,
            _ => {}
        }
    }
}

#[test]
fn file_ends_after_exactly_its_frames() {
    let dir = tempfile::tempdir().unwrap();
    write_clip(dir.path(), 6);
    let (mut player, rx) = sequence_player(dir.path(), 200.0);

    player.play().unwrap();
    let frames = frames_until_end(&rx);
    let reds: Vec<u8> = frames.iter().map(|f| f.data[0]).collect();
    assert_eq!(reds, vec![0, 20, 40, 60, 80, 100]);
    assert_eq!(player.state(), PlaybackState::Stopped);
    assert_eq!(player.position(), 0);
}

#[test]
fn processing_applies_during_playback() {
    let dir = tempfile::tempdir().unwrap();
    write_clip(dir.path(), 2);
    let (mut player, rx) = sequence_player(dir.path(), 200.0);
    player.set_flags(ProcessingFlags {
        grayscale: true,
        ..Default::default()
    });

    player.play().unwrap();
    let frames = frames_until_end(&rx);
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| f.channels == 1));
}

#[test]
fn recording_from_playback_writes_side_by_side_stills() {
    let clip = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_clip(clip.path(), 3);
    let (mut player, rx) = sequence_player(clip.path(), 200.0);

    player.open().unwrap();
    player.start_record(&out.path().join("rec"), true).unwrap();
    player.play().unwrap();
    frames_until_end(&rx);
    assert_eq!(player.stop_record(), 3);

    let first = image::open(out.path().join("rec/frame_000000.png")).unwrap();
    assert_eq!((first.width(), first.height()), (12, 4));
}

#[test]
fn stop_from_every_state_rewinds() {
    let frames = (0..50)
        .map(|i| Frame::from_raw(2, 2, 1, vec![i; 4]).unwrap())
        .collect();
    let (events, _rx) = EventSender::bounded(256);
    let processing = ProcessingShared::new(ControlCell::default(), Recorder::image_sequence());
    let mut player = Player::new(
        Box::new(MemorySource::new(frames, 100.0)),
        "memory",
        processing,
        events,
        PlayerOptions::default(),
    );

    player.stop();
    assert_eq!(player.state(), PlaybackState::Stopped);

    player.play().unwrap();
    std::thread::sleep(Duration::from_millis(30));
    player.stop();
    assert_eq!((player.state(), player.position()), (PlaybackState::Stopped, 0));

    player.play().unwrap();
    player.pause().unwrap();
    player.seek(25).unwrap();
    player.stop();
    assert_eq!((player.state(), player.position()), (PlaybackState::Stopped, 0));
}
