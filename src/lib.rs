pub mod capture;
pub mod error;
pub mod pipeline;
pub mod playback;
pub mod record;
pub mod session;
pub mod stages;

use std::path::Path;

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use error::{Error, Result};
use pipeline::channel::OverflowPolicy;
use pipeline::control::{ProcessingFlags, ProcessingSettings};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Environment variables override file values, e.g.
/// `OPENCAP__PIPELINE__CHANNEL_CAPACITY=10`.
pub const ENV_PREFIX: &str = "OPENCAP";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub playback: PlaybackConfig,
    pub record: RecordConfig,
    pub processing: ProcessingConfig,
}

/// Where live frames come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Synthetic color bars
    #[default]
    Pattern,
    /// V4L2 device, needs the `v4l2` feature
    V4l2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Device path; empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    /// Pin the capture thread to this CPU
    pub pin_core: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Bound of the outbound event queue
    pub event_capacity: usize,
    /// Frame intervals averaged for FPS
    pub stat_window: usize,
    pub emit_original: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// File or directory to play instead of capturing live
    pub path: Option<String>,
    pub fps_override: Option<f64>,
    pub looping: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Start recording as soon as frames flow
    pub enabled: bool,
    pub path: String,
    /// FourCC handed to the sink
    pub codec: String,
    pub side_by_side: bool,
    /// Recording rate until a rate has been measured
    pub fallback_fps: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub flags: ProcessingFlags,
    pub settings: ProcessingSettings,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Pattern,
            device: "/dev/video0".into(),
            width: 800,
            height: 600,
            fps: 30,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
            pin_core: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 30,
            overflow: OverflowPolicy::DropOldest,
            event_capacity: 64,
            stat_window: pipeline::stats::DEFAULT_STAT_WINDOW,
            emit_original: false,
        }
    }
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "recording".into(),
            codec: record::DEFAULT_CODEC.into(),
            side_by_side: false,
            fallback_fps: playback::pacing::FALLBACK_FPS,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file at `path` if given, then
    /// `OPENCAP__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let defaults = config::Config::try_from(&Config::default())?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        let loaded: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.processing.settings.validate()?;
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_survive_a_round_trip_through_config() {
        let loaded = Config::load(None).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[pipeline]
channel_capacity = 5
overflow = "block"

[processing.flags]
flip = true

[processing.settings]
canny_low = 20.0
"#
        )
        .unwrap();

        let loaded = Config::load(Some(file.path())).unwrap();
        assert_eq!(loaded.pipeline.channel_capacity, 5);
        assert_eq!(loaded.pipeline.overflow, OverflowPolicy::Block);
        assert!(loaded.processing.flags.flip);
        assert_eq!(loaded.processing.settings.canny_low, 20.0);
        assert_eq!(loaded.capture, CaptureConfig::default());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[processing.settings]\ncanny_aperture = 4").unwrap();
        assert!(matches!(
            Config::load(Some(file.path())),
            Err(Error::InvalidSettings(_))
        ));
    }

    #[test]
    fn config_serializes_to_json() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["pipeline"]["channel_capacity"], 30);
        assert_eq!(json["pipeline"]["overflow"], "drop_oldest");
    }
}
