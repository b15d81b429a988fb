//! scenecap records a live, continuously mutated scene into a single-track H.264 MP4.
//!
//! The pipeline has three parts:
//!
//! - A [`FrameSource`] renders the [`SharedScene`] at display refresh rate and stamps each frame
//!   with a [`MediaClock`].
//! - A one-slot encode queue hands frames to a dedicated encode thread.
//! - A [`FrameEncoder`] appends them to a file-backed [`TrackWriter`] and finalizes the container
//!   in the background.
//!
//! [`CaptureController`] is the entry point hosts use: start, stop, preview and export.
#![forbid(unsafe_code)]

mod foundation;

/// Recording orchestration.
pub mod capture;
/// JSON configuration.
pub mod config;
/// Incremental video-file writing.
pub mod encode;
/// Scene rendering backends.
pub mod render;
/// Live scene boundary.
pub mod scene;

pub use crate::foundation::clock::{HostClock, ManualClock, MediaClock};
pub use crate::foundation::core::{
    DEFAULT_TIMESCALE, FrameSize, MediaTime, Point, Rect, Rgba8, Size, Vec2,
};
pub use crate::foundation::error::{CaptureError, CaptureResult, ErrorKind};

pub use crate::capture::controller::{CaptureController, CaptureState};
pub use crate::capture::queue::{EncodeWorker, LatestSlot};
pub use crate::capture::source::{FrameConsumer, FrameSample, FrameSource, SourceStats};
pub use crate::config::CaptureConfig;
pub use crate::encode::encoder::{EncoderState, ErrorCallback, FrameEncoder, RecordingSession};
pub use crate::encode::ffmpeg::{FfmpegWriter, is_ffmpeg_on_path};
pub use crate::encode::manifest::{ManifestSample, ManifestWriter, TrackManifest};
pub use crate::encode::writer::{
    AppendOutcome, TrackConfig, TrackWriter, WriterFactory, WriterKind, staging_path_for,
};
pub use crate::render::backend::{
    Antialiasing, FrameRGBA, RenderSettings, SceneRenderer, SharedRenderer,
};
pub use crate::render::cpu::CpuSceneRenderer;
pub use crate::scene::{
    Anchor, AnchorId, AnchorKind, AttachedEffect, EffectNode, EffectShape, SceneGraph,
    SharedScene, TrackingMode,
};
