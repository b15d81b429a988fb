use std::path::{Path, PathBuf};

use crate::foundation::core::{FrameSize, MediaTime};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::render::backend::FrameRGBA;

/// Configuration for one single-video-track output file.
#[derive(Clone, Debug)]
pub struct TrackConfig {
    /// Encoded frame size in pixels.
    pub size: FrameSize,
    /// Final location of the completed container.
    pub output_path: PathBuf,
    /// Nominal frame rate; constant-rate writers place frames on this grid.
    pub fps: u32,
    /// Background used to flatten alpha (RGBA8, straight alpha).
    pub bg_rgba: [u8; 4],
    /// x264 speed/quality preset for writers that use it.
    pub preset: String,
}

impl TrackConfig {
    pub fn new(size: FrameSize, output_path: impl Into<PathBuf>, fps: u32) -> Self {
        Self {
            size,
            output_path: output_path.into(),
            fps,
            bg_rgba: [0, 0, 0, 255],
            preset: "veryfast".to_string(),
        }
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.size.is_empty() {
            return Err(CaptureError::validation(
                "track width/height must be non-zero",
            ));
        }
        if self.fps == 0 {
            return Err(CaptureError::validation("track fps must be non-zero"));
        }
        if self.output_path.file_name().is_none() {
            return Err(CaptureError::validation(format!(
                "output path '{}' has no file name",
                self.output_path.display()
            )));
        }
        Ok(())
    }

    /// Where writers produce the container until it is complete.
    pub fn staging_path(&self) -> PathBuf {
        staging_path_for(&self.output_path)
    }
}

/// `<output>.part`: the in-progress sibling of a well-known output path.
pub fn staging_path_for(output_path: &Path) -> PathBuf {
    let mut s = output_path.as_os_str().to_owned();
    s.push(".part");
    PathBuf::from(s)
}

/// Result of handing one frame to a writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The frame became a sample of the track.
    Appended,
    /// The writer discarded the frame (e.g. its timestamp does not advance the track).
    Dropped,
}

/// A file-backed, single-track incremental video writer.
///
/// Call order contract: `start_writing` once, then any number of `append` calls, then either
/// `finish_writing` or `cancel`. Writers produce their container at
/// [`TrackConfig::staging_path`]; moving it into place is the caller's job.
pub trait TrackWriter: Send {
    /// Begin the write session with `origin` as the stream's time zero.
    fn start_writing(&mut self, origin: MediaTime) -> CaptureResult<()>;
    /// Whether an `append` now would be accepted without blocking.
    fn is_ready_for_more_media_data(&self) -> bool;
    /// Append one frame at presentation time `pts`. Must not block on encoding.
    fn append(&mut self, frame: &FrameRGBA, pts: MediaTime) -> CaptureResult<AppendOutcome>;
    /// Flush and close the container. May block; callers run it off their hot path.
    fn finish_writing(&mut self) -> CaptureResult<()>;
    /// Abandon the session and remove anything written so far.
    fn cancel(&mut self);
}

/// Creates writers for new recordings.
pub trait WriterFactory: Send + Sync {
    /// Create the container and attach its video track. Failures are encoder-init errors.
    fn create(&self, cfg: &TrackConfig) -> CaptureResult<Box<dyn TrackWriter>>;
}

/// Built-in writers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterKind {
    /// H.264 MP4 through the system `ffmpeg`.
    #[default]
    Ffmpeg,
    /// JSON description of the track; no video encoding.
    Manifest,
}

impl WriterFactory for WriterKind {
    fn create(&self, cfg: &TrackConfig) -> CaptureResult<Box<dyn TrackWriter>> {
        match self {
            Self::Ffmpeg => Ok(Box::new(crate::encode::ffmpeg::FfmpegWriter::create(cfg)?)),
            Self::Manifest => Ok(Box::new(crate::encode::manifest::ManifestWriter::create(
                cfg,
            )?)),
        }
    }
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> CaptureResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Remove `path` if it exists.
pub(crate) fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
