//! Incremental video-file writing.
//!
//! [`FrameEncoder`](encoder::FrameEncoder) owns the writer state machine; writers only know how
//! to turn timestamped frames into a container at a staging path.

/// The frame encoder state machine and recording session bookkeeping.
pub mod encoder;
/// `ffmpeg`-based writer (MP4 output via system `ffmpeg`).
pub mod ffmpeg;
/// JSON manifest writer for tests, dry runs and machines without `ffmpeg`.
pub mod manifest;
/// Writer trait, track configuration and writer selection.
pub mod writer;
