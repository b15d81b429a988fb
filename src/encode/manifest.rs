use std::path::{Path, PathBuf};

use crate::encode::writer::{
    AppendOutcome, TrackConfig, TrackWriter, ensure_parent_dir, remove_if_exists,
};
use crate::foundation::core::{FrameSize, MediaTime};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::render::backend::FrameRGBA;

/// One appended sample as recorded in a [`TrackManifest`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ManifestSample {
    /// Presentation time relative to the track origin, in seconds.
    pub pts_secs: f64,
    /// FNV-1a 64 of the frame bytes.
    pub checksum: u64,
}

/// JSON description of a single-video-track recording.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrackManifest {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub track_count: u32,
    pub origin: MediaTime,
    pub duration_secs: f64,
    pub samples: Vec<ManifestSample>,
}

impl TrackManifest {
    pub fn read(path: impl AsRef<Path>) -> CaptureResult<Self> {
        use anyhow::Context as _;

        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read manifest '{}'", path.display()))?;
        let manifest = serde_json::from_str(&text)
            .with_context(|| format!("parse manifest '{}'", path.display()))?;
        Ok(manifest)
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

/// Writer that keeps the track in memory and emits a [`TrackManifest`] on finish.
///
/// Samples whose timestamp does not strictly increase are dropped, the way a container writer
/// rejects them. The writer is always ready.
pub struct ManifestWriter {
    cfg: TrackConfig,
    staging: PathBuf,
    origin: Option<MediaTime>,
    last_pts: Option<MediaTime>,
    samples: Vec<ManifestSample>,
}

impl ManifestWriter {
    pub fn create(cfg: &TrackConfig) -> CaptureResult<Self> {
        cfg.validate()
            .map_err(|e| CaptureError::encoder_init(e.to_string()))?;
        let staging = cfg.staging_path();
        ensure_parent_dir(&staging).map_err(|e| CaptureError::encoder_init(e.to_string()))?;
        std::fs::File::create(&staging).map_err(|e| {
            CaptureError::encoder_init(format!(
                "output location '{}' is not writable: {e}",
                staging.display()
            ))
        })?;
        let _ = remove_if_exists(&staging);

        Ok(Self {
            cfg: cfg.clone(),
            staging,
            origin: None,
            last_pts: None,
            samples: Vec::new(),
        })
    }
}

impl TrackWriter for ManifestWriter {
    fn start_writing(&mut self, origin: MediaTime) -> CaptureResult<()> {
        if self.origin.is_some() {
            return Err(CaptureError::write_start("manifest writer already started"));
        }
        self.origin = Some(origin);
        Ok(())
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        true
    }

    fn append(&mut self, frame: &FrameRGBA, pts: MediaTime) -> CaptureResult<AppendOutcome> {
        let Some(origin) = self.origin else {
            return Err(CaptureError::runtime_write("manifest writer not started"));
        };
        if frame.size() != self.cfg.size {
            return Err(CaptureError::runtime_write(format!(
                "frame size mismatch: got {}, expected {}",
                frame.size(),
                self.cfg.size
            )));
        }
        if pts < origin || self.last_pts.is_some_and(|last| pts <= last) {
            return Ok(AppendOutcome::Dropped);
        }

        self.samples.push(ManifestSample {
            pts_secs: pts.sub(origin).as_secs_f64(),
            checksum: fnv1a64(&frame.data),
        });
        self.last_pts = Some(pts);
        Ok(AppendOutcome::Appended)
    }

    fn finish_writing(&mut self) -> CaptureResult<()> {
        use anyhow::Context as _;

        let Some(origin) = self.origin else {
            return Err(CaptureError::runtime_write("manifest writer not started"));
        };
        let manifest = TrackManifest {
            width: self.cfg.size.width,
            height: self.cfg.size.height,
            fps: self.cfg.fps,
            track_count: 1,
            origin,
            duration_secs: self.samples.last().map_or(0.0, |s| s.pts_secs),
            samples: std::mem::take(&mut self.samples),
        };
        let json = serde_json::to_vec_pretty(&manifest).context("serialize manifest")?;
        std::fs::write(&self.staging, json).map_err(|e| {
            CaptureError::runtime_write(format!(
                "failed to write manifest '{}': {e}",
                self.staging.display()
            ))
        })?;
        Ok(())
    }

    fn cancel(&mut self) {
        self.samples.clear();
        if let Err(e) = remove_if_exists(&self.staging) {
            tracing::warn!(path = %self.staging.display(), error = %e, "failed to remove partial recording");
        }
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut h = 0xcbf29ce484222325u64;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(size: FrameSize, v: u8) -> FrameRGBA {
        FrameRGBA::filled(size, [v, v, v, 255], true)
    }

    #[test]
    fn drops_non_increasing_timestamps() {
        let size = FrameSize::new(4, 4);
        let cfg = TrackConfig::new(size, "target/manifest_unit/order/rec.json", 30);
        let mut w = ManifestWriter::create(&cfg).unwrap();
        w.start_writing(MediaTime::from_micros(1_000)).unwrap();

        let t = MediaTime::from_micros;
        assert_eq!(w.append(&frame(size, 1), t(1_000)).unwrap(), AppendOutcome::Appended);
        assert_eq!(w.append(&frame(size, 2), t(1_000)).unwrap(), AppendOutcome::Dropped);
        assert_eq!(w.append(&frame(size, 3), t(500)).unwrap(), AppendOutcome::Dropped);
        assert_eq!(w.append(&frame(size, 4), t(2_000)).unwrap(), AppendOutcome::Appended);
        assert_eq!(w.samples.len(), 2);
        w.cancel();
    }

    #[test]
    fn finish_writes_manifest_to_staging() {
        let size = FrameSize::new(4, 2);
        let cfg = TrackConfig::new(size, "target/manifest_unit/finish/rec.json", 30);
        let mut w = ManifestWriter::create(&cfg).unwrap();
        w.start_writing(MediaTime::ZERO).unwrap();
        for i in 0..3 {
            let pts = MediaTime::new(i, 30).unwrap();
            w.append(&frame(size, i as u8), pts).unwrap();
        }
        w.finish_writing().unwrap();

        let m = TrackManifest::read(cfg.staging_path()).unwrap();
        assert_eq!(m.size(), size);
        assert_eq!(m.track_count, 1);
        assert_eq!(m.samples.len(), 3);
        assert!((m.duration_secs - 2.0 / 30.0).abs() < 1e-6);
        assert_ne!(m.samples[0].checksum, m.samples[1].checksum);
        let _ = std::fs::remove_file(cfg.staging_path());
    }

    #[test]
    fn append_before_start_is_a_runtime_error() {
        let size = FrameSize::new(2, 2);
        let cfg = TrackConfig::new(size, "target/manifest_unit/nostart/rec.json", 30);
        let mut w = ManifestWriter::create(&cfg).unwrap();
        let err = w.append(&frame(size, 0), MediaTime::ZERO).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::RuntimeWrite);
    }
}
