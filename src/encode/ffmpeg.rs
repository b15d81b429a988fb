use std::io::{Read, Write as _};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::encode::writer::{
    AppendOutcome, TrackConfig, TrackWriter, ensure_parent_dir, remove_if_exists,
};
use crate::foundation::core::MediaTime;
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::foundation::math::mul_div255_u16;
use crate::render::backend::FrameRGBA;

/// Frames in flight between `append` and ffmpeg's stdin before the writer reports "not ready".
const PIPE_DEPTH: usize = 2;

/// Writer that spawns the system `ffmpeg` and streams raw frames to its stdin.
///
/// The rawvideo pipe is constant-rate. Each appended frame becomes exactly one sample played for
/// `1/fps`; a frame whose timestamp does not advance to a later `fps` slot than the previous one
/// is dropped. Gaps between timestamps are not filled.
pub struct FfmpegWriter {
    cfg: TrackConfig,
    staging: PathBuf,

    child: Option<Child>,
    tx: Option<SyncSender<Vec<u8>>>,
    pipe: Option<JoinHandle<()>>,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    pending: Arc<AtomicUsize>,
    written: Arc<AtomicU64>,
    pipe_error: Arc<Mutex<Option<String>>>,

    origin: Option<MediaTime>,
    last_slot: Option<i64>,
}

impl FfmpegWriter {
    /// Validate the track and prepare the output location.
    ///
    /// `ffmpeg` is only spawned by [`TrackWriter::start_writing`], but its absence is reported here
    /// so a recording never starts without an encoder.
    pub fn create(cfg: &TrackConfig) -> CaptureResult<Self> {
        cfg.validate()
            .map_err(|e| CaptureError::encoder_init(e.to_string()))?;
        if !cfg.size.is_even() {
            return Err(CaptureError::encoder_init(format!(
                "ffmpeg writer size must be even (required for yuv420p mp4 output), got {}",
                cfg.size
            )));
        }

        let staging = cfg.staging_path();
        ensure_parent_dir(&staging).map_err(|e| CaptureError::encoder_init(e.to_string()))?;
        std::fs::File::create(&staging).map_err(|e| {
            CaptureError::encoder_init(format!(
                "output location '{}' is not writable: {e}",
                staging.display()
            ))
        })?;
        let _ = remove_if_exists(&staging);

        if !is_ffmpeg_on_path() {
            return Err(CaptureError::encoder_init(
                "ffmpeg is required for MP4 encoding, but was not found on PATH",
            ));
        }

        Ok(Self {
            cfg: cfg.clone(),
            staging,
            child: None,
            tx: None,
            pipe: None,
            stderr_drain: None,
            pending: Arc::new(AtomicUsize::new(0)),
            written: Arc::new(AtomicU64::new(0)),
            pipe_error: Arc::new(Mutex::new(None)),
            origin: None,
            last_slot: None,
        })
    }

    fn command(&self) -> Command {
        let cfg = &self.cfg;
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // Input: raw opaque RGBA8 frames, one per appended frame.
        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.size.width, cfg.size.height),
            "-r",
            &cfg.fps.to_string(),
            "-i",
            "pipe:0",
        ]);
        // Output: h264 + yuv420p for broad compatibility. The staging name has no `.mp4`
        // extension, so the container is named explicitly.
        cmd.args([
            "-an",
            "-c:v",
            "libx264",
            "-preset",
            &cfg.preset,
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
            "-f",
            "mp4",
        ])
        .arg(&self.staging);
        cmd
    }

    /// Frames fully written to ffmpeg's stdin so far; each one is one sample in the output.
    pub fn frames_written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    fn take_pipe_error(&self) -> Option<String> {
        self.pipe_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn slot_for(&self, pts: MediaTime) -> Option<i64> {
        let origin = self.origin?;
        Some(pts.sub(origin).convert_scale(self.cfg.fps).value)
    }

    fn shutdown(&mut self) -> Option<std::process::ExitStatus> {
        drop(self.tx.take());
        if let Some(pipe) = self.pipe.take() {
            let _ = pipe.join();
        }
        let status = self.child.take().and_then(|mut child| child.wait().ok());
        if let Some(drain) = self.stderr_drain.take() {
            let _ = drain.join();
        }
        status
    }
}

impl TrackWriter for FfmpegWriter {
    fn start_writing(&mut self, origin: MediaTime) -> CaptureResult<()> {
        if self.child.is_some() {
            return Err(CaptureError::write_start("ffmpeg writer already started"));
        }

        let mut child = self.command().spawn().map_err(|e| {
            CaptureError::write_start(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CaptureError::write_start("failed to open ffmpeg stdin (unexpected)"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            CaptureError::write_start("failed to open ffmpeg stderr (unexpected)")
        })?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        let (tx, rx) = sync_channel::<Vec<u8>>(PIPE_DEPTH);
        let pending = Arc::clone(&self.pending);
        let written = Arc::clone(&self.written);
        let pipe_error = Arc::clone(&self.pipe_error);
        let pipe = std::thread::Builder::new()
            .name("scenecap-ffmpeg-pipe".to_string())
            .spawn(move || pump_frames(rx, stdin, &pending, &written, &pipe_error))
            .map_err(|e| CaptureError::write_start(format!("failed to spawn pipe thread: {e}")))?;

        tracing::debug!(
            size = %self.cfg.size,
            fps = self.cfg.fps,
            staging = %self.staging.display(),
            "ffmpeg writer started"
        );

        self.child = Some(child);
        self.tx = Some(tx);
        self.pipe = Some(pipe);
        self.stderr_drain = Some(stderr_drain);
        self.origin = Some(origin);
        self.last_slot = None;
        self.written.store(0, Ordering::Release);
        Ok(())
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        self.tx.is_some() && self.pending.load(Ordering::Acquire) < PIPE_DEPTH
    }

    fn append(&mut self, frame: &FrameRGBA, pts: MediaTime) -> CaptureResult<AppendOutcome> {
        if let Some(err) = self.take_pipe_error() {
            return Err(CaptureError::runtime_write(err));
        }
        if frame.width != self.cfg.size.width || frame.height != self.cfg.size.height {
            return Err(CaptureError::runtime_write(format!(
                "frame size mismatch: got {}x{}, expected {}",
                frame.width, frame.height, self.cfg.size
            )));
        }
        if frame.data.len() != self.cfg.size.rgba8_len() {
            return Err(CaptureError::runtime_write(
                "frame.data size mismatch with width*height*4",
            ));
        }

        let Some(slot) = self.slot_for(pts) else {
            return Err(CaptureError::runtime_write("ffmpeg writer not started"));
        };
        if slot < 0 || self.last_slot.is_some_and(|last| slot <= last) {
            return Ok(AppendOutcome::Dropped);
        }

        let Some(tx) = self.tx.as_ref() else {
            return Err(CaptureError::runtime_write("ffmpeg writer is already finalized"));
        };
        self.pending.fetch_add(1, Ordering::AcqRel);
        match tx.try_send(opaque_pixels(frame, self.cfg.bg_rgba)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                return Ok(AppendOutcome::Dropped);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                let msg = self
                    .take_pipe_error()
                    .unwrap_or_else(|| "ffmpeg pipe closed unexpectedly".to_string());
                return Err(CaptureError::runtime_write(msg));
            }
        }

        self.last_slot = Some(slot);
        Ok(AppendOutcome::Appended)
    }

    fn finish_writing(&mut self) -> CaptureResult<()> {
        if self.child.is_none() {
            return Err(CaptureError::runtime_write("ffmpeg writer not started"));
        }
        drop(self.tx.take());
        if let Some(pipe) = self.pipe.take() {
            pipe.join()
                .map_err(|_| CaptureError::runtime_write("ffmpeg pipe thread panicked"))?;
        }
        let mut child = self
            .child
            .take()
            .ok_or_else(|| CaptureError::runtime_write("ffmpeg writer not started"))?;

        let status = child.wait().map_err(|e| {
            CaptureError::runtime_write(format!("failed to wait for ffmpeg to finish: {e}"))
        })?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| CaptureError::runtime_write("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| CaptureError::runtime_write(format!("ffmpeg stderr read failed: {e}")))?,
            None => Vec::new(),
        };

        if let Some(err) = self.take_pipe_error() {
            return Err(CaptureError::runtime_write(err));
        }
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(CaptureError::runtime_write(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }

        tracing::debug!(samples = self.frames_written(), "ffmpeg writer finished");
        Ok(())
    }

    fn cancel(&mut self) {
        drop(self.tx.take());
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
        }
        self.shutdown();
        if let Err(e) = remove_if_exists(&self.staging) {
            tracing::warn!(path = %self.staging.display(), error = %e, "failed to remove partial recording");
        }
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.cancel();
        }
    }
}

fn pump_frames(
    rx: Receiver<Vec<u8>>,
    mut stdin: ChildStdin,
    pending: &AtomicUsize,
    written: &AtomicU64,
    pipe_error: &Mutex<Option<String>>,
) {
    for pixels in rx {
        let result = stdin.write_all(&pixels);
        pending.fetch_sub(1, Ordering::AcqRel);

        if let Err(e) = result {
            *pipe_error.lock().unwrap_or_else(|e| e.into_inner()) =
                Some(format!("failed to write frame to ffmpeg stdin: {e}"));
            return;
        }
        written.fetch_add(1, Ordering::AcqRel);
    }
}

/// Pixels as ffmpeg should see them: the `rgba` input ignores alpha, so translucent pixels are
/// composited over the track background first. Rendered frames are usually opaque already and
/// are passed through unchanged.
fn opaque_pixels(frame: &FrameRGBA, bg_rgba: [u8; 4]) -> Vec<u8> {
    let mut px = frame.data.clone();
    if px.chunks_exact(4).all(|p| p[3] == u8::MAX) {
        return px;
    }
    for p in px.chunks_exact_mut(4) {
        composite_over_background(p, frame.premultiplied, bg_rgba);
    }
    px
}

fn composite_over_background(p: &mut [u8], premultiplied: bool, bg_rgba: [u8; 4]) {
    let alpha = u16::from(p[3]);
    if alpha == 255 {
        return;
    }
    let coverage_left = 255 - alpha;
    for (c, bg) in p[..3].iter_mut().zip(bg_rgba) {
        let fg = if premultiplied {
            u16::from(*c)
        } else {
            mul_div255_u16(u16::from(*c), alpha)
        };
        *c = (fg + mul_div255_u16(u16::from(bg), coverage_left)).min(255) as u8;
    }
    p[3] = u8::MAX;
}

fn tool_answers_version(tool: &str) -> bool {
    Command::new(tool)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    tool_answers_version("ffmpeg")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::FrameSize;

    fn frame(px: &[u8], premultiplied: bool) -> FrameRGBA {
        FrameRGBA {
            width: (px.len() / 4) as u32,
            height: 1,
            data: px.to_vec(),
            premultiplied,
        }
    }

    #[test]
    fn opaque_frames_pass_through_untouched() {
        let px = [10u8, 20, 30, 255, 200, 100, 0, 255];
        assert_eq!(opaque_pixels(&frame(&px, true), [255, 255, 255, 255]), px);
    }

    #[test]
    fn translucent_overlay_is_composited_over_background() {
        // Half-covered red pixel next to an opaque one, over black.
        let premul = [128u8, 0, 0, 128, 0, 255, 0, 255];
        assert_eq!(
            opaque_pixels(&frame(&premul, true), [0, 0, 0, 255]),
            vec![128, 0, 0, 255, 0, 255, 0, 255]
        );
        let straight = [255u8, 0, 0, 128];
        assert_eq!(
            opaque_pixels(&frame(&straight, false), [0, 0, 0, 255]),
            vec![128, 0, 0, 255]
        );
    }

    #[test]
    fn fully_transparent_pixels_show_the_background() {
        let px = [0u8, 0, 0, 0];
        assert_eq!(
            opaque_pixels(&frame(&px, true), [10, 20, 30, 255]),
            vec![10, 20, 30, 255]
        );
    }

    #[test]
    fn odd_sizes_are_rejected_at_create() {
        let cfg = TrackConfig::new(
            FrameSize::new(11, 10),
            "target/ffmpeg_unit/odd/recording.mp4",
            30,
        );
        let err = match FfmpegWriter::create(&cfg) {
            Ok(_) => panic!("odd size accepted"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), crate::ErrorKind::EncoderInit);
    }
}
