use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::encode::writer::{
    AppendOutcome, TrackConfig, TrackWriter, WriterFactory, remove_if_exists,
};
use crate::foundation::core::{FrameSize, MediaTime};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::render::backend::FrameRGBA;

/// Receives encoder failures. Called at most once per failure, never under the encoder lock.
pub type ErrorCallback = Arc<dyn Fn(&CaptureError) + Send + Sync>;

/// Writer lifecycle as tracked by [`FrameEncoder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EncoderState {
    /// Opened; the write session begins with the first frame.
    Idle,
    Writing,
    /// Flush in progress on a background thread.
    Finalizing,
    /// The container is complete at the output path.
    Completed,
    Failed,
}

/// Snapshot of one start/stop cycle.
#[derive(Clone, Debug)]
pub struct RecordingSession {
    pub size: FrameSize,
    pub output_path: PathBuf,
    pub staging_path: PathBuf,
    pub state: EncoderState,
    /// Timestamp of the first frame; the duration baseline.
    pub origin: Option<MediaTime>,
    /// Last appended timestamp minus `origin`.
    pub duration: MediaTime,
    pub frames_appended: u64,
    pub frames_dropped: u64,
}

struct Inner {
    writer: Option<Box<dyn TrackWriter>>,
    session: RecordingSession,
    on_error: Option<ErrorCallback>,
}

/// Incremental single-track encoder with an explicit state machine.
///
/// `FrameEncoder` is a cheap handle; clones share the same session. Frames handed to
/// [`FrameEncoder::write`] are never queued: when the writer is not ready they are dropped.
#[derive(Clone)]
pub struct FrameEncoder {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for FrameEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEncoder")
            .field("session", &self.session())
            .finish_non_exhaustive()
    }
}

impl FrameEncoder {
    /// Create the output container and its video track.
    #[tracing::instrument(skip_all, fields(size = %config.size, path = %config.output_path.display()))]
    pub fn open(config: TrackConfig, factory: &dyn WriterFactory) -> CaptureResult<Self> {
        let writer = factory.create(&config).map_err(|e| match e {
            CaptureError::EncoderInit(_) => e,
            other => CaptureError::encoder_init(other.to_string()),
        })?;

        let session = RecordingSession {
            size: config.size,
            staging_path: config.staging_path(),
            output_path: config.output_path,
            state: EncoderState::Idle,
            origin: None,
            duration: MediaTime::ZERO,
            frames_appended: 0,
            frames_dropped: 0,
        };
        tracing::debug!("encoder opened");

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                writer: Some(writer),
                session,
                on_error: None,
            })),
        })
    }

    pub fn set_error_callback(&self, cb: Option<ErrorCallback>) {
        self.lock().on_error = cb;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hand one frame to the writer at `timestamp`.
    ///
    /// The first frame starts the write session and becomes the time origin. Frames arriving
    /// while the writer is busy, or after the encoder finished or failed, are dropped.
    pub fn write(&self, frame: &FrameRGBA, timestamp: MediaTime) {
        let failure = {
            let mut inner = self.lock();
            match inner.session.state {
                EncoderState::Idle => match start_and_append(&mut inner, frame, timestamp) {
                    Ok(()) => None,
                    Err(e) => Some(fail(&mut inner, e)),
                },
                EncoderState::Writing => match append(&mut inner, frame, timestamp) {
                    Ok(()) => None,
                    Err(e) => Some(fail(&mut inner, e)),
                },
                EncoderState::Finalizing | EncoderState::Completed | EncoderState::Failed => None,
            }
        };

        if let Some((err, cb)) = failure {
            tracing::warn!(error = %err, "encoder failed");
            if let Some(cb) = cb {
                cb(&err);
            }
        }
    }

    /// Flush and close the container on a background thread, then call `on_done` with the
    /// final state.
    ///
    /// Only a `Writing` encoder finalizes; in any other state this is a no-op and `on_done` is
    /// called right away with the current state.
    #[tracing::instrument(skip_all)]
    pub fn finalize<F>(&self, on_done: F)
    where
        F: FnOnce(EncoderState) + Send + 'static,
    {
        let job = {
            let mut inner = self.lock();
            if inner.session.state == EncoderState::Writing {
                inner.session.state = EncoderState::Finalizing;
                inner.writer.take()
            } else {
                None
            }
        };

        let Some(mut writer) = job else {
            on_done(self.state());
            return;
        };

        let inner = Arc::clone(&self.inner);
        std::thread::spawn(move || {
            let (staging, output) = {
                let guard = inner.lock().unwrap_or_else(|e| e.into_inner());
                (
                    guard.session.staging_path.clone(),
                    guard.session.output_path.clone(),
                )
            };

            let result = writer
                .finish_writing()
                .and_then(|()| move_into_place(&staging, &output));
            if result.is_err() {
                writer.cancel();
                let _ = remove_if_exists(&staging);
            }
            drop(writer);

            let (state, failure) = {
                let mut guard = inner.lock().unwrap_or_else(|e| e.into_inner());
                match result {
                    Ok(()) => {
                        guard.session.state = EncoderState::Completed;
                        tracing::info!(
                            path = %output.display(),
                            frames = guard.session.frames_appended,
                            dropped = guard.session.frames_dropped,
                            duration_secs = guard.session.duration.as_secs_f64(),
                            "recording finalized"
                        );
                        (EncoderState::Completed, None)
                    }
                    Err(e) => {
                        guard.session.state = EncoderState::Failed;
                        let e = match e {
                            CaptureError::RuntimeWrite(_) => e,
                            other => CaptureError::runtime_write(other.to_string()),
                        };
                        (EncoderState::Failed, Some((e, guard.on_error.clone())))
                    }
                }
            };

            if let Some((err, cb)) = failure {
                tracing::warn!(error = %err, "finalize failed");
                if let Some(cb) = cb {
                    cb(&err);
                }
            }
            on_done(state);
        });
    }

    /// Give up on the session: cancel the writer, remove partial output and mark the encoder
    /// `Failed`. A completed recording is left alone.
    pub fn abandon(&self) {
        let writer = {
            let mut inner = self.lock();
            if inner.session.state == EncoderState::Completed {
                return;
            }
            if inner.session.state != EncoderState::Finalizing {
                inner.session.state = EncoderState::Failed;
            }
            inner.writer.take()
        };
        if let Some(mut writer) = writer {
            writer.cancel();
        }
    }

    pub fn state(&self) -> EncoderState {
        self.lock().session.state
    }

    pub fn session(&self) -> RecordingSession {
        self.lock().session.clone()
    }

    pub fn output_path(&self) -> PathBuf {
        self.lock().session.output_path.clone()
    }
}

fn start_and_append(inner: &mut Inner, frame: &FrameRGBA, timestamp: MediaTime) -> CaptureResult<()> {
    let writer = inner
        .writer
        .as_mut()
        .ok_or_else(|| CaptureError::write_start("encoder has no writer"))?;
    writer.start_writing(timestamp).map_err(|e| match e {
        CaptureError::WriteStart(_) => e,
        other => CaptureError::write_start(other.to_string()),
    })?;

    inner.session.state = EncoderState::Writing;
    inner.session.origin = Some(timestamp);
    inner.session.duration = MediaTime::ZERO;
    tracing::debug!(origin_secs = timestamp.as_secs_f64(), "write session started");

    append(inner, frame, timestamp)
}

fn append(inner: &mut Inner, frame: &FrameRGBA, timestamp: MediaTime) -> CaptureResult<()> {
    let writer = inner
        .writer
        .as_mut()
        .ok_or_else(|| CaptureError::runtime_write("encoder has no writer"))?;

    if !writer.is_ready_for_more_media_data() {
        inner.session.frames_dropped += 1;
        return Ok(());
    }

    let outcome = writer.append(frame, timestamp).map_err(|e| match e {
        CaptureError::RuntimeWrite(_) => e,
        other => CaptureError::runtime_write(other.to_string()),
    })?;
    match outcome {
        AppendOutcome::Appended => {
            inner.session.frames_appended += 1;
            if let Some(origin) = inner.session.origin {
                inner.session.duration = timestamp.sub(origin);
            }
        }
        AppendOutcome::Dropped => inner.session.frames_dropped += 1,
    }
    Ok(())
}

fn fail(inner: &mut Inner, err: CaptureError) -> (CaptureError, Option<ErrorCallback>) {
    inner.session.state = EncoderState::Failed;
    if let Some(mut writer) = inner.writer.take() {
        writer.cancel();
    }
    (err, inner.on_error.clone())
}

fn move_into_place(staging: &Path, output: &Path) -> CaptureResult<()> {
    remove_if_exists(output).map_err(|e| {
        CaptureError::runtime_write(format!(
            "failed to replace existing '{}': {e}",
            output.display()
        ))
    })?;
    std::fs::rename(staging, output).map_err(|e| {
        CaptureError::runtime_write(format!(
            "failed to move '{}' to '{}': {e}",
            staging.display(),
            output.display()
        ))
    })
}
