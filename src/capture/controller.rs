use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::capture::queue::EncodeWorker;
use crate::capture::source::{FrameConsumer, FrameSample, FrameSource};
use crate::config::CaptureConfig;
use crate::encode::encoder::{ErrorCallback, FrameEncoder, RecordingSession};
use crate::encode::writer::{TrackConfig, WriterFactory, ensure_parent_dir, remove_if_exists};
use crate::foundation::clock::{HostClock, MediaClock};
use crate::foundation::core::FrameSize;
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::render::backend::SharedRenderer;

/// Public recording state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CaptureState {
    Idle,
    Recording,
    /// Capture has stopped; the file is being finalized.
    Stopping,
}

struct Active {
    encoder: FrameEncoder,
    source: FrameSource,
    worker: EncodeWorker,
}

impl Active {
    /// Tear down without finalizing. Must not run on the encode thread while holding `Inner`.
    fn abandon(mut self) {
        self.source.stop();
        self.encoder.abandon();
        drop(self.worker);
    }
}

struct Inner {
    state: CaptureState,
    view_size: FrameSize,
    generation: u64,
    active: Option<Active>,
    last: Option<FrameEncoder>,
    on_error: Option<ErrorCallback>,
}

struct Shared {
    renderer: SharedRenderer,
    clock: Arc<dyn MediaClock>,
    writers: Arc<dyn WriterFactory>,
    output_path: PathBuf,
    fps: u32,
    bg_rgba: [u8; 4],
    preset: String,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Encoder failure during a recording: abandon the session and return to `Idle`.
    ///
    /// The error callback runs before `Idle` is published, so an observer that sees the
    /// controller go idle has already been told why.
    fn on_encoder_error(&self, generation: u64, err: &CaptureError) {
        let (abandoned, cb) = {
            let mut inner = self.lock();
            let abandoned = if inner.generation == generation
                && inner.state == CaptureState::Recording
            {
                let active = inner.active.take();
                if let Some(a) = &active {
                    inner.last = Some(a.encoder.clone());
                }
                active
            } else {
                None
            };
            (abandoned, inner.on_error.clone())
        };

        let torn_down = abandoned.is_some();
        if let Some(active) = abandoned {
            tracing::warn!(error = %err, "recording abandoned");
            active.abandon();
        }
        if let Some(cb) = cb {
            cb(err);
        }
        if torn_down {
            let mut inner = self.lock();
            // A stop issued meanwhile has already resolved the state.
            if inner.generation == generation
                && inner.state == CaptureState::Recording
                && inner.active.is_none()
            {
                inner.state = CaptureState::Idle;
            }
        }
    }
}

/// Orchestrates a [`FrameSource`] and a [`FrameEncoder`] behind a small recording state machine.
///
/// All methods return promptly: finalizing happens on a background thread and completion is
/// signalled through the `stop_recording` callback. Failures are delivered to the error callback.
pub struct CaptureController {
    shared: Arc<Shared>,
}

impl CaptureController {
    /// A controller for `config`, recording `renderer` against the host clock.
    pub fn new(config: &CaptureConfig, renderer: SharedRenderer) -> CaptureResult<Self> {
        Self::with_parts(
            config,
            renderer,
            Arc::new(HostClock::new()),
            Arc::new(config.writer),
        )
    }

    /// A controller with an explicit clock and writer factory.
    pub fn with_parts(
        config: &CaptureConfig,
        renderer: SharedRenderer,
        clock: Arc<dyn MediaClock>,
        writers: Arc<dyn WriterFactory>,
    ) -> CaptureResult<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                renderer,
                clock,
                writers,
                output_path: config.output_path(),
                fps: config.target_fps,
                bg_rgba: config.background_rgba.to_array(),
                preset: config.x264_preset.clone(),
                inner: Mutex::new(Inner {
                    state: CaptureState::Idle,
                    view_size: FrameSize::from_view_bounds(
                        f64::from(config.view_width),
                        f64::from(config.view_height),
                    ),
                    generation: 0,
                    active: None,
                    last: None,
                    on_error: None,
                }),
            }),
        })
    }

    pub fn set_error_callback(&self, cb: Option<ErrorCallback>) {
        self.shared.lock().on_error = cb;
    }

    /// Report the host view bounds; the next recording uses them (rounded down to even).
    pub fn set_view_size(&self, width: f64, height: f64) {
        self.shared.lock().view_size = FrameSize::from_view_bounds(width, height);
    }

    pub fn view_size(&self) -> FrameSize {
        self.shared.lock().view_size
    }

    /// Begin a new recording. No-op unless `Idle`.
    ///
    /// Any previous recording at the output path is removed first. If it cannot be removed, or
    /// the encoder cannot be opened, the error callback receives an `EncoderInit` error and the
    /// controller stays `Idle`.
    #[tracing::instrument(skip_all)]
    pub fn start_recording(&self) {
        let shared = &self.shared;
        let mut inner = shared.lock();
        if inner.state != CaptureState::Idle {
            tracing::debug!(state = ?inner.state, "start ignored");
            return;
        }

        let cfg = TrackConfig {
            size: inner.view_size,
            output_path: shared.output_path.clone(),
            fps: shared.fps,
            bg_rgba: shared.bg_rgba,
            preset: shared.preset.clone(),
        };
        let started = clear_previous(&cfg).and_then(|()| {
            inner.last = None;
            self.spawn_active(&mut inner, cfg)
        });
        match started {
            Ok(active) => {
                inner.active = Some(active);
                inner.state = CaptureState::Recording;
                tracing::info!(size = %inner.view_size, fps = shared.fps, "recording started");
            }
            Err(e) => {
                let cb = inner.on_error.clone();
                drop(inner);
                tracing::warn!(error = %e, "recording did not start");
                if let Some(cb) = cb {
                    cb(&e);
                }
            }
        }
    }

    fn spawn_active(&self, inner: &mut Inner, cfg: TrackConfig) -> CaptureResult<Active> {
        let shared = &self.shared;
        let size = cfg.size;
        let encoder = FrameEncoder::open(cfg, shared.writers.as_ref())?;

        inner.generation += 1;
        let generation = inner.generation;
        let weak: Weak<Shared> = Arc::downgrade(shared);
        encoder.set_error_callback(Some(Arc::new(move |e: &CaptureError| {
            if let Some(shared) = weak.upgrade() {
                shared.on_encoder_error(generation, e);
            }
        })));

        let worker = match EncodeWorker::spawn(encoder.clone()) {
            Ok(w) => w,
            Err(e) => {
                encoder.abandon();
                return Err(e);
            }
        };
        let slot = worker.slot();
        let consumer: FrameConsumer = Arc::new(move |sample: FrameSample| {
            slot.push(sample);
        });

        let mut source = FrameSource::new(
            Arc::clone(&shared.renderer),
            Arc::clone(&shared.clock),
            size,
            consumer,
        );
        if let Err(e) = source.start(shared.fps) {
            encoder.abandon();
            return Err(CaptureError::encoder_init(e.to_string()));
        }

        Ok(Active {
            encoder,
            source,
            worker,
        })
    }

    /// Stop the current recording and finalize it in the background.
    ///
    /// `on_finished` runs exactly once: right away when not recording, otherwise after the
    /// controller is back in `Idle`.
    #[tracing::instrument(skip_all)]
    pub fn stop_recording<F>(&self, on_finished: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let (active, generation) = {
            let mut inner = self.shared.lock();
            if inner.state != CaptureState::Recording {
                drop(inner);
                on_finished();
                return;
            }
            inner.state = CaptureState::Stopping;
            (inner.active.take(), inner.generation)
        };
        let Some(mut active) = active else {
            self.shared.lock().state = CaptureState::Idle;
            on_finished();
            return;
        };

        active.source.stop();
        let replaced = active.worker.close_and_join();
        tracing::debug!(replaced, "capture stopped");

        let encoder = active.encoder;
        let weak = Arc::downgrade(&self.shared);
        let last = encoder.clone();
        encoder.finalize(move |state| {
            if let Some(shared) = weak.upgrade() {
                let mut inner = shared.lock();
                if inner.generation == generation && inner.state == CaptureState::Stopping {
                    inner.state = CaptureState::Idle;
                    inner.last = Some(last);
                }
            }
            tracing::debug!(?state, "stop finished");
            on_finished();
        });
    }

    pub fn state(&self) -> CaptureState {
        self.shared.lock().state
    }

    pub fn is_recording(&self) -> bool {
        self.state() == CaptureState::Recording
    }

    /// Whether a completed recording exists at the output path.
    pub fn has_preview(&self) -> bool {
        self.shared.output_path.is_file()
    }

    /// Whether the last recording can be shown or exported now.
    pub fn can_preview(&self) -> bool {
        self.state() == CaptureState::Idle && self.has_preview()
    }

    /// Copy the completed recording to `dest`.
    pub fn export_preview(&self, dest: impl AsRef<Path>) -> CaptureResult<u64> {
        use anyhow::Context as _;

        let dest = dest.as_ref();
        if self.state() != CaptureState::Idle {
            return Err(CaptureError::validation(
                "cannot export while a recording is in progress",
            ));
        }
        if !self.has_preview() {
            return Err(CaptureError::validation("no completed recording to export"));
        }
        ensure_parent_dir(dest)?;
        let bytes = std::fs::copy(&self.shared.output_path, dest).with_context(|| {
            format!(
                "copy '{}' to '{}'",
                self.shared.output_path.display(),
                dest.display()
            )
        })?;
        tracing::info!(dest = %dest.display(), bytes, "recording exported");
        Ok(bytes)
    }

    /// Delete the retained recording.
    pub fn clear_preview(&self) -> CaptureResult<()> {
        use anyhow::Context as _;

        if self.state() != CaptureState::Idle {
            return Err(CaptureError::validation(
                "cannot clear while a recording is in progress",
            ));
        }
        remove_if_exists(&self.shared.output_path).with_context(|| {
            format!("remove '{}'", self.shared.output_path.display())
        })?;
        Ok(())
    }

    pub fn output_path(&self) -> &Path {
        &self.shared.output_path
    }

    /// Snapshot of the most recent session: the active one while recording, else the last one.
    pub fn last_session(&self) -> Option<RecordingSession> {
        let inner = self.shared.lock();
        inner
            .active
            .as_ref()
            .map(|a| a.encoder.session())
            .or_else(|| inner.last.as_ref().map(FrameEncoder::session))
    }
}

/// Remove the previous recording and any leftover partial file; a recording never starts on top
/// of one it could not replace.
fn clear_previous(cfg: &TrackConfig) -> CaptureResult<()> {
    for path in [cfg.output_path.clone(), cfg.staging_path()] {
        remove_if_exists(&path).map_err(|e| {
            CaptureError::encoder_init(format!(
                "cannot replace previous recording '{}': {e}",
                path.display()
            ))
        })?;
    }
    Ok(())
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        let active = self.shared.lock().active.take();
        if let Some(active) = active {
            tracing::debug!("controller dropped while recording; abandoning");
            active.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::writer::WriterKind;
    use crate::foundation::clock::ManualClock;
    use crate::render::backend::{Antialiasing, FrameRGBA, SceneRenderer};
    use crate::foundation::core::MediaTime;
    use std::sync::mpsc;

    struct Gray;

    impl SceneRenderer for Gray {
        fn snapshot(
            &mut self,
            _at: MediaTime,
            size: FrameSize,
            _aa: Antialiasing,
        ) -> CaptureResult<FrameRGBA> {
            Ok(FrameRGBA::filled(size, [128, 128, 128, 255], true))
        }
    }

    fn controller(name: &str) -> CaptureController {
        let dir = PathBuf::from("target").join("controller_unit").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        let config = CaptureConfig {
            output_dir: dir,
            file_name: "recording.json".to_string(),
            writer: WriterKind::Manifest,
            ..CaptureConfig::default()
        };
        CaptureController::with_parts(
            &config,
            Arc::new(Mutex::new(Gray)),
            Arc::new(ManualClock::default()),
            Arc::new(WriterKind::Manifest),
        )
        .unwrap()
    }

    #[test]
    fn stop_when_idle_calls_back_once() {
        let c = controller("stop_idle");
        let (tx, rx) = mpsc::channel();
        c.stop_recording(move || tx.send(()).unwrap());
        rx.recv().unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(c.state(), CaptureState::Idle);
        assert!(c.last_session().is_none());
    }

    #[test]
    fn view_size_is_rounded_to_even() {
        let c = controller("view_size");
        c.set_view_size(641.0, 479.9);
        assert_eq!(c.view_size(), FrameSize::new(640, 478));
    }

    #[test]
    fn export_without_preview_is_rejected() {
        let c = controller("export_none");
        let err = c.export_preview("target/controller_unit/export_none/copy.json").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
        c.clear_preview().unwrap();
    }
}
