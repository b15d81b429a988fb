use std::sync::mpsc::{RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::foundation::clock::MediaClock;
use crate::foundation::core::{FrameSize, MediaTime};
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::render::backend::{Antialiasing, FrameRGBA, SharedRenderer};

/// One rendered frame and its presentation time.
#[derive(Clone, Debug)]
pub struct FrameSample {
    pub frame: FrameRGBA,
    pub pts: MediaTime,
}

/// Receives every frame the source produces, on the refresh thread.
pub type FrameConsumer = Arc<dyn Fn(FrameSample) + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub ticks: u64,
    pub delivered: u64,
    pub render_failures: u64,
    /// Refresh deadlines passed over because a tick ran late.
    pub skipped_deadlines: u64,
}

struct SourceShared {
    renderer: SharedRenderer,
    clock: Arc<dyn MediaClock>,
    size: FrameSize,
    consumer: FrameConsumer,
    stats: Mutex<SourceStats>,
}

impl SourceShared {
    fn stats(&self) -> std::sync::MutexGuard<'_, SourceStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tick(&self) -> bool {
        self.stats().ticks += 1;
        let pts = self.clock.now();
        let rendered = {
            let mut r = self.renderer.lock().unwrap_or_else(|e| e.into_inner());
            r.snapshot(pts, self.size, Antialiasing::None)
        };

        let frame = match rendered {
            Ok(frame) => frame,
            Err(e) => {
                let e = match e {
                    CaptureError::RenderSample(_) => e,
                    other => CaptureError::render_sample(other.to_string()),
                };
                tracing::warn!(error = %e, "skipping frame");
                self.stats().render_failures += 1;
                return false;
            }
        };

        (self.consumer)(FrameSample { frame, pts });
        self.stats().delivered += 1;
        true
    }
}

struct Ticker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodic producer of rendered frames, paced like a display refresh.
///
/// Ticks run on a dedicated thread against absolute deadlines; a late tick skips the deadlines it
/// missed instead of bursting to catch up.
pub struct FrameSource {
    shared: Arc<SourceShared>,
    ticker: Option<Ticker>,
}

impl FrameSource {
    pub fn new(
        renderer: SharedRenderer,
        clock: Arc<dyn MediaClock>,
        size: FrameSize,
        consumer: FrameConsumer,
    ) -> Self {
        Self {
            shared: Arc::new(SourceShared {
                renderer,
                clock,
                size,
                consumer,
                stats: Mutex::new(SourceStats::default()),
            }),
            ticker: None,
        }
    }

    /// Start ticking at `target_fps` (clamped to at least 1). No-op when already running.
    pub fn start(&mut self, target_fps: u32) -> CaptureResult<()> {
        if self.ticker.is_some() {
            return Ok(());
        }
        let period = Duration::from_secs_f64(1.0 / f64::from(target_fps.max(1)));
        let (stop_tx, stop_rx) = channel::<()>();
        let shared = Arc::clone(&self.shared);

        let handle = std::thread::Builder::new()
            .name("scenecap-refresh".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                loop {
                    shared.tick();

                    next += period;
                    let now = Instant::now();
                    while next <= now {
                        next += period;
                        shared.stats().skipped_deadlines += 1;
                    }
                    match stop_rx.recv_timeout(next - now) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|e| anyhow::anyhow!("failed to spawn refresh thread: {e}"))?;

        tracing::debug!(fps = target_fps.max(1), size = %self.shared.size, "frame source started");
        self.ticker = Some(Ticker { stop_tx, handle });
        Ok(())
    }

    /// Stop ticking and wait for the refresh thread. Idempotent.
    pub fn stop(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            return;
        };
        let _ = ticker.stop_tx.send(());
        if ticker.handle.join().is_err() {
            tracing::warn!("refresh thread panicked");
        }
        tracing::debug!(stats = ?self.stats(), "frame source stopped");
    }

    /// Render and deliver one frame on the calling thread. Returns whether a frame was delivered.
    pub fn tick(&self) -> bool {
        self.shared.tick()
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn size(&self) -> FrameSize {
        self.shared.size
    }

    pub fn stats(&self) -> SourceStats {
        *self.shared.stats()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::clock::ManualClock;
    use crate::render::backend::SceneRenderer;

    struct Flat;

    impl SceneRenderer for Flat {
        fn snapshot(
            &mut self,
            _at: MediaTime,
            size: FrameSize,
            aa: Antialiasing,
        ) -> CaptureResult<FrameRGBA> {
            assert_eq!(aa, Antialiasing::None);
            if size.width > 100 {
                return Err(CaptureError::render_sample("too wide"));
            }
            Ok(FrameRGBA::filled(size, [1, 2, 3, 255], true))
        }
    }

    fn source(size: FrameSize, clock: Arc<ManualClock>) -> (FrameSource, Arc<Mutex<Vec<MediaTime>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let consumer: FrameConsumer = Arc::new(move |s: FrameSample| {
            sink.lock().unwrap().push(s.pts);
        });
        let renderer: SharedRenderer = Arc::new(Mutex::new(Flat));
        (FrameSource::new(renderer, clock, size, consumer), seen)
    }

    #[test]
    fn tick_stamps_with_clock() {
        let clock = Arc::new(ManualClock::new(MediaTime::from_micros(100)));
        let (src, seen) = source(FrameSize::new(4, 4), Arc::clone(&clock));
        assert!(src.tick());
        clock.advance(MediaTime::from_micros(50));
        assert!(src.tick());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![MediaTime::from_micros(100), MediaTime::from_micros(150)]
        );
    }

    #[test]
    fn render_failure_skips_the_tick() {
        let clock = Arc::new(ManualClock::default());
        let (src, seen) = source(FrameSize::new(200, 4), clock);
        assert!(!src.tick());
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(src.stats().render_failures, 1);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let clock = Arc::new(ManualClock::default());
        let (mut src, seen) = source(FrameSize::new(4, 4), clock);
        src.start(120).unwrap();
        src.start(120).unwrap();
        assert!(src.is_running());
        std::thread::sleep(Duration::from_millis(60));
        src.stop();
        src.stop();
        assert!(!src.is_running());
        assert!(!seen.lock().unwrap().is_empty());
    }
}
