use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::capture::source::FrameSample;
use crate::encode::encoder::FrameEncoder;
use crate::foundation::error::{CaptureError, CaptureResult};

struct SlotState<T> {
    item: Option<T>,
    closed: bool,
    replaced: u64,
}

/// One-slot, latest-wins handoff between a single producer and a single consumer.
///
/// A push while the slot is full replaces the older item, so the consumer always sees the most
/// recent value and items never reorder.
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                item: None,
                closed: false,
                replaced: 0,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `item`, replacing any unconsumed one. Returns `false` once the slot is closed.
    pub fn push(&self, item: T) -> bool {
        let mut st = self.lock();
        if st.closed {
            return false;
        }
        if st.item.replace(item).is_some() {
            st.replaced += 1;
        }
        drop(st);
        self.ready.notify_one();
        true
    }

    /// Block until an item is available. After `close`, the pending item (if any) is still
    /// returned, then `None`.
    pub fn pop(&self) -> Option<T> {
        let mut st = self.lock();
        loop {
            if let Some(item) = st.item.take() {
                return Some(item);
            }
            if st.closed {
                return None;
            }
            st = self.ready.wait(st).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    /// Number of items overwritten before the consumer took them.
    pub fn replaced(&self) -> u64 {
        self.lock().replaced
    }
}

/// The dedicated encode thread: drains a [`LatestSlot`] into a [`FrameEncoder`] in arrival order.
pub struct EncodeWorker {
    slot: Arc<LatestSlot<FrameSample>>,
    handle: Option<JoinHandle<()>>,
}

impl EncodeWorker {
    pub fn spawn(encoder: FrameEncoder) -> CaptureResult<Self> {
        let slot = Arc::new(LatestSlot::<FrameSample>::new());
        let rx = Arc::clone(&slot);
        let handle = std::thread::Builder::new()
            .name("scenecap-encode".to_string())
            .spawn(move || {
                while let Some(sample) = rx.pop() {
                    encoder.write(&sample.frame, sample.pts);
                }
            })
            .map_err(|e| CaptureError::encoder_init(format!("failed to spawn encode thread: {e}")))?;

        Ok(Self {
            slot,
            handle: Some(handle),
        })
    }

    pub fn slot(&self) -> Arc<LatestSlot<FrameSample>> {
        Arc::clone(&self.slot)
    }

    /// Stop accepting frames, write the pending one and wait for the thread.
    pub fn close_and_join(mut self) -> u64 {
        self.slot.close();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("encode thread panicked");
        }
        self.slot.replaced()
    }
}

impl Drop for EncodeWorker {
    fn drop(&mut self) {
        // Never join here: the worker may be dropped from a callback running on its own thread.
        self.slot.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_push_wins() {
        let slot = LatestSlot::new();
        assert!(slot.push(1));
        assert!(slot.push(2));
        assert_eq!(slot.replaced(), 1);
        assert_eq!(slot.pop(), Some(2));
    }

    #[test]
    fn close_drains_pending_then_ends() {
        let slot = LatestSlot::new();
        slot.push("a");
        slot.close();
        assert!(!slot.push("b"));
        assert_eq!(slot.pop(), Some("a"));
        assert_eq!(slot.pop(), None);
    }

    #[test]
    fn pop_wakes_on_push_from_another_thread() {
        let slot = Arc::new(LatestSlot::new());
        let tx = Arc::clone(&slot);
        let h = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            tx.push(7u32);
        });
        assert_eq!(slot.pop(), Some(7));
        h.join().unwrap();
    }

    #[test]
    fn worker_writes_pending_sample_before_joining() {
        use crate::encode::writer::{TrackConfig, WriterKind};
        use crate::foundation::core::{FrameSize, MediaTime};
        use crate::render::backend::FrameRGBA;

        let size = FrameSize::new(4, 4);
        let cfg = TrackConfig::new(size, "target/queue_unit/worker/recording.json", 30);
        let encoder = FrameEncoder::open(cfg, &WriterKind::Manifest).unwrap();
        let worker = EncodeWorker::spawn(encoder.clone()).unwrap();

        assert!(worker.slot().push(FrameSample {
            frame: FrameRGBA::filled(size, [1, 2, 3, 255], true),
            pts: MediaTime::ZERO,
        }));
        assert_eq!(worker.close_and_join(), 0);
        assert_eq!(encoder.session().frames_appended, 1);
        encoder.abandon();
    }
}
