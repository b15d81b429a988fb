use std::sync::{Arc, Mutex};

use crate::foundation::core::{FrameSize, MediaTime};
use crate::foundation::error::{CaptureError, CaptureResult};

/// A rendered frame as RGBA8 pixels.
///
/// Renderers in this crate produce **premultiplied** alpha; the flag makes that explicit for
/// writers, which flatten alpha before encoding.
#[derive(Clone, Debug)]
pub struct FrameRGBA {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// RGBA8 bytes, tightly packed, row-major.
    pub data: Vec<u8>,
    /// Whether `data` is premultiplied alpha.
    pub premultiplied: bool,
}

impl FrameRGBA {
    /// A frame where every pixel is `rgba`.
    pub fn filled(size: FrameSize, rgba: [u8; 4], premultiplied: bool) -> Self {
        let mut data = vec![0u8; size.rgba8_len()];
        for px in data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        Self {
            width: size.width,
            height: size.height,
            data,
            premultiplied,
        }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    /// Check that `data` matches `width * height * 4`.
    pub fn validate(&self) -> CaptureResult<()> {
        if self.data.len() != self.size().rgba8_len() {
            return Err(CaptureError::validation(format!(
                "frame data is {} bytes, expected {} for {}",
                self.data.len(),
                self.size().rgba8_len(),
                self.size()
            )));
        }
        Ok(())
    }
}

/// Anti-aliasing requested for a snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Antialiasing {
    /// Fast path for recording: geometry snapped to whole pixels, coarse curve flattening.
    None,
    /// Sub-pixel geometry and fine curve flattening.
    #[default]
    Standard,
}

/// Anything that can produce a pixel buffer of the current scene on demand.
///
/// Implementations must be cheap to call at display refresh rate; failures are reported per call
/// and are never fatal to the caller.
pub trait SceneRenderer: Send {
    /// Render the scene as it looks at `at` into a `size` buffer.
    fn snapshot(
        &mut self,
        at: MediaTime,
        size: FrameSize,
        aa: Antialiasing,
    ) -> CaptureResult<FrameRGBA>;
}

/// Renderer handle shared between the host and the frame source.
pub type SharedRenderer = Arc<Mutex<dyn SceneRenderer>>;

/// Backend-agnostic settings.
#[derive(Clone, Debug, Default)]
pub struct RenderSettings {
    /// If set, the target is cleared to this straight-alpha RGBA8 color before drawing.
    pub clear_rgba: Option<[u8; 4]>,
}
