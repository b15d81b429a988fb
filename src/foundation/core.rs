use std::cmp::Ordering;

use crate::foundation::error::{CaptureError, CaptureResult};

pub use kurbo::{Point, Rect, Size, Vec2};

/// Timescale used for capture timestamps (microsecond ticks).
pub const DEFAULT_TIMESCALE: u32 = 1_000_000;

/// A rational media timestamp: `value / timescale` seconds.
///
/// Comparison is exact across timescales, so `1/30` and `33333/1000000` are ordered correctly
/// without converting through floating point.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32, // must be > 0
}

impl MediaTime {
    pub const ZERO: Self = Self {
        value: 0,
        timescale: DEFAULT_TIMESCALE,
    };

    pub fn new(value: i64, timescale: u32) -> CaptureResult<Self> {
        if timescale == 0 {
            return Err(CaptureError::validation("MediaTime timescale must be > 0"));
        }
        Ok(Self { value, timescale })
    }

    /// Round `secs` to the nearest tick of `timescale`.
    pub fn from_secs(secs: f64, timescale: u32) -> Self {
        let timescale = timescale.max(1);
        Self {
            value: (secs * f64::from(timescale)).round() as i64,
            timescale,
        }
    }

    pub fn from_micros(micros: i64) -> Self {
        Self {
            value: micros,
            timescale: DEFAULT_TIMESCALE,
        }
    }

    pub fn as_secs_f64(self) -> f64 {
        self.value as f64 / f64::from(self.timescale)
    }

    /// Re-express in `timescale`, rounding half away from zero.
    pub fn convert_scale(self, timescale: u32) -> Self {
        let timescale = timescale.max(1);
        if timescale == self.timescale {
            return self;
        }
        let num = i128::from(self.value) * i128::from(timescale);
        let den = i128::from(self.timescale);
        let half = den / 2;
        let value = if num >= 0 {
            (num + half) / den
        } else {
            (num - half) / den
        };
        Self {
            value: value.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64,
            timescale,
        }
    }

    /// `self - earlier`, expressed in `self`'s timescale. Negative results are kept.
    pub fn sub(self, earlier: Self) -> Self {
        let earlier = earlier.convert_scale(self.timescale);
        Self {
            value: self.value.saturating_sub(earlier.value),
            timescale: self.timescale,
        }
    }

    pub fn is_negative(self) -> bool {
        self.value < 0
    }

    fn cross(self, other: Self) -> (i128, i128) {
        (
            i128::from(self.value) * i128::from(other.timescale),
            i128::from(other.value) * i128::from(self.timescale),
        )
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = self.cross(*other);
        a == b
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = self.cross(*other);
        a.cmp(&b)
    }
}

/// Output frame dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Derive a capture size from view bounds (in points, possibly fractional).
    ///
    /// Dimensions are truncated and rounded down to even numbers (yuv420p), with a 2x2 floor.
    pub fn from_view_bounds(width: f64, height: f64) -> Self {
        fn even(v: f64) -> u32 {
            let v = if v.is_finite() { v.max(0.0) as u32 } else { 0 };
            (v & !1).max(2)
        }
        Self {
            width: even(width),
            height: even(height),
        }
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn is_even(self) -> bool {
        self.width.is_multiple_of(2) && self.height.is_multiple_of(2)
    }

    pub fn pixel_count(self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    /// Byte length of a tightly packed RGBA8 buffer of this size.
    pub fn rgba8_len(self) -> usize {
        self.pixel_count().saturating_mul(4)
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Straight-alpha RGBA8 color, as it appears in configuration files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}
