//! Off-screen rendering of the live scene.

/// Frame buffer type and the renderer trait consumed by the frame source.
pub mod backend;
/// CPU rasterizer powered by `vello_cpu`.
pub mod cpu;
