use kurbo::Shape as _;

use crate::{
    foundation::core::{FrameSize, MediaTime, Point, Rect},
    foundation::error::{CaptureError, CaptureResult},
    render::backend::{Antialiasing, FrameRGBA, RenderSettings, SceneRenderer},
    scene::{Anchor, EffectShape, SharedScene},
};

/// Peak relative scale change of a pulsing effect.
const PULSE_AMPLITUDE: f64 = 0.15;

/// CPU snapshot renderer for a [`SharedScene`].
///
/// Each snapshot clears to the configured color and draws every anchor's attached effect. The
/// scene lock is held only while the draw list is built, never while rasterizing.
pub struct CpuSceneRenderer {
    scene: SharedScene,
    settings: RenderSettings,
}

impl CpuSceneRenderer {
    pub fn new(scene: SharedScene, settings: RenderSettings) -> Self {
        Self { scene, settings }
    }

    fn collect_draws(
        &self,
        at: MediaTime,
        size: FrameSize,
        aa: Antialiasing,
    ) -> CaptureResult<Vec<EffectDraw>> {
        let scene = self
            .scene
            .read()
            .map_err(|_| CaptureError::render_sample("scene lock poisoned"))?;
        Ok(scene
            .anchors()
            .filter_map(|anchor| effect_draw(anchor, at, size, aa))
            .collect())
    }
}

struct EffectDraw {
    shape: EffectShape,
    rect: Rect,
    rgba: [u8; 4],
}

impl SceneRenderer for CpuSceneRenderer {
    fn snapshot(
        &mut self,
        at: MediaTime,
        size: FrameSize,
        aa: Antialiasing,
    ) -> CaptureResult<FrameRGBA> {
        let width_u16: u16 = size
            .width
            .try_into()
            .map_err(|_| CaptureError::render_sample("snapshot width exceeds u16"))?;
        let height_u16: u16 = size
            .height
            .try_into()
            .map_err(|_| CaptureError::render_sample("snapshot height exceeds u16"))?;
        if size.is_empty() {
            return Err(CaptureError::render_sample("snapshot size must be non-zero"));
        }

        let draws = self.collect_draws(at, size, aa)?;
        let tolerance = match aa {
            Antialiasing::None => 1.0,
            Antialiasing::Standard => 0.1,
        };

        let mut pixmap = vello_cpu::Pixmap::new(width_u16, height_u16);
        let mut ctx = vello_cpu::RenderContext::new(width_u16, height_u16);
        ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);

        if let Some([r, g, b, a]) = self.settings.clear_rgba {
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(r, g, b, a));
            ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
                0.0,
                0.0,
                f64::from(size.width),
                f64::from(size.height),
            ));
        }

        for d in &draws {
            let [r, g, b, a] = d.rgba;
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(r, g, b, a));
            match d.shape {
                EffectShape::Rect => ctx.fill_rect(&rect_to_cpu(d.rect)),
                EffectShape::Ellipse => {
                    let path = kurbo::Ellipse::from_rect(d.rect).to_path(tolerance);
                    ctx.fill_path(&bezpath_to_cpu(&path));
                }
            }
        }

        ctx.flush();
        ctx.render_to_pixmap(&mut pixmap);

        Ok(FrameRGBA {
            width: size.width,
            height: size.height,
            data: pixmap.data_as_u8_slice().to_vec(),
            premultiplied: true,
        })
    }
}

fn effect_draw(
    anchor: &Anchor,
    at: MediaTime,
    size: FrameSize,
    aa: Antialiasing,
) -> Option<EffectDraw> {
    let effect = anchor.effect.as_ref()?;
    let center = anchor.effect_center()?;

    let node = &effect.node;
    let pulse = if node.pulse_hz > 0.0 {
        1.0 + PULSE_AMPLITUDE * (std::f64::consts::TAU * node.pulse_hz * at.as_secs_f64()).sin()
    } else {
        1.0
    };
    let scale = (1.0 - effect.depth).max(0.0) * pulse;

    let (w, h) = (f64::from(size.width), f64::from(size.height));
    let half_w = 0.5 * node.size.width * w * scale;
    let half_h = 0.5 * node.size.height * h * scale;
    let c = Point::new(center.x * w, center.y * h);
    let mut rect = Rect::new(c.x - half_w, c.y - half_h, c.x + half_w, c.y + half_h);
    if aa == Antialiasing::None {
        rect = rect.round();
    }
    if rect.width() <= 0.0 || rect.height() <= 0.0 {
        return None;
    }

    Some(EffectDraw {
        shape: node.shape,
        rect,
        rgba: node.color.to_array(),
    })
}

fn rect_to_cpu(r: Rect) -> vello_cpu::kurbo::Rect {
    vello_cpu::kurbo::Rect::new(r.x0, r.y0, r.x1, r.y1)
}

fn point_to_cpu(p: Point) -> vello_cpu::kurbo::Point {
    vello_cpu::kurbo::Point::new(p.x, p.y)
}

fn bezpath_to_cpu(path: &kurbo::BezPath) -> vello_cpu::kurbo::BezPath {
    use kurbo::PathEl;

    let mut out = vello_cpu::kurbo::BezPath::new();
    for &el in path.elements() {
        match el {
            PathEl::MoveTo(p) => out.move_to(point_to_cpu(p)),
            PathEl::LineTo(p) => out.line_to(point_to_cpu(p)),
            PathEl::QuadTo(p1, p2) => out.quad_to(point_to_cpu(p1), point_to_cpu(p2)),
            PathEl::CurveTo(p1, p2, p3) => {
                out.curve_to(point_to_cpu(p1), point_to_cpu(p2), point_to_cpu(p3));
            }
            PathEl::ClosePath => out.close_path(),
        }
    }
    out
}
