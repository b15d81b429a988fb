use std::sync::Arc;

use scenecap::{
    AnchorKind, Antialiasing, CpuSceneRenderer, EffectNode, EffectShape, FrameRGBA, FrameSize,
    MediaTime, Point, Rect, RenderSettings, Rgba8, SceneGraph, SceneRenderer, Size, TrackingMode,
};

fn px(frame: &FrameRGBA, x: u32, y: u32) -> [u8; 4] {
    let i = ((y * frame.width + x) * 4) as usize;
    frame.data[i..i + 4].try_into().unwrap()
}

fn square(color: Rgba8) -> EffectNode {
    EffectNode {
        shape: EffectShape::Rect,
        size: Size::new(0.25, 0.25),
        color,
        pulse_hz: 0.0,
    }
}

#[test]
fn snapshots_follow_scene_mutations() {
    let scene = SceneGraph::new(TrackingMode::World).shared();
    let mut r = CpuSceneRenderer::new(
        Arc::clone(&scene),
        RenderSettings {
            clear_rgba: Some([0, 0, 0, 255]),
        },
    );
    let size = FrameSize::new(40, 40);

    let before = r.snapshot(MediaTime::ZERO, size, Antialiasing::None).unwrap();
    assert_eq!(px(&before, 10, 10), [0, 0, 0, 255]);

    let host = Arc::clone(&scene);
    std::thread::spawn(move || {
        let mut g = host.write().unwrap();
        g.set_effect(Some(square(Rgba8::new(0, 255, 0, 255))));
        g.place_anchor(Point::new(0.25, 0.25)).unwrap();
    })
    .join()
    .unwrap();

    let after = r.snapshot(MediaTime::ZERO, size, Antialiasing::None).unwrap();
    assert_eq!(px(&after, 10, 10), [0, 255, 0, 255]);
    assert_eq!(px(&after, 30, 30), [0, 0, 0, 255]);

    scene
        .write()
        .unwrap()
        .set_effect(Some(square(Rgba8::new(0, 0, 255, 255))));
    let replaced = r.snapshot(MediaTime::ZERO, size, Antialiasing::None).unwrap();
    assert_eq!(px(&replaced, 10, 10), [0, 0, 255, 255]);

    scene.write().unwrap().clear();
    let cleared = r.snapshot(MediaTime::ZERO, size, Antialiasing::None).unwrap();
    assert_eq!(px(&cleared, 10, 10), [0, 0, 0, 255]);
}

#[test]
fn face_effect_renders_above_the_face() {
    let mut g = SceneGraph::new(TrackingMode::Face);
    g.set_effect(Some(square(Rgba8::new(255, 0, 0, 255))));
    let bounds = Rect::new(0.3, 0.5, 0.7, 0.9);
    g.anchor_added(AnchorKind::Face { bounds }, bounds.center());
    let mut r = CpuSceneRenderer::new(
        g.shared(),
        RenderSettings {
            clear_rgba: Some([0, 0, 0, 255]),
        },
    );

    let f = r
        .snapshot(MediaTime::ZERO, FrameSize::new(100, 100), Antialiasing::None)
        .unwrap();
    // Effect center is (0.5, 0.45); the face center (0.5, 0.7) stays clear.
    assert_eq!(px(&f, 50, 45), [255, 0, 0, 255]);
    assert_eq!(px(&f, 50, 75), [0, 0, 0, 255]);
}
