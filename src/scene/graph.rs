use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::foundation::core::{Point, Rect, Rgba8, Size, Vec2};

/// Vertical lift applied above a face's bounds when attaching an effect.
const FACE_EFFECT_LIFT: f64 = 0.05;
/// Depth push applied to effects attached to faces.
const FACE_EFFECT_DEPTH: f64 = 0.05;

/// Scene handle shared by the session host (writer) and renderers (readers).
pub type SharedScene = Arc<RwLock<SceneGraph>>;

/// Which tracker drives anchors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Anchors follow detected faces; the host does not accept tap placement.
    Face,
    /// Anchors are placed on world surfaces, including by tapping the view.
    World,
}

impl TrackingMode {
    /// Prefer face tracking when the device supports it.
    pub fn select(face_tracking_supported: bool) -> Self {
        if face_tracking_supported {
            Self::Face
        } else {
            Self::World
        }
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct AnchorId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnchorKind {
    /// A detected face. `bounds` are in normalized view coordinates.
    Face { bounds: Rect },
    /// A point on a world surface.
    World,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectShape {
    Rect,
    Ellipse,
}

/// Visual template cloned onto every anchor.
///
/// Sizes are in normalized view units (1.0 = full view width/height).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EffectNode {
    pub shape: EffectShape,
    pub size: Size,
    pub color: Rgba8,
    /// Scale oscillation frequency; `0.0` renders a static effect.
    #[serde(default)]
    pub pulse_hz: f64,
}

impl Default for EffectNode {
    fn default() -> Self {
        Self {
            shape: EffectShape::Ellipse,
            size: Size::new(0.12, 0.12),
            color: Rgba8::new(255, 140, 32, 230),
            pulse_hz: 1.5,
        }
    }
}

/// An effect clone attached to one anchor.
#[derive(Clone, Debug, PartialEq)]
pub struct AttachedEffect {
    pub node: EffectNode,
    /// Offset from the anchor position, normalized view units.
    pub offset: Vec2,
    /// Pushes the effect away from the camera; renderers shrink it by `1 - depth`.
    pub depth: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Anchor {
    pub id: AnchorId,
    pub kind: AnchorKind,
    /// Normalized view coordinates, origin top-left.
    pub position: Point,
    pub effect: Option<AttachedEffect>,
}

impl Anchor {
    /// Where the attached effect is centered, if any.
    pub fn effect_center(&self) -> Option<Point> {
        self.effect.as_ref().map(|e| self.position + e.offset)
    }
}

/// Anchor set plus the effect template applied to every anchor.
#[derive(Debug)]
pub struct SceneGraph {
    tracking: TrackingMode,
    effect: Option<EffectNode>,
    anchors: BTreeMap<AnchorId, Anchor>,
    next_id: u64,
}

impl SceneGraph {
    pub fn new(tracking: TrackingMode) -> Self {
        Self {
            tracking,
            effect: None,
            anchors: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn shared(self) -> SharedScene {
        Arc::new(RwLock::new(self))
    }

    pub fn tracking_mode(&self) -> TrackingMode {
        self.tracking
    }

    pub fn effect(&self) -> Option<&EffectNode> {
        self.effect.as_ref()
    }

    /// Replace the effect template.
    ///
    /// The previous effect is detached from every anchor and a clone of the new one is attached
    /// in its place.
    pub fn set_effect(&mut self, effect: Option<EffectNode>) {
        self.effect = effect;
        for anchor in self.anchors.values_mut() {
            anchor.effect = attach(self.effect.as_ref(), anchor.kind, anchor.position);
        }
    }

    /// Register an anchor reported by the tracker and attach the current effect to it.
    pub fn anchor_added(&mut self, kind: AnchorKind, position: Point) -> AnchorId {
        let id = AnchorId(self.next_id);
        self.next_id += 1;
        let effect = attach(self.effect.as_ref(), kind, position);
        self.anchors.insert(
            id,
            Anchor {
                id,
                kind,
                position,
                effect,
            },
        );
        tracing::debug!(anchor = id.0, ?kind, "anchor added");
        id
    }

    /// Move an existing anchor. Returns `false` if the anchor is unknown.
    pub fn anchor_updated(&mut self, id: AnchorId, kind: AnchorKind, position: Point) -> bool {
        let Some(anchor) = self.anchors.get_mut(&id) else {
            return false;
        };
        let kind_changed = anchor.kind != kind;
        anchor.kind = kind;
        anchor.position = position;
        if kind_changed {
            anchor.effect = attach(self.effect.as_ref(), kind, position);
        }
        true
    }

    pub fn anchor_removed(&mut self, id: AnchorId) -> bool {
        let removed = self.anchors.remove(&id).is_some();
        if removed {
            tracing::debug!(anchor = id.0, "anchor removed");
        }
        removed
    }

    /// Touch-driven placement of a world anchor at a normalized view point.
    ///
    /// Returns `None` in face tracking mode or when the point falls outside the view.
    pub fn place_anchor(&mut self, point: Point) -> Option<AnchorId> {
        if self.tracking != TrackingMode::World {
            return None;
        }
        if !(0.0..=1.0).contains(&point.x) || !(0.0..=1.0).contains(&point.y) {
            return None;
        }
        Some(self.anchor_added(AnchorKind::World, point))
    }

    /// Drop every anchor, as when the tracking session pauses.
    pub fn clear(&mut self) {
        self.anchors.clear();
    }

    pub fn anchor(&self, id: AnchorId) -> Option<&Anchor> {
        self.anchors.get(&id)
    }

    pub fn anchors(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.values()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

fn attach(effect: Option<&EffectNode>, kind: AnchorKind, position: Point) -> Option<AttachedEffect> {
    let node = effect?.clone();
    let (offset, depth) = match kind {
        AnchorKind::World => (Vec2::ZERO, 0.0),
        AnchorKind::Face { bounds } => {
            // Center horizontally on the face, sit just above its top edge.
            let target = Point::new(bounds.center().x, bounds.y0 - FACE_EFFECT_LIFT);
            (target - position, FACE_EFFECT_DEPTH)
        }
    };
    Some(AttachedEffect {
        node,
        offset,
        depth,
    })
}
