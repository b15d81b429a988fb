//! Live scene boundary between the session host and the capture pipeline.
//!
//! The host owns anchor lifecycle (added/updated/removed) and touch placement; the renderer only
//! reads. Both sides share a [`SharedScene`].

/// Anchors, effect templates and tracking mode.
pub mod graph;

pub use graph::{
    Anchor, AnchorId, AnchorKind, AttachedEffect, EffectNode, EffectShape, SceneGraph,
    SharedScene, TrackingMode,
};
