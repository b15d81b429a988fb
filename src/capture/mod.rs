//! Live capture: a refresh-paced frame source feeding the encoder through a one-slot queue.

/// Recording state machine tying source, queue and encoder together.
pub mod controller;
/// One-slot latest-wins handoff and the encode thread.
pub mod queue;
/// Refresh-paced frame production.
pub mod source;
