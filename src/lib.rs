pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod inference;
pub mod labels;
pub mod logging;
pub mod placer;
pub mod pose;
pub mod renderer;
pub mod sim;

pub use engine::{Anchor, HitResult, Trackable, TrackingFrame, TrackingSession, TrackingState};
pub use error::{Acquire, EngineError};
pub use labels::{AnchorBatch, LabeledAnchor, LabeledAnchorSet};
pub use placer::AnchorPlacer;
pub use renderer::{ArRenderer, FrameReport, LabelSink, Notice};
