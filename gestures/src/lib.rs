//! Motion gesture recognition over 3D position streams.
//!
//! Tracked targets (hands, controllers, tool tips) feed one position per
//! tick.  Each target keeps a short [`Trail`]; registered shapes (circular
//! arcs, drawn templates, straight strokes) are evaluated against it, and
//! matches can be chained into ordered multi-step sequences.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use motion_gestures::{
//!     CircularConfig, GestureEngine, ShapeDefinition, ShapeKind, TargetId, Vec3,
//! };
//!
//! let mut engine = GestureEngine::default();
//! engine.add_shape(ShapeDefinition::new(
//!     "circle",
//!     ShapeKind::Circular(CircularConfig::default()),
//! ));
//! engine.register(TargetId(1));
//!
//! let feed = HashMap::from([(TargetId(1), Vec3::new(0.1, 1.2, -0.3))]);
//! for event in engine.tick(0.0, &feed) {
//!     println!("{}", event.to_sexp());
//! }
//! ```

pub mod config;
pub mod detector;
pub mod engine;
pub mod geometry;
pub mod recording;
pub mod sequence;
pub mod sexp;
pub mod shapes;
pub mod trail;

pub use config::EngineConfig;
pub use detector::{
    Detector, DetectorConfig, GestureMatch, PositionSource, ShapeHandle, ShapePhase, TargetId,
};
pub use engine::{GestureEngine, GestureEvent};
pub use geometry::{Vec2, Vec3};
pub use sequence::{SequenceDefinition, SequenceStep, SequenceTracker};
pub use shapes::{
    CircularConfig, DrawnConfig, DrawnTemplate, LinearConfig, ShapeDefinition, ShapeKind,
    ShapeMatcher,
};
pub use trail::{Sample, Trail, TrailConfig};
