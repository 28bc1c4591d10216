//! Gesture engine: detector plus sequence trackers plus event delivery.
//!
//! The host calls [`GestureEngine::tick`] once per frame.  Every match is
//! published as [`GestureEvent::Matched`], immediately followed by any
//! [`GestureEvent::SequenceCompleted`] it caused, so listeners observe events
//! in shape evaluation order.

use tracing::{debug, info};

use crate::detector::{
    Detector, DetectorConfig, GestureMatch, PositionSource, ShapeHandle, TargetId,
};
use crate::sequence::{SequenceCompletion, SequenceDefinition, SequenceTracker};
use crate::sexp::escape_string;
use crate::shapes::ShapeDefinition;

// ── Events ─────────────────────────────────────────────────

/// Events published by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureEvent {
    /// A shape matched on a target.
    Matched(GestureMatch),
    /// All steps of a sequence matched in order.
    SequenceCompleted {
        sequence_id: String,
        target: TargetId,
        matches: Vec<GestureMatch>,
    },
}

impl GestureEvent {
    /// Generate s-expression for event output.
    pub fn to_sexp(&self) -> String {
        match self {
            Self::Matched(m) => {
                format!("(:type :event :event :gesture-matched :match {})", m.to_sexp())
            }
            Self::SequenceCompleted {
                sequence_id,
                target,
                matches,
            } => {
                let shapes: Vec<String> = matches
                    .iter()
                    .map(|m| format!("\"{}\"", escape_string(&m.shape_id)))
                    .collect();
                let time = matches.last().map(|m| m.timestamp_s).unwrap_or(0.0);
                format!(
                    "(:type :event :event :sequence-completed :sequence \"{}\" :target {} :time {:.3} :shapes ({}))",
                    escape_string(sequence_id),
                    target,
                    time,
                    shapes.join(" ")
                )
            }
        }
    }
}

impl From<SequenceCompletion> for GestureEvent {
    fn from(c: SequenceCompletion) -> Self {
        Self::SequenceCompleted {
            sequence_id: c.sequence_id,
            target: c.target,
            matches: c.matches,
        }
    }
}

/// Callback invoked for every published event.
pub type Listener = Box<dyn FnMut(&GestureEvent) + Send>;

// ── Engine ─────────────────────────────────────────────────

/// Owns the detector, the sequence trackers, and the listener list.
pub struct GestureEngine {
    detector: Detector,
    sequences: Vec<SequenceTracker>,
    listeners: Vec<Listener>,
}

impl GestureEngine {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            detector: Detector::new(config),
            sequences: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut Detector {
        &mut self.detector
    }

    // ── Targets ────────────────────────────────────────────

    pub fn register(&mut self, target: TargetId) -> bool {
        self.detector.register(target)
    }

    /// Stop tracking `target`; sequences it was driving are reset.
    pub fn unregister(&mut self, target: TargetId) -> bool {
        self.reset_sequences_for(target);
        self.detector.unregister(target)
    }

    /// Clear `target`'s trail and shape history; sequences it was driving
    /// are reset.
    pub fn reset_history(&mut self, target: TargetId) -> bool {
        self.reset_sequences_for(target);
        self.detector.reset_history(target)
    }

    fn reset_sequences_for(&mut self, target: TargetId) {
        for tracker in &mut self.sequences {
            if tracker.active_target() == Some(target) {
                tracker.reset();
            }
        }
    }

    // ── Shapes ─────────────────────────────────────────────

    pub fn add_shape(&mut self, definition: ShapeDefinition) -> ShapeHandle {
        self.detector.add_shape(definition)
    }

    pub fn remove_shape(&mut self, shape: ShapeHandle) -> Option<ShapeDefinition> {
        self.detector.remove_shape(shape)
    }

    pub fn replace_shape(
        &mut self,
        shape: ShapeHandle,
        definition: ShapeDefinition,
    ) -> Option<ShapeDefinition> {
        self.detector.replace_shape(shape, definition)
    }

    pub fn shape_handle(&self, id: &str) -> Option<ShapeHandle> {
        self.detector.shape_handle(id)
    }

    // ── Sequences ──────────────────────────────────────────

    /// Register a sequence; returns its index.
    pub fn add_sequence(&mut self, definition: SequenceDefinition) -> usize {
        info!(
            "Sequence {:?} registered with {} steps",
            definition.id,
            definition.steps.len()
        );
        self.sequences.push(SequenceTracker::new(definition));
        self.sequences.len() - 1
    }

    pub fn sequences(&self) -> &[SequenceTracker] {
        &self.sequences
    }

    pub fn sequence(&self, id: &str) -> Option<&SequenceTracker> {
        self.sequences.iter().find(|s| s.definition().id == id)
    }

    // ── Listeners ──────────────────────────────────────────

    pub fn subscribe(&mut self, listener: impl FnMut(&GestureEvent) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    // ── Tick ───────────────────────────────────────────────

    /// Advance to `now_s`: expire stale sequences, run detection, feed
    /// matches to the sequence trackers, and publish the resulting events.
    pub fn tick(&mut self, now_s: f64, source: &dyn PositionSource) -> Vec<GestureEvent> {
        for tracker in &mut self.sequences {
            tracker.expire(now_s);
        }

        let matches = self.detector.tick(now_s, source);
        let mut events = Vec::with_capacity(matches.len());
        for m in matches {
            let completions: Vec<SequenceCompletion> = self
                .sequences
                .iter_mut()
                .filter_map(|tracker| tracker.on_match(&m))
                .collect();
            events.push(GestureEvent::Matched(m));
            events.extend(completions.into_iter().map(GestureEvent::from));
        }

        if !events.is_empty() {
            debug!("Tick {:.3}s produced {} gesture events", now_s, events.len());
        }
        for event in &events {
            for listener in &mut self.listeners {
                listener(event);
            }
        }
        events
    }

    // ── IPC-style introspection ────────────────────────────

    /// Generate s-expression for status output.
    pub fn status_sexp(&self) -> String {
        let sequences: Vec<String> = self.sequences.iter().map(|s| s.status_sexp()).collect();
        let detector = self.detector.status_sexp();
        format!(
            "(:detector {} :sequences ({}) :listeners {})",
            detector,
            sequences.join(" "),
            self.listeners.len()
        )
    }

    /// Generate s-expression of the effective configuration, in the same
    /// form the config file uses.
    pub fn config_sexp(&self) -> String {
        let shapes: Vec<String> = self.detector.shapes().map(|(_, def)| def.to_sexp()).collect();
        let sequences: Vec<String> = self
            .sequences
            .iter()
            .map(|s| {
                s.definition()
                    .config_sexp(|h| self.detector.shape(h).map(|def| def.id.clone()))
            })
            .collect();
        format!(
            "(:detector {} :shapes ({}) :sequences ({}))",
            self.detector.config_sexp(),
            shapes.join(" "),
            sequences.join(" ")
        )
    }
}

impl Default for GestureEngine {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

// ── Tests ──────────────────────────────────────────────────
