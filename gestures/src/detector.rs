//! Detection scheduler: per-target trails, per-shape gates, and match records.
//!
//! Each tick the detector pulls one position per registered target from a
//! [`PositionSource`], feeds it into that target's [`Trail`], prunes, and
//! runs every registered shape whose sample-count and cooldown gates are
//! open.  Successful fits are completed from the raw trail and returned as
//! [`GestureMatch`] records in evaluation order (targets ascending, then
//! shapes in registration order).

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::{debug, info, warn};

use crate::geometry::{path_length, Vec3};
use crate::sexp::{escape_string, fmt_bool};
use crate::shapes::{positions, ShapeDefinition, ShapeFit, ShapeKind, ShapeMatcher};
use crate::trail::{PruneOutcome, Sample, Trail, TrailConfig};

// ── Identities ─────────────────────────────────────────────

/// Host-assigned identity of a tracked entity (hand, controller, tool tip).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(pub u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable index of a registered shape.  Never reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShapeHandle(pub usize);

impl ShapeHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

// ── Position feed ──────────────────────────────────────────

/// Supplies the current world position of a target for this tick.
pub trait PositionSource {
    fn position(&self, target: TargetId) -> Option<Vec3>;
}

impl PositionSource for HashMap<TargetId, Vec3> {
    fn position(&self, target: TargetId) -> Option<Vec3> {
        self.get(&target).copied()
    }
}

impl PositionSource for BTreeMap<TargetId, Vec3> {
    fn position(&self, target: TargetId) -> Option<Vec3> {
        self.get(&target).copied()
    }
}

// ── Configuration ──────────────────────────────────────────

/// Detector-wide tunables.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub trail: TrailConfig,
    /// Global floor on trail length before any shape is evaluated.
    pub minimum_samples: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            trail: TrailConfig::default(),
            minimum_samples: 10,
        }
    }
}

impl DetectorConfig {
    /// Generate s-expression in config-file form.
    pub fn to_sexp(&self) -> String {
        format!(
            "(:min-sample-distance {} :max-sample-age {} :minimum-samples {})",
            self.trail.min_sample_distance, self.trail.max_sample_age_s, self.minimum_samples,
        )
    }
}

// ── Match record ───────────────────────────────────────────

/// A successful shape evaluation for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureMatch {
    pub shape: ShapeHandle,
    pub shape_id: String,
    pub target: TargetId,
    /// Tick time the match was detected at (seconds).
    pub timestamp_s: f64,
    pub center: Vec3,
    pub radius: f32,
    pub normal: Vec3,
    pub coverage_deg: f32,
    pub travel_distance: f32,
    pub travel_direction: Vec3,
    pub start_position: Vec3,
    pub end_position: Vec3,
    pub duration_s: f64,
    pub clockwise: bool,
    pub samples: Vec<Vec3>,
}

impl GestureMatch {
    /// Complete a matcher's fit with values taken from the raw trail.
    /// `samples` must not be empty.
    fn from_fit(
        fit: ShapeFit,
        shape: ShapeHandle,
        shape_id: &str,
        target: TargetId,
        timestamp_s: f64,
        samples: &[Sample],
    ) -> Self {
        let first = samples[0];
        let last = samples[samples.len() - 1];
        let start_position = fit.start_position.unwrap_or(first.position);
        let end_position = fit.end_position.unwrap_or(last.position);
        let raw = fit.samples.unwrap_or_else(|| positions(samples));
        let travel_distance = fit.travel_distance.unwrap_or_else(|| path_length(&raw));
        let travel_direction = fit
            .travel_direction
            .unwrap_or_else(|| (end_position - start_position).normalize_or_zero());

        Self {
            shape,
            shape_id: shape_id.to_string(),
            target,
            timestamp_s,
            center: fit.center,
            radius: fit.radius,
            normal: fit.normal,
            coverage_deg: fit.coverage_deg,
            travel_distance,
            travel_direction,
            start_position,
            end_position,
            duration_s: fit
                .duration_s
                .unwrap_or(last.timestamp_s - first.timestamp_s),
            clockwise: fit.clockwise,
            samples: raw,
        }
    }

    /// Generate s-expression for event output.
    pub fn to_sexp(&self) -> String {
        format!(
            "(:shape \"{}\" :target {} :time {:.3} :center {} :radius {:.4} :normal {} :coverage {:.1} :travel-distance {:.4} :travel-direction {} :start {} :end {} :duration {:.3} :clockwise {} :samples {})",
            escape_string(&self.shape_id),
            self.target,
            self.timestamp_s,
            vec3_sexp(self.center),
            self.radius,
            vec3_sexp(self.normal),
            self.coverage_deg,
            self.travel_distance,
            vec3_sexp(self.travel_direction),
            vec3_sexp(self.start_position),
            vec3_sexp(self.end_position),
            self.duration_s,
            fmt_bool(self.clockwise),
            self.samples.len(),
        )
    }
}

pub(crate) fn vec3_sexp(v: Vec3) -> String {
    format!("({:.4} {:.4} {:.4})", v.x, v.y, v.z)
}

// ── Per-target state ───────────────────────────────────────

/// Scheduling phase of one (target, shape) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShapePhase {
    /// Gates are open; the shape is evaluated whenever enough samples exist.
    Idle,
    /// A recent match blocks evaluation for `remaining_s` more seconds.
    CoolingDown { remaining_s: f64 },
}

impl ShapePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CoolingDown { .. } => "cooling-down",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ShapeHistory {
    last_detection_s: Option<f64>,
    last_match: Option<GestureMatch>,
}

#[derive(Debug, Default)]
struct TrackedTarget {
    trail: Trail,
    /// Indexed by `ShapeHandle`; grown on demand.
    history: Vec<ShapeHistory>,
}

impl TrackedTarget {
    fn history(&self, shape: ShapeHandle) -> Option<&ShapeHistory> {
        self.history.get(shape.index())
    }

    fn history_mut(&mut self, shape: ShapeHandle) -> &mut ShapeHistory {
        let idx = shape.index();
        if self.history.len() <= idx {
            self.history.resize_with(idx + 1, ShapeHistory::default);
        }
        &mut self.history[idx]
    }

    fn reset(&mut self) {
        self.trail.clear();
        self.history.clear();
    }
}

// ── Detector ───────────────────────────────────────────────

/// Per-target, per-shape detection scheduler.
pub struct Detector {
    pub config: DetectorConfig,
    /// Arena of registered shapes; removed slots stay `None`.
    shapes: Vec<Option<ShapeDefinition>>,
    targets: BTreeMap<TargetId, TrackedTarget>,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            shapes: Vec::new(),
            targets: BTreeMap::new(),
        }
    }

    // ── Targets ────────────────────────────────────────────

    /// Start tracking `target`.  Returns false if it was already registered.
    pub fn register(&mut self, target: TargetId) -> bool {
        if self.targets.contains_key(&target) {
            return false;
        }
        self.targets.insert(target, TrackedTarget::default());
        info!("Gesture target {} registered", target);
        true
    }

    /// Stop tracking `target`, dropping its trail and history.
    pub fn unregister(&mut self, target: TargetId) -> bool {
        let removed = self.targets.remove(&target).is_some();
        if removed {
            info!("Gesture target {} unregistered", target);
        }
        removed
    }

    /// Clear the trail and per-shape history of `target`.
    pub fn reset_history(&mut self, target: TargetId) -> bool {
        match self.targets.get_mut(&target) {
            Some(tracked) => {
                tracked.reset();
                debug!("Gesture target {} history reset", target);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, target: TargetId) -> bool {
        self.targets.contains_key(&target)
    }

    pub fn targets(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.targets.keys().copied()
    }

    // ── Shapes ─────────────────────────────────────────────

    /// Register a shape and return its handle.
    pub fn add_shape(&mut self, definition: ShapeDefinition) -> ShapeHandle {
        check_definition(&definition);
        if self.shape_handle(&definition.id).is_some() {
            warn!(
                "Shape id {:?} registered twice; lookups by name return the first",
                definition.id
            );
        }
        let handle = ShapeHandle(self.shapes.len());
        info!(
            "Shape {:?} ({}) registered as #{}",
            definition.id,
            definition.kind.as_str(),
            handle.index()
        );
        self.shapes.push(Some(definition));
        handle
    }

    /// Remove a shape.  Its handle is retired and its history dropped.
    pub fn remove_shape(&mut self, shape: ShapeHandle) -> Option<ShapeDefinition> {
        let removed = self.shapes.get_mut(shape.index())?.take()?;
        for tracked in self.targets.values_mut() {
            if let Some(history) = tracked.history.get_mut(shape.index()) {
                *history = ShapeHistory::default();
            }
        }
        info!("Shape {:?} removed", removed.id);
        Some(removed)
    }

    /// Swap in a new definition for an existing handle, keeping cooldown
    /// history.  Returns the previous definition.
    pub fn replace_shape(
        &mut self,
        shape: ShapeHandle,
        definition: ShapeDefinition,
    ) -> Option<ShapeDefinition> {
        let slot = self.shapes.get_mut(shape.index())?;
        if slot.is_none() {
            return None;
        }
        check_definition(&definition);
        debug!("Shape #{} replaced by {:?}", shape.index(), definition.id);
        slot.replace(definition)
    }

    pub fn shape(&self, shape: ShapeHandle) -> Option<&ShapeDefinition> {
        self.shapes.get(shape.index()).and_then(Option::as_ref)
    }

    /// Handle of the first live shape named `id`.
    pub fn shape_handle(&self, id: &str) -> Option<ShapeHandle> {
        self.shapes()
            .find(|(_, def)| def.id == id)
            .map(|(handle, _)| handle)
    }

    /// Live shapes in registration order.
    pub fn shapes(&self) -> impl Iterator<Item = (ShapeHandle, &ShapeDefinition)> + '_ {
        self.shapes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|def| (ShapeHandle(i), def)))
    }

    // ── Queries ────────────────────────────────────────────

    pub fn trail(&self, target: TargetId) -> Option<&Trail> {
        self.targets.get(&target).map(|t| &t.trail)
    }

    /// Most recent match of `shape` on `target`.
    pub fn last_match(&self, target: TargetId, shape: ShapeHandle) -> Option<&GestureMatch> {
        self.targets
            .get(&target)?
            .history(shape)?
            .last_match
            .as_ref()
    }

    /// Scheduling phase of `shape` on `target` at time `now_s`.
    pub fn phase(&self, target: TargetId, shape: ShapeHandle, now_s: f64) -> Option<ShapePhase> {
        let def = self.shape(shape)?;
        let tracked = self.targets.get(&target)?;
        let last = tracked.history(shape).and_then(|h| h.last_detection_s);
        Some(match last {
            Some(t) if now_s - t < def.cooldown_s => ShapePhase::CoolingDown {
                remaining_s: def.cooldown_s - (now_s - t),
            },
            _ => ShapePhase::Idle,
        })
    }

    // ── Tick ───────────────────────────────────────────────

    /// Advance every registered target to time `now_s`.
    ///
    /// A target the source has no position for (or a non-finite position)
    /// records nothing this tick but is still pruned and evaluated.
    pub fn tick(&mut self, now_s: f64, source: &dyn PositionSource) -> Vec<GestureMatch> {
        let mut matches = Vec::new();
        let trail_config = &self.config.trail;

        for (&target, tracked) in self.targets.iter_mut() {
            match source.position(target) {
                Some(pos) if pos.is_finite() => {
                    tracked.trail.record(pos, now_s, trail_config);
                }
                Some(pos) => warn!("Ignoring non-finite position {:?} for target {}", pos, target),
                None => {}
            }

            if tracked.trail.prune(now_s, trail_config) == PruneOutcome::Reset {
                tracked.history.clear();
            }

            for (index, slot) in self.shapes.iter().enumerate() {
                let Some(def) = slot else { continue };
                let handle = ShapeHandle(index);

                let required = self.config.minimum_samples.max(def.minimum_samples);
                if tracked.trail.len() < required {
                    continue;
                }
                if let Some(last) = tracked.history(handle).and_then(|h| h.last_detection_s) {
                    if now_s - last < def.cooldown_s {
                        continue;
                    }
                }

                let samples = tracked.trail.as_slice();
                if samples.is_empty() {
                    continue;
                }
                let Some(fit) = def.kind.evaluate(samples) else {
                    continue;
                };

                let record = GestureMatch::from_fit(fit, handle, &def.id, target, now_s, samples);
                debug!(
                    "Gesture matched: {} on target {} (center {:?}, {:.2}m in {:.2}s)",
                    def.id, target, record.center, record.travel_distance, record.duration_s
                );

                let history = tracked.history_mut(handle);
                history.last_detection_s = Some(now_s);
                history.last_match = Some(record.clone());
                matches.push(record);
            }
        }

        matches
    }

    // ── IPC-style introspection ────────────────────────────

    /// Generate s-expression for status output.
    pub fn status_sexp(&self) -> String {
        let targets: Vec<String> = self
            .targets
            .iter()
            .map(|(id, t)| {
                format!(
                    "(:target {} :samples {} :span {:.3})",
                    id,
                    t.trail.len(),
                    t.trail.duration_s()
                )
            })
            .collect();
        format!(
            "(:shapes {} :targets ({}))",
            self.shapes().count(),
            targets.join(" ")
        )
    }

    /// Generate s-expression for the detector-wide settings.
    pub fn config_sexp(&self) -> String {
        self.config.to_sexp()
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

fn check_definition(definition: &ShapeDefinition) {
    if let ShapeKind::Drawn(cfg) = &definition.kind {
        if !cfg.template.is_usable() {
            warn!(
                "Drawn shape {:?} has no usable template and will never match",
                definition.id
            );
        }
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{CircularConfig, DrawnConfig, LinearConfig};

    const HAND: TargetId = TargetId(1);
    const OTHER: TargetId = TargetId(2);

    fn swipe() -> ShapeDefinition {
        ShapeDefinition::new("swipe", ShapeKind::Linear(LinearConfig::default()))
            .with_cooldown(0.5)
            .with_minimum_samples(5)
    }

    fn detector() -> Detector {
        Detector::new(DetectorConfig {
            trail: TrailConfig {
                min_sample_distance: 0.01,
                max_sample_age_s: 1.0,
            },
            minimum_samples: 3,
        })
    }

    fn feed(target: TargetId, pos: Vec3) -> HashMap<TargetId, Vec3> {
        HashMap::from([(target, pos)])
    }

    /// Move `target` along +X in 7 cm steps, one tick per 20 ms from `start_s`.
    fn sweep(det: &mut Detector, target: TargetId, steps: usize, start_s: f64) -> Vec<GestureMatch> {
        let mut all = Vec::new();
        for i in 0..steps {
            let pos = Vec3::new(i as f32 * 0.07, 0.0, 0.0);
            all.extend(det.tick(start_s + i as f64 * 0.02, &feed(target, pos)));
        }
        all
    }

    #[test]
    fn test_register_and_unregister() {
        let mut det = detector();
        assert!(det.register(HAND));
        assert!(!det.register(HAND));
        assert!(det.is_registered(HAND));
        assert!(det.unregister(HAND));
        assert!(!det.unregister(HAND));
        assert!(det.trail(HAND).is_none());
    }

    #[test]
    fn test_unregistered_targets_ignored() {
        let mut det = detector();
        det.add_shape(swipe());
        assert!(sweep(&mut det, HAND, 20, 0.0).is_empty());
    }

    #[test]
    fn test_linear_match_is_backfilled() {
        let mut det = detector();
        let handle = det.add_shape(swipe());
        det.register(HAND);

        let matches = sweep(&mut det, HAND, 10, 0.0);
        assert!(!matches.is_empty(), "Expected a swipe match");
        let m = &matches[0];
        assert_eq!(m.shape, handle);
        assert_eq!(m.shape_id, "swipe");
        assert_eq!(m.target, HAND);
        // Default minimum distance 0.3 m is first exceeded at the 6th sample.
        assert_eq!(m.samples.len(), 6);
        assert_eq!(m.start_position, Vec3::ZERO);
        assert!((m.end_position.x - 0.35).abs() < 1e-5);
        assert!((m.duration_s - 0.1).abs() < 1e-9);
        assert!((m.travel_distance - 0.35).abs() < 1e-5);
        assert_eq!(det.last_match(HAND, handle), Some(m));
    }

    #[test]
    fn test_cooldown_blocks_repeat_matches() {
        let mut det = detector();
        let handle = det.add_shape(swipe());
        det.register(HAND);

        // 20 steps over 0.38 s: one match, then cooldown (0.5 s) blocks the rest.
        let matches = sweep(&mut det, HAND, 20, 0.0);
        assert_eq!(matches.len(), 1, "Expected one match, got {:?}", matches.len());

        let t = matches[0].timestamp_s;
        match det.phase(HAND, handle, t + 0.1) {
            Some(ShapePhase::CoolingDown { remaining_s }) => {
                assert!((remaining_s - 0.4).abs() < 1e-9)
            }
            other => panic!("Expected cooling down, got {:?}", other),
        }
        assert_eq!(det.phase(HAND, handle, t + 0.6), Some(ShapePhase::Idle));
    }

    #[test]
    fn test_match_again_after_cooldown() {
        let mut det = detector();
        det.add_shape(swipe());
        det.register(HAND);

        let mut matches = sweep(&mut det, HAND, 20, 0.0);
        // Keep moving past the cooldown window.
        for i in 20..60 {
            let pos = Vec3::new(i as f32 * 0.07, 0.0, 0.0);
            matches.extend(det.tick(i as f64 * 0.02, &feed(HAND, pos)));
        }
        assert!(matches.len() >= 2, "Expected repeat match, got {}", matches.len());
        assert!(matches[1].timestamp_s - matches[0].timestamp_s >= 0.5);
    }

    #[test]
    fn test_minimum_samples_takes_the_larger_gate() {
        let mut det = detector();
        det.config.minimum_samples = 12;
        det.add_shape(swipe());
        det.register(HAND);

        let matches = sweep(&mut det, HAND, 12, 0.0);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].samples.len(), 12);
    }

    #[test]
    fn test_stationary_target_does_not_grow_trail() {
        let mut det = detector();
        det.register(HAND);
        for i in 0..10 {
            det.tick(i as f64 * 0.02, &feed(HAND, Vec3::new(0.001 * i as f32, 0.0, 0.0)));
        }
        assert_eq!(det.trail(HAND).map(Trail::len), Some(1));
    }

    #[test]
    fn test_staleness_reset_clears_history() {
        let mut det = detector();
        let handle = det.add_shape(swipe());
        det.register(HAND);
        let matches = sweep(&mut det, HAND, 10, 0.0);
        assert!(!matches.is_empty());

        // Nothing for longer than the max sample age: the next tick
        // discards the whole trail and with it the cooldown history.
        let empty: HashMap<TargetId, Vec3> = HashMap::new();
        det.tick(5.0, &empty);
        assert_eq!(det.trail(HAND).map(Trail::len), Some(0));
        assert!(det.last_match(HAND, handle).is_none());
        assert_eq!(det.phase(HAND, handle, 5.0), Some(ShapePhase::Idle));
    }

    #[test]
    fn test_reset_history() {
        let mut det = detector();
        let handle = det.add_shape(swipe());
        det.register(HAND);
        sweep(&mut det, HAND, 10, 0.0);
        assert!(det.reset_history(HAND));
        assert!(det.trail(HAND).unwrap().is_empty());
        assert!(det.last_match(HAND, handle).is_none());
        assert!(!det.reset_history(OTHER));
    }

    #[test]
    fn test_targets_are_independent() {
        let mut det = detector();
        let handle = det.add_shape(swipe());
        det.register(HAND);
        det.register(OTHER);

        let mut matches = Vec::new();
        for i in 0..10 {
            let feed = HashMap::from([
                (HAND, Vec3::new(i as f32 * 0.07, 0.0, 0.0)),
                (OTHER, Vec3::new(0.0, 0.0, 0.001 * i as f32)),
            ]);
            matches.extend(det.tick(i as f64 * 0.02, &feed));
        }
        assert!(matches.iter().all(|m| m.target == HAND));
        assert!(det.last_match(OTHER, handle).is_none());
    }

    #[test]
    fn test_evaluation_order_follows_registration() {
        let mut det = detector();
        let alt = ShapeDefinition::new("alt", ShapeKind::Linear(LinearConfig::default()))
            .with_minimum_samples(3);
        let first = det.add_shape(swipe());
        let second = det.add_shape(alt);
        det.register(HAND);

        let matches = sweep(&mut det, HAND, 10, 0.0);
        let order: Vec<ShapeHandle> = matches.iter().map(|m| m.shape).collect();
        assert_eq!(order[..2], [first, second]);
    }

    #[test]
    fn test_removed_shape_is_skipped_and_handle_retired() {
        let mut det = detector();
        let handle = det.add_shape(swipe());
        det.register(HAND);
        assert!(det.remove_shape(handle).is_some());
        assert!(det.remove_shape(handle).is_none());
        assert!(det.shape_handle("swipe").is_none());
        assert!(sweep(&mut det, HAND, 20, 0.0).is_empty());

        let next = det.add_shape(swipe());
        assert_ne!(next, handle);
    }

    #[test]
    fn test_replace_shape() {
        let mut det = detector();
        let handle = det.add_shape(swipe());
        let circle = ShapeDefinition::new("circle", ShapeKind::Circular(CircularConfig::default()));
        let old = det.replace_shape(handle, circle).unwrap();
        assert_eq!(old.id, "swipe");
        assert_eq!(det.shape_handle("circle"), Some(handle));
        assert!(det.replace_shape(ShapeHandle(9), swipe()).is_none());
    }

    #[test]
    fn test_empty_template_never_matches() {
        let mut det = detector();
        det.add_shape(ShapeDefinition::new("blank", ShapeKind::Drawn(DrawnConfig::default())));
        det.register(HAND);
        assert!(sweep(&mut det, HAND, 20, 0.0).is_empty());
    }

    #[test]
    fn test_non_finite_position_ignored() {
        let mut det = detector();
        det.register(HAND);
        det.tick(0.0, &feed(HAND, Vec3::ZERO));
        det.tick(0.02, &feed(HAND, Vec3::new(f32::NAN, 0.0, 0.0)));
        assert_eq!(det.trail(HAND).map(Trail::len), Some(1));
    }

    #[test]
    fn test_sexp_output() {
        let mut det = detector();
        det.add_shape(swipe());
        det.register(HAND);
        let matches = sweep(&mut det, HAND, 10, 0.0);
        let sexp = matches[0].to_sexp();
        assert!(sexp.starts_with("(:shape \"swipe\" :target 1 "));
        assert!(sexp.contains(":clockwise nil"));
        assert!(det.status_sexp().starts_with("(:shapes 1 :targets ((:target 1 :samples 10"));
        assert_eq!(
            det.config_sexp(),
            "(:min-sample-distance 0.01 :max-sample-age 1 :minimum-samples 3)"
        );
    }
}
