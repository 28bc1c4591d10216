//! Shape matchers: closed-form geometric tests over a position trail.
//!
//! Each variant owns an immutable config struct implementing [`ShapeMatcher`].
//! A matcher never fails loudly: degenerate or noisy input simply yields
//! `None` and the detector tries again on the next tick.

pub mod circular;
pub mod drawn;
pub mod linear;
pub mod template;

pub use circular::CircularConfig;
pub use drawn::DrawnConfig;
pub use linear::LinearConfig;
pub use template::DrawnTemplate;

use crate::geometry::Vec3;
use crate::sexp::{escape_string, fmt_bool};
use crate::trail::Sample;

// ── Fit result ──────────────────────────────────────────────

/// Geometry produced by a successful evaluation.
///
/// Fields a matcher has no opinion about stay `None`; the detector fills
/// them from the raw trail before publishing a match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeFit {
    pub center: Vec3,
    /// Mean radius (circular only).
    pub radius: f32,
    /// Plane normal; zero for linear motion.
    pub normal: Vec3,
    /// Traced share of the circle in degrees (circular only).
    pub coverage_deg: f32,
    pub clockwise: bool,
    pub travel_distance: Option<f32>,
    pub travel_direction: Option<Vec3>,
    pub start_position: Option<Vec3>,
    pub end_position: Option<Vec3>,
    pub duration_s: Option<f64>,
    pub samples: Option<Vec<Vec3>>,
}

/// A pure test from a trail to an optional fit.
pub trait ShapeMatcher {
    fn evaluate(&self, samples: &[Sample]) -> Option<ShapeFit>;
}

// ── Shape kinds ─────────────────────────────────────────────

/// The matcher variants.
#[derive(Debug, Clone)]
pub enum ShapeKind {
    Circular(CircularConfig),
    Drawn(DrawnConfig),
    Linear(LinearConfig),
}

impl ShapeKind {
    /// String representation for config files and status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Circular(_) => "circular",
            Self::Drawn(_) => "drawn",
            Self::Linear(_) => "linear",
        }
    }
}

impl ShapeMatcher for ShapeKind {
    fn evaluate(&self, samples: &[Sample]) -> Option<ShapeFit> {
        match self {
            Self::Circular(cfg) => cfg.evaluate(samples),
            Self::Drawn(cfg) => cfg.evaluate(samples),
            Self::Linear(cfg) => cfg.evaluate(samples),
        }
    }
}

/// A registered shape: identity, scheduling gates, and matcher config.
#[derive(Debug, Clone)]
pub struct ShapeDefinition {
    /// Stable name used in events and sequence definitions.
    pub id: String,
    /// Minimum time between two matches of this shape on one target (seconds).
    pub cooldown_s: f64,
    /// Minimum trail length before this shape is evaluated.
    pub minimum_samples: usize,
    pub kind: ShapeKind,
}

impl ShapeDefinition {
    pub fn new(id: impl Into<String>, kind: ShapeKind) -> Self {
        Self {
            id: id.into(),
            cooldown_s: 0.75,
            minimum_samples: 10,
            kind,
        }
    }

    pub fn with_cooldown(mut self, cooldown_s: f64) -> Self {
        self.cooldown_s = cooldown_s;
        self
    }

    pub fn with_minimum_samples(mut self, minimum_samples: usize) -> Self {
        self.minimum_samples = minimum_samples;
        self
    }

    /// Generate s-expression in config-file form.
    pub fn to_sexp(&self) -> String {
        let fields = match &self.kind {
            ShapeKind::Circular(c) => format!(
                ":min-radius {} :radius-variance-tolerance {} :min-coverage {} :max-coverage {} :min-travelled-arc-ratio {} :enforce-normal-alignment {} :required-normal {} :normal-tolerance {}",
                c.min_radius,
                c.radius_variance_tolerance,
                c.min_coverage_deg,
                c.max_coverage_deg,
                c.min_travelled_arc_ratio,
                fmt_bool(c.enforce_normal_alignment),
                vec3_list(c.required_normal),
                c.normal_tolerance_deg,
            ),
            ShapeKind::Drawn(d) => format!(
                "{} :min-path-length {} :comparison-points {} :max-average-error {} :allow-mirrored {} :allow-reversed {} :closure-distance-ratio {}",
                d.template.plist_fields(),
                d.min_path_length,
                d.comparison_points,
                d.max_average_error,
                fmt_bool(d.allow_mirrored),
                fmt_bool(d.allow_reversed),
                d.closure_distance_ratio,
            ),
            ShapeKind::Linear(l) => format!(
                ":minimum-distance {} :max-deviation {} :minimum-straightness {} :enforce-direction {} :expected-direction {} :direction-tolerance {} :allow-reverse {}",
                l.minimum_distance,
                l.max_deviation,
                l.minimum_straightness,
                fmt_bool(l.enforce_direction),
                vec3_list(l.expected_direction),
                l.direction_tolerance_deg,
                fmt_bool(l.allow_reverse),
            ),
        };
        format!(
            "(:id \"{}\" :kind :{} :cooldown {} :minimum-samples {} {})",
            escape_string(&self.id),
            self.kind.as_str(),
            self.cooldown_s,
            self.minimum_samples,
            fields
        )
    }
}

fn vec3_list(v: Vec3) -> String {
    format!("({} {} {})", v.x, v.y, v.z)
}

/// Positions of `samples`, oldest first.
pub(crate) fn positions(samples: &[Sample]) -> Vec<Vec3> {
    samples.iter().map(|s| s.position).collect()
}

// ── Test helpers ───────────────────────────────────────────

/// Build a trail from positions spaced `dt` seconds apart.
#[cfg(test)]
pub(crate) fn make_trail(points: &[Vec3], dt: f64) -> Vec<Sample> {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| Sample::new(*p, i as f64 * dt))
        .collect()
}
