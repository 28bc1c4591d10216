//! Straight-line strokes with optional direction constraints.

use super::{positions, ShapeFit, ShapeMatcher};
use crate::geometry::{angle_between_deg, path_length, Vec3, EPSILON};
use crate::trail::Sample;

/// Tunables for linear motion.
#[derive(Debug, Clone)]
pub struct LinearConfig {
    /// Shortest accepted start-to-end distance (meters).
    pub minimum_distance: f32,
    /// Largest perpendicular distance of any sample from the line (meters).
    pub max_deviation: f32,
    /// Minimum ratio of straight-line distance to travelled distance.
    pub minimum_straightness: f32,
    /// Require the stroke to point along `expected_direction`.
    pub enforce_direction: bool,
    pub expected_direction: Vec3,
    /// Allowed angle from `expected_direction` (degrees).
    pub direction_tolerance_deg: f32,
    /// Also accept strokes along the opposite direction.
    pub allow_reverse: bool,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            minimum_distance: 0.3,
            max_deviation: 0.05,
            minimum_straightness: 0.85,
            enforce_direction: false,
            expected_direction: Vec3::X,
            direction_tolerance_deg: 25.0,
            allow_reverse: false,
        }
    }
}

impl LinearConfig {
    fn direction_accepted(&self, direction: Vec3) -> bool {
        let forward = angle_between_deg(direction, self.expected_direction);
        let deviation = if self.allow_reverse {
            forward.min(angle_between_deg(direction, -self.expected_direction))
        } else {
            forward
        };
        if deviation > self.direction_tolerance_deg {
            return false;
        }
        self.allow_reverse || direction.dot(self.expected_direction) >= 0.0
    }
}

/// Largest distance of any point from the line through `origin` along the
/// unit vector `direction`.
pub fn max_line_deviation(points: &[Vec3], origin: Vec3, direction: Vec3) -> f32 {
    points
        .iter()
        .map(|p| {
            let offset = *p - origin;
            let on_line = origin + direction * offset.dot(direction);
            p.distance(on_line)
        })
        .fold(0.0, f32::max)
}

impl ShapeMatcher for LinearConfig {
    fn evaluate(&self, samples: &[Sample]) -> Option<ShapeFit> {
        if samples.len() < 2 {
            return None;
        }
        let points = positions(samples);
        let start = points[0];
        let end = points[points.len() - 1];

        let displacement = end - start;
        let distance = displacement.length();
        if distance < self.minimum_distance {
            return None;
        }
        let direction = displacement.try_normalize()?;

        if self.enforce_direction && !self.direction_accepted(direction) {
            return None;
        }

        let travel_distance = path_length(&points);
        if max_line_deviation(&points, start, direction) > self.max_deviation {
            return None;
        }

        let straightness = if travel_distance > EPSILON {
            distance / travel_distance
        } else {
            0.0
        };
        if straightness < self.minimum_straightness {
            return None;
        }

        Some(ShapeFit {
            center: (start + end) * 0.5,
            travel_distance: Some(travel_distance),
            travel_direction: Some(direction),
            ..ShapeFit::default()
        })
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::make_trail;

    /// `count` points from `start` to `end`, with the middle sample pushed
    /// sideways (along +Y) by `offset`.
    fn stroke(start: Vec3, end: Vec3, count: usize, offset: f32) -> Vec<Sample> {
        let mid = count / 2;
        let points: Vec<Vec3> = (0..count)
            .map(|i| {
                let p = start.lerp(end, i as f32 / (count - 1) as f32);
                if i == mid {
                    p + Vec3::Y * offset
                } else {
                    p
                }
            })
            .collect();
        make_trail(&points, 0.02)
    }

    fn loose() -> LinearConfig {
        LinearConfig {
            minimum_distance: 0.5,
            max_deviation: 0.05,
            minimum_straightness: 0.5,
            ..LinearConfig::default()
        }
    }

    #[test]
    fn test_straight_stroke_matches_at_minimum_distance() {
        let cfg = loose();
        let fit = cfg
            .evaluate(&stroke(Vec3::ZERO, Vec3::new(0.5, 0.0, 0.0), 11, 0.0))
            .expect("exact minimum distance should match");
        assert!((fit.travel_direction.unwrap().x - 1.0).abs() < 1e-6);
        assert!((fit.center.x - 0.25).abs() < 1e-6);
        assert_eq!(fit.radius, 0.0);
        assert_eq!(fit.normal, Vec3::ZERO);

        assert!(cfg
            .evaluate(&stroke(Vec3::ZERO, Vec3::new(0.49, 0.0, 0.0), 11, 0.0))
            .is_none());
    }

    #[test]
    fn test_deviation_boundary() {
        let cfg = loose();
        let just_below = stroke(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), 11, 0.049);
        let just_above = stroke(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), 11, 0.051);
        assert!(cfg.evaluate(&just_below).is_some());
        assert!(cfg.evaluate(&just_above).is_none());
    }

    #[test]
    fn test_back_and_forth_fails_straightness() {
        let cfg = LinearConfig {
            minimum_distance: 0.2,
            ..LinearConfig::default()
        };
        let mut points: Vec<Vec3> = (0..=10).map(|i| Vec3::new(i as f32 * 0.1, 0.0, 0.0)).collect();
        points.extend((6..=9).rev().map(|i| Vec3::new(i as f32 * 0.1, 0.0, 0.0)));
        // Ends 0.6 m from the start after travelling 1.4 m.
        assert!(cfg.evaluate(&make_trail(&points, 0.02)).is_none());
    }

    #[test]
    fn test_enforced_direction() {
        let cfg = LinearConfig {
            enforce_direction: true,
            expected_direction: Vec3::Y,
            direction_tolerance_deg: 20.0,
            ..loose()
        };
        let up = stroke(Vec3::ZERO, Vec3::new(0.1, 1.0, 0.0), 11, 0.0);
        let down = stroke(Vec3::ZERO, Vec3::new(0.0, -1.0, 0.0), 11, 0.0);
        let sideways = stroke(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), 11, 0.0);
        assert!(cfg.evaluate(&up).is_some());
        assert!(cfg.evaluate(&down).is_none());
        assert!(cfg.evaluate(&sideways).is_none());

        let either_way = LinearConfig {
            allow_reverse: true,
            ..cfg
        };
        assert!(either_way.evaluate(&down).is_some());
        assert!(either_way.evaluate(&sideways).is_none());
    }

    #[test]
    fn test_too_few_samples() {
        assert!(LinearConfig::default()
            .evaluate(&make_trail(&[Vec3::ZERO], 0.02))
            .is_none());
    }

    #[test]
    fn test_max_line_deviation() {
        let pts = [Vec3::ZERO, Vec3::new(0.5, 0.2, 0.0), Vec3::new(1.0, 0.0, 0.0)];
        assert!((max_line_deviation(&pts, Vec3::ZERO, Vec3::X) - 0.2).abs() < 1e-6);
    }
}
