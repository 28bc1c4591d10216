//! Circular / arc motion: plane fit, radius consistency, angular coverage,
//! and sweep direction.

use std::f32::consts::PI;

use super::{positions, ShapeFit, ShapeMatcher};
use crate::geometry::{
    angle_between_deg, canonical_normal, centroid, delta_angle, newell_normal, path_length,
    world_axis_in_plane, Vec2, Vec3, EPSILON,
};
use crate::trail::Sample;

/// Tunables for circle and arc detection.
#[derive(Debug, Clone)]
pub struct CircularConfig {
    /// Smallest accepted mean radius (meters).
    pub min_radius: f32,
    /// Maximum ratio of radius standard deviation to mean radius.
    pub radius_variance_tolerance: f32,
    /// Minimum traced share of the circle (degrees).
    pub min_coverage_deg: f32,
    /// Maximum traced share of the circle (degrees).
    pub max_coverage_deg: f32,
    /// Minimum ratio of travelled distance to ideal arc length.
    pub min_travelled_arc_ratio: f32,
    /// Require the circle plane to face `required_normal`.
    pub enforce_normal_alignment: bool,
    pub required_normal: Vec3,
    /// Allowed angle between the fitted normal and `required_normal` (degrees).
    pub normal_tolerance_deg: f32,
}

impl Default for CircularConfig {
    fn default() -> Self {
        Self {
            min_radius: 0.05,
            radius_variance_tolerance: 0.35,
            min_coverage_deg: 300.0,
            max_coverage_deg: 360.0,
            min_travelled_arc_ratio: 0.8,
            enforce_normal_alignment: false,
            required_normal: Vec3::Z,
            normal_tolerance_deg: 30.0,
        }
    }
}

impl CircularConfig {
    /// Pick whichever orientation of `normal` lies within tolerance of the
    /// required normal, or `None` if neither does.
    fn align_normal(&self, normal: Vec3) -> Option<Vec3> {
        let forward = angle_between_deg(normal, self.required_normal);
        let flipped = angle_between_deg(-normal, self.required_normal);
        let tolerance = self.normal_tolerance_deg;

        if forward <= tolerance && forward <= flipped {
            Some(normal)
        } else if flipped <= tolerance {
            Some(-normal)
        } else {
            None
        }
    }
}

/// Traced share of a circle from polar angles: 360° minus the widest gap.
pub fn angular_coverage_deg(angles: &[f32]) -> f32 {
    if angles.is_empty() {
        return 0.0;
    }
    let mut sorted = angles.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut largest_gap = sorted[0] + 2.0 * PI - sorted[sorted.len() - 1];
    for pair in sorted.windows(2) {
        largest_gap = largest_gap.max(pair[1] - pair[0]);
    }
    (360.0 - largest_gap.to_degrees()).clamp(0.0, 360.0)
}

impl ShapeMatcher for CircularConfig {
    fn evaluate(&self, samples: &[Sample]) -> Option<ShapeFit> {
        if samples.len() < 3 {
            return None;
        }
        let points = positions(samples);
        let center = centroid(&points);

        // Sweep direction is read about this normal, so it must not depend
        // on the direction the circle was traced in.
        let plane_normal = newell_normal(&points, center)?;
        let normal = if self.enforce_normal_alignment {
            self.align_normal(plane_normal)?
        } else {
            canonical_normal(plane_normal)
        };

        // In-plane basis seeded by the first sample.
        let axis_x = (points[0] - center)
            .reject_from(normal)
            .try_normalize()
            .unwrap_or_else(|| world_axis_in_plane(normal));
        let axis_y = normal.cross(axis_x);

        let projected: Vec<Vec2> = points
            .iter()
            .map(|p| {
                let offset = *p - center;
                Vec2::new(offset.dot(axis_x), offset.dot(axis_y))
            })
            .collect();

        let radii: Vec<f32> = projected.iter().map(|p| p.length()).collect();
        let count = radii.len() as f32;
        let radius = radii.iter().sum::<f32>() / count;
        if radius < self.min_radius || radius <= EPSILON {
            return None;
        }

        let variance = radii.iter().map(|r| (r - radius).powi(2)).sum::<f32>() / count;
        if variance.sqrt() / radius > self.radius_variance_tolerance {
            return None;
        }

        let angles: Vec<f32> = projected.iter().map(|p| p.angle()).collect();
        let coverage_deg = angular_coverage_deg(&angles);
        if coverage_deg < self.min_coverage_deg || coverage_deg > self.max_coverage_deg {
            return None;
        }

        let travel_distance = path_length(&points);
        let ideal_arc = 2.0 * PI * radius * (coverage_deg / 360.0);
        if ideal_arc <= EPSILON || travel_distance / ideal_arc < self.min_travelled_arc_ratio {
            return None;
        }

        let sweep: f32 = angles.windows(2).map(|w| delta_angle(w[0], w[1])).sum();
        let start = points[0];
        let end = points[points.len() - 1];

        Some(ShapeFit {
            center,
            radius,
            normal,
            coverage_deg,
            clockwise: sweep < 0.0,
            travel_distance: Some(travel_distance),
            travel_direction: Some((end - start).normalize_or_zero()),
            samples: Some(points),
            ..ShapeFit::default()
        })
    }
}

// ── Tests ──────────────────────────────────────────────────
