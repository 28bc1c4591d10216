//! Free-form drawn shapes matched against a 2D template.
//!
//! The trail is projected into its best-fit plane, resampled by arc length,
//! normalized, and compared to the template under the best rotation.

use super::template::{best_alignment_error, normalize, resample, DrawnTemplate};
use super::{positions, ShapeFit, ShapeMatcher};
use crate::geometry::{
    canonical_normal, centroid, newell_normal, path_length, path_length_2d, signed_area,
    world_axis_in_plane, Vec2, Vec3, EPSILON,
};
use crate::trail::Sample;

/// Tunables for template matching.
#[derive(Debug, Clone)]
pub struct DrawnConfig {
    /// Authored outline; its `closed_loop` flag decides loop handling.
    pub template: DrawnTemplate,
    /// Shortest accepted path length in the projected plane (meters).
    pub min_path_length: f32,
    /// Points both paths are resampled to before comparison.
    pub comparison_points: usize,
    /// Largest accepted RMS error between normalized paths.
    pub max_average_error: f32,
    pub allow_mirrored: bool,
    pub allow_reversed: bool,
    /// Largest start/end gap of a closed loop, as a share of path length.
    pub closure_distance_ratio: f32,
}

impl Default for DrawnConfig {
    fn default() -> Self {
        Self {
            template: DrawnTemplate::default(),
            min_path_length: 0.2,
            comparison_points: 32,
            max_average_error: 0.35,
            allow_mirrored: false,
            allow_reversed: true,
            closure_distance_ratio: 0.2,
        }
    }
}

/// A trail flattened into its own plane.
#[derive(Debug, Clone)]
pub struct PlanarPath {
    pub center: Vec3,
    pub normal: Vec3,
    pub points: Vec<Vec2>,
}

/// Project points into their Newell plane with the X axis along the net
/// displacement (falling back to the first segment, then a world axis).
///
/// The plane is always viewed from its [`canonical_normal`] side, so a
/// mirrored or clockwise trail keeps its handedness in the projection.
pub fn project_points(points: &[Vec3]) -> Option<PlanarPath> {
    let center = centroid(points);
    let normal = canonical_normal(newell_normal(points, center)?);

    let first = points[0];
    let last = points[points.len() - 1];
    let axis_x = (last - first)
        .reject_from(normal)
        .try_normalize()
        .or_else(|| (points[1] - first).reject_from(normal).try_normalize())
        .unwrap_or_else(|| world_axis_in_plane(normal));
    let axis_y = normal.cross(axis_x);

    let projected = points
        .iter()
        .map(|p| {
            let offset = *p - center;
            Vec2::new(offset.dot(axis_x), offset.dot(axis_y))
        })
        .collect();

    Some(PlanarPath {
        center,
        normal,
        points: projected,
    })
}

/// Result of comparing a trail with the template, before thresholding.
struct Comparison {
    planar: PlanarPath,
    resampled: Vec<Vec2>,
    error: f32,
}

impl DrawnConfig {
    pub fn closed_loop(&self) -> bool {
        self.template.closed_loop
    }

    /// RMS alignment error between the trail and the template, or `None`
    /// when the trail fails a geometric precondition.
    pub fn alignment_error(&self, samples: &[Sample]) -> Option<f32> {
        self.compare(&positions(samples)).map(|c| c.error)
    }

    fn compare(&self, points: &[Vec3]) -> Option<Comparison> {
        if points.len() < 3 || !self.template.is_usable() {
            return None;
        }
        let planar = project_points(points)?;

        let path_len = path_length_2d(&planar.points);
        if path_len < self.min_path_length || path_len <= EPSILON {
            return None;
        }

        let closed = self.closed_loop();
        if closed {
            let gap = planar.points[0].distance(planar.points[planar.points.len() - 1]);
            let allowed = (self.closure_distance_ratio * path_len).max(self.min_path_length * 0.05);
            if gap > allowed {
                return None;
            }
        }

        let count = self.comparison_points;
        let resampled = resample(&planar.points, count, closed)?;
        let template = resample(&self.template.points, count, closed)?;
        let sample_norm = normalize(&resampled)?;
        let template_norm = normalize(&template)?;

        let error = best_alignment_error(
            &template_norm,
            &sample_norm,
            self.allow_reversed,
            self.allow_mirrored,
            closed,
        );

        Some(Comparison {
            planar,
            resampled,
            error,
        })
    }
}

impl ShapeMatcher for DrawnConfig {
    fn evaluate(&self, samples: &[Sample]) -> Option<ShapeFit> {
        let points = positions(samples);
        let comparison = self.compare(&points)?;
        if !comparison.error.is_finite() || comparison.error > self.max_average_error {
            return None;
        }

        let start = points[0];
        let end = points[points.len() - 1];
        Some(ShapeFit {
            center: comparison.planar.center,
            normal: comparison.planar.normal,
            clockwise: signed_area(&comparison.resampled) < 0.0,
            travel_distance: Some(path_length(&points)),
            travel_direction: Some((end - start).normalize_or_zero()),
            samples: Some(points),
            ..ShapeFit::default()
        })
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::make_trail;

    /// An asymmetric hook: short drop, long rise, short hook back.
    fn hook() -> DrawnTemplate {
        DrawnTemplate::from_flat(&[-1.0, 0.2, -0.6, -0.6, 0.8, 1.0, 1.0, 0.4], false)
    }

    /// Lay template-space points into the world at `scale` meters per unit.
    fn to_world(points: &[Vec2], scale: f32, origin: Vec3) -> Vec<Vec3> {
        points
            .iter()
            .map(|p| origin + Vec3::new(p.x * scale, p.y * scale, 0.0))
            .collect()
    }

    fn trail_from(template: &DrawnTemplate, count: usize) -> Vec<Sample> {
        let pts = resample(&template.points, count, template.closed_loop).unwrap();
        make_trail(&to_world(&pts, 0.2, Vec3::new(0.5, 1.2, -0.3)), 0.02)
    }

    fn config_for(template: DrawnTemplate) -> DrawnConfig {
        DrawnConfig {
            template,
            allow_reversed: false,
            allow_mirrored: false,
            ..DrawnConfig::default()
        }
    }

    #[test]
    fn test_template_self_match() {
        let cfg = config_for(hook());
        let trail = trail_from(&cfg.template, 40);
        let error = cfg.alignment_error(&trail).unwrap();
        assert!(error < 0.05, "self-match error {}", error);
        let fit = cfg.evaluate(&trail).expect("template should match itself");
        assert_eq!(fit.samples.as_ref().map(|s| s.len()), Some(40));
        assert_eq!(fit.radius, 0.0);
        assert_eq!(fit.coverage_deg, 0.0);
    }

    #[test]
    fn test_reversed_traversal_matches_reversed_variant() {
        let template = hook();
        let positions: Vec<Vec3> = trail_from(&template, 40)
            .iter()
            .rev()
            .map(|s| s.position)
            .collect();
        let trail = make_trail(&positions, 0.02);

        let reversible = DrawnConfig {
            allow_reversed: true,
            ..config_for(template.clone())
        };
        let reversed = reversible.alignment_error(&trail).unwrap();
        assert!(reversed < 0.05, "reversed error {}", reversed);
        assert!(reversible.evaluate(&trail).unwrap().clockwise);

        let strict = config_for(template).alignment_error(&trail).unwrap();
        assert!(strict > reversed + 0.1, "strict {} reversed {}", strict, reversed);
    }

    fn mirrored_hook_trail() -> Vec<Sample> {
        let pts = resample(&hook().points, 40, false).unwrap();
        let mirrored: Vec<Vec2> = pts.iter().map(|p| Vec2::new(-p.x, p.y)).collect();
        make_trail(&to_world(&mirrored, 0.2, Vec3::ZERO), 0.02)
    }

    #[test]
    fn test_mirrored_traversal_matches_when_allowed() {
        let trail = mirrored_hook_trail();
        let lenient = DrawnConfig {
            allow_reversed: true,
            allow_mirrored: true,
            ..config_for(hook())
        };
        let error = lenient.alignment_error(&trail).unwrap();
        assert!(error < 0.05, "mirrored error {}", error);
        assert!(lenient.evaluate(&trail).is_some());
    }

    #[test]
    fn test_mirrored_traversal_rejected_when_disabled() {
        let trail = mirrored_hook_trail();
        let cfg = DrawnConfig {
            allow_reversed: true,
            allow_mirrored: false,
            ..config_for(hook())
        };
        let error = cfg.alignment_error(&trail).unwrap();
        assert!(error > cfg.max_average_error, "mirrored error {}", error);
        assert!(cfg.evaluate(&trail).is_none());
    }

    #[test]
    fn test_clockwise_template_self_match() {
        let cw: Vec<Vec2> = hook().points.iter().map(|p| Vec2::new(-p.x, p.y)).collect();
        let cfg = config_for(DrawnTemplate::new(cw, false));
        let trail = trail_from(&cfg.template, 40);

        let error = cfg.alignment_error(&trail).unwrap();
        assert!(error < 0.05, "self-match error {}", error);
        let fit = cfg.evaluate(&trail).expect("clockwise template should match itself");
        assert!(fit.clockwise);
        assert!(!config_for(hook()).evaluate(&trail_from(&hook(), 40)).unwrap().clockwise);
    }

    #[test]
    fn test_closed_loop_match_from_any_start() {
        let template = DrawnTemplate::from_flat(&[-1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0], true);
        let mut pts = resample(&template.points, 40, true).unwrap();
        pts.rotate_left(7);
        let first = pts[0];
        pts.push(first);
        let trail = make_trail(&to_world(&pts, 0.15, Vec3::new(0.0, 1.0, 0.0)), 0.02);

        let cfg = config_for(template);
        let error = cfg.alignment_error(&trail).unwrap();
        assert!(error < 0.1, "loop error {}", error);
        assert!(cfg.evaluate(&trail).is_some());
    }

    #[test]
    fn test_loop_direction_sets_clockwise() {
        let template = DrawnTemplate::from_flat(&[-1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0], true);
        let mut pts = resample(&template.points, 40, true).unwrap();
        let first = pts[0];
        pts.push(first);
        let ccw = to_world(&pts, 0.15, Vec3::new(0.0, 1.0, 0.0));
        let cw: Vec<Vec3> = ccw.iter().rev().copied().collect();

        let cfg = DrawnConfig {
            allow_reversed: true,
            ..config_for(template)
        };
        let fit = cfg.evaluate(&make_trail(&ccw, 0.02)).expect("loop should match");
        assert!(!fit.clockwise);
        assert!(fit.normal.z > 0.99, "normal {:?}", fit.normal);
        let fit = cfg.evaluate(&make_trail(&cw, 0.02)).expect("reversed loop should match");
        assert!(fit.clockwise);
        assert!(fit.normal.z > 0.99, "normal {:?}", fit.normal);

        let strict = DrawnConfig {
            allow_reversed: false,
            ..cfg
        };
        assert!(strict.evaluate(&make_trail(&cw, 0.02)).is_none());
    }

    #[test]
    fn test_open_loop_rejected_for_closed_template() {
        let template = DrawnTemplate::from_flat(&[-1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0], true);
        // Three sides of the square: the gap back to the start is a full side.
        let open = DrawnTemplate::from_flat(&[-1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0], false);
        let trail = trail_from(&open, 30);
        assert!(config_for(template).evaluate(&trail).is_none());
    }

    #[test]
    fn test_short_path_rejected() {
        let cfg = DrawnConfig {
            min_path_length: 5.0,
            ..config_for(hook())
        };
        assert!(cfg.evaluate(&trail_from(&cfg.template, 30)).is_none());
    }

    #[test]
    fn test_empty_template_never_matches() {
        let cfg = config_for(DrawnTemplate::default());
        assert!(cfg.evaluate(&trail_from(&hook(), 30)).is_none());
    }

    #[test]
    fn test_straight_line_is_degenerate() {
        let points: Vec<Vec3> = (0..20).map(|i| Vec3::new(i as f32 * 0.05, 0.0, 0.0)).collect();
        let cfg = config_for(hook());
        assert!(cfg.alignment_error(&make_trail(&points, 0.02)).is_none());
    }

    #[test]
    fn test_project_points_axis_follows_displacement() {
        let points = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.5, -0.5, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
        ];
        let planar = project_points(&points).unwrap();
        let d = planar.points[2] - planar.points[0];
        assert!(d.y.abs() < 1e-5 && d.x > 0.0);
        assert!(signed_area(&planar.points) > 0.0);

        let reversed: Vec<Vec3> = points.iter().rev().copied().collect();
        let flipped = project_points(&reversed).unwrap();
        assert_eq!(flipped.normal, planar.normal);
        assert!(signed_area(&flipped.points) < 0.0);
    }
}
