//! Drawn-shape templates: arc-length resampling, RMS normalization,
//! best-rotation alignment, capture from a recorded trail, and persistence.
//!
//! A template is an ordered list of 2D points in [-1, 1] x [-1, 1] plus a
//! closed-loop flag.  On disk it is a plist:
//!
//! ```text
//! (:closed-loop nil :points (-1 1 0 -1 1 1))
//! ```

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use lexpr::Value;
use tracing::{debug, warn};

use super::drawn::project_points;
use super::positions;
use crate::geometry::{centroid_2d, path_length_2d, Vec2, EPSILON};
use crate::sexp;
use crate::trail::Sample;

/// An authored 2D gesture outline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawnTemplate {
    pub points: Vec<Vec2>,
    pub closed_loop: bool,
}

impl DrawnTemplate {
    pub fn new(points: Vec<Vec2>, closed_loop: bool) -> Self {
        Self {
            points,
            closed_loop,
        }
    }

    /// Build from flat `x0 y0 x1 y1 ...` coordinates.
    pub fn from_flat(coords: &[f32], closed_loop: bool) -> Self {
        let points = coords
            .chunks_exact(2)
            .map(|c| Vec2::new(c[0], c[1]))
            .collect();
        Self::new(points, closed_loop)
    }

    /// A template needs at least two distinct points to be resampled.
    pub fn is_usable(&self) -> bool {
        self.points.len() >= 2 && path_length_2d(&self.points) > EPSILON
    }

    /// Capture a template from a recorded trail.
    ///
    /// The trail is projected into its best-fit plane the same way the
    /// matcher projects live input, resampled to `point_count` points, and
    /// scaled uniformly to fit [-1, 1] around its bounding-box center.
    pub fn capture(samples: &[Sample], closed_loop: bool, point_count: usize) -> Option<Self> {
        let planar = project_points(&positions(samples))?;
        let resampled = resample(&planar.points, point_count, closed_loop)?;

        let (mut min, mut max) = (resampled[0], resampled[0]);
        for p in &resampled {
            min = Vec2::new(min.x.min(p.x), min.y.min(p.y));
            max = Vec2::new(max.x.max(p.x), max.y.max(p.y));
        }
        let half_extent = (max.x - min.x).max(max.y - min.y) * 0.5;
        if half_extent <= EPSILON {
            return None;
        }
        let mid = (min + max) * 0.5;
        let points = resampled
            .iter()
            .map(|p| {
                let q = (*p - mid) / half_extent;
                Vec2::new(q.x.clamp(-1.0, 1.0), q.y.clamp(-1.0, 1.0))
            })
            .collect();

        debug!("Captured template from {} samples", samples.len());
        Some(Self::new(points, closed_loop))
    }

    // ── Persistence ──────────────────────────────────────────

    /// Serialize as a plist.  Coordinates use the shortest representation
    /// that parses back to the same `f32`.
    pub fn to_sexp(&self) -> String {
        format!("({})", self.plist_fields())
    }

    /// `:closed-loop ... :points (...)` without the enclosing list, for
    /// embedding in a shape definition.
    pub(crate) fn plist_fields(&self) -> String {
        let coords: Vec<String> = self
            .points
            .iter()
            .flat_map(|p| [p.x.to_string(), p.y.to_string()])
            .collect();
        format!(
            ":closed-loop {} :points ({})",
            sexp::fmt_bool(self.closed_loop),
            coords.join(" ")
        )
    }

    pub fn from_sexp(raw: &str) -> Result<Self> {
        Self::from_value(&sexp::parse(raw)?)
    }

    /// Read a template out of an already parsed plist.
    pub fn from_value(value: &Value) -> Result<Self> {
        let closed_loop = sexp::get_bool(value, "closed-loop").unwrap_or(false);
        let coords = match sexp::get(value, "points") {
            Some(list) => sexp::floats(list).context("invalid template :points")?,
            None => bail!("template has no :points"),
        };
        if coords.len() % 2 != 0 {
            bail!("template :points has an odd number of coordinates ({})", coords.len());
        }
        if coords.iter().any(|c| !c.is_finite()) {
            bail!("template :points contains a non-finite coordinate");
        }
        if coords.iter().any(|c| c.abs() > 1.0) {
            warn!("Template points fall outside [-1, 1]");
        }

        let coords: Vec<f32> = coords.iter().map(|c| *c as f32).collect();
        Ok(Self::from_flat(&coords, closed_loop))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read template {}", path.display()))?;
        Self::from_sexp(&raw).with_context(|| format!("failed to parse template {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_sexp() + "\n")
            .with_context(|| format!("failed to write template {}", path.display()))
    }
}

// ── Resampling ──────────────────────────────────────────────

/// Resample a polyline to `count` points evenly spaced by arc length.
///
/// Closed paths include the segment from the last point back to the first
/// and do not repeat the start point.  Open paths keep their original
/// endpoints exactly.  Returns `None` for fewer than two input points or a
/// zero-length path.
pub fn resample(points: &[Vec2], count: usize, closed: bool) -> Option<Vec<Vec2>> {
    if points.len() < 2 || count < 2 {
        return None;
    }

    let mut path = points.to_vec();
    if closed {
        path.push(points[0]);
    }
    let total = path_length_2d(&path);
    if !(total > EPSILON) {
        return None;
    }

    let step = if closed {
        total / count as f32
    } else {
        total / (count - 1) as f32
    };
    let last_segment = path.len() - 2;

    let mut out = Vec::with_capacity(count);
    let mut seg = 0;
    let mut seg_start = 0.0f32;
    for k in 0..count {
        let target = step * k as f32;
        while seg < last_segment && seg_start + path[seg].distance(path[seg + 1]) < target {
            seg_start += path[seg].distance(path[seg + 1]);
            seg += 1;
        }
        let seg_len = path[seg].distance(path[seg + 1]);
        let t = if seg_len > EPSILON {
            ((target - seg_start) / seg_len).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(path[seg].lerp(path[seg + 1], t));
    }

    if !closed {
        out[0] = points[0];
        out[count - 1] = points[points.len() - 1];
    }
    Some(out)
}

/// Center on the centroid and scale to unit RMS radius.
/// Returns `None` when the points collapse to a single location.
pub fn normalize(points: &[Vec2]) -> Option<Vec<Vec2>> {
    if points.is_empty() {
        return None;
    }
    let center = centroid_2d(points);
    let centered: Vec<Vec2> = points.iter().map(|p| *p - center).collect();
    let mean_sq = centered.iter().map(|p| p.dot(*p)).sum::<f32>() / centered.len() as f32;
    let scale = mean_sq.sqrt();
    if !(scale > EPSILON) || !scale.is_finite() {
        return None;
    }
    Some(centered.iter().map(|p| *p / scale).collect())
}

// ── Alignment ───────────────────────────────────────────────

/// RMS distance between `template` and `sample` after rotating the template
/// by the least-squares optimal angle.  Both sets must be normalized and of
/// equal length.
pub fn rotation_aligned_error(template: &[Vec2], sample: &[Vec2]) -> f32 {
    if template.is_empty() || template.len() != sample.len() {
        return f32::INFINITY;
    }

    let (mut cross, mut dot) = (0.0f32, 0.0f32);
    for (t, s) in template.iter().zip(sample) {
        cross += t.perp_dot(*s);
        dot += t.dot(*s);
    }
    let angle = cross.atan2(dot);

    let sum_sq: f32 = template
        .iter()
        .zip(sample)
        .map(|(t, s)| {
            let d = t.rotated(angle) - *s;
            d.dot(d)
        })
        .sum();
    (sum_sq / template.len() as f32).sqrt()
}

/// Smallest alignment error over the enabled template variants.
///
/// Variants are the template itself, its reverse order, its mirror across
/// the Y axis, and both.  For closed loops every cyclic start offset is
/// tried as well.
pub fn best_alignment_error(
    template: &[Vec2],
    sample: &[Vec2],
    allow_reversed: bool,
    allow_mirrored: bool,
    closed: bool,
) -> f32 {
    let mut variants: Vec<Vec<Vec2>> = vec![template.to_vec()];
    if allow_reversed {
        variants.push(template.iter().rev().copied().collect());
    }
    if allow_mirrored {
        variants.push(template.iter().map(|p| Vec2::new(-p.x, p.y)).collect());
    }
    if allow_reversed && allow_mirrored {
        variants.push(template.iter().rev().map(|p| Vec2::new(-p.x, p.y)).collect());
    }

    let offsets = if closed { sample.len().max(1) } else { 1 };
    let mut shifted = sample.to_vec();
    let mut best = f32::INFINITY;
    for offset in 0..offsets {
        if offset > 0 {
            shifted.rotate_left(1);
        }
        for variant in &variants {
            best = best.min(rotation_aligned_error(variant, &shifted));
        }
    }
    best
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vec3;
    use crate::shapes::make_trail;

    fn square() -> Vec<Vec2> {
        vec![
            Vec2::new(-1.0, -1.0),
            Vec2::new(1.0, -1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(-1.0, 1.0),
        ]
    }

    #[test]
    fn test_resample_open_keeps_endpoints() {
        let line = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0)];
        let out = resample(&line, 5, false).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out[0], line[0]);
        assert_eq!(out[4], line[2]);
        // Total length 2, spacing 0.5: the middle point is the corner.
        assert!(out[2].distance(Vec2::new(1.0, 0.0)) < 1e-5);
        assert!(out[1].distance(Vec2::new(0.5, 0.0)) < 1e-5);
    }

    #[test]
    fn test_resample_closed_wraps() {
        let out = resample(&square(), 8, true).unwrap();
        assert_eq!(out.len(), 8);
        // Perimeter 8, spacing 1: corners and edge midpoints.
        assert!(out[0].distance(Vec2::new(-1.0, -1.0)) < 1e-5);
        assert!(out[1].distance(Vec2::new(0.0, -1.0)) < 1e-5);
        assert!(out[7].distance(Vec2::new(-1.0, 0.0)) < 1e-5);
    }

    #[test]
    fn test_resample_degenerate() {
        assert!(resample(&[Vec2::ZERO], 8, false).is_none());
        assert!(resample(&[Vec2::ZERO, Vec2::ZERO], 8, false).is_none());
        assert!(resample(&square(), 1, true).is_none());
    }

    #[test]
    fn test_normalize_unit_rms() {
        let pts: Vec<Vec2> = square().iter().map(|p| *p * 3.0 + Vec2::new(5.0, -2.0)).collect();
        let n = normalize(&pts).unwrap();
        let rms = (n.iter().map(|p| p.dot(*p)).sum::<f32>() / n.len() as f32).sqrt();
        assert!((rms - 1.0).abs() < 1e-5);
        assert!(centroid_2d(&n).length() < 1e-5);
        assert!(normalize(&[Vec2::new(1.0, 1.0); 4]).is_none());
    }

    #[test]
    fn test_rotation_alignment_recovers_rotation() {
        let t = normalize(&square()).unwrap();
        let s: Vec<Vec2> = t.iter().map(|p| p.rotated(0.7)).collect();
        assert!(rotation_aligned_error(&t, &s) < 1e-5);
    }

    #[test]
    fn test_closed_loop_start_offset() {
        let t = normalize(&resample(&square(), 16, true).unwrap()).unwrap();
        let mut s = t.clone();
        s.rotate_left(3);
        assert!(best_alignment_error(&t, &s, false, false, true) < 1e-4);
        assert!(best_alignment_error(&t, &s, false, false, false) > 0.1);
    }

    #[test]
    fn test_sexp_round_trip_exact() {
        let template = DrawnTemplate::new(
            vec![
                Vec2::new(-1.0, 1.0),
                Vec2::new(1.0 / 3.0, -0.1),
                Vec2::new(0.123_456_79, -0.987_654_3),
                Vec2::new(1.0, 0.0),
            ],
            true,
        );
        let text = template.to_sexp();
        let back = DrawnTemplate::from_sexp(&text).unwrap();
        assert_eq!(back, template);
        assert_eq!(back.to_sexp(), text);
    }

    #[test]
    fn test_from_sexp_rejects_bad_points() {
        assert!(DrawnTemplate::from_sexp("(:closed-loop t :points (1 2 3))").is_err());
        assert!(DrawnTemplate::from_sexp("(:closed-loop t)").is_err());
        assert!(DrawnTemplate::from_sexp("(:points (1 a))").is_err());
        let open = DrawnTemplate::from_sexp("(:points (0 0 1 1))").unwrap();
        assert!(!open.closed_loop);
        assert_eq!(open.points.len(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("motion-gestures-template-{}.sexp", std::process::id()));
        let template = DrawnTemplate::from_flat(&[-1.0, 1.0, 0.0, -1.0, 1.0, 1.0], false);
        template.save(&path).unwrap();
        let loaded = DrawnTemplate::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, template);
    }

    #[test]
    fn test_capture_fits_unit_box() {
        let points: Vec<Vec3> = (0..30)
            .map(|i| {
                let t = i as f32 / 29.0 * std::f32::consts::TAU;
                Vec3::new(0.3 * t.cos(), 0.15 * t.sin(), 1.0)
            })
            .collect();
        let template = DrawnTemplate::capture(&make_trail(&points, 0.02), true, 24).unwrap();
        assert_eq!(template.points.len(), 24);
        assert!(template.closed_loop);
        let max_abs = template
            .points
            .iter()
            .map(|p| p.x.abs().max(p.y.abs()))
            .fold(0.0f32, f32::max);
        assert!((max_abs - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_usable() {
        assert!(!DrawnTemplate::default().is_usable());
        assert!(DrawnTemplate::from_flat(&[0.0, 0.0, 1.0, 0.0], false).is_usable());
    }
}
