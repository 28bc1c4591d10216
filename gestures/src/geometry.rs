//! Small vector types and the plane-fitting helpers shared by the shape matchers.
//!
//! Positions are meters in the host's world space.  Everything here is a pure
//! function; degenerate input is reported through `Option`, never a panic.

use std::f32::consts::PI;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// Lengths below this are treated as zero.
pub const EPSILON: f32 = 1e-6;

// ── Vec3 ────────────────────────────────────────────────────

/// 3D position or direction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);
    pub const X: Vec3 = Vec3::new(1.0, 0.0, 0.0);
    pub const Y: Vec3 = Vec3::new(0.0, 1.0, 0.0);
    pub const Z: Vec3 = Vec3::new(0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn distance(self, other: Vec3) -> f32 {
        (other - self).length()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    pub fn try_normalize(self) -> Option<Vec3> {
        let len = self.length();
        if len > EPSILON && len.is_finite() {
            Some(self / len)
        } else {
            None
        }
    }

    /// Unit vector, or zero when the direction is undefined.
    pub fn normalize_or_zero(self) -> Vec3 {
        self.try_normalize().unwrap_or(Vec3::ZERO)
    }

    /// Component of `self` lying in the plane with unit normal `normal`.
    pub fn reject_from(self, normal: Vec3) -> Vec3 {
        self - normal * self.dot(normal)
    }

    pub fn lerp(self, other: Vec3, t: f32) -> Vec3 {
        self + (other - self) * t
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Vec3) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f32> for Vec3 {
    type Output = Vec3;
    fn div(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;
    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

// ── Vec2 ────────────────────────────────────────────────────

/// Point in a projected plane or in template space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2::new(0.0, 0.0);

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn dot(self, other: Vec2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Z component of the 3D cross product.
    pub fn perp_dot(self, other: Vec2) -> f32 {
        self.x * other.y - self.y * other.x
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (other - self).length()
    }

    pub fn angle(self) -> f32 {
        self.y.atan2(self.x)
    }

    pub fn lerp(self, other: Vec2, t: f32) -> Vec2 {
        self + (other - self) * t
    }

    /// Counter-clockwise rotation by `angle` radians.
    pub fn rotated(self, angle: f32) -> Vec2 {
        let (sin, cos) = angle.sin_cos();
        Vec2::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f32> for Vec2 {
    type Output = Vec2;
    fn div(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x / rhs, self.y / rhs)
    }
}

// ── Point set helpers ───────────────────────────────────────

/// Arithmetic mean of all points (zero for an empty set).
pub fn centroid(points: &[Vec3]) -> Vec3 {
    if points.is_empty() {
        return Vec3::ZERO;
    }
    let mut sum = Vec3::ZERO;
    for p in points {
        sum += *p;
    }
    sum / points.len() as f32
}

pub fn centroid_2d(points: &[Vec2]) -> Vec2 {
    if points.is_empty() {
        return Vec2::ZERO;
    }
    let sum = points.iter().fold(Vec2::ZERO, |acc, p| acc + *p);
    sum / points.len() as f32
}

/// Best-fit plane normal by Newell's method.
///
/// Sums the cross products of consecutive centroid-relative offsets, wrapping
/// from the last point back to the first.  The normal follows the right-hand
/// rule for the traversal order.  Returns `None` when the sum vanishes
/// (colinear or coincident points).
pub fn newell_normal(points: &[Vec3], center: Vec3) -> Option<Vec3> {
    if points.len() < 3 {
        return None;
    }
    let mut sum = Vec3::ZERO;
    for (i, p) in points.iter().enumerate() {
        let next = points[(i + 1) % points.len()];
        sum += (*p - center).cross(next - center);
    }
    sum.try_normalize()
}

/// Flip a plane normal to a fixed orientation: its dominant world component
/// becomes positive, preferring Z, then Y, then X on ties.  Winding measured
/// about the result is the winding seen from that side, whatever order the
/// points were visited in.
pub fn canonical_normal(normal: Vec3) -> Vec3 {
    let (ax, ay, az) = (normal.x.abs(), normal.y.abs(), normal.z.abs());
    let dominant = if az >= ay && az >= ax {
        normal.z
    } else if ay >= ax {
        normal.y
    } else {
        normal.x
    };
    if dominant < 0.0 {
        -normal
    } else {
        normal
    }
}

/// Unit vector in the plane of `normal`, taken from a world axis.
/// Uses X unless the normal is nearly parallel to it.
pub fn world_axis_in_plane(normal: Vec3) -> Vec3 {
    let axis = if normal.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
    axis.reject_from(normal).normalize_or_zero()
}

/// Sum of consecutive 3D segment lengths.
pub fn path_length(points: &[Vec3]) -> f32 {
    points.windows(2).map(|w| w[0].distance(w[1])).sum()
}

pub fn path_length_2d(points: &[Vec2]) -> f32 {
    points.windows(2).map(|w| w[0].distance(w[1])).sum()
}

/// Signed shoelace area of a closed polygon; positive when counter-clockwise.
pub fn signed_area(points: &[Vec2]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for (i, p) in points.iter().enumerate() {
        twice += p.perp_dot(points[(i + 1) % points.len()]);
    }
    twice * 0.5
}

/// Shortest signed difference `to - from`, wrapped into (-PI, PI].
pub fn delta_angle(from: f32, to: f32) -> f32 {
    let mut delta = (to - from) % (2.0 * PI);
    if delta > PI {
        delta -= 2.0 * PI;
    } else if delta <= -PI {
        delta += 2.0 * PI;
    }
    delta
}

/// Angle between two directions in degrees (0 when either is zero).
pub fn angle_between_deg(a: Vec3, b: Vec3) -> f32 {
    match (a.try_normalize(), b.try_normalize()) {
        (Some(a), Some(b)) => a.dot(b).clamp(-1.0, 1.0).acos().to_degrees(),
        _ => 0.0,
    }
}

// ── Tests ──────────────────────────────────────────────────
