//! Core geometric types shared across the relief workspace.
//!
//! All geometry is double precision. These are CPU-side representations;
//! exporters narrow to f32 at the byte boundary.

use glam::DVec3;

/// Vectors shorter than this normalize to zero.
pub const NORMALIZE_EPSILON: f64 = 1e-9;

/// Rays closer to parallel than this miss every triangle.
pub const PARALLEL_EPSILON: f64 = 1e-7;

/// Normalize `v`, returning the zero vector for degenerate input.
#[inline]
pub fn safe_normalize(v: DVec3) -> DVec3 {
    let len = v.length();
    if len < NORMALIZE_EPSILON {
        DVec3::ZERO
    } else {
        v / len
    }
}

/// A sampled surface point with its (unnormalized) surface normal.
///
/// Vertices are created on log parse or database load and never mutated
/// afterwards, except for `id` which the OBJ exporter assigns lazily.
/// Identity is by handle (index into the owning list), not by value; two
/// vertices may share a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Position in world space.
    pub position: DVec3,
    /// Surface normal as sampled. Stored as-is, never normalized.
    pub normal: DVec3,
    /// Export-time vertex id. Zero means "not yet assigned".
    pub id: u32,
}

impl Vertex {
    /// Create a vertex with an unassigned id.
    pub fn new(position: DVec3, normal: DVec3) -> Self {
        Self {
            position,
            normal,
            id: 0,
        }
    }
}

/// A segment of space known to be empty, from `start` to `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub start: DVec3,
    pub end: DVec3,
}

impl Ray {
    pub fn new(start: DVec3, end: DVec3) -> Self {
        Self { start, end }
    }

    /// Unit direction from start to end (zero for degenerate rays).
    pub fn direction(&self) -> DVec3 {
        safe_normalize(self.end - self.start)
    }

    /// Segment length.
    pub fn length(&self) -> f64 {
        (self.end - self.start).length()
    }

    /// Axis-aligned bounds of the two endpoints.
    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.start.min(self.end), self.start.max(self.end))
    }
}

/// An axis-aligned box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: DVec3,
    pub max: DVec3,
}

impl Bounds {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Smallest bounds containing every point in `points`.
    ///
    /// Returns a degenerate box at the origin for an empty slice.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a DVec3>) -> Self {
        let mut iter = points.into_iter();
        let Some(first) = iter.next() else {
            return Self::new(DVec3::ZERO, DVec3::ZERO);
        };
        let mut bounds = Self::new(*first, *first);
        for p in iter {
            bounds.encapsulate(*p);
        }
        bounds
    }

    pub fn midpoint(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, p: DVec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Grow the bounds to include `p`.
    pub fn encapsulate(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// A copy grown by `epsilon` on every side.
    pub fn expanded(&self, epsilon: f64) -> Bounds {
        Bounds::new(
            self.min - DVec3::splat(epsilon),
            self.max + DVec3::splat(epsilon),
        )
    }
}

/// Möller–Trumbore ray/triangle intersection.
///
/// `dir` must be unit length; the returned `t` is then the distance from
/// `origin` to the intersection point. Returns `None` when the ray is
/// parallel to the triangle plane or the hit falls outside the triangle.
/// The caller interprets `t` (it may be negative, behind the origin).
pub fn ray_triangle_intersection(
    origin: DVec3,
    dir: DVec3,
    a: DVec3,
    b: DVec3,
    c: DVec3,
) -> Option<f64> {
    let e1 = b - a;
    let e2 = c - a;
    let h = dir.cross(e2);
    let det = e1.dot(h);
    if det.abs() < PARALLEL_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - a;
    let u = inv_det * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = inv_det * dir.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    Some(inv_det * e2.dot(q))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_normalize_degenerate() {
        assert_eq!(safe_normalize(DVec3::ZERO), DVec3::ZERO);
        assert_eq!(safe_normalize(DVec3::splat(1e-12)), DVec3::ZERO);
        let n = safe_normalize(DVec3::new(3.0, 0.0, 4.0));
        assert!((n.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ray_direction_and_length() {
        let ray = Ray::new(DVec3::ZERO, DVec3::new(10.0, 0.0, 0.0));
        assert_eq!(ray.direction(), DVec3::X);
        assert_eq!(ray.length(), 10.0);
    }

    #[test]
    fn test_ray_bounds_orders_endpoints() {
        let ray = Ray::new(DVec3::new(5.0, 1.0, -2.0), DVec3::new(-1.0, 0.0, 3.0));
        let bounds = ray.bounds();
        assert_eq!(bounds.min, DVec3::new(-1.0, 0.0, -2.0));
        assert_eq!(bounds.max, DVec3::new(5.0, 1.0, 3.0));
    }

    #[test]
    fn test_bounds_contains() {
        let bounds = Bounds::new(DVec3::ZERO, DVec3::splat(2.0));
        assert!(bounds.contains(DVec3::ONE));
        assert!(bounds.contains(DVec3::ZERO));
        assert!(!bounds.contains(DVec3::new(1.0, 2.1, 1.0)));
    }

    #[test]
    fn test_bounds_intersects() {
        let a = Bounds::new(DVec3::ZERO, DVec3::splat(2.0));
        let b = Bounds::new(DVec3::splat(1.0), DVec3::splat(3.0));
        let c = Bounds::new(DVec3::splat(2.5), DVec3::splat(3.0));
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
        // Touching faces count as intersecting.
        let d = Bounds::new(DVec3::new(2.0, 0.0, 0.0), DVec3::new(4.0, 2.0, 2.0));
        assert!(a.intersects(&d));
    }

    #[test]
    fn test_bounds_encapsulate_and_expand() {
        let mut bounds = Bounds::new(DVec3::ZERO, DVec3::ONE);
        bounds.encapsulate(DVec3::new(-1.0, 5.0, 0.5));
        assert_eq!(bounds.min, DVec3::new(-1.0, 0.0, 0.0));
        assert_eq!(bounds.max, DVec3::new(1.0, 5.0, 1.0));
        let grown = bounds.expanded(0.5);
        assert_eq!(grown.min, DVec3::new(-1.5, -0.5, -0.5));
        assert_eq!(grown.max, DVec3::new(1.5, 5.5, 1.5));
    }

    #[test]
    fn test_intersection_through_interior() {
        // Vertical ray through a triangle lying in the XZ plane.
        let t = ray_triangle_intersection(
            DVec3::new(5.0, 1.0, 3.0),
            DVec3::new(0.0, -1.0, 0.0),
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(10.0, 0.0, 0.0),
            DVec3::new(5.0, 0.0, 10.0),
        )
        .expect("ray passes through the interior");
        assert!((t - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_intersection_parallel_ray() {
        let t = ray_triangle_intersection(
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::X,
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(10.0, 0.0, 0.0),
            DVec3::new(5.0, 0.0, 10.0),
        );
        assert!(t.is_none());
    }

    #[test]
    fn test_intersection_outside_triangle() {
        let t = ray_triangle_intersection(
            DVec3::new(20.0, 1.0, 3.0),
            DVec3::new(0.0, -1.0, 0.0),
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(10.0, 0.0, 0.0),
            DVec3::new(5.0, 0.0, 10.0),
        );
        assert!(t.is_none());
    }

    #[test]
    fn test_intersection_behind_origin() {
        // The hit parameter is reported even when negative; callers decide.
        let t = ray_triangle_intersection(
            DVec3::new(5.0, -1.0, 3.0),
            DVec3::new(0.0, -1.0, 0.0),
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(10.0, 0.0, 0.0),
            DVec3::new(5.0, 0.0, 10.0),
        )
        .expect("plane hit reported regardless of sign");
        assert!(t < 0.0);
    }
}
