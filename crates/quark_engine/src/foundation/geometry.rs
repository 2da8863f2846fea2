//! Bounding volumes and intersection tests
//!
//! All frustum planes point inwards: a point `p` is inside a plane when
//! `normal.dot(p) + distance >= 0`. The `_fast` tests are conservative:
//! they never reject a shape that really intersects, but may accept one
//! lying just outside a frustum corner.

use super::math::{inverse_or_identity, transform_coord, Mat4, Vec3};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl BoundingBox {
    /// Create a new box from min and max points
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create a box centered at a point with given half extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Smallest box containing every point of the iterator.
    ///
    /// Returns a degenerate box at the origin for an empty iterator.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        let mut iter = points.into_iter();
        let Some(first) = iter.next() else {
            return Self::new(Vec3::zeros(), Vec3::zeros());
        };
        iter.fold(Self::new(*first, *first), |b, p| {
            Self::new(b.min.inf(p), b.max.sup(p))
        })
    }

    /// Axis-aligned box around a sphere.
    pub fn from_sphere(center: &Vec3, radius: f32) -> Self {
        Self::from_center_extents(*center, Vec3::repeat(radius))
    }

    /// Get the center of the box
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the half size of the box
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// The eight corners, bit 0 selecting x, bit 1 y and bit 2 z.
    pub fn corners(&self) -> [Vec3; 8] {
        std::array::from_fn(|i| {
            Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }

    /// Check if this box contains a point
    pub fn contains_point(&self, point: &Vec3) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.y >= self.min.y && point.y <= self.max.y &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    /// Check if this box intersects another box
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Box of the eight corners after transformation.
    pub fn transformed(&self, m: &Mat4) -> Self {
        let corners = self.corners().map(|c| transform_coord(m, &c));
        Self::from_points(corners.iter())
    }
}

/// Plane in `normal . p + distance = 0` form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Normal vector
    pub normal: Vec3,
    /// Distance term
    pub distance: f32,
}

impl Plane {
    /// Create a plane from a normal and distance term, normalizing both
    pub fn new(normal: Vec3, distance: f32) -> Self {
        let len = normal.norm();
        if len > 0.0 {
            Self { normal: normal / len, distance: distance / len }
        } else {
            Self { normal, distance }
        }
    }

    /// Plane through a point with the given normal
    pub fn from_point_normal(point: &Vec3, normal: &Vec3) -> Self {
        Self::new(*normal, -normal.dot(point))
    }

    /// Calculate signed distance from plane to point
    pub fn distance_to_point(&self, point: &Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// View frustum as six inward planes plus its eight corner points.
#[derive(Debug, Clone, PartialEq)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far
    pub planes: [Plane; 6],
    /// Corners ordered like [`BoundingBox::corners`] in clip space
    pub points: [Vec3; 8],
}

impl Frustum {
    /// Extract the frustum of a view-projection matrix (depth in `[0, 1]`).
    pub fn from_view_proj(view_proj: &Mat4) -> Self {
        let row = |i: usize| view_proj.row(i).transpose();
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
        let plane = |v: nalgebra::Vector4<f32>| Plane::new(Vec3::new(v.x, v.y, v.z), v.w);
        let planes = [
            plane(r3 + r0),
            plane(r3 - r0),
            plane(r3 + r1),
            plane(r3 - r1),
            plane(r2),
            plane(r3 - r2),
        ];

        let inv = inverse_or_identity(view_proj);
        let points = std::array::from_fn(|i| {
            let ndc = Vec3::new(
                if i & 1 == 0 { -1.0 } else { 1.0 },
                if i & 2 == 0 { -1.0 } else { 1.0 },
                if i & 4 == 0 { 0.0 } else { 1.0 },
            );
            transform_coord(&inv, &ndc)
        });

        Self { planes, points }
    }

    /// Axis-aligned box around the eight corners.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(self.points.iter())
    }

    /// Whether a point lies inside all six planes.
    pub fn contains_point(&self, p: &Vec3) -> bool {
        self.planes.iter().all(|pl| pl.distance_to_point(p) >= 0.0)
    }
}

/// Sphere lies entirely inside the box.
pub fn sphere_in_box(center: &Vec3, radius: f32, b: &BoundingBox) -> bool {
    center.x - radius >= b.min.x && center.x + radius <= b.max.x &&
    center.y - radius >= b.min.y && center.y + radius <= b.max.y &&
    center.z - radius >= b.min.z && center.z + radius <= b.max.z
}

/// Squared distance from a point to the nearest point of a box.
pub fn point_to_box_distance_sq(p: &Vec3, b: &BoundingBox) -> f32 {
    let clamped = p.sup(&b.min).inf(&b.max);
    (p - clamped).norm_squared()
}

/// Sphere touches the box.
pub fn sphere_to_box(center: &Vec3, radius: f32, b: &BoundingBox) -> bool {
    point_to_box_distance_sq(center, b) <= radius * radius
}

/// Two spheres touch.
pub fn sphere_to_sphere(c1: &Vec3, r1: f32, c2: &Vec3, r2: f32) -> bool {
    let r = r1 + r2;
    (c1 - c2).norm_squared() <= r * r
}

/// Point lies inside the sphere.
pub fn point_in_sphere(p: &Vec3, center: &Vec3, radius: f32) -> bool {
    (p - center).norm_squared() <= radius * radius
}

/// Sphere is not outside any frustum plane.
pub fn sphere_to_frustum_fast(center: &Vec3, radius: f32, f: &Frustum) -> bool {
    f.planes.iter().all(|pl| pl.distance_to_point(center) >= -radius)
}

/// Sphere lies entirely inside the frustum.
pub fn sphere_in_frustum(center: &Vec3, radius: f32, f: &Frustum) -> bool {
    f.planes.iter().all(|pl| pl.distance_to_point(center) >= radius)
}

fn positive_vertex(pl: &Plane, b: &BoundingBox) -> Vec3 {
    Vec3::new(
        if pl.normal.x >= 0.0 { b.max.x } else { b.min.x },
        if pl.normal.y >= 0.0 { b.max.y } else { b.min.y },
        if pl.normal.z >= 0.0 { b.max.z } else { b.min.z },
    )
}

fn negative_vertex(pl: &Plane, b: &BoundingBox) -> Vec3 {
    Vec3::new(
        if pl.normal.x >= 0.0 { b.min.x } else { b.max.x },
        if pl.normal.y >= 0.0 { b.min.y } else { b.max.y },
        if pl.normal.z >= 0.0 { b.min.z } else { b.max.z },
    )
}

/// Box is not fully outside any frustum plane.
pub fn box_to_frustum_fast(b: &BoundingBox, f: &Frustum) -> bool {
    f.planes
        .iter()
        .all(|pl| pl.distance_to_point(&positive_vertex(pl, b)) >= 0.0)
}

/// Box lies entirely inside the frustum.
pub fn box_in_frustum(b: &BoundingBox, f: &Frustum) -> bool {
    f.planes
        .iter()
        .all(|pl| pl.distance_to_point(&negative_vertex(pl, b)) >= 0.0)
}

/// Separating-plane test between two frustums using their corner points.
pub fn frustum_to_frustum(a: &Frustum, b: &Frustum) -> bool {
    let separated = |planes: &[Plane; 6], points: &[Vec3; 8]| {
        planes
            .iter()
            .any(|pl| points.iter().all(|p| pl.distance_to_point(p) < 0.0))
    };
    !separated(&a.planes, &b.points) && !separated(&b.planes, &a.points)
}

/// Distance along a ray to a sphere, `Some(0.0)` when starting inside.
pub fn ray_to_sphere(orig: &Vec3, dir: &Vec3, center: &Vec3, radius: f32) -> Option<f32> {
    let m = orig - center;
    let c = m.norm_squared() - radius * radius;
    if c <= 0.0 {
        return Some(0.0);
    }
    let a = dir.norm_squared();
    if a == 0.0 {
        return None;
    }
    let b = m.dot(dir);
    if b > 0.0 {
        return None;
    }
    let disc = b * b - a * c;
    if disc < 0.0 {
        return None;
    }
    Some((-b - disc.sqrt()) / a)
}

/// Slab test, returning the entry distance or `Some(0.0)` when starting inside.
pub fn ray_to_box(orig: &Vec3, dir: &Vec3, b: &BoundingBox) -> Option<f32> {
    let mut t_min = f32::NEG_INFINITY;
    let mut t_max = f32::INFINITY;
    for axis in 0..3 {
        if dir[axis] == 0.0 {
            if orig[axis] < b.min[axis] || orig[axis] > b.max[axis] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / dir[axis];
        let t1 = (b.min[axis] - orig[axis]) * inv;
        let t2 = (b.max[axis] - orig[axis]) * inv;
        t_min = t_min.max(t1.min(t2));
        t_max = t_max.min(t1.max(t2));
    }
    if t_max >= t_min && t_max >= 0.0 {
        Some(t_min.max(0.0))
    } else {
        None
    }
}

/// Distance along a ray to a plane.
pub fn ray_to_plane(orig: &Vec3, dir: &Vec3, plane: &Plane) -> Option<f32> {
    let denom = plane.normal.dot(dir);
    if denom == 0.0 {
        return None;
    }
    Some(-plane.distance_to_point(orig) / denom)
}

/// Parameter of the point on `orig + t * dir` closest to `p`, scaled by `|dir|^2`.
pub fn closest_point_on_line(p: &Vec3, orig: &Vec3, dir: &Vec3) -> f32 {
    (p - orig).dot(dir)
}

/// Box `a` moving along `vel` against static box `b`.
///
/// Returns the first time of contact, clamped to zero when the boxes
/// already overlap, or `None` if they never meet for `t >= 0`.
pub fn swept_box_to_box(a: &BoundingBox, vel: &Vec3, b: &BoundingBox) -> Option<f32> {
    let mut t_enter = 0.0_f32;
    let mut t_exit = f32::INFINITY;
    for axis in 0..3 {
        let v = vel[axis];
        if v == 0.0 {
            if a.max[axis] < b.min[axis] || a.min[axis] > b.max[axis] {
                return None;
            }
            continue;
        }
        let t1 = (b.min[axis] - a.max[axis]) / v;
        let t2 = (b.max[axis] - a.min[axis]) / v;
        t_enter = t_enter.max(t1.min(t2));
        t_exit = t_exit.min(t1.max(t2));
        if t_enter > t_exit {
            return None;
        }
    }
    Some(t_enter)
}

/// Sphere moving along `vel` touches a box at its closest approach to the box center.
pub fn swept_sphere_to_box(center: &Vec3, radius: f32, vel: &Vec3, b: &BoundingBox) -> bool {
    let len_sq = vel.norm_squared();
    let t = if len_sq > 0.0 {
        (closest_point_on_line(&b.center(), center, vel) / len_sq).max(0.0)
    } else {
        0.0
    };
    let point = center + vel * t;
    sphere_to_box(&point, radius, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{look_at_lh, perspective_fov_lh, POSITIVE_Y};
    use approx::assert_relative_eq;

    fn unit_box() -> BoundingBox {
        BoundingBox::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0))
    }

    fn test_frustum() -> Frustum {
        let view = look_at_lh(&Vec3::new(0.0, 0.0, -10.0), &Vec3::zeros(), &POSITIVE_Y);
        let proj = perspective_fov_lh(std::f32::consts::FRAC_PI_2, 1.0, 1.0, 100.0);
        Frustum::from_view_proj(&(proj * view))
    }

    #[test]
    fn test_sphere_in_box() {
        let b = unit_box();
        assert!(sphere_in_box(&Vec3::zeros(), 1.0, &b));
        assert!(!sphere_in_box(&Vec3::new(0.5, 0.0, 0.0), 1.0, &b));
    }

    #[test]
    fn test_sphere_to_box() {
        let b = unit_box();
        assert!(sphere_to_box(&Vec3::new(2.0, 0.0, 0.0), 1.0, &b));
        assert!(!sphere_to_box(&Vec3::new(2.0, 2.0, 0.0), 1.0, &b));
    }

    #[test]
    fn test_frustum_points_and_planes_agree() {
        let f = test_frustum();
        for p in &f.points {
            for pl in &f.planes {
                assert!(pl.distance_to_point(p) > -0.05);
            }
        }
        assert!(f.contains_point(&Vec3::zeros()));
        assert!(!f.contains_point(&Vec3::new(0.0, 0.0, -20.0)));
    }

    #[test]
    fn test_sphere_frustum_tests() {
        let f = test_frustum();
        assert!(sphere_to_frustum_fast(&Vec3::zeros(), 1.0, &f));
        assert!(sphere_in_frustum(&Vec3::zeros(), 1.0, &f));
        assert!(!sphere_to_frustum_fast(&Vec3::new(0.0, 0.0, -30.0), 1.0, &f));
        assert!(!sphere_to_frustum_fast(&Vec3::new(200.0, 0.0, 0.0), 1.0, &f));
    }

    #[test]
    fn test_box_frustum_tests() {
        let f = test_frustum();
        assert!(box_in_frustum(&unit_box(), &f));
        let straddling = BoundingBox::new(Vec3::new(-1.0, -1.0, -20.0), Vec3::new(1.0, 1.0, 0.0));
        assert!(!box_in_frustum(&straddling, &f));
        assert!(box_to_frustum_fast(&straddling, &f));
        let behind = BoundingBox::new(Vec3::new(-1.0, -1.0, -30.0), Vec3::new(1.0, 1.0, -20.0));
        assert!(!box_to_frustum_fast(&behind, &f));
    }

    #[test]
    fn test_frustum_to_frustum() {
        let a = test_frustum();
        assert!(frustum_to_frustum(&a, &a));
        let view = look_at_lh(&Vec3::new(0.0, 0.0, -500.0), &Vec3::new(0.0, 0.0, -1000.0), &POSITIVE_Y);
        let proj = perspective_fov_lh(0.5, 1.0, 1.0, 10.0);
        let far_away = Frustum::from_view_proj(&(proj * view));
        assert!(!frustum_to_frustum(&a, &far_away));
    }

    #[test]
    fn test_ray_to_sphere() {
        let t = ray_to_sphere(&Vec3::new(0.0, 0.0, -5.0), &Vec3::new(0.0, 0.0, 1.0), &Vec3::zeros(), 1.0);
        assert_relative_eq!(t.unwrap_or(-1.0), 4.0, epsilon = 1e-5);
        assert_eq!(ray_to_sphere(&Vec3::zeros(), &Vec3::new(1.0, 0.0, 0.0), &Vec3::zeros(), 1.0), Some(0.0));
        assert!(ray_to_sphere(&Vec3::new(0.0, 5.0, -5.0), &Vec3::new(0.0, 0.0, 1.0), &Vec3::zeros(), 1.0).is_none());
        assert!(ray_to_sphere(&Vec3::new(0.0, 0.0, 5.0), &Vec3::new(0.0, 0.0, 1.0), &Vec3::zeros(), 1.0).is_none());
    }

    #[test]
    fn test_ray_to_box() {
        let b = unit_box();
        let t = ray_to_box(&Vec3::new(-5.0, 0.0, 0.0), &Vec3::new(1.0, 0.0, 0.0), &b);
        assert_relative_eq!(t.unwrap_or(-1.0), 4.0, epsilon = 1e-5);
        assert!(ray_to_box(&Vec3::new(-5.0, 3.0, 0.0), &Vec3::new(1.0, 0.0, 0.0), &b).is_none());
    }

    #[test]
    fn test_swept_box_to_box() {
        let a = BoundingBox::new(Vec3::new(-1.0, 9.0, -1.0), Vec3::new(1.0, 11.0, 1.0));
        let down = Vec3::new(0.0, -1.0, 0.0);
        let t = swept_box_to_box(&a, &down, &unit_box());
        assert_relative_eq!(t.unwrap_or(-1.0), 8.0, epsilon = 1e-5);
        assert!(swept_box_to_box(&a, &-down, &unit_box()).is_none());
        assert_eq!(swept_box_to_box(&unit_box(), &down, &unit_box()), Some(0.0));
    }

    #[test]
    fn test_swept_sphere_to_box() {
        let b = unit_box();
        assert!(swept_sphere_to_box(&Vec3::new(0.0, 10.0, 0.0), 0.5, &Vec3::new(0.0, -1.0, 0.0), &b));
        assert!(!swept_sphere_to_box(&Vec3::new(0.0, 10.0, 0.0), 0.5, &Vec3::new(0.0, 1.0, 0.0), &b));
    }
}
