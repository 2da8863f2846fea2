//! Math utilities and types
//!
//! Thin layer over nalgebra. Everything here uses the column-vector
//! convention (`p' = M * p`) with a left-handed view space: +Z looks
//! forward, +Y is up and projected depth lands in `[0, 1]`.

pub use nalgebra::{Matrix4, Quaternion, Unit, UnitQuaternion, Vector2, Vector3, Vector4};

use serde::{Deserialize, Serialize};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = UnitQuaternion<f32>;

/// Unit +X axis.
pub const POSITIVE_X: Vec3 = Vec3::new(1.0, 0.0, 0.0);
/// Unit +Y axis.
pub const POSITIVE_Y: Vec3 = Vec3::new(0.0, 1.0, 0.0);
/// Unit +Z axis.
pub const POSITIVE_Z: Vec3 = Vec3::new(0.0, 0.0, 1.0);

/// Floating point RGBA color, components nominally in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    /// Red
    pub r: f32,
    /// Green
    pub g: f32,
    /// Blue
    pub b: f32,
    /// Alpha
    pub a: f32,
}

impl Color {
    /// Opaque white.
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    /// Opaque black.
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    /// Create a color from its four components
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque color
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    /// True when the RGB part is exactly black (alpha ignored).
    pub fn is_black(&self) -> bool {
        self.r == 0.0 && self.g == 0.0 && self.b == 0.0
    }

    /// True when the RGB part is exactly white (alpha ignored).
    pub fn is_white(&self) -> bool {
        self.r == 1.0 && self.g == 1.0 && self.b == 1.0
    }

    /// Multiply the RGB part by a scalar, keeping alpha.
    pub fn scale_rgb(&self, factor: f32) -> Self {
        Self::new(self.r * factor, self.g * factor, self.b * factor, self.a)
    }

    /// Luminance-weighted grayscale value of the RGB part.
    pub fn grayscale(&self) -> f32 {
        self.r * 0.299 + self.g * 0.587 + self.b * 0.114
    }

    /// As a 4-component vector, for shader parameters.
    pub fn to_vec4(self) -> Vec4 {
        Vec4::new(self.r, self.g, self.b, self.a)
    }

    /// RGB part as a 3-component vector.
    pub fn to_vec3(self) -> Vec3 {
        Vec3::new(self.r, self.g, self.b)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Linear interpolation between two scalars.
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Transform a point by a full matrix, dividing by w.
pub fn transform_coord(m: &Mat4, p: &Vec3) -> Vec3 {
    let v = m * Vec4::new(p.x, p.y, p.z, 1.0);
    if v.w == 0.0 {
        Vec3::new(v.x, v.y, v.z)
    } else {
        Vec3::new(v.x / v.w, v.y / v.w, v.z / v.w)
    }
}

/// Transform a direction by the upper 3x3 part of a matrix.
pub fn transform_normal(m: &Mat4, n: &Vec3) -> Vec3 {
    let v = m * Vec4::new(n.x, n.y, n.z, 0.0);
    Vec3::new(v.x, v.y, v.z)
}

/// Normalize a vector, leaving a zero vector untouched.
pub fn safe_normalize(v: &Vec3) -> Vec3 {
    let len = v.norm();
    if len > 0.0 {
        v / len
    } else {
        *v
    }
}

/// Invert a matrix, falling back to identity for singular input.
pub fn inverse_or_identity(m: &Mat4) -> Mat4 {
    m.try_inverse().unwrap_or_else(Mat4::identity)
}

/// Left-handed view matrix looking from `eye` towards `at`.
pub fn look_at_lh(eye: &Vec3, at: &Vec3, up: &Vec3) -> Mat4 {
    let z = safe_normalize(&(at - eye));
    let x = safe_normalize(&up.cross(&z));
    let y = z.cross(&x);
    Mat4::new(
        x.x, x.y, x.z, -x.dot(eye),
        y.x, y.y, y.z, -y.dot(eye),
        z.x, z.y, z.z, -z.dot(eye),
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Left-handed perspective projection with depth mapped to `[0, 1]`.
pub fn perspective_fov_lh(fov_y: f32, aspect: f32, z_near: f32, z_far: f32) -> Mat4 {
    let y_scale = 1.0 / (fov_y * 0.5).tan();
    let x_scale = y_scale / aspect;
    let q = z_far / (z_far - z_near);
    Mat4::new(
        x_scale, 0.0, 0.0, 0.0,
        0.0, y_scale, 0.0, 0.0,
        0.0, 0.0, q, -z_near * q,
        0.0, 0.0, 1.0, 0.0,
    )
}

/// Left-handed off-center orthographic projection with depth in `[0, 1]`.
pub fn ortho_off_center_lh(left: f32, right: f32, bottom: f32, top: f32, z_near: f32, z_far: f32) -> Mat4 {
    Mat4::new(
        2.0 / (right - left), 0.0, 0.0, (left + right) / (left - right),
        0.0, 2.0 / (top - bottom), 0.0, (top + bottom) / (bottom - top),
        0.0, 0.0, 1.0 / (z_far - z_near), z_near / (z_near - z_far),
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Scale, then rotate, then translate.
pub fn compose_srt(size: f32, orientation: Option<&Quat>, pos: &Vec3) -> Mat4 {
    let scale = Mat4::new_nonuniform_scaling(&Vec3::repeat(size));
    let rotation = orientation.map_or_else(Mat4::identity, |q| q.to_homogeneous());
    Mat4::new_translation(pos) * rotation * scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_look_at_maps_target_onto_positive_z() {
        let view = look_at_lh(&Vec3::new(0.0, 0.0, -5.0), &Vec3::zeros(), &POSITIVE_Y);
        let p = transform_coord(&view, &Vec3::zeros());
        assert_relative_eq!(p, Vec3::new(0.0, 0.0, 5.0), epsilon = 1e-5);
    }

    #[test]
    fn test_perspective_depth_range() {
        let proj = perspective_fov_lh(std::f32::consts::FRAC_PI_2, 1.0, 1.0, 100.0);
        let near = transform_coord(&proj, &Vec3::new(0.0, 0.0, 1.0));
        let far = transform_coord(&proj, &Vec3::new(0.0, 0.0, 100.0));
        assert_relative_eq!(near.z, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_ortho_maps_box_to_unit_cube() {
        let proj = ortho_off_center_lh(-2.0, 2.0, -1.0, 3.0, 0.0, 10.0);
        let lo = transform_coord(&proj, &Vec3::new(-2.0, -1.0, 0.0));
        let hi = transform_coord(&proj, &Vec3::new(2.0, 3.0, 10.0));
        assert_relative_eq!(lo, Vec3::new(-1.0, -1.0, 0.0), epsilon = 1e-5);
        assert_relative_eq!(hi, Vec3::new(1.0, 1.0, 1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_compose_srt_order() {
        let q = Quat::from_axis_angle(&Vector3::y_axis(), std::f32::consts::FRAC_PI_2);
        let m = compose_srt(2.0, Some(&q), &Vec3::new(10.0, 0.0, 0.0));
        // (1,0,0) scaled to (2,0,0), rotated about +Y to (0,0,-2), then moved.
        let p = transform_coord(&m, &Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Vec3::new(10.0, 0.0, -2.0), epsilon = 1e-5);
    }

    #[test]
    fn test_color_predicates() {
        assert!(Color::BLACK.is_black());
        assert!(Color::new(0.0, 0.0, 0.0, 0.3).is_black());
        assert!(Color::WHITE.is_white());
        assert!(!Color::rgb(0.5, 0.5, 0.5).is_white());
    }
}
