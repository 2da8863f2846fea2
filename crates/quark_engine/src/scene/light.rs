//! Lights
//!
//! A scene holds at most one [`DirectionalLight`] and any number of
//! [`SpotLight`]s and [`PointLight`]s. Positioned lights cache their
//! bounding box and shadow cameras until a geometric parameter changes.

use std::cell::OnceCell;

use crate::foundation::geometry::{
    box_to_frustum_fast, sphere_to_box, sphere_to_frustum_fast, sphere_to_sphere, BoundingBox, Frustum,
};
use crate::foundation::math::{safe_normalize, transform_coord, Color, Mat4, Vec3, POSITIVE_Y, POSITIVE_Z};
use crate::render::backend::{CubeFace, ScissorRect};
use crate::scene::camera::ParamsCamera;

/// Parameters shared by every light
#[derive(Debug, Clone, PartialEq)]
pub struct BaseLight {
    /// Light takes part in drawing
    pub enabled: bool,
    /// Light renders a shadow map
    pub cast_shadow: bool,
    /// Light produces specular highlights
    pub cast_specular: bool,
    /// Half-Lambert diffuse for every surface it lights
    pub half_lambert: bool,
    /// Color; black lights are skipped
    pub color: Color,
    /// Brightness left in shadowed areas
    pub shadow_factor: f32,
}

impl Default for BaseLight {
    fn default() -> Self {
        Self {
            enabled: true,
            cast_shadow: false,
            cast_specular: true,
            half_lambert: false,
            color: Color::WHITE,
            shadow_factor: 0.0,
        }
    }
}

impl BaseLight {
    /// Default light of the given color
    pub fn with_color(color: Color) -> Self {
        Self { color, ..Self::default() }
    }

    /// Enabled and not black
    pub fn is_active(&self) -> bool {
        self.enabled && !self.color.is_black()
    }
}

/// Sun-like light shining along one direction everywhere
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalLight {
    /// Shared parameters
    pub base: BaseLight,
    /// Direction the light travels, unit length
    pub dir: Vec3,
    /// Distance from the eye beyond which no shadows are cast
    pub z_far: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self { base: BaseLight::default(), dir: -POSITIVE_Y, z_far: f32::MAX }
    }
}

impl DirectionalLight {
    /// Light of the given color and direction
    pub fn new(color: Color, dir: Vec3) -> Self {
        Self { base: BaseLight::with_color(color), dir: safe_normalize(&dir), z_far: f32::MAX }
    }
}

/// Screen rectangle covered by a positioned light, with the covered fraction
/// measured as `(width + height) / (target width + target height)`.
pub fn scissor_rect(points: &[Vec3; 8], view: &Mat4, proj: &Mat4, width: u32, height: u32) -> (ScissorRect, f32) {
    let view_points: [Vec3; 8] = std::array::from_fn(|i| transform_coord(view, &points[i]));
    let rect = if view_points.iter().any(|p| p.z <= 0.0) {
        ScissorRect::full(width, height)
    } else {
        let first = transform_coord(proj, &view_points[0]);
        let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
        for p in &view_points[1..] {
            let p = transform_coord(proj, p);
            min_x = min_x.min(p.x);
            max_x = max_x.max(p.x);
            min_y = min_y.min(p.y);
            max_y = max_y.max(p.y);
        }
        let to_px = |ndc: f32, size: u32| ((ndc * 0.5 + 0.5) * size as f32) as i64;
        let clamp = |v: i64, size: u32| v.clamp(0, i64::from(size)) as u32;
        ScissorRect {
            left: clamp(to_px(min_x, width), width),
            right: clamp(to_px(max_x, width), width),
            top: clamp(to_px(-max_y, height), height),
            bottom: clamp(to_px(-min_y, height), height),
        }
    };
    let covered = (rect.right - rect.left) + (rect.bottom - rect.top);
    (rect, covered as f32 / (width + height) as f32)
}

/// Cone of light from a point
#[derive(Debug, Clone)]
pub struct SpotLight {
    /// Shared parameters
    pub base: BaseLight,
    pos: Vec3,
    dir: Vec3,
    dist: f32,
    fov: f32,
    smooth: bool,
    z_near: f32,
    bounding_box: OnceCell<[Vec3; 8]>,
    camera: OnceCell<ParamsCamera>,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self::with_base(BaseLight::default())
    }
}

impl SpotLight {
    /// Default cone pointing down with the given shared parameters
    pub fn with_base(base: BaseLight) -> Self {
        Self {
            base,
            pos: Vec3::zeros(),
            dir: -POSITIVE_Y,
            dist: 10.0,
            fov: std::f32::consts::FRAC_PI_2,
            smooth: false,
            z_near: 0.5,
            bounding_box: OnceCell::new(),
            camera: OnceCell::new(),
        }
    }

    /// Light of the given color, position, direction, range and cone angle
    pub fn new(color: Color, pos: Vec3, dir: Vec3, dist: f32, fov: f32) -> Self {
        let mut light = Self::with_base(BaseLight::with_color(color));
        light.pos = pos;
        light.dir = safe_normalize(&dir);
        light.dist = dist;
        light.fov = fov;
        light
    }

    fn changed(&mut self) {
        self.bounding_box = OnceCell::new();
        self.camera = OnceCell::new();
    }

    /// Position
    pub const fn pos(&self) -> &Vec3 {
        &self.pos
    }

    /// Direction, unit length
    pub const fn dir(&self) -> &Vec3 {
        &self.dir
    }

    /// Range
    pub const fn dist(&self) -> f32 {
        self.dist
    }

    /// Full cone angle in radians
    pub const fn fov(&self) -> f32 {
        self.fov
    }

    /// Soft cone edge
    pub const fn smooth(&self) -> bool {
        self.smooth
    }

    /// Near plane of the shadow camera
    pub const fn z_near(&self) -> f32 {
        self.z_near
    }

    /// Move the light
    pub fn set_pos(&mut self, pos: Vec3) {
        self.pos = pos;
        self.changed();
    }

    /// Point the light
    pub fn set_dir(&mut self, dir: Vec3) {
        self.dir = safe_normalize(&dir);
        self.changed();
    }

    /// Change the range
    pub fn set_dist(&mut self, dist: f32) {
        self.dist = dist;
        self.changed();
    }

    /// Change the cone angle
    pub fn set_fov(&mut self, fov: f32) {
        self.fov = fov;
        self.changed();
    }

    /// Change the shadow camera near plane
    pub fn set_z_near(&mut self, z_near: f32) {
        self.z_near = z_near;
        self.changed();
    }

    /// Toggle the soft cone edge
    pub fn set_smooth(&mut self, smooth: bool) {
        self.smooth = smooth;
    }

    fn up_hint(&self) -> Vec3 {
        if self.dir.dot(&POSITIVE_Y).abs() > 0.9 {
            POSITIVE_Z
        } else {
            POSITIVE_Y
        }
    }

    /// Corners of an oriented box around the cone
    pub fn bounding_box(&self) -> &[Vec3; 8] {
        self.bounding_box.get_or_init(|| {
            let center = self.pos + self.dir * (self.dist * 0.5);
            let radius = self.dist * (self.fov * 0.5).tan();
            let h1 = self.dir * (self.dist * 0.5);
            let h2 = safe_normalize(&self.dir.cross(&self.up_hint()));
            let h3 = safe_normalize(&self.dir.cross(&h2)) * radius;
            let h2 = h2 * radius;
            std::array::from_fn(|i| {
                let s = |bit: usize| if i & bit == 0 { -1.0 } else { 1.0 };
                center + h1 * s(1) + h2 * s(2) + h3 * s(4)
            })
        })
    }

    /// Shadow camera looking down the cone
    pub fn camera(&self) -> &ParamsCamera {
        self.camera.get_or_init(|| {
            ParamsCamera::new(self.pos, self.dir, self.up_hint(), self.fov, 1.0, self.z_near, self.dist)
        })
    }

    /// Frustum of the shadow camera
    pub fn frustum(&self) -> &Frustum {
        self.camera().matrices().frustum()
    }

    /// Sphere may receive light
    pub fn sphere_in_range(&self, center: &Vec3, radius: f32) -> bool {
        sphere_to_sphere(center, radius, &self.pos, self.dist) && sphere_to_frustum_fast(center, radius, self.frustum())
    }

    /// Box may receive light
    pub fn box_in_range(&self, b: &BoundingBox) -> bool {
        sphere_to_box(&self.pos, self.dist, b) && box_to_frustum_fast(b, self.frustum())
    }

    /// Screen footprint under a camera
    pub fn scissor_rect(&self, view: &Mat4, proj: &Mat4, width: u32, height: u32) -> (ScissorRect, f32) {
        scissor_rect(self.bounding_box(), view, proj, width, height)
    }
}

/// Omnidirectional light with a range
#[derive(Debug, Clone)]
pub struct PointLight {
    /// Shared parameters
    pub base: BaseLight,
    pos: Vec3,
    dist: f32,
    z_near: f32,
    bounding_box: OnceCell<[Vec3; 8]>,
    cameras: OnceCell<[ParamsCamera; 6]>,
}

impl Default for PointLight {
    fn default() -> Self {
        Self::with_base(BaseLight::default())
    }
}

impl PointLight {
    /// Default light at the origin with the given shared parameters
    pub fn with_base(base: BaseLight) -> Self {
        Self { base, pos: Vec3::zeros(), dist: 10.0, z_near: 0.5, bounding_box: OnceCell::new(), cameras: OnceCell::new() }
    }

    /// Light of the given color, position and range
    pub fn new(color: Color, pos: Vec3, dist: f32) -> Self {
        let mut light = Self::with_base(BaseLight::with_color(color));
        light.pos = pos;
        light.dist = dist;
        light
    }

    fn changed(&mut self) {
        self.bounding_box = OnceCell::new();
        self.cameras = OnceCell::new();
    }

    /// Shared parameters, mutable
    pub fn base_mut(&mut self) -> &mut BaseLight {
        &mut self.base
    }

    /// Position
    pub const fn pos(&self) -> &Vec3 {
        &self.pos
    }

    /// Range
    pub const fn dist(&self) -> f32 {
        self.dist
    }

    /// Near plane of the shadow cameras
    pub const fn z_near(&self) -> f32 {
        self.z_near
    }

    /// Move the light
    pub fn set_pos(&mut self, pos: Vec3) {
        self.pos = pos;
        self.changed();
    }

    /// Change the range
    pub fn set_dist(&mut self, dist: f32) {
        self.dist = dist;
        self.changed();
    }

    /// Change the shadow camera near plane
    pub fn set_z_near(&mut self, z_near: f32) {
        self.z_near = z_near;
        self.changed();
    }

    /// Corners of the box around the range sphere
    pub fn bounding_box(&self) -> &[Vec3; 8] {
        self.bounding_box.get_or_init(|| BoundingBox::from_sphere(&self.pos, self.dist).corners())
    }

    /// Shadow cameras, one per cube face in [`CubeFace::ALL`] order
    pub fn cameras(&self) -> &[ParamsCamera; 6] {
        self.cameras.get_or_init(|| {
            CubeFace::ALL.map(|face| {
                let (forward, up) = face.basis();
                ParamsCamera::new(self.pos, forward, up, std::f32::consts::FRAC_PI_2, 1.0, self.z_near, self.dist)
            })
        })
    }

    /// Sphere may receive light
    pub fn sphere_in_range(&self, center: &Vec3, radius: f32) -> bool {
        sphere_to_sphere(center, radius, &self.pos, self.dist)
    }

    /// Box may receive light
    pub fn box_in_range(&self, b: &BoundingBox) -> bool {
        sphere_to_box(&self.pos, self.dist, b)
    }

    /// Screen footprint under a camera
    pub fn scissor_rect(&self, view: &Mat4, proj: &Mat4, width: u32, height: u32) -> (ScissorRect, f32) {
        scissor_rect(self.bounding_box(), view, proj, width, height)
    }
}

/// Borrowed light of any type
#[derive(Debug, Clone, Copy)]
pub enum LightRef<'a> {
    /// The scene's directional light
    Directional(&'a DirectionalLight),
    /// A spot light
    Spot(&'a SpotLight),
    /// A point light
    Point(&'a PointLight),
}

impl<'a> LightRef<'a> {
    /// Shared parameters
    pub const fn base(self) -> &'a BaseLight {
        match self {
            Self::Directional(l) => &l.base,
            Self::Spot(l) => &l.base,
            Self::Point(l) => &l.base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{look_at_lh, perspective_fov_lh};
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_defaults() {
        let base = BaseLight::default();
        assert!(base.enabled && base.cast_specular && !base.cast_shadow && !base.half_lambert);
        let dir = DirectionalLight::default();
        assert_eq!(dir.dir, Vec3::new(0.0, -1.0, 0.0));
        assert_eq!(dir.z_far, f32::MAX);
        let spot = SpotLight::default();
        assert_eq!(spot.dist(), 10.0);
        assert_relative_eq!(spot.fov(), FRAC_PI_2);
        assert_eq!(spot.z_near(), 0.5);
        assert!(!BaseLight::with_color(Color::BLACK).is_active());
    }

    #[test]
    fn test_spot_bounding_box_contains_cone() {
        let spot = SpotLight::new(Color::WHITE, Vec3::new(0.0, 5.0, 0.0), Vec3::new(0.0, -1.0, 0.0), 10.0, FRAC_PI_2);
        let bb = BoundingBox::from_points(spot.bounding_box().iter());
        assert!(bb.contains_point(&Vec3::new(0.0, 5.0, 0.0)));
        assert!(bb.contains_point(&Vec3::new(9.9, -4.9, 0.0)));
        assert!(!bb.contains_point(&Vec3::new(0.0, -5.5, 0.0)));
    }

    #[test]
    fn test_spot_range_tests() {
        let spot = SpotLight::new(Color::WHITE, Vec3::new(0.0, 5.0, 0.0), Vec3::new(0.0, -1.0, 0.0), 10.0, FRAC_PI_2);
        assert!(spot.sphere_in_range(&Vec3::zeros(), 1.0));
        assert!(!spot.sphere_in_range(&Vec3::new(0.0, 10.0, 0.0), 1.0));
        assert!(!spot.sphere_in_range(&Vec3::new(0.0, -20.0, 0.0), 1.0));
    }

    #[test]
    fn test_setters_invalidate_cached_box() {
        let mut spot = SpotLight::default();
        let before = spot.bounding_box()[0];
        spot.set_pos(Vec3::new(100.0, 0.0, 0.0));
        assert_relative_eq!(spot.bounding_box()[0].x - before.x, 100.0, epsilon = 1e-4);
        assert_relative_eq!(*spot.camera().eye_pos(), Vec3::new(100.0, 0.0, 0.0));
    }

    #[test]
    fn test_point_cameras_cover_every_direction() {
        let point = PointLight::new(Color::WHITE, Vec3::zeros(), 10.0);
        let probes = [
            Vec3::new(5.0, 0.1, 0.2),
            Vec3::new(-5.0, 0.0, 0.0),
            Vec3::new(0.3, 5.0, 0.0),
            Vec3::new(0.0, -5.0, 0.3),
            Vec3::new(0.0, 0.2, 5.0),
            Vec3::new(0.1, 0.0, -5.0),
        ];
        for (i, p) in probes.iter().enumerate() {
            assert!(point.cameras()[i].matrices().frustum().contains_point(p), "face {i}");
        }
    }

    #[test]
    fn test_scissor_behind_camera_is_full() {
        let point = PointLight::new(Color::WHITE, Vec3::zeros(), 10.0);
        let view = look_at_lh(&Vec3::new(0.0, 0.0, -5.0), &Vec3::zeros(), &POSITIVE_Y);
        let proj = perspective_fov_lh(FRAC_PI_2, 1.0, 0.5, 100.0);
        let (rect, fraction) = point.scissor_rect(&view, &proj, 800, 600);
        assert_eq!(rect, ScissorRect::full(800, 600));
        assert_relative_eq!(fraction, 1.0);
    }

    #[test]
    fn test_scissor_small_light_far_away() {
        let point = PointLight::new(Color::WHITE, Vec3::new(0.0, 0.0, 100.0), 1.0);
        let view = look_at_lh(&Vec3::zeros(), &Vec3::new(0.0, 0.0, 1.0), &POSITIVE_Y);
        let proj = perspective_fov_lh(FRAC_PI_2, 1.0, 0.5, 1000.0);
        let (rect, fraction) = point.scissor_rect(&view, &proj, 800, 800);
        assert!(rect.left > 380 && rect.right < 420);
        assert!(rect.top > 380 && rect.bottom < 420);
        assert!(fraction < 0.05);
    }
}
