//! Cameras
//!
//! Three layers, each caching what it derives until one of its inputs
//! changes:
//! - [`MatrixCamera`]: view and projection matrices plus the inverse,
//!   combined and frustum values computed from them.
//! - [`ParamsCamera`]: eye, directions and lens parameters producing a
//!   [`MatrixCamera`].
//! - [`Camera`]: the scene camera, driven either by yaw/pitch angles with
//!   an optional third-person distance or by a quaternion.

use std::cell::OnceCell;

use crate::foundation::geometry::{BoundingBox, Frustum};
use crate::foundation::math::{
    inverse_or_identity, look_at_lh, perspective_fov_lh, safe_normalize, transform_coord, transform_normal, Mat4,
    Quat, Vec3, POSITIVE_Y, POSITIVE_Z,
};

#[derive(Debug, Clone)]
struct MatrixDerived {
    view_inv: Mat4,
    view_proj: Mat4,
    view_proj_inv: Mat4,
    frustum: Frustum,
    frustum_box: BoundingBox,
}

/// Camera built directly from view and projection matrices
#[derive(Debug, Clone)]
pub struct MatrixCamera {
    view: Mat4,
    proj: Mat4,
    derived: OnceCell<MatrixDerived>,
}

impl MatrixCamera {
    /// Create from view and projection
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self { view, proj, derived: OnceCell::new() }
    }

    /// Replace both matrices
    pub fn set(&mut self, view: Mat4, proj: Mat4) {
        self.view = view;
        self.proj = proj;
        self.derived = OnceCell::new();
    }

    /// View matrix
    pub const fn view(&self) -> &Mat4 {
        &self.view
    }

    /// Projection matrix
    pub const fn proj(&self) -> &Mat4 {
        &self.proj
    }

    fn derived(&self) -> &MatrixDerived {
        self.derived.get_or_init(|| {
            let view_proj = self.proj * self.view;
            let frustum = Frustum::from_view_proj(&view_proj);
            let frustum_box = frustum.bounding_box();
            MatrixDerived {
                view_inv: inverse_or_identity(&self.view),
                view_proj,
                view_proj_inv: inverse_or_identity(&view_proj),
                frustum,
                frustum_box,
            }
        })
    }

    /// Inverse view matrix
    pub fn view_inv(&self) -> &Mat4 {
        &self.derived().view_inv
    }

    /// View then projection
    pub fn view_proj(&self) -> &Mat4 {
        &self.derived().view_proj
    }

    /// Inverse of [`Self::view_proj`]
    pub fn view_proj_inv(&self) -> &Mat4 {
        &self.derived().view_proj_inv
    }

    /// Frustum planes and corner points
    pub fn frustum(&self) -> &Frustum {
        &self.derived().frustum
    }

    /// Axis-aligned box around the frustum
    pub fn frustum_box(&self) -> &BoundingBox {
        &self.derived().frustum_box
    }
}

/// Camera defined by eye position, directions and lens parameters
#[derive(Debug, Clone)]
pub struct ParamsCamera {
    eye_pos: Vec3,
    forward_dir: Vec3,
    up_dir: Vec3,
    fov_y: f32,
    aspect: f32,
    z_near: f32,
    z_far: f32,
    matrices: OnceCell<MatrixCamera>,
}

impl ParamsCamera {
    /// Create a camera. `forward_dir` is a direction, not a target point.
    pub fn new(eye_pos: Vec3, forward_dir: Vec3, up_dir: Vec3, fov_y: f32, aspect: f32, z_near: f32, z_far: f32) -> Self {
        Self { eye_pos, forward_dir, up_dir, fov_y, aspect, z_near, z_far, matrices: OnceCell::new() }
    }

    fn changed(&mut self) {
        self.matrices = OnceCell::new();
    }

    /// Eye position
    pub const fn eye_pos(&self) -> &Vec3 {
        &self.eye_pos
    }

    /// Look direction
    pub const fn forward_dir(&self) -> &Vec3 {
        &self.forward_dir
    }

    /// Up hint
    pub const fn up_dir(&self) -> &Vec3 {
        &self.up_dir
    }

    /// Vertical field of view in radians
    pub const fn fov_y(&self) -> f32 {
        self.fov_y
    }

    /// Width over height
    pub const fn aspect(&self) -> f32 {
        self.aspect
    }

    /// Near plane distance
    pub const fn z_near(&self) -> f32 {
        self.z_near
    }

    /// Far plane distance
    pub const fn z_far(&self) -> f32 {
        self.z_far
    }

    /// Move the eye
    pub fn set_eye_pos(&mut self, eye_pos: Vec3) {
        self.eye_pos = eye_pos;
        self.changed();
    }

    /// Change the look direction
    pub fn set_forward_dir(&mut self, forward_dir: Vec3) {
        self.forward_dir = forward_dir;
        self.changed();
    }

    /// Change the far plane
    pub fn set_z_far(&mut self, z_far: f32) {
        self.z_far = z_far;
        self.changed();
    }

    /// Change both clip distances
    pub fn set_z_range(&mut self, z_near: f32, z_far: f32) {
        self.z_near = z_near;
        self.z_far = z_far;
        self.changed();
    }

    /// Matrices of this camera
    pub fn matrices(&self) -> &MatrixCamera {
        self.matrices.get_or_init(|| {
            let view = look_at_lh(&self.eye_pos, &(self.eye_pos + self.forward_dir), &self.up_dir);
            let proj = perspective_fov_lh(self.fov_y, self.aspect, self.z_near, self.z_far);
            MatrixCamera::new(view, proj)
        })
    }

    /// Unit vector pointing right of the view
    pub fn right_dir(&self) -> Vec3 {
        safe_normalize(&self.up_dir.cross(&self.forward_dir))
    }

    /// Up vector actually used by the view, orthogonal to the forward direction
    pub fn real_up_dir(&self) -> Vec3 {
        transform_normal(self.matrices().view_inv(), &POSITIVE_Y)
    }
}

/// How a [`Camera`] turns its parameters into an orientation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraMode {
    /// Yaw/pitch, eye pulled back by `camera_dist` behind the position
    Character {
        /// Pitch in radians, positive looks down
        angle_x: f32,
        /// Yaw in radians, 0 looks along +Z
        angle_y: f32,
        /// Third-person distance, 0 for first person
        camera_dist: f32,
    },
    /// Orientation from a quaternion, eye at the position
    Quaternion(Quat),
}

const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 1e-3;

/// Scene camera
#[derive(Debug, Clone)]
pub struct Camera {
    pos: Vec3,
    z_near: f32,
    z_far: f32,
    fov_y: f32,
    aspect: f32,
    mode: CameraMode,
    params: OnceCell<ParamsCamera>,
}

impl Camera {
    /// Character-mode camera
    pub fn character(pos: Vec3, angle_x: f32, angle_y: f32, camera_dist: f32, z_near: f32, z_far: f32, fov_y: f32, aspect: f32) -> Self {
        Self {
            pos,
            z_near,
            z_far,
            fov_y,
            aspect,
            mode: CameraMode::Character { angle_x: angle_x.clamp(-PITCH_LIMIT, PITCH_LIMIT), angle_y, camera_dist },
            params: OnceCell::new(),
        }
    }

    /// Quaternion-mode camera
    pub fn with_orientation(pos: Vec3, orientation: Quat, z_near: f32, z_far: f32, fov_y: f32, aspect: f32) -> Self {
        Self { pos, z_near, z_far, fov_y, aspect, mode: CameraMode::Quaternion(orientation), params: OnceCell::new() }
    }

    fn changed(&mut self) {
        self.params = OnceCell::new();
    }

    /// Position
    pub const fn pos(&self) -> &Vec3 {
        &self.pos
    }

    /// Orientation mode
    pub const fn mode(&self) -> &CameraMode {
        &self.mode
    }

    /// Near plane
    pub const fn z_near(&self) -> f32 {
        self.z_near
    }

    /// Far plane
    pub const fn z_far(&self) -> f32 {
        self.z_far
    }

    /// Move to a position
    pub fn set_pos(&mut self, pos: Vec3) {
        self.pos = pos;
        self.changed();
    }

    /// Move by an offset
    pub fn translate(&mut self, delta: Vec3) {
        self.set_pos(self.pos + delta);
    }

    /// Change both clip distances
    pub fn set_z_range(&mut self, z_near: f32, z_far: f32) {
        self.z_near = z_near;
        self.z_far = z_far;
        self.changed();
    }

    /// Change the vertical field of view
    pub fn set_fov_y(&mut self, fov_y: f32) {
        self.fov_y = fov_y;
        self.changed();
    }

    /// Change the aspect ratio
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
        self.changed();
    }

    /// Switch mode
    pub fn set_mode(&mut self, mode: CameraMode) {
        self.mode = match mode {
            CameraMode::Character { angle_x, angle_y, camera_dist } => {
                CameraMode::Character { angle_x: angle_x.clamp(-PITCH_LIMIT, PITCH_LIMIT), angle_y, camera_dist }
            }
            other => other,
        };
        self.changed();
    }

    /// Derived view parameters
    pub fn params(&self) -> &ParamsCamera {
        self.params.get_or_init(|| match self.mode {
            CameraMode::Character { angle_x, angle_y, camera_dist } => {
                let (sy, cy) = angle_y.sin_cos();
                let (sp, cp) = angle_x.sin_cos();
                let forward = Vec3::new(sy * cp, -sp, cy * cp);
                let eye = if camera_dist == 0.0 { self.pos } else { self.pos - forward * camera_dist };
                ParamsCamera::new(eye, forward, POSITIVE_Y, self.fov_y, self.aspect, self.z_near, self.z_far)
            }
            CameraMode::Quaternion(q) => {
                let rot = q.to_homogeneous();
                let forward = transform_normal(&rot, &POSITIVE_Z);
                let up = transform_normal(&rot, &POSITIVE_Y);
                ParamsCamera::new(self.pos, forward, up, self.fov_y, self.aspect, self.z_near, self.z_far)
            }
        })
    }

    /// Matrices of the derived view
    pub fn matrices(&self) -> &MatrixCamera {
        self.params().matrices()
    }

    /// World-space ray through a screen point given in `[0, 1]`, y growing down.
    /// Returns origin on the near plane and unit direction.
    pub fn mouse_ray(&self, mouse_x: f32, mouse_y: f32) -> (Vec3, Vec3) {
        let ndc_x = mouse_x * 2.0 - 1.0;
        let ndc_y = (1.0 - mouse_y) * 2.0 - 1.0;
        let inv = self.matrices().view_proj_inv();
        let near = transform_coord(inv, &Vec3::new(ndc_x, ndc_y, 0.0));
        let far = transform_coord(inv, &Vec3::new(ndc_x, ndc_y, 1.0));
        (near, safe_normalize(&(far - near)))
    }
}
