//! Interfaces of the world parts a scene draws but does not own the logic of
//!
//! Static map geometry, terrain (with its trees, grass and water), the
//! sky and precipitation are implemented outside the engine core. A scene
//! holds them as trait objects and calls them at fixed points of a frame.

use std::fmt;
use std::rc::Rc;

use crate::error::EngineResult;
use crate::foundation::collections::MaterialHandle;
use crate::foundation::geometry::{BoundingBox, Frustum};
use crate::foundation::math::{Color, Mat4, Vec3};
use crate::render::backend::RenderBackend;
use crate::scene::camera::ParamsCamera;
use crate::scene::light::{PointLight, SpotLight};
use crate::scene::material::{CollisionType, Material};

/// Size of a tree prototype in model space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeDims {
    /// Half the crown width
    pub half_width: f32,
    /// Half the total height
    pub half_height: f32,
    /// Trunk height
    pub trunk_length: f32,
    /// Trunk radius
    pub trunk_radius: f32,
}

impl TreeDims {
    /// Box around the trunk, standing on the origin
    pub fn trunk_bounds(&self) -> BoundingBox {
        let r = self.trunk_radius;
        BoundingBox::new(Vec3::new(-r, 0.0, -r), Vec3::new(r, self.trunk_length, r))
    }
}

/// Lighting of a tree draw batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeLighting {
    /// Direction towards the directional light
    pub dir_to_light: Vec3,
    /// Directional light color
    pub light_color: Color,
}

/// Fog of a tree draw batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeFog {
    /// Fraction of the far plane where fog begins
    pub start: f32,
    /// Fog color
    pub color: Color,
}

/// Shared geometry of one tree species
///
/// Instances are drawn in runs: `draw_begin` (or `draw_begin_shadow_map`)
/// once, `draw_tree` per instance, then `draw_end`.
pub trait TreePrototype {
    /// Model-space size
    fn dims(&self) -> TreeDims;

    /// Bind geometry and state for drawing lit instances
    fn draw_begin(
        &self,
        backend: &mut dyn RenderBackend,
        cam: &ParamsCamera,
        lighting: Option<&TreeLighting>,
        fog: Option<&TreeFog>,
    ) -> EngineResult<()>;

    /// Bind geometry and state for drawing into a directional shadow map
    fn draw_begin_shadow_map(&self, backend: &mut dyn RenderBackend, view_proj: &Mat4, light_dir: &Vec3) -> EngineResult<()>;

    /// Draw one instance
    fn draw_tree(
        &self,
        backend: &mut dyn RenderBackend,
        kind: u32,
        world: &Mat4,
        inv_world: Option<&Mat4>,
        color: &Color,
    ) -> EngineResult<()>;

    /// Unbind what `draw_begin` bound
    fn draw_end(&self, backend: &mut dyn RenderBackend) -> EngineResult<()>;
}

/// One tree instance selected for drawing
#[derive(Clone)]
pub struct TreeDrawDesc {
    /// Shared prototype
    pub prototype: Rc<dyn TreePrototype>,
    /// World matrix
    pub world: Mat4,
    /// Inverse world matrix
    pub inv_world: Mat4,
    /// Prototype variant
    pub kind: u32,
    /// Tint
    pub color: Color,
}

impl TreeDrawDesc {
    /// Key grouping instances of the same prototype
    pub fn prototype_key(&self) -> usize {
        Rc::as_ptr(&self.prototype).cast::<()>() as usize
    }
}

impl fmt::Debug for TreeDrawDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeDrawDesc")
            .field("prototype", &self.prototype_key())
            .field("kind", &self.kind)
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}

/// One material-bound piece of static map geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapFragmentDesc {
    /// Identifier the map uses for this piece
    pub fragment: u32,
    /// Material it is drawn with
    pub material: MaterialHandle,
    /// Bounds of the map node holding it
    pub bounds: BoundingBox,
}

/// Static level geometry with its own spatial tree
pub trait MapRenderer {
    /// Append the fragments inside a frustum
    fn fragments_in_frustum(&self, frustum: &Frustum, out: &mut Vec<MapFragmentDesc>);

    /// Append the fragments lit by a spot light
    fn fragments_in_spot_light(&self, light: &SpotLight, out: &mut Vec<MapFragmentDesc>) {
        self.fragments_in_frustum(light.frustum(), out);
    }

    /// Append the fragments lit by a point light, once per cube face
    fn fragments_in_point_light(&self, light: &PointLight, out: &mut [Vec<MapFragmentDesc>; 6]);

    /// Append the fragments whose shadow along `light_dir` can reach `cam_box`
    fn fragments_in_directional_light(&self, cam_box: &BoundingBox, light_dir: &Vec3, out: &mut Vec<MapFragmentDesc>);

    /// Issue the draw calls of one fragment; state is already set up
    fn draw_fragment_geometry(&mut self, backend: &mut dyn RenderBackend, fragment: &MapFragmentDesc) -> EngineResult<()>;

    /// Nearest hit of a world-space ray
    fn ray_collision(&self, collision: CollisionType, orig: &Vec3, dir: &Vec3) -> Option<f32>;
}

/// Heightmap terrain with trees, grass and water
pub trait TerrainRenderer {
    /// Append the patches inside a frustum
    fn visible_patches(&self, frustum: &Frustum, out: &mut Vec<u32>);

    /// Bounds of one patch
    fn patch_bounds(&self, patch: u32) -> BoundingBox;

    /// Material of one patch
    fn patch_material(&self, patch: u32) -> &Material;

    /// Issue the draw calls of one patch; state is already set up
    fn draw_patch_geometry(&mut self, backend: &mut dyn RenderBackend, patch: u32) -> EngineResult<()>;

    /// Append the trees visible from a camera, culled against its frustum when asked
    fn trees_in_frustum(&self, cam: &ParamsCamera, frustum_culling: bool, out: &mut Vec<TreeDrawDesc>);

    /// Append the trees whose shadow along `light_dir` can reach `cam_box`
    fn trees_casting_directional_shadow(&self, cam_box: &BoundingBox, light_dir: &Vec3, out: &mut Vec<TreeDrawDesc>);

    /// Draw grass tinted by `color`
    fn draw_grass(&mut self, backend: &mut dyn RenderBackend, cam: &ParamsCamera, color: &Color) -> EngineResult<()>;

    /// Draw water
    fn draw_water(&mut self, backend: &mut dyn RenderBackend, cam: &ParamsCamera) -> EngineResult<()>;

    /// Nearest hit of a world-space ray closer than `max_t`
    fn ray_collision(&self, orig: &Vec3, dir: &Vec3, max_t: f32) -> Option<f32>;
}

/// Sky dome
pub trait Sky {
    /// Draw behind everything
    fn draw(&mut self, backend: &mut dyn RenderBackend, cam: &ParamsCamera) -> EngineResult<()>;

    /// Direction towards the sun, if the sky has one
    fn sun_dir(&self) -> Option<Vec3>;
}

/// Precipitation effect
pub trait Fall {
    /// Advance by `dt` seconds
    fn update(&mut self, dt: f32);

    /// Draw after everything else
    fn draw(&mut self, backend: &mut dyn RenderBackend, cam: &ParamsCamera) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trunk_bounds_stand_on_origin() {
        let dims = TreeDims { half_width: 2.0, half_height: 3.0, trunk_length: 4.0, trunk_radius: 0.25 };
        let b = dims.trunk_bounds();
        assert_eq!(b.min, Vec3::new(-0.25, 0.0, -0.25));
        assert_eq!(b.max, Vec3::new(0.25, 4.0, 0.25));
    }
}
