//! Scene: the world state a frame is drawn from
//!
//! A [`Scene`] owns its entities (with the octree indexing them), materials,
//! lights, cameras and the optional world parts (map, terrain, sky, fall).
//! Drawing lives in the submodules:
//!
//! - `draw`: frame orchestration, base/light/fog/translucent passes and
//!   postprocess composition
//! - `shadow`: shadow-map rendering for each light type
//! - `occlusion`: occlusion queries for entities, lights and the sun

mod draw;
mod occlusion;
mod shadow;

pub use draw::{perturbation_offset, DIRECTIONAL_LIGHT_SHADOW_ATTEN_START_PERCENT};
pub use occlusion::{OCCLUSION_QUERY_MAX_ENTITIES, OCCLUSION_QUERY_MAX_LIGHTS};

use log::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::foundation::collections::{
    CameraHandle, EntityHandle, PointLightHandle, SlotMap, SpotLightHandle,
};
use crate::foundation::geometry::BoundingBox;
use crate::foundation::math::{Color, Quat, Vec2, Vec3};
use crate::render::optimizer::RunningOptimizer;
use crate::render::postprocess::PostProcessStack;
use crate::scene::camera::Camera;
use crate::scene::collaborators::{Fall, MapRenderer, Sky, TerrainRenderer};
use crate::scene::entity::{Entity, EntityKind};
use crate::scene::entity_arena::EntityArena;
use crate::scene::light::{DirectionalLight, PointLight, SpotLight};
use crate::scene::material::{CollisionType, MaterialCollection};
use crate::spatial::EntityOctree;

/// What a scene ray hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RayHit {
    /// Static map geometry
    Map,
    /// Terrain surface
    Terrain,
    /// An entity
    Entity(EntityHandle),
}

/// Distance fog
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fog {
    /// Fog pass enabled
    pub enabled: bool,
    /// Fraction of the camera's far distance where fog starts
    pub start: f32,
    /// Color blended towards
    pub color: Color,
}

impl Default for Fog {
    fn default() -> Self {
        Self { enabled: false, start: 0.5, color: Color::BLACK }
    }
}

/// How the static map takes part in lighting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct MapLighting {
    /// Map fragments are drawn in the light passes
    pub use_lighting: bool,
    /// Map fragments are drawn into shadow maps
    pub cast_shadow: bool,
    /// Map fragments sample shadow maps
    pub receive_shadow: bool,
}

impl Default for MapLighting {
    fn default() -> Self {
        Self { use_lighting: true, cast_shadow: true, receive_shadow: true }
    }
}

/// A drawable world
pub struct Scene {
    entities: EntityArena,
    octree: EntityOctree,
    materials: MaterialCollection,
    cameras: SlotMap<CameraHandle, Camera>,
    active_camera: Option<CameraHandle>,
    directional_light: Option<DirectionalLight>,
    spot_lights: SlotMap<SpotLightHandle, SpotLight>,
    point_lights: SlotMap<PointLightHandle, PointLight>,
    ambient: Color,
    fog: Fog,
    map_lighting: MapLighting,
    map: Option<Box<dyn MapRenderer>>,
    terrain: Option<Box<dyn TerrainRenderer>>,
    sky: Option<Box<dyn Sky>>,
    fall: Option<Box<dyn Fall>>,
    wind: Vec2,
    post_process: PostProcessStack,
    optimizer: RunningOptimizer,
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("entities", &self.entities.len())
            .field("materials", &self.materials.len())
            .field("cameras", &self.cameras.len())
            .field("spot_lights", &self.spot_lights.len())
            .field("point_lights", &self.point_lights.len())
            .field("has_map", &self.map.is_some())
            .field("has_terrain", &self.terrain.is_some())
            .finish_non_exhaustive()
    }
}

impl Scene {
    /// Empty scene whose octree covers `bounds`
    pub fn new(bounds: BoundingBox) -> Self {
        info!("Creating scene, bounds {:?} - {:?}", bounds.min, bounds.max);
        Self {
            entities: EntityArena::new(),
            octree: EntityOctree::new(bounds),
            materials: MaterialCollection::new(),
            cameras: SlotMap::with_key(),
            active_camera: None,
            directional_light: None,
            spot_lights: SlotMap::with_key(),
            point_lights: SlotMap::with_key(),
            ambient: Color::BLACK,
            fog: Fog::default(),
            map_lighting: MapLighting::default(),
            map: None,
            terrain: None,
            sky: None,
            fall: None,
            wind: Vec2::zeros(),
            post_process: PostProcessStack::default(),
            optimizer: RunningOptimizer::default(),
        }
    }

    // Entities

    /// Add an entity as a new root and index it
    pub fn create_entity(&mut self, kind: EntityKind) -> EntityHandle {
        let handle = self.entities.insert(kind);
        self.octree.add_entity(&mut self.entities, handle);
        handle
    }

    /// Destroy an entity together with its subtree, children first
    pub fn destroy_entity(&mut self, handle: EntityHandle) -> EngineResult<()> {
        if !self.entities.contains(handle) {
            return Err(EngineError::InvalidHandle("entity"));
        }
        for h in self.entities.destroy_order(handle) {
            self.octree.remove_entity(&mut self.entities, h);
            self.entities.remove(h);
        }
        Ok(())
    }

    /// All entities
    pub const fn entities(&self) -> &EntityArena {
        &self.entities
    }

    /// One entity
    pub fn entity(&self, handle: EntityHandle) -> Option<&Entity> {
        self.entities.get(handle)
    }

    /// One entity, for changing its kind-specific state
    pub fn entity_mut(&mut self, handle: EntityHandle) -> Option<&mut Entity> {
        self.entities.get_mut(handle)
    }

    /// Octree indexing the entities
    pub const fn octree(&self) -> &EntityOctree {
        &self.octree
    }

    fn reindex(&mut self, moved: &[EntityHandle]) {
        for &h in moved {
            self.octree.on_entity_params_change(&mut self.entities, h);
        }
    }

    /// Move an entity relative to its parent
    pub fn set_entity_pos(&mut self, handle: EntityHandle, pos: Vec3) -> EngineResult<()> {
        let moved = self.entities.set_pos(handle, pos)?;
        self.reindex(&moved);
        Ok(())
    }

    /// Move an entity by `delta`
    pub fn translate_entity(&mut self, handle: EntityHandle, delta: Vec3) -> EngineResult<()> {
        let moved = self.entities.translate(handle, delta)?;
        self.reindex(&moved);
        Ok(())
    }

    /// Rotate an entity relative to its parent
    pub fn set_entity_orientation(&mut self, handle: EntityHandle, orientation: Quat) -> EngineResult<()> {
        let moved = self.entities.set_orientation(handle, orientation)?;
        self.reindex(&moved);
        Ok(())
    }

    /// Scale an entity relative to its parent
    pub fn set_entity_size(&mut self, handle: EntityHandle, size: f32) -> EngineResult<()> {
        let moved = self.entities.set_size(handle, size)?;
        self.reindex(&moved);
        Ok(())
    }

    /// Set the model-space bounding radius
    pub fn set_entity_radius(&mut self, handle: EntityHandle, radius: f32) -> EngineResult<()> {
        let moved = self.entities.set_radius(handle, radius)?;
        self.reindex(&moved);
        Ok(())
    }

    /// Show or hide an entity and its subtree
    pub fn set_entity_visible(&mut self, handle: EntityHandle, visible: bool) -> EngineResult<()> {
        self.entities.set_visible(handle, visible)
    }

    /// Attach an entity under `parent`, or make it a root
    pub fn set_entity_parent(&mut self, handle: EntityHandle, parent: Option<EntityHandle>) -> EngineResult<()> {
        let moved = self.entities.set_parent(handle, parent)?;
        self.reindex(&moved);
        Ok(())
    }

    /// Attach an entity to a named bone of `parent`
    pub fn set_entity_parent_bone(
        &mut self,
        handle: EntityHandle,
        parent: EntityHandle,
        bone: impl Into<String>,
    ) -> EngineResult<()> {
        let moved = self.entities.set_parent_bone(handle, parent, bone)?;
        self.reindex(&moved);
        Ok(())
    }

    // Materials

    /// Materials of this scene
    pub const fn materials(&self) -> &MaterialCollection {
        &self.materials
    }

    /// Materials of this scene, for registering and editing
    pub fn materials_mut(&mut self) -> &mut MaterialCollection {
        &mut self.materials
    }

    // Lights

    /// Register the directional light. A scene holds at most one.
    pub fn set_directional_light(&mut self, light: DirectionalLight) -> EngineResult<()> {
        if self.directional_light.is_some() {
            return Err(EngineError::DirectionalLightAlreadyRegistered);
        }
        self.directional_light = Some(light);
        Ok(())
    }

    /// Unregister the directional light
    pub fn remove_directional_light(&mut self) -> Option<DirectionalLight> {
        self.directional_light.take()
    }

    /// The directional light
    pub const fn directional_light(&self) -> Option<&DirectionalLight> {
        self.directional_light.as_ref()
    }

    /// The directional light, for changing it
    pub fn directional_light_mut(&mut self) -> Option<&mut DirectionalLight> {
        self.directional_light.as_mut()
    }

    /// Register a spot light
    pub fn add_spot_light(&mut self, light: SpotLight) -> SpotLightHandle {
        self.spot_lights.insert(light)
    }

    /// Unregister a spot light
    pub fn remove_spot_light(&mut self, handle: SpotLightHandle) -> Option<SpotLight> {
        self.spot_lights.remove(handle)
    }

    /// A spot light
    pub fn spot_light(&self, handle: SpotLightHandle) -> Option<&SpotLight> {
        self.spot_lights.get(handle)
    }

    /// A spot light, for changing it
    pub fn spot_light_mut(&mut self, handle: SpotLightHandle) -> Option<&mut SpotLight> {
        self.spot_lights.get_mut(handle)
    }

    /// Register a point light
    pub fn add_point_light(&mut self, light: PointLight) -> PointLightHandle {
        self.point_lights.insert(light)
    }

    /// Unregister a point light
    pub fn remove_point_light(&mut self, handle: PointLightHandle) -> Option<PointLight> {
        self.point_lights.remove(handle)
    }

    /// A point light
    pub fn point_light(&self, handle: PointLightHandle) -> Option<&PointLight> {
        self.point_lights.get(handle)
    }

    /// A point light, for changing it
    pub fn point_light_mut(&mut self, handle: PointLightHandle) -> Option<&mut PointLight> {
        self.point_lights.get_mut(handle)
    }

    // Cameras

    /// Register a camera
    pub fn create_camera(&mut self, camera: Camera) -> CameraHandle {
        self.cameras.insert(camera)
    }

    /// Unregister a camera; the scene has no active camera afterwards if it
    /// was the active one
    pub fn destroy_camera(&mut self, handle: CameraHandle) -> Option<Camera> {
        if self.active_camera == Some(handle) {
            self.active_camera = None;
        }
        self.cameras.remove(handle)
    }

    /// A camera
    pub fn camera(&self, handle: CameraHandle) -> Option<&Camera> {
        self.cameras.get(handle)
    }

    /// A camera, for moving it
    pub fn camera_mut(&mut self, handle: CameraHandle) -> Option<&mut Camera> {
        self.cameras.get_mut(handle)
    }

    /// Camera frames are drawn from
    pub const fn active_camera(&self) -> Option<CameraHandle> {
        self.active_camera
    }

    /// Choose the camera frames are drawn from; `None` disables drawing
    pub fn set_active_camera(&mut self, handle: Option<CameraHandle>) -> EngineResult<()> {
        if let Some(h) = handle {
            if !self.cameras.contains_key(h) {
                return Err(EngineError::InvalidHandle("camera"));
            }
        }
        self.active_camera = handle;
        Ok(())
    }

    // Environment

    /// Ambient color
    pub const fn ambient_color(&self) -> Color {
        self.ambient
    }

    /// Set the ambient color
    pub fn set_ambient_color(&mut self, color: Color) {
        self.ambient = color;
    }

    /// Fog settings
    pub const fn fog(&self) -> &Fog {
        &self.fog
    }

    /// Fog settings, for changing them
    pub fn fog_mut(&mut self) -> &mut Fog {
        &mut self.fog
    }

    /// How the map takes part in lighting
    pub const fn map_lighting(&self) -> MapLighting {
        self.map_lighting
    }

    /// Set how the map takes part in lighting
    pub fn set_map_lighting(&mut self, map_lighting: MapLighting) {
        self.map_lighting = map_lighting;
    }

    /// Wind vector, read by vegetation
    pub const fn wind(&self) -> &Vec2 {
        &self.wind
    }

    /// Set the wind vector
    pub fn set_wind(&mut self, wind: Vec2) {
        self.wind = wind;
    }

    /// Postprocess effects
    pub const fn post_process(&self) -> &PostProcessStack {
        &self.post_process
    }

    /// Postprocess effects, for adding, changing and removing them
    pub fn post_process_mut(&mut self) -> &mut PostProcessStack {
        &mut self.post_process
    }

    /// Optimizer choosing the per-frame optimizations
    pub const fn optimizer(&self) -> &RunningOptimizer {
        &self.optimizer
    }

    // World parts

    /// Attach or detach the static map
    pub fn set_map(&mut self, map: Option<Box<dyn MapRenderer>>) {
        self.map = map;
    }

    /// Attach or detach the terrain
    pub fn set_terrain(&mut self, terrain: Option<Box<dyn TerrainRenderer>>) {
        self.terrain = terrain;
    }

    /// Attach or detach the sky
    pub fn set_sky(&mut self, sky: Option<Box<dyn Sky>>) {
        self.sky = sky;
    }

    /// Attach or detach the precipitation effect
    pub fn set_fall(&mut self, fall: Option<Box<dyn Fall>>) {
        self.fall = fall;
    }

    /// Advance entities and the precipitation effect by `dt` seconds
    pub fn update(&mut self, dt: f32) {
        for (_, entity) in self.entities.iter_mut() {
            entity.update(dt);
        }
        if let Some(fall) = &mut self.fall {
            fall.update(dt);
        }
    }

    /// Nearest hit of a world-space ray against map, terrain and entities,
    /// with the ray parameter
    pub fn ray_collision(&self, collision: CollisionType, orig: &Vec3, dir: &Vec3) -> Option<(RayHit, f32)> {
        let mut best: Option<(RayHit, f32)> = None;

        if let Some(map) = &self.map {
            if let Some(t) = map.ray_collision(collision, orig, dir) {
                best = Some((RayHit::Map, t));
            }
        }

        if let Some(terrain) = &self.terrain {
            let max_t = best.map_or(f32::MAX, |(_, t)| t);
            if let Some(t) = terrain.ray_collision(orig, dir, max_t) {
                if best.is_none() || t < max_t {
                    best = Some((RayHit::Terrain, t));
                }
            }
        }

        if let Some((entity, t)) = self.octree.ray_collision(&self.entities, collision, orig, dir) {
            let max_t = best.map_or(f32::MAX, |(_, t)| t);
            if t >= 0.0 && t < max_t {
                best = Some((RayHit::Entity(entity), t));
            }
        }

        if let Some((hit, t)) = best {
            debug!("Ray hit {hit:?} at t={t}");
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::POSITIVE_Z;
    use crate::scene::entity::test_support::{material_kind, TestGeometry};
    use crate::scene::entity::MaterialEntity;
    use crate::scene::material::Material;
    use approx::assert_relative_eq;
    use std::cell::Cell;
    use std::rc::Rc;

    fn world() -> BoundingBox {
        BoundingBox::new(Vec3::repeat(-100.0), Vec3::repeat(100.0))
    }

    fn camera() -> Camera {
        Camera::with_orientation(Vec3::zeros(), Quat::identity(), 0.5, 100.0, 1.0, 4.0 / 3.0)
    }

    struct FlatMap {
        t: f32,
    }

    impl MapRenderer for FlatMap {
        fn fragments_in_frustum(&self, _: &crate::foundation::geometry::Frustum, _: &mut Vec<crate::scene::collaborators::MapFragmentDesc>) {}
        fn fragments_in_point_light(&self, _: &PointLight, _: &mut [Vec<crate::scene::collaborators::MapFragmentDesc>; 6]) {}
        fn fragments_in_directional_light(
            &self,
            _: &BoundingBox,
            _: &Vec3,
            _: &mut Vec<crate::scene::collaborators::MapFragmentDesc>,
        ) {
        }
        fn draw_fragment_geometry(
            &mut self,
            _: &mut dyn crate::render::backend::RenderBackend,
            _: &crate::scene::collaborators::MapFragmentDesc,
        ) -> EngineResult<()> {
            Ok(())
        }
        fn ray_collision(&self, _: CollisionType, _: &Vec3, _: &Vec3) -> Option<f32> {
            Some(self.t)
        }
    }

    #[test]
    fn test_second_directional_light_is_rejected() {
        let mut scene = Scene::new(world());
        scene.set_directional_light(DirectionalLight::new(Color::WHITE, -Vec3::y())).unwrap();
        let err = scene.set_directional_light(DirectionalLight::new(Color::BLACK, Vec3::x()));
        assert!(matches!(err, Err(EngineError::DirectionalLightAlreadyRegistered)));
        // First light untouched
        assert_eq!(scene.directional_light().unwrap().base.color, Color::WHITE);

        scene.remove_directional_light();
        assert!(scene.set_directional_light(DirectionalLight::default()).is_ok());
    }

    #[test]
    fn test_destroying_active_camera_clears_it() {
        let mut scene = Scene::new(world());
        let a = scene.create_camera(camera());
        let b = scene.create_camera(camera());
        scene.set_active_camera(Some(a)).unwrap();

        scene.destroy_camera(b);
        assert_eq!(scene.active_camera(), Some(a));
        scene.destroy_camera(a);
        assert_eq!(scene.active_camera(), None);
        assert!(matches!(scene.set_active_camera(Some(a)), Err(EngineError::InvalidHandle("camera"))));
    }

    #[test]
    fn test_destroy_removes_subtree_from_octree() {
        let mut scene = Scene::new(world());
        let rock = scene.materials_mut().register(Material::opaque("Rock"));
        let parent = scene.create_entity(material_kind(vec![rock]));
        let child = scene.create_entity(material_kind(vec![rock]));
        scene.set_entity_parent(child, Some(parent)).unwrap();
        assert_eq!(scene.octree().entity_count(), 2);

        scene.destroy_entity(parent).unwrap();
        assert_eq!(scene.octree().entity_count(), 0);
        assert!(scene.entity(child).is_none());
        assert!(matches!(scene.destroy_entity(parent), Err(EngineError::InvalidHandle("entity"))));
    }

    #[test]
    fn test_moving_entity_keeps_it_findable() {
        let mut scene = Scene::new(world());
        let rock = scene.materials_mut().register(Material::opaque("Rock"));
        let mut geometry = TestGeometry::new(vec![rock]);
        geometry.hit_radius = Some(1.0);
        let e = scene.create_entity(EntityKind::Material(MaterialEntity::new(Box::new(geometry))));
        scene.set_entity_pos(e, Vec3::new(0.0, 0.0, 50.0)).unwrap();

        let hit = scene.ray_collision(CollisionType::BOTH, &Vec3::zeros(), &POSITIVE_Z);
        let (what, t) = hit.unwrap();
        assert_eq!(what, RayHit::Entity(e));
        assert_relative_eq!(t, 49.0, epsilon = 1e-3);
    }

    #[test]
    fn test_nearer_hit_wins() {
        let mut scene = Scene::new(world());
        let rock = scene.materials_mut().register(Material::opaque("Rock"));
        let mut geometry = TestGeometry::new(vec![rock]);
        geometry.hit_radius = Some(1.0);
        let e = scene.create_entity(EntityKind::Material(MaterialEntity::new(Box::new(geometry))));
        scene.set_entity_pos(e, Vec3::new(0.0, 0.0, 10.0)).unwrap();

        scene.set_map(Some(Box::new(FlatMap { t: 20.0 })));
        assert_eq!(scene.ray_collision(CollisionType::BOTH, &Vec3::zeros(), &POSITIVE_Z).unwrap().0, RayHit::Entity(e));

        scene.set_map(Some(Box::new(FlatMap { t: 5.0 })));
        let (what, t) = scene.ray_collision(CollisionType::BOTH, &Vec3::zeros(), &POSITIVE_Z).unwrap();
        assert_eq!(what, RayHit::Map);
        assert_relative_eq!(t, 5.0);
    }

    struct CountingFall(Rc<Cell<f32>>);

    impl Fall for CountingFall {
        fn update(&mut self, dt: f32) {
            self.0.set(self.0.get() + dt);
        }

        fn draw(&mut self, _: &mut dyn crate::render::backend::RenderBackend, _: &crate::scene::camera::ParamsCamera) -> EngineResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_update_advances_fall() {
        let mut scene = Scene::new(world());
        let elapsed = Rc::new(Cell::new(0.0));
        scene.set_fall(Some(Box::new(CountingFall(elapsed.clone()))));
        scene.update(0.25);
        scene.update(0.25);
        assert_relative_eq!(elapsed.get(), 0.5);
    }

    #[test]
    fn test_update_reaches_every_entity() {
        let mut scene = Scene::new(world());
        let counters: Vec<_> = (0..3)
            .map(|_| {
                let geometry = TestGeometry::new(Vec::new());
                let updates = geometry.updates.clone();
                scene.create_entity(EntityKind::Material(MaterialEntity::new(Box::new(geometry))));
                updates
            })
            .collect();
        let elapsed = Rc::new(Cell::new(0.0));
        scene.set_fall(Some(Box::new(CountingFall(elapsed.clone()))));

        scene.update(0.1);
        scene.update(0.1);
        assert!(counters.iter().all(|c| c.get() == 2));
        assert_relative_eq!(elapsed.get(), 0.2);
    }

    #[test]
    fn test_defaults() {
        let scene = Scene::new(world());
        assert!(!scene.fog().enabled);
        assert_relative_eq!(scene.fog().start, 0.5);
        assert_eq!(scene.ambient_color(), Color::BLACK);
        assert_eq!(scene.map_lighting(), MapLighting::default());
        assert_eq!(scene.wind(), &Vec2::zeros());
    }
}
