//! Scene entities
//!
//! An [`Entity`] is a node of the scene graph: a transform, a bounding
//! sphere, a visibility flag and an [`EntityKind`] saying how it is drawn.
//! Derived values (matrices, world-space sphere, accumulated visibility)
//! live in a [`TransformCache`] and are recomputed on read after the
//! [`EntityArena`](super::entity_arena::EntityArena) clears their dirty bits.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;

use crate::error::EngineResult;
use crate::foundation::collections::{EntityHandle, MaterialHandle, NodeHandle};
use crate::foundation::geometry::ray_to_box;
use crate::foundation::math::{Color, Mat4, Quat, Vec3};
use crate::render::backend::RenderBackend;
use crate::scene::camera::ParamsCamera;
use crate::scene::collaborators::TreePrototype;
use crate::scene::material::CollisionType;

bitflags! {
    /// Derived values of an entity that are currently up to date
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CacheFlags: u16 {
        /// Local matrix
        const LOCAL = 0x001;
        /// Inverse local matrix
        const INV_LOCAL = 0x002;
        /// World matrix
        const WORLD = 0x004;
        /// Inverse world matrix
        const INV_WORLD = 0x008;
        /// World-space position
        const WORLD_POS = 0x010;
        /// Accumulated scale
        const WORLD_SIZE = 0x020;
        /// World-space bounding-sphere radius
        const WORLD_RADIUS = 0x040;
        /// Accumulated visibility
        const WORLD_VISIBLE = 0x080;
    }
}

/// Memoized derived values with one dirty bit each
#[derive(Debug, Default)]
pub struct TransformCache {
    valid: Cell<CacheFlags>,
    local: Cell<Mat4>,
    inv_local: Cell<Mat4>,
    world: Cell<Mat4>,
    inv_world: Cell<Mat4>,
    world_pos: Cell<Vec3>,
    world_size: Cell<f32>,
    world_radius: Cell<f32>,
    world_visible: Cell<bool>,
}

impl TransformCache {
    /// Values currently up to date
    pub fn valid(&self) -> CacheFlags {
        self.valid.get()
    }

    /// Mark values as stale
    pub fn invalidate(&self, flags: CacheFlags) {
        self.valid.set(self.valid.get() - flags);
    }

    fn memo<T: Copy>(&self, flag: CacheFlags, cell: &Cell<T>, compute: impl FnOnce() -> T) -> T {
        if self.valid.get().contains(flag) {
            return cell.get();
        }
        let value = compute();
        cell.set(value);
        self.valid.set(self.valid.get() | flag);
        value
    }

    pub(crate) fn local(&self, compute: impl FnOnce() -> Mat4) -> Mat4 {
        self.memo(CacheFlags::LOCAL, &self.local, compute)
    }

    pub(crate) fn inv_local(&self, compute: impl FnOnce() -> Mat4) -> Mat4 {
        self.memo(CacheFlags::INV_LOCAL, &self.inv_local, compute)
    }

    pub(crate) fn world(&self, compute: impl FnOnce() -> Mat4) -> Mat4 {
        self.memo(CacheFlags::WORLD, &self.world, compute)
    }

    pub(crate) fn inv_world(&self, compute: impl FnOnce() -> Mat4) -> Mat4 {
        self.memo(CacheFlags::INV_WORLD, &self.inv_world, compute)
    }

    pub(crate) fn world_pos(&self, compute: impl FnOnce() -> Vec3) -> Vec3 {
        self.memo(CacheFlags::WORLD_POS, &self.world_pos, compute)
    }

    pub(crate) fn world_size(&self, compute: impl FnOnce() -> f32) -> f32 {
        self.memo(CacheFlags::WORLD_SIZE, &self.world_size, compute)
    }

    pub(crate) fn world_radius(&self, compute: impl FnOnce() -> f32) -> f32 {
        self.memo(CacheFlags::WORLD_RADIUS, &self.world_radius, compute)
    }

    pub(crate) fn world_visible(&self, compute: impl FnOnce() -> bool) -> bool {
        self.memo(CacheFlags::WORLD_VISIBLE, &self.world_visible, compute)
    }
}

/// Behavior every entity kind provides
pub trait EntityBehavior {
    /// Nearest hit of a model-space ray, as the ray parameter
    fn ray_collision(&self, _collision: CollisionType, _orig: &Vec3, _dir: &Vec3) -> Option<f32> {
        None
    }

    /// Advance by `dt` seconds
    fn update(&mut self, _dt: f32) {}

    /// Model-space matrix of a named bone, for entities attached to it
    fn bone_matrix(&self, _bone: &str) -> Mat4 {
        Mat4::identity()
    }
}

/// Geometry of an entity drawn fragment by fragment with scene materials
pub trait FragmentGeometry: EntityBehavior {
    /// Number of material-bound pieces
    fn fragment_count(&self) -> usize;

    /// Identifier and material of one piece
    fn fragment(&self, index: usize) -> (u32, MaterialHandle);

    /// Issue the draw calls of one piece; state is already set up.
    ///
    /// `cam` is `None` while drawing into a directional shadow map.
    fn draw_fragment_geometry(
        &mut self,
        backend: &mut dyn RenderBackend,
        fragment_id: u32,
        material: MaterialHandle,
        cam: Option<&ParamsCamera>,
    ) -> EngineResult<()>;

    /// Bone matrices of a skinned mesh
    fn skinning(&self) -> Option<&[Mat4]> {
        None
    }
}

/// Entity that sets up its own state and draws itself, e.g. particles or text
pub trait CustomDraw: EntityBehavior {
    /// Draw with the given world matrix
    fn draw(&mut self, backend: &mut dyn RenderBackend, world: &Mat4, cam: &ParamsCamera) -> EngineResult<()>;
}

/// Refraction geometry written into the perturbation map
pub trait HeatDraw: EntityBehavior {
    /// Issue the draw calls; the heat program is already bound
    fn draw_geometry(&mut self, backend: &mut dyn RenderBackend) -> EngineResult<()>;
}

/// Entity drawn through the material passes
pub struct MaterialEntity {
    /// Color substituted by team-colored materials
    pub team_color: Color,
    /// Texture coordinate transform for animated materials
    pub texture_matrix: Mat4,
    /// Lit by scene lights
    pub use_lighting: bool,
    /// Rendered into shadow maps
    pub cast_shadow: bool,
    /// Darkened by shadow maps
    pub receive_shadow: bool,
    geometry: Box<dyn FragmentGeometry>,
}

impl MaterialEntity {
    /// Wrap geometry with default draw parameters
    pub fn new(geometry: Box<dyn FragmentGeometry>) -> Self {
        Self {
            team_color: Color::WHITE,
            texture_matrix: Mat4::identity(),
            use_lighting: true,
            cast_shadow: true,
            receive_shadow: true,
            geometry,
        }
    }

    /// Drawable pieces
    pub fn geometry(&self) -> &dyn FragmentGeometry {
        self.geometry.as_ref()
    }

    /// Drawable pieces, mutably
    pub fn geometry_mut(&mut self) -> &mut dyn FragmentGeometry {
        self.geometry.as_mut()
    }
}

impl fmt::Debug for MaterialEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterialEntity")
            .field("team_color", &self.team_color)
            .field("use_lighting", &self.use_lighting)
            .field("cast_shadow", &self.cast_shadow)
            .field("receive_shadow", &self.receive_shadow)
            .field("fragments", &self.geometry.fragment_count())
            .finish_non_exhaustive()
    }
}

/// Instance of a shared tree prototype
#[derive(Clone)]
pub struct TreeEntity {
    prototype: Rc<dyn TreePrototype>,
    /// Variant of the prototype
    pub kind: u32,
    /// Tint
    pub color: Color,
}

impl TreeEntity {
    /// Instance of `prototype`
    pub fn new(prototype: Rc<dyn TreePrototype>, kind: u32, color: Color) -> Self {
        Self { prototype, kind, color }
    }

    /// Shared prototype
    pub fn prototype(&self) -> &Rc<dyn TreePrototype> {
        &self.prototype
    }

    /// Radius of a sphere around the whole tree
    pub fn bounding_radius(&self) -> f32 {
        let dims = self.prototype.dims();
        Vec3::new(dims.half_width, dims.half_height * 2.0, dims.half_width).norm()
    }
}

impl EntityBehavior for TreeEntity {
    fn ray_collision(&self, _collision: CollisionType, orig: &Vec3, dir: &Vec3) -> Option<f32> {
        ray_to_box(orig, dir, &self.prototype.dims().trunk_bounds())
    }
}

impl fmt::Debug for TreeEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeEntity").field("kind", &self.kind).field("color", &self.color).finish_non_exhaustive()
    }
}

/// How an entity is drawn
pub enum EntityKind {
    /// Drawn per fragment in every material pass
    Material(MaterialEntity),
    /// Draws itself among translucent geometry
    Custom(Box<dyn CustomDraw>),
    /// Writes screen perturbation for the heat-haze effect
    Heat(Box<dyn HeatDraw>),
    /// Instance of a tree prototype
    Tree(TreeEntity),
}

impl EntityKind {
    /// Shared behavior of the kind
    pub fn behavior(&self) -> &dyn EntityBehavior {
        match self {
            Self::Material(m) => m.geometry.as_ref(),
            Self::Custom(c) => c.as_ref(),
            Self::Heat(h) => h.as_ref(),
            Self::Tree(t) => t,
        }
    }

    fn behavior_mut(&mut self) -> &mut dyn EntityBehavior {
        match self {
            Self::Material(m) => m.geometry.as_mut(),
            Self::Custom(c) => c.as_mut(),
            Self::Heat(h) => h.as_mut(),
            Self::Tree(t) => t,
        }
    }

    /// Material entity data, if this is one
    pub const fn as_material(&self) -> Option<&MaterialEntity> {
        match self {
            Self::Material(m) => Some(m),
            _ => None,
        }
    }

    /// Material entity data, mutably
    pub fn as_material_mut(&mut self) -> Option<&mut MaterialEntity> {
        match self {
            Self::Material(m) => Some(m),
            _ => None,
        }
    }

    /// Tree data, if this is a tree
    pub const fn as_tree(&self) -> Option<&TreeEntity> {
        match self {
            Self::Tree(t) => Some(t),
            _ => None,
        }
    }

    /// Short name for logs
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Material(_) => "material",
            Self::Custom(_) => "custom",
            Self::Heat(_) => "heat",
            Self::Tree(_) => "tree",
        }
    }

    /// Material entity that renders into shadow maps
    pub fn casts_shadow(&self) -> bool {
        self.as_material().is_some_and(|m| m.cast_shadow)
    }
}

impl fmt::Debug for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Material(m) => m.fmt(f),
            Self::Tree(t) => t.fmt(f),
            other => f.write_str(other.name()),
        }
    }
}

/// One material-bound drawable piece of an entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityFragment {
    /// Owning entity
    pub entity: EntityHandle,
    /// Identifier the entity uses for this piece
    pub fragment_id: u32,
    /// Material it is drawn with, `None` for a custom entity drawn whole
    pub material: Option<MaterialHandle>,
    /// World position of the entity, used for depth sorting
    pub pos: Vec3,
}

/// Node of the scene graph
#[derive(Debug)]
pub struct Entity {
    pub(crate) parent: Option<EntityHandle>,
    pub(crate) parent_bone: Option<String>,
    pub(crate) children: Vec<EntityHandle>,
    pub(crate) octree_node: Option<NodeHandle>,
    pub(crate) pos: Vec3,
    pub(crate) orientation: Quat,
    pub(crate) has_orientation: bool,
    pub(crate) size: f32,
    pub(crate) radius: f32,
    pub(crate) visible: bool,
    tag: u32,
    pub(crate) cache: TransformCache,
    kind: EntityKind,
}

impl Entity {
    /// Entity at the origin with unit size and radius
    pub fn new(kind: EntityKind) -> Self {
        let radius = kind.as_tree().map_or(1.0, TreeEntity::bounding_radius);
        Self {
            parent: None,
            parent_bone: None,
            children: Vec::new(),
            octree_node: None,
            pos: Vec3::zeros(),
            orientation: Quat::identity(),
            has_orientation: false,
            size: 1.0,
            radius,
            visible: true,
            tag: 0,
            cache: TransformCache::default(),
            kind,
        }
    }

    /// Parent entity
    pub const fn parent(&self) -> Option<EntityHandle> {
        self.parent
    }

    /// Bone of the parent this entity is attached to
    pub fn parent_bone(&self) -> Option<&str> {
        self.parent_bone.as_deref()
    }

    /// Child entities
    pub fn children(&self) -> &[EntityHandle] {
        &self.children
    }

    /// Octree node holding the entity
    pub const fn octree_node(&self) -> Option<NodeHandle> {
        self.octree_node
    }

    /// Position relative to the parent
    pub const fn pos(&self) -> &Vec3 {
        &self.pos
    }

    /// Orientation relative to the parent
    pub const fn orientation(&self) -> &Quat {
        &self.orientation
    }

    /// True when the orientation is not identity
    pub const fn has_orientation(&self) -> bool {
        self.has_orientation
    }

    /// Uniform scale
    pub const fn size(&self) -> f32 {
        self.size
    }

    /// Bounding-sphere radius before scaling
    pub const fn radius(&self) -> f32 {
        self.radius
    }

    /// Own visibility flag, ignoring parents
    pub const fn visible(&self) -> bool {
        self.visible
    }

    /// Free bits for game code
    pub const fn tag(&self) -> u32 {
        self.tag
    }

    /// Set the free bits
    pub fn set_tag(&mut self, tag: u32) {
        self.tag = tag;
    }

    /// Derived-value cache
    pub const fn cache(&self) -> &TransformCache {
        &self.cache
    }

    /// Draw kind
    pub const fn kind(&self) -> &EntityKind {
        &self.kind
    }

    /// Draw kind, mutably
    pub fn kind_mut(&mut self) -> &mut EntityKind {
        &mut self.kind
    }

    /// Forward a model-space ray test to the kind
    pub fn ray_collision(&self, collision: CollisionType, orig: &Vec3, dir: &Vec3) -> Option<f32> {
        self.kind.behavior().ray_collision(collision, orig, dir)
    }

    /// Forward a time step to the kind
    pub fn update(&mut self, dt: f32) {
        self.kind.behavior_mut().update(dt);
    }

    /// Fragment `index` of a material entity
    pub fn fragment(&self, handle: EntityHandle, index: usize, world_pos: Vec3) -> Option<EntityFragment> {
        let material = self.kind.as_material()?;
        let (fragment_id, material) = material.geometry.fragment(index);
        Some(EntityFragment { entity: handle, fragment_id, material: Some(material), pos: world_pos })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::foundation::collections::SlotMap;

    #[test]
    fn test_cache_memoizes_until_invalidated() {
        let cache = TransformCache::default();
        let mut calls = 0;
        let a = cache.world_size(|| {
            calls += 1;
            2.0
        });
        let b = cache.world_size(|| {
            calls += 1;
            3.0
        });
        assert_eq!((a, b, calls), (2.0, 2.0, 1));

        cache.invalidate(CacheFlags::WORLD_SIZE);
        assert_eq!(cache.world_size(|| 3.0), 3.0);
        assert!(cache.valid().contains(CacheFlags::WORLD_SIZE));
    }

    #[test]
    fn test_material_entity_defaults() {
        let entity = Entity::new(material_kind(Vec::new()));
        let m = entity.kind().as_material().unwrap();
        assert_eq!(m.team_color, Color::WHITE);
        assert!(m.use_lighting && m.cast_shadow && m.receive_shadow);
        assert_eq!(entity.size(), 1.0);
        assert_eq!(entity.radius(), 1.0);
        assert!(entity.visible());
        assert!(!entity.has_orientation());
        assert!(entity.kind().casts_shadow());
    }

    #[test]
    fn test_fragment_carries_material() {
        let mut materials = SlotMap::<MaterialHandle, ()>::with_key();
        let m0 = materials.insert(());
        let m1 = materials.insert(());
        let mut handles = SlotMap::<EntityHandle, ()>::with_key();
        let h = handles.insert(());

        let entity = Entity::new(material_kind(vec![m0, m1]));
        let frag = entity.fragment(h, 1, Vec3::new(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(frag.fragment_id, 1);
        assert_eq!(frag.material, Some(m1));
        assert_eq!(frag.pos, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_update_reaches_geometry() {
        let geometry = TestGeometry::new(Vec::new());
        let updates = geometry.updates.clone();
        let mut entity = Entity::new(EntityKind::Material(MaterialEntity::new(Box::new(geometry))));
        entity.update(0.1);
        entity.update(0.1);
        assert_eq!(updates.get(), 2);
        assert_eq!(entity.kind().name(), "material");
        assert!(format!("{:?}", entity.kind()).contains("MaterialEntity"));
    }
}
