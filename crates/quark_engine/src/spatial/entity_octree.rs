//! Loose octree over entity bounding spheres
//!
//! Every entity sits in the deepest node whose bounds fully contain its
//! world-space sphere. Child bounds overlap their siblings: each child
//! reaches a quarter of the way past the parent's center, so an entity
//! moving around a split plane does not bounce between nodes. Leaves
//! split when they hold more than [`SPLIT_THRESHOLD`] entities and a node
//! whose children are all leaves is joined when it holds fewer than
//! [`JOIN_THRESHOLD`] entities in total.

use log::trace;

use crate::foundation::collections::{EntityHandle, NodeHandle, SlotMap};
use crate::foundation::geometry::{
    box_in_frustum, box_to_frustum_fast, ray_to_box, ray_to_sphere, sphere_in_box, sphere_to_box,
    sphere_to_frustum_fast, sphere_to_sphere, swept_box_to_box, BoundingBox, Frustum,
};
use crate::foundation::math::{lerp, transform_coord, transform_normal, Vec3};
use crate::scene::entity::EntityKind;
use crate::scene::entity_arena::EntityArena;
use crate::scene::light::{PointLight, SpotLight};
use crate::scene::material::CollisionType;

/// A leaf holding more entities than this is split
pub const SPLIT_THRESHOLD: usize = 16;

/// A node and its leaf children holding fewer entities than this are joined
pub const JOIN_THRESHOLD: usize = 8;

/// How far past the parent's center a child reaches, as a fraction of the half size
pub const LOOSENESS: f32 = 0.25;

/// One cell of the tree
#[derive(Debug, Clone)]
pub struct OctreeNode {
    bounds: BoundingBox,
    parent: Option<NodeHandle>,
    children: Option<[NodeHandle; 8]>,
    entities: Vec<EntityHandle>,
}

impl OctreeNode {
    fn leaf(bounds: BoundingBox, parent: Option<NodeHandle>) -> Self {
        Self { bounds, parent, children: None, entities: Vec::new() }
    }

    /// Loosened bounds
    pub const fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Parent node, `None` for the root
    pub const fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    /// All eight children, or none
    pub const fn children(&self) -> Option<&[NodeHandle; 8]> {
        self.children.as_ref()
    }

    /// Entities stored at this node
    pub fn entities(&self) -> &[EntityHandle] {
        &self.entities
    }

    /// True when the node has no children
    pub const fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

/// Bounds of the eight children. Bit 0 of the index selects the high X
/// side, bit 1 high Y and bit 2 high Z.
pub fn child_bounds(bounds: &BoundingBox) -> [BoundingBox; 8] {
    let center = bounds.center();
    let lo = Vec3::new(
        lerp(center.x, bounds.min.x, LOOSENESS),
        lerp(center.y, bounds.min.y, LOOSENESS),
        lerp(center.z, bounds.min.z, LOOSENESS),
    );
    let hi = Vec3::new(
        lerp(center.x, bounds.max.x, LOOSENESS),
        lerp(center.y, bounds.max.y, LOOSENESS),
        lerp(center.z, bounds.max.z, LOOSENESS),
    );
    std::array::from_fn(|i| {
        let pick = |axis: usize, bit: usize| {
            if i & bit == 0 {
                (bounds.min[axis], hi[axis])
            } else {
                (lo[axis], bounds.max[axis])
            }
        };
        let (x0, x1) = pick(0, 1);
        let (y0, y1) = pick(1, 2);
        let (z0, z1) = pick(2, 4);
        BoundingBox::new(Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1))
    })
}

/// Spatial index over the entities of one scene
#[derive(Debug)]
pub struct EntityOctree {
    nodes: SlotMap<NodeHandle, OctreeNode>,
    root: NodeHandle,
}

impl EntityOctree {
    /// Create a tree covering `bounds` with a single empty root
    pub fn new(bounds: BoundingBox) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(OctreeNode::leaf(bounds, None));
        Self { nodes, root }
    }

    /// Root node handle
    pub const fn root(&self) -> NodeHandle {
        self.root
    }

    /// Node by handle
    pub fn node(&self, node: NodeHandle) -> Option<&OctreeNode> {
        self.nodes.get(node)
    }

    /// Every node
    pub fn nodes(&self) -> impl Iterator<Item = (NodeHandle, &OctreeNode)> {
        self.nodes.iter()
    }

    /// Number of nodes including the root
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of indexed entities
    pub fn entity_count(&self) -> usize {
        self.nodes.values().map(|n| n.entities.len()).sum()
    }

    // ======== Modification ========

    /// Index an entity by its current world-space sphere
    pub fn add_entity(&mut self, arena: &mut EntityArena, entity: EntityHandle) {
        let center = arena.world_pos(entity);
        let radius = arena.world_radius(entity);
        self.add_to_node(arena, self.root, entity, &center, radius);
    }

    /// Drop an entity from the index.
    ///
    /// Uses only the node recorded on the entity and never recomputes its
    /// bounds, so it is safe while the entity is being torn down. Only the
    /// immediate parent of that node is considered for joining.
    pub fn remove_entity(&mut self, arena: &mut EntityArena, entity: EntityHandle) {
        let Some(node) = arena.get(entity).and_then(|e| e.octree_node()) else {
            return;
        };
        self.detach(node, entity);
        arena.set_octree_node(entity, None);
        if let Some(parent) = self.nodes.get(node).and_then(|n| n.parent) {
            self.try_join(arena, parent);
        }
    }

    /// Re-file an entity after its world-space sphere changed
    pub fn on_entity_params_change(&mut self, arena: &mut EntityArena, entity: EntityHandle) {
        let Some(node) = arena.get(entity).and_then(|e| e.octree_node()) else {
            return;
        };
        let center = arena.world_pos(entity);
        let radius = arena.world_radius(entity);

        if sphere_in_box(&center, radius, &self.nodes[node].bounds) {
            // Still fits: the only possible move is down into a child
            let Some(children) = self.nodes[node].children else {
                return;
            };
            if let Some(child) = children.into_iter().find(|c| sphere_in_box(&center, radius, &self.nodes[*c].bounds)) {
                self.detach(node, entity);
                self.add_to_node(arena, child, entity, &center, radius);
            }
        } else {
            // Lowest ancestor containing the sphere, or the root
            let mut target = node;
            while let Some(parent) = self.nodes[target].parent {
                target = parent;
                if sphere_in_box(&center, radius, &self.nodes[target].bounds) {
                    break;
                }
            }
            self.remove_entity(arena, entity);
            if !self.nodes.contains_key(target) {
                target = self.root;
            }
            self.add_to_node(arena, target, entity, &center, radius);
        }
    }

    fn detach(&mut self, node: NodeHandle, entity: EntityHandle) {
        if let Some(n) = self.nodes.get_mut(node) {
            if let Some(index) = n.entities.iter().position(|e| *e == entity) {
                n.entities.remove(index);
            }
        }
    }

    fn add_to_node(&mut self, arena: &mut EntityArena, node: NodeHandle, entity: EntityHandle, center: &Vec3, radius: f32) {
        let mut node = node;
        // Descend while some child fully contains the sphere
        while let Some(children) = self.nodes[node].children {
            match children.into_iter().find(|c| sphere_in_box(center, radius, &self.nodes[*c].bounds)) {
                Some(child) => node = child,
                None => {
                    self.nodes[node].entities.push(entity);
                    arena.set_octree_node(entity, Some(node));
                    return;
                }
            }
        }

        self.nodes[node].entities.push(entity);
        arena.set_octree_node(entity, Some(node));
        if self.nodes[node].entities.len() > SPLIT_THRESHOLD {
            self.split_node(arena, node);
        }
    }

    fn split_node(&mut self, arena: &mut EntityArena, node: NodeHandle) {
        // Children are created even if no entity ends up moving into them
        let bounds = child_bounds(&self.nodes[node].bounds);
        let children = bounds.map(|b| self.nodes.insert(OctreeNode::leaf(b, Some(node))));
        self.nodes[node].children = Some(children);

        let entities = std::mem::take(&mut self.nodes[node].entities);
        let mut kept = Vec::new();
        for entity in entities {
            let center = arena.world_pos(entity);
            let radius = arena.world_radius(entity);
            match children.iter().find(|c| sphere_in_box(&center, radius, &self.nodes[**c].bounds)) {
                Some(child) => {
                    self.nodes[*child].entities.push(entity);
                    arena.set_octree_node(entity, Some(*child));
                }
                None => kept.push(entity),
            }
        }
        trace!("Octree split: {} entities stay at the parent", kept.len());
        self.nodes[node].entities = kept;
    }

    fn try_join(&mut self, arena: &mut EntityArena, node: NodeHandle) {
        let Some(children) = self.nodes[node].children else {
            return;
        };
        let mut sum = self.nodes[node].entities.len();
        for child in children {
            let c = &self.nodes[child];
            if !c.is_leaf() {
                return;
            }
            sum += c.entities.len();
        }
        if sum >= JOIN_THRESHOLD {
            return;
        }

        for child in children {
            if let Some(c) = self.nodes.remove(child) {
                for entity in &c.entities {
                    arena.set_octree_node(*entity, Some(node));
                }
                self.nodes[node].entities.extend(c.entities);
            }
        }
        self.nodes[node].children = None;
        trace!("Octree join: {} entities", sum);
    }

    // ======== Queries ========

    /// Visible entities whose sphere touches a frustum
    pub fn find_frustum(&self, arena: &EntityArena, frustum: &Frustum, out: &mut Vec<EntityHandle>) {
        out.clear();
        self.frustum_node(arena, self.root, frustum, false, out, |_| true);
    }

    /// Visible shadow-casting material entities inside a spot light's frustum
    pub fn find_spot_light(&self, arena: &EntityArena, light: &SpotLight, out: &mut Vec<EntityHandle>) {
        out.clear();
        self.frustum_node(arena, self.root, light.frustum(), false, out, EntityKind::casts_shadow);
    }

    fn frustum_node(
        &self,
        arena: &EntityArena,
        node: NodeHandle,
        frustum: &Frustum,
        inside: bool,
        out: &mut Vec<EntityHandle>,
        accept: fn(&EntityKind) -> bool,
    ) {
        let n = &self.nodes[node];
        if let Some(children) = n.children {
            for child in children {
                let bounds = &self.nodes[child].bounds;
                if inside || box_in_frustum(bounds, frustum) {
                    self.frustum_node(arena, child, frustum, true, out, accept);
                } else if box_to_frustum_fast(bounds, frustum) {
                    self.frustum_node(arena, child, frustum, false, out, accept);
                }
            }
        }

        for entity in &n.entities {
            if !arena.world_visible(*entity) || !accept(arena[*entity].kind()) {
                continue;
            }
            if inside || sphere_to_frustum_fast(&arena.world_pos(*entity), arena.world_radius(*entity), frustum) {
                out.push(*entity);
            }
        }
    }

    /// Visible shadow-casting material entities in range of a point light,
    /// listed for every cube face whose frustum they touch
    pub fn find_point_light(&self, arena: &EntityArena, light: &PointLight, out: &mut [Vec<EntityHandle>; 6]) {
        for list in out.iter_mut() {
            list.clear();
        }
        let cameras = light.cameras();
        let frustums: [&Frustum; 6] = std::array::from_fn(|i| cameras[i].matrices().frustum());
        self.point_node(arena, self.root, light.pos(), light.dist(), &frustums, out);
    }

    fn point_node(
        &self,
        arena: &EntityArena,
        node: NodeHandle,
        pos: &Vec3,
        dist: f32,
        frustums: &[&Frustum; 6],
        out: &mut [Vec<EntityHandle>; 6],
    ) {
        let n = &self.nodes[node];
        if let Some(children) = n.children {
            for child in children {
                if sphere_to_box(pos, dist, &self.nodes[child].bounds) {
                    self.point_node(arena, child, pos, dist, frustums, out);
                }
            }
        }

        for entity in &n.entities {
            if !arena.world_visible(*entity) || !arena[*entity].kind().casts_shadow() {
                continue;
            }
            let center = arena.world_pos(*entity);
            let radius = arena.world_radius(*entity);
            if !sphere_to_sphere(&center, radius, pos, dist) {
                continue;
            }
            for (face, frustum) in frustums.iter().enumerate() {
                if sphere_to_frustum_fast(&center, radius, frustum) {
                    out[face].push(*entity);
                }
            }
        }
    }

    /// Visible shadow casters (material entities and trees) whose box,
    /// swept along `light_dir`, reaches the camera's box
    pub fn find_directional_light(
        &self,
        arena: &EntityArena,
        cam_box: &BoundingBox,
        light_dir: &Vec3,
        out: &mut Vec<EntityHandle>,
    ) {
        out.clear();
        self.directional_node(arena, self.root, cam_box, light_dir, out);
    }

    fn directional_node(
        &self,
        arena: &EntityArena,
        node: NodeHandle,
        cam_box: &BoundingBox,
        light_dir: &Vec3,
        out: &mut Vec<EntityHandle>,
    ) {
        let n = &self.nodes[node];
        if let Some(children) = n.children {
            for child in children {
                if swept_box_to_box(&self.nodes[child].bounds, light_dir, cam_box).is_some() {
                    self.directional_node(arena, child, cam_box, light_dir, out);
                }
            }
        }

        for entity in &n.entities {
            if !arena.world_visible(*entity) {
                continue;
            }
            let kind = arena[*entity].kind();
            if !kind.casts_shadow() && kind.as_tree().is_none() {
                continue;
            }
            // A swept sphere test would be tighter but loses casters when
            // the camera sits inside the sphere
            let sphere_box = BoundingBox::from_sphere(&arena.world_pos(*entity), arena.world_radius(*entity));
            if swept_box_to_box(&sphere_box, light_dir, cam_box).is_some() {
                out.push(*entity);
            }
        }
    }

    /// Nearest entity hit by a world-space ray, with the ray parameter
    pub fn ray_collision(
        &self,
        arena: &EntityArena,
        collision: CollisionType,
        orig: &Vec3,
        dir: &Vec3,
    ) -> Option<(EntityHandle, f32)> {
        let mut best = None;
        let mut best_t = f32::MAX;
        self.ray_node(arena, self.root, collision, orig, dir, &mut best, &mut best_t);
        best.map(|e| (e, best_t))
    }

    #[allow(clippy::too_many_arguments)]
    fn ray_node(
        &self,
        arena: &EntityArena,
        node: NodeHandle,
        collision: CollisionType,
        orig: &Vec3,
        dir: &Vec3,
        best: &mut Option<EntityHandle>,
        best_t: &mut f32,
    ) {
        let n = &self.nodes[node];
        for entity in &n.entities {
            if collision == CollisionType::OPTICAL && !arena.world_visible(*entity) {
                continue;
            }
            let center = arena.world_pos(*entity);
            let radius = arena.world_radius(*entity);
            if !ray_to_sphere(orig, dir, &center, radius).is_some_and(|t| t >= 0.0 && t < *best_t) {
                continue;
            }
            let inv_world = arena.inv_world_matrix(*entity);
            let model_orig = transform_coord(&inv_world, orig);
            let model_dir = transform_normal(&inv_world, dir);
            if let Some(t) = arena[*entity].ray_collision(collision, &model_orig, &model_dir) {
                if t < *best_t {
                    *best = Some(*entity);
                    *best_t = t;
                }
            }
        }

        if let Some(children) = n.children {
            for child in children {
                if ray_to_box(orig, dir, &self.nodes[child].bounds).is_some_and(|t| t >= 0.0 && t < *best_t) {
                    self.ray_node(arena, child, collision, orig, dir, best, best_t);
                }
            }
        }
    }
}
