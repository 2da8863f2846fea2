//! Entity storage and the scene graph
//!
//! [`EntityArena`] owns every entity of a scene in a slotmap, keeps the
//! parent/child links and the root list, and computes derived values on
//! demand. Transform setters return the entities whose world-space sphere
//! may have moved so the owner can update its spatial index.

use std::ops::Index;

use log::trace;

use crate::error::{EngineError, EngineResult};
use crate::foundation::collections::{EntityHandle, NodeHandle, SlotMap};
use crate::foundation::math::{compose_srt, inverse_or_identity, transform_coord, Mat4, Quat, Vec3};
use crate::scene::entity::{CacheFlags, Entity, EntityKind};

/// Entities of one scene
#[derive(Debug, Default)]
pub struct EntityArena {
    entities: SlotMap<EntityHandle, Entity>,
    roots: Vec<EntityHandle>,
}

impl EntityArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when there are no entities
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// True when the handle refers to a live entity
    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.entities.contains_key(handle)
    }

    /// Entity by handle
    pub fn get(&self, handle: EntityHandle) -> Option<&Entity> {
        self.entities.get(handle)
    }

    /// Entity by handle, mutably
    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut Entity> {
        self.entities.get_mut(handle)
    }

    /// Every entity
    pub fn iter(&self) -> impl Iterator<Item = (EntityHandle, &Entity)> {
        self.entities.iter()
    }

    /// Every entity, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityHandle, &mut Entity)> {
        self.entities.iter_mut()
    }

    /// Entities without a parent
    pub fn roots(&self) -> &[EntityHandle] {
        &self.roots
    }

    /// Add a root entity
    pub fn insert(&mut self, kind: EntityKind) -> EntityHandle {
        let handle = self.entities.insert(Entity::new(kind));
        self.roots.push(handle);
        handle
    }

    fn entity(&self, handle: EntityHandle) -> EngineResult<&Entity> {
        self.entities.get(handle).ok_or(EngineError::InvalidHandle("entity"))
    }

    fn entity_mut(&mut self, handle: EntityHandle) -> EngineResult<&mut Entity> {
        self.entities.get_mut(handle).ok_or(EngineError::InvalidHandle("entity"))
    }

    // ======== Transform ========

    /// Move relative to the parent
    pub fn set_pos(&mut self, handle: EntityHandle, pos: Vec3) -> EngineResult<Vec<EntityHandle>> {
        self.entity_mut(handle)?.pos = pos;
        Ok(self.invalidate_transform(handle))
    }

    /// Move by an offset
    pub fn translate(&mut self, handle: EntityHandle, delta: Vec3) -> EngineResult<Vec<EntityHandle>> {
        self.entity_mut(handle)?.pos += delta;
        Ok(self.invalidate_transform(handle))
    }

    /// Rotate relative to the parent
    pub fn set_orientation(&mut self, handle: EntityHandle, orientation: Quat) -> EngineResult<Vec<EntityHandle>> {
        let entity = self.entity_mut(handle)?;
        entity.orientation = orientation;
        entity.has_orientation = orientation != Quat::identity();
        Ok(self.invalidate_transform(handle))
    }

    /// Scale uniformly
    pub fn set_size(&mut self, handle: EntityHandle, size: f32) -> EngineResult<Vec<EntityHandle>> {
        self.entity_mut(handle)?.size = size;
        Ok(self.invalidate_transform(handle))
    }

    /// Change the bounding-sphere radius
    pub fn set_radius(&mut self, handle: EntityHandle, radius: f32) -> EngineResult<Vec<EntityHandle>> {
        self.entity_mut(handle)?.radius = radius;
        Ok(self.invalidate_transform(handle))
    }

    /// Show or hide the entity and, through accumulated visibility, its children
    pub fn set_visible(&mut self, handle: EntityHandle, visible: bool) -> EngineResult<()> {
        self.entity_mut(handle)?.visible = visible;
        for h in self.subtree(handle) {
            self.entities[h].cache.invalidate(CacheFlags::WORLD_VISIBLE);
        }
        Ok(())
    }

    /// Attach under another entity, or make a root with `None`
    pub fn set_parent(&mut self, handle: EntityHandle, parent: Option<EntityHandle>) -> EngineResult<Vec<EntityHandle>> {
        self.reparent(handle, parent, None)
    }

    /// Attach to a named bone of another entity
    pub fn set_parent_bone(
        &mut self,
        handle: EntityHandle,
        parent: EntityHandle,
        bone: impl Into<String>,
    ) -> EngineResult<Vec<EntityHandle>> {
        self.reparent(handle, Some(parent), Some(bone.into()))
    }

    fn reparent(
        &mut self,
        handle: EntityHandle,
        parent: Option<EntityHandle>,
        bone: Option<String>,
    ) -> EngineResult<Vec<EntityHandle>> {
        debug_assert!(parent != Some(handle), "entity cannot be its own parent");
        if let Some(p) = parent {
            self.entity(p)?;
        }
        let old_parent = self.entity(handle)?.parent;
        if old_parent == parent {
            return Ok(Vec::new());
        }

        self.unlink(handle);
        match parent {
            Some(p) => self.entities[p].children.push(handle),
            None => self.roots.push(handle),
        }
        let entity = &mut self.entities[handle];
        entity.parent = parent;
        entity.parent_bone = bone;

        Ok(self.invalidate_transform(handle))
    }

    /// Invalidate every derived value of an entity and its descendants.
    ///
    /// Returns the affected entities, the entity itself first and every
    /// parent before its children.
    pub fn invalidate_transform(&mut self, handle: EntityHandle) -> Vec<EntityHandle> {
        let affected = self.subtree(handle);
        for h in &affected {
            self.entities[*h].cache.invalidate(CacheFlags::all());
        }
        affected
    }

    /// The entity and all its descendants, parents first
    pub fn subtree(&self, handle: EntityHandle) -> Vec<EntityHandle> {
        let mut out = Vec::new();
        if !self.contains(handle) {
            return out;
        }
        let mut stack = vec![handle];
        while let Some(h) = stack.pop() {
            out.push(h);
            stack.extend(self.entities[h].children.iter().rev());
        }
        out
    }

    // ======== Destruction ========

    /// The entity and all its descendants in destruction order, children first
    pub fn destroy_order(&self, handle: EntityHandle) -> Vec<EntityHandle> {
        let mut order = self.subtree(handle);
        order.reverse();
        order
    }

    /// Detach from the parent's child list or the root list
    pub fn unlink(&mut self, handle: EntityHandle) {
        let Some(parent) = self.entities.get(handle).map(|e| e.parent) else {
            return;
        };
        let list = match parent {
            Some(p) => match self.entities.get_mut(p) {
                Some(p) => &mut p.children,
                None => return,
            },
            None => &mut self.roots,
        };
        if let Some(index) = list.iter().position(|h| *h == handle) {
            list.remove(index);
        }
    }

    /// Remove one entity. Children are orphaned; remove them first.
    pub fn remove(&mut self, handle: EntityHandle) -> Option<Entity> {
        self.unlink(handle);
        let entity = self.entities.remove(handle)?;
        trace!("Removed {} entity {:?}", entity.kind().name(), handle);
        Some(entity)
    }

    /// Record the octree node holding the entity
    pub(crate) fn set_octree_node(&mut self, handle: EntityHandle, node: Option<NodeHandle>) {
        if let Some(entity) = self.entities.get_mut(handle) {
            entity.octree_node = node;
        }
    }

    // ======== Derived values ========
    //
    // All of these panic on a stale handle, like slice indexing.

    /// Scale, rotation and translation relative to the parent
    pub fn local_matrix(&self, handle: EntityHandle) -> Mat4 {
        let e = &self[handle];
        e.cache.local(|| {
            let orientation = e.has_orientation.then_some(&e.orientation);
            compose_srt(e.size, orientation, &e.pos)
        })
    }

    /// Inverse of the local matrix
    pub fn inv_local_matrix(&self, handle: EntityHandle) -> Mat4 {
        self[handle].cache.inv_local(|| inverse_or_identity(&self.local_matrix(handle)))
    }

    /// Model to world transform
    pub fn world_matrix(&self, handle: EntityHandle) -> Mat4 {
        let e = &self[handle];
        e.cache.world(|| {
            let local = self.local_matrix(handle);
            match (e.parent, e.parent_bone.as_deref()) {
                (None, _) => local,
                (Some(p), None) => self.world_matrix(p) * local,
                (Some(p), Some(bone)) => {
                    let bone = self[p].kind().behavior().bone_matrix(bone);
                    self.world_matrix(p) * bone * local
                }
            }
        })
    }

    /// World to model transform
    pub fn inv_world_matrix(&self, handle: EntityHandle) -> Mat4 {
        self[handle].cache.inv_world(|| inverse_or_identity(&self.world_matrix(handle)))
    }

    /// Position of the model origin in world space
    pub fn world_pos(&self, handle: EntityHandle) -> Vec3 {
        self[handle].cache.world_pos(|| transform_coord(&self.world_matrix(handle), &Vec3::zeros()))
    }

    /// Scale accumulated over the parent chain
    pub fn world_size(&self, handle: EntityHandle) -> f32 {
        let e = &self[handle];
        e.cache.world_size(|| match e.parent {
            None => e.size,
            Some(p) => e.size * self.world_size(p),
        })
    }

    /// Bounding-sphere radius in world space
    pub fn world_radius(&self, handle: EntityHandle) -> f32 {
        let e = &self[handle];
        e.cache.world_radius(|| e.radius * self.world_size(handle))
    }

    /// Visible together with every ancestor
    pub fn world_visible(&self, handle: EntityHandle) -> bool {
        let e = &self[handle];
        e.cache.world_visible(|| match e.parent {
            None => e.visible,
            Some(p) => e.visible && self.world_visible(p),
        })
    }
}

impl Index<EntityHandle> for EntityArena {
    type Output = Entity;

    fn index(&self, handle: EntityHandle) -> &Entity {
        &self.entities[handle]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::entity::test_support::material_kind;
    use approx::assert_relative_eq;

    fn arena_with_chain() -> (EntityArena, EntityHandle, EntityHandle, EntityHandle) {
        let mut arena = EntityArena::new();
        let a = arena.insert(material_kind(Vec::new()));
        let b = arena.insert(material_kind(Vec::new()));
        let c = arena.insert(material_kind(Vec::new()));
        arena.set_parent(b, Some(a)).unwrap();
        arena.set_parent(c, Some(b)).unwrap();
        (arena, a, b, c)
    }

    /// World matrix composed from scratch, without any cache
    fn uncached_world(arena: &EntityArena, handle: EntityHandle) -> Mat4 {
        let e = &arena[handle];
        let local = compose_srt(e.size(), Some(e.orientation()), e.pos());
        match e.parent() {
            Some(p) => uncached_world(arena, p) * local,
            None => local,
        }
    }

    #[test]
    fn test_defaults() {
        let mut arena = EntityArena::new();
        let h = arena.insert(material_kind(Vec::new()));
        assert_eq!(arena.roots(), &[h]);
        assert_eq!(arena.world_pos(h), Vec3::zeros());
        assert_eq!(arena.world_radius(h), 1.0);
        assert!(arena.world_visible(h));
        assert_eq!(arena.world_matrix(h), Mat4::identity());
    }

    #[test]
    fn test_world_values_follow_parent() {
        let (mut arena, a, b, _) = arena_with_chain();
        arena.set_pos(a, Vec3::new(10.0, 0.0, 0.0)).unwrap();
        arena.set_size(a, 2.0).unwrap();
        arena.set_pos(b, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        arena.set_radius(b, 3.0).unwrap();

        assert_relative_eq!(arena.world_pos(b), Vec3::new(12.0, 0.0, 0.0));
        assert_eq!(arena.world_size(b), 2.0);
        assert_eq!(arena.world_radius(b), 6.0);
    }

    #[test]
    fn test_transform_change_invalidates_subtree() {
        let (mut arena, a, b, c) = arena_with_chain();
        for h in [a, b, c] {
            arena.world_matrix(h);
            arena.world_visible(h);
            arena.world_radius(h);
        }
        assert!(arena[c].cache().valid().contains(CacheFlags::WORLD | CacheFlags::WORLD_VISIBLE));

        let affected = arena.set_pos(b, Vec3::new(0.0, 1.0, 0.0)).unwrap();
        assert_eq!(affected, vec![b, c]);
        assert!(arena[a].cache().valid().contains(CacheFlags::WORLD));
        assert_eq!(arena[b].cache().valid(), CacheFlags::empty());
        assert_eq!(arena[c].cache().valid(), CacheFlags::empty());
        assert_relative_eq!(arena.world_pos(c), Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_visibility_accumulates() {
        let (mut arena, a, b, c) = arena_with_chain();
        assert!(arena.world_visible(c));
        arena.set_visible(a, false).unwrap();
        assert!(!arena.world_visible(b));
        assert!(!arena.world_visible(c));
        // Hiding does not move anything
        assert!(arena[c].cache().valid().contains(CacheFlags::WORLD_VISIBLE));

        arena.set_visible(a, true).unwrap();
        arena.set_visible(c, false).unwrap();
        assert!(arena.world_visible(b));
        assert!(!arena.world_visible(c));
    }

    #[test]
    fn test_set_same_parent_is_noop() {
        let (mut arena, a, b, _) = arena_with_chain();
        arena.world_matrix(b);
        assert!(arena.set_parent(b, Some(a)).unwrap().is_empty());
        assert!(arena[b].cache().valid().contains(CacheFlags::WORLD));
    }

    #[test]
    fn test_reparent_moves_between_lists() {
        let (mut arena, a, b, c) = arena_with_chain();
        assert_eq!(arena.roots(), &[a]);
        arena.set_parent(c, None).unwrap();
        assert_eq!(arena.roots(), &[a, c]);
        assert!(arena[b].children().is_empty());

        arena.set_parent(b, Some(c)).unwrap();
        assert_eq!(arena[c].children(), &[b]);
        assert!(arena[a].children().is_empty());
    }

    #[test]
    fn test_destroy_order_is_children_first() {
        let (mut arena, a, b, c) = arena_with_chain();
        let order = arena.destroy_order(a);
        assert_eq!(order, vec![c, b, a]);
        for h in order {
            arena.remove(h);
        }
        assert!(arena.is_empty());
        assert!(arena.roots().is_empty());
    }

    #[test]
    fn test_stale_handle_is_error() {
        let mut arena = EntityArena::new();
        let h = arena.insert(material_kind(Vec::new()));
        arena.remove(h);
        assert!(matches!(arena.set_pos(h, Vec3::zeros()), Err(EngineError::InvalidHandle("entity"))));
        assert!(arena.subtree(h).is_empty());
    }

    #[test]
    fn test_cached_world_matches_fresh_composition() {
        // Seeded xorshift so failures reproduce
        let mut state = 0x2545_f491_u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 10_000) as f32 / 10_000.0
        };

        let mut arena = EntityArena::new();
        let handles: Vec<_> = (0..6).map(|_| arena.insert(material_kind(Vec::new()))).collect();
        for step in 0..200 {
            let h = handles[(next() * 6.0) as usize % 6];
            match step % 4 {
                0 => {
                    arena.set_pos(h, Vec3::new(next() * 10.0 - 5.0, next() * 10.0 - 5.0, next() * 10.0 - 5.0)).unwrap();
                }
                1 => {
                    let q = Quat::from_euler_angles(next() * 3.0, next() * 3.0, next() * 3.0);
                    arena.set_orientation(h, q).unwrap();
                }
                2 => {
                    arena.set_size(h, 0.5 + next()).unwrap();
                }
                _ => {
                    // Only parent to lower indices, which rules out cycles
                    let index = handles.iter().position(|x| *x == h).unwrap_or(0);
                    let parent = if index == 0 || next() < 0.3 {
                        None
                    } else {
                        Some(handles[(next() * index as f32) as usize % index])
                    };
                    arena.set_parent(h, parent).unwrap();
                }
            }
            for probe in &handles {
                assert_relative_eq!(arena.world_matrix(*probe), uncached_world(&arena, *probe), epsilon = 1e-3);
            }
        }
    }
}
