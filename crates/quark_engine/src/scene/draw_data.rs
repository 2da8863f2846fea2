//! Per-frame visible set
//!
//! [`DrawData`] is filled from the octree and the world collaborators at
//! the start of a frame, thinned by occlusion queries and finally split
//! into opaque and translucent fragment lists. Nothing in it outlives the
//! frame.

use std::cmp::Ordering;

use crate::error::{EngineError, EngineResult};
use crate::foundation::collections::{EntityHandle, PointLightHandle, SpotLightHandle};
use crate::foundation::math::Vec3;
use crate::scene::entity::EntityKind;
use crate::scene::entity_arena::EntityArena;
use crate::scene::material::MaterialCollection;

pub use crate::scene::collaborators::{MapFragmentDesc, TreeDrawDesc};
pub use crate::scene::entity::EntityFragment;

/// Everything selected for drawing in one frame
#[derive(Debug, Default)]
pub struct DrawData {
    /// Visible material entities
    pub material_entities: Vec<EntityHandle>,
    /// Visible custom entities
    pub custom_entities: Vec<EntityHandle>,
    /// Visible heat entities
    pub heat_entities: Vec<EntityHandle>,
    /// Visible tree instances, from entities and from the terrain
    pub trees: Vec<TreeDrawDesc>,
    /// Visible map fragments
    pub map_fragments: Vec<MapFragmentDesc>,
    /// Visible terrain patches
    pub terrain_patches: Vec<u32>,
    /// Active spot lights whose range reaches the view
    pub spot_lights: Vec<SpotLightHandle>,
    /// Active point lights whose range reaches the view
    pub point_lights: Vec<PointLightHandle>,
    /// Fragments drawn in the base, light and fog passes
    pub opaque_fragments: Vec<EntityFragment>,
    /// Fragments and custom entities drawn last, far to near
    pub translucent_fragments: Vec<EntityFragment>,
}

impl DrawData {
    /// Empty visible set
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort entities found by a frustum query into the per-kind lists
    pub fn classify_entities(&mut self, arena: &EntityArena, found: &[EntityHandle]) {
        for &handle in found {
            match arena[handle].kind() {
                EntityKind::Material(_) => self.material_entities.push(handle),
                EntityKind::Custom(_) => self.custom_entities.push(handle),
                EntityKind::Heat(_) => self.heat_entities.push(handle),
                EntityKind::Tree(tree) => self.trees.push(TreeDrawDesc {
                    prototype: tree.prototype().clone(),
                    world: arena.world_matrix(handle),
                    inv_world: arena.inv_world_matrix(handle),
                    kind: tree.kind,
                    color: tree.color,
                }),
            }
        }
    }

    /// Split the fragments of the material entities by material kind and
    /// queue custom entities whole among the translucent ones
    pub fn build_entity_fragments(&mut self, arena: &EntityArena, materials: &MaterialCollection) -> EngineResult<()> {
        for &handle in &self.material_entities {
            push_entity_fragments(
                arena,
                materials,
                handle,
                &mut self.opaque_fragments,
                Some(&mut self.translucent_fragments),
            )?;
        }
        for &handle in &self.custom_entities {
            self.translucent_fragments.push(EntityFragment {
                entity: handle,
                fragment_id: 0,
                material: None,
                pos: arena.world_pos(handle),
            });
        }
        Ok(())
    }

    /// Total of visible material, custom and heat entities
    pub fn entity_count(&self) -> usize {
        self.material_entities.len() + self.custom_entities.len() + self.heat_entities.len()
    }
}

/// Append the fragments of one material entity. Translucent fragments go
/// to `translucent`, or are skipped when it is `None`.
pub fn push_entity_fragments(
    arena: &EntityArena,
    materials: &MaterialCollection,
    handle: EntityHandle,
    opaque: &mut Vec<EntityFragment>,
    mut translucent: Option<&mut Vec<EntityFragment>>,
) -> EngineResult<()> {
    let entity = &arena[handle];
    let Some(material_entity) = entity.kind().as_material() else {
        return Ok(());
    };
    let pos = arena.world_pos(handle);
    for index in 0..material_entity.geometry().fragment_count() {
        let Some(fragment) = entity.fragment(handle, index, pos) else {
            continue;
        };
        let material = fragment.material.and_then(|m| materials.get(m)).ok_or(EngineError::InvalidHandle("material"))?;
        if material.is_opaque() {
            opaque.push(fragment);
        } else if let Some(translucent) = translucent.as_deref_mut() {
            translucent.push(fragment);
        }
    }
    Ok(())
}

/// Group entity fragments by material
pub fn sort_by_material(fragments: &mut [EntityFragment]) {
    fragments.sort_by_key(|f| f.material);
}

/// Group map fragments by material
pub fn sort_map_by_material(fragments: &mut [MapFragmentDesc]) {
    fragments.sort_by_key(|f| f.material);
}

/// Order fragments from the farthest to the nearest to `eye`
pub fn sort_far_to_near(fragments: &mut [EntityFragment], eye: &Vec3) {
    fragments.sort_by(|a, b| {
        let da = (a.pos - eye).norm_squared();
        let db = (b.pos - eye).norm_squared();
        db.partial_cmp(&da).unwrap_or(Ordering::Equal)
    });
}

/// Group tree instances by prototype
pub fn sort_trees_by_prototype(trees: &mut [TreeDrawDesc]) {
    trees.sort_by_key(TreeDrawDesc::prototype_key);
}
