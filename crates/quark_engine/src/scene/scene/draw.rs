//! Frame orchestration: visible-set building, the ordered passes and the
//! postprocess composition

use log::trace;

use super::occlusion::query_sun_visible_factor;
use super::Scene;
use crate::engine::RenderContext;
use crate::error::{EngineError, EngineResult};
use crate::foundation::collections::EntityHandle;
use crate::foundation::geometry::{frustum_to_frustum, sphere_to_frustum_fast};
use crate::foundation::math::{Color, Mat4, Vec2, Vec3, Vec4, POSITIVE_Y};
use crate::render::backend::{ClearFlags, RenderBackend, RenderTarget, ScreenQuad};
use crate::render::optimizer::OptimizerSettings;
use crate::render::params::{ParamBlock, ShaderParam};
use crate::render::postprocess::clear_alpha;
use crate::render::services::{EntityDrawParams, FogParams, SceneDrawParams, ShadowFactorRange, SpecialTexture};
use crate::render::shader_features::Pass;
use crate::scene::camera::ParamsCamera;
use crate::scene::collaborators::{MapFragmentDesc, TerrainRenderer, TreeDrawDesc, TreeFog, TreeLighting, TreePrototype};
use crate::scene::draw_data::{
    sort_by_material, sort_far_to_near, sort_map_by_material, sort_trees_by_prototype, DrawData, EntityFragment,
};
use crate::scene::entity::EntityKind;
use crate::scene::entity_arena::EntityArena;
use crate::scene::light::LightRef;
use crate::scene::material::{MaterialCollection, MaterialKind};
use crate::scene::stats::Stats;

/// Fraction of the directional light's shadow distance where shadows start
/// fading out
pub const DIRECTIONAL_LIGHT_SHADOW_ATTEN_START_PERCENT: f32 = 0.5;

impl Scene {
    /// Draw one frame from the active camera into the bound render target,
    /// filling `stats`. Without an active camera only the optimizer advances.
    pub fn draw(&mut self, ctx: &mut RenderContext<'_>, stats: &mut Stats) -> EngineResult<()> {
        stats.reset();
        let settings = self.optimizer.on_frame(ctx.dt);
        stats.optimizer = settings.to_string();

        let Some(cam) = self.active_camera.and_then(|h| self.cameras.get(h)).map(|c| c.params().clone()) else {
            return Ok(());
        };

        let mut data = self.create_draw_data(ctx, &cam, settings);
        let (width, height) = ctx.backend.back_buffer_size();

        if !ctx.config.postprocessing.enabled {
            self.draw_all(ctx, &cam, &mut data, settings, stats)?;
        } else {
            self.draw_post_processed(ctx, &cam, &mut data, settings, stats, width, height)?;
        }

        stats.main_shaders = ctx.services.main_shader_count() as u32;
        stats.pp_shaders = ctx.services.pp_shader_count() as u32;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_post_processed(
        &mut self,
        ctx: &mut RenderContext<'_>,
        cam: &ParamsCamera,
        data: &mut DrawData,
        settings: OptimizerSettings,
        stats: &mut Stats,
        width: u32,
        height: u32,
    ) -> EngineResult<()> {
        let heat = !data.heat_entities.is_empty();
        let sun_dir = self.sky.as_ref().and_then(|sky| sky.sun_dir());
        let use_lens_flare = self.post_process.lens_flare.is_some() && sun_dir.is_some();
        let mut sun_visible = 0.0;

        if self.post_process.render_to_texture_required(heat) {
            let screen = ctx.services.ensure_special_texture(ctx.backend, SpecialTexture::Screen, ctx.now)?;
            let previous = ctx.backend.render_target();
            ctx.backend.set_render_target(RenderTarget::Texture(screen.id), previous.1)?;

            self.draw_all(ctx, cam, data, settings, stats)?;
            if let (true, Some(dir)) = (use_lens_flare, sun_dir) {
                sun_visible = query_sun_visible_factor(ctx, cam, &dir)?;
            }
            if heat {
                clear_alpha(ctx.backend, 0.0, screen.width, screen.height)?;
                self.draw_heat_entities(ctx, cam, &data.heat_entities)?;
            }

            ctx.backend.set_render_target(previous.0, previous.1)?;

            if let Some(tone_mapping) = &mut self.post_process.tone_mapping {
                let vram = ctx.services.ensure_special_texture(ctx.backend, SpecialTexture::ToneMappingVram, ctx.now)?;
                let ram = ctx.services.ensure_special_texture(ctx.backend, SpecialTexture::ToneMappingRam, ctx.now)?;
                tone_mapping.calc_brightness(ctx.backend, screen.id, vram, ram, ctx.now, ctx.dt)?;
            }

            let mut bloom_source = None;
            if let Some(bloom) = &self.post_process.bloom {
                let blur1 = ctx.services.ensure_special_texture(ctx.backend, SpecialTexture::Blur1, ctx.now)?;
                let blur2 = ctx.services.ensure_special_texture(ctx.backend, SpecialTexture::Blur2, ctx.now)?;
                bloom.create_bloom(ctx.backend, ctx.services, screen.id, blur1, blur2)?;
                bloom_source = Some(blur1.id);
            }

            ctx.backend.restore_default_state();
            ctx.services.setup_state_pp(
                ctx.backend,
                screen.id,
                self.post_process.function.as_ref(),
                self.post_process.tone_mapping.as_ref(),
                heat,
            )?;
            let mut drawn = Ok(());
            if heat {
                let mut params = ParamBlock::new();
                params.set(ShaderParam::PerturbationOffset, perturbation_offset(ctx.now));
                drawn = ctx.backend.set_params(&params);
            }
            if drawn.is_ok() {
                drawn = ctx.backend.draw_screen_quad(&ScreenQuad::fullscreen(width, height));
            }
            ctx.services.unsetup_state(ctx.backend);
            drawn?;

            if let (Some(bloom), Some(blur1)) = (&self.post_process.bloom, bloom_source) {
                bloom.draw_bloom(ctx.backend, blur1, width, height)?;
            }
        } else {
            self.draw_all(ctx, cam, data, settings, stats)?;
            if let (true, Some(dir)) = (use_lens_flare, sun_dir) {
                sun_visible = query_sun_visible_factor(ctx, cam, &dir)?;
            }
        }

        if let Some(feedback) = &mut self.post_process.feedback {
            let target = ctx.services.ensure_special_texture(ctx.backend, SpecialTexture::Feedback, ctx.now)?;
            feedback.draw(ctx.backend, width, height, target.id, cam.eye_pos(), cam.matrices().view_proj(), ctx.now, ctx.dt)?;
        }

        if let (Some(flare), Some(dir)) = (&mut self.post_process.lens_flare, sun_dir) {
            let visible = sun_visible * dir.y.max(0.0);
            if visible > 0.01 {
                let matrices = cam.matrices();
                flare.draw(ctx.backend, ctx.services.textures(), visible, width, height, matrices.view(), matrices.proj(), ctx.dt)?;
            }
        }

        if let Some(texture) = &self.post_process.texture {
            texture.draw(ctx.backend, ctx.services.textures(), width, height)?;
        }
        if let Some(color) = &self.post_process.color {
            color.draw(ctx.backend, width, height)?;
        }
        Ok(())
    }

    /// Collect everything the camera may see
    pub(super) fn create_draw_data(
        &self,
        ctx: &RenderContext<'_>,
        cam: &ParamsCamera,
        settings: OptimizerSettings,
    ) -> DrawData {
        let mut data = DrawData::new();
        let frustum = cam.matrices().frustum();

        let mut found = Vec::new();
        self.octree.find_frustum(&self.entities, frustum, &mut found);
        data.classify_entities(&self.entities, &found);

        if let Some(map) = &self.map {
            map.fragments_in_frustum(frustum, &mut data.map_fragments);
            sort_map_by_material(&mut data.map_fragments);
        }

        if let Some(terrain) = &self.terrain {
            terrain.visible_patches(frustum, &mut data.terrain_patches);
            terrain.trees_in_frustum(cam, settings.tree_frustum_culling, &mut data.trees);
        }

        if ctx.config.lighting {
            for (handle, light) in &self.point_lights {
                if light.base.is_active() && sphere_to_frustum_fast(light.pos(), light.dist(), frustum) {
                    data.point_lights.push(handle);
                }
            }
            for (handle, light) in &self.spot_lights {
                if light.base.is_active()
                    && sphere_to_frustum_fast(light.pos(), light.dist(), frustum)
                    && frustum_to_frustum(light.frustum(), frustum)
                {
                    data.spot_lights.push(handle);
                }
            }
        }

        trace!(
            "Draw data: {} entities, {} map fragments, {} patches, {} trees",
            data.entity_count(),
            data.map_fragments.len(),
            data.terrain_patches.len(),
            data.trees.len()
        );
        data
    }

    fn base_params(&self) -> SceneDrawParams {
        SceneDrawParams {
            ambient: self.ambient,
            fog: self.fog.enabled.then_some(FogParams { color: self.fog.color, start: self.fog.start }),
            ..SceneDrawParams::default()
        }
    }

    /// The ordered passes of one frame
    #[allow(clippy::too_many_lines)]
    pub(super) fn draw_all(
        &mut self,
        ctx: &mut RenderContext<'_>,
        cam: &ParamsCamera,
        data: &mut DrawData,
        settings: OptimizerSettings,
        stats: &mut Stats,
    ) -> EngineResult<()> {
        if let Some(sky) = &mut self.sky {
            sky.draw(ctx.backend, cam)?;
        }
        ctx.backend.clear(ClearFlags::DEPTH, Color::BLACK, 1.0)?;

        let base = self.base_params();

        self.draw_map(ctx, &data.map_fragments, Pass::Base, &base, Some(cam), None)?;
        self.draw_terrain(ctx, &data.terrain_patches, Pass::Base, &base, cam, None)?;

        stats.terrain_patches = data.terrain_patches.len() as u32;
        stats.trees = data.trees.len() as u32;
        stats.map_fragments = data.map_fragments.len() as u32;
        stats.entities[0] = data.entity_count() as u32;
        stats.spot_lights[0] = data.spot_lights.len() as u32;
        stats.point_lights[0] = data.point_lights.len() as u32;

        if settings.entity_occlusion_query {
            self.occlusion_query_entities(ctx, cam, data)?;
        }
        stats.entities[1] = data.entity_count() as u32;

        if settings.light_occlusion_query {
            self.occlusion_query_lights(ctx, cam, data)?;
        }
        stats.spot_lights[1] = data.spot_lights.len() as u32;
        stats.point_lights[1] = data.point_lights.len() as u32;

        data.build_entity_fragments(&self.entities, &self.materials)?;
        if settings.material_sort {
            sort_by_material(&mut data.opaque_fragments);
        }

        self.draw_entities(ctx, &data.opaque_fragments, Pass::Base, &base, Some(cam), None)?;

        let directional = self.directional_light.clone();
        let lit_directional = directional.as_ref().filter(|_| ctx.config.lighting);

        if !data.trees.is_empty() {
            sort_trees_by_prototype(&mut data.trees);
            let fog = self.fog.enabled.then_some(TreeFog { start: self.fog.start, color: self.fog.color });
            let lighting =
                lit_directional.map(|light| TreeLighting { dir_to_light: -light.dir, light_color: light.base.color });
            draw_trees(ctx.backend, &data.trees, true, |prototype, backend| {
                prototype.draw_begin(backend, cam, lighting.as_ref(), fog.as_ref())
            })?;
        }

        if let Some(terrain) = &mut self.terrain {
            let grass_color = lit_directional.map_or(Color::WHITE, |light| {
                let half = (-light.dir + POSITIVE_Y) * 0.5;
                light.base.color.scale_rgb(half.dot(&POSITIVE_Y).clamp(0.0, 1.0))
            });
            terrain.draw_grass(ctx.backend, cam, &grass_color)?;
        }

        stats.passes = 1;
        let (width, height) = ctx.backend.back_buffer_size();
        let sm_enabled = ctx.config.shadow_mapping.enabled;
        let map_lighting = self.map_lighting;

        // Directional light
        if let Some(light) = lit_directional.filter(|l| l.base.is_active()) {
            let mut params = base;
            if sm_enabled && light.base.cast_shadow {
                let (binding, matrix) = self.directional_shadow(ctx, cam, light, settings)?;
                params.shadow_map = binding;
                params.shadow_map_matrix = Some(matrix);
                if light.z_far < cam.z_far() {
                    params.variable_shadow_factor = Some(ShadowFactorRange {
                        start: light.z_far * DIRECTIONAL_LIGHT_SHADOW_ATTEN_START_PERCENT,
                        end: light.z_far,
                    });
                }
                stats.passes += 1;
            }
            let light_ref = Some(LightRef::Directional(light));
            let map_params = if map_lighting.receive_shadow { params } else { params.without_shadow() };
            if map_lighting.use_lighting {
                self.draw_map(ctx, &data.map_fragments, Pass::Directional, &map_params, Some(cam), light_ref)?;
            }
            self.draw_terrain(ctx, &data.terrain_patches, Pass::Directional, &map_params, cam, light_ref)?;
            let lit = self.lit_fragments(&data.opaque_fragments, |_, _| true);
            self.draw_entities(ctx, &lit, Pass::Directional, &params, Some(cam), light_ref)?;
            stats.passes += 1;
        }

        // Point lights
        for &handle in &data.point_lights {
            let Some(light) = self.point_lights.get(handle).cloned() else {
                continue;
            };
            let matrices = cam.matrices();
            let (scissor, fraction) = light.scissor_rect(matrices.view(), matrices.proj(), width, height);
            let mut params = base;
            if sm_enabled && light.base.cast_shadow {
                let (binding, matrix) = self.point_shadow(ctx, &light, fraction, settings)?;
                params.shadow_map = binding;
                params.shadow_map_matrix = Some(matrix);
                stats.passes += 6;
            }
            ctx.backend.set_scissor(Some(scissor));
            let light_ref = Some(LightRef::Point(&light));
            let drawn = self.draw_positional_light(ctx, data, Pass::Point, &params, cam, light_ref, &|b| light.box_in_range(b), &|c, r| {
                light.sphere_in_range(c, r)
            });
            ctx.backend.set_scissor(None);
            drawn?;
            stats.passes += 1;
        }

        // Spot lights
        for &handle in &data.spot_lights {
            let Some(light) = self.spot_lights.get(handle).cloned() else {
                continue;
            };
            let matrices = cam.matrices();
            let (scissor, fraction) = light.scissor_rect(matrices.view(), matrices.proj(), width, height);
            let mut params = base;
            if sm_enabled && light.base.cast_shadow {
                let (binding, matrix) = self.spot_shadow(ctx, &light, fraction, settings)?;
                params.shadow_map = binding;
                params.shadow_map_matrix = Some(matrix);
                stats.passes += 1;
            }
            ctx.backend.set_scissor(Some(scissor));
            let light_ref = Some(LightRef::Spot(&light));
            let drawn = self.draw_positional_light(ctx, data, Pass::Spot, &params, cam, light_ref, &|b| light.box_in_range(b), &|c, r| {
                light.sphere_in_range(c, r)
            });
            ctx.backend.set_scissor(None);
            drawn?;
            stats.passes += 1;
        }

        // Fog
        if self.fog.enabled {
            self.draw_map(ctx, &data.map_fragments, Pass::Fog, &base, Some(cam), None)?;
            self.draw_terrain(ctx, &data.terrain_patches, Pass::Fog, &base, cam, None)?;
            self.draw_entities(ctx, &data.opaque_fragments, Pass::Fog, &base, Some(cam), None)?;
            stats.passes += 1;
        }

        // Translucent, far to near
        sort_far_to_near(&mut data.translucent_fragments, cam.eye_pos());
        for fragment in &data.translucent_fragments {
            self.draw_translucent(ctx, fragment, &base, cam)?;
        }

        if let Some(terrain) = &mut self.terrain {
            terrain.draw_water(ctx.backend, cam)?;
        }
        if let Some(fall) = &mut self.fall {
            fall.draw(ctx.backend, cam)?;
        }
        Ok(())
    }

    /// Opaque fragments of entities that take part in lighting and pass
    /// `in_range`
    fn lit_fragments(
        &self,
        fragments: &[EntityFragment],
        in_range: impl Fn(&Vec3, f32) -> bool,
    ) -> Vec<EntityFragment> {
        fragments
            .iter()
            .filter(|f| {
                let lit = self.entities[f.entity].kind().as_material().is_some_and(|m| m.use_lighting);
                lit && in_range(&self.entities.world_pos(f.entity), self.entities.world_radius(f.entity))
            })
            .copied()
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_positional_light(
        &mut self,
        ctx: &mut RenderContext<'_>,
        data: &DrawData,
        pass: Pass,
        params: &SceneDrawParams,
        cam: &ParamsCamera,
        light: Option<LightRef<'_>>,
        box_in_range: &dyn Fn(&crate::foundation::geometry::BoundingBox) -> bool,
        sphere_in_range: &dyn Fn(&Vec3, f32) -> bool,
    ) -> EngineResult<()> {
        let map_lighting = self.map_lighting;
        let map_params = if map_lighting.receive_shadow { *params } else { params.without_shadow() };
        if map_lighting.use_lighting {
            let fragments: Vec<MapFragmentDesc> =
                data.map_fragments.iter().filter(|f| box_in_range(&f.bounds)).copied().collect();
            self.draw_map(ctx, &fragments, pass, &map_params, Some(cam), light)?;
        }
        let patches: Vec<u32> = self.terrain.as_ref().map_or_else(Vec::new, |terrain| {
            data.terrain_patches.iter().copied().filter(|&p| box_in_range(&terrain.patch_bounds(p))).collect()
        });
        self.draw_terrain(ctx, &patches, pass, &map_params, cam, light)?;
        let lit = self.lit_fragments(&data.opaque_fragments, sphere_in_range);
        self.draw_entities(ctx, &lit, pass, params, Some(cam), light)
    }

    fn draw_translucent(
        &mut self,
        ctx: &mut RenderContext<'_>,
        fragment: &EntityFragment,
        params: &SceneDrawParams,
        cam: &ParamsCamera,
    ) -> EngineResult<()> {
        let Some(material) = fragment.material else {
            let world = self.entities.world_matrix(fragment.entity);
            if let Some(EntityKind::Custom(custom)) = self.entities.get_mut(fragment.entity).map(|e| e.kind_mut()) {
                custom.draw(ctx.backend, &world, cam)?;
            }
            return Ok(());
        };
        let pass = match self.materials.get(material).map(|m| &m.kind) {
            Some(MaterialKind::Wireframe(_)) => Pass::Wireframe,
            Some(_) => Pass::Translucent,
            None => return Err(EngineError::InvalidHandle("material")),
        };
        self.draw_entities(ctx, std::slice::from_ref(fragment), pass, params, Some(cam), None)
    }

    fn draw_heat_entities(
        &mut self,
        ctx: &mut RenderContext<'_>,
        cam: &ParamsCamera,
        entities: &[EntityHandle],
    ) -> EngineResult<()> {
        for &handle in entities {
            let world = self.entities.world_matrix(handle);
            let inv_world = self.entities.inv_world_matrix(handle);
            ctx.services.setup_state_heat(ctx.backend, cam, &world, &inv_world)?;
            let drawn = match self.entities.get_mut(handle).map(|e| e.kind_mut()) {
                Some(EntityKind::Heat(heat)) => heat.draw_geometry(ctx.backend),
                _ => Ok(()),
            };
            ctx.services.unsetup_state(ctx.backend);
            drawn?;
        }
        Ok(())
    }

    // Field-splitting wrappers around the free draw helpers

    #[allow(clippy::too_many_arguments)]
    pub(super) fn draw_map(
        &mut self,
        ctx: &mut RenderContext<'_>,
        fragments: &[MapFragmentDesc],
        pass: Pass,
        params: &SceneDrawParams,
        cam: Option<&ParamsCamera>,
        light: Option<LightRef<'_>>,
    ) -> EngineResult<()> {
        let use_lighting = self.map_lighting.use_lighting;
        let Some(map) = self.map.as_deref_mut() else {
            return Ok(());
        };
        for fragment in fragments {
            let material = self.materials.get(fragment.material).ok_or(EngineError::InvalidHandle("material"))?;
            let entity = EntityDrawParams { use_lighting, ..EntityDrawParams::default() };
            ctx.services.setup_state_material(ctx.backend, ctx.config, pass, params, cam, material, &entity, light)?;
            let drawn = map.draw_fragment_geometry(ctx.backend, fragment);
            ctx.services.unsetup_state(ctx.backend);
            drawn?;
        }
        Ok(())
    }

    fn draw_terrain(
        &mut self,
        ctx: &mut RenderContext<'_>,
        patches: &[u32],
        pass: Pass,
        params: &SceneDrawParams,
        cam: &ParamsCamera,
        light: Option<LightRef<'_>>,
    ) -> EngineResult<()> {
        let Some(terrain) = self.terrain.as_deref_mut() else {
            return Ok(());
        };
        draw_terrain_patches(ctx, terrain, patches, pass, params, cam, light)
    }

    pub(super) fn draw_entities(
        &mut self,
        ctx: &mut RenderContext<'_>,
        fragments: &[EntityFragment],
        pass: Pass,
        params: &SceneDrawParams,
        cam: Option<&ParamsCamera>,
        light: Option<LightRef<'_>>,
    ) -> EngineResult<()> {
        draw_entity_fragments(ctx, &mut self.entities, &self.materials, fragments, pass, params, cam, light)
    }
}

/// Draw material entity fragments one by one, each with its own state
#[allow(clippy::too_many_arguments)]
pub(super) fn draw_entity_fragments(
    ctx: &mut RenderContext<'_>,
    entities: &mut EntityArena,
    materials: &MaterialCollection,
    fragments: &[EntityFragment],
    pass: Pass,
    params: &SceneDrawParams,
    cam: Option<&ParamsCamera>,
    light: Option<LightRef<'_>>,
) -> EngineResult<()> {
    for fragment in fragments {
        let Some(material_handle) = fragment.material else {
            continue;
        };
        let material = materials.get(material_handle).ok_or(EngineError::InvalidHandle("material"))?;
        let handle = fragment.entity;
        let Some(entity) = entities.get(handle).and_then(|e| e.kind().as_material()) else {
            continue;
        };
        let bones = entity.geometry().skinning().map(<[Mat4]>::to_vec);
        let scene_params = if entity.receive_shadow { *params } else { params.without_shadow() };
        let entity_params = EntityDrawParams {
            world_size: entities.world_size(handle),
            world: entities.world_matrix(handle),
            inv_world: entities.inv_world_matrix(handle),
            texture_matrix: entity.texture_matrix,
            team_color: entity.team_color,
            use_lighting: entity.use_lighting,
            bones: bones.as_deref(),
        };

        ctx.services.setup_state_material(ctx.backend, ctx.config, pass, &scene_params, cam, material, &entity_params, light)?;
        let drawn = match entities.get_mut(handle).and_then(|e| e.kind_mut().as_material_mut()) {
            Some(entity) => entity.geometry_mut().draw_fragment_geometry(ctx.backend, fragment.fragment_id, material_handle, cam),
            None => Ok(()),
        };
        ctx.services.unsetup_state(ctx.backend);
        drawn?;
    }
    Ok(())
}

/// Draw terrain patches one by one
#[allow(clippy::too_many_arguments)]
pub(super) fn draw_terrain_patches(
    ctx: &mut RenderContext<'_>,
    terrain: &mut dyn TerrainRenderer,
    patches: &[u32],
    pass: Pass,
    params: &SceneDrawParams,
    cam: &ParamsCamera,
    light: Option<LightRef<'_>>,
) -> EngineResult<()> {
    let entity = EntityDrawParams::default();
    for &patch in patches {
        let material = terrain.patch_material(patch);
        ctx.services.setup_state_material(ctx.backend, ctx.config, pass, params, Some(cam), material, &entity, light)?;
        let drawn = terrain.draw_patch_geometry(ctx.backend, patch);
        ctx.services.unsetup_state(ctx.backend);
        drawn?;
    }
    Ok(())
}

/// Draw tree instances in runs sharing a prototype. `trees` must already be
/// grouped; `begin` binds the prototype for each run.
pub(super) fn draw_trees(
    backend: &mut dyn RenderBackend,
    trees: &[TreeDrawDesc],
    with_inverse: bool,
    mut begin: impl FnMut(&dyn TreePrototype, &mut dyn RenderBackend) -> EngineResult<()>,
) -> EngineResult<()> {
    for run in trees.chunk_by(|a, b| a.prototype_key() == b.prototype_key()) {
        let prototype = run[0].prototype.as_ref();
        begin(prototype, backend)?;
        for tree in run {
            let inv = with_inverse.then_some(&tree.inv_world);
            prototype.draw_tree(backend, tree.kind, &tree.world, inv, &tree.color)?;
        }
        prototype.draw_end(backend)?;
    }
    Ok(())
}

/// Texture offsets scrolling the heat-haze perturbation map: two fixed
/// points drift away from the texture center
pub fn perturbation_offset(time: f32) -> Vec4 {
    let drift = |p: Vec2| {
        let dir = (p - Vec2::new(0.5, 0.5)).normalize() * time * 0.1;
        Vec2::new(dir.x - dir.x.floor(), dir.y - dir.y.floor())
    };
    let a = drift(Vec2::new(0.2, 0.9));
    let b = drift(Vec2::new(0.85, 0.35));
    Vec4::new(a.x, a.y, b.x, b.y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::foundation::geometry::{BoundingBox, Frustum};
    use crate::foundation::math::Quat;
    use crate::render::backend::MeshId;
    use crate::render::recording::{Call, RecordingBackend};
    use crate::render::services::EngineServices;
    use crate::scene::camera::Camera;
    use crate::scene::entity::test_support::material_kind;
    use crate::scene::light::{PointLight, SpotLight};
    use crate::scene::material::{Material, TerrainParams};
    use crate::scene::scene::MapLighting;
    use approx::assert_relative_eq;

    fn scene_with_entities() -> (Scene, EntityHandle, EntityHandle) {
        let mut scene = Scene::new(BoundingBox::new(Vec3::repeat(-100.0), Vec3::repeat(100.0)));
        let rock = scene.materials_mut().register(Material::opaque("Rock"));
        let inside = scene.create_entity(material_kind(vec![rock]));
        scene.set_entity_pos(inside, Vec3::new(0.0, 0.0, 10.0)).unwrap();
        scene.set_entity_radius(inside, 1.0).unwrap();
        let outside = scene.create_entity(material_kind(vec![rock]));
        scene.set_entity_pos(outside, Vec3::new(0.0, 0.0, -50.0)).unwrap();
        scene.set_entity_radius(outside, 1.0).unwrap();
        let cam = scene.create_camera(Camera::with_orientation(Vec3::zeros(), Quat::identity(), 0.5, 100.0, 1.0, 4.0 / 3.0));
        scene.set_active_camera(Some(cam)).unwrap();
        (scene, inside, outside)
    }

    #[test]
    fn test_draw_data_holds_only_entities_in_frustum() {
        let (scene, inside, outside) = scene_with_entities();
        let config = EngineConfig::default();
        let mut backend = RecordingBackend::new(640, 480);
        let mut services = EngineServices::new(&config).unwrap();
        let ctx = RenderContext { backend: &mut backend, services: &mut services, config: &config, now: 0.0, dt: 0.016 };

        let cam = scene.camera(scene.active_camera().unwrap()).unwrap().params().clone();
        let data = scene.create_draw_data(&ctx, &cam, OptimizerSettings::default());
        assert_eq!(data.material_entities, vec![inside]);
        assert!(!data.material_entities.contains(&outside));
    }

    #[test]
    fn test_frame_counts_light_passes() {
        let (mut scene, _, _) = scene_with_entities();
        scene.add_point_light(PointLight::new(Color::WHITE, Vec3::new(0.0, 0.0, 10.0), 5.0));
        let mut spot = SpotLight::new(Color::WHITE, Vec3::new(0.0, 5.0, 10.0), -POSITIVE_Y, 10.0, 1.0);
        spot.base.cast_shadow = true;
        scene.add_spot_light(spot);

        let mut config = EngineConfig::default();
        config.postprocessing.enabled = false;
        let mut backend = RecordingBackend::new(640, 480);
        let mut services = EngineServices::new(&config).unwrap();
        let mut ctx = RenderContext { backend: &mut backend, services: &mut services, config: &config, now: 0.0, dt: 0.016 };
        let mut stats = Stats::default();
        scene.draw(&mut ctx, &mut stats).unwrap();

        // base, point, spot shadow map, spot
        assert_eq!(stats.passes, 4);
        assert_eq!(stats.entities, [1, 1]);
        assert_eq!(stats.point_lights, [1, 1]);
        assert_eq!(stats.spot_lights, [1, 1]);
        assert!(stats.main_shaders > 0);
        assert_eq!(backend.count(|c| matches!(c, Call::SetScissor(Some(_)))), 2);
        assert_eq!(backend.render_target().0, RenderTarget::BackBuffer);
    }

    struct SinglePatch {
        material: Material,
    }

    impl SinglePatch {
        fn new() -> Self {
            let textures = std::array::from_fn(|i| format!("layer{i}.dds"));
            Self { material: Material::terrain(TerrainParams { textures, ..TerrainParams::default() }) }
        }
    }

    impl TerrainRenderer for SinglePatch {
        fn visible_patches(&self, _: &Frustum, out: &mut Vec<u32>) {
            out.push(0);
        }

        fn patch_bounds(&self, _: u32) -> BoundingBox {
            BoundingBox::new(Vec3::new(-5.0, -1.0, 5.0), Vec3::new(5.0, 0.0, 15.0))
        }

        fn patch_material(&self, _: u32) -> &Material {
            &self.material
        }

        fn draw_patch_geometry(&mut self, backend: &mut dyn RenderBackend, patch: u32) -> EngineResult<()> {
            backend.draw_mesh(MeshId(7), patch)?;
            Ok(())
        }

        fn trees_in_frustum(&self, _: &ParamsCamera, _: bool, _: &mut Vec<TreeDrawDesc>) {}

        fn trees_casting_directional_shadow(&self, _: &BoundingBox, _: &Vec3, _: &mut Vec<TreeDrawDesc>) {}

        fn draw_grass(&mut self, _: &mut dyn RenderBackend, _: &ParamsCamera, _: &Color) -> EngineResult<()> {
            Ok(())
        }

        fn draw_water(&mut self, _: &mut dyn RenderBackend, _: &ParamsCamera) -> EngineResult<()> {
            Ok(())
        }

        fn ray_collision(&self, _: &Vec3, _: &Vec3, _: f32) -> Option<f32> {
            None
        }
    }

    /// Whether any terrain draw of one frame sampled a shadow map
    fn terrain_samples_shadow(receive_shadow: bool) -> bool {
        let mut scene = Scene::new(BoundingBox::new(Vec3::repeat(-100.0), Vec3::repeat(100.0)));
        let cam = scene.create_camera(Camera::with_orientation(Vec3::zeros(), Quat::identity(), 0.5, 100.0, 1.0, 4.0 / 3.0));
        scene.set_active_camera(Some(cam)).unwrap();
        scene.set_terrain(Some(Box::new(SinglePatch::new())));
        scene.set_map_lighting(MapLighting { receive_shadow, ..MapLighting::default() });
        let mut spot = SpotLight::new(Color::WHITE, Vec3::new(0.0, 5.0, 10.0), -POSITIVE_Y, 10.0, 1.0);
        spot.base.cast_shadow = true;
        scene.add_spot_light(spot);

        let mut config = EngineConfig::default();
        config.postprocessing.enabled = false;
        let mut backend = RecordingBackend::new(640, 480);
        let mut services = EngineServices::new(&config).unwrap();
        let mut ctx = RenderContext { backend: &mut backend, services: &mut services, config: &config, now: 0.0, dt: 0.016 };
        scene.draw(&mut ctx, &mut Stats::default()).unwrap();

        let terrain_blocks: Vec<_> =
            backend.param_blocks().filter(|p| p.get(ShaderParam::TerrainTexScale).is_some()).collect();
        assert!(terrain_blocks.len() >= 2, "terrain drawn in base and spot passes");
        terrain_blocks.iter().any(|p| p.get(ShaderParam::ShadowMapTexture).is_some())
    }

    #[test]
    fn test_terrain_shadow_follows_map_receive_flag() {
        assert!(terrain_samples_shadow(true));
        assert!(!terrain_samples_shadow(false));
    }

    #[test]
    fn test_frame_without_camera_draws_nothing() {
        let (mut scene, _, _) = scene_with_entities();
        scene.set_active_camera(None).unwrap();
        let config = EngineConfig::default();
        let mut backend = RecordingBackend::new(640, 480);
        let mut services = EngineServices::new(&config).unwrap();
        let mut ctx = RenderContext { backend: &mut backend, services: &mut services, config: &config, now: 0.0, dt: 0.016 };
        let mut stats = Stats::default();
        scene.draw(&mut ctx, &mut stats).unwrap();
        assert_eq!(stats.passes, 0);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_perturbation_offset_wraps() {
        assert_eq!(perturbation_offset(0.0), Vec4::zeros());
        for t in [1.0, 17.0, 1234.5] {
            let o = perturbation_offset(t);
            assert!(o.iter().all(|v| (0.0..1.0).contains(v)));
        }
        let o = perturbation_offset(1.0);
        let dir = Vec2::new(-0.3, 0.4).normalize() * 0.1;
        assert_relative_eq!(o.x, dir.x - dir.x.floor(), epsilon = 1e-6);
        assert_relative_eq!(o.y, dir.y, epsilon = 1e-6);
    }
}
