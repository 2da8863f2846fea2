//! Shadow-map rendering for each light type
//!
//! Every function renders the casters into a pooled surface, restores the
//! previous render target and returns the binding together with the matrix
//! the light passes project world positions with.

use log::debug;

use super::Scene;
use crate::engine::RenderContext;
use crate::error::EngineResult;
use crate::foundation::collections::EntityHandle;
use crate::foundation::math::{Color, Mat4};
use crate::render::backend::{ClearFlags, CubeFace, RenderTarget};
use crate::render::optimizer::OptimizerSettings;
use crate::render::services::{find_directional_view_proj, shadow_map_bias_matrix, SceneDrawParams, ShadowMapBinding};
use crate::render::shader_features::Pass;
use crate::scene::camera::ParamsCamera;
use crate::scene::collaborators::MapFragmentDesc;
use crate::scene::draw_data::{
    push_entity_fragments, sort_by_material, sort_map_by_material, sort_trees_by_prototype, DrawData, EntityFragment,
};
use crate::scene::light::{DirectionalLight, LightRef, PointLight, SpotLight};

use super::draw::draw_trees;

impl Scene {
    /// Opaque fragments of the shadow-casting material entities in `found`
    fn shadow_casting_fragments(
        &self,
        found: &[EntityHandle],
        settings: OptimizerSettings,
    ) -> EngineResult<Vec<EntityFragment>> {
        let mut fragments = Vec::new();
        for &handle in found {
            if self.entities[handle].kind().as_material().is_some_and(|m| m.cast_shadow) {
                push_entity_fragments(&self.entities, &self.materials, handle, &mut fragments, None)?;
            }
        }
        if settings.material_sort {
            sort_by_material(&mut fragments);
        }
        Ok(fragments)
    }

    fn draw_shadow_casters(
        &mut self,
        ctx: &mut RenderContext<'_>,
        map_fragments: &[MapFragmentDesc],
        fragments: &[EntityFragment],
        params: &SceneDrawParams,
        cam: Option<&ParamsCamera>,
        light: LightRef<'_>,
    ) -> EngineResult<()> {
        ctx.backend.clear(ClearFlags::TARGET | ClearFlags::DEPTH, Color::WHITE, 1.0)?;
        self.draw_map(ctx, map_fragments, Pass::ShadowMap, params, cam, Some(light))?;
        self.draw_entities(ctx, fragments, Pass::ShadowMap, params, cam, Some(light))
    }

    /// Render the shadow map of a spot light covering `size_factor` of the
    /// screen
    pub(super) fn spot_shadow(
        &mut self,
        ctx: &mut RenderContext<'_>,
        light: &SpotLight,
        size_factor: f32,
        settings: OptimizerSettings,
    ) -> EngineResult<(ShadowMapBinding, Mat4)> {
        let mut map_fragments = Vec::new();
        if self.map_lighting.cast_shadow {
            if let Some(map) = &self.map {
                map.fragments_in_spot_light(light, &mut map_fragments);
            }
            if settings.material_sort {
                sort_map_by_material(&mut map_fragments);
            }
        }

        let mut found = Vec::new();
        self.octree.find_spot_light(&self.entities, light, &mut found);
        let fragments = self.shadow_casting_fragments(&found, settings)?;

        let surface = ctx.services.spot_shadow_map(ctx.backend, size_factor)?;
        let depth = ctx.services.shadow_depth_stencil(ctx.backend)?;
        debug!("Spot shadow map {}x{} for screen fraction {size_factor:.3}", surface.width, surface.height);

        let previous = ctx.backend.render_target();
        ctx.backend.set_render_target(RenderTarget::Texture(surface.id), Some(depth))?;
        let drawn = self.draw_shadow_casters(
            ctx,
            &map_fragments,
            &fragments,
            &SceneDrawParams::default(),
            Some(light.camera()),
            LightRef::Spot(light),
        );
        ctx.backend.set_render_target(previous.0, previous.1)?;
        drawn?;

        let matrix = shadow_map_bias_matrix(ctx.config.shadow_mapping.epsilon) * light.camera().matrices().view_proj();
        Ok((ShadowMapBinding::Flat(surface), matrix))
    }

    /// Render the six faces of a point light's cube shadow map. The returned
    /// matrix is identity: the cube map is sampled by light-relative
    /// direction.
    pub(super) fn point_shadow(
        &mut self,
        ctx: &mut RenderContext<'_>,
        light: &PointLight,
        size_factor: f32,
        settings: OptimizerSettings,
    ) -> EngineResult<(ShadowMapBinding, Mat4)> {
        let mut map_fragments: [Vec<MapFragmentDesc>; 6] = Default::default();
        if self.map_lighting.cast_shadow {
            if let Some(map) = &self.map {
                map.fragments_in_point_light(light, &mut map_fragments);
            }
            if settings.material_sort {
                map_fragments.iter_mut().for_each(|f| sort_map_by_material(f));
            }
        }

        let mut found: [Vec<EntityHandle>; 6] = Default::default();
        self.octree.find_point_light(&self.entities, light, &mut found);
        let mut fragments = Vec::with_capacity(6);
        for face in &found {
            fragments.push(self.shadow_casting_fragments(face, settings)?);
        }

        let surface = ctx.services.point_shadow_map(ctx.backend, size_factor)?;
        let depth = ctx.services.shadow_depth_stencil(ctx.backend)?;
        debug!("Point shadow map {0}x{0} for screen fraction {size_factor:.3}", surface.width);

        let previous = ctx.backend.render_target();
        let params = SceneDrawParams::default();
        let mut drawn = Ok(());
        for (i, face) in CubeFace::ALL.into_iter().enumerate() {
            drawn = ctx
                .backend
                .set_render_target(RenderTarget::CubeFace(surface.id, face), Some(depth))
                .map_err(Into::into)
                .and_then(|()| {
                    self.draw_shadow_casters(
                        ctx,
                        &map_fragments[i],
                        &fragments[i],
                        &params,
                        Some(&light.cameras()[i]),
                        LightRef::Point(light),
                    )
                });
            if drawn.is_err() {
                break;
            }
        }
        ctx.backend.set_render_target(previous.0, previous.1)?;
        drawn?;

        Ok((ShadowMapBinding::Cube(surface), Mat4::identity()))
    }

    /// Render the directional shadow map covering the camera's view, cut at
    /// the light's shadow distance when that is nearer than the far plane
    pub(super) fn directional_shadow(
        &mut self,
        ctx: &mut RenderContext<'_>,
        cam: &ParamsCamera,
        light: &DirectionalLight,
        settings: OptimizerSettings,
    ) -> EngineResult<(ShadowMapBinding, Mat4)> {
        let clamped;
        let shadow_cam = if light.z_far < cam.z_far() {
            let mut c = cam.clone();
            c.set_z_far(light.z_far);
            clamped = c;
            &clamped
        } else {
            cam
        };
        let cam_box = *shadow_cam.matrices().frustum_box();

        let mut map_fragments = Vec::new();
        if self.map_lighting.cast_shadow {
            if let Some(map) = &self.map {
                map.fragments_in_directional_light(&cam_box, &light.dir, &mut map_fragments);
            }
            if settings.material_sort {
                sort_map_by_material(&mut map_fragments);
            }
        }

        let mut found = Vec::new();
        self.octree.find_directional_light(&self.entities, &cam_box, &light.dir, &mut found);
        let mut casters = DrawData::new();
        casters.classify_entities(&self.entities, &found);
        let fragments = self.shadow_casting_fragments(&casters.material_entities, settings)?;
        let mut trees = casters.trees;
        if let Some(terrain) = &self.terrain {
            terrain.trees_casting_directional_shadow(&cam_box, &light.dir, &mut trees);
        }
        sort_trees_by_prototype(&mut trees);

        let view_proj = find_directional_view_proj(&cam_box, &light.dir);
        let surface = ctx.services.directional_shadow_map(ctx.backend)?;
        let depth = ctx.services.shadow_depth_stencil(ctx.backend)?;

        let previous = ctx.backend.render_target();
        ctx.backend.set_render_target(RenderTarget::Texture(surface.id), Some(depth))?;
        let params = SceneDrawParams { shadow_map_matrix: Some(view_proj), ..SceneDrawParams::default() };
        let drawn = self
            .draw_shadow_casters(ctx, &map_fragments, &fragments, &params, None, LightRef::Directional(light))
            .and_then(|()| {
                draw_trees(ctx.backend, &trees, false, |prototype, backend| {
                    prototype.draw_begin_shadow_map(backend, &view_proj, &light.dir)
                })
            });
        ctx.backend.set_render_target(previous.0, previous.1)?;
        drawn?;

        let matrix = shadow_map_bias_matrix(ctx.config.shadow_mapping.epsilon) * view_proj;
        Ok((ShadowMapBinding::Flat(surface), matrix))
    }
}
