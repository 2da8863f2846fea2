//! Hardware occlusion queries thinning the visible set
//!
//! Entities and light volumes are drawn as icospheres with depth test only;
//! anything with zero passing samples is dropped unless the eye is inside
//! its sphere, where the proxy is clipped away by the near plane.

use log::trace;

use super::Scene;
use crate::engine::RenderContext;
use crate::error::EngineResult;
use crate::foundation::geometry::point_in_sphere;
use crate::foundation::math::{inverse_or_identity, look_at_lh, Mat4, Vec3, POSITIVE_Y, POSITIVE_Z};
use crate::render::backend::{BackendResult, BuiltinMesh, RenderBackend};
use crate::scene::camera::ParamsCamera;
use crate::scene::draw_data::DrawData;

/// Above this many visible entities the queries cost more than they save
pub const OCCLUSION_QUERY_MAX_ENTITIES: usize = 50;
/// Above this many visible lights the queries cost more than they save
pub const OCCLUSION_QUERY_MAX_LIGHTS: usize = 50;
/// Angular diameter of the sun proxy in radians
const SUN_ANGULAR_SIZE: f32 = 0.05;
/// Samples above which the sun counts as visible
const SUN_VISIBLE_MIN_SAMPLES: u32 = 16;

fn run_query(backend: &mut dyn RenderBackend, mesh: BuiltinMesh) -> BackendResult<u32> {
    backend.begin_occlusion_query()?;
    backend.draw_builtin(mesh)?;
    backend.end_occlusion_query()
}

/// Samples of `mesh` passing the depth test under `world_view_proj`
fn occlusion_query(ctx: &mut RenderContext<'_>, world_view_proj: &Mat4, mesh: BuiltinMesh) -> EngineResult<u32> {
    ctx.services.setup_state_occlusion(ctx.backend, world_view_proj)?;
    let samples = run_query(ctx.backend, mesh);
    ctx.services.unsetup_state(ctx.backend);
    Ok(samples?)
}

/// Visibility of a sphere proxy as seen by `cam`
fn sphere_visible(ctx: &mut RenderContext<'_>, cam: &ParamsCamera, center: &Vec3, radius: f32) -> EngineResult<bool> {
    let world_view_proj =
        cam.matrices().view_proj() * Mat4::new_translation(center) * Mat4::new_scaling(radius);
    let samples = occlusion_query(ctx, &world_view_proj, BuiltinMesh::Icosphere)?;
    Ok(samples > 0 || point_in_sphere(cam.eye_pos(), center, radius + cam.z_near()))
}

impl Scene {
    /// Drop occluded material, custom and heat entities
    pub(super) fn occlusion_query_entities(
        &self,
        ctx: &mut RenderContext<'_>,
        cam: &ParamsCamera,
        data: &mut DrawData,
    ) -> EngineResult<()> {
        if data.entity_count() > OCCLUSION_QUERY_MAX_ENTITIES {
            return Ok(());
        }
        ctx.backend.restore_default_state();
        let before = data.entity_count();
        for list in [&mut data.material_entities, &mut data.custom_entities, &mut data.heat_entities] {
            let mut kept = Vec::with_capacity(list.len());
            for &handle in list.iter() {
                let center = self.entities.world_pos(handle);
                let radius = self.entities.world_radius(handle);
                if sphere_visible(ctx, cam, &center, radius)? {
                    kept.push(handle);
                }
            }
            *list = kept;
        }
        trace!("Entity occlusion: {before} -> {}", data.entity_count());
        Ok(())
    }

    /// Drop spot and point lights whose range is fully occluded
    pub(super) fn occlusion_query_lights(
        &self,
        ctx: &mut RenderContext<'_>,
        cam: &ParamsCamera,
        data: &mut DrawData,
    ) -> EngineResult<()> {
        if data.spot_lights.len() + data.point_lights.len() > OCCLUSION_QUERY_MAX_LIGHTS {
            return Ok(());
        }
        ctx.backend.restore_default_state();

        let mut spots = Vec::with_capacity(data.spot_lights.len());
        for &handle in &data.spot_lights {
            if let Some(light) = self.spot_lights.get(handle) {
                if sphere_visible(ctx, cam, light.pos(), light.dist())? {
                    spots.push(handle);
                }
            }
        }
        data.spot_lights = spots;

        let mut points = Vec::with_capacity(data.point_lights.len());
        for &handle in &data.point_lights {
            if let Some(light) = self.point_lights.get(handle) {
                if sphere_visible(ctx, cam, light.pos(), light.dist())? {
                    points.push(handle);
                }
            }
        }
        data.point_lights = points;
        Ok(())
    }
}

/// 1 when a small quad at the far end of the view in the sun's direction
/// passes enough samples, 0 otherwise
pub(super) fn query_sun_visible_factor(
    ctx: &mut RenderContext<'_>,
    cam: &ParamsCamera,
    sun_dir: &Vec3,
) -> EngineResult<f32> {
    let radius = cam.z_far() * 0.99;
    let delta = radius * (SUN_ANGULAR_SIZE * 0.5).tan();
    let up = if sun_dir.normalize().dot(&POSITIVE_Y).abs() > 0.99 { POSITIVE_Z } else { POSITIVE_Y };
    let orientation = inverse_or_identity(&look_at_lh(&Vec3::zeros(), sun_dir, &up));
    let world = Mat4::new_translation(cam.eye_pos())
        * orientation
        * Mat4::new_translation(&Vec3::new(0.0, 0.0, radius))
        * Mat4::new_scaling(delta);
    let world_view_proj = cam.matrices().view_proj() * world;

    ctx.backend.restore_default_state();
    let samples = occlusion_query(ctx, &world_view_proj, BuiltinMesh::Quad)?;
    Ok(if samples > SUN_VISIBLE_MIN_SAMPLES { 1.0 } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::foundation::geometry::BoundingBox;
    use crate::foundation::math::{transform_coord, Color};
    use crate::render::optimizer::OptimizerSettings;
    use crate::render::recording::{Call, RecordingBackend};
    use crate::render::services::EngineServices;
    use crate::scene::camera::Camera;
    use crate::scene::entity::test_support::material_kind;
    use crate::scene::light::PointLight;
    use crate::scene::material::Material;
    use crate::foundation::math::Quat;

    fn scene_with_camera() -> Scene {
        let mut scene = Scene::new(BoundingBox::new(Vec3::repeat(-100.0), Vec3::repeat(100.0)));
        let cam = scene.create_camera(Camera::with_orientation(Vec3::zeros(), Quat::identity(), 0.5, 100.0, 1.0, 1.0));
        scene.set_active_camera(Some(cam)).unwrap();
        scene
    }

    fn cam_params(scene: &Scene) -> ParamsCamera {
        scene.camera(scene.active_camera().unwrap()).unwrap().params().clone()
    }

    #[test]
    fn test_occluded_entity_dropped_unless_eye_inside() {
        let mut scene = scene_with_camera();
        let rock = scene.materials_mut().register(Material::opaque("Rock"));
        let far = scene.create_entity(material_kind(vec![rock]));
        scene.set_entity_pos(far, Vec3::new(0.0, 0.0, 10.0)).unwrap();
        scene.set_entity_radius(far, 1.0).unwrap();
        let around_eye = scene.create_entity(material_kind(vec![rock]));
        scene.set_entity_pos(around_eye, Vec3::new(0.0, 0.0, 0.2)).unwrap();
        scene.set_entity_radius(around_eye, 0.5).unwrap();

        let config = EngineConfig::default();
        let mut backend = RecordingBackend::new(640, 480);
        backend.set_default_occlusion_result(0);
        let mut services = EngineServices::new(&config).unwrap();
        let mut ctx = RenderContext { backend: &mut backend, services: &mut services, config: &config, now: 0.0, dt: 0.016 };

        let cam = cam_params(&scene);
        let mut data = scene.create_draw_data(&ctx, &cam, OptimizerSettings::default());
        assert_eq!(data.material_entities.len(), 2);
        scene.occlusion_query_entities(&mut ctx, &cam, &mut data).unwrap();
        assert_eq!(data.material_entities, vec![around_eye]);
    }

    #[test]
    fn test_too_many_entities_skips_queries() {
        let mut scene = scene_with_camera();
        let rock = scene.materials_mut().register(Material::opaque("Rock"));
        for i in 0..=OCCLUSION_QUERY_MAX_ENTITIES {
            let e = scene.create_entity(material_kind(vec![rock]));
            scene.set_entity_pos(e, Vec3::new(0.0, 0.0, 5.0 + i as f32)).unwrap();
            scene.set_entity_radius(e, 0.5).unwrap();
        }

        let config = EngineConfig::default();
        let mut backend = RecordingBackend::new(640, 480);
        let mut services = EngineServices::new(&config).unwrap();
        let cam = cam_params(&scene);
        let mut ctx = RenderContext { backend: &mut backend, services: &mut services, config: &config, now: 0.0, dt: 0.016 };
        let mut data = scene.create_draw_data(&ctx, &cam, OptimizerSettings::default());
        scene.occlusion_query_entities(&mut ctx, &cam, &mut data).unwrap();
        assert_eq!(data.entity_count(), OCCLUSION_QUERY_MAX_ENTITIES + 1);
        assert_eq!(backend.count(|c| matches!(c, Call::BeginOcclusionQuery)), 0);
    }

    #[test]
    fn test_occluded_light_dropped() {
        let mut scene = scene_with_camera();
        let far = scene.add_point_light(PointLight::new(Color::WHITE, Vec3::new(0.0, 0.0, 30.0), 5.0));
        let near = scene.add_point_light(PointLight::new(Color::WHITE, Vec3::new(0.0, 0.0, 3.0), 5.0));

        let config = EngineConfig::default();
        let mut backend = RecordingBackend::new(640, 480);
        backend.set_default_occlusion_result(0);
        let mut services = EngineServices::new(&config).unwrap();
        let cam = cam_params(&scene);
        let mut ctx = RenderContext { backend: &mut backend, services: &mut services, config: &config, now: 0.0, dt: 0.016 };
        let mut data = scene.create_draw_data(&ctx, &cam, OptimizerSettings::default());
        assert_eq!(data.point_lights.len(), 2);
        scene.occlusion_query_lights(&mut ctx, &cam, &mut data).unwrap();
        assert_eq!(data.point_lights, vec![near]);
        assert!(!data.point_lights.contains(&far));
    }

    #[test]
    fn test_sun_visibility_threshold() {
        let scene = scene_with_camera();
        let cam = cam_params(&scene);
        let config = EngineConfig::default();
        let mut backend = RecordingBackend::new(640, 480);
        backend.push_occlusion_results([17, 16]);
        let mut services = EngineServices::new(&config).unwrap();
        let mut ctx = RenderContext { backend: &mut backend, services: &mut services, config: &config, now: 0.0, dt: 0.016 };

        let sun = Vec3::new(0.0, 0.3, 1.0).normalize();
        assert_eq!(query_sun_visible_factor(&mut ctx, &cam, &sun).unwrap(), 1.0);
        assert_eq!(query_sun_visible_factor(&mut ctx, &cam, &sun).unwrap(), 0.0);
    }

    #[test]
    fn test_sun_proxy_lies_along_sun_direction() {
        let sun = Vec3::new(0.3, 0.5, 0.8).normalize();
        let orientation = inverse_or_identity(&look_at_lh(&Vec3::zeros(), &sun, &POSITIVE_Y));
        let p = transform_coord(&orientation, &Vec3::new(0.0, 0.0, 10.0));
        approx::assert_relative_eq!(p, sun * 10.0, epsilon = 1e-4);
    }
}
