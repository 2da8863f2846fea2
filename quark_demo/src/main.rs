//! Headless Quark Engine demo
//!
//! Builds a small arena (ground map, orbiting ships, a heat-haze exhaust,
//! sun, spot and point lights, tone mapping, bloom and lens flare) and runs
//! it for a fixed number of frames against the recording backend, logging
//! the per-frame statistics line.
//!
//! Usage: `quark_demo [engine.toml|engine.ron]`

use std::f32::consts::TAU;

use quark_engine::config::{Config, ConfigError, ConfigOption, EngineConfig};
use quark_engine::foundation::collections::{CameraHandle, EntityHandle, MaterialHandle, SceneHandle};
use quark_engine::foundation::geometry::{box_to_frustum_fast, ray_to_plane, ray_to_sphere, BoundingBox, Frustum, Plane};
use quark_engine::foundation::logging::{self, error, info, LevelFilter};
use quark_engine::foundation::math::{Color, Quat, Vec3, POSITIVE_Y};
use quark_engine::foundation::time::FrameTimer;
use quark_engine::render::backend::{BuiltinMesh, ClearFlags, MeshId, RenderBackend};
use quark_engine::render::postprocess::{PpBloom, PpLensFlare, PpToneMapping};
use quark_engine::render::RecordingBackend;
use quark_engine::scene::camera::CameraMode;
use quark_engine::scene::collaborators::{MapFragmentDesc, MapRenderer, Sky};
use quark_engine::scene::entity::{EntityBehavior, FragmentGeometry, HeatDraw, MaterialEntity};
use quark_engine::scene::material::CollisionType;
use quark_engine::scene::{Camera, DirectionalLight, EntityKind, Material, ParamsCamera, PointLight, SpotLight};
use quark_engine::{Engine, EngineError, EngineResult};
use thiserror::Error;

// Run settings
const FRAME_COUNT: u32 = 600;
const FRAME_TIME: f32 = 1.0 / 60.0;
const INFO_PERIOD: u32 = 60;
const SCREEN_WIDTH: u32 = 1280;
const SCREEN_HEIGHT: u32 = 720;

// Arena
const ARENA_HALF_SIZE: f32 = 100.0;
const NUM_SHIPS: usize = 24;
const SHIP_ORBIT_MIN: f32 = 10.0;
const SHIP_ORBIT_STEP: f32 = 2.5;
const SHIP_SPEED: f32 = 0.4;
const CAMERA_DIST: f32 = 45.0;

#[derive(Error, Debug)]
enum DemoError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Ship hull drawn as one mesh subset per material
struct ShipGeometry {
    mesh: MeshId,
    materials: Vec<MaterialHandle>,
}

impl EntityBehavior for ShipGeometry {
    fn ray_collision(&self, _collision: CollisionType, orig: &Vec3, dir: &Vec3) -> Option<f32> {
        ray_to_sphere(orig, dir, &Vec3::zeros(), 1.0)
    }
}

impl FragmentGeometry for ShipGeometry {
    fn fragment_count(&self) -> usize {
        self.materials.len()
    }

    fn fragment(&self, index: usize) -> (u32, MaterialHandle) {
        (index as u32, self.materials[index])
    }

    fn draw_fragment_geometry(
        &mut self,
        backend: &mut dyn RenderBackend,
        fragment_id: u32,
        _material: MaterialHandle,
        _cam: Option<&ParamsCamera>,
    ) -> EngineResult<()> {
        backend.draw_mesh(self.mesh, fragment_id)?;
        Ok(())
    }
}

/// Hot exhaust bending the light behind a ship
struct Exhaust;

impl EntityBehavior for Exhaust {}

impl HeatDraw for Exhaust {
    fn draw_geometry(&mut self, backend: &mut dyn RenderBackend) -> EngineResult<()> {
        backend.draw_builtin(BuiltinMesh::Icosphere)?;
        Ok(())
    }
}

/// Flat ground plane as a single map fragment
struct GroundMap {
    mesh: MeshId,
    fragment: MapFragmentDesc,
}

impl MapRenderer for GroundMap {
    fn fragments_in_frustum(&self, frustum: &Frustum, out: &mut Vec<MapFragmentDesc>) {
        if box_to_frustum_fast(&self.fragment.bounds, frustum) {
            out.push(self.fragment);
        }
    }

    fn fragments_in_point_light(&self, light: &PointLight, out: &mut [Vec<MapFragmentDesc>; 6]) {
        for (face, cam) in out.iter_mut().zip(light.cameras()) {
            self.fragments_in_frustum(cam.matrices().frustum(), face);
        }
    }

    fn fragments_in_directional_light(&self, _cam_box: &BoundingBox, _light_dir: &Vec3, out: &mut Vec<MapFragmentDesc>) {
        out.push(self.fragment);
    }

    fn draw_fragment_geometry(&mut self, backend: &mut dyn RenderBackend, fragment: &MapFragmentDesc) -> EngineResult<()> {
        backend.draw_mesh(self.mesh, fragment.fragment)?;
        Ok(())
    }

    fn ray_collision(&self, _collision: CollisionType, orig: &Vec3, dir: &Vec3) -> Option<f32> {
        ray_to_plane(orig, dir, &Plane::new(POSITIVE_Y, 0.0))
    }
}

/// Sky that clears to a flat color and reports the sun
struct ClearSky {
    color: Color,
    sun_dir: Vec3,
}

impl Sky for ClearSky {
    fn draw(&mut self, backend: &mut dyn RenderBackend, _cam: &ParamsCamera) -> EngineResult<()> {
        backend.clear(ClearFlags::TARGET, self.color, 1.0)?;
        Ok(())
    }

    fn sun_dir(&self) -> Option<Vec3> {
        Some(self.sun_dir)
    }
}

struct Ship {
    entity: EntityHandle,
    orbit: f32,
    phase: f32,
    height: f32,
}

struct DemoApp {
    engine: Engine<RecordingBackend>,
    scene: SceneHandle,
    camera: CameraHandle,
    ships: Vec<Ship>,
    time: f32,
}

impl DemoApp {
    fn new(config: EngineConfig) -> Result<Self, DemoError> {
        let mut engine = Engine::new(RecordingBackend::new(SCREEN_WIDTH, SCREEN_HEIGHT), config)?;
        let scene = engine.create_scene(BoundingBox::new(Vec3::repeat(-ARENA_HALF_SIZE), Vec3::repeat(ARENA_HALF_SIZE)));
        engine.set_active_scene(Some(scene))?;

        let ship_mesh = engine.backend_mut().load_mesh("ship").map_err(EngineError::from)?;
        let ground_mesh = engine.backend_mut().load_mesh("ground").map_err(EngineError::from)?;

        let scene_ref = engine.scene_mut(scene).ok_or(EngineError::NoActiveScene)?;
        let materials = scene_ref.materials_mut();
        let hull = materials.register(Material::opaque_textured("Hull", "hull_diffuse"));
        let canopy = materials.register(Material::translucent("Canopy"));
        let ground = materials.register(Material::opaque_textured("Ground", "ground_diffuse"));

        scene_ref.set_map(Some(Box::new(GroundMap {
            mesh: ground_mesh,
            fragment: MapFragmentDesc {
                fragment: 0,
                material: ground,
                bounds: BoundingBox::new(Vec3::new(-ARENA_HALF_SIZE, -1.0, -ARENA_HALF_SIZE), Vec3::new(ARENA_HALF_SIZE, 0.0, ARENA_HALF_SIZE)),
            },
        })));

        let sun_dir = Vec3::new(-0.4, 0.6, 0.7).normalize();
        scene_ref.set_sky(Some(Box::new(ClearSky { color: Color::rgb(0.35, 0.5, 0.8), sun_dir })));
        scene_ref.set_ambient_color(Color::rgb(0.15, 0.15, 0.2));
        scene_ref.fog_mut().enabled = true;
        scene_ref.fog_mut().color = Color::rgb(0.6, 0.65, 0.7);

        let mut sun = DirectionalLight::new(Color::rgb(1.0, 0.95, 0.85), -sun_dir);
        sun.base.cast_shadow = true;
        sun.z_far = 80.0;
        scene_ref.set_directional_light(sun)?;

        let mut spot = SpotLight::new(Color::rgb(1.0, 0.8, 0.5), Vec3::new(0.0, 30.0, 0.0), -POSITIVE_Y, 60.0, 1.2);
        spot.base.cast_shadow = true;
        scene_ref.add_spot_light(spot);
        let mut beacon = PointLight::new(Color::rgb(0.3, 0.6, 1.0), Vec3::new(15.0, 5.0, 0.0), 20.0);
        beacon.base.cast_shadow = true;
        scene_ref.add_point_light(beacon);

        let post = scene_ref.post_process_mut();
        post.tone_mapping = Some(PpToneMapping::new(1.0));
        post.bloom = Some(PpBloom::new(0.6, 0.4));
        post.lens_flare = Some(PpLensFlare::new(sun_dir));

        let mut ships = Vec::with_capacity(NUM_SHIPS);
        for i in 0..NUM_SHIPS {
            let mut entity = MaterialEntity::new(Box::new(ShipGeometry { mesh: ship_mesh, materials: vec![hull, canopy] }));
            entity.team_color = if i % 2 == 0 { Color::rgb(1.0, 0.2, 0.2) } else { Color::rgb(0.2, 0.4, 1.0) };
            let handle = scene_ref.create_entity(EntityKind::Material(entity));
            scene_ref.set_entity_radius(handle, 1.5)?;
            ships.push(Ship {
                entity: handle,
                orbit: SHIP_ORBIT_MIN + SHIP_ORBIT_STEP * (i / 4) as f32,
                phase: TAU * i as f32 / NUM_SHIPS as f32,
                height: 2.0 + (i % 4) as f32 * 1.5,
            });
        }

        let exhaust = scene_ref.create_entity(EntityKind::Heat(Box::new(Exhaust)));
        scene_ref.set_entity_parent(exhaust, Some(ships[0].entity))?;
        scene_ref.set_entity_pos(exhaust, Vec3::new(0.0, 0.0, -2.0))?;
        scene_ref.set_entity_radius(exhaust, 1.0)?;

        let aspect = SCREEN_WIDTH as f32 / SCREEN_HEIGHT as f32;
        let camera = scene_ref.create_camera(Camera::character(Vec3::zeros(), 0.5, 0.0, CAMERA_DIST, 0.5, 200.0, 1.0, aspect));
        scene_ref.set_active_camera(Some(camera))?;

        info!("Demo scene built: {} ships, {} materials", ships.len(), scene_ref.materials().len());
        Ok(Self { engine, scene, camera, ships, time: 0.0 })
    }

    fn update(&mut self, dt: f32) -> Result<(), DemoError> {
        self.time += dt;
        let time = self.time;
        let scene = self.engine.scene_mut(self.scene).ok_or(EngineError::NoActiveScene)?;

        for ship in &self.ships {
            let angle = ship.phase + time * SHIP_SPEED * SHIP_ORBIT_MIN / ship.orbit;
            let pos = Vec3::new(angle.cos() * ship.orbit, ship.height, angle.sin() * ship.orbit);
            scene.set_entity_pos(ship.entity, pos)?;
            scene.set_entity_orientation(ship.entity, Quat::from_axis_angle(&Vec3::y_axis(), -angle))?;
        }

        if let Some(camera) = scene.camera_mut(self.camera) {
            camera.set_mode(CameraMode::Character { angle_x: 0.5, angle_y: time * 0.1, camera_dist: CAMERA_DIST });
        }

        self.engine.update(dt);
        Ok(())
    }

    fn run(&mut self) -> Result<(), DemoError> {
        // Host time spent per simulated frame
        let mut wall = FrameTimer::new();
        for frame in 1..=FRAME_COUNT {
            self.update(FRAME_TIME)?;
            self.engine.draw()?;
            self.engine.draw_special_textures()?;
            wall.tick();

            if frame % INFO_PERIOD == 0 {
                info!("Frame {} ({:.3} ms host): {}", frame, wall.delta_time() * 1000.0, self.engine.info());
            }
            if frame == FRAME_COUNT / 2 {
                // Exercise the runtime option paths halfway through
                self.engine.set_config_uint(ConfigOption::SmMaxSize, 512)?;
                self.engine.set_config_bool(ConfigOption::PpEnabled, false)?;
                self.engine.set_config_bool(ConfigOption::PpEnabled, true)?;
            }
        }

        let backend = self.engine.backend();
        info!(
            "Finished {} frames in {:.2} s host time: {} recorded calls, {} live textures, {} programs",
            wall.frame_count(),
            wall.total_time(),
            backend.calls().len(),
            backend.live_texture_count(),
            backend.compiled_program_count()
        );
        Ok(())
    }
}

fn main() {
    logging::init_with_level(LevelFilter::Info);
    info!("Starting Quark Engine headless demo");

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from_file(&path).map_err(DemoError::from),
        None => Ok(EngineConfig::default()),
    };

    let result = config.and_then(DemoApp::new).and_then(|mut app| app.run());
    match result {
        Ok(()) => info!("Demo completed successfully"),
        Err(e) => {
            error!("Demo failed: {}", e);
            std::process::exit(1);
        }
    }
}
