//! Engine: owns the backend, shared services, configuration and scenes
//!
//! The application drives it one frame at a time: [`Engine::update`]
//! advances time and scene behavior, [`Engine::draw`] renders the active
//! scene into whatever render target is bound.

use log::{info, warn};
use slotmap::SlotMap;

use crate::config::{ConfigOption, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::foundation::collections::SceneHandle;
use crate::foundation::geometry::BoundingBox;
use crate::foundation::time::FrameTimer;
use crate::render::backend::{RenderBackend, ScreenQuad, ScreenRect, ShaderModel};
use crate::render::resources::Surface;
use crate::render::services::{EngineServices, SpecialTexture};
use crate::scene::stats::Stats;
use crate::scene::Scene;

/// Margin around debug thumbnails, in pixels
const DEBUG_TEXTURE_MARGIN: f32 = 4.0;
/// Width of debug thumbnails, in pixels
const DEBUG_TEXTURE_WIDTH: f32 = 160.0;

/// Everything a scene needs from the engine while drawing one frame
pub struct RenderContext<'a> {
    /// Device
    pub backend: &'a mut dyn RenderBackend,
    /// Shadow maps, special textures and shader caches
    pub services: &'a mut EngineServices,
    /// Options read every frame
    pub config: &'a EngineConfig,
    /// Engine time in seconds
    pub now: f32,
    /// Duration of the last frame in seconds
    pub dt: f32,
}

/// Main engine struct
pub struct Engine<B: RenderBackend> {
    backend: B,
    services: EngineServices,
    config: EngineConfig,
    scenes: SlotMap<SceneHandle, Scene>,
    active_scene: Option<SceneHandle>,
    stats: Stats,
    timer: FrameTimer,
}

impl<B: RenderBackend> Engine<B> {
    /// Validate the device and create the shared services
    pub fn new(mut backend: B, config: EngineConfig) -> EngineResult<Self> {
        info!("Initializing engine...");
        let caps = backend.device_caps();
        if caps.vertex_shader < ShaderModel::V2_0 || caps.pixel_shader < ShaderModel::V2_0 {
            return Err(EngineError::UnsupportedDevice {
                vertex_shader: caps.vertex_shader.to_string(),
                pixel_shader: caps.pixel_shader.to_string(),
            });
        }

        let mut services = EngineServices::new(&config)?;
        let (width, height) = backend.back_buffer_size();
        services.set_special_textures_size(&mut backend, width, height);

        info!(
            "Engine created: VS {}, PS {}, back buffer {}x{}",
            caps.vertex_shader, caps.pixel_shader, width, height
        );
        Ok(Self {
            backend,
            services,
            config,
            scenes: SlotMap::with_key(),
            active_scene: None,
            stats: Stats::default(),
            timer: FrameTimer::new(),
        })
    }

    /// The device
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// The device, mutable
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Current configuration
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Frame timing
    pub const fn timer(&self) -> &FrameTimer {
        &self.timer
    }

    // ---- Configuration ----

    /// Read a boolean option
    pub fn config_bool(&self, option: ConfigOption) -> EngineResult<bool> {
        Ok(self.config.get_bool(option)?)
    }

    /// Read a float option
    pub fn config_float(&self, option: ConfigOption) -> EngineResult<f32> {
        Ok(self.config.get_float(option)?)
    }

    /// Read an unsigned option
    pub fn config_uint(&self, option: ConfigOption) -> EngineResult<u32> {
        Ok(self.config.get_uint(option)?)
    }

    /// Change a boolean option. Toggling postprocessing creates or destroys
    /// the special textures.
    pub fn set_config_bool(&mut self, option: ConfigOption, value: bool) -> EngineResult<()> {
        let previous = self.config.get_bool(option)?;
        self.config.set_bool(option, value)?;
        if option == ConfigOption::PpEnabled && previous != value {
            if value {
                self.services.create_special_textures();
                if !self.backend.device_status().is_lost() {
                    let (width, height) = self.backend.back_buffer_size();
                    self.services.set_special_textures_size(&mut self.backend, width, height);
                }
            } else {
                self.services.destroy_special_textures(&mut self.backend);
            }
        }
        info!("Config {option} = {value}");
        Ok(())
    }

    /// Change a float option
    pub fn set_config_float(&mut self, option: ConfigOption, value: f32) -> EngineResult<()> {
        self.config.set_float(option, value)?;
        info!("Config {option} = {value}");
        Ok(())
    }

    /// Change an unsigned option. Shadow-map sizes take effect on the next
    /// use of each map.
    pub fn set_config_uint(&mut self, option: ConfigOption, value: u32) -> EngineResult<()> {
        self.config.set_uint(option, value)?;
        let sm = &self.config.shadow_mapping;
        self.services.set_shadow_map_sizes(&mut self.backend, sm.max_size, sm.max_cube_size);
        info!("Config {option} = {value}");
        Ok(())
    }

    // ---- Device ----

    /// Call after the device was reset, e.g. following a resolution change
    pub fn on_reset_device(&mut self) {
        let (width, height) = self.backend.back_buffer_size();
        self.services.set_special_textures_size(&mut self.backend, width, height);
        info!("Device reset, back buffer {}x{}", width, height);
    }

    /// Call when the device was lost
    pub fn on_lost_device(&mut self) {
        warn!("Device lost");
    }

    // ---- Scenes ----

    /// Create an empty scene covering `bounds`
    pub fn create_scene(&mut self, bounds: BoundingBox) -> SceneHandle {
        let handle = self.scenes.insert(Scene::new(bounds));
        info!("Scene created: {:?}", handle);
        handle
    }

    /// Destroy a scene; destroying the active scene leaves none active
    pub fn destroy_scene(&mut self, handle: SceneHandle) -> Option<Scene> {
        if self.active_scene == Some(handle) {
            self.active_scene = None;
        }
        let scene = self.scenes.remove(handle);
        if scene.is_some() {
            info!("Scene destroyed: {:?}", handle);
        }
        scene
    }

    /// Scene drawn by [`Engine::draw`]
    pub fn set_active_scene(&mut self, handle: Option<SceneHandle>) -> EngineResult<()> {
        if let Some(h) = handle {
            if !self.scenes.contains_key(h) {
                return Err(EngineError::InvalidHandle("scene"));
            }
        }
        self.active_scene = handle;
        Ok(())
    }

    /// Currently active scene
    pub const fn active_scene(&self) -> Option<SceneHandle> {
        self.active_scene
    }

    /// Scene by handle
    pub fn scene(&self, handle: SceneHandle) -> Option<&Scene> {
        self.scenes.get(handle)
    }

    /// Scene by handle, mutable
    pub fn scene_mut(&mut self, handle: SceneHandle) -> Option<&mut Scene> {
        self.scenes.get_mut(handle)
    }

    // ---- Frame ----

    /// Advance time by `dt` seconds, update the active scene and run
    /// resource maintenance
    pub fn update(&mut self, dt: f32) {
        self.timer.advance(dt);
        if let Some(scene) = self.active_scene.and_then(|h| self.scenes.get_mut(h)) {
            scene.update(dt);
        }
        self.services.update(&mut self.backend, self.timer.total_time());
    }

    /// Draw the active scene
    pub fn draw(&mut self) -> EngineResult<()> {
        let handle = self.active_scene.ok_or(EngineError::NoActiveScene)?;
        let scene = self.scenes.get_mut(handle).ok_or(EngineError::InvalidHandle("scene"))?;
        let mut ctx = RenderContext {
            backend: &mut self.backend,
            services: &mut self.services,
            config: &self.config,
            now: self.timer.total_time(),
            dt: self.timer.delta_time(),
        };
        scene.draw(&mut ctx, &mut self.stats)
    }

    /// Statistics of the last drawn frame
    pub const fn stats(&self) -> &Stats {
        &self.stats
    }

    /// One-line summary of the last drawn frame
    pub fn info(&self) -> String {
        self.stats.to_string()
    }

    /// Draw thumbnails of the shadow maps and postprocessing textures along
    /// the left edge of the screen
    pub fn draw_special_textures(&mut self) -> EngineResult<()> {
        let flat: [Option<Surface>; 4] = [
            self.services.last_used_shadow_map(),
            self.services.try_get_special_texture(SpecialTexture::Blur1),
            self.services.try_get_special_texture(SpecialTexture::Feedback),
            self.services.try_get_special_texture(SpecialTexture::Screen),
        ];

        self.backend.restore_default_state();
        let mut top = DEBUG_TEXTURE_MARGIN;
        for surface in flat.into_iter().flatten() {
            let height = DEBUG_TEXTURE_WIDTH * surface.height as f32 / surface.width.max(1) as f32;
            let rect = ScreenRect::new(DEBUG_TEXTURE_MARGIN, top, DEBUG_TEXTURE_MARGIN + DEBUG_TEXTURE_WIDTH, top + height);
            self.backend.draw_screen_quad(&ScreenQuad::new(rect).with_texture(surface.id))?;
            top += height + DEBUG_TEXTURE_MARGIN;
        }

        if let Some(cube) = self.services.last_used_cube_shadow_map() {
            let height = DEBUG_TEXTURE_WIDTH * 3.0 / 4.0;
            let rect = ScreenRect::new(DEBUG_TEXTURE_MARGIN, top, DEBUG_TEXTURE_MARGIN + DEBUG_TEXTURE_WIDTH, top + height);
            self.backend.draw_cube_cross(cube.id, rect)?;
        }
        Ok(())
    }
}

impl<B: RenderBackend> Drop for Engine<B> {
    fn drop(&mut self) {
        self.services.unload_all(&mut self.backend);
        info!("Engine shutdown complete");
    }
}
