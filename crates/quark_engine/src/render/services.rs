//! Shared rendering services
//!
//! [`EngineServices`] owns everything scenes share on the device: the
//! shadow-map pool, the special postprocess textures, the program caches
//! and the named texture catalog. Its `setup_state_*` functions pick a
//! program variant, bind its parameters and apply the fixed-function
//! state for one draw; [`EngineServices::unsetup_state`] ends it.

use log::{debug, info};

use crate::config::{EngineConfig, ShadowMapFormat};
use crate::error::{EngineError, EngineResult};
use crate::foundation::geometry::{ray_to_plane, BoundingBox, Plane};
use crate::foundation::math::{
    look_at_lh, ortho_off_center_lh, safe_normalize, transform_coord, transform_normal, Color, Mat4, Vec3, Vec4,
    POSITIVE_Y, POSITIVE_Z,
};
use crate::render::backend::{BackendResult, ProgramId, RenderBackend, SurfaceFormat, TextureDesc, TextureId};
use crate::render::params::{ParamBlock, ParamValue, ShaderParam};
use crate::render::postprocess::{PpFunction, PpToneMapping};
use crate::render::render_state::RenderState;
use crate::render::resources::{RenderTexture, Resource, ShaderCache, ShaderKey, Surface, TextureCatalog};
use crate::render::shader_features::{
    AmbientMode, FeatureInputs, GrayscaleMode, Pass, PpFeatures, ShaderFeatures, ShadowMapMode,
};
use crate::scene::camera::ParamsCamera;
use crate::scene::light::LightRef;
use crate::scene::material::{Material, MaterialKind, SolidParams};

/// Number of size tiers of 2D and cube shadow maps
pub const SHADOW_MAP_LEVELS: usize = 4;

/// Seconds between special texture maintenance runs
const MAINTENANCE_TIME: f32 = 10.0;
/// Special textures unused this long are released
const UNUSED_TEXTURE_FREE_TIME: f32 = 30.0;

const TONE_MAPPING_DIV: u32 = 50;
const BLUR_DIV: u32 = 4;
const FEEDBACK_DIV: u32 = 2;

/// Render targets used by postprocess effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialTexture {
    /// Whole frame, when it has to be sampled
    Screen,
    /// Downscaled frame for brightness measurement
    ToneMappingVram,
    /// CPU-readable copy of [`Self::ToneMappingVram`]
    ToneMappingRam,
    /// Bloom ping
    Blur1,
    /// Bloom pong
    Blur2,
    /// Previous frame for feedback
    Feedback,
}

impl SpecialTexture {
    /// Every special texture, in creation order
    pub const ALL: [Self; 6] =
        [Self::Screen, Self::ToneMappingVram, Self::ToneMappingRam, Self::Blur1, Self::Blur2, Self::Feedback];

    fn desc(self, screen_width: u32, screen_height: u32) -> TextureDesc {
        let (w, h) = self.size(screen_width, screen_height);
        match self {
            Self::ToneMappingRam => TextureDesc::system_memory(w, h, SurfaceFormat::A8R8G8B8),
            _ => TextureDesc::render_target(w, h, SurfaceFormat::A8R8G8B8),
        }
    }

    /// Size for a given back buffer size
    pub fn size(self, screen_width: u32, screen_height: u32) -> (u32, u32) {
        match self {
            Self::Screen => (screen_width, screen_height),
            Self::ToneMappingVram | Self::ToneMappingRam => {
                ((screen_width / TONE_MAPPING_DIV).max(4), (screen_height / TONE_MAPPING_DIV).max(4))
            }
            Self::Blur1 | Self::Blur2 => (screen_width / BLUR_DIV, screen_height / BLUR_DIV),
            Self::Feedback => (screen_width / FEEDBACK_DIV, screen_height / FEEDBACK_DIV),
        }
    }
}

/// Single-variant programs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    /// Heat-haze geometry into screen alpha
    Heat,
    /// Depth-tested proxy drawn inside occlusion queries
    OcclusionQuery,
    /// Bloom threshold
    BrightPass,
    /// Four-tap blur
    BlurPass,
}

impl Effect {
    const ALL: [Self; 4] = [Self::Heat, Self::OcclusionQuery, Self::BrightPass, Self::BlurPass];

    /// Program source name
    pub const fn source(self) -> &'static str {
        match self {
            Self::Heat => "HeatEffect",
            Self::OcclusionQuery => "OcclusionQueryEffect",
            Self::BrightPass => "PpBrightPass",
            Self::BlurPass => "PpBlurPass",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SingleVariant;

impl ShaderKey for SingleVariant {
    fn defines(&self) -> Vec<(&'static str, u32)> {
        Vec::new()
    }
}

/// Shadow map bound for a light pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowMapBinding {
    /// No shadows
    #[default]
    None,
    /// 2D map of a directional or spot light
    Flat(Surface),
    /// Cube map of a point light
    Cube(Surface),
}

impl ShadowMapBinding {
    /// Bound surface
    pub const fn surface(&self) -> Option<Surface> {
        match self {
            Self::None => None,
            Self::Flat(s) | Self::Cube(s) => Some(*s),
        }
    }
}

/// Scene fog
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FogParams {
    /// Fog color
    pub color: Color,
    /// Fraction of the far plane where fog begins
    pub start: f32,
}

/// Distance range over which directional shadows fade out
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowFactorRange {
    /// Fade start distance
    pub start: f32,
    /// Fade end distance
    pub end: f32,
}

/// Per-pass scene state consumed by material setup
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SceneDrawParams {
    /// Ambient color
    pub ambient: Color,
    /// Fog, when enabled
    pub fog: Option<FogParams>,
    /// Shadow map of the current light
    pub shadow_map: ShadowMapBinding,
    /// Shadow-map matrix of the current light; also the view-projection
    /// used when drawing into a directional shadow map without a camera
    pub shadow_map_matrix: Option<Mat4>,
    /// Directional shadow fade range
    pub variable_shadow_factor: Option<ShadowFactorRange>,
}

impl SceneDrawParams {
    /// Same parameters with the shadow map and its fade removed, for
    /// geometry that does not receive shadows
    #[must_use]
    pub fn without_shadow(&self) -> Self {
        Self { shadow_map: ShadowMapBinding::None, variable_shadow_factor: None, ..*self }
    }
}

/// Per-draw entity state consumed by material setup
#[derive(Debug, Clone, Copy)]
pub struct EntityDrawParams<'a> {
    /// Uniform world scale
    pub world_size: f32,
    /// World matrix
    pub world: Mat4,
    /// Inverse world matrix
    pub inv_world: Mat4,
    /// Texture coordinate transform
    pub texture_matrix: Mat4,
    /// Team color
    pub team_color: Color,
    /// Takes part in lighting
    pub use_lighting: bool,
    /// Bone palette when skinned
    pub bones: Option<&'a [Mat4]>,
}

impl Default for EntityDrawParams<'_> {
    fn default() -> Self {
        Self {
            world_size: 1.0,
            world: Mat4::identity(),
            inv_world: Mat4::identity(),
            texture_matrix: Mat4::identity(),
            team_color: Color::WHITE,
            use_lighting: true,
            bones: None,
        }
    }
}

/// Maps clip space into shadow-map texture space, biased by `epsilon`
pub fn shadow_map_bias_matrix(epsilon: f32) -> Mat4 {
    Mat4::new(
        0.5, 0.0, 0.0, 0.5, //
        0.0, -0.5, 0.0, 0.5, //
        0.0, 0.0, 1.0, -epsilon, //
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Distance the directional shadow camera is pulled back behind the box
const DIRECTIONAL_EYE_OFFSET: f32 = 30.0;

/// Orthographic view-projection of a directional light covering `cam_box`
///
/// The eye sits on the box face the light enters through and the depth
/// range is extended backwards so casters outside the box still land in
/// the map.
pub fn find_directional_view_proj(cam_box: &BoundingBox, light_dir: &Vec3) -> Mat4 {
    let corner = Vec3::new(
        if light_dir.x < 0.0 { cam_box.min.x } else { cam_box.max.x },
        if light_dir.y < 0.0 { cam_box.min.y } else { cam_box.max.y },
        if light_dir.z < 0.0 { cam_box.min.z } else { cam_box.max.z },
    );
    let plane = Plane::from_point_normal(&corner, light_dir);
    let center = cam_box.center();
    let Some(t) = ray_to_plane(&center, &-light_dir, &plane) else {
        return Mat4::identity();
    };
    let eye = center - light_dir * t;
    let up = if light_dir.dot(&POSITIVE_Y).abs() > 0.99 { POSITIVE_Z } else { POSITIVE_Y };
    let view = look_at_lh(&eye, &(eye + light_dir), &up);
    let b = cam_box.transformed(&view);
    let proj = ortho_off_center_lh(b.min.x, b.max.x, b.min.y, b.max.y, b.min.z - DIRECTIONAL_EYE_OFFSET, b.max.z);
    proj * view
}

/// Tier for a light covering `size_factor` of the screen: 1 maps to the
/// largest map, 0 to the smallest
pub fn shadow_map_tier(size_factor: f32) -> usize {
    let level = ((1.0 - size_factor) * SHADOW_MAP_LEVELS as f32 - 0.5).round();
    level.clamp(0.0, (SHADOW_MAP_LEVELS - 1) as f32) as usize
}

fn color_param(c: Color) -> ParamValue {
    ParamValue::Vec4(c.to_vec4())
}

fn point_param(p: Vec3) -> Vec4 {
    Vec4::new(p.x, p.y, p.z, 1.0)
}

fn dir_param(d: Vec3) -> Vec4 {
    Vec4::new(d.x, d.y, d.z, 0.0)
}

/// Device resources and program dispatch shared by every scene
#[derive(Debug)]
pub struct EngineServices {
    shadow_map_format: ShadowMapFormat,
    shadow_maps: Vec<RenderTexture>,
    cube_shadow_maps: Vec<RenderTexture>,
    depth_stencil: RenderTexture,
    last_used_shadow_map: Option<usize>,
    last_used_cube_shadow_map: Option<usize>,
    special: Option<Vec<RenderTexture>>,
    special_last_use: [f32; 6],
    screen_size: (u32, u32),
    maintenance_last_time: f32,
    main_shader: ShaderCache<ShaderFeatures>,
    pp_shader: ShaderCache<PpFeatures>,
    effects: Vec<ShaderCache<SingleVariant>>,
    textures: TextureCatalog,
    started: bool,
}

impl EngineServices {
    /// Describe every shared resource; nothing touches the device until used
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        let format = config.shadow_map_format().map_err(EngineError::InvalidShadowMapFormat)?;
        let surface_format = SurfaceFormat::from(format);
        let max_size = config.shadow_mapping.max_size;
        let max_cube_size = config.shadow_mapping.max_cube_size;

        let shadow_maps = (0..SHADOW_MAP_LEVELS)
            .map(|i| {
                let size = max_size >> i;
                RenderTexture::new(TextureDesc::render_target(size, size, surface_format))
            })
            .collect();
        let cube_shadow_maps = (0..SHADOW_MAP_LEVELS)
            .map(|i| RenderTexture::new(TextureDesc::cube_render_target(max_cube_size >> i, surface_format)))
            .collect();
        let depth_stencil = RenderTexture::new(TextureDesc::depth_stencil(max_size.max(max_cube_size)));

        let mut services = Self {
            shadow_map_format: format,
            shadow_maps,
            cube_shadow_maps,
            depth_stencil,
            last_used_shadow_map: None,
            last_used_cube_shadow_map: None,
            special: None,
            special_last_use: [0.0; 6],
            screen_size: (0, 0),
            maintenance_last_time: 0.0,
            main_shader: ShaderCache::new("MainShader"),
            pp_shader: ShaderCache::new("PpShader"),
            effects: Effect::ALL.iter().map(|e| ShaderCache::new(e.source())).collect(),
            textures: TextureCatalog::new(),
            started: false,
        };
        if config.postprocessing.enabled {
            services.create_special_textures();
        }
        info!("Engine services created, shadow maps {} / {} {}", max_size, max_cube_size, format);
        Ok(services)
    }

    /// Configured shadow-map format
    pub const fn shadow_map_format(&self) -> ShadowMapFormat {
        self.shadow_map_format
    }

    /// Named texture assets
    pub fn textures(&mut self) -> &mut TextureCatalog {
        &mut self.textures
    }

    // ---- Shadow maps ----

    fn fetch_flat(&mut self, backend: &mut dyn RenderBackend, tier: usize) -> EngineResult<Surface> {
        let map = &mut self.shadow_maps[tier];
        let id = map.ensure(backend)?;
        self.last_used_shadow_map = Some(tier);
        Ok(Surface { id, width: map.width(), height: map.height() })
    }

    /// Largest 2D shadow map
    pub fn directional_shadow_map(&mut self, backend: &mut dyn RenderBackend) -> EngineResult<Surface> {
        self.fetch_flat(backend, 0)
    }

    /// 2D shadow map sized for a spot light covering `size_factor` of the screen
    pub fn spot_shadow_map(&mut self, backend: &mut dyn RenderBackend, size_factor: f32) -> EngineResult<Surface> {
        self.fetch_flat(backend, shadow_map_tier(size_factor))
    }

    /// Cube shadow map sized for a point light covering `size_factor` of the screen
    pub fn point_shadow_map(&mut self, backend: &mut dyn RenderBackend, size_factor: f32) -> EngineResult<Surface> {
        let tier = shadow_map_tier(size_factor);
        let map = &mut self.cube_shadow_maps[tier];
        let id = map.ensure(backend)?;
        self.last_used_cube_shadow_map = Some(tier);
        Ok(Surface { id, width: map.width(), height: map.height() })
    }

    /// Depth buffer shared by every shadow map
    pub fn shadow_depth_stencil(&mut self, backend: &mut dyn RenderBackend) -> EngineResult<TextureId> {
        Ok(self.depth_stencil.ensure(backend)?)
    }

    /// Re-describe the shadow-map pool for new largest sizes, releasing
    /// the old surfaces
    pub fn set_shadow_map_sizes(&mut self, backend: &mut dyn RenderBackend, max_size: u32, max_cube_size: u32) {
        let format = SurfaceFormat::from(self.shadow_map_format);
        for (i, map) in self.shadow_maps.iter_mut().enumerate() {
            map.unload(backend);
            let size = max_size >> i;
            *map = RenderTexture::new(TextureDesc::render_target(size, size, format));
        }
        for (i, map) in self.cube_shadow_maps.iter_mut().enumerate() {
            map.unload(backend);
            *map = RenderTexture::new(TextureDesc::cube_render_target(max_cube_size >> i, format));
        }
        self.depth_stencil.unload(backend);
        self.depth_stencil = RenderTexture::new(TextureDesc::depth_stencil(max_size.max(max_cube_size)));
        self.last_used_shadow_map = None;
        self.last_used_cube_shadow_map = None;
        info!("Shadow maps resized to {} / {}", max_size, max_cube_size);
    }

    /// Most recently fetched 2D shadow map, if still loaded
    pub fn last_used_shadow_map(&self) -> Option<Surface> {
        self.last_used_shadow_map.and_then(|i| self.shadow_maps[i].surface())
    }

    /// Most recently fetched cube shadow map, if still loaded
    pub fn last_used_cube_shadow_map(&self) -> Option<Surface> {
        self.last_used_cube_shadow_map.and_then(|i| self.cube_shadow_maps[i].surface())
    }

    // ---- Special textures ----

    /// Describe the special textures; called when postprocessing is enabled
    pub fn create_special_textures(&mut self) {
        if self.special.is_some() {
            return;
        }
        let (w, h) = self.screen_size;
        self.special = Some(
            SpecialTexture::ALL
                .iter()
                .map(|st| RenderTexture::new(st.desc(w, h)))
                .collect(),
        );
        self.special_last_use = [0.0; 6];
        debug!("Special textures created for {}x{}", w, h);
    }

    /// Release the special textures in reverse creation order
    pub fn destroy_special_textures(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(mut special) = self.special.take() {
            for texture in special.iter_mut().rev() {
                texture.unload(backend);
            }
            debug!("Special textures destroyed");
        }
    }

    /// True while the special textures exist
    pub const fn has_special_textures(&self) -> bool {
        self.special.is_some()
    }

    /// Follow a back buffer size change
    pub fn set_special_textures_size(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) {
        self.screen_size = (width, height);
        if let Some(special) = &mut self.special {
            for (texture, st) in special.iter_mut().zip(SpecialTexture::ALL) {
                let (w, h) = st.size(width, height);
                texture.resize(backend, w, h);
            }
        }
    }

    /// Load a special texture and mark it used at `now`
    pub fn ensure_special_texture(
        &mut self,
        backend: &mut dyn RenderBackend,
        texture: SpecialTexture,
        now: f32,
    ) -> EngineResult<Surface> {
        let index = texture as usize;
        let special = self.special.as_mut().ok_or(EngineError::InvalidHandle("special texture"))?;
        let rt = &mut special[index];
        let id = rt.ensure(backend)?;
        self.special_last_use[index] = now;
        Ok(Surface { id, width: rt.width(), height: rt.height() })
    }

    /// A special texture, only if it is currently loaded
    pub fn try_get_special_texture(&self, texture: SpecialTexture) -> Option<Surface> {
        self.special.as_ref().and_then(|s| s[texture as usize].surface())
    }

    /// Run maintenance every 10 seconds: special textures unused for 30
    /// seconds are released.
    pub fn update(&mut self, backend: &mut dyn RenderBackend, now: f32) {
        if now <= self.maintenance_last_time + MAINTENANCE_TIME {
            return;
        }
        self.maintenance_last_time = now;
        if let Some(special) = &mut self.special {
            for (i, texture) in special.iter_mut().enumerate() {
                if texture.is_loaded() && now > self.special_last_use[i] + UNUSED_TEXTURE_FREE_TIME {
                    debug!("Releasing unused special texture {:?}", SpecialTexture::ALL[i]);
                    texture.unload(backend);
                }
            }
        }
    }

    /// Release every device resource, keeping descriptions; used on device loss
    pub fn unload_all(&mut self, backend: &mut dyn RenderBackend) {
        for map in self.shadow_maps.iter_mut().chain(self.cube_shadow_maps.iter_mut()) {
            map.unload(backend);
        }
        self.depth_stencil.unload(backend);
        if let Some(special) = &mut self.special {
            for texture in special.iter_mut().rev() {
                texture.unload(backend);
            }
        }
        self.main_shader.unload(backend);
        self.pp_shader.unload(backend);
        for effect in &mut self.effects {
            effect.unload(backend);
        }
        self.textures.clear(backend);
    }

    // ---- Programs ----

    /// Compiled variants of the main material program
    pub fn main_shader_count(&self) -> usize {
        self.main_shader.len()
    }

    /// Compiled variants of the postprocess program
    pub fn pp_shader_count(&self) -> usize {
        self.pp_shader.len()
    }

    /// Program of a single-variant effect
    pub fn effect_program(&mut self, backend: &mut dyn RenderBackend, effect: Effect) -> BackendResult<ProgramId> {
        self.effects[effect as usize].get(backend, &SingleVariant)
    }

    fn start(&mut self, backend: &mut dyn RenderBackend, program: ProgramId, params: &ParamBlock) -> EngineResult<()> {
        backend.begin_program(program)?;
        self.started = true;
        backend.set_params(params)?;
        Ok(())
    }

    fn texture(&mut self, backend: &mut dyn RenderBackend, name: &str) -> EngineResult<TextureId> {
        self.textures.must_get(backend, name)
    }

    /// Bind the postprocess program that composes the screen texture onto
    /// the back buffer
    pub fn setup_state_pp(
        &mut self,
        backend: &mut dyn RenderBackend,
        screen: TextureId,
        function: Option<&PpFunction>,
        tone_mapping: Option<&PpToneMapping>,
        heat_haze: bool,
    ) -> EngineResult<PpFeatures> {
        let features = PpFeatures {
            grayscale: function.map_or(GrayscaleMode::Off, |f| GrayscaleMode::from_factor(f.grayscale_factor)),
            function: function.is_some_and(PpFunction::is_linear_transform_required),
            tone_mapping: tone_mapping.is_some(),
            heat_haze,
        };
        let program = self.pp_shader.get(backend, &features)?;

        let mut params = ParamBlock::new();
        params.set(ShaderParam::Texture, screen);
        if let Some(f) = function {
            if features.grayscale == GrayscaleMode::Partial {
                params.set(ShaderParam::GrayscaleFactor, f.grayscale_factor);
            }
            if features.function {
                params.set(ShaderParam::AFactor, dir_param(f.a_factor));
                params.set(ShaderParam::BFactor, dir_param(f.b_factor));
            }
        }
        if let Some(tm) = tone_mapping {
            params.set(ShaderParam::LuminanceFactor, tm.luminance_factor());
        }
        if heat_haze {
            let map = self.texture(backend, "PerturbationMap")?;
            params.set(ShaderParam::PerturbationMap, map);
        }
        self.start(backend, program, &params)?;
        Ok(features)
    }

    /// Bind the heat program for one heat entity
    pub fn setup_state_heat(
        &mut self,
        backend: &mut dyn RenderBackend,
        cam: &ParamsCamera,
        world: &Mat4,
        inv_world: &Mat4,
    ) -> EngineResult<()> {
        let program = self.effect_program(backend, Effect::Heat)?;
        let mut params = ParamBlock::new();
        params.set(ShaderParam::WorldViewProj, cam.matrices().view_proj() * world);
        params.set(ShaderParam::ZFar, cam.z_far() * 0.5);
        // View direction, not the direction to each vertex
        let dir_to_cam = safe_normalize(&transform_normal(inv_world, &-cam.forward_dir()));
        params.set(ShaderParam::DirToCam, dir_param(dir_to_cam));
        self.start(backend, program, &params)
    }

    /// Bind the occlusion-query proxy program
    pub fn setup_state_occlusion(&mut self, backend: &mut dyn RenderBackend, world_view_proj: &Mat4) -> EngineResult<()> {
        let program = self.effect_program(backend, Effect::OcclusionQuery)?;
        let mut params = ParamBlock::new();
        params.set(ShaderParam::WorldViewProj, *world_view_proj);
        self.start(backend, program, &params)
    }

    /// End the program started by a `setup_state_*` call and unbind the
    /// texture stages a shadow map may still occupy
    pub fn unsetup_state(&mut self, backend: &mut dyn RenderBackend) {
        if !self.started {
            return;
        }
        self.started = false;
        backend.end_program();
        for stage in 0..3 {
            backend.bind_texture(stage, None);
        }
    }

    /// Select the main program variant for `material` in `pass`, bind its
    /// parameters and apply the material's render state.
    ///
    /// Needs a camera, or a shadow-map matrix standing in for one when
    /// drawing into a directional shadow map.
    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    pub fn setup_state_material(
        &mut self,
        backend: &mut dyn RenderBackend,
        config: &EngineConfig,
        pass: Pass,
        scene: &SceneDrawParams,
        cam: Option<&ParamsCamera>,
        material: &Material,
        entity: &EntityDrawParams<'_>,
        light: Option<LightRef<'_>>,
    ) -> EngineResult<ShaderFeatures> {
        let view_proj = match (cam, &scene.shadow_map_matrix) {
            (Some(cam), _) => *cam.matrices().view_proj(),
            (None, Some(m)) => *m,
            (None, None) => return Err(EngineError::InvalidHandle("camera")),
        };

        let f = ShaderFeatures::select(
            material,
            &FeatureInputs {
                pass,
                light,
                lighting_enabled: config.lighting,
                use_lighting: entity.use_lighting,
                skinning: entity.bones.is_some(),
                ambient: scene.ambient,
                fog_enabled: scene.fog.is_some(),
                shadow_map_format: self.shadow_map_format,
                shadow_map_bound: scene.shadow_map != ShadowMapBinding::None,
                variable_shadow_factor: scene.variable_shadow_factor.is_some(),
            },
        );
        let program = self.main_shader.get(backend, &f)?;

        let mut params = ParamBlock::new();
        params.set(ShaderParam::WorldViewProj, view_proj * entity.world);
        if let (true, Some(bones)) = (f.skinning, entity.bones) {
            params.set(ShaderParam::BoneMatrices, ParamValue::Matrices(bones.to_vec()));
        }

        match &material.kind {
            MaterialKind::Opaque(_) | MaterialKind::Terrain(_) => {
                if let MaterialKind::Terrain(terrain) = &material.kind {
                    for (param, name) in ShaderParam::TERRAIN_TEXTURES.iter().zip(&terrain.textures) {
                        let texture = self.texture(backend, name)?;
                        params.set(*param, texture);
                    }
                    let s = terrain.tex_scale;
                    params.set(ShaderParam::TerrainTexScale, Vec4::new(s[0], s[1], s[2], s[3]));
                }
                let op = material.as_opaque();
                match pass {
                    Pass::Base => {
                        if f.ambient_mode == AmbientMode::Color {
                            params.set(ShaderParam::AmbientColor, color_param(scene.ambient));
                        }
                        if let Some(op) = op {
                            let solid = &op.solid;
                            if f.emissive {
                                let t = self.texture(backend, &solid.emissive_texture)?;
                                params.set(ShaderParam::EmissiveTexture, t);
                            }
                            if f.diffuse_texture && (f.ambient_mode != AmbientMode::None || f.alpha_testing) {
                                let t = self.texture(backend, &solid.diffuse_texture)?;
                                params.set(ShaderParam::DiffuseTexture, t);
                            }
                            if f.ambient_mode != AmbientMode::None && !f.diffuse_texture {
                                params.set(ShaderParam::DiffuseColor, color_param(solid.diffuse_color));
                            }
                            if f.texture_animation {
                                params.set(ShaderParam::TextureMatrix, entity.texture_matrix);
                            }
                            self.bind_environment(backend, &mut params, &f, solid)?;
                        }
                    }
                    Pass::Fog | Pass::Wireframe | Pass::Translucent => {}
                    Pass::Directional | Pass::Point | Pass::Spot => {
                        let light = light.ok_or(EngineError::InvalidHandle("light"))?;
                        self.bind_light(config, &mut params, &f, scene, entity, light)?;
                        if let Some(op) = op {
                            let solid = &op.solid;
                            if f.diffuse_texture {
                                let t = self.texture(backend, &solid.diffuse_texture)?;
                                params.set(ShaderParam::DiffuseTexture, t);
                            } else {
                                params.set(ShaderParam::DiffuseColor, color_param(solid.diffuse_color));
                            }
                            if f.texture_animation {
                                params.set(ShaderParam::TextureMatrix, entity.texture_matrix);
                            }
                            if f.normal_texture {
                                let t = self.texture(backend, &op.normal_texture)?;
                                params.set(ShaderParam::NormalTexture, t);
                            }
                            if f.specular != 0 {
                                params.set(ShaderParam::SpecularColor, color_param(op.specular_color));
                                params.set(ShaderParam::SpecularPower, op.specular_power);
                            }
                        }
                    }
                    Pass::ShadowMap => {
                        if let (true, Some(LightRef::Point(point))) = (f.point_shadow_map, light) {
                            params.set(ShaderParam::LightPos, point_param(transform_coord(&entity.inv_world, point.pos())));
                            let range = point.dist() / entity.world_size;
                            params.set(ShaderParam::LightRangeSq, range * range);
                        }
                        if let (true, Some(op)) = (f.alpha_testing, op) {
                            if f.diffuse_texture {
                                let t = self.texture(backend, &op.solid.diffuse_texture)?;
                                params.set(ShaderParam::DiffuseTexture, t);
                            } else {
                                params.set(ShaderParam::DiffuseColor, color_param(op.solid.diffuse_color));
                            }
                            if f.texture_animation {
                                params.set(ShaderParam::TextureMatrix, entity.texture_matrix);
                            }
                        }
                    }
                }
            }
            MaterialKind::Wireframe(wf) => {
                params.set(ShaderParam::DiffuseColor, color_param(wf.color));
            }
            MaterialKind::Translucent(tr) => {
                let solid = &tr.solid;
                if f.emissive {
                    let t = self.texture(backend, &solid.emissive_texture)?;
                    params.set(ShaderParam::EmissiveTexture, t);
                }
                if f.diffuse_texture {
                    let t = self.texture(backend, &solid.diffuse_texture)?;
                    params.set(ShaderParam::DiffuseTexture, t);
                } else {
                    params.set(ShaderParam::DiffuseColor, color_param(solid.diffuse_color));
                }
                if f.texture_animation {
                    params.set(ShaderParam::TextureMatrix, entity.texture_matrix);
                }
                self.bind_environment(backend, &mut params, &f, solid)?;
            }
        }

        let is_translucent = matches!(material.kind, MaterialKind::Translucent(_));
        if (material.is_opaque() && f.ambient_mode != AmbientMode::None && f.color_mode != 0)
            || (pass == Pass::Wireframe && f.color_mode != 0)
            || (is_translucent && (f.color_mode != 0 || f.alpha_mode != 0))
            || (pass.is_light() && f.color_mode != 0)
        {
            params.set(ShaderParam::TeamColor, color_param(entity.team_color));
        }

        if pass == Pass::Fog || (pass == Pass::Wireframe && f.use_fog) || (is_translucent && f.use_fog) {
            if let (Some(fog), Some(cam)) = (scene.fog, cam) {
                let one_minus_start = 1.0 - fog.start;
                params.set(ShaderParam::FogColor, color_param(fog.color));
                params.set(
                    ShaderParam::FogFactors,
                    Vec4::new(1.0 / (cam.z_far() * one_minus_start), -fog.start / one_minus_start, 0.0, 0.0),
                );
            }
        }

        if f.environmental_mapping || f.fresnel || f.specular != 0 {
            if let Some(cam) = cam {
                params.set(ShaderParam::CameraPos, point_param(transform_coord(&entity.inv_world, cam.eye_pos())));
            }
        }

        self.start(backend, program, &params)?;
        backend.apply_render_state(&RenderState::for_material(material, pass));
        Ok(f)
    }

    fn bind_environment(
        &mut self,
        backend: &mut dyn RenderBackend,
        params: &mut ParamBlock,
        f: &ShaderFeatures,
        solid: &SolidParams,
    ) -> EngineResult<()> {
        if f.environmental_mapping {
            let t = self.texture(backend, &solid.environmental_texture)?;
            params.set(ShaderParam::EnvironmentalTexture, t);
        }
        if f.fresnel {
            params.set(ShaderParam::FresnelColor, color_param(solid.fresnel_color));
            params.set(ShaderParam::FresnelPower, solid.fresnel_power);
        }
        Ok(())
    }

    fn bind_light(
        &self,
        config: &EngineConfig,
        params: &mut ParamBlock,
        f: &ShaderFeatures,
        scene: &SceneDrawParams,
        entity: &EntityDrawParams<'_>,
        light: LightRef<'_>,
    ) -> EngineResult<()> {
        if f.shadow_map_mode != ShadowMapMode::None {
            let surface = scene.shadow_map.surface().ok_or(EngineError::InvalidHandle("shadow map"))?;
            let shadow_matrix = scene.shadow_map_matrix.ok_or(EngineError::InvalidHandle("shadow map matrix"))?;
            let size = surface.width as f32;
            params.set(ShaderParam::ShadowMapTexture, surface.id);
            params.set(ShaderParam::ShadowMapMatrix, shadow_matrix * entity.world);
            params.set(ShaderParam::ShadowMapSize, size);
            params.set(ShaderParam::ShadowMapSizeRcp, 1.0 / size);
            params.set(ShaderParam::ShadowFactor, light.base().shadow_factor);
            if let (true, Some(range)) = (f.variable_shadow_factor, scene.variable_shadow_factor) {
                let a = 1.0 / (range.end - range.start);
                params.set(ShaderParam::ShadowFactorA, a);
                params.set(ShaderParam::ShadowFactorB, -range.start * a);
            }
            if let LightRef::Point(point) = light {
                params.set(ShaderParam::ShadowEpsilon, config.shadow_mapping.epsilon);
                params.set(ShaderParam::LightRangeSqWorld, point.dist() * point.dist());
            }
        }

        params.set(ShaderParam::LightColor, color_param(light.base().color));
        match light {
            LightRef::Directional(dir) => {
                let d = safe_normalize(&transform_normal(&entity.inv_world, &-dir.dir));
                params.set(ShaderParam::DirToLight, dir_param(d));
            }
            LightRef::Point(point) => {
                params.set(ShaderParam::LightPos, point_param(transform_coord(&entity.inv_world, point.pos())));
                let range = point.dist() / entity.world_size;
                params.set(ShaderParam::LightRangeSq, range * range);
            }
            LightRef::Spot(spot) => {
                let d = safe_normalize(&transform_normal(&entity.inv_world, &-spot.dir()));
                params.set(ShaderParam::DirToLight, dir_param(d));
                params.set(ShaderParam::LightPos, point_param(transform_coord(&entity.inv_world, spot.pos())));
                let range = spot.dist() / entity.world_size;
                params.set(ShaderParam::LightRangeSq, range * range);
                let cos_fov2 = (spot.fov() * 0.5).cos();
                params.set(ShaderParam::LightCosFov2, cos_fov2);
                params.set(ShaderParam::LightCosFov2Factor, 1.0 / (1.0 - cos_fov2));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::TextureKind;
    use crate::render::recording::{Call, RecordingBackend};
    use crate::scene::light::{DirectionalLight, PointLight, SpotLight};
    use crate::scene::material::{OpaqueParams, SolidColorMode};
    use approx::assert_relative_eq;

    fn services() -> (RecordingBackend, EngineServices) {
        let mut backend = RecordingBackend::new(800, 600);
        let mut services = EngineServices::new(&EngineConfig::default()).unwrap();
        services.set_special_textures_size(&mut backend, 800, 600);
        (backend, services)
    }

    fn camera() -> ParamsCamera {
        ParamsCamera::new(Vec3::new(0.0, 0.0, -10.0), POSITIVE_Z, POSITIVE_Y, 1.0, 4.0 / 3.0, 0.5, 100.0)
    }

    fn last_params(backend: &RecordingBackend) -> ParamBlock {
        backend.param_blocks().last().cloned().unwrap()
    }

    #[test]
    fn test_bias_matrix_maps_clip_center_to_uv_center() {
        let m = shadow_map_bias_matrix(0.0);
        let p = transform_coord(&m, &Vec3::new(0.0, 0.0, 0.5));
        assert_relative_eq!(p, Vec3::new(0.5, 0.5, 0.5));
        let corner = transform_coord(&m, &Vec3::new(-1.0, 1.0, 0.0));
        assert_relative_eq!(corner, Vec3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_spot_light_axis_lands_in_map_center() {
        let spot = SpotLight::new(Color::WHITE, Vec3::new(0.0, 10.0, 0.0), Vec3::new(0.0, -1.0, 0.0), 20.0, 1.0);
        let shadow = shadow_map_bias_matrix(0.0) * spot.camera().matrices().view_proj();
        let p = transform_coord(&shadow, &Vec3::new(0.0, 0.0, 0.0));
        assert_relative_eq!(p.x, 0.5, epsilon = 1e-5);
        assert_relative_eq!(p.y, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_tier_selection() {
        assert_eq!(shadow_map_tier(1.0), 0);
        assert_eq!(shadow_map_tier(0.8), 0);
        assert_eq!(shadow_map_tier(0.6), 1);
        assert_eq!(shadow_map_tier(0.3), 2);
        assert_eq!(shadow_map_tier(0.0), 3);
        assert_eq!(shadow_map_tier(-5.0), 3);
    }

    #[test]
    fn test_shadow_map_pool_sizes() {
        let (mut backend, mut services) = services();
        let d = services.directional_shadow_map(&mut backend).unwrap();
        assert_eq!((d.width, d.height), (1024, 1024));
        let s = services.spot_shadow_map(&mut backend, 0.1).unwrap();
        assert_eq!(s.width, 128);
        assert_eq!(services.last_used_shadow_map(), Some(s));
        let c = services.point_shadow_map(&mut backend, 0.6).unwrap();
        assert_eq!(c.width, 256);
        assert_eq!(backend.texture_desc(c.id).unwrap().kind, TextureKind::Cube);
        let ds = services.shadow_depth_stencil(&mut backend).unwrap();
        assert_eq!(backend.texture_desc(ds).unwrap().width, 1024);
    }

    #[test]
    fn test_resized_pool_releases_old_maps() {
        let (mut backend, mut services) = services();
        services.directional_shadow_map(&mut backend).unwrap();
        services.shadow_depth_stencil(&mut backend).unwrap();
        services.set_shadow_map_sizes(&mut backend, 2048, 256);
        assert_eq!(backend.live_texture_count(), 0);
        assert_eq!(services.last_used_shadow_map(), None);
        let d = services.directional_shadow_map(&mut backend).unwrap();
        assert_eq!(d.width, 2048);
        let c = services.point_shadow_map(&mut backend, 1.0).unwrap();
        assert_eq!(c.width, 256);
    }

    #[test]
    fn test_without_shadow_keeps_fog_and_ambient() {
        let params = SceneDrawParams {
            ambient: Color::rgb(0.1, 0.1, 0.1),
            fog: Some(FogParams { color: Color::BLACK, start: 0.5 }),
            shadow_map: ShadowMapBinding::Flat(Surface { id: TextureId(3), width: 8, height: 8 }),
            shadow_map_matrix: Some(Mat4::identity()),
            variable_shadow_factor: Some(ShadowFactorRange { start: 1.0, end: 2.0 }),
        };
        let plain = params.without_shadow();
        assert_eq!(plain.shadow_map, ShadowMapBinding::None);
        assert_eq!(plain.variable_shadow_factor, None);
        assert_eq!(plain.fog, params.fog);
        assert_eq!(plain.ambient, params.ambient);
    }

    #[test]
    fn test_last_used_requires_loaded() {
        let (mut backend, mut services) = services();
        assert_eq!(services.last_used_cube_shadow_map(), None);
        services.point_shadow_map(&mut backend, 1.0).unwrap();
        assert!(services.last_used_cube_shadow_map().is_some());
        services.unload_all(&mut backend);
        assert_eq!(services.last_used_cube_shadow_map(), None);
    }

    #[test]
    fn test_invalid_format_rejected() {
        let mut config = EngineConfig::default();
        config.shadow_mapping.format = "DXT5".into();
        assert!(matches!(EngineServices::new(&config), Err(EngineError::InvalidShadowMapFormat(_))));
    }

    #[test]
    fn test_special_texture_sizes() {
        let (mut backend, mut services) = services();
        let tm = services.ensure_special_texture(&mut backend, SpecialTexture::ToneMappingVram, 1.0).unwrap();
        assert_eq!((tm.width, tm.height), (16, 12));
        let blur = services.ensure_special_texture(&mut backend, SpecialTexture::Blur1, 1.0).unwrap();
        assert_eq!((blur.width, blur.height), (200, 150));
        let fb = services.ensure_special_texture(&mut backend, SpecialTexture::Feedback, 1.0).unwrap();
        assert_eq!((fb.width, fb.height), (400, 300));
        assert_eq!(SpecialTexture::ToneMappingVram.size(100, 100), (4, 4));
    }

    #[test]
    fn test_maintenance_unloads_unused() {
        let (mut backend, mut services) = services();
        services.ensure_special_texture(&mut backend, SpecialTexture::Screen, 1.0).unwrap();
        services.ensure_special_texture(&mut backend, SpecialTexture::Blur1, 1.0).unwrap();

        // Screen keeps being used, blur does not
        services.ensure_special_texture(&mut backend, SpecialTexture::Screen, 35.0).unwrap();
        services.update(&mut backend, 5.0);
        assert!(services.try_get_special_texture(SpecialTexture::Blur1).is_some());
        services.update(&mut backend, 40.0);
        assert!(services.try_get_special_texture(SpecialTexture::Blur1).is_none());
        assert!(services.try_get_special_texture(SpecialTexture::Screen).is_some());
    }

    #[test]
    fn test_special_textures_absent_without_postprocessing() {
        let mut config = EngineConfig::default();
        config.postprocessing.enabled = false;
        let mut backend = RecordingBackend::new(800, 600);
        let mut services = EngineServices::new(&config).unwrap();
        assert!(!services.has_special_textures());
        assert!(services.ensure_special_texture(&mut backend, SpecialTexture::Screen, 0.0).is_err());

        services.create_special_textures();
        services.set_special_textures_size(&mut backend, 800, 600);
        services.ensure_special_texture(&mut backend, SpecialTexture::Screen, 0.0).unwrap();
        services.destroy_special_textures(&mut backend);
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_base_pass_binds_ambient_and_color() {
        let (mut backend, mut services) = services();
        let config = EngineConfig::default();
        let scene = SceneDrawParams { ambient: Color::rgb(0.2, 0.2, 0.2), ..SceneDrawParams::default() };
        let cam = camera();
        let material = Material::opaque("Rock");
        let entity = EntityDrawParams::default();

        let f = services
            .setup_state_material(&mut backend, &config, Pass::Base, &scene, Some(&cam), &material, &entity, None)
            .unwrap();
        assert_eq!(f.ambient_mode, AmbientMode::Color);
        let p = last_params(&backend);
        assert!(p.contains(ShaderParam::AmbientColor));
        assert!(p.contains(ShaderParam::DiffuseColor));
        assert!(!p.contains(ShaderParam::TeamColor));
        assert!(!p.contains(ShaderParam::CameraPos));
        assert_eq!(p.get(ShaderParam::WorldViewProj), Some(&ParamValue::from(*cam.matrices().view_proj())));
        assert_eq!(services.main_shader_count(), 1);
        assert!(backend.calls().iter().any(|c| matches!(c, Call::ApplyRenderState(_))));
    }

    #[test]
    fn test_team_color_for_modulated_opaque() {
        let (mut backend, mut services) = services();
        let config = EngineConfig::default();
        let scene = SceneDrawParams { ambient: Color::rgb(0.2, 0.2, 0.2), ..SceneDrawParams::default() };
        let mut material = Material::opaque("Hull");
        if let Some(op) = material.as_opaque_mut() {
            op.solid.color_mode = SolidColorMode::Modulate;
        }
        services
            .setup_state_material(&mut backend, &config, Pass::Base, &scene, Some(&camera()), &material, &EntityDrawParams::default(), None)
            .unwrap();
        assert!(last_params(&backend).contains(ShaderParam::TeamColor));
    }

    #[test]
    fn test_point_pass_with_shadow_map() {
        let (mut backend, mut services) = services();
        let config = EngineConfig::default();
        let cube = services.point_shadow_map(&mut backend, 1.0).unwrap();
        let scene = SceneDrawParams {
            shadow_map: ShadowMapBinding::Cube(cube),
            shadow_map_matrix: Some(Mat4::identity()),
            ..SceneDrawParams::default()
        };
        let point = PointLight::new(Color::WHITE, Vec3::new(4.0, 0.0, 0.0), 8.0);
        let entity = EntityDrawParams { world_size: 2.0, ..EntityDrawParams::default() };
        let f = services
            .setup_state_material(
                &mut backend,
                &config,
                Pass::Point,
                &scene,
                Some(&camera()),
                &Material::opaque("Rock"),
                &entity,
                Some(LightRef::Point(&point)),
            )
            .unwrap();
        assert!(f.point_shadow_map);
        let p = last_params(&backend);
        assert_eq!(p.float(ShaderParam::ShadowMapSize), Some(512.0));
        assert_eq!(p.float(ShaderParam::LightRangeSqWorld), Some(64.0));
        assert_eq!(p.float(ShaderParam::LightRangeSq), Some(16.0));
        assert_eq!(p.float(ShaderParam::ShadowEpsilon), Some(config.shadow_mapping.epsilon));
        assert!(p.contains(ShaderParam::SpecularColor));
        assert!(p.contains(ShaderParam::CameraPos));
    }

    #[test]
    fn test_directional_pass_variable_shadow_factor() {
        let (mut backend, mut services) = services();
        let config = EngineConfig::default();
        let map = services.directional_shadow_map(&mut backend).unwrap();
        let scene = SceneDrawParams {
            shadow_map: ShadowMapBinding::Flat(map),
            shadow_map_matrix: Some(Mat4::identity()),
            variable_shadow_factor: Some(ShadowFactorRange { start: 50.0, end: 100.0 }),
            ..SceneDrawParams::default()
        };
        let light = DirectionalLight::new(Color::WHITE, Vec3::new(0.0, -1.0, 0.0));
        services
            .setup_state_material(
                &mut backend,
                &config,
                Pass::Directional,
                &scene,
                Some(&camera()),
                &Material::opaque("Rock"),
                &EntityDrawParams::default(),
                Some(LightRef::Directional(&light)),
            )
            .unwrap();
        let p = last_params(&backend);
        assert_relative_eq!(p.float(ShaderParam::ShadowFactorA).unwrap(), 0.02);
        assert_relative_eq!(p.float(ShaderParam::ShadowFactorB).unwrap(), -1.0);
        assert_eq!(p.get(ShaderParam::DirToLight), Some(&ParamValue::Vec4(Vec4::new(0.0, 1.0, 0.0, 0.0))));
    }

    #[test]
    fn test_spot_cone_params() {
        let (mut backend, mut services) = services();
        let spot = SpotLight::new(Color::WHITE, Vec3::zeros(), POSITIVE_Z, 10.0, std::f32::consts::FRAC_PI_2);
        services
            .setup_state_material(
                &mut backend,
                &EngineConfig::default(),
                Pass::Spot,
                &SceneDrawParams::default(),
                Some(&camera()),
                &Material::opaque("Rock"),
                &EntityDrawParams::default(),
                Some(LightRef::Spot(&spot)),
            )
            .unwrap();
        let p = last_params(&backend);
        let cos = std::f32::consts::FRAC_PI_4.cos();
        assert_relative_eq!(p.float(ShaderParam::LightCosFov2).unwrap(), cos);
        assert_relative_eq!(p.float(ShaderParam::LightCosFov2Factor).unwrap(), 1.0 / (1.0 - cos));
        assert!(!p.contains(ShaderParam::ShadowMapTexture));
    }

    #[test]
    fn test_shadow_pass_without_camera_uses_shadow_matrix() {
        let (mut backend, mut services) = services();
        let vp = Mat4::new_scaling(2.0);
        let scene = SceneDrawParams { shadow_map_matrix: Some(vp), ..SceneDrawParams::default() };
        let mut alpha_tested = OpaqueParams::default();
        alpha_tested.alpha_testing = 128;
        let material = Material::new("Leaves", MaterialKind::Opaque(alpha_tested));
        services
            .setup_state_material(
                &mut backend,
                &EngineConfig::default(),
                Pass::ShadowMap,
                &scene,
                None,
                &material,
                &EntityDrawParams::default(),
                None,
            )
            .unwrap();
        let p = last_params(&backend);
        assert_eq!(p.get(ShaderParam::WorldViewProj), Some(&ParamValue::from(vp)));
        assert!(p.contains(ShaderParam::DiffuseColor));

        let err = services.setup_state_material(
            &mut backend,
            &EngineConfig::default(),
            Pass::ShadowMap,
            &SceneDrawParams::default(),
            None,
            &material,
            &EntityDrawParams::default(),
            None,
        );
        assert!(matches!(err, Err(EngineError::InvalidHandle("camera"))));
    }

    #[test]
    fn test_translucent_fog_factors() {
        let (mut backend, mut services) = services();
        let scene = SceneDrawParams {
            fog: Some(FogParams { color: Color::rgb(0.5, 0.5, 0.5), start: 0.5 }),
            ..SceneDrawParams::default()
        };
        services
            .setup_state_material(
                &mut backend,
                &EngineConfig::default(),
                Pass::Translucent,
                &scene,
                Some(&camera()),
                &Material::translucent("Glass"),
                &EntityDrawParams::default(),
                None,
            )
            .unwrap();
        let p = last_params(&backend);
        assert_eq!(p.get(ShaderParam::FogFactors), Some(&ParamValue::Vec4(Vec4::new(0.02, -1.0, 0.0, 0.0))));
    }

    #[test]
    fn test_pp_setup_luminance_and_unsetup() {
        let (mut backend, mut services) = services();
        let screen = services.ensure_special_texture(&mut backend, SpecialTexture::Screen, 0.0).unwrap();
        let function = PpFunction { grayscale_factor: 0.5, ..PpFunction::default() };
        let tm = PpToneMapping::new(1.0);
        let f = services.setup_state_pp(&mut backend, screen.id, Some(&function), Some(&tm), true).unwrap();
        assert_eq!(f.grayscale, GrayscaleMode::Partial);
        assert!(!f.function);
        let p = last_params(&backend);
        assert_eq!(p.float(ShaderParam::GrayscaleFactor), Some(0.5));
        assert_eq!(p.float(ShaderParam::LuminanceFactor), Some(1.0));
        assert!(p.contains(ShaderParam::PerturbationMap));
        assert!(!p.contains(ShaderParam::AFactor));
        assert_eq!(services.pp_shader_count(), 1);

        services.unsetup_state(&mut backend);
        assert_eq!(backend.count(|c| matches!(c, Call::EndProgram)), 1);
        assert_eq!(backend.count(|c| matches!(c, Call::BindTexture(_, None))), 3);
        services.unsetup_state(&mut backend);
        assert_eq!(backend.count(|c| matches!(c, Call::EndProgram)), 1);
    }

    #[test]
    fn test_heat_params() {
        let (mut backend, mut services) = services();
        let cam = camera();
        services.setup_state_heat(&mut backend, &cam, &Mat4::identity(), &Mat4::identity()).unwrap();
        let p = last_params(&backend);
        assert_eq!(p.float(ShaderParam::ZFar), Some(50.0));
        assert_eq!(p.get(ShaderParam::DirToCam), Some(&ParamValue::Vec4(Vec4::new(0.0, 0.0, -1.0, 0.0))));
    }

    #[test]
    fn test_directional_view_proj_covers_box() {
        let b = BoundingBox::new(Vec3::new(-10.0, -5.0, -10.0), Vec3::new(10.0, 5.0, 10.0));
        let dir = safe_normalize(&Vec3::new(0.3, -1.0, 0.2));
        let vp = find_directional_view_proj(&b, &dir);
        for corner in b.corners() {
            let p = transform_coord(&vp, &corner);
            assert!(p.x >= -1.001 && p.x <= 1.001);
            assert!(p.y >= -1.001 && p.y <= 1.001);
            assert!(p.z >= -0.001 && p.z <= 1.001);
        }
    }

    #[test]
    fn test_directional_view_proj_straight_down() {
        let b = BoundingBox::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let vp = find_directional_view_proj(&b, &Vec3::new(0.0, -1.0, 0.0));
        let p = transform_coord(&vp, &Vec3::zeros());
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-5);
    }
}
