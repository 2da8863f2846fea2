//! Shader variant selection
//!
//! [`ShaderFeatures`] names one compiled variant of the main material
//! program; [`PpFeatures`] one variant of the postprocess program. Both
//! are plain structs hashed structurally and used as
//! [`ShaderCache`](super::resources::ShaderCache) keys.

use crate::config::ShadowMapFormat;
use crate::foundation::math::Color;
use crate::render::resources::ShaderKey;
use crate::scene::light::LightRef;
use crate::scene::material::{Material, MaterialKind};

/// Render pass, numbered as the main program expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Ambient, emissive and environment; lays down depth
    Base = 0,
    /// Blend towards the fog color
    Fog = 1,
    /// Wireframe materials
    Wireframe = 2,
    /// Translucent materials
    Translucent = 3,
    /// Additive directional light
    Directional = 4,
    /// Additive point light
    Point = 5,
    /// Additive spot light
    Spot = 6,
    /// Depth into a shadow map
    ShadowMap = 7,
}

impl Pass {
    /// True for the three additive light passes
    pub const fn is_light(self) -> bool {
        matches!(self, Self::Directional | Self::Point | Self::Spot)
    }
}

/// How ambient light reaches a surface in the base pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AmbientMode {
    /// Black ambient
    #[default]
    None = 0,
    /// Full brightness, used when lighting is off
    Full = 1,
    /// Scene ambient color
    Color = 2,
}

/// Shadow-map sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShadowMapMode {
    /// No shadow map
    #[default]
    None = 0,
    /// Float depth surface
    Float = 1,
    /// Depth packed into 8-bit color
    Packed = 2,
}

impl From<ShadowMapFormat> for ShadowMapMode {
    fn from(format: ShadowMapFormat) -> Self {
        match format {
            ShadowMapFormat::R32F => Self::Float,
            ShadowMapFormat::A8R8G8B8 => Self::Packed,
        }
    }
}

/// One variant of the main material program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::struct_excessive_bools)]
pub struct ShaderFeatures {
    /// Pass
    pub pass: Pass,
    /// Emissive texture
    pub emissive: bool,
    /// Ambient source
    pub ambient_mode: AmbientMode,
    /// Diffuse texture instead of color
    pub diffuse_texture: bool,
    /// Color source, as the material enum ordinal
    pub color_mode: u8,
    /// Entity texture matrix
    pub texture_animation: bool,
    /// Environment cube map
    pub environmental_mapping: bool,
    /// Alpha testing
    pub alpha_testing: bool,
    /// Fog computed in the same pass
    pub use_fog: bool,
    /// Alpha source, as the material enum ordinal
    pub alpha_mode: u8,
    /// Fresnel rim term
    pub fresnel: bool,
    /// Half-Lambert diffuse
    pub half_lambert: bool,
    /// Per-pixel lighting
    pub per_pixel: bool,
    /// Normal map
    pub normal_texture: bool,
    /// Specular model, as the material enum ordinal
    pub specular: u8,
    /// Gloss from diffuse alpha
    pub gloss_map: bool,
    /// Smooth spot cone edge
    pub spot_smooth: bool,
    /// Shadow-map sampling
    pub shadow_map_mode: ShadowMapMode,
    /// Linear shadow fade over the light's range
    pub variable_shadow_factor: bool,
    /// Cube shadow map of a point light
    pub point_shadow_map: bool,
    /// Bone skinning
    pub skinning: bool,
    /// Terrain layer blending
    pub terrain: bool,
}

impl ShaderFeatures {
    /// Variant with every feature off
    pub const fn for_pass(pass: Pass) -> Self {
        Self {
            pass,
            emissive: false,
            ambient_mode: AmbientMode::None,
            diffuse_texture: false,
            color_mode: 0,
            texture_animation: false,
            environmental_mapping: false,
            alpha_testing: false,
            use_fog: false,
            alpha_mode: 0,
            fresnel: false,
            half_lambert: false,
            per_pixel: false,
            normal_texture: false,
            specular: 0,
            gloss_map: false,
            spot_smooth: false,
            shadow_map_mode: ShadowMapMode::None,
            variable_shadow_factor: false,
            point_shadow_map: false,
            skinning: false,
            terrain: false,
        }
    }
}

/// Everything the main variant depends on besides the material
#[derive(Debug, Clone, Copy)]
pub struct FeatureInputs<'a> {
    /// Pass being drawn
    pub pass: Pass,
    /// Light of a light or shadow-map pass
    pub light: Option<LightRef<'a>>,
    /// Global lighting switch
    pub lighting_enabled: bool,
    /// Entity takes part in lighting
    pub use_lighting: bool,
    /// Entity supplies bone matrices
    pub skinning: bool,
    /// Scene ambient color
    pub ambient: Color,
    /// Scene fog switch
    pub fog_enabled: bool,
    /// Configured shadow-map format
    pub shadow_map_format: ShadowMapFormat,
    /// A shadow map is bound for this light pass
    pub shadow_map_bound: bool,
    /// Directional shadow fades out over the light's range
    pub variable_shadow_factor: bool,
}

impl ShaderFeatures {
    /// Select the variant for drawing `material` with the given inputs
    pub fn select(material: &Material, inputs: &FeatureInputs<'_>) -> Self {
        let pass = inputs.pass;
        let mut f = Self::for_pass(pass);
        f.skinning = inputs.skinning;

        match &material.kind {
            MaterialKind::Opaque(_) | MaterialKind::Terrain(_) => {
                let op = material.as_opaque();
                f.terrain = matches!(material.kind, MaterialKind::Terrain(_));
                f.alpha_testing = op.is_some_and(|op| op.alpha_testing > 0);

                match pass {
                    Pass::Base => {
                        f.ambient_mode = if !inputs.lighting_enabled || !inputs.use_lighting || inputs.ambient == Color::WHITE {
                            AmbientMode::Full
                        } else if inputs.ambient == Color::BLACK {
                            AmbientMode::None
                        } else {
                            AmbientMode::Color
                        };
                        if let Some(op) = op {
                            f.emissive = !op.solid.emissive_texture.is_empty();
                            f.diffuse_texture = op.solid.has_diffuse_texture();
                            f.color_mode = op.solid.color_mode as u8;
                            f.texture_animation = op.solid.texture_animation;
                            f.environmental_mapping = !op.solid.environmental_texture.is_empty();
                            f.fresnel = op.solid.has_fresnel();
                        }
                    }
                    Pass::Fog => {}
                    Pass::Directional | Pass::Point | Pass::Spot => {
                        let light = inputs.light;
                        f.half_lambert = light.is_some_and(|l| l.base().half_lambert) || op.is_some_and(|op| op.half_lambert);
                        if let Some(op) = op {
                            f.diffuse_texture = op.solid.has_diffuse_texture();
                            f.color_mode = op.solid.color_mode as u8;
                            f.texture_animation = op.solid.texture_animation;
                            f.per_pixel = op.per_pixel;
                            f.normal_texture = op.per_pixel && !op.normal_texture.is_empty();
                            if light.is_some_and(|l| l.base().cast_specular) {
                                f.specular = op.specular_mode as u8;
                            }
                            f.gloss_map = op.gloss_mapping;
                        }
                        if let Some(LightRef::Spot(spot)) = light {
                            f.spot_smooth = spot.smooth();
                        }
                        if inputs.shadow_map_bound {
                            f.shadow_map_mode = inputs.shadow_map_format.into();
                            f.variable_shadow_factor = pass == Pass::Directional && inputs.variable_shadow_factor;
                            f.point_shadow_map = pass == Pass::Point;
                        }
                    }
                    Pass::ShadowMap => {
                        f.shadow_map_mode = inputs.shadow_map_format.into();
                        f.point_shadow_map = matches!(inputs.light, Some(LightRef::Point(_)));
                        if let (true, Some(op)) = (f.alpha_testing, op) {
                            f.diffuse_texture = op.solid.has_diffuse_texture();
                            f.texture_animation = op.solid.texture_animation;
                        }
                    }
                    Pass::Wireframe | Pass::Translucent => {}
                }
            }
            MaterialKind::Wireframe(wf) => {
                f.color_mode = wf.color_mode as u8;
                f.use_fog = inputs.fog_enabled;
            }
            MaterialKind::Translucent(tr) => {
                f.emissive = !tr.solid.emissive_texture.is_empty();
                f.diffuse_texture = tr.solid.has_diffuse_texture();
                f.color_mode = tr.solid.color_mode as u8;
                f.texture_animation = tr.solid.texture_animation;
                f.environmental_mapping = !tr.solid.environmental_texture.is_empty();
                f.use_fog = inputs.fog_enabled;
                f.alpha_mode = tr.alpha_mode as u8;
                f.fresnel = tr.solid.has_fresnel();
            }
        }
        f
    }
}

impl ShaderKey for ShaderFeatures {
    fn defines(&self) -> Vec<(&'static str, u32)> {
        vec![
            ("PASS", self.pass as u32),
            ("EMISSIVE", u32::from(self.emissive)),
            ("AMBIENT_MODE", self.ambient_mode as u32),
            ("DIFFUSE_TEXTURE", u32::from(self.diffuse_texture)),
            ("COLOR_MODE", u32::from(self.color_mode)),
            ("TEXTURE_ANIMATION", u32::from(self.texture_animation)),
            ("ENVIRONMENTAL_MAPPING", u32::from(self.environmental_mapping)),
            ("ALPHA_TESTING", u32::from(self.alpha_testing)),
            ("USE_FOG", u32::from(self.use_fog)),
            ("ALPHA_MODE", u32::from(self.alpha_mode)),
            ("FRESNEL_TERM", u32::from(self.fresnel)),
            ("HALF_LAMBERT", u32::from(self.half_lambert)),
            ("PER_PIXEL", u32::from(self.per_pixel)),
            ("NORMAL_TEXTURE", u32::from(self.normal_texture)),
            ("SPECULAR", u32::from(self.specular)),
            ("GLOSS_MAP", u32::from(self.gloss_map)),
            ("SPOT_SMOOTH", u32::from(self.spot_smooth)),
            ("SHADOW_MAP_MODE", self.shadow_map_mode as u32),
            ("VARIABLE_SHADOW_FACTOR", u32::from(self.variable_shadow_factor)),
            ("POINT_SHADOW_MAP", u32::from(self.point_shadow_map)),
            ("SKINNING", u32::from(self.skinning)),
            ("TERRAIN", u32::from(self.terrain)),
        ]
    }
}

/// Grayscale blend of the postprocess program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GrayscaleMode {
    /// Color untouched
    #[default]
    Off = 0,
    /// Fully gray
    Full = 1,
    /// Interpolated by a factor
    Partial = 2,
}

impl GrayscaleMode {
    /// Mode for a grayscale factor
    pub fn from_factor(factor: f32) -> Self {
        if factor >= 0.999 {
            Self::Full
        } else if factor > 0.001 {
            Self::Partial
        } else {
            Self::Off
        }
    }
}

/// One variant of the postprocess program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PpFeatures {
    /// Grayscale blend
    pub grayscale: GrayscaleMode,
    /// Linear color function `c * a + b`
    pub function: bool,
    /// Brightness-adaptive exposure
    pub tone_mapping: bool,
    /// Heat-haze perturbation
    pub heat_haze: bool,
}

impl ShaderKey for PpFeatures {
    fn defines(&self) -> Vec<(&'static str, u32)> {
        vec![
            ("GRAYSCALE", self.grayscale as u32),
            ("FUNCTION", u32::from(self.function)),
            ("TONE_MAPPING", u32::from(self.tone_mapping)),
            ("HEAT_HAZE", u32::from(self.heat_haze)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::light::{BaseLight, PointLight, SpotLight};
    use crate::scene::material::{OpaqueParams, SolidParams, SpecularMode};

    fn inputs(pass: Pass) -> FeatureInputs<'static> {
        FeatureInputs {
            pass,
            light: None,
            lighting_enabled: true,
            use_lighting: true,
            skinning: false,
            ambient: Color::BLACK,
            fog_enabled: false,
            shadow_map_format: ShadowMapFormat::R32F,
            shadow_map_bound: false,
            variable_shadow_factor: false,
        }
    }

    #[test]
    fn test_ambient_mode_rules() {
        let m = Material::opaque("Rock");
        assert_eq!(ShaderFeatures::select(&m, &inputs(Pass::Base)).ambient_mode, AmbientMode::None);

        let mut i = inputs(Pass::Base);
        i.ambient = Color::rgb(0.2, 0.2, 0.2);
        assert_eq!(ShaderFeatures::select(&m, &i).ambient_mode, AmbientMode::Color);

        i.ambient = Color::WHITE;
        assert_eq!(ShaderFeatures::select(&m, &i).ambient_mode, AmbientMode::Full);

        let mut i = inputs(Pass::Base);
        i.lighting_enabled = false;
        assert_eq!(ShaderFeatures::select(&m, &i).ambient_mode, AmbientMode::Full);
    }

    #[test]
    fn test_light_pass_features() {
        let solid = SolidParams { diffuse_texture: "rock.dds".into(), ..SolidParams::default() };
        let params = OpaqueParams {
            solid,
            per_pixel: true,
            normal_texture: "rock_n.dds".into(),
            specular_mode: SpecularMode::AnisoTangent,
            ..OpaqueParams::default()
        };
        let m = Material::new("Rock", MaterialKind::Opaque(params));
        let mut spot = SpotLight::default();
        spot.set_smooth(true);
        let mut i = inputs(Pass::Spot);
        i.light = Some(LightRef::Spot(&spot));
        i.shadow_map_bound = true;
        i.shadow_map_format = ShadowMapFormat::A8R8G8B8;

        let f = ShaderFeatures::select(&m, &i);
        assert!(f.diffuse_texture && f.per_pixel && f.normal_texture && f.spot_smooth);
        assert_eq!(f.specular, SpecularMode::AnisoTangent as u8);
        assert_eq!(f.shadow_map_mode, ShadowMapMode::Packed);
        assert!(!f.point_shadow_map);
    }

    #[test]
    fn test_specular_needs_light_that_casts_it() {
        let m = Material::opaque("Rock");
        let mut point = PointLight::default();
        point.base_mut().cast_specular = false;
        let mut i = inputs(Pass::Point);
        i.light = Some(LightRef::Point(&point));
        assert_eq!(ShaderFeatures::select(&m, &i).specular, 0);
    }

    #[test]
    fn test_point_shadow_pass_flags() {
        let m = Material::opaque("Rock");
        let point = PointLight::default();
        let mut i = inputs(Pass::ShadowMap);
        i.light = Some(LightRef::Point(&point));
        let f = ShaderFeatures::select(&m, &i);
        assert_eq!(f.shadow_map_mode, ShadowMapMode::Float);
        assert!(f.point_shadow_map);

        let mut i = inputs(Pass::Point);
        i.light = Some(LightRef::Point(&point));
        i.shadow_map_bound = true;
        assert!(ShaderFeatures::select(&m, &i).point_shadow_map);
    }

    #[test]
    fn test_translucent_and_wireframe_fog() {
        let mut i = inputs(Pass::Translucent);
        i.fog_enabled = true;
        assert!(ShaderFeatures::select(&Material::translucent("Glass"), &i).use_fog);
        i.pass = Pass::Wireframe;
        let f = ShaderFeatures::select(&Material::wireframe("Grid", Color::WHITE), &i);
        assert!(f.use_fog);
        assert_eq!(f.ambient_mode, AmbientMode::None);
    }

    #[test]
    fn test_half_lambert_from_light() {
        let m = Material::opaque("Rock");
        let mut base = BaseLight::default();
        base.half_lambert = true;
        let spot = SpotLight::with_base(base);
        let mut i = inputs(Pass::Spot);
        i.light = Some(LightRef::Spot(&spot));
        assert!(ShaderFeatures::select(&m, &i).half_lambert);
    }

    #[test]
    fn test_grayscale_thresholds() {
        assert_eq!(GrayscaleMode::from_factor(1.0), GrayscaleMode::Full);
        assert_eq!(GrayscaleMode::from_factor(0.5), GrayscaleMode::Partial);
        assert_eq!(GrayscaleMode::from_factor(0.0), GrayscaleMode::Off);
    }

    #[test]
    fn test_defines_cover_every_axis() {
        assert_eq!(ShaderFeatures::for_pass(Pass::Fog).defines().len(), 22);
        assert_eq!(ShaderFeatures::for_pass(Pass::ShadowMap).defines()[0], ("PASS", 7));
    }
}
