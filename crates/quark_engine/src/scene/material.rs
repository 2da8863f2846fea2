//! Materials and the per-scene material collection
//!
//! A [`Material`] carries everything the shader dispatch needs to pick a
//! program variant and a render state: its kind-specific parameters live
//! in [`MaterialKind`], the parameters shared by every kind on the
//! material itself.

use std::collections::HashMap;

use bitflags::bitflags;
use log::debug;

use crate::error::{EngineError, EngineResult};
use crate::foundation::collections::{MaterialHandle, SlotMap};
use crate::foundation::math::Color;

bitflags! {
    /// Kinds of ray test a material or entity takes part in
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CollisionType: u32 {
        /// Physical test, e.g. a shot
        const PHYSICAL = 0x01;
        /// Optical test, e.g. a light ray; invisible entities never hit
        const OPTICAL = 0x02;
        /// Both
        const BOTH = Self::PHYSICAL.bits() | Self::OPTICAL.bits();
    }
}

/// How a translucent or wireframe surface blends over the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Interpolate by alpha
    #[default]
    Lerp,
    /// Add
    Add,
    /// Subtract
    Sub,
}

/// Wireframe color source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WireframeColorMode {
    /// Color and alpha from the material
    #[default]
    Material,
    /// Color and alpha from the entity team color
    Entity,
    /// Material color times team color
    Modulate,
}

/// Solid surface color source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SolidColorMode {
    /// Color from the material
    #[default]
    Material,
    /// Material color times team color
    Modulate,
    /// Material or team color, interpolated by diffuse alpha
    LerpAlpha,
}

/// Translucent alpha source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlphaMode {
    /// Alpha from the material
    #[default]
    Material,
    /// Alpha from the entity team color
    Entity,
    /// Material alpha times team alpha
    Modulate,
}

/// Specular highlight model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpecularMode {
    /// No specular
    None,
    /// Blinn-Phong specular
    #[default]
    Normal,
    /// Anisotropic along the tangent (per-pixel without normal map only)
    AnisoTangent,
    /// Anisotropic along the binormal (per-pixel without normal map only)
    AnisoBinormal,
}

/// Parameters shared by opaque and translucent materials
#[derive(Debug, Clone, PartialEq)]
pub struct SolidParams {
    /// Diffuse texture name; empty means `diffuse_color` is used
    pub diffuse_texture: String,
    /// Uniform diffuse color
    pub diffuse_color: Color,
    /// Emissive texture name, may be empty
    pub emissive_texture: String,
    /// Environment cube texture name, may be empty
    pub environmental_texture: String,
    /// Transform texture coordinates by the entity texture matrix
    pub texture_animation: bool,
    /// Color source
    pub color_mode: SolidColorMode,
    /// Fresnel rim color; black disables the effect
    pub fresnel_color: Color,
    /// Fresnel exponent
    pub fresnel_power: f32,
}

impl Default for SolidParams {
    fn default() -> Self {
        Self {
            diffuse_texture: String::new(),
            diffuse_color: Color::WHITE,
            emissive_texture: String::new(),
            environmental_texture: String::new(),
            texture_animation: false,
            color_mode: SolidColorMode::Material,
            fresnel_color: Color::BLACK,
            fresnel_power: 1.0,
        }
    }
}

impl SolidParams {
    /// True when a diffuse texture is used
    pub fn has_diffuse_texture(&self) -> bool {
        !self.diffuse_texture.is_empty()
    }

    /// True when the Fresnel term is active
    pub fn has_fresnel(&self) -> bool {
        !self.fresnel_color.is_black()
    }
}

/// Opaque surface
#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueParams {
    /// Shared solid parameters
    pub solid: SolidParams,
    /// Alpha-test reference; 0 disables alpha testing
    pub alpha_testing: u8,
    /// Half-Lambert diffuse
    pub half_lambert: bool,
    /// Per-pixel lighting
    pub per_pixel: bool,
    /// Normal map name; used only with per-pixel lighting
    pub normal_texture: String,
    /// Specular model
    pub specular_mode: SpecularMode,
    /// Specular color
    pub specular_color: Color,
    /// Specular exponent
    pub specular_power: f32,
    /// Scale specular by diffuse alpha
    pub gloss_mapping: bool,
}

impl Default for OpaqueParams {
    fn default() -> Self {
        Self {
            solid: SolidParams::default(),
            alpha_testing: 0,
            half_lambert: false,
            per_pixel: false,
            normal_texture: String::new(),
            specular_mode: SpecularMode::Normal,
            specular_color: Color::WHITE,
            specular_power: 16.0,
            gloss_mapping: false,
        }
    }
}

/// Translucent surface
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TranslucentParams {
    /// Shared solid parameters
    pub solid: SolidParams,
    /// Blending
    pub blend_mode: BlendMode,
    /// Alpha source
    pub alpha_mode: AlphaMode,
}

/// Wireframe surface
#[derive(Debug, Clone, PartialEq)]
pub struct WireframeParams {
    /// Line color
    pub color: Color,
    /// Blending
    pub blend_mode: BlendMode,
    /// Color source
    pub color_mode: WireframeColorMode,
}

impl Default for WireframeParams {
    fn default() -> Self {
        Self { color: Color::WHITE, blend_mode: BlendMode::Lerp, color_mode: WireframeColorMode::Material }
    }
}

/// Number of texture layers blended on one terrain patch
pub const TERRAIN_FORMS_PER_PATCH: usize = 4;

/// Terrain patch surface, owned by the terrain renderer
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainParams {
    /// Layer texture names
    pub textures: [String; TERRAIN_FORMS_PER_PATCH],
    /// Texture coordinate scale per layer
    pub tex_scale: [f32; TERRAIN_FORMS_PER_PATCH],
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self { textures: Default::default(), tex_scale: [1.0; TERRAIN_FORMS_PER_PATCH] }
    }
}

/// Kind-specific material parameters
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialKind {
    /// Lines only
    Wireframe(WireframeParams),
    /// Blended, drawn back to front
    Translucent(TranslucentParams),
    /// Lit, shadowed and fogged in multiple passes
    Opaque(OpaqueParams),
    /// Terrain patch layers
    Terrain(TerrainParams),
}

impl MaterialKind {
    /// Kind name for diagnostics
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Wireframe(_) => "wireframe",
            Self::Translucent(_) => "translucent",
            Self::Opaque(_) => "opaque",
            Self::Terrain(_) => "terrain",
        }
    }
}

/// Named surface description
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    name: String,
    /// Disable backface culling
    pub two_sided: bool,
    /// Ray tests this material takes part in
    pub collision_type: CollisionType,
    /// Kind-specific parameters
    pub kind: MaterialKind,
}

impl Material {
    /// Create a material of any kind with default shared parameters
    pub fn new(name: impl Into<String>, kind: MaterialKind) -> Self {
        Self { name: name.into(), two_sided: false, collision_type: CollisionType::BOTH, kind }
    }

    /// Opaque material with default parameters
    pub fn opaque(name: impl Into<String>) -> Self {
        Self::new(name, MaterialKind::Opaque(OpaqueParams::default()))
    }

    /// Opaque material sampling a diffuse texture
    pub fn opaque_textured(name: impl Into<String>, diffuse_texture: impl Into<String>) -> Self {
        let solid = SolidParams { diffuse_texture: diffuse_texture.into(), ..SolidParams::default() };
        Self::new(name, MaterialKind::Opaque(OpaqueParams { solid, ..OpaqueParams::default() }))
    }

    /// Translucent material with default parameters
    pub fn translucent(name: impl Into<String>) -> Self {
        Self::new(name, MaterialKind::Translucent(TranslucentParams::default()))
    }

    /// Wireframe material with the given color
    pub fn wireframe(name: impl Into<String>, color: Color) -> Self {
        Self::new(name, MaterialKind::Wireframe(WireframeParams { color, ..WireframeParams::default() }))
    }

    /// Terrain patch material
    pub fn terrain(params: TerrainParams) -> Self {
        Self::new(String::new(), MaterialKind::Terrain(params))
    }

    /// Material name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when this material takes part in the given ray test
    pub fn check_collision_type(&self, collision_type: CollisionType) -> bool {
        self.collision_type.intersects(collision_type)
    }

    /// True for opaque materials
    pub const fn is_opaque(&self) -> bool {
        matches!(self.kind, MaterialKind::Opaque(_))
    }

    /// Shared solid parameters of opaque and translucent materials
    pub const fn solid(&self) -> Option<&SolidParams> {
        match &self.kind {
            MaterialKind::Opaque(p) => Some(&p.solid),
            MaterialKind::Translucent(p) => Some(&p.solid),
            _ => None,
        }
    }

    /// Opaque parameters
    pub const fn as_opaque(&self) -> Option<&OpaqueParams> {
        match &self.kind {
            MaterialKind::Opaque(p) => Some(p),
            _ => None,
        }
    }

    /// Opaque parameters, mutable
    pub fn as_opaque_mut(&mut self) -> Option<&mut OpaqueParams> {
        match &mut self.kind {
            MaterialKind::Opaque(p) => Some(p),
            _ => None,
        }
    }

    /// Translucent parameters
    pub const fn as_translucent(&self) -> Option<&TranslucentParams> {
        match &self.kind {
            MaterialKind::Translucent(p) => Some(p),
            _ => None,
        }
    }

    /// Wireframe parameters
    pub const fn as_wireframe(&self) -> Option<&WireframeParams> {
        match &self.kind {
            MaterialKind::Wireframe(p) => Some(p),
            _ => None,
        }
    }
}

/// Scene-owned set of materials addressed by handle or by name
#[derive(Debug, Default)]
pub struct MaterialCollection {
    materials: SlotMap<MaterialHandle, Material>,
    by_name: HashMap<String, MaterialHandle>,
}

impl MaterialCollection {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a material. A name already in use keeps pointing at the older material.
    pub fn register(&mut self, material: Material) -> MaterialHandle {
        let name = material.name().to_string();
        let handle = self.materials.insert(material);
        if !name.is_empty() {
            self.by_name.entry(name).or_insert(handle);
        }
        debug!("Registered material {:?}", handle);
        handle
    }

    /// Remove a material, returning it
    pub fn unregister(&mut self, handle: MaterialHandle) -> Option<Material> {
        let material = self.materials.remove(handle)?;
        if self.by_name.get(material.name()) == Some(&handle) {
            self.by_name.remove(material.name());
        }
        Some(material)
    }

    /// True when a material with this name is registered
    pub fn exists_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// True when the handle refers to a registered material
    pub fn exists(&self, handle: MaterialHandle) -> bool {
        self.materials.contains_key(handle)
    }

    /// Material by handle
    pub fn get(&self, handle: MaterialHandle) -> Option<&Material> {
        self.materials.get(handle)
    }

    /// Material by handle, mutable
    pub fn get_mut(&mut self, handle: MaterialHandle) -> Option<&mut Material> {
        self.materials.get_mut(handle)
    }

    /// Handle of the material with this name
    pub fn get_by_name(&self, name: &str) -> Option<MaterialHandle> {
        self.by_name.get(name).copied()
    }

    /// Handle of the material with this name, or an error
    pub fn must_get_by_name(&self, name: &str) -> EngineResult<MaterialHandle> {
        self.get_by_name(name).ok_or_else(|| EngineError::MaterialNotFound(name.to_string()))
    }

    /// Handle of the opaque material with this name, or an error
    pub fn must_get_opaque_by_name(&self, name: &str) -> EngineResult<MaterialHandle> {
        let handle = self.must_get_by_name(name)?;
        match self.materials.get(handle) {
            Some(m) if m.is_opaque() => Ok(handle),
            _ => Err(EngineError::MaterialKindMismatch { name: name.to_string(), expected: "opaque" }),
        }
    }

    /// Number of registered materials
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Iterate over all materials
    pub fn iter(&self) -> impl Iterator<Item = (MaterialHandle, &Material)> {
        self.materials.iter()
    }
}
