//! Shader parameter blocks
//!
//! A [`ParamBlock`] is the list of named values bound to a program before
//! a draw. Parameters are only added when the selected variant declares
//! them, so the block doubles as a record of what a variant consumes.

use crate::foundation::math::{Color, Mat4, Vec3, Vec4};
use crate::render::backend::TextureId;

/// Every parameter a program may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ShaderParam {
    // Main shader
    WorldViewProj,
    EmissiveTexture,
    DiffuseTexture,
    DiffuseColor,
    TeamColor,
    AmbientColor,
    TextureMatrix,
    CameraPos,
    EnvironmentalTexture,
    FogColor,
    FogFactors,
    FresnelColor,
    FresnelPower,
    LightColor,
    DirToLight,
    NormalTexture,
    SpecularColor,
    SpecularPower,
    LightPos,
    LightRangeSq,
    LightCosFov2,
    LightCosFov2Factor,
    ShadowFactor,
    ShadowFactorA,
    ShadowFactorB,
    ShadowMapTexture,
    ShadowMapMatrix,
    ShadowMapSize,
    ShadowMapSizeRcp,
    ShadowEpsilon,
    LightRangeSqWorld,
    BoneMatrices,
    TerrainTexture0,
    TerrainTexture1,
    TerrainTexture2,
    TerrainTexture3,
    TerrainTexScale,
    // Postprocess shader
    Texture,
    GrayscaleFactor,
    AFactor,
    BFactor,
    LuminanceFactor,
    PerturbationMap,
    PerturbationOffset,
    SampleOffset,
    // Heat shader
    ZFar,
    DirToCam,
}

impl ShaderParam {
    /// Terrain texture slots in order
    pub const TERRAIN_TEXTURES: [Self; 4] =
        [Self::TerrainTexture0, Self::TerrainTexture1, Self::TerrainTexture2, Self::TerrainTexture3];

    /// Name the parameter is declared under in program source
    pub const fn name(self) -> &'static str {
        match self {
            Self::WorldViewProj => "WorldViewProj",
            Self::EmissiveTexture => "EmissiveTexture",
            Self::DiffuseTexture => "DiffuseTexture",
            Self::DiffuseColor => "DiffuseColor",
            Self::TeamColor => "TeamColor",
            Self::AmbientColor => "AmbientColor",
            Self::TextureMatrix => "TextureMatrix",
            Self::CameraPos => "CameraPos",
            Self::EnvironmentalTexture => "EnvironmentalTexture",
            Self::FogColor => "FogColor",
            Self::FogFactors => "FogFactors",
            Self::FresnelColor => "FresnelColor",
            Self::FresnelPower => "FresnelPower",
            Self::LightColor => "LightColor",
            Self::DirToLight => "DirToLight",
            Self::NormalTexture => "NormalTexture",
            Self::SpecularColor => "SpecularColor",
            Self::SpecularPower => "SpecularPower",
            Self::LightPos => "LightPos",
            Self::LightRangeSq => "LightRangeSq",
            Self::LightCosFov2 => "LightCosFov2",
            Self::LightCosFov2Factor => "LightCosFov2Factor",
            Self::ShadowFactor => "ShadowFactor",
            Self::ShadowFactorA => "ShadowFactorA",
            Self::ShadowFactorB => "ShadowFactorB",
            Self::ShadowMapTexture => "ShadowMapTexture",
            Self::ShadowMapMatrix => "ShadowMapMatrix",
            Self::ShadowMapSize => "ShadowMapSize",
            Self::ShadowMapSizeRcp => "ShadowMapSizeRcp",
            Self::ShadowEpsilon => "ShadowEpsilon",
            Self::LightRangeSqWorld => "LightRangeSq_World",
            Self::BoneMatrices => "BoneMatrices",
            Self::TerrainTexture0 => "TerrainTexture0",
            Self::TerrainTexture1 => "TerrainTexture1",
            Self::TerrainTexture2 => "TerrainTexture2",
            Self::TerrainTexture3 => "TerrainTexture3",
            Self::TerrainTexScale => "TerrainTexScale",
            Self::Texture => "Texture",
            Self::GrayscaleFactor => "GrayscaleFactor",
            Self::AFactor => "AFactor",
            Self::BFactor => "BFactor",
            Self::LuminanceFactor => "LuminanceFactor",
            Self::PerturbationMap => "PerturbationMap",
            Self::PerturbationOffset => "PerturbationOffset",
            Self::SampleOffset => "SampleOffset",
            Self::ZFar => "ZFar",
            Self::DirToCam => "DirToCam",
        }
    }
}

/// Value bound to a parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Scalar
    Float(f32),
    /// 3-component vector
    Vec3(Vec3),
    /// 4-component vector
    Vec4(Vec4),
    /// Matrix
    Matrix(Mat4),
    /// Matrix array
    Matrices(Vec<Mat4>),
    /// Texture, `None` unbinds
    Texture(Option<TextureId>),
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<Vec3> for ParamValue {
    fn from(v: Vec3) -> Self {
        Self::Vec3(v)
    }
}

impl From<Vec4> for ParamValue {
    fn from(v: Vec4) -> Self {
        Self::Vec4(v)
    }
}

impl From<Color> for ParamValue {
    fn from(c: Color) -> Self {
        Self::Vec4(c.to_vec4())
    }
}

impl From<Mat4> for ParamValue {
    fn from(m: Mat4) -> Self {
        Self::Matrix(m)
    }
}

impl From<TextureId> for ParamValue {
    fn from(t: TextureId) -> Self {
        Self::Texture(Some(t))
    }
}

/// Ordered set of parameter values for one draw
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamBlock {
    values: Vec<(ShaderParam, ParamValue)>,
}

impl ParamBlock {
    /// Create an empty block
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing an earlier value
    pub fn set(&mut self, param: ShaderParam, value: impl Into<ParamValue>) {
        let value = value.into();
        if let Some(slot) = self.values.iter_mut().find(|(p, _)| *p == param) {
            slot.1 = value;
        } else {
            self.values.push((param, value));
        }
    }

    /// Value of a parameter, if set
    pub fn get(&self, param: ShaderParam) -> Option<&ParamValue> {
        self.values.iter().find(|(p, _)| *p == param).map(|(_, v)| v)
    }

    /// True when the parameter is set
    pub fn contains(&self, param: ShaderParam) -> bool {
        self.get(param).is_some()
    }

    /// Scalar value of a parameter
    pub fn float(&self, param: ShaderParam) -> Option<f32> {
        match self.get(param) {
            Some(ParamValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// Number of parameters set
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing is set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &(ShaderParam, ParamValue)> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_existing_value() {
        let mut block = ParamBlock::new();
        block.set(ShaderParam::FresnelPower, 1.0);
        block.set(ShaderParam::DiffuseColor, Color::WHITE);
        block.set(ShaderParam::FresnelPower, 2.0);
        assert_eq!(block.len(), 2);
        assert_eq!(block.float(ShaderParam::FresnelPower), Some(2.0));
    }

    #[test]
    fn test_world_space_range_name() {
        assert_eq!(ShaderParam::LightRangeSqWorld.name(), "LightRangeSq_World");
    }
}
