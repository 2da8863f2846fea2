//! Device render state derived from a material and a pass
//!
//! Nothing is left to program defaults: [`RenderState::for_material`] is
//! the complete decision table applied before every material draw.

use crate::render::shader_features::Pass;
use crate::scene::material::{BlendMode, Material, MaterialKind};

/// Polygon fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    /// Filled triangles
    Solid,
    /// Edges only
    Wireframe,
}

/// Face culling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull counter-clockwise faces
    Ccw,
}

/// Depth and alpha comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    /// Pass when equal
    Equal,
    /// Pass when less or equal
    LessEqual,
    /// Pass when greater or equal
    GreaterEqual,
    /// Always pass
    Always,
}

/// Blend equation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    /// `src + dst`
    Add,
    /// `dst - src`
    RevSubtract,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    /// 1
    One,
    /// Source alpha
    SrcAlpha,
    /// 1 - source alpha
    InvSrcAlpha,
}

/// Enabled blending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    /// Equation
    pub op: BlendOp,
    /// Source factor
    pub src: BlendFactor,
    /// Destination factor
    pub dst: BlendFactor,
}

impl BlendState {
    /// Classic alpha interpolation
    pub const LERP: Self = Self { op: BlendOp::Add, src: BlendFactor::SrcAlpha, dst: BlendFactor::InvSrcAlpha };
    /// Alpha-weighted addition
    pub const ADD: Self = Self { op: BlendOp::Add, src: BlendFactor::SrcAlpha, dst: BlendFactor::One };
    /// Alpha-weighted subtraction from the target
    pub const SUB: Self = Self { op: BlendOp::RevSubtract, src: BlendFactor::SrcAlpha, dst: BlendFactor::One };
    /// Plain accumulation of light passes
    pub const ACCUMULATE: Self = Self { op: BlendOp::Add, src: BlendFactor::One, dst: BlendFactor::One };

    /// State for a material blend mode
    pub const fn from_mode(mode: BlendMode) -> Self {
        match mode {
            BlendMode::Lerp => Self::LERP,
            BlendMode::Add => Self::ADD,
            BlendMode::Sub => Self::SUB,
        }
    }
}

/// Enabled alpha test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlphaTest {
    /// Comparison against the reference
    pub func: CompareFunc,
    /// Reference value
    pub reference: u8,
}

/// Complete fixed-function state for one material draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    /// Depth testing
    pub z_enable: bool,
    /// Polygon fill
    pub fill: FillMode,
    /// Face culling
    pub cull: CullMode,
    /// Alpha test, `None` when disabled
    pub alpha_test: Option<AlphaTest>,
    /// Depth comparison
    pub z_func: CompareFunc,
    /// Blending, `None` when disabled
    pub blend: Option<BlendState>,
    /// Depth writes
    pub z_write: bool,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            z_enable: true,
            fill: FillMode::Solid,
            cull: CullMode::Ccw,
            alpha_test: None,
            z_func: CompareFunc::LessEqual,
            blend: None,
            z_write: true,
        }
    }
}

impl RenderState {
    /// State for drawing `material` in `pass`
    pub fn for_material(material: &Material, pass: Pass) -> Self {
        let filling = matches!(pass, Pass::Base | Pass::ShadowMap);
        let two_sided_cull = if material.two_sided { CullMode::None } else { CullMode::Ccw };

        match &material.kind {
            MaterialKind::Opaque(_) | MaterialKind::Terrain(_) => {
                let alpha_ref = material.as_opaque().map_or(0, |op| op.alpha_testing);
                let cull = if matches!(material.kind, MaterialKind::Terrain(_)) { CullMode::Ccw } else { two_sided_cull };
                // Later passes over alpha-tested geometry reuse the depth laid down by the base pass.
                let (alpha_test, z_func) = match (alpha_ref, filling) {
                    (0, _) => (None, CompareFunc::LessEqual),
                    (reference, true) => {
                        (Some(AlphaTest { func: CompareFunc::GreaterEqual, reference }), CompareFunc::LessEqual)
                    }
                    (_, false) => (None, CompareFunc::Equal),
                };
                let blend = match pass {
                    Pass::Fog => Some(BlendState::LERP),
                    Pass::Directional | Pass::Point | Pass::Spot => Some(BlendState::ACCUMULATE),
                    _ => None,
                };
                Self { z_enable: true, fill: FillMode::Solid, cull, alpha_test, z_func, blend, z_write: filling }
            }
            MaterialKind::Wireframe(params) => Self {
                z_enable: true,
                fill: FillMode::Wireframe,
                cull: CullMode::None,
                alpha_test: None,
                z_func: CompareFunc::LessEqual,
                blend: Some(BlendState::from_mode(params.blend_mode)),
                z_write: false,
            },
            MaterialKind::Translucent(params) => Self {
                z_enable: true,
                fill: FillMode::Solid,
                cull: two_sided_cull,
                alpha_test: None,
                z_func: CompareFunc::LessEqual,
                blend: Some(BlendState::from_mode(params.blend_mode)),
                z_write: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Color;
    use crate::scene::material::TerrainParams;

    fn alpha_tested(reference: u8) -> Material {
        let mut m = Material::opaque("Leaves");
        if let Some(op) = m.as_opaque_mut() {
            op.alpha_testing = reference;
        }
        m
    }

    #[test]
    fn test_opaque_base_pass_fills_depth() {
        let state = RenderState::for_material(&Material::opaque("Rock"), Pass::Base);
        assert_eq!(state.blend, None);
        assert!(state.z_write);
        assert_eq!(state.z_func, CompareFunc::LessEqual);
        assert_eq!(state.cull, CullMode::Ccw);
    }

    #[test]
    fn test_light_passes_accumulate_without_depth_writes() {
        for pass in [Pass::Directional, Pass::Point, Pass::Spot] {
            let state = RenderState::for_material(&Material::opaque("Rock"), pass);
            assert_eq!(state.blend, Some(BlendState::ACCUMULATE));
            assert!(!state.z_write);
        }
        let fog = RenderState::for_material(&Material::opaque("Rock"), Pass::Fog);
        assert_eq!(fog.blend, Some(BlendState::LERP));
    }

    #[test]
    fn test_alpha_testing_uses_depth_equal_after_base() {
        let m = alpha_tested(128);
        let base = RenderState::for_material(&m, Pass::Base);
        assert_eq!(base.alpha_test, Some(AlphaTest { func: CompareFunc::GreaterEqual, reference: 128 }));
        let shadow = RenderState::for_material(&m, Pass::ShadowMap);
        assert!(shadow.alpha_test.is_some());
        let lit = RenderState::for_material(&m, Pass::Point);
        assert_eq!(lit.alpha_test, None);
        assert_eq!(lit.z_func, CompareFunc::Equal);
    }

    #[test]
    fn test_two_sided_and_terrain_culling() {
        let mut m = Material::opaque("Cloth");
        m.two_sided = true;
        assert_eq!(RenderState::for_material(&m, Pass::Base).cull, CullMode::None);
        let mut terrain = Material::terrain(TerrainParams::default());
        terrain.two_sided = true;
        assert_eq!(RenderState::for_material(&terrain, Pass::Base).cull, CullMode::Ccw);
    }

    #[test]
    fn test_translucent_blend_modes() {
        let mut wire = Material::wireframe("Grid", Color::WHITE);
        let state = RenderState::for_material(&wire, Pass::Wireframe);
        assert_eq!(state.fill, FillMode::Wireframe);
        assert_eq!(state.cull, CullMode::None);
        assert_eq!(state.blend, Some(BlendState::LERP));
        if let MaterialKind::Wireframe(p) = &mut wire.kind {
            p.blend_mode = BlendMode::Sub;
        }
        let state = RenderState::for_material(&wire, Pass::Wireframe);
        assert_eq!(state.blend.map(|b| b.op), Some(BlendOp::RevSubtract));
        assert!(!state.z_write);
    }
}
