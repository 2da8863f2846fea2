//! Backend abstraction traits for the rendering system
//!
//! The engine core never talks to a graphics API directly. Everything it
//! needs from the device (render targets, programs, state, draws and
//! occlusion queries) goes through [`RenderBackend`], which keeps the
//! draw orchestration testable against
//! [`RecordingBackend`](super::recording::RecordingBackend).

use std::fmt;

use bitflags::bitflags;
use thiserror::Error;

use crate::config::ShadowMapFormat;
use crate::foundation::math::{transform_coord, Color, Mat4, Vec2, Vec3};
use crate::render::params::ParamBlock;
use crate::render::render_state::RenderState;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, RenderError>;

/// Rendering backend errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A device call failed
    #[error("{call} failed: {message}")]
    CallFailed {
        /// Name of the failing call
        call: &'static str,
        /// Backend-provided description
        message: String,
    },

    /// A handle passed to the backend does not exist
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),

    /// The device is lost and the call could not be completed
    #[error("Device lost")]
    DeviceLost,
}

impl RenderError {
    /// Wrap a failed call with its name
    pub fn call_failed(call: &'static str, message: impl Into<String>) -> Self {
        Self::CallFailed { call, message: message.into() }
    }
}

/// Device availability, reported separately from errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceStatus {
    /// Device usable
    #[default]
    Ok,
    /// Device lost, cannot be reset yet
    Lost,
    /// Device lost, ready to be reset
    NotReset,
}

impl DeviceStatus {
    /// True unless the device is fully usable
    pub const fn is_lost(self) -> bool {
        !matches!(self, Self::Ok)
    }
}

/// Shader model version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShaderModel {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
}

impl ShaderModel {
    /// Shader model 2.0, the minimum the engine runs on
    pub const V2_0: Self = Self::new(2, 0);
    /// Shader model 3.0
    pub const V3_0: Self = Self::new(3, 0);

    /// Create a version
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ShaderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Capabilities queried once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    /// Highest supported vertex shader model
    pub vertex_shader: ShaderModel,
    /// Highest supported pixel shader model
    pub pixel_shader: ShaderModel,
}

bitflags! {
    /// Buffers affected by a clear
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        /// Color target
        const TARGET = 0x01;
        /// Depth buffer
        const DEPTH = 0x02;
        /// Stencil buffer
        const STENCIL = 0x04;
    }
}

/// Texture handle issued by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Compiled program handle issued by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// Mesh handle issued by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// Pixel format of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceFormat {
    /// 8-bit RGBA
    A8R8G8B8,
    /// 8-bit RGB, alpha ignored
    X8R8G8B8,
    /// Single 32-bit float channel
    R32F,
    /// 24-bit depth, 8-bit stencil
    D24S8,
}

impl From<ShadowMapFormat> for SurfaceFormat {
    fn from(format: ShadowMapFormat) -> Self {
        match format {
            ShadowMapFormat::R32F => Self::R32F,
            ShadowMapFormat::A8R8G8B8 => Self::A8R8G8B8,
        }
    }
}

/// Texture shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// Plain 2D texture
    Flat,
    /// Six square faces
    Cube,
}

/// Where a texture lives and what it can be bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    /// GPU color target that can also be sampled
    RenderTarget,
    /// GPU depth-stencil surface
    DepthStencil,
    /// CPU-readable copy destination
    SystemMemory,
}

/// Creation parameters of a backend texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    /// Width in pixels (edge length for cube textures)
    pub width: u32,
    /// Height in pixels (edge length for cube textures)
    pub height: u32,
    /// Pixel format
    pub format: SurfaceFormat,
    /// Shape
    pub kind: TextureKind,
    /// Usage
    pub usage: TextureUsage,
}

impl TextureDesc {
    /// 2D render target
    pub const fn render_target(width: u32, height: u32, format: SurfaceFormat) -> Self {
        Self { width, height, format, kind: TextureKind::Flat, usage: TextureUsage::RenderTarget }
    }

    /// Cube render target
    pub const fn cube_render_target(size: u32, format: SurfaceFormat) -> Self {
        Self { width: size, height: size, format, kind: TextureKind::Cube, usage: TextureUsage::RenderTarget }
    }

    /// Square depth-stencil surface
    pub const fn depth_stencil(size: u32) -> Self {
        Self {
            width: size,
            height: size,
            format: SurfaceFormat::D24S8,
            kind: TextureKind::Flat,
            usage: TextureUsage::DepthStencil,
        }
    }

    /// CPU-side copy target
    pub const fn system_memory(width: u32, height: u32, format: SurfaceFormat) -> Self {
        Self { width, height, format, kind: TextureKind::Flat, usage: TextureUsage::SystemMemory }
    }
}

/// Cube map face, in the order the engine renders them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    /// +X
    PositiveX,
    /// -X
    NegativeX,
    /// +Y
    PositiveY,
    /// -Y
    NegativeY,
    /// +Z
    PositiveZ,
    /// -Z
    NegativeZ,
}

impl CubeFace {
    /// All faces in render order
    pub const ALL: [Self; 6] = [
        Self::PositiveX,
        Self::NegativeX,
        Self::PositiveY,
        Self::NegativeY,
        Self::PositiveZ,
        Self::NegativeZ,
    ];

    /// Look direction and up vector of the camera rendering this face
    pub fn basis(self) -> (Vec3, Vec3) {
        match self {
            Self::PositiveX => (Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)),
            Self::NegativeX => (Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)),
            Self::PositiveY => (Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 0.0, -1.0)),
            Self::NegativeY => (Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, 0.0, 1.0)),
            Self::PositiveZ => (Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 1.0, 0.0)),
            Self::NegativeZ => (Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 1.0, 0.0)),
        }
    }
}

/// Surface a draw goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// The swap chain back buffer
    BackBuffer,
    /// A 2D render-target texture
    Texture(TextureId),
    /// One face of a cube render-target texture
    CubeFace(TextureId, CubeFace),
}

/// Viewport in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Viewport {
    /// Viewport covering a whole target of the given size
    pub const fn full(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }
}

/// Integer scissor rectangle, right and bottom exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScissorRect {
    /// Left edge
    pub left: u32,
    /// Top edge
    pub top: u32,
    /// Right edge
    pub right: u32,
    /// Bottom edge
    pub bottom: u32,
}

impl ScissorRect {
    /// Rectangle covering a whole target
    pub const fn full(width: u32, height: u32) -> Self {
        Self { left: 0, top: 0, right: width, bottom: height }
    }
}

/// Floating-point screen rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenRect {
    /// Left edge
    pub left: f32,
    /// Top edge
    pub top: f32,
    /// Right edge
    pub right: f32,
    /// Bottom edge
    pub bottom: f32,
}

impl ScreenRect {
    /// Create a rectangle
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Rectangle from the origin to the given size
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    /// Width
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    /// Height
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

/// Texture sampling filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Nearest texel
    Point,
    /// Bilinear
    Linear,
}

/// Blending of a screen quad over the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuadBlend {
    /// Overwrite
    Replace,
    /// `src * a + dst * (1 - a)`
    AlphaBlend,
    /// `src * a + dst`
    Additive,
}

/// Channels a screen quad writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorWrite {
    /// RGBA
    All,
    /// Alpha channel only
    AlphaOnly,
}

/// Screen-space quad drawn with fixed-function state, or with the bound
/// program when one is active.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenQuad {
    /// Destination rectangle
    pub rect: ScreenRect,
    /// Sampled texture, modulated by `color` when present
    pub texture: Option<TextureId>,
    /// Quad color or texture factor
    pub color: Color,
    /// Texture coordinates of the top-left, top-right, bottom-left and bottom-right corners
    pub tex_coords: [Vec2; 4],
    /// Blending
    pub blend: QuadBlend,
    /// Sampling filter
    pub filter: Filter,
    /// Written channels
    pub write: ColorWrite,
}

impl ScreenQuad {
    /// Untextured quad covering a target of the given size
    pub fn fullscreen(width: u32, height: u32) -> Self {
        Self::new(ScreenRect::from_size(width, height))
    }

    /// Untextured white quad over `rect`
    pub fn new(rect: ScreenRect) -> Self {
        Self {
            rect,
            texture: None,
            color: Color::WHITE,
            tex_coords: [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0), Vec2::new(1.0, 1.0)],
            blend: QuadBlend::Replace,
            filter: Filter::Linear,
            write: ColorWrite::All,
        }
    }

    /// Sample a texture
    #[must_use]
    pub const fn with_texture(mut self, texture: TextureId) -> Self {
        self.texture = Some(texture);
        self
    }

    /// Set the color or texture factor
    #[must_use]
    pub const fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    /// Set the blending
    #[must_use]
    pub const fn with_blend(mut self, blend: QuadBlend) -> Self {
        self.blend = blend;
        self
    }

    /// Set the sampling filter
    #[must_use]
    pub const fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Restrict writes to alpha
    #[must_use]
    pub const fn alpha_only(mut self) -> Self {
        self.write = ColorWrite::AlphaOnly;
        self
    }

    /// Transform the unit-square texture coordinates by a matrix
    #[must_use]
    pub fn with_tex_matrix(mut self, matrix: &Mat4) -> Self {
        for uv in &mut self.tex_coords {
            let p = transform_coord(matrix, &Vec3::new(uv.x, uv.y, 0.0));
            *uv = Vec2::new(p.x, p.y);
        }
        self
    }

    /// Offset every texture coordinate by the same amount
    #[must_use]
    pub fn with_tex_offset(mut self, offset: Vec2) -> Self {
        for uv in &mut self.tex_coords {
            *uv += offset;
        }
        self
    }
}

/// Geometry the backend provides itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinMesh {
    /// Unit-radius icosphere used as an occlusion proxy
    Icosphere,
    /// Unit quad in the XY plane centred on the origin
    Quad,
}

/// Main rendering backend trait
///
/// Calls are imperative and stateful in the D3D9 sense: state set by one
/// call stays until changed. Every call either succeeds or reports a
/// [`RenderError`].
pub trait RenderBackend {
    /// Capabilities of the device
    fn device_caps(&self) -> DeviceCaps;

    /// Current availability of the device
    fn device_status(&self) -> DeviceStatus;

    /// Back buffer size in pixels
    fn back_buffer_size(&self) -> (u32, u32);

    /// Create an empty texture
    fn create_texture(&mut self, desc: &TextureDesc) -> BackendResult<TextureId>;

    /// Load a named texture asset
    fn load_texture(&mut self, name: &str) -> BackendResult<TextureId>;

    /// Release a texture; unknown handles are ignored
    fn release_texture(&mut self, texture: TextureId);

    /// Load a named mesh asset
    fn load_mesh(&mut self, name: &str) -> BackendResult<MeshId>;

    /// Compile one variant of a named program
    fn compile_program(&mut self, source: &str, defines: &[(&'static str, u32)]) -> BackendResult<ProgramId>;

    /// Release a compiled program; unknown handles are ignored
    fn release_program(&mut self, program: ProgramId);

    /// Bind a color target and optional depth-stencil surface
    fn set_render_target(&mut self, target: RenderTarget, depth_stencil: Option<TextureId>) -> BackendResult<()>;

    /// Currently bound color target and depth-stencil surface
    fn render_target(&self) -> (RenderTarget, Option<TextureId>);

    /// Set the viewport
    fn set_viewport(&mut self, viewport: Viewport) -> BackendResult<()>;

    /// Clear the bound target
    fn clear(&mut self, flags: ClearFlags, color: Color, depth: f32) -> BackendResult<()>;

    /// Reset all fixed-function state to its defaults
    fn restore_default_state(&mut self);

    /// Apply a complete material render state
    fn apply_render_state(&mut self, state: &RenderState);

    /// Enable scissor testing with a rectangle, or disable it with `None`
    fn set_scissor(&mut self, rect: Option<ScissorRect>);

    /// Transform for fixed-function draws
    fn set_transform(&mut self, world_view_proj: &Mat4);

    /// Bind a texture to a sampler stage
    fn bind_texture(&mut self, stage: u32, texture: Option<TextureId>);

    /// Start drawing with a program
    fn begin_program(&mut self, program: ProgramId) -> BackendResult<()>;

    /// Set parameters of the active program
    fn set_params(&mut self, params: &ParamBlock) -> BackendResult<()>;

    /// Stop drawing with the active program
    fn end_program(&mut self);

    /// Draw one subset of a mesh
    fn draw_mesh(&mut self, mesh: MeshId, subset: u32) -> BackendResult<()>;

    /// Draw a backend-provided mesh
    fn draw_builtin(&mut self, mesh: BuiltinMesh) -> BackendResult<()>;

    /// Draw a screen-space quad
    fn draw_screen_quad(&mut self, quad: &ScreenQuad) -> BackendResult<()>;

    /// Draw the six faces of a cube texture unfolded as a cross
    fn draw_cube_cross(&mut self, texture: TextureId, rect: ScreenRect) -> BackendResult<()>;

    /// Start counting samples that pass the depth test
    fn begin_occlusion_query(&mut self) -> BackendResult<()>;

    /// Stop counting and read back the sample count
    fn end_occlusion_query(&mut self) -> BackendResult<u32>;

    /// Copy a target into a texture, scaling as needed
    fn stretch_rect(&mut self, src: RenderTarget, dst: TextureId, filter: Filter) -> BackendResult<()>;

    /// Copy a GPU render target into a CPU-readable texture
    fn read_back(&mut self, src: TextureId, dst: TextureId) -> BackendResult<()>;

    /// Read individual pixels of a CPU-readable texture
    fn read_pixels(&mut self, texture: TextureId, points: &[(u32, u32)]) -> BackendResult<Vec<Color>>;
}
