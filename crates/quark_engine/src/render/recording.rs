//! Headless backend recording every call
//!
//! [`RecordingBackend`] hands out handles, keeps just enough state to
//! answer queries (bound target, live textures) and stores each call in
//! order, so draw orchestration can be checked without a device.

use std::collections::{HashMap, HashSet, VecDeque};

use log::trace;

use crate::foundation::math::{Color, Mat4};
use crate::render::backend::{
    BackendResult, BuiltinMesh, ClearFlags, DeviceCaps, DeviceStatus, Filter, MeshId, ProgramId, RenderBackend,
    RenderError, RenderTarget, ScissorRect, ScreenQuad, ScreenRect, ShaderModel, TextureDesc, TextureId,
    TextureUsage, Viewport,
};
use crate::render::params::ParamBlock;
use crate::render::render_state::RenderState;

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Call {
    CreateTexture(TextureDesc, TextureId),
    LoadTexture(String, TextureId),
    ReleaseTexture(TextureId),
    LoadMesh(String, MeshId),
    CompileProgram { source: String, defines: Vec<(&'static str, u32)>, program: ProgramId },
    ReleaseProgram(ProgramId),
    SetRenderTarget(RenderTarget, Option<TextureId>),
    SetViewport(Viewport),
    Clear(ClearFlags, Color),
    RestoreDefaultState,
    ApplyRenderState(RenderState),
    SetScissor(Option<ScissorRect>),
    SetTransform(Mat4),
    BindTexture(u32, Option<TextureId>),
    BeginProgram(ProgramId),
    SetParams(ParamBlock),
    EndProgram,
    DrawMesh(MeshId, u32),
    DrawBuiltin(BuiltinMesh),
    DrawScreenQuad(ScreenQuad),
    DrawCubeCross(TextureId, ScreenRect),
    BeginOcclusionQuery,
    EndOcclusionQuery(u32),
    StretchRect(RenderTarget, TextureId, Filter),
    ReadBack(TextureId, TextureId),
    ReadPixels(TextureId, usize),
}

/// Backend that draws nothing and remembers everything
#[derive(Debug)]
pub struct RecordingBackend {
    caps: DeviceCaps,
    status: DeviceStatus,
    size: (u32, u32),
    next_id: u32,
    textures: HashMap<TextureId, TextureDesc>,
    programs: HashMap<ProgramId, Vec<(&'static str, u32)>>,
    missing: HashSet<String>,
    target: (RenderTarget, Option<TextureId>),
    occlusion_results: VecDeque<u32>,
    default_occlusion_result: u32,
    pixel_color: Color,
    in_query: bool,
    calls: Vec<Call>,
}

impl RecordingBackend {
    /// Shader model 3.0 device with a back buffer of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            caps: DeviceCaps { vertex_shader: ShaderModel::V3_0, pixel_shader: ShaderModel::V3_0 },
            status: DeviceStatus::Ok,
            size: (width, height),
            next_id: 1,
            textures: HashMap::new(),
            programs: HashMap::new(),
            missing: HashSet::new(),
            target: (RenderTarget::BackBuffer, None),
            occlusion_results: VecDeque::new(),
            default_occlusion_result: 1000,
            pixel_color: Color::rgb(0.5, 0.5, 0.5),
            in_query: false,
            calls: Vec::new(),
        }
    }

    /// Report different capabilities
    #[must_use]
    pub const fn with_caps(mut self, caps: DeviceCaps) -> Self {
        self.caps = caps;
        self
    }

    /// Change the reported device status
    pub fn set_device_status(&mut self, status: DeviceStatus) {
        self.status = status;
    }

    /// Change the back buffer size
    pub fn set_back_buffer_size(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    /// Make loading of a named asset fail
    pub fn mark_missing(&mut self, name: &str) {
        self.missing.insert(name.to_string());
    }

    /// Queue sample counts returned by the next occlusion queries, in order
    pub fn push_occlusion_results(&mut self, results: impl IntoIterator<Item = u32>) {
        self.occlusion_results.extend(results);
    }

    /// Sample count returned once the queue is empty
    pub fn set_default_occlusion_result(&mut self, samples: u32) {
        self.default_occlusion_result = samples;
    }

    /// Color returned for every pixel read back
    pub fn set_pixel_color(&mut self, color: Color) {
        self.pixel_color = color;
    }

    /// Every call so far, in order
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Forget recorded calls, keeping resources
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Number of recorded calls matching a predicate
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    /// Textures currently alive
    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Description of a live texture
    pub fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc> {
        self.textures.get(&texture)
    }

    /// Number of named texture loads
    pub fn texture_loads(&self) -> usize {
        self.count(|c| matches!(c, Call::LoadTexture(..)))
    }

    /// Programs currently alive
    pub fn compiled_program_count(&self) -> usize {
        self.programs.len()
    }

    /// Defines a program was compiled with
    pub fn program_defines(&self, program: ProgramId) -> Option<&[(&'static str, u32)]> {
        self.programs.get(&program).map(Vec::as_slice)
    }

    /// Parameter blocks set so far, in order
    pub fn param_blocks(&self) -> impl Iterator<Item = &ParamBlock> {
        self.calls.iter().filter_map(|c| match c {
            Call::SetParams(p) => Some(p),
            _ => None,
        })
    }

    fn issue(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_texture(&self, texture: TextureId) -> BackendResult<()> {
        if self.textures.contains_key(&texture) {
            Ok(())
        } else {
            Err(RenderError::InvalidHandle("texture"))
        }
    }
}

impl RenderBackend for RecordingBackend {
    fn device_caps(&self) -> DeviceCaps {
        self.caps
    }

    fn device_status(&self) -> DeviceStatus {
        self.status
    }

    fn back_buffer_size(&self) -> (u32, u32) {
        self.size
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> BackendResult<TextureId> {
        if self.status.is_lost() && desc.usage != TextureUsage::SystemMemory {
            return Err(RenderError::DeviceLost);
        }
        let id = TextureId(self.issue());
        self.textures.insert(id, *desc);
        self.calls.push(Call::CreateTexture(*desc, id));
        Ok(id)
    }

    fn load_texture(&mut self, name: &str) -> BackendResult<TextureId> {
        if self.missing.contains(name) {
            return Err(RenderError::call_failed("load_texture", format!("{name} not found")));
        }
        let id = TextureId(self.issue());
        let desc = TextureDesc::render_target(256, 256, crate::render::backend::SurfaceFormat::A8R8G8B8);
        self.textures.insert(id, desc);
        self.calls.push(Call::LoadTexture(name.to_string(), id));
        Ok(id)
    }

    fn release_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            self.calls.push(Call::ReleaseTexture(texture));
        }
    }

    fn load_mesh(&mut self, name: &str) -> BackendResult<MeshId> {
        if self.missing.contains(name) {
            return Err(RenderError::call_failed("load_mesh", format!("{name} not found")));
        }
        let id = MeshId(self.issue());
        self.calls.push(Call::LoadMesh(name.to_string(), id));
        Ok(id)
    }

    fn compile_program(&mut self, source: &str, defines: &[(&'static str, u32)]) -> BackendResult<ProgramId> {
        if self.missing.contains(source) {
            return Err(RenderError::call_failed("compile_program", format!("{source} not found")));
        }
        let program = ProgramId(self.issue());
        self.programs.insert(program, defines.to_vec());
        self.calls.push(Call::CompileProgram { source: source.to_string(), defines: defines.to_vec(), program });
        Ok(program)
    }

    fn release_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_some() {
            self.calls.push(Call::ReleaseProgram(program));
        }
    }

    fn set_render_target(&mut self, target: RenderTarget, depth_stencil: Option<TextureId>) -> BackendResult<()> {
        match target {
            RenderTarget::BackBuffer => {}
            RenderTarget::Texture(id) | RenderTarget::CubeFace(id, _) => self.check_texture(id)?,
        }
        if let Some(ds) = depth_stencil {
            self.check_texture(ds)?;
        }
        self.target = (target, depth_stencil);
        self.calls.push(Call::SetRenderTarget(target, depth_stencil));
        Ok(())
    }

    fn render_target(&self) -> (RenderTarget, Option<TextureId>) {
        self.target
    }

    fn set_viewport(&mut self, viewport: Viewport) -> BackendResult<()> {
        self.calls.push(Call::SetViewport(viewport));
        Ok(())
    }

    fn clear(&mut self, flags: ClearFlags, color: Color, _depth: f32) -> BackendResult<()> {
        self.calls.push(Call::Clear(flags, color));
        Ok(())
    }

    fn restore_default_state(&mut self) {
        self.calls.push(Call::RestoreDefaultState);
    }

    fn apply_render_state(&mut self, state: &RenderState) {
        self.calls.push(Call::ApplyRenderState(*state));
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) {
        self.calls.push(Call::SetScissor(rect));
    }

    fn set_transform(&mut self, world_view_proj: &Mat4) {
        self.calls.push(Call::SetTransform(*world_view_proj));
    }

    fn bind_texture(&mut self, stage: u32, texture: Option<TextureId>) {
        self.calls.push(Call::BindTexture(stage, texture));
    }

    fn begin_program(&mut self, program: ProgramId) -> BackendResult<()> {
        if !self.programs.contains_key(&program) {
            return Err(RenderError::InvalidHandle("program"));
        }
        self.calls.push(Call::BeginProgram(program));
        Ok(())
    }

    fn set_params(&mut self, params: &ParamBlock) -> BackendResult<()> {
        self.calls.push(Call::SetParams(params.clone()));
        Ok(())
    }

    fn end_program(&mut self) {
        self.calls.push(Call::EndProgram);
    }

    fn draw_mesh(&mut self, mesh: MeshId, subset: u32) -> BackendResult<()> {
        self.calls.push(Call::DrawMesh(mesh, subset));
        Ok(())
    }

    fn draw_builtin(&mut self, mesh: BuiltinMesh) -> BackendResult<()> {
        self.calls.push(Call::DrawBuiltin(mesh));
        Ok(())
    }

    fn draw_screen_quad(&mut self, quad: &ScreenQuad) -> BackendResult<()> {
        if let Some(texture) = quad.texture {
            self.check_texture(texture)?;
        }
        self.calls.push(Call::DrawScreenQuad(quad.clone()));
        Ok(())
    }

    fn draw_cube_cross(&mut self, texture: TextureId, rect: ScreenRect) -> BackendResult<()> {
        self.check_texture(texture)?;
        self.calls.push(Call::DrawCubeCross(texture, rect));
        Ok(())
    }

    fn begin_occlusion_query(&mut self) -> BackendResult<()> {
        if self.in_query {
            return Err(RenderError::call_failed("begin_occlusion_query", "query already active"));
        }
        self.in_query = true;
        self.calls.push(Call::BeginOcclusionQuery);
        Ok(())
    }

    fn end_occlusion_query(&mut self) -> BackendResult<u32> {
        if !self.in_query {
            return Err(RenderError::call_failed("end_occlusion_query", "no active query"));
        }
        self.in_query = false;
        let samples = self.occlusion_results.pop_front().unwrap_or(self.default_occlusion_result);
        trace!("Occlusion query returned {}", samples);
        self.calls.push(Call::EndOcclusionQuery(samples));
        Ok(samples)
    }

    fn stretch_rect(&mut self, src: RenderTarget, dst: TextureId, filter: Filter) -> BackendResult<()> {
        self.check_texture(dst)?;
        self.calls.push(Call::StretchRect(src, dst, filter));
        Ok(())
    }

    fn read_back(&mut self, src: TextureId, dst: TextureId) -> BackendResult<()> {
        if self.status.is_lost() {
            return Err(RenderError::DeviceLost);
        }
        self.check_texture(src)?;
        self.check_texture(dst)?;
        self.calls.push(Call::ReadBack(src, dst));
        Ok(())
    }

    fn read_pixels(&mut self, texture: TextureId, points: &[(u32, u32)]) -> BackendResult<Vec<Color>> {
        self.check_texture(texture)?;
        self.calls.push(Call::ReadPixels(texture, points.len()));
        Ok(vec![self.pixel_color; points.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::SurfaceFormat;

    #[test]
    fn test_handles_are_unique() {
        let mut backend = RecordingBackend::new(640, 480);
        let a = backend.create_texture(&TextureDesc::depth_stencil(512)).unwrap();
        let b = backend.load_texture("a.dds").unwrap();
        assert_ne!(a, b);
        assert_eq!(backend.live_texture_count(), 2);
        backend.release_texture(a);
        backend.release_texture(a);
        assert_eq!(backend.count(|c| matches!(c, Call::ReleaseTexture(_))), 1);
    }

    #[test]
    fn test_occlusion_results_queue() {
        let mut backend = RecordingBackend::new(640, 480);
        backend.push_occlusion_results([0, 7]);
        backend.set_default_occlusion_result(3);
        let mut read = || {
            backend.begin_occlusion_query().unwrap();
            backend.end_occlusion_query().unwrap()
        };
        assert_eq!(read(), 0);
        assert_eq!(read(), 7);
        assert_eq!(read(), 3);
    }

    #[test]
    fn test_nested_query_fails() {
        let mut backend = RecordingBackend::new(640, 480);
        backend.begin_occlusion_query().unwrap();
        assert!(backend.begin_occlusion_query().is_err());
    }

    #[test]
    fn test_lost_device_refuses_gpu_work() {
        let mut backend = RecordingBackend::new(640, 480);
        let rt = backend.create_texture(&TextureDesc::render_target(4, 4, SurfaceFormat::A8R8G8B8)).unwrap();
        let ram = backend.create_texture(&TextureDesc::system_memory(4, 4, SurfaceFormat::A8R8G8B8)).unwrap();
        backend.set_device_status(DeviceStatus::Lost);
        assert_eq!(backend.read_back(rt, ram), Err(RenderError::DeviceLost));
        assert!(backend.create_texture(&TextureDesc::depth_stencil(4)).is_err());
    }

    #[test]
    fn test_render_target_must_exist() {
        let mut backend = RecordingBackend::new(640, 480);
        let err = backend.set_render_target(RenderTarget::Texture(TextureId(99)), None);
        assert_eq!(err, Err(RenderError::InvalidHandle("texture")));
        assert_eq!(backend.render_target(), (RenderTarget::BackBuffer, None));
    }
}
