//! Full-screen postprocess effects
//!
//! A scene owns at most one effect of each type in its
//! [`PostProcessStack`]. Effects that need the rendered frame as a texture
//! (function, tone mapping, bloom, heat haze) make the scene draw into the
//! screen special texture first; the others draw straight over the back
//! buffer after the frame is composed.

use log::{trace, warn};

use crate::error::EngineResult;
use crate::foundation::math::{safe_normalize, transform_coord, transform_normal, Color, Mat4, Vec2, Vec3, Vec4};
use crate::foundation::time::SmoothCD;
use crate::render::backend::{
    Filter, QuadBlend, RenderBackend, RenderError, RenderTarget, ScreenQuad, ScreenRect, TextureId, Viewport,
};
use crate::render::params::{ParamBlock, ShaderParam};
use crate::render::resources::{Surface, TextureCatalog};
use crate::render::services::{Effect, EngineServices};

/// Draw `src` over a whole target without filtering or blending
pub fn redraw(backend: &mut dyn RenderBackend, dst: RenderTarget, width: u32, height: u32, src: TextureId) -> EngineResult<()> {
    let previous = backend.render_target();
    backend.set_render_target(dst, None)?;
    backend.restore_default_state();
    let quad = ScreenQuad::fullscreen(width, height).with_texture(src).with_filter(Filter::Point);
    let result = backend.draw_screen_quad(&quad);
    backend.set_render_target(previous.0, previous.1)?;
    Ok(result?)
}

/// Overwrite the alpha channel of the bound target, keeping color
pub fn clear_alpha(backend: &mut dyn RenderBackend, alpha: f32, width: u32, height: u32) -> EngineResult<()> {
    backend.restore_default_state();
    let quad = ScreenQuad::fullscreen(width, height).with_color(Color::new(0.0, 0.0, 0.0, alpha)).alpha_only();
    backend.draw_screen_quad(&quad)?;
    Ok(())
}

/// Set `dst` as the target, run `f`, then put the previous target back
fn with_render_target<T>(
    backend: &mut dyn RenderBackend,
    dst: TextureId,
    f: impl FnOnce(&mut dyn RenderBackend) -> EngineResult<T>,
) -> EngineResult<T> {
    let (target, depth) = backend.render_target();
    backend.set_render_target(RenderTarget::Texture(dst), None)?;
    let result = f(backend);
    backend.set_render_target(target, depth)?;
    result
}

/// Solid color blended over the whole screen
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpColor {
    /// Color; alpha is the effect strength
    pub color: Color,
}

impl Default for PpColor {
    fn default() -> Self {
        Self { color: Color::TRANSPARENT }
    }
}

impl PpColor {
    /// Effect with the given color
    pub const fn new(color: Color) -> Self {
        Self { color }
    }

    /// Blend over the bound target
    pub fn draw(&self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> EngineResult<()> {
        if self.color.a == 0.0 {
            return Ok(());
        }
        backend.restore_default_state();
        let quad = ScreenQuad::fullscreen(width, height).with_color(self.color).with_blend(QuadBlend::AlphaBlend);
        backend.draw_screen_quad(&quad)?;
        Ok(())
    }
}

/// Texture blended over the whole screen
#[derive(Debug, Clone, PartialEq)]
pub struct PpTexture {
    /// Texture asset name
    pub texture: String,
    /// Texture factor; alpha is the effect strength
    pub color: Color,
    /// Texture coordinate transform
    pub matrix: Mat4,
}

impl Default for PpTexture {
    fn default() -> Self {
        Self { texture: String::new(), color: Color::WHITE, matrix: Mat4::identity() }
    }
}

impl PpTexture {
    /// Effect drawing the named texture
    pub fn new(texture: impl Into<String>, color: Color) -> Self {
        Self { texture: texture.into(), color, ..Self::default() }
    }

    /// Blend over the bound target
    pub fn draw(
        &self,
        backend: &mut dyn RenderBackend,
        textures: &mut TextureCatalog,
        width: u32,
        height: u32,
    ) -> EngineResult<()> {
        if self.color.a == 0.0 || self.texture.is_empty() {
            return Ok(());
        }
        let texture = textures.must_get(backend, &self.texture)?;
        backend.restore_default_state();
        let quad = ScreenQuad::fullscreen(width, height)
            .with_texture(texture)
            .with_color(self.color)
            .with_blend(QuadBlend::AlphaBlend)
            .with_filter(Filter::Linear)
            .with_tex_matrix(&self.matrix);
        backend.draw_screen_quad(&quad)?;
        Ok(())
    }
}

/// Per-channel linear color function `c * a + b`, optionally after grayscale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpFunction {
    /// 0 keeps color, 1 is fully gray
    pub grayscale_factor: f32,
    /// Multiplier
    pub a_factor: Vec3,
    /// Offset
    pub b_factor: Vec3,
}

impl Default for PpFunction {
    fn default() -> Self {
        Self { grayscale_factor: 0.0, a_factor: Vec3::new(1.0, 1.0, 1.0), b_factor: Vec3::zeros() }
    }
}

impl PpFunction {
    /// True unless the linear part is the identity
    pub fn is_linear_transform_required(&self) -> bool {
        self.a_factor != Vec3::new(1.0, 1.0, 1.0) || self.b_factor != Vec3::zeros()
    }
}

/// Number of pixels read back per brightness measurement
pub const TONE_MAPPING_SAMPLE_COUNT: usize = 100;
const TONE_MAPPING_MEASUREMENT_TIME: f32 = 0.1;
const TONE_MAPPING_BRIGHTNESS_SMOOTH_TIME: f32 = 0.5;
const TONE_MAPPING_EPSILON: f32 = 0.01;

/// Exposure adapting to the measured brightness of previous frames
#[derive(Debug, Clone)]
pub struct PpToneMapping {
    /// How strongly brightness is compensated
    pub intensity: f32,
    brightness: SmoothCD,
    last_measurement_time: f32,
    samples: Vec<(u32, u32)>,
    sample_size: (u32, u32),
}

impl Default for PpToneMapping {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl PpToneMapping {
    /// Effect with the given intensity, starting at mid brightness
    pub fn new(intensity: f32) -> Self {
        Self {
            intensity,
            brightness: SmoothCD::new(0.5, TONE_MAPPING_BRIGHTNESS_SMOOTH_TIME, 0.0),
            last_measurement_time: 0.0,
            samples: Vec::new(),
            sample_size: (0, 0),
        }
    }

    /// Smoothed brightness, 0.5 is neutral
    pub fn last_brightness(&self) -> f32 {
        self.brightness.pos
    }

    /// Jump to the current target brightness
    pub fn reset_smooth(&mut self) {
        self.brightness.pos = self.brightness.dest;
        self.brightness.vel = 0.0;
    }

    /// Value of the postprocess `LuminanceFactor` parameter
    pub fn luminance_factor(&self) -> f32 {
        (1.0 - ((self.last_brightness() - 0.5) * self.intensity + 0.5)) + 0.5
    }

    /// Measure the frame in `screen` at most every 0.1 s and move the
    /// smoothed brightness towards it.
    ///
    /// Device loss during read-back is not an error: the previous target
    /// brightness is kept and measured again next time.
    pub fn calc_brightness(
        &mut self,
        backend: &mut dyn RenderBackend,
        screen: TextureId,
        vram: Surface,
        ram: Surface,
        now: f32,
        dt: f32,
    ) -> EngineResult<()> {
        let brightness = if self.last_measurement_time + TONE_MAPPING_MEASUREMENT_TIME <= now {
            backend.stretch_rect(RenderTarget::Texture(screen), vram.id, Filter::Point)?;
            let read = if backend.device_status().is_lost() {
                Err(RenderError::DeviceLost)
            } else {
                backend.read_back(vram.id, ram.id)
            };
            match read {
                Ok(()) => {
                    let measured = self.measure(backend, ram)?;
                    self.last_measurement_time = now;
                    trace!("Measured brightness {}", measured);
                    measured
                }
                Err(RenderError::DeviceLost) => {
                    warn!("Device lost during tone mapping read-back");
                    self.brightness.dest
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            self.brightness.dest
        };

        if self.last_measurement_time == 0.0 {
            self.brightness.set(brightness, 0.0);
        } else {
            self.brightness.update(brightness, dt);
        }
        Ok(())
    }

    fn measure(&mut self, backend: &mut dyn RenderBackend, ram: Surface) -> EngineResult<f32> {
        if self.sample_size != (ram.width, ram.height) {
            self.sample_size = (ram.width, ram.height);
            self.samples = sample_points(ram.width, ram.height);
        }
        let pixels = backend.read_pixels(ram.id, &self.samples)?;
        if pixels.is_empty() {
            return Ok(self.brightness.dest);
        }
        let log_sum: f32 = pixels.iter().map(|c| (TONE_MAPPING_EPSILON + c.grayscale()).ln()).sum();
        Ok((log_sum / pixels.len() as f32).exp())
    }
}

/// Jittered grid of pixel coordinates spread over a `width` x `height` image
fn sample_points(width: u32, height: u32) -> Vec<(u32, u32)> {
    const GRID: usize = 10;
    const GOLDEN: f32 = 0.618_034;
    let cx1 = width.saturating_sub(1) as f32;
    let cy1 = height.saturating_sub(1) as f32;
    (0..TONE_MAPPING_SAMPLE_COUNT)
        .map(|i| {
            let jitter = (i as f32 * GOLDEN).fract() * 0.5 + 0.25;
            let u = ((i % GRID) as f32 + jitter) / GRID as f32;
            let v = ((i / GRID) as f32 + (1.0 - jitter)) / GRID as f32;
            ((u * cx1) as u32, (v * cy1) as u32)
        })
        .collect()
}

/// Glow around bright parts of the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpBloom {
    /// Opacity of the glow
    pub intensity: f32,
    /// Brightness threshold in `[0, 1]`
    pub down: f32,
}

impl Default for PpBloom {
    fn default() -> Self {
        Self { intensity: 1.0, down: 0.5 }
    }
}

impl PpBloom {
    /// Effect with the given intensity and threshold
    pub const fn new(intensity: f32, down: f32) -> Self {
        Self { intensity, down }
    }

    /// Bright pass of `screen` into `blur1`, then blur it back and forth
    /// between `blur1` and `blur2`, leaving the result in `blur1`.
    pub fn create_bloom(
        &self,
        backend: &mut dyn RenderBackend,
        services: &mut EngineServices,
        screen: TextureId,
        blur1: Surface,
        blur2: Surface,
    ) -> EngineResult<()> {
        self.bright_pass(backend, services, blur1, screen)?;
        blur_pass(backend, services, 1.5, blur2.id, blur1)?;
        blur_pass(backend, services, 2.5, blur1.id, Surface { id: blur2.id, ..blur1 })?;
        Ok(())
    }

    fn bright_pass(
        &self,
        backend: &mut dyn RenderBackend,
        services: &mut EngineServices,
        dst: Surface,
        src: TextureId,
    ) -> EngineResult<()> {
        let program = services.effect_program(backend, Effect::BrightPass)?;
        let (a, b) = if self.down == 1.0 { (0.0, 0.0) } else { (1.0 / (1.0 - self.down), -self.down / (1.0 - self.down)) };
        with_render_target(backend, dst.id, |backend| {
            backend.restore_default_state();
            let mut params = ParamBlock::new();
            params.set(ShaderParam::Texture, src);
            params.set(ShaderParam::AFactor, a);
            params.set(ShaderParam::BFactor, b);
            backend.begin_program(program)?;
            backend.set_params(&params)?;
            backend.set_viewport(Viewport::full(dst.width, dst.height))?;
            let drawn = backend.draw_screen_quad(&ScreenQuad::fullscreen(dst.width, dst.height));
            backend.end_program();
            Ok(drawn?)
        })
    }

    /// Add the blurred glow in `blur1` over the bound target
    pub fn draw_bloom(&self, backend: &mut dyn RenderBackend, blur1: TextureId, width: u32, height: u32) -> EngineResult<()> {
        backend.restore_default_state();
        let quad = ScreenQuad::fullscreen(width, height)
            .with_texture(blur1)
            .with_color(Color::new(1.0, 1.0, 1.0, self.intensity))
            .with_blend(QuadBlend::Additive);
        backend.draw_screen_quad(&quad)?;
        Ok(())
    }
}

/// Four-tap blur of `src` into `dst`, taps `distance` texels away diagonally
fn blur_pass(
    backend: &mut dyn RenderBackend,
    services: &mut EngineServices,
    distance: f32,
    dst: TextureId,
    src: Surface,
) -> EngineResult<()> {
    let program = services.effect_program(backend, Effect::BlurPass)?;
    with_render_target(backend, dst, |backend| {
        backend.restore_default_state();
        let mut params = ParamBlock::new();
        params.set(ShaderParam::Texture, src.id);
        params.set(
            ShaderParam::SampleOffset,
            Vec4::new(distance / src.width as f32, distance / src.height as f32, 0.0, 0.0),
        );
        backend.begin_program(program)?;
        backend.set_params(&params)?;
        backend.set_viewport(Viewport::full(src.width, src.height))?;
        let drawn = backend.draw_screen_quad(&ScreenQuad::fullscreen(src.width, src.height));
        backend.end_program();
        Ok(drawn?)
    })
}

/// How the previous frame is blended into the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FeedbackMode {
    /// Delayed, untransformed copy
    #[default]
    Drunk,
    /// Copy stretched along the camera velocity
    MotionBlur,
}

/// Alpha of the previous frame drawn over the current one
const FEEDBACK_ALPHA: f32 = 160.0 / 255.0;

/// Blend of previous frames over the current one
#[derive(Debug, Clone, PartialEq)]
pub struct PpFeedback {
    /// Blending mode
    pub mode: FeedbackMode,
    /// Strength of the effect
    pub intensity: f32,
    last_camera_pos: Option<Vec3>,
    last_write_time: f32,
    filled: Option<TextureId>,
}

impl Default for PpFeedback {
    fn default() -> Self {
        Self::new(FeedbackMode::Drunk, 1.0)
    }
}

impl PpFeedback {
    /// Effect of the given mode and intensity
    pub const fn new(mode: FeedbackMode, intensity: f32) -> Self {
        Self { mode, intensity, last_camera_pos: None, last_write_time: 0.0, filled: None }
    }

    /// Forget the camera position, e.g. after a teleport
    pub fn reset_camera_pos(&mut self) {
        self.last_camera_pos = None;
    }

    fn delay(&self) -> f32 {
        match self.mode {
            FeedbackMode::Drunk => self.intensity * 0.05,
            FeedbackMode::MotionBlur => 0.0,
        }
    }

    /// Texture transform applied to the previous frame
    pub fn texture_matrix(&mut self, eye_pos: &Vec3, view_proj: &Mat4, dt: f32) -> Mat4 {
        match self.mode {
            FeedbackMode::Drunk => Mat4::identity(),
            FeedbackMode::MotionBlur => {
                let last = self.last_camera_pos.unwrap_or(*eye_pos);
                self.last_camera_pos = Some(*eye_pos);
                let velocity = if dt > 0.0 { (eye_pos - last) / dt } else { Vec3::zeros() };
                let proj = transform_normal(view_proj, &velocity);
                let scale = 1.0 + proj.z * 0.002 * self.intensity;
                let to_center = Mat4::new_translation(&Vec3::new(-0.5, -0.5, 0.0));
                let scaling = Mat4::new_nonuniform_scaling(&Vec3::new(scale, scale, 1.0));
                let back = Mat4::new_translation(&Vec3::new(
                    0.5 - proj.x * 0.0005 * self.intensity,
                    0.5 + proj.y * 0.0005 * self.intensity,
                    0.0,
                ));
                back * scaling * to_center
            }
        }
    }

    /// Draw the stored frame over the back buffer, then store the back
    /// buffer once the delay has passed.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
        feedback: TextureId,
        eye_pos: &Vec3,
        view_proj: &Mat4,
        now: f32,
        dt: f32,
    ) -> EngineResult<()> {
        let matrix = self.texture_matrix(eye_pos, view_proj, dt);
        if self.filled == Some(feedback) {
            backend.restore_default_state();
            let quad = ScreenQuad::fullscreen(width, height)
                .with_texture(feedback)
                .with_color(Color::new(1.0, 1.0, 1.0, FEEDBACK_ALPHA))
                .with_blend(QuadBlend::AlphaBlend)
                .with_tex_matrix(&matrix);
            backend.draw_screen_quad(&quad)?;
        }
        if self.last_write_time + self.delay() < now || self.filled != Some(feedback) {
            backend.stretch_rect(RenderTarget::BackBuffer, feedback, Filter::Linear)?;
            self.filled = Some(feedback);
            self.last_write_time = now;
        }
        Ok(())
    }
}

const LENS_FLARE_TEXTURE_NAMES: [&str; 4] = ["LensFlare01", "LensFlare02", "LensFlare03", "LensFlare_Halo"];
const LENS_FLARE_TEXTURE_INDICES: [usize; 7] = [3, 1, 2, 0, 2, 1, 2];
const LENS_FLARE_POSITIONS: [f32; 7] = [1.0, 0.65, 0.5, 0.2, -0.3, -0.6, -0.9];
const LENS_FLARE_HALF_SIZES: [f32; 7] = [0.5, 0.05, 0.05, 0.07, 0.07, 0.04, 0.1];
const LENS_FLARE_COLORS: [u32; 7] = [0xFF_FFFF, 0xFF_9900, 0xFF_FFFF, 0xFF_A080, 0xFF_D500, 0xFF_FFFF, 0xFF_FF80];
const LENS_FLARE_TRAPEZOID_INNER: f32 = 0.8;
const LENS_FLARE_TRAPEZOID_OUTER: f32 = 1.3;
const LENS_FLARE_INTENSITY_SMOOTH_TIME: f32 = 0.07;

/// 1 on `[-inner, inner]`, falling linearly to 0 at `±outer`
fn trapezoid(x: f32, inner: f32, outer: f32) -> f32 {
    let ax = x.abs();
    if ax <= inner {
        1.0
    } else if ax >= outer {
        0.0
    } else {
        (outer - ax) / (outer - inner)
    }
}

fn rgb24(rgb: u32, alpha: f32) -> Color {
    let channel = |shift: u32| ((rgb >> shift) & 0xFF) as f32 / 255.0;
    Color::new(channel(16), channel(8), channel(0), alpha)
}

/// Sun flares along the line from the sun through the screen center
#[derive(Debug, Clone, PartialEq)]
pub struct PpLensFlare {
    dir_to_light: Vec3,
    intensity: SmoothCD,
    /// Extra intensity multiplier
    pub custom_intensity: f32,
}

impl PpLensFlare {
    /// Effect for a light in the given direction
    pub fn new(dir_to_light: Vec3) -> Self {
        Self {
            dir_to_light: safe_normalize(&dir_to_light),
            intensity: SmoothCD::new(0.0, LENS_FLARE_INTENSITY_SMOOTH_TIME, 0.0),
            custom_intensity: 1.0,
        }
    }

    /// Direction towards the light, unit length
    pub const fn dir_to_light(&self) -> &Vec3 {
        &self.dir_to_light
    }

    /// Point at another light direction
    pub fn set_dir_to_light(&mut self, dir_to_light: Vec3) {
        self.dir_to_light = safe_normalize(&dir_to_light);
    }

    /// Smoothed intensity
    pub fn intensity(&self) -> f32 {
        self.intensity.pos
    }

    /// Update the intensity from where the light projects on screen and
    /// how much of it is visible, then draw when bright enough.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        backend: &mut dyn RenderBackend,
        textures: &mut TextureCatalog,
        visible_factor: f32,
        width: u32,
        height: u32,
        view: &Mat4,
        proj: &Mat4,
        dt: f32,
    ) -> EngineResult<()> {
        let mut target = 0.0;
        let mut pos = None;
        let dir_cam = transform_normal(view, &self.dir_to_light);
        if dir_cam.z > 0.0 {
            let p = transform_coord(proj, &dir_cam);
            pos = Some(Vec2::new(p.x, p.y));
            let ix = trapezoid(p.x, LENS_FLARE_TRAPEZOID_INNER, LENS_FLARE_TRAPEZOID_OUTER);
            let iy = trapezoid(p.y, LENS_FLARE_TRAPEZOID_INNER, LENS_FLARE_TRAPEZOID_OUTER);
            if ix > 0.0 && iy > 0.0 {
                target = ix * iy * self.custom_intensity * visible_factor;
            }
        }
        self.intensity.update(target, dt);

        match pos {
            Some(pos) if self.intensity.pos > 0.01 => self.draw_flares(backend, textures, pos, width, height),
            _ => Ok(()),
        }
    }

    fn draw_flares(
        &self,
        backend: &mut dyn RenderBackend,
        textures: &mut TextureCatalog,
        pos: Vec2,
        width: u32,
        height: u32,
    ) -> EngineResult<()> {
        let mut flare_textures = [TextureId(0); 4];
        for (slot, name) in flare_textures.iter_mut().zip(LENS_FLARE_TEXTURE_NAMES) {
            *slot = textures.must_get(backend, name)?;
        }

        let intensity = self.intensity.pos;
        let (w, h) = (width as f32, height as f32);
        let sun = Vec2::new((pos.x * 0.5 + 0.5) * w, (-pos.y * 0.5 + 0.5) * h);
        let center = Vec2::new(w * 0.5, h * 0.5);
        let to_sun = sun - center;

        backend.restore_default_state();
        for i in 0..LENS_FLARE_TEXTURE_INDICES.len() {
            let alpha = if i == 0 { intensity } else { intensity * 0.5 };
            let p = center + to_sun * LENS_FLARE_POSITIONS[i];
            let mut size = LENS_FLARE_HALF_SIZES[i] * h;
            if i == 0 {
                size *= intensity;
            }
            let quad = ScreenQuad::new(ScreenRect::new(p.x - size, p.y - size, p.x + size, p.y + size))
                .with_texture(flare_textures[LENS_FLARE_TEXTURE_INDICES[i]])
                .with_color(rgb24(LENS_FLARE_COLORS[i], alpha))
                .with_blend(QuadBlend::Additive);
            backend.draw_screen_quad(&quad)?;
        }
        Ok(())
    }
}

/// Postprocess effects of one scene, at most one of each type
#[derive(Debug, Clone, Default)]
pub struct PostProcessStack {
    /// Color overlay
    pub color: Option<PpColor>,
    /// Texture overlay
    pub texture: Option<PpTexture>,
    /// Color function
    pub function: Option<PpFunction>,
    /// Tone mapping
    pub tone_mapping: Option<PpToneMapping>,
    /// Bloom
    pub bloom: Option<PpBloom>,
    /// Feedback
    pub feedback: Option<PpFeedback>,
    /// Lens flare
    pub lens_flare: Option<PpLensFlare>,
}

impl PostProcessStack {
    /// True when the frame has to be drawn into the screen texture first
    pub fn render_to_texture_required(&self, heat_haze: bool) -> bool {
        self.function.is_some() || self.tone_mapping.is_some() || self.bloom.is_some() || heat_haze
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::render::backend::{SurfaceFormat, TextureDesc};
    use crate::render::recording::{Call, RecordingBackend};
    use approx::assert_relative_eq;

    fn surface(backend: &mut RecordingBackend, width: u32, height: u32) -> Surface {
        let id = backend.create_texture(&TextureDesc::render_target(width, height, SurfaceFormat::A8R8G8B8)).unwrap();
        Surface { id, width, height }
    }

    fn ram(backend: &mut RecordingBackend, width: u32, height: u32) -> Surface {
        let id = backend.create_texture(&TextureDesc::system_memory(width, height, SurfaceFormat::A8R8G8B8)).unwrap();
        Surface { id, width, height }
    }

    #[test]
    fn test_transparent_color_draws_nothing() {
        let mut backend = RecordingBackend::new(640, 480);
        PpColor::default().draw(&mut backend, 640, 480).unwrap();
        assert!(backend.calls().is_empty());

        PpColor::new(Color::new(1.0, 0.0, 0.0, 0.5)).draw(&mut backend, 640, 480).unwrap();
        let quad = backend.calls().iter().find_map(|c| match c {
            Call::DrawScreenQuad(q) => Some(q.clone()),
            _ => None,
        });
        let quad = quad.unwrap();
        assert_eq!(quad.blend, QuadBlend::AlphaBlend);
        assert_eq!(quad.texture, None);
    }

    #[test]
    fn test_texture_overlay_skips_empty_name() {
        let mut backend = RecordingBackend::new(640, 480);
        let mut textures = TextureCatalog::new();
        PpTexture::default().draw(&mut backend, &mut textures, 640, 480).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::DrawScreenQuad(_))), 0);

        PpTexture::new("Dirt", Color::WHITE).draw(&mut backend, &mut textures, 640, 480).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::DrawScreenQuad(_))), 1);
        assert_eq!(backend.texture_loads(), 1);
    }

    #[test]
    fn test_function_identity_needs_no_transform() {
        let mut f = PpFunction::default();
        assert!(!f.is_linear_transform_required());
        f.b_factor = Vec3::new(0.0, 0.1, 0.0);
        assert!(f.is_linear_transform_required());
    }

    #[test]
    fn test_tone_mapping_converges_to_log_average() {
        let mut backend = RecordingBackend::new(640, 480);
        let screen = surface(&mut backend, 640, 480);
        let vram = surface(&mut backend, 12, 9);
        let ram = ram(&mut backend, 12, 9);
        backend.set_pixel_color(Color::rgb(0.2, 0.2, 0.2));

        let mut tm = PpToneMapping::new(1.0);
        tm.calc_brightness(&mut backend, screen.id, vram, ram, 1.0, 0.016).unwrap();
        assert!(tm.last_brightness() < 0.5 && tm.last_brightness() > 0.21);
        assert_eq!(backend.count(|c| matches!(c, Call::ReadPixels(_, n) if *n == TONE_MAPPING_SAMPLE_COUNT)), 1);

        // Within the measurement interval nothing is read back
        tm.calc_brightness(&mut backend, screen.id, vram, ram, 1.05, 0.05).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::ReadBack(..))), 1);

        for i in 1..100 {
            tm.calc_brightness(&mut backend, screen.id, vram, ram, 1.05 + i as f32 * 0.1, 0.1).unwrap();
        }
        assert_relative_eq!(tm.last_brightness(), 0.21, epsilon = 1e-3);
    }

    #[test]
    fn test_tone_mapping_survives_device_loss() {
        let mut backend = RecordingBackend::new(640, 480);
        let screen = surface(&mut backend, 640, 480);
        let vram = surface(&mut backend, 12, 9);
        let ram = ram(&mut backend, 12, 9);
        backend.set_device_status(crate::render::backend::DeviceStatus::Lost);

        let mut tm = PpToneMapping::new(1.0);
        tm.calc_brightness(&mut backend, screen.id, vram, ram, 1.0, 0.016).unwrap();
        assert_relative_eq!(tm.last_brightness(), 0.5);
        assert_relative_eq!(tm.luminance_factor(), 1.0);
    }

    #[test]
    fn test_sample_points_stay_inside() {
        let points = sample_points(12, 9);
        assert_eq!(points.len(), TONE_MAPPING_SAMPLE_COUNT);
        assert!(points.iter().all(|&(x, y)| x < 12 && y < 9));
    }

    #[test]
    fn test_bloom_passes() {
        let config = EngineConfig::default();
        let mut backend = RecordingBackend::new(640, 480);
        let mut services = EngineServices::new(&config).unwrap();
        let screen = surface(&mut backend, 640, 480);
        let blur1 = surface(&mut backend, 160, 120);
        let blur2 = surface(&mut backend, 160, 120);

        PpBloom::new(1.0, 0.5).create_bloom(&mut backend, &mut services, screen.id, blur1, blur2).unwrap();
        let blocks: Vec<_> = backend.param_blocks().cloned().collect();
        assert_eq!(blocks.len(), 3);
        assert_relative_eq!(blocks[0].float(ShaderParam::AFactor).unwrap(), 2.0);
        assert_relative_eq!(blocks[0].float(ShaderParam::BFactor).unwrap(), -1.0);
        assert_eq!(blocks[1].get(ShaderParam::Texture), Some(&blur1.id.into()));
        assert_eq!(blocks[2].get(ShaderParam::Texture), Some(&blur2.id.into()));
        assert_eq!(backend.render_target().0, RenderTarget::BackBuffer);
    }

    #[test]
    fn test_bloom_full_threshold_avoids_division() {
        let config = EngineConfig::default();
        let mut backend = RecordingBackend::new(640, 480);
        let mut services = EngineServices::new(&config).unwrap();
        let screen = surface(&mut backend, 640, 480);
        let blur1 = surface(&mut backend, 160, 120);
        let blur2 = surface(&mut backend, 160, 120);
        PpBloom::new(1.0, 1.0).create_bloom(&mut backend, &mut services, screen.id, blur1, blur2).unwrap();
        let first = backend.param_blocks().next().unwrap();
        assert_eq!(first.float(ShaderParam::AFactor), Some(0.0));
    }

    #[test]
    fn test_feedback_fills_before_drawing() {
        let mut backend = RecordingBackend::new(640, 480);
        let feedback = surface(&mut backend, 320, 240);
        let mut fx = PpFeedback::new(FeedbackMode::Drunk, 1.0);
        let vp = Mat4::identity();
        fx.draw(&mut backend, 640, 480, feedback.id, &Vec3::zeros(), &vp, 1.0, 0.016).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::DrawScreenQuad(_))), 0);
        assert_eq!(backend.count(|c| matches!(c, Call::StretchRect(RenderTarget::BackBuffer, ..))), 1);

        // Delay of 0.05 s not elapsed: draw without storing
        fx.draw(&mut backend, 640, 480, feedback.id, &Vec3::zeros(), &vp, 1.02, 0.02).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::DrawScreenQuad(_))), 1);
        assert_eq!(backend.count(|c| matches!(c, Call::StretchRect(..))), 1);
    }

    #[test]
    fn test_motion_blur_matrix_at_rest_is_identity() {
        let mut fx = PpFeedback::new(FeedbackMode::MotionBlur, 1.0);
        let m = fx.texture_matrix(&Vec3::new(1.0, 2.0, 3.0), &Mat4::identity(), 0.016);
        assert_relative_eq!(m, Mat4::identity(), epsilon = 1e-6);

        let m = fx.texture_matrix(&Vec3::new(1.0, 2.0, 4.0), &Mat4::identity(), 1.0);
        assert_relative_eq!(m[(0, 0)], 1.002, epsilon = 1e-6);
    }

    #[test]
    fn test_lens_flare_behind_camera_fades_out() {
        let mut backend = RecordingBackend::new(640, 480);
        let mut textures = TextureCatalog::new();
        let mut flare = PpLensFlare::new(Vec3::new(0.0, 0.0, -2.0));
        assert_relative_eq!(flare.dir_to_light().norm(), 1.0);
        let proj = crate::foundation::math::perspective_fov_lh(1.0, 4.0 / 3.0, 0.5, 100.0);
        flare.draw(&mut backend, &mut textures, 1.0, 640, 480, &Mat4::identity(), &proj, 0.016).unwrap();
        assert_eq!(flare.intensity(), 0.0);
        assert_eq!(backend.count(|c| matches!(c, Call::DrawScreenQuad(_))), 0);
    }

    #[test]
    fn test_lens_flare_in_view_draws_seven_quads() {
        let mut backend = RecordingBackend::new(640, 480);
        let mut textures = TextureCatalog::new();
        let mut flare = PpLensFlare::new(Vec3::new(0.0, 0.0, 1.0));
        let proj = crate::foundation::math::perspective_fov_lh(1.0, 4.0 / 3.0, 0.5, 100.0);
        for _ in 0..30 {
            flare.draw(&mut backend, &mut textures, 1.0, 640, 480, &Mat4::identity(), &proj, 0.05).unwrap();
        }
        assert!(flare.intensity() > 0.9);
        assert_eq!(textures.len(), 4);
        backend.clear_calls();
        flare.draw(&mut backend, &mut textures, 1.0, 640, 480, &Mat4::identity(), &proj, 0.05).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::DrawScreenQuad(q) if q.blend == QuadBlend::Additive)), 7);
    }

    #[test]
    fn test_trapezoid() {
        assert_eq!(trapezoid(0.5, 0.8, 1.3), 1.0);
        assert_relative_eq!(trapezoid(-1.05, 0.8, 1.3), 0.5);
        assert_eq!(trapezoid(2.0, 0.8, 1.3), 0.0);
    }

    #[test]
    fn test_render_to_texture_rule() {
        let mut stack = PostProcessStack::default();
        assert!(!stack.render_to_texture_required(false));
        assert!(stack.render_to_texture_required(true));
        stack.color = Some(PpColor::new(Color::WHITE));
        stack.feedback = Some(PpFeedback::default());
        assert!(!stack.render_to_texture_required(false));
        stack.bloom = Some(PpBloom::default());
        assert!(stack.render_to_texture_required(false));
    }

    #[test]
    fn test_clear_alpha_writes_alpha_only() {
        let mut backend = RecordingBackend::new(64, 64);
        clear_alpha(&mut backend, 0.0, 64, 64).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::DrawScreenQuad(q) if q.write == crate::render::backend::ColorWrite::AlphaOnly)), 1);
    }

    #[test]
    fn test_redraw_restores_target() {
        let mut backend = RecordingBackend::new(64, 64);
        let src = surface(&mut backend, 64, 64);
        let dst = surface(&mut backend, 32, 32);
        redraw(&mut backend, RenderTarget::Texture(dst.id), 32, 32, src.id).unwrap();
        assert_eq!(backend.render_target().0, RenderTarget::BackBuffer);
        assert_eq!(backend.count(|c| matches!(c, Call::DrawScreenQuad(q) if q.filter == Filter::Point)), 1);
    }
}
