//! GPU-resident resources with explicit load state
//!
//! Everything here follows one contract: `load` is idempotent and makes
//! the resource usable, `is_loaded` reports residency, and callers load
//! before every use instead of assuming a resource stayed resident.

use std::collections::HashMap;
use std::hash::Hash;

use log::{debug, trace};

use crate::error::{EngineError, EngineResult};
use crate::render::backend::{BackendResult, ProgramId, RenderBackend, TextureDesc, TextureId};

/// Lazily loaded device resource
pub trait Resource {
    /// Make the resource usable; does nothing when already loaded
    fn load(&mut self, backend: &mut dyn RenderBackend) -> BackendResult<()>;

    /// Free device memory, keeping the description
    fn unload(&mut self, backend: &mut dyn RenderBackend);

    /// True when usable without loading
    fn is_loaded(&self) -> bool;
}

/// Loaded texture together with its size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    /// Backend handle
    pub id: TextureId,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Render-target texture created from a description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTexture {
    desc: TextureDesc,
    id: Option<TextureId>,
}

impl RenderTexture {
    /// Describe a texture without creating it
    pub const fn new(desc: TextureDesc) -> Self {
        Self { desc, id: None }
    }

    /// Creation parameters
    pub const fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    /// Width in pixels
    pub const fn width(&self) -> u32 {
        self.desc.width
    }

    /// Height in pixels
    pub const fn height(&self) -> u32 {
        self.desc.height
    }

    /// Backend handle while loaded
    pub const fn id(&self) -> Option<TextureId> {
        self.id
    }

    /// Change the size. A loaded texture is released and has to be loaded again.
    pub fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) {
        if self.desc.width == width && self.desc.height == height {
            return;
        }
        self.unload(backend);
        self.desc.width = width;
        self.desc.height = height;
    }

    /// Handle and size while loaded
    pub fn surface(&self) -> Option<Surface> {
        self.id.map(|id| Surface { id, width: self.desc.width, height: self.desc.height })
    }

    /// Load and return the handle
    pub fn ensure(&mut self, backend: &mut dyn RenderBackend) -> BackendResult<TextureId> {
        if let Some(id) = self.id {
            return Ok(id);
        }
        let id = backend.create_texture(&self.desc)?;
        trace!("Created {}x{} {:?} texture {:?}", self.desc.width, self.desc.height, self.desc.format, id);
        self.id = Some(id);
        Ok(id)
    }
}

impl Resource for RenderTexture {
    fn load(&mut self, backend: &mut dyn RenderBackend) -> BackendResult<()> {
        self.ensure(backend).map(|_| ())
    }

    fn unload(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(id) = self.id.take() {
            backend.release_texture(id);
        }
    }

    fn is_loaded(&self) -> bool {
        self.id.is_some()
    }
}

/// Named texture assets, loaded on first request
#[derive(Debug, Default)]
pub struct TextureCatalog {
    textures: HashMap<String, TextureId>,
}

impl TextureCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Texture with this name, loading it if needed. An empty name means "no texture".
    pub fn get(&mut self, backend: &mut dyn RenderBackend, name: &str) -> EngineResult<Option<TextureId>> {
        if name.is_empty() {
            return Ok(None);
        }
        if let Some(id) = self.textures.get(name) {
            return Ok(Some(*id));
        }
        let id = backend.load_texture(name).map_err(|e| {
            debug!("Texture {} failed to load: {}", name, e);
            EngineError::ResourceNotFound(name.to_string())
        })?;
        self.textures.insert(name.to_string(), id);
        Ok(Some(id))
    }

    /// Texture with this name, failing when the name is empty
    pub fn must_get(&mut self, backend: &mut dyn RenderBackend, name: &str) -> EngineResult<TextureId> {
        self.get(backend, name)?.ok_or_else(|| EngineError::ResourceNotFound(name.to_string()))
    }

    /// True when the texture is already resident
    pub fn is_loaded(&self, name: &str) -> bool {
        self.textures.contains_key(name)
    }

    /// Release every texture
    pub fn clear(&mut self, backend: &mut dyn RenderBackend) {
        for (_, id) in self.textures.drain() {
            backend.release_texture(id);
        }
    }

    /// Number of resident textures
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// True when nothing is resident
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

/// Key selecting one compiled variant of a program
pub trait ShaderKey: Copy + Eq + Hash {
    /// Preprocessor defines of this variant, in declaration order
    fn defines(&self) -> Vec<(&'static str, u32)>;
}

/// Compiled variants of one program source, compiled on first use
#[derive(Debug)]
pub struct ShaderCache<K: ShaderKey> {
    source: String,
    programs: HashMap<K, ProgramId>,
    loaded: bool,
}

impl<K: ShaderKey> ShaderCache<K> {
    /// Cache over the named program source; nothing is compiled yet
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into(), programs: HashMap::new(), loaded: false }
    }

    /// Program source name
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Program for a variant, compiling it on first request
    pub fn get(&mut self, backend: &mut dyn RenderBackend, key: &K) -> BackendResult<ProgramId> {
        self.loaded = true;
        if let Some(program) = self.programs.get(key) {
            return Ok(*program);
        }
        let defines = key.defines();
        let program = backend.compile_program(&self.source, &defines)?;
        trace!("Compiled {} variant {:?}", self.source, defines);
        self.programs.insert(*key, program);
        Ok(program)
    }

    /// Number of compiled variants, 0 while unloaded
    pub fn len(&self) -> usize {
        if self.loaded {
            self.programs.len()
        } else {
            0
        }
    }

    /// True when no variant is compiled
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: ShaderKey> Resource for ShaderCache<K> {
    fn load(&mut self, _backend: &mut dyn RenderBackend) -> BackendResult<()> {
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self, backend: &mut dyn RenderBackend) {
        for (_, program) in self.programs.drain() {
            backend.release_program(program);
        }
        self.loaded = false;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::SurfaceFormat;
    use crate::render::recording::RecordingBackend;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    struct Variant(u32);

    impl ShaderKey for Variant {
        fn defines(&self) -> Vec<(&'static str, u32)> {
            vec![("VARIANT", self.0)]
        }
    }

    #[test]
    fn test_render_texture_lifecycle() {
        let mut backend = RecordingBackend::new(640, 480);
        let mut tex = RenderTexture::new(TextureDesc::render_target(64, 64, SurfaceFormat::A8R8G8B8));
        assert!(!tex.is_loaded());
        let id = tex.ensure(&mut backend).unwrap();
        assert_eq!(tex.ensure(&mut backend).unwrap(), id);
        assert_eq!(backend.live_texture_count(), 1);

        tex.resize(&mut backend, 64, 64);
        assert!(tex.is_loaded());
        tex.resize(&mut backend, 32, 32);
        assert!(!tex.is_loaded());
        assert_eq!(backend.live_texture_count(), 0);
        assert_eq!(tex.width(), 32);
    }

    #[test]
    fn test_catalog_loads_once() {
        let mut backend = RecordingBackend::new(640, 480);
        let mut catalog = TextureCatalog::new();
        assert_eq!(catalog.get(&mut backend, "").unwrap(), None);
        let a = catalog.get(&mut backend, "rock.dds").unwrap();
        let b = catalog.get(&mut backend, "rock.dds").unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.texture_loads(), 1);
        assert!(catalog.is_loaded("rock.dds"));
    }

    #[test]
    fn test_catalog_reports_missing_texture() {
        let mut backend = RecordingBackend::new(640, 480);
        backend.mark_missing("lava.dds");
        let mut catalog = TextureCatalog::new();
        let err = catalog.get(&mut backend, "lava.dds").unwrap_err();
        assert!(matches!(err, EngineError::ResourceNotFound(name) if name == "lava.dds"));
    }

    #[test]
    fn test_shader_cache_compiles_each_variant_once() {
        let mut backend = RecordingBackend::new(640, 480);
        let mut cache = ShaderCache::<Variant>::new("Main");
        assert_eq!(cache.len(), 0);
        let a = cache.get(&mut backend, &Variant(1)).unwrap();
        assert_eq!(cache.get(&mut backend, &Variant(1)).unwrap(), a);
        cache.get(&mut backend, &Variant(2)).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(backend.compiled_program_count(), 2);

        cache.unload(&mut backend);
        assert_eq!(cache.len(), 0);
        assert!(!cache.is_loaded());
    }
}
