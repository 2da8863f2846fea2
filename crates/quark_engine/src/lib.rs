//! # Quark Engine
//!
//! Forward-rendering scene core for a D3D9-class device.
//!
//! ## Features
//!
//! - **Loose entity octree**: frustum, sphere, box and ray queries over a
//!   scene graph of entities
//! - **Multi-light forward rendering**: one additive pass per directional,
//!   spot and point light, scissored to the light's screen extent
//! - **Shadow mapping**: flat maps for directional and spot lights, cube
//!   maps for point lights, pooled in size tiers
//! - **Shader variants**: programs compiled per feature combination and cached
//! - **Postprocessing**: tone mapping, bloom, heat haze, feedback, lens flare
//! - **Running optimizer**: culling settings tuned from measured frame times
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quark_engine::prelude::*;
//!
//! fn main() -> Result<(), EngineError> {
//!     let mut engine = Engine::new(RecordingBackend::new(800, 600), EngineConfig::default())?;
//!     let scene = engine.create_scene(BoundingBox::new(Vec3::repeat(-100.0), Vec3::repeat(100.0)));
//!     engine.set_active_scene(Some(scene))?;
//!     engine.update(0.016);
//!     engine.draw()?;
//!     println!("{}", engine.info());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod foundation;
pub mod render;
pub mod scene;
pub mod spatial;

pub use engine::{Engine, RenderContext};
pub use error::{EngineError, EngineResult};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigOption, EngineConfig},
        foundation::{
            collections::{CameraHandle, EntityHandle, MaterialHandle, SceneHandle},
            geometry::BoundingBox,
            math::{Color, Mat4, Quat, Vec2, Vec3},
            time::FrameTimer,
        },
        render::{RecordingBackend, RenderBackend},
        scene::{Camera, DirectionalLight, EntityKind, Material, PointLight, Scene, SpotLight},
        Engine, EngineError, EngineResult,
    };
}
