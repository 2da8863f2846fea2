//! # Rendering
//!
//! Everything between the scene and the device:
//!
//! - **Backend**: the [`RenderBackend`] trait the core draws through, and
//!   [`RecordingBackend`], a headless implementation recording every call
//! - **Resources**: lazily loaded textures, render targets and shader caches
//! - **Shader features**: the pass and feature keys selecting a program variant
//! - **Render state**: fixed-function state per material kind and pass
//! - **Services**: shadow-map pool, special textures and state setup
//! - **Postprocess**: screen-space effects composed after the scene
//! - **Optimizer**: run-time tuning of culling settings by frame time

pub mod backend;
pub mod optimizer;
pub mod params;
pub mod postprocess;
pub mod recording;
pub mod render_state;
pub mod resources;
pub mod services;
pub mod shader_features;

pub use backend::{BackendResult, DeviceCaps, DeviceStatus, RenderBackend, RenderError, ShaderModel};
pub use optimizer::{OptimizerSettings, RunningOptimizer};
pub use postprocess::PostProcessStack;
pub use recording::RecordingBackend;
pub use services::EngineServices;
pub use shader_features::Pass;
