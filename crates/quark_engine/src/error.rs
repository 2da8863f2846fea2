//! Engine-level errors
//!
//! Every fallible engine operation returns [`EngineResult`]. Transient
//! device loss is not an error: it is reported through
//! [`DeviceStatus`](crate::render::backend::DeviceStatus) and handled at
//! the few call sites that can meet it.

use thiserror::Error;

use crate::config::ConfigError;
use crate::render::backend::RenderError;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine-level errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Rendering backend call failed
    #[error("Rendering error: {0}")]
    Render(#[from] RenderError),

    /// A scene may hold at most one directional light
    #[error("Scene already has a directional light")]
    DirectionalLightAlreadyRegistered,

    /// Material lookup by name failed
    #[error("Material not found: {0}")]
    MaterialNotFound(String),

    /// Material exists but is of a different kind
    #[error("Material {name} is not a {expected} material")]
    MaterialKindMismatch {
        /// Material name
        name: String,
        /// Kind the caller asked for
        expected: &'static str,
    },

    /// Shadow-map format string could not be parsed
    #[error("Invalid shadow map format: {0}")]
    InvalidShadowMapFormat(String),

    /// Device does not meet the minimum shader model
    #[error("Unsupported device: vertex shader {vertex_shader}, pixel shader {pixel_shader}, 2.0 required")]
    UnsupportedDevice {
        /// Reported vertex shader version
        vertex_shader: String,
        /// Reported pixel shader version
        pixel_shader: String,
    },

    /// Named resource could not be found or loaded
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Handle does not refer to a live object
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),

    /// Operation needs an active scene
    #[error("No active scene")]
    NoActiveScene,
}
