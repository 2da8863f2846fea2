//! Configuration system
//!
//! [`EngineConfig`] is the option surface read by the renderer every
//! frame. It can be loaded from TOML or RON through the [`Config`]
//! trait and changed at runtime through [`ConfigOption`]-keyed accessors
//! on the engine.

use std::fmt;
use std::str::FromStr;

pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str_with_format(&contents, path)
    }

    /// Parse configuration text, picking the format from the file name
    fn from_str_with_format(contents: &str, path: &str) -> Result<Self, ConfigError> {
        if path.ends_with(".toml") {
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Option accessed through a getter or setter of the wrong type
    #[error("Option {option} is not a {expected} option")]
    WrongOptionType {
        /// The option that was accessed
        option: ConfigOption,
        /// The value type the accessor handles
        expected: &'static str,
    },
}

/// Pixel format of shadow-map surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShadowMapFormat {
    /// Single 32-bit float channel holding depth
    #[default]
    R32F,
    /// Depth packed into an 8-bit-per-channel color
    A8R8G8B8,
}

impl FromStr for ShadowMapFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("D3DFMT_").unwrap_or(&upper);
        match name {
            "R32F" => Ok(Self::R32F),
            "A8R8G8B8" | "ARGB8" => Ok(Self::A8R8G8B8),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for ShadowMapFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::R32F => write!(f, "R32F"),
            Self::A8R8G8B8 => write!(f, "A8R8G8B8"),
        }
    }
}

/// Runtime-settable engine options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigOption {
    /// bool - dynamic lighting passes
    Lighting,
    /// bool - shadow mapping
    SmEnabled,
    /// bool - postprocessing
    PpEnabled,
    /// float - shadow-map depth bias
    SmEpsilon,
    /// float - grass draw distance
    GrassZFar,
    /// uint - largest 2D shadow-map size
    SmMaxSize,
    /// uint - largest cube shadow-map size
    SmMaxCubeSize,
}

impl fmt::Display for ConfigOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Shadow mapping options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowMappingConfig {
    /// Master switch
    pub enabled: bool,
    /// Depth bias subtracted in shadow-map space
    pub epsilon: f32,
    /// Size of the largest 2D shadow map, halved per tier
    pub max_size: u32,
    /// Size of the largest cube shadow map, halved per tier
    pub max_cube_size: u32,
    /// Surface format name, parsed by [`ShadowMapFormat`]
    pub format: String,
}

impl Default for ShadowMappingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            epsilon: 0.0005,
            max_size: 1024,
            max_cube_size: 512,
            format: "R32F".to_string(),
        }
    }
}

/// Postprocessing options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostprocessingConfig {
    /// Master switch
    pub enabled: bool,
}

impl Default for PostprocessingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Grass options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrassConfig {
    /// Distance beyond which grass is not drawn
    pub z_far: f32,
}

impl Default for GrassConfig {
    fn default() -> Self {
        Self { z_far: 50.0 }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dynamic lighting passes
    pub lighting: bool,
    /// Shadow mapping
    pub shadow_mapping: ShadowMappingConfig,
    /// Postprocessing
    pub postprocessing: PostprocessingConfig,
    /// Grass
    pub grass: GrassConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lighting: true,
            shadow_mapping: ShadowMappingConfig::default(),
            postprocessing: PostprocessingConfig::default(),
            grass: GrassConfig::default(),
        }
    }
}

impl Config for EngineConfig {}

impl EngineConfig {
    /// Parsed shadow-map format
    pub fn shadow_map_format(&self) -> Result<ShadowMapFormat, String> {
        self.shadow_mapping.format.parse()
    }

    /// Read a boolean option
    pub fn get_bool(&self, option: ConfigOption) -> Result<bool, ConfigError> {
        match option {
            ConfigOption::Lighting => Ok(self.lighting),
            ConfigOption::SmEnabled => Ok(self.shadow_mapping.enabled),
            ConfigOption::PpEnabled => Ok(self.postprocessing.enabled),
            _ => Err(ConfigError::WrongOptionType { option, expected: "bool" }),
        }
    }

    /// Read a float option
    pub fn get_float(&self, option: ConfigOption) -> Result<f32, ConfigError> {
        match option {
            ConfigOption::SmEpsilon => Ok(self.shadow_mapping.epsilon),
            ConfigOption::GrassZFar => Ok(self.grass.z_far),
            _ => Err(ConfigError::WrongOptionType { option, expected: "float" }),
        }
    }

    /// Read an unsigned option
    pub fn get_uint(&self, option: ConfigOption) -> Result<u32, ConfigError> {
        match option {
            ConfigOption::SmMaxSize => Ok(self.shadow_mapping.max_size),
            ConfigOption::SmMaxCubeSize => Ok(self.shadow_mapping.max_cube_size),
            _ => Err(ConfigError::WrongOptionType { option, expected: "uint" }),
        }
    }

    /// Write a boolean option
    pub fn set_bool(&mut self, option: ConfigOption, value: bool) -> Result<(), ConfigError> {
        match option {
            ConfigOption::Lighting => self.lighting = value,
            ConfigOption::SmEnabled => self.shadow_mapping.enabled = value,
            ConfigOption::PpEnabled => self.postprocessing.enabled = value,
            _ => return Err(ConfigError::WrongOptionType { option, expected: "bool" }),
        }
        Ok(())
    }

    /// Write a float option
    pub fn set_float(&mut self, option: ConfigOption, value: f32) -> Result<(), ConfigError> {
        match option {
            ConfigOption::SmEpsilon => self.shadow_mapping.epsilon = value,
            ConfigOption::GrassZFar => self.grass.z_far = value,
            _ => return Err(ConfigError::WrongOptionType { option, expected: "float" }),
        }
        Ok(())
    }

    /// Write an unsigned option
    pub fn set_uint(&mut self, option: ConfigOption, value: u32) -> Result<(), ConfigError> {
        match option {
            ConfigOption::SmMaxSize => self.shadow_mapping.max_size = value,
            ConfigOption::SmMaxCubeSize => self.shadow_mapping.max_cube_size = value,
            _ => return Err(ConfigError::WrongOptionType { option, expected: "uint" }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.lighting);
        assert!(config.shadow_mapping.enabled);
        assert!(config.postprocessing.enabled);
        assert_eq!(config.shadow_map_format(), Ok(ShadowMapFormat::R32F));
    }

    #[test]
    fn test_toml_partial_document_keeps_defaults() {
        let text = "lighting = false\n[shadow_mapping]\nmax_size = 2048\nformat = \"D3DFMT_A8R8G8B8\"\n";
        let config = EngineConfig::from_str_with_format(text, "engine.toml").unwrap();
        assert!(!config.lighting);
        assert_eq!(config.shadow_mapping.max_size, 2048);
        assert_eq!(config.shadow_mapping.max_cube_size, 512);
        assert_eq!(config.shadow_map_format(), Ok(ShadowMapFormat::A8R8G8B8));
    }

    #[test]
    fn test_ron_document() {
        let text = "(lighting: true, postprocessing: (enabled: false))";
        let config = EngineConfig::from_str_with_format(text, "engine.ron").unwrap();
        assert!(!config.postprocessing.enabled);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = EngineConfig::from_str_with_format("", "engine.ini").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_bad_format_string() {
        let mut config = EngineConfig::default();
        config.shadow_mapping.format = "DXT1".into();
        assert_eq!(config.shadow_map_format(), Err("DXT1".to_string()));
    }

    #[test]
    fn test_typed_access_rejects_wrong_type() {
        let mut config = EngineConfig::default();
        assert!(config.get_float(ConfigOption::Lighting).is_err());
        assert!(config.set_bool(ConfigOption::SmEpsilon, true).is_err());
        config.set_float(ConfigOption::SmEpsilon, 0.01).unwrap();
        assert_eq!(config.get_float(ConfigOption::SmEpsilon).unwrap(), 0.01);
        assert_eq!(config.get_uint(ConfigOption::SmMaxSize).unwrap(), 1024);
        config.set_uint(ConfigOption::SmMaxCubeSize, 256).unwrap();
        assert_eq!(config.shadow_mapping.max_cube_size, 256);
        assert!(config.set_uint(ConfigOption::GrassZFar, 1).is_err());
    }
}
