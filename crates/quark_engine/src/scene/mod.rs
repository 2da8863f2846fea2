//! Scene management
//!
//! A [`Scene`] is the world a frame is drawn from. The supporting modules
//! hold the pieces it is built from:
//!
//! - [`camera`]: view parameters with lazily cached matrices and frustum
//! - [`entity`] and [`entity_arena`]: the scene graph and its transform caches
//! - [`material`]: named materials and their collection
//! - [`light`]: directional, spot and point lights
//! - [`collaborators`]: map, terrain, tree, sky and fall drawn by outside code
//! - [`draw_data`]: the per-frame visible set
//! - [`stats`]: per-frame counters

pub mod camera;
pub mod collaborators;
pub mod draw_data;
pub mod entity;
pub mod entity_arena;
pub mod light;
pub mod material;
#[allow(clippy::module_inception)]
pub mod scene;
pub mod stats;

pub use camera::{Camera, ParamsCamera};
pub use entity::{Entity, EntityKind};
pub use light::{DirectionalLight, PointLight, SpotLight};
pub use material::{Material, MaterialCollection, MaterialKind};
pub use scene::{Fog, MapLighting, RayHit, Scene};
pub use stats::Stats;
