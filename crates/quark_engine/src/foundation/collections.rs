//! Handle types for arena-owned objects
//!
//! Every long-lived object the engine owns sits in a slotmap and is
//! referred to by a generational key, so a stale handle can never alias
//! a newer object that reused the slot.

pub use slotmap::{SecondaryMap, SlotMap};

slotmap::new_key_type! {
    /// Entity owned by a scene
    pub struct EntityHandle;
    /// Node of an entity octree
    pub struct NodeHandle;
    /// Material registered in a scene's material collection
    pub struct MaterialHandle;
    /// Camera registered in a scene
    pub struct CameraHandle;
    /// Spot light registered in a scene
    pub struct SpotLightHandle;
    /// Point light registered in a scene
    pub struct PointLightHandle;
    /// Scene owned by the engine
    pub struct SceneHandle;
}
