//! Spatial indexing of scene entities

pub mod entity_octree;

pub use entity_octree::{EntityOctree, OctreeNode};
