//! Per-frame drawing statistics

use std::fmt;

/// Counters of one drawn frame
///
/// Pairs hold the count before and after occlusion queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Geometry passes, shadow-map faces included
    pub passes: u32,
    /// Visible spot lights: frustum, occlusion
    pub spot_lights: [u32; 2],
    /// Visible point lights: frustum, occlusion
    pub point_lights: [u32; 2],
    /// Visible entities: frustum, occlusion
    pub entities: [u32; 2],
    /// Visible map fragments
    pub map_fragments: u32,
    /// Visible terrain patches
    pub terrain_patches: u32,
    /// Visible tree instances
    pub trees: u32,
    /// Compiled main program variants
    pub main_shaders: u32,
    /// Compiled postprocess program variants
    pub pp_shaders: u32,
    /// Optimizer settings used for the frame
    pub optimizer: String,
}

impl Stats {
    /// Zero every counter
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Passes={}, SpotLights={}:{}, PointLights={}:{} Entities={}:{}, MapFragments={}, TerrainPatches={}, Trees={}, MainShaders={}, PpShaders={}, Optimizer={}",
            self.passes,
            self.spot_lights[0],
            self.spot_lights[1],
            self.point_lights[0],
            self.point_lights[1],
            self.entities[0],
            self.entities[1],
            self.map_fragments,
            self.terrain_patches,
            self.trees,
            self.main_shaders,
            self.pp_shaders,
            self.optimizer,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_line() {
        let stats = Stats {
            passes: 9,
            spot_lights: [2, 1],
            point_lights: [3, 3],
            entities: [40, 31],
            map_fragments: 12,
            terrain_patches: 6,
            trees: 80,
            main_shaders: 14,
            pp_shaders: 2,
            optimizer: "SE-T".into(),
        };
        assert_eq!(
            stats.to_string(),
            "Passes=9, SpotLights=2:1, PointLights=3:3 Entities=40:31, MapFragments=12, TerrainPatches=6, Trees=80, MainShaders=14, PpShaders=2, Optimizer=SE-T"
        );
    }

    #[test]
    fn test_reset() {
        let mut stats = Stats { passes: 3, optimizer: "SELT".into(), ..Stats::default() };
        stats.reset();
        assert_eq!(stats, Stats::default());
    }
}
