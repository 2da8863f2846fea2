//! Self-tuning of optional rendering optimizations
//!
//! Every 16th frame flips one setting round-robin and compares that frame's
//! time against the rolling average of ordinary frames. Each setting keeps
//! its own tally; two favourable trials make its flip permanent.

use std::fmt;

use log::debug;

/// Frames between experiments
pub const EXPERIMENTAL_FRAME_PERIOD: u64 = 16;
/// Experiments per setting before deciding
pub const FLIP_TEST_COUNT: u32 = 2;
const SAMPLE_COUNT: usize = 16;
const SETTING_COUNT: usize = 4;

/// Optional optimizations the optimizer switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::struct_excessive_bools)]
pub struct OptimizerSettings {
    /// Sort opaque fragments by material
    pub material_sort: bool,
    /// Occlusion-query entities before lighting them
    pub entity_occlusion_query: bool,
    /// Occlusion-query light volumes
    pub light_occlusion_query: bool,
    /// Frustum-cull tree instances individually
    pub tree_frustum_culling: bool,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self { material_sort: true, entity_occlusion_query: true, light_occlusion_query: true, tree_frustum_culling: true }
    }
}

impl OptimizerSettings {
    fn get(&self, index: usize) -> bool {
        match index {
            0 => self.material_sort,
            1 => self.entity_occlusion_query,
            2 => self.light_occlusion_query,
            _ => self.tree_frustum_culling,
        }
    }

    fn slot(&mut self, index: usize) -> &mut bool {
        match index {
            0 => &mut self.material_sort,
            1 => &mut self.entity_occlusion_query,
            2 => &mut self.light_occlusion_query,
            _ => &mut self.tree_frustum_culling,
        }
    }

    /// Copy with one setting inverted
    #[must_use]
    pub fn flipped(mut self, index: usize) -> Self {
        let slot = self.slot(index);
        *slot = !*slot;
        self
    }
}

/// `SELT`, with `-` for every setting that is off
impl fmt::Display for OptimizerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in ['S', 'E', 'L', 'T'].into_iter().enumerate() {
            write!(f, "{}", if self.get(i) { c } else { '-' })?;
        }
        Ok(())
    }
}

/// Fixed-size ring of the most recent frame times
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    samples: [f32; SAMPLE_COUNT],
    next: usize,
    count: usize,
}

impl SampleBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample, dropping the oldest when full
    pub fn add(&mut self, sample: f32) {
        self.samples[self.next] = sample;
        self.next = (self.next + 1) % SAMPLE_COUNT;
        self.count = (self.count + 1).min(SAMPLE_COUNT);
    }

    /// Mean of the stored samples, 0 when empty
    pub fn average(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        self.samples[..self.count].iter().sum::<f32>() / self.count as f32
    }

    /// Number of stored samples
    pub const fn len(&self) -> usize {
        self.count
    }

    /// True before the first sample
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Online A/B test over [`OptimizerSettings`]
#[derive(Debug, Clone)]
pub struct RunningOptimizer {
    current: OptimizerSettings,
    frame: u64,
    samples: SampleBuffer,
    experimental_index: usize,
    flip_sums: [i32; SETTING_COUNT],
    flip_counts: [u32; SETTING_COUNT],
}

impl Default for RunningOptimizer {
    fn default() -> Self {
        Self::new(OptimizerSettings::default())
    }
}

impl RunningOptimizer {
    /// Start from a baseline
    pub fn new(baseline: OptimizerSettings) -> Self {
        Self {
            current: baseline,
            frame: 0,
            samples: SampleBuffer::new(),
            experimental_index: 0,
            flip_sums: [0; SETTING_COUNT],
            flip_counts: [0; SETTING_COUNT],
        }
    }

    /// Baseline settings, without the experimental flip
    pub const fn current(&self) -> OptimizerSettings {
        self.current
    }

    /// Frames seen so far
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Settings for the coming frame, given the time the previous one took
    pub fn on_frame(&mut self, last_frame_time: f32) -> OptimizerSettings {
        if self.frame % EXPERIMENTAL_FRAME_PERIOD != 0 {
            self.samples.add(last_frame_time);
        } else if self.frame > 0 {
            // Previous frame ran with the experimental flip
            let index = self.experimental_index;
            self.flip_sums[index] += if last_frame_time < self.samples.average() { 1 } else { -1 };
            self.flip_counts[index] += 1;
            if self.flip_counts[index] >= FLIP_TEST_COUNT {
                if self.flip_sums[index] > 0 {
                    self.current = self.current.flipped(index);
                    debug!("Optimizer settings now {}", self.current);
                }
                self.flip_sums[index] = 0;
                self.flip_counts[index] = 0;
            }
            self.experimental_index = (index + 1) % SETTING_COUNT;
        }

        self.frame += 1;
        if self.frame % EXPERIMENTAL_FRAME_PERIOD == 0 {
            self.current.flipped(self.experimental_index)
        } else {
            self.current
        }
    }
}
