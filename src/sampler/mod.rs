//! Density and jitter noise source for cloud generation.

use noise::{NoiseFn, Perlin};

/// Noise source queried by the sampling loop.
///
/// Implementations must be deterministic: identical inputs always produce
/// identical outputs, so concurrent readers need no synchronization.
pub trait CloudSampler: Send + Sync {
    /// Cloud density at a world column. Values in (0, 1] produce a point,
    /// anything at or below zero is skipped.
    fn sample(&self, x: i32, z: i32, cloudiness: f32, fuzziness: f32) -> f32;

    /// Horizontal jitter offset along x, in [-1, 1].
    fn jitter_x(&self, x: i32, z: i32) -> f32;

    /// Horizontal jitter offset along z, in [-1, 1].
    fn jitter_z(&self, x: i32, z: i32) -> f32;
}

const DENSITY_SCALE: f64 = 0.006;
const JITTER_SCALE: f64 = 0.11;
const MIN_FUZZINESS: f32 = 1e-4;

/// Perlin-based sampler.
///
/// Separate noise channels are seeded with fixed offsets from the base seed
/// so density and the two jitter axes stay decorrelated.
pub struct NoiseSampler {
    density: Perlin,
    offset_x: Perlin,
    offset_z: Perlin,
}

impl NoiseSampler {
    pub fn new(seed: u32) -> Self {
        Self {
            density: Perlin::new(seed),
            offset_x: Perlin::new(seed.wrapping_add(1)),
            offset_z: Perlin::new(seed.wrapping_add(2)),
        }
    }
}

impl Default for NoiseSampler {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CloudSampler for NoiseSampler {
    fn sample(&self, x: i32, z: i32, cloudiness: f32, fuzziness: f32) -> f32 {
        let noise = self
            .density
            .get([x as f64 * DENSITY_SCALE, z as f64 * DENSITY_SCALE]) as f32;
        let coverage = (noise + 1.0) * 0.5;
        // The threshold rises as cloudiness falls; fuzziness widens the
        // soft edge around it.
        let threshold = 1.0 - cloudiness;
        ((coverage - threshold) / fuzziness.max(MIN_FUZZINESS)).min(1.0)
    }

    fn jitter_x(&self, x: i32, z: i32) -> f32 {
        self.offset_x
            .get([x as f64 * JITTER_SCALE, z as f64 * JITTER_SCALE]) as f32
    }

    fn jitter_z(&self, x: i32, z: i32) -> f32 {
        self.offset_z
            .get([x as f64 * JITTER_SCALE, z as f64 * JITTER_SCALE]) as f32
    }
}
