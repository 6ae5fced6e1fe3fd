//! Procedural ground generation.

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rayon::prelude::*;
use snowpack_core::GroundConfig;

/// Ground elevation generator using fractal noise.
///
/// Output is a pure function of the configuration and the raster
/// resolution, so regenerating on reset reproduces the same ground.
#[derive(Clone)]
pub struct GroundGenerator {
    config: GroundConfig,
    height_noise: Fbm<Perlin>,
}

impl GroundGenerator {
    /// Create a new ground generator with the given configuration.
    pub fn new(config: GroundConfig) -> Self {
        let height_noise = Fbm::<Perlin>::new(config.seed)
            .set_octaves(config.octaves)
            .set_lacunarity(config.lacunarity)
            .set_persistence(config.persistence);

        Self {
            config,
            height_noise,
        }
    }

    /// Get the generator configuration.
    pub fn config(&self) -> &GroundConfig {
        &self.config
    }

    /// Ground offset above the base plane at texel `(x, z)`, in `[0, amplitude]`.
    pub fn height_at(&self, x: u32, z: u32) -> f32 {
        let nx = f64::from(x) / self.config.feature_scale;
        let nz = f64::from(z) / self.config.feature_scale;

        // Noise returns roughly [-1, 1]
        let noise_value = self.height_noise.get([nx, nz]).clamp(-1.0, 1.0);
        ((noise_value + 1.0) * 0.5) as f32 * self.config.amplitude
    }

    /// Generate the full `resolution x resolution` raster, row by row in parallel.
    pub fn generate(&self, resolution: u32) -> Vec<f32> {
        let r = resolution as usize;
        let mut raster = vec![0.0; r * r];
        raster
            .par_chunks_mut(r)
            .enumerate()
            .for_each(|(z, row)| {
                for (x, texel) in row.iter_mut().enumerate() {
                    *texel = self.height_at(x as u32, z as u32);
                }
            });
        raster
    }
}
