//! Deterministic fixtures derived from a shared room seed
//!
//! Every consumer seeds ChaCha8 with the IEEE-754 bits of the room seed and
//! draws, per artifact, in this exact order: x fraction, emitter width,
//! zone height, strength. Keep the order stable or clients diverge.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Height of the emitter body itself
const EMITTER_HEIGHT: f32 = 20.0;
/// Gap between the emitter and the floor
const FLOOR_MARGIN: f32 = 30.0;

/// An upward-force emitter resting near the floor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub index: u32,
    /// Emitter center
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Height of the influence zone above the emitter
    pub zone_height: f32,
    /// Upward acceleration at the zone center (px/s^2)
    pub strength: f32,
}

impl Artifact {
    /// Upward acceleration applied to a point, zero outside the influence zone.
    ///
    /// Falls off linearly with horizontal distance from the emitter center and
    /// with height above the emitter, reaching zero at the zone edges.
    pub fn lift_at(&self, px: f32, py: f32) -> f32 {
        let half_width = self.width / 2.0;
        let top = self.y - self.height / 2.0;
        let dx = (px - self.x).abs();
        let dy = top - py;

        if dx >= half_width || dy < 0.0 || dy >= self.zone_height {
            return 0.0;
        }

        let fx = 1.0 - dx / half_width;
        let fy = 1.0 - dy / self.zone_height;
        self.strength * fx * fy
    }
}

/// Fresh seed for a new room
pub fn new_seed() -> f64 {
    rand::random::<f64>()
}

/// Generate `count` emitters for a world of the given size
pub fn generate(seed: f64, count: u32, world_width: f32, world_height: f32) -> Vec<Artifact> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed.to_bits());

    (0..count)
        .map(|index| {
            let x_fraction: f32 = rng.gen_range(0.1..0.9);
            let width: f32 = rng.gen_range(80.0..180.0);
            let zone_height: f32 = rng.gen_range(world_height * 0.3..world_height * 0.7);
            let strength: f32 = rng.gen_range(1400.0..2200.0);

            Artifact {
                index,
                x: x_fraction * world_width,
                y: world_height - FLOOR_MARGIN - EMITTER_HEIGHT / 2.0,
                width,
                height: EMITTER_HEIGHT,
                zone_height,
                strength,
            }
        })
        .collect()
}
