//! Scripted input for headless clients

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::InputSource;

/// Wanders around, looks about and fires now and then.
///
/// Every `hold` seconds it rolls a new movement direction and look speed, so
/// a session produces long straight runs (which exercise prediction) mixed
/// with sudden turns and jumps (which exercise reconciliation).
pub struct BotInput {
    rng: StdRng,
    hold: f32,
    elapsed: f32,
    axis: Vec2,
    look_speed: Vec2,
    fire_chance: f64,
    jump_chance: f64,
    jump: bool,
    fire: bool,
}

impl BotInput {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            hold: 1.5,
            elapsed: f32::INFINITY,
            axis: Vec2::ZERO,
            look_speed: Vec2::ZERO,
            fire_chance: 0.2,
            jump_chance: 0.3,
            jump: false,
            fire: false,
        }
    }

    /// Advances the script by one frame. Call before sampling.
    pub fn update(&mut self, frame_delta: f32) {
        self.elapsed += frame_delta;
        if self.elapsed < self.hold {
            return;
        }
        self.elapsed = 0.0;

        self.axis = Vec2::new(self.rng.gen_range(-1.0..=1.0), self.rng.gen_range(-1.0..=1.0));
        self.look_speed = Vec2::new(self.rng.gen_range(-90.0..=90.0), self.rng.gen_range(-10.0..=10.0));
        self.jump |= self.rng.gen_bool(self.jump_chance);
        self.fire |= self.rng.gen_bool(self.fire_chance);
    }

    fn look_step(&self) -> Vec2 {
        // Per-frame look delta at a nominal 60 fps.
        self.look_speed / 60.0
    }
}

impl InputSource for BotInput {
    fn movement_axis(&mut self) -> Vec2 {
        self.axis
    }

    fn look_delta(&mut self) -> Vec2 {
        self.look_step()
    }

    fn consume_jump(&mut self) -> bool {
        std::mem::take(&mut self.jump)
    }

    fn consume_fire(&mut self) -> bool {
        std::mem::take(&mut self.fire)
    }
}
