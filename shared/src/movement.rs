//! Deterministic kinematic character movement.
//!
//! [`MovementSimulator::step`] is the single function both the predicting
//! client and the authoritative server run. It has no hidden state, reads no
//! clock and performs no I/O: identical `(state, input, dt)` always produce an
//! identical result, which is what lets reconciliation be a no-op whenever the
//! two replicas agree.

use crate::collision::{BodyShape, CollisionWorld, StaticWorld};
use crate::error::InputError;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How gravity is folded into a step.
///
/// The two schemes produce different trajectories, so every replica must use
/// the same one. The authority sends its choice in `Packet::Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GravityIntegration {
    /// Full gravity once, before horizontal resolution.
    #[default]
    SinglePass,
    /// Half before and half after the collider move.
    SymmetricHalfStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementConfig {
    pub max_ground_speed: f32,
    pub ground_acceleration: f32,
    pub ground_deceleration: f32,
    pub air_acceleration: f32,
    /// Top speed air strafing can add along the wish direction.
    pub air_speed_cap: f32,
    pub jump_velocity: f32,
    /// Signed, negative is down.
    pub gravity: f32,
    /// Small downward velocity held while grounded so the ground probe keeps contact.
    pub grounded_velocity: f32,
    /// Height above the feet the ground probe ray starts from.
    pub ground_probe_height: f32,
    pub ground_check_padding: f32,
    /// Largest frame delta the authority accepts in a single MoveInput.
    pub max_frame_delta: f32,
    pub gravity_integration: GravityIntegration,
    pub body: BodyShape,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            max_ground_speed: 5.0,
            ground_acceleration: 50.0,
            ground_deceleration: 20.0,
            air_acceleration: 10.0,
            air_speed_cap: 1.5,
            jump_velocity: 5.0,
            gravity: -9.81,
            grounded_velocity: -1.0,
            ground_probe_height: 1.0,
            ground_check_padding: 0.01,
            max_frame_delta: 0.25,
            gravity_integration: GravityIntegration::SinglePass,
            body: BodyShape::default(),
        }
    }
}

/// Authoritative movement state of one character.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SimulationState {
    /// Feet position.
    pub position: Vec3,
    pub horizontal_velocity: Vec3,
    pub vertical_velocity: f32,
    /// Degrees around +Y.
    pub orientation_yaw: f32,
}

impl SimulationState {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn velocity(&self) -> Vec3 {
        self.horizontal_velocity + Vec3::Y * self.vertical_velocity
    }
}

/// One render frame worth of movement intent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveInput {
    pub horizontal_axis: f32,
    pub vertical_axis: f32,
    pub jump_requested: bool,
    /// Degrees around +Y.
    pub facing_yaw: f32,
    pub frame_delta: f32,
}

impl MoveInput {
    /// Rejects anything the simulator must never see.
    pub fn validate(&self, max_frame_delta: f32) -> Result<(), InputError> {
        for (field, value) in [
            ("horizontal_axis", self.horizontal_axis),
            ("vertical_axis", self.vertical_axis),
            ("facing_yaw", self.facing_yaw),
            ("frame_delta", self.frame_delta),
        ] {
            if !value.is_finite() {
                return Err(InputError::NonFinite { field });
            }
        }

        for (field, value) in [
            ("horizontal_axis", self.horizontal_axis),
            ("vertical_axis", self.vertical_axis),
        ] {
            if value.abs() > 1.0 + 1e-3 {
                return Err(InputError::AxisOutOfRange { field, value });
            }
        }

        if self.frame_delta < 0.0 || self.frame_delta > max_frame_delta {
            return Err(InputError::FrameDeltaOutOfRange {
                value: self.frame_delta,
                max: max_frame_delta,
            });
        }

        Ok(())
    }

    /// Unit wish direction in world space, zero when there is no movement intent.
    pub fn wish_direction(&self) -> Vec3 {
        let local = Vec3::new(self.horizontal_axis, 0.0, self.vertical_axis).normalize_or_zero();
        Quat::from_rotation_y(self.facing_yaw.to_radians()) * local
    }
}

/// Pure step function plus the world and tuning it runs against.
#[derive(Debug, Clone)]
pub struct MovementSimulator<W = StaticWorld> {
    config: MovementConfig,
    world: Arc<W>,
}

impl<W: CollisionWorld> MovementSimulator<W> {
    pub fn new(config: MovementConfig, world: Arc<W>) -> Self {
        Self { config, world }
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    /// Probe straight down from above the feet. A miss means airborne.
    pub fn is_grounded(&self, position: Vec3) -> bool {
        let probe = self.config.ground_probe_height;
        let origin = position + Vec3::Y * probe;
        self.world
            .raycast(origin, -Vec3::Y, probe + self.config.ground_check_padding)
            .is_some()
    }

    /// Advances `state` by one sub-step of `dt` seconds.
    pub fn step(&self, state: &SimulationState, input: &MoveInput, dt: f32) -> SimulationState {
        let config = &self.config;
        let grounded = self.is_grounded(state.position);

        let mut vertical = state.vertical_velocity;
        if input.jump_requested && grounded {
            vertical = config.jump_velocity;
        }

        vertical = match config.gravity_integration {
            GravityIntegration::SinglePass => self.apply_gravity(vertical, dt, grounded),
            GravityIntegration::SymmetricHalfStep => {
                self.apply_gravity(vertical, dt * 0.5, grounded)
            }
        };

        let wish = input.wish_direction();
        let mut horizontal = if grounded {
            self.accelerate_ground(state.horizontal_velocity, wish, dt)
        } else {
            self.accelerate_air(state.horizontal_velocity, wish, dt)
        };

        let displacement = (horizontal + Vec3::Y * vertical) * dt;
        let sweep = self.world.sweep(&config.body, state.position, displacement);

        if sweep.blocked_x {
            horizontal.x = 0.0;
        }
        if sweep.blocked_z {
            horizontal.z = 0.0;
        }
        if sweep.hit_ceiling && vertical > 0.0 {
            vertical = 0.0;
        }

        if config.gravity_integration == GravityIntegration::SymmetricHalfStep {
            vertical = self.apply_gravity(vertical, dt * 0.5, sweep.grounded);
        }

        if sweep.grounded && vertical < config.grounded_velocity {
            vertical = config.grounded_velocity;
        }

        SimulationState {
            position: sweep.position,
            horizontal_velocity: horizontal,
            vertical_velocity: vertical,
            orientation_yaw: input.facing_yaw,
        }
    }

    fn apply_gravity(&self, vertical: f32, dt: f32, grounded: bool) -> f32 {
        let vertical = vertical + self.config.gravity * dt;
        if grounded && vertical <= self.config.grounded_velocity {
            self.config.grounded_velocity
        } else {
            vertical
        }
    }

    fn accelerate_ground(&self, horizontal: Vec3, wish: Vec3, dt: f32) -> Vec3 {
        let mut velocity = horizontal;
        let speed = velocity.length();
        if speed > 0.0 {
            let reduced = (speed - self.config.ground_deceleration * dt).max(0.0);
            velocity = velocity / speed * reduced;
        }

        velocity += wish * self.config.ground_acceleration * dt;
        velocity.clamp_length_max(self.config.max_ground_speed)
    }

    fn accelerate_air(&self, horizontal: Vec3, wish: Vec3, dt: f32) -> Vec3 {
        if wish == Vec3::ZERO {
            return horizontal;
        }

        let along_wish = horizontal.dot(wish);
        let headroom = self.config.air_speed_cap - along_wish;
        if headroom <= 0.0 {
            return horizontal;
        }

        horizontal + wish * (self.config.air_acceleration * dt).min(headroom)
    }
}
