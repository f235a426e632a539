//! Owner-side input sampling with look accumulation and edge-triggered actions

use crate::movement::{MoveInput, MovementConfig};
use glam::{EulerRot, Quat, Vec2};
use log::warn;
use serde::{Deserialize, Serialize};

/// Device-facing collaborator the sampler reads from once per render frame.
pub trait InputSource {
    /// Strafe (x) and forward (y) intent, each in `[-1, 1]`.
    fn movement_axis(&mut self) -> Vec2;
    fn look_delta(&mut self) -> Vec2;
    /// Edge-triggered; returns true at most once per press.
    fn consume_jump(&mut self) -> bool;
    /// Edge-triggered; returns true at most once per press.
    fn consume_fire(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    pub look_sensitivity: f32,
    pub pitch_limit: f32,
    /// Longest frame a single MoveInput may cover; the authority rejects longer ones.
    pub max_frame_delta: f32,
}

impl InputConfig {
    /// Frame bound taken from the movement rules the authority validates against.
    pub fn for_movement(movement: &MovementConfig) -> Self {
        Self {
            max_frame_delta: movement.max_frame_delta,
            ..Default::default()
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            look_sensitivity: 1.0,
            pitch_limit: 90.0,
            max_frame_delta: MovementConfig::default().max_frame_delta,
        }
    }
}

/// Look direction in degrees. Positive pitch looks down.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    pub yaw: f32,
    pub pitch: f32,
}

impl Orientation {
    pub fn rotation(&self) -> Quat {
        Quat::from_euler(
            EulerRot::YXZ,
            self.yaw.to_radians(),
            self.pitch.to_radians(),
            0.0,
        )
    }
}

/// Everything captured for one render frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSample {
    pub input: MoveInput,
    pub fire: bool,
    pub orientation: Orientation,
}

pub struct InputSampler {
    config: InputConfig,
    orientation: Orientation,
    last_sent: Option<Orientation>,
    jump_queued: bool,
    controls_locked: bool,
}

impl InputSampler {
    pub fn new(config: InputConfig) -> Self {
        Self {
            config,
            orientation: Orientation::default(),
            last_sent: None,
            jump_queued: false,
            controls_locked: false,
        }
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn is_locked(&self) -> bool {
        self.controls_locked
    }

    /// Reads the source once and builds this frame's MoveInput.
    ///
    /// Non-finite device values never leave the sampler; they are replaced by
    /// neutral input so the simulator only ever sees validated numbers. A
    /// hitch longer than `max_frame_delta` is clamped to it.
    pub fn sample(&mut self, source: &mut dyn InputSource, frame_delta: f32) -> FrameSample {
        let frame_delta = if frame_delta.is_finite() && frame_delta > 0.0 {
            frame_delta.min(self.config.max_frame_delta)
        } else {
            0.0
        };

        let axis = source.movement_axis();
        let look = source.look_delta();
        let jump = source.consume_jump();
        let fire = source.consume_fire();

        if self.controls_locked {
            return FrameSample {
                input: MoveInput {
                    facing_yaw: self.orientation.yaw,
                    frame_delta,
                    ..Default::default()
                },
                fire: false,
                orientation: self.orientation,
            };
        }

        let axis = if axis.is_finite() {
            axis.clamp_length_max(1.0)
        } else {
            warn!("Discarding non-finite movement axis {:?}", axis);
            Vec2::ZERO
        };

        if look.is_finite() {
            let sensitivity = self.config.look_sensitivity;
            let limit = self.config.pitch_limit;
            self.orientation.yaw = (self.orientation.yaw + look.x * sensitivity).rem_euclid(360.0);
            self.orientation.pitch = (self.orientation.pitch - look.y * sensitivity).clamp(-limit, limit);
        } else {
            warn!("Discarding non-finite look delta {:?}", look);
        }

        self.jump_queued |= jump;
        let jump_requested = std::mem::take(&mut self.jump_queued);

        FrameSample {
            input: MoveInput {
                horizontal_axis: axis.x,
                vertical_axis: axis.y,
                jump_requested,
                facing_yaw: self.orientation.yaw,
                frame_delta,
            },
            fire,
            orientation: self.orientation,
        }
    }

    /// The orientation to send this tick, or `None` when unchanged since the last send.
    pub fn take_orientation_update(&mut self) -> Option<Orientation> {
        if self.last_sent == Some(self.orientation) {
            return None;
        }
        self.last_sent = Some(self.orientation);
        Some(self.orientation)
    }

    /// Zeroes and ignores all intents until unlocked.
    pub fn lock_controls(&mut self) {
        self.controls_locked = true;
        self.jump_queued = false;
    }

    pub fn unlock_controls(&mut self) {
        self.controls_locked = false;
    }
}

impl Default for InputSampler {
    fn default() -> Self {
        Self::new(InputConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[derive(Default)]
    struct Scripted {
        axis: Vec2,
        look: Vec2,
        jump: bool,
        fire: bool,
    }

    impl InputSource for Scripted {
        fn movement_axis(&mut self) -> Vec2 {
            self.axis
        }

        fn look_delta(&mut self) -> Vec2 {
            std::mem::take(&mut self.look)
        }

        fn consume_jump(&mut self) -> bool {
            std::mem::take(&mut self.jump)
        }

        fn consume_fire(&mut self) -> bool {
            std::mem::take(&mut self.fire)
        }
    }

    #[test]
    fn test_sample_builds_move_input() {
        let mut sampler = InputSampler::default();
        let mut source = Scripted {
            axis: Vec2::new(0.0, 1.0),
            look: Vec2::new(30.0, 0.0),
            jump: true,
            fire: true,
        };

        let sample = sampler.sample(&mut source, 0.016);
        assert_eq!(sample.input.vertical_axis, 1.0);
        assert!(sample.input.jump_requested);
        assert!(sample.fire);
        assert_approx_eq!(sample.input.facing_yaw, 30.0, 1e-6);
        assert_eq!(sample.input.frame_delta, 0.016);

        let next = sampler.sample(&mut source, 0.016);
        assert!(!next.input.jump_requested);
        assert!(!next.fire);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut sampler = InputSampler::default();
        let mut source = Scripted {
            look: Vec2::new(0.0, -500.0),
            ..Default::default()
        };
        let sample = sampler.sample(&mut source, 0.016);
        assert_eq!(sample.orientation.pitch, 90.0);
    }

    #[test]
    fn test_yaw_wraps() {
        let mut sampler = InputSampler::default();
        let mut source = Scripted {
            look: Vec2::new(-30.0, 0.0),
            ..Default::default()
        };
        let sample = sampler.sample(&mut source, 0.016);
        assert_approx_eq!(sample.orientation.yaw, 330.0, 1e-4);
    }

    #[test]
    fn test_non_finite_input_is_neutralised() {
        let mut sampler = InputSampler::default();
        let mut source = Scripted {
            axis: Vec2::new(f32::NAN, 1.0),
            look: Vec2::new(f32::INFINITY, 0.0),
            ..Default::default()
        };
        let sample = sampler.sample(&mut source, f32::NAN);

        assert_eq!(sample.input.horizontal_axis, 0.0);
        assert_eq!(sample.input.vertical_axis, 0.0);
        assert_eq!(sample.input.facing_yaw, 0.0);
        assert_eq!(sample.input.frame_delta, 0.0);
        assert!(sample.input.validate(0.25).is_ok());
    }

    #[test]
    fn test_long_frame_clamped_to_bound() {
        let movement = MovementConfig {
            max_frame_delta: 0.2,
            ..Default::default()
        };
        let mut sampler = InputSampler::new(InputConfig::for_movement(&movement));
        let mut source = Scripted {
            axis: Vec2::Y,
            ..Default::default()
        };

        let sample = sampler.sample(&mut source, 0.3);
        assert_eq!(sample.input.frame_delta, 0.2);
        assert!(sample.input.validate(movement.max_frame_delta).is_ok());

        let default = InputSampler::default().sample(&mut source, 0.3);
        assert!(default.input.validate(MovementConfig::default().max_frame_delta).is_ok());
    }

    #[test]
    fn test_axis_magnitude_clamped() {
        let mut sampler = InputSampler::default();
        let mut source = Scripted {
            axis: Vec2::new(1.0, 1.0),
            ..Default::default()
        };
        let sample = sampler.sample(&mut source, 0.016);
        let magnitude = Vec2::new(sample.input.horizontal_axis, sample.input.vertical_axis).length();
        assert_approx_eq!(magnitude, 1.0, 1e-6);
    }

    #[test]
    fn test_locked_controls_zero_intents() {
        let mut sampler = InputSampler::default();
        sampler.lock_controls();
        let mut source = Scripted {
            axis: Vec2::new(1.0, 0.0),
            look: Vec2::new(10.0, 10.0),
            jump: true,
            fire: true,
        };

        let sample = sampler.sample(&mut source, 0.016);
        assert_eq!(sample.input.horizontal_axis, 0.0);
        assert!(!sample.input.jump_requested);
        assert!(!sample.fire);
        assert_eq!(sample.orientation, Orientation::default());

        sampler.unlock_controls();
        let sample = sampler.sample(&mut source, 0.016);
        assert_eq!(sample.input.horizontal_axis, 1.0);
        // The press happened while locked and was consumed then.
        assert!(!sample.input.jump_requested);
    }

    #[test]
    fn test_orientation_update_only_on_change() {
        let mut sampler = InputSampler::default();
        assert!(sampler.take_orientation_update().is_some());
        assert!(sampler.take_orientation_update().is_none());

        let mut source = Scripted {
            look: Vec2::new(5.0, 0.0),
            ..Default::default()
        };
        sampler.sample(&mut source, 0.016);
        let update = sampler.take_orientation_update().unwrap();
        assert_approx_eq!(update.yaw, 5.0, 1e-6);
    }

    #[test]
    fn test_rotation_faces_forward_at_rest() {
        let forward = Orientation::default().rotation() * glam::Vec3::Z;
        assert_approx_eq!(forward.z, 1.0, 1e-6);

        let down = Orientation { yaw: 0.0, pitch: 45.0 }.rotation() * glam::Vec3::Z;
        assert!(down.y < 0.0);
    }
}
