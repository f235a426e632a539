//! Spell projectile motion with latency catch-up and owner-aware hit resolution.
//!
//! A projectile is spawned at the muzzle, which sits off to the side of the
//! camera. It flies forward at constant speed while a lateral component bends
//! its path onto the camera's aim ray, so shots land where the crosshair
//! points. Remote copies spawn late and carry a catch-up budget: each frame a
//! fixed share of the remaining budget is added to the frame delta until the
//! copy has caught up with where the shooter sees it.

use crate::collision::{Aabb, CollisionWorld};
use crate::OwnerId;
use glam::{Quat, Vec3};
use log::debug;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Budget left below which catch-up completes even with a zero frame delta.
const MIN_CATCH_UP_SNAP: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectileConfig {
    pub max_lifetime: f32,
    pub forward_velocity: f32,
    /// Distance travelled before the path has fully converged on the aim ray.
    pub convergence_distance: f32,
    pub damage: u32,
    pub radius: f32,
    /// Share of the remaining catch-up budget consumed per frame.
    pub catch_up_rate: f32,
}

impl Default for ProjectileConfig {
    fn default() -> Self {
        Self {
            max_lifetime: 10.0,
            forward_velocity: 10.0,
            convergence_distance: 5.0,
            damage: 10,
            radius: 0.2,
            catch_up_rate: 0.08,
        }
    }
}

/// Per-shot cosmetic deviation, rolled once by the shooter and replicated verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AttackVariance {
    pub arc_offset_x: f32,
    pub arc_offset_y: f32,
    pub visual_punch_duration: f32,
}

impl AttackVariance {
    pub fn is_finite(&self) -> bool {
        self.arc_offset_x.is_finite()
            && self.arc_offset_y.is_finite()
            && self.visual_punch_duration.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectileState {
    pub move_direction: Vec3,
    pub up_direction: Vec3,
    pub lerp_start: Vec3,
    pub lerp_target: Vec3,
    /// Lateral shift applied so far.
    pub lerp_accumulated: Vec3,
    pub time_alive: f32,
    pub catchup_remaining: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    Expired,
    Hit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectilePhase {
    Alive,
    Destroyed(DestroyReason),
}

/// What a collision did to the projectile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitResolution {
    /// Struck its own shooter: no damage, keeps flying.
    IgnoredSelfHit,
    /// Destroyed. `target` is the owner to damage, if the struck object has one.
    Hit { target: Option<OwnerId>, damage: u32 },
    AlreadyDestroyed,
}

/// Something the projectile's path crossed this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub fraction: f32,
    /// `None` for static geometry and despawned owners.
    pub owner: Option<OwnerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectileEvent {
    Flying,
    Expired,
    Hit { target: Option<OwnerId>, damage: u32 },
}

#[derive(Debug, Clone)]
pub struct Projectile {
    shooter: OwnerId,
    config: ProjectileConfig,
    variance: AttackVariance,
    state: ProjectileState,
    /// Position on the converging path, before the cosmetic punch.
    path_position: Vec3,
    phase: ProjectilePhase,
}

impl Projectile {
    /// Spawns at `muzzle` facing `aim`, converging on the ray from `camera_position`.
    pub fn spawn(
        shooter: OwnerId,
        muzzle: Vec3,
        aim: Quat,
        camera_position: Vec3,
        variance: AttackVariance,
        catch_up: f32,
        config: ProjectileConfig,
    ) -> Self {
        let aim = aim.normalize();
        let move_direction = (aim * Vec3::Z).normalize_or_zero();
        let up_direction = (aim * Vec3::Y).normalize_or_zero();

        // Closest point on the aim ray to the muzzle.
        let along = (muzzle - camera_position).dot(move_direction);
        let lerp_target = camera_position + move_direction * along;

        let catchup_remaining = if catch_up.is_finite() { catch_up.max(0.0) } else { 0.0 };

        Self {
            shooter,
            config,
            variance,
            state: ProjectileState {
                move_direction,
                up_direction,
                lerp_start: muzzle,
                lerp_target,
                lerp_accumulated: Vec3::ZERO,
                time_alive: 0.0,
                catchup_remaining,
            },
            path_position: muzzle,
            phase: ProjectilePhase::Alive,
        }
    }

    pub fn shooter(&self) -> OwnerId {
        self.shooter
    }

    pub fn state(&self) -> &ProjectileState {
        &self.state
    }

    pub fn variance(&self) -> AttackVariance {
        self.variance
    }

    pub fn phase(&self) -> ProjectilePhase {
        self.phase
    }

    pub fn is_alive(&self) -> bool {
        self.phase == ProjectilePhase::Alive
    }

    pub fn radius(&self) -> f32 {
        self.config.radius
    }

    /// Rendered position: converging path plus cosmetic punch.
    pub fn position(&self) -> Vec3 {
        self.path_position + self.punch_offset()
    }

    /// Takes this frame's share of the catch-up budget.
    pub fn consume_catch_up(&mut self, frame_delta: f32) -> f32 {
        let remaining = self.state.catchup_remaining;
        if remaining <= 0.0 {
            return 0.0;
        }

        let mut taken = remaining * self.config.catch_up_rate;
        let left = remaining - taken;
        let snap = (frame_delta * 0.5).max(MIN_CATCH_UP_SNAP);
        if left < snap {
            taken = remaining;
            self.state.catchup_remaining = 0.0;
        } else {
            self.state.catchup_remaining = left;
        }
        taken
    }

    /// Moves one frame. Returns the segment swept, or `None` once destroyed.
    pub fn advance(&mut self, frame_delta: f32) -> Option<(Vec3, Vec3)> {
        if !self.is_alive() {
            return None;
        }

        let frame_delta = if frame_delta.is_finite() { frame_delta.max(0.0) } else { 0.0 };
        let effective = frame_delta + self.consume_catch_up(frame_delta);
        let from = self.position();

        self.state.time_alive += effective;
        if self.state.time_alive > self.config.max_lifetime {
            self.phase = ProjectilePhase::Destroyed(DestroyReason::Expired);
            return None;
        }

        let shift = self.convergence_shift();
        self.path_position +=
            shift + self.state.move_direction * self.config.forward_velocity * effective;

        Some((from, self.position()))
    }

    fn convergence_shift(&mut self) -> Vec3 {
        let converge_time = if self.config.forward_velocity > 0.0 {
            self.config.convergence_distance / self.config.forward_velocity
        } else {
            0.0
        };
        let t = if converge_time > 0.0 {
            smoothstep(self.state.time_alive / converge_time)
        } else {
            1.0
        };

        let progress = (self.state.lerp_target - self.state.lerp_start) * t;
        let shift = progress - self.state.lerp_accumulated;
        self.state.lerp_accumulated = progress;
        shift
    }

    fn punch_offset(&self) -> Vec3 {
        let duration = self.variance.visual_punch_duration;
        if duration <= 0.0 || self.state.time_alive >= duration {
            return Vec3::ZERO;
        }
        let up = self.state.up_direction;
        let right = up.cross(self.state.move_direction);
        let envelope = (PI * self.state.time_alive / duration).sin();
        (right * self.variance.arc_offset_x + up * self.variance.arc_offset_y) * envelope
    }

    /// Applies a collision with an object owned by `struck_owner`.
    pub fn resolve_collision(&mut self, struck_owner: Option<OwnerId>) -> HitResolution {
        if !self.is_alive() {
            return HitResolution::AlreadyDestroyed;
        }
        if struck_owner == Some(self.shooter) {
            return HitResolution::IgnoredSelfHit;
        }

        self.phase = ProjectilePhase::Destroyed(DestroyReason::Hit);
        debug!(
            "Projectile from #{} hit {:?}",
            self.shooter, struck_owner
        );
        HitResolution::Hit {
            target: struck_owner,
            damage: self.config.damage,
        }
    }

    /// Advances one frame and resolves whatever the path crossed, nearest first.
    pub fn step<W: CollisionWorld>(
        &mut self,
        frame_delta: f32,
        world: &W,
        bodies: &[(OwnerId, Aabb)],
    ) -> ProjectileEvent {
        let Some((from, to)) = self.advance(frame_delta) else {
            return ProjectileEvent::Expired;
        };

        for contact in trace(world, bodies, from, to, self.config.radius) {
            if let HitResolution::Hit { target, damage } = self.resolve_collision(contact.owner) {
                return ProjectileEvent::Hit { target, damage };
            }
        }
        ProjectileEvent::Flying
    }
}

/// Everything the segment `from -> to` crosses, ordered by distance.
pub fn trace<W: CollisionWorld>(
    world: &W,
    bodies: &[(OwnerId, Aabb)],
    from: Vec3,
    to: Vec3,
    radius: f32,
) -> Vec<Contact> {
    let mut contacts: Vec<Contact> = bodies
        .iter()
        .filter_map(|(owner, aabb)| {
            let inflated = Aabb::new(aabb.min - Vec3::splat(radius), aabb.max + Vec3::splat(radius));
            inflated.segment_enter(from, to).map(|fraction| Contact {
                fraction,
                owner: Some(*owner),
            })
        })
        .collect();

    if let Some(fraction) = world.segment(from, to) {
        contacts.push(Contact {
            fraction,
            owner: None,
        });
    }

    contacts.sort_by(|a, b| a.fraction.total_cmp(&b.fraction));
    contacts
}

/// `3x² - 2x³` on `x` clamped to `[0, 1]`.
pub fn smoothstep(x: f32) -> f32 {
    let x = x.clamp(0.0, 1.0);
    x * x * (3.0 - 2.0 * x)
}
