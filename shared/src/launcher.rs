//! Firing: an instant local projectile for the shooter, latency-compensated copies elsewhere.

use crate::clock::{FixedClock, Tick};
use crate::error::FireError;
use crate::input::Orientation;
use crate::projectile::{AttackVariance, Projectile, ProjectileConfig};
use crate::OwnerId;
use glam::{Quat, Vec3};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Largest cosmetic arc offset on each axis.
    pub arc_range: f32,
    pub arc_time: f32,
    /// Upper bound on catch-up given to a remote copy, in seconds.
    pub max_latency_compensation: f32,
    /// Muzzle position relative to the camera, in aim space.
    pub muzzle_offset: Vec3,
    pub eye_height: f32,
    /// How far from the shooter's eye the authority accepts a muzzle.
    pub max_muzzle_distance: f32,
    pub projectile: ProjectileConfig,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            arc_range: 1.0,
            arc_time: 0.3,
            max_latency_compensation: 0.3,
            muzzle_offset: Vec3::new(0.35, -0.3, 0.6),
            eye_height: 1.6,
            max_muzzle_distance: 2.0,
            projectile: ProjectileConfig::default(),
        }
    }
}

/// Fire event sent to the authority and relayed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FireMessage {
    pub shooter: OwnerId,
    pub muzzle: Vec3,
    pub camera_position: Vec3,
    pub aim: Quat,
    pub variance: AttackVariance,
    pub send_tick: Tick,
}

impl FireMessage {
    /// Checks a request against the connection it arrived on and where that player stands.
    pub fn validate(
        &self,
        sender: OwnerId,
        shooter_feet: Vec3,
        config: &LauncherConfig,
    ) -> Result<(), FireError> {
        if self.shooter != sender {
            return Err(FireError::WrongShooter {
                claimed: self.shooter,
                sender,
            });
        }
        if !self.muzzle.is_finite()
            || !self.camera_position.is_finite()
            || !self.aim.is_finite()
            || !self.variance.is_finite()
        {
            return Err(FireError::NonFinite);
        }

        let eye = shooter_feet + Vec3::Y * config.eye_height;
        let distance = self.muzzle.distance(eye);
        if distance > config.max_muzzle_distance {
            return Err(FireError::MuzzleTooFar {
                distance,
                max: config.max_muzzle_distance,
            });
        }
        Ok(())
    }
}

/// Where a compensated copy is being spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnRole {
    /// The server's own copy; gets half the cap.
    Authority,
    Observer,
}

impl SpawnRole {
    pub fn compensation_cap(&self, config: &LauncherConfig) -> f32 {
        match self {
            SpawnRole::Authority => config.max_latency_compensation / 2.0,
            SpawnRole::Observer => config.max_latency_compensation,
        }
    }
}

/// Initial catch-up budget for a copy spawned `elapsed` seconds after the shot.
pub fn catch_up_budget(elapsed: f32, role: SpawnRole, config: &LauncherConfig) -> f32 {
    if !elapsed.is_finite() {
        return 0.0;
    }
    elapsed.clamp(0.0, role.compensation_cap(config))
}

pub struct ProjectileLauncher {
    owner: OwnerId,
    config: LauncherConfig,
    rng: StdRng,
}

impl ProjectileLauncher {
    pub fn new(owner: OwnerId, config: LauncherConfig, seed: u64) -> Self {
        Self {
            owner,
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    fn roll_variance(&mut self) -> AttackVariance {
        let range = self.config.arc_range.abs();
        let roll = |rng: &mut StdRng| {
            if range > 0.0 {
                rng.gen_range(-range..=range)
            } else {
                0.0
            }
        };
        AttackVariance {
            arc_offset_x: roll(&mut self.rng),
            arc_offset_y: roll(&mut self.rng),
            visual_punch_duration: self.config.arc_time,
        }
    }

    /// Fires from the owner's view. The projectile is visible immediately; the
    /// message goes to the authority.
    pub fn fire(
        &mut self,
        feet: Vec3,
        orientation: Orientation,
        tick: Tick,
    ) -> (Projectile, FireMessage) {
        let aim = orientation.rotation();
        let camera_position = feet + Vec3::Y * self.config.eye_height;
        let muzzle = camera_position + aim * self.config.muzzle_offset;

        let message = FireMessage {
            shooter: self.owner,
            muzzle,
            camera_position,
            aim,
            variance: self.roll_variance(),
            send_tick: tick,
        };
        debug!("Player #{} fired at tick {}", self.owner, tick);

        (spawn(&message, 0.0, &self.config), message)
    }
}

fn spawn(message: &FireMessage, catch_up: f32, config: &LauncherConfig) -> Projectile {
    Projectile::spawn(
        message.shooter,
        message.muzzle,
        message.aim,
        message.camera_position,
        message.variance,
        catch_up,
        config.projectile,
    )
}

/// The authority's copy, unless the authority is also the shooter and already has one.
pub fn authority_spawn(
    message: &FireMessage,
    local_owner: Option<OwnerId>,
    clock: &FixedClock,
    config: &LauncherConfig,
) -> Option<Projectile> {
    if local_owner == Some(message.shooter) {
        return None;
    }
    let catch_up = catch_up_budget(clock.time_since(message.send_tick), SpawnRole::Authority, config);
    Some(spawn(message, catch_up, config))
}

/// An observer's copy of a relayed shot.
pub fn observer_spawn(message: &FireMessage, clock: &FixedClock, config: &LauncherConfig) -> Projectile {
    let catch_up = catch_up_budget(clock.time_since(message.send_tick), SpawnRole::Observer, config);
    spawn(message, catch_up, config)
}
