//! Client-side session: the predicted local player, mirrored remote players
//! and every projectile this client draws.

use glam::Vec3;
use log::{debug, info, warn};
use shared::collision::{Aabb, StaticWorld};
use shared::entity::{PlayerEntity, Replica};
use shared::health::DEFAULT_MAX_HEALTH;
use shared::input::{InputConfig, InputSampler};
use shared::launcher::{observer_spawn, LauncherConfig, ProjectileLauncher};
use shared::prediction::{OwnerPredictor, Reconciliation};
use shared::projectile::{Projectile, ProjectileEvent};
use shared::transport::{Outbox, Transport};
use shared::{
    BodyShape, FixedClock, InputSource, MovementConfig, MovementSimulator, OwnerId, Packet,
    ReconcileSnapshot, SimulationState, Tick, DEFAULT_TICK_RATE,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What one render frame did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub ticks: usize,
    pub fired: bool,
    pub reconciliations: Vec<Reconciliation>,
}

pub struct ClientSession {
    client_id: Option<OwnerId>,
    clock: FixedClock,
    world: Arc<StaticWorld>,
    launcher_config: LauncherConfig,
    body: BodyShape,
    seed: u64,

    local: Option<PlayerEntity>,
    launcher: Option<ProjectileLauncher>,
    remotes: BTreeMap<OwnerId, PlayerEntity>,
    projectiles: Vec<Projectile>,

    /// Round-trip time in seconds, once measured.
    rtt: Option<f32>,
    outbox: Outbox,
}

impl ClientSession {
    pub fn new(seed: u64) -> Self {
        Self::with_world(StaticWorld::arena(), LauncherConfig::default(), seed)
    }

    pub fn with_world(world: StaticWorld, launcher_config: LauncherConfig, seed: u64) -> Self {
        Self {
            client_id: None,
            clock: FixedClock::new(DEFAULT_TICK_RATE),
            world: Arc::new(world),
            launcher_config,
            body: BodyShape::default(),
            seed,
            local: None,
            launcher: None,
            remotes: BTreeMap::new(),
            projectiles: Vec::new(),
            rtt: None,
            outbox: Outbox::new(),
        }
    }

    pub fn client_id(&self) -> Option<OwnerId> {
        self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.local.is_some()
    }

    pub fn clock(&self) -> &FixedClock {
        &self.clock
    }

    pub fn local(&self) -> Option<&PlayerEntity> {
        self.local.as_ref()
    }

    pub fn local_predictor(&self) -> Option<&OwnerPredictor> {
        match self.local.as_ref()?.replica() {
            Replica::Owner(predictor) => Some(predictor),
            _ => None,
        }
    }

    pub fn remote(&self, owner: OwnerId) -> Option<&PlayerEntity> {
        self.remotes.get(&owner)
    }

    pub fn remote_ids(&self) -> Vec<OwnerId> {
        self.remotes.keys().copied().collect()
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    pub fn outbox_mut(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    pub fn rtt(&self) -> Option<f32> {
        self.rtt
    }

    pub fn set_rtt(&mut self, rtt: f32) {
        if rtt.is_finite() && rtt >= 0.0 {
            self.rtt = Some(rtt);
        }
    }

    /// Moves the local tick forward so it runs about half a round trip ahead
    /// of the server tick a packet was stamped with.
    fn align_clock(&mut self, server_tick: Tick) {
        let lead = self
            .rtt
            .map(|rtt| (rtt * 0.5 / self.clock.tick_duration()).round() as Tick)
            .unwrap_or(0);
        if self.clock.align_to(server_tick.saturating_add(lead)) {
            debug!("Clock aligned to tick {}", self.clock.current_tick());
        }
    }

    fn connect(&mut self, client_id: OwnerId, server_tick: Tick, tick_rate: u32, movement: MovementConfig, spawn: Vec3) {
        info!("Connected as player #{} at tick {} ({} Hz)", client_id, server_tick, tick_rate);

        let mut clock = FixedClock::new(tick_rate);
        clock.align_to(server_tick);
        self.clock = clock;

        self.body = movement.body;
        let input_config = InputConfig::for_movement(&movement);
        let simulator = MovementSimulator::new(movement, Arc::clone(&self.world));
        let predictor = OwnerPredictor::new(simulator, SimulationState::at(spawn));
        self.local = Some(PlayerEntity::owned(
            client_id,
            predictor,
            InputSampler::new(input_config),
            DEFAULT_MAX_HEALTH,
        ));
        self.launcher = Some(ProjectileLauncher::new(
            client_id,
            self.launcher_config,
            self.seed,
        ));
        self.client_id = Some(client_id);
    }

    fn entity_mut(&mut self, owner: OwnerId) -> Option<&mut PlayerEntity> {
        if self.client_id == Some(owner) {
            self.local.as_mut()
        } else {
            self.remotes.get_mut(&owner)
        }
    }

    /// Applies a packet from the server.
    pub fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Connected {
                client_id,
                server_tick,
                tick_rate,
                movement,
                spawn,
            } => self.connect(client_id, server_tick, tick_rate, movement, spawn),

            Packet::Reconcile {
                snapshot,
                server_tick,
            } => {
                self.align_clock(server_tick);
                match self.local.as_mut().map(PlayerEntity::replica_mut) {
                    Some(Replica::Owner(predictor)) => {
                        predictor.receive_snapshot(snapshot);
                    }
                    _ => debug!("Reconcile for tick {} with no local player", snapshot.tick),
                }
            }

            Packet::EntityState {
                owner,
                snapshot,
                server_tick,
            } => {
                self.align_clock(server_tick);
                let remote = self
                    .remotes
                    .entry(owner)
                    .or_insert_with(|| PlayerEntity::observed(owner, DEFAULT_MAX_HEALTH));
                if let Replica::Observer(observer) = remote.replica_mut() {
                    observer.apply(&snapshot);
                }
            }

            Packet::PlayerJoined { owner, position } => {
                if self.client_id == Some(owner) {
                    return;
                }
                debug!("Player #{} joined at {:?}", owner, position);
                let mut remote = PlayerEntity::observed(owner, DEFAULT_MAX_HEALTH);
                if let Replica::Observer(observer) = remote.replica_mut() {
                    observer.apply(&ReconcileSnapshot::capture(0, &SimulationState::at(position)));
                }
                self.remotes.insert(owner, remote);
            }

            Packet::PlayerLeft { owner } => {
                if self.remotes.remove(&owner).is_some() {
                    debug!("Player #{} left", owner);
                }
            }

            Packet::Orientation { owner, orientation } => {
                if let Some(remote) = self.remotes.get_mut(&owner) {
                    remote.apply_orientation(orientation);
                }
            }

            Packet::Fire { message } => {
                if self.client_id == Some(message.shooter) {
                    return;
                }
                let projectile = observer_spawn(&message, &self.clock, &self.launcher_config);
                debug!(
                    "Relayed shot from #{} with {:.3}s catch-up",
                    message.shooter,
                    projectile.state().catchup_remaining
                );
                self.projectiles.push(projectile);
            }

            Packet::HealthChanged { owner, current } => {
                if let Some(entity) = self.entity_mut(owner) {
                    entity.apply_replicated_health(current);
                }
            }

            Packet::PlayerDied { owner } => {
                if let Some(entity) = self.entity_mut(owner) {
                    entity.apply_replicated_health(0);
                }
                if self.client_id == Some(owner) {
                    info!("You died");
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.client_id = None;
                self.local = None;
                self.launcher = None;
                self.remotes.clear();
                self.projectiles.clear();
            }

            Packet::Pong { .. } => {}

            other => warn!("Unexpected packet from server: {:?}", other),
        }
    }

    /// One render frame: sample, predict, fire, tick and fly projectiles.
    pub fn frame(&mut self, source: &mut dyn InputSource, frame_delta: f32) -> FrameReport {
        let mut report = FrameReport::default();
        let (Some(owner), Some(local)) = (self.client_id, self.local.as_mut()) else {
            return report;
        };

        let Some(sample) = local
            .sampler_mut()
            .map(|sampler| sampler.sample(source, frame_delta))
        else {
            return report;
        };

        if let Replica::Owner(predictor) = local.replica_mut() {
            predictor.predict_frame(sample.input);
        }

        if sample.fire && !local.is_dead() {
            if let (Some(launcher), Some(feet)) = (self.launcher.as_mut(), local.position()) {
                let (projectile, message) =
                    launcher.fire(feet, sample.orientation, self.clock.current_tick());
                self.projectiles.push(projectile);
                self.outbox.send_to_authority(Packet::Fire { message });
                report.fired = true;
            }
        }

        for tick in self.clock.advance(frame_delta) {
            report.ticks += 1;
            if let Replica::Owner(predictor) = local.replica_mut() {
                let owner_tick = predictor.on_tick(tick);
                report.reconciliations.extend(owner_tick.reconciliation);
                self.outbox.send_to_authority(Packet::Input {
                    batch: owner_tick.batch,
                });
            }
            if let Some(orientation) = local
                .sampler_mut()
                .and_then(InputSampler::take_orientation_update)
            {
                self.outbox
                    .send_to_authority(Packet::Orientation { owner, orientation });
            }
        }

        local.poll_death();
        self.step_projectiles(frame_delta);
        report
    }

    fn step_projectiles(&mut self, frame_delta: f32) {
        let Some(local) = self.local.as_ref() else {
            return;
        };
        let body = self.body;
        let bodies: Vec<(OwnerId, Aabb)> = self
            .remotes
            .values()
            .chain(std::iter::once(local))
            .filter(|player| !player.is_dead())
            .filter_map(|player| player.position().map(|feet| (player.owner(), body.aabb_at(feet))))
            .collect();

        for projectile in &mut self.projectiles {
            if let ProjectileEvent::Hit { target, .. } =
                projectile.step(frame_delta, self.world.as_ref(), &bodies)
            {
                debug!("Projectile from #{} struck {:?}", projectile.shooter(), target);
            }
        }
        self.projectiles.retain(Projectile::is_alive);
    }

    /// Feet position of a remote player blended between its last two snapshots.
    pub fn remote_render_position(&self, owner: OwnerId) -> Option<Vec3> {
        match self.remotes.get(&owner)?.replica() {
            Replica::Observer(observer) => {
                let alpha = self.clock.time_since_tick() / self.clock.tick_duration();
                observer.render_position(alpha)
            }
            _ => None,
        }
    }
}
