//! Authoritative arena simulation.
//!
//! Owns one [`AuthorityReplica`] per connected player plus every live
//! projectile. Network code feeds it packets through [`GameState::handle_packet`]
//! and real elapsed time through [`GameState::advance`]; everything it wants to
//! say goes into its [`Outbox`], which the network layer drains once per tick.

use glam::Vec3;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shared::collision::{Aabb, StaticWorld};
use shared::entity::{PlayerEntity, Replica};
use shared::health::{DamageOutcome, DEFAULT_MAX_HEALTH};
use shared::launcher::{authority_spawn, FireMessage, LauncherConfig};
use shared::prediction::{AuthorityReplica, AuthorityTick};
use shared::projectile::{Projectile, ProjectileEvent};
use shared::transport::{Outbox, Transport};
use shared::{
    spawn_point, FixedClock, MovementConfig, MovementSimulator, OwnerId, Packet, SimulationState,
    Tick, DEFAULT_TICK_RATE,
};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    pub tick_rate: u32,
    pub movement: MovementConfig,
    pub launcher: LauncherConfig,
    pub max_health: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            movement: MovementConfig::default(),
            launcher: LauncherConfig::default(),
            max_health: DEFAULT_MAX_HEALTH,
        }
    }
}

pub struct GameState {
    config: GameConfig,
    clock: FixedClock,
    world: Arc<StaticWorld>,
    players: BTreeMap<OwnerId, PlayerEntity>,
    projectiles: Vec<Projectile>,
    outbox: Outbox,
}

impl GameState {
    pub fn new(config: GameConfig) -> Self {
        Self::with_world(config, StaticWorld::arena())
    }

    pub fn with_world(config: GameConfig, world: StaticWorld) -> Self {
        Self {
            clock: FixedClock::new(config.tick_rate),
            config,
            world: Arc::new(world),
            players: BTreeMap::new(),
            projectiles: Vec::new(),
            outbox: Outbox::new(),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn clock(&self) -> &FixedClock {
        &self.clock
    }

    pub fn tick(&self) -> Tick {
        self.clock.current_tick()
    }

    pub fn player(&self, owner: OwnerId) -> Option<&PlayerEntity> {
        self.players.get(&owner)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    pub fn outbox_mut(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    fn simulator(&self) -> MovementSimulator {
        MovementSimulator::new(self.config.movement, Arc::clone(&self.world))
    }

    /// Spawns a player, tells them how to simulate, and introduces them to everyone else.
    pub fn add_player(&mut self, owner: OwnerId) -> Vec3 {
        let spawn = spawn_point(owner);
        let replica = AuthorityReplica::new(self.simulator(), SimulationState::at(spawn));
        let entity = PlayerEntity::authoritative(owner, replica, self.config.max_health);

        self.outbox.send_to_client(
            owner,
            Packet::Connected {
                client_id: owner,
                server_tick: self.clock.current_tick(),
                tick_rate: self.clock.tick_rate(),
                movement: self.config.movement,
                spawn,
            },
        );

        for (&other, player) in &self.players {
            let position = player.position().unwrap_or_else(|| spawn_point(other));
            self.outbox
                .send_to_client(owner, Packet::PlayerJoined { owner: other, position });
            self.outbox.send_to_client(
                owner,
                Packet::HealthChanged {
                    owner: other,
                    current: player.health().current(),
                },
            );
        }

        self.outbox.send_to_observers(
            Packet::PlayerJoined {
                owner,
                position: spawn,
            },
            Some(owner),
            true,
        );

        self.players.insert(owner, entity);
        self.clock.subscribe(owner);
        info!("Spawned player #{} at {:?}", owner, spawn);
        spawn
    }

    pub fn remove_player(&mut self, owner: OwnerId) -> bool {
        self.clock.unsubscribe(owner);
        if self.players.remove(&owner).is_none() {
            return false;
        }
        self.outbox
            .send_to_observers(Packet::PlayerLeft { owner }, Some(owner), true);
        info!("Removed player #{}", owner);
        true
    }

    /// Applies a packet from a connected client.
    pub fn handle_packet(&mut self, sender: OwnerId, packet: Packet) {
        match packet {
            Packet::Input { batch } => {
                let Some(player) = self.players.get_mut(&sender) else {
                    debug!("Input from unknown player #{}", sender);
                    return;
                };
                if player.is_dead() {
                    return;
                }
                if let Replica::Authority(replica) = player.replica_mut() {
                    replica.receive(batch);
                }
            }

            Packet::Orientation { owner, orientation } => {
                if owner != sender {
                    warn!("Client #{} sent orientation for #{}", sender, owner);
                    return;
                }
                if !orientation.yaw.is_finite() || !orientation.pitch.is_finite() {
                    warn!("Non-finite orientation from #{}", sender);
                    return;
                }
                let Some(player) = self.players.get_mut(&sender) else {
                    return;
                };
                player.apply_orientation(orientation);
                self.outbox.send_to_observers(
                    Packet::Orientation { owner, orientation },
                    Some(owner),
                    true,
                );
            }

            Packet::Fire { message } => self.handle_fire(sender, message),

            Packet::Ping { nonce } => {
                self.outbox.send_to_client(sender, Packet::Pong { nonce });
            }

            other => {
                warn!("Unexpected packet from client #{}: {:?}", sender, other);
            }
        }
    }

    fn handle_fire(&mut self, sender: OwnerId, message: FireMessage) {
        let Some(shooter) = self.players.get(&sender) else {
            return;
        };
        if shooter.is_dead() {
            warn!("Rejecting shot from #{}: {}", sender, shared::FireError::ShooterDead);
            return;
        }
        let feet = shooter.position().unwrap_or_else(|| spawn_point(sender));
        if let Err(error) = message.validate(sender, feet, &self.config.launcher) {
            warn!("Rejecting shot from #{}: {}", sender, error);
            return;
        }

        // The server renders no player, so every accepted shot gets an authoritative copy.
        if let Some(projectile) = authority_spawn(&message, None, &self.clock, &self.config.launcher) {
            debug!(
                "Spawned projectile for #{} with {:.3}s catch-up",
                sender,
                projectile.state().catchup_remaining
            );
            self.projectiles.push(projectile);
        }

        self.outbox
            .send_to_observers(Packet::Fire { message }, Some(sender), true);
    }

    /// Feeds real elapsed time and runs every tick that became due.
    pub fn advance(&mut self, elapsed: f32) -> usize {
        let ticks = self.clock.advance(elapsed);
        let count = ticks.len();
        for tick in ticks {
            self.run_tick(tick);
        }
        count
    }

    fn run_tick(&mut self, server_tick: Tick) {
        for owner in self.clock.subscribers() {
            let Some(player) = self.players.get_mut(&owner) else {
                continue;
            };
            let Replica::Authority(replica) = player.replica_mut() else {
                continue;
            };

            let report: AuthorityTick = replica.tick();
            if report.processed.is_empty() && report.rejected.is_empty() {
                continue;
            }
            let Some(snapshot) = replica.snapshot() else {
                continue;
            };

            self.outbox
                .send_to_client(owner, Packet::Reconcile { snapshot, server_tick });
            self.outbox.send_to_observers(
                Packet::EntityState {
                    owner,
                    snapshot,
                    server_tick,
                },
                Some(owner),
                true,
            );
        }

        self.step_projectiles();
    }

    fn step_projectiles(&mut self) {
        let body = self.config.movement.body;
        let bodies: Vec<(OwnerId, Aabb)> = self
            .players
            .iter()
            .filter(|(_, player)| !player.is_dead())
            .filter_map(|(&owner, player)| player.position().map(|feet| (owner, body.aabb_at(feet))))
            .collect();

        let dt = self.clock.tick_duration();
        let mut hits = Vec::new();
        for projectile in &mut self.projectiles {
            if let ProjectileEvent::Hit {
                target: Some(target),
                damage,
            } = projectile.step(dt, self.world.as_ref(), &bodies)
            {
                hits.push((projectile.shooter(), target, damage));
            }
        }
        self.projectiles.retain(Projectile::is_alive);

        for (shooter, target, damage) in hits {
            self.apply_damage(shooter, target, damage);
        }
    }

    fn apply_damage(&mut self, shooter: OwnerId, target: OwnerId, damage: u32) {
        let Some(player) = self.players.get_mut(&target) else {
            return;
        };

        match player.damage(damage) {
            DamageOutcome::Damaged { remaining } => {
                debug!("#{} hit #{} for {}", shooter, target, damage);
                self.outbox.send_to_observers(
                    Packet::HealthChanged {
                        owner: target,
                        current: remaining,
                    },
                    None,
                    false,
                );
            }
            DamageOutcome::Killed => {
                info!("#{} killed #{}", shooter, target);
                self.clock.unsubscribe(target);
                self.outbox.send_to_observers(
                    Packet::HealthChanged {
                        owner: target,
                        current: 0,
                    },
                    None,
                    false,
                );
                self.outbox
                    .send_to_observers(Packet::PlayerDied { owner: target }, None, false);
            }
            DamageOutcome::Ignored => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use glam::Quat;
    use shared::input::Orientation;
    use shared::prediction::InputBatch;
    use shared::projectile::AttackVariance;
    use shared::transport::Target;
    use shared::MoveInput;

    fn open_world() -> GameState {
        GameState::with_world(GameConfig::default(), StaticWorld::new(Some(0.0), Vec::new()))
    }

    fn packets_for(outbox: &mut Outbox) -> Vec<(Target, Packet)> {
        outbox
            .drain()
            .into_iter()
            .map(|outgoing| (outgoing.target, outgoing.packet))
            .collect()
    }

    fn forward_batch(tick: Tick) -> InputBatch {
        InputBatch {
            tick,
            inputs: vec![MoveInput {
                vertical_axis: 1.0,
                frame_delta: 0.02,
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_add_player_sends_connected() {
        let mut game = open_world();
        let spawn = game.add_player(1);
        let sent = packets_for(game.outbox_mut());

        assert!(matches!(
            &sent[0],
            (Target::Client(1), Packet::Connected { client_id: 1, tick_rate: 50, spawn: s, .. }) if *s == spawn
        ));
        assert!(game.clock().is_subscribed(1));
    }

    #[test]
    fn test_second_player_learns_about_first() {
        let mut game = open_world();
        game.add_player(1);
        game.outbox_mut().drain();
        game.add_player(2);
        let sent = packets_for(game.outbox_mut());

        assert!(sent
            .iter()
            .any(|(target, packet)| *target == Target::Client(2)
                && matches!(packet, Packet::PlayerJoined { owner: 1, .. })));
        assert!(sent.iter().any(|(target, packet)| matches!(
            target,
            Target::Observers {
                exclude_owner: Some(2)
            }
        ) && matches!(packet, Packet::PlayerJoined { owner: 2, .. })));
    }

    #[test]
    fn test_tick_replays_input_and_reconciles() {
        let mut game = open_world();
        game.add_player(1);
        game.outbox_mut().drain();

        game.handle_packet(1, Packet::Input { batch: forward_batch(7) });
        assert_eq!(game.advance(0.02), 1);

        let sent = packets_for(game.outbox_mut());
        let reconcile = sent.iter().find_map(|(target, packet)| match packet {
            Packet::Reconcile { snapshot, .. } if *target == Target::Client(1) => Some(*snapshot),
            _ => None,
        });
        let snapshot = reconcile.unwrap();
        assert_eq!(snapshot.tick, 7);
        assert!(snapshot.position.z > spawn_point(1).z);
    }

    #[test]
    fn test_missing_input_sends_nothing_and_never_stalls() {
        let mut game = open_world();
        game.add_player(1);
        game.outbox_mut().drain();

        let mut ticks = 0;
        for _ in 0..5 {
            ticks += game.advance(0.02);
        }
        assert_eq!(ticks, 5);
        assert!(game.outbox_mut().is_empty());

        game.handle_packet(1, Packet::Input { batch: forward_batch(3) });
        game.advance(0.02);
        assert!(!game.outbox_mut().is_empty());
    }

    #[test]
    fn test_orientation_relayed_excluding_owner() {
        let mut game = open_world();
        game.add_player(1);
        game.outbox_mut().drain();

        let orientation = Orientation { yaw: 45.0, pitch: -10.0 };
        game.handle_packet(1, Packet::Orientation { owner: 1, orientation });
        let sent = packets_for(game.outbox_mut());
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].0,
            Target::Observers {
                exclude_owner: Some(1)
            }
        );

        game.handle_packet(1, Packet::Orientation { owner: 2, orientation });
        assert!(game.outbox_mut().is_empty());
    }

    #[test]
    fn test_ping_answered() {
        let mut game = open_world();
        game.add_player(4);
        game.outbox_mut().drain();
        game.handle_packet(4, Packet::Ping { nonce: 77 });
        assert_eq!(
            packets_for(game.outbox_mut()),
            vec![(Target::Client(4), Packet::Pong { nonce: 77 })]
        );
    }

    fn shot_at(game: &GameState, shooter: OwnerId, target: OwnerId, send_tick: Tick) -> FireMessage {
        let from = game.player(shooter).unwrap().position().unwrap();
        let to = game.player(target).unwrap().position().unwrap();
        let eye = from + Vec3::Y * game.config().launcher.eye_height;
        let aim = Quat::from_rotation_arc(Vec3::Z, (to + Vec3::Y * 1.0 - eye).normalize());
        FireMessage {
            shooter,
            muzzle: eye,
            camera_position: eye,
            aim,
            variance: AttackVariance::default(),
            send_tick,
        }
    }

    #[test]
    fn test_fire_compensates_and_relays() {
        let mut game = open_world();
        game.add_player(1);
        game.add_player(2);
        for _ in 0..100 {
            game.advance(0.02);
        }
        game.outbox_mut().drain();

        let now = game.tick();
        let message = shot_at(&game, 1, 2, now - 2);
        game.handle_packet(1, Packet::Fire { message });

        assert_eq!(game.projectiles().len(), 1);
        assert_approx_eq!(
            game.projectiles()[0].state().catchup_remaining,
            game.clock().time_since(now - 2),
            1e-5
        );

        let sent = packets_for(game.outbox_mut());
        assert_eq!(
            sent,
            vec![(
                Target::Observers {
                    exclude_owner: Some(1)
                },
                Packet::Fire { message }
            )]
        );
    }

    #[test]
    fn test_fire_as_someone_else_rejected() {
        let mut game = open_world();
        game.add_player(1);
        game.add_player(2);
        game.outbox_mut().drain();

        let message = shot_at(&game, 1, 2, 0);
        game.handle_packet(2, Packet::Fire { message });
        assert!(game.projectiles().is_empty());
        assert!(game.outbox_mut().is_empty());
    }

    #[test]
    fn test_projectiles_kill_and_lock() {
        let mut game = open_world();
        game.add_player(1);
        game.add_player(2);
        game.outbox_mut().drain();

        for _ in 0..10 {
            let message = shot_at(&game, 1, 2, game.tick());
            game.handle_packet(1, Packet::Fire { message });
            for _ in 0..150 {
                game.advance(0.02);
            }
        }

        let target = game.player(2).unwrap();
        assert!(target.is_dead());
        assert!(!game.clock().is_subscribed(2));
        assert_eq!(game.player(1).unwrap().health().current(), DEFAULT_MAX_HEALTH);

        let sent = packets_for(game.outbox_mut());
        let deaths = sent
            .iter()
            .filter(|(_, packet)| matches!(packet, Packet::PlayerDied { owner: 2 }))
            .count();
        assert_eq!(deaths, 1);

        game.handle_packet(2, Packet::Input { batch: forward_batch(1) });
        let before = game.player(2).unwrap().position();
        game.advance(0.02);
        assert_eq!(game.player(2).unwrap().position(), before);
    }

    #[test]
    fn test_every_player_is_simulated_and_observed() {
        let mut game = open_world();
        for owner in 1..=3 {
            game.add_player(owner);
        }
        game.outbox_mut().drain();

        for shooter in 1..=3 {
            let target = shooter % 3 + 1;
            let message = shot_at(&game, shooter, target, game.tick());
            game.handle_packet(shooter, Packet::Fire { message });
        }
        assert_eq!(game.projectiles().len(), 3);

        for _ in 0..150 {
            game.advance(0.02);
        }
        for owner in 1..=3 {
            let health = game.player(owner).unwrap().health();
            assert!(health.current() < health.max(), "player #{} never hit", owner);
        }

        let connected = [1, 2, 3];
        for (target, packet) in packets_for(game.outbox_mut()) {
            if let Packet::HealthChanged { .. } = packet {
                assert_eq!(target.recipients(&connected), vec![1, 2, 3]);
            }
        }
    }

    #[test]
    fn test_remove_player_unsubscribes() {
        let mut game = open_world();
        game.add_player(1);
        assert!(game.remove_player(1));
        assert!(!game.clock().is_subscribed(1));
        assert!(!game.remove_player(1));
    }
}
