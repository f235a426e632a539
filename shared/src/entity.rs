//! A player entity: movement replica, health and (for the owner) input, wired together once.

use crate::collision::{CollisionWorld, StaticWorld};
use crate::health::{DamageOutcome, DeathEvent, Health};
use crate::input::{InputSampler, Orientation};
use crate::prediction::{AuthorityReplica, ObserverReplica, OwnerPredictor};
use crate::OwnerId;
use glam::Vec3;
use log::info;
use tokio::sync::broadcast::{self, error::TryRecvError};

/// The movement role this process plays for the entity.
pub enum Replica<W = StaticWorld> {
    Owner(OwnerPredictor<W>),
    Authority(AuthorityReplica<W>),
    Observer(ObserverReplica),
}

pub struct PlayerEntity<W = StaticWorld> {
    owner: OwnerId,
    replica: Replica<W>,
    health: Health,
    sampler: Option<InputSampler>,
    deaths: broadcast::Receiver<DeathEvent>,
    death_handled: bool,
}

impl<W: CollisionWorld> PlayerEntity<W> {
    fn wire(owner: OwnerId, replica: Replica<W>, health: Health, sampler: Option<InputSampler>) -> Self {
        let deaths = health.subscribe_death();
        Self {
            owner,
            replica,
            health,
            sampler,
            deaths,
            death_handled: false,
        }
    }

    /// The locally controlled player on a client.
    pub fn owned(owner: OwnerId, predictor: OwnerPredictor<W>, sampler: InputSampler, max_health: u32) -> Self {
        Self::wire(
            owner,
            Replica::Owner(predictor),
            Health::new(owner, max_health, false),
            Some(sampler),
        )
    }

    /// A player simulated by the server.
    pub fn authoritative(owner: OwnerId, replica: AuthorityReplica<W>, max_health: u32) -> Self {
        Self::wire(
            owner,
            Replica::Authority(replica),
            Health::new(owner, max_health, true),
            None,
        )
    }

    /// Someone else's player as seen by a client.
    pub fn observed(owner: OwnerId, max_health: u32) -> Self {
        Self::wire(
            owner,
            Replica::Observer(ObserverReplica::new()),
            Health::new(owner, max_health, false),
            None,
        )
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn replica(&self) -> &Replica<W> {
        &self.replica
    }

    pub fn replica_mut(&mut self) -> &mut Replica<W> {
        &mut self.replica
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    pub fn sampler_mut(&mut self) -> Option<&mut InputSampler> {
        self.sampler.as_mut()
    }

    pub fn is_dead(&self) -> bool {
        self.health.is_dead()
    }

    /// Feet position, once known.
    pub fn position(&self) -> Option<Vec3> {
        match &self.replica {
            Replica::Owner(predictor) => Some(predictor.state().position),
            Replica::Authority(replica) => Some(replica.state().position),
            Replica::Observer(observer) => observer.state().map(|state| state.position),
        }
    }

    pub fn current_velocity(&self) -> Vec3 {
        match &self.replica {
            Replica::Owner(predictor) => predictor.current_velocity(),
            Replica::Authority(replica) => replica.current_velocity(),
            Replica::Observer(observer) => observer.current_velocity(),
        }
    }

    pub fn apply_orientation(&mut self, orientation: Orientation) {
        match &mut self.replica {
            Replica::Authority(replica) => replica.apply_orientation(orientation),
            Replica::Observer(observer) => observer.apply_orientation(orientation),
            Replica::Owner(_) => {}
        }
    }

    pub fn damage(&mut self, amount: u32) -> DamageOutcome {
        let outcome = self.health.damage(amount);
        self.poll_death();
        outcome
    }

    pub fn apply_replicated_health(&mut self, current: u32) {
        self.health.apply_replicated(current);
        self.poll_death();
    }

    /// Reacts to a pending death notification. Returns true the one time it fires.
    pub fn poll_death(&mut self) -> bool {
        match self.deaths.try_recv() {
            Ok(event) if !self.death_handled => {
                self.death_handled = true;
                self.lock(event);
                true
            }
            Ok(_) | Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => false,
            Err(TryRecvError::Lagged(_)) => self.poll_death(),
        }
    }

    fn lock(&mut self, event: DeathEvent) {
        info!("Locking movement and controls for player #{}", event.owner);
        match &mut self.replica {
            Replica::Owner(predictor) => predictor.lock_position(),
            Replica::Authority(replica) => replica.lock_position(),
            Replica::Observer(_) => {}
        }
        if let Some(sampler) = self.sampler.as_mut() {
            sampler.lock_controls();
        }
    }
}
