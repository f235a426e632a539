//! Damageable health with a one-shot death notification.
//!
//! Only the authoritative replica applies damage. Mirrors on clients are
//! updated from replicated values. Either way, the transition to zero is
//! announced exactly once on a broadcast channel that movement, input and
//! camera systems subscribe to when the entity is wired.

use crate::OwnerId;
use log::{debug, info};
use tokio::sync::broadcast;

pub const DEFAULT_MAX_HEALTH: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeathEvent {
    pub owner: OwnerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    Damaged { remaining: u32 },
    Killed,
    /// Not the authority, already dead, or a zero amount.
    Ignored,
}

#[derive(Debug)]
pub struct Health {
    owner: OwnerId,
    max: u32,
    current: u32,
    authoritative: bool,
    death_tx: broadcast::Sender<DeathEvent>,
}

impl Health {
    pub fn new(owner: OwnerId, max: u32, authoritative: bool) -> Self {
        let (death_tx, _) = broadcast::channel(4);
        Self {
            owner,
            max,
            current: max,
            authoritative,
            death_tx,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn is_dead(&self) -> bool {
        self.current == 0
    }

    pub fn subscribe_death(&self) -> broadcast::Receiver<DeathEvent> {
        self.death_tx.subscribe()
    }

    pub fn damage(&mut self, amount: u32) -> DamageOutcome {
        if !self.authoritative || self.is_dead() || amount == 0 {
            return DamageOutcome::Ignored;
        }

        self.current = self.current.saturating_sub(amount);
        debug!("Player #{} health: {}", self.owner, self.current);

        if self.is_dead() {
            self.announce_death();
            DamageOutcome::Killed
        } else {
            DamageOutcome::Damaged {
                remaining: self.current,
            }
        }
    }

    /// Applies a value replicated from the authority.
    pub fn apply_replicated(&mut self, current: u32) {
        let was_dead = self.is_dead();
        self.current = current.min(self.max);
        if !was_dead && self.is_dead() {
            self.announce_death();
        }
    }

    fn announce_death(&self) {
        info!("Player #{} died", self.owner);
        if self.death_tx.send(DeathEvent { owner: self.owner }).is_err() {
            debug!("No death subscribers for player #{}", self.owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damage_reduces_health() {
        let mut health = Health::new(1, 100, true);
        assert_eq!(health.damage(30), DamageOutcome::Damaged { remaining: 70 });
        assert_eq!(health.current(), 70);
    }

    #[test]
    fn test_damage_saturates_and_kills_once() {
        let mut health = Health::new(1, 100, true);
        let mut deaths = health.subscribe_death();

        assert_eq!(health.damage(250), DamageOutcome::Killed);
        assert_eq!(health.current(), 0);
        assert_eq!(health.damage(10), DamageOutcome::Ignored);

        assert_eq!(deaths.try_recv().unwrap(), DeathEvent { owner: 1 });
        assert!(deaths.try_recv().is_err());
    }

    #[test]
    fn test_non_authoritative_damage_ignored() {
        let mut health = Health::new(2, 100, false);
        assert_eq!(health.damage(50), DamageOutcome::Ignored);
        assert_eq!(health.current(), 100);
    }

    #[test]
    fn test_replicated_death_notifies() {
        let mut health = Health::new(3, 100, false);
        let mut deaths = health.subscribe_death();

        health.apply_replicated(40);
        assert!(deaths.try_recv().is_err());

        health.apply_replicated(0);
        health.apply_replicated(0);
        assert_eq!(deaths.try_recv().unwrap().owner, 3);
        assert!(deaths.try_recv().is_err());
    }

    #[test]
    fn test_zero_damage_ignored() {
        let mut health = Health::new(4, 100, true);
        assert_eq!(health.damage(0), DamageOutcome::Ignored);
    }
}
