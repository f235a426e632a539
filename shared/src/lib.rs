//! Simulation code both replicas run.
//!
//! Everything that has to produce identical results on the predicting client
//! and the authoritative server lives here: the collision world, the movement
//! step, the fixed clock, prediction and reconciliation, projectiles, and the
//! wire protocol that carries them.

pub mod clock;
pub mod collision;
pub mod entity;
pub mod error;
pub mod health;
pub mod input;
pub mod launcher;
pub mod movement;
pub mod prediction;
pub mod projectile;
pub mod protocol;
pub mod transport;

use glam::Vec3;

pub use clock::{FixedClock, Tick};
pub use collision::{Aabb, BodyShape, CollisionWorld, StaticWorld};
pub use error::{FireError, InputError, ProtocolError};
pub use input::{InputSource, Orientation};
pub use movement::{MoveInput, MovementConfig, MovementSimulator, SimulationState};
pub use prediction::{InputBatch, ReconcileSnapshot};
pub use protocol::Packet;

/// Connection id that owns an entity.
pub type OwnerId = u32;

pub const DEFAULT_TICK_RATE: u32 = 50;
pub const ARENA_HALF_SIZE: f32 = 20.0;
pub const SPAWN_RADIUS: f32 = 12.0;

/// Spawn position for a player, spread around a ring inside the arena.
pub fn spawn_point(owner: OwnerId) -> Vec3 {
    let angle = (owner as f32 * 137.5).to_radians();
    Vec3::new(angle.cos() * SPAWN_RADIUS, 0.0, angle.sin() * SPAWN_RADIUS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode, encode, Envelope};

    #[test]
    fn test_spawn_points_are_clear() {
        let world = StaticWorld::arena();
        let body = BodyShape::default();
        for owner in 0..64 {
            let aabb = body.aabb_at(spawn_point(owner));
            assert!(world.boxes.iter().all(|solid| !solid.intersects(&aabb)));
        }
    }

    #[test]
    fn test_packet_serialization_connect() {
        let envelope = Envelope {
            sequence: Some(3),
            acks: vec![1, 2],
            packet: Some(Packet::Connect { client_version: 42 }),
        };
        let decoded = decode(&encode(&envelope).unwrap()).unwrap();

        assert_eq!(decoded.sequence, Some(3));
        match decoded.packet {
            Some(Packet::Connect { client_version }) => assert_eq!(client_version, 42),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_connected() {
        let movement = MovementConfig {
            gravity_integration: movement::GravityIntegration::SymmetricHalfStep,
            ..Default::default()
        };
        let packet = Packet::Connected {
            client_id: 7,
            server_tick: 1200,
            tick_rate: DEFAULT_TICK_RATE,
            movement,
            spawn: spawn_point(7),
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Connected {
                client_id,
                server_tick,
                tick_rate,
                movement: received,
                ..
            } => {
                assert_eq!(client_id, 7);
                assert_eq!(server_tick, 1200);
                assert_eq!(tick_rate, DEFAULT_TICK_RATE);
                assert_eq!(received, movement);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_input() {
        let batch = InputBatch {
            tick: 99,
            inputs: vec![
                MoveInput {
                    horizontal_axis: -1.0,
                    jump_requested: true,
                    facing_yaw: 45.0,
                    frame_delta: 0.008,
                    ..Default::default()
                },
                MoveInput {
                    vertical_axis: 1.0,
                    frame_delta: 0.012,
                    ..Default::default()
                },
            ],
        };
        let packet = Packet::Input { batch: batch.clone() };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Input { batch: received } => assert_eq!(received, batch),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }
}
