//! Wire messages and the datagram codec.

use crate::clock::Tick;
use crate::error::ProtocolError;
use crate::input::Orientation;
use crate::launcher::FireMessage;
use crate::movement::MovementConfig;
use crate::prediction::{InputBatch, ReconcileSnapshot};
use crate::OwnerId;
use glam::Vec3;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Delivery guarantee a packet kind is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    /// Resent until acknowledged; may arrive out of order.
    ReliableUnordered,
    UnreliableUnordered,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client -> server
    Connect {
        client_version: u32,
    },
    Input {
        batch: InputBatch,
    },
    Orientation {
        owner: OwnerId,
        orientation: Orientation,
    },
    Fire {
        message: FireMessage,
    },
    Ping {
        nonce: u64,
    },
    Disconnect,

    // Server -> client
    Connected {
        client_id: OwnerId,
        server_tick: Tick,
        tick_rate: u32,
        movement: MovementConfig,
        spawn: Vec3,
    },
    /// Authoritative state for the receiving client's own player.
    Reconcile {
        snapshot: ReconcileSnapshot,
        server_tick: Tick,
    },
    /// Authoritative state of someone else's player.
    EntityState {
        owner: OwnerId,
        snapshot: ReconcileSnapshot,
        server_tick: Tick,
    },
    PlayerJoined {
        owner: OwnerId,
        position: Vec3,
    },
    PlayerLeft {
        owner: OwnerId,
    },
    HealthChanged {
        owner: OwnerId,
        current: u32,
    },
    PlayerDied {
        owner: OwnerId,
    },
    Pong {
        nonce: u64,
    },
    Disconnected {
        reason: String,
    },
}

impl Packet {
    pub fn channel(&self) -> Channel {
        match self {
            Packet::Input { .. }
            | Packet::Orientation { .. }
            | Packet::EntityState { .. }
            | Packet::Ping { .. }
            | Packet::Pong { .. } => Channel::UnreliableUnordered,
            _ => Channel::ReliableUnordered,
        }
    }
}

/// What actually goes on the wire: an optional packet plus piggybacked acks.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Envelope {
    /// Set for reliable packets only.
    pub sequence: Option<u32>,
    pub acks: Vec<u32>,
    pub packet: Option<Packet>,
}

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    let bytes = bincode::serialize(envelope).map_err(ProtocolError::Encode)?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::Oversized {
            len: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::Oversized {
            len: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    bincode::deserialize(bytes).map_err(ProtocolError::Decode)
}
