//! Error types shared by the client and the server

use thiserror::Error;

/// Reasons a [`MoveInput`](crate::MoveInput) is refused before it reaches the simulator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("non-finite value in field `{field}`")]
    NonFinite { field: &'static str },

    #[error("movement axis `{field}` out of range: {value}")]
    AxisOutOfRange { field: &'static str, value: f32 },

    #[error("frame delta {value} outside [0, {max}]")]
    FrameDeltaOutOfRange { value: f32, max: f32 },

    #[error("batch holds {len} inputs, limit is {max}")]
    BatchTooLarge { len: usize, max: usize },
}

/// Failures while encoding or decoding datagrams.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode packet: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode packet: {0}")]
    Decode(#[source] bincode::Error),

    #[error("datagram of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },
}

/// Reasons the authority refuses a fire request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FireError {
    #[error("client #{sender} tried to fire as #{claimed}")]
    WrongShooter { claimed: u32, sender: u32 },

    #[error("non-finite value in fire request")]
    NonFinite,

    #[error("muzzle {distance:.2}m away from shooter, limit is {max:.2}m")]
    MuzzleTooFar { distance: f32, max: f32 },

    #[error("shooter is dead")]
    ShooterDead,
}
