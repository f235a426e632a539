//! # Authoritative Game Server
//!
//! The server owns the true movement state of every player and the only
//! projectiles that can deal damage. Clients predict their own movement and
//! send batches of frame inputs once per tick; the server replays those
//! batches on its own fixed clock and answers each one with a reconcile
//! snapshot.
//!
//! ## Tick pipeline
//!
//! Every server tick, in order:
//! 1. Each subscribed player's replica drains one queued input batch (more
//!    when the queue backs up), or holds still if nothing arrived.
//! 2. Processed batches produce a `Reconcile` for the owner and an
//!    `EntityState` for everyone else.
//! 3. Authoritative projectiles advance, sweep against the arena and player
//!    bodies, and apply damage.
//!
//! Missing input never stalls the tick; a player whose packets are lost
//! simply stands still on the server until the next batch arrives.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! - Connection tracking and id assignment
//! - Per-client reliable delivery state
//! - Timeout detection
//!
//! ### Game Module (`game`)
//! - Player entities, clock subscription and the tick pipeline
//! - Fire validation and latency-compensated projectile spawning
//! - Health, death and the packets that announce them
//!
//! ### Network Module (`network`)
//! - UDP receive/send tasks
//! - Envelope decoding, routing and outbox flushing
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::game::GameConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:8080", GameConfig::default(), 16).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod game;
pub mod network;
