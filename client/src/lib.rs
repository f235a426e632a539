//! # Headless Game Client
//!
//! A client that predicts its own player, mirrors everyone else, and draws
//! projectiles without waiting for the server. Input comes from a seeded bot
//! script, which makes the client usable for soak tests and latency
//! experiments without a window.
//!
//! ## Client-Side Prediction
//! Each render frame's input is simulated immediately and buffered. Once per
//! fixed tick the buffered frames go to the server as one input batch.
//!
//! ## Server Reconciliation
//! When a reconcile snapshot arrives, the predictor rewinds to it and replays
//! every batch the server has not yet acknowledged, plus the inputs of the
//! current partial tick. A prediction that matched the server produces no
//! visible correction.
//!
//! ## Latency-Compensated Projectiles
//! Shots appear at once for the shooter. Copies relayed from other players
//! start with a catch-up budget equal to the shot's age, capped, and burn it
//! off over the next few frames so they converge on where the shooter saw them.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! - Session state: local predictor, remote replicas, projectiles
//! - Tick alignment against the server clock
//!
//! ### Input Module (`input`)
//! - Seeded bot that implements the shared input source
//!
//! ### Network Module (`network`)
//! - UDP socket, reliable envelope handling and ping measurement
//! - Simulated latency and packet loss
//!
//! ### Stats Module (`stats`)
//! - Rolling ping and correction history
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, LinkSimulation};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let link = LinkSimulation { fake_ping_ms: 100, packet_loss: 0.05 };
//!     let mut client = Client::new("127.0.0.1:8080", link, 60, 1).await?;
//!     client.run(Some(Duration::from_secs(30))).await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
pub mod stats;
