//! # Headless Game Client
//!
//! A client for the arena server that needs no window: a bot generates
//! inputs, the local player is predicted immediately, and authoritative
//! state from the server is reconciled against that prediction.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! Client-side world state:
//! - Local player prediction and the queue of unconfirmed inputs
//! - Reconciliation that snaps large errors and smooths small ones
//! - Interpolated remote players, bullets and the day/night clock
//!
//! ### Input Module (`input`)
//! Bot input generation with sequence numbering and a fire-rate limit.
//!
//! ### Network Module (`network`)
//! The [`network::Client`] run loop: connects through the shared
//! [`shared::NetworkService`], sends the handshake, mirrors world messages into
//! the game state and pushes one input per tick.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::{input::InputManager, network::Client};
//! use shared::NetworkConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NetworkConfig::default();
//!     let input_manager = InputManager::new(&config);
//!     let mut client = Client::new(config, "Bot_0001".to_string(), input_manager);
//!     client.run(Some(Duration::from_secs(30))).await
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
