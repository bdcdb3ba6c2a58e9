//! # Arena Game Server
//!
//! The authoritative half of the arena shooter. The server owns the canonical
//! game state, applies client inputs, resolves bullets and broadcasts the
//! results; clients only ever predict and then conform to what it sends.
//!
//! ## Module Organization
//!
//! - `simulation`: [`ServerSimulation`], the fixed-timestep game loop and its
//!   message handlers (handshake, input, fire) plus connect/disconnect hooks.
//! - `entity`: authoritative player and bullet records, spawn table and the
//!   player hit test.
//! - `physics`: the [`PhysicsQuery`] seam and the static arena geometry that
//!   bullets are raycast against.
//! - `validation`: per-player sanity checks on inbound messages.
//! - `daytime`: the day/night clock announced with `GameTime` messages.
//!
//! ## Wiring
//!
//! The simulation never touches sockets. It is handed an
//! `Arc<dyn MessageSink>` (normally the [`shared::NetworkService`]) and
//! registers its handlers on the service's [`shared::MessageRouter`]:
//!
//! ```rust,no_run
//! use server::{physics::StaticWorld, ServerSimulation};
//! use shared::{MessageRouter, NetworkConfig, NetworkService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NetworkConfig::default();
//!     let router = Arc::new(MessageRouter::new());
//!     let service = Arc::new(NetworkService::new(config.clone(), router.clone()));
//!     service.start_server("0.0.0.0:7777").await?;
//!
//!     let simulation = Arc::new(ServerSimulation::new(
//!         config,
//!         service.clone(),
//!         Arc::new(StaticWorld::arena()),
//!     ));
//!     simulation.register_handlers(&router);
//!     Ok(())
//! }
//! ```

pub mod daytime;
pub mod entity;
pub mod physics;
pub mod simulation;
pub mod validation;

pub use physics::PhysicsQuery;
pub use simulation::ServerSimulation;
