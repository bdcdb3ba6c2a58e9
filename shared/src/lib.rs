//! Transport core shared by the arena server and client
//!
//! Layers, bottom up: binary codec and message definitions, packet framing,
//! reliability and fragmentation, the packet processor, the TCP/UDP
//! connection manager, and the network service that queues decoded messages
//! for the game's tick loop.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod fragment;
pub mod math;
pub mod message;
pub mod packet;
pub mod pool;
pub mod processor;
pub mod reliable;
pub mod router;
pub mod service;
pub mod session;
pub mod stats;
pub mod utils;

pub use config::NetworkConfig;
pub use connection::{ConnectionEvent, ConnectionManager, Role};
pub use error::{ErrorCode, NetworkError, Result};
pub use math::{Quat, Vec2, Vec3};
pub use message::{
    BulletDestroyMessage, BulletSpawnMessage, DestroyReason, FireMessage, GameTimeMessage,
    HandshakeMessage, MessageBody, MessageType, NetworkMessage, PlayerInputMessage,
    PlayerJoinedMessage, PlayerLeftMessage, PlayerStateMessage, BROADCAST_TARGET,
};
pub use packet::{NetworkPacket, PacketFlags, PacketHeader, PacketType};
pub use processor::PacketProcessor;
pub use router::{HandlerId, HandlerResult, MessageRouter};
pub use service::{MessageSink, NetworkEvent, NetworkService};
pub use session::SERVER_SESSION_ID;
pub use stats::StatisticsSnapshot;
