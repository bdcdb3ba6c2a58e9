//! Error taxonomy for the transport core

use thiserror::Error;

/// Stable numeric codes for each failure class, mirrored in log output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    None = 0,
    ServerStartFailed = 1,
    ConnectionTimeout = 2,
    ConnectionFailed = 3,
    PacketCreationFailed = 4,
    DecompressionFailed = 5,
    InvalidPacket = 6,
    ClientDisconnected = 7,
    UnknownMessageType = 8,
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("failed to start server: {0}")]
    ServerStartFailed(#[source] std::io::Error),
    #[error("connection timed out after {0:?}")]
    ConnectionTimeout(std::time::Duration),
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),
    #[error("failed to create packets: {0}")]
    PacketCreationFailed(String),
    #[error("decompression failed: {0}")]
    DecompressionFailed(#[source] std::io::Error),
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
    #[error("client {0} disconnected")]
    ClientDisconnected(i32),
    #[error("unknown message type tag {0}")]
    UnknownMessageType(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    pub fn code(&self) -> ErrorCode {
        match self {
            NetworkError::ServerStartFailed(_) => ErrorCode::ServerStartFailed,
            NetworkError::ConnectionTimeout(_) => ErrorCode::ConnectionTimeout,
            NetworkError::ConnectionFailed(_) => ErrorCode::ConnectionFailed,
            NetworkError::PacketCreationFailed(_) => ErrorCode::PacketCreationFailed,
            NetworkError::DecompressionFailed(_) => ErrorCode::DecompressionFailed,
            NetworkError::InvalidPacket(_) => ErrorCode::InvalidPacket,
            NetworkError::ClientDisconnected(_) => ErrorCode::ClientDisconnected,
            NetworkError::UnknownMessageType(_) => ErrorCode::UnknownMessageType,
            NetworkError::Io(_) => ErrorCode::None,
        }
    }

    /// Whether the caller may drop the offending unit of work and carry on
    ///
    /// Malformed input from a peer is always recoverable; failing to bind or
    /// connect is not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            NetworkError::InvalidPacket(_)
            | NetworkError::UnknownMessageType(_)
            | NetworkError::DecompressionFailed(_)
            | NetworkError::PacketCreationFailed(_)
            | NetworkError::ClientDisconnected(_) => true,
            NetworkError::ServerStartFailed(_)
            | NetworkError::ConnectionTimeout(_)
            | NetworkError::ConnectionFailed(_)
            | NetworkError::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;
