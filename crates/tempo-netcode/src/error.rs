//! Error types for tempo-netcode

use thiserror::Error;

/// Netcode error type
#[derive(Debug, Error)]
pub enum Error {
    /// Datagram shorter than its header
    #[error("Truncated packet: {0} bytes")]
    Truncated(usize),

    /// Unknown packet kind tag
    #[error("Unknown packet kind {0:#04x}")]
    UnknownKind(u8),

    /// Tag and body disagree
    #[error("Packet tagged {tag:?} decoded as {body:?}")]
    KindMismatch {
        tag: crate::PacketKind,
        body: crate::PacketKind,
    },

    /// Body failed to decode
    #[error("Decode error: {0}")]
    Decode(#[from] bincode::Error),

    /// The peer is gone
    #[error("Disconnected")]
    Disconnected,

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for netcode operations
pub type Result<T> = std::result::Result<T, Error>;
