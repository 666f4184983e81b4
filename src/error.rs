//! Error types for multicast-lookup.

use thiserror::Error;

/// Main error type for all discovery operations.
///
/// Only [`DiscoveryError::TransportSetup`], [`DiscoveryError::InvalidConfig`]
/// and [`DiscoveryError::Closed`] ever reach a caller of `lookup` or
/// `start`. Packet-level errors are produced by the codec and dropped by the
/// receive loops.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not bind, join or send on the configured multicast group.
    #[error("Transport setup failed: {0}")]
    TransportSetup(String),

    /// Datagram could not be parsed as a lookup packet.
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// Datagram carried a packet kind this node does not understand.
    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    /// Encoded packet does not fit in a single datagram.
    #[error("Packet of {size} bytes exceeds maximum {max}")]
    PacketTooLarge { size: usize, max: usize },

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rejected configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reference could not be turned into a transport address.
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// The requester or responder has been shut down.
    #[error("Closed")]
    Closed,
}

impl DiscoveryError {
    /// True for errors caused by a single bad datagram.
    ///
    /// These never abort a receive loop.
    pub fn is_packet_error(&self) -> bool {
        matches!(
            self,
            DiscoveryError::MalformedPacket(_)
                | DiscoveryError::UnknownPacketType(_)
                | DiscoveryError::MsgPackDecode(_)
        )
    }
}

/// Result type alias using DiscoveryError.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
