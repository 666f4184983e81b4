//! Wire format encoding and decoding.
//!
//! Every lookup datagram starts with a 14-byte header:
//! ```text
//! ┌─────────┬─────────┬────────┬────────────────┬───────────┐
//! │ Magic   │ Version │ Kind   │ Correlation ID │ Body len  │
//! │ 2 bytes │ 1 byte  │ 1 byte │ 8 bytes        │ 2 bytes   │
//! │ "LK"    │         │        │ uint64 BE      │ uint16 BE │
//! └─────────┴─────────┴────────┴────────────────┴───────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. Whatever follows the body is
//! ignored, so later protocol versions may append data.

use crate::error::{DiscoveryError, Result};
use crate::types::CorrelationId;

/// Header size in bytes (fixed, exactly 14).
pub const HEADER_SIZE: usize = 14;

/// Magic bytes identifying lookup traffic ("LK").
pub const MAGIC: u16 = 0x4C4B;

/// Protocol version written by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest datagram we send or expect to receive.
///
/// Stays under a typical Ethernet MTU so packets are never fragmented.
pub const MAX_PACKET_SIZE: usize = 1400;

/// Packet kind tags.
pub mod kind {
    /// "Who provides this object?"
    pub const REQUEST: u8 = 1;
    /// "I do, here is its reference."
    pub const REPLY: u8 = 2;

    /// Check if a tag names a packet kind this version understands.
    #[inline]
    pub fn is_known(kind: u8) -> bool {
        kind == REQUEST || kind == REPLY
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version of the sender.
    pub version: u8,
    /// Packet kind (see `kind` module).
    pub kind: u8,
    /// Correlation id of the lookup this packet belongs to.
    pub correlation_id: CorrelationId,
    /// Body length in bytes.
    pub body_length: u16,
}

impl Header {
    /// Create a header for the current protocol version.
    pub fn new(kind: u8, correlation_id: CorrelationId, body_length: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            correlation_id,
            body_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use multicast_lookup::protocol::{kind, Header, HEADER_SIZE};
    ///
    /// let header = Header::new(kind::REQUEST, 42, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// assert_eq!(&bytes[0..2], b"LK");
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE`.
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&MAGIC.to_be_bytes());
        buf[2] = self.version;
        buf[3] = self.kind;
        buf[4..12].copy_from_slice(&self.correlation_id.to_be_bytes());
        buf[12..14].copy_from_slice(&self.body_length.to_be_bytes());
    }

    /// Decode and validate a header.
    ///
    /// The packet kind is *not* checked here; see [`Header::validate`].
    ///
    /// # Errors
    ///
    /// `MalformedPacket` if the buffer is short, the magic is wrong, or the
    /// version is 0.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(DiscoveryError::MalformedPacket(format!(
                "{} bytes is shorter than the {} byte header",
                buf.len(),
                HEADER_SIZE
            )));
        }

        let magic = u16::from_be_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(DiscoveryError::MalformedPacket(format!(
                "bad magic {:#06x}",
                magic
            )));
        }

        let version = buf[2];
        if version == 0 {
            return Err(DiscoveryError::MalformedPacket(
                "version 0 is reserved".to_string(),
            ));
        }

        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[4..12]);

        Ok(Self {
            version,
            kind: buf[3],
            correlation_id: u64::from_be_bytes(id),
            body_length: u16::from_be_bytes([buf[12], buf[13]]),
        })
    }

    /// Check kind and body length against the datagram that carried it.
    pub fn validate(&self, datagram_len: usize) -> Result<()> {
        if !kind::is_known(self.kind) {
            return Err(DiscoveryError::UnknownPacketType(self.kind));
        }

        let available = datagram_len.saturating_sub(HEADER_SIZE);
        if self.body_length as usize > available {
            return Err(DiscoveryError::MalformedPacket(format!(
                "body length {} exceeds the {} bytes available",
                self.body_length, available
            )));
        }

        Ok(())
    }

    #[inline]
    pub fn is_request(&self) -> bool {
        self.kind == kind::REQUEST
    }

    #[inline]
    pub fn is_reply(&self) -> bool {
        self.kind == kind::REPLY
    }
}
