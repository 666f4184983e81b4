//! Lookup packets and their datagram encoding.
//!
//! A packet is a [`Header`] followed by a MsgPack body. Bodies are maps, so
//! fields added by later versions are skipped by older decoders, and any
//! bytes after the declared body length are ignored.
//!
//! # Example
//!
//! ```
//! use multicast_lookup::protocol::{decode_packet, encode_request, Packet};
//! use multicast_lookup::{LookupRequest, ObjectIdentity, Reference};
//!
//! let request = LookupRequest {
//!     correlation_id: 7,
//!     subject: ObjectIdentity::from("printer-1"),
//!     reply_to: Reference::from("10.0.0.5:40000"),
//!     origin: None,
//! };
//! let bytes = encode_request(&request).unwrap();
//!
//! match decode_packet(&bytes).unwrap() {
//!     Packet::Request(decoded) => assert_eq!(decoded, request),
//!     Packet::Reply(_) => unreachable!(),
//! }
//! ```

use serde::{Deserialize, Serialize};

use super::wire_format::{kind, Header, HEADER_SIZE, MAX_PACKET_SIZE};
use crate::codec::MsgPackCodec;
use crate::error::{DiscoveryError, Result};
use crate::types::{LookupReply, LookupRequest, ObjectIdentity, Reference, ResponderId};

/// A decoded lookup datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Request(LookupRequest),
    Reply(LookupReply),
}

impl Packet {
    /// Correlation id carried by either kind.
    pub fn correlation_id(&self) -> u64 {
        match self {
            Packet::Request(r) => r.correlation_id,
            Packet::Reply(r) => r.correlation_id,
        }
    }

    /// Encode to a single datagram.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Packet::Request(r) => encode_request(r),
            Packet::Reply(r) => encode_reply(r),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RequestBody {
    subject: ObjectIdentity,
    reply_to: Reference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ReplyBody {
    responder_id: ResponderId,
    resolved: Reference,
}

/// Encode a lookup request.
///
/// # Errors
///
/// `PacketTooLarge` if the encoded request exceeds [`MAX_PACKET_SIZE`].
pub fn encode_request(request: &LookupRequest) -> Result<Vec<u8>> {
    let body = RequestBody {
        subject: request.subject.clone(),
        reply_to: request.reply_to.clone(),
        origin: request.origin.clone(),
    };
    build_packet(kind::REQUEST, request.correlation_id, &body)
}

/// Encode a lookup reply.
pub fn encode_reply(reply: &LookupReply) -> Result<Vec<u8>> {
    let body = ReplyBody {
        responder_id: reply.responder_id.clone(),
        resolved: reply.resolved.clone(),
    };
    build_packet(kind::REPLY, reply.correlation_id, &body)
}

/// Decode any lookup datagram.
///
/// # Errors
///
/// `MalformedPacket` for truncated or corrupt data, `UnknownPacketType` for
/// a well-formed header with a kind this version does not know.
pub fn decode_packet(datagram: &[u8]) -> Result<Packet> {
    let header = Header::decode(datagram)?;
    header.validate(datagram.len())?;

    let body = &datagram[HEADER_SIZE..HEADER_SIZE + header.body_length as usize];

    match header.kind {
        kind::REQUEST => {
            let body: RequestBody = decode_body(body)?;
            Ok(Packet::Request(LookupRequest {
                correlation_id: header.correlation_id,
                subject: body.subject,
                reply_to: body.reply_to,
                origin: body.origin,
            }))
        }
        kind::REPLY => {
            let body: ReplyBody = decode_body(body)?;
            Ok(Packet::Reply(LookupReply {
                correlation_id: header.correlation_id,
                responder_id: body.responder_id,
                resolved: body.resolved,
            }))
        }
        other => Err(DiscoveryError::UnknownPacketType(other)),
    }
}

/// Decode a datagram that must be a request.
pub fn decode_request(datagram: &[u8]) -> Result<LookupRequest> {
    match decode_packet(datagram)? {
        Packet::Request(r) => Ok(r),
        Packet::Reply(_) => Err(DiscoveryError::MalformedPacket(
            "expected a request, got a reply".to_string(),
        )),
    }
}

/// Decode a datagram that must be a reply.
pub fn decode_reply(datagram: &[u8]) -> Result<LookupReply> {
    match decode_packet(datagram)? {
        Packet::Reply(r) => Ok(r),
        Packet::Request(_) => Err(DiscoveryError::MalformedPacket(
            "expected a reply, got a request".to_string(),
        )),
    }
}

fn build_packet<T: Serialize>(kind: u8, correlation_id: u64, body: &T) -> Result<Vec<u8>> {
    let body = MsgPackCodec::encode(body)?;
    let size = HEADER_SIZE + body.len();
    if size > MAX_PACKET_SIZE {
        return Err(DiscoveryError::PacketTooLarge {
            size,
            max: MAX_PACKET_SIZE,
        });
    }

    let header = Header::new(kind, correlation_id, body.len() as u16);
    let mut buf = Vec::with_capacity(size);
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(&body);
    Ok(buf)
}

fn decode_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    MsgPackCodec::decode(body).map_err(|e| DiscoveryError::MalformedPacket(e.to_string()))
}
