//! Protocol module - wire format and packet types.
//!
//! - 14-byte header encoding/decoding
//! - Request/reply packets with MsgPack bodies

mod packet;
mod wire_format;

pub use packet::{
    decode_packet, decode_reply, decode_request, encode_reply, encode_request, Packet,
};
pub use wire_format::{kind, Header, HEADER_SIZE, MAGIC, MAX_PACKET_SIZE, PROTOCOL_VERSION};
