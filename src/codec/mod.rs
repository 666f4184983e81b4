//! Codec module - serialization of packet bodies.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the body format is fixed at compile time.

mod msgpack;

pub use msgpack::MsgPackCodec;
