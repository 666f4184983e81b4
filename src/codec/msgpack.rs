//! MsgPack body codec using `rmp-serde`.
//!
//! Packet bodies are always written with `to_vec_named`, never `to_vec`.
//! Named encoding produces a map keyed by field name, which is what lets an
//! older node skip fields added by a newer protocol version: serde ignores
//! map keys it does not know. Positional (array) encoding would break on the
//! first added field.
//!
//! # Example
//!
//! ```
//! use multicast_lookup::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Body {
//!     subject: String,
//! }
//!
//! let body = Body { subject: "printer-1".to_string() };
//! let encoded = MsgPackCodec::encode(&body).unwrap();
//! let decoded: Body = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, body);
//! ```

use crate::error::Result;

/// MessagePack codec for packet bodies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes in struct-as-map format.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
