//! Identity and handle types shared by requester and responder.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, Result};

/// Token tying an asynchronous reply to the request that caused it.
pub type CorrelationId = u64;

/// Opaque identity of the object being looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectIdentity(String);

impl ObjectIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectIdentity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ObjectIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque, transport-addressable handle.
///
/// Used in two roles: the *subject* reference a responder hands back for a
/// resolved object, and the *reply* reference a requester embeds so that
/// responders know where to send the answer. The UDP transport reads a
/// reply reference as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpret this reference as a socket address.
    pub fn to_socket_addr(&self) -> Result<SocketAddr> {
        self.0
            .parse()
            .map_err(|_| DiscoveryError::InvalidReference(self.0.clone()))
    }

    /// Fill in an unspecified host (`0.0.0.0` / `::`) from `source`.
    ///
    /// A requester bound to the wildcard address cannot know which of its
    /// interfaces a responder will see, so the responder substitutes the
    /// datagram's source host. References that are not socket addresses,
    /// or already carry a concrete host, are returned unchanged.
    pub fn resolve_against(&self, source: &Reference) -> Reference {
        let (Ok(addr), Ok(src)) = (self.to_socket_addr(), source.to_socket_addr()) else {
            return self.clone();
        };
        if !addr.ip().is_unspecified() {
            return self.clone();
        }
        Reference::from(SocketAddr::new(src.ip(), addr.port()))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Reference {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Reference {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<SocketAddr> for Reference {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

/// Identity of a responding node, used to coalesce duplicate replies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponderId(String);

impl ResponderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate an id unique to this process and call.
    pub fn generate() -> Self {
        Self(generate_node_id())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResponderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResponderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A query as delivered to a responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    pub correlation_id: CorrelationId,
    pub subject: ObjectIdentity,
    pub reply_to: Reference,
    /// Node id of the sender, if it chose to disclose one.
    pub origin: Option<String>,
}

/// A positive answer from one responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupReply {
    pub correlation_id: CorrelationId,
    pub responder_id: ResponderId,
    pub resolved: Reference,
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a node id unique within this process and very likely unique
/// across hosts.
///
/// Format: `{pid:x}-{random:x}`.
pub fn generate_node_id() -> String {
    format!("{:x}-{:x}", std::process::id(), rand_u64())
}

/// Pseudo-random u64 from wall clock, pid and a per-process counter.
pub(crate) fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let pid = std::process::id() as u64;
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut x = nanos ^ pid.rotate_left(32) ^ seq.wrapping_mul(0x9E37_79B9_7F4A_7C15);

    // splitmix64 finalizer
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
