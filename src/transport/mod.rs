//! Datagram transports.
//!
//! - [`UdpTransport`] - IPv4 multicast over tokio UDP sockets
//! - [`MemoryNetwork`] / [`MemoryTransport`] - in-process simulated
//!   multicast with fault injection, used by tests
//!
//! Both requester and responder talk to the network only through the
//! [`Transport`] trait, so either side can run over either implementation.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::Result;
use crate::types::Reference;

mod memory;
mod udp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::{MulticastOptions, UdpTransport, DEFAULT_GROUP, DEFAULT_PORT};

/// Boxed future returned by transport operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A received datagram and the reference of whoever sent it.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub data: Bytes,
    pub source: Reference,
}

impl Datagram {
    pub fn new(data: Bytes, source: Reference) -> Self {
        Self { data, source }
    }
}

/// Connectionless, unreliable datagram transport with a multicast group.
pub trait Transport: Send + Sync + 'static {
    /// Reference peers use to reach this transport by unicast.
    fn local_reference(&self) -> Reference;

    /// Send one datagram to every member of the group.
    fn broadcast<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Send one datagram to a single peer.
    fn send_to<'a>(&'a self, data: &'a [u8], to: &'a Reference) -> BoxFuture<'a, Result<()>>;

    /// Wait for the next inbound datagram.
    ///
    /// Returns `Err(Closed)` once the transport has been shut down.
    fn recv(&self) -> BoxFuture<'_, Result<Datagram>>;

    /// Leave the group and stop accepting datagrams.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
