//! In-process simulated multicast network.
//!
//! Endpoints are addressed as `mem:{n}`. A broadcast is delivered to every
//! member of the sender's group; unicast goes to one endpoint. Sends to an
//! endpoint that no longer exists are silently lost, like UDP.
//!
//! Faults can be injected to exercise the protocol's tolerance:
//! - [`MemoryNetwork::set_duplication`] delivers every datagram N times
//! - [`MemoryNetwork::drop_next_broadcasts`] loses upcoming broadcasts
//! - [`MemoryNetwork::inject`] puts arbitrary bytes on a group
//!
//! # Example
//!
//! ```
//! use multicast_lookup::transport::{MemoryNetwork, Transport};
//!
//! # tokio_test_block_on(async {
//! let net = MemoryNetwork::new();
//! let member = net.join("lab");
//! let sender = net.endpoint("lab");
//!
//! sender.broadcast(b"hello").await.unwrap();
//! let datagram = member.recv().await.unwrap();
//! assert_eq!(&datagram.data[..], b"hello");
//! assert_eq!(datagram.source, sender.local_reference());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{BoxFuture, Datagram, Transport};
use crate::error::{DiscoveryError, Result};
use crate::types::Reference;

/// Source reference used for injected datagrams.
pub const INJECTOR_REFERENCE: &str = "mem:injector";

#[derive(Default)]
struct NetworkState {
    next_address: u64,
    endpoints: HashMap<Reference, mpsc::UnboundedSender<Datagram>>,
    groups: HashMap<String, Vec<Reference>>,
    duplication: usize,
    drop_broadcasts: usize,
    delivered: u64,
}

impl NetworkState {
    fn deliver(&mut self, to: &Reference, datagram: &Datagram) {
        let copies = self.duplication.max(1);
        if let Some(tx) = self.endpoints.get(to) {
            for _ in 0..copies {
                if tx.send(datagram.clone()).is_ok() {
                    self.delivered += 1;
                }
            }
        }
    }

    fn members(&self, group: &str) -> Vec<Reference> {
        self.groups.get(group).cloned().unwrap_or_default()
    }

    fn remove(&mut self, address: &Reference) {
        self.endpoints.remove(address);
        for members in self.groups.values_mut() {
            members.retain(|m| m != address);
        }
    }
}

/// Shared handle to a simulated network. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn attach(&self, group: &str, member: bool) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();

        state.next_address += 1;
        let address = Reference::new(format!("mem:{}", state.next_address));
        state.endpoints.insert(address.clone(), tx);
        if member {
            state
                .groups
                .entry(group.to_string())
                .or_default()
                .push(address.clone());
        }

        MemoryTransport {
            network: self.clone(),
            address,
            group: group.to_string(),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// New endpoint that is a member of `group` (responder side).
    pub fn join(&self, group: &str) -> MemoryTransport {
        self.attach(group, true)
    }

    /// New endpoint that sends to `group` without receiving its
    /// broadcasts (requester side).
    pub fn endpoint(&self, group: &str) -> MemoryTransport {
        self.attach(group, false)
    }

    /// Deliver every subsequent datagram `copies` times.
    pub fn set_duplication(&self, copies: usize) {
        self.lock().duplication = copies;
    }

    /// Lose the next `count` broadcasts.
    pub fn drop_next_broadcasts(&self, count: usize) {
        self.lock().drop_broadcasts = count;
    }

    /// Put raw bytes on a group as if sent by a foreign node.
    pub fn inject(&self, group: &str, data: &[u8]) {
        let datagram = Datagram::new(
            Bytes::copy_from_slice(data),
            Reference::from(INJECTOR_REFERENCE),
        );
        let mut state = self.lock();
        for member in state.members(group) {
            state.deliver(&member, &datagram);
        }
    }

    /// Send raw bytes to one endpoint with a chosen source reference.
    pub fn inject_to(&self, to: &Reference, source: &Reference, data: &[u8]) {
        let datagram = Datagram::new(Bytes::copy_from_slice(data), source.clone());
        self.lock().deliver(to, &datagram);
    }

    /// Number of members currently in `group`.
    pub fn group_size(&self, group: &str) -> usize {
        self.lock().groups.get(group).map_or(0, Vec::len)
    }

    /// Total datagrams delivered so far (copies counted separately).
    pub fn delivered(&self) -> u64 {
        self.lock().delivered
    }
}

/// One endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    address: Reference,
    group: String,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl Transport for MemoryTransport {
    fn local_reference(&self) -> Reference {
        self.address.clone()
    }

    fn broadcast<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.network.lock();
            if !state.endpoints.contains_key(&self.address) {
                return Err(DiscoveryError::Closed);
            }
            if state.drop_broadcasts > 0 {
                state.drop_broadcasts -= 1;
                return Ok(());
            }

            let datagram = Datagram::new(Bytes::copy_from_slice(data), self.address.clone());
            for member in state.members(&self.group) {
                state.deliver(&member, &datagram);
            }
            Ok(())
        })
    }

    fn send_to<'a>(&'a self, data: &'a [u8], to: &'a Reference) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let datagram = Datagram::new(Bytes::copy_from_slice(data), self.address.clone());
            self.network.lock().deliver(to, &datagram);
            Ok(())
        })
    }

    fn recv(&self) -> BoxFuture<'_, Result<Datagram>> {
        Box::pin(async move {
            let mut rx = self.rx.lock().await;
            rx.recv().await.ok_or(DiscoveryError::Closed)
        })
    }

    fn shutdown(&self) -> Result<()> {
        self.network.lock().remove(&self.address);
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.lock().remove(&self.address);
    }
}
