//! # multicast-lookup
//!
//! Decentralized service discovery over IP multicast.
//!
//! Nodes that host objects run a [`Responder`] on a well-known multicast
//! group. A node that needs an object runs a [`Requester`], which
//! multicasts "who provides X?" and collects unicast answers, one per
//! responder, within a bounded window. There is no central registry: a
//! responder that does not serve X simply stays silent.
//!
//! ## Architecture
//!
//! - **Wire** ([`protocol`]): fixed 14-byte header + MsgPack map body,
//!   one datagram per packet
//! - **Transport** ([`transport`]): UDP multicast sockets, or an
//!   in-process network for tests
//! - **Responder**: listener task + non-blocking reply task
//! - **Requester**: correlation-id routing, retry windows, duplicate
//!   coalescing
//!
//! ## Example
//!
//! ```ignore
//! use multicast_lookup::{LocalRegistry, LookupOptions, Requester, Responder};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> multicast_lookup::Result<()> {
//!     let registry = Arc::new(LocalRegistry::new());
//!     registry.register("printer-1", "10.0.0.3:9000");
//!     let responder = Responder::builder().shared_resolver(registry).start()?;
//!
//!     let requester = Requester::builder().bind()?;
//!     let found = requester
//!         .lookup("printer-1", &LookupOptions::new(Duration::from_millis(200), 3))
//!         .await?;
//!     println!("printer-1 is at {:?}", found);
//!
//!     responder.stop().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod dedup;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod retry;
pub mod stats;
pub mod transport;
pub mod types;

mod reply;
mod requester;
mod responder;

pub use config::DiscoveryConfig;
pub use error::{DiscoveryError, Result};
pub use registry::{LocalRegistry, ObjectResolver};
pub use requester::{Discovery, LookupOptions, Requester, RequesterBuilder};
pub use responder::{Responder, ResponderBuilder};
pub use retry::{Backoff, RetryPolicy};
pub use stats::{RequesterSnapshot, ResponderSnapshot};
pub use types::{CorrelationId, LookupReply, LookupRequest, ObjectIdentity, Reference, ResponderId};
