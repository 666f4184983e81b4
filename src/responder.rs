//! Lookup responder: answers "who provides X?" on the multicast group.
//!
//! The [`ResponderBuilder`] configures the resolver and socket settings; the
//! running [`Responder`] owns two tasks:
//! 1. the listener, which decodes each datagram, resolves the subject and
//!    queues a reply
//! 2. the reply task, which sends queued replies by unicast
//!
//! Unknown subjects get no answer at all. Silence means "not here", which
//! keeps failed lookups from turning into extra traffic.
//!
//! # Example
//!
//! ```ignore
//! use multicast_lookup::{LocalRegistry, Responder};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(LocalRegistry::new());
//! registry.register("printer-1", "printer-1:tcp -h 10.0.0.3 -p 9000");
//!
//! let responder = Responder::builder()
//!     .shared_resolver(registry.clone())
//!     .group("239.255.0.1".parse()?, 10000)
//!     .start()?;
//!
//! // ... later
//! responder.stop().await?;
//! ```

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::dedup::{DedupCache, DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_WINDOW};
use crate::error::{DiscoveryError, Result};
use crate::protocol::{decode_packet, encode_reply, Packet};
use crate::registry::ObjectResolver;
use crate::reply::{spawn_reply_task, OutboundReply, ReplyHandle, DEFAULT_REPLY_QUEUE};
use crate::stats::{ResponderSnapshot, ResponderStats};
use crate::transport::{Datagram, MulticastOptions, Transport, UdpTransport};
use crate::types::{generate_node_id, LookupReply, LookupRequest, Reference, ResponderId};

/// Builder for configuring and starting a [`Responder`].
pub struct ResponderBuilder {
    resolver: Option<Arc<dyn ObjectResolver>>,
    multicast: MulticastOptions,
    responder_id: Option<ResponderId>,
    node_id: Option<String>,
    answer_own_queries: bool,
    dedup_window: Option<Duration>,
    dedup_capacity: usize,
    reply_queue: usize,
}

impl ResponderBuilder {
    pub fn new() -> Self {
        Self {
            resolver: None,
            multicast: MulticastOptions::default(),
            responder_id: None,
            node_id: None,
            answer_own_queries: true,
            dedup_window: Some(DEFAULT_DEDUP_WINDOW),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            reply_queue: DEFAULT_REPLY_QUEUE,
        }
    }

    /// Resolver consulted for every request. Required.
    pub fn resolver(mut self, resolver: impl ObjectResolver) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Resolver shared with other owners (e.g. a registry still being
    /// updated by the application).
    pub fn shared_resolver(mut self, resolver: Arc<dyn ObjectResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Multicast group and port to listen on.
    pub fn group(mut self, group: Ipv4Addr, port: u16) -> Self {
        self.multicast.group = group;
        self.multicast.port = port;
        self
    }

    /// Full socket settings.
    pub fn multicast(mut self, options: MulticastOptions) -> Self {
        self.multicast = options;
        self
    }

    /// Identity placed in every reply. Default: generated per responder.
    pub fn responder_id(mut self, id: impl Into<String>) -> Self {
        self.responder_id = Some(ResponderId::new(id));
        self
    }

    /// Node id used for loopback suppression. Give the requester on the same
    /// node the same id.
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Whether to answer requests whose origin is this node.
    ///
    /// Default: true
    pub fn answer_own_queries(mut self, answer: bool) -> Self {
        self.answer_own_queries = answer;
        self
    }

    /// Retention window for duplicate suppression; `None` disables it.
    ///
    /// Default: 2 seconds
    pub fn dedup_window(mut self, window: Option<Duration>) -> Self {
        self.dedup_window = window;
        self
    }

    /// Maximum remembered requests for duplicate suppression.
    ///
    /// Default: 4096
    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    /// Capacity of the outbound reply queue.
    ///
    /// Default: 256
    pub fn reply_queue(mut self, capacity: usize) -> Self {
        self.reply_queue = capacity;
        self
    }

    /// Join the configured UDP multicast group and start listening.
    ///
    /// # Errors
    ///
    /// `TransportSetup` if the socket cannot be bound or the group joined.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(self) -> Result<Responder> {
        let transport = UdpTransport::join(&self.multicast)?;
        self.start_with_transport(transport)
    }

    /// Start listening on an already constructed transport.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if no resolver was set.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime; the listener and reply
    /// tasks are spawned here.
    pub fn start_with_transport(self, transport: impl Transport) -> Result<Responder> {
        let resolver = self.resolver.ok_or_else(|| {
            DiscoveryError::InvalidConfig("responder needs a resolver".to_string())
        })?;

        let transport: Arc<dyn Transport> = Arc::new(transport);
        let stats = Arc::new(ResponderStats::default());
        let responder_id = self.responder_id.unwrap_or_else(ResponderId::generate);
        let node_id = self.node_id.unwrap_or_else(generate_node_id);

        let (replies, reply_task) =
            spawn_reply_task(transport.clone(), self.reply_queue, stats.clone());

        let listener = Listener {
            transport: transport.clone(),
            resolver,
            replies,
            responder_id: responder_id.clone(),
            node_id: node_id.clone(),
            answer_own_queries: self.answer_own_queries,
            dedup: self
                .dedup_window
                .map(|window| DedupCache::new(window, self.dedup_capacity)),
            stats: stats.clone(),
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let listener_task = tokio::spawn(listener.run(shutdown_rx));

        tracing::debug!(
            responder = %responder_id,
            local = %transport.local_reference(),
            "Responder started"
        );

        Ok(Responder {
            transport,
            stats,
            responder_id,
            node_id,
            shutdown_tx: Some(shutdown_tx),
            listener_task: Some(listener_task),
            reply_task: Some(reply_task),
        })
    }
}

impl Default for ResponderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running lookup responder.
///
/// Call [`Responder::stop`] to leave the group gracefully. Dropping a
/// running responder aborts its tasks and releases the socket.
pub struct Responder {
    transport: Arc<dyn Transport>,
    stats: Arc<ResponderStats>,
    responder_id: ResponderId,
    node_id: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    listener_task: Option<JoinHandle<()>>,
    reply_task: Option<JoinHandle<()>>,
}

impl Responder {
    pub fn builder() -> ResponderBuilder {
        ResponderBuilder::new()
    }

    /// Join `group:port` over UDP and answer from `resolver`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(resolver: impl ObjectResolver, group: Ipv4Addr, port: u16) -> Result<Self> {
        ResponderBuilder::new()
            .resolver(resolver)
            .group(group, port)
            .start()
    }

    pub fn responder_id(&self) -> &ResponderId {
        &self.responder_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Address the responder sends replies from.
    pub fn local_reference(&self) -> Reference {
        self.transport.local_reference()
    }

    pub fn stats(&self) -> ResponderSnapshot {
        self.stats.snapshot()
    }

    /// True until `stop` completes or the listener exits on its own.
    pub fn is_running(&self) -> bool {
        self.listener_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop listening, flush queued replies and leave the group.
    ///
    /// A request already being handled is finished first; datagrams still
    /// waiting in the socket are discarded.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.listener_task.take() {
            if let Err(e) = task.await {
                tracing::error!("Responder listener failed: {}", e);
            }
        }
        if let Some(task) = self.reply_task.take() {
            if let Err(e) = task.await {
                tracing::error!("Responder reply task failed: {}", e);
            }
        }
        self.transport.shutdown()?;
        tracing::debug!(responder = %self.responder_id, "Responder stopped");
        Ok(())
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
        if let Some(task) = self.reply_task.take() {
            task.abort();
        }
        if let Err(e) = self.transport.shutdown() {
            tracing::debug!("Responder transport shutdown failed: {}", e);
        }
    }
}

/// State owned by the listener task.
struct Listener {
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn ObjectResolver>,
    replies: ReplyHandle,
    responder_id: ResponderId,
    node_id: String,
    answer_own_queries: bool,
    dedup: Option<DedupCache>,
    stats: Arc<ResponderStats>,
}

impl Listener {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            let received = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                received = self.transport.recv() => received,
            };

            match received {
                Ok(datagram) => self.handle_datagram(datagram),
                Err(DiscoveryError::Closed) => break,
                Err(e) => {
                    tracing::warn!("Responder receive error: {}", e);
                    tokio::task::yield_now().await;
                }
            }
        }
        tracing::trace!(responder = %self.responder_id, "Responder listener exiting");
    }

    fn handle_datagram(&mut self, datagram: Datagram) {
        let request = match decode_packet(&datagram.data) {
            Ok(Packet::Request(request)) => request,
            Ok(Packet::Reply(reply)) => {
                tracing::trace!(
                    "Ignoring reply {} seen on group socket",
                    reply.correlation_id
                );
                return;
            }
            Err(e) => {
                self.stats.record_malformed();
                tracing::debug!("Dropping datagram from {}: {}", datagram.source, e);
                return;
            }
        };

        self.stats.record_request();
        self.handle_request(request, &datagram.source);
    }

    fn handle_request(&mut self, request: LookupRequest, source: &Reference) {
        if !self.answer_own_queries && request.origin.as_deref() == Some(self.node_id.as_str()) {
            self.stats.record_own_query();
            tracing::trace!("Ignoring own request {}", request.correlation_id);
            return;
        }

        if let Some(dedup) = self.dedup.as_mut() {
            if !dedup.check_and_insert(request.correlation_id, source) {
                self.stats.record_duplicate();
                tracing::trace!(
                    "Suppressing duplicate request {} from {}",
                    request.correlation_id,
                    source
                );
                return;
            }
        }

        let Some(resolved) = self.resolver.resolve(&request.subject) else {
            self.stats.record_not_found();
            tracing::trace!("No local object for {}", request.subject);
            return;
        };

        let reply = LookupReply {
            correlation_id: request.correlation_id,
            responder_id: self.responder_id.clone(),
            resolved,
        };
        let packet = match encode_reply(&reply) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.record_reply_dropped();
                tracing::warn!("Cannot encode reply for {}: {}", request.subject, e);
                return;
            }
        };

        tracing::trace!(
            "Answering {} for {} ({})",
            request.correlation_id,
            request.subject,
            source
        );
        self.replies.try_send(OutboundReply {
            correlation_id: request.correlation_id,
            to: request.reply_to.resolve_against(source),
            packet: Bytes::from(packet),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_reply, encode_request};
    use crate::registry::LocalRegistry;
    use crate::transport::MemoryNetwork;
    use crate::types::ObjectIdentity;

    fn request(id: u64, subject: &str, reply_to: &Reference) -> Vec<u8> {
        encode_request(&LookupRequest {
            correlation_id: id,
            subject: ObjectIdentity::from(subject),
            reply_to: reply_to.clone(),
            origin: Some("node-a".to_string()),
        })
        .unwrap()
    }

    fn registry() -> LocalRegistry {
        let registry = LocalRegistry::new();
        registry.register("printer-1", "R1");
        registry
    }

    #[test]
    fn test_builder_defaults() {
        let builder = ResponderBuilder::default();
        assert!(builder.resolver.is_none());
        assert!(builder.answer_own_queries);
        assert_eq!(builder.dedup_window, Some(DEFAULT_DEDUP_WINDOW));
        assert_eq!(builder.reply_queue, DEFAULT_REPLY_QUEUE);
        assert_eq!(builder.multicast, MulticastOptions::default());
    }

    #[tokio::test]
    async fn test_missing_resolver_rejected() {
        let net = MemoryNetwork::new();
        let result = Responder::builder().start_with_transport(net.join("g"));
        assert!(matches!(result, Err(DiscoveryError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_answers_known_subject() {
        let net = MemoryNetwork::new();
        let responder = Responder::builder()
            .resolver(registry())
            .responder_id("resp-1")
            .start_with_transport(net.join("g"))
            .unwrap();
        let client = net.endpoint("g");

        client
            .broadcast(&request(7, "printer-1", &client.local_reference()))
            .await
            .unwrap();

        let datagram = client.recv().await.unwrap();
        let reply = decode_reply(&datagram.data).unwrap();
        assert_eq!(reply.correlation_id, 7);
        assert_eq!(reply.responder_id, ResponderId::from("resp-1"));
        assert_eq!(reply.resolved, Reference::from("R1"));
        assert_eq!(datagram.source, responder.local_reference());

        responder.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_subject_gets_silence() {
        let net = MemoryNetwork::new();
        let responder = Responder::builder()
            .resolver(registry())
            .start_with_transport(net.join("g"))
            .unwrap();
        let client = net.endpoint("g");

        client
            .broadcast(&request(1, "printer-99", &client.local_reference()))
            .await
            .unwrap();

        let waited =
            tokio::time::timeout(Duration::from_millis(100), client.recv()).await;
        assert!(waited.is_err(), "responder must not answer unknown subjects");
        assert_eq!(responder.stats().not_found, 1);
        assert_eq!(responder.stats().replies_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_requests_suppressed() {
        let net = MemoryNetwork::new();
        let responder = Responder::builder()
            .resolver(registry())
            .start_with_transport(net.join("g"))
            .unwrap();
        let client = net.endpoint("g");
        net.set_duplication(3);

        client
            .broadcast(&request(9, "printer-1", &client.local_reference()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stats = responder.stats();
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.duplicates, 2);
        assert_eq!(stats.replies_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_disabled_answers_every_copy() {
        let net = MemoryNetwork::new();
        let responder = Responder::builder()
            .resolver(registry())
            .dedup_window(None)
            .start_with_transport(net.join("g"))
            .unwrap();
        let client = net.endpoint("g");
        net.set_duplication(2);

        client
            .broadcast(&request(9, "printer-1", &client.local_reference()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(responder.stats().duplicates, 0);
        assert_eq!(responder.stats().replies_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_queries_ignored_when_configured() {
        let net = MemoryNetwork::new();
        let responder = Responder::builder()
            .resolver(registry())
            .node_id("node-a")
            .answer_own_queries(false)
            .start_with_transport(net.join("g"))
            .unwrap();
        let client = net.endpoint("g");

        client
            .broadcast(&request(3, "printer-1", &client.local_reference()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(responder.stats().own_queries_ignored, 1);
        assert_eq!(responder.stats().replies_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_does_not_stop_listener() {
        let net = MemoryNetwork::new();
        let responder = Responder::builder()
            .resolver(registry())
            .start_with_transport(net.join("g"))
            .unwrap();
        let client = net.endpoint("g");

        net.inject("g", b"");
        net.inject("g", b"\xff\xfe\xfd garbage");
        net.inject("g", &[0x4C, 0x4B, 1, 99, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0]);
        client
            .broadcast(&request(4, "printer-1", &client.local_reference()))
            .await
            .unwrap();

        let datagram = client.recv().await.unwrap();
        assert_eq!(decode_reply(&datagram.data).unwrap().correlation_id, 4);
        assert_eq!(responder.stats().malformed, 3);
        assert!(responder.is_running());
    }

    #[tokio::test]
    async fn test_stop_leaves_group() {
        let net = MemoryNetwork::new();
        let responder = Responder::builder()
            .resolver(registry())
            .start_with_transport(net.join("g"))
            .unwrap();
        assert_eq!(net.group_size("g"), 1);

        responder.stop().await.unwrap();
        assert_eq!(net.group_size("g"), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_transport() {
        let net = MemoryNetwork::new();
        let responder = Responder::builder()
            .resolver(registry())
            .start_with_transport(net.join("g"))
            .unwrap();

        drop(responder);
        assert_eq!(net.group_size("g"), 0);
    }

    #[test]
    #[should_panic]
    fn test_start_needs_runtime() {
        let net = MemoryNetwork::new();
        let _ = Responder::builder()
            .resolver(registry())
            .start_with_transport(net.join("g"));
    }
}
