//! Lookup requester: multicasts queries and gathers the answers.
//!
//! One [`Requester`] owns one socket. Any number of lookups can run on it
//! at once; a background listener routes each inbound reply to the lookup
//! that is waiting for its correlation id. Replies for ids nobody is
//! waiting on (expired, cancelled, forged) are counted and dropped.
//!
//! A lookup runs in windows (see [`RetryPolicy`]):
//! 1. register a fresh correlation id
//! 2. multicast the request with our reply reference embedded
//! 3. collect replies, one per responder, until the window ends or the
//!    `enough` threshold is met
//! 4. if nothing arrived and attempts remain, go again with a new id
//!
//! An empty result is not an error. It means nobody currently serves the
//! identity.
//!
//! # Example
//!
//! ```ignore
//! use multicast_lookup::{LookupOptions, Requester};
//! use std::time::Duration;
//!
//! let requester = Requester::builder().bind()?;
//! let found = requester
//!     .lookup("printer-1", &LookupOptions::new(Duration::from_millis(200), 3))
//!     .await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{DiscoveryError, Result};
use crate::protocol::{decode_packet, encode_request, Packet};
use crate::retry::{Backoff, RetryPolicy};
use crate::stats::{RequesterSnapshot, RequesterStats};
use crate::transport::{MulticastOptions, Transport, UdpTransport};
use crate::types::{
    generate_node_id, rand_u64, CorrelationId, LookupReply, LookupRequest, ObjectIdentity,
    Reference, ResponderId,
};

/// Per-lookup settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupOptions {
    /// Windows and attempts.
    pub retry: RetryPolicy,
    /// Return as soon as this many distinct responders answered.
    /// `None` waits out the whole window to hear from everyone.
    pub enough: Option<usize>,
}

impl LookupOptions {
    /// Fixed windows of `timeout`, at most `max_attempts` broadcasts.
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            retry: RetryPolicy::fixed(timeout, max_attempts),
            enough: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.retry.backoff = backoff;
        self
    }

    /// Stop early once `count` responders answered.
    pub fn until(mut self, count: usize) -> Self {
        self.enough = Some(count);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        if self.enough == Some(0) {
            return Err(DiscoveryError::InvalidConfig(
                "enough must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One responder's answer, as returned by [`Requester::lookup_detailed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub responder_id: ResponderId,
    pub reference: Reference,
}

/// Builder for configuring and binding a [`Requester`].
pub struct RequesterBuilder {
    multicast: MulticastOptions,
    node_id: Option<String>,
    defaults: LookupOptions,
}

impl RequesterBuilder {
    pub fn new() -> Self {
        Self {
            multicast: MulticastOptions::default(),
            node_id: None,
            defaults: LookupOptions::default(),
        }
    }

    /// Multicast group and port to send queries to.
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

    /// Node id sent as the request origin. Default: generated.
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Default per-attempt timeout for [`Requester::lookup_default`].
    ///
    /// Default: 1 second
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.defaults.retry.timeout_per_attempt = timeout;
        self
    }

    /// Default attempt count for [`Requester::lookup_default`].
    ///
    /// Default: 1
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.defaults.retry.max_attempts = attempts;
        self
    }

    /// Default window growth for [`Requester::lookup_default`].
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.defaults.retry.backoff = backoff;
        self
    }

    /// Default early-return threshold for [`Requester::lookup_default`].
    pub fn enough_replies(mut self, count: usize) -> Self {
        self.defaults.enough = Some(count);
        self
    }

    /// Bind an ephemeral UDP port that queries the configured group.
    ///
    /// # Errors
    ///
    /// `TransportSetup` if the socket cannot be created.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn bind(self) -> Result<Requester> {
        let transport = UdpTransport::unicast(&self.multicast)?;
        self.with_transport(transport)
    }

    /// Run over an already constructed transport.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime; the reply listener is
    /// spawned here.
    pub fn with_transport(self, transport: impl Transport) -> Result<Requester> {
        self.defaults.validate()?;

        let transport: Arc<dyn Transport> = Arc::new(transport);
        let shared = Arc::new(Shared {
            local: transport.local_reference(),
            transport: Mutex::new(Some(transport.clone())),
            pending: Mutex::new(PendingTable::default()),
            next_id: AtomicU64::new(rand_u64()),
            closed: AtomicBool::new(false),
            stats: RequesterStats::default(),
            node_id: self.node_id.unwrap_or_else(generate_node_id),
        });

        let listener = tokio::spawn(listen(shared.clone(), transport));
        tracing::debug!(
            local = %shared.local,
            node = %shared.node_id,
            "Requester bound"
        );

        Ok(Requester {
            shared,
            listener: Mutex::new(Some(listener)),
            defaults: self.defaults,
        })
    }
}

impl Default for RequesterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration of one lookup window awaiting replies.
struct PendingQuery {
    deadline: Instant,
    tx: mpsc::UnboundedSender<LookupReply>,
}

#[derive(Default)]
struct PendingTable {
    closed: bool,
    queries: HashMap<CorrelationId, PendingQuery>,
}

/// Fallback deadline distance when `now + window` does not fit in an
/// `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(window: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(window)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// State shared between the requester handle and its listener task.
struct Shared {
    /// Taken out by `close`, so the socket goes away with the listener.
    transport: Mutex<Option<Arc<dyn Transport>>>,
    local: Reference,
    pending: Mutex<PendingTable>,
    next_id: AtomicU64,
    closed: AtomicBool,
    stats: RequesterStats,
    node_id: String,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DiscoveryError::Closed)
    }

    /// Register a new pending query with an id no other pending query has.
    fn register(
        &self,
        deadline: Instant,
    ) -> Result<(CorrelationId, mpsc::UnboundedReceiver<LookupReply>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut table = self.table();
        if table.closed {
            return Err(DiscoveryError::Closed);
        }

        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !table.queries.contains_key(&id) {
                table.queries.insert(id, PendingQuery { deadline, tx });
                return Ok((id, rx));
            }
        }
    }

    fn unregister(&self, id: CorrelationId) {
        self.table().queries.remove(&id);
    }

    /// Hand a reply to the lookup waiting for it, or drop it as stale.
    fn route(&self, reply: LookupReply) {
        let table = self.table();
        let delivered = match table.queries.get(&reply.correlation_id) {
            Some(query) if Instant::now() < query.deadline => {
                query.tx.send(reply.clone()).is_ok()
            }
            _ => false,
        };
        drop(table);

        if !delivered {
            self.stats.record_stale();
            tracing::trace!(
                "Discarding stale reply {} from {}",
                reply.correlation_id,
                reply.responder_id
            );
        }
    }

    /// Mark closed, wake every waiting lookup and hand back the transport.
    fn close(&self) -> Option<Arc<dyn Transport>> {
        let mut table = self.table();
        table.closed = true;
        // Dropping the senders wakes every waiting lookup.
        table.queries.clear();
        drop(table);
        self.closed.store(true, Ordering::Release);

        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Removes a pending registration when its window ends or the lookup
/// future is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.unregister(self.id);
    }
}

/// Multicast lookup client.
///
/// Share between tasks with `Arc<Requester>`; every method takes `&self`.
/// Dropping the requester closes it.
pub struct Requester {
    shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
    defaults: LookupOptions,
}

impl Requester {
    pub fn builder() -> RequesterBuilder {
        RequesterBuilder::new()
    }

    /// Bind a requester for `group:port` over UDP with default options.
    pub fn bind(group: Ipv4Addr, port: u16) -> Result<Self> {
        RequesterBuilder::new().group(group, port).bind()
    }

    /// Reply reference embedded in our requests.
    pub fn local_reference(&self) -> Reference {
        self.shared.local.clone()
    }

    pub fn node_id(&self) -> &str {
        &self.shared.node_id
    }

    /// Options used by [`Requester::lookup_default`].
    pub fn default_options(&self) -> &LookupOptions {
        &self.defaults
    }

    pub fn stats(&self) -> RequesterSnapshot {
        self.shared.stats.snapshot()
    }

    /// Number of lookup windows currently waiting for replies.
    pub fn pending(&self) -> usize {
        self.shared.table().queries.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Find every reference served for `subject`.
    ///
    /// Results are in arrival order, at most one per responder and without
    /// repeated references. Empty means no responder answered in time.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for bad options, `TransportSetup` if the query cannot
    /// be multicast, `Closed` after [`Requester::close`].
    pub async fn lookup(
        &self,
        subject: impl Into<ObjectIdentity>,
        options: &LookupOptions,
    ) -> Result<Vec<Reference>> {
        let found = self.lookup_detailed(subject, options).await?;

        let mut references: Vec<Reference> = Vec::with_capacity(found.len());
        for discovery in found {
            if !references.contains(&discovery.reference) {
                references.push(discovery.reference);
            }
        }
        Ok(references)
    }

    /// [`Requester::lookup`] with the builder's default options.
    pub async fn lookup_default(
        &self,
        subject: impl Into<ObjectIdentity>,
    ) -> Result<Vec<Reference>> {
        self.lookup(subject, &self.defaults).await
    }

    /// Return the first answer, without waiting for other responders.
    pub async fn lookup_one(
        &self,
        subject: impl Into<ObjectIdentity>,
        options: &LookupOptions,
    ) -> Result<Option<Reference>> {
        let options = options.clone().until(1);
        let found = self.lookup_detailed(subject, &options).await?;
        Ok(found.into_iter().next().map(|d| d.reference))
    }

    /// Like [`Requester::lookup`] but keeps the responder id of each answer.
    pub async fn lookup_detailed(
        &self,
        subject: impl Into<ObjectIdentity>,
        options: &LookupOptions,
    ) -> Result<Vec<Discovery>> {
        options.validate()?;
        if self.is_closed() {
            return Err(DiscoveryError::Closed);
        }

        let subject = subject.into();
        self.shared.stats.record_lookup();

        let mut found: Vec<Discovery> = Vec::new();
        let mut responders: HashSet<ResponderId> = HashSet::new();

        for (attempt, window) in options.retry.windows().enumerate() {
            let deadline = deadline_after(window);
            let (id, mut rx) = match self.shared.register(deadline) {
                Ok(registered) => registered,
                // Closed between windows: same outcome as closed mid-window.
                Err(DiscoveryError::Closed) if attempt > 0 => break,
                Err(e) => return Err(e),
            };
            let _guard = PendingGuard {
                shared: &self.shared,
                id,
            };

            match self.broadcast(id, &subject).await {
                Ok(()) => {}
                Err(DiscoveryError::Closed) if attempt > 0 => break,
                Err(e) => return Err(e),
            }
            tracing::debug!(
                "Lookup {} for {} (attempt {}/{}, window {:?})",
                id,
                subject,
                attempt + 1,
                options.retry.max_attempts,
                window
            );

            loop {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(reply)) => {
                        if !responders.insert(reply.responder_id.clone()) {
                            self.shared.stats.record_duplicate();
                            continue;
                        }
                        self.shared.stats.record_accepted();
                        found.push(Discovery {
                            responder_id: reply.responder_id,
                            reference: reply.resolved,
                        });
                        if options.enough.is_some_and(|n| found.len() >= n) {
                            return Ok(found);
                        }
                    }
                    // Requester closed underneath us.
                    Ok(None) => return Ok(found),
                    Err(_) => break,
                }
            }

            if !found.is_empty() {
                break;
            }
        }

        tracing::debug!("Lookup for {} found {} responder(s)", subject, found.len());
        Ok(found)
    }

    async fn broadcast(&self, id: CorrelationId, subject: &ObjectIdentity) -> Result<()> {
        let request = LookupRequest {
            correlation_id: id,
            subject: subject.clone(),
            reply_to: self.shared.local.clone(),
            origin: Some(self.shared.node_id.clone()),
        };
        let packet = encode_request(&request)?;

        let transport = self.shared.transport()?;
        match transport.broadcast(&packet).await {
            Ok(()) => {
                self.shared.stats.record_broadcast();
                Ok(())
            }
            Err(DiscoveryError::Closed) => Err(DiscoveryError::Closed),
            Err(e) => Err(DiscoveryError::TransportSetup(format!(
                "multicast send failed: {}",
                e
            ))),
        }
    }

    /// Cancel every pending lookup and release the socket.
    ///
    /// Lookups in progress return what they gathered so far; new lookups
    /// fail with `Closed`. The socket is closed by the time this returns.
    /// Idempotent.
    pub async fn close(&self) {
        if let Some(listener) = self.cancel() {
            // Resolves once the aborted listener dropped its transport handle.
            let _ = listener.await;
            tracing::debug!("Requester closed");
        }
    }

    fn cancel(&self) -> Option<JoinHandle<()>> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = &listener {
            task.abort();
        }

        if let Some(transport) = self.shared.close() {
            if let Err(e) = transport.shutdown() {
                tracing::debug!("Requester transport shutdown failed: {}", e);
            }
        }
        listener
    }
}

impl Drop for Requester {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn listen(shared: Arc<Shared>, transport: Arc<dyn Transport>) {
    loop {
        let datagram = match transport.recv().await {
            Ok(datagram) => datagram,
            Err(DiscoveryError::Closed) => break,
            Err(e) => {
                tracing::warn!("Requester receive error: {}", e);
                tokio::task::yield_now().await;
                continue;
            }
        };

        match decode_packet(&datagram.data) {
            Ok(Packet::Reply(reply)) => shared.route(reply),
            Ok(Packet::Request(request)) => {
                tracing::trace!("Ignoring request {} on reply socket", request.correlation_id);
            }
            Err(e) => {
                shared.stats.record_malformed();
                tracing::debug!("Dropping datagram from {}: {}", datagram.source, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_request, encode_reply};
    use crate::transport::MemoryNetwork;

    fn requester(net: &MemoryNetwork) -> Requester {
        Requester::builder()
            .with_transport(net.endpoint("g"))
            .unwrap()
    }

    /// Read the next request seen by `member` and send one reply per entry
    /// in `answers`.
    async fn answer_next(
        net: &MemoryNetwork,
        member: &dyn Transport,
        answers: &[(&str, &str)],
    ) -> LookupRequest {
        let datagram = member.recv().await.unwrap();
        let request = decode_request(&datagram.data).unwrap();
        for (responder, reference) in answers {
            let reply = encode_reply(&LookupReply {
                correlation_id: request.correlation_id,
                responder_id: ResponderId::from(*responder),
                resolved: Reference::from(*reference),
            })
            .unwrap();
            net.inject_to(&request.reply_to, &member.local_reference(), &reply);
        }
        request
    }

    #[test]
    fn test_lookup_options() {
        let options = LookupOptions::new(Duration::from_millis(50), 3).until(2);
        assert_eq!(options.retry.max_attempts, 3);
        assert_eq!(options.enough, Some(2));
        assert!(options.validate().is_ok());

        assert!(LookupOptions::new(Duration::from_millis(50), 1)
            .until(0)
            .validate()
            .is_err());
    }

    #[tokio::test]
    async fn test_builder_rejects_bad_defaults() {
        let net = MemoryNetwork::new();
        let result = Requester::builder()
            .max_attempts(0)
            .with_transport(net.endpoint("g"));
        assert!(matches!(result, Err(DiscoveryError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_carries_reply_reference_and_origin() {
        let net = MemoryNetwork::new();
        let member = net.join("g");
        let requester = Requester::builder()
            .node_id("node-a")
            .with_transport(net.endpoint("g"))
            .unwrap();

        let options = LookupOptions::new(Duration::from_millis(100), 1);
        let (found, request) = tokio::join!(
            requester.lookup("printer-1", &options),
            answer_next(&net, &member, &[])
        );

        assert!(found.unwrap().is_empty());
        assert_eq!(request.subject, ObjectIdentity::from("printer-1"));
        assert_eq!(request.reply_to, requester.local_reference());
        assert_eq!(request.origin.as_deref(), Some("node-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_replies_coalesced() {
        let net = MemoryNetwork::new();
        let member = net.join("g");
        let requester = requester(&net);

        let options = LookupOptions::new(Duration::from_millis(100), 1);
        let (found, _) = tokio::join!(
            requester.lookup_detailed("svc-x", &options),
            answer_next(&net, &member, &[("r1", "R1"), ("r1", "R1"), ("r1", "R1b")])
        );

        let found = found.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reference, Reference::from("R1"));
        assert_eq!(requester.stats().duplicate_replies, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_reference_from_two_responders_listed_once() {
        let net = MemoryNetwork::new();
        let member = net.join("g");
        let requester = requester(&net);

        let options = LookupOptions::new(Duration::from_millis(100), 1);
        let (found, _) = tokio::join!(
            requester.lookup("svc-x", &options),
            answer_next(&net, &member, &[("r1", "R"), ("r2", "R")])
        );

        assert_eq!(found.unwrap(), vec![Reference::from("R")]);
        assert_eq!(requester.stats().replies_accepted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reply_discarded() {
        let net = MemoryNetwork::new();
        let member = net.join("g");
        let requester = requester(&net);

        let forged = encode_reply(&LookupReply {
            correlation_id: 12345,
            responder_id: ResponderId::from("evil"),
            resolved: Reference::from("X"),
        })
        .unwrap();

        let options = LookupOptions::new(Duration::from_millis(100), 1);
        let inject = async {
            let request = answer_next(&net, &member, &[]).await;
            net.inject_to(&request.reply_to, &member.local_reference(), &forged);
        };
        let (found, _) = tokio::join!(requester.lookup("svc-x", &options), inject);

        assert!(found.unwrap().is_empty());
        assert_eq!(requester.stats().stale_replies, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_after_window_discarded() {
        let net = MemoryNetwork::new();
        let member = net.join("g");
        let requester = requester(&net);

        let options = LookupOptions::new(Duration::from_millis(50), 1);
        let late = async {
            let datagram = member.recv().await.unwrap();
            let request = decode_request(&datagram.data).unwrap();
            tokio::time::sleep(Duration::from_millis(80)).await;
            let reply = encode_reply(&LookupReply {
                correlation_id: request.correlation_id,
                responder_id: ResponderId::from("slow"),
                resolved: Reference::from("R-late"),
            })
            .unwrap();
            net.inject_to(&request.reply_to, &member.local_reference(), &reply);
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        let (found, _) = tokio::join!(requester.lookup("svc-x", &options), late);

        assert!(found.unwrap().is_empty());
        assert_eq!(requester.stats().stale_replies, 1);
        assert_eq!(requester.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_uses_new_correlation_id() {
        let net = MemoryNetwork::new();
        let member = net.join("g");
        let requester = requester(&net);

        let options = LookupOptions::new(Duration::from_millis(50), 2);
        let respond_second = async {
            let first = answer_next(&net, &member, &[]).await;
            let second = answer_next(&net, &member, &[("r1", "R1")]).await;
            (first.correlation_id, second.correlation_id)
        };
        let (found, (first, second)) =
            tokio::join!(requester.lookup("svc-x", &options), respond_second);

        assert_eq!(found.unwrap(), vec![Reference::from("R1")]);
        assert_ne!(first, second);
        assert_eq!(requester.stats().broadcasts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_after_success() {
        let net = MemoryNetwork::new();
        let member = net.join("g");
        let requester = requester(&net);

        let options = LookupOptions::new(Duration::from_millis(50), 5);
        let (found, _) = tokio::join!(
            requester.lookup("svc-x", &options),
            answer_next(&net, &member, &[("r1", "R1")])
        );

        assert_eq!(found.unwrap().len(), 1);
        assert_eq!(requester.stats().broadcasts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enough_returns_early() {
        let net = MemoryNetwork::new();
        let member = net.join("g");
        let requester = requester(&net);

        let start = Instant::now();
        let options = LookupOptions::new(Duration::from_secs(10), 1);
        let (found, _) = tokio::join!(
            requester.lookup_one("svc-x", &options),
            answer_next(&net, &member, &[("r1", "R1"), ("r2", "R2")])
        );

        assert_eq!(found.unwrap(), Some(Reference::from("R1")));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_lookups() {
        let net = MemoryNetwork::new();
        let _member = net.join("g");
        let requester = Arc::new(requester(&net));

        let waiting = {
            let requester = requester.clone();
            tokio::spawn(async move {
                requester
                    .lookup("svc-x", &LookupOptions::new(Duration::from_secs(60), 3))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(requester.pending(), 1);

        let start = Instant::now();
        requester.close().await;
        let found = waiting.await.unwrap().unwrap();

        assert!(found.is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(requester.pending(), 0);
        assert!(requester.is_closed());
        assert!(matches!(
            requester
                .lookup("svc-x", &LookupOptions::default())
                .await,
            Err(DiscoveryError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_lookup_releases_registration() {
        let net = MemoryNetwork::new();
        let _member = net.join("g");
        let requester = requester(&net);

        let options = LookupOptions::new(Duration::from_secs(60), 1);
        let result =
            tokio::time::timeout(Duration::from_millis(10), requester.lookup("svc-x", &options))
                .await;

        assert!(result.is_err());
        assert_eq!(requester.pending(), 0);
    }

    #[tokio::test]
    async fn test_lookup_on_shut_transport_fails() {
        let net = MemoryNetwork::new();
        let transport = net.endpoint("g");
        transport.shutdown().unwrap();
        let requester = Requester::builder().with_transport(transport).unwrap();

        let result = requester
            .lookup("svc-x", &LookupOptions::new(Duration::from_millis(10), 1))
            .await;
        assert!(matches!(result, Err(DiscoveryError::Closed)));
    }

    /// Memory endpoint whose broadcasts fail with `Closed` after `allowed`
    /// successful ones.
    struct ClosesAfter {
        inner: crate::transport::MemoryTransport,
        allowed: std::sync::atomic::AtomicUsize,
    }

    impl Transport for ClosesAfter {
        fn local_reference(&self) -> Reference {
            self.inner.local_reference()
        }

        fn broadcast<'a>(&'a self, data: &'a [u8]) -> crate::transport::BoxFuture<'a, Result<()>> {
            let left = self
                .allowed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if left.is_err() {
                return Box::pin(async { Err(DiscoveryError::Closed) });
            }
            self.inner.broadcast(data)
        }

        fn send_to<'a>(
            &'a self,
            data: &'a [u8],
            to: &'a Reference,
        ) -> crate::transport::BoxFuture<'a, Result<()>> {
            self.inner.send_to(data, to)
        }

        fn recv(&self) -> crate::transport::BoxFuture<'_, Result<crate::transport::Datagram>> {
            self.inner.recv()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_between_windows_returns_gathered() {
        let net = MemoryNetwork::new();
        let _member = net.join("g");
        let transport = ClosesAfter {
            inner: net.endpoint("g"),
            allowed: std::sync::atomic::AtomicUsize::new(1),
        };
        let requester = Requester::builder().with_transport(transport).unwrap();

        let found = requester
            .lookup("svc-x", &LookupOptions::new(Duration::from_millis(20), 3))
            .await
            .unwrap();

        assert!(found.is_empty());
        assert_eq!(requester.stats().broadcasts, 1);
        assert_eq!(requester.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_timeout_does_not_overflow() {
        let net = MemoryNetwork::new();
        let member = net.join("g");
        let requester = requester(&net);

        let options = LookupOptions::new(Duration::MAX, 1);
        assert!(options.validate().is_ok());
        let (found, _) = tokio::join!(
            requester.lookup_one("svc-x", &options),
            answer_next(&net, &member, &[("r1", "R1")])
        );
        assert_eq!(found.unwrap(), Some(Reference::from("R1")));

        let exponential = LookupOptions {
            retry: RetryPolicy::exponential(Duration::from_secs(1), 100, Duration::MAX),
            enough: Some(1),
        };
        let (found, _) = tokio::join!(
            requester.lookup_detailed("svc-x", &exponential),
            answer_next(&net, &member, &[("r1", "R1")])
        );
        assert_eq!(found.unwrap().len(), 1);
    }

    #[test]
    fn test_deadline_after_saturates() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(async {
            let now = Instant::now();
            assert_eq!(deadline_after(Duration::from_secs(5)), now + Duration::from_secs(5));
            assert!(deadline_after(Duration::MAX) > now + Duration::from_secs(86_400 * 365));
        });
    }

    #[tokio::test]
    async fn test_close_releases_socket() {
        let requester = Requester::builder().bind().unwrap();
        let port = requester
            .local_reference()
            .to_socket_addr()
            .unwrap()
            .port();

        requester.close().await;

        let rebound = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port));
        assert!(rebound.is_ok(), "port {} still held: {:?}", port, rebound.err());
        assert!(matches!(
            requester.lookup_default("svc-x").await,
            Err(DiscoveryError::Closed)
        ));
    }

    #[test]
    #[should_panic]
    fn test_with_transport_needs_runtime() {
        let net = MemoryNetwork::new();
        let _ = Requester::builder().with_transport(net.endpoint("g"));
    }
}
