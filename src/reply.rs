//! Dedicated reply-sending task.
//!
//! The responder's listener never waits on the network to answer a query.
//! It hands each encoded reply to this task through a bounded channel with
//! `try_send`; if the queue is full the reply is dropped and counted. The
//! task makes exactly one send attempt per reply. Retrying is left to the
//! requester, which will broadcast again if it heard nothing.
//!
//! ```text
//! Listener ─► mpsc::Sender<OutboundReply> (try_send) ─► Reply Task ─► Transport
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::stats::ResponderStats;
use crate::transport::Transport;
use crate::types::{CorrelationId, Reference};

/// Default capacity of the reply queue.
pub const DEFAULT_REPLY_QUEUE: usize = 256;

/// An encoded reply and where it goes.
#[derive(Debug, Clone)]
pub struct OutboundReply {
    pub correlation_id: CorrelationId,
    pub to: Reference,
    pub packet: Bytes,
}

/// Handle for queueing replies. Cheap to clone.
#[derive(Clone)]
pub struct ReplyHandle {
    tx: mpsc::Sender<OutboundReply>,
    stats: Arc<ResponderStats>,
}

impl ReplyHandle {
    /// Queue a reply without waiting.
    ///
    /// Returns `false` if the reply was dropped (queue full or task gone).
    pub fn try_send(&self, reply: OutboundReply) -> bool {
        match self.tx.try_send(reply) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(r)) => {
                tracing::warn!(
                    "Reply queue full, dropping reply {} to {}",
                    r.correlation_id,
                    r.to
                );
                self.stats.record_reply_dropped();
                false
            }
            Err(mpsc::error::TrySendError::Closed(r)) => {
                tracing::debug!("Reply task gone, dropping reply {}", r.correlation_id);
                self.stats.record_reply_dropped();
                false
            }
        }
    }
}

/// Spawn the reply task over `transport`.
///
/// The task exits once every [`ReplyHandle`] is dropped and the queue has
/// drained.
pub fn spawn_reply_task(
    transport: Arc<dyn Transport>,
    capacity: usize,
    stats: Arc<ResponderStats>,
) -> (ReplyHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = ReplyHandle {
        tx,
        stats: stats.clone(),
    };
    let task = tokio::spawn(reply_loop(rx, transport, stats));
    (handle, task)
}

async fn reply_loop(
    mut rx: mpsc::Receiver<OutboundReply>,
    transport: Arc<dyn Transport>,
    stats: Arc<ResponderStats>,
) {
    while let Some(reply) = rx.recv().await {
        match transport.send_to(&reply.packet, &reply.to).await {
            Ok(()) => {
                tracing::trace!("Sent reply {} to {}", reply.correlation_id, reply.to);
                stats.record_reply_sent();
            }
            Err(e) => {
                tracing::warn!(
                    "Reply {} to {} failed: {}",
                    reply.correlation_id,
                    reply.to,
                    e
                );
                stats.record_reply_dropped();
            }
        }
    }
}
