//! Lock-free counters for responder and requester activity.
//!
//! Counters are plain atomics shared between the listener task and the
//! public handle; [`ResponderStats::snapshot`] and
//! [`RequesterStats::snapshot`] copy them into plain structs for callers.

use std::sync::atomic::{AtomicU64, Ordering};

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Responder-side counters.
#[derive(Debug, Default)]
pub struct ResponderStats {
    requests: AtomicU64,
    malformed: AtomicU64,
    duplicates: AtomicU64,
    not_found: AtomicU64,
    own_queries_ignored: AtomicU64,
    replies_sent: AtomicU64,
    replies_dropped: AtomicU64,
}

/// Point-in-time copy of [`ResponderStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponderSnapshot {
    /// Well-formed requests received.
    pub requests: u64,
    /// Datagrams dropped because they could not be decoded.
    pub malformed: u64,
    /// Requests suppressed as duplicates.
    pub duplicates: u64,
    /// Requests for identities not served here.
    pub not_found: u64,
    /// Requests ignored because they came from this node.
    pub own_queries_ignored: u64,
    /// Replies handed to the transport.
    pub replies_sent: u64,
    /// Replies lost to a full queue or a failed send.
    pub replies_dropped: u64,
}

impl ResponderStats {
    pub fn record_request(&self) {
        bump(&self.requests);
    }

    pub fn record_malformed(&self) {
        bump(&self.malformed);
    }

    pub fn record_duplicate(&self) {
        bump(&self.duplicates);
    }

    pub fn record_not_found(&self) {
        bump(&self.not_found);
    }

    pub fn record_own_query(&self) {
        bump(&self.own_queries_ignored);
    }

    pub fn record_reply_sent(&self) {
        bump(&self.replies_sent);
    }

    pub fn record_reply_dropped(&self) {
        bump(&self.replies_dropped);
    }

    pub fn snapshot(&self) -> ResponderSnapshot {
        ResponderSnapshot {
            requests: read(&self.requests),
            malformed: read(&self.malformed),
            duplicates: read(&self.duplicates),
            not_found: read(&self.not_found),
            own_queries_ignored: read(&self.own_queries_ignored),
            replies_sent: read(&self.replies_sent),
            replies_dropped: read(&self.replies_dropped),
        }
    }
}

/// Requester-side counters.
#[derive(Debug, Default)]
pub struct RequesterStats {
    lookups: AtomicU64,
    broadcasts: AtomicU64,
    replies_accepted: AtomicU64,
    duplicate_replies: AtomicU64,
    stale_replies: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`RequesterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequesterSnapshot {
    /// Lookups started.
    pub lookups: u64,
    /// Request datagrams multicast (one per attempt).
    pub broadcasts: u64,
    /// Replies that added a new responder to a result.
    pub replies_accepted: u64,
    /// Replies repeated by a responder already counted.
    pub duplicate_replies: u64,
    /// Replies for correlation ids that were not pending.
    pub stale_replies: u64,
    /// Datagrams that did not decode as replies.
    pub malformed: u64,
}

impl RequesterStats {
    pub fn record_lookup(&self) {
        bump(&self.lookups);
    }

    pub fn record_broadcast(&self) {
        bump(&self.broadcasts);
    }

    pub fn record_accepted(&self) {
        bump(&self.replies_accepted);
    }

    pub fn record_duplicate(&self) {
        bump(&self.duplicate_replies);
    }

    pub fn record_stale(&self) {
        bump(&self.stale_replies);
    }

    pub fn record_malformed(&self) {
        bump(&self.malformed);
    }

    pub fn snapshot(&self) -> RequesterSnapshot {
        RequesterSnapshot {
            lookups: read(&self.lookups),
            broadcasts: read(&self.broadcasts),
            replies_accepted: read(&self.replies_accepted),
            duplicate_replies: read(&self.duplicate_replies),
            stale_replies: read(&self.stale_replies),
            malformed: read(&self.malformed),
        }
    }
}
