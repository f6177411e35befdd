//! Live query subscriptions
//!
//! A subscription re-evaluates its query after every commit to its
//! collection and pushes the new result onto its own unbounded channel when
//! it differs from the last one delivered.
//!
//! # Delivery rules
//!
//! - The first snapshot is delivered on subscribe
//! - Snapshot versions strictly increase per subscription; an evaluation
//!   that finishes after a newer one was delivered is dropped
//! - An evaluation overlapped by a newer commit is abandoned, since that
//!   commit re-evaluates on its own
//! - After unsubscribe (explicit, handle drop, or close) nothing more is sent
//!
//! Delivery only enqueues; observers pull from the channel, so no observer
//! code ever runs inside a writer's commit.

use crate::query::{QueryEngine, Snapshot};
use dashmap::DashMap;
use kipu_core::error::{Error, Result};
use kipu_core::{Document, Query};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

/// Unique id of a subscription within one database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw id
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What was last delivered, and where to deliver next
struct Delivery {
    last_version: Option<u64>,
    last_result: Option<Vec<Document>>,
    /// `None` once unsubscribed
    sender: Option<UnboundedSender<Snapshot>>,
}

struct SubscriptionState {
    id: SubscriptionId,
    query: Query,
    delivery: Mutex<Delivery>,
}

impl SubscriptionState {
    /// Offer an evaluated snapshot; returns true if it was sent
    fn offer(&self, snapshot: Snapshot) -> bool {
        let mut delivery = self.delivery.lock();
        if delivery.sender.is_none() {
            return false;
        }
        if let Some(last) = delivery.last_version {
            if snapshot.version <= last {
                trace!(
                    target: "kipu::live",
                    subscription = %self.id,
                    version = snapshot.version,
                    last,
                    "Dropping stale evaluation"
                );
                return false;
            }
        }

        delivery.last_version = Some(snapshot.version);
        if delivery.last_result.as_ref() == Some(&snapshot.documents) {
            return false;
        }
        delivery.last_result = Some(snapshot.documents.clone());

        let sent = delivery
            .sender
            .as_ref()
            .map(|s| s.send(snapshot).is_ok())
            .unwrap_or(false);
        if !sent {
            // Receiver gone without unsubscribing
            delivery.sender = None;
        }
        sent
    }

    fn end(&self) {
        self.delivery.lock().sender = None;
    }
}

/// Live subscription manager
///
/// Owns every active subscription of a database.
pub struct SubscriptionManager {
    queries: Arc<QueryEngine>,
    subscriptions: DashMap<SubscriptionId, Arc<SubscriptionState>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl SubscriptionManager {
    /// Create a manager evaluating through `queries`
    pub fn new(queries: Arc<QueryEngine>) -> Arc<Self> {
        Arc::new(SubscriptionManager {
            queries,
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Start a live query
    ///
    /// The current result is evaluated and delivered before this returns, so
    /// the first `try_next` on the handle always yields a snapshot.
    pub fn subscribe(self: &Arc<Self>, query: Query) -> Result<Subscription> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        self.queries.validate(&query)?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(SubscriptionState {
            id,
            query: query.clone(),
            delivery: Mutex::new(Delivery {
                last_version: None,
                last_result: None,
                sender: Some(sender),
            }),
        });
        self.subscriptions.insert(id, Arc::clone(&state));

        // Registered first: a commit racing with this evaluation is seen
        // either here or by its own notify
        let initial = self.queries.evaluate_unchecked(&state.query);
        state.offer(initial);

        // Close may have drained the map between the check and the insert
        if self.closed.load(Ordering::Acquire) {
            self.unsubscribe(id);
        }

        debug!(
            target: "kipu::live",
            subscription = %id,
            collection = query.collection_name(),
            "Subscribed"
        );

        Ok(Subscription {
            id,
            query,
            receiver,
            manager: Arc::downgrade(self),
        })
    }

    /// Stop a subscription; returns false if it was not active
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.subscriptions.remove(&id) {
            Some((_, state)) => {
                state.end();
                debug!(target: "kipu::live", subscription = %id, "Unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Re-evaluate every subscription on `collection` after a commit
    ///
    /// Returns the number of snapshots sent.
    pub fn notify(&self, collection: &str) -> usize {
        let affected: Vec<Arc<SubscriptionState>> = self
            .subscriptions
            .iter()
            .filter(|e| e.value().query.collection_name() == collection)
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut sent = 0;
        for state in affected {
            match self.queries.try_evaluate(&state.query) {
                Some(snapshot) => {
                    if state.offer(snapshot) {
                        sent += 1;
                    }
                }
                None => {
                    trace!(
                        target: "kipu::live",
                        subscription = %state.id,
                        collection,
                        "Evaluation overlapped a newer commit, abandoned"
                    );
                }
            }
        }
        sent
    }

    /// Number of active subscriptions
    pub fn active_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Unsubscribe everything and refuse new subscriptions
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<SubscriptionId> = self.subscriptions.iter().map(|e| *e.key()).collect();
        let count = ids.len();
        for id in ids {
            self.unsubscribe(id);
        }
        debug!(target: "kipu::live", count, "All subscriptions closed");
    }
}

/// Handle to a live query
///
/// Snapshots arrive on an internal channel. Dropping the handle
/// unsubscribes; after unsubscribe or database close the receiving methods
/// return `None` once any already queued snapshots are consumed.
pub struct Subscription {
    id: SubscriptionId,
    query: Query,
    receiver: UnboundedReceiver<Snapshot>,
    manager: Weak<SubscriptionManager>,
}

impl Subscription {
    /// Subscription id
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The live query
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Next queued snapshot without waiting
    pub fn try_next(&mut self) -> Option<Snapshot> {
        match self.receiver.try_recv() {
            Ok(snapshot) => Some(snapshot),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next snapshot; `None` when the subscription has ended
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.receiver.recv().await
    }

    /// Block the current thread for the next snapshot
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous runtime; use `next`
    /// there.
    pub fn blocking_next(&mut self) -> Option<Snapshot> {
        self.receiver.blocking_recv()
    }

    /// Newest queued snapshot, discarding older ones
    pub fn latest(&mut self) -> Option<Snapshot> {
        let mut newest = None;
        while let Some(snapshot) = self.try_next() {
            newest = Some(snapshot);
        }
        newest
    }

    /// Stop receiving snapshots
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("collection", &self.query.collection_name())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unsubscribe(self.id);
        }
    }
}
