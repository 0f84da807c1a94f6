//! Connection Registry
//!
//! Maps each live client connection to its subscription set. Mutations
//! (register, subscribe, unsubscribe, unregister) take the write lock;
//! topic matching takes the read lock just long enough to clone the
//! matching handles, never across I/O.

use super::ClientSink;
use crate::core::Topic;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Connection identity, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Shared handle to one connection's write side
pub struct ConnectionHandle<S> {
    id: ConnectionId,
    sink: S,
    /// Consecutive failed deliveries
    failures: AtomicU32,
    /// Flipped once, when the registry drops this connection
    removed: watch::Sender<bool>,
}

impl<S: ClientSink> ConnectionHandle<S> {
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Count a failed delivery, returning the new streak length
    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
    }

    pub fn failure_streak(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Whether the registry no longer holds this connection
    pub fn is_removed(&self) -> bool {
        *self.removed.borrow()
    }

    /// Resolves once the connection has been unregistered, by its own
    /// session or by fan-out eviction.
    pub async fn removed(&self) {
        let mut rx = self.removed.subscribe();
        // The sender lives in `self`, so this only returns once flipped
        let _ = rx.wait_for(|removed| *removed).await;
    }

    fn mark_removed(&self) {
        self.removed.send_replace(true);
    }
}

struct ConnectionEntry<S> {
    handle: Arc<ConnectionHandle<S>>,
    topics: HashSet<Topic>,
}

/// Registry of live client connections
pub struct ConnectionRegistry<S> {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry<S>>>,
    next_id: AtomicU64,
}

impl<S: ClientSink> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh connection id
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Add a connection with an empty subscription set.
    ///
    /// Registering an id twice keeps the first entry (and its sink).
    pub fn register(&self, id: ConnectionId, sink: S) -> Arc<ConnectionHandle<S>> {
        let mut connections = self.connections.write();
        let entry = connections.entry(id).or_insert_with(|| ConnectionEntry {
            handle: Arc::new(ConnectionHandle {
                id,
                sink,
                failures: AtomicU32::new(0),
                removed: watch::channel(false).0,
            }),
            topics: HashSet::new(),
        });
        entry.handle.clone()
    }

    /// Remove a connection and signal its session. Returns its handle the
    /// first time only.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle<S>>> {
        let entry = self.connections.write().remove(&id)?;
        entry.handle.mark_removed();
        Some(entry.handle)
    }

    /// Add topics to a connection's set.
    ///
    /// Returns false, changing nothing, if the connection is not registered.
    pub fn subscribe<I>(&self, id: ConnectionId, topics: I) -> bool
    where
        I: IntoIterator<Item = Topic>,
    {
        let mut connections = self.connections.write();
        match connections.get_mut(&id) {
            Some(entry) => {
                entry
                    .topics
                    .extend(topics.into_iter().filter(|t| !t.is_empty()));
                true
            }
            None => false,
        }
    }

    /// Remove topics from a connection's set.
    ///
    /// Returns false if the connection is not registered.
    pub fn unsubscribe<I>(&self, id: ConnectionId, topics: I) -> bool
    where
        I: IntoIterator<Item = Topic>,
    {
        let mut connections = self.connections.write();
        match connections.get_mut(&id) {
            Some(entry) => {
                for topic in topics {
                    entry.topics.remove(&topic);
                }
                true
            }
            None => false,
        }
    }

    /// Snapshot of the connections currently subscribed to `topic`
    pub fn matching_connections(&self, topic: &Topic) -> Vec<Arc<ConnectionHandle<S>>> {
        self.connections
            .read()
            .values()
            .filter(|entry| entry.topics.contains(topic))
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// A connection's topics, sorted. `None` if not registered.
    pub fn topics(&self, id: ConnectionId) -> Option<Vec<Topic>> {
        self.connections.read().get(&id).map(|entry| {
            let mut topics: Vec<Topic> = entry.topics.iter().cloned().collect();
            topics.sort();
            topics
        })
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Total (connection, topic) pairs
    pub fn subscription_count(&self) -> usize {
        self.connections
            .read()
            .values()
            .map(|entry| entry.topics.len())
            .sum()
    }
}

impl<S: ClientSink> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
