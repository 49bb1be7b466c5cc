//! Live connection registry with best-effort fan-out.
//!
//! Maps each identity to the outbound sinks of its live stream sessions.
//! An identity is present only while it has at least one connection.
//! `send_to` snapshots the recipient's sinks under the read lock, delivers
//! outside the lock, and evicts every sink whose delivery failed. An evicted
//! sink is told through [`MessageSink::on_evicted`] so its owning session can
//! end instead of lingering unreachable.

use crate::observability::metrics;
use common::identity::normalize_identity;
use proto_gen::chat::ChatStreamResponse;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Registry-scoped connection id. Never reused within one registry.
pub type ConnectionId = u64;

/// Why a single delivery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The connection's outbound buffer is full.
    #[error("connection buffer full")]
    Full,
    /// The connection's receiving side is gone.
    #[error("connection closed")]
    Closed,
}

/// Outcome of a failed `send_to`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The identity has no registered connections.
    #[error("recipient not connected")]
    NotConnected,
    /// At least one connection failed; those connections were evicted.
    #[error("delivery failed on {failed} of {attempted} connections: {first}")]
    Delivery {
        first: DeliveryError,
        failed: usize,
        attempted: usize,
    },
}

/// Something that can accept one pushed message without blocking.
pub trait MessageSink: Send + Sync {
    /// Push `message`. Must not block.
    ///
    /// # Errors
    ///
    /// Returns a `DeliveryError` if the message could not be queued.
    fn deliver(&self, message: ChatStreamResponse) -> Result<(), DeliveryError>;

    /// Called once after a failed delivery removed this sink from the registry.
    fn on_evicted(&self) {}
}

impl MessageSink for mpsc::Sender<Result<ChatStreamResponse, Status>> {
    fn deliver(&self, message: ChatStreamResponse) -> Result<(), DeliveryError> {
        self.try_send(Ok(message)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Outbound sink of a live stream session.
///
/// Eviction cancels `evicted`, which the owning session watches.
#[derive(Debug, Clone)]
pub struct SessionSink {
    outbound: mpsc::Sender<Result<ChatStreamResponse, Status>>,
    evicted: CancellationToken,
}

impl SessionSink {
    #[must_use]
    pub fn new(
        outbound: mpsc::Sender<Result<ChatStreamResponse, Status>>,
        evicted: CancellationToken,
    ) -> Self {
        Self { outbound, evicted }
    }
}

impl MessageSink for SessionSink {
    fn deliver(&self, message: ChatStreamResponse) -> Result<(), DeliveryError> {
        self.outbound.deliver(message)
    }

    fn on_evicted(&self) {
        self.evicted.cancel();
    }
}

type ConnectionMap = HashMap<String, HashMap<ConnectionId, Arc<dyn MessageSink>>>;

/// Process-local registry of live connections.
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    active: AtomicUsize,
    connections: RwLock<ConnectionMap>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: AtomicUsize::new(0),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register `sink` under `identity` and return its connection id.
    pub fn register(&self, identity: &str, sink: Arc<dyn MessageSink>) -> ConnectionId {
        let identity = normalize_identity(identity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        connections.entry(identity).or_default().insert(id, sink);
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        drop(connections);

        metrics::set_connections_active(active);
        tracing::debug!(target: "chat.registry", connection_id = id, active, "Connection registered");
        id
    }

    /// Remove one connection. Absent connections are ignored.
    ///
    /// Returns whether a connection was removed.
    pub fn unregister(&self, identity: &str, id: ConnectionId) -> bool {
        let identity = normalize_identity(identity);
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = remove_locked(&mut connections, &identity, id);
        let active = removed.then(|| self.active.fetch_sub(1, Ordering::Relaxed) - 1);
        drop(connections);

        if let Some(active) = active {
            metrics::set_connections_active(active);
            tracing::debug!(target: "chat.registry", connection_id = id, active, "Connection unregistered");
        }
        removed
    }

    /// Deliver `message` to every connection registered for `identity`.
    ///
    /// Every connection is attempted even after a failure. Failed connections
    /// are unregistered and notified through [`MessageSink::on_evicted`].
    /// Returns the number of successful deliveries.
    ///
    /// # Errors
    ///
    /// - `SendError::NotConnected` if the identity has no connections
    /// - `SendError::Delivery` carrying the first failure if any delivery failed
    pub fn send_to(
        &self,
        identity: &str,
        message: &ChatStreamResponse,
    ) -> Result<usize, SendError> {
        let identity = normalize_identity(identity);

        let targets: Vec<(ConnectionId, Arc<dyn MessageSink>)> = {
            let connections = self
                .connections
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match connections.get(&identity) {
                Some(set) => set.iter().map(|(id, sink)| (*id, Arc::clone(sink))).collect(),
                None => return Err(SendError::NotConnected),
            }
        };

        let attempted = targets.len();
        let mut delivered = 0;
        let mut first_error = None;
        let mut failed = Vec::new();

        for (id, sink) in targets {
            match sink.deliver(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        target: "chat.registry",
                        connection_id = id,
                        error = %e,
                        "Delivery failed, evicting connection"
                    );
                    first_error.get_or_insert(e);
                    failed.push((id, sink));
                }
            }
        }

        metrics::record_fanout(delivered, failed.len());

        for (id, sink) in &failed {
            if self.unregister(&identity, *id) {
                sink.on_evicted();
            }
        }

        match first_error {
            None => Ok(delivered),
            Some(first) => Err(SendError::Delivery {
                first,
                failed: failed.len(),
                attempted,
            }),
        }
    }

    /// Number of connections registered for `identity`.
    #[must_use]
    pub fn connection_count(&self, identity: &str) -> usize {
        let identity = normalize_identity(identity);
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&identity)
            .map_or(0, HashMap::len)
    }

    /// Whether `identity` has any connections.
    #[must_use]
    pub fn is_connected(&self, identity: &str) -> bool {
        self.connection_count(identity) > 0
    }

    /// Number of identities with at least one connection.
    #[must_use]
    pub fn identity_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total number of registered connections.
    #[must_use]
    pub fn total_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

fn remove_locked(connections: &mut ConnectionMap, identity: &str, id: ConnectionId) -> bool {
    let Some(set) = connections.get_mut(identity) else {
        return false;
    };
    let removed = set.remove(&id).is_some();
    if set.is_empty() {
        connections.remove(identity);
    }
    removed
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        received: Mutex<Vec<ChatStreamResponse>>,
    }

    impl MessageSink for Recorder {
        fn deliver(&self, message: ChatStreamResponse) -> Result<(), DeliveryError> {
            self.received.lock().unwrap().push(message);
            Ok(())
        }
    }

    impl Recorder {
        fn count(&self) -> usize {
            self.received.lock().unwrap().len()
        }
    }

    struct Broken;

    impl MessageSink for Broken {
        fn deliver(&self, _message: ChatStreamResponse) -> Result<(), DeliveryError> {
            Err(DeliveryError::Closed)
        }
    }

    fn message(content: &str) -> ChatStreamResponse {
        ChatStreamResponse {
            msg_id: "m1".to_string(),
            from_email: "alice@example.com".to_string(),
            content: content.to_string(),
            sent_at: None,
        }
    }

    #[test]
    fn test_ids_unique_and_increasing() {
        let registry = ConnectionRegistry::new();
        let a = registry.register("a@example.com", Arc::new(Recorder::default()));
        let b = registry.register("a@example.com", Arc::new(Recorder::default()));
        let c = registry.register("b@example.com", Arc::new(Recorder::default()));

        assert!(a < b && b < c);
        assert_eq!(registry.total_connections(), 3);
    }

    #[test]
    fn test_send_to_all_connections() {
        let registry = ConnectionRegistry::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        registry.register("bob@example.com", first.clone());
        registry.register("bob@example.com", second.clone());

        let delivered = registry.send_to("bob@example.com", &message("hi")).unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
    }

    #[test]
    fn test_identity_normalized() {
        let registry = ConnectionRegistry::new();
        let sink = Arc::new(Recorder::default());
        let id = registry.register(" Bob@Example.COM", sink.clone());

        registry.send_to("bob@example.com", &message("hi")).unwrap();
        assert_eq!(sink.count(), 1);

        assert!(registry.unregister("BOB@example.com ", id));
        assert!(!registry.is_connected("bob@example.com"));
    }

    #[test]
    fn test_not_connected() {
        let registry = ConnectionRegistry::new();
        assert_eq!(
            registry.send_to("nobody@example.com", &message("hi")),
            Err(SendError::NotConnected)
        );
    }

    #[test]
    fn test_not_connected_after_last_unregister() {
        let registry = ConnectionRegistry::new();
        let id = registry.register("a@example.com", Arc::new(Recorder::default()));
        registry.unregister("a@example.com", id);

        assert_eq!(registry.identity_count(), 0);
        assert_eq!(
            registry.send_to("a@example.com", &message("hi")),
            Err(SendError::NotConnected)
        );
    }

    #[test]
    fn test_partial_failure_evicts_broken_connection() {
        let registry = ConnectionRegistry::new();
        let healthy = Arc::new(Recorder::default());
        registry.register("bob@example.com", healthy.clone());
        registry.register("bob@example.com", Arc::new(Broken));

        let result = registry.send_to("bob@example.com", &message("one"));
        assert_eq!(
            result,
            Err(SendError::Delivery {
                first: DeliveryError::Closed,
                failed: 1,
                attempted: 2
            })
        );
        assert_eq!(healthy.count(), 1);
        assert_eq!(registry.connection_count("bob@example.com"), 1);

        assert_eq!(registry.send_to("bob@example.com", &message("two")), Ok(1));
        assert_eq!(healthy.count(), 2);
    }

    #[test]
    fn test_all_failed_removes_identity() {
        let registry = ConnectionRegistry::new();
        registry.register("bob@example.com", Arc::new(Broken));

        assert!(registry.send_to("bob@example.com", &message("hi")).is_err());
        assert_eq!(registry.identity_count(), 0);
        assert_eq!(registry.total_connections(), 0);
    }

    #[test]
    fn test_unregister_idempotent() {
        let registry = ConnectionRegistry::new();
        let keep = Arc::new(Recorder::default());
        let id = registry.register("a@example.com", Arc::new(Recorder::default()));
        registry.register("a@example.com", keep.clone());

        assert!(registry.unregister("a@example.com", id));
        assert!(!registry.unregister("a@example.com", id));
        assert!(!registry.unregister("ghost@example.com", id));

        assert_eq!(registry.connection_count("a@example.com"), 1);
        registry.send_to("a@example.com", &message("hi")).unwrap();
        assert_eq!(keep.count(), 1);
        assert_eq!(registry.total_connections(), 1);
    }

    #[test]
    fn test_unregister_after_eviction_is_noop() {
        let registry = ConnectionRegistry::new();
        let id = registry.register("a@example.com", Arc::new(Broken));
        let _ = registry.send_to("a@example.com", &message("hi"));

        assert!(!registry.unregister("a@example.com", id));
        assert_eq!(registry.total_connections(), 0);
    }

    #[test]
    fn test_mpsc_sink_full_and_closed() {
        let (tx, mut rx) = mpsc::channel::<Result<ChatStreamResponse, Status>>(1);

        assert_eq!(tx.deliver(message("1")), Ok(()));
        assert_eq!(tx.deliver(message("2")), Err(DeliveryError::Full));

        let received = rx.try_recv().unwrap().unwrap();
        assert_eq!(received.content, "1");

        drop(rx);
        assert_eq!(tx.deliver(message("3")), Err(DeliveryError::Closed));
    }

    #[test]
    fn test_session_sink_cancelled_on_eviction() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        let evicted = CancellationToken::new();
        registry.register("bob@example.com", Arc::new(SessionSink::new(tx, evicted.clone())));

        assert_eq!(registry.send_to("bob@example.com", &message("1")), Ok(1));
        assert!(!evicted.is_cancelled());

        let result = registry.send_to("bob@example.com", &message("2"));
        assert!(matches!(
            result,
            Err(SendError::Delivery {
                first: DeliveryError::Full,
                ..
            })
        ));
        assert!(evicted.is_cancelled());
        assert!(!registry.is_connected("bob@example.com"));

        assert_eq!(rx.try_recv().unwrap().unwrap().content, "1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_healthy_session_sink_not_cancelled_by_neighbour_failure() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let evicted = CancellationToken::new();
        registry.register("bob@example.com", Arc::new(SessionSink::new(tx, evicted.clone())));
        registry.register("bob@example.com", Arc::new(Broken));

        assert!(registry.send_to("bob@example.com", &message("hi")).is_err());
        assert!(!evicted.is_cancelled());
        assert_eq!(registry.connection_count("bob@example.com"), 1);
    }

    #[test]
    fn test_concurrent_eviction_keeps_count_consistent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let senders: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let _ = registry.send_to("bob@example.com", &message("x"));
                    }
                })
            })
            .collect();
        let registrars: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let id = registry.register("bob@example.com", Arc::new(Broken));
                        registry.unregister("bob@example.com", id);
                    }
                })
            })
            .collect();

        for handle in senders.into_iter().chain(registrars) {
            handle.join().unwrap();
        }
        assert_eq!(registry.total_connections(), 0);
        assert_eq!(registry.identity_count(), 0);
    }

    #[test]
    fn test_concurrent_register_unregister() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let identity = format!("user{}@example.com", t % 2);
                    for _ in 0..100 {
                        let id = registry.register(&identity, Arc::new(Recorder::default()));
                        let _ = registry.send_to(&identity, &message("x"));
                        assert!(registry.unregister(&identity, id));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.total_connections(), 0);
        assert_eq!(registry.identity_count(), 0);
    }
}
