//! In-process publish/subscribe bus.
//!
//! Every peer gets its own [`InMemoryTransport`] handle onto a shared
//! [`InMemoryBus`]. Publishing fans the message out to every subscriber of the
//! topic, including the publisher. Isolating a peer drops everything it sends
//! and everything addressed to it, which is enough to simulate partitions and
//! crashed peers in tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::core::error::Result;
use crate::core::transport::{Subscription, Transport};

struct Subscriber {
    peer: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct BusState {
    subscribers: HashMap<String, Vec<Subscriber>>,
    isolated: HashSet<String>,
    published: HashMap<String, u64>,
}

impl BusState {
    /// Deliver to every reachable subscriber, pruning closed channels.
    fn fan_out(&mut self, topic: &str, message: &[u8]) -> usize {
        let Some(subs) = self.subscribers.get_mut(topic) else {
            return 0;
        };
        subs.retain(|sub| !sub.tx.is_closed());
        let mut delivered = 0;
        for sub in subs.iter().filter(|sub| !self.isolated.contains(&sub.peer)) {
            if sub.tx.send(message.to_vec()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// Shared message bus. Clones refer to the same bus.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport handle for `peer_id`.
    pub fn transport(&self, peer_id: impl Into<String>) -> InMemoryTransport {
        InMemoryTransport {
            peer_id: peer_id.into(),
            bus: self.clone(),
        }
    }

    /// Drop all traffic from and to `peer_id`.
    pub fn isolate(&self, peer_id: &str) {
        self.state.lock().isolated.insert(peer_id.to_string());
        tracing::debug!(peer = peer_id, "peer isolated");
    }

    /// Undo [`isolate`](Self::isolate).
    pub fn heal(&self, peer_id: &str) {
        self.state.lock().isolated.remove(peer_id);
        tracing::debug!(peer = peer_id, "peer reconnected");
    }

    /// Whether `peer_id` is currently isolated.
    pub fn is_isolated(&self, peer_id: &str) -> bool {
        self.state.lock().isolated.contains(peer_id)
    }

    /// Deliver raw bytes on `topic` as if some peer had published them.
    /// Returns the number of subscribers reached.
    pub fn inject(&self, topic: &str, message: &[u8]) -> usize {
        self.state.lock().fan_out(topic, message)
    }

    /// Messages accepted for publication on `topic`.
    pub fn published(&self, topic: &str) -> u64 {
        self.state.lock().published.get(topic).copied().unwrap_or(0)
    }
}

impl std::fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryBus")
            .field("topics", &state.subscribers.len())
            .field("isolated", &state.isolated)
            .finish()
    }
}

/// One peer's handle onto an [`InMemoryBus`].
#[derive(Clone, Debug)]
pub struct InMemoryTransport {
    peer_id: String,
    bus: InMemoryBus,
}

impl InMemoryTransport {
    /// Peer this handle publishes as.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, topic: &str, message: Vec<u8>) -> Result<()> {
        let mut state = self.bus.state.lock();
        if state.isolated.contains(&self.peer_id) {
            tracing::debug!(peer = %self.peer_id, topic, "isolated peer, message dropped");
            return Ok(());
        }
        *state.published.entry(topic.to_string()).or_insert(0) += 1;
        let delivered = state.fan_out(topic, &message);
        tracing::trace!(peer = %self.peer_id, topic, delivered, "published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.bus
            .state
            .lock()
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                peer: self.peer_id.clone(),
                tx,
            });
        Ok(Subscription::new(topic.to_string(), rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber_including_self() {
        let bus = InMemoryBus::new();
        let a = bus.transport("a");
        let b = bus.transport("b");
        let mut sub_a = a.subscribe("t").await.unwrap();
        let mut sub_b = b.subscribe("t").await.unwrap();

        a.publish("t", b"hello".to_vec()).await.unwrap();
        assert_eq!(sub_a.recv().await.unwrap(), b"hello");
        assert_eq!(sub_b.recv().await.unwrap(), b"hello");
        assert_eq!(bus.published("t"), 1);
    }

    #[tokio::test]
    async fn test_isolated_peer_neither_sends_nor_receives() {
        let bus = InMemoryBus::new();
        let a = bus.transport("a");
        let b = bus.transport("b");
        let mut sub_b = b.subscribe("t").await.unwrap();
        let mut sub_a = a.subscribe("t").await.unwrap();

        bus.isolate("a");
        a.publish("t", b"lost".to_vec()).await.unwrap();
        b.publish("t", b"to-b-only".to_vec()).await.unwrap();
        assert_eq!(sub_b.recv().await.unwrap(), b"to-b-only");
        assert!(sub_a.try_recv().is_none());

        bus.heal("a");
        a.publish("t", b"back".to_vec()).await.unwrap();
        assert_eq!(sub_a.recv().await.unwrap(), b"back");
    }

    #[tokio::test]
    async fn test_inject_delivers_raw_bytes() {
        let bus = InMemoryBus::new();
        let mut sub = bus.transport("a").subscribe("t").await.unwrap();
        assert_eq!(bus.inject("t", b"{}"), 1);
        assert_eq!(sub.recv().await.unwrap(), b"{}");
        assert_eq!(bus.inject("other", b"{}"), 0);
    }
}
