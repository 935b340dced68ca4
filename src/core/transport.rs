//! Publish/subscribe transport abstraction.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::error::Result;

/// Stream of raw messages for one topic.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Subscription {
    /// Wrap a receiver fed by a transport.
    pub const fn new(topic: String, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { topic, rx }
    }

    /// Topic this subscription listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message, or `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}

/// At-least-once, unordered topic delivery between peers.
///
/// Implementations may deliver a message more than once and in any order
/// relative to other publishers. A publisher receives its own messages if it is
/// subscribed to the topic.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish raw bytes on `topic`.
    async fn publish(&self, topic: &str, message: Vec<u8>) -> Result<()>;

    /// Subscribe to every message published on `topic` from now on.
    async fn subscribe(&self, topic: &str) -> Result<Subscription>;
}

/// Blanket implementation so `Arc<dyn Transport>` can be used directly.
#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn publish(&self, topic: &str, message: Vec<u8>) -> Result<()> {
        (**self).publish(topic, message).await
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        (**self).subscribe(topic).await
    }
}
