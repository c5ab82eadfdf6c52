//! Message bus abstraction.
//!
//! The bridge publishes through a [`MessageBus`] and learns about connection
//! changes and inbound messages through a channel of [`BusEvent`]s. Connection
//! establishment, authentication and reconnects belong to the transport.

use async_trait::async_trait;
use thiserror::Error;

/// Publish/subscribe operations the bridge needs from the transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Subscribe to a topic filter (may contain MQTT wildcards).
    async fn subscribe(&self, filter: &str) -> BusResult<()>;
}

/// Notifications produced by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// The broker accepted the connection (initial or after a reconnect).
    Connected,

    /// A message arrived on a subscribed topic.
    Message {
        /// Full topic the message was published on.
        topic: String,
        /// Raw payload bytes.
        payload: Vec<u8>,
    },

    /// The transport reported a connection error. It keeps retrying on its own.
    Error(String),
}

/// Errors returned by [`MessageBus`] operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The request could not be handed to the transport.
    #[error("Failed to publish to '{topic}': {message}")]
    PublishFailed {
        /// Target topic.
        topic: String,
        /// Transport detail.
        message: String,
    },

    /// The subscription request could not be handed to the transport.
    #[error("Failed to subscribe to '{filter}': {message}")]
    SubscribeFailed {
        /// Requested filter.
        filter: String,
        /// Transport detail.
        message: String,
    },

    /// The transport has shut down.
    #[error("Message bus is closed")]
    Closed,
}

/// Result alias for bus operations.
pub type BusResult<T> = std::result::Result<T, BusError>;

#[cfg(feature = "in-memory")]
pub use memory::{MemoryBus, PublishedMessage};

#[cfg(feature = "in-memory")]
mod memory {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::{BusError, BusResult, MessageBus};

    /// A message recorded by [`MemoryBus`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct PublishedMessage {
        /// Topic it was published on.
        pub topic: String,
        /// Payload bytes.
        pub payload: Vec<u8>,
    }

    impl PublishedMessage {
        /// Payload decoded as UTF-8 (lossy).
        #[must_use]
        pub fn payload_str(&self) -> String {
            String::from_utf8_lossy(&self.payload).into_owned()
        }
    }

    #[derive(Debug, Default)]
    struct Recorded {
        published: Vec<PublishedMessage>,
        subscriptions: Vec<String>,
        failing: bool,
    }

    /// In-memory bus that records every publish and subscription.
    ///
    /// Used for tests and dry runs; nothing is delivered anywhere.
    #[derive(Debug, Default)]
    pub struct MemoryBus {
        recorded: Mutex<Recorded>,
        notify: Notify,
    }

    impl MemoryBus {
        /// Create an empty bus.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make subsequent publishes fail with [`BusError::PublishFailed`].
        pub fn set_failing(&self, failing: bool) {
            self.lock().failing = failing;
        }

        /// Snapshot of all published messages, in publish order.
        #[must_use]
        pub fn published(&self) -> Vec<PublishedMessage> {
            self.lock().published.clone()
        }

        /// Messages published on exactly `topic`, in publish order.
        #[must_use]
        pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
            self.lock()
                .published
                .iter()
                .filter(|message| message.topic == topic)
                .cloned()
                .collect()
        }

        /// Last payload published on `topic`, as text.
        #[must_use]
        pub fn last_payload(&self, topic: &str) -> Option<String> {
            self.published_on(topic)
                .last()
                .map(PublishedMessage::payload_str)
        }

        /// Filters subscribed so far.
        #[must_use]
        pub fn subscriptions(&self) -> Vec<String> {
            self.lock().subscriptions.clone()
        }

        /// Forget everything recorded so far.
        pub fn clear(&self) {
            let mut recorded = self.lock();
            recorded.published.clear();
            recorded.subscriptions.clear();
        }

        /// Wait until at least `count` messages have been published on `topic`.
        pub async fn wait_for(&self, topic: &str, count: usize) -> Vec<PublishedMessage> {
            loop {
                let notified = self.notify.notified();
                let matching = self.published_on(topic);
                if matching.len() >= count {
                    return matching;
                }
                notified.await;
            }
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
            self.recorded
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    #[async_trait]
    impl MessageBus for MemoryBus {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> BusResult<()> {
            {
                let mut recorded = self.lock();
                if recorded.failing {
                    return Err(BusError::PublishFailed {
                        topic: topic.to_string(),
                        message: "memory bus set to fail".to_string(),
                    });
                }
                recorded.published.push(PublishedMessage {
                    topic: topic.to_string(),
                    payload,
                });
            }
            self.notify.notify_waiters();
            Ok(())
        }

        async fn subscribe(&self, filter: &str) -> BusResult<()> {
            self.lock().subscriptions.push(filter.to_string());
            self.notify.notify_waiters();
            Ok(())
        }
    }
}
