//! The publish/subscribe client boundary.
//!
//! A [`TopicClient`] publishes values to, and opens subscriptions on, topics
//! scoped by a cache name. Implementations are expected to be connected
//! already; this crate never retries or reconnects.
mod memory;

pub use memory::{MemoryTopicBus, MemoryTopicClient, MemoryTopicSubscription, POLL_INTERVAL};

use crate::context::CancellationToken;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("Topic client closed")]
    Closed,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Subscribe failed: {0}")]
    Subscribe(String),
    #[error("Publish failed: {0}")]
    Publish(String),
}

/// A single item delivered on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicValue {
    String(String),
    Bytes(Vec<u8>),
}

impl TopicValue {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TopicValue::String(s) => s.as_bytes(),
            TopicValue::Bytes(b) => b,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<String> for TopicValue {
    fn from(value: String) -> Self {
        TopicValue::String(value)
    }
}

impl From<&str> for TopicValue {
    fn from(value: &str) -> Self {
        TopicValue::String(value.to_owned())
    }
}

impl From<Vec<u8>> for TopicValue {
    fn from(value: Vec<u8>) -> Self {
        TopicValue::Bytes(value)
    }
}

pub trait TopicClient: Send + Sync {
    fn publish(
        &self,
        ctx: &CancellationToken,
        cache_name: &str,
        topic: &str,
        value: TopicValue,
    ) -> Result<(), PubSubError>;

    fn subscribe(
        &self,
        cache_name: &str,
        topic: &str,
    ) -> Result<Box<dyn TopicSubscription>, PubSubError>;

    /// Release the client. Must be safe to call more than once and should make
    /// any pull blocked in [`TopicSubscription::item`] return an error.
    fn close(&self);
}

pub trait TopicSubscription: Send {
    /// Block until the next item arrives, the token is cancelled or the
    /// owning client is closed.
    fn item(&mut self, ctx: &CancellationToken) -> Result<TopicValue, PubSubError>;
}
