//! The broker seam.
//!
//! The data layer consumes a pub/sub transport through this trait: it
//! subscribes to channels it wants invalidation signals from, publishes
//! change notifications, and installs middleware that gates inbound
//! client actions. Real deployments bind this to their socket broker;
//! tests and single-process embedders use [`MemoryBroker`].
//!
//! [`MemoryBroker`]: crate::memory::MemoryBroker

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::middleware::{MiddlewareError, MiddlewareHandler, MiddlewareKind};
use crate::stream::MessageStream;

/// Errors surfaced by broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
   /// A server-side channel subscription could not be established.
   #[error("subscription to channel '{channel}' failed: {reason}")]
   SubscribeFailed { channel: String, reason: String },

   /// An inbound client action was rejected by middleware.
   #[error("inbound request rejected")]
   Rejected(#[source] MiddlewareError),

   /// A publish could not be delivered.
   #[error("publish to channel '{channel}' failed: {reason}")]
   PublishFailed { channel: String, reason: String },
}

/// Pub/sub transport consumed by the data layer.
#[async_trait]
pub trait Broker: Send + Sync {
   /// Installs a middleware handler gating inbound client actions.
   fn add_middleware(&self, kind: MiddlewareKind, handler: MiddlewareHandler);

   /// Establishes a server-side subscription to a channel.
   async fn subscribe(&self, channel: &str) -> Result<(), BrokerError>;

   /// Drops the server-side subscription; the channel object survives
   /// until destroyed.
   fn unsubscribe(&self, channel: &str);

   /// Destroys a channel and all its local state.
   fn destroy_channel(&self, channel: &str);

   /// Watches a channel's messages. Watching does not by itself
   /// establish a subscription.
   fn watch(&self, channel: &str) -> MessageStream;

   /// Whether a subscription exists; `include_pending` also counts
   /// subscriptions still being established.
   fn is_subscribed(&self, channel: &str, include_pending: bool) -> bool;

   /// Publishes a message to a channel. `None` is the empty message.
   async fn publish(&self, channel: &str, message: Option<JsonValue>) -> Result<(), BrokerError>;
}
