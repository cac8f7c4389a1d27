//! In-process broker backed by broadcast channels.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::broker::{Broker, BrokerError};
use crate::middleware::{InboundRequest, MiddlewareHandler, MiddlewareKind, MiddlewareStack};
use crate::stream::MessageStream;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelLifecycle {
   /// The channel exists (someone watches or subscription is underway)
   /// but no subscription is established.
   Pending,
   Subscribed,
}

struct ChannelSlot {
   tx: broadcast::Sender<Option<JsonValue>>,
   lifecycle: ChannelLifecycle,
}

/// Single-process [`Broker`] implementation.
///
/// Topics are broadcast channels; middleware chains gate the simulated
/// inbound client actions ([`inbound_emit`], [`inbound_subscribe`],
/// [`inbound_publish`]). Cheap to clone.
///
/// [`inbound_emit`]: MemoryBroker::inbound_emit
/// [`inbound_subscribe`]: MemoryBroker::inbound_subscribe
/// [`inbound_publish`]: MemoryBroker::inbound_publish
pub struct MemoryBroker {
   inner: Arc<MemoryBrokerInner>,
}

struct MemoryBrokerInner {
   channels: RwLock<HashMap<String, ChannelSlot>>,
   middleware: MiddlewareStack,
   capacity: usize,
}

impl MemoryBroker {
   pub fn new() -> Self {
      Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
   }

   /// Creates a broker whose per-channel buffers hold `capacity`
   /// messages before slow watchers lag.
   pub fn with_capacity(capacity: usize) -> Self {
      Self {
         inner: Arc::new(MemoryBrokerInner {
            channels: RwLock::new(HashMap::new()),
            middleware: MiddlewareStack::new(),
            capacity,
         }),
      }
   }

   /// Runs an inbound emit through the emit middleware chain.
   pub async fn inbound_emit(&self, request: InboundRequest) -> Result<(), BrokerError> {
      self
         .inner
         .middleware
         .run(MiddlewareKind::Emit, &request)
         .await
         .map_err(BrokerError::Rejected)
   }

   /// Runs an inbound subscribe through middleware and, on admission,
   /// establishes the subscription.
   pub async fn inbound_subscribe(&self, request: InboundRequest) -> Result<(), BrokerError> {
      self
         .inner
         .middleware
         .run(MiddlewareKind::Subscribe, &request)
         .await
         .map_err(BrokerError::Rejected)?;
      if let Some(channel) = &request.channel {
         self.establish(channel);
      }
      Ok(())
   }

   /// Runs an inbound publish through middleware and, on admission,
   /// delivers the message.
   pub async fn inbound_publish(&self, request: InboundRequest) -> Result<(), BrokerError> {
      self
         .inner
         .middleware
         .run(MiddlewareKind::PublishIn, &request)
         .await
         .map_err(BrokerError::Rejected)?;
      if let Some(channel) = &request.channel {
         self.publish(channel, request.data.clone()).await?;
      }
      Ok(())
   }

   fn establish(&self, channel: &str) {
      let mut channels = self.inner.channels.write();
      let slot = channels.entry(channel.to_string()).or_insert_with(|| ChannelSlot {
         tx: broadcast::channel(self.inner.capacity).0,
         lifecycle: ChannelLifecycle::Pending,
      });
      slot.lifecycle = ChannelLifecycle::Subscribed;
   }
}

impl Default for MemoryBroker {
   fn default() -> Self {
      Self::new()
   }
}

impl Clone for MemoryBroker {
   fn clone(&self) -> Self {
      Self {
         inner: Arc::clone(&self.inner),
      }
   }
}

impl std::fmt::Debug for MemoryBroker {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("MemoryBroker")
         .field("channels", &self.inner.channels.read().len())
         .finish()
   }
}

#[async_trait]
impl Broker for MemoryBroker {
   fn add_middleware(&self, kind: MiddlewareKind, handler: MiddlewareHandler) {
      self.inner.middleware.add(kind, handler);
   }

   async fn subscribe(&self, channel: &str) -> Result<(), BrokerError> {
      debug!(channel, "subscribing");
      self.establish(channel);
      Ok(())
   }

   fn unsubscribe(&self, channel: &str) {
      let mut channels = self.inner.channels.write();
      if let Some(slot) = channels.get_mut(channel) {
         slot.lifecycle = ChannelLifecycle::Pending;
      }
   }

   fn destroy_channel(&self, channel: &str) {
      debug!(channel, "destroying channel");
      self.inner.channels.write().remove(channel);
   }

   fn watch(&self, channel: &str) -> MessageStream {
      let mut channels = self.inner.channels.write();
      let slot = channels.entry(channel.to_string()).or_insert_with(|| ChannelSlot {
         tx: broadcast::channel(self.inner.capacity).0,
         lifecycle: ChannelLifecycle::Pending,
      });
      MessageStream::new(slot.tx.subscribe(), channel)
   }

   fn is_subscribed(&self, channel: &str, include_pending: bool) -> bool {
      let channels = self.inner.channels.read();
      match channels.get(channel) {
         Some(slot) => include_pending || slot.lifecycle == ChannelLifecycle::Subscribed,
         None => false,
      }
   }

   async fn publish(&self, channel: &str, message: Option<JsonValue>) -> Result<(), BrokerError> {
      let channels = self.inner.channels.read();
      match channels.get(channel) {
         Some(slot) => {
            // Send fails only when nobody watches; that is fine.
            let _ = slot.tx.send(message);
         }
         None => {
            trace!(channel, "publish to channel with no watchers dropped");
         }
      }
      Ok(())
   }
}
