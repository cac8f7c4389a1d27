//! Inbound-request middleware.
//!
//! Middleware gates what clients may do; server-side actions never pass
//! through it. Handlers run in registration order and the first rejection
//! stops the chain.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;

/// Which inbound action a middleware chain guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MiddlewareKind {
   /// A client emitted an event at the server.
   Emit,
   /// A client asked to publish to a channel.
   PublishIn,
   /// A client asked to subscribe to a channel.
   Subscribe,
}

/// An inbound client request as seen by middleware.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
   pub socket_id: Option<String>,
   pub event: Option<String>,
   pub channel: Option<String>,
   pub data: Option<JsonValue>,
   pub auth_token: Option<JsonValue>,
}

/// Error type a middleware handler rejects with. Callers downcast to
/// recover the concrete error.
pub type MiddlewareError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One middleware handler.
pub type MiddlewareHandler =
   Arc<dyn Fn(InboundRequest) -> BoxFuture<'static, Result<(), MiddlewareError>> + Send + Sync>;

/// Ordered middleware chains, one per [`MiddlewareKind`].
#[derive(Default)]
pub struct MiddlewareStack {
   handlers: RwLock<HashMap<MiddlewareKind, Vec<MiddlewareHandler>>>,
}

impl MiddlewareStack {
   pub fn new() -> Self {
      Self::default()
   }

   /// Appends a handler to the chain for `kind`.
   pub fn add(&self, kind: MiddlewareKind, handler: MiddlewareHandler) {
      self.handlers.write().entry(kind).or_default().push(handler);
   }

   /// Runs the chain for `kind`; the first rejection wins. An empty
   /// chain admits.
   pub async fn run(&self, kind: MiddlewareKind, request: &InboundRequest) -> Result<(), MiddlewareError> {
      let handlers: Vec<MiddlewareHandler> =
         self.handlers.read().get(&kind).cloned().unwrap_or_default();
      for handler in handlers {
         handler(request.clone()).await?;
      }
      Ok(())
   }
}

impl std::fmt::Debug for MiddlewareStack {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      let handlers = self.handlers.read();
      f.debug_struct("MiddlewareStack")
         .field("emit", &handlers.get(&MiddlewareKind::Emit).map_or(0, Vec::len))
         .field("publish_in", &handlers.get(&MiddlewareKind::PublishIn).map_or(0, Vec::len))
         .field("subscribe", &handlers.get(&MiddlewareKind::Subscribe).map_or(0, Vec::len))
         .finish()
   }
}
