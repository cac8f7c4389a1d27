//! Broker seam for the crud-relay data layer.
//!
//! Defines the [`Broker`] trait the data layer publishes and subscribes
//! through, the middleware chain that gates inbound client actions, a
//! lag-tolerant message stream, and [`MemoryBroker`], an in-process
//! implementation for tests and single-process embedders.

pub mod broker;
pub mod memory;
pub mod middleware;
pub mod stream;

pub use broker::{Broker, BrokerError};
pub use memory::MemoryBroker;
pub use middleware::{
   InboundRequest, MiddlewareError, MiddlewareHandler, MiddlewareKind, MiddlewareStack,
};
pub use stream::MessageStream;
