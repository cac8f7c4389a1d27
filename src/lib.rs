//! Realtime CRUD data layer.
//!
//! Sits between many networked clients and a document store: serializes
//! CRUD intentions against a schema, coalesces concurrent reads through a
//! short-lived single-flight cache, derives which named views a mutation
//! affects and publishes precisely targeted change notifications, and
//! mediates every inbound request through a two-phase authorization
//! pipeline.
//!
//! # Architecture
//!
//! - [`crud_relay_schema`]: documents, canonical channel naming, wire
//!   message shapes, model/view declarations, affected-view analysis
//! - [`crud_relay_cache`]: single-flight TTL cache with lifecycle events
//! - [`crud_relay_broker`]: the pub/sub seam and an in-process broker
//! - this crate: the [`StoreAdapter`] seam, the [`FilterPipeline`], and
//!   the [`CrudOrchestrator`] wiring it all together
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use crud_relay::{
//!    CrudConfig, CrudOrchestrator, MemoryBroker, MemoryStore, ModelSchema, Query,
//!    RequestContext, SchemaRegistry, ViewSchema,
//! };
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), crud_relay::CrudError> {
//! let registry = SchemaRegistry::builder()
//!    .model(
//!       "Product",
//!       ModelSchema::new(["id", "name", "categoryId"])
//!          .with_view("byCategory", ViewSchema::new(["categoryId"])),
//!    )
//!    .build();
//!
//! let orchestrator = CrudOrchestrator::with_broker(
//!    registry,
//!    Arc::new(MemoryStore::new()),
//!    Arc::new(MemoryBroker::new()),
//!    CrudConfig::default(),
//! );
//! orchestrator.attach_middleware();
//!
//! let ctx = RequestContext::default();
//! let id = orchestrator
//!    .create(&ctx, Query {
//!       model: "Product".into(),
//!       value: Some(json!({"id": "p1", "name": "A", "categoryId": "c1"})),
//!       ..Query::default()
//!    })
//!    .await?;
//! let product = orchestrator.read(&ctx, Query::resource("Product", id)).await?;
//! # let _ = product;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod filters;
mod memory_store;
mod orchestrator;
mod store;
mod subscriptions;

pub use config::{CrudConfig, DEFAULT_CACHE_DURATION, DEFAULT_PAGE_SIZE};
pub use error::{CrudError, Result};
pub use filters::FilterPipeline;
pub use memory_store::MemoryStore;
pub use orchestrator::{CollectionPage, CrudOrchestrator, ReadOutcome, RequestContext};
pub use store::{StoreAdapter, StoreError, ViewPlan};

pub use crud_relay_broker as broker;
pub use crud_relay_cache as cache;
pub use crud_relay_schema as schema;

// Re-export commonly used types from the member crates
pub use crud_relay_broker::{Broker, BrokerError, InboundRequest, MemoryBroker, MiddlewareKind};
pub use crud_relay_cache::{CacheError, CacheEvent, CacheEventKind, ResourceCache};
pub use crud_relay_schema::{
   ChangeMessage, ChannelAddress, Direction, Document, FilterDenied, FilterPhase, FilterRequest,
   ModelSchema, ParamMap, Query, SchemaRegistry, ViewAction, ViewQuery, ViewSchema,
};
