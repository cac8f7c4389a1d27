//! Single-flight resource cache for the crud-relay data layer.
//!
//! Coalesces concurrent reads of the same resource into one backend
//! fetch, holds results for a short TTL, applies field-level patches from
//! observed change events, and broadcasts lifecycle events so the layer
//! above can tear down per-resource subscriptions when entries go away.

pub mod cache;
pub mod error;
pub mod event;

pub use cache::{FetchFuture, ResourceCache};
pub use error::CacheError;
pub use event::{CacheEvent, CacheEventKind};
