//! The document-store seam.
//!
//! The data layer never speaks a query language; it hands adapters a
//! declarative [`ViewPlan`] and document-level operations. Real
//! deployments implement [`StoreAdapter`] over their database driver;
//! [`MemoryStore`] is the in-process reference adapter.
//!
//! [`MemoryStore`]: crate::memory_store::MemoryStore

use async_trait::async_trait;

use crud_relay_schema::{Document, ViewQuery};

/// A transformed collection query plus its pagination window.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewPlan {
   pub query: ViewQuery,
   pub offset: u64,
   pub limit: usize,
}

/// Errors produced by store adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
   /// The addressed document does not exist.
   #[error("resource '{model}/{id}' was not found")]
   NotFound { model: String, id: String },

   /// An insert collided with an existing primary key.
   #[error("duplicate primary key '{id}' for model '{model}'")]
   DuplicateKey { model: String, id: String },

   /// Backend failure. The message may carry driver internals; callers
   /// log it and surface a sanitized error instead.
   #[error("{0}")]
   Backend(String),
}

/// Document store consumed by the data layer.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
   /// Loads one document.
   async fn fetch(&self, model: &str, id: &str) -> Result<Document, StoreError>;

   /// Inserts a document, returning its id. Adapters generate an id
   /// when the document carries none.
   async fn insert(&self, model: &str, document: Document) -> Result<String, StoreError>;

   /// Merges field values into an existing document.
   async fn apply(&self, model: &str, id: &str, changes: Document) -> Result<(), StoreError>;

   /// Deletes a document.
   async fn remove(&self, model: &str, id: &str) -> Result<(), StoreError>;

   /// Deletes a single field from a document.
   async fn remove_field(&self, model: &str, id: &str, field: &str) -> Result<(), StoreError>;

   /// Materializes a view page as document ids, in view order.
   async fn view_ids(&self, model: &str, plan: &ViewPlan) -> Result<Vec<String>, StoreError>;

   /// Counts the documents a view query matches.
   async fn view_count(&self, model: &str, query: &ViewQuery) -> Result<u64, StoreError>;
}
