//! Metadata and codec layer for the crud-relay data layer.
//!
//! Everything here is pure and synchronous: document values and canonical
//! JSON, the reversible channel-name encoding, wire message shapes, model
//! and view declarations, the read-only [`SchemaRegistry`], the inbound
//! [`Query`] envelope, and the affected-view analyzer.

pub mod analyzer;
pub mod channel;
pub mod dsl;
pub mod error;
pub mod message;
pub mod model;
pub mod query;
pub mod registry;
pub mod value;

pub use analyzer::{AffectedView, affected_views};
pub use channel::{CHANNEL_PREFIX, ChannelAddress, is_crud_channel};
pub use dsl::{Direction, FieldPredicate, OrderBy, ViewQuery};
pub use error::SchemaError;
pub use message::{ChangeMessage, ViewAction};
pub use model::{FilterDenied, FilterHook, FilterRequest, ModelSchema, ViewSchema, filter_hook};
pub use query::Query;
pub use registry::{FilterPhase, SchemaBuilder, SchemaRegistry};
pub use value::{Document, ParamMap, canonical_json};
