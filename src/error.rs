//! Unified error taxonomy for the data layer.

use crud_relay_cache::CacheError;
use crud_relay_schema::{FilterDenied, FilterPhase, SchemaError};

/// Result type alias for data-layer operations.
pub type Result<T> = std::result::Result<T, CrudError>;

/// Errors surfaced to callers and middleware.
///
/// `Clone` so one failure can be fanned out to every buffered reader of
/// a resource.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CrudError {
   /// Malformed query or update details.
   #[error("invalid arguments: {0}")]
   InvalidArguments(String),

   /// Model type missing or not declared in the schema.
   #[error("invalid model type '{0}'")]
   InvalidModelType(String),

   /// Structurally valid query with unusable parameters.
   #[error("invalid query parameters: {0}")]
   InvalidParams(String),

   /// An operation the layer refuses, like modifying `id`.
   #[error("invalid operation: {0}")]
   InvalidOperation(String),

   /// A filter hook denied the request.
   #[error("request blocked by {phase} filter")]
   Blocked {
      phase: FilterPhase,
      message: Option<String>,
   },

   /// An outside client attempted to publish to a `crud>` channel.
   #[error("clients may not publish to crud channels")]
   PublishNotAllowed,

   /// The resource-channel subscription backing a buffered read failed.
   #[error("failed to subscribe to resource channel '{channel}'")]
   FailedToSubscribeToResourceChannel { channel: String },

   /// Store I/O failure; the message is sanitized, the raw error is
   /// logged where it occurred.
   #[error("store error: {0}")]
   Store(String),
}

impl CrudError {
   /// Wire-stable error code.
   pub fn error_code(&self) -> &'static str {
      match self {
         CrudError::InvalidArguments(_) => "InvalidArguments",
         CrudError::InvalidModelType(_) => "CRUDInvalidModelType",
         CrudError::InvalidParams(_) => "CRUDInvalidParams",
         CrudError::InvalidOperation(_) => "CRUDInvalidOperation",
         CrudError::Blocked { .. } => "CRUDBlockedError",
         CrudError::PublishNotAllowed => "CRUDPublishNotAllowedError",
         CrudError::FailedToSubscribeToResourceChannel { .. } => {
            "FailedToSubscribeToResourceChannel"
         }
         CrudError::Store(_) => "CRUDStoreError",
      }
   }

   /// Normalizes a hook denial into a blocked error for its phase.
   pub fn blocked(phase: FilterPhase, denied: FilterDenied) -> Self {
      CrudError::Blocked {
         phase,
         message: denied.message,
      }
   }

   /// Blocked error for a phase whose hook is absent but blocking by
   /// default.
   pub fn blocked_by_default(phase: FilterPhase) -> Self {
      CrudError::Blocked {
         phase,
         message: None,
      }
   }

   /// The filter phase that denied, when this is a blocked error.
   pub fn blocked_phase(&self) -> Option<FilterPhase> {
      match self {
         CrudError::Blocked { phase, .. } => Some(*phase),
         _ => None,
      }
   }
}

impl From<SchemaError> for CrudError {
   fn from(error: SchemaError) -> Self {
      match &error {
         SchemaError::MissingModelType => CrudError::InvalidModelType(String::new()),
         SchemaError::UnknownModel(model) => CrudError::InvalidModelType(model.clone()),
         SchemaError::FieldWithoutId => CrudError::InvalidArguments(error.to_string()),
         SchemaError::UnknownView { .. }
         | SchemaError::MissingViewParams { .. }
         | SchemaError::MissingViewParam { .. } => CrudError::InvalidParams(error.to_string()),
      }
   }
}

impl From<CacheError> for CrudError {
   fn from(error: CacheError) -> Self {
      match error {
         CacheError::Fetch(message) => CrudError::Store(message),
         CacheError::Abandoned => CrudError::Store(error.to_string()),
      }
   }
}
