//! The inbound request envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::SchemaError;
use crate::registry::SchemaRegistry;
use crate::value::Document;

/// A client CRUD request, as it arrives off the wire.
///
/// `model` serializes as `type` for wire compatibility.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Query {
   #[serde(rename = "type")]
   pub model: String,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub id: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub field: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub value: Option<JsonValue>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub view: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub view_params: Option<Document>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub page_size: Option<usize>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub offset: Option<u64>,
   pub get_count: bool,
}

impl Query {
   /// Query addressing one resource.
   pub fn resource(model: impl Into<String>, id: impl Into<String>) -> Self {
      Self {
         model: model.into(),
         id: Some(id.into()),
         ..Self::default()
      }
   }

   /// Query addressing one field of a resource.
   pub fn field(model: impl Into<String>, id: impl Into<String>, field: impl Into<String>) -> Self {
      Self {
         model: model.into(),
         id: Some(id.into()),
         field: Some(field.into()),
         ..Self::default()
      }
   }

   /// Checks structural validity against the schema.
   pub fn validate(&self, registry: &SchemaRegistry) -> Result<(), SchemaError> {
      if self.model.is_empty() {
         return Err(SchemaError::MissingModelType);
      }
      if !registry.has_model(&self.model) {
         return Err(SchemaError::UnknownModel(self.model.clone()));
      }
      if self.field.is_some() && self.id.is_none() {
         return Err(SchemaError::FieldWithoutId);
      }
      if let Some(view) = &self.view {
         let Some(schema) = registry.view_schema(&self.model, view) else {
            return Err(SchemaError::UnknownView {
               model: self.model.clone(),
               view: view.clone(),
            });
         };
         let Some(params) = &self.view_params else {
            return Err(SchemaError::MissingViewParams { view: view.clone() });
         };
         for field in schema.param_fields().iter().chain(schema.primary_keys()) {
            if !params.contains_key(field) {
               return Err(SchemaError::MissingViewParam {
                  view: view.clone(),
                  field: field.clone(),
               });
            }
         }
      }
      Ok(())
   }
}
