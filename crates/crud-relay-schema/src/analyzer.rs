//! Affected-view derivation.
//!
//! Given a mutation's field-level delta, enumerates the view instances
//! whose membership or ordering may have changed, along with the
//! parameter values that key each instance.

use serde_json::Value as JsonValue;

use crate::channel;
use crate::registry::SchemaRegistry;
use crate::value::{Document, ParamMap};

/// One view instance touched by a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct AffectedView {
   pub view: String,
   pub model: String,
   /// Parameter field values read from the resource.
   pub params: ParamMap,
   /// The primary-key subset of `params`, as used in the channel name.
   pub primary_params: ParamMap,
   /// Parameter plus affecting-field values; differing `affecting_data`
   /// with equal `params` means the document moved within the instance.
   pub affecting_data: ParamMap,
}

impl AffectedView {
   /// The channel name of this view instance.
   pub fn channel(&self) -> String {
      channel::view_channel(&self.model, &self.view, &self.primary_params)
   }
}

/// Enumerates views of `model` affected by a change to `resource`.
///
/// `changed_fields` lists the fields whose values changed; `None` means
/// every field is assumed changed. A view is affected iff any changed
/// field is the `id` or one of the view's param or affecting fields.
pub fn affected_views(
   registry: &SchemaRegistry,
   model: &str,
   resource: &Document,
   changed_fields: Option<&[String]>,
) -> Vec<AffectedView> {
   let Some(views) = registry.views_of(model) else {
      return Vec::new();
   };

   views
      .iter()
      .filter(|(_, schema)| match changed_fields {
         None => true,
         Some(fields) => fields.iter().any(|field| {
            field == "id"
               || schema.param_fields().contains(field)
               || schema.affecting_fields().contains(field)
         }),
      })
      .map(|(name, schema)| {
         let params: ParamMap = schema
            .param_fields()
            .iter()
            .map(|field| (field.clone(), field_value(resource, field)))
            .collect();
         let affecting_data: ParamMap = schema
            .param_fields()
            .iter()
            .chain(schema.affecting_fields())
            .map(|field| (field.clone(), field_value(resource, field)))
            .collect();
         AffectedView {
            view: name.clone(),
            model: model.to_string(),
            primary_params: schema.primary_params(&params),
            params,
            affecting_data,
         }
      })
      .collect()
}

fn field_value(resource: &Document, field: &str) -> JsonValue {
   resource.get(field).cloned().unwrap_or(JsonValue::Null)
}
