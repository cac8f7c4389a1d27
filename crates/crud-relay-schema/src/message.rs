//! Wire shapes for change notifications.
//!
//! Resource channels carry empty messages ("refetch"); field and view
//! channels carry one of these tagged payloads. Clients subscribe to the
//! raw channel names, so the serialized form is a compatibility contract.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// How an update repositions a document within a view instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewAction {
   /// Same view instance, ordering or affecting data changed.
   Move,
   /// Left this view instance.
   Remove,
   /// Entered this view instance.
   Add,
}

/// A change event published on a field or view channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeMessage {
   /// A document entered a view: `{type:"create", id}`.
   Create { id: String },

   /// A field value changed (`{type:"update", value}`) or a view
   /// membership moved (`{type:"update", action, id}`).
   Update {
      #[serde(default, skip_serializing_if = "Option::is_none")]
      action: Option<ViewAction>,
      #[serde(default, skip_serializing_if = "Option::is_none")]
      id: Option<String>,
      #[serde(default, skip_serializing_if = "Option::is_none")]
      value: Option<JsonValue>,
   },

   /// A field was deleted (`{type:"delete"}`) or a document left a view
   /// (`{type:"delete", id}`).
   Delete {
      #[serde(default, skip_serializing_if = "Option::is_none")]
      id: Option<String>,
   },
}

impl ChangeMessage {
   /// Field-level update. `undefined` inputs are normalized to `null`
   /// by passing `JsonValue::Null`.
   pub fn field_update(value: JsonValue) -> Self {
      ChangeMessage::Update {
         action: None,
         id: None,
         value: Some(value),
      }
   }

   /// View-level membership event.
   pub fn view_update(action: ViewAction, id: impl Into<String>) -> Self {
      ChangeMessage::Update {
         action: Some(action),
         id: Some(id.into()),
         value: None,
      }
   }

   /// Coarse view-level update without a membership action, used by
   /// out-of-band notifiers.
   pub fn coarse_update(id: impl Into<String>) -> Self {
      ChangeMessage::Update {
         action: None,
         id: Some(id.into()),
         value: None,
      }
   }

   pub fn view_create(id: impl Into<String>) -> Self {
      ChangeMessage::Create { id: id.into() }
   }

   pub fn field_delete() -> Self {
      ChangeMessage::Delete { id: None }
   }

   pub fn view_delete(id: impl Into<String>) -> Self {
      ChangeMessage::Delete { id: Some(id.into()) }
   }

   /// Serializes to the JSON value that goes over the broker.
   pub fn to_value(&self) -> JsonValue {
      serde_json::to_value(self).unwrap_or(JsonValue::Null)
   }

   /// Parses a broker payload, returning `None` for foreign shapes.
   pub fn from_value(value: &JsonValue) -> Option<Self> {
      serde_json::from_value(value.clone()).ok()
   }
}
