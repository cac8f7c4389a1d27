//! Deterministic channel naming for resources, fields, and view instances.
//!
//! Producers and consumers never coordinate: both sides derive the same
//! channel name from the same identity, so the encoding must be stable and
//! reversible.
//!
//! ```text
//! crud>Product/p1                          resource
//! crud>Product/p1/name                     field
//! crud>byCategory({"categoryId":"c1"}):Product   view instance
//! ```

use crate::value::{ParamMap, canonical_json};

/// Prefix shared by every channel this layer owns.
pub const CHANNEL_PREFIX: &str = "crud>";

/// A parsed channel name.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelAddress {
   /// A resource channel, optionally narrowed to a single field.
   Model {
      model: String,
      id: Option<String>,
      field: Option<String>,
   },
   /// A view instance channel.
   View {
      model: String,
      view: String,
      params: ParamMap,
   },
}

/// Channel carrying whole-resource change signals for `(model, id)`.
pub fn resource_channel(model: &str, id: &str) -> String {
   format!("{CHANNEL_PREFIX}{model}/{id}")
}

/// Channel carrying field-level change events for `(model, id, field)`.
pub fn field_channel(model: &str, id: &str, field: &str) -> String {
   format!("{CHANNEL_PREFIX}{model}/{id}/{field}")
}

/// Channel for one view instance, keyed by its canonical primary params.
pub fn view_channel(model: &str, view: &str, primary_params: &ParamMap) -> String {
   format!("{CHANNEL_PREFIX}{view}({}):{model}", canonical_json(primary_params))
}

/// Parses a channel name back into its address.
///
/// Returns `None` for channels outside the `crud>` namespace and for
/// malformed names. A `:` anywhere after the prefix selects the view
/// form; otherwise the name is read as slash-separated model segments.
pub fn parse(channel: &str) -> Option<ChannelAddress> {
   let rest = channel.strip_prefix(CHANNEL_PREFIX)?;

   if rest.contains(':') {
      return parse_view(rest);
   }

   let mut segments = rest.split('/');
   let model = segments.next().filter(|s| !s.is_empty())?;
   let id = segments.next();
   let field = segments.next();
   if segments.next().is_some() {
      return None;
   }
   if matches!(id, Some("")) || matches!(field, Some("")) {
      return None;
   }

   Some(ChannelAddress::Model {
      model: model.to_string(),
      id: id.map(str::to_string),
      field: field.map(str::to_string),
   })
}

fn parse_view(rest: &str) -> Option<ChannelAddress> {
   let open = rest.find('(')?;
   let close = rest.rfind("):")?;
   if close < open {
      return None;
   }

   let view = &rest[..open];
   let raw_params = &rest[open + 1..close];
   let model = &rest[close + 2..];
   if view.is_empty() || model.is_empty() {
      return None;
   }

   let params: ParamMap = serde_json::from_str(raw_params).ok()?;
   Some(ChannelAddress::View {
      model: model.to_string(),
      view: view.to_string(),
      params,
   })
}

/// True when a channel belongs to the `crud>` namespace at all.
pub fn is_crud_channel(channel: &str) -> bool {
   channel.starts_with(CHANNEL_PREFIX)
}
