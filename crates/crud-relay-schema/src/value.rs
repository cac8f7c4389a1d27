//! Document and parameter value representations.
//!
//! Documents are ordered field maps, matching the shape a document store
//! hands back row by row. View parameters use a `BTreeMap` so that key
//! order is canonical by construction.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

/// A single document: field name to JSON value, in field order.
pub type Document = IndexMap<String, JsonValue>;

/// View parameter values, keyed by parameter field name.
///
/// Backed by a `BTreeMap` so iteration order is always the lexicographic
/// key order used in canonical channel names.
pub type ParamMap = BTreeMap<String, JsonValue>;

/// Serializes a parameter map to canonical JSON.
///
/// Keys appear in lexicographic order and nested objects are recursively
/// canonicalized, so two maps that are value-equal always produce the
/// same string. Absent parameter values must be materialized as
/// `JsonValue::Null` by the caller before serialization.
pub fn canonical_json(params: &ParamMap) -> String {
   let mut out = String::from("{");
   for (i, (key, value)) in params.iter().enumerate() {
      if i > 0 {
         out.push(',');
      }
      out.push_str(&JsonValue::from(key.as_str()).to_string());
      out.push(':');
      write_canonical(&mut out, value);
   }
   out.push('}');
   out
}

fn write_canonical(out: &mut String, value: &JsonValue) {
   match value {
      JsonValue::Object(map) => {
         let mut keys: Vec<&String> = map.keys().collect();
         keys.sort();
         out.push('{');
         for (i, key) in keys.iter().enumerate() {
            if i > 0 {
               out.push(',');
            }
            out.push_str(&JsonValue::from(key.as_str()).to_string());
            out.push(':');
            if let Some(nested) = map.get(key.as_str()) {
               write_canonical(out, nested);
            }
         }
         out.push('}');
      }
      JsonValue::Array(items) => {
         out.push('[');
         for (i, item) in items.iter().enumerate() {
            if i > 0 {
               out.push(',');
            }
            write_canonical(out, item);
         }
         out.push(']');
      }
      scalar => out.push_str(&scalar.to_string()),
   }
}
