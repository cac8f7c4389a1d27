//! In-memory reference store.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tracing::trace;

use crud_relay_schema::{Direction, Document, ViewQuery};

use crate::store::{StoreAdapter, StoreError, ViewPlan};

/// A [`StoreAdapter`] over process memory.
///
/// Documents live in per-model insertion-ordered maps keyed by id. View
/// queries are interpreted directly: equality predicates filter, the
/// order clause sorts, and id is the stable tiebreak.
#[derive(Debug, Default)]
pub struct MemoryStore {
   models: RwLock<HashMap<String, IndexMap<String, Document>>>,
}

impl MemoryStore {
   pub fn new() -> Self {
      Self::default()
   }

   /// Number of documents stored for a model.
   pub fn len(&self, model: &str) -> usize {
      self.models.read().get(model).map_or(0, IndexMap::len)
   }

   pub fn is_empty(&self, model: &str) -> bool {
      self.len(model) == 0
   }

   fn matching_docs(&self, model: &str, query: &ViewQuery) -> Vec<(String, Document)> {
      let models = self.models.read();
      let Some(documents) = models.get(model) else {
         return Vec::new();
      };
      let mut matches: Vec<(String, Document)> = documents
         .iter()
         .filter(|(_, document)| {
            query.predicates.iter().all(|predicate| {
               document.get(&predicate.field).unwrap_or(&JsonValue::Null) == &predicate.value
            })
         })
         .map(|(id, document)| (id.clone(), document.clone()))
         .collect();

      match &query.order {
         Some(order) => {
            matches.sort_by(|(a_id, a_doc), (b_id, b_doc)| {
               let a_value = a_doc.get(&order.field).unwrap_or(&JsonValue::Null);
               let b_value = b_doc.get(&order.field).unwrap_or(&JsonValue::Null);
               let ordering = compare_values(a_value, b_value).then_with(|| a_id.cmp(b_id));
               match order.direction {
                  Direction::Ascending => ordering,
                  Direction::Descending => ordering.reverse(),
               }
            });
         }
         None => matches.sort_by(|(a_id, _), (b_id, _)| a_id.cmp(b_id)),
      }
      matches
   }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
   async fn fetch(&self, model: &str, id: &str) -> Result<Document, StoreError> {
      let models = self.models.read();
      models
         .get(model)
         .and_then(|documents| documents.get(id))
         .cloned()
         .ok_or_else(|| StoreError::NotFound {
            model: model.to_string(),
            id: id.to_string(),
         })
   }

   async fn insert(&self, model: &str, mut document: Document) -> Result<String, StoreError> {
      let id = match document.get("id").and_then(JsonValue::as_str) {
         Some(id) => id.to_string(),
         None => uuid::Uuid::new_v4().to_string(),
      };
      document.insert("id".into(), JsonValue::from(id.clone()));

      let mut models = self.models.write();
      let documents = models.entry(model.to_string()).or_default();
      if documents.contains_key(&id) {
         return Err(StoreError::DuplicateKey {
            model: model.to_string(),
            id,
         });
      }
      trace!(model, id = %id, "inserting document");
      documents.insert(id.clone(), document);
      Ok(id)
   }

   async fn apply(&self, model: &str, id: &str, changes: Document) -> Result<(), StoreError> {
      let mut models = self.models.write();
      let document = models
         .get_mut(model)
         .and_then(|documents| documents.get_mut(id))
         .ok_or_else(|| StoreError::NotFound {
            model: model.to_string(),
            id: id.to_string(),
         })?;
      for (field, value) in changes {
         document.insert(field, value);
      }
      Ok(())
   }

   async fn remove(&self, model: &str, id: &str) -> Result<(), StoreError> {
      let mut models = self.models.write();
      models
         .get_mut(model)
         .and_then(|documents| documents.shift_remove(id))
         .map(|_| ())
         .ok_or_else(|| StoreError::NotFound {
            model: model.to_string(),
            id: id.to_string(),
         })
   }

   async fn remove_field(&self, model: &str, id: &str, field: &str) -> Result<(), StoreError> {
      let mut models = self.models.write();
      let document = models
         .get_mut(model)
         .and_then(|documents| documents.get_mut(id))
         .ok_or_else(|| StoreError::NotFound {
            model: model.to_string(),
            id: id.to_string(),
         })?;
      document.shift_remove(field);
      Ok(())
   }

   async fn view_ids(&self, model: &str, plan: &ViewPlan) -> Result<Vec<String>, StoreError> {
      Ok(self
         .matching_docs(model, &plan.query)
         .into_iter()
         .skip(plan.offset as usize)
         .take(plan.limit)
         .map(|(id, _)| id)
         .collect())
   }

   async fn view_count(&self, model: &str, query: &ViewQuery) -> Result<u64, StoreError> {
      Ok(self.matching_docs(model, query).len() as u64)
   }
}

/// Total order over JSON values: null < bool < number < string < array
/// < object, with numeric comparison inside the number rank.
fn compare_values(a: &JsonValue, b: &JsonValue) -> Ordering {
   match (a, b) {
      (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
      (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
      (JsonValue::Number(x), JsonValue::Number(y)) => {
         let x = x.as_f64().unwrap_or(f64::NAN);
         let y = y.as_f64().unwrap_or(f64::NAN);
         x.partial_cmp(&y).unwrap_or(Ordering::Equal)
      }
      (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
      _ => rank(a).cmp(&rank(b)),
   }
}

fn rank(value: &JsonValue) -> u8 {
   match value {
      JsonValue::Null => 0,
      JsonValue::Bool(_) => 1,
      JsonValue::Number(_) => 2,
      JsonValue::String(_) => 3,
      JsonValue::Array(_) => 4,
      JsonValue::Object(_) => 5,
   }
}
