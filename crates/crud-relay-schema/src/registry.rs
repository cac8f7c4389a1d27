//! Read-only schema index.
//!
//! Built once at startup and never mutated; every lookup is a single hash
//! probe.

use indexmap::{IndexMap, IndexSet};

use crate::model::{FilterHook, ModelSchema, ViewSchema};

/// Which authorization phase a hook belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterPhase {
   Pre,
   Post,
}

impl FilterPhase {
   /// Wire name of the phase, as carried on blocked errors.
   pub fn as_str(&self) -> &'static str {
      match self {
         FilterPhase::Pre => "pre",
         FilterPhase::Post => "post",
      }
   }
}

impl std::fmt::Display for FilterPhase {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Immutable index of model declarations.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
   models: IndexMap<String, ModelSchema>,
}

impl SchemaRegistry {
   pub fn builder() -> SchemaBuilder {
      SchemaBuilder::default()
   }

   pub fn has_model(&self, model: &str) -> bool {
      self.models.contains_key(model)
   }

   pub fn model(&self, model: &str) -> Option<&ModelSchema> {
      self.models.get(model)
   }

   /// Declared field names of a model.
   pub fn fields_of(&self, model: &str) -> Option<&IndexSet<String>> {
      self.models.get(model).map(ModelSchema::fields)
   }

   /// All view declarations of a model, in declaration order.
   pub fn views_of(&self, model: &str) -> Option<&IndexMap<String, ViewSchema>> {
      self.models.get(model).map(ModelSchema::views)
   }

   pub fn view_schema(&self, model: &str, view: &str) -> Option<&ViewSchema> {
      self.models.get(model).and_then(|m| m.view(view))
   }

   /// The model's filter hook for the given phase, if declared.
   pub fn filter_hook(&self, model: &str, phase: FilterPhase) -> Option<&FilterHook> {
      let schema = self.models.get(model)?;
      match phase {
         FilterPhase::Pre => schema.pre_filter(),
         FilterPhase::Post => schema.post_filter(),
      }
   }

   /// The model's access-control hook, if declared.
   pub fn access_control_hook(&self, model: &str) -> Option<&FilterHook> {
      self.models.get(model).and_then(ModelSchema::access_control)
   }

   pub fn model_names(&self) -> impl Iterator<Item = &str> {
      self.models.keys().map(String::as_str)
   }
}

impl std::fmt::Debug for SchemaRegistry {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("SchemaRegistry")
         .field("models", &self.models.keys().collect::<Vec<_>>())
         .finish()
   }
}

/// Accumulates model declarations before freezing them into a registry.
#[derive(Default)]
pub struct SchemaBuilder {
   models: IndexMap<String, ModelSchema>,
}

impl SchemaBuilder {
   pub fn model(mut self, name: impl Into<String>, schema: ModelSchema) -> Self {
      self.models.insert(name.into(), schema);
      self
   }

   pub fn build(self) -> SchemaRegistry {
      SchemaRegistry {
         models: self.models,
      }
   }
}
