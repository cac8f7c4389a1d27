//! Store-agnostic view query plan.
//!
//! A view transform shapes a [`ViewQuery`] instead of talking to a store
//! directly; adapters interpret the finished plan against whatever query
//! language their backend speaks.

use serde_json::Value as JsonValue;

/// Sort direction for an ordered view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
   #[default]
   Ascending,
   Descending,
}

/// An equality predicate on one document field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPredicate {
   pub field: String,
   pub value: JsonValue,
}

/// Ordering clause for a view.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
   pub field: String,
   pub direction: Direction,
}

/// A declarative collection query: zero or more equality predicates plus
/// an optional ordering. Built by view transforms, interpreted by store
/// adapters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewQuery {
   pub predicates: Vec<FieldPredicate>,
   pub order: Option<OrderBy>,
}

impl ViewQuery {
   /// Adds an equality predicate.
   pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
      self.predicates.push(FieldPredicate {
         field: field.into(),
         value: value.into(),
      });
      self
   }

   /// Sets the ordering, replacing any previous clause.
   pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
      self.order = Some(OrderBy {
         field: field.into(),
         direction,
      });
      self
   }
}
