//! Model and view declarations.
//!
//! A model names its fields, its views, and its authorization hooks. The
//! hooks are opaque to this layer: they receive a request context and
//! either admit or deny.

use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value as JsonValue;

use crate::dsl::ViewQuery;
use crate::query::Query;
use crate::value::{Document, ParamMap};

/// Outcome of a filter or access-control hook that decided to deny.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterDenied {
   pub message: Option<String>,
}

impl FilterDenied {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_message(message: impl Into<String>) -> Self {
      Self {
         message: Some(message.into()),
      }
   }
}

/// The context handed to filter and access-control hooks.
///
/// `resource` is `None` in the pre phase and carries the loaded resource
/// (or materialized collection page) in the post phase.
#[derive(Debug, Clone)]
pub struct FilterRequest {
   pub socket_id: Option<String>,
   pub auth_token: Option<JsonValue>,
   pub query: Query,
   pub resource: Option<JsonValue>,
}

/// An opaque admission hook.
pub type FilterHook =
   Arc<dyn Fn(FilterRequest) -> BoxFuture<'static, Result<(), FilterDenied>> + Send + Sync>;

/// Wraps an async closure into a [`FilterHook`].
pub fn filter_hook<F, Fut>(hook: F) -> FilterHook
where
   F: Fn(FilterRequest) -> Fut + Send + Sync + 'static,
   Fut: Future<Output = Result<(), FilterDenied>> + Send + 'static,
{
   Arc::new(move |request| Box::pin(hook(request)))
}

/// Transform applied to the base collection query when materializing a
/// view: receives the base query and the sanitized parameter values.
pub type ViewTransform = Arc<dyn Fn(ViewQuery, &ParamMap) -> ViewQuery + Send + Sync>;

/// Declaration of one ordered, parameterized projection of a model.
#[derive(Clone)]
pub struct ViewSchema {
   param_fields: Vec<String>,
   affecting_fields: Vec<String>,
   primary_keys: Option<Vec<String>>,
   transform: Option<ViewTransform>,
}

impl ViewSchema {
   /// Declares a view parameterized by the given document fields.
   pub fn new<I, S>(param_fields: I) -> Self
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      Self {
         param_fields: param_fields.into_iter().map(Into::into).collect(),
         affecting_fields: Vec::new(),
         primary_keys: None,
         transform: None,
      }
   }

   /// Fields that change membership or ordering without being parameters.
   pub fn with_affecting_fields<I, S>(mut self, fields: I) -> Self
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      self.affecting_fields = fields.into_iter().map(Into::into).collect();
      self
   }

   /// Overrides the parameter subset that keys subscribable instances.
   /// Defaults to all of `param_fields`.
   pub fn with_primary_keys<I, S>(mut self, keys: I) -> Self
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      self.primary_keys = Some(keys.into_iter().map(Into::into).collect());
      self
   }

   /// Attaches the query transform that filters and orders the view.
   pub fn with_transform<F>(mut self, transform: F) -> Self
   where
      F: Fn(ViewQuery, &ParamMap) -> ViewQuery + Send + Sync + 'static,
   {
      self.transform = Some(Arc::new(transform));
      self
   }

   pub fn param_fields(&self) -> &[String] {
      &self.param_fields
   }

   pub fn affecting_fields(&self) -> &[String] {
      &self.affecting_fields
   }

   pub fn primary_keys(&self) -> &[String] {
      self.primary_keys.as_deref().unwrap_or(&self.param_fields)
   }

   pub fn transform(&self) -> Option<&ViewTransform> {
      self.transform.as_ref()
   }

   /// Sanitizes inbound view parameters: only declared `param_fields`
   /// survive, and absent values become `null`.
   pub fn sanitize_params(&self, provided: Option<&Document>) -> ParamMap {
      self
         .param_fields
         .iter()
         .map(|field| {
            let value = provided
               .and_then(|params| params.get(field))
               .cloned()
               .unwrap_or(JsonValue::Null);
            (field.clone(), value)
         })
         .collect()
   }

   /// Projects a full parameter map down to the primary-key subset used
   /// in channel names.
   pub fn primary_params(&self, params: &ParamMap) -> ParamMap {
      self
         .primary_keys()
         .iter()
         .map(|key| {
            let value = params.get(key).cloned().unwrap_or(JsonValue::Null);
            (key.clone(), value)
         })
         .collect()
   }
}

impl std::fmt::Debug for ViewSchema {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("ViewSchema")
         .field("param_fields", &self.param_fields)
         .field("affecting_fields", &self.affecting_fields)
         .field("primary_keys", &self.primary_keys)
         .field("has_transform", &self.transform.is_some())
         .finish()
   }
}

/// Declaration of one model: its fields, views, and hooks.
#[derive(Clone, Default)]
pub struct ModelSchema {
   fields: IndexSet<String>,
   views: IndexMap<String, ViewSchema>,
   pre_filter: Option<FilterHook>,
   post_filter: Option<FilterHook>,
   access_control: Option<FilterHook>,
}

impl ModelSchema {
   pub fn new<I, S>(fields: I) -> Self
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      Self {
         fields: fields.into_iter().map(Into::into).collect(),
         ..Self::default()
      }
   }

   pub fn with_view(mut self, name: impl Into<String>, view: ViewSchema) -> Self {
      self.views.insert(name.into(), view);
      self
   }

   pub fn with_pre_filter<F, Fut>(mut self, hook: F) -> Self
   where
      F: Fn(FilterRequest) -> Fut + Send + Sync + 'static,
      Fut: Future<Output = Result<(), FilterDenied>> + Send + 'static,
   {
      self.pre_filter = Some(filter_hook(hook));
      self
   }

   pub fn with_post_filter<F, Fut>(mut self, hook: F) -> Self
   where
      F: Fn(FilterRequest) -> Fut + Send + Sync + 'static,
      Fut: Future<Output = Result<(), FilterDenied>> + Send + 'static,
   {
      self.post_filter = Some(filter_hook(hook));
      self
   }

   pub fn with_access_control<F, Fut>(mut self, hook: F) -> Self
   where
      F: Fn(FilterRequest) -> Fut + Send + Sync + 'static,
      Fut: Future<Output = Result<(), FilterDenied>> + Send + 'static,
   {
      self.access_control = Some(filter_hook(hook));
      self
   }

   pub fn fields(&self) -> &IndexSet<String> {
      &self.fields
   }

   pub fn views(&self) -> &IndexMap<String, ViewSchema> {
      &self.views
   }

   pub fn view(&self, name: &str) -> Option<&ViewSchema> {
      self.views.get(name)
   }

   pub(crate) fn pre_filter(&self) -> Option<&FilterHook> {
      self.pre_filter.as_ref()
   }

   pub(crate) fn post_filter(&self) -> Option<&FilterHook> {
      self.post_filter.as_ref()
   }

   pub(crate) fn access_control(&self) -> Option<&FilterHook> {
      self.access_control.as_ref()
   }
}

impl std::fmt::Debug for ModelSchema {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("ModelSchema")
         .field("fields", &self.fields)
         .field("views", &self.views.keys().collect::<Vec<_>>())
         .field("has_pre_filter", &self.pre_filter.is_some())
         .field("has_post_filter", &self.post_filter.is_some())
         .field("has_access_control", &self.access_control.is_some())
         .finish()
   }
}
