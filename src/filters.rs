//! Two-phase authorization pipeline.
//!
//! The pre phase runs policy-only, before any data is touched. The post
//! phase runs with the subject resource in hand; on subscribe it loads
//! the resource itself, through the same cache reads flow through. A
//! model with no hook for a phase admits or denies according to the
//! corresponding `block_*_by_default` flag.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::debug;

use crud_relay_schema::{FilterPhase, FilterRequest, SchemaRegistry};

use crate::config::CrudConfig;
use crate::error::CrudError;

/// Pre/post admission pipeline around emit and subscribe.
#[derive(Clone)]
pub struct FilterPipeline {
   registry: Arc<SchemaRegistry>,
   block_pre_by_default: bool,
   block_post_by_default: bool,
}

impl FilterPipeline {
   pub fn new(registry: Arc<SchemaRegistry>, config: &CrudConfig) -> Self {
      Self {
         registry,
         block_pre_by_default: config.block_pre_by_default,
         block_post_by_default: config.block_post_by_default,
      }
   }

   /// Runs the pre phase for the request's model.
   pub async fn pre(&self, request: &FilterRequest) -> Result<(), CrudError> {
      match self.registry.filter_hook(&request.query.model, FilterPhase::Pre) {
         Some(hook) => hook(request.clone())
            .await
            .map_err(|denied| self.deny(FilterPhase::Pre, request, denied.message)),
         None if self.block_pre_by_default => {
            Err(self.deny(FilterPhase::Pre, request, None))
         }
         None => Ok(()),
      }
   }

   /// Runs the post phase with the resource already present on the
   /// request.
   pub async fn post(&self, request: &FilterRequest) -> Result<(), CrudError> {
      match self.registry.filter_hook(&request.query.model, FilterPhase::Post) {
         Some(hook) => hook(request.clone())
            .await
            .map_err(|denied| self.deny(FilterPhase::Post, request, denied.message)),
         None if self.block_post_by_default => {
            Err(self.deny(FilterPhase::Post, request, None))
         }
         None => Ok(()),
      }
   }

   /// Post phase for subscribe: the pipeline fetches the resource via
   /// `loader` before invoking the hook. The loader only runs when a
   /// hook will actually see the resource.
   pub async fn post_with_fetch<F, Fut>(
      &self,
      mut request: FilterRequest,
      loader: F,
   ) -> Result<(), CrudError>
   where
      F: FnOnce() -> Fut,
      Fut: Future<Output = Result<Option<JsonValue>, CrudError>>,
   {
      let hook = match self.registry.filter_hook(&request.query.model, FilterPhase::Post) {
         Some(hook) => hook.clone(),
         None if self.block_post_by_default => {
            return Err(self.deny(FilterPhase::Post, &request, None));
         }
         None => return Ok(()),
      };
      request.resource = loader().await?;
      hook(request.clone())
         .await
         .map_err(|denied| self.deny(FilterPhase::Post, &request, denied.message))
   }

   /// Runs the model's access-control hook, falling back to the
   /// inbound-blocking default when none is declared.
   pub async fn access_control(
      &self,
      request: &FilterRequest,
      block_inbound_by_default: bool,
   ) -> Result<(), CrudError> {
      match self.registry.access_control_hook(&request.query.model) {
         Some(hook) => hook(request.clone())
            .await
            .map_err(|denied| self.deny(FilterPhase::Pre, request, denied.message)),
         None if block_inbound_by_default => {
            Err(self.deny(FilterPhase::Pre, request, None))
         }
         None => Ok(()),
      }
   }

   fn deny(
      &self,
      phase: FilterPhase,
      request: &FilterRequest,
      message: Option<String>,
   ) -> CrudError {
      debug!(model = %request.query.model, %phase, "request blocked");
      CrudError::Blocked { phase, message }
   }
}

impl std::fmt::Debug for FilterPipeline {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("FilterPipeline")
         .field("block_pre_by_default", &self.block_pre_by_default)
         .field("block_post_by_default", &self.block_post_by_default)
         .finish()
   }
}
