//! CRUD entry points, read coalescing, and notification fan-out.
//!
//! The orchestrator owns the schema registry, the resource cache, the
//! filter pipeline, and the seams to the store and the broker. Every
//! mutation publishes precisely targeted change notifications; every
//! read-by-id is coalesced through the cache behind a live invalidation
//! subscription.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use crud_relay_broker::{Broker, InboundRequest, MiddlewareError, MiddlewareKind};
use crud_relay_cache::{CacheError, CacheEventKind, ResourceCache};
use crud_relay_schema::channel::{self, ChannelAddress};
use crud_relay_schema::{
   ChangeMessage, Document, FilterRequest, Query, SchemaRegistry, ViewAction, ViewQuery,
   affected_views, is_crud_channel,
};

use crate::config::CrudConfig;
use crate::error::CrudError;
use crate::filters::FilterPipeline;
use crate::store::{StoreAdapter, StoreError, ViewPlan};
use crate::subscriptions::{Registration, ResourceSubscriptions};

/// Who is asking: socket identity and auth token for filter hooks.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
   pub socket_id: Option<String>,
   pub auth_token: Option<JsonValue>,
}

impl RequestContext {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn for_socket(socket_id: impl Into<String>) -> Self {
      Self {
         socket_id: Some(socket_id.into()),
         auth_token: None,
      }
   }
}

/// One page of a collection read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPage {
   pub data: Vec<String>,
   pub is_last_page: bool,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub count: Option<u64>,
}

/// Result of a read: a document, a single field, or a collection page.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
   Document(Document),
   Field(JsonValue),
   Collection(CollectionPage),
}

impl ReadOutcome {
   pub fn document(self) -> Option<Document> {
      match self {
         ReadOutcome::Document(document) => Some(document),
         _ => None,
      }
   }

   pub fn field(self) -> Option<JsonValue> {
      match self {
         ReadOutcome::Field(value) => Some(value),
         _ => None,
      }
   }

   pub fn collection(self) -> Option<CollectionPage> {
      match self {
         ReadOutcome::Collection(page) => Some(page),
         _ => None,
      }
   }
}

/// The realtime CRUD data layer.
///
/// Cheap to clone; clones share all state. Create it inside a tokio
/// runtime: cache expiry and invalidation watches run as background
/// tasks. Two orchestrators never share cache or subscription state.
pub struct CrudOrchestrator {
   inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
   registry: Arc<SchemaRegistry>,
   store: Arc<dyn StoreAdapter>,
   broker: Option<Arc<dyn Broker>>,
   cache: ResourceCache,
   filters: FilterPipeline,
   subscriptions: ResourceSubscriptions,
   mutation_locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
   config: CrudConfig,
}

impl CrudOrchestrator {
   /// Standalone orchestrator with no broker attached. Caching defaults
   /// to disabled: without a broker there is no invalidation signal.
   pub fn new(registry: SchemaRegistry, store: Arc<dyn StoreAdapter>, config: CrudConfig) -> Self {
      Self::build(registry, store, None, config)
   }

   /// Orchestrator publishing through and subscribing via `broker`.
   pub fn with_broker(
      registry: SchemaRegistry,
      store: Arc<dyn StoreAdapter>,
      broker: Arc<dyn Broker>,
      config: CrudConfig,
   ) -> Self {
      Self::build(registry, store, Some(broker), config)
   }

   fn build(
      registry: SchemaRegistry,
      store: Arc<dyn StoreAdapter>,
      broker: Option<Arc<dyn Broker>>,
      config: CrudConfig,
   ) -> Self {
      let registry = Arc::new(registry);
      let cache_disabled = config.cache_disabled.unwrap_or(broker.is_none());
      let cache = ResourceCache::new(config.cache_duration, cache_disabled);
      let filters = FilterPipeline::new(Arc::clone(&registry), &config);
      let orchestrator = Self {
         inner: Arc::new(OrchestratorInner {
            registry,
            store,
            broker,
            cache,
            filters,
            subscriptions: ResourceSubscriptions::default(),
            mutation_locks: Mutex::new(HashMap::new()),
            config,
         }),
      };
      orchestrator.spawn_cache_event_loop();
      orchestrator
   }

   pub fn registry(&self) -> &SchemaRegistry {
      &self.inner.registry
   }

   pub fn cache(&self) -> &ResourceCache {
      &self.inner.cache
   }

   pub fn config(&self) -> &CrudConfig {
      &self.inner.config
   }

   /// Installs the broker middleware: inbound `crud>` publishes are
   /// denied outright, CRUD emits run access control, and `crud>`
   /// subscribes run the pre filter followed by the post filter with a
   /// cached resource fetch.
   pub fn attach_middleware(&self) {
      let Some(broker) = &self.inner.broker else {
         return;
      };

      broker.add_middleware(
         MiddlewareKind::PublishIn,
         Arc::new(|request: InboundRequest| {
            Box::pin(async move {
               match &request.channel {
                  Some(name) if is_crud_channel(name) => {
                     Err(reject(CrudError::PublishNotAllowed))
                  }
                  _ => Ok(()),
               }
            })
         }),
      );

      let weak = Arc::downgrade(&self.inner);
      broker.add_middleware(
         MiddlewareKind::Emit,
         Arc::new(move |request: InboundRequest| {
            let weak = weak.clone();
            Box::pin(async move {
               let this = upgrade(&weak)?;
               this.gate_emit(&request).await
            })
         }),
      );

      let weak = Arc::downgrade(&self.inner);
      broker.add_middleware(
         MiddlewareKind::Subscribe,
         Arc::new(move |request: InboundRequest| {
            let weak = weak.clone();
            Box::pin(async move {
               let this = upgrade(&weak)?;
               gate_subscribe(this, &request).await
            })
         }),
      );
   }

   /// Inserts a document and publishes creation notifications.
   ///
   /// Publishes the resource channel (empty) and `{type:"create", id}`
   /// on every affected view instance. Returns the new id.
   pub async fn create(&self, ctx: &RequestContext, query: Query) -> Result<String, CrudError> {
      query.validate(&self.inner.registry)?;
      let Some(value) = query.value.clone() else {
         return Err(CrudError::InvalidParams("create requires a value".into()));
      };
      let JsonValue::Object(map) = value else {
         return Err(CrudError::InvalidParams("create value must be an object".into()));
      };
      self.pre_filter(ctx, &query).await?;

      let document: Document = map.into_iter().collect();
      let id = self
         .inner
         .store
         .insert(&query.model, document.clone())
         .await
         .map_err(|error| self.store_error(error))?;

      let mut document = document;
      document.insert("id".into(), JsonValue::from(id.clone()));

      let _guard = self.mutation_guard(&query.model, &id).await;
      self.publish(&channel::resource_channel(&query.model, &id), None).await;
      for view in affected_views(&self.inner.registry, &query.model, &document, None) {
         self
            .publish(
               &view.channel(),
               Some(ChangeMessage::view_create(id.clone()).to_value()),
            )
            .await;
      }
      debug!(model = %query.model, id = %id, "created resource");
      Ok(id)
   }

   /// Reads a document, a field, or a collection page.
   ///
   /// Document reads are coalesced: concurrent readers of the same
   /// resource share one store fetch, and the first read leaves a live
   /// invalidation subscription on the resource channel behind.
   pub async fn read(&self, ctx: &RequestContext, query: Query) -> Result<ReadOutcome, CrudError> {
      query.validate(&self.inner.registry)?;
      self.pre_filter(ctx, &query).await?;

      let Some(id) = &query.id else {
         let page = self.read_collection(ctx, &query).await?;
         return Ok(ReadOutcome::Collection(page));
      };

      let document = self.read_resource(&query.model, id).await?;
      match &query.field {
         Some(field) => Ok(ReadOutcome::Field(
            document.get(field).cloned().unwrap_or(JsonValue::Null),
         )),
         None => Ok(ReadOutcome::Document(document)),
      }
   }

   /// Applies a field or document update and publishes the delta.
   ///
   /// Publishes the resource channel, `{type:"update", value}` per
   /// changed field, and view-level move / remove+add events where the
   /// document's position among view instances changed.
   pub async fn update(&self, ctx: &RequestContext, query: Query) -> Result<(), CrudError> {
      query.validate(&self.inner.registry)?;
      let Some(id) = query.id.clone() else {
         return Err(CrudError::InvalidParams("update requires an id".into()));
      };

      let changes = update_changes(&query, &id)?;
      self.pre_filter(ctx, &query).await?;

      let _guard = self.mutation_guard(&query.model, &id).await;
      let old = self
         .inner
         .store
         .fetch(&query.model, &id)
         .await
         .map_err(|error| self.store_error(error))?;

      let changed_fields: Vec<String> = changes.keys().cloned().collect();
      let old_affected = affected_views(&self.inner.registry, &query.model, &old, Some(&changed_fields));

      self
         .inner
         .store
         .apply(&query.model, &id, changes.clone())
         .await
         .map_err(|error| self.store_error(error))?;

      let mut new_document = old;
      for (field, value) in &changes {
         new_document.insert(field.clone(), value.clone());
      }

      self.publish(&channel::resource_channel(&query.model, &id), None).await;
      for (field, value) in &changes {
         let channel_name = channel::field_channel(&query.model, &id, field);
         let payload = ChangeMessage::field_update(value.clone()).to_value();
         self.publish(&channel_name, Some(payload.clone())).await;
         self.inner.cache.update(&channel_name, &payload);
      }

      let new_affected =
         affected_views(&self.inner.registry, &query.model, &new_document, Some(&changed_fields));
      for (old_view, new_view) in old_affected.iter().zip(&new_affected) {
         if old_view.params == new_view.params {
            if old_view.affecting_data != new_view.affecting_data {
               self
                  .publish(
                     &new_view.channel(),
                     Some(ChangeMessage::view_update(ViewAction::Move, id.clone()).to_value()),
                  )
                  .await;
            }
         } else {
            self
               .publish(
                  &old_view.channel(),
                  Some(ChangeMessage::view_update(ViewAction::Remove, id.clone()).to_value()),
               )
               .await;
            self
               .publish(
                  &new_view.channel(),
                  Some(ChangeMessage::view_update(ViewAction::Add, id.clone()).to_value()),
               )
               .await;
         }
      }
      debug!(model = %query.model, id = %id, fields = ?changed_fields, "updated resource");
      Ok(())
   }

   /// Deletes a field or a whole document and publishes the deletions.
   ///
   /// Whole-document deletes notify every known field channel (fields
   /// from the schema when declared, else from the deleted document) and
   /// `{type:"delete", id}` on every affected view instance.
   pub async fn delete(&self, ctx: &RequestContext, query: Query) -> Result<(), CrudError> {
      query.validate(&self.inner.registry)?;
      let Some(id) = query.id.clone() else {
         return Err(CrudError::InvalidParams("delete requires an id".into()));
      };
      self.pre_filter(ctx, &query).await?;

      let _guard = self.mutation_guard(&query.model, &id).await;
      let old = self
         .inner
         .store
         .fetch(&query.model, &id)
         .await
         .map_err(|error| self.store_error(error))?;

      if let Some(field) = &query.field {
         self
            .inner
            .store
            .remove_field(&query.model, &id, field)
            .await
            .map_err(|error| self.store_error(error))?;
         // No resource-channel publish on delete, so invalidate locally.
         self.inner.cache.clear(&Query::resource(&query.model, &id));
         self
            .publish(
               &channel::field_channel(&query.model, &id, field),
               Some(ChangeMessage::field_delete().to_value()),
            )
            .await;
         debug!(model = %query.model, id = %id, field = %field, "deleted field");
         return Ok(());
      }

      let affected = affected_views(&self.inner.registry, &query.model, &old, None);
      self
         .inner
         .store
         .remove(&query.model, &id)
         .await
         .map_err(|error| self.store_error(error))?;
      self.inner.cache.clear(&Query::resource(&query.model, &id));

      let fields: Vec<String> = match self.inner.registry.fields_of(&query.model) {
         Some(fields) if !fields.is_empty() => fields.iter().cloned().collect(),
         _ => old.keys().cloned().collect(),
      };
      for field in &fields {
         self
            .publish(
               &channel::field_channel(&query.model, &id, field),
               Some(ChangeMessage::field_delete().to_value()),
            )
            .await;
      }
      for view in affected {
         self
            .publish(&view.channel(), Some(ChangeMessage::view_delete(id.clone()).to_value()))
            .await;
      }
      debug!(model = %query.model, id = %id, "deleted resource");
      Ok(())
   }

   /// Signals that a resource changed outside this layer; subscribers
   /// refetch.
   pub async fn notify_resource_update(&self, query: &Query) -> Result<(), CrudError> {
      query.validate(&self.inner.registry)?;
      let Some(id) = &query.id else {
         return Err(CrudError::InvalidParams("notify requires an id".into()));
      };
      self.publish(&channel::resource_channel(&query.model, id), None).await;
      Ok(())
   }

   /// Signals that a view instance changed outside this layer.
   pub async fn notify_view_update(
      &self,
      model: &str,
      view: &str,
      view_params: &Document,
   ) -> Result<(), CrudError> {
      let Some(schema) = self.inner.registry.view_schema(model, view) else {
         return Err(CrudError::InvalidParams(format!(
            "unknown view '{view}' for model type '{model}'"
         )));
      };
      let params = schema.sanitize_params(Some(view_params));
      let primary = schema.primary_params(&params);
      self
         .publish(
            &channel::view_channel(model, view, &primary),
            Some(
               ChangeMessage::Update {
                  action: None,
                  id: None,
                  value: None,
               }
               .to_value(),
            ),
         )
         .await;
      Ok(())
   }

   /// Publishes the delta between two externally-observed versions of a
   /// resource: a resource-channel clear signal, field updates for every
   /// differing field, and one coarse update per distinct affected view
   /// instance across both versions.
   pub async fn notify_update(
      &self,
      model: &str,
      old_resource: &Document,
      new_resource: &Document,
   ) -> Result<(), CrudError> {
      if !self.inner.registry.has_model(model) {
         return Err(CrudError::InvalidModelType(model.to_string()));
      }
      let id = old_resource
         .get("id")
         .or_else(|| new_resource.get("id"))
         .and_then(JsonValue::as_str)
         .map(str::to_string)
         .ok_or_else(|| CrudError::InvalidParams("resources must carry an id".into()))?;

      let mut modified: Vec<String> = Vec::new();
      for key in old_resource.keys().chain(new_resource.keys()) {
         if modified.iter().any(|seen| seen == key) {
            continue;
         }
         if old_resource.get(key) != new_resource.get(key) {
            modified.push(key.clone());
         }
      }
      if modified.is_empty() {
         return Ok(());
      }

      self.publish(&channel::resource_channel(model, &id), None).await;
      for field in &modified {
         let value = new_resource.get(field).cloned().unwrap_or(JsonValue::Null);
         let channel_name = channel::field_channel(model, &id, field);
         let payload = ChangeMessage::field_update(value).to_value();
         self.publish(&channel_name, Some(payload.clone())).await;
         self.inner.cache.update(&channel_name, &payload);
      }

      let old_affected = affected_views(&self.inner.registry, model, old_resource, Some(&modified));
      let new_affected = affected_views(&self.inner.registry, model, new_resource, Some(&modified));
      let mut published: HashSet<String> = HashSet::new();
      for view in old_affected.into_iter().chain(new_affected) {
         let channel_name = view.channel();
         if published.insert(channel_name.clone()) {
            self
               .publish(
                  &channel_name,
                  Some(ChangeMessage::coarse_update(id.clone()).to_value()),
               )
               .await;
         }
      }
      Ok(())
   }

   async fn read_collection(
      &self,
      ctx: &RequestContext,
      query: &Query,
   ) -> Result<CollectionPage, CrudError> {
      let page_size = query.page_size.unwrap_or(self.inner.config.default_page_size);
      let offset = query.offset.unwrap_or(0);
      let view_query = self.collection_query(query);
      let plan = ViewPlan {
         query: view_query.clone(),
         offset,
         // One extra row decides isLastPage.
         limit: page_size + 1,
      };

      let ids_future = self.inner.store.view_ids(&query.model, &plan);
      let (ids, count) = if query.get_count {
         let (ids, count) =
            futures::join!(ids_future, self.inner.store.view_count(&query.model, &view_query));
         let count = match count {
            Ok(count) => Some(count),
            Err(error) => {
               warn!(model = %query.model, error = %error, "view count failed");
               None
            }
         };
         (ids, count)
      } else {
         (ids_future.await, None)
      };

      let mut ids = ids.map_err(|error| self.store_error(error))?;
      let is_last_page = ids.len() <= page_size;
      ids.truncate(page_size);

      let request = FilterRequest {
         socket_id: ctx.socket_id.clone(),
         auth_token: ctx.auth_token.clone(),
         query: query.clone(),
         resource: Some(JsonValue::from(ids.clone())),
      };
      self.inner.filters.post(&request).await?;

      Ok(CollectionPage {
         data: ids,
         is_last_page,
         count,
      })
   }

   fn collection_query(&self, query: &Query) -> ViewQuery {
      let Some(view) = &query.view else {
         return ViewQuery::default();
      };
      let Some(schema) = self.inner.registry.view_schema(&query.model, view) else {
         return ViewQuery::default();
      };
      let params = schema.sanitize_params(query.view_params.as_ref());
      match schema.transform() {
         Some(transform) => transform(ViewQuery::default(), &params),
         // Without a transform, the parameters filter by equality.
         None => params.iter().fold(ViewQuery::default(), |view_query, (field, value)| {
            view_query.filter_eq(field.clone(), value.clone())
         }),
      }
   }

   /// Coalesced document read with the subscription state machine of
   /// the module docs in `subscriptions`.
   async fn read_resource(&self, model: &str, id: &str) -> Result<Document, CrudError> {
      let Some(broker) = self.inner.broker.clone() else {
         return self.cached_fetch(model, id).await;
      };
      let channel_name = channel::resource_channel(model, id);

      match self.inner.subscriptions.register(&channel_name) {
         Registration::Active => self.cached_fetch(model, id).await,
         Registration::Joined(rx) => rx
            .await
            .unwrap_or_else(|_| Err(CrudError::Store("read was abandoned".into()))),
         Registration::Started(rx) => {
            match broker.subscribe(&channel_name).await {
               Ok(()) => {
                  let watch_task = self.spawn_invalidation_watch(&broker, &channel_name, model, id);
                  let buffer = self.inner.subscriptions.activate(&channel_name, watch_task);
                  let this = self.clone();
                  let model = model.to_string();
                  let id = id.to_string();
                  tokio::spawn(async move {
                     // Drain in enqueue order; the first pass fetches,
                     // the rest hit the fresh entry.
                     for waiter in buffer {
                        let result = this.cached_fetch(&model, &id).await;
                        let _ = waiter.send(result);
                     }
                  });
               }
               Err(err) => {
                  warn!(channel = %channel_name, error = %err, "resource channel subscription failed");
                  let failure = CrudError::FailedToSubscribeToResourceChannel {
                     channel: channel_name.clone(),
                  };
                  for waiter in self.inner.subscriptions.fail(&channel_name) {
                     let _ = waiter.send(Err(failure.clone()));
                  }
               }
            }
            rx.await
               .unwrap_or_else(|_| Err(CrudError::Store("read was abandoned".into())))
         }
      }
   }

   async fn cached_fetch(&self, model: &str, id: &str) -> Result<Document, CrudError> {
      let query = Query::resource(model, id);
      let store = Arc::clone(&self.inner.store);
      let model = model.to_string();
      let id = id.to_string();
      let result = self
         .inner
         .cache
         .pass(&query, move || {
            Box::pin(async move {
               store.fetch(&model, &id).await.map_err(|err| match err {
                  StoreError::Backend(raw) => {
                     error!(model = %model, id = %id, error = %raw, "store fetch failed");
                     CacheError::Fetch("store operation failed".into())
                  }
                  other => CacheError::Fetch(other.to_string()),
               })
            })
         })
         .await;
      result.map_err(CrudError::from)
   }

   fn spawn_invalidation_watch(
      &self,
      broker: &Arc<dyn Broker>,
      channel_name: &str,
      model: &str,
      id: &str,
   ) -> AbortHandle {
      let mut stream = broker.watch(channel_name);
      let weak = Arc::downgrade(&self.inner);
      let query = Query::resource(model, id);
      let task = tokio::spawn(async move {
         while stream.next().await.is_some() {
            let Some(inner) = weak.upgrade() else {
               break;
            };
            // Any observed change invalidates; the next read refetches.
            inner.cache.clear(&query);
         }
      });
      task.abort_handle()
   }

   fn spawn_cache_event_loop(&self) {
      let mut events = self.inner.cache.events();
      let weak = Arc::downgrade(&self.inner);
      tokio::spawn(async move {
         loop {
            match events.recv().await {
               Ok(event)
                  if matches!(event.kind, CacheEventKind::Expire | CacheEventKind::Clear) =>
               {
                  let Some(inner) = weak.upgrade() else {
                     break;
                  };
                  inner.release_resource_channel(&event.model, &event.id);
               }
               Ok(_) => {}
               Err(broadcast::error::RecvError::Lagged(missed)) => {
                  warn!(missed, "cache event stream lagged");
               }
               Err(broadcast::error::RecvError::Closed) => break,
            }
         }
      });
   }

   async fn pre_filter(&self, ctx: &RequestContext, query: &Query) -> Result<(), CrudError> {
      let request = FilterRequest {
         socket_id: ctx.socket_id.clone(),
         auth_token: ctx.auth_token.clone(),
         query: query.clone(),
         resource: None,
      };
      self.inner.filters.pre(&request).await
   }

   async fn publish(&self, channel_name: &str, message: Option<JsonValue>) {
      let Some(broker) = &self.inner.broker else {
         return;
      };
      if let Err(err) = broker.publish(channel_name, message).await {
         warn!(channel = %channel_name, error = %err, "failed to publish change notification");
      }
   }

   /// Serializes mutations per `(model, id)` so the publish sequence of
   /// one mutation never interleaves with another on the same resource.
   async fn mutation_guard(&self, model: &str, id: &str) -> tokio::sync::OwnedMutexGuard<()> {
      let lock = {
         let mut locks = self.inner.mutation_locks.lock();
         Arc::clone(
            locks
               .entry((model.to_string(), id.to_string()))
               .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
         )
      };
      lock.lock_owned().await
   }

   fn store_error(&self, err: StoreError) -> CrudError {
      match err {
         StoreError::Backend(raw) => {
            error!(error = %raw, "store operation failed");
            CrudError::Store("store operation failed".into())
         }
         other => CrudError::Store(other.to_string()),
      }
   }
}

impl OrchestratorInner {
   fn release_resource_channel(&self, model: &str, id: &str) {
      let channel_name = channel::resource_channel(model, id);
      if self.subscriptions.teardown(&channel_name)
         && let Some(broker) = &self.broker
      {
         broker.unsubscribe(&channel_name);
         broker.destroy_channel(&channel_name);
         debug!(channel = %channel_name, "released resource channel");
      }
   }

   async fn gate_emit(&self, request: &InboundRequest) -> Result<(), MiddlewareError> {
      let Some(event) = request.event.as_deref() else {
         return Ok(());
      };
      if !matches!(event, "create" | "read" | "update" | "delete") {
         return Ok(());
      }
      let query: Query = match request.data.clone() {
         Some(data) => serde_json::from_value(data)
            .map_err(|err| reject(CrudError::InvalidArguments(err.to_string())))?,
         None => return Err(reject(CrudError::InvalidArguments("missing query".into()))),
      };
      let filter_request = FilterRequest {
         socket_id: request.socket_id.clone(),
         auth_token: request.auth_token.clone(),
         query,
         resource: None,
      };
      self
         .filters
         .access_control(&filter_request, self.config.block_inbound_by_default)
         .await
         .map_err(reject)
   }

}

/// Subscribe middleware for `crud>` channels: validate the address, run
/// the pre filter, then the post filter with a cached resource fetch.
async fn gate_subscribe(
   inner: Arc<OrchestratorInner>,
   request: &InboundRequest,
) -> Result<(), MiddlewareError> {
   let Some(channel_name) = request.channel.clone() else {
      return Ok(());
   };
   if !is_crud_channel(&channel_name) {
      return Ok(());
   }
   let Some(address) = channel::parse(&channel_name) else {
      return Err(reject(CrudError::InvalidArguments(format!(
         "unparseable channel '{channel_name}'"
      ))));
   };

   match &address {
      ChannelAddress::Model { model, .. } => {
         if !inner.registry.has_model(model) {
            return Err(reject(CrudError::InvalidModelType(model.clone())));
         }
      }
      ChannelAddress::View { model, view, .. } => {
         if inner.registry.view_schema(model, view).is_none() {
            return Err(reject(CrudError::InvalidParams(format!(
               "unknown view '{view}' for model type '{model}'"
            ))));
         }
      }
   }

   let query = query_for_address(&address);
   let filter_request = FilterRequest {
      socket_id: request.socket_id.clone(),
      auth_token: request.auth_token.clone(),
      query,
      resource: None,
   };
   inner.filters.pre(&filter_request).await.map_err(reject)?;

   let orchestrator = CrudOrchestrator {
      inner: Arc::clone(&inner),
   };
   inner
      .filters
      .post_with_fetch(filter_request, move || async move {
         match &address {
            ChannelAddress::Model {
               model,
               id: Some(id),
               ..
            } => {
               let document = orchestrator.cached_fetch(model, id).await?;
               Ok(Some(JsonValue::Object(document.into_iter().collect())))
            }
            _ => Ok(None),
         }
      })
      .await
      .map_err(reject)
}

fn query_for_address(address: &ChannelAddress) -> Query {
   match address {
      ChannelAddress::Model { model, id, field } => Query {
         model: model.clone(),
         id: id.clone(),
         field: field.clone(),
         ..Query::default()
      },
      ChannelAddress::View {
         model,
         view,
         params,
      } => Query {
         model: model.clone(),
         view: Some(view.clone()),
         view_params: Some(params.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
         ..Query::default()
      },
   }
}

/// Parses and normalizes an update request into the field changes to
/// apply. Rejects `id` modification.
fn update_changes(query: &Query, id: &str) -> Result<Document, CrudError> {
   match (&query.field, &query.value) {
      (Some(field), value) => {
         if field == "id" {
            return Err(CrudError::InvalidOperation("the id field cannot be modified".into()));
         }
         let value = value.clone().unwrap_or(JsonValue::Null);
         if value.is_object() {
            return Err(CrudError::InvalidParams("field updates take a scalar value".into()));
         }
         let mut changes = Document::new();
         changes.insert(field.clone(), value);
         Ok(changes)
      }
      (None, Some(JsonValue::Object(map))) => {
         let mut changes: Document = map.clone().into_iter().collect();
         if let Some(new_id) = changes.get("id") {
            if new_id != &JsonValue::from(id) {
               return Err(CrudError::InvalidOperation("the id field cannot be modified".into()));
            }
            changes.shift_remove("id");
         }
         if changes.is_empty() {
            return Err(CrudError::InvalidParams("update value has no fields".into()));
         }
         Ok(changes)
      }
      (None, Some(_)) => Err(CrudError::InvalidOperation(
         "a document cannot be replaced with a primitive".into(),
      )),
      (None, None) => Err(CrudError::InvalidParams("update requires a field or a value".into())),
   }
}

fn reject(err: CrudError) -> MiddlewareError {
   Box::new(err)
}

fn upgrade(weak: &Weak<OrchestratorInner>) -> Result<Arc<OrchestratorInner>, MiddlewareError> {
   weak
      .upgrade()
      .ok_or_else(|| reject(CrudError::Store("data layer is shut down".into())))
}

impl Clone for CrudOrchestrator {
   fn clone(&self) -> Self {
      Self {
         inner: Arc::clone(&self.inner),
      }
   }
}

impl std::fmt::Debug for CrudOrchestrator {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("CrudOrchestrator")
         .field("registry", &self.inner.registry)
         .field("cache", &self.inner.cache)
         .field("has_broker", &self.inner.broker.is_some())
         .finish()
   }
}
