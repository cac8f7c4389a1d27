//! Integration tests for the CRUD orchestrator.
//!
//! Tests verify:
//! - Creation, update, and deletion publish the right channels/payloads
//! - Concurrent reads of one resource coalesce into a single store fetch
//! - View-level events distinguish move from remove+add
//! - Middleware denies outside publishes and filters subscriptions
//! - Out-of-band notifiers emit coarse per-view events

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value as JsonValue, json};
use tokio::time::timeout;

use crud_relay::broker::MessageStream;
use crud_relay::broker::middleware::MiddlewareHandler;
use crud_relay::{
   Broker, BrokerError, CrudConfig, CrudError, CrudOrchestrator, Direction, Document,
   FilterDenied, FilterPhase, InboundRequest, MemoryBroker, MemoryStore, MiddlewareKind,
   ModelSchema, Query, ReadOutcome, RequestContext, SchemaRegistry, StoreAdapter, StoreError,
   ViewPlan, ViewSchema,
};

const CATEGORY_C1: &str = r#"crud>byCategory({"categoryId":"c1"}):Product"#;
const CATEGORY_C2: &str = r#"crud>byCategory({"categoryId":"c2"}):Product"#;

fn registry() -> SchemaRegistry {
   SchemaRegistry::builder()
      .model(
         "Product",
         ModelSchema::new(["id", "name", "categoryId", "price"]).with_view(
            "byCategory",
            ViewSchema::new(["categoryId"])
               .with_affecting_fields(["price"])
               .with_transform(|query, params| {
                  let category = params.get("categoryId").cloned().unwrap_or(JsonValue::Null);
                  query
                     .filter_eq("categoryId", category)
                     .order_by("price", Direction::Ascending)
               }),
         ),
      )
      .build()
}

fn setup() -> (CrudOrchestrator, MemoryBroker) {
   setup_with(registry(), Arc::new(MemoryStore::new()))
}

fn setup_with(
   registry: SchemaRegistry,
   store: Arc<dyn StoreAdapter>,
) -> (CrudOrchestrator, MemoryBroker) {
   let broker = MemoryBroker::new();
   let orchestrator = CrudOrchestrator::with_broker(
      registry,
      store,
      Arc::new(broker.clone()),
      CrudConfig::default(),
   );
   orchestrator.attach_middleware();
   (orchestrator, broker)
}

fn product_query(value: JsonValue) -> Query {
   Query {
      model: "Product".into(),
      value: Some(value),
      ..Query::default()
   }
}

async fn next_message(stream: &mut MessageStream) -> Option<JsonValue> {
   timeout(Duration::from_secs(1), stream.next())
      .await
      .unwrap_or_else(|_| panic!("timed out waiting on '{}'", stream.channel()))
      .unwrap_or_else(|| panic!("channel '{}' closed", stream.channel()))
}

async fn assert_silent(stream: &mut MessageStream) {
   if let Ok(message) = timeout(Duration::from_millis(80), stream.next()).await {
      panic!("unexpected message on '{}': {message:?}", stream.channel());
   }
}

/// Store wrapper counting document fetches.
struct CountingStore {
   inner: MemoryStore,
   fetches: AtomicUsize,
}

impl CountingStore {
   fn new() -> Self {
      Self {
         inner: MemoryStore::new(),
         fetches: AtomicUsize::new(0),
      }
   }

   fn fetch_count(&self) -> usize {
      self.fetches.load(Ordering::SeqCst)
   }
}

#[async_trait]
impl StoreAdapter for CountingStore {
   async fn fetch(&self, model: &str, id: &str) -> Result<Document, StoreError> {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      self.inner.fetch(model, id).await
   }

   async fn insert(&self, model: &str, document: Document) -> Result<String, StoreError> {
      self.inner.insert(model, document).await
   }

   async fn apply(&self, model: &str, id: &str, changes: Document) -> Result<(), StoreError> {
      self.inner.apply(model, id, changes).await
   }

   async fn remove(&self, model: &str, id: &str) -> Result<(), StoreError> {
      self.inner.remove(model, id).await
   }

   async fn remove_field(&self, model: &str, id: &str, field: &str) -> Result<(), StoreError> {
      self.inner.remove_field(model, id, field).await
   }

   async fn view_ids(&self, model: &str, plan: &ViewPlan) -> Result<Vec<String>, StoreError> {
      self.inner.view_ids(model, plan).await
   }

   async fn view_count(
      &self,
      model: &str,
      query: &crud_relay::ViewQuery,
   ) -> Result<u64, StoreError> {
      self.inner.view_count(model, query).await
   }
}

/// Broker whose server-side subscriptions always fail.
struct FailingBroker {
   inner: MemoryBroker,
}

#[async_trait]
impl Broker for FailingBroker {
   fn add_middleware(&self, kind: MiddlewareKind, handler: MiddlewareHandler) {
      self.inner.add_middleware(kind, handler);
   }

   async fn subscribe(&self, channel: &str) -> Result<(), BrokerError> {
      Err(BrokerError::SubscribeFailed {
         channel: channel.to_string(),
         reason: "exchange unavailable".into(),
      })
   }

   fn unsubscribe(&self, channel: &str) {
      self.inner.unsubscribe(channel);
   }

   fn destroy_channel(&self, channel: &str) {
      self.inner.destroy_channel(channel);
   }

   fn watch(&self, channel: &str) -> MessageStream {
      self.inner.watch(channel)
   }

   fn is_subscribed(&self, channel: &str, include_pending: bool) -> bool {
      self.inner.is_subscribed(channel, include_pending)
   }

   async fn publish(&self, channel: &str, message: Option<JsonValue>) -> Result<(), BrokerError> {
      self.inner.publish(channel, message).await
   }
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_create_publishes_resource_and_view_channels() {
   let (orchestrator, broker) = setup();
   let mut resource = broker.watch("crud>Product/p1");
   let mut view = broker.watch(CATEGORY_C1);

   let id = orchestrator
      .create(
         &RequestContext::default(),
         product_query(json!({"id": "p1", "name": "A", "categoryId": "c1"})),
      )
      .await
      .unwrap();
   assert_eq!(id, "p1");

   assert_eq!(next_message(&mut resource).await, None);
   assert_eq!(
      next_message(&mut view).await,
      Some(json!({"type": "create", "id": "p1"}))
   );
}

#[tokio::test]
async fn test_create_generates_id_when_absent() {
   let (orchestrator, _broker) = setup();
   let id = orchestrator
      .create(
         &RequestContext::default(),
         product_query(json!({"name": "A", "categoryId": "c1"})),
      )
      .await
      .unwrap();
   assert!(!id.is_empty());

   let document = orchestrator
      .read(&RequestContext::default(), Query::resource("Product", id.clone()))
      .await
      .unwrap()
      .document()
      .unwrap();
   assert_eq!(document.get("id"), Some(&json!(id)));
}

#[tokio::test]
async fn test_create_requires_object_value() {
   let (orchestrator, _broker) = setup();
   let err = orchestrator
      .create(&RequestContext::default(), product_query(json!("scalar")))
      .await
      .unwrap_err();
   assert_eq!(err.error_code(), "CRUDInvalidParams");

   let err = orchestrator
      .create(
         &RequestContext::default(),
         Query {
            model: "Product".into(),
            ..Query::default()
         },
      )
      .await
      .unwrap_err();
   assert_eq!(err.error_code(), "CRUDInvalidParams");
}

#[tokio::test]
async fn test_unknown_model_is_rejected() {
   let (orchestrator, _broker) = setup();
   let err = orchestrator
      .read(&RequestContext::default(), Query::resource("Order", "o1"))
      .await
      .unwrap_err();
   assert_eq!(err.error_code(), "CRUDInvalidModelType");
}

// ============================================================================
// Coalesced reads
// ============================================================================

#[tokio::test]
async fn test_concurrent_reads_issue_one_fetch_and_leave_subscription() {
   let store = Arc::new(CountingStore::new());
   let (orchestrator, broker) = setup_with(registry(), store.clone());
   store
      .insert("Product", doc(&[("id", json!("p1")), ("name", json!("A"))]))
      .await
      .unwrap();

   let ctx = RequestContext::default();
   let (a, b) = tokio::join!(
      orchestrator.read(&ctx, Query::resource("Product", "p1")),
      orchestrator.read(&ctx, Query::resource("Product", "p1")),
   );

   let a = a.unwrap().document().unwrap();
   let b = b.unwrap().document().unwrap();
   assert_eq!(a, b);
   assert_eq!(store.fetch_count(), 1);
   assert!(broker.is_subscribed("crud>Product/p1", false));
}

#[tokio::test]
async fn test_read_field_returns_single_value() {
   let (orchestrator, _broker) = setup();
   orchestrator
      .create(
         &RequestContext::default(),
         product_query(json!({"id": "p1", "name": "A", "categoryId": "c1"})),
      )
      .await
      .unwrap();

   let value = orchestrator
      .read(&RequestContext::default(), Query::field("Product", "p1", "name"))
      .await
      .unwrap()
      .field()
      .unwrap();
   assert_eq!(value, json!("A"));

   let absent = orchestrator
      .read(&RequestContext::default(), Query::field("Product", "p1", "missing"))
      .await
      .unwrap()
      .field()
      .unwrap();
   assert_eq!(absent, JsonValue::Null);
}

#[tokio::test]
async fn test_read_missing_resource_is_store_error() {
   let (orchestrator, _broker) = setup();
   let err = orchestrator
      .read(&RequestContext::default(), Query::resource("Product", "ghost"))
      .await
      .unwrap_err();
   assert_eq!(err.error_code(), "CRUDStoreError");
}

#[tokio::test]
async fn test_mutation_invalidates_cached_reads() {
   let store = Arc::new(CountingStore::new());
   let (orchestrator, broker) = setup_with(registry(), store.clone());
   let ctx = RequestContext::default();

   orchestrator
      .create(&ctx, product_query(json!({"id": "p1", "name": "A", "categoryId": "c1"})))
      .await
      .unwrap();
   orchestrator
      .read(&ctx, Query::resource("Product", "p1"))
      .await
      .unwrap();
   assert!(broker.is_subscribed("crud>Product/p1", false));

   orchestrator
      .update(
         &ctx,
         Query {
            model: "Product".into(),
            id: Some("p1".into()),
            value: Some(json!({"name": "B"})),
            ..Query::default()
         },
      )
      .await
      .unwrap();

   // The resource-channel publish loops back, clears the cache entry,
   // and the orchestrator releases the subscription.
   tokio::time::sleep(Duration::from_millis(50)).await;
   assert!(!broker.is_subscribed("crud>Product/p1", false));

   let document = orchestrator
      .read(&ctx, Query::resource("Product", "p1"))
      .await
      .unwrap()
      .document()
      .unwrap();
   assert_eq!(document.get("name"), Some(&json!("B")));
}

#[tokio::test]
async fn test_failed_subscription_flushes_buffered_reads() {
   let store = Arc::new(MemoryStore::new());
   store
      .insert("Product", doc(&[("id", json!("p1"))]))
      .await
      .unwrap();
   let broker = FailingBroker {
      inner: MemoryBroker::new(),
   };
   let orchestrator = CrudOrchestrator::with_broker(
      registry(),
      store,
      Arc::new(broker),
      CrudConfig::default(),
   );

   let ctx = RequestContext::default();
   let (a, b) = tokio::join!(
      orchestrator.read(&ctx, Query::resource("Product", "p1")),
      orchestrator.read(&ctx, Query::resource("Product", "p1")),
   );
   for result in [a, b] {
      let err = result.unwrap_err();
      assert_eq!(err.error_code(), "FailedToSubscribeToResourceChannel");
   }
}

// ============================================================================
// Collection reads
// ============================================================================

#[tokio::test]
async fn test_collection_read_pages_and_counts() {
   let (orchestrator, _broker) = setup();
   let ctx = RequestContext::default();
   for (id, category, price) in [("p1", "c1", 5), ("p2", "c1", 1), ("p3", "c1", 3), ("p4", "c2", 2)]
   {
      orchestrator
         .create(
            &ctx,
            product_query(json!({"id": id, "categoryId": category, "price": price})),
         )
         .await
         .unwrap();
   }

   let mut params = Document::new();
   params.insert("categoryId".into(), json!("c1"));
   let query = Query {
      model: "Product".into(),
      view: Some("byCategory".into()),
      view_params: Some(params),
      page_size: Some(2),
      get_count: true,
      ..Query::default()
   };

   let page = orchestrator
      .read(&ctx, query.clone())
      .await
      .unwrap()
      .collection()
      .unwrap();
   // Ordered by price ascending via the view transform.
   assert_eq!(page.data, ["p2", "p3"]);
   assert!(!page.is_last_page);
   assert_eq!(page.count, Some(3));

   let last = orchestrator
      .read(
         &ctx,
         Query {
            offset: Some(2),
            ..query
         },
      )
      .await
      .unwrap()
      .collection()
      .unwrap();
   assert_eq!(last.data, ["p1"]);
   assert!(last.is_last_page);
}

#[tokio::test]
async fn test_collection_read_without_view_pages_by_id() {
   let (orchestrator, _broker) = setup();
   let ctx = RequestContext::default();
   for id in ["p2", "p1", "p3"] {
      orchestrator
         .create(&ctx, product_query(json!({"id": id, "categoryId": "c1"})))
         .await
         .unwrap();
   }

   let page = orchestrator
      .read(
         &ctx,
         Query {
            model: "Product".into(),
            page_size: Some(10),
            ..Query::default()
         },
      )
      .await
      .unwrap()
      .collection()
      .unwrap();
   assert_eq!(page.data, ["p1", "p2", "p3"]);
   assert!(page.is_last_page);
   assert_eq!(page.count, None);
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn test_update_with_param_change_removes_and_adds() {
   let (orchestrator, broker) = setup();
   let ctx = RequestContext::default();
   orchestrator
      .create(&ctx, product_query(json!({"id": "p1", "categoryId": "c1"})))
      .await
      .unwrap();

   let mut resource = broker.watch("crud>Product/p1");
   let mut field = broker.watch("crud>Product/p1/categoryId");
   let mut old_view = broker.watch(CATEGORY_C1);
   let mut new_view = broker.watch(CATEGORY_C2);

   orchestrator
      .update(
         &ctx,
         Query {
            model: "Product".into(),
            id: Some("p1".into()),
            value: Some(json!({"categoryId": "c2"})),
            ..Query::default()
         },
      )
      .await
      .unwrap();

   assert_eq!(next_message(&mut resource).await, None);
   assert_eq!(
      next_message(&mut field).await,
      Some(json!({"type": "update", "value": "c2"}))
   );
   assert_eq!(
      next_message(&mut old_view).await,
      Some(json!({"type": "update", "action": "remove", "id": "p1"}))
   );
   assert_eq!(
      next_message(&mut new_view).await,
      Some(json!({"type": "update", "action": "add", "id": "p1"}))
   );
}

#[tokio::test]
async fn test_update_with_affecting_change_moves() {
   let (orchestrator, broker) = setup();
   let ctx = RequestContext::default();
   orchestrator
      .create(&ctx, product_query(json!({"id": "p1", "categoryId": "c1", "price": 5})))
      .await
      .unwrap();

   let mut view = broker.watch(CATEGORY_C1);
   orchestrator
      .update(
         &ctx,
         Query {
            model: "Product".into(),
            id: Some("p1".into()),
            value: Some(json!({"price": 9})),
            ..Query::default()
         },
      )
      .await
      .unwrap();

   assert_eq!(
      next_message(&mut view).await,
      Some(json!({"type": "update", "action": "move", "id": "p1"}))
   );
   assert_silent(&mut view).await;
}

#[tokio::test]
async fn test_update_of_irrelevant_field_skips_view_publish() {
   let (orchestrator, broker) = setup();
   let ctx = RequestContext::default();
   orchestrator
      .create(&ctx, product_query(json!({"id": "p1", "categoryId": "c1", "name": "A"})))
      .await
      .unwrap();

   let mut view = broker.watch(CATEGORY_C1);
   let mut field = broker.watch("crud>Product/p1/name");
   orchestrator
      .update(
         &ctx,
         Query {
            model: "Product".into(),
            id: Some("p1".into()),
            field: Some("name".into()),
            value: Some(json!("B")),
            ..Query::default()
         },
      )
      .await
      .unwrap();

   assert_eq!(
      next_message(&mut field).await,
      Some(json!({"type": "update", "value": "B"}))
   );
   assert_silent(&mut view).await;
}

#[tokio::test]
async fn test_update_rejects_id_modification() {
   let (orchestrator, _broker) = setup();
   let ctx = RequestContext::default();
   orchestrator
      .create(&ctx, product_query(json!({"id": "p1", "categoryId": "c1"})))
      .await
      .unwrap();

   let err = orchestrator
      .update(
         &ctx,
         Query {
            model: "Product".into(),
            id: Some("p1".into()),
            field: Some("id".into()),
            value: Some(json!("p2")),
            ..Query::default()
         },
      )
      .await
      .unwrap_err();
   assert_eq!(err.error_code(), "CRUDInvalidOperation");

   let err = orchestrator
      .update(
         &ctx,
         Query {
            model: "Product".into(),
            id: Some("p1".into()),
            value: Some(json!({"id": "p2", "name": "B"})),
            ..Query::default()
         },
      )
      .await
      .unwrap_err();
   assert_eq!(err.error_code(), "CRUDInvalidOperation");
}

#[tokio::test]
async fn test_update_rejects_primitive_replacement() {
   let (orchestrator, _broker) = setup();
   let ctx = RequestContext::default();
   orchestrator
      .create(&ctx, product_query(json!({"id": "p1", "categoryId": "c1"})))
      .await
      .unwrap();

   let err = orchestrator
      .update(
         &ctx,
         Query {
            model: "Product".into(),
            id: Some("p1".into()),
            value: Some(json!("primitive")),
            ..Query::default()
         },
      )
      .await
      .unwrap_err();
   assert_eq!(err.error_code(), "CRUDInvalidOperation");
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_publishes_field_and_view_deletions() {
   let (orchestrator, broker) = setup();
   let ctx = RequestContext::default();
   orchestrator
      .create(&ctx, product_query(json!({"id": "p1", "name": "A", "categoryId": "c1"})))
      .await
      .unwrap();

   // Schema fields drive the field-channel fan-out.
   let mut id_field = broker.watch("crud>Product/p1/id");
   let mut name_field = broker.watch("crud>Product/p1/name");
   let mut category_field = broker.watch("crud>Product/p1/categoryId");
   let mut price_field = broker.watch("crud>Product/p1/price");
   let mut view = broker.watch(CATEGORY_C1);

   orchestrator
      .delete(&ctx, Query::resource("Product", "p1"))
      .await
      .unwrap();

   for stream in [&mut id_field, &mut name_field, &mut category_field, &mut price_field] {
      assert_eq!(next_message(stream).await, Some(json!({"type": "delete"})));
   }
   assert_eq!(
      next_message(&mut view).await,
      Some(json!({"type": "delete", "id": "p1"}))
   );

   let err = orchestrator
      .read(&ctx, Query::resource("Product", "p1"))
      .await
      .unwrap_err();
   assert_eq!(err.error_code(), "CRUDStoreError");
}

#[tokio::test]
async fn test_delete_field_publishes_field_deletion_only() {
   let (orchestrator, broker) = setup();
   let ctx = RequestContext::default();
   orchestrator
      .create(&ctx, product_query(json!({"id": "p1", "name": "A", "categoryId": "c1"})))
      .await
      .unwrap();

   let mut name_field = broker.watch("crud>Product/p1/name");
   let mut view = broker.watch(CATEGORY_C1);

   orchestrator
      .delete(&ctx, Query::field("Product", "p1", "name"))
      .await
      .unwrap();

   assert_eq!(next_message(&mut name_field).await, Some(json!({"type": "delete"})));
   assert_silent(&mut view).await;

   let document = orchestrator
      .read(&ctx, Query::resource("Product", "p1"))
      .await
      .unwrap()
      .document()
      .unwrap();
   assert!(!document.contains_key("name"));
}

// ============================================================================
// Middleware
// ============================================================================

#[tokio::test]
async fn test_outside_publish_to_crud_channel_is_rejected() {
   let (_orchestrator, broker) = setup();

   let err = broker
      .inbound_publish(InboundRequest {
         socket_id: Some("socket-1".into()),
         channel: Some("crud>Product/p1".into()),
         data: Some(json!({"type": "delete"})),
         ..InboundRequest::default()
      })
      .await
      .unwrap_err();

   let BrokerError::Rejected(source) = err else {
      panic!("expected middleware rejection, got {err:?}");
   };
   let crud_err = source.downcast_ref::<CrudError>().expect("crud error");
   assert_eq!(crud_err.error_code(), "CRUDPublishNotAllowedError");
}

#[tokio::test]
async fn test_outside_publish_to_foreign_channel_is_admitted() {
   let (_orchestrator, broker) = setup();
   assert!(
      broker
         .inbound_publish(InboundRequest {
            channel: Some("chat/general".into()),
            data: Some(json!("hello")),
            ..InboundRequest::default()
         })
         .await
         .is_ok()
   );
}

#[tokio::test]
async fn test_blocked_pre_filter_denies_subscribe_without_fetch() {
   // The post hook would admit and requires a fetch; a pre denial must
   // short-circuit before any of that happens.
   let registry = SchemaRegistry::builder()
      .model(
         "Product",
         ModelSchema::new(["id", "name", "categoryId"])
            .with_view("byCategory", ViewSchema::new(["categoryId"]))
            .with_pre_filter(|_request| async { Err(FilterDenied::with_message("denied")) })
            .with_post_filter(|_request| async { Ok(()) }),
      )
      .build();
   let store = Arc::new(CountingStore::new());
   let (_orchestrator, broker) = setup_with(registry, store.clone());

   for channel in [CATEGORY_C1, "crud>Product/p1"] {
      let err = broker
         .inbound_subscribe(InboundRequest {
            socket_id: Some("socket-1".into()),
            channel: Some(channel.into()),
            ..InboundRequest::default()
         })
         .await
         .unwrap_err();

      let BrokerError::Rejected(source) = err else {
         panic!("expected middleware rejection, got {err:?}");
      };
      let crud_err = source.downcast_ref::<CrudError>().expect("crud error");
      assert_eq!(crud_err.error_code(), "CRUDBlockedError");
      assert_eq!(crud_err.blocked_phase(), Some(FilterPhase::Pre));
   }
   assert_eq!(store.fetch_count(), 0, "post-phase fetch must not run");
}

#[tokio::test]
async fn test_post_filter_on_subscribe_sees_cached_resource() {
   let registry = SchemaRegistry::builder()
      .model(
         "Product",
         ModelSchema::new(["id", "name", "categoryId"]).with_post_filter(
            |request: crud_relay::FilterRequest| async move {
               match request.resource {
                  Some(resource) if resource["name"] == "A" => Ok(()),
                  _ => Err(FilterDenied::with_message("wrong resource")),
               }
            },
         ),
      )
      .build();
   let store = Arc::new(MemoryStore::new());
   store
      .insert("Product", doc(&[("id", json!("p1")), ("name", json!("A"))]))
      .await
      .unwrap();
   let (_orchestrator, broker) = setup_with(registry, store);

   assert!(
      broker
         .inbound_subscribe(InboundRequest {
            channel: Some("crud>Product/p1".into()),
            ..InboundRequest::default()
         })
         .await
         .is_ok()
   );
}

#[tokio::test]
async fn test_emit_blocked_by_default_without_access_rule() {
   let broker = MemoryBroker::new();
   let orchestrator = CrudOrchestrator::with_broker(
      registry(),
      Arc::new(MemoryStore::new()),
      Arc::new(broker.clone()),
      CrudConfig::new().with_block_inbound_by_default(true),
   );
   orchestrator.attach_middleware();

   let err = broker
      .inbound_emit(InboundRequest {
         event: Some("read".into()),
         data: Some(json!({"type": "Product", "id": "p1"})),
         ..InboundRequest::default()
      })
      .await
      .unwrap_err();
   let BrokerError::Rejected(source) = err else {
      panic!("expected middleware rejection, got {err:?}");
   };
   assert_eq!(
      source.downcast_ref::<CrudError>().unwrap().error_code(),
      "CRUDBlockedError"
   );

   // Non-CRUD events pass through untouched.
   assert!(
      broker
         .inbound_emit(InboundRequest {
            event: Some("chat".into()),
            ..InboundRequest::default()
         })
         .await
         .is_ok()
   );
}

#[tokio::test]
async fn test_direct_read_blocked_by_pre_filter() {
   let registry = SchemaRegistry::builder()
      .model(
         "Product",
         ModelSchema::new(["id"]).with_pre_filter(|request: crud_relay::FilterRequest| async move {
            match request.auth_token {
               Some(_) => Ok(()),
               None => Err(FilterDenied::new()),
            }
         }),
      )
      .build();
   let (orchestrator, _broker) = setup_with(registry, Arc::new(MemoryStore::new()));

   let err = orchestrator
      .read(&RequestContext::default(), Query::resource("Product", "p1"))
      .await
      .unwrap_err();
   assert_eq!(err.blocked_phase(), Some(FilterPhase::Pre));

   let authed = RequestContext {
      auth_token: Some(json!({"user": "u1"})),
      ..RequestContext::default()
   };
   let err = orchestrator
      .read(&authed, Query::resource("Product", "p1"))
      .await
      .unwrap_err();
   // Past the filter; fails on the missing document instead.
   assert_eq!(err.error_code(), "CRUDStoreError");
}

// ============================================================================
// Out-of-band notify
// ============================================================================

#[tokio::test]
async fn test_notify_update_publishes_fields_and_coarse_view_events() {
   let (orchestrator, broker) = setup();
   let mut resource = broker.watch("crud>Product/p1");
   let mut field = broker.watch("crud>Product/p1/categoryId");
   let mut old_view = broker.watch(CATEGORY_C1);
   let mut new_view = broker.watch(CATEGORY_C2);

   let old = doc(&[("id", json!("p1")), ("categoryId", json!("c1")), ("price", json!(5))]);
   let new = doc(&[("id", json!("p1")), ("categoryId", json!("c2")), ("price", json!(5))]);
   orchestrator.notify_update("Product", &old, &new).await.unwrap();

   assert_eq!(next_message(&mut resource).await, None);
   assert_eq!(
      next_message(&mut field).await,
      Some(json!({"type": "update", "value": "c2"}))
   );
   // Coarse events: no move/remove/add distinction, one per instance.
   assert_eq!(
      next_message(&mut old_view).await,
      Some(json!({"type": "update", "id": "p1"}))
   );
   assert_eq!(
      next_message(&mut new_view).await,
      Some(json!({"type": "update", "id": "p1"}))
   );
   assert_silent(&mut old_view).await;
}

#[tokio::test]
async fn test_notify_update_with_same_params_emits_once() {
   let (orchestrator, broker) = setup();
   let mut view = broker.watch(CATEGORY_C1);

   let old = doc(&[("id", json!("p1")), ("categoryId", json!("c1")), ("price", json!(5))]);
   let new = doc(&[("id", json!("p1")), ("categoryId", json!("c1")), ("price", json!(9))]);
   orchestrator.notify_update("Product", &old, &new).await.unwrap();

   assert_eq!(
      next_message(&mut view).await,
      Some(json!({"type": "update", "id": "p1"}))
   );
   assert_silent(&mut view).await;
}

#[tokio::test]
async fn test_notify_update_with_no_delta_is_silent() {
   let (orchestrator, broker) = setup();
   let mut resource = broker.watch("crud>Product/p1");

   let same = doc(&[("id", json!("p1")), ("categoryId", json!("c1"))]);
   orchestrator.notify_update("Product", &same, &same.clone()).await.unwrap();
   assert_silent(&mut resource).await;
}

#[tokio::test]
async fn test_notify_resource_and_view_update() {
   let (orchestrator, broker) = setup();
   let mut resource = broker.watch("crud>Product/p1");
   let mut view = broker.watch(CATEGORY_C1);

   orchestrator
      .notify_resource_update(&Query::resource("Product", "p1"))
      .await
      .unwrap();
   assert_eq!(next_message(&mut resource).await, None);

   let mut params = Document::new();
   params.insert("categoryId".into(), json!("c1"));
   orchestrator
      .notify_view_update("Product", "byCategory", &params)
      .await
      .unwrap();
   assert_eq!(next_message(&mut view).await, Some(json!({"type": "update"})));
}

fn doc(pairs: &[(&str, JsonValue)]) -> Document {
   pairs
      .iter()
      .map(|(key, value)| (key.to_string(), value.clone()))
      .collect()
}

// ============================================================================
// Read outcome shapes
// ============================================================================

#[tokio::test]
async fn test_read_outcome_accessors() {
   let (orchestrator, _broker) = setup();
   let ctx = RequestContext::default();
   orchestrator
      .create(&ctx, product_query(json!({"id": "p1", "categoryId": "c1"})))
      .await
      .unwrap();

   let outcome = orchestrator
      .read(&ctx, Query::resource("Product", "p1"))
      .await
      .unwrap();
   assert!(matches!(&outcome, ReadOutcome::Document(_)));
   assert!(outcome.collection().is_none());
}
