//! Single-flight, TTL-based resource cache.
//!
//! # Data flow
//!
//! ```text
//! pass(query) ──┬─ resolved entry ──► deliver clone, refresh TTL
//!               ├─ pending entry ───► join waiter list
//!               └─ no entry ────────► install pending slot, run provider
//!                                        │
//!                          patch map ◄── update(channel, message)
//!                                        │
//!                                        ▼
//!                          merge patch over fetched document,
//!                          install resolved entry, notify waiters in order
//! ```
//!
//! Concurrent reads of the same `(model, id)` share one provider
//! invocation: later readers join the pending entry's waiter list and are
//! notified in enqueue order when the fetch completes. Field-level change
//! events observed while the fetch is in flight land in the entry's patch
//! map and win over the fetched values, so waiters never see data older
//! than a change they were told about.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crud_relay_schema::channel::{self, ChannelAddress};
use crud_relay_schema::message::ChangeMessage;
use crud_relay_schema::query::Query;
use crud_relay_schema::value::Document;

use crate::error::CacheError;
use crate::event::{CacheEvent, CacheEventKind};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Future produced by a cache data provider.
pub type FetchFuture = BoxFuture<'static, Result<Document, CacheError>>;

type Waiter = oneshot::Sender<Result<Document, CacheError>>;
type CacheKey = (String, String);

/// Short-TTL document cache with single-flight reads.
///
/// Cheap to clone; clones share the same entries and event stream.
pub struct ResourceCache {
   inner: Arc<CacheInner>,
}

struct CacheInner {
   entries: Mutex<HashMap<CacheKey, Entry>>,
   ttl: Duration,
   disabled: bool,
   generations: AtomicU64,
   events: broadcast::Sender<CacheEvent>,
}

struct Entry {
   state: EntryState,
   expiry: Option<AbortHandle>,
   generation: u64,
}

enum EntryState {
   Pending(Arc<Mutex<PendingFetch>>),
   Resolved(Document),
}

#[derive(Default)]
struct PendingFetch {
   waiters: Vec<Waiter>,
   patch: IndexMap<String, JsonValue>,
}

impl ResourceCache {
   /// Creates a cache whose entries live for `ttl` after their last
   /// write or hit. A disabled cache passes every read straight through
   /// to its provider.
   pub fn new(ttl: Duration, disabled: bool) -> Self {
      let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
      Self {
         inner: Arc::new(CacheInner {
            entries: Mutex::new(HashMap::new()),
            ttl,
            disabled,
            generations: AtomicU64::new(0),
            events,
         }),
      }
   }

   pub fn is_disabled(&self) -> bool {
      self.inner.disabled
   }

   /// Subscribes to cache lifecycle events.
   pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
      self.inner.events.subscribe()
   }

   /// Reads through the cache, coalescing concurrent fetches.
   ///
   /// When caching is disabled or the query does not address a single
   /// resource, the provider runs directly. Otherwise the first reader
   /// of a key runs the provider and every concurrent reader joins its
   /// waiter list; all of them resolve with the same document or the
   /// same error. Errors are never cached.
   pub async fn pass<F>(&self, query: &Query, provider: F) -> Result<Document, CacheError>
   where
      F: FnOnce() -> FetchFuture,
   {
      let key = match entry_key(query) {
         Some(key) if !self.inner.disabled => key,
         _ => return provider().await,
      };

      enum Registered {
         Hit(Document),
         Wait(oneshot::Receiver<Result<Document, CacheError>>),
         Fetch(oneshot::Receiver<Result<Document, CacheError>>, Arc<Mutex<PendingFetch>>),
      }

      let registered = {
         let mut entries = self.inner.entries.lock();
         match entries.get_mut(&key) {
            Some(entry) => match &entry.state {
               EntryState::Resolved(document) => {
                  let document = document.clone();
                  self.arm_expiry(&key, entry);
                  Registered::Hit(document)
               }
               EntryState::Pending(pending) => {
                  let (tx, rx) = oneshot::channel();
                  pending.lock().waiters.push(tx);
                  Registered::Wait(rx)
               }
            },
            None => {
               let (tx, rx) = oneshot::channel();
               let pending = Arc::new(Mutex::new(PendingFetch {
                  waiters: vec![tx],
                  patch: IndexMap::new(),
               }));
               let mut entry = Entry {
                  state: EntryState::Pending(Arc::clone(&pending)),
                  expiry: None,
                  generation: 0,
               };
               self.arm_expiry(&key, &mut entry);
               entries.insert(key.clone(), entry);
               Registered::Fetch(rx, pending)
            }
         }
      };

      match registered {
         Registered::Hit(document) => {
            trace!(model = %key.0, id = %key.1, "cache hit");
            self.inner.emit(CacheEventKind::Hit, &key);
            Ok(document)
         }
         Registered::Wait(rx) => rx.await.unwrap_or(Err(CacheError::Abandoned)),
         Registered::Fetch(rx, pending) => {
            trace!(model = %key.0, id = %key.1, "cache miss, fetching");
            self.inner.emit(CacheEventKind::Miss, &key);
            let result = provider().await;
            self.complete(&key, &pending, result);
            rx.await.unwrap_or(Err(CacheError::Abandoned))
         }
      }
   }

   /// The cached document, if a resolved entry exists.
   pub fn get(&self, query: &Query) -> Option<Document> {
      if self.inner.disabled {
         return None;
      }
      let key = entry_key(query)?;
      let entries = self.inner.entries.lock();
      match entries.get(&key) {
         Some(Entry {
            state: EntryState::Resolved(document),
            ..
         }) => Some(document.clone()),
         _ => None,
      }
   }

   /// Writes a resolved entry with a fresh TTL, replacing any prior
   /// entry and cancelling its timer.
   pub fn set(&self, query: &Query, document: Document) {
      if self.inner.disabled {
         return;
      }
      let Some(key) = entry_key(query) else {
         return;
      };
      let previous = {
         let mut entries = self.inner.entries.lock();
         let mut entry = Entry {
            state: EntryState::Resolved(document),
            expiry: None,
            generation: 0,
         };
         self.arm_expiry(&key, &mut entry);
         entries.insert(key.clone(), entry)
      };
      if let Some(previous) = previous
         && let Some(handle) = previous.expiry
      {
         handle.abort();
      }
      self.inner.emit(CacheEventKind::Set, &key);
   }

   /// Removes the entry for a resource, cancelling its timer.
   pub fn clear(&self, query: &Query) {
      if self.inner.disabled {
         return;
      }
      let Some(key) = entry_key(query) else {
         return;
      };
      let removed = self.inner.entries.lock().remove(&key);
      if let Some(entry) = removed {
         if let Some(handle) = entry.expiry {
            handle.abort();
         }
         debug!(model = %key.0, id = %key.1, "cache entry cleared");
         self.inner.emit(CacheEventKind::Clear, &key);
      }
   }

   /// Applies a field-level change event observed on a broker channel.
   ///
   /// Only `(model, id, field)` channels carrying `{type:"update", value}`
   /// apply; anything else is ignored. Pending entries collect the value
   /// in their patch map, resolved entries are patched in place.
   pub fn update(&self, channel_name: &str, message: &JsonValue) {
      if self.inner.disabled {
         return;
      }
      let Some(ChannelAddress::Model {
         model,
         id: Some(id),
         field: Some(field),
      }) = channel::parse(channel_name)
      else {
         return;
      };
      let Some(ChangeMessage::Update {
         action: None,
         value: Some(value),
         ..
      }) = ChangeMessage::from_value(message)
      else {
         return;
      };

      let key = (model, id);
      let applied = {
         let mut entries = self.inner.entries.lock();
         match entries.get_mut(&key) {
            Some(entry) => {
               match &mut entry.state {
                  EntryState::Pending(pending) => {
                     pending.lock().patch.insert(field.clone(), value);
                  }
                  EntryState::Resolved(document) => {
                     document.insert(field.clone(), value);
                  }
               }
               true
            }
            None => false,
         }
      };
      if applied {
         trace!(model = %key.0, id = %key.1, field = %field, "field patch applied");
         self.inner.emit(CacheEventKind::Update, &key);
      }
   }

   /// Resolves a finished fetch: merges patches, installs the resolved
   /// entry, and notifies waiters in enqueue order.
   fn complete(
      &self,
      key: &CacheKey,
      pending: &Arc<Mutex<PendingFetch>>,
      result: Result<Document, CacheError>,
   ) {
      match result {
         Ok(mut document) => {
            let waiters = {
               let mut state = pending.lock();
               // Patch values observed mid-fetch win over fetched values.
               for (field, value) in state.patch.drain(..) {
                  document.insert(field, value);
               }
               std::mem::take(&mut state.waiters)
            };
            {
               let mut entries = self.inner.entries.lock();
               match entries.get_mut(key) {
                  Some(entry) => {
                     let ours = matches!(&entry.state, EntryState::Pending(current) if Arc::ptr_eq(current, pending));
                     if ours {
                        entry.state = EntryState::Resolved(document.clone());
                        self.arm_expiry(key, entry);
                     }
                     // Otherwise a newer fetch or explicit set owns the
                     // slot; leave it.
                  }
                  None => {
                     // Expired or cleared mid-fetch; install the
                     // resolved value fresh.
                     let mut entry = Entry {
                        state: EntryState::Resolved(document.clone()),
                        expiry: None,
                        generation: 0,
                     };
                     self.arm_expiry(key, &mut entry);
                     entries.insert(key.clone(), entry);
                  }
               }
            }
            self.inner.emit(CacheEventKind::Set, key);
            for waiter in waiters {
               let _ = waiter.send(Ok(document.clone()));
            }
         }
         Err(error) => {
            warn!(model = %key.0, id = %key.1, error = %error, "resource fetch failed");
            let waiters = std::mem::take(&mut pending.lock().waiters);
            {
               let mut entries = self.inner.entries.lock();
               let ours = matches!(
                  entries.get(key),
                  Some(Entry { state: EntryState::Pending(current), .. }) if Arc::ptr_eq(current, pending)
               );
               if ours && let Some(entry) = entries.remove(key) {
                  if let Some(handle) = entry.expiry {
                     handle.abort();
                  }
               }
            }
            for waiter in waiters {
               let _ = waiter.send(Err(error.clone()));
            }
         }
      }
   }

   /// Installs a fresh TTL timer on an entry, cancelling the previous
   /// one. The generation counter keeps an aborted timer from removing
   /// a newer entry if abort races with firing.
   fn arm_expiry(&self, key: &CacheKey, entry: &mut Entry) {
      if let Some(handle) = entry.expiry.take() {
         handle.abort();
      }
      let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
      entry.generation = generation;
      let ttl = self.inner.ttl;
      let weak = Arc::downgrade(&self.inner);
      let key = key.clone();
      let task = tokio::spawn(async move {
         tokio::time::sleep(ttl).await;
         if let Some(inner) = weak.upgrade() {
            inner.expire(&key, generation);
         }
      });
      entry.expiry = Some(task.abort_handle());
   }
}

impl Clone for ResourceCache {
   fn clone(&self) -> Self {
      Self {
         inner: Arc::clone(&self.inner),
      }
   }
}

impl std::fmt::Debug for ResourceCache {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("ResourceCache")
         .field("entries", &self.inner.entries.lock().len())
         .field("ttl", &self.inner.ttl)
         .field("disabled", &self.inner.disabled)
         .finish()
   }
}

impl CacheInner {
   fn expire(&self, key: &CacheKey, generation: u64) {
      let removed = {
         let mut entries = self.entries.lock();
         match entries.get(key) {
            Some(entry) if entry.generation == generation => entries.remove(key),
            _ => None,
         }
      };
      if removed.is_some() {
         debug!(model = %key.0, id = %key.1, "cache entry expired");
         self.emit(CacheEventKind::Expire, key);
      }
   }

   fn emit(&self, kind: CacheEventKind, key: &CacheKey) {
      let _ = self.events.send(CacheEvent {
         kind,
         model: key.0.clone(),
         id: key.1.clone(),
      });
   }
}

fn entry_key(query: &Query) -> Option<CacheKey> {
   let id = query.id.as_deref().filter(|id| !id.is_empty())?;
   if query.model.is_empty() {
      return None;
   }
   Some((query.model.clone(), id.to_string()))
}
