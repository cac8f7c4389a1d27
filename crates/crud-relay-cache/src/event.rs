//! Cache lifecycle events.

/// What happened to a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEventKind {
   /// A read was served from a resolved entry.
   Hit,
   /// A read found no entry and started a fetch.
   Miss,
   /// A resolved entry was written.
   Set,
   /// An entry was removed by an explicit clear.
   Clear,
   /// An entry was removed by its TTL timer.
   Expire,
   /// A field-level patch was applied.
   Update,
}

/// One cache lifecycle event, keyed by the resource it concerns.
///
/// Consumers that tear down per-resource broker subscriptions watch for
/// `Expire` and `Clear`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
   pub kind: CacheEventKind,
   pub model: String,
   pub id: String,
}
