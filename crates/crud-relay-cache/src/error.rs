/// Errors surfaced by cache reads.
///
/// `Clone` so one failed fetch can be fanned out to every waiter on the
/// pending entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
   /// The data provider failed; the message is already sanitized for
   /// delivery to callers.
   #[error("{0}")]
   Fetch(String),

   /// The fetch task went away before delivering a result.
   #[error("resource fetch was abandoned before completing")]
   Abandoned,
}
