use std::time::Duration;

/// Default collection page size.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Default resource-cache TTL.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_millis(10_000);

/// Configuration for the data layer.
///
/// `cache_disabled` is tri-state: `None` resolves at construction to
/// "disabled when no broker is attached", since without a broker there is
/// no invalidation signal to keep cached values honest.
#[derive(Debug, Clone)]
pub struct CrudConfig {
   /// Rows per collection page when the query names no `pageSize`.
   pub default_page_size: usize,

   /// How long cached resources live after their last write or hit.
   pub cache_duration: Duration,

   /// Force the cache on (`Some(false)`) or off (`Some(true)`).
   pub cache_disabled: Option<bool>,

   /// Deny inbound CRUD emits for models with no access-control hook.
   pub block_inbound_by_default: bool,

   /// Deny the pre phase for models with no pre filter.
   pub block_pre_by_default: bool,

   /// Deny the post phase for models with no post filter.
   pub block_post_by_default: bool,
}

impl Default for CrudConfig {
   fn default() -> Self {
      Self {
         default_page_size: DEFAULT_PAGE_SIZE,
         cache_duration: DEFAULT_CACHE_DURATION,
         cache_disabled: None,
         block_inbound_by_default: false,
         block_pre_by_default: false,
         block_post_by_default: false,
      }
   }
}

impl CrudConfig {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_default_page_size(mut self, page_size: usize) -> Self {
      self.default_page_size = page_size;
      self
   }

   pub fn with_cache_duration(mut self, duration: Duration) -> Self {
      self.cache_duration = duration;
      self
   }

   pub fn with_cache_disabled(mut self, disabled: bool) -> Self {
      self.cache_disabled = Some(disabled);
      self
   }

   pub fn with_block_inbound_by_default(mut self, block: bool) -> Self {
      self.block_inbound_by_default = block;
      self
   }

   pub fn with_block_pre_by_default(mut self, block: bool) -> Self {
      self.block_pre_by_default = block;
      self
   }

   pub fn with_block_post_by_default(mut self, block: bool) -> Self {
      self.block_post_by_default = block;
      self
   }
}
