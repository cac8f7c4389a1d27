//! Per-resource subscription state.
//!
//! Read-by-id goes through a small state machine per resource channel:
//!
//! ```text
//! Idle ── read ──► Subscribing ── subscribe ok ──► Subscribed
//!                      │  ▲                            │
//!          join buffer │  │ read                       │ cache expire/clear
//!                      ▼  │                            ▼
//!                  (buffered waiters)                Idle
//! ```
//!
//! Readers arriving while the subscription is being established join the
//! buffer; it drains in enqueue order once the channel is live, so the
//! invalidation watch is always in place before a cached value is served.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crud_relay_schema::Document;

use crate::error::CrudError;

pub(crate) type ReadWaiter = oneshot::Sender<Result<Document, CrudError>>;
pub(crate) type ReadReceiver = oneshot::Receiver<Result<Document, CrudError>>;

/// How a read call relates to the channel's subscription state.
pub(crate) enum Registration {
   /// Already subscribed; read straight through the cache.
   Active,
   /// A subscription is in flight; await the drain.
   Joined(ReadReceiver),
   /// This caller starts the subscription and then awaits the drain.
   Started(ReadReceiver),
}

enum ChannelState {
   Subscribing { buffer: Vec<ReadWaiter> },
   Subscribed { watch_task: AbortHandle },
}

/// Tracks one subscription state machine per resource channel.
#[derive(Default)]
pub(crate) struct ResourceSubscriptions {
   channels: Mutex<HashMap<String, ChannelState>>,
}

impl ResourceSubscriptions {
   pub fn register(&self, channel: &str) -> Registration {
      let mut channels = self.channels.lock();
      match channels.get_mut(channel) {
         None => {
            let (tx, rx) = oneshot::channel();
            channels.insert(
               channel.to_string(),
               ChannelState::Subscribing { buffer: vec![tx] },
            );
            Registration::Started(rx)
         }
         Some(ChannelState::Subscribing { buffer }) => {
            let (tx, rx) = oneshot::channel();
            buffer.push(tx);
            Registration::Joined(rx)
         }
         Some(ChannelState::Subscribed { .. }) => Registration::Active,
      }
   }

   /// Transitions to subscribed, returning the buffered waiters in
   /// enqueue order.
   pub fn activate(&self, channel: &str, watch_task: AbortHandle) -> Vec<ReadWaiter> {
      let mut channels = self.channels.lock();
      match channels.insert(channel.to_string(), ChannelState::Subscribed { watch_task }) {
         Some(ChannelState::Subscribing { buffer }) => buffer,
         Some(ChannelState::Subscribed { watch_task }) => {
            watch_task.abort();
            Vec::new()
         }
         None => Vec::new(),
      }
   }

   /// Drops a failed subscription attempt, returning the waiters to
   /// flush with an error.
   pub fn fail(&self, channel: &str) -> Vec<ReadWaiter> {
      match self.channels.lock().remove(channel) {
         Some(ChannelState::Subscribing { buffer }) => buffer,
         Some(ChannelState::Subscribed { watch_task }) => {
            watch_task.abort();
            Vec::new()
         }
         None => Vec::new(),
      }
   }

   /// Tears down an established subscription, aborting its watch task.
   /// Leaves in-flight subscriptions alone. True when one was torn down.
   pub fn teardown(&self, channel: &str) -> bool {
      let mut channels = self.channels.lock();
      if matches!(channels.get(channel), Some(ChannelState::Subscribed { .. })) {
         if let Some(ChannelState::Subscribed { watch_task }) = channels.remove(channel) {
            watch_task.abort();
         }
         true
      } else {
         false
      }
   }

   #[cfg(test)]
   pub fn is_subscribed(&self, channel: &str) -> bool {
      matches!(
         self.channels.lock().get(channel),
         Some(ChannelState::Subscribed { .. })
      )
   }
}
