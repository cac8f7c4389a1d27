use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

/// A stream of messages observed on one broker channel.
///
/// Items are the published payloads; `None` is the empty message resource
/// channels use as a "refetch" signal. Wraps a `BroadcastStream` so slow
/// consumers lag rather than block publishers.
pub struct MessageStream {
   inner: BroadcastStream<Option<JsonValue>>,
   channel: String,
}

impl MessageStream {
   pub fn new(rx: broadcast::Receiver<Option<JsonValue>>, channel: impl Into<String>) -> Self {
      Self {
         inner: BroadcastStream::new(rx),
         channel: channel.into(),
      }
   }

   /// Name of the channel this stream watches.
   pub fn channel(&self) -> &str {
      &self.channel
   }
}

impl Stream for MessageStream {
   type Item = Option<JsonValue>;

   fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
      loop {
         let inner = Pin::new(&mut self.inner);
         match inner.poll_next(cx) {
            Poll::Ready(Some(Ok(message))) => return Poll::Ready(Some(message)),
            Poll::Ready(Some(Err(err))) => {
               // Lagged: missed messages due to slow consumption. The
               // delivery contract is at-most-once, so keep going.
               warn!(channel = %self.channel, error = %err, "message stream lagged");
               continue;
            }
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => return Poll::Pending,
         }
      }
   }
}

impl std::fmt::Debug for MessageStream {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("MessageStream").field("channel", &self.channel).finish()
   }
}
