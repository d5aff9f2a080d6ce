//! Unbounded FIFO work queue shared between pipeline stages.
//!
//! One mutex guards the buffer for producers and consumers alike. Consumers park
//! on a [`Notify`] while the buffer is empty; every enqueue wakes one consumer and
//! [`WorkQueue::close`] wakes all of them.
//!
//! Waiting is cancellation-aware: a consumer parked in [`WorkQueue::dequeue`]
//! returns as soon as its [`CancellationToken`] fires, without needing an
//! enqueue or a `close()` to get it moving again.
//!
//! Producers never block. There is no capacity limit.

use std::{collections::VecDeque, sync::Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
  #[error("Dequeue cancelled")]
  Cancelled,
}

/// Generic multi-producer multi-consumer queue.
///
/// FIFO order holds for a single consumer. With several consumers each item is
/// still delivered exactly once, but the interleaving across consumers is unspecified.
#[derive(Debug)]
pub struct WorkQueue<T> {
  name: &'static str,
  items: Mutex<VecDeque<T>>,
  available: Notify,
}

impl<T> WorkQueue<T> {
  pub fn new(name: &'static str) -> Self {
    Self {
      name,
      items: Mutex::new(VecDeque::new()),
      available: Notify::new(),
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
    // A panic while holding the lock can't leave the deque half-mutated
    self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Append an item and wake one waiting consumer.
  pub fn enqueue(&self, item: T) {
    self.lock().push_back(item);
    self.available.notify_one();
  }

  /// Wait for the oldest item, or until `cancel` fires.
  ///
  /// Items already buffered are handed out even if the token is cancelled; the
  /// cancellation check only decides whether to keep waiting on an empty queue.
  pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<T, QueueError> {
    loop {
      // Register interest before checking the buffer so an enqueue that lands
      // between the check and the await is not lost.
      let notified = self.available.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      if let Some(item) = self.lock().pop_front() {
        return Ok(item);
      }

      tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(QueueError::Cancelled),
        _ = &mut notified => {}
      }
    }
  }

  /// Take the oldest item without waiting.
  pub fn try_dequeue(&self) -> Option<T> {
    self.lock().pop_front()
  }

  /// Point-in-time item count.
  pub fn size(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.size() == 0
  }

  /// Wake every parked consumer so it can re-check its cancellation token.
  ///
  /// The queue stays fully usable afterwards.
  pub fn close(&self) {
    self.available.notify_waiters();
  }
}
