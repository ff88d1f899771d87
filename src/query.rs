//! Subscriber-facing handle to a cached query.
//!
//! A `QuerySubscription` keeps its cache entry alive and refreshed. It
//! exposes the entry's current value and status, and can be polled from an
//! event loop tick or awaited for changes.
//!
//! # Example
//!
//! ```ignore
//! let mut tables = cache.query("listTables", json!({})).await?;
//!
//! // In event loop tick
//! if tables.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match tables.status() {
//!     QueryStatus::Loading => render_spinner(),
//!     QueryStatus::Success => render_data(tables.value()),
//!     QueryStatus::Error => render_error(tables.error()),
//!     QueryStatus::Uninitialized => {}
//! }
//! ```

use serde_json::Value;
use std::fmt;
use tokio::sync::watch;

use crate::cache::{QueryKey, QuerySnapshot, QueryStatus};
use crate::dispatcher::Dispatcher;
use crate::error::{CacheError, Result};

/// A live subscription to one cache entry. Unsubscribes on drop.
pub struct QuerySubscription {
  dispatcher: Dispatcher,
  key: QueryKey,
  receiver: watch::Receiver<QuerySnapshot>,
  active: bool,
}

impl QuerySubscription {
  /// Wrap an already-registered subscriber of `key`.
  pub(crate) fn new(dispatcher: Dispatcher, key: QueryKey) -> Self {
    let receiver = dispatcher
      .store()
      .watch(&key)
      .unwrap_or_else(|| watch::channel(QuerySnapshot::empty()).1);
    Self {
      dispatcher,
      key,
      receiver,
      active: true,
    }
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Current state of the entry.
  pub fn snapshot(&self) -> QuerySnapshot {
    self.receiver.borrow().clone()
  }

  /// Last known value, which may be stale.
  pub fn value(&self) -> Option<Value> {
    self.receiver.borrow().value.clone()
  }

  pub fn status(&self) -> QueryStatus {
    self.receiver.borrow().status
  }

  pub fn is_loading(&self) -> bool {
    self.status() == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status() == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status() == QueryStatus::Error
  }

  /// Error from the last fetch, if it failed.
  pub fn error(&self) -> Option<CacheError> {
    self.receiver.borrow().error.clone()
  }

  /// Check for changes without blocking.
  ///
  /// Returns `true` if the entry changed since the last `poll` or `changed`.
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    match self.receiver.has_changed() {
      Ok(true) => {
        self.receiver.borrow_and_update();
        true
      }
      _ => false,
    }
  }

  /// Wait for the next change to the entry.
  ///
  /// Fails with `Cancelled` once the cache has been shut down.
  pub async fn changed(&mut self) -> Result<QuerySnapshot> {
    self
      .receiver
      .changed()
      .await
      .map_err(|_| CacheError::Cancelled)?;
    Ok(self.receiver.borrow_and_update().clone())
  }

  /// Force a refetch and wait for it to settle.
  pub async fn refetch(&self) -> Result<QuerySnapshot> {
    self.dispatcher.refetch_key(&self.key).await
  }

  /// Stop receiving updates. Same as dropping the subscription.
  pub fn unsubscribe(mut self) {
    self.release();
  }

  fn release(&mut self) {
    if std::mem::take(&mut self.active) {
      self.dispatcher.release(&self.key);
    }
  }
}

impl Drop for QuerySubscription {
  fn drop(&mut self) {
    self.release();
  }
}

impl fmt::Debug for QuerySubscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QuerySubscription")
      .field("key", &self.key)
      .field("state", &*self.receiver.borrow())
      .finish_non_exhaustive()
  }
}
