//! The cache store: every entry, its status, subscribers and provided tags.
//!
//! All bookkeeping here is synchronous and runs under one mutex, which is
//! what serializes changes to an entry. Fetches themselves run elsewhere and
//! report back through `complete_fetch`.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::entry::{CacheEntry, InFlight, QueryKey, QuerySnapshot, QueryStatus, SharedFetch};
use super::tags::Tag;
use crate::error::CacheError;

/// What `begin_fetch` did.
pub enum FetchStart {
  /// A new fetch was started
  Started(SharedFetch),
  /// A fetch was already in flight; this is it
  Joined(SharedFetch),
}

impl FetchStart {
  pub fn is_started(&self) -> bool {
    matches!(self, FetchStart::Started(_))
  }

  pub fn into_fetch(self) -> SharedFetch {
    match self {
      FetchStart::Started(fetch) | FetchStart::Joined(fetch) => fetch,
    }
  }
}

/// Holds every cached query of one cache instance.
#[derive(Default)]
pub struct CacheStore {
  entries: Mutex<HashMap<QueryKey, CacheEntry>>,
  next_fetch_id: AtomicU64,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self, op: &'static str) -> MutexGuard<'_, HashMap<QueryKey, CacheEntry>> {
    match self.entries.lock() {
      Ok(guard) => guard,
      Err(poisoned) => {
        warn!(op, "Recovered from poisoned cache store lock");
        poisoned.into_inner()
      }
    }
  }

  /// Return the entry for `key`, creating it uninitialized if needed.
  pub fn get_or_create(&self, key: &QueryKey) -> QuerySnapshot {
    let mut entries = self.lock("get_or_create");
    entries
      .entry(key.clone())
      .or_insert_with(|| CacheEntry::new(key.clone()))
      .snapshot()
  }

  /// Move the entry to `loading` and register the fetch built by `start`.
  ///
  /// If a fetch is already in flight it is returned instead and `start` is
  /// not called, so an entry never has two outstanding fetches.
  pub fn begin_fetch<F>(&self, key: &QueryKey, start: F) -> FetchStart
  where
    F: FnOnce(u64) -> (SharedFetch, Option<AbortHandle>),
  {
    let mut entries = self.lock("begin_fetch");
    let entry = entries
      .entry(key.clone())
      .or_insert_with(|| CacheEntry::new(key.clone()));

    if let Some(in_flight) = &entry.in_flight {
      debug!(query = %key, "Joining in-flight fetch");
      return FetchStart::Joined(in_flight.fetch.clone());
    }

    let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
    let (fetch, abort) = start(id);
    entry.in_flight = Some(InFlight {
      id,
      fetch: fetch.clone(),
      abort,
      resume_status: entry.status,
    });
    entry.status = QueryStatus::Loading;
    entry.publish();

    debug!(query = %key, fetch_id = id, "Fetch started");
    FetchStart::Started(fetch)
  }

  /// The fetch currently in flight for `key`, if any.
  pub fn in_flight(&self, key: &QueryKey) -> Option<SharedFetch> {
    self
      .lock("in_flight")
      .get(key)
      .and_then(|entry| entry.in_flight.as_ref())
      .map(|in_flight| in_flight.fetch.clone())
  }

  /// Record the result of fetch `fetch_id`.
  ///
  /// Returns false when the fetch was superseded, cancelled, or the entry is
  /// gone; the result is dropped in that case.
  pub fn complete_fetch(
    &self,
    key: &QueryKey,
    fetch_id: u64,
    result: &Result<Value, CacheError>,
    tags: Vec<Tag>,
  ) -> bool {
    let mut entries = self.lock("complete_fetch");
    let Some(entry) = entries.get_mut(key) else {
      return false;
    };
    if entry.in_flight.as_ref().map(|f| f.id) != Some(fetch_id) {
      debug!(query = %key, fetch_id, "Dropping result of superseded fetch");
      return false;
    }
    entry.in_flight = None;

    match result {
      Ok(value) => {
        entry.value = Some(value.clone());
        entry.status = QueryStatus::Success;
        entry.provided = tags.into_iter().collect();
        entry.stale = false;
        entry.error = None;
        entry.fetched_at = Some(Utc::now());
      }
      Err(e) => {
        // keep the last good value on screen
        entry.status = QueryStatus::Error;
        entry.provided.clear();
        entry.stale = false;
        entry.error = Some(e.clone());
      }
    }
    entry.publish();
    true
  }

  /// Mark stale every entry providing a tag matched by `tags`.
  ///
  /// Returns the keys of hit entries that have subscribers; those should be
  /// refetched now. Unsubscribed entries refetch on their next subscription.
  ///
  /// # Panics
  ///
  /// Panics on a malformed tag: a silently mismatched tag leaves stale data
  /// in the cache.
  pub fn invalidate(&self, tags: &[Tag]) -> Vec<QueryKey> {
    for tag in tags {
      assert!(tag.is_well_formed(), "malformed tag in invalidation: {:?}", tag);
    }
    if tags.is_empty() {
      return Vec::new();
    }

    let mut entries = self.lock("invalidate");
    let mut refetch = Vec::new();
    for entry in entries.values_mut() {
      if !entry.is_hit_by(tags) {
        continue;
      }
      let newly_stale = !entry.stale;
      entry.stale = true;
      if entry.subscribers > 0 {
        refetch.push(entry.key.clone());
      }
      if newly_stale {
        entry.publish();
      }
      debug!(
        query = %entry.key,
        subscribers = entry.subscribers,
        "Entry invalidated"
      );
    }
    refetch
  }

  /// Add a subscriber. Returns true when the entry should be fetched.
  pub fn subscribe(&self, key: &QueryKey) -> bool {
    let mut entries = self.lock("subscribe");
    let entry = entries
      .entry(key.clone())
      .or_insert_with(|| CacheEntry::new(key.clone()));
    entry.subscribers += 1;
    entry.generation += 1;
    entry.publish();
    entry.needs_fetch()
  }

  /// Drop a subscriber.
  ///
  /// When the last one leaves, any in-flight fetch is cancelled and the
  /// entry's generation is returned so the caller can schedule its removal.
  pub fn unsubscribe(&self, key: &QueryKey) -> Option<u64> {
    let mut entries = self.lock("unsubscribe");
    let entry = entries.get_mut(key)?;
    entry.subscribers = entry.subscribers.saturating_sub(1);
    entry.generation += 1;

    if entry.subscribers > 0 {
      entry.publish();
      return None;
    }

    if let Some(in_flight) = entry.in_flight.take() {
      if let Some(abort) = in_flight.abort {
        abort.abort();
      }
      entry.status = in_flight.resume_status;
      debug!(query = %key, fetch_id = in_flight.id, "Cancelled fetch of unused entry");
    }
    entry.publish();
    Some(entry.generation)
  }

  /// Remove the entry if nothing touched it since `generation` was issued.
  pub fn remove_if_unused(&self, key: &QueryKey, generation: u64) -> bool {
    let mut entries = self.lock("remove_if_unused");
    let unused = entries.get(key).is_some_and(|entry| {
      entry.subscribers == 0 && entry.generation == generation && entry.in_flight.is_none()
    });
    if unused {
      entries.remove(key);
      debug!(query = %key, "Removed unused entry");
    }
    unused
  }

  pub fn snapshot(&self, key: &QueryKey) -> Option<QuerySnapshot> {
    self.lock("snapshot").get(key).map(CacheEntry::snapshot)
  }

  /// Change notifications for one entry.
  pub fn watch(&self, key: &QueryKey) -> Option<watch::Receiver<QuerySnapshot>> {
    self.lock("watch").get(key).map(CacheEntry::watch)
  }

  pub fn len(&self) -> usize {
    self.lock("len").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Release every entry, cancelling in-flight fetches. Returns how many
  /// entries were dropped.
  pub fn clear(&self) -> usize {
    let mut entries = self.lock("clear");
    for entry in entries.values_mut() {
      if let Some(abort) = entry.in_flight.take().and_then(|f| f.abort) {
        abort.abort();
      }
    }
    let count = entries.len();
    entries.clear();
    count
  }
}
