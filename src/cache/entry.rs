//! Cache entries and the keys that identify them.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use super::tags::Tag;
use crate::error::CacheError;

/// One unique query: an endpoint plus its normalized arguments.
///
/// The arguments ride along so a stale entry can be refetched, but identity
/// is the endpoint and the normalized key only.
#[derive(Debug, Clone)]
pub struct QueryKey {
  endpoint: String,
  arg_key: String,
  args: Arc<Value>,
}

impl QueryKey {
  pub fn new(endpoint: &str, args: &Value) -> Self {
    Self {
      endpoint: endpoint.to_string(),
      arg_key: normalize_args(args),
      args: Arc::new(args.clone()),
    }
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  pub fn arg_key(&self) -> &str {
    &self.arg_key
  }

  pub fn args(&self) -> &Value {
    &self.args
  }
}

impl PartialEq for QueryKey {
  fn eq(&self, other: &Self) -> bool {
    self.endpoint == other.endpoint && self.arg_key == other.arg_key
  }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.endpoint.hash(state);
    self.arg_key.hash(state);
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // first 12 hex chars are plenty for log lines
    write!(f, "{}({})", self.endpoint, &self.arg_key[..12])
  }
}

/// Stable key for a JSON argument value.
///
/// serde_json keeps object keys sorted, so structurally equal arguments
/// serialize identically; the SHA256 keeps keys fixed-length.
pub fn normalize_args(args: &Value) -> String {
  let canonical = args.to_string();
  let mut hasher = Sha256::new();
  hasher.update(canonical.as_bytes());
  hex::encode(hasher.finalize())
}

/// Lifecycle status of a cached query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Created, never fetched
  Uninitialized,
  /// A fetch is in flight
  Loading,
  /// Last fetch succeeded
  Success,
  /// Last fetch failed
  Error,
}

/// Point-in-time view of a cache entry, handed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot {
  /// Last successful value, kept across failed refetches
  pub value: Option<Value>,
  pub status: QueryStatus,
  /// Invalidated since the last successful fetch
  pub stale: bool,
  /// Error from the last fetch, if it failed
  pub error: Option<CacheError>,
  /// When the value was fetched
  pub fetched_at: Option<DateTime<Utc>>,
  pub subscribers: usize,
  /// Tags the entry currently provides (empty unless `Success`)
  pub provided: Vec<Tag>,
}

impl QuerySnapshot {
  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  pub fn data(&self) -> Option<&Value> {
    self.value.as_ref()
  }

  /// Showing a last-known value that is not known to be current: the entry
  /// is stale, being refetched, or its last refetch failed.
  pub fn is_stale_read(&self) -> bool {
    self.value.is_some() && (self.stale || self.status != QueryStatus::Success)
  }
}

/// Result of a fetch, shared between every caller waiting on it.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Value, CacheError>>>;

/// The single outstanding fetch of an entry.
pub(crate) struct InFlight {
  pub id: u64,
  pub fetch: SharedFetch,
  pub abort: Option<AbortHandle>,
  /// Status to restore if this fetch is cancelled
  pub resume_status: QueryStatus,
}

/// One materialized query result, owned by the store.
pub(crate) struct CacheEntry {
  pub key: QueryKey,
  pub value: Option<Value>,
  pub status: QueryStatus,
  pub provided: HashSet<Tag>,
  pub subscribers: usize,
  pub stale: bool,
  pub error: Option<CacheError>,
  pub fetched_at: Option<DateTime<Utc>>,
  pub in_flight: Option<InFlight>,
  /// Bumped on every subscriber change; eviction only proceeds if unchanged
  pub generation: u64,
  notify: watch::Sender<QuerySnapshot>,
}

impl CacheEntry {
  pub fn new(key: QueryKey) -> Self {
    let mut entry = Self {
      key,
      value: None,
      status: QueryStatus::Uninitialized,
      provided: HashSet::new(),
      subscribers: 0,
      stale: false,
      error: None,
      fetched_at: None,
      in_flight: None,
      generation: 0,
      notify: watch::channel(QuerySnapshot::empty()).0,
    };
    entry.publish();
    entry
  }

  /// Provided tags take part in invalidation only while the entry holds a
  /// successful result.
  pub fn is_tracked(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_hit_by(&self, tags: &[Tag]) -> bool {
    self.is_tracked()
      && tags
        .iter()
        .any(|t| self.provided.iter().any(|p| t.matches(p)))
  }

  /// Whether a new subscriber should kick off a fetch.
  pub fn needs_fetch(&self) -> bool {
    self.in_flight.is_none()
      && match self.status {
        QueryStatus::Uninitialized | QueryStatus::Error => true,
        QueryStatus::Success => self.stale,
        QueryStatus::Loading => false,
      }
  }

  pub fn snapshot(&self) -> QuerySnapshot {
    let mut provided: Vec<Tag> = if self.is_tracked() {
      self.provided.iter().cloned().collect()
    } else {
      Vec::new()
    };
    provided.sort();

    QuerySnapshot {
      value: self.value.clone(),
      status: self.status,
      stale: self.stale,
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      subscribers: self.subscribers,
      provided,
    }
  }

  pub fn watch(&self) -> watch::Receiver<QuerySnapshot> {
    self.notify.subscribe()
  }

  /// Push the current state to watchers.
  pub fn publish(&mut self) {
    let snapshot = self.snapshot();
    self.notify.send_replace(snapshot);
  }
}

impl QuerySnapshot {
  pub(crate) fn empty() -> Self {
    Self {
      value: None,
      status: QueryStatus::Uninitialized,
      stale: false,
      error: None,
      fetched_at: None,
      subscribers: 0,
      provided: Vec::new(),
    }
  }
}
