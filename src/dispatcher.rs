//! The dispatcher runs queries and mutations against the transport and keeps
//! the cache store coherent: provided tags are recorded when a query
//! succeeds, and a mutation's tags are invalidated once it succeeds.

use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{
  display_tags, resolve, CacheConfig, CacheStore, FetchStart, Outcome, QueryKey, QuerySnapshot,
  Tag,
};
use crate::error::{CacheError, Result};
use crate::query::QuerySubscription;
use crate::registry::{EndpointRegistry, TagProvider};
use crate::transport::{Transport, TransportRequest};

/// Where a mutation call is in its lifecycle. Exactly one transition out of
/// `Pending` ever happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
  Pending,
  Fulfilled,
  Rejected,
}

/// Handle to a running mutation. Await it for the result.
///
/// Dropping the handle does not cancel the mutation: its outcome still
/// decides invalidation.
pub struct MutationHandle {
  task: JoinHandle<Result<Value>>,
  status: watch::Receiver<MutationStatus>,
}

impl MutationHandle {
  pub fn status(&self) -> MutationStatus {
    *self.status.borrow()
  }
}

impl Future for MutationHandle {
  type Output = Result<Value>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    Pin::new(&mut self.task)
      .poll(cx)
      .map(|joined| joined.unwrap_or_else(|_| Err(CacheError::Cancelled)))
  }
}

/// Cache front door: one per cache instance.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct Dispatcher {
  inner: Arc<Inner>,
}

struct Inner {
  store: Arc<CacheStore>,
  registry: EndpointRegistry,
  transport: Arc<dyn Transport>,
  config: CacheConfig,
}

impl Dispatcher {
  pub fn new(
    store: Arc<CacheStore>,
    registry: EndpointRegistry,
    transport: Arc<dyn Transport>,
    config: CacheConfig,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        store,
        registry,
        transport,
        config,
      }),
    }
  }

  pub fn store(&self) -> &CacheStore {
    &self.inner.store
  }

  pub fn registry(&self) -> &EndpointRegistry {
    &self.inner.registry
  }

  /// Subscribe to a query without waiting for data.
  ///
  /// Starts a fetch when the entry is new, stale or errored; otherwise joins
  /// whatever is in flight or serves the cached value.
  pub fn subscribe(&self, endpoint: &str, args: Value) -> Result<QuerySubscription> {
    let definition = self.inner.registry.get_query(endpoint)?;
    // malformed arguments fail here, before an entry exists
    let request = (definition.request)(&args)?;
    let provides = definition.provides.clone();

    let key = QueryKey::new(endpoint, &args);
    let needs_fetch = self.inner.store.subscribe(&key);
    let subscription = QuerySubscription::new(self.clone(), key.clone());
    if needs_fetch {
      self.inner.start_fetch(&key, request, provides);
    }
    Ok(subscription)
  }

  /// Subscribe to a query and wait until its current fetch, if any, settles.
  ///
  /// A transport failure does not fail the call: it shows up as the
  /// subscription's error, next to the last good value. Fails with
  /// `Cancelled` if the cache shuts down while waiting.
  pub async fn query(&self, endpoint: &str, args: Value) -> Result<QuerySubscription> {
    let subscription = self.subscribe(endpoint, args)?;
    if let Some(fetch) = self.inner.store.in_flight(subscription.key()) {
      if let Err(CacheError::Cancelled) = fetch.await {
        return Err(CacheError::Cancelled);
      }
    }
    Ok(subscription)
  }

  /// Force a refetch of a subscribed query and wait for it to settle.
  pub async fn refetch(&self, endpoint: &str, args: Value) -> Result<QuerySnapshot> {
    self.inner.registry.get_query(endpoint)?;
    let key = QueryKey::new(endpoint, &args);
    match self.inner.store.snapshot(&key) {
      Some(snapshot) if snapshot.subscribers > 0 => self.refetch_key(&key).await,
      // unsubscribed entries are waiting to be removed
      _ => Err(CacheError::invalid_argument(format!("{} has no subscribers", key))),
    }
  }

  /// Fetch `key` again, joining an in-flight fetch if there is one.
  pub(crate) async fn refetch_key(&self, key: &QueryKey) -> Result<QuerySnapshot> {
    let fetch = self.inner.refetch(key)?.into_fetch();
    let _ = fetch.await;
    self.inner.store.snapshot(key).ok_or(CacheError::Cancelled)
  }

  /// Run a mutation on its own task.
  pub fn mutate(&self, endpoint: &str, args: Value) -> MutationHandle {
    let (status_tx, status_rx) = watch::channel(MutationStatus::Pending);
    let inner = Arc::clone(&self.inner);
    let endpoint = endpoint.to_string();

    let task = tokio::spawn(async move {
      let result = inner.run_mutation(&endpoint, &args).await;
      let status = if result.is_ok() {
        MutationStatus::Fulfilled
      } else {
        MutationStatus::Rejected
      };
      status_tx.send_replace(status);
      result
    });

    MutationHandle {
      task,
      status: status_rx,
    }
  }

  /// Invalidate `tags` directly and refetch what is subscribed. Returns the
  /// number of refetches started.
  pub fn invalidate_tags(&self, tags: &[Tag]) -> usize {
    self.inner.invalidate(tags)
  }

  /// Drop a subscriber; schedules removal of the entry if it was the last.
  pub(crate) fn release(&self, key: &QueryKey) {
    let Some(generation) = self.inner.store.unsubscribe(key) else {
      return;
    };

    let delay = self.inner.config.keep_unused_for();
    match tokio::runtime::Handle::try_current() {
      Ok(runtime) => {
        let store = Arc::clone(&self.inner.store);
        let key = key.clone();
        runtime.spawn(async move {
          tokio::time::sleep(delay).await;
          store.remove_if_unused(&key, generation);
        });
      }
      Err(_) => {
        // no runtime to wait on
        self.inner.store.remove_if_unused(key, generation);
      }
    }
  }

  /// Cancel in-flight fetches and release every entry.
  pub fn shutdown(&self) {
    let released = self.inner.store.clear();
    info!(released, "Cache shut down");
  }
}

impl Inner {
  fn start_fetch(
    self: &Arc<Self>,
    key: &QueryKey,
    request: TransportRequest,
    provides: TagProvider,
  ) -> FetchStart {
    self.store.begin_fetch(key, |fetch_id| {
      let inner = Arc::clone(self);
      let task_key = key.clone();
      let task = tokio::spawn(async move {
        inner
          .run_fetch(task_key, fetch_id, request, provides)
          .await
      });
      let abort = task.abort_handle();
      let fetch = task
        .map(|joined| joined.unwrap_or_else(|_| Err(CacheError::Cancelled)))
        .boxed()
        .shared();
      (fetch, Some(abort))
    })
  }

  fn refetch(self: &Arc<Self>, key: &QueryKey) -> Result<FetchStart> {
    let definition = self.registry.get_query(key.endpoint())?;
    let request = (definition.request)(key.args())?;
    Ok(self.start_fetch(key, request, definition.provides.clone()))
  }

  async fn run_fetch(
    self: Arc<Self>,
    key: QueryKey,
    fetch_id: u64,
    request: TransportRequest,
    provides: TagProvider,
  ) -> Result<Value> {
    debug!(query = %key, request = %request, "Fetching");
    let result = self
      .transport
      .execute(request)
      .await
      .map_err(CacheError::from);

    let tags = match &result {
      Ok(value) => provides.derive(Some(value), None, key.args()),
      Err(e) => {
        warn!(query = %key, error = %e, "Fetch failed");
        Vec::new()
      }
    };
    debug!(query = %key, tags = %display_tags(&tags), "Fetch completed");
    self.store.complete_fetch(&key, fetch_id, &result, tags);
    result
  }

  async fn run_mutation(self: &Arc<Self>, endpoint: &str, args: &Value) -> Result<Value> {
    let definition = self.registry.get_mutation(endpoint)?.clone();

    let result = match (definition.request)(args) {
      Ok(request) => {
        debug!(endpoint, request = %request, "Mutating");
        self
          .transport
          .execute(request)
          .await
          .map_err(CacheError::from)
      }
      Err(e) => Err(e),
    };

    let candidates = match &result {
      Ok(value) => definition.invalidates.derive(Some(value), None, args),
      Err(e) => definition.invalidates.derive(None, Some(e), args),
    };
    let outcome = Outcome::from(&result);
    let tags = resolve(&outcome, candidates);

    match &outcome {
      Outcome::Ok => info!(endpoint, tags = %display_tags(&tags), "Mutation fulfilled"),
      Outcome::Err(reason) => warn!(endpoint, reason = %reason, "Mutation rejected"),
    }
    self.invalidate(&tags);
    result
  }

  fn invalidate(self: &Arc<Self>, tags: &[Tag]) -> usize {
    let keys = self.store.invalidate(tags);
    let mut started = 0;
    for key in &keys {
      match self.refetch(key) {
        Ok(fetch) if fetch.is_started() => started += 1,
        Ok(_) => {}
        Err(e) => warn!(query = %key, error = %e, "Could not refetch invalidated entry"),
      }
    }
    if !tags.is_empty() {
      debug!(tags = %display_tags(tags), refetches = started, "Invalidation applied");
    }
    started
  }
}
