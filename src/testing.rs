//! Test doubles.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::TransportError;
use crate::transport::{Transport, TransportRequest};

type Handler = Box<dyn Fn(&TransportRequest, usize) -> Result<Value, TransportError> + Send + Sync>;

/// Transport that records every request and answers from a handler.
pub(crate) struct MockTransport {
  handler: Handler,
  latency: Duration,
  calls: AtomicUsize,
  requests: Mutex<Vec<TransportRequest>>,
  failure: Mutex<Option<String>>,
}

impl MockTransport {
  pub fn new<F>(handler: F) -> Self
  where
    F: Fn(&TransportRequest, usize) -> Result<Value, TransportError> + Send + Sync + 'static,
  {
    Self {
      handler: Box::new(handler),
      latency: Duration::ZERO,
      calls: AtomicUsize::new(0),
      requests: Mutex::new(Vec::new()),
      failure: Mutex::new(None),
    }
  }

  /// Answers `{"path": <request path>, "version": <call number>}`.
  pub fn echo() -> Self {
    Self::new(|request, call| Ok(json!({ "path": request.path, "version": call })))
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  /// Fail every request from now on with `reason`, or stop failing.
  pub fn fail_with(&self, reason: Option<&str>) {
    *self.failure.lock().unwrap() = reason.map(String::from);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Number of requests sent to exactly `path`.
  pub fn calls_to(&self, path: &str) -> usize {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.path == path)
      .count()
  }

  pub fn requests(&self) -> Vec<TransportRequest> {
    self.requests.lock().unwrap().clone()
  }
}

impl Transport for MockTransport {
  fn execute(&self, request: TransportRequest) -> BoxFuture<'static, Result<Value, TransportError>> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
    self.requests.lock().unwrap().push(request.clone());

    let result = match self.failure.lock().unwrap().as_deref() {
      Some(reason) => Err(TransportError::new(reason)),
      None => (self.handler)(&request, call),
    };
    let latency = self.latency;

    async move {
      if !latency.is_zero() {
        tokio::time::sleep(latency).await;
      }
      result
    }
    .boxed()
  }
}
