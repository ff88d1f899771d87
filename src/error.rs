//! Error types shared by the cache, registry and transport.

use thiserror::Error;

/// Failure reported by the transport collaborator.
///
/// The reason is opaque to the cache and surfaced to callers verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport failure: {reason}")]
pub struct TransportError {
  pub reason: String,
  /// HTTP status code, when the server answered at all
  pub status: Option<u16>,
}

impl TransportError {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
      status: None,
    }
  }

  pub fn with_status(reason: impl Into<String>, status: u16) -> Self {
    Self {
      reason: reason.into(),
      status: Some(status),
    }
  }
}

/// Which side of the registry an endpoint lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
  Query,
  Mutation,
}

impl std::fmt::Display for EndpointKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      EndpointKind::Query => f.pad("query"),
      EndpointKind::Mutation => f.pad("mutation"),
    }
  }
}

/// Errors returned by the cache and dispatcher.
///
/// `Clone` because one in-flight fetch result is handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error("unknown {kind} endpoint: {endpoint}")]
  UnknownEndpoint { endpoint: String, kind: EndpointKind },

  #[error("fetch was cancelled")]
  Cancelled,
}

impl CacheError {
  pub fn invalid_argument(msg: impl Into<String>) -> Self {
    Self::InvalidArgument(msg.into())
  }

  /// The transport failure behind this error, if any.
  pub fn transport(&self) -> Option<&TransportError> {
    match self {
      Self::Transport(e) => Some(e),
      _ => None,
    }
  }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
