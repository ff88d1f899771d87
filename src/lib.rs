//! tagq: a client-side query cache kept coherent by tags.
//!
//! Queries declare the tags their results provide; mutations declare the
//! tags they may invalidate. When a mutation succeeds, every cached query
//! providing a matching tag is marked stale and, if anyone is subscribed,
//! refetched. A failed mutation invalidates nothing.

pub mod api;
pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod query;
pub mod registry;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cache::{id_tag, list_tag, tag, CacheConfig, CacheStore, QuerySnapshot, QueryStatus, Tag};
pub use dispatcher::{Dispatcher, MutationHandle, MutationStatus};
pub use error::{CacheError, TransportError};
pub use query::QuerySubscription;
pub use registry::{EndpointRegistry, TagProvider, TagTemplate};
pub use transport::{HttpTransport, Transport, TransportRequest};
