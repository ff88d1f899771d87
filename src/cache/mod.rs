//! Tag-based query cache.
//!
//! This module holds the engine's state and rules:
//! - Tags name the data a cached query depends on
//! - The resolver decides which tags a finished mutation invalidates
//! - The store keeps one entry per unique query and marks entries stale when
//!   an invalidated tag matches what they provide

mod config;
mod entry;
mod resolver;
mod store;
mod tags;

pub use config::CacheConfig;
pub use entry::{normalize_args, QueryKey, QuerySnapshot, QueryStatus, SharedFetch};
pub use resolver::{resolve, Outcome};
pub use store::{CacheStore, FetchStart};
pub use tags::{display_tags, id_tag, id_tag_from_value, list_tag, tag, EntityId, Tag, TagId, LIST_ID};
