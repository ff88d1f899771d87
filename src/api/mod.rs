//! Resource mappings: endpoint definitions for each API entity.

pub mod table;

use crate::registry::EndpointRegistry;

/// Registry with every known resource mapped.
pub fn registry() -> EndpointRegistry {
  let mut registry = EndpointRegistry::new();
  table::register(&mut registry);
  registry
}
