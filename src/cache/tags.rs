//! Tag identity: the keys that connect cached queries to the mutations that
//! can make them stale.
//!
//! A tag is a `(type, id)` pair compared structurally, so two tags built
//! separately for the same entity are interchangeable as map keys.

use serde_json::Value;
use std::fmt;

use crate::error::{CacheError, Result};

/// Reserved id naming the collection of all instances of a type.
pub const LIST_ID: &str = "LIST";

/// Identifier of a single entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
  Int(i64),
  Text(String),
}

impl From<i64> for EntityId {
  fn from(id: i64) -> Self {
    EntityId::Int(id)
  }
}

impl From<i32> for EntityId {
  fn from(id: i32) -> Self {
    EntityId::Int(id.into())
  }
}

impl From<u32> for EntityId {
  fn from(id: u32) -> Self {
    EntityId::Int(id.into())
  }
}

impl From<&str> for EntityId {
  fn from(id: &str) -> Self {
    EntityId::Text(id.to_string())
  }
}

impl From<String> for EntityId {
  fn from(id: String) -> Self {
    EntityId::Text(id)
  }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EntityId::Int(id) => write!(f, "{}", id),
      EntityId::Text(id) => f.write_str(id),
    }
  }
}

/// The id half of a tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagId {
  /// No id: the tag stands for any data of its type
  Any,
  /// The listing of all instances of the type
  List,
  /// One specific instance
  Entity(EntityId),
}

/// A unit of cacheable data dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
  kind: String,
  id: TagId,
}

impl Tag {
  pub fn kind(&self) -> &str {
    &self.kind
  }

  pub fn id(&self) -> &TagId {
    &self.id
  }

  /// Whether invalidating `self` affects an entry that provides `provided`.
  ///
  /// A type-level tag hits every tag of its type; anything else needs an
  /// exact match, so a list tag never hits a bare id tag and vice versa.
  pub fn matches(&self, provided: &Tag) -> bool {
    self.kind == provided.kind && (self.id == TagId::Any || self.id == provided.id)
  }

  pub fn is_well_formed(&self) -> bool {
    !self.kind.is_empty()
  }
}

impl fmt::Display for Tag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.id {
      TagId::Any => f.write_str(&self.kind),
      TagId::List => write!(f, "{}:{}", self.kind, LIST_ID),
      TagId::Entity(id) => write!(f, "{}:{}", self.kind, id),
    }
  }
}

/// Type-level tag: "any data of this type".
pub fn tag(kind: &str) -> Tag {
  Tag {
    kind: kind.to_string(),
    id: TagId::Any,
  }
}

/// Instance-level tag for one entity of `kind`.
///
/// A text id equal to `"LIST"` is the list tag.
pub fn id_tag(kind: &str, id: impl Into<EntityId>) -> Tag {
  let id = match id.into() {
    EntityId::Text(text) if text == LIST_ID => TagId::List,
    other => TagId::Entity(other),
  };
  Tag {
    kind: kind.to_string(),
    id,
  }
}

/// List-level tag: membership of the `kind` collection.
pub fn list_tag(kind: &str) -> Tag {
  Tag {
    kind: kind.to_string(),
    id: TagId::List,
  }
}

/// Instance-level tag from an id found in a JSON payload.
///
/// Only integers and strings are ids. Callers that may lack an id should
/// check for it first and emit no tag instead.
pub fn id_tag_from_value(kind: &str, id: &Value) -> Result<Tag> {
  if kind.is_empty() {
    return Err(CacheError::invalid_argument("tag type must not be empty"));
  }
  match id {
    Value::Number(n) => n
      .as_i64()
      .map(|n| id_tag(kind, n))
      .ok_or_else(|| CacheError::invalid_argument(format!("{} id {} is not an integer", kind, n))),
    Value::String(s) => Ok(id_tag(kind, s.as_str())),
    Value::Null => Err(CacheError::invalid_argument(format!("{} id is null", kind))),
    other => Err(CacheError::invalid_argument(format!(
      "{} id must be a number or string, got {}",
      kind, other
    ))),
  }
}

/// Render a tag list for log fields.
pub fn display_tags(tags: &[Tag]) -> String {
  tags
    .iter()
    .map(Tag::to_string)
    .collect::<Vec<_>>()
    .join(", ")
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::collections::{HashMap, HashSet};

  #[test]
  fn test_id_tags_are_structurally_equal() {
    let a = id_tag("table", 7);
    let b = id_tag("table", 7);
    assert_eq!(a, b);

    let mut set = HashSet::new();
    set.insert(a.clone());
    assert!(set.contains(&b));

    let mut map = HashMap::new();
    map.insert(a, "seven");
    assert_eq!(map.get(&b), Some(&"seven"));
  }

  #[test]
  fn test_int_and_text_ids_differ() {
    assert_ne!(id_tag("table", 7), id_tag("table", "7"));
    assert_ne!(id_tag("table", 7), id_tag("field", 7));
  }

  #[test]
  fn test_list_id_text_is_list_tag() {
    assert_eq!(id_tag("table", "LIST"), list_tag("table"));
  }

  #[test]
  fn test_matching_rules() {
    let seven = id_tag("table", 7);
    let eight = id_tag("table", 8);
    let list = list_tag("table");
    let any = tag("table");

    assert!(seven.matches(&seven));
    assert!(!seven.matches(&eight));
    assert!(!list.matches(&seven));
    assert!(!seven.matches(&list));
    assert!(list.matches(&list));

    assert!(any.matches(&seven));
    assert!(any.matches(&list));
    assert!(any.matches(&any));
    assert!(!tag("database").matches(&seven));
    // an id-level invalidation does not reach a type-level provider
    assert!(!seven.matches(&any));
  }

  #[test]
  fn test_id_tag_from_value() {
    assert_eq!(
      id_tag_from_value("table", &json!(7)).unwrap(),
      id_tag("table", 7)
    );
    assert_eq!(
      id_tag_from_value("table", &json!("abc")).unwrap(),
      id_tag("table", "abc")
    );

    for bad in [json!(null), json!(1.5), json!([1]), json!({"id": 1}), json!(true)] {
      let err = id_tag_from_value("table", &bad).unwrap_err();
      assert!(matches!(err, CacheError::InvalidArgument(_)), "{}", bad);
    }
    assert!(id_tag_from_value("", &json!(1)).is_err());
  }

  #[test]
  fn test_display() {
    assert_eq!(tag("card").to_string(), "card");
    assert_eq!(list_tag("table").to_string(), "table:LIST");
    assert_eq!(id_tag("table", 7).to_string(), "table:7");
    assert_eq!(
      display_tags(&[id_tag("table", 7), tag("card")]),
      "table:7, card"
    );
  }
}
