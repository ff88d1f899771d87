//! Endpoint registry: for each endpoint, how to build its request and which
//! tags it provides (queries) or invalidates (mutations).

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::cache::{id_tag_from_value, list_tag, tag, Tag};
use crate::error::{CacheError, EndpointKind, Result};
use crate::transport::TransportRequest;

/// Builds the transport request for an endpoint's arguments.
pub type RequestFn = Arc<dyn Fn(&Value) -> Result<TransportRequest> + Send + Sync>;

/// Derives tags from `(result, error, args)`.
pub type TagFn = Arc<dyn Fn(Option<&Value>, Option<&CacheError>, &Value) -> Vec<Tag> + Send + Sync>;

/// A data-driven tag rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagTemplate {
  /// `tag(kind)`
  Type(String),
  /// `list_tag(kind)`
  List(String),
  /// `id_tag(kind, args[field])`
  IdFromArg { kind: String, field: String },
  /// `id_tag(kind, args[field][i])` for every id in an argument array
  IdsFromArgList { kind: String, field: String },
  /// `id_tag(kind, result[field])`
  IdFromResult { kind: String, field: String },
  /// `id_tag(kind, item[field])` for every item of an array result
  IdsFromResultList { kind: String, field: String },
}

impl TagTemplate {
  pub fn id_from_arg(kind: &str, field: &str) -> Self {
    Self::IdFromArg {
      kind: kind.to_string(),
      field: field.to_string(),
    }
  }

  pub fn ids_from_arg_list(kind: &str, field: &str) -> Self {
    Self::IdsFromArgList {
      kind: kind.to_string(),
      field: field.to_string(),
    }
  }

  pub fn id_from_result(kind: &str, field: &str) -> Self {
    Self::IdFromResult {
      kind: kind.to_string(),
      field: field.to_string(),
    }
  }

  pub fn ids_from_result_list(kind: &str, field: &str) -> Self {
    Self::IdsFromResultList {
      kind: kind.to_string(),
      field: field.to_string(),
    }
  }

  /// Append this template's tags. Ids that are absent produce nothing.
  fn expand(&self, result: Option<&Value>, args: &Value, out: &mut Vec<Tag>) {
    match self {
      TagTemplate::Type(kind) => out.push(tag(kind)),
      TagTemplate::List(kind) => out.push(list_tag(kind)),
      TagTemplate::IdFromArg { kind, field } => push_id(kind, args.get(field), out),
      TagTemplate::IdsFromArgList { kind, field } => {
        if let Some(ids) = args.get(field).and_then(Value::as_array) {
          for id in ids {
            push_id(kind, Some(id), out);
          }
        }
      }
      TagTemplate::IdFromResult { kind, field } => {
        push_id(kind, result.and_then(|r| r.get(field)), out)
      }
      TagTemplate::IdsFromResultList { kind, field } => {
        if let Some(items) = result.and_then(Value::as_array) {
          for item in items {
            push_id(kind, item.get(field), out);
          }
        }
      }
    }
  }
}

fn push_id(kind: &str, id: Option<&Value>, out: &mut Vec<Tag>) {
  let Some(id) = id.filter(|id| !id.is_null()) else {
    return;
  };
  match id_tag_from_value(kind, id) {
    Ok(tag) => out.push(tag),
    Err(e) => warn!(kind, error = %e, "Skipping tag with unusable id"),
  }
}

/// How an endpoint derives its tags.
#[derive(Clone, Default)]
pub enum TagProvider {
  #[default]
  None,
  Templates(Vec<TagTemplate>),
  Fn(TagFn),
}

impl TagProvider {
  pub fn templates(templates: impl IntoIterator<Item = TagTemplate>) -> Self {
    Self::Templates(templates.into_iter().collect())
  }

  pub fn from_fn<F>(f: F) -> Self
  where
    F: Fn(Option<&Value>, Option<&CacheError>, &Value) -> Vec<Tag> + Send + Sync + 'static,
  {
    Self::Fn(Arc::new(f))
  }

  pub fn derive(&self, result: Option<&Value>, error: Option<&CacheError>, args: &Value) -> Vec<Tag> {
    match self {
      TagProvider::None => Vec::new(),
      TagProvider::Templates(templates) => {
        let mut tags = Vec::new();
        for template in templates {
          template.expand(result, args, &mut tags);
        }
        tags
      }
      TagProvider::Fn(f) => f(result, error, args),
    }
  }
}

impl fmt::Debug for TagProvider {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TagProvider::None => f.write_str("None"),
      TagProvider::Templates(t) => f.debug_tuple("Templates").field(t).finish(),
      TagProvider::Fn(_) => f.write_str("Fn(..)"),
    }
  }
}

/// A query endpoint: a request and the tags its result provides.
#[derive(Clone)]
pub struct QueryEndpoint {
  pub request: RequestFn,
  pub provides: TagProvider,
}

/// A mutation endpoint: a request and the tags it may invalidate.
#[derive(Clone)]
pub struct MutationEndpoint {
  pub request: RequestFn,
  pub invalidates: TagProvider,
}

/// Every endpoint known to a cache.
#[derive(Clone, Default)]
pub struct EndpointRegistry {
  queries: HashMap<String, QueryEndpoint>,
  mutations: HashMap<String, MutationEndpoint>,
}

impl EndpointRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn query<F>(&mut self, name: &str, request: F, provides: TagProvider) -> &mut Self
  where
    F: Fn(&Value) -> Result<TransportRequest> + Send + Sync + 'static,
  {
    self.queries.insert(
      name.to_string(),
      QueryEndpoint {
        request: Arc::new(request),
        provides,
      },
    );
    self
  }

  pub fn mutation<F>(&mut self, name: &str, request: F, invalidates: TagProvider) -> &mut Self
  where
    F: Fn(&Value) -> Result<TransportRequest> + Send + Sync + 'static,
  {
    self.mutations.insert(
      name.to_string(),
      MutationEndpoint {
        request: Arc::new(request),
        invalidates,
      },
    );
    self
  }

  pub fn get_query(&self, name: &str) -> Result<&QueryEndpoint> {
    self.queries.get(name).ok_or_else(|| CacheError::UnknownEndpoint {
      endpoint: name.to_string(),
      kind: EndpointKind::Query,
    })
  }

  pub fn get_mutation(&self, name: &str) -> Result<&MutationEndpoint> {
    self.mutations.get(name).ok_or_else(|| CacheError::UnknownEndpoint {
      endpoint: name.to_string(),
      kind: EndpointKind::Mutation,
    })
  }

  /// Registered endpoint names of one kind, sorted.
  pub fn names(&self, kind: EndpointKind) -> Vec<&str> {
    let mut names: Vec<&str> = match kind {
      EndpointKind::Query => self.queries.keys().map(String::as_str).collect(),
      EndpointKind::Mutation => self.mutations.keys().map(String::as_str).collect(),
    };
    names.sort_unstable();
    names
  }
}

/// Read a required id argument for use in a request path.
pub fn path_id(args: &Value, field: &str) -> Result<String> {
  match args.get(field) {
    Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
    Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
    Some(Value::Null) | None => Err(CacheError::invalid_argument(format!(
      "missing required argument `{}`",
      field
    ))),
    Some(other) => Err(CacheError::invalid_argument(format!(
      "argument `{}` must be an id, got {}",
      field, other
    ))),
  }
}

/// Arguments with `fields` removed, for use as a request body.
pub fn body_without(args: &Value, fields: &[&str]) -> Value {
  match args {
    Value::Object(map) => Value::Object(
      map
        .iter()
        .filter(|(k, _)| !fields.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    ),
    other => other.clone(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::id_tag;
  use crate::error::TransportError;
  use serde_json::json;

  #[test]
  fn test_templates_expand_in_order() {
    let provider = TagProvider::templates([
      TagTemplate::id_from_arg("table", "id"),
      TagTemplate::Type("database".to_string()),
      TagTemplate::List("table".to_string()),
    ]);
    let tags = provider.derive(Some(&json!({})), None, &json!({"id": 7}));
    assert_eq!(tags, vec![id_tag("table", 7), tag("database"), list_tag("table")]);
  }

  #[test]
  fn test_missing_ids_produce_no_tag() {
    let provider = TagProvider::templates([
      TagTemplate::id_from_arg("table", "id"),
      TagTemplate::id_from_result("table", "id"),
      TagTemplate::id_from_arg("table", "db_id"),
    ]);
    let tags = provider.derive(None, None, &json!({"db_id": null}));
    assert!(tags.is_empty());
  }

  #[test]
  fn test_unusable_ids_are_skipped() {
    let provider = TagProvider::templates([TagTemplate::id_from_arg("table", "id")]);
    assert!(provider.derive(None, None, &json!({"id": {"nested": 1}})).is_empty());
  }

  #[test]
  fn test_list_templates() {
    let provider = TagProvider::templates([
      TagTemplate::List("table".to_string()),
      TagTemplate::ids_from_result_list("table", "id"),
    ]);
    let result = json!([{"id": 1}, {"id": 2}, {"name": "no id"}]);
    let tags = provider.derive(Some(&result), None, &json!({}));
    assert_eq!(
      tags,
      vec![list_tag("table"), id_tag("table", 1), id_tag("table", 2)]
    );

    let provider = TagProvider::templates([TagTemplate::ids_from_arg_list("table", "ids")]);
    let tags = provider.derive(None, None, &json!({"ids": [3, "x"]}));
    assert_eq!(tags, vec![id_tag("table", 3), id_tag("table", "x")]);
  }

  #[test]
  fn test_fn_provider_sees_error() {
    let provider = TagProvider::from_fn(|result, error, _args| {
      if error.is_some() {
        vec![tag("error")]
      } else if result.is_some() {
        vec![tag("ok")]
      } else {
        Vec::new()
      }
    });
    let err = CacheError::Transport(TransportError::new("down"));
    assert_eq!(provider.derive(None, Some(&err), &json!({})), vec![tag("error")]);
    assert_eq!(provider.derive(Some(&json!(1)), None, &json!({})), vec![tag("ok")]);
  }

  #[test]
  fn test_registry_lookup() {
    let mut registry = EndpointRegistry::new();
    registry
      .query("b", |_| Ok(TransportRequest::get("/b")), TagProvider::None)
      .query("a", |_| Ok(TransportRequest::get("/a")), TagProvider::None)
      .mutation("m", |_| Ok(TransportRequest::delete("/m")), TagProvider::None);

    assert_eq!(registry.names(EndpointKind::Query), vec!["a", "b"]);
    assert_eq!(registry.names(EndpointKind::Mutation), vec!["m"]);
    assert!(registry.get_query("a").is_ok());
    assert_eq!(
      registry.get_query("m").err(),
      Some(CacheError::UnknownEndpoint {
        endpoint: "m".to_string(),
        kind: EndpointKind::Query
      })
    );
    assert!(registry.get_mutation("m").is_ok());
  }

  #[test]
  fn test_path_id() {
    assert_eq!(path_id(&json!({"id": 7}), "id").unwrap(), "7");
    assert_eq!(path_id(&json!({"id": "abc"}), "id").unwrap(), "abc");
    assert!(path_id(&json!({}), "id").is_err());
    assert!(path_id(&json!({"id": null}), "id").is_err());
    assert!(path_id(&json!({"id": 1.5}), "id").is_err());
  }

  #[test]
  fn test_body_without() {
    let body = body_without(&json!({"id": 7, "name": "x"}), &["id"]);
    assert_eq!(body, json!({"name": "x"}));
  }
}
