//! Decides which tags a finished mutation actually invalidates.

use std::collections::HashSet;

use super::tags::Tag;

/// How a mutation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  Ok,
  Err(String),
}

impl Outcome {
  pub fn is_ok(&self) -> bool {
    matches!(self, Outcome::Ok)
  }
}

impl<T, E: std::fmt::Display> From<&Result<T, E>> for Outcome {
  fn from(result: &Result<T, E>) -> Self {
    match result {
      Ok(_) => Outcome::Ok,
      Err(e) => Outcome::Err(e.to_string()),
    }
  }
}

/// Tags to invalidate for a mutation outcome.
///
/// A failed mutation invalidates nothing: the server state presumably did not
/// change. On success the candidates are deduplicated, keeping the first
/// occurrence of each tag in place.
pub fn resolve(outcome: &Outcome, candidates: Vec<Tag>) -> Vec<Tag> {
  if !outcome.is_ok() {
    return Vec::new();
  }

  let mut seen = HashSet::with_capacity(candidates.len());
  candidates
    .into_iter()
    .filter(|tag| seen.insert(tag.clone()))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::tags::{id_tag, list_tag, tag};

  #[test]
  fn test_ok_dedupes_in_first_occurrence_order() {
    let a = id_tag("table", 7);
    let b = tag("database");
    let resolved = resolve(&Outcome::Ok, vec![a.clone(), b.clone(), a.clone()]);
    assert_eq!(resolved, vec![a, b]);
  }

  #[test]
  fn test_ok_dedupes_separately_built_tags() {
    let resolved = resolve(
      &Outcome::Ok,
      vec![
        list_tag("table"),
        id_tag("table", 1),
        list_tag("table"),
        id_tag("table", 1),
        id_tag("table", 2),
      ],
    );
    assert_eq!(
      resolved,
      vec![list_tag("table"), id_tag("table", 1), id_tag("table", 2)]
    );
  }

  #[test]
  fn test_err_suppresses_everything() {
    let outcome = Outcome::Err("network".to_string());
    assert!(resolve(&outcome, vec![tag("card"), id_tag("table", 7)]).is_empty());
    assert!(resolve(&outcome, Vec::new()).is_empty());
  }

  #[test]
  fn test_empty_candidates() {
    assert!(resolve(&Outcome::Ok, Vec::new()).is_empty());
  }

  #[test]
  fn test_outcome_from_result() {
    let ok: Result<u8, String> = Ok(1);
    let err: Result<u8, String> = Err("boom".to_string());
    assert_eq!(Outcome::from(&ok), Outcome::Ok);
    assert_eq!(Outcome::from(&err), Outcome::Err("boom".to_string()));
  }
}
