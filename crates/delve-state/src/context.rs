//! Namespaced execution context.
//!
//! Phases hand data to each other through string keys grouped by namespace,
//! usually the name of the phase (or concern) that writes them:
//!
//! ```text
//! clarify.decision      "proceed" | "clarify"
//! brief.research_brief  "..."
//! research.notes        [ResearchNote, ...]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Well-known context keys used by the research graph.
pub mod keys {
  use super::ContextKey;

  pub fn clarify_decision() -> ContextKey {
    ContextKey::new("clarify", "decision")
  }

  pub fn clarify_question() -> ContextKey {
    ContextKey::new("clarify", "question")
  }

  pub fn research_brief() -> ContextKey {
    ContextKey::new("brief", "research_brief")
  }

  pub fn research_notes() -> ContextKey {
    ContextKey::new("research", "notes")
  }

  pub fn supervisor_iterations() -> ContextKey {
    ContextKey::new("supervisor", "iterations")
  }

  pub fn supervisor_forced_stop() -> ContextKey {
    ContextKey::new("supervisor", "forced_stop")
  }

  pub fn supervisor_stop_reason() -> ContextKey {
    ContextKey::new("supervisor", "stop_reason")
  }
}

/// A context key failed to parse from its `namespace.name` form.
#[derive(Debug, thiserror::Error)]
#[error("invalid context key '{0}': expected 'namespace.name'")]
pub struct InvalidContextKey(pub String);

/// A key in the execution context, displayed as `namespace.name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContextKey {
  namespace: String,
  name: String,
}

impl ContextKey {
  pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      namespace: namespace.into(),
      name: name.into(),
    }
  }

  /// Parse a key from `namespace.name`. The namespace ends at the first dot.
  pub fn parse(raw: &str) -> Result<Self, InvalidContextKey> {
    match raw.split_once('.') {
      Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok(Self::new(ns, name)),
      _ => Err(InvalidContextKey(raw.to_string())),
    }
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl fmt::Display for ContextKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.namespace, self.name)
  }
}

impl TryFrom<String> for ContextKey {
  type Error = InvalidContextKey;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::parse(&value)
  }
}

impl From<ContextKey> for String {
  fn from(key: ContextKey) -> Self {
    key.to_string()
  }
}

/// Namespaced key-value store for phase-to-phase handoff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
  entries: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl ExecutionContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &ContextKey) -> Option<&serde_json::Value> {
    self
      .entries
      .get(key.namespace())
      .and_then(|ns| ns.get(key.name()))
  }

  /// Decode a value into a typed structure. Returns `Ok(None)` if the key is unset.
  pub fn get_as<T: DeserializeOwned>(&self, key: &ContextKey) -> Result<Option<T>, serde_json::Error> {
    self
      .get(key)
      .map(|v| serde_json::from_value(v.clone()))
      .transpose()
  }

  /// Convenience accessor for string values.
  pub fn get_str(&self, key: &ContextKey) -> Option<&str> {
    self.get(key).and_then(|v| v.as_str())
  }

  pub fn contains(&self, key: &ContextKey) -> bool {
    self.get(key).is_some()
  }

  /// Set a value, returning the previous one.
  pub fn insert(
    &mut self,
    key: ContextKey,
    value: impl Into<serde_json::Value>,
  ) -> Option<serde_json::Value> {
    self
      .entries
      .entry(key.namespace)
      .or_default()
      .insert(key.name, value.into())
  }

  /// Serialize and set a typed value.
  pub fn insert_as<T: Serialize>(&mut self, key: ContextKey, value: &T) -> Result<(), serde_json::Error> {
    let value = serde_json::to_value(value)?;
    self.insert(key, value);
    Ok(())
  }

  pub fn remove(&mut self, key: &ContextKey) -> Option<serde_json::Value> {
    let ns = self.entries.get_mut(key.namespace())?;
    let removed = ns.remove(key.name());
    if ns.is_empty() {
      self.entries.remove(key.namespace());
    }
    removed
  }

  /// All values stored under a namespace.
  pub fn namespace(&self, namespace: &str) -> Option<&BTreeMap<String, serde_json::Value>> {
    self.entries.get(namespace)
  }

  /// Iterate over every key in namespace, then name, order.
  pub fn keys(&self) -> impl Iterator<Item = ContextKey> + '_ {
    self
      .entries
      .iter()
      .flat_map(|(ns, names)| names.keys().map(move |name| ContextKey::new(ns, name)))
  }

  pub fn len(&self) -> usize {
    self.entries.values().map(BTreeMap::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Keys whose value differs between `self` and `other`, including keys
  /// present in only one of them.
  pub fn changed_keys(&self, other: &ExecutionContext) -> BTreeSet<ContextKey> {
    self
      .keys()
      .chain(other.keys())
      .filter(|key| self.get(key) != other.get(key))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_key() {
    let key = ContextKey::parse("brief.research_brief").unwrap();
    assert_eq!(key.namespace(), "brief");
    assert_eq!(key.name(), "research_brief");
    assert_eq!(key.to_string(), "brief.research_brief");

    assert!(ContextKey::parse("nodot").is_err());
    assert!(ContextKey::parse(".name").is_err());
    assert!(ContextKey::parse("ns.").is_err());
  }

  #[test]
  fn test_parse_key_splits_on_first_dot() {
    let key = ContextKey::parse("research.notes.v2").unwrap();
    assert_eq!(key.namespace(), "research");
    assert_eq!(key.name(), "notes.v2");
  }

  #[test]
  fn test_key_serializes_as_string() {
    let key = keys::research_notes();
    assert_eq!(serde_json::to_value(&key).unwrap(), json!("research.notes"));

    let back: ContextKey = serde_json::from_value(json!("research.notes")).unwrap();
    assert_eq!(back, key);
  }

  #[test]
  fn test_insert_get_remove() {
    let mut ctx = ExecutionContext::new();
    assert!(ctx.is_empty());

    ctx.insert(keys::clarify_decision(), "proceed");
    ctx.insert(keys::research_brief(), json!("find things"));

    assert_eq!(ctx.len(), 2);
    assert_eq!(ctx.get_str(&keys::clarify_decision()), Some("proceed"));
    assert!(ctx.namespace("brief").is_some());

    assert_eq!(ctx.remove(&keys::research_brief()), Some(json!("find things")));
    assert!(ctx.namespace("brief").is_none());
    assert_eq!(ctx.len(), 1);
  }

  #[test]
  fn test_typed_roundtrip() {
    let mut ctx = ExecutionContext::new();
    ctx
      .insert_as(keys::supervisor_iterations(), &3u32)
      .unwrap();

    let iterations: Option<u32> = ctx.get_as(&keys::supervisor_iterations()).unwrap();
    assert_eq!(iterations, Some(3));

    let missing: Option<u32> = ctx.get_as(&keys::supervisor_forced_stop()).unwrap();
    assert_eq!(missing, None);
  }

  #[test]
  fn test_changed_keys() {
    let mut before = ExecutionContext::new();
    before.insert(keys::clarify_decision(), "proceed");
    before.insert(keys::research_brief(), "a");

    let mut after = before.clone();
    after.insert(keys::research_brief(), "b");
    after.insert(keys::supervisor_iterations(), 1);
    after.remove(&keys::clarify_decision());

    let changed: Vec<String> = before
      .changed_keys(&after)
      .into_iter()
      .map(|k| k.to_string())
      .collect();

    assert_eq!(
      changed,
      vec![
        "brief.research_brief".to_string(),
        "clarify.decision".to_string(),
        "supervisor.iterations".to_string(),
      ]
    );
  }
}
