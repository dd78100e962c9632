//! Hierarchical documents and the paths that address their leaves.
//!
//! Documents are `serde_json::Value`s built with the `preserve_order`
//! feature, so mappings keep their insertion order through parsing,
//! mutation and serialization.

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of one leaf: mapping keys and sequence indices from the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath(Vec<PathSegment>);

impl TreePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.extend(self.0.iter().cloned());
        segments.push(segment);
        Self(segments)
    }

    pub fn key(&self, key: impl Into<String>) -> Self {
        self.child(PathSegment::Key(key.into()))
    }

    pub fn index(&self, index: usize) -> Self {
        self.child(PathSegment::Index(index))
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<PathSegment>> for TreePath {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (pos, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
                PathSegment::Key(key) if is_plain_key(key) => {
                    if pos > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                PathSegment::Key(key) => write!(f, "[{:?}]", key)?,
            }
        }
        Ok(())
    }
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_alphanumeric() || ch == '_' || ch == '-')
}

pub fn get<'a>(tree: &'a Value, path: &TreePath) -> Option<&'a Value> {
    let mut current = tree;
    for segment in path.segments() {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
            (PathSegment::Index(index), Value::Array(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes `value` at `path`, creating the containers on the way.
///
/// Sequences are padded with `null` up to the requested index; a `null`
/// slot is also where a missing container gets created. Fails when an
/// existing value has the wrong shape for the next segment.
pub fn insert(tree: &mut Value, path: &TreePath, value: Value) -> Result<()> {
    let mut current = tree;
    for (pos, segment) in path.segments().iter().enumerate() {
        if current.is_null() {
            *current = empty_container_for(segment);
        }
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => {
                map.entry(key.clone()).or_insert(Value::Null)
            }
            (PathSegment::Index(index), Value::Array(items)) => {
                if items.len() <= *index {
                    items.resize(*index + 1, Value::Null);
                }
                &mut items[*index]
            }
            (_, other) => {
                return Err(anyhow!(
                    "cannot descend into {} at segment {} of {}",
                    kind_name(other),
                    pos,
                    path
                ));
            }
        };
    }
    *current = value;
    Ok(())
}

fn empty_container_for(segment: &PathSegment) -> Value {
    match segment {
        PathSegment::Key(_) => Value::Object(Map::new()),
        PathSegment::Index(_) => Value::Array(Vec::new()),
    }
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

pub fn load_tree(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read document: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse document: {}", path.display()))
}

/// Loads a target artifact; a missing or blank file counts as empty.
///
/// A file that exists but cannot be read or parsed is an error, so callers
/// never mistake a damaged artifact for an empty one.
pub fn load_tree_or_empty(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Ok(Value::Object(Map::new()));
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read document: {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse document: {}", path.display()))
}

pub fn to_pretty_string(tree: &Value) -> Result<String> {
    let mut out = serde_json::to_string_pretty(tree)?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_creates_nested_containers() {
        let mut tree = Value::Null;
        let path = TreePath::root().key("a").index(2).key("b");
        insert(&mut tree, &path, json!("x")).expect("insert");
        assert_eq!(tree, json!({"a": [null, null, {"b": "x"}]}));
        assert_eq!(get(&tree, &path), Some(&json!("x")));
    }

    #[test]
    fn insert_rejects_shape_conflicts() {
        let mut tree = json!({"a": "leaf"});
        let path = TreePath::root().key("a").key("b");
        assert!(insert(&mut tree, &path, json!("x")).is_err());
        assert_eq!(tree, json!({"a": "leaf"}));
    }

    #[test]
    fn keys_with_dots_stay_single_segments() {
        let tree = json!({"a.b": {"c": "one"}, "a": {"b": {"c": "two"}}});
        let dotted = TreePath::root().key("a.b").key("c");
        let nested = TreePath::root().key("a").key("b").key("c");
        assert_eq!(get(&tree, &dotted), Some(&json!("one")));
        assert_eq!(get(&tree, &nested), Some(&json!("two")));
        assert_ne!(dotted.to_string(), nested.to_string());
        assert_eq!(nested.to_string(), "a.b.c");
        assert_eq!(dotted.to_string(), "[\"a.b\"].c");
    }

    #[test]
    fn load_tree_or_empty_tolerates_missing_and_blank_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.json");
        assert_eq!(load_tree_or_empty(&missing).expect("missing"), json!({}));

        let blank = dir.path().join("blank.json");
        fs::write(&blank, "  \n").expect("write");
        assert_eq!(load_tree_or_empty(&blank).expect("blank"), json!({}));
    }

    #[test]
    fn load_tree_or_empty_rejects_broken_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{\"a\":").expect("write");
        let err = load_tree_or_empty(&broken).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
    }

    #[test]
    fn parsing_preserves_key_order() {
        let tree: Value = serde_json::from_str(r#"{"z": "1", "a": "2", "m": "3"}"#).unwrap();
        let keys: Vec<_> = tree.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }
}
