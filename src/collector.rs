use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::tree::{self, TreePath};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringEntry {
    pub path: TreePath,
    pub text: String,
}

/// Lists every string leaf in document order: mapping keys in insertion
/// order, sequences by index. Other leaves are skipped.
///
/// Walks with an explicit stack, so nesting depth is bounded only by memory.
pub fn collect(tree: &Value) -> Vec<StringEntry> {
    let mut out = Vec::new();
    let mut stack: Vec<(TreePath, &Value)> = vec![(TreePath::root(), tree)];
    while let Some((path, value)) = stack.pop() {
        match value {
            Value::String(text) => out.push(StringEntry {
                path,
                text: text.clone(),
            }),
            Value::Object(map) => {
                for (key, child) in map.iter().rev() {
                    stack.push((path.key(key.as_str()), child));
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate().rev() {
                    stack.push((path.index(index), child));
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }
    out
}

pub fn paths_of(tree: &Value) -> HashSet<TreePath> {
    collect(tree).into_iter().map(|entry| entry.path).collect()
}

/// Builds a tree holding exactly the given entries.
pub fn rebuild(entries: &[StringEntry]) -> Result<Value> {
    let mut tree = Value::Null;
    for entry in entries {
        tree::insert(&mut tree, &entry.path, Value::String(entry.text.clone()))?;
    }
    if tree.is_null() {
        tree = Value::Object(Map::new());
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_strings_in_document_order() {
        let tree = json!({
            "b": "first",
            "a": {"z": "second", "y": ["third", 7, {"k": "fourth"}]},
            "n": null,
            "t": true,
            "c": "fifth"
        });
        let texts: Vec<_> = collect(&tree).into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["first", "second", "third", "fourth", "fifth"]);
    }

    #[test]
    fn paths_address_their_leaves() {
        let tree = json!({"a": {"b": ["x", {"c": "y"}]}});
        for entry in collect(&tree) {
            assert_eq!(
                tree::get(&tree, &entry.path),
                Some(&Value::String(entry.text.clone()))
            );
        }
    }

    #[test]
    fn rebuild_round_trips_string_trees() {
        let tree = json!({
            "menu": {"open": "Aç", "items": ["bir", "iki", {"deep": {"er": "üç"}}]},
            "title": "Başlık"
        });
        let rebuilt = rebuild(&collect(&tree)).expect("rebuild");
        assert_eq!(rebuilt, tree);
        let keys: Vec<_> = rebuilt.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["menu", "title"]);
    }

    #[test]
    fn root_string_has_root_path() {
        let entries = collect(&json!("alone"));
        assert_eq!(entries.len(), 1);
        assert!(entries[0].path.is_root());
        assert_eq!(rebuild(&entries).expect("rebuild"), json!("alone"));
    }

    #[test]
    fn deep_nesting_does_not_overflow() {
        let mut tree = json!("leaf");
        for _ in 0..2_000 {
            let mut map = Map::new();
            map.insert("n".to_string(), tree);
            tree = Value::Object(map);
        }
        let entries = collect(&tree);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path.segments().len(), 2_000);

        // Dropping the nested value recurses, so unwind it level by level.
        while let Value::Object(mut map) = tree {
            tree = map.remove("n").unwrap_or(Value::Null);
        }
    }
}
