//! Deterministic deep merge of role layers.
//!
//! Layers are folded root-first, so the child is always merged onto the
//! accumulated parent:
//!
//! - Keys in [`LIST_UNION_KEYS`]: parent list followed by child list, first
//!   occurrence wins on duplicates.
//! - Mappings present on both sides: merged recursively with the same rules.
//! - Anything else: the child value replaces the parent value (including `null`).

use serde_json::{Map, Value};

/// List-valued keys whose values accumulate down the inheritance chain.
pub const LIST_UNION_KEYS: &[&str] = &[
    "allow",
    "deny",
    "allowed_paths",
    "forbidden_patterns",
    "rules",
    "skills",
    "commands",
    "can_spawn",
    "can_delegate_to",
    "tags",
];

/// Merge `child` onto `parent`, returning a new mapping.
pub fn deep_merge(parent: &Map<String, Value>, child: &Map<String, Value>) -> Map<String, Value> {
    let mut result = parent.clone();

    for (key, child_val) in child {
        let merged = match (result.get(key), child_val) {
            (None, _) => child_val.clone(),
            (Some(Value::Array(parent_items)), Value::Array(child_items))
                if LIST_UNION_KEYS.contains(&key.as_str()) =>
            {
                Value::Array(union_ordered(parent_items, child_items))
            }
            (Some(Value::Object(parent_map)), Value::Object(child_map)) => {
                Value::Object(deep_merge(parent_map, child_map))
            }
            (Some(_), _) => child_val.clone(),
        };
        result.insert(key.clone(), merged);
    }

    result
}

/// Fold an ordered sequence of layers (root first) into one mapping.
pub fn fold_layers<'a, I>(layers: I) -> Map<String, Value>
where
    I: IntoIterator<Item = &'a Map<String, Value>>,
{
    layers
        .into_iter()
        .fold(Map::new(), |acc, layer| deep_merge(&acc, layer))
}

fn union_ordered(parent: &[Value], child: &[Value]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(parent.len() + child.len());
    for item in parent.iter().chain(child) {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn union_keys_concatenate_without_duplicates() {
        let parent = map(json!({"tools": {"allow": ["read_file", "bash"]}}));
        let child = map(json!({"tools": {"allow": ["bash", "write_file"]}}));

        let merged = deep_merge(&parent, &child);
        assert_eq!(
            merged["tools"]["allow"],
            json!(["read_file", "bash", "write_file"])
        );
    }

    #[test]
    fn union_dedupes_within_parent_list() {
        let parent = map(json!({"tags": ["a", "a", "b"]}));
        let child = map(json!({"tags": ["b", "c"]}));

        let merged = deep_merge(&parent, &child);
        assert_eq!(merged["tags"], json!(["a", "b", "c"]));
    }

    #[test]
    fn non_union_lists_are_replaced() {
        let parent = map(json!({"output": {"destinations": [{"type": "stdout"}]}}));
        let child = map(json!({"output": {"destinations": [{"type": "file", "path": "x"}]}}));

        let merged = deep_merge(&parent, &child);
        assert_eq!(
            merged["output"]["destinations"],
            json!([{"type": "file", "path": "x"}])
        );
    }

    #[test]
    fn nested_mappings_keep_inherited_siblings() {
        let parent = map(json!({"autonomy": {"max_cost_usd": 1.0, "max_tool_calls": 10}}));
        let child = map(json!({"autonomy": {"max_tool_calls": 40}}));

        let merged = deep_merge(&parent, &child);
        assert_eq!(merged["autonomy"]["max_cost_usd"], json!(1.0));
        assert_eq!(merged["autonomy"]["max_tool_calls"], json!(40));
    }

    #[test]
    fn child_null_replaces_parent_scalar() {
        let parent = map(json!({"model": {"temperature": 0.2}}));
        let child = map(json!({"model": {"temperature": null}}));

        let merged = deep_merge(&parent, &child);
        assert_eq!(merged["model"]["temperature"], Value::Null);
    }

    #[test]
    fn union_key_with_scalar_child_is_replaced() {
        let parent = map(json!({"tags": ["a"]}));
        let child = map(json!({"tags": "solo"}));

        let merged = deep_merge(&parent, &child);
        assert_eq!(merged["tags"], json!("solo"));
    }

    #[test]
    fn folding_is_deterministic() {
        let layers = [
            map(json!({"name": "base", "tools": {"allow": ["read_file"]}, "tags": ["x"]})),
            map(json!({"name": "mid", "tools": {"deny": ["bash"]}})),
            map(json!({"name": "leaf", "tools": {"allow": ["write_file"]}, "tags": ["y", "x"]})),
        ];

        let first = serde_json::to_string(&fold_layers(&layers)).expect("serialize");
        let second = serde_json::to_string(&fold_layers(&layers)).expect("serialize");
        assert_eq!(first, second);

        let merged = fold_layers(&layers);
        assert_eq!(merged["name"], json!("leaf"));
        assert_eq!(merged["tools"]["allow"], json!(["read_file", "write_file"]));
        assert_eq!(merged["tools"]["deny"], json!(["bash"]));
        assert_eq!(merged["tags"], json!(["x", "y"]));
    }
}
