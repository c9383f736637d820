// ABOUTME: Structural difference between two JSON values, rendered one change per line.
// ABOUTME: Used by the recorder to journal what changed on a model between two states.

use serde_json::Value;

/// Render every difference between `old` and `new` as `-path: value` /
/// `+path: value` lines. Returns an empty string when they are equal.
pub fn json_diff(old: &Value, new: &Value) -> String {
    let mut lines = Vec::new();
    walk("", old, new, &mut lines);
    lines.join("\n")
}

fn walk(path: &str, old: &Value, new: &Value, lines: &mut Vec<String>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, left) in a {
                let child = join(path, key);
                match b.get(key) {
                    Some(right) => walk(&child, left, right, lines),
                    None => lines.push(format!("-{}: {}", child, left)),
                }
            }
            for (key, right) in b {
                if !a.contains_key(key) {
                    lines.push(format!("+{}: {}", join(path, key), right));
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for i in 0..a.len().max(b.len()) {
                let child = format!("{}[{}]", path, i);
                match (a.get(i), b.get(i)) {
                    (Some(left), Some(right)) => walk(&child, left, right, lines),
                    (Some(left), None) => lines.push(format!("-{}: {}", child, left)),
                    (None, Some(right)) => lines.push(format!("+{}: {}", child, right)),
                    (None, None) => {}
                }
            }
        }
        _ if old == new => {}
        _ => {
            let shown = if path.is_empty() { "." } else { path };
            lines.push(format!("-{}: {}", shown, old));
            lines.push(format!("+{}: {}", shown, new));
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_values_have_no_diff() {
        let v = json!({"a": 1, "b": [1, 2]});
        assert_eq!(json_diff(&v, &v), "");
    }

    #[test]
    fn changed_nested_field() {
        let old = json!({"customer": {"name": "Ann", "age": 30}});
        let new = json!({"customer": {"name": "Ann", "age": 31}});
        assert_eq!(json_diff(&old, &new), "-customer.age: 30\n+customer.age: 31");
    }

    #[test]
    fn added_removed_keys_and_items() {
        let old = json!({"gone": true, "tags": ["x"]});
        let new = json!({"tags": ["x", "y"], "fresh": 1});
        assert_eq!(json_diff(&old, &new), "-gone: true\n+tags[1]: \"y\"\n+fresh: 1");
    }

    #[test]
    fn scalar_root() {
        assert_eq!(json_diff(&json!(1), &json!(2)), "-.: 1\n+.: 2");
    }
}
