//! Deep state traversal.
//!
//! Template extraction needs to find rendered values inside nested state:
//! `user.address.city`, `formData.personal.firstName`, `todos[2].text`.
//! A flat top-level scan misses all of these, so extraction walks the whole
//! state object and collects every primitive value with its dot-notation
//! path.

use serde_json::Value;
use std::collections::HashMap;

/// A state value located inside rendered content.
#[derive(Debug, Clone)]
pub struct StateValueMatch {
    /// Dot-notation path of the binding (e.g. "user.address.city").
    pub path: String,
    /// String rendering of the value.
    pub value_str: String,
    /// Byte offset in the content where the value was found.
    pub content_position: usize,
    /// Other state paths holding the same value. Non-empty means the binding
    /// choice was ambiguous; first-match-wins applies, but callers can flag it.
    pub alternates: Vec<String>,
}

fn push_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn traverse(value: &Value, current_path: &str, out: &mut HashMap<String, Vec<String>>) {
    match value {
        Value::String(s) if !s.is_empty() => {
            out.entry(s.clone()).or_default().push(current_path.to_string());
        }
        Value::Number(n) => {
            out.entry(n.to_string()).or_default().push(current_path.to_string());
        }
        Value::Bool(b) => {
            out.entry(b.to_string()).or_default().push(current_path.to_string());
        }
        Value::Object(obj) => {
            for (key, val) in obj {
                traverse(val, &push_path(current_path, key), out);
            }
        }
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                traverse(item, &format!("{}[{}]", current_path, i), out);
            }
        }
        _ => {}
    }
}

/// Collect every primitive value in the state with all paths it appears at.
pub fn collect_all_primitive_values(
    state: &HashMap<String, Value>,
) -> HashMap<String, Vec<String>> {
    let mut result: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in state {
        traverse(value, key, &mut result);
    }
    // State maps iterate in arbitrary order; sorted paths keep the binding
    // choice for a duplicated value stable across runs.
    for paths in result.values_mut() {
        paths.sort();
    }
    result
}

/// All state paths whose primitive value equals `search_value`.
pub fn find_value_in_state(state: &HashMap<String, Value>, search_value: &str) -> Vec<String> {
    let mut all = collect_all_primitive_values(state);
    all.remove(search_value).unwrap_or_default()
}

/// Locate state values inside rendered content.
///
/// Returns leftmost, non-overlapping matches sorted by position. Longer
/// values win at equal positions so "123" is not claimed by a state value
/// of "1". Ambiguity (the same value at several state paths) is reported in
/// `alternates`; the first path found is the binding, per first-match-wins.
pub fn find_state_values_in_content(
    state: &HashMap<String, Value>,
    content: &str,
) -> Vec<StateValueMatch> {
    let value_map = collect_all_primitive_values(state);

    let mut matches = Vec::new();
    for (value_str, paths) in &value_map {
        let mut search_pos = 0;
        while let Some(pos) = content[search_pos..].find(value_str.as_str()) {
            let absolute_pos = search_pos + pos;
            matches.push(StateValueMatch {
                path: paths[0].clone(),
                value_str: value_str.clone(),
                content_position: absolute_pos,
                alternates: paths[1..].to_vec(),
            });
            search_pos = absolute_pos + value_str.len().max(1);
        }
    }

    // Leftmost first; at ties prefer the longer value.
    matches.sort_by(|a, b| {
        a.content_position
            .cmp(&b.content_position)
            .then(b.value_str.len().cmp(&a.value_str.len()))
    });

    let mut filtered: Vec<StateValueMatch> = Vec::new();
    let mut last_end = 0;
    for m in matches {
        if m.content_position >= last_end {
            last_end = m.content_position + m.value_str.len();
            filtered.push(m);
        }
    }

    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_from(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_find_value_in_nested_state() {
        let state = state_from(json!({
            "user": {
                "name": "John",
                "address": { "city": "NYC", "zip": "10001" }
            }
        }));

        assert_eq!(find_value_in_state(&state, "NYC"), vec!["user.address.city"]);
        assert_eq!(find_value_in_state(&state, "John"), vec!["user.name"]);
        assert!(find_value_in_state(&state, "absent").is_empty());
    }

    #[test]
    fn test_collect_all_primitive_values() {
        let state = state_from(json!({
            "user": { "name": "John", "age": 30 },
            "admin": { "name": "Jane" }
        }));

        let values = collect_all_primitive_values(&state);
        assert_eq!(values.get("John"), Some(&vec!["user.name".to_string()]));
        assert_eq!(values.get("30"), Some(&vec!["user.age".to_string()]));
        assert_eq!(values.get("Jane"), Some(&vec!["admin.name".to_string()]));
    }

    #[test]
    fn test_array_paths_indexed() {
        let state = state_from(json!({
            "todos": [ { "text": "Buy milk" }, { "text": "Walk dog" } ]
        }));

        assert_eq!(
            find_value_in_state(&state, "Walk dog"),
            vec!["todos[1].text"]
        );
    }

    #[test]
    fn test_find_state_values_in_content() {
        let state = state_from(json!({
            "user": { "name": "John", "address": { "city": "NYC" } }
        }));

        let matches = find_state_values_in_content(&state, "User: John from NYC");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].path, "user.name");
        assert_eq!(matches[0].content_position, 6);
        assert_eq!(matches[1].path, "user.address.city");
        assert_eq!(matches[1].content_position, 16);
    }

    #[test]
    fn test_ambiguous_value_reports_alternates() {
        let state = state_from(json!({
            "user": { "name": "John" },
            "admin": { "name": "John" }
        }));

        let matches = find_state_values_in_content(&state, "Hi John");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].alternates.len(), 1);
    }

    #[test]
    fn test_overlapping_matches_keep_leftmost() {
        let state = state_from(json!({ "a": "10", "b": "100" }));

        let matches = find_state_values_in_content(&state, "total 100");
        // "100" wins over "10" at the same position.
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].value_str, "100");
    }
}
