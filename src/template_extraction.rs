//! Text, attribute, and conditional template extraction.
//!
//! Given a single observed patch and the state snapshot that produced it,
//! derive a parameterized template that re-predicts the patch for future
//! values. Extraction is best-effort: anything that does not fit the
//! heuristics returns `None` and the predictor keeps the concrete patches.

use serde_json::Value;
use std::collections::HashMap;

use crate::deep_state_traversal::{find_state_values_in_content, StateValueMatch};
use crate::logging::{self, Stage};
use crate::path::HexPath;
use crate::predictor::StateChange;
use crate::simulator::ConditionalElementTemplate;
use crate::vdom::{Patch, TemplatePatch, VNode};

/// A learned conditional element: the shared compiler metadata plus the
/// authored subtree observed at learn time. Compiler metadata never carries
/// the subtree, but re-creating the element needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalPrediction {
    pub template: ConditionalElementTemplate,
    pub node: VNode,
    pub last_path: Option<Vec<usize>>,
}

/// Does this binding path reference the changed state key?
fn references_key(path: &str, state_key: &str) -> bool {
    path == state_key
        || path
            .strip_prefix(state_key)
            .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
}

/// Build a template string from content and its located bindings: each match
/// becomes a `{i}` placeholder, slots record the placeholder's byte offset in
/// the finished template.
pub(crate) fn template_from_matches(
    content: &str,
    matches: &[StateValueMatch],
) -> (String, Vec<String>, Vec<usize>, bool) {
    let mut template = String::new();
    let mut bindings = Vec::with_capacity(matches.len());
    let mut slots = Vec::with_capacity(matches.len());
    let mut ambiguous = false;
    let mut cursor = 0;

    for (i, m) in matches.iter().enumerate() {
        template.push_str(&content[cursor..m.content_position]);
        slots.push(template.len());
        template.push_str(&format!("{{{}}}", i));
        bindings.push(m.path.clone());
        if !m.alternates.is_empty() {
            ambiguous = true;
        }
        cursor = m.content_position + m.value_str.len();
    }
    template.push_str(&content[cursor..]);

    (template, bindings, slots, ambiguous)
}

/// Common prefix/suffix split for boolean branch texts. Returns
/// (prefix, old_middle, new_middle, suffix). Loop extraction uses the same
/// split to compare two items' renderings.
pub(crate) fn branch_split<'a>(old: &'a str, new: &'a str) -> (&'a str, &'a str, &'a str, &'a str) {
    let prefix_len = old
        .as_bytes()
        .iter()
        .zip(new.as_bytes())
        .take_while(|(a, b)| a == b)
        .count();
    // Keep prefix on a UTF-8 boundary.
    let prefix_len = (0..=prefix_len)
        .rev()
        .find(|&n| old.is_char_boundary(n) && new.is_char_boundary(n))
        .unwrap_or(0);

    let max_suffix = old.len().min(new.len()) - prefix_len;
    let suffix_len = old
        .as_bytes()
        .iter()
        .rev()
        .zip(new.as_bytes().iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix_len = (0..=suffix_len)
        .rev()
        .find(|&n| old.is_char_boundary(old.len() - n) && new.is_char_boundary(new.len() - n))
        .unwrap_or(0);

    (
        &old[..prefix_len],
        &old[prefix_len..old.len() - suffix_len],
        &new[prefix_len..new.len() - suffix_len],
        &old[old.len() - suffix_len..],
    )
}

/// Boolean toggle over a text node: the differing segment becomes a
/// conditional template keyed by the boolean's rendering.
fn extract_boolean_text_template(
    state_change: &StateChange,
    old_content: &str,
    new_content: &str,
) -> Option<TemplatePatch> {
    let (Value::Bool(old_bool), Value::Bool(new_bool)) =
        (&state_change.old_value, &state_change.new_value)
    else {
        return None;
    };
    if old_bool == new_bool || old_content == new_content {
        return None;
    }

    let (prefix, old_mid, new_mid, _suffix) = branch_split(old_content, new_content);

    let mut segments = HashMap::new();
    segments.insert(old_bool.to_string(), old_mid.to_string());
    segments.insert(new_bool.to_string(), new_mid.to_string());

    let mut template = String::new();
    template.push_str(prefix);
    let slot = template.len();
    template.push_str("{0}");
    template.push_str(&new_content[prefix.len() + new_mid.len()..]);

    Some(TemplatePatch {
        template,
        bindings: vec![state_change.state_key.clone()],
        slots: vec![slot],
        conditional_templates: Some(segments),
        conditional_binding_index: Some(0),
    })
}

/// Extract a positional template from rendered content. Requires at least one
/// binding that references the changed key; other state values found in the
/// same payload become additional bindings (multi-variable extraction).
fn extract_content_template(
    state_change: &StateChange,
    content: &str,
    state: &HashMap<String, Value>,
) -> Option<TemplatePatch> {
    let matches = find_state_values_in_content(state, content);
    if !matches
        .iter()
        .any(|m| references_key(&m.path, &state_change.state_key))
    {
        return None;
    }

    let (template, bindings, slots, ambiguous) = template_from_matches(content, &matches);
    if ambiguous {
        logging::warn_for(
            Stage::Extract,
            state_change.state_key.as_str(),
            format!("Ambiguous binding(s) while templating '{}'", content),
        );
    }

    Some(TemplatePatch {
        template,
        bindings,
        slots,
        conditional_templates: None,
        conditional_binding_index: None,
    })
}

/// Try to turn a single observed patch into a text or attribute template.
pub fn extract_text_or_attr_template(
    state_change: &StateChange,
    patch: &Patch,
    old_tree: &VNode,
    state: &HashMap<String, Value>,
) -> Option<Patch> {
    // The changed key's new value has to be findable even when the host
    // passed no snapshot.
    let mut state = state.clone();
    state
        .entry(state_change.state_key.clone())
        .or_insert_with(|| state_change.new_value.clone());

    match patch {
        Patch::UpdateText { path, content } => {
            // Boolean toggles rarely print "true"; diff the branch texts.
            if matches!(state_change.new_value, Value::Bool(_)) {
                let old_content = match old_tree.node_at_path(path).ok()? {
                    VNode::Text(t) => t.content.clone(),
                    _ => return None,
                };
                let template_patch =
                    extract_boolean_text_template(state_change, &old_content, content)?;
                return Some(Patch::UpdateTextTemplate {
                    path: path.clone(),
                    template_patch,
                });
            }

            let template_patch = extract_content_template(state_change, content, &state)?;
            Some(Patch::UpdateTextTemplate {
                path: path.clone(),
                template_patch,
            })
        }

        Patch::UpdateProps { path, props } => {
            // Deterministic prop order; first templatable prop wins.
            let mut names: Vec<&String> = props.keys().collect();
            names.sort();
            for name in names {
                let Some(Some(value)) = props.get(name) else { continue };
                if let Some(template_patch) =
                    extract_content_template(state_change, value, &state)
                {
                    return Some(Patch::UpdatePropsTemplate {
                        path: path.clone(),
                        prop_name: name.clone(),
                        template_patch,
                    });
                }
            }
            None
        }

        _ => None,
    }
}

/// Recognize a Create/Remove at a known conditional's guarded position and
/// capture the subtree for later re-creation. Without compiler metadata a
/// boolean state change synthesizes a single-gate template from the key.
pub fn extract_conditional(
    state_change: &StateChange,
    patch: &Patch,
    conditionals: &HashMap<HexPath, ConditionalElementTemplate>,
    old_tree: &VNode,
) -> Option<ConditionalPrediction> {
    let (path, node) = match patch {
        Patch::Create { path, node } => (path, node.clone()),
        Patch::Remove { path } => {
            let node = old_tree.node_at_path(path).ok()?.clone();
            (path, node)
        }
        _ => return None,
    };

    let known = conditionals.iter().find_map(|(hex, template)| {
        (hex.to_index_path().ok()? == *path).then(|| template.clone())
    });

    let template = match known {
        Some(t) => t,
        None => {
            if !matches!(state_change.new_value, Value::Bool(_)) {
                return None;
            }
            ConditionalElementTemplate {
                condition_expression: state_change.state_key.clone(),
                condition_bindings: vec![state_change.state_key.clone()],
                condition_mapping: HashMap::new(),
                parent_template: None,
                path_variants: HashMap::new(),
                gate_order: Vec::new(),
                dynamic_only: false,
            }
        }
    };

    Some(ConditionalPrediction {
        template,
        node,
        last_path: Some(path.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_from(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    fn change(key: &str, old: Value, new: Value) -> StateChange {
        StateChange {
            component_id: "comp".to_string(),
            state_key: key.to_string(),
            old_value: old,
            new_value: new,
        }
    }

    #[test]
    fn test_counter_template_extraction() {
        let sc = change("count", json!(0), json!(1));
        let patch = Patch::UpdateText {
            path: vec![0],
            content: "Count: 1".to_string(),
        };
        let old_tree = VNode::element(
            "div",
            HashMap::new(),
            vec![Some(VNode::text("Count: 0"))],
        );
        let state = state_from(json!({ "count": 1 }));

        let extracted = extract_text_or_attr_template(&sc, &patch, &old_tree, &state).unwrap();
        match extracted {
            Patch::UpdateTextTemplate { path, template_patch } => {
                assert_eq!(path, vec![0]);
                assert_eq!(template_patch.template, "Count: {0}");
                assert_eq!(template_patch.bindings, vec!["count"]);
                assert_eq!(template_patch.slots, vec![7]);
            }
            _ => panic!("Expected UpdateTextTemplate"),
        }
    }

    #[test]
    fn test_multi_variable_extraction() {
        let sc = change("city", json!("LA"), json!("NYC"));
        let patch = Patch::UpdateText {
            path: vec![1],
            content: "John from NYC".to_string(),
        };
        let old_tree = VNode::element(
            "div",
            HashMap::new(),
            vec![
                Some(VNode::text("header")),
                Some(VNode::text("John from LA")),
            ],
        );
        let state = state_from(json!({ "city": "NYC", "name": "John" }));

        let extracted = extract_text_or_attr_template(&sc, &patch, &old_tree, &state).unwrap();
        match extracted {
            Patch::UpdateTextTemplate { template_patch, .. } => {
                assert_eq!(template_patch.template, "{0} from {1}");
                assert_eq!(template_patch.bindings, vec!["name", "city"]);
                assert_eq!(template_patch.slots, vec![0, 9]);
            }
            _ => panic!("Expected UpdateTextTemplate"),
        }
    }

    #[test]
    fn test_boolean_toggle_text_extraction() {
        let sc = change("isOn", json!(false), json!(true));
        let patch = Patch::UpdateText {
            path: vec![0],
            content: "Hide Details".to_string(),
        };
        let old_tree = VNode::element(
            "button",
            HashMap::new(),
            vec![Some(VNode::text("Show Details"))],
        );
        let state = state_from(json!({ "isOn": true }));

        let extracted = extract_text_or_attr_template(&sc, &patch, &old_tree, &state).unwrap();
        match extracted {
            Patch::UpdateTextTemplate { template_patch, .. } => {
                assert_eq!(template_patch.template, "{0} Details");
                assert_eq!(template_patch.bindings, vec!["isOn"]);
                assert_eq!(template_patch.slots, vec![0]);
                let segments = template_patch.conditional_templates.unwrap();
                assert_eq!(segments.get("true"), Some(&"Hide".to_string()));
                assert_eq!(segments.get("false"), Some(&"Show".to_string()));
                assert_eq!(template_patch.conditional_binding_index, Some(0));
            }
            _ => panic!("Expected UpdateTextTemplate"),
        }
    }

    #[test]
    fn test_attribute_template_extraction() {
        let sc = change("theme", json!("light"), json!("dark"));
        let mut props = HashMap::new();
        props.insert("class".to_string(), Some("panel dark".to_string()));
        let patch = Patch::UpdateProps {
            path: vec![],
            props,
        };
        let old_tree = VNode::element("div", HashMap::new(), vec![]);
        let state = state_from(json!({ "theme": "dark" }));

        let extracted = extract_text_or_attr_template(&sc, &patch, &old_tree, &state).unwrap();
        match extracted {
            Patch::UpdatePropsTemplate { prop_name, template_patch, .. } => {
                assert_eq!(prop_name, "class");
                assert_eq!(template_patch.template, "panel {0}");
                assert_eq!(template_patch.bindings, vec!["theme"]);
            }
            _ => panic!("Expected UpdatePropsTemplate"),
        }
    }

    #[test]
    fn test_unrelated_content_declines() {
        let sc = change("count", json!(0), json!(1));
        let patch = Patch::UpdateText {
            path: vec![0],
            content: "totally static".to_string(),
        };
        let old_tree = VNode::element(
            "div",
            HashMap::new(),
            vec![Some(VNode::text("before"))],
        );
        let state = state_from(json!({ "count": 1 }));

        assert!(extract_text_or_attr_template(&sc, &patch, &old_tree, &state).is_none());
    }

    #[test]
    fn test_conditional_extraction_from_create() {
        let sc = change("isShown", json!(false), json!(true));
        let content = VNode::element("div", HashMap::new(), vec![Some(VNode::text("Content"))]);
        let patch = Patch::Create {
            path: vec![1],
            node: content.clone(),
        };
        let old_tree = VNode::element("div", HashMap::new(), vec![Some(VNode::text("a")), None]);

        let prediction =
            extract_conditional(&sc, &patch, &HashMap::new(), &old_tree).unwrap();
        assert_eq!(prediction.node, content);
        assert_eq!(prediction.last_path, Some(vec![1]));
        assert_eq!(prediction.template.condition_expression, "isShown");
    }

    #[test]
    fn test_conditional_extraction_prefers_metadata() {
        let sc = change("state_0", json!(true), json!(false));
        let patch = Patch::Remove { path: vec![1] };
        let old_tree = VNode::element(
            "div",
            HashMap::new(),
            vec![
                Some(VNode::text("a")),
                Some(VNode::element("nav", HashMap::new(), vec![])),
            ],
        );

        let mut conditionals = HashMap::new();
        let mut mapping = HashMap::new();
        mapping.insert("menuOpen".to_string(), "state_0".to_string());
        conditionals.insert(
            crate::path::index_path_to_hex(&[1]),
            ConditionalElementTemplate {
                condition_expression: "menuOpen".to_string(),
                condition_bindings: vec!["state_0".to_string()],
                condition_mapping: mapping,
                parent_template: None,
                path_variants: HashMap::new(),
                gate_order: Vec::new(),
                dynamic_only: false,
            },
        );

        let prediction = extract_conditional(&sc, &patch, &conditionals, &old_tree).unwrap();
        assert_eq!(prediction.template.condition_expression, "menuOpen");
        assert!(prediction.node.is_element());
    }
}
