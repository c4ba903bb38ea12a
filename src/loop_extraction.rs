//! Loop template extraction.
//!
//! When an array-valued state key changes and the diff created new subtrees,
//! derive one `ItemTemplate` that renders *any* item of the array. The
//! heuristic is substring matching between rendered strings and item property
//! values. First match wins, and ambiguous matches are flagged on the
//! template rather than silently committed.
//!
//! When the observation created more than one item, a second created subtree
//! serves as a probe: two items that still disagree at the same text position
//! after their positional bindings are replaced point to a branch. If a
//! boolean property separates the two items, the divergent segment becomes a
//! `conditional_templates` map keyed by that property's rendering.

use serde_json::Value;
use std::collections::HashMap;

use crate::deep_state_traversal::find_state_values_in_content;
use crate::logging::{self, Stage};
use crate::predictor::StateChange;
use crate::template_extraction::{branch_split, template_from_matches};
use crate::vdom::{ItemTemplate, LoopTemplate, Patch, TemplatePatch, VElement, VNode};

/// Try to derive a loop template from an observed array change.
///
/// Returns the container's author-space path and the template, or `None`
/// when the observation does not look like list rendering.
pub fn extract_loop_template(
    state_change: &StateChange,
    patches: &[Patch],
    state: &HashMap<String, Value>,
) -> Option<(Vec<usize>, LoopTemplate)> {
    let new_items = state_change.new_value.as_array()?;
    if new_items.is_empty() {
        return None;
    }

    let creates: Vec<(&Vec<usize>, &VNode)> = patches
        .iter()
        .filter_map(|p| match p {
            Patch::Create { path, node } => Some((path, node)),
            _ => None,
        })
        .collect();
    let (first_path, _) = *creates.first()?;
    if first_path.is_empty() {
        return None;
    }

    // All creates must land under one container.
    let container: Vec<usize> = first_path[..first_path.len() - 1].to_vec();
    if !creates
        .iter()
        .all(|(path, _)| path.len() == first_path.len() && path[..path.len() - 1] == container[..])
    {
        return None;
    }

    // Pair each created subtree with the array item that produced it. First
    // item whose rendered values appear in the subtree wins.
    let mut pairs: Vec<(&VNode, &Value)> = Vec::new();
    for (_, node) in &creates {
        let text = flatten_text(node);
        if let Some(item) = new_items.iter().find(|item| item_matches(item, &text, node)) {
            pairs.push((node, item));
        }
    }
    let (sample, item) = *pairs.first()?;

    // A second created item (a different one) probes for boolean branches.
    let probe = pairs
        .iter()
        .skip(1)
        .find(|(_, other)| *other != item)
        .copied();

    let mut ambiguous = false;
    let item_template = infer_item_template(sample, item, probe, state, &mut ambiguous)?;

    if ambiguous {
        logging::warn_for(
            Stage::Extract,
            state_change.state_key.as_str(),
            "Ambiguous loop extraction; keeping first-match bindings",
        );
    }
    crate::metrics::METRICS.record_template_extraction();

    Some((
        container,
        LoopTemplate {
            array_binding: state_change.state_key.clone(),
            item_template,
            index_var: None,
            separator: None,
            ambiguous,
        },
    ))
}

/// Concatenated text content of a subtree.
fn flatten_text(node: &VNode) -> String {
    match node {
        VNode::Text(t) => t.content.clone(),
        VNode::Element(el) => el
            .children
            .iter()
            .flatten()
            .map(flatten_text)
            .collect::<Vec<_>>()
            .join(""),
    }
}

fn item_matches(item: &Value, sample_text: &str, sample: &VNode) -> bool {
    match item {
        Value::Object(obj) => obj.values().any(|v| {
            let rendered = crate::materialize::render_value(v);
            !rendered.is_empty()
                && (sample_text.contains(&rendered) || sample.key() == Some(rendered.as_str()))
        }),
        primitive => {
            let rendered = crate::materialize::render_value(primitive);
            !rendered.is_empty() && sample_text.contains(&rendered)
        }
    }
}

/// Scope used to locate item values in rendered strings: the component state
/// plus `item`, matching the resolution scope inside an item template. Item
/// bindings come out as `item.<property>`.
fn item_scope(item: &Value, state: &HashMap<String, Value>) -> HashMap<String, Value> {
    let mut scope = state.clone();
    scope.insert("item".to_string(), item.clone());
    scope
}

fn infer_text_template(
    content: &str,
    item: &Value,
    probe: Option<(&str, &Value)>,
    state: &HashMap<String, Value>,
    ambiguous: &mut bool,
) -> TemplatePatch {
    let matches = find_state_values_in_content(&item_scope(item, state), content);
    let (template, bindings, slots, amb) = template_from_matches(content, &matches);
    if amb {
        *ambiguous = true;
    }

    let patch = TemplatePatch {
        template,
        bindings,
        slots,
        conditional_templates: None,
        conditional_binding_index: None,
    };

    let Some((probe_content, probe_item)) = probe else {
        return patch;
    };
    let probe_matches = find_state_values_in_content(&item_scope(probe_item, state), probe_content);
    let (probe_template, probe_bindings, _, _) = template_from_matches(probe_content, &probe_matches);

    if patch.template == probe_template {
        // Positional bindings explain every difference between the items.
        if patch.bindings != probe_bindings {
            *ambiguous = true;
        }
        return patch;
    }

    // Two items still disagree at the same text position. A boolean property
    // separating them turns the divergent segment into branch literals.
    match boolean_branch(&patch, &probe_template, item, probe_item) {
        Some(branched) => branched,
        None => {
            *ambiguous = true;
            patch
        }
    }
}

/// Fold a probe divergence into `conditional_templates` when a boolean item
/// property controls it. The branch placeholder is appended as the last
/// binding; existing placeholder numbering is untouched.
fn boolean_branch(
    patch: &TemplatePatch,
    probe_template: &str,
    item: &Value,
    probe_item: &Value,
) -> Option<TemplatePatch> {
    let (prefix, mid_sample, mid_probe, suffix) = branch_split(&patch.template, probe_template);
    // A placeholder inside the divergence means the items' bindings did not
    // even line up; that is not a branch.
    if mid_sample.contains('{') || mid_probe.contains('{') {
        return None;
    }

    let (prop, sample_value, probe_value) = controlling_bool(item, probe_item)?;

    let selector = patch.bindings.len();
    let marker = format!("{{{}}}", selector);

    let mut template = String::new();
    template.push_str(prefix);
    let branch_slot = template.len();
    template.push_str(&marker);
    template.push_str(suffix);

    // Slots in the suffix shift by the marker/middle length difference.
    let boundary = prefix.len() + mid_sample.len();
    let mut slots: Vec<usize> = patch
        .slots
        .iter()
        .map(|&s| {
            if s >= boundary {
                s - mid_sample.len() + marker.len()
            } else {
                s
            }
        })
        .collect();
    slots.push(branch_slot);

    let mut bindings = patch.bindings.clone();
    bindings.push(format!("item.{}", prop));

    let mut segments = HashMap::new();
    segments.insert(sample_value.to_string(), mid_sample.to_string());
    segments.insert(probe_value.to_string(), mid_probe.to_string());

    Some(TemplatePatch {
        template,
        bindings,
        slots,
        conditional_templates: Some(segments),
        conditional_binding_index: Some(selector),
    })
}

/// The boolean property that differs between the two items, if any.
/// Alphabetical order keeps the pick deterministic.
fn controlling_bool(item: &Value, probe_item: &Value) -> Option<(String, bool, bool)> {
    let (Value::Object(obj_a), Value::Object(obj_b)) = (item, probe_item) else {
        return None;
    };
    let mut names: Vec<&String> = obj_a.keys().collect();
    names.sort();
    for name in names {
        if let (Some(Value::Bool(a)), Some(Value::Bool(b))) =
            (obj_a.get(name.as_str()), obj_b.get(name.as_str()))
        {
            if a != b {
                return Some((name.clone(), *a, *b));
            }
        }
    }
    None
}

fn infer_item_template(
    node: &VNode,
    item: &Value,
    probe: Option<(&VNode, &Value)>,
    state: &HashMap<String, Value>,
    ambiguous: &mut bool,
) -> Option<ItemTemplate> {
    match node {
        VNode::Text(text) => {
            let probe_text = probe.and_then(|(n, probe_item)| match n {
                VNode::Text(t) => Some((t.content.as_str(), probe_item)),
                _ => None,
            });
            Some(ItemTemplate::Text {
                template_patch: infer_text_template(
                    &text.content,
                    item,
                    probe_text,
                    state,
                    ambiguous,
                ),
            })
        }

        VNode::Element(el) => {
            let probe_el: Option<(&VElement, &Value)> =
                probe.and_then(|(n, probe_item)| match n {
                    VNode::Element(p) if p.tag == el.tag => Some((p, probe_item)),
                    _ => None,
                });

            let props_templates = if el.props.is_empty() {
                None
            } else {
                let mut templates = HashMap::new();
                for (name, value) in &el.props {
                    let probe_value = probe_el.and_then(|(p, probe_item)| {
                        p.props.get(name).map(|v| (v.as_str(), probe_item))
                    });
                    let tp = infer_text_template(value, item, probe_value, state, ambiguous);
                    if !tp.bindings.is_empty() {
                        templates.insert(name.clone(), tp);
                    } else {
                        // Static attribute: keep it verbatim so
                        // materialization reproduces the full element.
                        templates.insert(
                            name.clone(),
                            TemplatePatch {
                                template: value.clone(),
                                bindings: Vec::new(),
                                slots: Vec::new(),
                                conditional_templates: None,
                                conditional_binding_index: None,
                            },
                        );
                    }
                }
                Some(templates)
            };

            let children_templates = if el.children.iter().flatten().count() == 0 {
                None
            } else {
                let probe_children: Vec<&VNode> = probe_el
                    .map(|(p, _)| p.children.iter().flatten().collect())
                    .unwrap_or_default();
                let mut templates = Vec::new();
                for (i, child) in el.children.iter().flatten().enumerate() {
                    let probe_child = probe_el.and_then(|(_, probe_item)| {
                        probe_children.get(i).map(|n| (*n, probe_item))
                    });
                    templates.push(infer_item_template(
                        child,
                        item,
                        probe_child,
                        state,
                        ambiguous,
                    )?);
                }
                Some(templates)
            };

            let key_binding = el.key.as_deref().map(|key| infer_key_binding(key, item));

            Some(ItemTemplate::Element {
                tag: el.tag.clone(),
                props_templates,
                children_templates,
                key_binding,
            })
        }
    }
}

/// Find the item property whose value matches the element key; fall back to
/// `item.id` when nothing matches.
fn infer_key_binding(key: &str, item: &Value) -> String {
    if let Value::Object(obj) = item {
        let mut names: Vec<&String> = obj.keys().collect();
        names.sort();
        for name in names {
            if crate::materialize::render_value(&obj[name]) == key {
                return format!("item.{}", name);
            }
        }
    }
    logging::warn(
        Stage::Extract,
        format!("No item property matches key '{}'; assuming item.id", key),
    );
    "item.id".to_string()
}
