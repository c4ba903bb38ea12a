//! Template materialization.
//!
//! Turns stored templates plus a state snapshot into concrete patches. Any
//! binding that fails to resolve aborts materialization for that patch (the
//! predictor declines rather than ship a malformed output) and the failure
//! is recorded for template health tracking.

use serde_json::Value;
use std::collections::HashMap;

use crate::error::{MinimactError, Result};
use crate::vdom::{ItemTemplate, LoopTemplate, Patch, TemplatePatch, VNode};

/// Resolve a dotted binding path ("count", "user.address.city",
/// "item.tags[0]") against a flat state map.
pub fn resolve_binding(binding: &str, state: &HashMap<String, Value>) -> Option<Value> {
    let mut segments = binding.split('.');
    let first = segments.next()?;
    let (root_key, root_indices) = split_indices(first)?;

    let mut current = state.get(root_key)?.clone();
    for idx in root_indices {
        current = current.as_array()?.get(idx)?.clone();
    }

    for segment in segments {
        let (key, indices) = split_indices(segment)?;
        current = current.as_object()?.get(key)?.clone();
        for idx in indices {
            current = current.as_array()?.get(idx)?.clone();
        }
    }

    Some(current)
}

/// Split "todos[1]" into ("todos", [1]).
fn split_indices(segment: &str) -> Option<(&str, Vec<usize>)> {
    match segment.find('[') {
        None => Some((segment, Vec::new())),
        Some(bracket) => {
            let key = &segment[..bracket];
            let mut indices = Vec::new();
            let mut rest = &segment[bracket..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']')?;
                indices.push(stripped[..close].parse().ok()?);
                rest = &stripped[close + 1..];
            }
            if rest.is_empty() {
                Some((key, indices))
            } else {
                None
            }
        }
    }
}

/// Render a JSON value the way the component runtime prints it into text.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Splice resolved bindings into a template string.
///
/// When conditional segments are present, the controlling binding selects the
/// literal that replaces its placeholder instead of the rendered value.
pub fn render_template_patch(
    patch: &TemplatePatch,
    state: &HashMap<String, Value>,
) -> Result<String> {
    patch.validate()?;

    let mut substitutions = Vec::with_capacity(patch.bindings.len());
    for (i, binding) in patch.bindings.iter().enumerate() {
        let value = resolve_binding(binding, state).ok_or_else(|| {
            MinimactError::UnresolvedBinding {
                binding: binding.clone(),
            }
        })?;
        let rendered = render_value(&value);

        let substitution = match (&patch.conditional_templates, patch.conditional_binding_index) {
            (Some(segments), Some(selector)) if selector == i => segments
                .get(&rendered)
                .cloned()
                .ok_or_else(|| MinimactError::UnresolvedBinding {
                    binding: format!("{} -> no segment for '{}'", binding, rendered),
                })?,
            _ => rendered,
        };
        substitutions.push(substitution);
    }

    let mut out = patch.template.clone();
    for (i, substitution) in substitutions.iter().enumerate() {
        out = out.replace(&format!("{{{}}}", i), substitution);
    }
    Ok(out)
}

/// Materialize one loop item into a VNode under the given scope
/// (state + `item` + index variable).
pub fn materialize_item(template: &ItemTemplate, scope: &HashMap<String, Value>) -> Result<VNode> {
    match template {
        ItemTemplate::Text { template_patch } => {
            Ok(VNode::text(render_template_patch(template_patch, scope)?))
        }
        ItemTemplate::Element {
            tag,
            props_templates,
            children_templates,
            key_binding,
        } => {
            let mut props = HashMap::new();
            if let Some(templates) = props_templates {
                for (name, tp) in templates {
                    props.insert(name.clone(), render_template_patch(tp, scope)?);
                }
            }

            let mut children = Vec::new();
            if let Some(templates) = children_templates {
                for child in templates {
                    children.push(Some(materialize_item(child, scope)?));
                }
            }

            let node = match key_binding {
                Some(binding) => {
                    let key = resolve_binding(binding, scope).ok_or_else(|| {
                        MinimactError::UnresolvedBinding {
                            binding: binding.clone(),
                        }
                    })?;
                    VNode::keyed_element(tag.clone(), render_value(&key), props, children)
                }
                None => VNode::element(tag.clone(), props, children),
            };
            Ok(node)
        }
    }
}

/// Materialize every item of a loop template against the state snapshot.
pub fn materialize_loop(
    template: &LoopTemplate,
    state: &HashMap<String, Value>,
) -> Result<Vec<VNode>> {
    let array = resolve_binding(&template.array_binding, state)
        .and_then(|v| v.as_array().cloned())
        .ok_or_else(|| MinimactError::UnresolvedBinding {
            binding: template.array_binding.clone(),
        })?;

    let index_name = template.index_var.as_deref().unwrap_or("index");

    let mut nodes = Vec::with_capacity(array.len());
    for (index, item) in array.iter().enumerate() {
        let mut scope = state.clone();
        scope.insert("item".to_string(), item.clone());
        scope.insert(index_name.to_string(), Value::from(index));

        if index > 0 {
            if let Some(separator) = &template.separator {
                nodes.push(VNode::text(separator.clone()));
            }
        }
        nodes.push(materialize_item(&template.item_template, &scope)?);
    }

    Ok(nodes)
}

/// Materialize a single patch into its concrete form.
///
/// Text/attribute templates render to `UpdateText`/`UpdateProps`. A list
/// template renders to a replacement of its container (the container node
/// comes from `current_tree`); without a tree the template patch passes
/// through for the client to materialize. `AppendTemplate` always passes
/// through since its items render client-side against the streamed state.
/// Concrete patches pass through untouched.
pub fn materialize_patch(
    patch: &Patch,
    state: &HashMap<String, Value>,
    current_tree: Option<&VNode>,
) -> Result<Patch> {
    match patch {
        Patch::UpdateTextTemplate {
            path,
            template_patch,
        } => Ok(Patch::UpdateText {
            path: path.clone(),
            content: render_template_patch(template_patch, state)?,
        }),

        Patch::UpdatePropsTemplate {
            path,
            prop_name,
            template_patch,
        } => {
            let mut props = HashMap::new();
            props.insert(
                prop_name.clone(),
                Some(render_template_patch(template_patch, state)?),
            );
            Ok(Patch::UpdateProps {
                path: path.clone(),
                props,
            })
        }

        Patch::UpdateListTemplate {
            path,
            loop_template,
        } => {
            let children: Vec<Option<VNode>> = materialize_loop(loop_template, state)?
                .into_iter()
                .map(Some)
                .collect();

            match current_tree {
                Some(tree) => match tree.node_at_path(path)? {
                    VNode::Element(container) => {
                        let mut replacement = container.clone();
                        replacement.children = children;
                        Ok(Patch::Replace {
                            path: path.clone(),
                            node: VNode::Element(replacement),
                        })
                    }
                    other => Err(MinimactError::PatchTypeMismatch {
                        expected: "Element",
                        found: other.node_type(),
                    }),
                },
                None => Ok(patch.clone()),
            }
        }

        other => Ok(other.clone()),
    }
}
