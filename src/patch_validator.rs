//! Patch sanity checks.
//!
//! The host applies patches to a live DOM; a malformed patch is cheaper to
//! reject here than to debug there. Validation checks each patch kind for
//! path sanity, template invariants, and (optionally) applicability against
//! the tree it targets.

use crate::error::{MinimactError, Result};
use crate::vdom::{ItemTemplate, Patch, VNode};

/// Configuration for patch validation.
#[derive(Debug, Clone)]
pub struct PatchValidatorConfig {
    /// Maximum depth of path indices
    pub max_path_depth: usize,
    /// Maximum path index value
    pub max_path_index: usize,
    /// Validate that patches can be applied to the tree
    pub validate_applicability: bool,
}

impl Default for PatchValidatorConfig {
    fn default() -> Self {
        Self {
            max_path_depth: 100,
            max_path_index: 10_000,
            validate_applicability: true,
        }
    }
}

/// Validate a single patch against a VNode tree (VNode-space paths).
pub fn validate_patch(patch: &Patch, tree: &VNode, config: &PatchValidatorConfig) -> Result<()> {
    let result = validate_patch_inner(patch, tree, config);
    crate::metrics::METRICS.record_patch_validation(result.is_ok());
    result
}

fn validate_patch_inner(patch: &Patch, tree: &VNode, config: &PatchValidatorConfig) -> Result<()> {
    validate_path(patch.path(), config)?;

    match patch {
        Patch::UpdateText { path, .. } => {
            if config.validate_applicability {
                let node = tree.node_at_path(path)?;
                if !node.is_text() {
                    return Err(MinimactError::PatchTypeMismatch {
                        expected: "Text",
                        found: node.node_type(),
                    });
                }
            }
        }

        Patch::UpdateProps { path, .. } => {
            if config.validate_applicability {
                require_element(tree, path)?;
            }
        }

        Patch::Replace { path, node } => {
            let validation_config = crate::validation::ValidationConfig::default();
            node.validate(&validation_config)?;

            if config.validate_applicability && !path.is_empty() {
                // The parent must exist; the slot itself may be null.
                let (parent_path, last) = path.split_at(path.len() - 1);
                let parent = require_element(tree, parent_path)?;
                if last[0] >= parent.children_count() {
                    return Err(MinimactError::InvalidPatchPath { path: path.clone() });
                }
            }
        }

        Patch::Create { path, node } => {
            let validation_config = crate::validation::ValidationConfig::default();
            node.validate(&validation_config)?;

            if config.validate_applicability {
                if path.is_empty() {
                    return Err(MinimactError::InvalidPatchPath { path: path.clone() });
                }
                let (parent_path, last) = path.split_at(path.len() - 1);
                let parent = require_element(tree, parent_path)?;
                // One past the end appends; anything further is a hole.
                if last[0] > parent.children_count() {
                    return Err(MinimactError::InvalidPatchPath { path: path.clone() });
                }
            }
        }

        Patch::Remove { path } => {
            if config.validate_applicability {
                if path.is_empty() {
                    return Err(MinimactError::InvalidPatchPath { path: path.clone() });
                }
                let (parent_path, _) = path.split_at(path.len() - 1);
                require_element(tree, parent_path)?;
            }
        }

        Patch::ReorderChildren { path, order } => {
            if config.validate_applicability {
                let node = require_element(tree, path)?;
                let child_count = node.children_count();
                for (key, &new_index) in order {
                    if new_index >= child_count {
                        return Err(MinimactError::KeyNotFound(format!(
                            "{} -> index {} out of range",
                            key, new_index
                        )));
                    }
                    let found = node.child_slots().iter().flatten().any(|c| c.key() == Some(key));
                    if !found {
                        return Err(MinimactError::KeyNotFound(key.clone()));
                    }
                }
            }
        }

        Patch::UpdateTextTemplate { path, template_patch } => {
            template_patch.validate()?;
            if config.validate_applicability {
                let node = tree.node_at_path(path)?;
                if !node.is_text() {
                    return Err(MinimactError::PatchTypeMismatch {
                        expected: "Text",
                        found: node.node_type(),
                    });
                }
            }
        }

        Patch::UpdatePropsTemplate { path, template_patch, .. } => {
            template_patch.validate()?;
            if config.validate_applicability {
                require_element(tree, path)?;
            }
        }

        Patch::UpdateListTemplate { path, loop_template } => {
            validate_item_template(&loop_template.item_template)?;
            if config.validate_applicability {
                require_element(tree, path)?;
            }
        }

        Patch::AppendTemplate { path, item_template, .. } => {
            validate_item_template(item_template)?;
            if config.validate_applicability {
                require_element(tree, path)?;
            }
        }
    }

    Ok(())
}

/// Validate a list of patches; fails on the first invalid one.
pub fn validate_patches(
    patches: &[Patch],
    tree: &VNode,
    config: &PatchValidatorConfig,
) -> Result<()> {
    for patch in patches {
        validate_patch(patch, tree, config)?;
    }
    Ok(())
}

fn validate_path(path: &[usize], config: &PatchValidatorConfig) -> Result<()> {
    if path.len() > config.max_path_depth {
        return Err(MinimactError::InvalidPatchPath { path: path.to_vec() });
    }
    for &index in path {
        if index > config.max_path_index {
            return Err(MinimactError::InvalidPatchPath { path: path.to_vec() });
        }
    }
    Ok(())
}

fn require_element<'a>(tree: &'a VNode, path: &[usize]) -> Result<&'a VNode> {
    let node = tree.node_at_path(path)?;
    if !node.is_element() {
        return Err(MinimactError::PatchTypeMismatch {
            expected: "Element",
            found: node.node_type(),
        });
    }
    Ok(node)
}

fn validate_item_template(template: &ItemTemplate) -> Result<()> {
    match template {
        ItemTemplate::Text { template_patch } => template_patch.validate(),
        ItemTemplate::Element {
            props_templates,
            children_templates,
            ..
        } => {
            if let Some(props) = props_templates {
                for tp in props.values() {
                    tp.validate()?;
                }
            }
            if let Some(children) = children_templates {
                for child in children {
                    validate_item_template(child)?;
                }
            }
            Ok(())
        }
    }
}
