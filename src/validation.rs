use crate::error::{MinimactError, Result};
use crate::logging::{self, Stage};
use crate::vdom::{VNode, VText};

/// Limits enforced on every tree the engine accepts. Input is never trusted:
/// trees arrive as JSON from the host and are validated before any diffing.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Maximum tree depth (default: 100)
    pub max_tree_depth: usize,

    /// Maximum total node count (default: 10,000)
    pub max_node_count: usize,

    /// Maximum children per node (default: 1,000)
    pub max_children_per_node: usize,

    /// Maximum property key length (default: 256)
    pub max_prop_key_length: usize,

    /// Maximum property value length (default: 4,096)
    pub max_prop_value_length: usize,

    /// Maximum text content length (default: 1MB)
    pub max_text_length: usize,

    /// Maximum JSON size for deserialization (default: 1MB)
    pub max_json_size: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_tree_depth: 100,
            max_node_count: 10_000,
            max_children_per_node: 1_000,
            max_prop_key_length: 256,
            max_prop_value_length: 4_096,
            max_text_length: 1024 * 1024,
            max_json_size: 1024 * 1024,
        }
    }
}

impl VNode {
    /// Validate the entire tree against configuration.
    pub fn validate(&self, config: &ValidationConfig) -> Result<()> {
        self.validate_depth(0, config)?;
        self.validate_node_count(config)?;
        self.validate_content_sizes(config)?;
        Ok(())
    }

    fn validate_depth(&self, current_depth: usize, config: &ValidationConfig) -> Result<()> {
        if current_depth > config.max_tree_depth {
            return Err(MinimactError::TreeTooDeep {
                depth: current_depth,
                max: config.max_tree_depth,
            });
        }

        if let VNode::Element(el) = self {
            for child in el.children.iter().flatten() {
                child.validate_depth(current_depth + 1, config)?;
            }
        }

        Ok(())
    }

    fn validate_node_count(&self, config: &ValidationConfig) -> Result<()> {
        let count = self.count_nodes();
        if count > config.max_node_count {
            return Err(MinimactError::TreeTooLarge {
                nodes: count,
                max: config.max_node_count,
            });
        }
        Ok(())
    }

    /// Count nodes in the tree. Null slots count as one placeholder each
    /// since they occupy addressable positions.
    pub fn count_nodes(&self) -> usize {
        match self {
            VNode::Text(_) => 1,
            VNode::Element(el) => {
                1 + el
                    .children
                    .iter()
                    .map(|slot| slot.as_ref().map_or(1, |c| c.count_nodes()))
                    .sum::<usize>()
            }
        }
    }

    fn validate_content_sizes(&self, config: &ValidationConfig) -> Result<()> {
        match self {
            VNode::Text(text) => {
                if text.content.len() > config.max_text_length {
                    return Err(MinimactError::TextTooLong {
                        length: text.content.len(),
                        max: config.max_text_length,
                    });
                }
            }
            VNode::Element(el) => {
                if el.children.len() > config.max_children_per_node {
                    return Err(MinimactError::TooManyChildren {
                        count: el.children.len(),
                        max: config.max_children_per_node,
                    });
                }

                for (key, value) in &el.props {
                    if key.len() > config.max_prop_key_length {
                        return Err(MinimactError::PropertyTooLong {
                            name: key.clone(),
                            length: key.len(),
                            max: config.max_prop_key_length,
                        });
                    }
                    if value.len() > config.max_prop_value_length {
                        return Err(MinimactError::PropertyTooLong {
                            name: format!("{} (value)", key),
                            length: value.len(),
                            max: config.max_prop_value_length,
                        });
                    }
                }

                for child in el.children.iter().flatten() {
                    child.validate_content_sizes(config)?;
                }
            }
        }

        Ok(())
    }

    /// Estimate size in bytes for memory reporting.
    pub fn estimate_size(&self) -> usize {
        match self {
            VNode::Text(text) => std::mem::size_of::<VText>() + text.content.capacity(),
            VNode::Element(el) => {
                let base = std::mem::size_of::<crate::vdom::VElement>();
                let tag = el.tag.capacity();
                let key = el.key.as_ref().map(|k| k.capacity()).unwrap_or(0);
                let props: usize = el
                    .props
                    .iter()
                    .map(|(k, v)| k.capacity() + v.capacity())
                    .sum();
                let children: usize = el
                    .children
                    .iter()
                    .map(|slot| slot.as_ref().map_or(0, |c| c.estimate_size()))
                    .sum();

                base + tag + key + props + children
            }
        }
    }
}

/// Deserialize a VNode with size limits and structural validation.
pub fn deserialize_vnode_safe(json: &str, config: &ValidationConfig) -> Result<VNode> {
    if json.len() > config.max_json_size {
        return Err(MinimactError::JsonTooLarge {
            size: json.len(),
            max: config.max_json_size,
        });
    }

    let node: VNode = serde_json::from_str(json)?;
    node.validate(config)?;

    Ok(node)
}

/// Serialize a VNode, warning on unusually large trees.
pub fn serialize_vnode_safe(node: &VNode) -> Result<String> {
    let estimated_size = node.estimate_size();
    if estimated_size > 10 * 1024 * 1024 {
        logging::warn(
            Stage::Validate,
            format!("Serializing very large VNode: ~{} bytes", estimated_size),
        );
    }

    let json = serde_json::to_string(node)?;
    Ok(json)
}
