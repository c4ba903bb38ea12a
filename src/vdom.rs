use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MinimactError, Result};

/// A Virtual DOM node.
///
/// Trees are immutable per render cycle: the host builds a fresh tree on
/// every render and keeps the previous one only until the diff completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VNode {
    Element(VElement),
    Text(VText),
}

/// An element node.
///
/// A `None` child slot is a first-class position: it marks a conditional
/// branch whose condition is currently false. Null slots count in VNode-space
/// paths and are discounted when converting to DOM-space (see `adjuster`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VElement {
    pub tag: String,
    pub props: HashMap<String, String>,
    pub children: Vec<Option<VNode>>,
    /// Optional key for keyed reconciliation. Key equality is consulted only
    /// during child reconciliation, never during structural equality.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// A text node. Content compares by byte identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VText {
    pub content: String,
}

/// Template patch data for parameterized text/attribute updates.
///
/// Stores a pattern ("Count: {0}") instead of a concrete value so the client
/// can re-render the string for any future state without a server round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplatePatch {
    /// Template string with {0}, {1}, ... placeholders.
    pub template: String,
    /// Binding paths that fill the placeholders, in placeholder order
    /// (e.g. "count", "user.name", "item.price", "index").
    pub bindings: Vec<String>,
    /// Byte offsets into `template` where each placeholder begins.
    pub slots: Vec<usize>,
    /// Optional: literal replacement segments selected by a boolean binding.
    /// Example: { "true": "Hide", "false": "Show" }.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional_templates: Option<HashMap<String, String>>,
    /// Which binding (by position) selects the conditional segment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional_binding_index: Option<usize>,
}

impl TemplatePatch {
    /// Check the structural invariants: one binding and one slot per distinct
    /// placeholder, and a valid selector index when conditional segments are
    /// present.
    pub fn validate(&self) -> Result<()> {
        let placeholders = distinct_placeholder_count(&self.template);
        if self.bindings.len() != self.slots.len() || self.bindings.len() != placeholders {
            return Err(MinimactError::InvalidTemplate(format!(
                "template '{}' has {} placeholder(s), {} binding(s), {} slot(s)",
                self.template,
                placeholders,
                self.bindings.len(),
                self.slots.len()
            )));
        }
        if self.conditional_templates.is_some() {
            match self.conditional_binding_index {
                Some(idx) if idx < self.bindings.len() => {}
                other => {
                    return Err(MinimactError::InvalidTemplate(format!(
                        "conditional binding index {:?} out of range for {} binding(s)",
                        other,
                        self.bindings.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Count distinct `{n}` placeholders in a template string.
pub fn distinct_placeholder_count(template: &str) -> usize {
    let mut seen = std::collections::HashSet::new();
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(close) = template[i + 1..].find('}') {
                let inner = &template[i + 1..i + 1 + close];
                if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit()) {
                    seen.insert(inner.to_string());
                    i += close + 2;
                    continue;
                }
            }
        }
        i += 1;
    }
    seen.len()
}

/// Loop template for array rendering (.map patterns).
///
/// Stores one pattern that applies to every array item, so list growth never
/// needs a new observation per length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopTemplate {
    /// Array-valued state key (e.g. "todos", "items").
    pub array_binding: String,
    /// Template for each item in the array.
    pub item_template: ItemTemplate,
    /// Optional: name bound to the 0-based iteration index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_var: Option<String>,
    /// Optional: separator rendered between items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    /// Set when extraction could not pick a unique binding for some slot.
    /// The template still renders; a compiler-supplied template may refine it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ambiguous: bool,
}

/// Template for one item of a loop. Bindings resolve against the component
/// state augmented with `item` and, when present, the index variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ItemTemplate {
    Text {
        template_patch: TemplatePatch,
    },
    Element {
        tag: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        props_templates: Option<HashMap<String, TemplatePatch>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        children_templates: Option<Vec<ItemTemplate>>,
        /// Binding path used to key the item for reconciliation (e.g. "item.id").
        #[serde(skip_serializing_if = "Option::is_none")]
        key_binding: Option<String>,
    },
}

/// A single mutation to apply to a rendered tree.
///
/// Paths are sequences of child indices. Patches produced by the reconciler
/// are in VNode space (null slots count); patches handed to the host are in
/// DOM space (null slots discounted). The serialized `type` discriminator is
/// the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Patch {
    /// Insert `node` as a new child at `path`.
    Create { path: Vec<usize>, node: VNode },
    /// Remove the child currently at `path`.
    Remove { path: Vec<usize> },
    /// Replace the node at `path` with `node`.
    Replace { path: Vec<usize>, node: VNode },
    /// Set the text content of the text node at `path`.
    UpdateText { path: Vec<usize>, content: String },
    /// Apply a props diff: `Some(value)` sets, `None` removes.
    UpdateProps {
        path: Vec<usize>,
        props: HashMap<String, Option<String>>,
    },
    /// Reorder the children of the element at `path`; `order` maps each key
    /// to its new child index.
    ReorderChildren {
        path: Vec<usize>,
        order: HashMap<String, usize>,
    },
    /// Re-render a text node from a parameterized template.
    UpdateTextTemplate {
        path: Vec<usize>,
        #[serde(rename = "templatePatch")]
        template_patch: TemplatePatch,
    },
    /// Re-render one attribute from a parameterized template.
    UpdatePropsTemplate {
        path: Vec<usize>,
        #[serde(rename = "propName")]
        prop_name: String,
        #[serde(rename = "templatePatch")]
        template_patch: TemplatePatch,
    },
    /// Re-materialize the list under `path` from a loop template.
    UpdateListTemplate {
        path: Vec<usize>,
        #[serde(rename = "loopTemplate")]
        loop_template: LoopTemplate,
    },
    /// Append `count` items rendered from `item_template` (streaming append).
    AppendTemplate {
        path: Vec<usize>,
        #[serde(rename = "itemTemplate")]
        item_template: ItemTemplate,
        count: usize,
    },
}

impl Patch {
    /// The path this patch targets.
    pub fn path(&self) -> &[usize] {
        match self {
            Patch::Create { path, .. }
            | Patch::Remove { path }
            | Patch::Replace { path, .. }
            | Patch::UpdateText { path, .. }
            | Patch::UpdateProps { path, .. }
            | Patch::ReorderChildren { path, .. }
            | Patch::UpdateTextTemplate { path, .. }
            | Patch::UpdatePropsTemplate { path, .. }
            | Patch::UpdateListTemplate { path, .. }
            | Patch::AppendTemplate { path, .. } => path,
        }
    }

    /// Replace this patch's path, keeping everything else.
    pub fn with_path(&self, path: Vec<usize>) -> Patch {
        let mut p = self.clone();
        match &mut p {
            Patch::Create { path: target, .. }
            | Patch::Remove { path: target }
            | Patch::Replace { path: target, .. }
            | Patch::UpdateText { path: target, .. }
            | Patch::UpdateProps { path: target, .. }
            | Patch::ReorderChildren { path: target, .. }
            | Patch::UpdateTextTemplate { path: target, .. }
            | Patch::UpdatePropsTemplate { path: target, .. }
            | Patch::UpdateListTemplate { path: target, .. }
            | Patch::AppendTemplate { path: target, .. } => *target = path,
        }
        p
    }
}

impl VNode {
    /// Create an element node.
    pub fn element(
        tag: impl Into<String>,
        props: HashMap<String, String>,
        children: Vec<Option<VNode>>,
    ) -> Self {
        VNode::Element(VElement {
            tag: tag.into(),
            props,
            children,
            key: None,
        })
    }

    /// Create an element node with a reconciliation key.
    pub fn keyed_element(
        tag: impl Into<String>,
        key: impl Into<String>,
        props: HashMap<String, String>,
        children: Vec<Option<VNode>>,
    ) -> Self {
        VNode::Element(VElement {
            tag: tag.into(),
            props,
            children,
            key: Some(key.into()),
        })
    }

    /// Create a text node.
    pub fn text(content: impl Into<String>) -> Self {
        VNode::Text(VText {
            content: content.into(),
        })
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            VNode::Element(el) => el.key.as_deref(),
            VNode::Text(_) => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, VNode::Text(_))
    }

    pub fn is_element(&self) -> bool {
        matches!(self, VNode::Element(_))
    }

    /// Node variant name, for error messages.
    pub fn node_type(&self) -> &'static str {
        match self {
            VNode::Element(_) => "Element",
            VNode::Text(_) => "Text",
        }
    }

    /// Child slots of this node (empty for text nodes). Includes null slots.
    pub fn child_slots(&self) -> &[Option<VNode>] {
        match self {
            VNode::Element(el) => &el.children,
            VNode::Text(_) => &[],
        }
    }

    /// Number of child slots, nulls included.
    pub fn children_count(&self) -> usize {
        self.child_slots().len()
    }

    /// Walk the tree by a VNode-space path.
    ///
    /// Errors if a step leaves the tree, descends into a text node, or
    /// traverses a null slot. Callers that can tolerate null traversal use
    /// the adjuster instead.
    pub fn node_at_path(&self, path: &[usize]) -> Result<&VNode> {
        let mut current = self;
        for &index in path {
            let slots = current.child_slots();
            if index >= slots.len() {
                return Err(MinimactError::InvalidPatchPath { path: path.to_vec() });
            }
            match &slots[index] {
                Some(child) => current = child,
                None => {
                    return Err(MinimactError::NullSlotTraversal { path: path.to_vec() });
                }
            }
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_element() {
        let mut props = HashMap::new();
        props.insert("class".to_string(), "container".to_string());

        let node = VNode::element("div", props, vec![Some(VNode::text("Hello, world!"))]);

        match node {
            VNode::Element(el) => {
                assert_eq!(el.tag, "div");
                assert_eq!(el.props.get("class"), Some(&"container".to_string()));
                assert_eq!(el.children.len(), 1);
            }
            _ => panic!("Expected element node"),
        }
    }

    #[test]
    fn test_serialization_round_trip() {
        let node = VNode::element(
            "div",
            HashMap::new(),
            vec![Some(VNode::text("a")), None, Some(VNode::text("b"))],
        );
        let json = serde_json::to_string(&node).unwrap();
        let deserialized: VNode = serde_json::from_str(&json).unwrap();
        assert_eq!(node, deserialized);
    }

    #[test]
    fn test_null_slots_survive_serde() {
        let node = VNode::element("div", HashMap::new(), vec![None, Some(VNode::text("x"))]);
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains("null"));
        let back: VNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back.child_slots()[0], None);
    }

    #[test]
    fn test_node_at_path() {
        let tree = VNode::element(
            "div",
            HashMap::new(),
            vec![
                Some(VNode::element(
                    "span",
                    HashMap::new(),
                    vec![Some(VNode::text("deep"))],
                )),
                None,
            ],
        );

        let found = tree.node_at_path(&[0, 0]).unwrap();
        assert_eq!(found, &VNode::text("deep"));

        assert!(matches!(
            tree.node_at_path(&[1]),
            Err(MinimactError::NullSlotTraversal { .. })
        ));
        assert!(matches!(
            tree.node_at_path(&[5]),
            Err(MinimactError::InvalidPatchPath { .. })
        ));
    }

    #[test]
    fn test_template_patch_invariants() {
        let good = TemplatePatch {
            template: "Count: {0}".to_string(),
            bindings: vec!["count".to_string()],
            slots: vec![7],
            conditional_templates: None,
            conditional_binding_index: None,
        };
        assert!(good.validate().is_ok());

        let bad = TemplatePatch {
            template: "{0} and {1}".to_string(),
            bindings: vec!["a".to_string()],
            slots: vec![0],
            conditional_templates: None,
            conditional_binding_index: None,
        };
        assert!(bad.validate().is_err());

        let mut segments = HashMap::new();
        segments.insert("true".to_string(), "Hide".to_string());
        segments.insert("false".to_string(), "Show".to_string());
        let conditional = TemplatePatch {
            template: "{0} Details".to_string(),
            bindings: vec!["isOn".to_string()],
            slots: vec![0],
            conditional_templates: Some(segments),
            conditional_binding_index: Some(0),
        };
        assert!(conditional.validate().is_ok());
    }

    #[test]
    fn test_distinct_placeholder_count() {
        assert_eq!(distinct_placeholder_count("no placeholders"), 0);
        assert_eq!(distinct_placeholder_count("Count: {0}"), 1);
        assert_eq!(distinct_placeholder_count("{0} of {1} ({0})"), 2);
        assert_eq!(distinct_placeholder_count("{not_numeric}"), 0);
    }

    #[test]
    fn test_patch_path_rewrite() {
        let patch = Patch::UpdateText {
            path: vec![0, 2],
            content: "x".to_string(),
        };
        let moved = patch.with_path(vec![0, 1]);
        assert_eq!(moved.path(), &[0, 1]);
        match moved {
            Patch::UpdateText { content, .. } => assert_eq!(content, "x"),
            _ => panic!("Expected UpdateText"),
        }
    }
}
