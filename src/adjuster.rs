//! VNode-space → DOM-space path adjustment.
//!
//! Reconciler output addresses trees in VNode space, where null conditional
//! slots occupy child positions. The renderer addresses the real DOM, where
//! they do not. Adjustment walks the reference tree (the post-render tree)
//! from the root and subtracts the null slots preceding each step.
//!
//! A path that descends *through* a null slot targets an element that is not
//! currently mounted. That is not an error: the patch was stale or was built
//! against a hypothetical tree, and the host drops it.

use crate::error::{MinimactError, Result};
use crate::logging::{self, Stage};
use crate::vdom::{Patch, VNode};

/// Result of adjusting one path.
#[derive(Debug, Clone, PartialEq)]
pub enum DomPath {
    /// The element is mounted; here is its DOM-space path.
    Visible(Vec<usize>),
    /// The path crosses a currently-null branch; drop the patch.
    Invisible,
}

impl DomPath {
    pub fn visible(self) -> Option<Vec<usize>> {
        match self {
            DomPath::Visible(p) => Some(p),
            DomPath::Invisible => None,
        }
    }
}

/// Convert a VNode-space path to DOM space against `tree`.
///
/// Each step costs one scan of the preceding siblings, so the whole
/// adjustment is O(depth × fan-out).
pub fn adjust_path(tree: &VNode, path: &[usize]) -> Result<DomPath> {
    let mut current = tree;
    let mut dom_path = Vec::with_capacity(path.len());

    for &index in path {
        let slots = current.child_slots();
        if index >= slots.len() {
            return Err(MinimactError::InvalidPatchPath {
                path: path.to_vec(),
            });
        }

        let nulls_before = slots[..index].iter().filter(|s| s.is_none()).count();
        match &slots[index] {
            Some(child) => {
                dom_path.push(index - nulls_before);
                current = child;
            }
            None => return Ok(DomPath::Invisible),
        }
    }

    Ok(DomPath::Visible(dom_path))
}

/// Adjust a path whose final step addresses a child *slot* rather than a
/// mounted node (Create/Remove/Replace).
///
/// The slot itself may be null in the reference tree (a Create fills a null
/// slot, a Remove empties one) and tail-shrink removals may index past the
/// reference children entirely. Only the *intermediate* steps can make the
/// patch invisible.
fn adjust_target_path(tree: &VNode, path: &[usize]) -> Result<DomPath> {
    if path.is_empty() {
        return Ok(DomPath::Visible(Vec::new()));
    }
    let (parent_path, last) = path.split_at(path.len() - 1);
    let parent_dom = match adjust_path(tree, parent_path)? {
        DomPath::Visible(p) => p,
        DomPath::Invisible => return Ok(DomPath::Invisible),
    };

    let parent = tree.node_at_path(parent_path)?;
    let slots = parent.child_slots();
    let index = last[0];
    let nulls_before = slots[..index.min(slots.len())]
        .iter()
        .filter(|s| s.is_none())
        .count();

    let mut dom_path = parent_dom;
    dom_path.push(index - nulls_before);
    Ok(DomPath::Visible(dom_path))
}

/// Adjust a single patch into DOM space. `None` means the patch resolved
/// through a null branch and must be dropped.
pub fn adjust_patch(tree: &VNode, patch: &Patch) -> Result<Option<Patch>> {
    let adjusted = match patch {
        // These address a slot, not a mounted node.
        Patch::Create { path, .. } | Patch::Remove { path } | Patch::Replace { path, .. } => {
            adjust_target_path(tree, path)?
        }
        _ => adjust_path(tree, patch.path())?,
    };

    match adjusted {
        DomPath::Visible(dom_path) => Ok(Some(patch.with_path(dom_path))),
        DomPath::Invisible => {
            crate::metrics::METRICS.record_invisible_drop();
            logging::debug_for(
                Stage::Adjust,
                format!("{:?}", patch.path()),
                "Dropping patch through null branch",
            );
            Ok(None)
        }
    }
}

/// Adjust an ordered patch list, silently dropping invisible patches.
pub fn adjust_patches(tree: &VNode, patches: &[Patch]) -> Result<Vec<Patch>> {
    let mut out = Vec::with_capacity(patches.len());
    for patch in patches {
        if let Some(adjusted) = adjust_patch(tree, patch)? {
            out.push(adjusted);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn toggle_tree(shown: bool) -> VNode {
        // <div><h1>Title</h1>{shown && <div>Content</div>}<footer>Footer</footer></div>
        let content = if shown {
            Some(VNode::element(
                "div",
                HashMap::new(),
                vec![Some(VNode::text("Content"))],
            ))
        } else {
            None
        };
        VNode::element(
            "div",
            HashMap::new(),
            vec![
                Some(VNode::element(
                    "h1",
                    HashMap::new(),
                    vec![Some(VNode::text("Title"))],
                )),
                content,
                Some(VNode::element(
                    "footer",
                    HashMap::new(),
                    vec![Some(VNode::text("Footer"))],
                )),
            ],
        )
    }

    #[test]
    fn test_null_sibling_discounted() {
        let hidden = toggle_tree(false);
        // Footer sits at VNode index 2 but DOM index 1 while the toggle is off.
        assert_eq!(
            adjust_path(&hidden, &[2]).unwrap(),
            DomPath::Visible(vec![1])
        );

        let shown = toggle_tree(true);
        assert_eq!(
            adjust_path(&shown, &[2]).unwrap(),
            DomPath::Visible(vec![2])
        );
    }

    #[test]
    fn test_path_through_null_is_invisible() {
        let hidden = toggle_tree(false);
        assert_eq!(adjust_path(&hidden, &[1]).unwrap(), DomPath::Invisible);
        assert_eq!(adjust_path(&hidden, &[1, 0]).unwrap(), DomPath::Invisible);
    }

    #[test]
    fn test_out_of_bounds_is_error() {
        let tree = toggle_tree(true);
        assert!(matches!(
            adjust_path(&tree, &[7]),
            Err(MinimactError::InvalidPatchPath { .. })
        ));
    }

    #[test]
    fn test_create_targets_empty_slot() {
        // A Create at the null slot addresses DOM index 1 (after the h1).
        let hidden = toggle_tree(false);
        let patch = Patch::Create {
            path: vec![1],
            node: VNode::text("Content"),
        };
        let adjusted = adjust_patch(&hidden, &patch).unwrap().unwrap();
        assert_eq!(adjusted.path(), &[1]);
    }

    #[test]
    fn test_tail_removals_index_past_reference() {
        // The post-render tree kept one of three children; the tail removals
        // still adjust against it.
        let new_tree = VNode::element("ul", HashMap::new(), vec![Some(VNode::text("a"))]);
        let r2 = Patch::Remove { path: vec![2] };
        let r1 = Patch::Remove { path: vec![1] };
        assert_eq!(adjust_patch(&new_tree, &r2).unwrap().unwrap().path(), &[2]);
        assert_eq!(adjust_patch(&new_tree, &r1).unwrap().unwrap().path(), &[1]);
    }

    #[test]
    fn test_adjust_patches_drops_invisible() {
        let hidden = toggle_tree(false);
        let patches = vec![
            Patch::UpdateText {
                path: vec![0, 0],
                content: "New Title".to_string(),
            },
            Patch::UpdateText {
                path: vec![1, 0],
                content: "unreachable".to_string(),
            },
            Patch::UpdateText {
                path: vec![2, 0],
                content: "New Footer".to_string(),
            },
        ];

        let adjusted = adjust_patches(&hidden, &patches).unwrap();
        assert_eq!(adjusted.len(), 2);
        assert_eq!(adjusted[0].path(), &[0, 0]);
        assert_eq!(adjusted[1].path(), &[1, 0]);
    }
}
