//! Structural diff of two VNode trees.
//!
//! Emits an ordered patch sequence in VNode space (null slots count as child
//! positions; see `adjuster` for the DOM-space conversion). Patches come out
//! in tree post-order: a node's children patches precede its own, earlier
//! siblings precede later ones, and removals within one parent run from high
//! index to low so later removals never invalidate earlier ones.

use crate::error::Result;
use crate::logging::{self, Stage};
use crate::validation::ValidationConfig;
use crate::vdom::{Patch, VElement, VNode};
use std::collections::HashMap;

/// Diff two trees into an ordered patch list.
pub fn reconcile(old: &VNode, new: &VNode) -> Result<Vec<Patch>> {
    reconcile_with_config(old, new, &ValidationConfig::default())
}

/// Diff with custom validation limits.
pub fn reconcile_with_config(
    old: &VNode,
    new: &VNode,
    config: &ValidationConfig,
) -> Result<Vec<Patch>> {
    let start = std::time::Instant::now();
    logging::debug(Stage::Reconcile, "Starting reconciliation");

    if let Err(e) = old.validate(config) {
        crate::metrics::METRICS.record_validation_failure();
        crate::metrics::METRICS.record_reconcile(start.elapsed(), 0, true);
        return Err(e);
    }
    if let Err(e) = new.validate(config) {
        crate::metrics::METRICS.record_validation_failure();
        crate::metrics::METRICS.record_reconcile(start.elapsed(), 0, true);
        return Err(e);
    }

    let mut patches = Vec::new();
    let mut path = Vec::new();
    reconcile_node(old, new, &mut path, &mut patches);

    logging::info(
        Stage::Reconcile,
        format!("Reconciliation complete: {} patches generated", patches.len()),
    );
    crate::metrics::METRICS.record_reconcile(start.elapsed(), patches.len(), false);
    Ok(patches)
}

fn reconcile_node(old: &VNode, new: &VNode, path: &mut Vec<usize>, patches: &mut Vec<Patch>) {
    // Identical subtrees need no work; common on partial re-renders.
    if old == new {
        return;
    }

    match (old, new) {
        (VNode::Text(old_text), VNode::Text(new_text)) => {
            if old_text.content != new_text.content {
                patches.push(Patch::UpdateText {
                    path: path.clone(),
                    content: new_text.content.clone(),
                });
            }
        }

        (VNode::Element(old_el), VNode::Element(new_el)) if old_el.tag == new_el.tag => {
            // Children first: patch emission is post-order.
            reconcile_children(old_el, new_el, path, patches);

            let props_diff = diff_props(&old_el.props, &new_el.props);
            if !props_diff.is_empty() {
                patches.push(Patch::UpdateProps {
                    path: path.clone(),
                    props: props_diff,
                });
            }
        }

        // Variant or tag change replaces the whole subtree.
        _ => {
            patches.push(Patch::Replace {
                path: path.clone(),
                node: new.clone(),
            });
        }
    }
}

/// Set difference over props. `Some` sets a value, `None` removes one.
fn diff_props(
    old: &HashMap<String, String>,
    new: &HashMap<String, String>,
) -> HashMap<String, Option<String>> {
    let mut diff = HashMap::new();

    for (name, value) in new {
        match old.get(name) {
            Some(old_value) if old_value == value => {}
            _ => {
                diff.insert(name.clone(), Some(value.clone()));
            }
        }
    }

    for name in old.keys() {
        if !new.contains_key(name) {
            diff.insert(name.clone(), None);
        }
    }

    diff
}

fn reconcile_children(
    old_el: &VElement,
    new_el: &VElement,
    path: &mut Vec<usize>,
    patches: &mut Vec<Patch>,
) {
    let has_keys = old_el
        .children
        .iter()
        .chain(new_el.children.iter())
        .flatten()
        .any(|child| child.key().is_some_and(|k| !k.is_empty()));

    if has_keys {
        reconcile_keyed_children(&old_el.children, &new_el.children, path, patches);
    } else {
        reconcile_positional_children(&old_el.children, &new_el.children, path, patches);
    }
}

/// Positional reconciliation: pairwise recursion over the common prefix,
/// tail-extend with Create, tail-shrink with Remove (high index first).
///
/// A null↔non-null pair is a slot transition: Create (null → node) or Remove
/// (node → null) at that index.
fn reconcile_positional_children(
    old_children: &[Option<VNode>],
    new_children: &[Option<VNode>],
    path: &mut Vec<usize>,
    patches: &mut Vec<Patch>,
) {
    let min_len = old_children.len().min(new_children.len());

    for i in 0..min_len {
        match (&old_children[i], &new_children[i]) {
            (Some(old_child), Some(new_child)) => {
                path.push(i);
                reconcile_node(old_child, new_child, path, patches);
                path.pop();
            }
            (None, Some(new_child)) => {
                let mut child_path = path.clone();
                child_path.push(i);
                patches.push(Patch::Create {
                    path: child_path,
                    node: new_child.clone(),
                });
            }
            (Some(_), None) => {
                let mut child_path = path.clone();
                child_path.push(i);
                patches.push(Patch::Remove { path: child_path });
            }
            (None, None) => {}
        }
    }

    for i in min_len..new_children.len() {
        if let Some(new_child) = &new_children[i] {
            let mut child_path = path.clone();
            child_path.push(i);
            patches.push(Patch::Create {
                path: child_path,
                node: new_child.clone(),
            });
        }
    }

    for i in (min_len..old_children.len()).rev() {
        if old_children[i].is_some() {
            let mut child_path = path.clone();
            child_path.push(i);
            patches.push(Patch::Remove { path: child_path });
        }
    }
}

/// Keyed reconciliation: match children by key, pair unkeyed children
/// positionally between them, and encode any non-trivial rearrangement of
/// surviving keys as a single ReorderChildren permutation.
fn reconcile_keyed_children(
    old_children: &[Option<VNode>],
    new_children: &[Option<VNode>],
    path: &mut Vec<usize>,
    patches: &mut Vec<Patch>,
) {
    let old_keyed: HashMap<&str, usize> = old_children
        .iter()
        .enumerate()
        .filter_map(|(i, slot)| slot.as_ref().and_then(|n| n.key()).map(|k| (k, i)))
        .collect();
    let new_keyed: HashMap<&str, usize> = new_children
        .iter()
        .enumerate()
        .filter_map(|(i, slot)| slot.as_ref().and_then(|n| n.key()).map(|k| (k, i)))
        .collect();

    let old_unkeyed: Vec<usize> = old_children
        .iter()
        .enumerate()
        .filter(|(_, slot)| matches!(slot, Some(n) if n.key().is_none()))
        .map(|(i, _)| i)
        .collect();
    let new_unkeyed: Vec<usize> = new_children
        .iter()
        .enumerate()
        .filter(|(_, slot)| matches!(slot, Some(n) if n.key().is_none()))
        .map(|(i, _)| i)
        .collect();

    // Matched pairs recurse at their new position, earlier siblings first.
    for (new_idx, slot) in new_children.iter().enumerate() {
        let Some(new_child) = slot else { continue };
        match new_child.key() {
            Some(key) => {
                if let Some(&old_idx) = old_keyed.get(key) {
                    if let Some(old_child) = &old_children[old_idx] {
                        path.push(new_idx);
                        reconcile_node(old_child, new_child, path, patches);
                        path.pop();
                    }
                }
            }
            None => {
                // Unkeyed children pair positionally among themselves.
                let rank = new_unkeyed
                    .iter()
                    .position(|&i| i == new_idx)
                    .unwrap_or(usize::MAX);
                if let Some(&old_idx) = old_unkeyed.get(rank) {
                    if let Some(old_child) = &old_children[old_idx] {
                        path.push(new_idx);
                        reconcile_node(old_child, new_child, path, patches);
                        path.pop();
                    }
                }
            }
        }
    }

    // Removals: keys gone from new, plus surplus unkeyed; high index first.
    let mut removals: Vec<usize> = old_keyed
        .iter()
        .filter(|(key, _)| !new_keyed.contains_key(*key))
        .map(|(_, &old_idx)| old_idx)
        .collect();
    removals.extend(old_unkeyed.iter().skip(new_unkeyed.len()).copied());
    removals.sort_unstable_by(|a, b| b.cmp(a));
    for old_idx in removals {
        let mut child_path = path.clone();
        child_path.push(old_idx);
        patches.push(Patch::Remove { path: child_path });
    }

    // Creates: keys new this render, plus surplus unkeyed; ascending.
    let mut creations: Vec<usize> = new_keyed
        .iter()
        .filter(|(key, _)| !old_keyed.contains_key(*key))
        .map(|(_, &new_idx)| new_idx)
        .collect();
    creations.extend(new_unkeyed.iter().skip(old_unkeyed.len()).copied());
    creations.sort_unstable();
    for new_idx in creations {
        if let Some(new_child) = &new_children[new_idx] {
            let mut child_path = path.clone();
            child_path.push(new_idx);
            patches.push(Patch::Create {
                path: child_path,
                node: new_child.clone(),
            });
        }
    }

    // Shared keys in old order vs new order; any difference is a permutation
    // worth a single reorder patch.
    let mut shared_old: Vec<(&str, usize)> = old_keyed
        .iter()
        .filter(|(key, _)| new_keyed.contains_key(*key))
        .map(|(&key, &idx)| (key, idx))
        .collect();
    shared_old.sort_unstable_by_key(|&(_, idx)| idx);

    let mut shared_new: Vec<(&str, usize)> = new_keyed
        .iter()
        .filter(|(key, _)| old_keyed.contains_key(*key))
        .map(|(&key, &idx)| (key, idx))
        .collect();
    shared_new.sort_unstable_by_key(|&(_, idx)| idx);

    let order_changed = shared_old
        .iter()
        .map(|(key, _)| key)
        .ne(shared_new.iter().map(|(key, _)| key));

    if order_changed {
        let order: HashMap<String, usize> = new_keyed
            .iter()
            .map(|(&key, &idx)| (key.to_string(), idx))
            .collect();
        patches.push(Patch::ReorderChildren {
            path: path.clone(),
            order,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn counter_tree(count: u32) -> VNode {
        VNode::element(
            "div",
            HashMap::new(),
            vec![Some(VNode::text(format!("Count: {}", count)))],
        )
    }

    #[test]
    fn test_counter_text_update() {
        let patches = reconcile(&counter_tree(0), &counter_tree(1)).unwrap();
        assert_eq!(
            patches,
            vec![Patch::UpdateText {
                path: vec![0],
                content: "Count: 1".to_string(),
            }]
        );
    }

    #[test]
    fn test_replace_on_variant_change() {
        let old = VNode::text("Hello");
        let new = VNode::element("div", HashMap::new(), vec![]);
        let patches = reconcile(&old, &new).unwrap();

        assert_eq!(patches.len(), 1);
        match &patches[0] {
            Patch::Replace { path, .. } => assert_eq!(path, &Vec::<usize>::new()),
            _ => panic!("Expected Replace patch"),
        }
    }

    #[test]
    fn test_replace_on_tag_change() {
        let old = VNode::element("div", HashMap::new(), vec![Some(VNode::text("x"))]);
        let new = VNode::element("span", HashMap::new(), vec![Some(VNode::text("x"))]);
        let patches = reconcile(&old, &new).unwrap();
        assert!(matches!(patches.as_slice(), [Patch::Replace { .. }]));
    }

    #[test]
    fn test_props_set_and_remove() {
        let mut old_props = HashMap::new();
        old_props.insert("class".to_string(), "old".to_string());
        old_props.insert("id".to_string(), "header".to_string());

        let mut new_props = HashMap::new();
        new_props.insert("class".to_string(), "new".to_string());
        new_props.insert("role".to_string(), "banner".to_string());

        let old = VNode::element("div", old_props, vec![]);
        let new = VNode::element("div", new_props, vec![]);
        let patches = reconcile(&old, &new).unwrap();

        assert_eq!(patches.len(), 1);
        match &patches[0] {
            Patch::UpdateProps { props, .. } => {
                assert_eq!(props.get("class"), Some(&Some("new".to_string())));
                assert_eq!(props.get("role"), Some(&Some("banner".to_string())));
                assert_eq!(props.get("id"), Some(&None));
                assert_eq!(props.len(), 3);
            }
            _ => panic!("Expected UpdateProps patch"),
        }
    }

    #[test]
    fn test_unchanged_props_not_diffed() {
        let mut props = HashMap::new();
        props.insert("class".to_string(), "same".to_string());

        let old = VNode::element("div", props.clone(), vec![Some(VNode::text("a"))]);
        let new = VNode::element("div", props, vec![Some(VNode::text("b"))]);
        let patches = reconcile(&old, &new).unwrap();

        assert_eq!(patches.len(), 1);
        assert!(matches!(&patches[0], Patch::UpdateText { .. }));
    }

    #[test]
    fn test_null_slot_transition_create() {
        // isShown flips false → true: the null slot gains a subtree.
        let old = VNode::element(
            "div",
            HashMap::new(),
            vec![
                Some(VNode::element("h1", HashMap::new(), vec![Some(VNode::text("Title"))])),
                None,
                Some(VNode::element("footer", HashMap::new(), vec![Some(VNode::text("Footer"))])),
            ],
        );
        let content = VNode::element("div", HashMap::new(), vec![Some(VNode::text("Content"))]);
        let new = VNode::element(
            "div",
            HashMap::new(),
            vec![
                Some(VNode::element("h1", HashMap::new(), vec![Some(VNode::text("Title"))])),
                Some(content.clone()),
                Some(VNode::element("footer", HashMap::new(), vec![Some(VNode::text("Footer"))])),
            ],
        );

        let patches = reconcile(&old, &new).unwrap();
        assert_eq!(
            patches,
            vec![Patch::Create {
                path: vec![1],
                node: content,
            }]
        );
    }

    #[test]
    fn test_null_slot_transition_remove() {
        let old = VNode::element(
            "div",
            HashMap::new(),
            vec![Some(VNode::text("a")), Some(VNode::text("b"))],
        );
        let new = VNode::element(
            "div",
            HashMap::new(),
            vec![Some(VNode::text("a")), None],
        );

        let patches = reconcile(&old, &new).unwrap();
        assert_eq!(patches, vec![Patch::Remove { path: vec![1] }]);
    }

    #[test]
    fn test_tail_removals_high_to_low() {
        let old = VNode::element(
            "ul",
            HashMap::new(),
            vec![
                Some(VNode::text("a")),
                Some(VNode::text("b")),
                Some(VNode::text("c")),
            ],
        );
        let new = VNode::element("ul", HashMap::new(), vec![Some(VNode::text("a"))]);

        let patches = reconcile(&old, &new).unwrap();
        assert_eq!(
            patches,
            vec![
                Patch::Remove { path: vec![2] },
                Patch::Remove { path: vec![1] },
            ]
        );
    }

    #[test]
    fn test_children_patches_precede_parent() {
        let mut old_props = HashMap::new();
        old_props.insert("class".to_string(), "a".to_string());
        let mut new_props = HashMap::new();
        new_props.insert("class".to_string(), "b".to_string());

        let old = VNode::element("div", old_props, vec![Some(VNode::text("x"))]);
        let new = VNode::element("div", new_props, vec![Some(VNode::text("y"))]);

        let patches = reconcile(&old, &new).unwrap();
        assert_eq!(patches.len(), 2);
        assert!(matches!(&patches[0], Patch::UpdateText { .. }));
        assert!(matches!(&patches[1], Patch::UpdateProps { .. }));
    }

    fn keyed_item(key: &str) -> Option<VNode> {
        Some(VNode::keyed_element(
            "li",
            key,
            HashMap::new(),
            vec![Some(VNode::text(key.to_uppercase()))],
        ))
    }

    #[test]
    fn test_keyed_reorder_single_patch() {
        let old = VNode::element(
            "ul",
            HashMap::new(),
            vec![keyed_item("a"), keyed_item("b"), keyed_item("c")],
        );
        let new = VNode::element(
            "ul",
            HashMap::new(),
            vec![keyed_item("c"), keyed_item("a"), keyed_item("b")],
        );

        let patches = reconcile(&old, &new).unwrap();
        assert_eq!(patches.len(), 1);
        match &patches[0] {
            Patch::ReorderChildren { path, order } => {
                assert_eq!(path, &Vec::<usize>::new());
                assert_eq!(order.get("a"), Some(&1));
                assert_eq!(order.get("b"), Some(&2));
                assert_eq!(order.get("c"), Some(&0));
            }
            _ => panic!("Expected ReorderChildren patch"),
        }
    }

    #[test]
    fn test_keyed_append_no_reorder() {
        let old = VNode::element(
            "ul",
            HashMap::new(),
            vec![keyed_item("1"), keyed_item("2")],
        );
        let new = VNode::element(
            "ul",
            HashMap::new(),
            vec![keyed_item("1"), keyed_item("2"), keyed_item("3")],
        );

        let patches = reconcile(&old, &new).unwrap();
        assert_eq!(patches.len(), 1);
        match &patches[0] {
            Patch::Create { path, node } => {
                assert_eq!(path, &vec![2]);
                assert_eq!(node.key(), Some("3"));
            }
            _ => panic!("Expected Create patch"),
        }
    }

    #[test]
    fn test_keyed_removal_and_content_update() {
        let old = VNode::element(
            "ul",
            HashMap::new(),
            vec![keyed_item("a"), keyed_item("b"), keyed_item("c")],
        );
        // "b" is gone; "a" and "c" keep their relative order but "c" shifts.
        let new = VNode::element(
            "ul",
            HashMap::new(),
            vec![
                keyed_item("a"),
                Some(VNode::keyed_element(
                    "li",
                    "c",
                    HashMap::new(),
                    vec![Some(VNode::text("c-updated"))],
                )),
            ],
        );

        let patches = reconcile(&old, &new).unwrap();
        assert!(patches
            .iter()
            .any(|p| matches!(p, Patch::Remove { path } if path == &vec![1])));
        assert!(patches.iter().any(
            |p| matches!(p, Patch::UpdateText { path, content } if path == &vec![1, 0] && content == "c-updated")
        ));
    }

    /// Test oracle: apply patches in VNode space. Removed children become
    /// null slots; comparison is on the rendered shape (nulls elided).
    fn apply_patches(tree: &VNode, patches: &[Patch]) -> VNode {
        let mut result = tree.clone();
        for patch in patches {
            apply_one(&mut result, patch);
        }
        result
    }

    fn apply_one(tree: &mut VNode, patch: &Patch) {
        let path = patch.path();
        if path.is_empty() {
            match patch {
                Patch::Replace { node, .. } => *tree = node.clone(),
                Patch::UpdateText { content, .. } => {
                    if let VNode::Text(t) = tree {
                        t.content = content.clone();
                    }
                }
                Patch::UpdateProps { props, .. } => {
                    if let VNode::Element(el) = tree {
                        for (name, value) in props {
                            match value {
                                Some(v) => {
                                    el.props.insert(name.clone(), v.clone());
                                }
                                None => {
                                    el.props.remove(name);
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
            return;
        }

        let (parent_path, last) = path.split_at(path.len() - 1);
        let mut current = tree;
        for &index in parent_path {
            let VNode::Element(el) = current else { return };
            let Some(Some(child)) = el.children.get_mut(index) else { return };
            current = child;
        }
        let VNode::Element(parent) = current else { return };
        let index = last[0];

        match patch {
            Patch::Create { node, .. } => {
                if index == parent.children.len() {
                    parent.children.push(Some(node.clone()));
                } else if let Some(slot) = parent.children.get_mut(index) {
                    *slot = Some(node.clone());
                }
            }
            Patch::Remove { .. } => {
                if let Some(slot) = parent.children.get_mut(index) {
                    *slot = None;
                }
            }
            Patch::Replace { node, .. } => {
                if let Some(slot) = parent.children.get_mut(index) {
                    *slot = Some(node.clone());
                }
            }
            Patch::UpdateText { content, .. } => {
                if let Some(Some(VNode::Text(t))) = parent.children.get_mut(index) {
                    t.content = content.clone();
                }
            }
            Patch::UpdateProps { props, .. } => {
                if let Some(Some(VNode::Element(el))) = parent.children.get_mut(index) {
                    for (name, value) in props {
                        match value {
                            Some(v) => {
                                el.props.insert(name.clone(), v.clone());
                            }
                            None => {
                                el.props.remove(name);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Drop null slots, as a renderer would.
    fn rendered(tree: &VNode) -> VNode {
        match tree {
            VNode::Text(_) => tree.clone(),
            VNode::Element(el) => {
                let mut out = el.clone();
                out.children = el
                    .children
                    .iter()
                    .flatten()
                    .map(|c| Some(rendered(c)))
                    .collect();
                VNode::Element(out)
            }
        }
    }

    fn assert_round_trip(old: &VNode, new: &VNode) {
        let patches = reconcile(old, new).unwrap();
        let applied = apply_patches(old, &patches);
        assert_eq!(
            rendered(&applied),
            rendered(new),
            "diff-apply mismatch; patches: {:?}",
            patches
        );
    }

    #[test]
    fn test_diff_apply_round_trips() {
        let mut props_a = HashMap::new();
        props_a.insert("class".to_string(), "a".to_string());
        let mut props_b = HashMap::new();
        props_b.insert("id".to_string(), "b".to_string());

        let cases = [
            // Text change deep in the tree.
            (
                VNode::element(
                    "div",
                    props_a.clone(),
                    vec![Some(VNode::element(
                        "p",
                        HashMap::new(),
                        vec![Some(VNode::text("one"))],
                    ))],
                ),
                VNode::element(
                    "div",
                    props_b.clone(),
                    vec![Some(VNode::element(
                        "p",
                        HashMap::new(),
                        vec![Some(VNode::text("two"))],
                    ))],
                ),
            ),
            // Null slot flips both ways plus a tail append.
            (
                VNode::element(
                    "div",
                    HashMap::new(),
                    vec![Some(VNode::text("a")), None, Some(VNode::text("c"))],
                ),
                VNode::element(
                    "div",
                    HashMap::new(),
                    vec![
                        Some(VNode::text("a")),
                        Some(VNode::text("b")),
                        None,
                        Some(VNode::text("d")),
                    ],
                ),
            ),
            // Tail shrink.
            (
                VNode::element(
                    "ul",
                    HashMap::new(),
                    vec![
                        Some(VNode::text("1")),
                        Some(VNode::text("2")),
                        Some(VNode::text("3")),
                    ],
                ),
                VNode::element("ul", HashMap::new(), vec![Some(VNode::text("1"))]),
            ),
            // Variant replacement.
            (
                VNode::element("div", HashMap::new(), vec![Some(VNode::text("x"))]),
                VNode::element(
                    "div",
                    HashMap::new(),
                    vec![Some(VNode::element("span", HashMap::new(), vec![]))],
                ),
            ),
        ];

        for (old, new) in &cases {
            assert_round_trip(old, new);
        }
    }

    #[test]
    fn test_identical_trees_no_patches() {
        let tree = counter_tree(7);
        let patches = reconcile(&tree, &tree.clone()).unwrap();
        assert!(patches.is_empty());
    }

    #[test]
    fn test_validation_failure_propagates() {
        let mut config = ValidationConfig::default();
        config.max_tree_depth = 0;

        let old = VNode::element("div", HashMap::new(), vec![Some(VNode::text("x"))]);
        let new = VNode::element("div", HashMap::new(), vec![Some(VNode::text("y"))]);
        assert!(reconcile_with_config(&old, &new, &config).is_err());
    }
}
