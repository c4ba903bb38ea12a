//! Conditional path simulator.
//!
//! For every conditionally rendered element, pre-compute a map from each
//! reachable combination of its gate values to the DOM path the element
//! occupies under that combination (or null when absent). At runtime a gate
//! flip becomes one signature build plus one O(1) lookup, no reconciliation.
//!
//! Enumeration walks gates in guard-chain order (outermost ancestor first)
//! and prunes: once an ancestor's expression is false the descendant space is
//! unreachable, so the partial signature is recorded as null and never
//! expanded. Nested conditionals typically cut the naive 2^n space in half or
//! better.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::adjuster::{adjust_path, DomPath};
use crate::condition::ConditionExpr;
use crate::error::Result;
use crate::logging::{self, Stage};
use crate::path::HexPath;
use crate::vdom::VNode;

/// Static metadata for one conditionally rendered element, emitted by the
/// component compiler and completed by the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalElementTemplate {
    /// Guard expression in the restricted grammar over author variable names.
    pub condition_expression: String,
    /// Deduplicated runtime state keys the expression depends on.
    #[serde(default)]
    pub condition_bindings: Vec<String>,
    /// Author variable name → runtime state key (e.g. "menuOpen" → "state_0").
    #[serde(default)]
    pub condition_mapping: HashMap<String, String>,
    /// Hex id of the enclosing conditional, when nested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_template: Option<HexPath>,
    /// Canonical gate signature → DOM path (None = absent under that
    /// combination). Filled by the simulator.
    #[serde(default)]
    pub path_variants: HashMap<String, Option<Vec<usize>>>,
    /// Guard-chain gate order used by `path_variants` signatures (ancestor
    /// gates first). Filled by the simulator.
    #[serde(default)]
    pub gate_order: Vec<String>,
    /// Set when the expression (or an ancestor's) falls outside the grammar;
    /// the element is handled by reactive reconciliation only.
    #[serde(default)]
    pub dynamic_only: bool,
}

/// Canonical signature for a set of gate values: sorted, deduplicated,
/// comma-joined `state_key:bool` pairs.
pub fn canonical_signature(pairs: &[(String, bool)]) -> String {
    let mut sorted: Vec<(String, bool)> = pairs.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted.dedup_by(|a, b| a.0 == b.0);
    sorted
        .iter()
        .map(|(key, value)| format!("{}:{}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

impl ConditionalElementTemplate {
    /// Resolve this element's DOM path under the given state.
    ///
    /// Outer `None` means no usable entry (dynamic-only, non-boolean gate
    /// value, or unsimulated); inner `None` means the element is correctly
    /// absent. Tries the full gate signature first, then the pruned prefixes
    /// recorded when an always-false ancestor cut enumeration short.
    pub fn lookup_path(&self, state: &HashMap<String, Value>) -> Option<Option<Vec<usize>>> {
        if self.dynamic_only || self.gate_order.is_empty() {
            return None;
        }

        let mut pairs = Vec::with_capacity(self.gate_order.len());
        for key in &self.gate_order {
            let value = state.get(key)?.as_bool()?;
            pairs.push((key.clone(), value));
        }

        for keep in (1..=pairs.len()).rev() {
            let sig = canonical_signature(&pairs[..keep]);
            if let Some(entry) = self.path_variants.get(&sig) {
                return Some(entry.clone());
            }
        }
        None
    }
}

/// One gate, resolved from its template entry.
struct Gate {
    id: HexPath,
    author_path: Vec<usize>,
    expr: ConditionExpr,
    /// Runtime state keys in expression order.
    state_keys: Vec<String>,
    mapping: HashMap<String, String>,
    /// Indices into the gate table of this gate's ancestors, outermost first.
    ancestors: Vec<usize>,
}

impl Gate {
    fn eval(&self, assignment: &[(String, bool)]) -> Result<bool> {
        let mut vars = HashMap::new();
        for ident in self.expr.identifiers() {
            let state_key = self.mapping.get(&ident).cloned().unwrap_or_else(|| ident.clone());
            if let Some((_, value)) = assignment.iter().find(|(k, _)| *k == state_key) {
                vars.insert(ident, *value);
            }
        }
        self.expr.eval(&vars)
    }
}

/// Populate `path_variants` for every statically evaluable conditional.
///
/// Runs once per component registration and again when the compiler emits
/// fresh metadata (hot reload). Results are cached on the component instance
/// by the host.
pub fn simulate_conditional_paths(
    tree: &VNode,
    templates: &mut HashMap<HexPath, ConditionalElementTemplate>,
) -> Result<()> {
    let start = std::time::Instant::now();

    // Resolve every template into a gate; unresolvable ones go dynamic.
    let mut gates: Vec<Gate> = Vec::new();
    let mut dynamic: Vec<HexPath> = Vec::new();

    let mut ids: Vec<HexPath> = templates.keys().cloned().collect();
    ids.sort_by_key(|id| (id.depth(), id.as_str().to_string()));

    for id in &ids {
        let template = &templates[id];
        let author_path = match id.to_index_path() {
            Ok(p) => p,
            Err(_) => {
                dynamic.push(id.clone());
                continue;
            }
        };
        let expr = match ConditionExpr::parse(&template.condition_expression) {
            Ok(e) => e,
            Err(_) => {
                logging::warn_for(
                    Stage::Simulate,
                    id.as_str(),
                    format!(
                        "Condition '{}' not statically evaluable; conditional is dynamic-only",
                        template.condition_expression
                    ),
                );
                dynamic.push(id.clone());
                continue;
            }
        };

        let state_keys = expr
            .identifiers()
            .into_iter()
            .map(|ident| {
                template
                    .condition_mapping
                    .get(&ident)
                    .cloned()
                    .unwrap_or(ident)
            })
            .collect();

        gates.push(Gate {
            id: id.clone(),
            author_path,
            expr,
            state_keys,
            mapping: template.condition_mapping.clone(),
            ancestors: Vec::new(),
        });
    }

    // An element below a dynamic conditional cannot be placed statically.
    gates.retain(|g| {
        let blocked = dynamic.iter().any(|d| d.is_ancestor_of(&g.id));
        if blocked {
            dynamic.push(g.id.clone());
        }
        !blocked
    });

    // Ancestor chains; `ids` is depth-sorted so ancestors precede descendants.
    for i in 0..gates.len() {
        let mut ancestors: Vec<usize> = (0..gates.len())
            .filter(|&j| gates[j].id.is_ancestor_of(&gates[i].id))
            .collect();
        ancestors.sort_by_key(|&j| gates[j].id.depth());
        gates[i].ancestors = ancestors;
    }

    let mut combination_count = 0u64;
    let mut results: HashMap<HexPath, (Vec<String>, HashMap<String, Option<Vec<usize>>>)> =
        HashMap::new();

    for i in 0..gates.len() {
        let element = &gates[i];

        // Guard-chain gate order: ancestor gates first, then the element's
        // own, deduplicated.
        let mut gate_order: Vec<String> = Vec::new();
        for &anc in &element.ancestors {
            for key in &gates[anc].state_keys {
                if !gate_order.contains(key) {
                    gate_order.push(key.clone());
                }
            }
        }
        for key in &element.state_keys {
            if !gate_order.contains(key) {
                gate_order.push(key.clone());
            }
        }

        // Which ancestors finish being assigned at each gate index.
        let last_index_of = |keys: &[String]| -> usize {
            keys.iter()
                .map(|k| gate_order.iter().position(|g| g == k).unwrap_or(0))
                .max()
                .unwrap_or(0)
        };
        let ancestor_completion: Vec<(usize, usize)> = element
            .ancestors
            .iter()
            .map(|&anc| (anc, last_index_of(&gates[anc].state_keys)))
            .collect();

        let mut variants: HashMap<String, Option<Vec<usize>>> = HashMap::new();
        let mut assignment: Vec<(String, bool)> = Vec::new();
        enumerate_combinations(
            tree,
            &gates,
            i,
            &gate_order,
            &ancestor_completion,
            0,
            &mut assignment,
            &mut variants,
            &mut combination_count,
        )?;

        results.insert(element.id.clone(), (gate_order, variants));
    }

    // Write back.
    for id in ids {
        let Some(template) = templates.get_mut(&id) else { continue };
        if let Some((gate_order, variants)) = results.remove(&id) {
            if let Some(gate) = gates.iter().find(|g| g.id == id) {
                let mut keys = gate.state_keys.clone();
                keys.dedup();
                template.condition_bindings = keys;
            }
            template.gate_order = gate_order;
            template.path_variants = variants;
            template.dynamic_only = false;
        } else {
            template.dynamic_only = true;
            template.path_variants.clear();
            template.gate_order.clear();
        }
    }

    crate::metrics::METRICS.record_simulation(start.elapsed(), combination_count);
    logging::info(
        Stage::Simulate,
        format!(
            "Simulated {} conditional(s), {} combination(s)",
            gates.len(),
            combination_count
        ),
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn enumerate_combinations(
    tree: &VNode,
    gates: &[Gate],
    element: usize,
    gate_order: &[String],
    ancestor_completion: &[(usize, usize)],
    index: usize,
    assignment: &mut Vec<(String, bool)>,
    variants: &mut HashMap<String, Option<Vec<usize>>>,
    combination_count: &mut u64,
) -> Result<()> {
    if index == gate_order.len() {
        *combination_count += 1;
        let visible = gates[element].eval(assignment)?;
        let path = if visible {
            compute_simulated_path(tree, gates, element, assignment)
        } else {
            None
        };
        variants.insert(canonical_signature(assignment), path);
        return Ok(());
    }

    for value in [false, true] {
        assignment.push((gate_order[index].clone(), value));

        // Prune: an ancestor whose gates completed at this index and whose
        // guard is false makes everything below unreachable.
        let mut pruned = false;
        for &(anc, completes_at) in ancestor_completion {
            if completes_at == index && !gates[anc].eval(assignment)? {
                variants.insert(canonical_signature(assignment), None);
                pruned = true;
                break;
            }
        }

        if !pruned {
            enumerate_combinations(
                tree,
                gates,
                element,
                gate_order,
                ancestor_completion,
                index + 1,
                assignment,
                variants,
                combination_count,
            )?;
        }
        assignment.pop();
    }

    Ok(())
}

/// Build the simulated tree for one assignment and adjust the element's
/// author path into DOM space.
fn compute_simulated_path(
    tree: &VNode,
    gates: &[Gate],
    element: usize,
    assignment: &[(String, bool)],
) -> Option<Vec<usize>> {
    let mut sim = tree.clone();

    // Decide presence for every gate the assignment covers; gates on
    // unrelated state keep whatever the reference tree shows. Depth order
    // keeps ancestors materialized before descendants.
    for gate in gates {
        let chain_decidable = gate
            .ancestors
            .iter()
            .map(|&a| &gates[a])
            .chain(std::iter::once(gate))
            .all(|g| {
                g.state_keys
                    .iter()
                    .all(|k| assignment.iter().any(|(key, _)| key == k))
            });
        if !chain_decidable {
            continue;
        }

        let visible = gate
            .ancestors
            .iter()
            .map(|&a| &gates[a])
            .chain(std::iter::once(gate))
            .all(|g| g.eval(assignment).unwrap_or(false));

        set_slot(&mut sim, tree, &gate.author_path, visible);
    }

    match adjust_path(&sim, &gates[element].author_path) {
        Ok(DomPath::Visible(path)) => Some(path),
        _ => None,
    }
}

fn placeholder() -> VNode {
    VNode::element("div", HashMap::new(), vec![])
}

/// Force the slot at `path` to present/absent in the simulated tree.
///
/// The reference tree supplies subtrees it currently renders. Structure the
/// reference cannot show (anything under a currently-hidden ancestor) is
/// scaffolded with placeholder elements along the author path: authored
/// siblings are real elements unless another gate says otherwise, and deeper
/// gates overwrite their own slots afterwards (depth order).
fn set_slot(sim: &mut VNode, reference: &VNode, path: &[usize], visible: bool) {
    if path.is_empty() {
        return;
    }
    let (parent_path, last) = path.split_at(path.len() - 1);

    let mut current = sim;
    for (step, &index) in parent_path.iter().enumerate() {
        let walked = &path[..step + 1];
        let VNode::Element(el) = current else { return };
        if el.children.len() <= index {
            el.children.resize_with(index + 1, || Some(placeholder()));
        }
        if el.children[index].is_none() {
            el.children[index] = Some(
                reference
                    .node_at_path(walked)
                    .ok()
                    .cloned()
                    .unwrap_or_else(placeholder),
            );
        }
        match el.children[index].as_mut() {
            Some(child) => current = child,
            None => return,
        }
    }

    let VNode::Element(el) = current else { return };
    let index = last[0];
    if el.children.len() <= index {
        el.children.resize_with(index + 1, || Some(placeholder()));
    }
    el.children[index] = if visible {
        match &el.children[index] {
            Some(existing) => Some(existing.clone()),
            None => Some(
                reference
                    .node_at_path(path)
                    .ok()
                    .cloned()
                    .unwrap_or_else(placeholder),
            ),
        }
    } else {
        None
    };
}
