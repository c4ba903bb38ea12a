//! The learn → predict feedback loop.
//!
//! `learn` runs the reconciler on every real render, distills the observed
//! (state change, patch sequence) pair into a parameterized template when the
//! heuristics allow, and keeps the concrete patches as a fallback. `predict`
//! answers a future state change from the stores without touching a VNode
//! tree. The host reports back with `confirm`/`refute`; a template that
//! mispredicts too often is demoted until a fresh extraction replaces it.
//!
//! All state is per component instance and in memory; nothing is persisted
//! and nothing is evicted by the engine itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::condition::ConditionExpr;
use crate::error::{MinimactError, Result};
use crate::logging::{self, Stage};
use crate::loop_extraction::extract_loop_template;
use crate::materialize::{materialize_loop, materialize_patch};
use crate::path::HexPath;
use crate::reconciler::reconcile;
use crate::simulator::{simulate_conditional_paths, ConditionalElementTemplate};
use crate::template_extraction::{
    extract_conditional, extract_text_or_attr_template, ConditionalPrediction,
};
use crate::template_map::TemplateMap;
use crate::vdom::{Patch, VNode};

/// A change to component state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    /// Component identifier
    pub component_id: String,
    /// State key that changed
    pub state_key: String,
    /// Old value (JSON-typed)
    pub old_value: Value,
    /// New value (JSON-typed)
    pub new_value: Value,
}

/// Where a stored template came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateSource {
    /// Distilled from an observed render.
    ExtractedAtRuntime,
    /// Seeded from compiler metadata.
    SuppliedByCompiler,
    /// A compiler template that superseded a runtime extraction.
    CompilerRefined,
}

fn source_rank(source: TemplateSource) -> u8 {
    match source {
        TemplateSource::ExtractedAtRuntime => 0,
        TemplateSource::SuppliedByCompiler | TemplateSource::CompilerRefined => 1,
    }
}

/// Which store served a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionSource {
    Template(TemplateSource),
    Concrete,
}

/// A prediction for a state change. Patches are in VNode space, like
/// reconciler output; the host adjusts them before shipping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Key to echo into `confirm`/`refute` after the authoritative render.
    pub pattern_key: String,
    pub patches: Vec<Patch>,
    /// Confidence score (0.0 to 1.0)
    pub confidence: f32,
    pub source: PredictionSource,
}

#[derive(Debug, Clone)]
enum TemplateBody {
    /// Templated patches (text/attr/loop kinds).
    Patches(Vec<Patch>),
    /// A conditional element with its captured subtree.
    Conditional(ConditionalPrediction),
}

#[derive(Debug, Clone)]
struct TemplateEntry {
    body: TemplateBody,
    source: TemplateSource,
    usage_count: u64,
    correct_count: u64,
    incorrect_count: u64,
    demoted: bool,
    unresolved_events: u64,
    /// Binding richness, for the subsumption rule on re-learn.
    binding_count: usize,
}

impl TemplateEntry {
    fn new(body: TemplateBody, source: TemplateSource, binding_count: usize) -> Self {
        Self {
            body,
            source,
            usage_count: 0,
            correct_count: 0,
            incorrect_count: 0,
            demoted: false,
            unresolved_events: 0,
            binding_count,
        }
    }

    fn confidence(&self) -> f32 {
        let judged = self.correct_count + self.incorrect_count;
        if judged == 0 {
            1.0
        } else {
            self.correct_count as f32 / judged as f32
        }
    }
}

#[derive(Debug, Clone)]
struct ConcreteEntry {
    patches: Vec<Patch>,
    observation_count: u64,
    usage_count: u64,
    correct_count: u64,
    incorrect_count: u64,
}

impl ConcreteEntry {
    fn confidence(&self) -> f32 {
        self.observation_count as f32 / (self.observation_count as f32 + 1.0)
    }
}

/// Tuning knobs. Demotion policy is configuration, not a constant baked into
/// the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Mispredict ratio above which a template is demoted.
    pub demotion_threshold: f32,
    /// Uses required before the ratio is trusted.
    pub demotion_min_uses: u64,
    /// Emit `AppendTemplate` instead of `UpdateListTemplate` for pure array
    /// appends (streaming hosts opt in).
    pub stream_appends: bool,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            demotion_threshold: 0.2,
            demotion_min_uses: 5,
            stream_appends: false,
        }
    }
}

/// Per-component prediction engine.
pub struct Predictor {
    template_predictions: HashMap<String, TemplateEntry>,
    concrete_predictions: HashMap<String, ConcreteEntry>,
    /// Compiler conditional metadata, completed by the simulator.
    conditional_metadata: HashMap<HexPath, ConditionalElementTemplate>,
    /// Last seen value per state key; feeds multi-variable extraction when
    /// the host omits a snapshot.
    last_known_values: HashMap<String, Value>,
    config: PredictorConfig,
}

impl Predictor {
    pub fn new() -> Self {
        Self::with_config(PredictorConfig::default())
    }

    pub fn with_config(config: PredictorConfig) -> Self {
        Self {
            template_predictions: HashMap::new(),
            concrete_predictions: HashMap::new(),
            conditional_metadata: HashMap::new(),
            last_known_values: HashMap::new(),
            config,
        }
    }

    /// Coarse grouping key: one bucket per (component, state key, value
    /// type). All observations of "this key changed to a value of this type"
    /// land together.
    pub fn pattern_key(&self, state_change: &StateChange) -> String {
        format!(
            "{}::{}::{}",
            state_change.component_id,
            state_change.state_key,
            value_type_tag(&state_change.new_value)
        )
    }

    /// Accept compiler metadata outside of `learn` (hot reload).
    pub fn register_metadata(&mut self, metadata: &TemplateMap) {
        for (hex, template) in &metadata.conditional_elements {
            self.conditional_metadata.insert(hex.clone(), template.clone());
        }
    }

    /// Run the simulator over the registered conditional metadata.
    pub fn simulate(&mut self, tree: &VNode) -> Result<()> {
        simulate_conditional_paths(tree, &mut self.conditional_metadata)
    }

    /// Read-only view of the conditional metadata (with `path_variants`
    /// populated after `simulate`).
    pub fn conditional_templates(&self) -> &HashMap<HexPath, ConditionalElementTemplate> {
        &self.conditional_metadata
    }

    /// Observe one render. Returns the authoritative patch list (VNode
    /// space) so the host adjusts and ships exactly what was learned from.
    pub fn learn(
        &mut self,
        state_change: StateChange,
        old_tree: &VNode,
        new_tree: &VNode,
        all_state: Option<&HashMap<String, Value>>,
        metadata: Option<&TemplateMap>,
    ) -> Result<Vec<Patch>> {
        logging::debug_for(
            Stage::Extract,
            format!("{}::{}", state_change.component_id, state_change.state_key),
            "Learning pattern",
        );

        let patches = match reconcile(old_tree, new_tree) {
            Ok(p) => p,
            Err(e) => {
                crate::metrics::METRICS.record_learn(true);
                return Err(e);
            }
        };
        let pattern_key = self.pattern_key(&state_change);

        if let Some(map) = metadata {
            self.register_metadata(map);
        }

        // Snapshot for extraction: everything we know, newest value last.
        if let Some(all) = all_state {
            for (key, value) in all {
                self.last_known_values.insert(key.clone(), value.clone());
            }
        }
        self.last_known_values
            .insert(state_change.state_key.clone(), state_change.new_value.clone());
        let snapshot = self.last_known_values.clone();

        let extracted = self
            .extract_from_metadata(&state_change, &patches, old_tree, new_tree, metadata)
            .or_else(|| {
                extract_loop_template(&state_change, &patches, &snapshot).map(
                    |(container, template)| {
                        let binding_count = count_loop_bindings(&template);
                        (
                            TemplateBody::Patches(vec![Patch::UpdateListTemplate {
                                path: container,
                                loop_template: template,
                            }]),
                            TemplateSource::ExtractedAtRuntime,
                            binding_count,
                        )
                    },
                )
            })
            .or_else(|| {
                if patches.len() != 1 {
                    return None;
                }
                extract_text_or_attr_template(&state_change, &patches[0], old_tree, &snapshot)
                    .map(|patch| {
                        let binding_count = count_patch_bindings(&patch);
                        (
                            TemplateBody::Patches(vec![patch]),
                            TemplateSource::ExtractedAtRuntime,
                            binding_count,
                        )
                    })
            })
            .or_else(|| {
                if patches.len() != 1 {
                    return None;
                }
                extract_conditional(
                    &state_change,
                    &patches[0],
                    &self.conditional_metadata,
                    old_tree,
                )
                .map(|prediction| {
                    let binding_count = prediction.template.condition_bindings.len().max(1);
                    (
                        TemplateBody::Conditional(prediction),
                        TemplateSource::ExtractedAtRuntime,
                        binding_count,
                    )
                })
            });

        if let Some((body, source, binding_count)) = extracted {
            self.store_template(pattern_key.clone(), body, source, binding_count);
        }

        // Concrete fallback, always.
        let entry = self
            .concrete_predictions
            .entry(pattern_key)
            .or_insert_with(|| ConcreteEntry {
                patches: Vec::new(),
                observation_count: 0,
                usage_count: 0,
                correct_count: 0,
                incorrect_count: 0,
            });
        entry.patches = patches.clone();
        entry.observation_count += 1;

        crate::metrics::METRICS.record_learn(false);
        Ok(patches)
    }

    /// Seed template predictions from compiler metadata relevant to this
    /// state change. Compiler templates outrank runtime extraction.
    fn extract_from_metadata(
        &self,
        state_change: &StateChange,
        patches: &[Patch],
        old_tree: &VNode,
        new_tree: &VNode,
        metadata: Option<&TemplateMap>,
    ) -> Option<(TemplateBody, TemplateSource, usize)> {
        let map = metadata?;

        if let Some(template) = map.loop_templates.get(&state_change.state_key) {
            // Placement comes from the observed creates.
            let container = patches.iter().find_map(|p| match p {
                Patch::Create { path, .. } if !path.is_empty() => {
                    Some(path[..path.len() - 1].to_vec())
                }
                Patch::Replace { path, .. } => Some(path.clone()),
                _ => None,
            })?;
            let binding_count = count_loop_bindings(template);
            return Some((
                TemplateBody::Patches(vec![Patch::UpdateListTemplate {
                    path: container,
                    loop_template: template.clone(),
                }]),
                TemplateSource::SuppliedByCompiler,
                binding_count,
            ));
        }

        let compiled = map.templates_for_state_key(&state_change.state_key);
        if !compiled.is_empty() {
            let patches: Vec<Patch> = compiled
                .into_iter()
                .map(|(path, t)| match &t.prop_name {
                    None => Patch::UpdateTextTemplate {
                        path,
                        template_patch: t.template_patch.clone(),
                    },
                    Some(name) => Patch::UpdatePropsTemplate {
                        path,
                        prop_name: name.clone(),
                        template_patch: t.template_patch.clone(),
                    },
                })
                .collect();
            let binding_count = patches.iter().map(count_patch_bindings).sum();
            return Some((
                TemplateBody::Patches(patches),
                TemplateSource::SuppliedByCompiler,
                binding_count,
            ));
        }

        if let Some((path, template)) = map.conditional_for_state_key(&state_change.state_key) {
            let node = new_tree
                .node_at_path(&path)
                .or_else(|_| old_tree.node_at_path(&path))
                .ok()?
                .clone();
            let binding_count = template.condition_bindings.len().max(1);
            return Some((
                TemplateBody::Conditional(ConditionalPrediction {
                    template: template.clone(),
                    node,
                    last_path: Some(path),
                }),
                TemplateSource::SuppliedByCompiler,
                binding_count,
            ));
        }

        None
    }

    /// Insert or replace under the subsumption rule: an existing healthy
    /// template survives unless the newcomer outranks it (compiler over
    /// runtime) or strictly extends it (more bindings). Re-learning identical
    /// inputs is a no-op apart from the concrete observation counter.
    fn store_template(
        &mut self,
        pattern_key: String,
        body: TemplateBody,
        source: TemplateSource,
        binding_count: usize,
    ) {
        use std::collections::hash_map::Entry;

        match self.template_predictions.entry(pattern_key) {
            Entry::Vacant(slot) => {
                crate::metrics::METRICS.record_template_stored();
                slot.insert(TemplateEntry::new(body, source, binding_count));
            }
            Entry::Occupied(mut slot) => {
                let key = slot.key().clone();
                let existing = slot.get_mut();
                let outranks = source_rank(source) > source_rank(existing.source);
                let extends = source_rank(source) == source_rank(existing.source)
                    && binding_count > existing.binding_count;

                if existing.demoted || outranks || extends {
                    let refined = outranks
                        && existing.source == TemplateSource::ExtractedAtRuntime;
                    let source = if refined {
                        TemplateSource::CompilerRefined
                    } else {
                        source
                    };
                    crate::metrics::METRICS.record_template_stored();
                    logging::info_for(
                        Stage::Extract,
                        key,
                        format!("Template replaced (source {:?})", source),
                    );
                    *existing = TemplateEntry::new(body, source, binding_count);
                }
            }
        }
    }

    /// Predict patches for a state change without reconciling anything.
    ///
    /// Template predictions win over concrete ones; a template that cannot
    /// materialize against the snapshot is skipped, not an error.
    pub fn predict(
        &mut self,
        state_change: &StateChange,
        all_state: Option<&HashMap<String, Value>>,
    ) -> Option<Prediction> {
        let start = std::time::Instant::now();
        let pattern_key = self.pattern_key(state_change);

        let mut snapshot = match all_state {
            Some(state) => state.clone(),
            None => self.last_known_values.clone(),
        };
        snapshot.insert(
            state_change.state_key.clone(),
            state_change.new_value.clone(),
        );

        if let Some(entry) = self.template_predictions.get_mut(&pattern_key) {
            if !entry.demoted {
                match materialize_entry(entry, state_change, &snapshot, &self.config) {
                    Ok(patches) => {
                        entry.usage_count += 1;
                        let prediction = Prediction {
                            pattern_key,
                            patches,
                            confidence: entry.confidence(),
                            source: PredictionSource::Template(entry.source),
                        };
                        crate::metrics::METRICS.record_prediction(start.elapsed(), true);
                        logging::info_for(
                            Stage::Predict,
                            prediction.pattern_key.clone(),
                            format!(
                                "Template prediction served ({} patch(es))",
                                prediction.patches.len()
                            ),
                        );
                        return Some(prediction);
                    }
                    Err(e) => {
                        entry.unresolved_events += 1;
                        crate::metrics::METRICS.record_unresolved_binding();
                        logging::debug_for(
                            Stage::Predict,
                            pattern_key.as_str(),
                            format!("Template declined to materialize: {}", e),
                        );
                    }
                }
            }
        }

        if let Some(entry) = self.concrete_predictions.get_mut(&pattern_key) {
            entry.usage_count += 1;
            let prediction = Prediction {
                pattern_key,
                patches: entry.patches.clone(),
                confidence: entry.confidence(),
                source: PredictionSource::Concrete,
            };
            crate::metrics::METRICS.record_prediction(start.elapsed(), true);
            return Some(prediction);
        }

        crate::metrics::METRICS.record_prediction(start.elapsed(), false);
        None
    }

    /// Pre-compute patches for a host-declared likely next change.
    /// Single-change hints only; anything else declines.
    pub fn predict_hint(
        &mut self,
        hint_id: &str,
        component_id: &str,
        state_changes: Vec<StateChange>,
        all_state: Option<&HashMap<String, Value>>,
    ) -> Option<Prediction> {
        logging::info_for(
            Stage::Predict,
            hint_id,
            format!("Processing hint for component {}", component_id),
        );

        if state_changes.len() != 1 {
            logging::warn(Stage::Predict, "Multi-state hints not supported");
            return None;
        }

        let prediction = self.predict(&state_changes[0], all_state)?;
        logging::info_for(
            Stage::Predict,
            hint_id,
            format!(
                "Hint predicted {} patch(es) with {:.2} confidence",
                prediction.patches.len(),
                prediction.confidence
            ),
        );
        Some(prediction)
    }

    /// The shipped prediction matched the authoritative render.
    pub fn confirm(&mut self, pattern_key: &str) {
        if let Some(entry) = self.template_predictions.get_mut(pattern_key) {
            if !entry.demoted {
                entry.correct_count += 1;
                return;
            }
        }
        if let Some(entry) = self.concrete_predictions.get_mut(pattern_key) {
            entry.correct_count += 1;
        }
    }

    /// The shipped prediction was wrong. Past the configured threshold the
    /// template is demoted and predictions fall through to concrete patches
    /// until a re-learn replaces it.
    pub fn refute(&mut self, pattern_key: &str) {
        if let Some(entry) = self.template_predictions.get_mut(pattern_key) {
            if !entry.demoted {
                entry.incorrect_count += 1;
                if entry.usage_count >= self.config.demotion_min_uses
                    && entry.incorrect_count as f32 / entry.usage_count as f32
                        > self.config.demotion_threshold
                {
                    entry.demoted = true;
                    crate::metrics::METRICS.record_template_demotion();
                    logging::warn_for(
                        Stage::Predict,
                        pattern_key,
                        format!(
                            "Template demoted: {}/{} mispredictions",
                            entry.incorrect_count, entry.usage_count
                        ),
                    );
                }
                return;
            }
        }
        if let Some(entry) = self.concrete_predictions.get_mut(pattern_key) {
            entry.incorrect_count += 1;
        }
    }

    /// Aggregate statistics over the stores.
    pub fn stats(&self) -> PredictorStats {
        let total_predictions: u64 = self
            .template_predictions
            .values()
            .map(|e| e.usage_count)
            .chain(self.concrete_predictions.values().map(|e| e.usage_count))
            .sum();
        let correct: u64 = self
            .template_predictions
            .values()
            .map(|e| e.correct_count)
            .chain(self.concrete_predictions.values().map(|e| e.correct_count))
            .sum();
        let incorrect: u64 = self
            .template_predictions
            .values()
            .map(|e| e.incorrect_count)
            .chain(self.concrete_predictions.values().map(|e| e.incorrect_count))
            .sum();

        let hit_rate = if correct + incorrect > 0 {
            correct as f32 / (correct + incorrect) as f32
        } else {
            0.0
        };

        PredictorStats {
            pattern_keys: self.concrete_predictions.len(),
            template_entries: self.template_predictions.len(),
            demoted_templates: self
                .template_predictions
                .values()
                .filter(|e| e.demoted)
                .count(),
            total_observations: self
                .concrete_predictions
                .values()
                .map(|e| e.observation_count)
                .sum(),
            total_predictions,
            correct_predictions: correct,
            incorrect_predictions: incorrect,
            hit_rate,
            unresolved_binding_events: self
                .template_predictions
                .values()
                .map(|e| e.unresolved_events)
                .sum(),
            estimated_memory_bytes: self.estimate_memory_usage(),
        }
    }

    fn estimate_memory_usage(&self) -> usize {
        let mut total = 0;
        for (key, entry) in &self.concrete_predictions {
            total += key.len() + std::mem::size_of::<ConcreteEntry>();
            total += entry.patches.len() * std::mem::size_of::<Patch>();
        }
        for (key, entry) in &self.template_predictions {
            total += key.len() + std::mem::size_of::<TemplateEntry>();
            if let TemplateBody::Conditional(c) = &entry.body {
                total += c.node.estimate_size();
            }
        }
        total
    }
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new()
    }
}

/// Materialize a template entry into shippable patches.
fn materialize_entry(
    entry: &TemplateEntry,
    state_change: &StateChange,
    snapshot: &HashMap<String, Value>,
    config: &PredictorConfig,
) -> Result<Vec<Patch>> {
    match &entry.body {
        TemplateBody::Patches(patches) => {
            let mut out = Vec::with_capacity(patches.len());
            for patch in patches {
                match patch {
                    Patch::UpdateListTemplate {
                        path,
                        loop_template,
                    } => {
                        // Prove the bindings resolve before promising a list.
                        materialize_loop(loop_template, snapshot)?;

                        if config.stream_appends {
                            if let Some(count) = pure_append_count(state_change) {
                                out.push(Patch::AppendTemplate {
                                    path: path.clone(),
                                    item_template: loop_template.item_template.clone(),
                                    count,
                                });
                                continue;
                            }
                        }
                        out.push(patch.clone());
                    }
                    other => out.push(materialize_patch(other, snapshot, None)?),
                }
            }
            Ok(out)
        }

        TemplateBody::Conditional(prediction) => {
            let template = &prediction.template;
            let path = prediction
                .last_path
                .clone()
                .ok_or_else(|| MinimactError::UnresolvedBinding {
                    binding: "conditional path".to_string(),
                })?;

            // Presence from the simulated variants when available, otherwise
            // straight from the guard expression.
            let visible = match template.lookup_path(snapshot) {
                Some(entry) => entry.is_some(),
                None => {
                    let expr = ConditionExpr::parse(&template.condition_expression)?;
                    let mut vars = HashMap::new();
                    for ident in expr.identifiers() {
                        let state_key = template
                            .condition_mapping
                            .get(&ident)
                            .cloned()
                            .unwrap_or_else(|| ident.clone());
                        let value = snapshot.get(&state_key).and_then(|v| v.as_bool()).ok_or(
                            MinimactError::UnresolvedBinding {
                                binding: state_key.clone(),
                            },
                        )?;
                        vars.insert(ident, value);
                    }
                    expr.eval(&vars)?
                }
            };

            if visible {
                Ok(vec![Patch::Create {
                    path,
                    node: prediction.node.clone(),
                }])
            } else {
                Ok(vec![Patch::Remove { path }])
            }
        }
    }
}

/// Is the new array the old array plus a non-empty tail?
fn pure_append_count(state_change: &StateChange) -> Option<usize> {
    let old = state_change.old_value.as_array()?;
    let new = state_change.new_value.as_array()?;
    if new.len() > old.len() && new[..old.len()] == old[..] {
        Some(new.len() - old.len())
    } else {
        None
    }
}

fn value_type_tag(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn count_patch_bindings(patch: &Patch) -> usize {
    match patch {
        Patch::UpdateTextTemplate { template_patch, .. }
        | Patch::UpdatePropsTemplate { template_patch, .. } => template_patch.bindings.len(),
        Patch::UpdateListTemplate { loop_template, .. } => count_loop_bindings(loop_template),
        _ => 0,
    }
}

fn count_loop_bindings(template: &crate::vdom::LoopTemplate) -> usize {
    fn count_item(item: &crate::vdom::ItemTemplate) -> usize {
        match item {
            crate::vdom::ItemTemplate::Text { template_patch } => template_patch.bindings.len(),
            crate::vdom::ItemTemplate::Element {
                props_templates,
                children_templates,
                key_binding,
                ..
            } => {
                let props: usize = props_templates
                    .as_ref()
                    .map(|m| m.values().map(|t| t.bindings.len()).sum())
                    .unwrap_or(0);
                let children: usize = children_templates
                    .as_ref()
                    .map(|c| c.iter().map(count_item).sum())
                    .unwrap_or(0);
                props + children + usize::from(key_binding.is_some())
            }
        }
    }
    1 + count_item(&template.item_template)
}

/// Aggregate predictor statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorStats {
    pub pattern_keys: usize,
    pub template_entries: usize,
    pub demoted_templates: usize,
    pub total_observations: u64,
    pub total_predictions: u64,
    pub correct_predictions: u64,
    pub incorrect_predictions: u64,
    pub hit_rate: f32,
    pub unresolved_binding_events: u64,
    pub estimated_memory_bytes: usize,
}
