//! Compiler template-metadata contract.
//!
//! The component compiler emits a `TemplateMap` on every build: parameterized
//! text/attribute templates, conditional element metadata (path variants
//! initially empty until the simulator fills them), and loop templates, all keyed
//! by stable hex element ids or state keys. The predictor accepts a map
//! through `learn` metadata and seeds its template store from it; compiler
//! templates outrank anything extracted at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::path::HexPath;
use crate::simulator::ConditionalElementTemplate;
use crate::vdom::{LoopTemplate, TemplatePatch};

/// A compiled text or attribute template for one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTemplate {
    #[serde(rename = "templatePatch")]
    pub template_patch: TemplatePatch,
    /// Attribute name for attribute templates; `None` means text content.
    #[serde(rename = "propName", skip_serializing_if = "Option::is_none")]
    pub prop_name: Option<String>,
}

/// Everything the compiler knows about one component build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMap {
    pub component_name: String,
    pub version: String,
    /// Compiler build timestamp, opaque to the engine.
    pub generated_at: String,
    #[serde(default)]
    pub templates: HashMap<HexPath, CompiledTemplate>,
    #[serde(default)]
    pub conditional_elements: HashMap<HexPath, ConditionalElementTemplate>,
    #[serde(default)]
    pub loop_templates: HashMap<String, LoopTemplate>,
}

impl TemplateMap {
    /// Compiled text/attr templates that depend on `state_key`, with the
    /// author-space path each one renders at. Entries whose hex id cannot be
    /// decoded are skipped (hand-edited ids have no index equivalent).
    pub fn templates_for_state_key(
        &self,
        state_key: &str,
    ) -> Vec<(Vec<usize>, &CompiledTemplate)> {
        let mut found: Vec<(Vec<usize>, &CompiledTemplate)> = self
            .templates
            .iter()
            .filter(|(_, t)| t.template_patch.bindings.iter().any(|b| b == state_key))
            .filter_map(|(hex, t)| hex.to_index_path().ok().map(|p| (p, t)))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    /// The conditional element (if any) whose guard chain depends on
    /// `state_key`, together with its author-space path.
    pub fn conditional_for_state_key(
        &self,
        state_key: &str,
    ) -> Option<(Vec<usize>, &ConditionalElementTemplate)> {
        self.conditional_elements
            .iter()
            .filter(|(_, t)| {
                t.condition_bindings.iter().any(|b| b == state_key)
                    || t.gate_order.iter().any(|b| b == state_key)
                    || t.condition_mapping.values().any(|v| v == state_key)
            })
            .filter_map(|(hex, t)| hex.to_index_path().ok().map(|p| (p, t)))
            .min_by(|a, b| a.0.cmp(&b.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::index_path_to_hex;

    fn text_template(binding: &str) -> CompiledTemplate {
        CompiledTemplate {
            template_patch: TemplatePatch {
                template: "Count: {0}".to_string(),
                bindings: vec![binding.to_string()],
                slots: vec![7],
                conditional_templates: None,
                conditional_binding_index: None,
            },
            prop_name: None,
        }
    }

    #[test]
    fn test_templates_for_state_key() {
        let mut map = TemplateMap {
            component_name: "Counter".to_string(),
            version: "1".to_string(),
            generated_at: "2025-01-01T00:00:00Z".to_string(),
            templates: HashMap::new(),
            conditional_elements: HashMap::new(),
            loop_templates: HashMap::new(),
        };
        map.templates
            .insert(index_path_to_hex(&[0, 1]), text_template("count"));
        map.templates
            .insert(index_path_to_hex(&[2]), text_template("other"));

        let found = map.templates_for_state_key("count");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, vec![0, 1]);

        assert!(map.templates_for_state_key("missing").is_empty());
    }

    #[test]
    fn test_round_trip_wire_format() {
        let mut map = TemplateMap {
            component_name: "Menu".to_string(),
            version: "3".to_string(),
            generated_at: "2025-06-01T12:00:00Z".to_string(),
            templates: HashMap::new(),
            conditional_elements: HashMap::new(),
            loop_templates: HashMap::new(),
        };
        map.templates
            .insert(index_path_to_hex(&[0]), text_template("count"));

        let json = serde_json::to_string(&map).unwrap();
        assert!(json.contains("templatePatch"));
        let back: TemplateMap = serde_json::from_str(&json).unwrap();
        assert_eq!(map, back);
    }
}
