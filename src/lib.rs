pub mod vdom;
pub mod error;
pub mod path;
pub mod adjuster;
pub mod reconciler;
pub mod condition;
pub mod simulator;
pub mod predictor;
pub mod template_extraction;
pub mod loop_extraction;
pub mod materialize;
pub mod template_map;
pub mod deep_state_traversal;
pub mod validation;
pub mod patch_validator;
pub mod logging;
pub mod metrics;
pub mod ffi;

pub use vdom::{ItemTemplate, LoopTemplate, Patch, TemplatePatch, VElement, VNode, VText};
pub use error::{ErrorCode, FfiResult, MinimactError, Result};
pub use path::{index_path_to_hex, HexPath};
pub use adjuster::{adjust_patch, adjust_patches, adjust_path, DomPath};
pub use reconciler::{reconcile, reconcile_with_config};
pub use condition::ConditionExpr;
pub use simulator::{canonical_signature, simulate_conditional_paths, ConditionalElementTemplate};
pub use predictor::{
    Prediction, PredictionSource, Predictor, PredictorConfig, PredictorStats, StateChange,
    TemplateSource,
};
pub use materialize::{materialize_loop, materialize_patch, render_template_patch, resolve_binding};
pub use template_map::{CompiledTemplate, TemplateMap};
pub use validation::{deserialize_vnode_safe, serialize_vnode_safe, ValidationConfig};
pub use patch_validator::{validate_patch, validate_patches, PatchValidatorConfig};
pub use logging::{
    clear_trace, disable_trace, enable_trace, set_trace_level, trace_events, trace_events_json,
    LogLevel, Stage, TraceEvent,
};
pub use metrics::{MetricsSnapshot, METRICS};
