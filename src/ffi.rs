//! C ABI for the .NET host.
//!
//! Conventions: JSON strings in, JSON strings out; every returned pointer is
//! freed with `minimact_free_string`; nothing panics across the boundary.
//! Predictors live in a process-wide registry behind opaque integer handles,
//! one per component instance, and the host serializes calls into any single
//! handle.

use crate::adjuster::adjust_patches;
use crate::error::FfiResult;
use crate::path::HexPath;
use crate::predictor::{Predictor, PredictorConfig, StateChange};
use crate::reconciler::reconcile;
use crate::simulator::{simulate_conditional_paths, ConditionalElementTemplate};
use crate::template_map::TemplateMap;
use crate::validation::{deserialize_vnode_safe, ValidationConfig};
use crate::vdom::Patch;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::atomic::{AtomicUsize, Ordering};

lazy_static::lazy_static! {
    static ref PREDICTORS: dashmap::DashMap<usize, Predictor> = dashmap::DashMap::new();
}

static NEXT_PREDICTOR_ID: AtomicUsize = AtomicUsize::new(1);

/// Opaque handle to a predictor instance
pub type PredictorHandle = usize;

unsafe fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

fn into_raw(json: String) -> *mut c_char {
    CString::new(json)
        .map(|s| s.into_raw())
        .unwrap_or(std::ptr::null_mut())
}

fn ok_response(data: serde_json::Value) -> *mut c_char {
    into_raw(serde_json::json!({ "ok": true, "data": data }).to_string())
}

fn error_response(message: &str) -> *mut c_char {
    into_raw(serde_json::json!({ "ok": false, "error": message }).to_string())
}

/// Create a new predictor instance. Returns its handle.
#[no_mangle]
pub extern "C" fn minimact_predictor_new() -> PredictorHandle {
    let id = NEXT_PREDICTOR_ID.fetch_add(1, Ordering::SeqCst);
    PREDICTORS.insert(id, Predictor::new());
    id
}

/// Create a predictor with explicit demotion policy.
#[no_mangle]
pub extern "C" fn minimact_predictor_new_with_config(
    demotion_threshold: f32,
    demotion_min_uses: u64,
    stream_appends: bool,
) -> PredictorHandle {
    let config = PredictorConfig {
        demotion_threshold,
        demotion_min_uses,
        stream_appends,
    };
    let id = NEXT_PREDICTOR_ID.fetch_add(1, Ordering::SeqCst);
    PREDICTORS.insert(id, Predictor::with_config(config));
    id
}

/// Destroy a predictor instance.
#[no_mangle]
pub extern "C" fn minimact_predictor_destroy(handle: PredictorHandle) -> FfiResult {
    if PREDICTORS.remove(&handle).is_some() {
        FfiResult::success()
    } else {
        FfiResult::error_str("Invalid predictor handle")
    }
}

/// Reconcile two trees. Returns the patch list (VNode-space paths) as JSON.
///
/// # Safety
/// - `old_json` and `new_json` must be valid null-terminated UTF-8 strings.
/// - The returned pointer must be freed with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_reconcile(
    old_json: *const c_char,
    new_json: *const c_char,
) -> *mut c_char {
    let (Some(old_str), Some(new_str)) = (read_str(old_json), read_str(new_json)) else {
        return error_response("Invalid input encoding");
    };

    let config = ValidationConfig::default();
    let old_tree = match deserialize_vnode_safe(old_str, &config) {
        Ok(t) => t,
        Err(e) => return error_response(&format!("Failed to parse old tree: {}", e)),
    };
    let new_tree = match deserialize_vnode_safe(new_str, &config) {
        Ok(t) => t,
        Err(e) => return error_response(&format!("Failed to parse new tree: {}", e)),
    };

    match reconcile(&old_tree, &new_tree) {
        Ok(patches) => match serde_json::to_value(&patches) {
            Ok(json) => ok_response(json),
            Err(e) => error_response(&format!("Failed to serialize patches: {}", e)),
        },
        Err(e) => error_response(&format!("Reconciliation failed: {}", e)),
    }
}

/// Convert VNode-space patches to DOM space against a reference tree.
/// Patches through null branches are dropped from the result.
///
/// # Safety
/// - Inputs must be valid null-terminated UTF-8 strings.
/// - The returned pointer must be freed with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_adjust_patches(
    tree_json: *const c_char,
    patches_json: *const c_char,
) -> *mut c_char {
    let (Some(tree_str), Some(patches_str)) = (read_str(tree_json), read_str(patches_json))
    else {
        return error_response("Invalid input encoding");
    };

    let config = ValidationConfig::default();
    let tree = match deserialize_vnode_safe(tree_str, &config) {
        Ok(t) => t,
        Err(e) => return error_response(&format!("Failed to parse tree: {}", e)),
    };
    let patches: Vec<Patch> = match serde_json::from_str(patches_str) {
        Ok(p) => p,
        Err(e) => return error_response(&format!("Failed to parse patches: {}", e)),
    };

    match adjust_patches(&tree, &patches) {
        Ok(adjusted) => match serde_json::to_value(&adjusted) {
            Ok(json) => ok_response(json),
            Err(e) => error_response(&format!("Failed to serialize patches: {}", e)),
        },
        Err(e) => error_response(&format!("Path adjustment failed: {}", e)),
    }
}

/// Fill `path_variants` for a standalone conditional-template map.
/// Returns the augmented map as JSON.
///
/// # Safety
/// - Inputs must be valid null-terminated UTF-8 strings.
/// - The returned pointer must be freed with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_simulate_conditionals(
    tree_json: *const c_char,
    templates_json: *const c_char,
) -> *mut c_char {
    let (Some(tree_str), Some(templates_str)) = (read_str(tree_json), read_str(templates_json))
    else {
        return error_response("Invalid input encoding");
    };

    let config = ValidationConfig::default();
    let tree = match deserialize_vnode_safe(tree_str, &config) {
        Ok(t) => t,
        Err(e) => return error_response(&format!("Failed to parse tree: {}", e)),
    };
    let mut templates: HashMap<HexPath, ConditionalElementTemplate> =
        match serde_json::from_str(templates_str) {
            Ok(t) => t,
            Err(e) => return error_response(&format!("Failed to parse templates: {}", e)),
        };

    match simulate_conditional_paths(&tree, &mut templates) {
        Ok(()) => match serde_json::to_value(&templates) {
            Ok(json) => ok_response(json),
            Err(e) => error_response(&format!("Failed to serialize templates: {}", e)),
        },
        Err(e) => error_response(&format!("Simulation failed: {}", e)),
    }
}

/// Learn from a state change. Returns the authoritative patch list
/// (VNode-space) as JSON.
///
/// # Safety
/// - All JSON pointers must be valid null-terminated UTF-8 strings;
///   `all_state_json` and `metadata_json` may be null.
/// - The returned pointer must be freed with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_predictor_learn(
    handle: PredictorHandle,
    state_change_json: *const c_char,
    old_tree_json: *const c_char,
    new_tree_json: *const c_char,
    all_state_json: *const c_char,
    metadata_json: *const c_char,
) -> *mut c_char {
    let (Some(state_change_str), Some(old_str), Some(new_str)) = (
        read_str(state_change_json),
        read_str(old_tree_json),
        read_str(new_tree_json),
    ) else {
        return error_response("Invalid input encoding");
    };

    let state_change: StateChange = match serde_json::from_str(state_change_str) {
        Ok(sc) => sc,
        Err(e) => return error_response(&format!("Failed to parse state change: {}", e)),
    };

    let config = ValidationConfig::default();
    let old_tree = match deserialize_vnode_safe(old_str, &config) {
        Ok(t) => t,
        Err(e) => return error_response(&format!("Failed to parse old tree: {}", e)),
    };
    let new_tree = match deserialize_vnode_safe(new_str, &config) {
        Ok(t) => t,
        Err(e) => return error_response(&format!("Failed to parse new tree: {}", e)),
    };

    let all_state: Option<HashMap<String, serde_json::Value>> = match read_str(all_state_json) {
        None => None,
        Some(s) => match serde_json::from_str(s) {
            Ok(state) => Some(state),
            Err(e) => return error_response(&format!("Failed to parse all_state: {}", e)),
        },
    };

    let metadata: Option<TemplateMap> = match read_str(metadata_json) {
        None => None,
        Some(s) => match serde_json::from_str(s) {
            Ok(map) => Some(map),
            Err(e) => return error_response(&format!("Failed to parse metadata: {}", e)),
        },
    };

    let Some(mut predictor) = PREDICTORS.get_mut(&handle) else {
        return error_response("Invalid predictor handle");
    };

    match predictor.learn(
        state_change,
        &old_tree,
        &new_tree,
        all_state.as_ref(),
        metadata.as_ref(),
    ) {
        Ok(patches) => match serde_json::to_value(&patches) {
            Ok(json) => ok_response(json),
            Err(e) => error_response(&format!("Failed to serialize patches: {}", e)),
        },
        Err(e) => error_response(&format!("Learn failed: {}", e)),
    }
}

/// Predict patches for a state change.
///
/// # Safety
/// - JSON pointers must be valid null-terminated UTF-8; `all_state_json` may
///   be null.
/// - The returned pointer must be freed with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_predictor_predict(
    handle: PredictorHandle,
    state_change_json: *const c_char,
    all_state_json: *const c_char,
) -> *mut c_char {
    let Some(state_change_str) = read_str(state_change_json) else {
        return error_response("Invalid input encoding");
    };
    let state_change: StateChange = match serde_json::from_str(state_change_str) {
        Ok(sc) => sc,
        Err(e) => return error_response(&format!("Failed to parse state change: {}", e)),
    };

    let all_state: Option<HashMap<String, serde_json::Value>> = match read_str(all_state_json) {
        None => None,
        Some(s) => match serde_json::from_str(s) {
            Ok(state) => Some(state),
            Err(e) => return error_response(&format!("Failed to parse all_state: {}", e)),
        },
    };

    let Some(mut predictor) = PREDICTORS.get_mut(&handle) else {
        return error_response("Invalid predictor handle");
    };

    match predictor.predict(&state_change, all_state.as_ref()) {
        Some(prediction) => match serde_json::to_value(&prediction) {
            Ok(json) => ok_response(json),
            Err(e) => error_response(&format!("Failed to serialize prediction: {}", e)),
        },
        None => error_response("No prediction available"),
    }
}

/// Pre-compute patches for a declared hint (usePredictHint).
///
/// # Safety
/// - JSON pointers must be valid null-terminated UTF-8; `all_state_json` may
///   be null.
/// - The returned pointer must be freed with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_predictor_predict_hint(
    handle: PredictorHandle,
    hint_id: *const c_char,
    component_id: *const c_char,
    state_changes_json: *const c_char,
    all_state_json: *const c_char,
) -> *mut c_char {
    let (Some(hint_id_str), Some(component_id_str), Some(changes_str)) = (
        read_str(hint_id),
        read_str(component_id),
        read_str(state_changes_json),
    ) else {
        return error_response("Invalid input encoding");
    };

    let state_changes: Vec<StateChange> = match serde_json::from_str(changes_str) {
        Ok(sc) => sc,
        Err(e) => return error_response(&format!("Failed to parse state changes: {}", e)),
    };

    let all_state: Option<HashMap<String, serde_json::Value>> = match read_str(all_state_json) {
        None => None,
        Some(s) => match serde_json::from_str(s) {
            Ok(state) => Some(state),
            Err(e) => return error_response(&format!("Failed to parse all_state: {}", e)),
        },
    };

    let Some(mut predictor) = PREDICTORS.get_mut(&handle) else {
        return error_response("Invalid predictor handle");
    };

    match predictor.predict_hint(
        hint_id_str,
        component_id_str,
        state_changes,
        all_state.as_ref(),
    ) {
        Some(prediction) => match serde_json::to_value(&prediction) {
            Ok(json) => into_raw(
                serde_json::json!({ "ok": true, "hint_id": hint_id_str, "data": json })
                    .to_string(),
            ),
            Err(e) => error_response(&format!("Failed to serialize prediction: {}", e)),
        },
        None => error_response("No prediction available for hint"),
    }
}

/// Report that a shipped prediction matched the authoritative render.
///
/// # Safety
/// `pattern_key` must be a valid null-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn minimact_predictor_confirm(
    handle: PredictorHandle,
    pattern_key: *const c_char,
) -> FfiResult {
    let Some(key) = read_str(pattern_key) else {
        return FfiResult::error_str("Invalid pattern_key encoding");
    };
    match PREDICTORS.get_mut(&handle) {
        Some(mut predictor) => {
            predictor.confirm(key);
            FfiResult::success()
        }
        None => FfiResult::error_str("Invalid predictor handle"),
    }
}

/// Report that a shipped prediction was wrong.
///
/// # Safety
/// `pattern_key` must be a valid null-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn minimact_predictor_refute(
    handle: PredictorHandle,
    pattern_key: *const c_char,
) -> FfiResult {
    let Some(key) = read_str(pattern_key) else {
        return FfiResult::error_str("Invalid pattern_key encoding");
    };
    match PREDICTORS.get_mut(&handle) {
        Some(mut predictor) => {
            predictor.refute(key);
            FfiResult::success()
        }
        None => FfiResult::error_str("Invalid predictor handle"),
    }
}

/// Run the conditional path simulator over the predictor's registered
/// metadata against the current tree.
///
/// # Safety
/// `tree_json` must be a valid null-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn minimact_predictor_simulate(
    handle: PredictorHandle,
    tree_json: *const c_char,
) -> FfiResult {
    let Some(tree_str) = read_str(tree_json) else {
        return FfiResult::error_str("Invalid tree encoding");
    };
    let tree = match deserialize_vnode_safe(tree_str, &ValidationConfig::default()) {
        Ok(t) => t,
        Err(e) => return FfiResult::error(&e),
    };
    match PREDICTORS.get_mut(&handle) {
        Some(mut predictor) => match predictor.simulate(&tree) {
            Ok(()) => FfiResult::success(),
            Err(e) => FfiResult::error(&e),
        },
        None => FfiResult::error_str("Invalid predictor handle"),
    }
}

/// Predictor statistics as JSON.
///
/// # Safety
/// The returned pointer must be freed with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_predictor_stats(handle: PredictorHandle) -> *mut c_char {
    match PREDICTORS.get(&handle) {
        Some(predictor) => match serde_json::to_string(&predictor.stats()) {
            Ok(json) => into_raw(json),
            Err(_) => std::ptr::null_mut(),
        },
        None => std::ptr::null_mut(),
    }
}

/// Free a string returned by minimact functions.
///
/// # Safety
/// - `ptr` must be a pointer returned by a minimact function.
/// - `ptr` must not be used after calling this function.
#[no_mangle]
pub unsafe extern "C" fn minimact_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Free an error message from an `FfiResult`.
///
/// # Safety
/// `ptr` must be the `message` of an `FfiResult`.
#[no_mangle]
pub unsafe extern "C" fn minimact_free_error(ptr: *mut c_char) {
    minimact_free_string(ptr);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_lifecycle() {
        let handle = minimact_predictor_new();
        assert!(handle > 0);
        assert_eq!(
            minimact_predictor_destroy(handle).code,
            crate::error::ErrorCode::Success as i32
        );
        assert_ne!(
            minimact_predictor_destroy(handle).code,
            crate::error::ErrorCode::Success as i32
        );
    }

    #[test]
    fn test_reconcile_over_ffi() {
        let old = CString::new(
            r#"{"type":"Text","content":"Hello"}"#,
        )
        .unwrap();
        let new = CString::new(
            r#"{"type":"Text","content":"World"}"#,
        )
        .unwrap();

        unsafe {
            let result = minimact_reconcile(old.as_ptr(), new.as_ptr());
            assert!(!result.is_null());
            let json = CStr::from_ptr(result).to_str().unwrap();
            let value: serde_json::Value = serde_json::from_str(json).unwrap();
            assert_eq!(value["ok"], true);
            assert_eq!(value["data"][0]["type"], "UpdateText");
            assert_eq!(value["data"][0]["content"], "World");
            minimact_free_string(result);
        }
    }

    #[test]
    fn test_learn_then_predict_over_ffi() {
        let handle = minimact_predictor_new();

        let state_change = CString::new(
            r#"{"component_id":"counter","state_key":"count","old_value":0,"new_value":1}"#,
        )
        .unwrap();
        let old_tree = CString::new(
            r#"{"type":"Element","tag":"div","props":{},"children":[{"type":"Text","content":"Count: 0"}]}"#,
        )
        .unwrap();
        let new_tree = CString::new(
            r#"{"type":"Element","tag":"div","props":{},"children":[{"type":"Text","content":"Count: 1"}]}"#,
        )
        .unwrap();

        unsafe {
            let learned = minimact_predictor_learn(
                handle,
                state_change.as_ptr(),
                old_tree.as_ptr(),
                new_tree.as_ptr(),
                std::ptr::null(),
                std::ptr::null(),
            );
            let json = CStr::from_ptr(learned).to_str().unwrap();
            let value: serde_json::Value = serde_json::from_str(json).unwrap();
            assert_eq!(value["ok"], true);
            minimact_free_string(learned);

            let next_change = CString::new(
                r#"{"component_id":"counter","state_key":"count","old_value":1,"new_value":2}"#,
            )
            .unwrap();
            let predicted =
                minimact_predictor_predict(handle, next_change.as_ptr(), std::ptr::null());
            let json = CStr::from_ptr(predicted).to_str().unwrap();
            let value: serde_json::Value = serde_json::from_str(json).unwrap();
            assert_eq!(value["ok"], true);
            assert_eq!(value["data"]["patches"][0]["content"], "Count: 2");
            minimact_free_string(predicted);
        }

        minimact_predictor_destroy(handle);
    }

    #[test]
    fn test_invalid_handle_is_reported() {
        let state_change = CString::new(
            r#"{"component_id":"x","state_key":"y","old_value":0,"new_value":1}"#,
        )
        .unwrap();
        unsafe {
            let result =
                minimact_predictor_predict(999_999, state_change.as_ptr(), std::ptr::null());
            let json = CStr::from_ptr(result).to_str().unwrap();
            let value: serde_json::Value = serde_json::from_str(json).unwrap();
            assert_eq!(value["ok"], false);
            minimact_free_string(result);
        }
    }
}
