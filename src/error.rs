use thiserror::Error;

/// Error taxonomy for the reconciliation and prediction engine.
///
/// Everything here is a local recovery for the host: the engine never panics
/// across `learn`/`predict` boundaries, and materialization failures decline
/// instead of surfacing.
#[derive(Debug, Error)]
pub enum MinimactError {
    /// Structurally malformed VNode input.
    #[error("Invalid VNode: {0}")]
    InvalidVNode(String),

    /// Patch path out of bounds for the target tree.
    #[error("Invalid patch path: {path:?}")]
    InvalidPatchPath { path: Vec<usize> },

    /// A VNode-space walk descended through a null conditional slot.
    #[error("Path {path:?} traverses a null conditional slot")]
    NullSlotTraversal { path: Vec<usize> },

    /// Patch kind does not match the node it targets.
    #[error("Patch type mismatch: expected {expected}, found {found}")]
    PatchTypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Template structure violates its own invariants.
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// Condition expression uses tokens outside the restricted grammar
    /// (identifiers, `!`, `&&`, `||`, parentheses).
    #[error("Unsupported condition expression '{expression}': {reason}")]
    UnsupportedExpression { expression: String, reason: String },

    /// A template binding refers to a state key missing from the snapshot.
    #[error("Unresolved binding '{binding}'")]
    UnresolvedBinding { binding: String },

    /// Malformed hex element identifier.
    #[error("Invalid hex path '{0}'")]
    InvalidHexPath(String),

    /// Invalid predictor handle passed over FFI.
    #[error("Invalid predictor handle: {0}")]
    InvalidHandle(usize),

    /// Tree exceeds the configured depth limit.
    #[error("Tree too deep: {depth} levels exceeds max {max}")]
    TreeTooDeep { depth: usize, max: usize },

    /// Tree exceeds the configured node-count limit.
    #[error("Tree too large: {nodes} nodes exceeds max {max}")]
    TreeTooLarge { nodes: usize, max: usize },

    /// Element exceeds the configured children limit.
    #[error("Too many children: {count} exceeds max {max}")]
    TooManyChildren { count: usize, max: usize },

    /// Property key or value exceeds the configured length limit.
    #[error("Property '{name}' too long: {length} bytes > {max} bytes")]
    PropertyTooLong {
        name: String,
        length: usize,
        max: usize,
    },

    /// Text content exceeds the configured length limit.
    #[error("Text too long: {length} bytes > {max} bytes")]
    TextTooLong { length: usize, max: usize },

    /// Serialized input exceeds the configured size limit.
    #[error("JSON too large: {size} bytes > {max} bytes")]
    JsonTooLarge { size: usize, max: usize },

    /// JSON parsing/serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key referenced by a reorder operation is absent.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Invalid UTF-8 in a C string.
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Null pointer passed across the FFI boundary.
    #[error("Null pointer: {0}")]
    NullPointer(&'static str),
}

impl From<serde_json::Error> for MinimactError {
    fn from(err: serde_json::Error) -> Self {
        MinimactError::Serialization(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, MinimactError>;

/// Error codes for FFI.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    InvalidVNode = 1,
    InvalidPath = 2,
    NullSlotTraversal = 3,
    PatchTypeMismatch = 4,
    InvalidTemplate = 5,
    UnsupportedExpression = 6,
    UnresolvedBinding = 7,
    InvalidHexPath = 8,
    InvalidHandle = 9,
    TreeTooDeep = 10,
    TreeTooLarge = 11,
    TooManyChildren = 12,
    PropertyTooLong = 13,
    TextTooLong = 14,
    JsonTooLarge = 15,
    Serialization = 16,
    KeyNotFound = 17,
    InvalidUtf8 = 18,
    NullPointer = 19,
    Unknown = 999,
}

impl From<&MinimactError> for ErrorCode {
    fn from(err: &MinimactError) -> Self {
        match err {
            MinimactError::InvalidVNode(_) => ErrorCode::InvalidVNode,
            MinimactError::InvalidPatchPath { .. } => ErrorCode::InvalidPath,
            MinimactError::NullSlotTraversal { .. } => ErrorCode::NullSlotTraversal,
            MinimactError::PatchTypeMismatch { .. } => ErrorCode::PatchTypeMismatch,
            MinimactError::InvalidTemplate(_) => ErrorCode::InvalidTemplate,
            MinimactError::UnsupportedExpression { .. } => ErrorCode::UnsupportedExpression,
            MinimactError::UnresolvedBinding { .. } => ErrorCode::UnresolvedBinding,
            MinimactError::InvalidHexPath(_) => ErrorCode::InvalidHexPath,
            MinimactError::InvalidHandle(_) => ErrorCode::InvalidHandle,
            MinimactError::TreeTooDeep { .. } => ErrorCode::TreeTooDeep,
            MinimactError::TreeTooLarge { .. } => ErrorCode::TreeTooLarge,
            MinimactError::TooManyChildren { .. } => ErrorCode::TooManyChildren,
            MinimactError::PropertyTooLong { .. } => ErrorCode::PropertyTooLong,
            MinimactError::TextTooLong { .. } => ErrorCode::TextTooLong,
            MinimactError::JsonTooLarge { .. } => ErrorCode::JsonTooLarge,
            MinimactError::Serialization(_) => ErrorCode::Serialization,
            MinimactError::KeyNotFound(_) => ErrorCode::KeyNotFound,
            MinimactError::InvalidUtf8(_) => ErrorCode::InvalidUtf8,
            MinimactError::NullPointer(_) => ErrorCode::NullPointer,
        }
    }
}

/// FFI-safe error result.
#[repr(C)]
pub struct FfiResult {
    pub code: i32,
    pub message: *mut std::os::raw::c_char,
}

impl FfiResult {
    pub fn success() -> Self {
        Self {
            code: ErrorCode::Success as i32,
            message: std::ptr::null_mut(),
        }
    }

    pub fn error(err: &MinimactError) -> Self {
        use std::ffi::CString;

        let code = ErrorCode::from(err) as i32;
        let message = CString::new(err.to_string())
            .unwrap_or_else(|_| CString::new("Error creating error message").unwrap())
            .into_raw();

        Self { code, message }
    }

    pub fn error_str(msg: &str) -> Self {
        use std::ffi::CString;

        let message = CString::new(msg)
            .unwrap_or_else(|_| CString::new("Error creating error message").unwrap())
            .into_raw();

        Self {
            code: ErrorCode::Unknown as i32,
            message,
        }
    }
}
