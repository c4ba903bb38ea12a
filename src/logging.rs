//! Reconciliation trace log.
//!
//! The engine runs embedded in a host process that owns stdout, so trace
//! events go to a bounded in-memory buffer the host drains over FFI. Every
//! event is tagged with the pipeline stage that produced it and, where one
//! exists, the subject it concerns (a pattern key, a hex element id, a patch
//! path), so the host can correlate a misprediction with the learn/predict
//! events that led to it without parsing message text.
//!
//! Disabled by default; enabling costs one atomic load per event site.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Severity of a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(C)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

/// Pipeline stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub enum Stage {
    /// Tree diffing.
    Reconcile = 0,
    /// VNode-space to DOM-space path adjustment.
    Adjust = 1,
    /// Conditional path simulation.
    Simulate = 2,
    /// Template extraction during `learn`.
    Extract = 3,
    /// Template lookup and materialization during `predict`.
    Predict = 4,
    /// Tree and patch validation.
    Validate = 5,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Reconcile => "reconcile",
            Stage::Adjust => "adjust",
            Stage::Simulate => "simulate",
            Stage::Extract => "extract",
            Stage::Predict => "predict",
            Stage::Validate => "validate",
        }
    }
}

/// One recorded event.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub level: LogLevel,
    pub stage: Stage,
    /// What the event is about: a pattern key, a hex element id, a patch
    /// path. Absent for stage-wide events.
    pub subject: Option<String>,
    pub message: String,
    pub timestamp: Instant,
}

/// Bounded trace buffer. Oldest events drop first at capacity.
pub struct TraceLog {
    enabled: AtomicBool,
    min_level: AtomicUsize,
    events: Mutex<Vec<TraceEvent>>,
    capacity: usize,
    start_time: Instant,
}

lazy_static::lazy_static! {
    pub static ref TRACE: TraceLog = TraceLog::new();
}

impl TraceLog {
    fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            min_level: AtomicUsize::new(LogLevel::Info as usize),
            events: Mutex::new(Vec::new()),
            capacity: 10_000,
            start_time: Instant::now(),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_level(&self, level: LogLevel) {
        self.min_level.store(level as usize, Ordering::SeqCst);
    }

    pub fn level(&self) -> LogLevel {
        match self.min_level.load(Ordering::SeqCst) {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    /// Record one event. Dropped silently when disabled or below the level.
    pub fn record(
        &self,
        level: LogLevel,
        stage: Stage,
        subject: Option<String>,
        message: String,
    ) {
        if !self.is_enabled() || level < self.level() {
            return;
        }

        let event = TraceEvent {
            level,
            stage,
            subject,
            message,
            timestamp: Instant::now(),
        };

        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if events.len() >= self.capacity {
            events.remove(0);
        }
        events.push(event);
    }

    /// Snapshot of the buffered events.
    pub fn events(&self) -> Vec<TraceEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Take every buffered event, leaving the buffer empty. The FFI drain
    /// uses this so the host never sees an event twice.
    pub fn drain(&self) -> Vec<TraceEvent> {
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *events)
    }

    pub fn clear(&self) {
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.clear();
    }

    /// Events as JSON records with stage and subject fields.
    pub fn to_json(&self, events: &[TraceEvent]) -> String {
        let formatted: Vec<serde_json::Value> = events
            .iter()
            .map(|e| {
                serde_json::json!({
                    "level": format!("{:?}", e.level),
                    "stage": e.stage.name(),
                    "subject": e.subject,
                    "message": &e.message,
                    "elapsed_ms": e.timestamp.duration_since(self.start_time).as_millis(),
                })
            })
            .collect();

        serde_json::to_string(&formatted).unwrap_or_else(|_| "[]".to_string())
    }
}

pub fn enable_trace() {
    TRACE.enable();
}

pub fn disable_trace() {
    TRACE.disable();
}

pub fn set_trace_level(level: LogLevel) {
    TRACE.set_level(level);
}

pub fn clear_trace() {
    TRACE.clear();
}

pub fn trace_events() -> Vec<TraceEvent> {
    TRACE.events()
}

pub fn trace_events_json() -> String {
    let events = TRACE.events();
    TRACE.to_json(&events)
}

/// Stage-wide events.
pub fn debug(stage: Stage, message: impl Into<String>) {
    TRACE.record(LogLevel::Debug, stage, None, message.into());
}

pub fn info(stage: Stage, message: impl Into<String>) {
    TRACE.record(LogLevel::Info, stage, None, message.into());
}

pub fn warn(stage: Stage, message: impl Into<String>) {
    TRACE.record(LogLevel::Warn, stage, None, message.into());
}

pub fn error(stage: Stage, message: impl Into<String>) {
    TRACE.record(LogLevel::Error, stage, None, message.into());
}

/// Subject-tagged events; `subject` is the pattern key, hex id, or path the
/// event concerns.
pub fn debug_for(stage: Stage, subject: impl Into<String>, message: impl Into<String>) {
    TRACE.record(LogLevel::Debug, stage, Some(subject.into()), message.into());
}

pub fn info_for(stage: Stage, subject: impl Into<String>, message: impl Into<String>) {
    TRACE.record(LogLevel::Info, stage, Some(subject.into()), message.into());
}

pub fn warn_for(stage: Stage, subject: impl Into<String>, message: impl Into<String>) {
    TRACE.record(LogLevel::Warn, stage, Some(subject.into()), message.into());
}

/// FFI control surface.
#[no_mangle]
pub extern "C" fn minimact_trace_enable() {
    enable_trace();
}

#[no_mangle]
pub extern "C" fn minimact_trace_disable() {
    disable_trace();
}

#[no_mangle]
pub extern "C" fn minimact_trace_set_level(level: u32) {
    let level = match level {
        0 => LogLevel::Trace,
        1 => LogLevel::Debug,
        2 => LogLevel::Info,
        3 => LogLevel::Warn,
        4 => LogLevel::Error,
        _ => LogLevel::Info,
    };
    set_trace_level(level);
}

/// Take and return all buffered events as JSON; the buffer is left empty.
///
/// # Safety
/// The returned pointer must be freed with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_trace_drain() -> *mut std::os::raw::c_char {
    use std::ffi::CString;

    let events = TRACE.drain();
    let json = TRACE.to_json(&events);
    CString::new(json)
        .unwrap_or_else(|_| CString::new("[]").unwrap_or_default())
        .into_raw()
}

#[no_mangle]
pub extern "C" fn minimact_trace_clear() {
    clear_trace();
}
