//! Global metric counters.
//!
//! Atomics only on the hot paths; the host pulls a JSON snapshot over FFI.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct Metrics {
    // Reconciliation
    pub reconcile_calls: AtomicU64,
    pub reconcile_errors: AtomicU64,
    pub total_patches_generated: AtomicU64,
    pub reconcile_total_time_us: AtomicU64,

    // Predictor
    pub predictor_learns: AtomicU64,
    pub predictor_learn_errors: AtomicU64,
    pub predictor_predictions: AtomicU64,
    pub predictor_prediction_hits: AtomicU64,
    pub predictor_prediction_misses: AtomicU64,
    pub predictor_total_time_us: AtomicU64,

    // Templates
    pub template_extractions: AtomicU64,
    pub templates_stored: AtomicU64,
    pub template_demotions: AtomicU64,
    pub unresolved_bindings: AtomicU64,

    // Path adjustment
    pub invisible_path_drops: AtomicU64,

    // Simulator
    pub simulations_run: AtomicU64,
    pub simulated_combinations: AtomicU64,
    pub simulation_total_time_us: AtomicU64,

    // Validation
    pub validation_failures: AtomicU64,
    pub patches_validated: AtomicU64,
    pub patch_validation_failures: AtomicU64,

    start_time: Instant,

    // Recent operation timings (circular buffers)
    recent_reconcile_times: Mutex<Vec<u64>>,
    recent_prediction_times: Mutex<Vec<u64>>,
    max_recent_samples: usize,
}

lazy_static::lazy_static! {
    pub static ref METRICS: Metrics = Metrics::new();
}

impl Metrics {
    fn new() -> Self {
        Self {
            reconcile_calls: AtomicU64::new(0),
            reconcile_errors: AtomicU64::new(0),
            total_patches_generated: AtomicU64::new(0),
            reconcile_total_time_us: AtomicU64::new(0),

            predictor_learns: AtomicU64::new(0),
            predictor_learn_errors: AtomicU64::new(0),
            predictor_predictions: AtomicU64::new(0),
            predictor_prediction_hits: AtomicU64::new(0),
            predictor_prediction_misses: AtomicU64::new(0),
            predictor_total_time_us: AtomicU64::new(0),

            template_extractions: AtomicU64::new(0),
            templates_stored: AtomicU64::new(0),
            template_demotions: AtomicU64::new(0),
            unresolved_bindings: AtomicU64::new(0),

            invisible_path_drops: AtomicU64::new(0),

            simulations_run: AtomicU64::new(0),
            simulated_combinations: AtomicU64::new(0),
            simulation_total_time_us: AtomicU64::new(0),

            validation_failures: AtomicU64::new(0),
            patches_validated: AtomicU64::new(0),
            patch_validation_failures: AtomicU64::new(0),

            start_time: Instant::now(),

            recent_reconcile_times: Mutex::new(Vec::new()),
            recent_prediction_times: Mutex::new(Vec::new()),
            max_recent_samples: 1000,
        }
    }

    fn push_sample(&self, samples: &Mutex<Vec<u64>>, micros: u64) {
        let mut times = match samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if times.len() >= self.max_recent_samples {
            times.remove(0);
        }
        times.push(micros);
    }

    pub fn record_reconcile(&self, duration: Duration, patch_count: usize, error: bool) {
        self.reconcile_calls.fetch_add(1, Ordering::Relaxed);
        if error {
            self.reconcile_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_patches_generated
                .fetch_add(patch_count as u64, Ordering::Relaxed);
        }

        let micros = duration.as_micros() as u64;
        self.reconcile_total_time_us.fetch_add(micros, Ordering::Relaxed);
        self.push_sample(&self.recent_reconcile_times, micros);
    }

    pub fn record_learn(&self, error: bool) {
        self.predictor_learns.fetch_add(1, Ordering::Relaxed);
        if error {
            self.predictor_learn_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_prediction(&self, duration: Duration, hit: bool) {
        self.predictor_predictions.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.predictor_prediction_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.predictor_prediction_misses.fetch_add(1, Ordering::Relaxed);
        }

        let micros = duration.as_micros() as u64;
        self.predictor_total_time_us.fetch_add(micros, Ordering::Relaxed);
        self.push_sample(&self.recent_prediction_times, micros);
    }

    pub fn record_template_extraction(&self) {
        self.template_extractions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_template_stored(&self) {
        self.templates_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_template_demotion(&self) {
        self.template_demotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unresolved_binding(&self) {
        self.unresolved_bindings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invisible_drop(&self) {
        self.invisible_path_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_simulation(&self, duration: Duration, combinations: u64) {
        self.simulations_run.fetch_add(1, Ordering::Relaxed);
        self.simulated_combinations
            .fetch_add(combinations, Ordering::Relaxed);
        self.simulation_total_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_patch_validation(&self, success: bool) {
        self.patches_validated.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.patch_validation_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (avg_reconcile_us, p95_reconcile_us) = summarize(&self.recent_reconcile_times);
        let (avg_prediction_us, p95_prediction_us) = summarize(&self.recent_prediction_times);

        let total_predictions = self.predictor_predictions.load(Ordering::Relaxed);
        let hit_rate = if total_predictions > 0 {
            self.predictor_prediction_hits.load(Ordering::Relaxed) as f64
                / total_predictions as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),

            reconcile_calls: self.reconcile_calls.load(Ordering::Relaxed),
            reconcile_errors: self.reconcile_errors.load(Ordering::Relaxed),
            total_patches_generated: self.total_patches_generated.load(Ordering::Relaxed),
            avg_reconcile_time_us: avg_reconcile_us,
            p95_reconcile_time_us: p95_reconcile_us,

            predictor_learns: self.predictor_learns.load(Ordering::Relaxed),
            predictor_learn_errors: self.predictor_learn_errors.load(Ordering::Relaxed),
            predictor_predictions: total_predictions,
            predictor_prediction_hits: self.predictor_prediction_hits.load(Ordering::Relaxed),
            predictor_prediction_misses: self.predictor_prediction_misses.load(Ordering::Relaxed),
            prediction_hit_rate: hit_rate,
            avg_prediction_time_us: avg_prediction_us,
            p95_prediction_time_us: p95_prediction_us,

            template_extractions: self.template_extractions.load(Ordering::Relaxed),
            templates_stored: self.templates_stored.load(Ordering::Relaxed),
            template_demotions: self.template_demotions.load(Ordering::Relaxed),
            unresolved_bindings: self.unresolved_bindings.load(Ordering::Relaxed),

            invisible_path_drops: self.invisible_path_drops.load(Ordering::Relaxed),

            simulations_run: self.simulations_run.load(Ordering::Relaxed),
            simulated_combinations: self.simulated_combinations.load(Ordering::Relaxed),

            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            patches_validated: self.patches_validated.load(Ordering::Relaxed),
            patch_validation_failures: self.patch_validation_failures.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.reconcile_calls.store(0, Ordering::Relaxed);
        self.reconcile_errors.store(0, Ordering::Relaxed);
        self.total_patches_generated.store(0, Ordering::Relaxed);
        self.reconcile_total_time_us.store(0, Ordering::Relaxed);

        self.predictor_learns.store(0, Ordering::Relaxed);
        self.predictor_learn_errors.store(0, Ordering::Relaxed);
        self.predictor_predictions.store(0, Ordering::Relaxed);
        self.predictor_prediction_hits.store(0, Ordering::Relaxed);
        self.predictor_prediction_misses.store(0, Ordering::Relaxed);
        self.predictor_total_time_us.store(0, Ordering::Relaxed);

        self.template_extractions.store(0, Ordering::Relaxed);
        self.templates_stored.store(0, Ordering::Relaxed);
        self.template_demotions.store(0, Ordering::Relaxed);
        self.unresolved_bindings.store(0, Ordering::Relaxed);

        self.invisible_path_drops.store(0, Ordering::Relaxed);

        self.simulations_run.store(0, Ordering::Relaxed);
        self.simulated_combinations.store(0, Ordering::Relaxed);
        self.simulation_total_time_us.store(0, Ordering::Relaxed);

        self.validation_failures.store(0, Ordering::Relaxed);
        self.patches_validated.store(0, Ordering::Relaxed);
        self.patch_validation_failures.store(0, Ordering::Relaxed);

        if let Ok(mut times) = self.recent_reconcile_times.lock() {
            times.clear();
        }
        if let Ok(mut times) = self.recent_prediction_times.lock() {
            times.clear();
        }
    }
}

fn summarize(samples: &Mutex<Vec<u64>>) -> (u64, u64) {
    let times = match samples.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if times.is_empty() {
        return (0, 0);
    }
    let avg = times.iter().sum::<u64>() / times.len() as u64;
    (avg, percentile(&times, 0.95))
}

/// Calculate a percentile from unsorted samples.
fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let index = ((sorted.len() as f64) * p) as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,

    // Reconciliation
    pub reconcile_calls: u64,
    pub reconcile_errors: u64,
    pub total_patches_generated: u64,
    pub avg_reconcile_time_us: u64,
    pub p95_reconcile_time_us: u64,

    // Prediction
    pub predictor_learns: u64,
    pub predictor_learn_errors: u64,
    pub predictor_predictions: u64,
    pub predictor_prediction_hits: u64,
    pub predictor_prediction_misses: u64,
    pub prediction_hit_rate: f64,
    pub avg_prediction_time_us: u64,
    pub p95_prediction_time_us: u64,

    // Templates
    pub template_extractions: u64,
    pub templates_stored: u64,
    pub template_demotions: u64,
    pub unresolved_bindings: u64,

    // Path adjustment
    pub invisible_path_drops: u64,

    // Simulator
    pub simulations_run: u64,
    pub simulated_combinations: u64,

    // Validation
    pub validation_failures: u64,
    pub patches_validated: u64,
    pub patch_validation_failures: u64,
}

/// FFI accessors.
///
/// # Safety
/// The returned pointer must be freed with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_metrics_get() -> *mut std::os::raw::c_char {
    use std::ffi::CString;

    let snapshot = METRICS.snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => CString::new(json)
            .map(|s| s.into_raw())
            .unwrap_or(std::ptr::null_mut()),
        Err(_) => std::ptr::null_mut(),
    }
}

#[no_mangle]
pub extern "C" fn minimact_metrics_reset() {
    METRICS.reset();
}
