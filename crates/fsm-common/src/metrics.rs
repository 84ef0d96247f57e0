//! Execution metrics for the cycle driver.
//!
//! `advance` has to finish inside the cycle budget. The driver measures
//! each call and records it here, together with counters for the events a
//! supervisor cares about (transitions, override activations, fault raises).
//! Samples go into a preallocated ring buffer; recording never allocates.

use serde::Serialize;
use std::time::Duration;

/// Execution-time and event metrics for one or more controllers.
#[derive(Debug)]
pub struct CycleMetrics {
    /// Ring buffer of execution times in nanoseconds.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples collected (saturates at buffer size).
    sample_count: usize,
    /// Total cycles recorded.
    total_cycles: u64,
    /// Minimum observed execution time in nanoseconds.
    min_ns: u64,
    /// Maximum observed execution time in nanoseconds.
    max_ns: u64,
    /// Sum of all execution times for mean calculation.
    sum_ns: u64,
    /// Cycles whose execution exceeded the budget.
    overrun_count: u64,
    /// Cycle budget in nanoseconds.
    budget_ns: u64,
    /// Transitions fired.
    transitions: u64,
    /// Cycles in which a safety override forced the state.
    overrides: u64,
    /// Fault raises observed.
    fault_raises: u64,
}

impl CycleMetrics {
    /// Create a new metrics collector.
    ///
    /// # Arguments
    ///
    /// * `histogram_size` - Number of samples to retain in the ring buffer.
    /// * `budget` - Cycle budget; executions longer than this are overruns.
    #[must_use]
    pub fn new(histogram_size: usize, budget: Duration) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_cycles: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            overrun_count: 0,
            budget_ns: duration_ns(budget),
            transitions: 0,
            overrides: 0,
            fault_raises: 0,
        }
    }

    /// Record the execution time of one `advance` call.
    pub fn record(&mut self, duration: Duration) {
        let ns = duration_ns(duration);

        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_cycles += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.wrapping_add(ns);

        if ns > self.budget_ns {
            self.overrun_count += 1;
        }
    }

    /// Count a fired transition.
    pub fn note_transition(&mut self) {
        self.transitions += 1;
    }

    /// Count a cycle forced by a safety override.
    pub fn note_override(&mut self) {
        self.overrides += 1;
    }

    /// Count a fault raise.
    pub fn note_fault_raise(&mut self) {
        self.fault_raises += 1;
    }

    /// Get total number of cycles recorded.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Get minimum observed execution time.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_nanos(self.min_ns))
    }

    /// Get maximum observed execution time.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Get mean execution time.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.total_cycles > 0).then(|| Duration::from_nanos(self.sum_ns / self.total_cycles))
    }

    /// Get number of budget overruns.
    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    /// Compute a percentile (0.0 to 100.0) from the ring buffer.
    ///
    /// Returns `None` if no samples have been collected or if percentile is out of range.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        self.percentiles(&[percentile]).first().map(|&(_, d)| d)
    }

    /// Compute several percentiles with a single sort.
    ///
    /// Invalid percentiles (< 0, > 100, or NaN) are skipped.
    #[must_use]
    pub fn percentiles(&self, percentiles: &[f64]) -> Vec<(f64, Duration)> {
        if self.sample_count == 0 {
            return vec![];
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        percentiles
            .iter()
            .filter(|&&p| (0.0..=100.0).contains(&p))
            .map(|&p| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
                let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
                let idx = idx.min(sorted.len() - 1);
                (p, Duration::from_nanos(sorted[idx]))
            })
            .collect()
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let any = self.total_cycles > 0;
        MetricsSnapshot {
            total_cycles: self.total_cycles,
            min_ns: any.then_some(self.min_ns),
            max_ns: any.then_some(self.max_ns),
            mean_ns: any.then(|| self.sum_ns / self.total_cycles),
            overrun_count: self.overrun_count,
            sample_count: self.sample_count,
            transitions: self.transitions,
            overrides: self.overrides,
            fault_raises: self.fault_raises,
        }
    }

    /// Reset all metrics to initial state.
    pub fn reset(&mut self) {
        self.samples.fill(0);
        self.write_pos = 0;
        self.sample_count = 0;
        self.total_cycles = 0;
        self.min_ns = u64::MAX;
        self.max_ns = 0;
        self.sum_ns = 0;
        self.overrun_count = 0;
        self.transitions = 0;
        self.overrides = 0;
        self.fault_raises = 0;
    }
}

fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Immutable snapshot of metrics for reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    /// Total cycles recorded.
    pub total_cycles: u64,
    /// Minimum execution time in nanoseconds.
    pub min_ns: Option<u64>,
    /// Maximum execution time in nanoseconds.
    pub max_ns: Option<u64>,
    /// Mean execution time in nanoseconds.
    pub mean_ns: Option<u64>,
    /// Number of budget overruns.
    pub overrun_count: u64,
    /// Number of samples in the ring buffer.
    pub sample_count: usize,
    /// Transitions fired.
    pub transitions: u64,
    /// Cycles forced by a safety override.
    pub overrides: u64,
    /// Fault raises observed.
    pub fault_raises: u64,
}

impl MetricsSnapshot {
    /// Get jitter (max - min) in nanoseconds.
    #[must_use]
    pub fn jitter_ns(&self) -> Option<u64> {
        match (self.min_ns, self.max_ns) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}
