use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters for one plane worker, shared between the worker thread and the controller
pub struct PlaneMetrics {
    plane: usize,
    frames_processed: AtomicU64,
    frames_dropped: AtomicU64,
    errors_count: AtomicU64,
    trials_completed: AtomicU64,
    total_latency_us: AtomicU64,
    latency_samples: AtomicU64,
}

impl PlaneMetrics {
    pub fn new(plane: usize) -> Self {
        Self {
            plane,
            frames_processed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            errors_count: AtomicU64::new(0),
            trials_completed: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
        }
    }

    pub fn plane(&self) -> usize {
        self.plane
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn errors_count(&self) -> u64 {
        self.errors_count.load(Ordering::Relaxed)
    }

    pub fn trials_completed(&self) -> u64 {
        self.trials_completed.load(Ordering::Relaxed)
    }

    pub fn record_frame_processed(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Frame discarded without reaching the estimator (session aborted)
    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trial(&self) {
        self.trials_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn start_processing(&self) -> Instant {
        Instant::now()
    }

    pub fn finish_processing(&self, start: Instant) {
        let latency_us = start.elapsed().as_micros() as u64;
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_us(&self) -> u64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0;
        }
        self.total_latency_us.load(Ordering::Relaxed) / samples
    }
}
