use super::PlaneMetrics;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub plane: usize,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub errors_count: u64,
    pub trials_completed: u64,
    pub avg_latency_us: u64,
}

/// Registry of plane metrics, ordered by plane index
#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: BTreeMap<usize, Arc<PlaneMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, metrics: Arc<PlaneMetrics>) {
        self.metrics.insert(metrics.plane(), metrics);
    }

    /// Register a fresh counter set for `plane`, replacing any previous one
    pub fn plane(&mut self, plane: usize) -> Arc<PlaneMetrics> {
        let metrics = Arc::new(PlaneMetrics::new(plane));
        self.register(metrics.clone());
        metrics
    }

    pub fn clear(&mut self) {
        self.metrics.clear();
    }

    pub fn snapshot(&self) -> Vec<MetricsSnapshot> {
        self.metrics
            .values()
            .map(|m| MetricsSnapshot {
                plane: m.plane(),
                frames_processed: m.frames_processed(),
                frames_dropped: m.frames_dropped(),
                errors_count: m.errors_count(),
                trials_completed: m.trials_completed(),
                avg_latency_us: m.avg_latency_us(),
            })
            .collect()
    }

    pub fn get_plane_metrics(&self, plane: usize) -> Option<Arc<PlaneMetrics>> {
        self.metrics.get(&plane).cloned()
    }
}
