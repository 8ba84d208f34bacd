use super::{MetricsCollector, MetricsSnapshot};

/// End-of-session summary: what every plane fitted, checked against the
/// trials the controller queued.
pub struct SessionMonitor<'a> {
    collector: &'a MetricsCollector,
    trial_lengths: &'a [usize],
}

impl<'a> SessionMonitor<'a> {
    pub fn new(collector: &'a MetricsCollector, trial_lengths: &'a [usize]) -> Self {
        Self {
            collector,
            trial_lengths,
        }
    }

    /// Frames per plane the queued trials account for
    pub fn queued_frames(&self) -> u64 {
        self.trial_lengths.iter().sum::<usize>() as u64
    }

    /// Planes that closed fewer trials or fitted fewer frames than were queued
    pub fn lagging_planes(&self) -> Vec<usize> {
        self.collector
            .snapshot()
            .iter()
            .filter(|m| self.is_lagging(m))
            .map(|m| m.plane)
            .collect()
    }

    fn is_lagging(&self, m: &MetricsSnapshot) -> bool {
        m.trials_completed < self.trial_lengths.len() as u64
            || m.frames_processed + m.errors_count + m.frames_dropped < self.queued_frames()
    }

    pub fn generate_report(&self) -> String {
        let snapshot = self.collector.snapshot();
        if snapshot.is_empty() {
            return "No planes registered".to_string();
        }

        let trials = self.trial_lengths.len();
        let queued = self.queued_frames();
        let mut report = match (self.trial_lengths.iter().min(), self.trial_lengths.iter().max()) {
            (Some(min), Some(max)) => format!(
                "Session summary: {} trial{}, {} frames per plane (trial lengths {}..={})\n",
                trials,
                if trials == 1 { "" } else { "s" },
                queued,
                min,
                max
            ),
            _ => "Session summary: no trials queued\n".to_string(),
        };

        for m in &snapshot {
            report.push_str(&format!(
                "  plane {}: {}/{} frames fitted, {} dropped, {} error{}, {}/{} trials, {:.2} ms/frame{}\n",
                m.plane,
                m.frames_processed,
                queued,
                m.frames_dropped,
                m.errors_count,
                if m.errors_count == 1 { "" } else { "s" },
                m.trials_completed,
                trials,
                m.avg_latency_us as f64 / 1000.0,
                if self.is_lagging(m) { "  [behind]" } else { "" }
            ));
        }

        report
    }
}
