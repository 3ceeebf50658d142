use meshroute_metrics::CallStats;

use super::config::DegraderSettings;

/// Calls and latency reported by every host of a service during one
/// interval.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClusterWindow {
    pub call_count: u64,
    latency_sum_ms: f64,
}

impl ClusterWindow {
    /// Adds one host's interval.
    pub fn record(&mut self, stats: &CallStats) {
        self.call_count += stats.call_count;
        self.latency_sum_ms += stats.latency.average_ms * stats.call_count as f64;
    }

    /// Call-weighted average latency, `None` for an idle window.
    pub fn average_latency_ms(&self) -> Option<f64> {
        (self.call_count > 0).then(|| self.latency_sum_ms / self.call_count as f64)
    }
}

/// Cluster-wide call dropping.
///
/// Host weights only move traffic between hosts. When the whole cluster is
/// slow, this controller sheds a growing fraction of calls instead: one step
/// up per interval while the average latency sits at or above the high water
/// mark, one step down once it falls to the low water mark. Windows with
/// too few calls to judge only ever lower the drop rate.
#[derive(Debug, Clone)]
pub struct ClusterDropController {
    settings: DegraderSettings,
    drop_rate: f64,
}

impl ClusterDropController {
    pub fn new(settings: DegraderSettings) -> Self {
        Self {
            settings,
            drop_rate: 0.0,
        }
    }

    pub fn drop_rate(&self) -> f64 {
        self.drop_rate
    }

    pub fn settings(&self) -> &DegraderSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: DegraderSettings) {
        self.drop_rate = self.drop_rate.min(settings.max_drop_rate());
        self.settings = settings;
    }

    /// Consumes one interval. Returns the previous rate when it changed.
    pub fn update(&mut self, window: &ClusterWindow) -> Option<f64> {
        let from = self.drop_rate;
        let settings = &self.settings;
        let shed = settings.step_down;
        let restore = settings.step_up;

        match window.average_latency_ms() {
            Some(latency) if window.call_count >= settings.min_calls_high => {
                if latency >= settings.high_water_mark_ms {
                    self.drop_rate = (self.drop_rate + shed).min(settings.max_drop_rate());
                } else if latency <= settings.low_water_mark_ms {
                    self.drop_rate = (self.drop_rate - restore).max(0.0);
                }
            }
            Some(latency) if window.call_count >= settings.min_calls_low => {
                if latency <= settings.low_water_mark_ms {
                    self.drop_rate = (self.drop_rate - restore).max(0.0);
                }
            }
            // Too little traffic to tell; let some through and look again.
            _ => self.drop_rate = (self.drop_rate - restore).max(0.0),
        }

        (self.drop_rate != from).then_some(from)
    }
}
