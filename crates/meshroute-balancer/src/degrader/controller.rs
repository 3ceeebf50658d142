use std::time::Instant;

use meshroute_metrics::{CallStats, CallStatsError};

use super::config::DegraderSettings;

/// Health phase of a tracked host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegraderPhase {
    /// Full weight
    Healthy,
    /// Shedding weight after unhealthy intervals
    Degrading,
    /// Slow start back towards full weight
    Recovering,
}

/// Outcome of an interval that moved the weight or the phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightChange {
    pub from: f64,
    pub to: f64,
    pub phase: DegraderPhase,
}

impl WeightChange {
    pub fn is_decrease(&self) -> bool {
        self.to < self.from
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    High,
    Low,
    Insufficient,
}

/// Weight multiplier control loop for one (host, service) pair.
///
/// Each call to [`update`](Self::update) consumes one interval of call
/// statistics. The weight never leaves `[floor, 1.0]` and moves at most one
/// step per interval.
#[derive(Debug, Clone)]
pub struct DegraderController {
    settings: DegraderSettings,
    weight: f64,
    phase: DegraderPhase,
    floor_since: Option<Instant>,
}

impl DegraderController {
    /// A controller for a host taking full traffic.
    pub fn new(settings: DegraderSettings) -> Self {
        Self {
            settings,
            weight: 1.0,
            phase: DegraderPhase::Healthy,
            floor_since: None,
        }
    }

    /// A controller for a host joining a live partition: it slow-starts from
    /// the recovery level.
    pub fn recovering(settings: DegraderSettings) -> Self {
        let weight = settings.recovery_weight();
        let phase = if weight >= 1.0 {
            DegraderPhase::Healthy
        } else {
            DegraderPhase::Recovering
        };
        Self {
            settings,
            weight: weight.min(1.0),
            phase,
            floor_since: None,
        }
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn phase(&self) -> DegraderPhase {
        self.phase
    }

    pub fn settings(&self) -> &DegraderSettings {
        &self.settings
    }

    /// Replaces the thresholds, keeping the current weight inside the new
    /// bounds.
    pub fn set_settings(&mut self, settings: DegraderSettings, now: Instant) -> Option<WeightChange> {
        self.settings = settings;
        if self.weight < self.settings.floor {
            let from = self.weight;
            self.weight = self.settings.floor;
            self.track_floor(now);
            return Some(self.change(from));
        }
        self.track_floor(now);
        None
    }

    /// Consumes one interval of statistics. A statistics error counts as an
    /// interval without signal.
    pub fn update(&mut self, stats: Result<CallStats, CallStatsError>, now: Instant) -> Option<WeightChange> {
        let from = self.weight;
        let from_phase = self.phase;

        if self.stuck_at_floor(now) {
            self.weight = self.settings.recovery_weight().min(1.0);
            self.phase = DegraderPhase::Recovering;
            self.floor_since = None;
            self.track_floor(now);
            return Some(self.change(from));
        }

        let signal = match &stats {
            Ok(stats) => self.classify(stats),
            Err(_) => Signal::Insufficient,
        };
        let idle_recovery = self.phase == DegraderPhase::Recovering
            && matches!(&stats, Ok(stats) if stats.call_count == 0);

        match signal {
            Signal::High => self.step_down(),
            Signal::Low => self.step_up(),
            Signal::Insufficient if idle_recovery => self.step_up(),
            Signal::Insufficient => {}
        }

        self.track_floor(now);
        if self.weight != from || self.phase != from_phase {
            Some(self.change(from))
        } else {
            None
        }
    }

    fn classify(&self, stats: &CallStats) -> Signal {
        let settings = &self.settings;
        let latency = settings.latency_to_use.select(stats);
        let error_rate = stats.error_rate();

        if stats.call_count >= self.adjusted_min_calls(settings.min_calls_high)
            && (latency >= settings.high_latency_ms || error_rate >= settings.high_error_rate)
        {
            return Signal::High;
        }
        if stats.call_count >= self.adjusted_min_calls(settings.min_calls_low)
            && latency <= settings.low_latency_ms
            && error_rate <= settings.low_error_rate
        {
            return Signal::Low;
        }
        Signal::Insufficient
    }

    // A host at reduced weight receives proportionally fewer calls, so the
    // water marks shrink with it.
    fn adjusted_min_calls(&self, min_calls: u64) -> u64 {
        ((min_calls as f64 * self.weight).ceil() as u64).max(1)
    }

    fn step_down(&mut self) {
        let floor = self.settings.floor;
        if self.weight <= floor {
            self.weight = floor;
        } else {
            let step = self.settings.step_down * (1.0 - floor);
            self.weight = (self.weight - step).max(floor);
        }
        self.phase = DegraderPhase::Degrading;
    }

    fn step_up(&mut self) {
        let floor = self.settings.floor;
        if self.phase == DegraderPhase::Recovering {
            self.weight = if self.weight <= 0.0 {
                self.settings.recovery_weight()
            } else {
                self.weight * self.settings.ramp_factor
            };
        } else if self.weight <= floor && floor < 1.0 {
            self.weight = self.settings.recovery_weight();
            self.phase = DegraderPhase::Recovering;
        } else {
            self.weight += self.settings.step_up * (1.0 - floor);
        }

        if self.weight >= 1.0 {
            self.weight = 1.0;
            self.phase = DegraderPhase::Healthy;
        }
    }

    fn stuck_at_floor(&self, now: Instant) -> bool {
        match self.floor_since {
            Some(since) => now.saturating_duration_since(since) >= self.settings.max_drop_duration,
            None => false,
        }
    }

    fn track_floor(&mut self, now: Instant) {
        let at_floor = self.settings.floor < 1.0 && self.weight <= self.settings.floor;
        if !at_floor {
            self.floor_since = None;
        } else if self.floor_since.is_none() {
            self.floor_since = Some(now);
        }
    }

    fn change(&self, from: f64) -> WeightChange {
        WeightChange {
            from,
            to: self.weight,
            phase: self.phase,
        }
    }
}
