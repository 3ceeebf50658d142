use std::sync::atomic::{AtomicU64, Ordering};

use crate::stats::LatencySummary;

/// Decades covered by the histogram: 1µs up to 100s.
const NUM_DECADES: usize = 8;
/// Leading digits 1..=9 within a decade.
const BINS_PER_DECADE: usize = 9;
/// Bin 0 holds zero-latency samples.
const NUM_HISTOGRAM_BINS: usize = 1 + NUM_DECADES * BINS_PER_DECADE;

/// Lock-free log-linear latency histogram.
///
/// Each decade is split by leading digit, so any sample lands in a bin no
/// wider than 10% of its value. Samples above the last decade saturate into
/// the final bin. The exact sum and maximum are tracked next to the bins so
/// averages are exact and estimates never exceed the largest sample.
#[derive(Debug)]
pub(crate) struct LatencyHistogram {
    bins: [AtomicU64; NUM_HISTOGRAM_BINS],
    total_latency_us: AtomicU64,
    sample_count: AtomicU64,
    max_latency_us: AtomicU64,
}

impl LatencyHistogram {
    pub(crate) fn new() -> Self {
        Self {
            bins: std::array::from_fn(|_| AtomicU64::new(0)),
            total_latency_us: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
            max_latency_us: AtomicU64::new(0),
        }
    }

    /// Records one latency sample in microseconds.
    pub(crate) fn record(&self, latency_us: u64) {
        let bin = Self::latency_to_bin(latency_us);
        self.bins[bin].fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
        self.max_latency_us.fetch_max(latency_us, Ordering::Relaxed);
    }

    /// Resets the histogram and summarizes what it held.
    ///
    /// A sample recorded concurrently with the drain is counted in exactly
    /// one of the two intervals, though its bin and sum may straddle them.
    pub(crate) fn drain(&self) -> LatencySummary {
        let counts: [u64; NUM_HISTOGRAM_BINS] =
            std::array::from_fn(|i| self.bins[i].swap(0, Ordering::Relaxed));
        let total = self.total_latency_us.swap(0, Ordering::Relaxed);
        let samples = self.sample_count.swap(0, Ordering::Relaxed);
        let max = self.max_latency_us.swap(0, Ordering::Relaxed);

        if samples == 0 {
            return LatencySummary::default();
        }

        let to_ms = |us: u64| us as f64 / 1000.0;
        LatencySummary {
            average_ms: total as f64 / samples as f64 / 1000.0,
            p50_ms: to_ms(Self::estimate_percentile(&counts, 50.0, max)),
            p90_ms: to_ms(Self::estimate_percentile(&counts, 90.0, max)),
            p95_ms: to_ms(Self::estimate_percentile(&counts, 95.0, max)),
            p99_ms: to_ms(Self::estimate_percentile(&counts, 99.0, max)),
        }
    }

    fn latency_to_bin(latency_us: u64) -> usize {
        if latency_us == 0 {
            return 0;
        }
        let decade = (latency_us.ilog10() as usize).min(NUM_DECADES - 1);
        let leading = (latency_us / 10u64.pow(decade as u32)).clamp(1, 9) as usize;
        1 + decade * BINS_PER_DECADE + (leading - 1)
    }

    /// Lower and upper bound of a bin, in microseconds.
    fn bin_bounds(bin: usize) -> (u64, u64) {
        if bin == 0 {
            return (0, 1);
        }
        let decade = (bin - 1) / BINS_PER_DECADE;
        let leading = ((bin - 1) % BINS_PER_DECADE + 1) as u64;
        let unit = 10u64.pow(decade as u32);
        (leading * unit, (leading + 1) * unit)
    }

    /// Interpolates the value at `percentile` within the bin that holds it.
    fn estimate_percentile(counts: &[u64; NUM_HISTOGRAM_BINS], percentile: f64, max: u64) -> u64 {
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return 0;
        }

        let target = ((total as f64 * percentile / 100.0).ceil() as u64).clamp(1, total);
        let mut cumulative = 0;

        for (bin, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            if cumulative + count >= target {
                let (start, end) = Self::bin_bounds(bin);
                let fraction = (target - cumulative) as f64 / count as f64;
                let estimate = start as f64 + fraction * (end - start) as f64;
                return (estimate as u64).min(max);
            }
            cumulative += count;
        }

        max
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}
