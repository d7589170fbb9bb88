use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// How long a transfer sample contributes to the estimate.
const SAMPLE_WINDOW: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
struct Sample {
    bytes: u64,
    elapsed: Duration,
    at: Instant,
}

/// Windowed throughput estimator fed by completed transfers.
///
/// Thread-safe; the HTTP client records into it from request paths while
/// sessions read the estimate from their own tasks.
#[derive(Debug, Default)]
pub struct BandwidthEstimator {
    samples: Mutex<Vec<Sample>>,
}

impl BandwidthEstimator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed transfer.
    pub fn record(&self, bytes: u64, elapsed: Duration) {
        if elapsed.is_zero() {
            return;
        }
        let mut samples = self.samples.lock();
        samples.push(Sample {
            bytes,
            elapsed,
            at: Instant::now(),
        });
        let cutoff = Instant::now() - SAMPLE_WINDOW;
        samples.retain(|s| s.at > cutoff);
    }

    /// Estimated throughput in bits per second over the sample window.
    #[must_use]
    pub fn estimate_bps(&self) -> Option<u64> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }

        let total_bytes: u64 = samples.iter().map(|s| s.bytes).sum();
        let total_secs: f64 = samples.iter().map(|s| s.elapsed.as_secs_f64()).sum();
        if total_secs <= 0.0 {
            return None;
        }

        Some((total_bytes as f64 * 8.0 / total_secs) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_estimate_without_samples() {
        let estimator = BandwidthEstimator::new();
        assert_eq!(estimator.estimate_bps(), None);
    }

    #[test]
    fn estimate_is_bits_per_second() {
        let estimator = BandwidthEstimator::new();
        // 1 MB in one second = 8 Mbit/s.
        estimator.record(1_000_000, Duration::from_secs(1));
        assert_eq!(estimator.estimate_bps(), Some(8_000_000));
    }

    #[test]
    fn estimate_aggregates_samples() {
        let estimator = BandwidthEstimator::new();
        estimator.record(500_000, Duration::from_millis(500));
        estimator.record(500_000, Duration::from_millis(500));
        assert_eq!(estimator.estimate_bps(), Some(8_000_000));
    }
}
