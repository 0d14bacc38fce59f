use std::time::Duration;

/// Timing statistics for one bounded measurement run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    /// Shortest observed round trip
    pub min: Duration,
    /// Longest observed round trip
    pub max: Duration,
    /// Mean round trip
    pub avg: Duration,
    /// Population standard deviation of the round trips
    pub stddev: Duration,
    /// Test packets sent
    pub sent: u32,
    /// Reflected packets received
    pub received: u32,
    /// Packets lost during the run
    pub loss: f64,
}

impl RunStatistics {
    /// Aggregates round-trip samples into run statistics.
    ///
    /// Returns `None` when no reply was received at all; a run with zero
    /// samples has no meaningful timing to report.
    pub fn from_samples(samples: &[Duration], sent: u32) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let min = samples.iter().min().copied().unwrap_or_default();
        let max = samples.iter().max().copied().unwrap_or_default();

        let secs: Vec<f64> = samples.iter().map(Duration::as_secs_f64).collect();
        let mean = secs.iter().sum::<f64>() / secs.len() as f64;
        let variance = secs.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / secs.len() as f64;

        let received = samples.len() as u32;
        Some(Self {
            min,
            max,
            avg: Duration::from_secs_f64(mean),
            stddev: Duration::from_secs_f64(variance.sqrt()),
            sent,
            received,
            loss: f64::from(sent.saturating_sub(received)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_aggregates_simple_run() {
        let stats = RunStatistics::from_samples(&[ms(2), ms(4), ms(6)], 3).unwrap();

        assert_eq!(stats.min, ms(2));
        assert_eq!(stats.max, ms(6));
        assert_eq!(stats.avg, ms(4));
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.received, 3);
        assert_eq!(stats.loss, 0.0);

        // population stddev of {2, 4, 6} ms is sqrt(8/3) ms
        let expected = (8.0f64 / 3.0).sqrt() / 1000.0;
        assert!((stats.stddev.as_secs_f64() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_counts_lost_packets() {
        let stats = RunStatistics::from_samples(&[ms(5)], 3).unwrap();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.loss, 2.0);
    }

    #[test]
    fn test_empty_run_yields_nothing() {
        assert!(RunStatistics::from_samples(&[], 3).is_none());
    }

    #[test]
    fn test_single_sample_has_zero_spread() {
        let stats = RunStatistics::from_samples(&[ms(7)], 1).unwrap();
        assert_eq!(stats.min, stats.max);
        assert_eq!(stats.stddev, Duration::ZERO);
    }
}
