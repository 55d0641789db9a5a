//! Transfer rate and remaining-time estimation
//!
//! Only samples from the last couple of seconds are considered, so the
//! estimate follows speed changes quickly.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::constants::progress;

/// Remaining-time estimator for a single transfer
#[derive(Debug, Clone)]
pub struct EtaEstimator {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl EtaEstimator {
    pub fn new() -> Self {
        Self::with_window(progress::ETA_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Record the byte count observed at `now`
    pub fn add_sample(&mut self, bytes_downloaded: u64, now: Instant) {
        self.prune(now);
        if let Some(last) = self.samples.back_mut() {
            if last.0 == now {
                last.1 = bytes_downloaded;
                return;
            }
        }
        self.samples.push_back((now, bytes_downloaded));
    }

    /// Mean of the per-interval rates in the window, in bytes per second
    pub fn bytes_per_second(&self) -> Option<f64> {
        let rates: Vec<f64> = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .filter_map(|(earlier, later)| {
                let took = later.0.duration_since(earlier.0).as_secs_f64();
                let downloaded = later.1.saturating_sub(earlier.1);
                (took > 0.0 && downloaded > 0).then(|| downloaded as f64 / took)
            })
            .collect();

        if rates.is_empty() {
            None
        } else {
            Some(rates.iter().sum::<f64>() / rates.len() as f64)
        }
    }

    /// Time left to reach `total` bytes, `None` when it cannot be estimated
    pub fn remaining(&mut self, total: u64, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.samples.len() < 2 || total == 0 {
            return None;
        }
        let (latest_time, latest_bytes) = *self.samples.back()?;
        let rate = self.bytes_per_second()?;

        let remaining_bytes = total.saturating_sub(latest_bytes) as f64;
        let since_latest = now.duration_since(latest_time).as_secs_f64();
        let seconds = remaining_bytes / rate - since_latest;
        Some(Duration::from_secs_f64(seconds.max(0.0)))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    fn prune(&mut self, now: Instant) {
        while let Some((time, _)) = self.samples.front() {
            if *time + self.window > now {
                break;
            }
            self.samples.pop_front();
        }
    }
}

impl Default for EtaEstimator {
    fn default() -> Self {
        Self::new()
    }
}
