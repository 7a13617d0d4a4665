use std::collections::VecDeque;
use std::time::Instant;

/// Per-pool VarDiff tuning (spec §4.2). `target_time` is the desired seconds between shares
/// from one worker; `retarget_time` is the minimum interval between two retargets of the same
/// connection; `variance_percent` defines the dead band around `target_time` within which no
/// retarget happens.
#[derive(Debug, Clone, Copy)]
pub struct VarDiffConfig {
    pub min_diff: f64,
    pub max_diff: Option<f64>,
    pub target_time_secs: f64,
    pub retarget_time_secs: f64,
    pub variance_percent: f64,
}

impl VarDiffConfig {
    fn band(&self) -> (f64, f64) {
        let variance = self.target_time_secs * self.variance_percent / 100.0;
        (self.target_time_secs - variance, self.target_time_secs + variance)
    }

    fn clamp(&self, diff: f64, network_difficulty: f64) -> f64 {
        let max_diff = self.max_diff.unwrap_or_else(|| self.min_diff.max(network_difficulty));
        diff.clamp(self.min_diff, max_diff.max(self.min_diff))
    }
}

/// Per-connection VarDiff state: a capacity-10 circular buffer of inter-share intervals plus
/// the timestamp of the last retarget (spec §4.2).
pub struct VarDiffContext {
    config: VarDiffConfig,
    current_diff: f64,
    last_share_at: Option<Instant>,
    last_retarget_at: Instant,
    intervals: VecDeque<f64>,
}

const SAMPLE_CAPACITY: usize = 10;

impl VarDiffContext {
    pub fn new(config: VarDiffConfig, initial_diff: f64) -> Self {
        Self {
            config,
            current_diff: initial_diff.max(config.min_diff),
            last_share_at: None,
            last_retarget_at: Instant::now(),
            intervals: VecDeque::with_capacity(SAMPLE_CAPACITY),
        }
    }

    pub fn current_diff(&self) -> f64 {
        self.current_diff
    }

    /// Record one accepted share and return a new difficulty if a retarget is due, `None`
    /// otherwise. Per spec §4.2:
    /// 1. bail out on the very first share (nothing to measure an interval against yet),
    /// 2. average the buffered intervals *plus* the interval since the last share, over
    ///    `count(buffer) + 1` samples, before that interval is committed to the buffer,
    /// 3. bail out before `retarget_time_secs` has elapsed since the last retarget,
    /// 4. compare the average against the `[tMin, tMax]` band,
    /// 5. clamp the adjusted difficulty to `[minDiff, maxDiff]`,
    /// and finally push the new interval into the capacity-10 buffer.
    pub fn record_share(&mut self, network_difficulty: f64) -> Option<f64> {
        let now = Instant::now();
        let since_last = match self.last_share_at {
            Some(last) => now.duration_since(last).as_secs_f64(),
            None => {
                self.last_share_at = Some(now);
                return None;
            }
        };

        let result = self.maybe_retarget(now, since_last, network_difficulty);

        if self.intervals.len() == SAMPLE_CAPACITY {
            self.intervals.pop_front();
        }
        self.intervals.push_back(since_last);
        self.last_share_at = Some(now);

        result
    }

    /// Periodic, non-share-triggered VarDiff pass (spec §4.2 requires VarDiff run "on every
    /// share submission and periodically"), so a miner that stops submitting shares entirely
    /// still has their difficulty retargeted down. Uses the time elapsed since the last share
    /// as the pending interval but never commits it to the sample buffer — only an actual
    /// accepted share does that.
    pub fn record_tick(&mut self, network_difficulty: f64) -> Option<f64> {
        let now = Instant::now();
        let last_share_at = self.last_share_at?;
        let since_last = now.duration_since(last_share_at).as_secs_f64();
        self.maybe_retarget(now, since_last, network_difficulty)
    }

    fn maybe_retarget(&mut self, now: Instant, since_last: f64, network_difficulty: f64) -> Option<f64> {
        if now.duration_since(self.last_retarget_at).as_secs_f64() < self.config.retarget_time_secs {
            return None;
        }

        let avg = (self.intervals.iter().sum::<f64>() + since_last) / (self.intervals.len() + 1) as f64;
        let (t_min, t_max) = self.config.band();

        if avg >= t_min && avg <= t_max {
            return None;
        }

        let adjusted = self.current_diff * (self.config.target_time_secs / avg);
        let clamped = self.config.clamp(adjusted, network_difficulty);

        if (clamped - self.current_diff).abs() < f64::EPSILON {
            return None;
        }

        self.current_diff = clamped;
        self.last_retarget_at = now;
        self.intervals.clear();
        Some(clamped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn config() -> VarDiffConfig {
        VarDiffConfig {
            min_diff: 1.0,
            max_diff: Some(1_000_000.0),
            target_time_secs: 0.02,
            retarget_time_secs: 0.0,
            variance_percent: 10.0,
        }
    }

    #[test]
    fn no_retarget_on_first_share() {
        let mut ctx = VarDiffContext::new(config(), 64.0);
        assert_eq!(ctx.record_share(1000.0), None);
    }

    #[test]
    fn fast_shares_increase_difficulty() {
        let mut ctx = VarDiffContext::new(config(), 64.0);
        ctx.record_share(1000.0);
        sleep(Duration::from_millis(1));
        let result = ctx.record_share(1000.0);
        assert!(result.is_some());
        assert!(result.unwrap() >= 64.0);
    }

    #[test]
    fn clamps_to_configured_min_diff() {
        let mut cfg = config();
        cfg.target_time_secs = 100.0;
        cfg.retarget_time_secs = 0.0;
        let mut ctx = VarDiffContext::new(cfg, 2.0);
        ctx.record_share(1000.0);
        sleep(Duration::from_millis(5));
        let result = ctx.record_share(1000.0);
        if let Some(diff) = result {
            assert!(diff >= cfg.min_diff);
        }
    }
}
