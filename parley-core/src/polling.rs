//! Polling fallback schedule.
//!
//! Used when push delivery cannot be confirmed. The interval escalates
//! through a fixed ladder after a run of empty fetches and drops back to
//! the first step as soon as a fetch brings anything new.

use std::time::Duration;

/// Default escalation ladder, in seconds.
pub const DEFAULT_INTERVALS_SECS: [u64; 4] = [2, 5, 10, 30];

/// Consecutive empty fetches before the interval escalates.
pub const DEFAULT_REPEATS_BEFORE_ESCALATION: u32 = 5;

/// Backoff state for the polling fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingBackoff {
    intervals: Vec<Duration>,
    repeats_before_escalation: u32,
    step: usize,
    repeats: u32,
}

impl Default for PollingBackoff {
    fn default() -> Self {
        Self::new(
            DEFAULT_INTERVALS_SECS.iter().map(|s| Duration::from_secs(*s)).collect(),
            DEFAULT_REPEATS_BEFORE_ESCALATION,
        )
    }
}

impl PollingBackoff {
    /// Create a schedule from a ladder of intervals.
    ///
    /// An empty ladder falls back to the default one.
    pub fn new(intervals: Vec<Duration>, repeats_before_escalation: u32) -> Self {
        let intervals = if intervals.is_empty() {
            DEFAULT_INTERVALS_SECS.iter().map(|s| Duration::from_secs(*s)).collect()
        } else {
            intervals
        };
        Self {
            intervals,
            repeats_before_escalation: repeats_before_escalation.max(1),
            step: 0,
            repeats: 0,
        }
    }

    /// Delay before the next fetch.
    pub fn interval(&self) -> Duration {
        self.intervals[self.step]
    }

    /// Consecutive empty fetches at the current step.
    pub fn repeats(&self) -> u32 {
        self.repeats
    }

    /// Record a fetch that returned `new_messages` messages and return the
    /// delay before the next one.
    pub fn record(&mut self, new_messages: usize) -> Duration {
        if new_messages > 0 {
            self.reset();
        } else {
            self.repeats += 1;
            if self.repeats >= self.repeats_before_escalation {
                self.repeats = 0;
                self.step = (self.step + 1).min(self.intervals.len() - 1);
            }
        }
        self.interval()
    }

    /// Back to the first step.
    pub fn reset(&mut self) {
        self.step = 0;
        self.repeats = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_two_seconds() {
        assert_eq!(PollingBackoff::default().interval(), Duration::from_secs(2));
    }

    #[test]
    fn five_empty_fetches_escalate_then_new_message_resets() {
        let mut backoff = PollingBackoff::default();
        for _ in 0..4 {
            assert_eq!(backoff.record(0), Duration::from_secs(2));
        }
        assert_eq!(backoff.record(0), Duration::from_secs(5));
        assert_eq!(backoff.repeats(), 0);

        assert_eq!(backoff.record(1), Duration::from_secs(2));
        assert_eq!(backoff.repeats(), 0);
    }

    #[test]
    fn escalation_caps_at_thirty_seconds() {
        let mut backoff = PollingBackoff::default();
        for _ in 0..100 {
            backoff.record(0);
        }
        assert_eq!(backoff.interval(), Duration::from_secs(30));
    }

    #[test]
    fn walks_the_whole_ladder() {
        let mut backoff = PollingBackoff::default();
        let mut seen = vec![backoff.interval()];
        for _ in 0..15 {
            let next = backoff.record(0);
            if seen.last() != Some(&next) {
                seen.push(next);
            }
        }
        assert_eq!(
            seen,
            vec![2, 5, 10, 30]
                .into_iter()
                .map(Duration::from_secs)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn custom_ladder() {
        let mut backoff = PollingBackoff::new(vec![Duration::from_millis(100)], 1);
        assert_eq!(backoff.record(0), Duration::from_millis(100));

        let fallback = PollingBackoff::new(Vec::new(), 0);
        assert_eq!(fallback.interval(), Duration::from_secs(2));
    }
}
