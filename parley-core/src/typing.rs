//! Typing indicators.
//!
//! [`UserTyping`] throttles the "start" announcements for the local user
//! and tells the caller when to announce "stop". [`AgentTyping`] tracks
//! the remote agent's indicator with a timeout.
//!
//! Timers are armed by the caller. Each arm is tagged with a generation;
//! a timer that fires for an older generation is stale and ignored.

use std::time::{Duration, Instant};

/// Default minimum gap between two "start" announcements.
pub const DEFAULT_START_INTERVAL: Duration = Duration::from_secs(20);

/// Default idle time after which "stop" is announced.
pub const DEFAULT_STOP_AFTER: Duration = Duration::from_secs(15);

/// Default time after which an agent indicator clears on its own.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(15);

/// What the caller should do after a keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keystroke {
    /// Announce "start" to the remote side.
    pub announce_start: bool,
    /// Arm the stop timer with this generation.
    pub generation: u64,
    /// Delay for the stop timer.
    pub stop_after: Duration,
}

/// Local user typing throttle.
#[derive(Debug, Clone)]
pub struct UserTyping {
    start_interval: Duration,
    stop_after: Duration,
    last_start: Option<Instant>,
    generation: u64,
}

impl Default for UserTyping {
    fn default() -> Self {
        Self::new(DEFAULT_START_INTERVAL, DEFAULT_STOP_AFTER)
    }
}

impl UserTyping {
    /// Create a throttle with custom timings.
    pub fn new(start_interval: Duration, stop_after: Duration) -> Self {
        Self {
            start_interval,
            stop_after,
            last_start: None,
            generation: 0,
        }
    }

    /// Whether the user is considered typing.
    pub fn is_typing(&self) -> bool {
        self.last_start.is_some()
    }

    /// Record a keystroke at `now`.
    pub fn keystroke(&mut self, now: Instant) -> Keystroke {
        let announce_start = match self.last_start {
            Some(last) => now.saturating_duration_since(last) >= self.start_interval,
            None => true,
        };
        if announce_start {
            self.last_start = Some(now);
        }
        self.generation += 1;
        Keystroke {
            announce_start,
            generation: self.generation,
            stop_after: self.stop_after,
        }
    }

    /// The stop timer of `generation` fired. Returns whether to announce "stop".
    pub fn stop_timer(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.stop()
    }

    /// Stop typing now. Returns whether to announce "stop".
    pub fn stop(&mut self) -> bool {
        self.generation += 1;
        self.last_start.take().is_some()
    }
}

/// Remote agent typing tracker.
#[derive(Debug, Clone)]
pub struct AgentTyping {
    timeout: Duration,
    typing: bool,
    generation: u64,
}

impl Default for AgentTyping {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_TIMEOUT)
    }
}

impl AgentTyping {
    /// Create a tracker with a custom timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            typing: false,
            generation: 0,
        }
    }

    /// Whether the agent is typing.
    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Timeout before the indicator clears on its own.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A "start" event arrived.
    ///
    /// Returns whether to announce, and the generation to arm the timeout
    /// with. Every start re-arms the timeout.
    pub fn start(&mut self) -> (bool, u64) {
        let announce = !self.typing;
        self.typing = true;
        self.generation += 1;
        (announce, self.generation)
    }

    /// A "stop" event arrived, or the agent sent a message.
    /// Returns whether to announce.
    pub fn stop(&mut self) -> bool {
        self.generation += 1;
        std::mem::replace(&mut self.typing, false)
    }

    /// The timeout of `generation` fired. Returns whether to announce "stopped".
    pub fn timer(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===========================================
    // User Typing Tests
    // ===========================================

    #[test]
    fn first_keystroke_announces_start() {
        let mut typing = UserTyping::default();
        let keystroke = typing.keystroke(Instant::now());

        assert!(keystroke.announce_start);
        assert_eq!(keystroke.stop_after, DEFAULT_STOP_AFTER);
        assert!(typing.is_typing());
    }

    #[test]
    fn start_is_throttled_for_twenty_seconds() {
        let mut typing = UserTyping::default();
        let t0 = Instant::now();
        typing.keystroke(t0);

        assert!(!typing.keystroke(t0 + Duration::from_secs(5)).announce_start);
        assert!(!typing.keystroke(t0 + Duration::from_secs(19)).announce_start);
        assert!(typing.keystroke(t0 + Duration::from_secs(20)).announce_start);
    }

    #[test]
    fn only_latest_stop_timer_counts() {
        let mut typing = UserTyping::default();
        let t0 = Instant::now();
        let first = typing.keystroke(t0);
        let second = typing.keystroke(t0 + Duration::from_secs(1));

        assert!(!typing.stop_timer(first.generation));
        assert!(typing.is_typing());
        assert!(typing.stop_timer(second.generation));
        assert!(!typing.is_typing());
    }

    #[test]
    fn typing_after_stop_announces_again() {
        let mut typing = UserTyping::default();
        let t0 = Instant::now();
        typing.keystroke(t0);
        assert!(typing.stop());
        assert!(!typing.stop());

        assert!(typing.keystroke(t0 + Duration::from_secs(1)).announce_start);
    }

    // ===========================================
    // Agent Typing Tests
    // ===========================================

    #[test]
    fn duplicate_start_does_not_reannounce() {
        let mut agent = AgentTyping::default();
        let (announce, _) = agent.start();
        assert!(announce);
        let (announce, _) = agent.start();
        assert!(!announce);
        assert!(agent.is_typing());
    }

    #[test]
    fn timeout_clears_unless_restarted() {
        let mut agent = AgentTyping::default();
        let (_, first) = agent.start();
        let (_, second) = agent.start();

        assert!(!agent.timer(first));
        assert!(agent.is_typing());
        assert!(agent.timer(second));
        assert!(!agent.is_typing());
    }

    #[test]
    fn stop_announces_once() {
        let mut agent = AgentTyping::default();
        assert!(!agent.stop());
        agent.start();
        assert!(agent.stop());
        assert!(!agent.stop());
    }
}
