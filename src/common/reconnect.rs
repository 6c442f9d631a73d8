//! Per-user exponential backoff for dispatcher restarts.
//!
//! The orchestrator's poll loop is the only retry mechanism for a dead
//! dispatcher. This keeps it from hammering the homeserver when an account's
//! stream keeps failing.

use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use dashmap::DashMap;
use tracing::debug;

/// Configuration for exponential restart backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay between restart attempts.
    pub max_delay: Duration,
    /// Multiplier for each successive failure.
    pub multiplier: f32,
    /// Randomise delays so many accounts don't restart in lockstep.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 1.5,
            jitter: true,
        }
    }
}

struct RestartState {
    delays: ExponentialBackoff,
    not_before: Instant,
    failures: u32,
}

/// Tracks restart eligibility per user.
pub struct RestartBackoff {
    config: ReconnectConfig,
    users: DashMap<String, RestartState>,
}

impl RestartBackoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            users: DashMap::new(),
        }
    }

    fn delays(&self) -> ExponentialBackoff {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.config.initial_delay)
            .with_max_delay(self.config.max_delay)
            .with_factor(self.config.multiplier)
            .without_max_times();
        if self.config.jitter {
            builder.with_jitter().build()
        } else {
            builder.build()
        }
    }

    /// Whether a restart for `user` may be attempted now.
    pub fn ready(&self, user: &str) -> bool {
        self.users
            .get(user)
            .map(|state| Instant::now() >= state.not_before)
            .unwrap_or(true)
    }

    /// Record a failed run and return the delay before the next attempt.
    pub fn record_failure(&self, user: &str) -> Duration {
        let mut state = self
            .users
            .entry(user.to_string())
            .or_insert_with(|| RestartState {
                delays: self.delays(),
                not_before: Instant::now(),
                failures: 0,
            });

        let delay = state.delays.next().unwrap_or(self.config.max_delay);
        state.failures += 1;
        state.not_before = Instant::now() + delay;

        debug!(
            user,
            failures = state.failures,
            "Next restart allowed in {:.1}s",
            delay.as_secs_f64()
        );
        delay
    }

    /// Forget failures after a clean run.
    pub fn reset(&self, user: &str) {
        self.users.remove(user);
    }

    /// Consecutive failures recorded for `user`.
    pub fn failures(&self, user: &str) -> u32 {
        self.users.get(user).map(|state| state.failures).unwrap_or(0)
    }
}

impl Default for RestartBackoff {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}
