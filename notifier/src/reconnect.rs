//! Reconnect state machine and retry timing.
//!
//! ```text
//! Connected    --poll ok-->     Connected
//! Connected    --poll failed--> Reconnecting { attempts: 1 }
//! Reconnecting --poll failed--> Reconnecting { attempts: n + 1 }
//! Reconnecting --poll ok-->     Connected
//! ```
//!
//! The first retry waits the user's `check_interval_on_error`; each further
//! consecutive failure doubles the wait up to [`MAX_RETRY_DELAY_SECS`]. Up to
//! 25% jitter is added on top, never subtracted, so a retry is never issued
//! sooner than the configured interval. A successful poll resets the delay.
//! There is no retry limit.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

/// Maximum retry delay in seconds.
pub const MAX_RETRY_DELAY_SECS: u64 = 60;

/// Jitter factor (up to +25%).
const JITTER_FACTOR: f64 = 0.25;

/// Retry timing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Upper bound for the doubled delay (jitter comes on top).
    pub max_delay: Duration,

    /// Fraction of the delay added as random jitter.
    pub jitter_factor: f64,
}

impl RetryPolicy {
    /// Creates a policy starting at `initial_delay`.
    ///
    /// The cap is [`MAX_RETRY_DELAY_SECS`] or `initial_delay`, whichever is
    /// larger.
    #[must_use]
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: initial_delay.max(Duration::from_secs(MAX_RETRY_DELAY_SECS)),
            jitter_factor: JITTER_FACTOR,
        }
    }

    /// Disables jitter, for deterministic timing.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Adds up to `jitter_factor` of `delay` on top of it.
    fn add_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let mut rng = rand::rng();
        let extra = rng.random_range(0.0..=delay.as_secs_f64() * self.jitter_factor);
        delay + Duration::from_secs_f64(extra)
    }
}

/// Connection state of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The last poll succeeded.
    Connected,
    /// The last `attempts` polls failed.
    Reconnecting { attempts: u32 },
}

/// Drives [`ConnectionState`] transitions and hands out retry delays.
#[derive(Debug, Clone)]
pub struct ReconnectController {
    policy: RetryPolicy,
    state: ConnectionState,
    current_delay: Duration,
}

impl ReconnectController {
    /// Creates a controller in the `Connected` state.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Connected,
            current_delay: policy.initial_delay,
            policy,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Records a successful poll.
    ///
    /// Returns true if this ended a run of failures.
    pub fn on_success(&mut self) -> bool {
        let recovered = match self.state {
            ConnectionState::Connected => false,
            ConnectionState::Reconnecting { attempts } => {
                info!(failed_attempts = attempts, "Connection to daemon restored");
                true
            }
        };

        self.state = ConnectionState::Connected;
        self.current_delay = self.policy.initial_delay;
        recovered
    }

    /// Records a failed poll and returns how long to wait before retrying.
    pub fn on_failure(&mut self) -> Duration {
        let attempts = match self.state {
            ConnectionState::Connected => 1,
            ConnectionState::Reconnecting { attempts } => attempts.saturating_add(1),
        };
        self.state = ConnectionState::Reconnecting { attempts };

        let delay = self.policy.add_jitter(self.current_delay);
        self.current_delay = (self.current_delay * 2).min(self.policy.max_delay);

        debug!(
            attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(initial_secs: u64) -> ReconnectController {
        let policy = RetryPolicy::new(Duration::from_secs(initial_secs)).without_jitter();
        ReconnectController::new(policy)
    }

    #[test]
    fn starts_connected() {
        assert_eq!(controller(5).state(), ConnectionState::Connected);
    }

    #[test]
    fn failure_transitions_to_reconnecting() {
        let mut ctl = controller(5);

        assert_eq!(ctl.on_failure(), Duration::from_secs(5));
        assert_eq!(ctl.state(), ConnectionState::Reconnecting { attempts: 1 });

        assert_eq!(ctl.on_failure(), Duration::from_secs(10));
        assert_eq!(ctl.state(), ConnectionState::Reconnecting { attempts: 2 });
    }

    #[test]
    fn delay_caps_at_max() {
        let mut ctl = controller(5);
        let delays: Vec<u64> = (0..6).map(|_| ctl.on_failure().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn large_interval_is_its_own_cap() {
        let mut ctl = controller(120);
        assert_eq!(ctl.on_failure(), Duration::from_secs(120));
        assert_eq!(ctl.on_failure(), Duration::from_secs(120));
    }

    #[test]
    fn success_resets() {
        let mut ctl = controller(5);
        ctl.on_failure();
        ctl.on_failure();

        assert!(ctl.on_success());
        assert_eq!(ctl.state(), ConnectionState::Connected);
        assert_eq!(ctl.on_failure(), Duration::from_secs(5));
    }

    #[test]
    fn success_while_connected_is_not_a_recovery() {
        let mut ctl = controller(5);
        assert!(!ctl.on_success());
    }

    #[test]
    fn jitter_never_shortens_delay() {
        let policy = RetryPolicy::new(Duration::from_secs(8));
        for _ in 0..100 {
            let mut ctl = ReconnectController::new(policy);
            let secs = ctl.on_failure().as_secs_f64();
            assert!(
                (8.0..=10.0).contains(&secs),
                "Jitter out of bounds: {}",
                secs
            );
        }
    }
}
