//! Reconnect-after-failure policy: bounded exponential backoff.

use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Attempts allowed before giving up. `0` means unlimited.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-based), or `None`
    /// when the policy is disabled or the attempts are used up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        if self.max_attempts != 0 && attempt >= self.max_attempts {
            return None;
        }
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        let capped = secs.min(self.max_delay.as_secs_f64());
        Some(Duration::try_from_secs_f64(capped.max(0.0)).unwrap_or(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_never_schedules() {
        assert_eq!(ReconnectPolicy::default().delay_for(0), None);
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = ReconnectPolicy {
            enabled: true,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 0,
        };
        assert_eq!(policy.delay_for(0), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(10)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(20)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(30)));
        assert_eq!(policy.delay_for(50), Some(Duration::from_secs(30)));
    }

    #[test]
    fn huge_cap_does_not_overflow() {
        let policy = ReconnectPolicy {
            max_delay: Duration::MAX,
            multiplier: 10.0,
            max_attempts: 0,
            ..ReconnectPolicy::enabled()
        };
        assert_eq!(policy.delay_for(0), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for(400), Some(Duration::MAX));
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::enabled()
        };
        assert!(policy.delay_for(0).is_some());
        assert!(policy.delay_for(1).is_some());
        assert_eq!(policy.delay_for(2), None);
    }
}
