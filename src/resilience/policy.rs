use std::time::Duration;

use rand::Rng;

use crate::core::config::ResilienceSettings;

/// Bounded retry with exponential backoff for throttled store calls.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    /// Total attempts, including the first one.
    pub(crate) max_attempts: u32,
    pub(crate) base_delay: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) multiplier: f64,
    pub(crate) jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub(crate) fn from_settings(settings: &ResilienceSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-indexed), capped at `max_delay`.
    pub(crate) fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        if !capped.is_finite() || capped <= 0.0 {
            return Duration::ZERO;
        }

        let capped = if self.jitter {
            // Equal jitter: keep half, randomize the other half.
            let half = capped / 2.0;
            half + rand::thread_rng().gen_range(0.0..=half)
        } else {
            capped
        };
        Duration::from_secs_f64(capped)
    }

    /// Delay after a throttled attempt. A parseable server hint wins over
    /// the computed backoff, but is still capped.
    pub(crate) fn delay_for(&self, retry: u32, retry_after: Option<&str>) -> Duration {
        match retry_after.and_then(parse_retry_after) {
            Some(hint) => hint.min(self.max_delay),
            None => self.backoff_delay(retry),
        }
    }

    pub(crate) fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// Parses a retry hint. Bare numbers are milliseconds; `ms` and `s`
/// suffixes are accepted.
pub(crate) fn parse_retry_after(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (number, per_second) = if let Some(value) = raw.strip_suffix("ms") {
        (value, 1000.0)
    } else if let Some(value) = raw.strip_suffix('s') {
        (value, 1.0)
    } else {
        (raw, 1000.0)
    };

    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(value / per_second).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = fixed_policy();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(60), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_upper_half() {
        let policy = RetryPolicy { jitter: true, ..fixed_policy() };
        for _ in 0..50 {
            let delay = policy.backoff_delay(1);
            assert!(delay >= Duration::from_millis(100), "{delay:?}");
            assert!(delay <= Duration::from_millis(200), "{delay:?}");
        }
    }

    #[test]
    fn retry_hints_are_parsed_as_milliseconds_by_default() {
        assert_eq!(parse_retry_after("250"), Some(Duration::from_millis(250)));
        assert_eq!(parse_retry_after("12.5"), Some(Duration::from_micros(12_500)));
        assert_eq!(parse_retry_after(" 250ms "), Some(Duration::from_millis(250)));
        assert_eq!(parse_retry_after("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn server_hint_overrides_backoff_but_respects_cap() {
        let policy = fixed_policy();
        assert_eq!(policy.delay_for(0, Some("30")), Duration::from_millis(30));
        assert_eq!(policy.delay_for(0, Some("10s")), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1, Some("garbage")), Duration::from_millis(200));
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(200));
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = fixed_policy();
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }
}
