use std::sync::{Arc, Mutex};

use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};

/// Source of "now" for every deadline decision. Injected so that sweeps and
/// transitions can be driven deterministically.
pub(crate) trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        now_utc()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub(crate) struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    pub(crate) fn new(start: OffsetDateTime) -> Self {
        Self { now: Arc::new(Mutex::new(truncate_to_micros(start))) }
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) fn shared_system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Postgres keeps microseconds; truncating up front keeps round-tripped
/// timestamps comparable.
pub(crate) fn now_utc() -> OffsetDateTime {
    truncate_to_micros(OffsetDateTime::now_utc())
}

pub(crate) fn truncate_to_micros(value: OffsetDateTime) -> OffsetDateTime {
    let micros = value.microsecond();
    value.replace_microsecond(micros).unwrap_or(value)
}

pub(crate) fn format_offset(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

pub(crate) fn seconds_as_duration(seconds: u64) -> Duration {
    Duration::seconds(seconds.min(i64::MAX as u64) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Date, Month, PrimitiveDateTime, Time, UtcOffset};

    fn fixed() -> OffsetDateTime {
        let date = Date::from_calendar_date(2025, Month::January, 2).unwrap();
        let time = Time::from_hms_nano(10, 20, 30, 123_456_789).unwrap();
        PrimitiveDateTime::new(date, time).assume_utc()
    }

    #[test]
    fn format_offset_preserves_offset() {
        let utc = fixed().replace_nanosecond(0).unwrap();
        let offset = UtcOffset::from_hms(3, 0, 0).unwrap();
        assert_eq!(format_offset(utc.to_offset(offset)), "2025-01-02T13:20:30+03:00");
    }

    #[test]
    fn truncate_drops_sub_microsecond_precision() {
        let truncated = truncate_to_micros(fixed());
        assert_eq!(truncated.nanosecond(), 123_456_000);
    }

    #[test]
    fn manual_clock_only_moves_on_advance() {
        let clock = ManualClock::new(fixed());
        let first = clock.now();
        assert_eq!(clock.now(), first);

        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now() - first, Duration::minutes(5));
    }
}
