use chrono::{DateTime, Datelike, FixedOffset, Utc};

/// Source of wall-clock time, injected so extraction can be pinned to a year
/// in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Calendar year at `clock.now()` as observed in `offset`.
pub fn current_year(clock: &dyn Clock, offset: FixedOffset) -> i32 {
    clock.now().with_timezone(&offset).year()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn year_rolls_over_in_local_offset() {
        let clock = FixedClock(Utc.with_ymd_and_hms(2025, 12, 31, 17, 30, 0).unwrap());
        let taipei = FixedOffset::east_opt(8 * 3600).unwrap();
        assert_eq!(current_year(&clock, taipei), 2026);
        assert_eq!(current_year(&clock, FixedOffset::east_opt(0).unwrap()), 2025);
    }
}
