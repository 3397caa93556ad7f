use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A sustained request rate, stored as the period of one emission interval.
///
/// `Rate::per_second(2)` means one unit of work every 500ms, not two units at
/// an arbitrary point within each second. The distinction matters for GCRA:
/// the period is the time-cost charged per admitted unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rate {
    period: Duration,
}

impl Rate {
    /// A rate with a custom period between units of work.
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// `n` units of work per second.
    pub fn per_second(n: u64) -> Self {
        Self::per(NANOS_PER_SEC, n)
    }

    /// `n` units of work per minute.
    pub fn per_minute(n: u64) -> Self {
        Self::per(60 * NANOS_PER_SEC, n)
    }

    /// `n` units of work per hour.
    pub fn per_hour(n: u64) -> Self {
        Self::per(3600 * NANOS_PER_SEC, n)
    }

    /// `n` units of work per day.
    pub fn per_day(n: u64) -> Self {
        Self::per(86400 * NANOS_PER_SEC, n)
    }

    /// The emission interval: the duration one admitted unit of work costs.
    pub fn period(&self) -> Duration {
        self.period
    }

    // A zero `n` yields a zero period, which no limiter constructor accepts.
    fn per(unit_nanos: u64, n: u64) -> Self {
        let period_nanos = match n {
            0 => 0,
            n => unit_nanos / n,
        };

        Self {
            period: Duration::from_nanos(period_nanos),
        }
    }
}

/// The configuration of one logical rate limit.
///
/// `max_rate` is the maximum sustained rate and must have a non-zero period.
/// `max_burst` is how many units of work may exceed the sustained rate in a
/// single burst; a burst of zero admits exactly one unit per emission
/// interval, so most quotas want `max_burst >= 1` to leave some headroom.
///
/// A quota is consumed once by a limiter constructor and never mutated;
/// changing a limit means building a new limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateQuota {
    /// Maximum sustained rate.
    pub max_rate: Rate,
    /// Units of work allowed to exceed the sustained rate in one burst.
    pub max_burst: u64,
}
