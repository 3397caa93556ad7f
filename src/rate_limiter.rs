use std::time::Duration;

use tracing::debug;

use crate::{RateQuota, error::CellrateError, store::Store};

/// Write attempts per [`GcraRateLimiter::rate_limit`] call before giving up
/// with [`CellrateError::StorageContention`].
pub(crate) const MAX_CAS_ATTEMPTS: u32 = 10;

/// The state of one rate limit after a [`GcraRateLimiter::rate_limit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Total units of work admissible in one full burst: `max_burst + 1`.
    pub limit: u64,
    /// Units of work still admissible right now without waiting.
    ///
    /// Computed from the stored state, so a denied call can still report a
    /// non-zero value when some capacity remains but less than the call
    /// asked for.
    pub remaining: u64,
    /// Time until the limit fully drains back to `limit` remaining.
    pub reset_after: Duration,
    /// Time until a retry of the same call could be admitted.
    ///
    /// `None` when the call was admitted, and also when the call was denied
    /// with a quantity so large it exceeds the burst capacity outright; no
    /// amount of waiting would admit it.
    pub retry_after: Option<Duration>,
}

/// Rate limiter implementing the generic cell rate algorithm over a [`Store`].
///
/// GCRA tracks a single timestamp per key, the theoretical arrival time of
/// the next unit of work. Each admitted unit pushes that time forward by one
/// emission interval (the quota's period), and a call is denied when the
/// pushed-forward time would run more than `period * (max_burst + 1)` ahead
/// of now. One stored integer per key thus replaces the token buckets or
/// request logs other limiters keep.
///
/// Updates go through the store's compare-and-swap, so any number of
/// limiters, in any number of processes, can enforce one limit through a
/// shared backend. A lost race is retried from a fresh read, at most
/// ten times per call.
///
/// The limiter itself holds no mutable state. Methods take `&self` and a
/// limiter shared behind an [`Arc`](std::sync::Arc) needs no locking.
///
/// # Examples
///
/// ```
/// use cellrate::{GcraRateLimiter, MemoryStore, Rate, RateQuota};
///
/// fn main() -> Result<(), cellrate::CellrateError> {
///     let quota = RateQuota {
///         max_rate: Rate::per_second(10),
///         max_burst: 4,
///     };
///     let limiter = GcraRateLimiter::new(MemoryStore::new(), quota)?;
///
///     futures::executor::block_on(async {
///         let (limited, result) = limiter.rate_limit("client-7", 1).await?;
///
///         assert!(!limited);
///         assert_eq!(result.remaining, 4);
///
///         Ok(())
///     })
/// }
/// ```
pub struct GcraRateLimiter<S> {
    store: S,
    limit: u64,
    /// Nanoseconds one admitted unit of work costs.
    emission_interval: i64,
    /// Nanoseconds the theoretical arrival time may run ahead of the clock.
    delay_variation_tolerance: i64,
}

impl<S: Store> GcraRateLimiter<S> {
    /// Create a limiter enforcing `quota` against `store`.
    ///
    /// Fails with [`CellrateError::InvalidQuota`] when the quota's rate has a
    /// zero-length period, which would admit nothing.
    pub fn new(store: S, quota: RateQuota) -> Result<Self, CellrateError> {
        let period = quota.max_rate.period();

        if period.is_zero() {
            return Err(CellrateError::InvalidQuota(format!(
                "{quota:?} allows no work: the rate period is zero"
            )));
        }

        let emission_interval = i64::try_from(period.as_nanos()).map_err(|_| {
            CellrateError::InvalidQuota(format!(
                "{quota:?} has a rate period beyond the representable range"
            ))
        })?;

        let limit = quota.max_burst.saturating_add(1);
        let delay_variation_tolerance =
            emission_interval.saturating_mul(i64::try_from(limit).unwrap_or(i64::MAX));

        Ok(Self {
            store,
            limit,
            emission_interval,
            delay_variation_tolerance,
        })
    } // end method new

    /// The store this limiter writes through.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Check whether `quantity` units of work under `key` are admissible, and
    /// record them if so.
    ///
    /// Returns `(limited, result)`: `limited` is `true` when the call was
    /// denied, and `result` describes the state of the limit either way. A
    /// denied call records nothing, so denied traffic never pushes the reset
    /// time further out.
    ///
    /// A `quantity` of zero checks the limit without consuming capacity.
    ///
    /// # Errors
    ///
    /// Store failures surface as the store's error. When ten successive
    /// writes lose their optimistic race, the call gives up with
    /// [`CellrateError::StorageContention`]; the limit was under write
    /// pressure from other callers and this call changed nothing.
    pub async fn rate_limit(
        &self,
        key: &str,
        quantity: u64,
    ) -> Result<(bool, RateLimitResult), CellrateError> {
        let increment = self
            .emission_interval
            .saturating_mul(i64::try_from(quantity).unwrap_or(i64::MAX));

        let mut retry_after = None;
        let mut attempts: u32 = 0;

        let (limited, ttl) = loop {
            let (now, stored_tat) = self.store.get_with_time(key).await?;

            // A key with no state behaves as if its theoretical arrival time
            // were now: the full burst is available.
            let tat = stored_tat.unwrap_or(now);
            let new_tat = tat.max(now).saturating_add(increment);
            let allow_at = new_tat.saturating_sub(self.delay_variation_tolerance);

            if now < allow_at {
                if increment <= self.delay_variation_tolerance {
                    retry_after = Some(non_negative_duration(allow_at.saturating_sub(now)));
                }

                debug!(key, quantity, "rate limit exceeded");

                break (true, tat.saturating_sub(now));
            }

            let ttl = new_tat.saturating_sub(now);

            let updated = match stored_tat {
                None => {
                    self.store
                        .set_if_not_exists_with_ttl(key, new_tat, non_negative_duration(ttl))
                        .await?
                }
                Some(stored_tat) => {
                    self.store
                        .compare_and_swap_with_ttl(
                            key,
                            stored_tat,
                            new_tat,
                            non_negative_duration(ttl),
                        )
                        .await?
                }
            };

            if updated {
                break (false, ttl);
            }

            attempts += 1;

            if attempts >= MAX_CAS_ATTEMPTS {
                debug!(key, attempts, "rate limit state update contended");

                return Err(CellrateError::StorageContention {
                    key: key.to_string(),
                    attempts,
                });
            }
        };

        // Remaining capacity is the tolerance not yet spent, in whole
        // emission intervals. A denied call measures against the stored
        // arrival time, so it can report capacity that exists but falls
        // short of the quantity asked for.
        let slack = self.delay_variation_tolerance.saturating_sub(ttl);
        let remaining = if slack > -self.emission_interval {
            u64::try_from(slack / self.emission_interval).unwrap_or(0)
        } else {
            0
        };

        let result = RateLimitResult {
            limit: self.limit,
            remaining,
            reset_after: non_negative_duration(ttl),
            retry_after,
        };

        Ok((limited, result))
    } // end method rate_limit
} // end impl GcraRateLimiter

/// Clamp a nanosecond delta at zero and widen it into a [`Duration`].
///
/// Negative deltas occur when a key's stored arrival time is already in the
/// past, which callers report as an elapsed reset.
fn non_negative_duration(nanos: i64) -> Duration {
    Duration::from_nanos(nanos.max(0) as u64)
}
