//! Storage backends for rate limit state.
//!
//! A limiter keeps exactly one `i64` per key: the theoretical arrival time of
//! the next unit of work, in nanoseconds since the Unix epoch. Backends only
//! need three operations over that value, and every mutation is a conditional
//! atomic write, so concurrent limiters sharing a backend stay correct
//! without locks held across await points.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::error::CellrateError;

mod memory_store;

pub use memory_store::MemoryStore;

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
#[cfg_attr(docsrs, doc(cfg(any(feature = "redis-tokio", feature = "redis-smol"))))]
mod redis_store;

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
#[cfg_attr(docsrs, doc(cfg(any(feature = "redis-tokio", feature = "redis-smol"))))]
pub use redis_store::RedisStore;

/// Backend storage for one nanosecond timestamp per key.
///
/// Implementations supply both the stored value and the clock reading used to
/// interpret it. The two must come from the same clock domain: a remote
/// backend reads its server clock, a local backend reads the system clock.
/// Mixing domains breaks the arithmetic the limiter does on the pair.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads the current time and the value stored under `key`, as one
    /// consistent snapshot.
    ///
    /// The time is nanoseconds since the Unix epoch on the store's clock.
    /// `None` means no value is stored under `key`.
    async fn get_with_time(&self, key: &str) -> Result<(i64, Option<i64>), CellrateError>;

    /// Stores `value` under `key` only if `key` holds nothing, with the given
    /// time-to-live.
    ///
    /// Returns `true` if the value was stored, `false` if `key` already held
    /// a value. A lost race here is an expected outcome, not an error.
    async fn set_if_not_exists_with_ttl(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<bool, CellrateError>;

    /// Replaces the value under `key` with `new`, only if `key` currently
    /// holds exactly `old`, refreshing the time-to-live.
    ///
    /// Returns `true` if the swap happened. Returns `false` both when the
    /// stored value differs from `old` and when `key` holds nothing at all;
    /// callers cannot distinguish the two and retry from a fresh read either
    /// way.
    async fn compare_and_swap_with_ttl(
        &self,
        key: &str,
        old: i64,
        new: i64,
        ttl: Duration,
    ) -> Result<bool, CellrateError>;
}

// Lets several limiters share one backend without a wrapper type.
#[async_trait]
impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    async fn get_with_time(&self, key: &str) -> Result<(i64, Option<i64>), CellrateError> {
        (**self).get_with_time(key).await
    }

    async fn set_if_not_exists_with_ttl(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<bool, CellrateError> {
        (**self).set_if_not_exists_with_ttl(key, value, ttl).await
    }

    async fn compare_and_swap_with_ttl(
        &self,
        key: &str,
        old: i64,
        new: i64,
        ttl: Duration,
    ) -> Result<bool, CellrateError> {
        (**self).compare_and_swap_with_ttl(key, old, new, ttl).await
    }
}
