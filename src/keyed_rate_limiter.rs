use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::{
    GcraRateLimiter, RateLimitResult, RateQuota, error::CellrateError, runtime, store::Store,
};

/// A registry of rate limits, one quota per key, over one shared [`Store`].
///
/// Where [`GcraRateLimiter`] enforces a single quota for every key it sees,
/// this type lets each key carry its own quota, registered up front and
/// replaceable at runtime. Checking an unregistered key is an error rather
/// than a pass-through, so a missing registration fails closed on the caller
/// side.
///
/// The registry key doubles as the storage key, which means registrations on
/// two `KeyedRateLimiter`s sharing a backend enforce one combined limit per
/// key as long as they register the same quota.
///
/// An optional deny hook observes every denial. It receives the denied key
/// and runs off the calling task, so a slow hook cannot stall admission
/// decisions.
///
/// # Examples
///
/// ```
/// use cellrate::{KeyedRateLimiter, MemoryStore, Rate, RateQuota};
///
/// fn main() -> Result<(), cellrate::CellrateError> {
///     let limiter = KeyedRateLimiter::new(MemoryStore::new());
///
///     limiter.add_key(
///         "tenant-a",
///         RateQuota {
///             max_rate: Rate::per_minute(30),
///             max_burst: 9,
///         },
///     )?;
///
///     futures::executor::block_on(async {
///         let (limited, result) = limiter.rate_limit("tenant-a").await?;
///
///         assert!(!limited);
///         assert_eq!(result.limit, 10);
///
///         Ok(())
///     })
/// }
/// ```
pub struct KeyedRateLimiter<S> {
    store: Arc<S>,
    limiters: DashMap<String, Arc<GcraRateLimiter<Arc<S>>>>,
    deny_hook: Option<Arc<dyn Fn(String) + Send + Sync>>,
}

impl<S: Store> KeyedRateLimiter<S> {
    /// Create an empty registry over `store`.
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            limiters: DashMap::new(),
            deny_hook: None,
        }
    }

    /// Create an empty registry whose denials invoke `deny_hook`.
    ///
    /// The hook receives the denied key. It is dispatched fire-and-forget,
    /// off the calling task, once per denied call.
    pub fn with_deny_hook<F>(store: S, deny_hook: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        Self {
            store: Arc::new(store),
            limiters: DashMap::new(),
            deny_hook: Some(Arc::new(deny_hook)),
        }
    }

    /// Register `quota` for `key`, replacing any existing registration.
    ///
    /// Replacing a registration does not clear the key's stored state: the
    /// new quota takes over whatever arrival time the old one left behind.
    pub fn add_key(&self, key: impl Into<String>, quota: RateQuota) -> Result<(), CellrateError> {
        let limiter = GcraRateLimiter::new(Arc::clone(&self.store), quota)?;

        self.limiters.insert(key.into(), Arc::new(limiter));

        Ok(())
    }

    /// Replace the quota registered for `key`.
    ///
    /// Unlike [`add_key`](KeyedRateLimiter::add_key) this requires an
    /// existing registration and fails with
    /// [`CellrateError::UnregisteredKey`] otherwise.
    pub fn update_key(&self, key: &str, quota: RateQuota) -> Result<(), CellrateError> {
        let limiter = GcraRateLimiter::new(Arc::clone(&self.store), quota)?;

        let Some(mut registered) = self.limiters.get_mut(key) else {
            return Err(CellrateError::UnregisteredKey(key.to_string()));
        };

        *registered = Arc::new(limiter);

        Ok(())
    } // end method update_key

    /// Drop the registration for `key`, returning whether one existed.
    ///
    /// Stored state for the key is left to expire on its own TTL.
    pub fn remove_key(&self, key: &str) -> bool {
        self.limiters.remove(key).is_some()
    }

    /// Whether `key` currently has a registered quota.
    pub fn contains_key(&self, key: &str) -> bool {
        self.limiters.contains_key(key)
    }

    /// Check one unit of work against the quota registered for `key`.
    ///
    /// Returns the same `(limited, result)` pair as
    /// [`GcraRateLimiter::rate_limit`]. Denials additionally invoke the deny
    /// hook, if one was installed.
    ///
    /// # Errors
    ///
    /// Fails with [`CellrateError::UnregisteredKey`] when no quota is
    /// registered for `key`, and otherwise surfaces the underlying limiter's
    /// errors unchanged.
    pub async fn rate_limit(&self, key: &str) -> Result<(bool, RateLimitResult), CellrateError> {
        // Clone out of the guard so no shard lock is held across the await.
        let Some(limiter) = self.limiters.get(key).map(|entry| Arc::clone(entry.value())) else {
            return Err(CellrateError::UnregisteredKey(key.to_string()));
        };

        let (limited, result) = limiter.rate_limit(key, 1).await?;

        if limited && let Some(deny_hook) = &self.deny_hook {
            debug!(key, "dispatching deny hook");

            let deny_hook = Arc::clone(deny_hook);
            let key = key.to_string();

            runtime::spawn_task(move || deny_hook(key));
        }

        Ok((limited, result))
    } // end method rate_limit
}
