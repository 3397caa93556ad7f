use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use dashmap::{DashMap, Entry};
use tracing::debug;

use crate::{error::CellrateError, store::Store};

const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 60_000;

/// Granularity of the cleanup thread's stop checks while it waits out an interval.
const CLEANUP_SLEEP_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy)]
struct StoreEntry {
    value: i64,
    expires_at: i64,
}

impl StoreEntry {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// In-process [`Store`] backed by a concurrent hash map.
///
/// State lives in a [`DashMap`](dashmap::DashMap), so a single `MemoryStore`
/// can be shared across threads and across limiters without external locking.
/// The clock is the system clock, read per operation.
///
/// # Expiration
///
/// Entries carry an absolute deadline computed from the TTL the limiter
/// passes in. Expiration is lazy: an entry past its deadline is reported as
/// absent and is overwritten like one, but it keeps occupying memory until
/// the next write to its key or a [`purge_expired`](MemoryStore::purge_expired)
/// call removes it. Unbounded key cardinality therefore grows memory; use
/// [`run_cleanup_loop`](MemoryStore::run_cleanup_loop) to purge periodically.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoreEntry>>,
    cleanup_stop: Arc<AtomicBool>,
    cleanup_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, counting expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry whose deadline has passed.
    pub fn purge_expired(&self) {
        purge_expired_entries(&self.entries);
    }

    /// Start the background cleanup loop with the default interval.
    ///
    /// See [`run_cleanup_loop_with_config`](MemoryStore::run_cleanup_loop_with_config).
    pub fn run_cleanup_loop(&self) {
        self.run_cleanup_loop_with_config(DEFAULT_CLEANUP_INTERVAL_MS);
    }

    /// Start a background thread that purges expired entries immediately and
    /// then every `cleanup_interval_ms` milliseconds.
    ///
    /// Idempotent: if the loop is already running, this call does nothing and
    /// the existing interval stays in effect.
    pub fn run_cleanup_loop_with_config(&self, cleanup_interval_ms: u64) {
        let Ok(mut handle) = self.cleanup_handle.lock() else {
            return;
        };

        if handle.is_some() {
            return;
        }

        self.cleanup_stop.store(false, Ordering::Relaxed);

        let entries = Arc::clone(&self.entries);
        let stop = Arc::clone(&self.cleanup_stop);

        *handle = Some(thread::spawn(move || {
            debug!(cleanup_interval_ms, "memory store cleanup loop started");

            while !stop.load(Ordering::Relaxed) {
                purge_expired_entries(&entries);
                sleep_until_stopped(&stop, cleanup_interval_ms);
            }

            debug!("memory store cleanup loop stopped");
        }));
    } // end method run_cleanup_loop_with_config

    /// Stop the background cleanup loop and wait for its thread to exit.
    ///
    /// Idempotent: safe to call when no loop is running.
    pub fn stop_cleanup_loop(&self) {
        let Ok(mut handle) = self.cleanup_handle.lock() else {
            return;
        };

        // Set the flag while holding the lock so a concurrent start cannot
        // clear it between our store and the join.
        self.cleanup_stop.store(true, Ordering::Relaxed);

        if let Some(handle) = handle.take() {
            let _ = handle.join();
        }
    } // end method stop_cleanup_loop
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.stop_cleanup_loop();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_with_time(&self, key: &str) -> Result<(i64, Option<i64>), CellrateError> {
        let now = system_clock_nanos()?;

        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value),
            _ => None,
        };

        Ok((now, value))
    }

    async fn set_if_not_exists_with_ttl(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<bool, CellrateError> {
        let now = system_clock_nanos()?;
        let entry = StoreEntry {
            value,
            expires_at: deadline_for(now, ttl),
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return Ok(false);
                }

                occupied.insert(entry);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(true)
            }
        }
    } // end method set_if_not_exists_with_ttl

    async fn compare_and_swap_with_ttl(
        &self,
        key: &str,
        old: i64,
        new: i64,
        ttl: Duration,
    ) -> Result<bool, CellrateError> {
        let now = system_clock_nanos()?;

        // get_mut holds the shard lock, so the check and the write are one
        // atomic step relative to every other store operation on this key.
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(false);
        };

        if entry.is_expired(now) || entry.value != old {
            return Ok(false);
        }

        *entry = StoreEntry {
            value: new,
            expires_at: deadline_for(now, ttl),
        };

        Ok(true)
    } // end method compare_and_swap_with_ttl
}

fn purge_expired_entries(entries: &DashMap<String, StoreEntry>) {
    let Ok(now) = system_clock_nanos() else {
        return;
    };

    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    let removed = before.saturating_sub(entries.len());

    if removed > 0 {
        debug!(removed, "purged expired rate limit state");
    }
}

fn sleep_until_stopped(stop: &AtomicBool, interval_ms: u64) {
    let deadline = Instant::now() + Duration::from_millis(interval_ms);

    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();

        if now >= deadline {
            break;
        }

        thread::sleep((deadline - now).min(CLEANUP_SLEEP_SLICE));
    }
}

/// Current system time in nanoseconds since the Unix epoch.
fn system_clock_nanos() -> Result<i64, CellrateError> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| CellrateError::Store("system clock is before the Unix epoch".to_string()))?;

    i64::try_from(elapsed.as_nanos())
        .map_err(|_| CellrateError::Store("system clock overflows a nanosecond i64".to_string()))
}

/// Absolute deadline for an entry written at `now` with the given TTL.
///
/// The TTL is floored at one nanosecond so an entry never expires within the
/// same clock reading that wrote it.
fn deadline_for(now: i64, ttl: Duration) -> i64 {
    let ttl_nanos = i64::try_from(ttl.as_nanos()).unwrap_or(i64::MAX).max(1);

    now.saturating_add(ttl_nanos)
}
