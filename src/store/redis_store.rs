use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::{error::CellrateError, store::Store};

const NANOS_PER_SEC: i64 = 1_000_000_000;
const NANOS_PER_MICRO: i64 = 1_000;

/// Redis-backed [`Store`].
///
/// One Redis string key holds the nanosecond timestamp for each rate limit
/// key, and every operation runs atomically on the server, so any number of
/// processes can share a limit through the same Redis instance.
///
/// The clock is the Redis server clock via `TIME`, never the local one, which
/// keeps limiters on machines with skewed clocks in agreement.
///
/// Cloning is cheap: clones share the underlying [`ConnectionManager`], which
/// multiplexes one connection and reconnects on failure.
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Create a store that keeps its keys under the `cellrate:` prefix.
    pub fn new(connection_manager: ConnectionManager) -> Self {
        Self::with_prefix(connection_manager, "cellrate:")
    }

    /// Create a store with a custom key prefix.
    ///
    /// The prefix is prepended verbatim, so include a trailing separator if
    /// you want one.
    pub fn with_prefix(connection_manager: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            connection_manager,
            prefix: prefix.into(),
        }
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get_with_time(&self, key: &str) -> Result<(i64, Option<i64>), CellrateError> {
        let mut connection_manager = self.connection_manager.clone();

        // MULTI/EXEC so the clock reading and the value belong to the same
        // instant on the server.
        let ((seconds, micros), value): ((i64, i64), Option<i64>) = redis::pipe()
            .atomic()
            .cmd("TIME")
            .cmd("GET")
            .arg(self.prefixed(key))
            .query_async(&mut connection_manager)
            .await?;

        let now = seconds * NANOS_PER_SEC + micros * NANOS_PER_MICRO;

        Ok((now, value))
    } // end method get_with_time

    async fn set_if_not_exists_with_ttl(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<bool, CellrateError> {
        let mut connection_manager = self.connection_manager.clone();

        // SET ... NX PX writes the value and its expiry in one step. NX makes
        // it a no-op when the key exists; Redis then replies nil, which reads
        // back as false.
        let stored: bool = redis::cmd("SET")
            .arg(self.prefixed(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut connection_manager)
            .await?;

        Ok(stored)
    } // end method set_if_not_exists_with_ttl

    async fn compare_and_swap_with_ttl(
        &self,
        key: &str,
        old: i64,
        new: i64,
        ttl: Duration,
    ) -> Result<bool, CellrateError> {
        let script = redis::Script::new(
            r#"
            local current = redis.call("GET", KEYS[1])

            if current == false then
                return -1
            end

            if current ~= ARGV[1] then
                return 0
            end

            redis.call("SET", KEYS[1], ARGV[2], "PX", ARGV[3])
            return 1
        "#,
        );

        let mut connection_manager = self.connection_manager.clone();

        let outcome: i64 = script
            .key(self.prefixed(key))
            .arg(old)
            .arg(new)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut connection_manager)
            .await?;

        if outcome == -1 {
            debug!(key, "rate limit state expired between read and swap");
        }

        Ok(outcome == 1)
    } // end method compare_and_swap_with_ttl
}

/// TTL in whole milliseconds for `PX`, floored at 1.
///
/// `PX 0` is rejected by Redis and a sub-millisecond TTL would truncate to
/// it, so the shortest expiry this store can express is one millisecond.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
