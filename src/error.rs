/// Error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum CellrateError {
    /// A rate quota that cannot be enforced, such as a zero-length period.
    #[error("invalid rate quota: {0}")]
    InvalidQuota(String),

    /// Redis error.
    #[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
    #[cfg_attr(docsrs, doc(cfg(any(feature = "redis-tokio", feature = "redis-smol"))))]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A storage backend failure outside the backend's own error type.
    #[error("store error: {0}")]
    Store(String),

    /// Every optimistic write lost its race; the limit state was not updated.
    ///
    /// The call consumed no capacity. Callers may retry, treat the call as
    /// denied, or fail open, depending on what the limit protects.
    #[error("rate limit state for key {key:?} not updated after {attempts} attempts")]
    StorageContention {
        /// Key whose state was under contention.
        key: String,
        /// Write attempts made before giving up.
        attempts: u32,
    },

    /// A keyed rate limit call for a key with no registered quota.
    #[error("no rate quota registered for key {0:?}")]
    UnregisteredKey(String),
}
