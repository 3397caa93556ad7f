//! Fire-and-forget task dispatch across the supported runtimes.
//!
//! Deny hooks run off the caller's path. With a runtime feature enabled they
//! are handed to that runtime; otherwise they get a plain thread.

#[cfg(all(feature = "redis-tokio", not(feature = "redis-smol")))]
pub(crate) fn spawn_task<F>(task: F)
where
    F: FnOnce() + Send + 'static,
{
    // Callers are not required to be inside a tokio context; a limiter over
    // a memory store may run under any executor even with this feature on.
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { task() });
        }
        Err(_) => {
            std::thread::spawn(task);
        }
    }
}

#[cfg(all(feature = "redis-smol", not(feature = "redis-tokio")))]
pub(crate) fn spawn_task<F>(task: F)
where
    F: FnOnce() + Send + 'static,
{
    smol::spawn(async move { task() }).detach();
}

#[cfg(not(any(
    all(feature = "redis-tokio", not(feature = "redis-smol")),
    all(feature = "redis-smol", not(feature = "redis-tokio"))
)))]
pub(crate) fn spawn_task<F>(task: F)
where
    F: FnOnce() + Send + 'static,
{
    std::thread::spawn(task);
}
