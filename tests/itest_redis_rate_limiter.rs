#![cfg(any(feature = "redis-tokio", feature = "redis-smol"))]

use std::{
    env,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use cellrate::{GcraRateLimiter, KeyedRateLimiter, Rate, RateQuota, RedisStore};

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_prefix() -> String {
    let n: u64 = rand::random();
    format!("cellrate_itest_{n}:")
}

fn hourly_quota(max_burst: u64) -> RateQuota {
    RateQuota {
        max_rate: Rate::per_hour(1),
        max_burst,
    }
}

async fn build_store(url: &str, prefix: &str) -> RedisStore {
    let client = redis::Client::open(url).unwrap();
    let connection_manager = client.get_connection_manager().await.unwrap();

    RedisStore::with_prefix(connection_manager, prefix)
}

#[test]
fn limiters_in_separate_processes_enforce_one_limit() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let prefix = unique_prefix();

        // Separate clients, as two processes would have.
        let first =
            GcraRateLimiter::new(build_store(&url, &prefix).await, hourly_quota(5)).unwrap();
        let second =
            GcraRateLimiter::new(build_store(&url, &prefix).await, hourly_quota(5)).unwrap();

        for i in 0..6u64 {
            let limiter = if i % 2 == 0 { &first } else { &second };
            let (limited, result) = limiter.rate_limit("tenant", 1).await.unwrap();

            assert!(!limited, "call {i} should be admitted");
            assert_eq!(result.remaining, 5 - i);
        }

        let (limited, _) = first.rate_limit("tenant", 1).await.unwrap();
        assert!(limited);

        let (limited, _) = second.rate_limit("tenant", 1).await.unwrap();
        assert!(limited);
    });
}

#[test]
fn concurrent_distributed_burst_admits_exactly_the_limit() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let prefix = unique_prefix();

        let first =
            Arc::new(GcraRateLimiter::new(build_store(&url, &prefix).await, hourly_quota(5)).unwrap());
        let second =
            Arc::new(GcraRateLimiter::new(build_store(&url, &prefix).await, hourly_quota(5)).unwrap());

        let allowed = Arc::new(AtomicU32::new(0));
        let mut tasks = Vec::new();

        for i in 0..20 {
            let limiter = if i % 2 == 0 {
                Arc::clone(&first)
            } else {
                Arc::clone(&second)
            };
            let allowed = Arc::clone(&allowed);

            tasks.push(tokio::spawn(async move {
                let (limited, _) = limiter.rate_limit("stampede", 1).await.unwrap();

                if !limited {
                    allowed.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(allowed.load(Ordering::Relaxed), 6);
    });
}

#[test]
fn denied_call_is_admitted_after_waiting_out_retry_after() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let prefix = unique_prefix();
        let quota = RateQuota {
            max_rate: Rate::per_second(2),
            max_burst: 1,
        };
        let limiter = GcraRateLimiter::new(build_store(&url, &prefix).await, quota).unwrap();

        for _ in 0..2 {
            let (limited, _) = limiter.rate_limit("waiter", 1).await.unwrap();
            assert!(!limited);
        }

        let (limited, result) = limiter.rate_limit("waiter", 1).await.unwrap();
        assert!(limited);

        let retry_after = result.retry_after.unwrap();
        assert!(retry_after <= Duration::from_millis(500));

        tokio::time::sleep(retry_after + Duration::from_millis(100)).await;

        let (limited, _) = limiter.rate_limit("waiter", 1).await.unwrap();
        assert!(!limited);
    });
}

#[test]
fn keyed_limiter_over_redis_invokes_the_deny_hook() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let prefix = unique_prefix();
        let denied = Arc::new(Mutex::new(Vec::<String>::new()));

        let hook_denied = Arc::clone(&denied);
        let limiter =
            KeyedRateLimiter::with_deny_hook(build_store(&url, &prefix).await, move |key| {
                hook_denied.lock().unwrap().push(key);
            });

        limiter.add_key("tenant", hourly_quota(1)).unwrap();

        for _ in 0..2 {
            let (limited, _) = limiter.rate_limit("tenant").await.unwrap();
            assert!(!limited);
        }

        let (limited, _) = limiter.rate_limit("tenant").await.unwrap();
        assert!(limited);

        let start = Instant::now();
        loop {
            if *denied.lock().unwrap() == ["tenant"] {
                break;
            }

            if start.elapsed() > Duration::from_secs(2) {
                panic!("deny hook did not run");
            }

            thread::sleep(Duration::from_millis(10));
        }
    });
}
