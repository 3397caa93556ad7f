#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod rate;
pub use rate::*;

mod rate_limiter;
pub use rate_limiter::{GcraRateLimiter, RateLimitResult};

mod keyed_rate_limiter;
pub use keyed_rate_limiter::*;

mod store;
pub use store::*;

mod error;
pub use error::*;

mod runtime;
