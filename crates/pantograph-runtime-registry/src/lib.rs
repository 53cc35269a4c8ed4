//! Job queue rate-limiter state and admission contracts.
//!
//! Split into a storage seam ([`store::LimiterStore`], so the sliding
//! window's budget can optionally survive a process restart) and the
//! limiter contract itself ([`limiter::RateLimiter`], implemented by
//! [`limiter::SlidingWindowRateLimiter`] and [`limiter::ConcurrencyLimiter`]).
//! [`tabular`] provides a [`store::LimiterStore`] impl for hosts that want
//! that budget to survive a restart.

pub mod limiter;
pub mod store;
pub mod tabular;

pub use limiter::{ConcurrencyLimiter, RateLimiter, SlidingWindowRateLimiter};
pub use store::{InMemoryLimiterStore, LimiterStore};
pub use tabular::TabularLimiterStore;
