//! Policy abstractions for delivery operations.
//!
//! - [`RetryPolicy`]: how many attempts, and how long to back off between them
//! - [`RateLimiter`]: how fast messages may leave

pub mod rate_limit;
pub mod retry;

pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use retry::RetryPolicy;
