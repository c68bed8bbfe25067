//! Brute-force throttling, anti-forgery tokens and device trust signals.

pub mod csrf;
pub mod device_trust;
pub mod lockout;
pub mod rate_limiter;

pub use csrf::CsrfGuard;
pub use device_trust::{DeviceRecord, DeviceTrust, DeviceTrustRegistry};
pub use lockout::{LockoutEntry, LockoutTracker};
pub use rate_limiter::{login_key, RateLimitState, RateLimiter, RatePurpose};
