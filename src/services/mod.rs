pub mod rate_limiter;
pub mod session_service;
pub mod validation;

pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use session_service::{LockedSession, SessionError, SessionPolicy, SessionService};
