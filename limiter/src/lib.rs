use std::sync::Arc;

use middleware::{fixed::FixedWindowLimiter, global::OverloadGuard};
use window::FixedWindowStore;

pub mod window;

pub mod middleware {
    pub mod fixed;
    pub mod global;
}

/// Per-identity, per-endpoint-class fixed-window throttle. The store is shared
/// so a background task can purge expired entries.
pub fn middleware(store: Arc<FixedWindowStore>) -> FixedWindowLimiter {
    FixedWindowLimiter::new(store)
}

/// Server-wide requests-per-second guard, independent of any identity.
pub fn overload_middleware(permits_per_second: u32) -> OverloadGuard {
    OverloadGuard::new(permits_per_second)
}
