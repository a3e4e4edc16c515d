use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// One throttling class: a set of path prefixes sharing a window and a cap.
/// This is request throttling only; billing quotas live in the entitlement
/// service and know nothing about these windows.
pub struct EndpointClass {
    pub name: &'static str,
    pub prefixes: &'static [&'static str],
    pub max_requests: u32,
    pub window_secs: i64,
}

/// Static classification table. First prefix match wins, the last entry is
/// the catch-all default.
pub const CLASSES: &[EndpointClass] = &[
    EndpointClass {
        name: "auth",
        prefixes: &["/api/auth"],
        max_requests: 10,
        window_secs: 60,
    },
    EndpointClass {
        name: "ai",
        prefixes: &["/api/ai", "/api/dashboard/entitlement/consume"],
        max_requests: 30,
        window_secs: 60,
    },
    EndpointClass {
        name: "default",
        prefixes: &[],
        max_requests: 120,
        window_secs: 60,
    },
];

pub fn classify(path: &str) -> &'static EndpointClass {
    for class in CLASSES {
        if class.prefixes.iter().any(|p| path.starts_with(p)) {
            return class;
        }
    }
    CLASSES.last().expect("classification table is non-empty")
}

#[derive(Debug, Clone)]
struct WindowEntry {
    count: u32,
    window_end: DateTime<Utc>,
}

/// Outcome of one rate-limit check, including the header material clients use
/// to self-throttle.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_epoch: i64,
    pub retry_after_secs: u64,
}

/// Process-local fixed-window counters keyed by (identity, class). Entries are
/// overwritten in place once their window has passed and purged in bulk by an
/// occasional sweep; state is not shared across instances.
pub struct FixedWindowStore {
    entries: DashMap<(String, &'static str), WindowEntry>,
    checks: AtomicU64,
}

/// Every this-many checks, one caller also pays for a purge pass.
const PURGE_EVERY: u64 = 4096;

impl FixedWindowStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    /// Counts one request against (identity, class) and decides it. The count
    /// and compare happen under the map's per-key lock, so concurrent requests
    /// for the same key serialize here.
    pub fn check(&self, identity: &str, class: &'static EndpointClass, now: DateTime<Utc>) -> Decision {
        if self.checks.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_expired(now);
        }

        let window = Duration::seconds(class.window_secs);
        let mut entry = self
            .entries
            .entry((identity.to_string(), class.name))
            .or_insert_with(|| WindowEntry {
                count: 0,
                window_end: now + window,
            });

        if now >= entry.window_end {
            entry.count = 0;
            entry.window_end = now + window;
        }
        entry.count += 1;

        let allowed = entry.count <= class.max_requests;
        let remaining = class.max_requests.saturating_sub(entry.count);
        let reset_epoch = entry.window_end.timestamp();
        let retry_after_secs = (entry.window_end - now).num_seconds().max(1) as u64;

        Decision {
            allowed,
            limit: class.max_requests,
            remaining,
            reset_epoch,
            retry_after_secs,
        }
    }

    /// Drops every entry whose window has passed. Idempotent, safe to skip.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.window_end > now);
        let purged = before - self.entries.len();
        if purged > 0 {
            log::debug!("Purged {} expired rate-limit entries", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FixedWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 27, 12, 0, 0).unwrap()
    }

    fn auth_class() -> &'static EndpointClass {
        classify("/api/auth/login")
    }

    #[test]
    fn classification_first_match_wins_with_default_fallback() {
        assert_eq!(classify("/api/auth/login").name, "auth");
        assert_eq!(classify("/api/dashboard/entitlement/consume").name, "ai");
        assert_eq!(classify("/api/dashboard/sub/current").name, "default");
        assert_eq!(classify("/anything/else").name, "default");
    }

    #[test]
    fn requests_over_the_cap_are_rejected_within_the_window() {
        let store = FixedWindowStore::new();
        let class = auth_class();
        let now = t0();

        for i in 0..class.max_requests {
            let decision = store.check("user-1", class, now);
            assert!(decision.allowed, "request {} should pass", i + 1);
        }

        let over = store.check("user-1", class, now);
        assert!(!over.allowed);
        assert_eq!(over.remaining, 0);
        assert!(over.retry_after_secs >= 1);
    }

    #[test]
    fn a_fresh_window_opens_after_expiry() {
        let store = FixedWindowStore::new();
        let class = auth_class();
        let now = t0();

        for _ in 0..=class.max_requests {
            store.check("user-1", class, now);
        }
        assert!(!store.check("user-1", class, now).allowed);

        let later = now + Duration::seconds(class.window_secs + 1);
        let decision = store.check("user-1", class, later);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, class.max_requests - 1);
    }

    #[test]
    fn identities_do_not_share_windows() {
        let store = FixedWindowStore::new();
        let class = auth_class();
        let now = t0();

        for _ in 0..class.max_requests {
            store.check("user-1", class, now);
        }
        assert!(!store.check("user-1", class, now).allowed);
        assert!(store.check("user-2", class, now).allowed);
    }

    #[test]
    fn remaining_counts_down_and_reset_is_window_end() {
        let store = FixedWindowStore::new();
        let class = auth_class();
        let now = t0();

        let first = store.check("user-1", class, now);
        assert_eq!(first.remaining, class.max_requests - 1);
        assert_eq!(first.reset_epoch, (now + Duration::seconds(class.window_secs)).timestamp());
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let store = FixedWindowStore::new();
        let class = auth_class();
        let now = t0();

        store.check("old", class, now);
        let later = now + Duration::seconds(class.window_secs + 5);
        store.check("new", class, later);

        let purged = store.purge_expired(later);
        assert_eq!(purged, 1);
        assert_eq!(store.len(), 1);
    }
}
