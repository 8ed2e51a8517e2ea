//! Fixed-window rate limiting keyed by (client identity, route).
//!
//! Each key owns one [`RateLimitEntry`]. A request inside the current window
//! increments the counter; the first request at or after `reset_at` replaces
//! the entry with a fresh window. This permits up to twice the nominal rate
//! across a window boundary, which is accepted behavior rather than a defect.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use ff_core::config::RateLimitPreset;
use ff_core::Clock;

/// Shared bucket for requests that carry no attributable client address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derive the rate-limit identity from proxy headers.
///
/// Prefers the first hop of `X-Forwarded-For`, then `X-Real-IP`, then the
/// [`UNKNOWN_CLIENT`] sentinel.
pub fn client_key(forwarded_for: Option<&str>, real_ip: Option<&str>) -> String {
    forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| real_ip.map(str::trim).filter(|s| !s.is_empty()))
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Counter state for one (client, route) window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitEntry {
    fn fresh(now: DateTime<Utc>, interval: chrono::Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            reset_at: now + interval,
        }
    }

    /// Whether the window has elapsed and the entry must be replaced.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }
}

/// Outcome of a single [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Seconds until the window resets; set only on denial.
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    /// Window reset as unix seconds, for the `x-ratelimit-reset` header.
    pub fn reset_unix(&self) -> i64 {
        self.reset_at.timestamp()
    }
}

/// Process-wide fixed-window limiter.
pub struct RateLimiter {
    entries: DashMap<(String, String), RateLimitEntry>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Count one request for `(client_key, route_key)` and decide whether it
    /// is allowed under `preset`. Never fails.
    pub fn check(
        &self,
        client_key: &str,
        route_key: &str,
        preset: &RateLimitPreset,
    ) -> RateLimitDecision {
        let now = self.clock.now();
        let interval =
            chrono::Duration::from_std(preset.interval()).unwrap_or(chrono::Duration::zero());

        // The shard lock held by `entry` makes replace-and-increment atomic
        // for this key.
        let mut entry = self
            .entries
            .entry((client_key.to_owned(), route_key.to_owned()))
            .or_insert_with(|| RateLimitEntry::fresh(now, interval));
        if entry.is_expired(now) {
            *entry = RateLimitEntry::fresh(now, interval);
        }
        entry.count = entry.count.saturating_add(1);
        let count = entry.count;
        let reset_at = entry.reset_at;
        drop(entry);

        let allowed = count <= preset.max_requests;
        let decision = RateLimitDecision {
            allowed,
            limit: preset.max_requests,
            remaining: preset.max_requests.saturating_sub(count),
            reset_at,
            retry_after_secs: (!allowed).then(|| secs_until(now, reset_at)),
        };

        if !allowed {
            tracing::debug!(
                client = %client_key,
                route = %route_key,
                count,
                retry_after = decision.retry_after_secs,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Current entry for a key, if any.
    pub fn entry(&self, client_key: &str, route_key: &str) -> Option<RateLimitEntry> {
        self.entries
            .get(&(client_key.to_owned(), route_key.to_owned()))
            .map(|e| *e.value())
    }

    /// Remove every entry whose window has elapsed.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "Swept expired rate-limit windows");
        }
        removed
    }

    /// Number of tracked windows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn secs_until(now: DateTime<Utc>, then: DateTime<Utc>) -> u64 {
    let ms = (then - now).num_milliseconds().max(0) as u64;
    ms.div_ceil(1000)
}
