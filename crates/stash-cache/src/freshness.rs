//! Freshness classification of cache entries.
//!
//! An entry written at `stored_at` with a `max_age` of `M` and a
//! stale-while-revalidate window of `S` moves through three states:
//!
//! - **Fresh** while `age < M`: served as-is.
//! - **Stale** while `M <= age < M + S`: served as-is, refreshed in the
//!   background.
//! - **Expired** once `age >= M + S`: treated as if absent.
//!
//! The states partition time: for any entry and any instant exactly one
//! applies.

use std::time::{Duration, SystemTime};

/// Freshness state of a cache entry at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    /// Within `max_age`; returned without recomputation.
    Fresh,
    /// Past `max_age` but within the stale-while-revalidate window.
    Stale,
    /// Past both windows; must be recomputed.
    Expired,
}

impl Freshness {
    /// Classify an entry.
    ///
    /// A `stored_at` later than `now` (clock skew between writers) counts as
    /// age zero.
    pub fn classify(
        stored_at: SystemTime,
        max_age: Duration,
        stale_while_revalidate: Duration,
        now: SystemTime,
    ) -> Self {
        let age = now.duration_since(stored_at).unwrap_or(Duration::ZERO);

        if age < max_age {
            Freshness::Fresh
        } else if age < max_age.saturating_add(stale_while_revalidate) {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    pub fn is_fresh(self) -> bool {
        self == Freshness::Fresh
    }

    pub fn is_stale(self) -> bool {
        self == Freshness::Stale
    }

    pub fn is_expired(self) -> bool {
        self == Freshness::Expired
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::Expired => "expired",
        }
    }
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
