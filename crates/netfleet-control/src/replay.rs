//! Replay guard for signed requests.
//!
//! Remembers `(key_id, nonce)` pairs for the nonce TTL. Check-and-insert is
//! a single map-entry operation, so two racing requests with the same nonce
//! cannot both be accepted.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use netfleet_common::clock::Clock;

pub struct ReplayGuard {
    seen: DashMap<(String, String), i64>,
    ttl_secs: i64,
    clock: Arc<dyn Clock>,
}

impl ReplayGuard {
    pub fn new(ttl_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            seen: DashMap::new(),
            ttl_secs,
            clock,
        }
    }

    /// Record the nonce. Returns `false` if it was already seen within the
    /// TTL, in which case nothing changes.
    pub fn check_and_record(&self, key_id: &str, nonce: &str) -> bool {
        let now = self.clock.unix_seconds();
        match self.seen.entry((key_id.to_string(), nonce.to_string())) {
            Entry::Occupied(mut entry) => {
                if now - *entry.get() < self.ttl_secs {
                    false
                } else {
                    entry.insert(now);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.unix_seconds();
        let before = self.seen.len();
        self.seen.retain(|_, first_seen| now - *first_seen < self.ttl_secs);
        before.saturating_sub(self.seen.len())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
