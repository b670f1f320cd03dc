//! Idempotency store.
//!
//! Keys are scoped to the submitting API key. A key is reserved the moment
//! it is first seen, before the job exists, so a concurrent duplicate sees
//! the reservation instead of "not found". Records expire after the TTL and
//! are then reusable.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use netfleet_common::clock::Clock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// First sight of the key; the caller must create the job and bind it.
    Fresh,
    /// The key already produced this job.
    Existing(String),
    /// Another submission holds the key and has not bound a job yet.
    InFlight,
}

#[derive(Debug)]
struct Record {
    job_id: Option<String>,
    created_at: i64,
}

pub struct IdempotencyStore {
    records: DashMap<(String, String), Record>,
    ttl_secs: i64,
    clock: Arc<dyn Clock>,
}

impl IdempotencyStore {
    pub fn new(ttl_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            ttl_secs,
            clock,
        }
    }

    pub fn reserve_or_return(&self, caller: &str, key: &str) -> Reservation {
        let now = self.clock.unix_seconds();
        let fresh = Record {
            job_id: None,
            created_at: now,
        };
        match self.records.entry((caller.to_string(), key.to_string())) {
            Entry::Occupied(mut entry) => {
                let record = entry.get();
                if now - record.created_at >= self.ttl_secs {
                    entry.insert(fresh);
                    return Reservation::Fresh;
                }
                match &record.job_id {
                    Some(job_id) => Reservation::Existing(job_id.clone()),
                    None => Reservation::InFlight,
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh);
                Reservation::Fresh
            }
        }
    }

    /// Attach the created job to a reservation.
    pub fn bind(&self, caller: &str, key: &str, job_id: &str) {
        if let Some(mut record) = self.records.get_mut(&(caller.to_string(), key.to_string())) {
            record.job_id = Some(job_id.to_string());
        } else {
            tracing::warn!(job_id, "idempotency reservation vanished before bind");
        }
    }

    /// Drop expired records. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.unix_seconds();
        let before = self.records.len();
        self.records
            .retain(|_, record| now - record.created_at < self.ttl_secs);
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netfleet_common::clock::ManualClock;

    fn store() -> (IdempotencyStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        (IdempotencyStore::new(3600, clock.clone()), clock)
    }

    #[test]
    fn reserve_then_bind_then_return() {
        let (store, _) = store();
        assert_eq!(store.reserve_or_return("k", "idem-1"), Reservation::Fresh);
        assert_eq!(store.reserve_or_return("k", "idem-1"), Reservation::InFlight);
        store.bind("k", "idem-1", "job_1");
        assert_eq!(
            store.reserve_or_return("k", "idem-1"),
            Reservation::Existing("job_1".into())
        );
    }

    #[test]
    fn keys_are_scoped_per_caller() {
        let (store, _) = store();
        assert_eq!(store.reserve_or_return("alice", "idem"), Reservation::Fresh);
        assert_eq!(store.reserve_or_return("bob", "idem"), Reservation::Fresh);
    }

    #[test]
    fn expired_records_are_reusable_and_purged() {
        let (store, clock) = store();
        store.reserve_or_return("k", "old");
        store.bind("k", "old", "job_old");
        clock.advance_secs(1800);
        store.reserve_or_return("k", "newer");
        clock.advance_secs(1800);

        assert_eq!(store.reserve_or_return("k", "old"), Reservation::Fresh);
        clock.advance_secs(1800);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_reservations_yield_one_fresh() {
        let (store, _) = store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.reserve_or_return("k", "race"))
            })
            .collect();
        let fresh = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| *r == Reservation::Fresh)
            .count();
        assert_eq!(fresh, 1);
    }
}
