//! Credential pool with quota-aware rotation.
//!
//! The pool holds an ordered list of forge tokens and tracks, per credential,
//! the remaining API quota and the instant it resets. `acquire` hands out the
//! freshest usable credential round-robin; `report` feeds observed rate-limit
//! headers back in.
//!
//! Reads vastly outnumber writes (`acquire` happens per request, `report`
//! only when a response carried quota headers), so the state sits behind an
//! `RwLock` and `acquire` never takes the write half: a credential whose
//! reset has passed is treated as refreshed without mutating it, and the
//! round-robin cursor is a separate atomic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from pool construction or acquisition.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was constructed with no credentials.
    #[error("Credential pool is empty; configure at least one forge token")]
    Empty,
}

/// A credential handed out by the pool.
///
/// The `id` is the slot index; callers pass it back to [`CredentialPool::report`]
/// after observing rate-limit headers.
#[derive(Debug, Clone)]
pub struct CredentialLease {
    /// Slot identifier for later reporting.
    pub id: usize,
    /// The opaque token to present to the forge.
    pub token: String,
}

#[derive(Debug)]
struct Slot {
    token: String,
    remaining: u32,
    reset_at: DateTime<Utc>,
}

impl Slot {
    /// Remaining quota, accounting for a reset window that already passed.
    fn effective_remaining(&self, now: DateTime<Utc>, ceiling: u32) -> u32 {
        if self.reset_at <= now {
            ceiling
        } else {
            self.remaining
        }
    }
}

/// Quota-aware pool of forge credentials.
pub struct CredentialPool {
    slots: RwLock<Vec<Slot>>,
    cursor: AtomicUsize,
    safety_threshold: u32,
    ceiling: u32,
}

impl CredentialPool {
    /// Creates a pool over the given tokens.
    ///
    /// Every credential starts at the nominal ceiling with an already-passed
    /// reset instant, so the first acquisitions treat them all as fresh.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Empty` if `tokens` is empty.
    pub fn new(
        tokens: Vec<String>,
        safety_threshold: u32,
        ceiling: u32,
    ) -> Result<Self, PoolError> {
        if tokens.is_empty() {
            return Err(PoolError::Empty);
        }

        let now = Utc::now();
        let slots = tokens
            .into_iter()
            .map(|token| Slot {
                token,
                remaining: ceiling,
                reset_at: now,
            })
            .collect();

        Ok(Self {
            slots: RwLock::new(slots),
            cursor: AtomicUsize::new(0),
            safety_threshold,
            ceiling,
        })
    }

    /// Hands out the next usable credential.
    ///
    /// Round-robin from a rotating cursor, skipping credentials whose
    /// effective remaining quota sits below the safety threshold. When every
    /// credential is parked, returns the one whose reset comes soonest so the
    /// caller pays the shortest possible wait.
    pub fn acquire(&self) -> CredentialLease {
        let now = Utc::now();
        let slots = self.slots.read().expect("credential pool lock poisoned");
        let len = slots.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;

        for offset in 0..len {
            let idx = (start + offset) % len;
            if slots[idx].effective_remaining(now, self.ceiling) >= self.safety_threshold {
                return CredentialLease {
                    id: idx,
                    token: slots[idx].token.clone(),
                };
            }
        }

        // All parked: fall back to the earliest reset.
        let idx = slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.reset_at)
            .map(|(i, _)| i)
            .unwrap_or(0);

        tracing::warn!(
            credential = idx,
            reset_at = %slots[idx].reset_at,
            "All credentials below safety threshold; using earliest reset"
        );

        CredentialLease {
            id: idx,
            token: slots[idx].token.clone(),
        }
    }

    /// Records the quota observed in the most recent response.
    ///
    /// Concurrent reports on the same credential are last-write-wins, which
    /// matches the freshest-header-wins semantics the forge implies.
    pub fn report(&self, id: usize, remaining: u32, reset_at: DateTime<Utc>) {
        let mut slots = self.slots.write().expect("credential pool lock poisoned");
        if let Some(slot) = slots.get_mut(id) {
            slot.remaining = remaining;
            slot.reset_at = reset_at;
        }
    }

    /// Marks a credential as rejected by the forge.
    ///
    /// The slot is parked until its ceiling-refresh at the reported reset;
    /// rotation naturally routes around it in the meantime.
    pub fn mark_rejected(&self, id: usize, reset_at: DateTime<Utc>) {
        tracing::warn!(credential = id, "Forge rejected credential; parking it");
        self.report(id, 0, reset_at);
    }

    /// Number of credentials in the pool.
    pub fn len(&self) -> usize {
        self.slots.read().expect("credential pool lock poisoned").len()
    }

    /// Whether the pool holds no credentials. Never true for a constructed pool.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn pool(tokens: &[&str]) -> CredentialPool {
        CredentialPool::new(tokens.iter().map(|t| t.to_string()).collect(), 10, 5000)
            .expect("non-empty pool")
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(
            CredentialPool::new(Vec::new(), 10, 5000),
            Err(PoolError::Empty)
        ));
    }

    #[test]
    fn round_robin_rotates() {
        let p = pool(&["t0", "t1", "t2"]);
        let first = p.acquire();
        let second = p.acquire();
        let third = p.acquire();
        let fourth = p.acquire();

        assert_ne!(first.id, second.id);
        assert_ne!(second.id, third.id);
        assert_eq!(first.id, fourth.id);
    }

    #[test]
    fn parked_credential_is_skipped() {
        let p = pool(&["t0", "t1"]);
        let future = Utc::now() + ChronoDuration::hours(1);

        // t0 drops below the threshold of 10 with an unexpired reset.
        p.report(0, 3, future);

        for _ in 0..4 {
            let lease = p.acquire();
            assert_eq!(lease.id, 1, "only t1 is above threshold");
            assert_eq!(lease.token, "t1");
        }
    }

    #[test]
    fn passed_reset_refreshes_quota() {
        let p = pool(&["t0", "t1"]);
        let past = Utc::now() - ChronoDuration::minutes(5);
        let future = Utc::now() + ChronoDuration::hours(1);

        // Both below threshold, but t0's reset already passed.
        p.report(0, 0, past);
        p.report(1, 2, future);

        let lease = p.acquire();
        assert_eq!(lease.id, 0);
    }

    #[test]
    fn all_parked_falls_back_to_earliest_reset() {
        let p = pool(&["t0", "t1", "t2"]);
        let now = Utc::now();
        p.report(0, 1, now + ChronoDuration::minutes(30));
        p.report(1, 2, now + ChronoDuration::minutes(5));
        p.report(2, 0, now + ChronoDuration::minutes(60));

        let lease = p.acquire();
        assert_eq!(lease.id, 1, "earliest reset wins when all are parked");
    }

    #[test]
    fn report_is_last_write_wins() {
        let p = pool(&["t0", "t1"]);
        let future = Utc::now() + ChronoDuration::hours(1);

        p.report(0, 4000, future);
        p.report(0, 9, future);

        // t0 now sits below the threshold; rotation must avoid it.
        let lease = p.acquire();
        assert_eq!(lease.id, 1);
    }

    #[test]
    fn rejected_credential_is_parked() {
        let p = pool(&["t0", "t1"]);
        p.mark_rejected(0, Utc::now() + ChronoDuration::hours(1));

        for _ in 0..3 {
            assert_eq!(p.acquire().id, 1);
        }
    }
}
