//! Bounded, time-limited admission
//!
//! A lease is nothing more than an expiry instant. At most `capacity` of them
//! may be live at once; expired leases are swept lazily by the next acquire.
//! There is no release: a lease frees its slot by expiring.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Expiry used when `now + duration` is not representable
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Admission primitive guarding concurrent pod startups
#[derive(Debug)]
pub struct LeaseManager {
    capacity: usize,
    leases: Mutex<Vec<Instant>>,
}

impl LeaseManager {
    /// Create a manager admitting at most `capacity` concurrent leases
    ///
    /// Capacity is validated by configuration; zero yields a manager that
    /// denies every request.
    pub fn new(capacity: usize) -> Self {
        info!(capacity, "Configured lease manager");
        Self {
            capacity,
            leases: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Try to take a lease expiring `duration` from now
    ///
    /// Sweep, count and insert happen under one lock, so concurrent callers
    /// can never push the live count past `capacity`.
    pub fn acquire(&self, duration: Duration) -> bool {
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        leases.retain(|expires_at| *expires_at > now);

        if leases.len() >= self.capacity {
            debug!(active = leases.len(), capacity = self.capacity, "Lease denied");
            return false;
        }

        let expires_at = now.checked_add(duration).unwrap_or_else(|| {
            warn!(
                duration_secs = duration.as_secs(),
                "Lease duration out of range, clamping"
            );
            now + FAR_FUTURE
        });
        leases.push(expires_at);
        info!(
            duration_secs = duration.as_secs(),
            active = leases.len(),
            capacity = self.capacity,
            "Lease acquired"
        );
        true
    }

    /// Number of leases that have not yet expired
    pub fn active(&self) -> usize {
        let leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        leases.iter().filter(|expires_at| **expires_at > now).count()
    }
}

#[cfg(test)]
#[path = "lease_test.rs"]
mod tests;
