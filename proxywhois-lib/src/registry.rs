//! Process-wide state shared by every worker.
//!
//! The registry counts active workers and remembers which external IPs are
//! already served by a running worker, so two proxies that exit through the
//! same address never both consume work.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct SharedRegistry {
    active_workers: AtomicUsize,
    claimed_ips: Mutex<HashSet<String>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned set is still a valid set; keep using it.
    fn claimed(&self) -> MutexGuard<'_, HashSet<String>> {
        self.claimed_ips
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `ip` for the caller. Returns `false` if it is already claimed.
    pub fn claim_proxy_ip(&self, ip: &str) -> bool {
        self.claimed().insert(ip.to_string())
    }

    /// Give up a claim. Returns `false` if `ip` was not claimed.
    pub fn release_proxy_ip(&self, ip: &str) -> bool {
        self.claimed().remove(ip)
    }

    pub fn is_claimed(&self, ip: &str) -> bool {
        self.claimed().contains(ip)
    }

    /// Snapshot of the claimed IPs, sorted.
    pub fn claimed_ips(&self) -> Vec<String> {
        let mut ips: Vec<String> = self.claimed().iter().cloned().collect();
        ips.sort();
        ips
    }

    pub fn increment_workers(&self) -> usize {
        self.active_workers.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement the worker count, never below zero.
    pub fn decrement_workers(&self) -> usize {
        let previous = self
            .active_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_claim_is_exclusive() {
        let registry = SharedRegistry::new();
        assert!(registry.claim_proxy_ip("203.0.113.9"));
        assert!(!registry.claim_proxy_ip("203.0.113.9"));
        assert!(registry.claim_proxy_ip("203.0.113.10"));
        assert_eq!(registry.claimed_ips(), vec!["203.0.113.10", "203.0.113.9"]);
    }

    #[test]
    fn test_release_allows_reclaim() {
        let registry = SharedRegistry::new();
        assert!(registry.claim_proxy_ip("198.51.100.1"));
        assert!(registry.release_proxy_ip("198.51.100.1"));
        assert!(!registry.release_proxy_ip("198.51.100.1"));
        assert!(!registry.is_claimed("198.51.100.1"));
        assert!(registry.claim_proxy_ip("198.51.100.1"));
    }

    #[test]
    fn test_concurrent_claims_single_winner() {
        const CALLERS: usize = 32;
        let registry = Arc::new(SharedRegistry::new());
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.claim_proxy_ip("192.0.2.55")
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(registry.claimed_ips().len(), 1);
    }

    #[test]
    fn test_worker_counter_saturates() {
        let registry = SharedRegistry::new();
        assert_eq!(registry.increment_workers(), 1);
        assert_eq!(registry.increment_workers(), 2);
        assert_eq!(registry.decrement_workers(), 1);
        assert_eq!(registry.decrement_workers(), 0);
        assert_eq!(registry.decrement_workers(), 0);
        assert_eq!(registry.active_workers(), 0);
    }
}
