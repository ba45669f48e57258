use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of `nDPS` numbers. Shared by reference; concurrent callers in one
/// process never receive the same value.
#[derive(Debug)]
pub struct SequenceCounter {
    next: AtomicU64,
}

impl SequenceCounter {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    /// Seeds the counter somewhere in 1000..=9999 so restarts in homologation
    /// rarely reuse a number already accepted by the authority.
    pub fn random_seeded() -> Self {
        Self::new(rand::thread_rng().gen_range(1000..=9999))
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::random_seeded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_counter_increments_from_start() {
        let counter = SequenceCounter::new(42);
        assert_eq!(counter.next(), 42);
        assert_eq!(counter.next(), 43);
        assert_eq!(counter.peek(), 44);
    }

    #[test]
    fn test_random_seed_range() {
        for _ in 0..50 {
            let start = SequenceCounter::random_seeded().peek();
            assert!((1000..=9999).contains(&start));
        }
    }

    #[test]
    fn test_concurrent_callers_never_collide() {
        let counter = Arc::new(SequenceCounter::new(1));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || (0..250).map(|_| counter.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value));
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
