//! Per-process sequence numbers for outbound frames.
//!
//! Peers log gaps and duplicates by sequence number; the cost protocol does
//! not depend on ordering, so a plain wrapping counter is enough.

use std::sync::atomic::{AtomicU64, Ordering};

/// A lock-free, wrapping counter shared by every sender in the process.
///
/// # Examples
///
/// ```rust
/// use avroute_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequence number; wraps from `u64::MAX` to 0.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the value the next call to [`SequenceCounter::next`] would yield.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_wraps_at_u64_max() {
        let counter = SequenceCounter {
            inner: AtomicU64::new(u64::MAX),
        };

        assert_eq!(counter.next(), u64::MAX);
        assert_eq!(counter.next(), 0);
    }

    #[test]
    fn test_concurrent_senders_never_share_a_number() {
        // Arrange
        let counter = Arc::new(SequenceCounter::new());

        // Act
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || (0..500).map(|_| c.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 2000);
        assert_eq!(counter.current(), 2000);
    }
}
