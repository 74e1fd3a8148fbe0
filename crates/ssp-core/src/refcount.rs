use std::sync::atomic::{AtomicU32, Ordering};

/// Atomic reference counter.
///
/// Only the thread whose `release` returns `true` may destroy the object
/// that embeds the counter.
#[derive(Debug)]
pub struct RefCount {
    count: AtomicU32,
}

impl RefCount {
    pub const fn new(count: u32) -> Self {
        Self {
            count: AtomicU32::new(count),
        }
    }

    /// Take an additional reference.
    #[inline]
    pub fn acquire(&self) {
        let old = self.count.fetch_add(1, Ordering::Acquire);
        assert!(old != u32::MAX, "reference count overflow");
    }

    /// Drop a reference. Returns `true` if it was the last one.
    #[inline]
    pub fn release(&self) -> bool {
        let old = self.count.fetch_sub(1, Ordering::Release);
        assert!(old != 0, "reference count dropped below zero");
        if old == 1 {
            // Pair with the releases of other threads before teardown.
            std::sync::atomic::fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// Current count. Only meaningful when no other thread holds a reference.
    pub fn get(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_last_release() {
        let rc = RefCount::new(1);
        rc.acquire();
        rc.acquire();
        assert_eq!(rc.get(), 3);
        assert!(!rc.release());
        assert!(!rc.release());
        assert!(rc.release());
    }

    #[test]
    #[should_panic(expected = "below zero")]
    fn test_release_past_zero_panics() {
        let rc = RefCount::new(1);
        assert!(rc.release());
        rc.release();
    }

    #[test]
    fn test_concurrent_exactly_one_last() {
        let rc = Arc::new(RefCount::new(1));
        for _ in 0..64 {
            rc.acquire();
        }
        let handles: Vec<_> = (0..65)
            .map(|_| {
                let rc = Arc::clone(&rc);
                thread::spawn(move || rc.release())
            })
            .collect();
        let lasts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&last| last)
            .count();
        assert_eq!(lasts, 1);
    }
}
