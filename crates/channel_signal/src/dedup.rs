use std::collections::HashSet;

/// Number of timestamps remembered before the window is reset.
pub const DEDUP_CAPACITY: usize = 1000;

/// Bounded memory of envelope timestamps already seen on this relay.
///
/// When full, the whole window is dropped before the next insert. It does not
/// evict oldest-first, so a timestamp seen just before a reset can be
/// accepted again.
#[derive(Debug)]
pub struct DedupWindow {
    seen: HashSet<u64>,
    capacity: usize,
}

impl Default for DedupWindow {
    fn default() -> Self {
        DedupWindow::with_capacity(DEDUP_CAPACITY)
    }
}

impl DedupWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        DedupWindow {
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Records `timestamp` and returns `true` if it had not been seen yet.
    pub fn observe(&mut self, timestamp: u64) -> bool {
        if self.seen.contains(&timestamp) {
            return false;
        }
        if self.seen.len() >= self.capacity {
            self.seen.clear();
        }
        self.seen.insert(timestamp);
        true
    }

    pub fn contains(&self, timestamp: u64) -> bool {
        self.seen.contains(&timestamp)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_timestamp_is_rejected() {
        let mut window = DedupWindow::default();
        assert!(window.observe(42));
        assert!(!window.observe(42));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_window_resets_when_full() {
        let mut window = DedupWindow::default();
        for ts in 1..=1000u64 {
            assert!(window.observe(ts));
        }
        assert_eq!(window.len(), DEDUP_CAPACITY);

        // the 1001st distinct timestamp clears everything first
        assert!(window.observe(1001));
        assert_eq!(window.len(), 1);
        assert!(window.contains(1001));

        // which means an old timestamp gets through again
        assert!(!window.contains(1000));
        assert!(window.observe(1000));
    }

    #[test]
    fn test_full_window_still_rejects_known_timestamp() {
        let mut window = DedupWindow::with_capacity(3);
        window.observe(1);
        window.observe(2);
        window.observe(3);
        assert!(!window.observe(2));
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut window = DedupWindow::with_capacity(0);
        assert_eq!(window.capacity(), 1);
        assert!(window.observe(1));
        assert!(window.observe(2));
        assert_eq!(window.len(), 1);
    }
}
