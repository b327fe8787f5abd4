use std::collections::VecDeque;

/// Capacity of the per-camera vehicle count window.
pub const HISTORY_CAPACITY: usize = 10;

/// Fixed-capacity window of recent vehicle counts, oldest evicted first.
#[derive(Clone, Debug, Default)]
pub struct CountHistory {
    counts: VecDeque<u32>,
}

impl CountHistory {
    pub fn new() -> Self {
        Self {
            counts: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Append a count, evicting the oldest entry once the window is full.
    pub fn push(&mut self, count: u32) {
        self.counts.push_back(count);
        if self.counts.len() > HISTORY_CAPACITY {
            self.counts.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Arithmetic mean of the last `n` entries. Callers must guard
    /// `n <= len()` and a non-empty window; the timing engine does.
    pub fn recent_average(&self, n: usize) -> f64 {
        debug_assert!(n > 0 && n <= self.counts.len());
        let sum: u64 = self.counts.iter().rev().take(n).map(|&c| c as u64).sum();
        sum as f64 / n as f64
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.counts.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut history = CountHistory::new();
        for count in 0..11u32 {
            history.push(count);
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
        let kept: Vec<u32> = history.iter().collect();
        assert_eq!(kept, (1..11).collect::<Vec<u32>>());
    }

    #[test]
    fn recent_average_uses_tail() {
        let mut history = CountHistory::new();
        for count in [1u32, 2, 3, 10, 20] {
            history.push(count);
        }
        assert_eq!(history.recent_average(3), 11.0);
        assert_eq!(history.recent_average(5), 7.2);
    }
}
