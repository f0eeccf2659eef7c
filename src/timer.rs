//! Device-clock timers.
//!
//! Sequencing, randomization, auto-stop and rebuild settling are all
//! expressed as events due at a device frame. Repeating loops carry a
//! [`LoopToken`]; bumping the owning [`LoopGuard`] orphans every timer that
//! was scheduled under an older token, so a cancelled loop can never fire
//! against a newer graph.

use crate::error::EngineError;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Longest delay any tool may schedule: one hour
pub const MAX_DELAY_MS: f64 = 3_600_000.0;

/// Accepts finite delays within `0..=MAX_DELAY_MS`
pub fn check_delay_ms(name: &'static str, ms: f64) -> Result<(), EngineError> {
    if (0.0..=MAX_DELAY_MS).contains(&ms) {
        Ok(())
    } else {
        Err(EngineError::invalid(name, ms))
    }
}

struct Entry<E> {
    due: u64,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<E> Eq for Entry<E> {}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Entry<E> {
    // Min-heap on (due, seq)
    fn cmp(&self, other: &Self) -> Ordering {
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pending events ordered by due frame, FIFO among equal frames.
pub struct TimerQueue<E> {
    heap: BinaryHeap<Entry<E>>,
    seq: u64,
}

impl<E> TimerQueue<E> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn schedule_at(&mut self, due: u64, event: E) {
        self.seq += 1;
        self.heap.push(Entry {
            due,
            seq: self.seq,
            event,
        });
    }

    /// Pop the earliest event due at or before `now`
    pub fn pop_due(&mut self, now: u64) -> Option<E> {
        if self.heap.peek()?.due > now {
            return None;
        }
        self.heap.pop().map(|e| e.event)
    }

    pub fn next_due(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.due)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Generation stamp carried by loop timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopToken(u64);

/// Issues tokens for one repeating loop and tells stale ones apart.
#[derive(Debug, Default)]
pub struct LoopGuard {
    generation: u64,
    running: bool,
}

impl LoopGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation; older tokens become stale
    pub fn begin(&mut self) -> LoopToken {
        self.generation += 1;
        self.running = true;
        LoopToken(self.generation)
    }

    /// Stop the loop; every outstanding token becomes stale
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.running = false;
    }

    pub fn is_current(&self, token: LoopToken) -> bool {
        self.running && token.0 == self.generation
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_due_order() {
        let mut q = TimerQueue::new();
        q.schedule_at(30, "c");
        q.schedule_at(10, "a");
        q.schedule_at(20, "b");

        assert_eq!(q.next_due(), Some(10));
        assert_eq!(q.pop_due(5), None);
        assert_eq!(q.pop_due(25), Some("a"));
        assert_eq!(q.pop_due(25), Some("b"));
        assert_eq!(q.pop_due(25), None);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_equal_due_is_fifo() {
        let mut q = TimerQueue::new();
        for i in 0..5 {
            q.schedule_at(100, i);
        }
        let order: Vec<i32> = std::iter::from_fn(|| q.pop_due(100)).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_delay_bounds() {
        assert!(check_delay_ms("gap_ms", 0.0).is_ok());
        assert!(check_delay_ms("gap_ms", MAX_DELAY_MS).is_ok());
        for bad in [-1.0, MAX_DELAY_MS + 1.0, f64::INFINITY, f64::NAN] {
            assert!(check_delay_ms("gap_ms", bad).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn test_loop_guard_orphans_old_tokens() {
        let mut guard = LoopGuard::new();
        let first = guard.begin();
        assert!(guard.is_current(first));

        let second = guard.begin();
        assert!(!guard.is_current(first));
        assert!(guard.is_current(second));

        guard.cancel();
        assert!(!guard.is_current(second));
        assert!(!guard.is_running());
    }
}
