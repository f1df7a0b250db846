//! Pid queues for the scheduler: FIFO with positional removal.
//!
//! Queues never own a process; every pid is resolved through the central
//! process table. A process sits in at most one of the run/blocked/stopped
//! queues at any time.

use std::collections::VecDeque;

use crate::proc::Pid;

/// A FIFO of pids with O(1) push/pop at both ends and O(n) removal by pid.
#[derive(Debug, Default, Clone)]
pub struct PidQueue {
    inner: VecDeque<Pid>,
}

impl PidQueue {
    pub fn new() -> PidQueue {
        PidQueue {
            inner: VecDeque::new(),
        }
    }

    pub fn push_front(&mut self, pid: Pid) {
        self.inner.push_front(pid);
    }

    pub fn push_back(&mut self, pid: Pid) {
        self.inner.push_back(pid);
    }

    pub fn pop_front(&mut self) -> Option<Pid> {
        self.inner.pop_front()
    }

    pub fn pop_back(&mut self) -> Option<Pid> {
        self.inner.pop_back()
    }

    pub fn front(&self) -> Option<Pid> {
        self.inner.front().copied()
    }

    pub fn back(&self) -> Option<Pid> {
        self.inner.back().copied()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.inner.contains(&pid)
    }

    /// Remove `pid` wherever it sits; true when it was present.
    pub fn remove(&mut self, pid: Pid) -> bool {
        match self.inner.iter().position(|&p| p == pid) {
            Some(i) => {
                let _ = self.inner.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Pid> + '_ {
        self.inner.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = PidQueue::new();
        q.push_back(1);
        q.push_back(2);
        q.push_back(3);
        assert_eq!(q.front(), Some(1));
        assert_eq!(q.back(), Some(3));
        assert_eq!(q.pop_front(), Some(1));
        assert_eq!(q.pop_front(), Some(2));
        assert_eq!(q.pop_front(), Some(3));
        assert_eq!(q.pop_front(), None);
    }

    #[test]
    fn push_front_and_pop_back() {
        let mut q = PidQueue::new();
        q.push_front(1);
        q.push_front(2);
        assert_eq!(q.pop_back(), Some(1));
        assert_eq!(q.pop_back(), Some(2));
        assert!(q.is_empty());
    }

    #[test]
    fn remove_by_pid() {
        let mut q = PidQueue::new();
        for pid in 1..=5 {
            q.push_back(pid);
        }
        assert!(q.remove(3));
        assert!(!q.remove(3));
        assert!(q.remove(1));
        assert!(q.remove(5));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_front(), Some(2));
        assert_eq!(q.pop_front(), Some(4));
    }

    #[test]
    fn requeue_moves_to_tail() {
        let mut q = PidQueue::new();
        q.push_back(1);
        q.push_back(2);
        assert!(q.remove(1));
        q.push_back(1);
        assert_eq!(q.pop_front(), Some(2));
        assert_eq!(q.pop_front(), Some(1));
    }
}
