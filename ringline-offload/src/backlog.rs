use std::collections::VecDeque;

use crate::completion::JobCallback;
use crate::context::Handle;
use crate::hw::{DescTable, Direction};

/// A submission deferred because the hardware queue was full.
pub(crate) struct BacklogEntry {
    pub handle: Handle,
    pub direction: Direction,
    pub src: DescTable,
    pub dst: DescTable,
    pub callback: Option<JobCallback>,
}

/// Bounded FIFO of deferred submissions.
///
/// Entries leave in insertion order. An entry taken for a retry is either
/// consumed or put back at the head, so none is serviced twice.
pub(crate) struct Backlog {
    entries: VecDeque<BacklogEntry>,
    capacity: usize,
}

impl Backlog {
    pub fn new(capacity: u32) -> Self {
        Backlog {
            entries: VecDeque::with_capacity(capacity as usize),
            capacity: capacity as usize,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append an entry. Hands it back if the backlog is full.
    pub fn push(&mut self, entry: BacklogEntry) -> Result<(), BacklogEntry> {
        if self.entries.len() >= self.capacity {
            return Err(entry);
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// Take the oldest entry for a retry.
    pub fn pop(&mut self) -> Option<BacklogEntry> {
        self.entries.pop_front()
    }

    /// Put back an entry whose retry found the hardware still full.
    pub fn restore(&mut self, entry: BacklogEntry) {
        self.entries.push_front(entry);
    }

    /// Drop every entry without servicing it. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u32) -> BacklogEntry {
        let table = DescTable {
            dma_addr: 0x1000 * index as u64,
            handle: index,
        };
        BacklogEntry {
            handle: Handle::new(index, 0),
            direction: Direction::Tx,
            src: table,
            dst: table,
            callback: None,
        }
    }

    #[test]
    fn fifo_order() {
        let mut backlog = Backlog::new(4);
        for i in 0..3 {
            assert!(backlog.push(entry(i)).is_ok());
        }
        assert_eq!(backlog.pop().unwrap().handle.index(), 0);
        assert_eq!(backlog.pop().unwrap().handle.index(), 1);
        assert_eq!(backlog.len(), 1);
    }

    #[test]
    fn bounded() {
        let mut backlog = Backlog::new(2);
        assert!(backlog.push(entry(0)).is_ok());
        assert!(backlog.push(entry(1)).is_ok());
        let rejected = backlog.push(entry(2)).unwrap_err();
        assert_eq!(rejected.src.handle, 2);
        assert_eq!(backlog.len(), 2);
    }

    #[test]
    fn zero_capacity_rejects() {
        let mut backlog = Backlog::new(0);
        assert!(backlog.push(entry(0)).is_err());
        assert_eq!(backlog.len(), 0);
    }

    #[test]
    fn restore_keeps_head() {
        let mut backlog = Backlog::new(3);
        backlog.push(entry(0)).ok();
        backlog.push(entry(1)).ok();
        let head = backlog.pop().unwrap();
        backlog.restore(head);
        assert_eq!(backlog.pop().unwrap().handle.index(), 0);
        assert_eq!(backlog.clear(), 1);
        assert_eq!(backlog.len(), 0);
    }
}
