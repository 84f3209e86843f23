//! Ring of recently exchanged packets, dumped when a session is dropped
//! for a protocol fault.

use std::collections::VecDeque;
use std::fmt;

/// Bytes of each packet kept for the dump
const HEAD_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub direction: Direction,
    pub opcode: u8,
    pub size: usize,
    pub head: Vec<u8>,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.direction {
            Direction::Inbound => "<===",
            Direction::Outbound => "===>",
        };
        write!(f, "{} 0x{:02X} len={} [", arrow, self.opcode, self.size)?;
        for (i, b) in self.head.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        if self.size > self.head.len() {
            write!(f, " ..")?;
        }
        write!(f, "]")
    }
}

/// Fixed-capacity history, oldest entry evicted first
#[derive(Debug)]
pub struct PacketHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl PacketHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, direction: Direction, opcode: u8, data: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            direction,
            opcode,
            size: data.len(),
            head: data[..data.len().min(HEAD_BYTES)].to_vec(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Log every entry, oldest first
    pub fn dump(&self, owner: &str) {
        tracing::info!("Last packets of {} (from older to newer):", owner);
        for entry in &self.entries {
            tracing::info!("  {}", entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut history = PacketHistory::new(2);
        history.record(Direction::Inbound, 1, &[1]);
        history.record(Direction::Outbound, 2, &[2]);
        history.record(Direction::Inbound, 3, &[3]);
        let opcodes: Vec<_> = history.iter().map(|e| e.opcode).collect();
        assert_eq!(opcodes, vec![2, 3]);
    }

    #[test]
    fn test_entry_display_is_cut() {
        let mut history = PacketHistory::new(4);
        history.record(Direction::Inbound, 0xA9, &[0xAB; 40]);
        let line = history.iter().next().unwrap().to_string();
        assert!(line.starts_with("<=== 0xA9 len=40 [AB AB"));
        assert!(line.ends_with(" ..]"));
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut history = PacketHistory::new(0);
        history.record(Direction::Inbound, 1, &[1]);
        assert!(history.is_empty());
    }
}
