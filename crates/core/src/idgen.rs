//! ID allocation with reuse of released slots

use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Thread-safe allocator for 16-bit ids in `1..=max`.
///
/// Released ids are handed out again lowest-first, so session ids stay
/// small and dense the way clients expect.
pub struct IdGenerator {
    inner: Mutex<IdPool>,
}

struct IdPool {
    free: BTreeSet<u16>,
    next: u32,
    max: u16,
}

impl IdGenerator {
    pub fn new(max: u16) -> Self {
        Self {
            inner: Mutex::new(IdPool {
                free: BTreeSet::new(),
                next: 1,
                max,
            }),
        }
    }

    /// Get the next available ID, or `None` when the range is exhausted
    pub fn acquire(&self) -> Option<u16> {
        let mut pool = self.inner.lock();
        if let Some(id) = pool.free.pop_first() {
            return Some(id);
        }
        if pool.next > pool.max as u32 {
            return None;
        }
        let id = pool.next as u16;
        pool.next += 1;
        Some(id)
    }

    /// Return an ID to the pool. Unknown or duplicate releases are ignored.
    pub fn release(&self, id: u16) {
        let mut pool = self.inner.lock();
        if id == 0 || id as u32 >= pool.next {
            return;
        }
        pool.free.insert(id);
    }

    /// Number of ids currently handed out
    pub fn in_use(&self) -> usize {
        let pool = self.inner.lock();
        (pool.next as usize - 1) - pool.free.len()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(u16::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let gen = IdGenerator::default();
        let id1 = gen.acquire().unwrap();
        let id2 = gen.acquire().unwrap();
        assert_ne!(id1, id2);
        assert_eq!(id1, 1);
    }

    #[test]
    fn test_release_reuses_lowest() {
        let gen = IdGenerator::new(10);
        let ids: Vec<_> = (0..4).filter_map(|_| gen.acquire()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        gen.release(3);
        gen.release(2);
        assert_eq!(gen.acquire(), Some(2));
        assert_eq!(gen.acquire(), Some(3));
        assert_eq!(gen.acquire(), Some(5));
        assert_eq!(gen.in_use(), 5);
    }

    #[test]
    fn test_exhaustion() {
        let gen = IdGenerator::new(2);
        assert!(gen.acquire().is_some());
        assert!(gen.acquire().is_some());
        assert!(gen.acquire().is_none());
        gen.release(1);
        assert_eq!(gen.acquire(), Some(1));
    }

    #[test]
    fn test_bogus_release_ignored() {
        let gen = IdGenerator::new(5);
        gen.release(0);
        gen.release(4);
        assert_eq!(gen.acquire(), Some(1));
        assert_eq!(gen.in_use(), 1);
    }
}
