//! Memory management utilities

/// Sentinel handle meaning "no entry"
pub const NIL: u32 = u32::MAX;

enum Slot<T> {
    Occupied(T),
    Free { next_free: u32 },
}

/// Pool allocator handing out stable `u32` handles for fixed-size objects
///
/// Storage grows a block at a time and is only returned to the system
/// allocator when the pool is dropped, so per-frame alloc/free churn never
/// touches the heap. Freed slots are recycled through an intrusive free list.
pub struct BlockPool<T> {
    slots: Vec<Slot<T>>,
    free_head: u32,
    block_size: usize,
    live: usize,
}

impl<T> BlockPool<T> {
    /// Create a pool growing `block_size` slots at a time
    pub fn new(block_size: usize) -> Self {
        assert!(block_size > 0);
        Self {
            slots: Vec::new(),
            free_head: NIL,
            block_size,
            live: 0,
        }
    }

    /// Allocate a slot for `value` and return its handle
    pub fn alloc(&mut self, value: T) -> u32 {
        if self.free_head == NIL {
            self.grow();
        }
        let handle = self.free_head;
        match self.slots[handle as usize] {
            Slot::Free { next_free } => self.free_head = next_free,
            Slot::Occupied(_) => unreachable!("free list points at occupied slot"),
        }
        self.slots[handle as usize] = Slot::Occupied(value);
        self.live += 1;
        handle
    }

    /// Release a slot back to the pool, returning its value
    pub fn free(&mut self, handle: u32) -> Option<T> {
        let slot = self.slots.get_mut(handle as usize)?;
        if matches!(slot, Slot::Free { .. }) {
            return None;
        }
        let taken = std::mem::replace(
            slot,
            Slot::Free {
                next_free: self.free_head,
            },
        );
        self.free_head = handle;
        self.live -= 1;
        match taken {
            Slot::Occupied(value) => Some(value),
            Slot::Free { .. } => unreachable!(),
        }
    }

    /// Get a live entry by handle
    pub fn get(&self, handle: u32) -> Option<&T> {
        match self.slots.get(handle as usize) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Get a mutable live entry by handle
    pub fn get_mut(&mut self, handle: u32) -> Option<&mut T> {
        match self.slots.get_mut(handle as usize) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.live
    }

    /// True if no entries are live
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Total slot capacity currently held
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn grow(&mut self) {
        let base = self.slots.len();
        self.slots.reserve(self.block_size);
        for i in 0..self.block_size {
            // chain the new block onto the free list, last slot first
            let next_free = if i == 0 { NIL } else { (base + i - 1) as u32 };
            self.slots.push(Slot::Free { next_free });
        }
        self.free_head = (base + self.block_size - 1) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_free_recycles_slots() {
        let mut pool = BlockPool::new(4);
        let a = pool.alloc(1);
        let b = pool.alloc(2);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.free(a), Some(1));
        let c = pool.alloc(3);
        // freed slot is reused before the pool grows
        assert_eq!(c, a);
        assert_eq!(pool.get(b), Some(&2));
        assert_eq!(pool.get(c), Some(&3));
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn test_grows_by_blocks() {
        let mut pool = BlockPool::new(2);
        for i in 0..5 {
            pool.alloc(i);
        }
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.capacity(), 6);
    }

    #[test]
    fn test_double_free_is_rejected() {
        let mut pool = BlockPool::new(2);
        let a = pool.alloc(7);
        assert_eq!(pool.free(a), Some(7));
        assert_eq!(pool.free(a), None);
        assert!(pool.get(a).is_none());
    }
}
