//! Reference counted heap
//!
//! Programs get opaque handles from `MALLOC`. Each live handle carries a reference count that
//! `RETAIN` raises and `FREE` lowers; storage is released the moment the count reaches zero.
//! There is no cycle detection. Nothing in the language can make one allocation point at another,
//! so counting alone is enough.

use std::collections::BTreeMap;
use std::convert::TryFrom;

use log::debug;

use crate::lang::error::{Error, Result};

/// First handle ever handed out
pub const HEAP_BASE: i64 = 0x1000;

struct Allocation {
    cells: Vec<i64>,
    refs: usize,
}

pub struct Heap {
    registry: BTreeMap<i64, Allocation>,
    next_handle: i64,
    live_cells: usize,
    capacity: usize,
}

impl Heap {
    /// Create a heap that holds at most `capacity` live cells
    pub fn new(capacity: usize) -> Self {
        Heap {
            registry: BTreeMap::new(),
            next_handle: HEAP_BASE,
            live_cells: 0,
            capacity,
        }
    }

    /// Allocate `size` zeroed cells with a reference count of 1
    pub fn allocate(&mut self, size: i64) -> Result<i64> {
        let cells = usize::try_from(size)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| Error::MemoryBounds(format!("cannot allocate {} cells", size)))?;
        if cells > self.capacity - self.live_cells {
            return Err(Error::MemoryBounds(format!(
                "out of heap: requested {} cells with {} of {} in use",
                cells, self.live_cells, self.capacity
            )));
        }

        let handle = self.next_handle;
        self.next_handle = handle
            .checked_add(size)
            .ok_or_else(|| Error::MemoryBounds("heap handles exhausted".to_string()))?;
        self.registry.insert(
            handle,
            Allocation {
                cells: vec![0; cells],
                refs: 1,
            },
        );
        self.live_cells += cells;
        debug!("malloc {} cells -> {:#x}", cells, handle);

        Ok(handle)
    }

    /// Add a reference to `handle`, returning the new count
    pub fn retain(&mut self, handle: i64) -> Result<usize> {
        let alloc = self
            .registry
            .get_mut(&handle)
            .ok_or(Error::DoubleFree(handle))?;
        alloc.refs += 1;

        Ok(alloc.refs)
    }

    /// Drop a reference to `handle`, freeing it if that was the last one
    ///
    /// Returns whether the storage was freed.
    pub fn release(&mut self, handle: i64) -> Result<bool> {
        let alloc = self
            .registry
            .get_mut(&handle)
            .ok_or(Error::DoubleFree(handle))?;
        alloc.refs = alloc.refs.saturating_sub(1);
        if alloc.refs > 0 {
            return Ok(false);
        }

        self.remove(handle);
        Ok(true)
    }

    /// Sweep every allocation whose count is already zero
    ///
    /// `release` frees eagerly, so this only finds something if a count was lowered some other
    /// way. Returns the number of allocations swept.
    pub fn collect(&mut self) -> usize {
        let dead: Vec<i64> = self
            .registry
            .iter()
            .filter(|(_, alloc)| alloc.refs == 0)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in &dead {
            self.remove(*handle);
        }

        dead.len()
    }

    pub fn read(&self, handle: i64, index: i64) -> Result<i64> {
        let alloc = self.live(handle)?;
        let i = Self::index(alloc, handle, index)?;

        Ok(alloc.cells[i])
    }

    pub fn write(&mut self, handle: i64, index: i64, val: i64) -> Result<()> {
        let alloc = self
            .registry
            .get_mut(&handle)
            .ok_or_else(|| Self::not_live(handle))?;
        let i = Self::index(alloc, handle, index)?;
        alloc.cells[i] = val;

        Ok(())
    }

    pub fn ref_count(&self, handle: i64) -> Option<usize> {
        self.registry.get(&handle).map(|alloc| alloc.refs)
    }

    /// Live handles in ascending order
    pub fn handles(&self) -> impl Iterator<Item = i64> + '_ {
        self.registry.keys().copied()
    }

    /// Number of live allocations
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    fn remove(&mut self, handle: i64) {
        if let Some(alloc) = self.registry.remove(&handle) {
            self.live_cells -= alloc.cells.len();
            debug!("freed {:#x} ({} cells)", handle, alloc.cells.len());
        }
    }

    fn live(&self, handle: i64) -> Result<&Allocation> {
        self.registry
            .get(&handle)
            .ok_or_else(|| Self::not_live(handle))
    }

    fn not_live(handle: i64) -> Error {
        Error::MemoryBounds(format!("{:#x} is not a live allocation", handle))
    }

    fn index(alloc: &Allocation, handle: i64, index: i64) -> Result<usize> {
        usize::try_from(index)
            .ok()
            .filter(|&i| i < alloc.cells.len())
            .ok_or_else(|| {
                Error::MemoryBounds(format!(
                    "index {} out of range for {:#x}, length is {}",
                    index,
                    handle,
                    alloc.cells.len()
                ))
            })
    }
}

#[test]
fn test_malloc_free() {
    let mut heap = Heap::new(16);
    let h = heap.allocate(4).expect("allocate failed");
    assert_eq!(h, HEAP_BASE);
    assert_eq!(heap.ref_count(h), Some(1));

    assert!(heap.release(h).expect("release failed"));
    assert!(heap.is_empty());
    assert!(matches!(heap.release(h), Err(Error::DoubleFree(x)) if x == h));
    assert!(matches!(heap.retain(h), Err(Error::DoubleFree(_))));
}

#[test]
fn test_retain_release() {
    let mut heap = Heap::new(16);
    let h = heap.allocate(2).expect("allocate failed");
    assert_eq!(heap.retain(h).expect("retain failed"), 2);

    assert!(!heap.release(h).expect("release failed"));
    assert_eq!(heap.len(), 1);
    assert!(heap.release(h).expect("release failed"));
    assert_eq!(heap.len(), 0);
}

#[test]
fn test_handles_and_capacity() {
    let mut heap = Heap::new(8);
    let a = heap.allocate(3).expect("allocate failed");
    let b = heap.allocate(5).expect("allocate failed");
    assert_eq!(b, a + 3);
    assert_eq!(heap.handles().collect::<Vec<_>>(), vec![a, b]);

    assert!(matches!(heap.allocate(1), Err(Error::MemoryBounds(_))));
    assert!(matches!(heap.allocate(0), Err(Error::MemoryBounds(_))));
    assert!(matches!(heap.allocate(-4), Err(Error::MemoryBounds(_))));

    heap.release(a).expect("release failed");
    heap.allocate(3).expect("allocate failed");
}

#[test]
fn test_read_write() {
    let mut heap = Heap::new(8);
    let h = heap.allocate(2).expect("allocate failed");
    assert_eq!(heap.read(h, 1).expect("read failed"), 0);
    heap.write(h, 1, 42).expect("write failed");
    assert_eq!(heap.read(h, 1).expect("read failed"), 42);

    assert!(matches!(heap.read(h, 2), Err(Error::MemoryBounds(_))));
    assert!(matches!(heap.write(h, -1, 0), Err(Error::MemoryBounds(_))));
    assert!(matches!(heap.read(h + 1, 0), Err(Error::MemoryBounds(_))));
}

#[test]
fn test_collect() {
    let mut heap = Heap::new(8);
    let a = heap.allocate(1).expect("allocate failed");
    let b = heap.allocate(1).expect("allocate failed");
    assert_eq!(heap.collect(), 0);

    if let Some(alloc) = heap.registry.get_mut(&a) {
        alloc.refs = 0;
    }
    assert_eq!(heap.collect(), 1);
    assert_eq!(heap.ref_count(a), None);
    assert_eq!(heap.ref_count(b), Some(1));
    assert_eq!(heap.live_cells, 1);
}
