// =============================================================================
// Pulsar — Event Pools (Fixed-Block Free-List Allocator)
// =============================================================================
//
// An event pool hands out fixed-size blocks from application-supplied
// storage. Free blocks form a singly-linked list woven through the block
// storage itself, so the allocator needs no side tables and both `get` and
// `put` are O(1).
//
// POOL TABLE:
//   Up to MAX_POOLS pools, registered at startup in ascending block size.
//   Dynamic events are served from the smallest pool whose block size fits
//   the requested event (see memory::dynamic). Pool ids are 1-based; id 0
//   is reserved for static events.
//
// MARGIN POLICY:
//   `get(margin)` succeeds only while more than `margin` blocks remain.
//   A margin of 0 (NO_MARGIN) means the caller has no fallback — running
//   dry is then a fatal assertion, not an error return.
//
// THREAD SAFETY:
//   The pool table is protected by a SpinLock. Allocation and release are
//   legal from both thread and ISR context; the critical section is a few
//   pointer moves.
//
// =============================================================================

use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use crate::sync::SpinLock;
use crate::{MAX_POOLS, NO_MARGIN};

// =============================================================================
// Public types
// =============================================================================

/// Snapshot of one pool's usage statistics.
///
/// Returned by [`stats`] for startup reporting and headroom diagnostics.
/// `min_free` is the low-watermark: the smallest number of free blocks ever
/// observed, i.e. the worst case the application has actually produced.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Effective (alignment-rounded) block size in bytes.
    pub block_size: usize,
    /// Total number of blocks in the pool.
    pub total: u16,
    /// Number of blocks currently free.
    pub free: u16,
    /// Low-watermark of `free` since initialization.
    pub min_free: u16,
}

// =============================================================================
// Global pool table
// =============================================================================

static POOLS: SpinLock<PoolTable> = SpinLock::new(PoolTable::new());

struct PoolTable {
    pools: [Option<EvtPool>; MAX_POOLS],
    count: usize,
}

impl PoolTable {
    const fn new() -> Self {
        Self {
            pools: [const { None }; MAX_POOLS],
            count: 0,
        }
    }
}

// =============================================================================
// Pool internals
// =============================================================================

/// A free block, viewed as a link in the free list.
struct FreeLink {
    next: *mut FreeLink,
}

/// One fixed-block pool.
///
/// Not exposed publicly — all access goes through the module-level functions
/// which hold the pool-table lock.
struct EvtPool {
    /// Head of the free list (null when exhausted).
    free_head: *mut FreeLink,
    /// Storage range, for ownership assertions on `put`.
    start: *mut u8,
    end: *mut u8,
    /// Effective block size: the requested size rounded up to pointer
    /// alignment so every block can hold a FreeLink while free.
    block_size: usize,
    /// Total number of blocks carved out of the storage.
    n_tot: u16,
    /// Number of blocks currently on the free list.
    n_free: u16,
    /// Low-watermark of `n_free`.
    n_min: u16,
}

// SAFETY: the raw pointers are only dereferenced while holding the pool
// table spinlock; no other code touches the storage.
unsafe impl Send for EvtPool {}

impl EvtPool {
    /// Carves `storage` into blocks of (rounded) `block_size` bytes and
    /// threads the free list through them.
    fn new(storage: &'static mut [u8], block_size: usize) -> Self {
        let align = align_of::<FreeLink>();
        assert!(block_size > 0, "pool: zero block size");

        // Round the block size up to pointer alignment and the storage base
        // up to an aligned address: every block stays aligned and can hold
        // a FreeLink while on the free list.
        let block_size = (block_size + align - 1) & !(align - 1);
        debug_assert!(block_size >= size_of::<FreeLink>());
        let base = storage.as_mut_ptr();
        let offset = base.align_offset(align);
        assert!(offset < storage.len(), "pool: storage too small to align");
        let start = unsafe { base.add(offset) };
        let usable = storage.len() - offset;
        let n_tot = usable / block_size;
        assert!(n_tot >= 1, "pool: storage smaller than one block");
        assert!(n_tot <= u16::MAX as usize, "pool: too many blocks");

        // Thread the free list front to back; the last block terminates it.
        let mut head: *mut FreeLink = core::ptr::null_mut();
        for i in (0..n_tot).rev() {
            // SAFETY: block i lies inside the storage range and is aligned.
            let blk = unsafe { start.add(i * block_size) } as *mut FreeLink;
            unsafe { (*blk).next = head };
            head = blk;
        }

        Self {
            free_head: head,
            start,
            end: unsafe { start.add(n_tot * block_size) },
            block_size,
            n_tot: n_tot as u16,
            n_free: n_tot as u16,
            n_min: n_tot as u16,
        }
    }

    /// Takes a block off the free list, honoring the margin policy.
    fn get(&mut self, margin: u16) -> Option<NonNull<u8>> {
        if self.n_free > margin {
            // SAFETY: n_free > 0, so the list head is a valid free block.
            let blk = self.free_head;
            self.free_head = unsafe { (*blk).next };
            self.n_free -= 1;
            if self.n_free < self.n_min {
                self.n_min = self.n_free;
            }
            NonNull::new(blk as *mut u8)
        } else {
            assert!(margin != NO_MARGIN, "pool: out of blocks with no margin");
            None
        }
    }

    /// Returns a block to the free list.
    fn put(&mut self, blk: NonNull<u8>) {
        let p = blk.as_ptr();
        assert!(
            p >= self.start && p < self.end,
            "pool: block outside pool storage"
        );
        assert!(
            (p as usize - self.start as usize) % self.block_size == 0,
            "pool: misaligned block"
        );
        assert!(self.n_free < self.n_tot, "pool: double free detected");

        let link = p as *mut FreeLink;
        // SAFETY: the block is within our storage and no longer in use.
        unsafe { (*link).next = self.free_head };
        self.free_head = link;
        self.n_free += 1;
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            block_size: self.block_size,
            total: self.n_tot,
            free: self.n_free,
            min_free: self.n_min,
        }
    }
}

// =============================================================================
// Public API — module-level functions that acquire the spinlock
// =============================================================================

/// Registers an event pool over the given storage.
///
/// Must be called during startup, before any event allocation. Pools must be
/// registered in **ascending block size** so that smallest-fit selection is
/// a linear scan that stops at the first fit.
///
/// # Panics
/// - If the pool table is full.
/// - If `block_size` does not exceed the previously registered pool's.
/// - If the storage cannot hold at least one block.
pub fn init(storage: &'static mut [u8], block_size: usize) {
    let pool = EvtPool::new(storage, block_size);
    let mut table = POOLS.lock();
    assert!(table.count < MAX_POOLS, "pool: too many pools");
    if table.count > 0 {
        let prev = table.pools[table.count - 1].as_ref().unwrap();
        assert!(
            pool.block_size > prev.block_size,
            "pool: pools must be registered in ascending block size"
        );
    }
    log::info!(
        "[pool] pool {} ready: {} blocks of {} bytes",
        table.count + 1,
        pool.n_tot,
        pool.block_size
    );
    let slot = table.count;
    table.pools[slot] = Some(pool);
    table.count += 1;
}

/// Allocates one block for an event of `size`/`align`, from the smallest
/// pool that fits. Returns the block and the 1-based pool id.
///
/// With `margin == NO_MARGIN` exhaustion of the selected pool is fatal;
/// otherwise `None` is returned and nothing changes.
pub(crate) fn alloc_block(size: usize, align: usize, margin: u16) -> Option<(NonNull<u8>, u8)> {
    assert!(
        align <= align_of::<FreeLink>(),
        "pool: payload alignment exceeds block alignment"
    );
    let mut table = POOLS.lock();
    let count = table.count;
    for idx in 0..count {
        let pool = table.pools[idx].as_mut().unwrap();
        if pool.block_size >= size {
            // Smallest fit: pools are sorted, the first fit is the tightest.
            return pool.get(margin).map(|blk| (blk, (idx + 1) as u8));
        }
    }
    panic!("pool: no pool fits an event of {} bytes", size);
}

/// Returns a block to the pool it came from.
pub(crate) fn free_block(pool_id: u8, blk: NonNull<u8>) {
    let mut table = POOLS.lock();
    assert!(
        pool_id >= 1 && (pool_id as usize) <= table.count,
        "pool: bad pool id {}",
        pool_id
    );
    table.pools[pool_id as usize - 1].as_mut().unwrap().put(blk);
}

/// Snapshot of pool `pool_id` (1-based).
///
/// # Panics
/// If no such pool is registered.
pub fn stats(pool_id: u8) -> PoolStats {
    let table = POOLS.lock();
    assert!(
        pool_id >= 1 && (pool_id as usize) <= table.count,
        "pool: bad pool id {}",
        pool_id
    );
    table.pools[pool_id as usize - 1].as_ref().unwrap().stats()
}

/// Number of registered pools.
pub fn count() -> usize {
    POOLS.lock().count
}

/// Drops all registered pools so each test starts from a clean slate.
#[cfg(test)]
pub(crate) fn reset() {
    let mut table = POOLS.lock();
    table.pools = [const { None }; MAX_POOLS];
    table.count = 0;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::kernel_test;

    fn leak_storage(bytes: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; bytes].into_boxed_slice())
    }

    #[test]
    fn alloc_free_closure() {
        let _k = kernel_test();
        // Pool of 4 blocks, 16 bytes each.
        init(leak_storage(64), 16);

        // Allocate all four; addresses must be distinct.
        let mut blocks = Vec::new();
        for i in 0..4 {
            let (blk, id) = alloc_block(16, 8, NO_MARGIN).unwrap();
            assert_eq!(id, 1);
            assert!(!blocks.contains(&blk), "duplicate block at alloc {}", i);
            blocks.push(blk);
        }
        assert_eq!(stats(1).free, 0);

        // Free two in reverse order, then allocate two again.
        free_block(1, blocks.pop().unwrap());
        free_block(1, blocks.pop().unwrap());
        assert_eq!(stats(1).free, 2);

        let (b1, _) = alloc_block(16, 8, 1).unwrap();
        let (b2, _) = alloc_block(16, 8, NO_MARGIN).unwrap();
        assert_ne!(b1, b2);
        assert_eq!(stats(1).free, 0);
        assert_eq!(stats(1).min_free, 0);

        // Return everything; the pool must close back to its initial state.
        free_block(1, b1);
        free_block(1, b2);
        free_block(1, blocks.pop().unwrap());
        free_block(1, blocks.pop().unwrap());
        assert_eq!(stats(1).free, 4);
    }

    #[test]
    fn margin_denies_before_empty() {
        let _k = kernel_test();
        init(leak_storage(64), 16);

        // With margin 2 only the headroom above two blocks is usable.
        assert!(alloc_block(16, 8, 2).is_some());
        assert!(alloc_block(16, 8, 2).is_some());
        assert!(alloc_block(16, 8, 2).is_none());
        assert_eq!(stats(1).free, 2);
    }

    #[test]
    #[should_panic(expected = "no margin")]
    fn no_margin_exhaustion_is_fatal() {
        let _k = kernel_test();
        init(leak_storage(32), 16);
        let _ = alloc_block(16, 8, NO_MARGIN);
        let _ = alloc_block(16, 8, NO_MARGIN);
        let _ = alloc_block(16, 8, NO_MARGIN); // pool empty — must assert
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_is_fatal() {
        let _k = kernel_test();
        init(leak_storage(64), 16);
        let (blk, _) = alloc_block(16, 8, NO_MARGIN).unwrap();
        free_block(1, blk);
        free_block(1, blk);
    }

    #[test]
    fn smallest_fit_selection() {
        let _k = kernel_test();
        init(leak_storage(64), 16);
        init(leak_storage(256), 64);

        let (_, id_small) = alloc_block(10, 8, NO_MARGIN).unwrap();
        let (_, id_big) = alloc_block(40, 8, NO_MARGIN).unwrap();
        assert_eq!(id_small, 1);
        assert_eq!(id_big, 2);
    }
}
