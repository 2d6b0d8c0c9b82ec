//! The allocator core: a first-fit, coalescing free-list heap over a
//! fixed arena of 8-byte blocks.
//!
//! Two doubly-linked lists thread the arena (see [`block`]): the full
//! chain links every run in address order, the free chain links only the
//! free runs. Allocation walks the free chain first-fit and splits an
//! oversized run; freeing coalesces with adjacent free runs immediately.
//!
//! The heap keeps incremental counters (`free_blocks`, `free_entries`,
//! low-water mark) that must match a from-scratch traversal
//! ([`Heap::info`]) after every operation.

pub mod block;
pub mod stats;

use core::ptr;

use crate::config::{HeapHooks, BLOCK_SIZE, MIN_HEAP_BYTES};
#[cfg(any(feature = "poison", feature = "integrity-check"))]
use crate::config::CorruptionKind;
#[cfg(not(feature = "poison"))]
use crate::config::BLOCK_HEADER_SIZE;
#[cfg(any(feature = "poison", feature = "integrity-check"))]
use crate::hardening;
use crate::util;
use block::{blocks_for_bytes, BlockIndex, BlockTable, MAX_BLOCKS};
use stats::HeapInfo;

/// A heap over one fixed arena.
///
/// Multiple independent heaps can coexist; each owns its arena
/// exclusively. The embedded single-global-instance pattern is provided
/// by [`StaticHeap`](crate::StaticHeap).
///
/// Misuse (freeing a pointer that did not come from this heap, double
/// freeing, use after free) is not detected; there is no per-pointer
/// provenance tracking. The hardening features catch the common
/// corruption patterns after the fact.
pub struct Heap {
    table: BlockTable,
    free_blocks: usize,
    free_entries: usize,
    min_free_blocks: usize,
    corruption_count: usize,
    critical_depth: u32,
    hooks: HeapHooks,
}

// The heap owns its arena exclusively; nothing in it is tied to the
// creating thread.
unsafe impl Send for Heap {}

impl Heap {
    /// A disabled heap over no memory. Every allocation fails until
    /// [`init`](Heap::init) attaches an arena.
    pub const fn new() -> Self {
        Heap {
            table: BlockTable::empty(),
            free_blocks: 0,
            free_entries: 0,
            min_free_blocks: 0,
            corruption_count: 0,
            critical_depth: 0,
            hooks: HeapHooks::new(),
        }
    }

    /// Attach the heap to an arena and build the initial block index.
    ///
    /// The usable start is aligned up to the block size. An arena too
    /// small to hold sentinel, one usable block and terminator (or
    /// `size == 0` from a misconfigured layout) leaves the heap
    /// disabled: every allocation fails cleanly instead of running
    /// negative-size arithmetic.
    ///
    /// # Safety
    /// `base..base + size` must be valid, writable memory, exclusively
    /// owned by this heap for as long as it is in use.
    pub unsafe fn init(&mut self, base: *mut u8, size: usize) {
        let start = util::align_up(base as usize, BLOCK_SIZE);
        let usable = size.saturating_sub(start - base as usize);
        let count = (usable / BLOCK_SIZE).min(MAX_BLOCKS);
        if usable < MIN_HEAP_BYTES || count < 3 {
            self.table = BlockTable::empty();
        } else {
            self.table = BlockTable::new(start as *mut u8, count as u16);
        }
        self.reset();
    }

    /// [`init`](Heap::init) from a start/end pointer pair, as when the
    /// bounds come from linker symbols. A reversed pair (computed size
    /// zero or negative) disables the heap.
    ///
    /// # Safety
    /// Same as [`init`](Heap::init) for the `start..end` range.
    pub unsafe fn init_from_range(&mut self, start: *mut u8, end: *mut u8) {
        let span = (end as usize as isize).wrapping_sub(start as usize as isize);
        let size = if span <= 0 { 0 } else { span as usize };
        self.init(start, size);
    }

    /// Rebuild the block index over the current arena, discarding every
    /// allocation. Used by tests to restore a pristine heap.
    pub fn reset(&mut self) {
        self.corruption_count = 0;
        self.critical_depth = 0;
        let count = self.table.count();
        if count == 0 {
            self.free_blocks = 0;
            self.free_entries = 0;
            self.min_free_blocks = 0;
            return;
        }
        let last = count - 1;
        // Sentinel: heads both chains, never allocated, never free.
        self.table.write_header(0, 1, 0, false);
        self.table.set_free_next(0, 1);
        self.table.set_free_prev(0, 1);
        // One free run spanning everything between sentinel and terminator.
        self.table.write_header(1, last, 0, true);
        self.table.set_free_next(1, 0);
        self.table.set_free_prev(1, 0);
        // Terminator: zero-length, ends the full chain.
        self.table.write_header(last, 0, 1, false);

        self.free_blocks = (last - 1) as usize;
        self.free_entries = 1;
        self.min_free_blocks = self.free_blocks;
    }

    /// Install the user callbacks (critical section, OOM, corruption).
    pub fn set_hooks(&mut self, hooks: HeapHooks) {
        self.hooks = hooks;
    }

    /// Allocate `size` bytes, 4-aligned and uninitialized.
    ///
    /// Returns null on failure (after invoking the OOM hook) and for
    /// `size == 0` (documented policy; `realloc(ptr, 0)` is the
    /// deallocation idiom).
    pub fn malloc(&mut self, size: usize) -> *mut u8 {
        self.critical(|h| {
            h.check_heap();
            let p = h.malloc_inner(size);
            h.check_heap();
            p
        })
    }

    /// Allocate `count * size` bytes, zero-filled.
    ///
    /// An overflowing multiplication is detected before any heap
    /// mutation and fails with null.
    pub fn calloc(&mut self, count: usize, size: usize) -> *mut u8 {
        let total = match count.checked_mul(size) {
            Some(t) => t,
            None => {
                log::warn!("calloc({}, {}) overflows, failing allocation", count, size);
                return ptr::null_mut();
            }
        };
        let p = self.malloc(total);
        if !p.is_null() {
            unsafe { ptr::write_bytes(p, 0, total) };
        }
        p
    }

    /// Resize an allocation, preserving `min(old, new)` payload bytes.
    ///
    /// `realloc(null, n)` behaves as `malloc(n)`; `realloc(p, 0)` frees
    /// `p` and returns null. On failure the original allocation is left
    /// untouched and still allocated.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer previously returned by this
    /// heap.
    pub unsafe fn realloc(&mut self, ptr: *mut u8, size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.malloc(size);
        }
        if size == 0 {
            self.free(ptr);
            return ptr::null_mut();
        }
        self.critical(|h| {
            h.check_heap();
            let p = h.realloc_inner(ptr, size);
            h.check_heap();
            p
        })
    }

    /// Release an allocation, coalescing with adjacent free runs.
    /// `free(null)` is a no-op.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer previously returned by this
    /// heap; freeing anything else (or freeing twice) is undefined.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        self.critical(|h| {
            h.check_heap();
            h.free_inner(ptr);
            h.check_heap();
        });
    }

    /// Recompute the heap state by full traversal. With `verbose`, each
    /// run is logged at debug level.
    pub fn info(&self, verbose: bool) -> HeapInfo {
        stats::collect(&self.table, verbose)
    }

    /// Run the enabled hardening checks on demand.
    ///
    /// Returns true when the heap is clean. Anything found is counted
    /// and reported exactly as when a heap operation trips over it.
    /// With both hardening features disabled this always returns true.
    pub fn check(&mut self) -> bool {
        self.critical(|h| {
            let before = h.corruption_count;
            h.check_heap();
            h.corruption_count == before
        })
    }

    /// Incrementally tracked count of free blocks.
    pub fn free_blocks_count(&self) -> usize {
        self.free_blocks
    }

    /// Incrementally tracked count of free runs ("holes").
    pub fn free_entries_count(&self) -> usize {
        self.free_entries
    }

    /// Low-water mark of [`free_blocks_count`](Heap::free_blocks_count)
    /// across the heap's lifetime (since the last reset).
    pub fn min_free_blocks_count(&self) -> usize {
        self.min_free_blocks
    }

    /// Number of corruptions detected by the hardening layers.
    pub fn corruption_count(&self) -> usize {
        self.corruption_count
    }

    /// Total blocks in the arena; 0 while the heap is disabled.
    pub fn total_blocks(&self) -> usize {
        self.table.count() as usize
    }

    // ------------------------------------------------------------------
    // Critical-section wrapper
    // ------------------------------------------------------------------

    /// Run `f` inside the user critical section. Entries nest: the user
    /// pair fires only for the outermost operation, so realloc's
    /// internal malloc/free calls reuse the already-held section.
    fn critical<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        if self.critical_depth == 0 {
            if let Some(enter) = self.hooks.critical_enter {
                enter();
            }
        }
        self.critical_depth += 1;
        let r = f(self);
        self.critical_depth -= 1;
        if self.critical_depth == 0 {
            if let Some(exit) = self.hooks.critical_exit {
                exit();
            }
        }
        r
    }

    // ------------------------------------------------------------------
    // Hardening hooks
    // ------------------------------------------------------------------

    fn check_heap(&mut self) {
        if self.table.count() == 0 {
            return;
        }
        #[cfg(feature = "integrity-check")]
        if !hardening::integrity::check(&self.table) {
            self.report_corruption(CorruptionKind::Structure);
        }
        #[cfg(feature = "poison")]
        if !hardening::poison::check_all(&self.table) {
            self.report_corruption(CorruptionKind::Poison);
        }
    }

    #[cfg(any(feature = "poison", feature = "integrity-check"))]
    fn report_corruption(&mut self, kind: CorruptionKind) {
        self.corruption_count += 1;
        hardening::log_corruption(kind);
        if let Some(cb) = self.hooks.corruption {
            cb(kind);
        }
    }

    // ------------------------------------------------------------------
    // Core algorithms
    // ------------------------------------------------------------------

    fn malloc_inner(&mut self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }

        #[cfg(feature = "poison")]
        let raw_size = match hardening::poison::padded_size(size) {
            Some(s) => s,
            None => {
                self.out_of_memory(size);
                return ptr::null_mut();
            }
        };
        #[cfg(not(feature = "poison"))]
        let raw_size = size;

        let idx = match self.acquire(raw_size) {
            Some(i) => i,
            None => {
                self.out_of_memory(size);
                return ptr::null_mut();
            }
        };

        #[cfg(feature = "poison")]
        {
            hardening::poison::install(&self.table, idx, size);
            hardening::poison::user_ptr(self.table.payload_ptr(idx))
        }
        #[cfg(not(feature = "poison"))]
        self.table.payload_ptr(idx)
    }

    fn free_inner(&mut self, user: *mut u8) {
        if let Some(idx) = self.index_for_user_ptr(user) {
            self.release(idx);
        }
    }

    fn realloc_inner(&mut self, user: *mut u8, new_size: usize) -> *mut u8 {
        let idx = match self.index_for_user_ptr(user) {
            Some(i) => i,
            None => return ptr::null_mut(),
        };
        let cur_blocks = self.table.run_len(idx);

        #[cfg(feature = "poison")]
        let (raw_size, old_len) = match hardening::poison::padded_size(new_size) {
            Some(s) => (s, hardening::poison::stored_len(&self.table, idx)),
            None => {
                self.out_of_memory(new_size);
                return ptr::null_mut();
            }
        };
        #[cfg(not(feature = "poison"))]
        let (raw_size, old_len) = (new_size, cur_blocks * BLOCK_SIZE - BLOCK_HEADER_SIZE);

        let needed = blocks_for_bytes(raw_size);

        if needed == cur_blocks {
            // Same block count: resize in place.
            #[cfg(feature = "poison")]
            hardening::poison::install(&self.table, idx, new_size);
            return user;
        }

        if needed < cur_blocks {
            // Shrink in place, releasing the tail back to the free list.
            self.split_off_tail(idx, needed);
            #[cfg(feature = "poison")]
            hardening::poison::install(&self.table, idx, new_size);
            return user;
        }

        // Grow: absorb the following free run when it suffices.
        let next = self.table.next(idx);
        if self.table.is_free(next) {
            let combined = (self.table.next(next) as usize).saturating_sub(idx as usize);
            if combined >= needed {
                let absorbed = self.table.run_len(next);
                let after = self.table.next(next);
                self.unlink_free(next);
                self.free_entries -= 1;
                self.free_blocks -= absorbed;
                if self.free_blocks < self.min_free_blocks {
                    self.min_free_blocks = self.free_blocks;
                }
                self.table.set_next(idx, after);
                self.table.set_prev(after, idx);
                if combined > needed {
                    self.split_off_tail(idx, needed);
                }
                #[cfg(feature = "poison")]
                hardening::poison::install(&self.table, idx, new_size);
                return user;
            }
        }

        // Fall back to allocate-copy-free. The nested public calls reuse
        // the outer critical section. A failed allocation (including a
        // request beyond total heap capacity) leaves the original run
        // untouched.
        let new_ptr = self.malloc(new_size);
        if new_ptr.is_null() {
            return ptr::null_mut();
        }
        unsafe {
            ptr::copy_nonoverlapping(user, new_ptr, old_len.min(new_size));
            self.free(user);
        }
        new_ptr
    }

    /// First-fit search over the free chain; splits an oversized run.
    /// Returns the head block of the allocated run.
    fn acquire(&mut self, raw_size: usize) -> Option<BlockIndex> {
        if self.table.count() == 0 {
            return None;
        }
        let needed = blocks_for_bytes(raw_size);
        if needed >= self.table.count() as usize {
            return None;
        }

        let mut cur = self.table.free_next(0);
        while cur != 0 && self.table.run_len(cur) < needed {
            cur = self.table.free_next(cur);
        }
        if cur == 0 {
            return None;
        }

        let run = self.table.run_len(cur);
        if run == needed {
            self.unlink_free(cur);
            self.free_entries -= 1;
        } else {
            // Allocate the front of the run; the remainder takes over
            // its place in the free chain.
            let rem = cur + needed as BlockIndex;
            let old_next = self.table.next(cur);
            self.table.write_header(rem, old_next, cur, true);
            self.table.set_prev(old_next, rem);

            let fp = self.table.free_prev(cur);
            let fnx = self.table.free_next(cur);
            self.table.set_free_next(rem, fnx);
            self.table.set_free_prev(rem, fp);
            self.table.set_free_next(fp, rem);
            self.table.set_free_prev(fnx, rem);

            self.table.set_next(cur, rem);
            self.table.set_free_flag(cur, false);
        }

        self.free_blocks -= needed;
        if self.free_blocks < self.min_free_blocks {
            self.min_free_blocks = self.free_blocks;
        }
        Some(cur)
    }

    /// Return the run headed by `idx` to the free list, coalescing with
    /// the neighboring runs.
    fn release(&mut self, idx: BlockIndex) {
        let blocks = self.table.run_len(idx);
        let mut entries_delta: isize = 1;

        // Merge forward: absorb the following run if free.
        let next = self.table.next(idx);
        if self.table.is_free(next) {
            let after = self.table.next(next);
            self.unlink_free(next);
            entries_delta -= 1;
            self.table.set_next(idx, after);
            self.table.set_prev(after, idx);
        }

        // Merge backward: the previous run absorbs this one; otherwise
        // insert at the head of the free chain.
        let prev = self.table.prev(idx);
        if prev != 0 && self.table.is_free(prev) {
            let after = self.table.next(idx);
            self.table.set_next(prev, after);
            self.table.set_prev(after, prev);
            entries_delta -= 1;
        } else {
            let head = self.table.free_next(0);
            self.table.set_free_next(idx, head);
            self.table.set_free_prev(idx, 0);
            self.table.set_free_prev(head, idx);
            self.table.set_free_next(0, idx);
            self.table.set_free_flag(idx, true);
        }

        self.free_blocks += blocks;
        self.free_entries = (self.free_entries as isize + entries_delta) as usize;
    }

    /// Split the run at `idx` after `keep` blocks and release the tail.
    fn split_off_tail(&mut self, idx: BlockIndex, keep: usize) {
        let tail = idx + keep as BlockIndex;
        let old_next = self.table.next(idx);
        self.table.write_header(tail, old_next, idx, false);
        self.table.set_prev(old_next, tail);
        self.table.set_next(idx, tail);
        self.release(tail);
    }

    /// Remove a block from the free chain and clear its flag.
    fn unlink_free(&mut self, idx: BlockIndex) {
        let fp = self.table.free_prev(idx);
        let fnx = self.table.free_next(idx);
        self.table.set_free_next(fp, fnx);
        self.table.set_free_prev(fnx, fp);
        self.table.set_free_flag(idx, false);
    }

    fn index_for_user_ptr(&self, user: *mut u8) -> Option<BlockIndex> {
        #[cfg(feature = "poison")]
        let payload = hardening::poison::payload_from_user(user);
        #[cfg(not(feature = "poison"))]
        let payload = user;
        self.table.index_of_payload(payload)
    }

    fn out_of_memory(&mut self, requested: usize) {
        log::warn!(
            "out of memory: requested {} bytes with {} free blocks",
            requested,
            self.free_blocks
        );
        if let Some(oom) = self.hooks.oom {
            oom(requested, self.free_blocks);
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}
