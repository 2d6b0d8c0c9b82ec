//! `#[global_alloc]` adapter: a lock-protected [`Heap`] over a
//! statically owned arena.

use core::alloc::{GlobalAlloc, Layout};
use core::cell::UnsafeCell;
use core::ptr;

use spin::Mutex;

use crate::config::{ALLOC_ALIGN, BLOCK_SIZE, MIN_HEAP_BYTES};
use crate::heap::Heap;
use crate::util;

/// A self-contained global allocator: `N` bytes of arena plus the heap
/// bookkeeping, suitable for `#[global_allocator]` on bare-metal
/// targets.
///
/// ```ignore
/// #[global_allocator]
/// static HEAP: StaticHeap<{ 64 * 1024 }> = StaticHeap::new();
/// ```
///
/// The heap attaches itself to the arena lazily, on the first
/// allocation, so `new` stays `const`.
pub struct StaticHeap<const N: usize> {
    heap: Mutex<Heap>,
    arena: UnsafeCell<[u8; N]>,
}

// The arena is only touched while `heap` is held.
unsafe impl<const N: usize> Sync for StaticHeap<N> {}

impl<const N: usize> StaticHeap<N> {
    pub const fn new() -> Self {
        assert!(N >= MIN_HEAP_BYTES, "arena too small for a heap");
        assert!(N % BLOCK_SIZE == 0, "arena size must be a multiple of 8");
        StaticHeap {
            heap: Mutex::new(Heap::new()),
            arena: UnsafeCell::new([0; N]),
        }
    }

    fn with_heap<R>(&self, f: impl FnOnce(&mut Heap) -> R) -> R {
        let mut heap = self.heap.lock();
        if heap.total_blocks() == 0 {
            unsafe { heap.init(self.arena.get() as *mut u8, N) };
        }
        f(&mut heap)
    }

    /// Free blocks currently tracked by the heap. Exposed for
    /// diagnostics and tests.
    pub fn free_blocks(&self) -> usize {
        self.with_heap(|h| h.free_blocks_count())
    }
}

impl<const N: usize> Default for StaticHeap<N> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const N: usize> GlobalAlloc for StaticHeap<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() == 0 {
            // Zero-size allocations never touch the heap; any
            // well-aligned dangling pointer satisfies the contract.
            return layout.align() as *mut u8;
        }
        if layout.align() <= ALLOC_ALIGN {
            return self.with_heap(|h| h.malloc(layout.size()));
        }
        self.alloc_overaligned(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        if layout.align() <= ALLOC_ALIGN {
            self.with_heap(|h| h.free(ptr));
        } else {
            // Recover the raw pointer from the stashed back-offset.
            let off = u16::from_ne_bytes([*ptr.sub(2), *ptr.sub(1)]) as usize;
            let raw = ptr.sub(off);
            self.with_heap(|h| h.free(raw));
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let p = self.alloc(layout);
        if !p.is_null() && layout.size() > 0 {
            ptr::write_bytes(p, 0, layout.size());
        }
        p
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALLOC_ALIGN {
            // Over-aligned reallocation: allocate fresh, copy, free.
            let new_layout = match Layout::from_size_align(new_size, layout.align()) {
                Ok(l) => l,
                Err(_) => return ptr::null_mut(),
            };
            let new_ptr = self.alloc(new_layout);
            if !new_ptr.is_null() && layout.size() > 0 {
                ptr::copy_nonoverlapping(ptr, new_ptr, layout.size().min(new_size));
                self.dealloc(ptr, layout);
            }
            return new_ptr;
        }
        if layout.size() == 0 {
            return self.alloc(
                match Layout::from_size_align(new_size, layout.align()) {
                    Ok(l) => l,
                    Err(_) => return ptr::null_mut(),
                },
            );
        }
        self.with_heap(|h| h.realloc(ptr, new_size))
    }
}

impl<const N: usize> StaticHeap<N> {
    /// Over-allocate and round the pointer up, stashing the offset back
    /// to the raw allocation just below the returned pointer.
    unsafe fn alloc_overaligned(&self, layout: Layout) -> *mut u8 {
        let extra = layout.align() + 2;
        let total = match layout.size().checked_add(extra) {
            Some(t) => t,
            None => return ptr::null_mut(),
        };
        let raw = self.with_heap(|h| h.malloc(total));
        if raw.is_null() {
            return ptr::null_mut();
        }
        let aligned = util::align_up(raw as usize + 2, layout.align()) as *mut u8;
        let off = (aligned as usize - raw as usize) as u16;
        let [lo, hi] = off.to_ne_bytes();
        *aligned.sub(2) = lo;
        *aligned.sub(1) = hi;
        aligned
    }
}
