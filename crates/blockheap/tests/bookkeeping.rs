//! Accounting invariants: the incrementally maintained counters must
//! match a from-scratch traversal after every operation, coalescing
//! must merge adjacent free runs regardless of free order, and the
//! low-water mark must track the worst case.

use blockheap::Heap;

fn make_heap(words: usize) -> (Heap, Vec<u64>) {
    let mut arena = vec![0u64; words];
    let mut heap = Heap::new();
    unsafe { heap.init(arena.as_mut_ptr().cast(), words * 8) };
    (heap, arena)
}

/// The crate's central invariant: counters vs. traversal.
fn assert_counters_match(heap: &Heap) {
    let info = heap.info(false);
    assert_eq!(
        heap.free_blocks_count(),
        info.free_blocks,
        "free-block counter diverged from traversal"
    );
    assert_eq!(
        heap.free_entries_count(),
        info.free_entries,
        "free-entry counter diverged from traversal"
    );
    assert_eq!(
        info.used_blocks + info.free_blocks + 2,
        info.total_blocks,
        "all blocks must be accounted for (plus sentinel and terminator)"
    );
}

// ---------------------------------------------------------------------------
// Fresh heap
// ---------------------------------------------------------------------------

#[test]
fn fresh_heap_is_one_free_run() {
    let (heap, _arena) = make_heap(128);
    let info = heap.info(false);
    assert_eq!(info.total_blocks, 128);
    assert_eq!(info.used_blocks, 0);
    assert_eq!(info.used_entries, 0);
    assert_eq!(info.free_blocks, 126);
    assert_eq!(info.free_entries, 1);
    assert_eq!(info.max_free_run, 126);
    assert_counters_match(&heap);
}

// ---------------------------------------------------------------------------
// Counters vs. traversal across a scripted sequence
// ---------------------------------------------------------------------------

#[test]
fn counters_match_traversal_after_every_operation() {
    let (mut heap, _arena) = make_heap(256);
    assert_counters_match(&heap);

    let a = heap.malloc(10);
    assert_counters_match(&heap);
    let b = heap.malloc(100);
    assert_counters_match(&heap);
    let c = heap.calloc(4, 12);
    assert_counters_match(&heap);

    unsafe {
        heap.free(b);
        assert_counters_match(&heap);

        let a2 = heap.realloc(a, 300);
        assert_counters_match(&heap);
        let a3 = heap.realloc(a2, 20);
        assert_counters_match(&heap);

        heap.free(c);
        assert_counters_match(&heap);
        heap.free(a3);
        assert_counters_match(&heap);
    }
    assert_eq!(heap.free_entries_count(), 1, "fully freed heap re-coalesces");
}

// ---------------------------------------------------------------------------
// Coalescing
// ---------------------------------------------------------------------------

/// Allocate four equal runs, free the first three in the given order,
/// and verify the holes merge into one.
fn coalesce_in_order(order: [usize; 3]) {
    let (mut heap, _arena) = make_heap(256);
    let ptrs = [
        heap.malloc(40),
        heap.malloc(40),
        heap.malloc(40),
        heap.malloc(40), // guard: keeps the tail run separate
    ];
    assert!(ptrs.iter().all(|p| !p.is_null()));

    let entries_all_used = heap.free_entries_count();
    for &i in &order {
        unsafe { heap.free(ptrs[i]) };
        assert_counters_match(&heap);
    }
    assert_eq!(
        heap.free_entries_count(),
        entries_all_used + 1,
        "three adjacent frees must coalesce into a single hole"
    );
    unsafe { heap.free(ptrs[3]) };
    assert_eq!(heap.free_entries_count(), 1);
}

#[test]
fn coalescing_is_order_independent() {
    coalesce_in_order([0, 1, 2]);
    coalesce_in_order([2, 1, 0]);
    coalesce_in_order([1, 0, 2]);
    coalesce_in_order([0, 2, 1]);
    coalesce_in_order([1, 2, 0]);
    coalesce_in_order([2, 0, 1]);
}

#[test]
fn freeing_between_live_allocations_leaves_a_hole() {
    let (mut heap, _arena) = make_heap(256);
    let a = heap.malloc(40);
    let b = heap.malloc(40);
    let c = heap.malloc(40);
    let entries = heap.free_entries_count();

    unsafe { heap.free(b) };
    assert_eq!(
        heap.free_entries_count(),
        entries + 1,
        "a hole between live runs must not merge with anything"
    );
    assert_counters_match(&heap);

    // The hole is reused first-fit for a fitting request.
    let b2 = heap.malloc(40);
    assert_eq!(b2, b, "first fit must reuse the earlier hole");
    unsafe {
        heap.free(a);
        heap.free(b2);
        heap.free(c);
    }
    assert_eq!(heap.free_entries_count(), 1);
}

// ---------------------------------------------------------------------------
// Splitting
// ---------------------------------------------------------------------------

#[test]
fn small_allocation_splits_a_large_hole() {
    let (mut heap, _arena) = make_heap(128);
    let free_before = heap.free_blocks_count();
    let p = heap.malloc(8);
    let consumed = free_before - heap.free_blocks_count();
    assert!(consumed < free_before, "a small request must split, not take all");
    assert_eq!(
        heap.free_entries_count(),
        1,
        "the split remainder replaces the original hole"
    );
    assert_counters_match(&heap);
    unsafe { heap.free(p) };
    assert_eq!(heap.free_blocks_count(), free_before);
}

#[test]
fn exact_fit_consumes_the_whole_hole() {
    let (mut heap, _arena) = make_heap(256);
    // Carve a hole of known size between two live runs.
    let a = heap.malloc(40);
    let b = heap.malloc(40);
    let _c = heap.malloc(40);
    unsafe { heap.free(b) };
    let entries_with_hole = heap.free_entries_count();

    // Same request again: exact fit, the hole disappears entirely.
    let b2 = heap.malloc(40);
    assert_eq!(b2, b);
    assert_eq!(heap.free_entries_count(), entries_with_hole - 1);
    assert_counters_match(&heap);
    let _ = a;
}

// ---------------------------------------------------------------------------
// Low-water mark
// ---------------------------------------------------------------------------

#[test]
fn min_free_blocks_tracks_the_worst_case() {
    let (mut heap, _arena) = make_heap(128);
    let initial = heap.free_blocks_count();
    assert_eq!(heap.min_free_blocks_count(), initial);

    let a = heap.malloc(100);
    let low = heap.free_blocks_count();
    assert_eq!(heap.min_free_blocks_count(), low);

    unsafe { heap.free(a) };
    assert_eq!(heap.free_blocks_count(), initial);
    assert_eq!(
        heap.min_free_blocks_count(),
        low,
        "the low-water mark must not recover when memory is freed"
    );
}

// ---------------------------------------------------------------------------
// Reset
// ---------------------------------------------------------------------------

#[test]
fn reset_restores_a_pristine_heap() {
    let (mut heap, _arena) = make_heap(64);
    let pristine = heap.info(false);
    let _ = heap.malloc(24);
    let _ = heap.malloc(24);
    heap.reset();
    assert_eq!(heap.info(false), pristine);
    assert_eq!(heap.min_free_blocks_count(), pristine.free_blocks);
    assert_counters_match(&heap);
}
