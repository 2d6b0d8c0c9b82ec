//! Detection tests for the hardening layers: poison overruns and
//! structural (header) corruption must be noticed, counted, reported to
//! the callback, and survived.

#![cfg(any(feature = "poison", feature = "integrity-check"))]

use std::sync::atomic::{AtomicUsize, Ordering};

use blockheap::{CorruptionKind, Heap, HeapHooks};

fn make_heap(words: usize) -> (Heap, Vec<u64>) {
    let mut arena = vec![0u64; words];
    let mut heap = Heap::new();
    unsafe { heap.init(arena.as_mut_ptr().cast(), words * 8) };
    (heap, arena)
}

// ---------------------------------------------------------------------------
// Poison: out-of-bounds writes around an allocation
// ---------------------------------------------------------------------------

#[cfg(feature = "poison")]
#[test]
fn overrun_past_the_end_is_detected() {
    static POISON_HITS: AtomicUsize = AtomicUsize::new(0);
    fn on_corruption(kind: CorruptionKind) {
        if kind == CorruptionKind::Poison {
            POISON_HITS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let (mut heap, _arena) = make_heap(64);
    heap.set_hooks(HeapHooks {
        corruption: Some(on_corruption),
        ..Default::default()
    });

    // A one-byte overrun must be caught for any requested length, not
    // just block-aligned ones.
    for size in 1..=16usize {
        heap.reset();
        let p = heap.malloc(size);
        assert!(!p.is_null());
        assert!(heap.check(), "freshly allocated heap must be clean");

        // One byte past the requested length lands on a poison byte.
        unsafe { p.add(size).write(0x00) };

        assert!(!heap.check(), "overrun of a {}-byte allocation missed", size);
        assert!(heap.corruption_count() > 0);
    }
    assert!(POISON_HITS.load(Ordering::SeqCst) > 0, "callback must fire");
}

#[cfg(feature = "poison")]
#[test]
fn underrun_before_the_start_is_detected() {
    let (mut heap, _arena) = make_heap(64);
    let p = heap.malloc(16);
    assert!(!p.is_null());

    unsafe { p.sub(1).write(0x00) };

    assert!(!heap.check(), "underrun must be detected");
    assert!(heap.corruption_count() > 0);
}

#[cfg(feature = "poison")]
#[test]
fn clean_heap_under_heavy_use_reports_nothing() {
    let (mut heap, _arena) = make_heap(256);
    let mut ptrs = Vec::new();
    for round in 0..8usize {
        for size in [1, 5, 17, 60, 200] {
            let p = heap.malloc(size);
            if !p.is_null() {
                // Fill the entire requested length, not a byte more.
                unsafe { std::ptr::write_bytes(p, round as u8, size) };
                ptrs.push(p);
            }
        }
        if round % 2 == 1 {
            for p in ptrs.drain(..) {
                unsafe { heap.free(p) };
            }
        }
    }
    for p in ptrs {
        unsafe { heap.free(p) };
    }
    assert_eq!(heap.corruption_count(), 0, "in-bounds writes must not trip poison");
}

#[cfg(feature = "poison")]
#[test]
fn detection_survives_and_operations_continue() {
    let (mut heap, _arena) = make_heap(128);
    let p = heap.malloc(16);
    unsafe { p.add(16).write(0xFF) };

    // The next operation notices, reports, and still completes.
    let q = heap.malloc(16);
    assert!(heap.corruption_count() > 0);
    assert!(!q.is_null(), "allocation must continue after a poison report");
    unsafe { heap.free(q) };
}

// ---------------------------------------------------------------------------
// Integrity: structural damage to the block headers
// ---------------------------------------------------------------------------

#[cfg(feature = "integrity-check")]
#[test]
fn header_corruption_is_detected_and_reset_recovers() {
    static STRUCT_HITS: AtomicUsize = AtomicUsize::new(0);
    fn on_corruption(kind: CorruptionKind) {
        if kind == CorruptionKind::Structure {
            STRUCT_HITS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let (mut heap, mut arena) = make_heap(64);
    heap.set_hooks(HeapHooks {
        corruption: Some(on_corruption),
        ..Default::default()
    });
    assert!(heap.check());

    // Smash the first run's header (a wild out-of-arena chain index),
    // as a stray pointer write would.
    unsafe {
        let base = arena.as_mut_ptr().cast::<u8>();
        base.add(8).cast::<u16>().write(0xFFFF);
    }

    assert!(!heap.check(), "header damage must be detected");
    assert!(STRUCT_HITS.load(Ordering::SeqCst) > 0, "callback must fire");

    // Rebuilding the index recovers the heap (all allocations dropped).
    heap.reset();
    assert!(heap.check());
    let p = heap.malloc(32);
    assert!(!p.is_null());
    unsafe { heap.free(p) };
}

#[cfg(feature = "integrity-check")]
#[test]
fn broken_free_chain_is_detected() {
    let (mut heap, mut arena) = make_heap(64);
    let a = heap.malloc(16);
    assert!(!a.is_null());
    assert!(heap.check());

    // Clear the free flag of the remainder run without unlinking it
    // from the free chain: the two chains now disagree.
    unsafe {
        let base = arena.as_mut_ptr().cast::<u8>();
        let flagged = base.add(8).cast::<u16>().read();
        let rem = (flagged & 0x7FFF) as usize; // first run's next = remainder
        let word = base.add(rem * 8).cast::<u16>().read();
        base.add(rem * 8).cast::<u16>().write(word & 0x7FFF);
    }

    assert!(!heap.check(), "flag/chain disagreement must be detected");
}

// ---------------------------------------------------------------------------
// Corruption counter
// ---------------------------------------------------------------------------

#[test]
fn corruption_count_starts_at_zero_and_reset_clears_it() {
    let (mut heap, _arena) = make_heap(64);
    assert_eq!(heap.corruption_count(), 0);
    let p = heap.malloc(8);
    unsafe { heap.free(p) };
    assert_eq!(heap.corruption_count(), 0);

    #[cfg(feature = "poison")]
    {
        let p = heap.malloc(8);
        unsafe { p.add(8).write(0) };
        assert!(!heap.check());
        assert!(heap.corruption_count() > 0);
        heap.reset();
        assert_eq!(heap.corruption_count(), 0);
    }
}
