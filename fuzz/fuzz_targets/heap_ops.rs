#![no_main]

use libfuzzer_sys::fuzz_target;

use blockheap::Heap;

/// Interprets the input as a sequence of heap operations over a fresh
/// fixed arena.
///
/// Each operation is encoded as:
///   byte 0: opcode (0=malloc, 1=free, 2=realloc, 3=calloc)
///   byte 1-2: size (little-endian u16)
///   byte 3: slot index (which tracked pointer to operate on)
///
/// Up to 64 live pointers are tracked. After every operation the
/// incremental counters are compared against a full traversal, and at
/// the end everything is freed and the heap must collapse back to a
/// single free run with no corruption reported.
const MAX_SLOTS: usize = 64;

const ARENA_WORDS: usize = 1024; // 8 KiB

fn check(heap: &Heap) {
    let info = heap.info(false);
    assert_eq!(heap.free_blocks_count(), info.free_blocks);
    assert_eq!(heap.free_entries_count(), info.free_entries);
    assert_eq!(heap.corruption_count(), 0);
}

fuzz_target!(|data: &[u8]| {
    let mut arena = vec![0u64; ARENA_WORDS];
    let mut heap = Heap::new();
    unsafe { heap.init(arena.as_mut_ptr().cast(), ARENA_WORDS * 8) };

    let mut slots: [*mut u8; MAX_SLOTS] = [std::ptr::null_mut(); MAX_SLOTS];
    let mut sizes: [usize; MAX_SLOTS] = [0; MAX_SLOTS];

    let mut i = 0;
    while i + 4 <= data.len() {
        let opcode = data[i] & 0x03;
        let size = u16::from_le_bytes([data[i + 1], data[i + 2]]) as usize;
        let slot = (data[i + 3] as usize) % MAX_SLOTS;
        i += 4;

        match opcode {
            0 => {
                if !slots[slot].is_null() {
                    unsafe { heap.free(slots[slot]) };
                    slots[slot] = std::ptr::null_mut();
                }
                let ptr = heap.malloc(size);
                slots[slot] = ptr;
                sizes[slot] = size;
                if !ptr.is_null() {
                    unsafe { std::ptr::write_bytes(ptr, 0xAA, size) };
                }
            }
            1 => {
                if !slots[slot].is_null() {
                    unsafe { heap.free(slots[slot]) };
                    slots[slot] = std::ptr::null_mut();
                    sizes[slot] = 0;
                }
            }
            2 => {
                let ptr = unsafe { heap.realloc(slots[slot], size) };
                if !ptr.is_null() {
                    // Preserved prefix must still carry the fill pattern.
                    let kept = sizes[slot].min(size);
                    if !slots[slot].is_null() {
                        for j in 0..kept {
                            assert_eq!(unsafe { ptr.add(j).read() }, 0xAA);
                        }
                    }
                    unsafe { std::ptr::write_bytes(ptr, 0xAA, size) };
                    slots[slot] = ptr;
                    sizes[slot] = size;
                } else if size == 0 {
                    // realloc(p, 0) freed; realloc(null, 0) was a no-op.
                    slots[slot] = std::ptr::null_mut();
                    sizes[slot] = 0;
                }
                // Null for a non-zero size: the original stays live.
            }
            3 => {
                if !slots[slot].is_null() {
                    unsafe { heap.free(slots[slot]) };
                    slots[slot] = std::ptr::null_mut();
                }
                let count = (size >> 8).max(1);
                let elem = (size & 0xFF).max(1);
                let ptr = heap.calloc(count, elem);
                let total = count * elem;
                slots[slot] = ptr;
                sizes[slot] = total;
                if !ptr.is_null() {
                    for j in 0..total {
                        assert_eq!(unsafe { ptr.add(j).read() }, 0, "calloc must zero");
                    }
                    unsafe { std::ptr::write_bytes(ptr, 0xAA, total) };
                }
            }
            _ => unreachable!(),
        }
        check(&heap);
    }

    for slot in slots {
        unsafe { heap.free(slot) };
    }
    check(&heap);
    if heap.total_blocks() != 0 {
        assert_eq!(heap.free_entries_count(), 1);
    }
});
