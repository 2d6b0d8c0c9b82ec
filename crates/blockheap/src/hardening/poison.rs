//! Poison bytes around each allocation.
//!
//! With this layer enabled, every payload is laid out as
//!
//! ```text
//! [len: u16][poison before][user bytes ...][poison after]
//! ```
//!
//! where `len` is the exact user-requested length (not the rounded-up
//! block capacity), so an overrun of even one byte lands on a poison
//! byte and is noticed. The prefix is sized so the user pointer stays
//! 4-aligned.

use crate::config::{
    BLOCK_BODY_SIZE, BLOCK_SIZE, POISON_BYTE, POISON_SIZE_AFTER, POISON_SIZE_BEFORE,
};
use crate::heap::block::{BlockIndex, BlockTable};

/// Bytes of the stored exact-length field.
const LEN_FIELD_SIZE: usize = core::mem::size_of::<u16>();

/// Offset from the payload start to the user pointer.
pub const USER_OFFSET: usize = LEN_FIELD_SIZE + POISON_SIZE_BEFORE;

/// Total per-allocation overhead added by this layer.
pub const OVERHEAD: usize = USER_OFFSET + POISON_SIZE_AFTER;

/// Raw payload size to request for a user allocation of `size` bytes.
///
/// Returns `None` when `size` does not fit the u16 length field; the
/// allocation then fails cleanly instead of truncating the stored length.
pub fn padded_size(size: usize) -> Option<usize> {
    if size > u16::MAX as usize {
        return None;
    }
    size.checked_add(OVERHEAD)
}

/// User pointer for a poisoned payload.
#[inline]
pub fn user_ptr(payload: *mut u8) -> *mut u8 {
    unsafe { payload.add(USER_OFFSET) }
}

/// Payload pointer for a poisoned user pointer.
#[inline]
pub fn payload_from_user(user: *mut u8) -> *mut u8 {
    user.wrapping_sub(USER_OFFSET)
}

/// Exact user-requested length stored for the run headed by `idx`.
pub fn stored_len(table: &BlockTable, idx: BlockIndex) -> usize {
    unsafe { table.payload_ptr(idx).cast::<u16>().read() as usize }
}

/// Write the length field and both poison regions for a fresh (or
/// resized-in-place) allocation of `requested` user bytes.
pub fn install(table: &BlockTable, idx: BlockIndex, requested: usize) {
    debug_assert!(requested <= u16::MAX as usize);
    let payload = table.payload_ptr(idx);
    unsafe {
        payload.cast::<u16>().write(requested as u16);
        core::ptr::write_bytes(payload.add(LEN_FIELD_SIZE), POISON_BYTE, POISON_SIZE_BEFORE);
        core::ptr::write_bytes(
            payload.add(USER_OFFSET + requested),
            POISON_BYTE,
            POISON_SIZE_AFTER,
        );
    }
}

/// Verify both poison regions of the run headed by `idx`.
///
/// A stored length that no longer fits the run's capacity counts as
/// corruption too (it means the length field itself was overwritten);
/// the after-poison is not read in that case.
pub fn check_block(table: &BlockTable, idx: BlockIndex) -> bool {
    let capacity = (table.run_len(idx) * BLOCK_SIZE).saturating_sub(BLOCK_SIZE - BLOCK_BODY_SIZE);
    let len = stored_len(table, idx);
    if len + OVERHEAD > capacity {
        return false;
    }
    let payload = table.payload_ptr(idx);
    unsafe {
        for i in 0..POISON_SIZE_BEFORE {
            if payload.add(LEN_FIELD_SIZE + i).read() != POISON_BYTE {
                return false;
            }
        }
        for i in 0..POISON_SIZE_AFTER {
            if payload.add(USER_OFFSET + len + i).read() != POISON_BYTE {
                return false;
            }
        }
    }
    true
}

/// Scan the poison regions of every allocated run in the heap.
///
/// Walks the full chain; sentinel, terminator and free runs carry no
/// poison. The walk is bounds-guarded so a corrupted chain terminates
/// the scan (reported as a failure) instead of wandering out of the
/// arena.
pub fn check_all(table: &BlockTable) -> bool {
    if table.count() == 0 {
        return true;
    }
    let mut cur = table.next(0);
    let mut steps = 0u32;
    while cur != 0 {
        if !table.contains(cur) || steps > table.count() as u32 {
            return false;
        }
        let next = table.next(cur);
        if next != 0 && !table.is_free(cur) && !check_block(table, cur) {
            return false;
        }
        cur = next;
        steps += 1;
    }
    true
}
