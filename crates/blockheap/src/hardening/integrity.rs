//! Structural validation of the block chains.
//!
//! Independent of poisoning: this pass catches header corruption from a
//! wild pointer write even when no poison byte happens to be hit. It
//! verifies that
//!
//! - the full chain is in ascending address order, in bounds, and
//!   mutually linked (`prev(next(b)) == b`), ending at the terminator;
//! - the free chain is in bounds, mutually linked, and every entry
//!   carries the free flag;
//! - the number of free runs seen by both chains agrees.
//!
//! Cost is O(total blocks) per invocation.

use crate::heap::block::BlockTable;

/// Validate both chains. Returns false on the first inconsistency.
pub fn check(table: &BlockTable) -> bool {
    if table.count() == 0 {
        return true;
    }
    let mut free_runs_full_chain = 0usize;

    // Full chain: sentinel to terminator.
    let last = table.count() - 1;
    let mut cur = 0u16;
    let mut steps = 0u32;
    loop {
        let next = table.next(cur);
        if next == 0 {
            // Only the terminator ends the chain.
            if cur != last {
                return false;
            }
            break;
        }
        if !table.contains(next) || next <= cur {
            return false;
        }
        if table.prev(next) != cur {
            return false;
        }
        if table.is_free(next) {
            free_runs_full_chain += 1;
        }
        cur = next;
        steps += 1;
        if steps > table.count() as u32 {
            return false;
        }
    }
    // Sentinel and terminator are never free.
    if table.is_free(0) || table.is_free(last) {
        return false;
    }

    // Free chain: threaded through the sentinel.
    let mut free_runs_free_chain = 0usize;
    let mut prev = 0u16;
    let mut cur = table.free_next(0);
    let mut steps = 0u32;
    while cur != 0 {
        if !table.contains(cur) || !table.is_free(cur) {
            return false;
        }
        if table.free_prev(cur) != prev {
            return false;
        }
        free_runs_free_chain += 1;
        prev = cur;
        cur = table.free_next(cur);
        steps += 1;
        if steps > table.count() as u32 {
            return false;
        }
    }
    if table.free_prev(0) != prev {
        return false;
    }

    free_runs_full_chain == free_runs_free_chain
}
