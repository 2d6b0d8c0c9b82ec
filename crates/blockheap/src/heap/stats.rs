//! Heap introspection via full traversal.
//!
//! [`collect`] recomputes the block accounting from scratch by walking
//! the full chain. The incrementally maintained counters on the heap
//! must agree with this ground truth after every operation; the test
//! suite checks exactly that.

use crate::heap::block::BlockTable;

/// Snapshot of the heap state, computed by full traversal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapInfo {
    /// Total blocks in the arena, including sentinel and terminator.
    pub total_blocks: usize,
    /// Blocks currently part of an allocated run.
    pub used_blocks: usize,
    /// Blocks currently part of a free run.
    pub free_blocks: usize,
    /// Number of allocated runs.
    pub used_entries: usize,
    /// Number of free runs ("holes").
    pub free_entries: usize,
    /// Largest single free run, in blocks.
    pub max_free_run: usize,
}

/// Walk the full chain and tally every run. With `verbose`, each run is
/// additionally logged at debug level.
pub fn collect(table: &BlockTable, verbose: bool) -> HeapInfo {
    let mut info = HeapInfo {
        total_blocks: table.count() as usize,
        ..HeapInfo::default()
    };
    if table.count() == 0 {
        return info;
    }

    let mut cur = table.next(0);
    let mut steps = 0u32;
    while cur != 0 && table.contains(cur) && steps <= table.count() as u32 {
        let next = table.next(cur);
        if next == 0 {
            break; // terminator
        }
        let len = table.run_len(cur);
        if table.is_free(cur) {
            info.free_blocks += len;
            info.free_entries += 1;
            if len > info.max_free_run {
                info.max_free_run = len;
            }
            if verbose {
                log::debug!("block {:5}: free, {} blocks", cur, len);
            }
        } else {
            info.used_blocks += len;
            info.used_entries += 1;
            if verbose {
                log::debug!("block {:5}: used, {} blocks", cur, len);
            }
        }
        cur = next;
        steps += 1;
    }

    if verbose {
        log::debug!(
            "heap: {} total, {} used in {} entries, {} free in {} entries, largest free run {}",
            info.total_blocks,
            info.used_blocks,
            info.used_entries,
            info.free_blocks,
            info.free_entries,
            info.max_free_run
        );
    }
    info
}
