//! Compile-time layout constants and per-heap hooks.
//!
//! Layout values are crate constants; everything a target would want to
//! hook at runtime (interrupt masking, OOM handling, corruption
//! handling) is a plain function pointer carried by each
//! [`Heap`](crate::Heap).

/// Size of one heap block in bytes: a 4-byte header plus a 4-byte body.
pub const BLOCK_SIZE: usize = 8;

/// Size of the per-block header (`next` + `prev` chain indices).
pub const BLOCK_HEADER_SIZE: usize = 4;

/// Payload bytes available in the first block of a run.
pub const BLOCK_BODY_SIZE: usize = BLOCK_SIZE - BLOCK_HEADER_SIZE;

/// Alignment guarantee for returned allocations.
///
/// Payloads start at block offset 4 and blocks are 8-aligned, so user
/// pointers are always 4-aligned (the poison prefix, when enabled, is
/// sized to keep this true).
pub const ALLOC_ALIGN: usize = 4;

/// Smallest arena that yields a working heap: sentinel block, one usable
/// block, and the terminator block.
pub const MIN_HEAP_BYTES: usize = 3 * BLOCK_SIZE;

/// Byte value written to the poison regions around each allocation.
pub const POISON_BYTE: u8 = 0xA5;

/// Poison bytes written immediately before each payload.
pub const POISON_SIZE_BEFORE: usize = 2;

/// Poison bytes written immediately after each payload.
pub const POISON_SIZE_AFTER: usize = 2;

/// What kind of heap corruption was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionKind {
    /// A poison byte around an allocation was overwritten
    /// (buffer overrun/underrun by the user).
    Poison,
    /// The block chains are structurally inconsistent
    /// (header overwritten by a wild pointer write).
    Structure,
}

/// User-supplied callbacks for a [`Heap`](crate::Heap).
///
/// All hooks default to `None`. The critical-section pair is invoked once
/// per outermost heap operation; nested internal operations (realloc
/// calling free) share the outer critical section, so the supplied
/// functions do not themselves need to support nesting.
#[derive(Clone, Copy, Default)]
pub struct HeapHooks {
    /// Entered before the outermost heap operation starts.
    /// Map this to interrupt disabling or a scheduler lock.
    pub critical_enter: Option<fn()>,
    /// Exited after the outermost heap operation completes.
    pub critical_exit: Option<fn()>,
    /// Invoked when an allocation cannot be satisfied, with the requested
    /// byte count and the current number of free blocks.
    pub oom: Option<fn(requested: usize, free_blocks: usize)>,
    /// Invoked when a hardening layer detects corruption. The heap
    /// reports and continues; halting or rebooting is up to the callback.
    pub corruption: Option<fn(kind: CorruptionKind)>,
}

impl HeapHooks {
    /// Hooks with every callback unset.
    pub const fn new() -> Self {
        HeapHooks {
            critical_enter: None,
            critical_exit: None,
            oom: None,
            corruption: None,
        }
    }
}
