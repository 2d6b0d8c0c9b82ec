//! Raw block-header layout over the arena.
//!
//! The arena is addressed as an implicit array of 8-byte blocks. Each
//! block starts with a 4-byte header holding the full-chain links:
//!
//! ```text
//! offset 0..2   next  (u16, bit 15 = free flag, bits 0..15 = index)
//! offset 2..4   prev  (u16, always a clean index)
//! offset 4..8   body: payload bytes when used, or the free-chain links
//!               (next_free u16 + prev_free u16) when the block heads a
//!               free run
//! ```
//!
//! Invariant: the free flag lives only in bit 15 of the stored `next`
//! word and is read or written exclusively through the accessors below.
//! All chain walking happens on `u16` block indices; raw pointers appear
//! only at the payload boundary ([`BlockTable::payload_ptr`] /
//! [`BlockTable::index_of_payload`]).

use crate::config::{BLOCK_BODY_SIZE, BLOCK_HEADER_SIZE, BLOCK_SIZE};

/// Index of a block within the arena.
pub type BlockIndex = u16;

/// Bit 15 of the stored `next` word marks the block free.
const FREE_MASK: u16 = 0x8000;

/// Low 15 bits of the stored `next` word hold the chain index.
const INDEX_MASK: u16 = 0x7FFF;

/// Largest addressable block count (the flag bit is not an index bit).
pub const MAX_BLOCKS: usize = INDEX_MASK as usize;

/// Number of blocks needed to hold `bytes` of payload.
///
/// The first block contributes only its 4-byte body; every further block
/// contributes all 8 bytes.
pub fn blocks_for_bytes(bytes: usize) -> usize {
    if bytes <= BLOCK_BODY_SIZE {
        1
    } else {
        1 + (bytes - BLOCK_BODY_SIZE).div_ceil(BLOCK_SIZE)
    }
}

/// The block index over a fixed arena.
///
/// A zero `count` means the heap is disabled (misconfigured arena) and
/// every operation on it degenerates to a no-op/failure.
pub struct BlockTable {
    base: *mut u8,
    count: u16,
}

impl BlockTable {
    /// A table over no memory at all.
    pub const fn empty() -> Self {
        BlockTable {
            base: core::ptr::null_mut(),
            count: 0,
        }
    }

    /// Build a table over `count` blocks starting at `base`.
    ///
    /// # Safety
    /// `base` must be 8-aligned and point to `count * BLOCK_SIZE` bytes of
    /// memory that stays valid and exclusively owned by this table.
    pub unsafe fn new(base: *mut u8, count: u16) -> Self {
        debug_assert!(crate::util::is_aligned(base as usize, BLOCK_SIZE));
        BlockTable { base, count }
    }

    /// Total number of blocks, including sentinel and terminator.
    #[inline]
    pub fn count(&self) -> u16 {
        self.count
    }

    /// Whether `idx` addresses a block inside the arena.
    #[inline]
    pub fn contains(&self, idx: BlockIndex) -> bool {
        idx < self.count
    }

    #[inline]
    fn field_ptr(&self, idx: BlockIndex, offset: usize) -> *mut u16 {
        debug_assert!(self.contains(idx));
        debug_assert!(offset < BLOCK_SIZE);
        // Blocks are 8-aligned and every field offset is even, so the
        // u16 accesses are always aligned.
        unsafe { self.base.add(idx as usize * BLOCK_SIZE + offset).cast::<u16>() }
    }

    #[inline]
    fn read(&self, idx: BlockIndex, offset: usize) -> u16 {
        unsafe { self.field_ptr(idx, offset).read() }
    }

    #[inline]
    fn write(&self, idx: BlockIndex, offset: usize, value: u16) {
        unsafe { self.field_ptr(idx, offset).write(value) }
    }

    /// Next block in the full chain (flag bit stripped).
    #[inline]
    pub fn next(&self, idx: BlockIndex) -> BlockIndex {
        self.read(idx, 0) & INDEX_MASK
    }

    /// Set the full-chain `next` index, preserving the free flag.
    #[inline]
    pub fn set_next(&self, idx: BlockIndex, next: BlockIndex) {
        let flag = self.read(idx, 0) & FREE_MASK;
        self.write(idx, 0, (next & INDEX_MASK) | flag);
    }

    /// Previous block in the full chain.
    #[inline]
    pub fn prev(&self, idx: BlockIndex) -> BlockIndex {
        self.read(idx, 2)
    }

    #[inline]
    pub fn set_prev(&self, idx: BlockIndex, prev: BlockIndex) {
        self.write(idx, 2, prev);
    }

    /// Whether the block heads a free run.
    #[inline]
    pub fn is_free(&self, idx: BlockIndex) -> bool {
        self.read(idx, 0) & FREE_MASK != 0
    }

    #[inline]
    pub fn set_free_flag(&self, idx: BlockIndex, free: bool) {
        let raw = self.read(idx, 0) & INDEX_MASK;
        self.write(idx, 0, if free { raw | FREE_MASK } else { raw });
    }

    /// Write a complete header in one go (used by init and splits, where
    /// the previous header contents are garbage).
    pub fn write_header(&self, idx: BlockIndex, next: BlockIndex, prev: BlockIndex, free: bool) {
        let raw = (next & INDEX_MASK) | if free { FREE_MASK } else { 0 };
        self.write(idx, 0, raw);
        self.write(idx, 2, prev);
    }

    /// Next entry in the free chain. Only meaningful while the block is
    /// free (the field occupies the payload body otherwise).
    #[inline]
    pub fn free_next(&self, idx: BlockIndex) -> BlockIndex {
        self.read(idx, 4)
    }

    #[inline]
    pub fn set_free_next(&self, idx: BlockIndex, next: BlockIndex) {
        self.write(idx, 4, next);
    }

    /// Previous entry in the free chain.
    #[inline]
    pub fn free_prev(&self, idx: BlockIndex) -> BlockIndex {
        self.read(idx, 6)
    }

    #[inline]
    pub fn set_free_prev(&self, idx: BlockIndex, prev: BlockIndex) {
        self.write(idx, 6, prev);
    }

    /// Length of the run headed by `idx`, in blocks.
    ///
    /// A corrupted chain (next behind self) yields 0 rather than
    /// wrapping; the integrity layer is responsible for flagging it.
    #[inline]
    pub fn run_len(&self, idx: BlockIndex) -> usize {
        (self.next(idx) as usize).saturating_sub(idx as usize)
    }

    /// Pointer to the payload area of the run headed by `idx`.
    #[inline]
    pub fn payload_ptr(&self, idx: BlockIndex) -> *mut u8 {
        debug_assert!(self.contains(idx));
        unsafe { self.base.add(idx as usize * BLOCK_SIZE + BLOCK_HEADER_SIZE) }
    }

    /// Map a payload pointer back to its block index.
    ///
    /// Returns `None` for pointers outside the arena or not on a payload
    /// boundary. Pointers into the middle of a multi-block run are not
    /// detected (no per-pointer provenance tracking, by design).
    pub fn index_of_payload(&self, payload: *const u8) -> Option<BlockIndex> {
        if self.count == 0 {
            return None;
        }
        let base = self.base as usize;
        let addr = payload as usize;
        let offset = addr.checked_sub(base + BLOCK_HEADER_SIZE)?;
        if offset % BLOCK_SIZE != 0 {
            return None;
        }
        let idx = offset / BLOCK_SIZE;
        // Sentinel and terminator payloads are never handed out.
        if idx == 0 || idx + 1 >= self.count as usize {
            return None;
        }
        Some(idx as BlockIndex)
    }
}
