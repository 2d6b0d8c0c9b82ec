//! A small, deterministic heap allocator for fixed memory arenas.
//!
//! The arena is divided into 8-byte blocks indexed by `u16`; a
//! doubly-linked block chain plus an embedded free chain give first-fit
//! allocation, front-splitting and immediate coalescing with O(1)
//! headers. The design targets small embedded systems: no external
//! allocation, bounded metadata, and bookkeeping counters that can be
//! cross-checked against a full traversal at any time.
//!
//! Two optional hardening layers are on by default:
//!
//! * `poison` brackets every allocation with known byte patterns and a
//!   stored length, catching small out-of-bounds writes;
//! * `integrity-check` validates both chains before and after every
//!   heap operation.
//!
//! Detected corruption is counted, logged via [`log`], and reported to
//! an optional per-heap callback; operations continue rather than
//! abort.
//!
//! Use [`Heap`] directly over caller-provided memory, or
//! [`StaticHeap`] as a drop-in `#[global_allocator]`.

#![no_std]

pub mod config;
pub mod global_alloc;
pub mod heap;

mod hardening;
mod util;

pub use config::{CorruptionKind, HeapHooks};
pub use global_alloc::StaticHeap;
pub use heap::stats::HeapInfo;
pub use heap::Heap;
