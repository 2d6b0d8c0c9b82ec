//! Optional corruption-detection layers.
//!
//! Both layers are compile-time features because their scans run on
//! every heap operation and the cost is unacceptable on the default
//! production profile of a constrained MCU. The test suite always
//! enables them.

#[cfg(feature = "integrity-check")]
pub mod integrity;

#[cfg(feature = "poison")]
pub mod poison;

#[cfg(any(feature = "poison", feature = "integrity-check"))]
use crate::config::CorruptionKind;

/// Log a detected corruption. The heap adds the counter bump and the
/// user callback; detection never aborts by itself. Recovery (or a
/// reboot) is the callback's decision.
#[cfg(any(feature = "poison", feature = "integrity-check"))]
#[cold]
#[inline(never)]
pub fn log_corruption(kind: CorruptionKind) {
    match kind {
        CorruptionKind::Poison => {
            log::error!("heap corruption: poison bytes overwritten around an allocation")
        }
        CorruptionKind::Structure => {
            log::error!("heap corruption: block chain is structurally inconsistent")
        }
    }
}
