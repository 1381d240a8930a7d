// Unified synchronization primitive shim.
//
// Under `cfg(loom)`, re-exports from the `loom` crate so the model checker can
// schedule every interleaving of the protocol. Otherwise, re-exports from
// `std`.
//
// **Every** file in the crate must import atomics and fences through this
// module. A single direct `use std::sync::atomic::*` would bypass loom's
// scheduler and silently break exhaustive testing.
#![allow(unused_imports)]

pub(crate) mod atomic {
    #[cfg(loom)]
    pub(crate) use loom::sync::atomic::{fence, AtomicU32, Ordering};

    #[cfg(not(loom))]
    pub(crate) use std::sync::atomic::{fence, AtomicU32, Ordering};
}
