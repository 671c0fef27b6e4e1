//! Special flags
//!
//! A single atomic word is the only channel through which other threads
//! reach the emulation thread. Producers (timers, device threads, the
//! debugger) set and clear bits; the emulation thread tests the word at
//! every instruction or block boundary and reacts in the dispatcher.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const SPCFLAG_STOP: u32 = 1 << 0;
pub const SPCFLAG_INTERRUPT_PENDING: u32 = 1 << 1;
pub const SPCFLAG_TRACE: u32 = 1 << 2;
pub const SPCFLAG_DO_INTERRUPT: u32 = 1 << 3;
pub const SPCFLAG_ENTER_MONITOR: u32 = 1 << 4;
/// Stop the block being executed and return to the dispatcher
pub const SPCFLAG_JIT_END_COMPILE: u32 = 1 << 5;
/// Translated code went away under the executor (cache flushed)
pub const SPCFLAG_JIT_EXEC_RETURN: u32 = 1 << 6;

pub const SPCFLAG_ALL: u32 = SPCFLAG_STOP
    | SPCFLAG_INTERRUPT_PENDING
    | SPCFLAG_TRACE
    | SPCFLAG_DO_INTERRUPT
    | SPCFLAG_ENTER_MONITOR
    | SPCFLAG_JIT_END_COMPILE
    | SPCFLAG_JIT_EXEC_RETURN;

#[derive(Debug, Default)]
pub struct SpecialFlags {
    mask: AtomicU32,
}

impl SpecialFlags {
    pub fn new() -> Self {
        SpecialFlags { mask: AtomicU32::new(0) }
    }

    #[inline(always)]
    pub fn test(&self, mask: u32) -> bool {
        self.mask.load(Ordering::Acquire) & mask != 0
    }

    #[inline(always)]
    pub fn set(&self, mask: u32) {
        self.mask.fetch_or(mask, Ordering::AcqRel);
    }

    #[inline(always)]
    pub fn clear(&self, mask: u32) {
        self.mask.fetch_and(!mask, Ordering::AcqRel);
    }

    /// Replace the whole word
    pub fn init(&self, mask: u32) {
        self.mask.store(mask, Ordering::Release);
    }

    #[inline(always)]
    pub fn get(&self) -> u32 {
        self.mask.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.get() == 0
    }
}

/// Producer-side handle for platform threads.
///
/// Interrupt sources are level-triggered: `SPCFLAG_INTERRUPT_PENDING` is
/// raised while any source bit is set and dropped once the last one is
/// cleared.
#[derive(Debug, Clone)]
pub struct InterruptLine {
    flags: Arc<SpecialFlags>,
    sources: Arc<AtomicU32>,
}

impl InterruptLine {
    pub fn new(flags: Arc<SpecialFlags>, sources: Arc<AtomicU32>) -> Self {
        InterruptLine { flags, sources }
    }

    pub fn set_interrupt_flag(&self, bits: u32) {
        if bits == 0 {
            return;
        }
        self.sources.fetch_or(bits, Ordering::AcqRel);
        self.flags.set(SPCFLAG_INTERRUPT_PENDING);
    }

    pub fn clear_interrupt_flag(&self, bits: u32) {
        clear_sources(&self.flags, &self.sources, bits);
    }

    /// Currently asserted interrupt sources
    pub fn pending(&self) -> u32 {
        self.sources.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.flags.set(SPCFLAG_STOP);
    }

    pub fn enter_monitor(&self) {
        self.flags.set(SPCFLAG_ENTER_MONITOR);
    }

    pub fn set_trace(&self, enable: bool) {
        if enable {
            self.flags.set(SPCFLAG_TRACE);
        } else {
            self.flags.clear(SPCFLAG_TRACE);
        }
    }

    pub fn flags(&self) -> &Arc<SpecialFlags> {
        &self.flags
    }
}

/// Clear source bits and drop the pending flag when none remain.
/// The re-check after clearing catches a set() racing with us.
pub(crate) fn clear_sources(flags: &SpecialFlags, sources: &AtomicU32, bits: u32) {
    let prev = sources.fetch_and(!bits, Ordering::AcqRel);
    if prev & !bits == 0 {
        flags.clear(SPCFLAG_INTERRUPT_PENDING);
        if sources.load(Ordering::Acquire) != 0 {
            flags.set(SPCFLAG_INTERRUPT_PENDING);
        }
    }
}
