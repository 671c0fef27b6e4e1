//! Exceptions and fault records
//!
//! Faults are plain values: the MMU produces them, the CPU wraps them in an
//! `Exception`, and `deliver` moves the guest to the handler. Nothing here
//! ever aborts the host.

use super::mmu::Access;
use super::regs::*;
use crate::memory::Size;

// Vector offsets from EVPR
pub const VEC_DSI: u32 = 0x300;
pub const VEC_ISI: u32 = 0x400;
pub const VEC_EXTERNAL: u32 = 0x500;
pub const VEC_PROGRAM: u32 = 0x700;
pub const VEC_FP_UNAVAILABLE: u32 = 0x800;
pub const VEC_SYSCALL: u32 = 0xC00;
pub const VEC_TRACE: u32 = 0xD00;

// Fault status word, low half (68040 SSW layout)
pub const SSW_TM_MASK: u32 = 0x0007;
pub const SSW_SIZE_L: u32 = 0x0000;
pub const SSW_SIZE_B: u32 = 0x0020;
pub const SSW_SIZE_W: u32 = 0x0040;
/// Access was a read
pub const SSW_RW: u32 = 0x0100;
/// Fault came from the ATC / table search
pub const SSW_ATC: u32 = 0x0400;
/// Access crossed a page boundary
pub const SSW_MA: u32 = 0x0800;

// Fault status word, high half (DSISR / SRR1 cause bits)
pub const DSISR_BUS_ERROR: u32 = 0x8000_0000;
pub const DSISR_NOT_FOUND: u32 = 0x4000_0000;
pub const DSISR_PROTECT: u32 = 0x0800_0000;
pub const DSISR_STORE: u32 = 0x0200_0000;

// SRR1 program exception causes
pub const SRR1_TRAP: u32 = 0x0002_0000;
pub const SRR1_PRIVILEGED: u32 = 0x0004_0000;
pub const SRR1_ILLEGAL: u32 = 0x0008_0000;

/// Why a translation or physical access failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// No valid descriptor for the page
    NotResident,
    /// User access to a supervisor-only page
    Protection,
    /// Write to a write-protected page or TTR
    WriteProtected,
    /// Unbacked physical address or table fetch failure
    BusError,
}

/// A failed guest memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub addr: u32,
    pub kind: FaultKind,
    /// Size, direction, access type and function code
    pub status: u32,
    /// Address of the faulting instruction, filled in by the CPU
    pub pc: u32,
}

impl Fault {
    pub fn new(addr: u32, kind: FaultKind, access: Access, size: Size, privileged: bool) -> Self {
        let fc = if privileged { 4 } else { 0 } | if access.data { 1 } else { 2 };
        let mut status = fc & SSW_TM_MASK;
        status |= match size {
            Size::Byte => SSW_SIZE_B,
            Size::Half => SSW_SIZE_W,
            Size::Word => SSW_SIZE_L,
        };
        if !access.write {
            status |= SSW_RW;
        }
        if kind != FaultKind::BusError {
            status |= SSW_ATC;
        }
        if (addr & 0xfff) + size.bytes() > 0x1000 {
            status |= SSW_MA;
        }
        Fault { addr, kind, status, pc: 0 }
    }

    pub fn at(mut self, pc: u32) -> Self {
        self.pc = pc;
        self
    }

    pub fn is_write(&self) -> bool {
        self.status & SSW_RW == 0
    }

    /// Cause bits shared by DSISR and, for fetches, SRR1
    pub fn cause_bits(&self) -> u32 {
        match self.kind {
            FaultKind::NotResident => DSISR_NOT_FOUND,
            FaultKind::Protection | FaultKind::WriteProtected => DSISR_PROTECT,
            FaultKind::BusError => DSISR_BUS_ERROR,
        }
    }

    /// DSISR image: cause, store bit, and the status word in the low half
    pub fn dsisr(&self) -> u32 {
        let store = if self.is_write() { DSISR_STORE } else { 0 };
        self.cause_bits() | store | (self.status & 0xffff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramCause {
    Illegal,
    Privileged,
    Trap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    DataStorage(Fault),
    InstructionStorage(Fault),
    External,
    Program(ProgramCause),
    FloatUnavailable,
    SystemCall,
    Trace,
}

impl Exception {
    pub fn vector(&self) -> u32 {
        match self {
            Exception::DataStorage(_) => VEC_DSI,
            Exception::InstructionStorage(_) => VEC_ISI,
            Exception::External => VEC_EXTERNAL,
            Exception::Program(_) => VEC_PROGRAM,
            Exception::FloatUnavailable => VEC_FP_UNAVAILABLE,
            Exception::SystemCall => VEC_SYSCALL,
            Exception::Trace => VEC_TRACE,
        }
    }

    /// Stamp the faulting instruction address into the fault record
    pub fn at(self, pc: u32) -> Self {
        match self {
            Exception::DataStorage(f) => Exception::DataStorage(f.at(pc)),
            Exception::InstructionStorage(f) => Exception::InstructionStorage(f.at(pc)),
            other => other,
        }
    }
}

/// Enter the handler for `exc`. `regs.pc` is the instruction that raised
/// it, or the next one to run for asynchronous and trace exceptions.
pub fn deliver(regs: &mut RegisterFile, exc: &Exception) {
    let mut srr1 = regs.msr & 0xffff;
    regs.srr0 = match exc {
        Exception::SystemCall => regs.pc.wrapping_add(4),
        _ => regs.pc,
    };
    match exc {
        Exception::DataStorage(fault) => {
            regs.dar = fault.addr;
            regs.dsisr = fault.dsisr();
        }
        Exception::InstructionStorage(fault) => {
            regs.dar = fault.addr;
            regs.dsisr = fault.dsisr();
            srr1 |= fault.cause_bits();
        }
        Exception::Program(cause) => {
            srr1 |= match cause {
                ProgramCause::Illegal => SRR1_ILLEGAL,
                ProgramCause::Privileged => SRR1_PRIVILEGED,
                ProgramCause::Trap => SRR1_TRAP,
            };
        }
        _ => {}
    }
    regs.srr1 = srr1;
    regs.msr &= !(MSR_EE | MSR_PR | MSR_FP | MSR_SE);
    regs.pc = regs.evpr.wrapping_add(exc.vector());
}
