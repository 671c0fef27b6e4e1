//! Guest register file
//!
//! `RegisterFile` is `#[repr(C)]` because the native code emitter addresses
//! its fields by offset. CR, XER and MSR are stored as raw words; the
//! accessors below are the only place that knows their bit layout.

use serde::{Deserialize, Serialize};

// CR field bits (within a 4-bit field)
pub const CR_LT: u32 = 0b1000;
pub const CR_GT: u32 = 0b0100;
pub const CR_EQ: u32 = 0b0010;
pub const CR_SO: u32 = 0b0001;

// XER
pub const XER_SO: u32 = 1 << 31;
pub const XER_OV: u32 = 1 << 30;
pub const XER_CA: u32 = 1 << 29;
pub const XER_BYTE_COUNT_MASK: u32 = 0x7F;

// MSR
pub const MSR_EE: u32 = 1 << 15;
pub const MSR_PR: u32 = 1 << 14;
pub const MSR_FP: u32 = 1 << 13;
pub const MSR_ME: u32 = 1 << 12;
pub const MSR_SE: u32 = 1 << 10;
pub const MSR_IR: u32 = 1 << 5;
pub const MSR_DR: u32 = 1 << 4;

/// MSR bits the guest may change with `mtmsr`/`rfi`
pub const MSR_WRITABLE: u32 = MSR_EE | MSR_PR | MSR_FP | MSR_ME | MSR_SE | MSR_IR | MSR_DR;

/// Complete architectural state of the guest CPU
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
    pub gpr: [u32; 32],
    pub pc: u32,
    pub lr: u32,
    pub ctr: u32,
    pub cr: u32,
    pub xer: u32,
    pub msr: u32,

    /// FP registers, kept as raw IEEE-754 bit patterns
    pub fpr: [u64; 32],
    pub fpscr: u32,

    /// Vector bank and its status/control words. No vector instructions
    /// are executed; the bank is carried so host code and snapshots see it.
    pub vr: [[u32; 4]; 32],
    pub vscr: u32,
    pub vrsave: u32,

    // Exception state
    pub srr0: u32,
    pub srr1: u32,
    pub dar: u32,
    pub dsisr: u32,
    pub sprg: [u32; 4],
    /// Exception vector prefix
    pub evpr: u32,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile {
            gpr: [0; 32],
            pc: 0,
            lr: 0,
            ctr: 0,
            cr: 0,
            xer: 0,
            msr: 0,
            fpr: [0; 32],
            fpscr: 0,
            vr: [[0; 4]; 32],
            vscr: 0,
            vrsave: 0,
            srr0: 0,
            srr1: 0,
            dar: 0,
            dsisr: 0,
            sprg: [0; 4],
            evpr: 0,
        }
    }

    #[inline(always)]
    pub fn read_gpr(&self, r: usize) -> u32 {
        self.gpr[r & 31]
    }

    #[inline(always)]
    pub fn write_gpr(&mut self, r: usize, value: u32) {
        self.gpr[r & 31] = value;
    }

    /// `(rA|0)`: register 0 reads as zero when used as a base
    #[inline(always)]
    pub fn base_or_zero(&self, r: usize) -> u32 {
        if r == 0 {
            0
        } else {
            self.gpr[r & 31]
        }
    }

    // CR

    /// 4-bit CR field `n` (0 = most significant)
    #[inline(always)]
    pub fn crf(&self, n: usize) -> u32 {
        (self.cr >> (28 - 4 * (n & 7))) & 0xF
    }

    #[inline(always)]
    pub fn set_crf(&mut self, n: usize, value: u32) {
        let shift = 28 - 4 * (n & 7);
        self.cr = (self.cr & !(0xF << shift)) | ((value & 0xF) << shift);
    }

    /// CR bit `bit` in big-endian numbering (0 = LT of CR0)
    #[inline(always)]
    pub fn cr_bit(&self, bit: usize) -> bool {
        (self.cr >> (31 - (bit & 31))) & 1 != 0
    }

    #[inline(always)]
    pub fn set_cr_bit(&mut self, bit: usize, value: bool) {
        let mask = 1 << (31 - (bit & 31));
        if value {
            self.cr |= mask;
        } else {
            self.cr &= !mask;
        }
    }

    // XER

    #[inline(always)]
    pub fn xer_so(&self) -> bool {
        self.xer & XER_SO != 0
    }

    #[inline(always)]
    pub fn xer_ov(&self) -> bool {
        self.xer & XER_OV != 0
    }

    #[inline(always)]
    pub fn xer_ca(&self) -> bool {
        self.xer & XER_CA != 0
    }

    #[inline(always)]
    pub fn set_xer_ca(&mut self, ca: bool) {
        if ca {
            self.xer |= XER_CA;
        } else {
            self.xer &= !XER_CA;
        }
    }

    /// Set OV; SO is sticky and only ever set here
    #[inline(always)]
    pub fn set_xer_ov(&mut self, ov: bool) {
        if ov {
            self.xer |= XER_OV | XER_SO;
        } else {
            self.xer &= !XER_OV;
        }
    }

    pub fn xer_byte_count(&self) -> u32 {
        self.xer & XER_BYTE_COUNT_MASK
    }

    // MSR

    #[inline(always)]
    pub fn is_supervisor(&self) -> bool {
        self.msr & MSR_PR == 0
    }

    #[inline(always)]
    pub fn interrupts_enabled(&self) -> bool {
        self.msr & MSR_EE != 0
    }

    #[inline(always)]
    pub fn fp_enabled(&self) -> bool {
        self.msr & MSR_FP != 0
    }

    // FP

    #[inline(always)]
    pub fn fpr_f64(&self, r: usize) -> f64 {
        f64::from_bits(self.fpr[r & 31])
    }

    #[inline(always)]
    pub fn set_fpr_f64(&mut self, r: usize, value: f64) {
        self.fpr[r & 31] = value.to_bits();
    }
}
