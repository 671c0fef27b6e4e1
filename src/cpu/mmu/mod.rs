//! 68040-style MMU
//!
//! Translation order: transparent translation registers, then the ATC,
//! then a table walk that refills the ATC. With TC.E clear every address
//! not covered by a TTR maps to itself.
//!
//! Only 4 KiB pages are supported; TC.P (8 KiB pages) is ignored.

pub mod atc;
pub mod builder;
pub mod ttr;
pub mod walker;

use serde::{Deserialize, Serialize};

use crate::cpu::exception::{Fault, FaultKind};
use crate::memory::{Bus, PhysRegion, Size};
pub use crate::memory::{PAGE_MASK, PAGE_SHIFT, PAGE_SIZE};
use atc::{Atc, AtcLine};
use ttr::{TtrMatch, TtrRule};

/// TC: translation enable
pub const TC_ENABLE: u32 = 0x8000;
/// TC: 8 KiB pages (unsupported)
pub const TC_PAGE_8K: u32 = 0x4000;

// MMUSR as produced by PTEST
pub const MMUSR_ADDR_MASK: u32 = 0xffff_f000;
pub const MMUSR_BUS_ERROR: u32 = 1 << 11;
pub const MMUSR_GLOBAL: u32 = 1 << 10;
pub const MMUSR_U1: u32 = 1 << 9;
pub const MMUSR_U0: u32 = 1 << 8;
pub const MMUSR_SUPER: u32 = 1 << 7;
pub const MMUSR_CM: u32 = 0x60;
pub const MMUSR_MODIFIED: u32 = 1 << 4;
pub const MMUSR_WRITE: u32 = 1 << 2;
pub const MMUSR_TRANSP: u32 = 1 << 1;
pub const MMUSR_RESIDENT: u32 = 1 << 0;

/// Kind of memory access being translated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub data: bool,
    pub write: bool,
}

impl Access {
    pub const FETCH: Access = Access { data: false, write: false };
    pub const READ: Access = Access { data: true, write: false };
    pub const WRITE: Access = Access { data: true, write: true };
}

/// Guest-visible MMU registers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmuRegisters {
    pub tc: u32,
    pub urp: u32,
    pub srp: u32,
    pub itt: [TtrRule; 2],
    pub dtt: [TtrRule; 2],
    pub mmusr: u32,
    /// Destination function code, selects the ATC bank for tlbie
    pub dfc: u32,
}

pub struct Mmu {
    regs: MmuRegisters,
    atc: Atc,
    /// Bumped on every change that can alter a translation
    epoch: u64,
    pub walks: u64,
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

impl Mmu {
    pub fn new() -> Self {
        Mmu { regs: MmuRegisters::default(), atc: Atc::new(), epoch: 0, walks: 0 }
    }

    pub fn reset(&mut self) {
        self.regs = MmuRegisters::default();
        self.flush_all(true);
    }

    pub fn regs(&self) -> &MmuRegisters {
        &self.regs
    }

    /// Replace all registers (state restore) and drop every cached line
    pub fn restore_registers(&mut self, regs: MmuRegisters) {
        self.regs = regs;
        self.flush_all(true);
    }

    #[inline(always)]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline(always)]
    pub fn enabled(&self) -> bool {
        self.regs.tc & TC_ENABLE != 0
    }

    pub fn atc_stats(&self) -> (u64, u64) {
        (self.atc.hits, self.atc.misses)
    }

    pub fn set_tc(&mut self, value: u32) {
        if value & TC_PAGE_8K != 0 {
            tracing::warn!("8K pages requested in TC {:#06x}, using 4K", value);
        }
        self.regs.tc = value & 0xffff;
        self.flush_all(true);
    }

    pub fn set_urp(&mut self, value: u32) {
        self.regs.urp = value;
        self.epoch += 1;
    }

    pub fn set_srp(&mut self, value: u32) {
        self.regs.srp = value;
        self.epoch += 1;
    }

    pub fn set_itt(&mut self, n: usize, value: u32) {
        self.regs.itt[n & 1] = TtrRule(value);
        self.epoch += 1;
    }

    pub fn set_dtt(&mut self, n: usize, value: u32) {
        self.regs.dtt[n & 1] = TtrRule(value);
        self.epoch += 1;
    }

    pub fn set_mmusr(&mut self, value: u32) {
        self.regs.mmusr = value;
    }

    pub fn set_dfc(&mut self, value: u32) {
        self.regs.dfc = value & 7;
    }

    pub fn flush(&mut self, addr: u32, privileged: bool, global: bool) {
        self.atc.flush(addr, privileged, global);
        self.epoch += 1;
    }

    pub fn flush_all(&mut self, global: bool) {
        self.atc.flush_all(global);
        self.epoch += 1;
    }

    /// Data accesses check DTT0 then DTT1, fetches ITT0 then ITT1
    #[inline]
    pub fn match_ttr(&self, addr: u32, data: bool, privileged: bool) -> TtrMatch {
        let rules = if data { &self.regs.dtt } else { &self.regs.itt };
        for rule in rules {
            let m = rule.matches(addr, privileged);
            if m != TtrMatch::NoMatch {
                return m;
            }
        }
        TtrMatch::NoMatch
    }

    /// Install an identity mapping in a free data or instruction TTR.
    /// Returns false when both are in use.
    pub fn make_transparent_region(&mut self, base: u32, size: u32, data: bool) -> bool {
        let rule = TtrRule::transparent(base, size);
        let rules = if data { &mut self.regs.dtt } else { &mut self.regs.itt };
        for slot in [1, 0] {
            if !rules[slot].enabled() {
                rules[slot] = rule;
                self.epoch += 1;
                return true;
            }
        }
        false
    }

    /// Translate a logical address. `size` only feeds the fault record.
    #[inline]
    pub fn translate<B: Bus>(
        &mut self,
        bus: &mut B,
        addr: u32,
        access: Access,
        privileged: bool,
        size: Size,
    ) -> Result<u32, Fault> {
        if let TtrMatch::Match { write_protect } = self.match_ttr(addr, access.data, privileged) {
            if access.write && write_protect {
                return Err(Fault::new(addr, FaultKind::WriteProtected, access, size, privileged));
            }
            return Ok(addr);
        }
        if !self.enabled() {
            return Ok(addr);
        }

        let line = match self.atc.lookup(addr, access.data, access.write, privileged) {
            Some(line) => line,
            None => self.fill(bus, addr, access, privileged),
        };
        if let Some(kind) = line.fault {
            return Err(Fault::new(addr, kind, access, size, privileged));
        }
        if access.write && line.write_protect {
            return Err(Fault::new(addr, FaultKind::WriteProtected, access, size, privileged));
        }
        Ok(line.phys | (addr & PAGE_MASK))
    }

    /// Walk the tables and install the result. A failed walk installs a
    /// line that keeps faulting until the next flush.
    fn fill<B: Bus>(&mut self, bus: &mut B, addr: u32, access: Access, privileged: bool) -> AtcLine {
        self.walks += 1;
        let root = if privileged { self.regs.srp } else { self.regs.urp };
        let mut line = AtcLine { tag: addr >> PAGE_SHIFT, valid_data: true, valid_inst: true, ..AtcLine::EMPTY };
        match walker::walk(bus, root, addr, privileged, access.write) {
            Ok(desc) if desc.supervisor() && !privileged => line.fault = Some(FaultKind::Protection),
            Ok(desc) => {
                line.phys = desc.page_address();
                line.global = desc.global();
                line.modified = desc.modified();
                line.write_protect = desc.write_protect();
                if bus.region(line.phys) == PhysRegion::Unmapped {
                    line.fault = Some(FaultKind::BusError);
                }
            }
            Err(kind) => line.fault = Some(kind),
        }
        self.atc.install(addr, access.data, access.write, privileged, line);
        line
    }

    /// PTEST: search the translation for `addr` and report it in MMUSR
    pub fn ptest<B: Bus>(&mut self, bus: &mut B, addr: u32, privileged: bool, access: Access) -> u32 {
        self.flush(addr, privileged, true);
        let mmusr = match self.match_ttr(addr, access.data, privileged) {
            TtrMatch::Match { .. } => MMUSR_TRANSP | MMUSR_RESIDENT,
            TtrMatch::NoMatch => {
                let root = if privileged { self.regs.srp } else { self.regs.urp };
                match walker::walk(bus, root, addr, privileged, access.write) {
                    Ok(desc) => {
                        let kept = MMUSR_ADDR_MASK
                            | MMUSR_GLOBAL
                            | MMUSR_U1
                            | MMUSR_U0
                            | MMUSR_SUPER
                            | MMUSR_CM
                            | MMUSR_MODIFIED
                            | MMUSR_WRITE;
                        (desc.0 & kept) | MMUSR_RESIDENT
                    }
                    Err(_) => MMUSR_BUS_ERROR,
                }
            }
        };
        self.regs.mmusr = mmusr;
        mmusr
    }
}
