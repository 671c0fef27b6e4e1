//! Address translation cache
//!
//! Two levels of direct-mapped lines. L1 is split by privilege, direction
//! (data/instruction) and read/write, and indexed by the low bits of the
//! page number. L2 is split by privilege only and indexed by an xor hash;
//! it tells data and instruction translations apart through the
//! `valid_data`/`valid_inst` bits. An L2 hit is promoted into L1.

use super::PAGE_SHIFT;
use crate::cpu::exception::FaultKind;

pub const ATC_L1_SIZE_LOG: u32 = 8;
pub const ATC_L1_SIZE: usize = 1 << ATC_L1_SIZE_LOG;
pub const ATC_L2_SIZE_LOG: u32 = 12;
pub const ATC_L2_SIZE: usize = 1 << ATC_L2_SIZE_LOG;

/// No page number reaches this value
const EMPTY_TAG: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtcLine {
    /// Logical page number
    pub tag: u32,
    pub valid_data: bool,
    pub valid_inst: bool,
    pub global: bool,
    pub modified: bool,
    pub write_protect: bool,
    /// Every access through this line fails this way (a walk that
    /// faulted, or a frame outside RAM, ROM and MMIO)
    pub fault: Option<FaultKind>,
    /// Physical page base
    pub phys: u32,
}

impl AtcLine {
    pub const EMPTY: AtcLine = AtcLine {
        tag: EMPTY_TAG,
        valid_data: false,
        valid_inst: false,
        global: false,
        modified: false,
        write_protect: false,
        fault: None,
        phys: 0,
    };

    #[inline(always)]
    fn valid_for(&self, data: bool) -> bool {
        if data {
            self.valid_data
        } else {
            self.valid_inst
        }
    }
}

#[inline(always)]
fn l1_slot(privileged: bool, data: bool, write: bool, page: u32) -> usize {
    let bank = ((privileged as usize) << 2) | ((data as usize) << 1) | write as usize;
    (bank << ATC_L1_SIZE_LOG) | (page as usize & (ATC_L1_SIZE - 1))
}

#[inline(always)]
fn l2_slot(privileged: bool, addr: u32) -> usize {
    let hash = ((addr >> PAGE_SHIFT) ^ (addr >> 20)) as usize & (ATC_L2_SIZE - 1);
    ((privileged as usize) << ATC_L2_SIZE_LOG) | hash
}

pub struct Atc {
    l1: Vec<AtcLine>,
    l2: Vec<AtcLine>,
    pub hits: u64,
    pub misses: u64,
}

impl Default for Atc {
    fn default() -> Self {
        Self::new()
    }
}

impl Atc {
    pub fn new() -> Self {
        Atc {
            l1: vec![AtcLine::EMPTY; 8 * ATC_L1_SIZE],
            l2: vec![AtcLine::EMPTY; 2 * ATC_L2_SIZE],
            hits: 0,
            misses: 0,
        }
    }

    /// A hit is authoritative. Write-protected and bus-fault lines hit too;
    /// the caller turns them into faults.
    #[inline]
    pub fn lookup(&mut self, addr: u32, data: bool, write: bool, privileged: bool) -> Option<AtcLine> {
        let page = addr >> PAGE_SHIFT;
        let i1 = l1_slot(privileged, data, write, page);
        let line = self.l1[i1];
        if line.tag == page && line.valid_for(data) {
            self.hits += 1;
            return Some(line);
        }

        let line = self.l2[l2_slot(privileged, addr)];
        // a write through a clean line must walk again to set M
        let usable = !write || line.modified || line.write_protect || line.fault.is_some();
        if line.tag == page && line.valid_for(data) && usable {
            self.l1[i1] = line;
            self.hits += 1;
            return Some(line);
        }

        self.misses += 1;
        None
    }

    pub fn install(&mut self, addr: u32, data: bool, write: bool, privileged: bool, line: AtcLine) {
        let page = addr >> PAGE_SHIFT;
        for bank in 0..4 {
            let i = l1_slot(privileged, bank & 2 != 0, bank & 1 != 0, page);
            if self.l1[i].tag == page {
                self.l1[i] = AtcLine::EMPTY;
            }
        }
        self.l2[l2_slot(privileged, addr)] = line;
        self.l1[l1_slot(privileged, data, write, page)] = line;
    }

    /// Drop the lines for `addr` at one privilege level. Global lines
    /// survive unless `global` is set.
    pub fn flush(&mut self, addr: u32, privileged: bool, global: bool) {
        let page = addr >> PAGE_SHIFT;
        for bank in 0..4 {
            let i = l1_slot(privileged, bank & 2 != 0, bank & 1 != 0, page);
            let line = &mut self.l1[i];
            if line.tag == page && (global || !line.global) {
                *line = AtcLine::EMPTY;
            }
        }
        let line = &mut self.l2[l2_slot(privileged, addr)];
        if line.tag == page && (global || !line.global) {
            *line = AtcLine::EMPTY;
        }
    }

    pub fn flush_all(&mut self, global: bool) {
        for line in self.l1.iter_mut().chain(self.l2.iter_mut()) {
            if global || !line.global {
                *line = AtcLine::EMPTY;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(addr: u32, phys: u32) -> AtcLine {
        AtcLine {
            tag: addr >> PAGE_SHIFT,
            valid_data: true,
            valid_inst: true,
            phys,
            ..AtcLine::EMPTY
        }
    }

    #[test]
    fn test_install_then_hit() {
        let mut atc = Atc::new();
        assert!(atc.lookup(0x0040_2123, true, false, false).is_none());
        atc.install(0x0040_2000, true, false, false, line(0x0040_2000, 0x9000));
        let hit = atc.lookup(0x0040_2ffc, true, false, false).unwrap();
        assert_eq!(hit.phys, 0x9000);
        assert_eq!((atc.hits, atc.misses), (1, 1));
        // other privilege level is a separate bank
        assert!(atc.lookup(0x0040_2000, true, false, true).is_none());
    }

    #[test]
    fn test_l2_promotes_into_other_direction() {
        let mut atc = Atc::new();
        atc.install(0x1000, true, false, true, line(0x1000, 0x5000));
        // instruction fetch misses L1, finds the line in L2
        assert_eq!(atc.lookup(0x1000, false, false, true).map(|l| l.phys), Some(0x5000));
    }

    #[test]
    fn test_clean_line_misses_for_write() {
        let mut atc = Atc::new();
        atc.install(0x1000, true, false, false, line(0x1000, 0x5000));
        assert!(atc.lookup(0x1000, true, true, false).is_none());
        let wp = AtcLine { write_protect: true, ..line(0x1000, 0x5000) };
        atc.install(0x1000, true, false, false, wp);
        assert!(atc.lookup(0x1000, true, true, false).unwrap().write_protect);
    }

    #[test]
    fn test_flush_respects_global() {
        let mut atc = Atc::new();
        let global = AtcLine { global: true, ..line(0x3000, 0x3000) };
        atc.install(0x3000, true, false, true, global);
        atc.install(0x4000, true, false, true, line(0x4000, 0x4000));
        atc.flush_all(false);
        assert!(atc.lookup(0x3000, true, false, true).is_some());
        assert!(atc.lookup(0x4000, true, false, true).is_none());
        atc.flush(0x3000, true, false);
        assert!(atc.lookup(0x3000, true, false, true).is_some());
        atc.flush(0x3000, true, true);
        assert!(atc.lookup(0x3000, true, false, true).is_none());
    }

    #[test]
    fn test_reinstall_drops_stale_l1_copies() {
        let mut atc = Atc::new();
        atc.install(0x2000, true, false, false, line(0x2000, 0x7000));
        let dirty = AtcLine { modified: true, ..line(0x2000, 0x8000) };
        atc.install(0x2000, true, true, false, dirty);
        assert_eq!(atc.lookup(0x2000, true, false, false).map(|l| l.phys), Some(0x8000));
    }

    #[test]
    fn test_fault_line_hits_for_write() {
        let mut atc = Atc::new();
        let invalid = AtcLine { fault: Some(FaultKind::NotResident), ..line(0x6000, 0) };
        atc.install(0x6000, true, false, false, invalid);
        // not modified, but a fault line never needs a walk to set M
        assert_eq!(atc.lookup(0x6000, true, true, false).and_then(|l| l.fault), Some(FaultKind::NotResident));
        atc.flush(0x6000, false, false);
        assert!(atc.lookup(0x6000, true, false, false).is_none());
    }
}
