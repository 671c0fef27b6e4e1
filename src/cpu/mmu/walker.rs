//! Table walk
//!
//! Three levels for 4 KiB pages: a 128-entry root table selected by the
//! user or supervisor root pointer, 128-entry pointer tables, and 64-entry
//! page tables. A page descriptor may be indirect, pointing at the real
//! descriptor. Write protection accumulates on the way down. The used bit
//! is set on every level walked, the modified bit on the page descriptor
//! of a permitted write.

use super::FaultKind;
use crate::memory::Bus;

// Descriptor bits
pub const DES_UDT_MASK: u32 = 0x3;
pub const DES_RESIDENT: u32 = 0x2;
pub const DES_WP: u32 = 1 << 2;
pub const DES_USED: u32 = 1 << 3;
pub const DES_MODIFIED: u32 = 1 << 4;
pub const DES_CACHE_MASK: u32 = 0x60;
pub const DES_CACHE_SHIFT: u32 = 5;
pub const DES_SUPER: u32 = 1 << 7;
pub const DES_USER0: u32 = 1 << 8;
pub const DES_USER1: u32 = 1 << 9;
pub const DES_GLOBAL: u32 = 1 << 10;

// Page descriptor type
pub const PDT_MASK: u32 = 0x3;
pub const PDT_INVALID: u32 = 0x0;
pub const PDT_INDIRECT: u32 = 0x2;

pub const ROOT_PTR_ADDR_MASK: u32 = 0xffff_fe00;
pub const PTR_PAGE_ADDR_MASK_4: u32 = 0xffff_ff00;
pub const PAGE_INDIRECT_MASK: u32 = 0xffff_fffc;
pub const PAGE_ADDR_MASK_4: u32 = 0xffff_f000;

/// Page descriptor with the write-protect bits of upper levels folded in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDescriptor(pub u32);

impl PageDescriptor {
    pub fn page_address(self) -> u32 {
        self.0 & PAGE_ADDR_MASK_4
    }
    pub fn write_protect(self) -> bool {
        self.0 & DES_WP != 0
    }
    pub fn used(self) -> bool {
        self.0 & DES_USED != 0
    }
    pub fn modified(self) -> bool {
        self.0 & DES_MODIFIED != 0
    }
    pub fn supervisor(self) -> bool {
        self.0 & DES_SUPER != 0
    }
    pub fn global(self) -> bool {
        self.0 & DES_GLOBAL != 0
    }
    pub fn cache_mode(self) -> u32 {
        (self.0 & DES_CACHE_MASK) >> DES_CACHE_SHIFT
    }
}

#[inline]
fn fetch<B: Bus>(bus: &mut B, addr: u32) -> Result<u32, FaultKind> {
    bus.watch_table(addr);
    bus.read_phys32(addr).ok_or(FaultKind::BusError)
}

/// Set the used bit of an upper-level descriptor in place
fn touch<B: Bus>(bus: &mut B, addr: u32, desc: u32) {
    if desc & DES_USED == 0 {
        bus.write_phys32(addr, desc | DES_USED);
    }
}

/// Walk the tables for `addr`. A supervisor-only page is still returned to
/// a user access (the caller reports the violation) but its modified bit
/// is left alone.
pub fn walk<B: Bus>(
    bus: &mut B,
    root_pointer: u32,
    addr: u32,
    privileged: bool,
    write: bool,
) -> Result<PageDescriptor, FaultKind> {
    let root_addr = (root_pointer & ROOT_PTR_ADDR_MASK) | ((addr >> 23) & 0x1fc);
    let root = fetch(bus, root_addr)?;
    if root & DES_RESIDENT == 0 {
        return Err(FaultKind::NotResident);
    }
    touch(bus, root_addr, root);
    let mut wp = root & DES_WP;

    let ptr_addr = (root & ROOT_PTR_ADDR_MASK) | ((addr >> 16) & 0x1fc);
    let ptr = fetch(bus, ptr_addr)?;
    if ptr & DES_RESIDENT == 0 {
        return Err(FaultKind::NotResident);
    }
    touch(bus, ptr_addr, ptr);
    wp |= ptr & DES_WP;

    let mut desc_addr = (ptr & PTR_PAGE_ADDR_MASK_4) | ((addr >> 10) & 0xfc);
    let mut desc = fetch(bus, desc_addr)?;
    match desc & PDT_MASK {
        PDT_INVALID => return Err(FaultKind::NotResident),
        PDT_INDIRECT => {
            desc_addr = desc & PAGE_INDIRECT_MASK;
            desc = fetch(bus, desc_addr)?;
            // an indirect descriptor may not point at another indirect one
            if desc & 1 == 0 {
                return Err(FaultKind::NotResident);
            }
        }
        _ => {}
    }

    let protected = (desc | wp) & DES_WP != 0;
    let violation = desc & DES_SUPER != 0 && !privileged;
    let mut updated = desc | DES_USED;
    if write && !protected && !violation {
        updated |= DES_MODIFIED;
    }
    if updated != desc {
        bus.write_phys32(desc_addr, updated);
    }
    Ok(PageDescriptor(updated | wp))
}
