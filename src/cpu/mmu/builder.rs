//! Host-side page table construction
//!
//! Lets a platform (or a test) lay out 4 KiB-page tables in guest RAM
//! before starting the CPU. Tables are carved from a bump region that
//! starts right after the root table.

use super::walker::{DES_RESIDENT, PAGE_ADDR_MASK_4, PTR_PAGE_ADDR_MASK_4, ROOT_PTR_ADDR_MASK};
use crate::error::{CoreError, Result};
use crate::memory::{Memory, Size};

const ROOT_TABLE_BYTES: u32 = 128 * 4;
const POINTER_TABLE_BYTES: u32 = 128 * 4;
const PAGE_TABLE_BYTES: u32 = 64 * 4;

pub struct TableBuilder {
    root: u32,
    next: u32,
}

impl TableBuilder {
    /// Create an empty root table at `base` (rounded up to 512 bytes)
    pub fn new(mem: &mut Memory, base: u32) -> Result<Self> {
        let root = (base + ROOT_TABLE_BYTES - 1) & ROOT_PTR_ADDR_MASK;
        mem.load(root, &[0u8; ROOT_TABLE_BYTES as usize])?;
        Ok(TableBuilder { root, next: root + ROOT_TABLE_BYTES })
    }

    /// Value for URP/SRP
    pub fn root(&self) -> u32 {
        self.root
    }

    fn alloc(&mut self, mem: &mut Memory, bytes: u32) -> Result<u32> {
        let addr = (self.next + bytes - 1) & !(bytes - 1);
        mem.load(addr, &vec![0u8; bytes as usize])?;
        self.next = addr + bytes;
        Ok(addr)
    }

    fn read_desc(mem: &mut Memory, addr: u32) -> Result<u32> {
        mem.read(addr, Size::Word)
            .ok_or(CoreError::ImageOutOfRange { addr, len: 4, region: "RAM" })
    }

    fn write_desc(mem: &mut Memory, addr: u32, desc: u32) -> Result<()> {
        mem.load(addr, &desc.to_be_bytes())
    }

    /// Map one page. `flags` are page descriptor bits (`DES_WP`,
    /// `DES_SUPER`, `DES_GLOBAL`, cache mode). Returns the physical address
    /// of the page descriptor.
    pub fn map_page(&mut self, mem: &mut Memory, logical: u32, phys: u32, flags: u32) -> Result<u32> {
        let root_slot = self.root | ((logical >> 23) & 0x1fc);
        let mut root_desc = Self::read_desc(mem, root_slot)?;
        if root_desc & DES_RESIDENT == 0 {
            let table = self.alloc(mem, POINTER_TABLE_BYTES)?;
            root_desc = table | DES_RESIDENT;
            Self::write_desc(mem, root_slot, root_desc)?;
        }

        let ptr_slot = (root_desc & ROOT_PTR_ADDR_MASK) | ((logical >> 16) & 0x1fc);
        let mut ptr_desc = Self::read_desc(mem, ptr_slot)?;
        if ptr_desc & DES_RESIDENT == 0 {
            let table = self.alloc(mem, PAGE_TABLE_BYTES)?;
            ptr_desc = table | DES_RESIDENT;
            Self::write_desc(mem, ptr_slot, ptr_desc)?;
        }

        let page_slot = (ptr_desc & PTR_PAGE_ADDR_MASK_4) | ((logical >> 10) & 0xfc);
        Self::write_desc(mem, page_slot, (phys & PAGE_ADDR_MASK_4) | (flags & !0x3) | 0x1)?;
        Ok(page_slot)
    }

    /// Map `len` bytes page by page
    pub fn map_range(&mut self, mem: &mut Memory, logical: u32, phys: u32, len: u32, flags: u32) -> Result<()> {
        let pages = len.div_ceil(0x1000);
        for i in 0..pages {
            self.map_page(mem, logical + i * 0x1000, phys + i * 0x1000, flags)?;
        }
        Ok(())
    }
}
