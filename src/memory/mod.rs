//! Physical memory with memory-mapped I/O
//!
//! Physical layout:
//! 0x00000000 - ...:        RAM
//! 0xF0000000 - 0xF0FFFFFF: MMIO window (hook table)
//! 0xFFC00000 - 0xFFFFFFFF: ROM (writes ignored)
//!
//! Everything else is a bus error. All accessors are big-endian.
//!
//! RAM pages can be watched. A store to a page holding translated code is
//! recorded so the block cache can drop it, and a store to a page holding
//! MMU descriptors is recorded so the ATC can be flushed.

pub mod mmio;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
pub use mmio::{MmioHandler, MmioTable};

pub const RAM_BASE: u32 = 0x0000_0000;
pub const MMIO_BASE: u32 = 0xF000_0000;
pub const MMIO_SIZE: u32 = 0x0100_0000;
pub const ROM_BASE: u32 = 0xFFC0_0000;
pub const ROM_SIZE: u32 = 0x0040_0000;

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: u32 = 1 << PAGE_SHIFT;
pub const PAGE_MASK: u32 = PAGE_SIZE - 1;

/// Page holds translated code
pub const WATCH_CODE: u8 = 1 << 0;
/// Page holds MMU table descriptors
pub const WATCH_TABLE: u8 = 1 << 1;

/// Access width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Size {
    Byte,
    Half,
    Word,
}

impl Size {
    #[inline(always)]
    pub fn bytes(self) -> u32 {
        match self {
            Size::Byte => 1,
            Size::Half => 2,
            Size::Word => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysRegion {
    Ram,
    Rom,
    Mmio,
    Unmapped,
}

/// Physical bus as seen by the table walker
pub trait Bus {
    /// Read a descriptor word, `None` on bus error
    fn read_phys32(&mut self, addr: u32) -> Option<u32>;
    /// Write a descriptor word back (U/M updates). Not a guest store.
    fn write_phys32(&mut self, addr: u32, value: u32) -> bool;
    fn region(&self, addr: u32) -> PhysRegion;
    /// The walker fetched a descriptor from this physical address
    fn watch_table(&mut self, _addr: u32) {}
}

pub struct Memory {
    ram: Vec<u8>,
    rom: Vec<u8>,
    mmio: MmioTable,

    /// WATCH_* bits per RAM page
    watch: Vec<u8>,
    /// Code pages written since the last `take_code_hits`
    code_hits: Vec<u32>,
    table_hit: bool,
}

impl Memory {
    pub fn new(ram_size_mb: u32) -> Self {
        let ram_size = (ram_size_mb as usize) * 1024 * 1024;
        Memory {
            ram: vec![0u8; ram_size],
            rom: vec![0u8; ROM_SIZE as usize],
            mmio: MmioTable::new(),
            watch: vec![0u8; ram_size >> PAGE_SHIFT],
            code_hits: Vec::new(),
            table_hit: false,
        }
    }

    pub fn ram_size(&self) -> usize {
        self.ram.len()
    }

    #[inline(always)]
    pub fn region(&self, addr: u32) -> PhysRegion {
        if (addr as usize) < self.ram.len() {
            PhysRegion::Ram
        } else if addr >= ROM_BASE {
            PhysRegion::Rom
        } else if (MMIO_BASE..MMIO_BASE + MMIO_SIZE).contains(&addr) {
            PhysRegion::Mmio
        } else {
            PhysRegion::Unmapped
        }
    }

    /// Whether `len` bytes starting at `addr` stay inside one region
    fn fits(&self, addr: u32, len: u32) -> bool {
        let end = addr as u64 + len as u64;
        match self.region(addr) {
            PhysRegion::Ram => end <= self.ram.len() as u64,
            PhysRegion::Rom => end <= 1u64 << 32,
            PhysRegion::Mmio => end <= (MMIO_BASE + MMIO_SIZE) as u64,
            PhysRegion::Unmapped => false,
        }
    }

    /// Physical read, `None` on bus error
    #[inline]
    pub fn read(&mut self, addr: u32, size: Size) -> Option<u32> {
        if !self.fits(addr, size.bytes()) {
            return None;
        }
        match self.region(addr) {
            PhysRegion::Ram => Some(read_be(&self.ram, addr as usize, size)),
            PhysRegion::Rom => Some(read_be(&self.rom, (addr - ROM_BASE) as usize, size)),
            PhysRegion::Mmio => self.mmio.read(addr, size),
            PhysRegion::Unmapped => None,
        }
    }

    /// Physical write, `false` on bus error
    #[inline]
    pub fn write(&mut self, addr: u32, size: Size, value: u32) -> bool {
        if !self.fits(addr, size.bytes()) {
            return false;
        }
        match self.region(addr) {
            PhysRegion::Ram => {
                write_be(&mut self.ram, addr as usize, size, value);
                self.note_write(addr, size.bytes());
                true
            }
            // ROM ignores writes
            PhysRegion::Rom => true,
            PhysRegion::Mmio => self.mmio.write(addr, size, value),
            PhysRegion::Unmapped => false,
        }
    }

    pub fn read64(&mut self, addr: u32) -> Option<u64> {
        let hi = self.read(addr, Size::Word)?;
        let lo = self.read(addr.wrapping_add(4), Size::Word)?;
        Some(((hi as u64) << 32) | lo as u64)
    }

    pub fn write64(&mut self, addr: u32, value: u64) -> bool {
        self.write(addr, Size::Word, (value >> 32) as u32)
            && self.write(addr.wrapping_add(4), Size::Word, value as u32)
    }

    #[inline(always)]
    fn note_write(&mut self, addr: u32, len: u32) {
        let first = (addr >> PAGE_SHIFT) as usize;
        let last = ((addr + len - 1) >> PAGE_SHIFT) as usize;
        for page in first..=last {
            let w = self.watch[page];
            if w == 0 {
                continue;
            }
            if w & WATCH_CODE != 0 {
                self.watch[page] &= !WATCH_CODE;
                self.code_hits.push(page as u32);
            }
            if w & WATCH_TABLE != 0 {
                self.table_hit = true;
            }
        }
    }

    /// Copy a host buffer into RAM. Not a guest store: no watches fire,
    /// callers that overwrite code must flush the code cache themselves.
    pub fn load(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let start = addr as usize;
        let end = start.checked_add(data.len()).filter(|&e| e <= self.ram.len());
        match end {
            Some(end) => {
                self.ram[start..end].copy_from_slice(data);
                Ok(())
            }
            None => Err(CoreError::ImageOutOfRange { addr, len: data.len(), region: "RAM" }),
        }
    }

    pub fn load_rom(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.rom.len() {
            return Err(CoreError::ImageOutOfRange { addr: ROM_BASE, len: data.len(), region: "ROM" });
        }
        self.rom[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Host-side view of physical memory; unbacked bytes read as zero
    pub fn read_bytes(&mut self, addr: u32, len: u32) -> Vec<u8> {
        (0..len)
            .map(|i| {
                let a = addr.wrapping_add(i);
                match self.region(a) {
                    PhysRegion::Ram => self.ram[a as usize],
                    PhysRegion::Rom => self.rom[(a - ROM_BASE) as usize],
                    _ => 0,
                }
            })
            .collect()
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub(crate) fn replace_ram(&mut self, ram: Vec<u8>) -> Result<()> {
        if ram.len() != self.ram.len() {
            return Err(CoreError::Snapshot(format!(
                "RAM size mismatch: snapshot {} bytes, machine {} bytes",
                ram.len(),
                self.ram.len()
            )));
        }
        self.ram = ram;
        Ok(())
    }

    // Code watches

    pub fn watch_code(&mut self, page: u32) {
        if let Some(w) = self.watch.get_mut(page as usize) {
            *w |= WATCH_CODE;
        }
    }

    pub fn unwatch_code(&mut self, page: u32) {
        if let Some(w) = self.watch.get_mut(page as usize) {
            *w &= !WATCH_CODE;
        }
    }

    pub fn clear_code_watches(&mut self) {
        for w in self.watch.iter_mut() {
            *w &= !WATCH_CODE;
        }
        self.code_hits.clear();
    }

    pub fn is_code_page(&self, page: u32) -> bool {
        self.watch.get(page as usize).is_some_and(|w| w & WATCH_CODE != 0)
    }

    /// Report a code page as modified without a store (icbi)
    pub fn note_code_write(&mut self, page: u32) {
        if self.is_code_page(page) {
            self.unwatch_code(page);
            self.code_hits.push(page);
        }
    }

    #[inline(always)]
    pub fn has_code_hits(&self) -> bool {
        !self.code_hits.is_empty()
    }

    pub fn take_code_hits(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.code_hits)
    }

    // Table watches

    pub fn take_table_hit(&mut self) -> bool {
        std::mem::replace(&mut self.table_hit, false)
    }

    pub fn clear_table_watches(&mut self) {
        for w in self.watch.iter_mut() {
            *w &= !WATCH_TABLE;
        }
    }

    // MMIO

    pub fn map_mmio(&mut self, base: u32, size: u32, handler: Box<dyn MmioHandler>) -> Result<()> {
        self.mmio.map(base, size, handler)
    }

    pub fn mmio_mut(&mut self) -> &mut MmioTable {
        &mut self.mmio
    }

    pub fn reset(&mut self) {
        for w in self.watch.iter_mut() {
            *w = 0;
        }
        self.code_hits.clear();
        self.table_hit = false;
        self.mmio.reset_all();
    }
}

impl Bus for Memory {
    fn read_phys32(&mut self, addr: u32) -> Option<u32> {
        match self.region(addr) {
            PhysRegion::Ram | PhysRegion::Rom => self.read(addr, Size::Word),
            _ => None,
        }
    }

    fn write_phys32(&mut self, addr: u32, value: u32) -> bool {
        match self.region(addr) {
            PhysRegion::Ram if self.fits(addr, 4) => {
                write_be(&mut self.ram, addr as usize, Size::Word, value);
                true
            }
            PhysRegion::Rom => true,
            _ => false,
        }
    }

    fn region(&self, addr: u32) -> PhysRegion {
        Memory::region(self, addr)
    }

    fn watch_table(&mut self, addr: u32) {
        if let Some(w) = self.watch.get_mut((addr >> PAGE_SHIFT) as usize) {
            *w |= WATCH_TABLE;
        }
    }
}

#[inline(always)]
fn read_be(buf: &[u8], off: usize, size: Size) -> u32 {
    match size {
        Size::Byte => buf[off] as u32,
        Size::Half => u16::from_be_bytes([buf[off], buf[off + 1]]) as u32,
        Size::Word => u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]),
    }
}

#[inline(always)]
fn write_be(buf: &mut [u8], off: usize, size: Size, value: u32) {
    match size {
        Size::Byte => buf[off] = value as u8,
        Size::Half => buf[off..off + 2].copy_from_slice(&(value as u16).to_be_bytes()),
        Size::Word => buf[off..off + 4].copy_from_slice(&value.to_be_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_access() {
        let mut mem = Memory::new(1);
        assert!(mem.write(0x100, Size::Word, 0x1234_5678));
        assert_eq!(mem.read(0x100, Size::Byte), Some(0x12));
        assert_eq!(mem.read(0x102, Size::Half), Some(0x5678));
        assert!(mem.write64(0x200, 0x0102_0304_0506_0708));
        assert_eq!(mem.read(0x204, Size::Word), Some(0x0506_0708));
    }

    #[test]
    fn test_unmapped_is_bus_error() {
        let mut mem = Memory::new(1);
        assert_eq!(mem.read(0x4000_0000, Size::Word), None);
        assert!(!mem.write(0x4000_0000, Size::Word, 1));
        // straddles the end of RAM
        assert_eq!(mem.read(0x000F_FFFE, Size::Word), None);
    }

    #[test]
    fn test_rom_ignores_writes() {
        let mut mem = Memory::new(1);
        mem.load_rom(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert!(mem.write(ROM_BASE, Size::Word, 0));
        assert_eq!(mem.read(ROM_BASE, Size::Word), Some(0xdead_beef));
    }

    #[test]
    fn test_code_watch_fires_once() {
        let mut mem = Memory::new(1);
        mem.watch_code(1);
        mem.write(0x1004, Size::Word, 0);
        mem.write(0x1008, Size::Word, 0);
        assert_eq!(mem.take_code_hits(), vec![1]);
        assert!(!mem.has_code_hits());
    }

    #[test]
    fn test_descriptor_update_bypasses_watch() {
        let mut mem = Memory::new(1);
        mem.watch_table(0x3000);
        mem.watch_code(3);
        assert!(mem.write_phys32(0x3000, 0x1234));
        assert!(!mem.has_code_hits());
        assert!(!mem.take_table_hit());
        mem.write(0x3004, Size::Word, 1);
        assert!(mem.take_table_hit());
    }

    #[test]
    fn test_load_out_of_range() {
        let mut mem = Memory::new(1);
        let err = mem.load(0x000F_FFFF, &[1, 2]).unwrap_err();
        assert!(matches!(err, CoreError::ImageOutOfRange { .. }));
    }
}
