//! MMIO hook table
//!
//! Platform devices register handlers for ranges inside the reserved
//! window. Offsets passed to handlers are relative to the range base.

use super::{Size, MMIO_BASE, MMIO_SIZE};
use crate::error::{CoreError, Result};

/// A memory-mapped device
pub trait MmioHandler: Send {
    fn read(&mut self, offset: u32, size: Size) -> u32;
    fn write(&mut self, offset: u32, size: Size, value: u32);
    fn reset(&mut self) {}
}

struct MmioMapping {
    base: u32,
    size: u32,
    handler: Box<dyn MmioHandler>,
}

impl MmioMapping {
    #[inline(always)]
    fn contains(&self, addr: u32) -> bool {
        addr.wrapping_sub(self.base) < self.size
    }
}

#[derive(Default)]
pub struct MmioTable {
    mappings: Vec<MmioMapping>,
    /// Index of the last mapping hit
    last: usize,
}

impl MmioTable {
    pub fn new() -> Self {
        MmioTable { mappings: Vec::new(), last: 0 }
    }

    pub fn map(&mut self, base: u32, size: u32, handler: Box<dyn MmioHandler>) -> Result<()> {
        let end = base as u64 + size as u64;
        if size == 0 || base < MMIO_BASE || end > (MMIO_BASE + MMIO_SIZE) as u64 {
            return Err(CoreError::MmioConflict { base, size, reason: "lies outside the MMIO window" });
        }
        let overlaps = self
            .mappings
            .iter()
            .any(|m| (base as u64) < m.base as u64 + m.size as u64 && (m.base as u64) < end);
        if overlaps {
            return Err(CoreError::MmioConflict { base, size, reason: "overlaps an existing mapping" });
        }
        tracing::debug!("mmio handler mapped at {:#010x} (+{:#x})", base, size);
        self.mappings.push(MmioMapping { base, size, handler });
        Ok(())
    }

    #[inline]
    fn find(&mut self, addr: u32) -> Option<&mut MmioMapping> {
        if self.mappings.get(self.last).is_some_and(|m| m.contains(addr)) {
            return self.mappings.get_mut(self.last);
        }
        let idx = self.mappings.iter().position(|m| m.contains(addr))?;
        self.last = idx;
        self.mappings.get_mut(idx)
    }

    /// `None` when no handler covers the address
    pub fn read(&mut self, addr: u32, size: Size) -> Option<u32> {
        let m = self.find(addr)?;
        let offset = addr - m.base;
        Some(m.handler.read(offset, size))
    }

    pub fn write(&mut self, addr: u32, size: Size, value: u32) -> bool {
        match self.find(addr) {
            Some(m) => {
                let offset = addr - m.base;
                m.handler.write(offset, size, value);
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&mut self) {
        for m in self.mappings.iter_mut() {
            m.handler.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Latch(u32);

    impl MmioHandler for Latch {
        fn read(&mut self, offset: u32, _size: Size) -> u32 {
            self.0 + offset
        }
        fn write(&mut self, _offset: u32, _size: Size, value: u32) {
            self.0 = value;
        }
    }

    #[test]
    fn test_dispatch_by_offset() {
        let mut table = MmioTable::new();
        table.map(MMIO_BASE + 0x100, 0x10, Box::new(Latch(0))).unwrap();
        assert!(table.write(MMIO_BASE + 0x100, Size::Word, 0x40));
        assert_eq!(table.read(MMIO_BASE + 0x104, Size::Word), Some(0x44));
        assert_eq!(table.read(MMIO_BASE + 0x110, Size::Word), None);
    }

    #[test]
    fn test_rejects_overlap_and_outside() {
        let mut table = MmioTable::new();
        table.map(MMIO_BASE, 0x1000, Box::new(Latch(0))).unwrap();
        assert!(table.map(MMIO_BASE + 0x800, 0x1000, Box::new(Latch(0))).is_err());
        assert!(table.map(0x1000, 0x10, Box::new(Latch(0))).is_err());
        assert_eq!(table.len(), 1);
    }
}
