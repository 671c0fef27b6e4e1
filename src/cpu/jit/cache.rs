//! Code cache
//!
//! Owns compiled blocks, indexed by physical entry address and by source
//! page. Storage is a slot vector; a freed slot is reused by the next
//! insertion under a new serial, which is what keeps stale chain links
//! from ever reaching the new occupant.

use std::collections::HashMap;

use super::block::{BlockId, ChainLink, CompiledBlock};
use super::codegen::CodegenError;
use crate::memory::PAGE_SHIFT;

pub struct CodeCache {
    slots: Vec<Option<CompiledBlock>>,
    free: Vec<BlockId>,
    by_phys: HashMap<u32, BlockId>,
    by_page: HashMap<u32, Vec<BlockId>>,
    /// Host bytes allowed
    capacity: usize,
    used: usize,
    next_serial: u64,
}

impl CodeCache {
    pub fn new(capacity: usize) -> Self {
        CodeCache {
            slots: Vec::with_capacity(1024),
            free: Vec::new(),
            by_phys: HashMap::with_capacity(1024),
            by_page: HashMap::new(),
            capacity,
            used: 0,
            next_serial: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.by_phys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_phys.is_empty()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn lookup(&self, phys: u32) -> Option<BlockId> {
        self.by_phys.get(&phys).copied()
    }

    #[inline]
    pub fn get(&self, id: BlockId) -> Option<&CompiledBlock> {
        self.slots.get(id).and_then(|s| s.as_ref())
    }

    /// Store a block, replacing any block with the same physical entry
    pub fn insert(&mut self, mut block: CompiledBlock) -> Result<BlockId, CodegenError> {
        if let Some(old) = self.lookup(block.entry_phys) {
            self.remove(old);
        }
        if self.used + block.host_size() > self.capacity {
            return Err(CodegenError::CacheFull);
        }
        block.serial = self.next_serial;
        self.next_serial += 1;
        self.used += block.host_size();

        let phys = block.entry_phys;
        let page = block.page();
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(block);
                id
            }
            None => {
                self.slots.push(Some(block));
                self.slots.len() - 1
            }
        };
        self.by_phys.insert(phys, id);
        self.by_page.entry(page).or_default().push(id);
        Ok(id)
    }

    pub fn remove(&mut self, id: BlockId) -> Option<CompiledBlock> {
        let block = self.slots.get_mut(id)?.take()?;
        self.used -= block.host_size();
        self.by_phys.remove(&block.entry_phys);
        if let Some(ids) = self.by_page.get_mut(&block.page()) {
            ids.retain(|&b| b != id);
            if ids.is_empty() {
                self.by_page.remove(&block.page());
            }
        }
        self.free.push(id);
        Some(block)
    }

    /// Drop every block compiled from physical page `page`
    pub fn invalidate_page(&mut self, page: u32) -> usize {
        let ids = self.by_page.remove(&page).unwrap_or_default();
        let count = ids.len();
        for id in ids {
            if let Some(block) = self.slots.get_mut(id).and_then(|s| s.take()) {
                self.used -= block.host_size();
                self.by_phys.remove(&block.entry_phys);
                self.free.push(id);
            }
        }
        count
    }

    /// Pages that currently hold compiled code
    pub fn pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_page.keys().copied()
    }

    pub fn has_page(&self, phys: u32) -> bool {
        self.by_page.contains_key(&(phys >> PAGE_SHIFT))
    }

    pub fn flush(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.by_phys.clear();
        self.by_page.clear();
        self.used = 0;
    }

    /// Patch exit `exit` of block `from` (if it still has `serial`) to jump
    /// straight into block `to`
    pub fn link(&mut self, from: BlockId, serial: u64, exit: usize, to: BlockId, epoch: u64, supervisor: bool) -> bool {
        let Some(target_serial) = self.get(to).map(|b| b.serial) else {
            return false;
        };
        let Some(block) = self.slots.get_mut(from).and_then(|s| s.as_mut()) else {
            return false;
        };
        if block.serial != serial {
            return false;
        }
        match block.exits.get_mut(exit) {
            Some(e) => {
                e.link = Some(ChainLink { target: to, serial: target_serial, epoch, supervisor });
                true
            }
            None => false,
        }
    }

    /// Target of exit `exit` of block `from`, if its link is still valid
    /// for the current translation context
    #[inline]
    pub fn follow(&self, from: BlockId, exit: usize, epoch: u64, supervisor: bool) -> Option<BlockId> {
        let link = self.get(from)?.exits.get(exit)?.link?;
        if link.epoch != epoch || link.supervisor != supervisor {
            return None;
        }
        match self.get(link.target) {
            Some(target) if target.serial == link.serial => Some(link.target),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::asm;
    use crate::cpu::jit::codegen::interp::InterpSegment;
    use crate::cpu::jit::codegen::CodeSegment;

    fn block(pc: u32, exits: &[u32]) -> CompiledBlock {
        let segs: Vec<Box<dyn CodeSegment>> = vec![Box::new(InterpSegment::new(asm::nop()))];
        CompiledBlock::new(pc, pc, segs, exits)
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut cache = CodeCache::new(1 << 20);
        let id = cache.insert(block(0x1000, &[])).unwrap();
        assert_eq!(cache.lookup(0x1000), Some(id));
        assert!(cache.used() > 0);
        assert!(cache.remove(id).is_some());
        assert_eq!(cache.lookup(0x1000), None);
        assert_eq!(cache.used(), 0);
    }

    #[test]
    fn test_invalidate_page_drops_all_blocks() {
        let mut cache = CodeCache::new(1 << 20);
        cache.insert(block(0x1000, &[])).unwrap();
        cache.insert(block(0x1800, &[])).unwrap();
        cache.insert(block(0x2000, &[])).unwrap();
        assert_eq!(cache.invalidate_page(1), 2);
        assert_eq!(cache.lookup(0x1000), None);
        assert!(cache.lookup(0x2000).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_full_cache_rejects_insert() {
        let one = block(0, &[]).host_size();
        let mut cache = CodeCache::new(one * 2);
        cache.insert(block(0x1000, &[])).unwrap();
        cache.insert(block(0x2000, &[])).unwrap();
        assert_eq!(cache.insert(block(0x3000, &[])).unwrap_err(), CodegenError::CacheFull);
    }

    #[test]
    fn test_link_dies_with_target() {
        let mut cache = CodeCache::new(1 << 20);
        let a = cache.insert(block(0x1000, &[0x2000])).unwrap();
        let b = cache.insert(block(0x2000, &[])).unwrap();
        let serial = cache.get(a).unwrap().serial;
        assert!(cache.link(a, serial, 0, b, 7, true));
        assert_eq!(cache.follow(a, 0, 7, true), Some(b));
        // different translation context
        assert_eq!(cache.follow(a, 0, 8, true), None);
        assert_eq!(cache.follow(a, 0, 7, false), None);

        cache.invalidate_page(2);
        // slot reused by an unrelated block
        let c = cache.insert(block(0x3000, &[])).unwrap();
        assert_eq!(c, b);
        assert_eq!(cache.follow(a, 0, 7, true), None);
    }
}
