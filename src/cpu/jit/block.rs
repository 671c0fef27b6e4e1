//! Compiled blocks
//!
//! A block covers consecutive guest instructions from one entry address up
//! to a terminator, the length cap or the end of the page. It never spans
//! two pages, so one code-page watch covers it.

use super::codegen::{CodeSegment, SegmentExit};
use crate::cpu::Cpu;
use crate::memory::{Memory, PAGE_SHIFT};

/// Slot index in the code cache
pub type BlockId = usize;

/// Direct link from a block exit to the block at its target.
/// Only valid while the target keeps its serial and the translation
/// context it was resolved under is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    pub target: BlockId,
    pub serial: u64,
    pub epoch: u64,
    pub supervisor: bool,
}

/// Statically known successor of a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockExit {
    pub target: u32,
    pub link: Option<ChainLink>,
}

pub struct CompiledBlock {
    /// Virtual address of the first instruction
    pub entry_pc: u32,
    pub entry_phys: u32,
    /// Guest instructions covered
    pub len: u32,
    /// Assigned by the cache on insertion
    pub serial: u64,
    pub exits: Vec<BlockExit>,
    segments: Vec<Box<dyn CodeSegment>>,
    host_size: usize,
}

impl CompiledBlock {
    pub fn new(entry_pc: u32, entry_phys: u32, segments: Vec<Box<dyn CodeSegment>>, exits: &[u32]) -> Self {
        let len = segments.iter().map(|s| s.len()).sum();
        let host_size = std::mem::size_of::<Self>()
            + segments.iter().map(|s| s.host_size()).sum::<usize>()
            + exits.len() * std::mem::size_of::<BlockExit>();
        CompiledBlock {
            entry_pc,
            entry_phys,
            len,
            serial: 0,
            exits: exits.iter().map(|&target| BlockExit { target, link: None }).collect(),
            segments,
            host_size,
        }
    }

    /// Physical page holding the block's code
    pub fn page(&self) -> u32 {
        self.entry_phys >> PAGE_SHIFT
    }

    /// Address following the last instruction
    pub fn end_pc(&self) -> u32 {
        self.entry_pc.wrapping_add(self.len * 4)
    }

    pub fn host_size(&self) -> usize {
        self.host_size
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Index of the static exit leading to `target`
    pub fn exit_index(&self, target: u32) -> Option<usize> {
        self.exits.iter().position(|e| e.target == target)
    }

    /// Run the block. On `Exit` and `Smc`, `regs.pc` is the next
    /// instruction to execute; on `Fault` it is the faulting one.
    /// Never returns `Next`.
    pub fn run(&self, cpu: &mut Cpu, mem: &mut Memory) -> SegmentExit {
        let mut pc = self.entry_pc;
        for seg in &self.segments {
            match seg.run(cpu, mem, pc) {
                SegmentExit::Next => pc = pc.wrapping_add(seg.len() * 4),
                other => return other,
            }
        }
        cpu.regs.pc = pc;
        SegmentExit::Exit
    }
}
