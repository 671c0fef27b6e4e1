//! Block translator
//!
//! Compiles runs of guest instructions into blocks, keyed by the physical
//! address of their first instruction, and runs them with direct chaining
//! between blocks whose successor is known at translation time.
//!
//! Chaining is lazy: an exit whose target has no valid link returns to the
//! dispatcher, and the next `execute` call patches the link once the target
//! block has been resolved. Links carry the MMU epoch and privilege they
//! were resolved under, so any translation change silently unlinks them.
//!
//! Self-modifying code: every block's page is watched in physical memory.
//! A store to it ends the running block after the store, and the dispatcher
//! calls `invalidate_page` before the next fetch.

pub mod block;
pub mod cache;
pub mod codegen;

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::{Backend, CoreConfig};
use crate::cpu::decode::{aa, bd, decode, li, rd, Opcode};
use crate::cpu::flags::{SPCFLAG_ALL, SPCFLAG_INTERRUPT_PENDING, SPCFLAG_JIT_EXEC_RETURN};
use crate::cpu::Cpu;
use crate::memory::{Memory, PhysRegion, Size, PAGE_MASK, PAGE_SHIFT};
use block::{BlockId, CompiledBlock};
use cache::CodeCache;
use codegen::interp::InterpSegment;
use codegen::{CodeSegment, CodegenError, SegmentExit};

/// LR value handed to host-initiated guest calls; execution stops there
pub const TRAP_SENTINEL: u32 = 0xFFFF_FFFC;

/// Outcome of one `Jit::execute` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitRun {
    /// Guest code ran (or an exception was delivered); back to the dispatcher
    Executed,
    /// No block for the current PC; run one instruction in the interpreter
    Interpret,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitStats {
    pub hits: u64,
    pub misses: u64,
    pub compiles: u64,
    /// Blocks dropped for self-modifying code or explicit flushes
    pub invalidations: u64,
    /// Whole-cache flushes
    pub flushes: u64,
    /// Block transitions that bypassed the dispatcher
    pub chained: u64,
    /// Entries that failed to compile and run interpreted
    pub fallbacks: u64,
}

impl JitStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Exit waiting for its target to be resolved
#[derive(Debug, Clone, Copy)]
struct PendingLink {
    from: BlockId,
    serial: u64,
    exit: usize,
    target: u32,
}

pub struct Jit {
    cache: CodeCache,
    backend: Backend,
    max_block_insns: usize,
    /// Physical entries the backend could not compile
    failed: HashSet<u32>,
    pending: Option<PendingLink>,
    pub stats: JitStats,
}

impl Jit {
    pub fn new(config: &CoreConfig) -> Self {
        let mut backend = config.backend;
        if !codegen::available(backend) {
            warn!("{:?} code emitter not built in, using threaded code", backend);
            backend = Backend::Threaded;
        }
        Jit {
            cache: CodeCache::new(config.code_cache_bytes),
            backend,
            max_block_insns: config.max_block_insns.max(1),
            failed: HashSet::new(),
            pending: None,
            stats: JitStats::default(),
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn cache(&self) -> &CodeCache {
        &self.cache
    }

    /// Run the block at `regs.pc` and whatever it chains into, until an
    /// unlinked exit, a raised flag, a fault, a code-page store or
    /// `budget` instructions.
    pub fn execute(&mut self, cpu: &mut Cpu, mem: &mut Memory, budget: u64) -> JitRun {
        let flags = cpu.flags().clone();
        let start = cpu.instruction_count;

        let pc = cpu.regs.pc;
        let phys = match cpu.translate_fetch(mem, pc) {
            Ok(phys) => phys,
            Err(e) => {
                self.pending = None;
                cpu.take_exception(e);
                return JitRun::Executed;
            }
        };
        let Some(mut id) = self.resolve(cpu, mem, pc, phys) else {
            self.pending = None;
            return JitRun::Interpret;
        };

        let epoch = cpu.mmu.epoch();
        let supervisor = cpu.regs.is_supervisor();
        if let Some(p) = self.pending.take() {
            if p.target == pc {
                self.cache.link(p.from, p.serial, p.exit, id, epoch, supervisor);
            }
        }

        loop {
            let exit = match self.cache.get(id) {
                Some(block) => block.run(cpu, mem),
                None => return JitRun::Executed,
            };
            match exit {
                SegmentExit::Fault(e) => {
                    cpu.take_exception(e);
                    return JitRun::Executed;
                }
                SegmentExit::Smc => return JitRun::Executed,
                SegmentExit::Next | SegmentExit::Exit => {}
            }

            let next_pc = cpu.regs.pc;
            let Some((serial, exit)) = self
                .cache
                .get(id)
                .and_then(|b| b.exit_index(next_pc).map(|idx| (b.serial, idx)))
            else {
                return JitRun::Executed;
            };

            // An interrupt that cannot be taken yet does not stop chaining
            let mask = if cpu.regs.interrupts_enabled() {
                SPCFLAG_ALL
            } else {
                SPCFLAG_ALL & !SPCFLAG_INTERRUPT_PENDING
            };
            let epoch = cpu.mmu.epoch();
            let supervisor = cpu.regs.is_supervisor();
            let linked = self.cache.follow(id, exit, epoch, supervisor);
            if flags.test(mask) || cpu.instruction_count - start >= budget || linked.is_none() {
                self.pending = Some(PendingLink { from: id, serial, exit, target: next_pc });
                return JitRun::Executed;
            }
            if let Some(next) = linked {
                self.stats.chained += 1;
                id = next;
            }
        }
    }

    /// Block for `pc` at `phys`, compiling it if needed
    fn resolve(&mut self, cpu: &Cpu, mem: &mut Memory, pc: u32, phys: u32) -> Option<BlockId> {
        if self.failed.contains(&phys) {
            return None;
        }
        // MMIO fetches have side effects; leave them to the interpreter
        if !matches!(mem.region(phys), PhysRegion::Ram | PhysRegion::Rom) {
            return None;
        }
        if let Some(id) = self.cache.lookup(phys) {
            // same code reached through another virtual alias
            let aliased = !matches!(self.cache.get(id), Some(b) if b.entry_pc == pc);
            if !aliased {
                self.stats.hits += 1;
                return Some(id);
            }
            self.cache.remove(id);
        }
        self.stats.misses += 1;

        match self.compile(mem, pc, phys) {
            Ok(id) => Some(id),
            Err(CodegenError::CacheFull) => {
                debug!("code cache full ({} bytes), flushing", self.cache.used());
                self.flush(mem);
                cpu.flags().set(SPCFLAG_JIT_EXEC_RETURN);
                match self.compile(mem, pc, phys) {
                    Ok(id) => Some(id),
                    Err(e) => {
                        self.give_up(phys, &e);
                        None
                    }
                }
            }
            Err(e) => {
                self.give_up(phys, &e);
                None
            }
        }
    }

    fn give_up(&mut self, phys: u32, err: &CodegenError) {
        warn!("cannot translate block at {:#010x}: {}", phys, err);
        self.failed.insert(phys);
        self.stats.fallbacks += 1;
    }

    /// Translate the instructions starting at `pc` / `phys` into a block
    pub fn compile(&mut self, mem: &mut Memory, pc: u32, phys: u32) -> Result<BlockId, CodegenError> {
        let mut emitters = codegen::emitters(self.backend);
        let mut active: Option<usize> = None;
        let mut segments: Vec<Box<dyn CodeSegment>> = Vec::new();
        let mut exits = Vec::new();

        let mut cur_pc = pc;
        let mut cur_phys = phys;
        let mut len = 0usize;

        loop {
            let Some(inst) = mem.read(cur_phys, Size::Word) else {
                if len == 0 {
                    return Err(CodegenError::Backend(format!("no code at {:#010x}", cur_phys)));
                }
                exits.push(cur_pc);
                break;
            };
            let op = decode(inst);
            let chosen = op.and_then(|op| emitters.iter().position(|e| e.supports(op, inst)));

            if chosen != active {
                if let Some(prev) = active {
                    segments.extend(emitters[prev].finish()?);
                }
                active = chosen;
            }
            match chosen {
                Some(i) => match emitters[i].emit(cur_pc, inst) {
                    Ok(()) => {}
                    Err(CodegenError::Unsupported(_)) => {
                        segments.extend(emitters[i].finish()?);
                        active = None;
                        segments.push(Box::new(InterpSegment::new(inst)));
                    }
                    Err(e) => return Err(e),
                },
                None => segments.push(Box::new(InterpSegment::new(inst))),
            }
            len += 1;

            match op {
                Some(op) if !op.ends_block(inst) => {}
                // illegal instructions end the block too
                _ => {
                    exits.extend(static_exits(op, inst, cur_pc));
                    break;
                }
            }

            cur_pc = cur_pc.wrapping_add(4);
            cur_phys = cur_phys.wrapping_add(4);
            if len >= self.max_block_insns || cur_phys & PAGE_MASK == 0 {
                exits.push(cur_pc);
                break;
            }
        }
        if let Some(prev) = active {
            segments.extend(emitters[prev].finish()?);
        }
        exits.retain(|&t| t != TRAP_SENTINEL);
        exits.dedup();

        let block = CompiledBlock::new(pc, phys, segments, &exits);
        debug!(
            "compiled block {:#010x} (phys {:#010x}): {} insns, {} segments, {} exits",
            pc,
            phys,
            block.len,
            block.segment_count(),
            block.exits.len()
        );
        let id = self.cache.insert(block)?;
        mem.watch_code(phys >> PAGE_SHIFT);
        self.stats.compiles += 1;
        Ok(id)
    }

    /// Drop the blocks of physical page `page`
    pub fn invalidate_page(&mut self, mem: &mut Memory, page: u32) {
        let removed = self.cache.invalidate_page(page);
        mem.unwatch_code(page);
        self.failed.retain(|&p| p >> PAGE_SHIFT != page);
        if removed > 0 {
            debug!("invalidated {} blocks on page {:#010x}", removed, page << PAGE_SHIFT);
            self.stats.invalidations += removed as u64;
        }
    }

    /// Drop every block overlapping the physical range `start..end`
    pub fn invalidate_range(&mut self, mem: &mut Memory, start: u32, end: u32) {
        if end <= start {
            return;
        }
        let first = start >> PAGE_SHIFT;
        let last = (end - 1) >> PAGE_SHIFT;
        for page in first..=last {
            self.invalidate_page(mem, page);
        }
    }

    /// Throw away all translated code
    pub fn flush(&mut self, mem: &mut Memory) {
        self.stats.invalidations += self.cache.len() as u64;
        self.stats.flushes += 1;
        self.cache.flush();
        self.failed.clear();
        self.pending = None;
        mem.clear_code_watches();
    }
}

/// Successors known at translation time for a block ending in `op` at `pc`
fn static_exits(op: Option<Opcode>, inst: u32, pc: u32) -> Vec<u32> {
    let fallthrough = pc.wrapping_add(4);
    // BO with both "ignore condition" and "ignore CTR" set: always taken
    let always = (rd(inst) as u32) & 0x14 == 0x14;
    match op {
        Some(Opcode::B) => {
            let target = if aa(inst) { li(inst) } else { pc.wrapping_add(li(inst)) };
            vec![target]
        }
        Some(Opcode::Bc) => {
            let target = if aa(inst) { bd(inst) } else { pc.wrapping_add(bd(inst)) };
            if always {
                vec![target]
            } else {
                vec![target, fallthrough]
            }
        }
        Some(Opcode::Bclr) | Some(Opcode::Bcctr) if !always => vec![fallthrough],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::asm;

    fn setup(code: &[u32]) -> (Jit, Cpu, Memory) {
        let mut mem = Memory::new(1);
        mem.load(0x1000, &asm::assemble(code)).unwrap();
        let mut cpu = Cpu::new();
        cpu.regs.pc = 0x1000;
        (Jit::new(&CoreConfig::default()), cpu, mem)
    }

    #[test]
    fn test_static_exits() {
        assert_eq!(static_exits(Some(Opcode::B), asm::b(0x20), 0x1000), vec![0x1020]);
        assert_eq!(static_exits(Some(Opcode::Bc), asm::beq(-8), 0x1000), vec![0x0FF8, 0x1004]);
        assert_eq!(static_exits(Some(Opcode::Bclr), asm::blr(), 0x1000), Vec::<u32>::new());
        assert_eq!(static_exits(Some(Opcode::Rfi), asm::rfi(), 0x1000), Vec::<u32>::new());
    }

    #[test]
    fn test_block_stops_at_branch() {
        let (mut jit, _cpu, mut mem) = setup(&[asm::li(3, 1), asm::addi(3, 3, 2), asm::b(0x10), asm::li(4, 9)]);
        let id = jit.compile(&mut mem, 0x1000, 0x1000).unwrap();
        let block = jit.cache().get(id).unwrap();
        assert_eq!(block.len, 3);
        assert_eq!(block.exits.len(), 1);
        assert!(mem.is_code_page(1));
    }

    #[test]
    fn test_block_stops_at_page_end() {
        let mut mem = Memory::new(1);
        mem.load(0x1FF8, &asm::assemble(&[asm::nop(), asm::nop(), asm::nop()])).unwrap();
        let mut jit = Jit::new(&CoreConfig::default());
        let id = jit.compile(&mut mem, 0x1FF8, 0x1FF8).unwrap();
        let block = jit.cache().get(id).unwrap();
        assert_eq!(block.len, 2);
        assert_eq!(block.exits[0].target, 0x2000);
    }

    #[test]
    fn test_block_length_cap() {
        let cfg = CoreConfig { max_block_insns: 4, ..CoreConfig::default() };
        let mut mem = Memory::new(1);
        mem.load(0x1000, &asm::assemble(&[asm::nop(); 10])).unwrap();
        let mut jit = Jit::new(&cfg);
        let id = jit.compile(&mut mem, 0x1000, 0x1000).unwrap();
        assert_eq!(jit.cache().get(id).unwrap().len, 4);
    }

    #[test]
    fn test_system_op_gets_own_segment() {
        let (mut jit, _cpu, mut mem) = setup(&[asm::li(3, 1), asm::mfmsr(4), asm::li(5, 1), asm::blr()]);
        let id = jit.compile(&mut mem, 0x1000, 0x1000).unwrap();
        // threaded, interp, threaded
        assert_eq!(jit.cache().get(id).unwrap().segment_count(), 3);
    }

    #[test]
    fn test_loop_chains_into_itself() {
        // r3 = 100; loop: addi r4,r4,1; bdnz loop
        let (mut jit, mut cpu, mut mem) =
            setup(&[asm::li(3, 100), asm::mtctr(3), asm::addi(4, 4, 1), asm::bdnz(-4), asm::li(5, 1), asm::b(0)]);
        let mut guard = 0;
        while cpu.regs.pc != 0x1014 && guard < 1000 {
            assert_eq!(jit.execute(&mut cpu, &mut mem, 10_000), JitRun::Executed);
            guard += 1;
        }
        assert_eq!(cpu.regs.gpr[4], 100);
        assert!(jit.stats.chained > 90, "chained {}", jit.stats.chained);
    }

    #[test]
    fn test_invalidate_page_forgets_blocks() {
        let (mut jit, _cpu, mut mem) = setup(&[asm::li(3, 1), asm::blr()]);
        jit.compile(&mut mem, 0x1000, 0x1000).unwrap();
        jit.invalidate_page(&mut mem, 1);
        assert!(jit.cache().is_empty());
        assert!(!mem.is_code_page(1));
        assert_eq!(jit.stats.invalidations, 1);
    }

    #[test]
    fn test_cache_full_flushes_everything() {
        let cfg = CoreConfig { code_cache_bytes: 4096, ..CoreConfig::default() };
        let mut mem = Memory::new(1);
        let mut cpu = Cpu::new();
        // many one-instruction blocks: b +4 each
        let code: Vec<u32> = (0..512).map(|_| asm::b(4)).collect();
        mem.load(0x1000, &asm::assemble(&code)).unwrap();
        cpu.regs.pc = 0x1000;
        let mut jit = Jit::new(&cfg);
        for _ in 0..512 {
            jit.execute(&mut cpu, &mut mem, 1);
        }
        assert!(jit.stats.flushes >= 1);
        assert!(jit.cache().used() <= 4096);
        assert_eq!(cpu.regs.pc, 0x1000 + 512 * 4);
    }
}
