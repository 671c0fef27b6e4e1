//! Guest CPU
//!
//! 32-bit PowerPC integer/FP core with a 68040-style MMU. `Cpu` owns the
//! register file and MMU; physical memory is passed in by the caller so the
//! block translator can borrow both at once.

pub mod alu;
pub mod asm;
pub mod decode;
pub mod exception;
pub mod execute;
pub mod flags;
pub mod jit;
pub mod mmu;
pub mod regs;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::memory::{Memory, Size, PAGE_MASK, PAGE_SIZE};
pub use exception::{Exception, Fault, FaultKind, ProgramCause};
pub use execute::Flow;
use flags::{SpecialFlags, SPCFLAG_JIT_END_COMPILE};
pub use flags::InterruptLine;
pub use mmu::{Access, Mmu, MmuRegisters};
pub use regs::RegisterFile;

/// Exception vector prefix after reset
pub const RESET_EVPR: u32 = 0xFFF0_0000;
/// First instruction after reset
pub const RESET_PC: u32 = 0xFFF0_0100;
/// Processor version reported by PVR
pub const PVR_VALUE: u32 = 0x0008_0202;

/// Serializable CPU state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuState {
    pub regs: RegisterFile,
    pub mmu: MmuRegisters,
}

pub struct Cpu {
    pub regs: RegisterFile,
    pub mmu: Mmu,
    flags: Arc<SpecialFlags>,
    /// Asserted interrupt sources, read and acknowledged through INTSRC
    interrupt_sources: Arc<AtomicU32>,
    pub instruction_count: u64,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Self {
        let mut cpu = Cpu {
            regs: RegisterFile::new(),
            mmu: Mmu::new(),
            flags: Arc::new(SpecialFlags::new()),
            interrupt_sources: Arc::new(AtomicU32::new(0)),
            instruction_count: 0,
        };
        cpu.reset();
        cpu
    }

    pub fn reset(&mut self) {
        self.regs = RegisterFile::new();
        self.regs.pc = RESET_PC;
        self.regs.evpr = RESET_EVPR;
        self.regs.msr = regs::MSR_ME;
        self.mmu.reset();
        self.flags.init(0);
        self.interrupt_sources.store(0, Ordering::Release);
        self.instruction_count = 0;
    }

    pub fn flags(&self) -> &Arc<SpecialFlags> {
        &self.flags
    }

    /// Handle for platform threads raising interrupts or stop requests
    pub fn interrupt_line(&self) -> InterruptLine {
        InterruptLine::new(self.flags.clone(), self.interrupt_sources.clone())
    }

    pub fn interrupt_sources(&self) -> u32 {
        self.interrupt_sources.load(Ordering::Acquire)
    }

    pub(crate) fn acknowledge_interrupts(&self, bits: u32) {
        flags::clear_sources(&self.flags, &self.interrupt_sources, bits);
    }

    pub fn save_state(&self) -> CpuState {
        CpuState { regs: self.regs.clone(), mmu: self.mmu.regs().clone() }
    }

    pub fn restore_state(&mut self, state: CpuState) {
        self.regs = state.regs;
        self.mmu.restore_registers(state.mmu);
    }

    /// Enter the handler for `exc`. Stops the running block.
    pub fn take_exception(&mut self, exc: Exception) {
        let exc = exc.at(self.regs.pc);
        tracing::trace!("exception {:?} at {:#010x}", exc, self.regs.pc);
        exception::deliver(&mut self.regs, &exc);
        self.flags.set(SPCFLAG_JIT_END_COMPILE);
    }

    // Memory access

    /// Physical address of the instruction at `pc`
    #[inline]
    pub fn translate_fetch(&mut self, mem: &mut Memory, pc: u32) -> Result<u32, Exception> {
        let privileged = self.regs.is_supervisor();
        self.mmu
            .translate(mem, pc, Access::FETCH, privileged, Size::Word)
            .map_err(Exception::InstructionStorage)
    }

    #[inline]
    pub fn fetch(&mut self, mem: &mut Memory, pc: u32) -> Result<u32, Exception> {
        let phys = self.translate_fetch(mem, pc)?;
        mem.read(phys, Size::Word).ok_or_else(|| {
            let privileged = self.regs.is_supervisor();
            Exception::InstructionStorage(Fault::new(pc, FaultKind::BusError, Access::FETCH, Size::Word, privileged))
        })
    }

    #[inline]
    fn translate_data(&mut self, mem: &mut Memory, addr: u32, access: Access, size: Size) -> Result<u32, Exception> {
        let privileged = self.regs.is_supervisor();
        self.mmu
            .translate(mem, addr, access, privileged, size)
            .map_err(Exception::DataStorage)
    }

    fn bus_error(&self, addr: u32, access: Access, size: Size) -> Exception {
        let privileged = self.regs.is_supervisor();
        Exception::DataStorage(Fault::new(addr, FaultKind::BusError, access, size, privileged))
    }

    #[inline]
    pub fn load(&mut self, mem: &mut Memory, addr: u32, size: Size) -> Result<u32, Exception> {
        if (addr & PAGE_MASK) + size.bytes() > PAGE_SIZE {
            // crosses a page: one translation per byte
            let mut value = 0;
            for i in 0..size.bytes() {
                value = (value << 8) | self.load(mem, addr.wrapping_add(i), Size::Byte)?;
            }
            return Ok(value);
        }
        let phys = self.translate_data(mem, addr, Access::READ, size)?;
        mem.read(phys, size).ok_or_else(|| self.bus_error(addr, Access::READ, size))
    }

    #[inline]
    pub fn store(&mut self, mem: &mut Memory, addr: u32, size: Size, value: u32) -> Result<(), Exception> {
        if (addr & PAGE_MASK) + size.bytes() > PAGE_SIZE {
            let n = size.bytes();
            for i in 0..n {
                let byte = (value >> (8 * (n - 1 - i))) & 0xFF;
                self.store(mem, addr.wrapping_add(i), Size::Byte, byte)?;
            }
            return Ok(());
        }
        let phys = self.translate_data(mem, addr, Access::WRITE, size)?;
        if !mem.write(phys, size, value) {
            return Err(self.bus_error(addr, Access::WRITE, size));
        }
        if mem.take_table_hit() {
            tracing::debug!("store to page table at {:#010x}, flushing ATC", phys);
            self.mmu.flush_all(true);
            mem.clear_table_watches();
        }
        Ok(())
    }

    pub fn load64(&mut self, mem: &mut Memory, addr: u32) -> Result<u64, Exception> {
        let hi = self.load(mem, addr, Size::Word)?;
        let lo = self.load(mem, addr.wrapping_add(4), Size::Word)?;
        Ok(((hi as u64) << 32) | lo as u64)
    }

    pub fn store64(&mut self, mem: &mut Memory, addr: u32, value: u64) -> Result<(), Exception> {
        self.store(mem, addr, Size::Word, (value >> 32) as u32)?;
        self.store(mem, addr.wrapping_add(4), Size::Word, value as u32)
    }

    // Execution

    /// Run one decoded instruction at `pc` without touching `regs.pc`
    #[inline]
    pub fn execute(&mut self, mem: &mut Memory, inst: u32, pc: u32) -> Result<Flow, Exception> {
        match decode::decode(inst) {
            Some(op) => (execute::handler(op))(self, mem, inst, pc),
            None => Err(Exception::Program(ProgramCause::Illegal)),
        }
    }

    /// Fetch, execute and retire one instruction
    #[inline]
    pub fn step(&mut self, mem: &mut Memory) -> Result<(), Exception> {
        let pc = self.regs.pc;
        let inst = self.fetch(mem, pc)?;
        match self.execute(mem, inst, pc)? {
            Flow::Next => self.regs.pc = pc.wrapping_add(4),
            Flow::Jump(target) => self.regs.pc = target,
        }
        self.instruction_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::asm;

    fn cpu_with(code: &[u32]) -> (Cpu, Memory) {
        let mut mem = Memory::new(1);
        mem.load(0x1000, &asm::assemble(code)).unwrap();
        let mut cpu = Cpu::new();
        cpu.regs.pc = 0x1000;
        (cpu, mem)
    }

    #[test]
    fn test_cpu_creation() {
        let cpu = Cpu::new();
        assert_eq!(cpu.regs.pc, RESET_PC);
        assert!(cpu.regs.is_supervisor());
    }

    #[test]
    fn test_step_advances_pc() {
        let (mut cpu, mut mem) = cpu_with(&[asm::addi(3, 0, 42), asm::addi(3, 3, 1)]);
        cpu.step(&mut mem).unwrap();
        cpu.step(&mut mem).unwrap();
        assert_eq!(cpu.regs.gpr[3], 43);
        assert_eq!(cpu.regs.pc, 0x1008);
        assert_eq!(cpu.instruction_count, 2);
    }

    #[test]
    fn test_illegal_instruction() {
        let (mut cpu, mut mem) = cpu_with(&[0]);
        assert_eq!(cpu.step(&mut mem), Err(Exception::Program(ProgramCause::Illegal)));
        assert_eq!(cpu.regs.pc, 0x1000);
    }

    #[test]
    fn test_page_crossing_word() {
        let (mut cpu, mut mem) = cpu_with(&[]);
        cpu.store(&mut mem, 0x1FFE, Size::Word, 0xAABB_CCDD).unwrap();
        assert_eq!(cpu.load(&mut mem, 0x1FFE, Size::Word), Ok(0xAABB_CCDD));
        assert_eq!(mem.read(0x2000, Size::Half), Some(0xCCDD));
    }

    #[test]
    fn test_bus_error_on_unbacked_load() {
        let (mut cpu, mut mem) = cpu_with(&[]);
        match cpu.load(&mut mem, 0x8000_0000, Size::Word) {
            Err(Exception::DataStorage(f)) => assert_eq!(f.kind, FaultKind::BusError),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_state_round_trip() {
        let mut cpu = Cpu::new();
        cpu.regs.gpr[5] = 7;
        cpu.mmu.set_urp(0x4000);
        let state = cpu.save_state();
        let mut other = Cpu::new();
        other.restore_state(state.clone());
        assert_eq!(other.save_state(), state);
    }
}
