//! Machine orchestrator
//!
//! Brings together CPU, physical memory and the block translator, and runs
//! the dispatch loop: special-flag checkpoints, block execution with
//! interpreter fallback, and host-initiated guest calls.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::config::CoreConfig;
use crate::cpu::flags::*;
use crate::cpu::jit::{Jit, JitRun, JitStats, TRAP_SENTINEL};
use crate::cpu::regs::{MSR_PR, MSR_SE};
use crate::cpu::{Cpu, CpuState, Exception, InterruptLine, RegisterFile};
use crate::error::{CoreError, Result};
use crate::memory::{Memory, MmioHandler, ROM_BASE, ROM_SIZE};

/// Instructions the interpreter runs between flag checks when per-instruction
/// checking is off
const INTERP_BATCH: u64 = 64;

/// Why `run` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// STOP was requested
    Stopped,
    /// A monitor entry was requested
    Monitor,
    /// The instruction budget ran out
    BudgetExhausted,
    /// A guest trap handler returned to the sentinel
    TrapReturn,
}

/// Registers passed into and out of a guest trap handler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapRegs {
    pub gpr: [u32; 32],
    pub cr: u32,
    pub xer: u32,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    cpu: CpuState,
    ram: Vec<u8>,
}

pub struct Machine {
    pub cpu: Cpu,
    memory: Memory,
    jit: Jit,
    config: CoreConfig,
    /// Nesting level of `execute_guest_trap`
    trap_depth: u32,
}

impl Machine {
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "machine: {} MiB RAM, jit {}, {:?} backend, {} KiB code cache",
            config.ram_size_mb,
            if config.jit { "on" } else { "off" },
            config.backend,
            config.code_cache_bytes / 1024
        );
        Ok(Machine {
            cpu: Cpu::new(),
            memory: Memory::new(config.ram_size_mb),
            jit: Jit::new(&config),
            config,
            trap_depth: 0,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Switch between translated blocks and the interpreter
    pub fn set_jit(&mut self, enable: bool) {
        if !enable {
            self.jit.flush(&mut self.memory);
        }
        self.config.jit = enable;
    }

    pub fn regs(&self) -> &RegisterFile {
        &self.cpu.regs
    }

    pub fn regs_mut(&mut self) -> &mut RegisterFile {
        &mut self.cpu.regs
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn jit_stats(&self) -> JitStats {
        self.jit.stats
    }

    pub fn instruction_count(&self) -> u64 {
        self.cpu.instruction_count
    }

    /// Copy an image into RAM at physical `addr`
    pub fn load_image(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.memory.load(addr, data)?;
        self.flush_code_cache(addr..addr.saturating_add(data.len() as u32));
        Ok(())
    }

    pub fn load_rom(&mut self, data: &[u8]) -> Result<()> {
        self.memory.load_rom(data)?;
        self.flush_code_cache(ROM_BASE..ROM_BASE.wrapping_add(ROM_SIZE - 1));
        Ok(())
    }

    pub fn map_mmio(&mut self, base: u32, size: u32, handler: Box<dyn MmioHandler>) -> Result<()> {
        self.memory.map_mmio(base, size, handler)
    }

    /// Handle for other threads to raise interrupts and stop requests
    pub fn interrupt_line(&self) -> InterruptLine {
        self.cpu.interrupt_line()
    }

    pub fn set_interrupt_flag(&self, bits: u32) {
        self.cpu.interrupt_line().set_interrupt_flag(bits);
    }

    pub fn clear_interrupt_flag(&self, bits: u32) {
        self.cpu.interrupt_line().clear_interrupt_flag(bits);
    }

    /// Drop translated code for a physical range the host modified
    pub fn flush_code_cache(&mut self, range: Range<u32>) {
        debug!("flush code cache {:#010x}..{:#010x}", range.start, range.end);
        self.jit.invalidate_range(&mut self.memory, range.start, range.end);
    }

    pub fn reset(&mut self) {
        info!("machine reset");
        self.cpu.reset();
        self.memory.reset();
        self.jit.flush(&mut self.memory);
        self.trap_depth = 0;
    }

    /// Run until a stop or monitor request, a trap return, or about
    /// `max_insns` instructions (blocks are not split to hit it exactly)
    pub fn run(&mut self, max_insns: u64) -> RunExit {
        let start = self.cpu.instruction_count;
        loop {
            if let Some(exit) = self.checkpoint() {
                return exit;
            }
            if self.trap_depth > 0 && self.cpu.regs.pc == TRAP_SENTINEL {
                return RunExit::TrapReturn;
            }
            let done = self.cpu.instruction_count - start;
            if done >= max_insns {
                return RunExit::BudgetExhausted;
            }
            let remaining = max_insns - done;

            let single_step = self.cpu.flags().test(SPCFLAG_TRACE) || self.cpu.regs.msr & MSR_SE != 0;
            if self.config.jit && !single_step {
                match self.jit.execute(&mut self.cpu, &mut self.memory, remaining) {
                    JitRun::Executed => continue,
                    JitRun::Interpret => self.interpret(1),
                }
            } else {
                let batch = if self.config.check_interrupts { 1 } else { INTERP_BATCH };
                self.interpret(remaining.min(batch));
            }
        }
    }

    /// Interpret up to `count` instructions, stopping early at an exception,
    /// a code-page store or the trap sentinel
    fn interpret(&mut self, count: u64) {
        let tracing = self.cpu.flags().test(SPCFLAG_TRACE);
        for _ in 0..count {
            let pc = self.cpu.regs.pc;
            if self.trap_depth > 0 && pc == TRAP_SENTINEL {
                return;
            }
            if tracing {
                let inst = self.cpu.fetch(&mut self.memory, pc).unwrap_or(0);
                trace!("{:#010x}: {:08x}", pc, inst);
            }
            let single_step = self.cpu.regs.msr & MSR_SE != 0;
            if let Err(e) = self.cpu.step(&mut self.memory) {
                self.cpu.take_exception(e);
                return;
            }
            if single_step {
                self.cpu.take_exception(Exception::Trace);
                return;
            }
            if self.memory.has_code_hits() {
                return;
            }
        }
    }

    /// Service pending invalidations and special flags. Returns why `run`
    /// should stop, if it should.
    fn checkpoint(&mut self) -> Option<RunExit> {
        if self.memory.has_code_hits() {
            for page in self.memory.take_code_hits() {
                self.jit.invalidate_page(&mut self.memory, page);
            }
        }

        let flags = self.cpu.flags().clone();
        if flags.is_empty() {
            return None;
        }
        // the flush behind EXEC_RETURN is done by now, at any trap depth
        flags.clear(SPCFLAG_JIT_END_COMPILE | SPCFLAG_JIT_EXEC_RETURN);
        let outermost = self.trap_depth == 0;

        if flags.test(SPCFLAG_STOP) {
            // nested trap calls unwind with STOP still raised
            if outermost {
                flags.clear(SPCFLAG_STOP);
            }
            return Some(RunExit::Stopped);
        }
        if outermost && flags.test(SPCFLAG_ENTER_MONITOR) {
            flags.clear(SPCFLAG_ENTER_MONITOR);
            return Some(RunExit::Monitor);
        }
        if flags.test(SPCFLAG_DO_INTERRUPT) {
            flags.clear(SPCFLAG_DO_INTERRUPT);
            if self.cpu.regs.interrupts_enabled() {
                trace!("external interrupt at {:#010x}", self.cpu.regs.pc);
                self.cpu.take_exception(Exception::External);
            }
        }
        if flags.test(SPCFLAG_INTERRUPT_PENDING) && self.cpu.regs.interrupts_enabled() {
            flags.set(SPCFLAG_DO_INTERRUPT);
        }
        None
    }

    /// Call the guest handler for `vector` with the given registers and
    /// return the registers it left behind. The rest of the register file
    /// is restored afterwards.
    pub fn execute_guest_trap(&mut self, vector: u32, input: TrapRegs) -> Result<TrapRegs> {
        let saved = self.cpu.regs.clone();
        {
            let regs = &mut self.cpu.regs;
            regs.gpr = input.gpr;
            regs.cr = input.cr;
            regs.xer = input.xer;
            regs.lr = TRAP_SENTINEL;
            regs.msr &= !MSR_PR;
            regs.pc = regs.evpr.wrapping_add(vector.wrapping_mul(0x100));
        }
        self.trap_depth += 1;
        debug!("guest trap {:#x} (depth {})", vector, self.trap_depth);

        let outcome = loop {
            match self.run(u64::MAX) {
                RunExit::TrapReturn => break Ok(()),
                RunExit::Stopped => break Err(CoreError::TrapAborted { vector, reason: "stop requested" }),
                RunExit::Monitor | RunExit::BudgetExhausted => {}
            }
        };

        self.trap_depth -= 1;
        let output = TrapRegs { gpr: self.cpu.regs.gpr, cr: self.cpu.regs.cr, xer: self.cpu.regs.xer };
        self.cpu.regs = saved;
        outcome.map(|_| output)
    }

    /// CPU state and RAM, bincode-encoded and zstd-compressed
    pub fn save_state(&self) -> Result<Vec<u8>> {
        let snapshot = Snapshot { cpu: self.cpu.save_state(), ram: self.memory.ram().to_vec() };
        let serialized = bincode::serialize(&snapshot).map_err(|e| CoreError::Snapshot(e.to_string()))?;
        zstd::stream::encode_all(&serialized[..], 3).map_err(|e| CoreError::Snapshot(e.to_string()))
    }

    pub fn restore_state(&mut self, data: &[u8]) -> Result<()> {
        let decompressed = zstd::stream::decode_all(data).map_err(|e| CoreError::Snapshot(e.to_string()))?;
        let snapshot: Snapshot =
            bincode::deserialize(&decompressed).map_err(|e| CoreError::Snapshot(e.to_string()))?;
        self.memory.replace_ram(snapshot.ram)?;
        self.cpu.restore_state(snapshot.cpu);
        self.jit.flush(&mut self.memory);
        self.memory.clear_table_watches();
        self.trap_depth = 0;
        Ok(())
    }
}
