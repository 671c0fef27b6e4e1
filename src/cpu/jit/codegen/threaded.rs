//! Threaded-code emitter
//!
//! Each guest instruction becomes a (handler, raw word) pair decoded once at
//! translation time. The segment runs them in a tight loop with the PC kept
//! in a local; `regs.pc` is only written when the segment leaves.

use super::{CodeEmitter, CodeSegment, CodegenError, SegmentExit};
use crate::cpu::decode::{decode, OpClass, Opcode};
use crate::cpu::execute::{handler, Handler};
use crate::cpu::{Cpu, Flow};
use crate::memory::Memory;

#[derive(Clone, Copy)]
struct ThreadedOp {
    handler: Handler,
    inst: u32,
    /// Store-class: check the code-page watch after it
    store: bool,
}

pub struct ThreadedSegment {
    ops: Vec<ThreadedOp>,
}

impl CodeSegment for ThreadedSegment {
    fn len(&self) -> u32 {
        self.ops.len() as u32
    }

    fn host_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.ops.len() * std::mem::size_of::<ThreadedOp>()
    }

    #[inline]
    fn run(&self, cpu: &mut Cpu, mem: &mut Memory, pc: u32) -> SegmentExit {
        let mut pc = pc;
        for op in &self.ops {
            match (op.handler)(cpu, mem, op.inst, pc) {
                Ok(Flow::Next) => {
                    cpu.instruction_count += 1;
                    pc = pc.wrapping_add(4);
                    if op.store && mem.has_code_hits() {
                        cpu.regs.pc = pc;
                        return SegmentExit::Smc;
                    }
                }
                Ok(Flow::Jump(target)) => {
                    cpu.instruction_count += 1;
                    cpu.regs.pc = target;
                    return SegmentExit::Exit;
                }
                Err(e) => {
                    cpu.regs.pc = pc;
                    return SegmentExit::Fault(e);
                }
            }
        }
        SegmentExit::Next
    }
}

pub struct ThreadedEmitter {
    ops: Vec<ThreadedOp>,
}

impl Default for ThreadedEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadedEmitter {
    pub fn new() -> Self {
        ThreadedEmitter { ops: Vec::with_capacity(32) }
    }
}

impl CodeEmitter for ThreadedEmitter {
    fn name(&self) -> &'static str {
        "threaded"
    }

    fn supports(&self, op: Opcode, _inst: u32) -> bool {
        matches!(op.class(), OpClass::Integer | OpClass::Branch | OpClass::LoadStore)
    }

    fn emit(&mut self, _pc: u32, inst: u32) -> Result<(), CodegenError> {
        match decode(inst) {
            Some(op) if self.supports(op, inst) => {
                self.ops.push(ThreadedOp { handler: handler(op), inst, store: op.is_store() });
                Ok(())
            }
            _ => Err(CodegenError::Unsupported(inst)),
        }
    }

    fn finish(&mut self) -> Result<Option<Box<dyn CodeSegment>>, CodegenError> {
        if self.ops.is_empty() {
            return Ok(None);
        }
        let ops = std::mem::take(&mut self.ops);
        Ok(Some(Box::new(ThreadedSegment { ops })))
    }
}
