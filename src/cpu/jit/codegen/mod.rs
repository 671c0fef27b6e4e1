//! Code emitters for the block translator
//!
//! A block is a list of segments, each produced by one emitter:
//! - threaded: pre-decoded handler threading (default, every target)
//! - interp: a single instruction run through the interpreter
//! - dynasm: x86-64 machine code (native, feature-gated)
//!
//! Emitters are tried in preference order per instruction; a change of
//! emitter closes the open segment.

use thiserror::Error;

use crate::config::Backend;
use crate::cpu::decode::Opcode;
use crate::cpu::{Cpu, Exception};
use crate::memory::Memory;

pub mod dynasm;
pub mod interp;
pub mod threaded;

/// How control left a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentExit {
    /// Ran to its end; the next segment follows
    Next,
    /// Control transfer; `regs.pc` holds the target
    Exit,
    /// A store hit a translated code page; `regs.pc` holds the next
    /// instruction
    Smc,
    /// Raised by the instruction at `regs.pc`
    Fault(Exception),
}

/// A run of translated guest instructions
pub trait CodeSegment {
    /// Guest instructions covered
    fn len(&self) -> u32;

    /// Host bytes accounted against the code cache
    fn host_size(&self) -> usize;

    /// Execute starting at the segment's first instruction, `pc`.
    /// Adds retired instructions to `cpu.instruction_count`.
    fn run(&self, cpu: &mut Cpu, mem: &mut Memory, pc: u32) -> SegmentExit;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("unsupported instruction {0:#010x}")]
    Unsupported(u32),
    #[error("code cache full")]
    CacheFull,
    #[error("backend error: {0}")]
    Backend(String),
}

pub trait CodeEmitter {
    fn name(&self) -> &'static str;

    /// Whether `emit` would take this instruction
    fn supports(&self, op: Opcode, inst: u32) -> bool;

    /// Append one instruction to the open segment
    fn emit(&mut self, pc: u32, inst: u32) -> Result<(), CodegenError>;

    /// Close the open segment; `None` when nothing was emitted
    fn finish(&mut self) -> Result<Option<Box<dyn CodeSegment>>, CodegenError>;
}

/// Emitters for `backend` in preference order. Anything none of them
/// takes becomes an interpreter segment.
pub fn emitters(backend: Backend) -> Vec<Box<dyn CodeEmitter>> {
    let mut list: Vec<Box<dyn CodeEmitter>> = Vec::with_capacity(2);
    if backend == Backend::Native {
        if let Some(native) = dynasm::NativeEmitter::new() {
            list.push(Box::new(native));
        }
    }
    list.push(Box::new(threaded::ThreadedEmitter::new()));
    list
}

/// Whether `backend` can actually be used in this build
pub fn available(backend: Backend) -> bool {
    match backend {
        Backend::Threaded => true,
        Backend::Native => dynasm::AVAILABLE,
    }
}
