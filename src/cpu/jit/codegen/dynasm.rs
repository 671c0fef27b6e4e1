//! Dynasm-rs native emitter for x86_64
//!
//! Generates x86_64 machine code for the register-only integer subset
//! (no record or overflow forms, no memory access). Compiled code works
//! directly on the `#[repr(C)]` register file passed in RDI.
//! Only available on native builds with the `jit-dynasm` feature.

use crate::cpu::decode::{oe, rc, Opcode};

/// Whether this build carries the native emitter
pub const AVAILABLE: bool = cfg!(all(feature = "jit-dynasm", target_arch = "x86_64"));

/// Instructions the native emitter translates
pub fn native_op(op: Opcode, inst: u32) -> bool {
    use Opcode::*;
    match op {
        Addi | Addis | Ori | Oris | Xori | Xoris => true,
        Add | Subf | Mullw | Neg => !oe(inst) && !rc(inst),
        And | Andc | Or | Xor | Nor | Extsb | Extsh | Rlwinm => !rc(inst),
        _ => false,
    }
}

#[cfg(all(feature = "jit-dynasm", target_arch = "x86_64"))]
mod backend {
    use dynasm::dynasm;
    use dynasmrt::{x64::Assembler, AssemblyOffset, DynasmApi, ExecutableBuffer};
    use std::mem::{self, offset_of};

    use super::super::{CodeEmitter, CodeSegment, CodegenError, SegmentExit};
    use super::native_op;
    use crate::cpu::alu::rotate_mask;
    use crate::cpu::decode::*;
    use crate::cpu::regs::RegisterFile;
    use crate::cpu::Cpu;
    use crate::memory::Memory;

    type NativeFn = unsafe extern "sysv64" fn(*mut RegisterFile);

    /// Compiled native code
    pub struct NativeSegment {
        code: ExecutableBuffer,
        func: NativeFn,
        len: u32,
    }

    impl CodeSegment for NativeSegment {
        fn len(&self) -> u32 {
            self.len
        }

        fn host_size(&self) -> usize {
            self.code.len()
        }

        fn run(&self, cpu: &mut Cpu, _mem: &mut Memory, _pc: u32) -> SegmentExit {
            // SAFETY: the generated code only touches GPR slots of the
            // register file it is handed
            unsafe { (self.func)(&mut cpu.regs) };
            cpu.instruction_count += self.len as u64;
            SegmentExit::Next
        }
    }

    #[inline]
    fn gpr(r: usize) -> i32 {
        (offset_of!(RegisterFile, gpr) + r * 4) as i32
    }

    pub struct NativeEmitter {
        ops: Option<Assembler>,
        len: u32,
    }

    impl NativeEmitter {
        pub fn new() -> Option<Self> {
            Some(NativeEmitter { ops: None, len: 0 })
        }
    }

    impl CodeEmitter for NativeEmitter {
        fn name(&self) -> &'static str {
            "dynasm"
        }

        fn supports(&self, op: Opcode, inst: u32) -> bool {
            native_op(op, inst)
        }

        fn emit(&mut self, _pc: u32, inst: u32) -> Result<(), CodegenError> {
            let op = match decode(inst) {
                Some(op) if native_op(op, inst) => op,
                _ => return Err(CodegenError::Unsupported(inst)),
            };
            if self.ops.is_none() {
                let asm = Assembler::new().map_err(|e| CodegenError::Backend(e.to_string()))?;
                self.ops = Some(asm);
            }
            if let Some(ops) = self.ops.as_mut() {
                emit_instruction(ops, op, inst);
                self.len += 1;
            }
            Ok(())
        }

        fn finish(&mut self) -> Result<Option<Box<dyn CodeSegment>>, CodegenError> {
            let Some(mut ops) = self.ops.take() else {
                return Ok(None);
            };
            let len = std::mem::replace(&mut self.len, 0);
            dynasm!(ops
                ; ret
            );
            let code = ops
                .finalize()
                .map_err(|_| CodegenError::Backend("failed to finalize assembler".into()))?;
            let func: NativeFn = unsafe { mem::transmute(code.ptr(AssemblyOffset(0))) };
            Ok(Some(Box::new(NativeSegment { code, func, len })))
        }
    }

    /// Emit x86_64 code for one guest instruction. RDI holds the register
    /// file; EAX and ECX are scratch.
    fn emit_instruction(ops: &mut Assembler, op: Opcode, inst: u32) {
        use Opcode::*;

        let d = gpr(rd(inst));
        let a = gpr(ra(inst));
        let b = gpr(rb(inst));

        match op {
            Addi | Addis => {
                let imm = (if op == Addi { simm(inst) } else { inst << 16 }) as i32;
                if ra(inst) == 0 {
                    dynasm!(ops
                        ; mov DWORD [rdi + d], imm
                    );
                } else {
                    dynasm!(ops
                        ; mov eax, [rdi + a]
                        ; add eax, imm
                        ; mov [rdi + d], eax
                    );
                }
            }
            // rS is in the rD slot, the result goes to rA
            Ori | Oris | Xori | Xoris => {
                let imm = (match op {
                    Ori | Xori => uimm(inst),
                    _ => uimm(inst) << 16,
                }) as i32;
                dynasm!(ops
                    ; mov eax, [rdi + d]
                );
                if matches!(op, Ori | Oris) {
                    dynasm!(ops
                        ; or eax, imm
                    );
                } else {
                    dynasm!(ops
                        ; xor eax, imm
                    );
                }
                dynasm!(ops
                    ; mov [rdi + a], eax
                );
            }
            Add => {
                dynasm!(ops
                    ; mov eax, [rdi + a]
                    ; add eax, [rdi + b]
                    ; mov [rdi + d], eax
                );
            }
            Subf => {
                dynasm!(ops
                    ; mov eax, [rdi + b]
                    ; sub eax, [rdi + a]
                    ; mov [rdi + d], eax
                );
            }
            Mullw => {
                dynasm!(ops
                    ; mov eax, [rdi + a]
                    ; imul eax, [rdi + b]
                    ; mov [rdi + d], eax
                );
            }
            Neg => {
                dynasm!(ops
                    ; mov eax, [rdi + a]
                    ; neg eax
                    ; mov [rdi + d], eax
                );
            }
            And => {
                dynasm!(ops
                    ; mov eax, [rdi + d]
                    ; and eax, [rdi + b]
                    ; mov [rdi + a], eax
                );
            }
            Andc => {
                dynasm!(ops
                    ; mov ecx, [rdi + b]
                    ; not ecx
                    ; mov eax, [rdi + d]
                    ; and eax, ecx
                    ; mov [rdi + a], eax
                );
            }
            Or => {
                dynasm!(ops
                    ; mov eax, [rdi + d]
                    ; or eax, [rdi + b]
                    ; mov [rdi + a], eax
                );
            }
            Xor => {
                dynasm!(ops
                    ; mov eax, [rdi + d]
                    ; xor eax, [rdi + b]
                    ; mov [rdi + a], eax
                );
            }
            Nor => {
                dynasm!(ops
                    ; mov eax, [rdi + d]
                    ; or eax, [rdi + b]
                    ; not eax
                    ; mov [rdi + a], eax
                );
            }
            Extsb => {
                dynasm!(ops
                    ; movsx eax, BYTE [rdi + d]
                    ; mov [rdi + a], eax
                );
            }
            Extsh => {
                dynasm!(ops
                    ; movsx eax, WORD [rdi + d]
                    ; mov [rdi + a], eax
                );
            }
            Rlwinm => {
                let shift = sh(inst) as i8;
                let mask = rotate_mask(mb(inst), me(inst)) as i32;
                dynasm!(ops
                    ; mov eax, [rdi + d]
                    ; rol eax, shift
                    ; and eax, mask
                    ; mov [rdi + a], eax
                );
            }
            _ => unreachable!("native_op admitted {:?}", op),
        }
    }
}

#[cfg(all(feature = "jit-dynasm", target_arch = "x86_64"))]
pub use backend::*;

// Stub for when dynasm is not enabled
#[cfg(not(all(feature = "jit-dynasm", target_arch = "x86_64")))]
mod backend {
    use super::super::{CodeEmitter, CodeSegment, CodegenError};
    use crate::cpu::decode::Opcode;

    /// Never constructed without the native backend
    pub enum NativeEmitter {}

    impl NativeEmitter {
        pub fn new() -> Option<Self> {
            None
        }
    }

    impl CodeEmitter for NativeEmitter {
        fn name(&self) -> &'static str {
            match *self {}
        }

        fn supports(&self, _op: Opcode, _inst: u32) -> bool {
            match *self {}
        }

        fn emit(&mut self, _pc: u32, _inst: u32) -> Result<(), CodegenError> {
            match *self {}
        }

        fn finish(&mut self) -> Result<Option<Box<dyn CodeSegment>>, CodegenError> {
            match *self {}
        }
    }
}

#[cfg(not(all(feature = "jit-dynasm", target_arch = "x86_64")))]
pub use backend::NativeEmitter;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::asm;
    use crate::cpu::decode::decode;

    fn admits(inst: u32) -> bool {
        decode(inst).is_some_and(|op| native_op(op, inst))
    }

    #[test]
    fn test_native_subset() {
        assert!(admits(asm::add(3, 4, 5)));
        assert!(admits(asm::rlwinm(3, 4, 8, 24, 31)));
        assert!(!admits(asm::add_rc(3, 4, 5)));
        assert!(!admits(asm::addo_rc(3, 4, 5)));
        assert!(!admits(asm::lwz(3, 4, 0)));
        assert!(!admits(asm::b(8)));
    }

    #[cfg(all(feature = "jit-dynasm", target_arch = "x86_64"))]
    #[test]
    fn test_native_segment_matches_interpreter() {
        use super::super::CodeEmitter;
        use crate::cpu::Cpu;
        use crate::memory::Memory;

        let code = [
            asm::li(3, 7),
            asm::addis(4, 3, 1),
            asm::subf(5, 3, 4),
            asm::rlwinm(6, 4, 16, 16, 31),
            asm::nor(7, 3, 3),
            asm::extsb(8, 7),
        ];
        let mut emitter = NativeEmitter::new().unwrap();
        for (i, &inst) in code.iter().enumerate() {
            emitter.emit(0x1000 + 4 * i as u32, inst).unwrap();
        }
        let seg = emitter.finish().unwrap().unwrap();

        let mut native = Cpu::new();
        let mut mem = Memory::new(1);
        seg.run(&mut native, &mut mem, 0x1000);

        let mut interp = Cpu::new();
        for (i, &inst) in code.iter().enumerate() {
            interp.execute(&mut mem, inst, 0x1000 + 4 * i as u32).unwrap();
        }
        assert_eq!(native.regs.gpr, interp.regs.gpr);
    }
}
