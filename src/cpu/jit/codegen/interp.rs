//! Interpreter segment
//!
//! Fallback for instructions no emitter takes: executes the single
//! instruction through the interpreter. Always available.

use super::{CodeSegment, SegmentExit};
use crate::cpu::{Cpu, Flow};
use crate::memory::Memory;

pub struct InterpSegment {
    inst: u32,
}

impl InterpSegment {
    pub fn new(inst: u32) -> Self {
        InterpSegment { inst }
    }
}

impl CodeSegment for InterpSegment {
    fn len(&self) -> u32 {
        1
    }

    fn host_size(&self) -> usize {
        std::mem::size_of::<Self>()
    }

    fn run(&self, cpu: &mut Cpu, mem: &mut Memory, pc: u32) -> SegmentExit {
        match cpu.execute(mem, self.inst, pc) {
            Ok(flow) => {
                cpu.instruction_count += 1;
                if mem.has_code_hits() {
                    cpu.regs.pc = match flow {
                        Flow::Next => pc.wrapping_add(4),
                        Flow::Jump(target) => target,
                    };
                    return SegmentExit::Smc;
                }
                match flow {
                    Flow::Next => SegmentExit::Next,
                    Flow::Jump(target) => {
                        cpu.regs.pc = target;
                        SegmentExit::Exit
                    }
                }
            }
            Err(e) => {
                cpu.regs.pc = pc;
                SegmentExit::Fault(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::asm;
    use crate::cpu::Exception;

    #[test]
    fn test_interp_segment_runs_system_op() {
        let mut cpu = Cpu::new();
        let mut mem = Memory::new(1);
        cpu.regs.gpr[3] = 0x1234;
        let seg = InterpSegment::new(asm::mtspr(272, 3));
        assert_eq!(seg.run(&mut cpu, &mut mem, 0x100), SegmentExit::Next);
        assert_eq!(cpu.regs.sprg[0], 0x1234);
        assert_eq!(cpu.instruction_count, 1);
    }

    #[test]
    fn test_interp_segment_reports_fault_pc() {
        let mut cpu = Cpu::new();
        let mut mem = Memory::new(1);
        let seg = InterpSegment::new(asm::sc());
        assert_eq!(seg.run(&mut cpu, &mut mem, 0x200), SegmentExit::Fault(Exception::SystemCall));
        assert_eq!(cpu.regs.pc, 0x200);
    }
}
