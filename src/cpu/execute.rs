//! Instruction execution
//!
//! One handler per opcode. Handlers take the raw instruction and its
//! address and never read or write `regs.pc`: they report where execution
//! continues through `Flow`. The interpreter retires the PC eagerly; the
//! threaded block executor calls the very same handlers and only
//! materializes the PC at block exits and faults.

use super::alu::{self, add_with_carry};
use super::decode::*;
use super::exception::{Exception, ProgramCause};
use super::mmu::Access;
use super::regs::*;
use super::{Cpu, PVR_VALUE};
use crate::memory::{Memory, Size, PAGE_SHIFT};

/// Where execution continues after an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Next,
    Jump(u32),
}

type Exec = Result<Flow, Exception>;

pub type Handler = fn(&mut Cpu, &mut Memory, u32, u32) -> Exec;

// SPR numbers
pub const SPR_XER: u32 = 1;
pub const SPR_LR: u32 = 8;
pub const SPR_CTR: u32 = 9;
pub const SPR_DSISR: u32 = 18;
pub const SPR_DAR: u32 = 19;
pub const SPR_SRR0: u32 = 26;
pub const SPR_SRR1: u32 = 27;
pub const SPR_VRSAVE: u32 = 256;
pub const SPR_SPRG0: u32 = 272;
pub const SPR_SPRG3: u32 = 275;
pub const SPR_PVR: u32 = 287;
pub const SPR_EVPR: u32 = 982;
// MMU registers
pub const SPR_TC: u32 = 984;
pub const SPR_URP: u32 = 985;
pub const SPR_SRP: u32 = 986;
pub const SPR_ITT0: u32 = 987;
pub const SPR_ITT1: u32 = 988;
pub const SPR_DTT0: u32 = 989;
pub const SPR_DTT1: u32 = 990;
pub const SPR_MMUSR: u32 = 991;
/// Pending interrupt sources; writing acknowledges the bits written
pub const SPR_INTSRC: u32 = 992;
/// Writing an address runs PTEST for a read / write access
pub const SPR_PTESTR: u32 = 993;
pub const SPR_PTESTW: u32 = 994;
pub const SPR_DFC: u32 = 995;

pub fn handler(op: Opcode) -> Handler {
    use Opcode::*;
    match op {
        Twi => twi,
        Mulli => mulli,
        Subfic => subfic,
        Cmpli => cmpli,
        Cmpi => cmpi,
        Addic => addic,
        AddicRc => addic_rc,
        Addi => addi,
        Addis => addis,
        Bc => bc,
        Sc => sc,
        B => b,
        Bclr => bclr,
        Bcctr => bcctr,
        Rfi => rfi,
        Isync | Sync | Eieio | Dcbf | Dcbst => nop,
        Mcrf => mcrf,
        Crand | Crandc | Creqv | Crnand | Crnor | Cror | Crorc | Crxor => cr_logical,
        Rlwimi => rlwimi,
        Rlwinm => rlwinm,
        Rlwnm => rlwnm,
        Ori => ori,
        Oris => oris,
        Xori => xori,
        Xoris => xoris,
        AndiRc => andi_rc,
        AndisRc => andis_rc,
        Add => add,
        Addc => addc,
        Adde => adde,
        Addze => addze,
        Addme => addme,
        Subf => subf,
        Subfc => subfc,
        Subfe => subfe,
        Subfze => subfze,
        Subfme => subfme,
        Neg => neg,
        Mullw => mullw,
        Mulhw => mulhw,
        Mulhwu => mulhwu,
        Divw => divw,
        Divwu => divwu,
        And => and,
        Andc => andc,
        Or => or,
        Orc => orc,
        Xor => xor,
        Nor => nor,
        Nand => nand,
        Eqv => eqv,
        Slw => slw,
        Srw => srw,
        Sraw => sraw,
        Srawi => srawi,
        Cntlzw => cntlzw,
        Extsb => extsb,
        Extsh => extsh,
        Cmp => cmp,
        Cmpl => cmpl,
        Tw => tw,
        Lwz => lwz,
        Lwzu => lwzu,
        Lwzx => lwzx,
        Lwzux => lwzux,
        Lbz => lbz,
        Lbzu => lbzu,
        Lbzx => lbzx,
        Lbzux => lbzux,
        Lhz => lhz,
        Lhzu => lhzu,
        Lhzx => lhzx,
        Lhzux => lhzux,
        Lha => lha,
        Lhau => lhau,
        Lhax => lhax,
        Lhaux => lhaux,
        Stw => stw,
        Stwu => stwu,
        Stwx => stwx,
        Stwux => stwux,
        Stb => stb,
        Stbu => stbu,
        Stbx => stbx,
        Stbux => stbux,
        Sth => sth,
        Sthu => sthu,
        Sthx => sthx,
        Sthux => sthux,
        Lmw => lmw,
        Stmw => stmw,
        Mfcr => mfcr,
        Mtcrf => mtcrf,
        Mfmsr => mfmsr,
        Mtmsr => mtmsr,
        Mfspr => mfspr,
        Mtspr => mtspr,
        Tlbie => tlbie,
        Tlbia => tlbia,
        Icbi => icbi,
        Dcbz => dcbz,
        Lfs => lfs,
        Lfd => lfd,
        Stfs => stfs,
        Stfd => stfd,
        Fadd | Fsub | Fmul | Fdiv | Fadds | Fsubs | Fmuls | Fdivs => fp_arith,
        Fmr => fmr,
        Fneg => fneg,
        Fabs => fabs,
        Fcmpu => fcmpu,
    }
}

#[inline(always)]
fn require_supervisor(regs: &RegisterFile) -> Result<(), Exception> {
    if regs.is_supervisor() {
        Ok(())
    } else {
        Err(Exception::Program(ProgramCause::Privileged))
    }
}

fn nop(_: &mut Cpu, _: &mut Memory, _: u32, _: u32) -> Exec {
    Ok(Flow::Next)
}

// Immediate arithmetic

fn addi(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    r.write_gpr(rd(inst), r.base_or_zero(ra(inst)).wrapping_add(simm(inst)));
    Ok(Flow::Next)
}

fn addis(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    r.write_gpr(rd(inst), r.base_or_zero(ra(inst)).wrapping_add(inst << 16));
    Ok(Flow::Next)
}

fn addic(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (res, ca, _) = add_with_carry(r.read_gpr(ra(inst)), simm(inst), false);
    r.set_xer_ca(ca);
    r.write_gpr(rd(inst), res);
    Ok(Flow::Next)
}

fn addic_rc(cpu: &mut Cpu, mem: &mut Memory, inst: u32, pc: u32) -> Exec {
    addic(cpu, mem, inst, pc)?;
    let res = cpu.regs.read_gpr(rd(inst));
    alu::record(&mut cpu.regs, res);
    Ok(Flow::Next)
}

fn subfic(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (res, ca, _) = add_with_carry(!r.read_gpr(ra(inst)), simm(inst), true);
    r.set_xer_ca(ca);
    r.write_gpr(rd(inst), res);
    Ok(Flow::Next)
}

fn mulli(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (res, _) = alu::mullw(r.read_gpr(ra(inst)), simm(inst));
    r.write_gpr(rd(inst), res);
    Ok(Flow::Next)
}

// Compare

fn cmpi(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let c = alu::compare_signed(r.read_gpr(ra(inst)), simm(inst), r.xer_so());
    r.set_crf(crfd(inst), c);
    Ok(Flow::Next)
}

fn cmpli(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let c = alu::compare_unsigned(r.read_gpr(ra(inst)), uimm(inst), r.xer_so());
    r.set_crf(crfd(inst), c);
    Ok(Flow::Next)
}

fn cmp(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let c = alu::compare_signed(r.read_gpr(ra(inst)), r.read_gpr(rb(inst)), r.xer_so());
    r.set_crf(crfd(inst), c);
    Ok(Flow::Next)
}

fn cmpl(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let c = alu::compare_unsigned(r.read_gpr(ra(inst)), r.read_gpr(rb(inst)), r.xer_so());
    r.set_crf(crfd(inst), c);
    Ok(Flow::Next)
}

fn twi(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    if alu::trap_condition(rd(inst) as u32, cpu.regs.read_gpr(ra(inst)), simm(inst)) {
        return Err(Exception::Program(ProgramCause::Trap));
    }
    Ok(Flow::Next)
}

fn tw(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &cpu.regs;
    if alu::trap_condition(rd(inst) as u32, r.read_gpr(ra(inst)), r.read_gpr(rb(inst))) {
        return Err(Exception::Program(ProgramCause::Trap));
    }
    Ok(Flow::Next)
}

// Branches

fn b(cpu: &mut Cpu, _: &mut Memory, inst: u32, pc: u32) -> Exec {
    let target = if aa(inst) { li(inst) } else { pc.wrapping_add(li(inst)) };
    if lk(inst) {
        cpu.regs.lr = pc.wrapping_add(4);
    }
    Ok(Flow::Jump(target))
}

fn bc(cpu: &mut Cpu, _: &mut Memory, inst: u32, pc: u32) -> Exec {
    let taken = alu::branch_taken(&mut cpu.regs, rd(inst) as u32, ra(inst), true);
    if lk(inst) {
        cpu.regs.lr = pc.wrapping_add(4);
    }
    if taken {
        let target = if aa(inst) { bd(inst) } else { pc.wrapping_add(bd(inst)) };
        Ok(Flow::Jump(target))
    } else {
        Ok(Flow::Next)
    }
}

fn bclr(cpu: &mut Cpu, _: &mut Memory, inst: u32, pc: u32) -> Exec {
    let target = cpu.regs.lr & !3;
    let taken = alu::branch_taken(&mut cpu.regs, rd(inst) as u32, ra(inst), true);
    if lk(inst) {
        cpu.regs.lr = pc.wrapping_add(4);
    }
    Ok(if taken { Flow::Jump(target) } else { Flow::Next })
}

fn bcctr(cpu: &mut Cpu, _: &mut Memory, inst: u32, pc: u32) -> Exec {
    let target = cpu.regs.ctr & !3;
    let taken = alu::branch_taken(&mut cpu.regs, rd(inst) as u32, ra(inst), false);
    if lk(inst) {
        cpu.regs.lr = pc.wrapping_add(4);
    }
    Ok(if taken { Flow::Jump(target) } else { Flow::Next })
}

fn sc(_: &mut Cpu, _: &mut Memory, _: u32, _: u32) -> Exec {
    Err(Exception::SystemCall)
}

fn rfi(cpu: &mut Cpu, _: &mut Memory, _: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    require_supervisor(r)?;
    r.msr = r.srr1 & MSR_WRITABLE;
    Ok(Flow::Jump(r.srr0 & !3))
}

// CR logical

fn mcrf(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let v = r.crf(crfs(inst));
    r.set_crf(crfd(inst), v);
    Ok(Flow::Next)
}

fn cr_logical(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let a = r.cr_bit(ra(inst));
    let b = r.cr_bit(rb(inst));
    let v = match xo10(inst) {
        XL_CRAND => a & b,
        XL_CRANDC => a & !b,
        XL_CREQV => a == b,
        XL_CRNAND => !(a & b),
        XL_CRNOR => !(a | b),
        XL_CROR => a | b,
        XL_CRORC => a | !b,
        _ => a ^ b,
    };
    r.set_cr_bit(rd(inst), v);
    Ok(Flow::Next)
}

// Rotate and immediate logical

fn rlwinm(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let res = r.read_gpr(rd(inst)).rotate_left(sh(inst)) & alu::rotate_mask(mb(inst), me(inst));
    logical_result(r, inst, res)
}

fn rlwnm(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let n = r.read_gpr(rb(inst)) & 31;
    let res = r.read_gpr(rd(inst)).rotate_left(n) & alu::rotate_mask(mb(inst), me(inst));
    logical_result(r, inst, res)
}

fn rlwimi(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let m = alu::rotate_mask(mb(inst), me(inst));
    let rot = r.read_gpr(rd(inst)).rotate_left(sh(inst));
    let res = (rot & m) | (r.read_gpr(ra(inst)) & !m);
    logical_result(r, inst, res)
}

fn ori(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    r.write_gpr(ra(inst), r.read_gpr(rd(inst)) | uimm(inst));
    Ok(Flow::Next)
}

fn oris(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    r.write_gpr(ra(inst), r.read_gpr(rd(inst)) | (uimm(inst) << 16));
    Ok(Flow::Next)
}

fn xori(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    r.write_gpr(ra(inst), r.read_gpr(rd(inst)) ^ uimm(inst));
    Ok(Flow::Next)
}

fn xoris(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    r.write_gpr(ra(inst), r.read_gpr(rd(inst)) ^ (uimm(inst) << 16));
    Ok(Flow::Next)
}

fn andi_rc(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let res = r.read_gpr(rd(inst)) & uimm(inst);
    r.write_gpr(ra(inst), res);
    alu::record(r, res);
    Ok(Flow::Next)
}

fn andis_rc(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let res = r.read_gpr(rd(inst)) & (uimm(inst) << 16);
    r.write_gpr(ra(inst), res);
    alu::record(r, res);
    Ok(Flow::Next)
}

// XO-form arithmetic

#[inline(always)]
fn arith_result(r: &mut RegisterFile, inst: u32, res: u32, ov: bool) -> Exec {
    r.write_gpr(rd(inst), res);
    if oe(inst) {
        r.set_xer_ov(ov);
    }
    if rc(inst) {
        alu::record(r, res);
    }
    Ok(Flow::Next)
}

/// `a + b + carry_in` with CA written back
#[inline(always)]
fn arith_carry(r: &mut RegisterFile, inst: u32, a: u32, b: u32, carry_in: bool) -> Exec {
    let (res, ca, ov) = add_with_carry(a, b, carry_in);
    r.set_xer_ca(ca);
    arith_result(r, inst, res, ov)
}

fn add(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (res, _, ov) = add_with_carry(r.read_gpr(ra(inst)), r.read_gpr(rb(inst)), false);
    arith_result(r, inst, res, ov)
}

fn addc(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (a, b) = (r.read_gpr(ra(inst)), r.read_gpr(rb(inst)));
    arith_carry(r, inst, a, b, false)
}

fn adde(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (a, b, ca) = (r.read_gpr(ra(inst)), r.read_gpr(rb(inst)), r.xer_ca());
    arith_carry(r, inst, a, b, ca)
}

fn addze(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (a, ca) = (r.read_gpr(ra(inst)), r.xer_ca());
    arith_carry(r, inst, a, 0, ca)
}

fn addme(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (a, ca) = (r.read_gpr(ra(inst)), r.xer_ca());
    arith_carry(r, inst, a, u32::MAX, ca)
}

fn subf(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (res, _, ov) = add_with_carry(!r.read_gpr(ra(inst)), r.read_gpr(rb(inst)), true);
    arith_result(r, inst, res, ov)
}

fn subfc(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (a, b) = (r.read_gpr(ra(inst)), r.read_gpr(rb(inst)));
    arith_carry(r, inst, !a, b, true)
}

fn subfe(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (a, b, ca) = (r.read_gpr(ra(inst)), r.read_gpr(rb(inst)), r.xer_ca());
    arith_carry(r, inst, !a, b, ca)
}

fn subfze(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (a, ca) = (r.read_gpr(ra(inst)), r.xer_ca());
    arith_carry(r, inst, !a, 0, ca)
}

fn subfme(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (a, ca) = (r.read_gpr(ra(inst)), r.xer_ca());
    arith_carry(r, inst, !a, u32::MAX, ca)
}

fn neg(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (res, _, ov) = add_with_carry(!r.read_gpr(ra(inst)), 0, true);
    arith_result(r, inst, res, ov)
}

fn mullw(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (res, ov) = alu::mullw(r.read_gpr(ra(inst)), r.read_gpr(rb(inst)));
    arith_result(r, inst, res, ov)
}

fn mulhw(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let res = alu::mulhw(r.read_gpr(ra(inst)), r.read_gpr(rb(inst)));
    arith_result(r, inst, res, false)
}

fn mulhwu(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let res = alu::mulhwu(r.read_gpr(ra(inst)), r.read_gpr(rb(inst)));
    arith_result(r, inst, res, false)
}

fn divw(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (res, ov) = alu::divw(r.read_gpr(ra(inst)), r.read_gpr(rb(inst)));
    arith_result(r, inst, res, ov)
}

fn divwu(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let (res, ov) = alu::divwu(r.read_gpr(ra(inst)), r.read_gpr(rb(inst)));
    arith_result(r, inst, res, ov)
}

// X-form logical and shifts (result in rA)

#[inline(always)]
fn logical_result(r: &mut RegisterFile, inst: u32, res: u32) -> Exec {
    r.write_gpr(ra(inst), res);
    if rc(inst) {
        alu::record(r, res);
    }
    Ok(Flow::Next)
}

#[inline(always)]
fn operands(r: &RegisterFile, inst: u32) -> (u32, u32) {
    (r.read_gpr(rd(inst)), r.read_gpr(rb(inst)))
}

fn and(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let (s, b) = operands(&cpu.regs, inst);
    logical_result(&mut cpu.regs, inst, s & b)
}

fn andc(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let (s, b) = operands(&cpu.regs, inst);
    logical_result(&mut cpu.regs, inst, s & !b)
}

fn or(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let (s, b) = operands(&cpu.regs, inst);
    logical_result(&mut cpu.regs, inst, s | b)
}

fn orc(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let (s, b) = operands(&cpu.regs, inst);
    logical_result(&mut cpu.regs, inst, s | !b)
}

fn xor(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let (s, b) = operands(&cpu.regs, inst);
    logical_result(&mut cpu.regs, inst, s ^ b)
}

fn nor(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let (s, b) = operands(&cpu.regs, inst);
    logical_result(&mut cpu.regs, inst, !(s | b))
}

fn nand(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let (s, b) = operands(&cpu.regs, inst);
    logical_result(&mut cpu.regs, inst, !(s & b))
}

fn eqv(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let (s, b) = operands(&cpu.regs, inst);
    logical_result(&mut cpu.regs, inst, !(s ^ b))
}

fn slw(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let (s, b) = operands(&cpu.regs, inst);
    logical_result(&mut cpu.regs, inst, alu::slw(s, b))
}

fn srw(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let (s, b) = operands(&cpu.regs, inst);
    logical_result(&mut cpu.regs, inst, alu::srw(s, b))
}

fn sraw(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let (s, b) = operands(&cpu.regs, inst);
    let (res, ca) = alu::sraw(s, b);
    cpu.regs.set_xer_ca(ca);
    logical_result(&mut cpu.regs, inst, res)
}

fn srawi(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let s = cpu.regs.read_gpr(rd(inst));
    let (res, ca) = alu::sraw(s, sh(inst));
    cpu.regs.set_xer_ca(ca);
    logical_result(&mut cpu.regs, inst, res)
}

fn cntlzw(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let s = cpu.regs.read_gpr(rd(inst));
    logical_result(&mut cpu.regs, inst, s.leading_zeros())
}

fn extsb(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let s = cpu.regs.read_gpr(rd(inst));
    logical_result(&mut cpu.regs, inst, s as u8 as i8 as i32 as u32)
}

fn extsh(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let s = cpu.regs.read_gpr(rd(inst));
    logical_result(&mut cpu.regs, inst, s as u16 as i16 as i32 as u32)
}

// Loads and stores

#[inline(always)]
fn ea_d(r: &RegisterFile, inst: u32) -> u32 {
    r.base_or_zero(ra(inst)).wrapping_add(simm(inst))
}

#[inline(always)]
fn ea_x(r: &RegisterFile, inst: u32) -> u32 {
    r.base_or_zero(ra(inst)).wrapping_add(r.read_gpr(rb(inst)))
}

#[inline(always)]
fn load(cpu: &mut Cpu, mem: &mut Memory, inst: u32, ea: u32, size: Size, algebraic: bool, update: bool) -> Exec {
    let mut value = cpu.load(mem, ea, size)?;
    if algebraic {
        value = value as u16 as i16 as i32 as u32;
    }
    cpu.regs.write_gpr(rd(inst), value);
    if update {
        cpu.regs.write_gpr(ra(inst), ea);
    }
    Ok(Flow::Next)
}

#[inline(always)]
fn store(cpu: &mut Cpu, mem: &mut Memory, inst: u32, ea: u32, size: Size, update: bool) -> Exec {
    let value = cpu.regs.read_gpr(rd(inst));
    cpu.store(mem, ea, size, value)?;
    if update {
        cpu.regs.write_gpr(ra(inst), ea);
    }
    Ok(Flow::Next)
}

fn lwz(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    load(c, m, i, ea, Size::Word, false, false)
}

fn lwzu(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    load(c, m, i, ea, Size::Word, false, true)
}

fn lwzx(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    load(c, m, i, ea, Size::Word, false, false)
}

fn lwzux(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    load(c, m, i, ea, Size::Word, false, true)
}

fn lbz(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    load(c, m, i, ea, Size::Byte, false, false)
}

fn lbzu(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    load(c, m, i, ea, Size::Byte, false, true)
}

fn lbzx(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    load(c, m, i, ea, Size::Byte, false, false)
}

fn lbzux(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    load(c, m, i, ea, Size::Byte, false, true)
}

fn lhz(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    load(c, m, i, ea, Size::Half, false, false)
}

fn lhzu(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    load(c, m, i, ea, Size::Half, false, true)
}

fn lhzx(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    load(c, m, i, ea, Size::Half, false, false)
}

fn lhzux(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    load(c, m, i, ea, Size::Half, false, true)
}

fn lha(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    load(c, m, i, ea, Size::Half, true, false)
}

fn lhau(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    load(c, m, i, ea, Size::Half, true, true)
}

fn lhax(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    load(c, m, i, ea, Size::Half, true, false)
}

fn lhaux(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    load(c, m, i, ea, Size::Half, true, true)
}

fn stw(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    store(c, m, i, ea, Size::Word, false)
}

fn stwu(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    store(c, m, i, ea, Size::Word, true)
}

fn stwx(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    store(c, m, i, ea, Size::Word, false)
}

fn stwux(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    store(c, m, i, ea, Size::Word, true)
}

fn stb(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    store(c, m, i, ea, Size::Byte, false)
}

fn stbu(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    store(c, m, i, ea, Size::Byte, true)
}

fn stbx(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    store(c, m, i, ea, Size::Byte, false)
}

fn stbux(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    store(c, m, i, ea, Size::Byte, true)
}

fn sth(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    store(c, m, i, ea, Size::Half, false)
}

fn sthu(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_d(&c.regs, i);
    store(c, m, i, ea, Size::Half, true)
}

fn sthx(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    store(c, m, i, ea, Size::Half, false)
}

fn sthux(c: &mut Cpu, m: &mut Memory, i: u32, _: u32) -> Exec {
    let ea = ea_x(&c.regs, i);
    store(c, m, i, ea, Size::Half, true)
}

fn lmw(cpu: &mut Cpu, mem: &mut Memory, inst: u32, _: u32) -> Exec {
    let mut ea = ea_d(&cpu.regs, inst);
    for r in rd(inst)..32 {
        let v = cpu.load(mem, ea, Size::Word)?;
        cpu.regs.write_gpr(r, v);
        ea = ea.wrapping_add(4);
    }
    Ok(Flow::Next)
}

fn stmw(cpu: &mut Cpu, mem: &mut Memory, inst: u32, _: u32) -> Exec {
    let mut ea = ea_d(&cpu.regs, inst);
    for r in rd(inst)..32 {
        let v = cpu.regs.read_gpr(r);
        cpu.store(mem, ea, Size::Word, v)?;
        ea = ea.wrapping_add(4);
    }
    Ok(Flow::Next)
}

/// Zero the 32-byte block holding the effective address
fn dcbz(cpu: &mut Cpu, mem: &mut Memory, inst: u32, _: u32) -> Exec {
    let base = ea_x(&cpu.regs, inst) & !31;
    for i in 0..8 {
        cpu.store(mem, base + i * 4, Size::Word, 0)?;
    }
    Ok(Flow::Next)
}

// Register moves

fn mfcr(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let cr = cpu.regs.cr;
    cpu.regs.write_gpr(rd(inst), cr);
    Ok(Flow::Next)
}

fn mtcrf(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    let fields = crm(inst);
    let mut mask = 0u32;
    for i in 0..8 {
        if fields & (0x80 >> i) != 0 {
            mask |= 0xF000_0000 >> (4 * i);
        }
    }
    r.cr = (r.cr & !mask) | (r.read_gpr(rd(inst)) & mask);
    Ok(Flow::Next)
}

fn mfmsr(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    require_supervisor(&cpu.regs)?;
    let msr = cpu.regs.msr;
    cpu.regs.write_gpr(rd(inst), msr);
    Ok(Flow::Next)
}

fn mtmsr(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    require_supervisor(&cpu.regs)?;
    cpu.regs.msr = cpu.regs.read_gpr(rd(inst)) & MSR_WRITABLE;
    Ok(Flow::Next)
}

fn spr_is_user(n: u32) -> bool {
    matches!(n, SPR_XER | SPR_LR | SPR_CTR | SPR_VRSAVE)
}

fn mfspr(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let n = spr(inst);
    if !spr_is_user(n) {
        require_supervisor(&cpu.regs)?;
    }
    let r = &cpu.regs;
    let mmu = cpu.mmu.regs();
    let value = match n {
        SPR_XER => r.xer,
        SPR_LR => r.lr,
        SPR_CTR => r.ctr,
        SPR_DSISR => r.dsisr,
        SPR_DAR => r.dar,
        SPR_SRR0 => r.srr0,
        SPR_SRR1 => r.srr1,
        SPR_VRSAVE => r.vrsave,
        SPR_SPRG0..=SPR_SPRG3 => r.sprg[(n - SPR_SPRG0) as usize],
        SPR_PVR => PVR_VALUE,
        SPR_EVPR => r.evpr,
        SPR_TC => mmu.tc,
        SPR_URP => mmu.urp,
        SPR_SRP => mmu.srp,
        SPR_ITT0 => mmu.itt[0].0,
        SPR_ITT1 => mmu.itt[1].0,
        SPR_DTT0 => mmu.dtt[0].0,
        SPR_DTT1 => mmu.dtt[1].0,
        SPR_MMUSR | SPR_PTESTR | SPR_PTESTW => mmu.mmusr,
        SPR_DFC => mmu.dfc,
        SPR_INTSRC => cpu.interrupt_sources(),
        _ => return Err(Exception::Program(ProgramCause::Illegal)),
    };
    cpu.regs.write_gpr(rd(inst), value);
    Ok(Flow::Next)
}

fn mtspr(cpu: &mut Cpu, mem: &mut Memory, inst: u32, _: u32) -> Exec {
    let n = spr(inst);
    if !spr_is_user(n) {
        require_supervisor(&cpu.regs)?;
    }
    let value = cpu.regs.read_gpr(rd(inst));
    let r = &mut cpu.regs;
    match n {
        SPR_XER => r.xer = value,
        SPR_LR => r.lr = value,
        SPR_CTR => r.ctr = value,
        SPR_DSISR => r.dsisr = value,
        SPR_DAR => r.dar = value,
        SPR_SRR0 => r.srr0 = value,
        SPR_SRR1 => r.srr1 = value,
        SPR_VRSAVE => r.vrsave = value,
        SPR_SPRG0..=SPR_SPRG3 => r.sprg[(n - SPR_SPRG0) as usize] = value,
        SPR_PVR => {}
        SPR_EVPR => r.evpr = value & 0xFFFF_0000,
        SPR_TC => cpu.mmu.set_tc(value),
        SPR_URP => cpu.mmu.set_urp(value),
        SPR_SRP => cpu.mmu.set_srp(value),
        SPR_ITT0 => cpu.mmu.set_itt(0, value),
        SPR_ITT1 => cpu.mmu.set_itt(1, value),
        SPR_DTT0 => cpu.mmu.set_dtt(0, value),
        SPR_DTT1 => cpu.mmu.set_dtt(1, value),
        SPR_MMUSR => cpu.mmu.set_mmusr(value),
        SPR_DFC => cpu.mmu.set_dfc(value),
        SPR_INTSRC => cpu.acknowledge_interrupts(value),
        SPR_PTESTR | SPR_PTESTW => {
            let access = if n == SPR_PTESTW { Access::WRITE } else { Access::READ };
            let privileged = cpu.mmu.regs().dfc & 4 != 0;
            cpu.mmu.ptest(mem, value, privileged, access);
        }
        _ => return Err(Exception::Program(ProgramCause::Illegal)),
    }
    Ok(Flow::Next)
}

// Cache and ATC maintenance

/// Drop the ATC entry for rB in the bank selected by DFC; L flushes
/// global entries too
fn tlbie(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    require_supervisor(&cpu.regs)?;
    let addr = cpu.regs.read_gpr(rb(inst));
    let privileged = cpu.mmu.regs().dfc & 4 != 0;
    cpu.mmu.flush(addr, privileged, (inst >> 21) & 1 != 0);
    Ok(Flow::Next)
}

fn tlbia(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    require_supervisor(&cpu.regs)?;
    cpu.mmu.flush_all((inst >> 21) & 1 != 0);
    Ok(Flow::Next)
}

/// Report the page of the effective address as modified code
fn icbi(cpu: &mut Cpu, mem: &mut Memory, inst: u32, _: u32) -> Exec {
    let ea = ea_x(&cpu.regs, inst);
    let privileged = cpu.regs.is_supervisor();
    let phys = cpu
        .mmu
        .translate(mem, ea, Access::READ, privileged, Size::Byte)
        .map_err(Exception::DataStorage)?;
    mem.note_code_write(phys >> PAGE_SHIFT);
    Ok(Flow::Next)
}

// Floating point

#[inline(always)]
fn fp_available(r: &RegisterFile) -> Result<(), Exception> {
    if r.fp_enabled() {
        Ok(())
    } else {
        Err(Exception::FloatUnavailable)
    }
}

fn fp_record(r: &mut RegisterFile, inst: u32) {
    if rc(inst) {
        let v = r.fpscr >> 28;
        r.set_crf(1, v);
    }
}

fn lfs(cpu: &mut Cpu, mem: &mut Memory, inst: u32, _: u32) -> Exec {
    fp_available(&cpu.regs)?;
    let ea = ea_d(&cpu.regs, inst);
    let v = cpu.load(mem, ea, Size::Word)?;
    cpu.regs.set_fpr_f64(rd(inst), f32::from_bits(v) as f64);
    Ok(Flow::Next)
}

fn lfd(cpu: &mut Cpu, mem: &mut Memory, inst: u32, _: u32) -> Exec {
    fp_available(&cpu.regs)?;
    let ea = ea_d(&cpu.regs, inst);
    let v = cpu.load64(mem, ea)?;
    cpu.regs.fpr[rd(inst)] = v;
    Ok(Flow::Next)
}

fn stfs(cpu: &mut Cpu, mem: &mut Memory, inst: u32, _: u32) -> Exec {
    fp_available(&cpu.regs)?;
    let ea = ea_d(&cpu.regs, inst);
    let v = (cpu.regs.fpr_f64(rd(inst)) as f32).to_bits();
    cpu.store(mem, ea, Size::Word, v)?;
    Ok(Flow::Next)
}

fn stfd(cpu: &mut Cpu, mem: &mut Memory, inst: u32, _: u32) -> Exec {
    fp_available(&cpu.regs)?;
    let ea = ea_d(&cpu.regs, inst);
    let v = cpu.regs.fpr[rd(inst)];
    cpu.store64(mem, ea, v)?;
    Ok(Flow::Next)
}

fn fp_arith(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    fp_available(r)?;
    let a = r.fpr_f64(ra(inst));
    let res = match xo5(inst) {
        FA_FADD => a + r.fpr_f64(rb(inst)),
        FA_FSUB => a - r.fpr_f64(rb(inst)),
        FA_FMUL => a * r.fpr_f64(rc_field(inst)),
        _ => a / r.fpr_f64(rb(inst)),
    };
    let res = if primary(inst) == OP_FP_SINGLE { res as f32 as f64 } else { res };
    r.set_fpr_f64(rd(inst), res);
    fp_record(r, inst);
    Ok(Flow::Next)
}

fn fmr(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    fp_available(r)?;
    r.fpr[rd(inst)] = r.fpr[rb(inst)];
    fp_record(r, inst);
    Ok(Flow::Next)
}

fn fneg(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    fp_available(r)?;
    r.fpr[rd(inst)] = r.fpr[rb(inst)] ^ (1 << 63);
    fp_record(r, inst);
    Ok(Flow::Next)
}

fn fabs(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    fp_available(r)?;
    r.fpr[rd(inst)] = r.fpr[rb(inst)] & !(1 << 63);
    fp_record(r, inst);
    Ok(Flow::Next)
}

fn fcmpu(cpu: &mut Cpu, _: &mut Memory, inst: u32, _: u32) -> Exec {
    let r = &mut cpu.regs;
    fp_available(r)?;
    let (a, b) = (r.fpr_f64(ra(inst)), r.fpr_f64(rb(inst)));
    let c = if a.is_nan() || b.is_nan() {
        CR_SO
    } else if a < b {
        CR_LT
    } else if a > b {
        CR_GT
    } else {
        CR_EQ
    };
    r.fpscr = (r.fpscr & !0xF000) | (c << 12);
    r.set_crf(crfd(inst), c);
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::asm;
    use crate::cpu::regs::MSR_FP;

    fn run(code: &[u32], setup: impl FnOnce(&mut Cpu)) -> (Cpu, Memory) {
        let mut mem = Memory::new(1);
        mem.load(0x1000, &asm::assemble(code)).unwrap();
        let mut cpu = Cpu::new();
        cpu.regs.pc = 0x1000;
        setup(&mut cpu);
        for _ in 0..code.len() {
            cpu.step(&mut mem).unwrap();
        }
        (cpu, mem)
    }

    #[test]
    fn test_arith_overflow_and_record() {
        let (cpu, _) = run(&[asm::addo_rc(3, 4, 5)], |c| {
            c.regs.gpr[4] = 0x7FFF_FFFF;
            c.regs.gpr[5] = 1;
        });
        assert_eq!(cpu.regs.gpr[3], 0x8000_0000);
        assert!(cpu.regs.xer_ov() && cpu.regs.xer_so());
        assert_eq!(cpu.regs.crf(0), CR_LT | CR_SO);
    }

    #[test]
    fn test_carry_chain() {
        // 64-bit add of r4:r5 + r6:r7
        let (cpu, _) = run(&[asm::addc(9, 5, 7), asm::adde(8, 4, 6)], |c| {
            c.regs.gpr[4] = 0;
            c.regs.gpr[5] = 0xFFFF_FFFF;
            c.regs.gpr[6] = 1;
            c.regs.gpr[7] = 1;
        });
        assert_eq!((cpu.regs.gpr[8], cpu.regs.gpr[9]), (2, 0));
    }

    #[test]
    fn test_rlwinm_extracts_field() {
        // rotl 8 brings the top byte to the bottom
        let (cpu, _) = run(&[asm::rlwinm(3, 4, 8, 24, 31), asm::rlwinm(5, 4, 24, 24, 31)], |c| {
            c.regs.gpr[4] = 0x1234_5678
        });
        assert_eq!(cpu.regs.gpr[3], 0x12);
        assert_eq!(cpu.regs.gpr[5], 0x56);
    }

    #[test]
    fn test_load_store_update() {
        let (cpu, mut mem) = run(&[asm::stwu(3, 1, -8), asm::lhz(5, 1, 2), asm::lha(6, 1, 0)], |c| {
            c.regs.gpr[1] = 0x8000;
            c.regs.gpr[3] = 0x8001_7FFF;
        });
        assert_eq!(cpu.regs.gpr[1], 0x7FF8);
        assert_eq!(mem.read(0x7FF8, Size::Word), Some(0x8001_7FFF));
        assert_eq!(cpu.regs.gpr[5], 0x7FFF);
        assert_eq!(cpu.regs.gpr[6], 0xFFFF_8001);
    }

    #[test]
    fn test_branch_and_link() {
        let (cpu, _) = run(&[asm::bl(0x10)], |_| {});
        assert_eq!(cpu.regs.pc, 0x1010);
        assert_eq!(cpu.regs.lr, 0x1004);
    }

    #[test]
    fn test_cmp_and_conditional_branch() {
        let (cpu, _) = run(&[asm::cmpwi(0, 3, 5), asm::beq(0x20)], |c| c.regs.gpr[3] = 5);
        assert_eq!(cpu.regs.pc, 0x1024);
    }

    #[test]
    fn test_user_mode_mtmsr_is_privileged() {
        let mut mem = Memory::new(1);
        mem.load(0x1000, &asm::assemble(&[asm::mtmsr(3)])).unwrap();
        let mut cpu = Cpu::new();
        cpu.regs.pc = 0x1000;
        cpu.regs.msr |= MSR_PR;
        assert_eq!(cpu.step(&mut mem), Err(Exception::Program(ProgramCause::Privileged)));
    }

    #[test]
    fn test_mtspr_mmu_registers() {
        let (cpu, _) = run(&[asm::mtspr(SPR_URP, 3), asm::mtspr(SPR_DTT0, 4), asm::mfspr(5, SPR_URP)], |c| {
            c.regs.gpr[3] = 0x0001_0000;
            c.regs.gpr[4] = 0x4000_C000;
        });
        assert_eq!(cpu.mmu.regs().urp, 0x0001_0000);
        assert_eq!(cpu.mmu.regs().dtt[0].0, 0x4000_C000);
        assert_eq!(cpu.regs.gpr[5], 0x0001_0000);
    }

    #[test]
    fn test_fp_requires_msr_fp() {
        let mut mem = Memory::new(1);
        mem.load(0x1000, &asm::assemble(&[asm::fadd(1, 2, 3)])).unwrap();
        let mut cpu = Cpu::new();
        cpu.regs.pc = 0x1000;
        assert_eq!(cpu.step(&mut mem), Err(Exception::FloatUnavailable));
    }

    #[test]
    fn test_fp_arith() {
        let (cpu, _) = run(&[asm::fadd(1, 2, 3), asm::fcmpu(1, 1, 2)], |c| {
            c.regs.msr |= MSR_FP;
            c.regs.set_fpr_f64(2, 1.5);
            c.regs.set_fpr_f64(3, 2.25);
        });
        assert_eq!(cpu.regs.fpr_f64(1), 3.75);
        assert_eq!(cpu.regs.crf(1), CR_GT);
    }

    #[test]
    fn test_stmw_lmw() {
        let (cpu, _) = run(&[asm::stmw(29, 1, 0), asm::li(29, 0), asm::li(30, 0), asm::lmw(29, 1, 0)], |c| {
            c.regs.gpr[1] = 0x4000;
            c.regs.gpr[29] = 1;
            c.regs.gpr[30] = 2;
            c.regs.gpr[31] = 3;
        });
        assert_eq!(&cpu.regs.gpr[29..], &[1, 2, 3]);
    }
}
