//! Instruction decoder
//!
//! Decodes 32-bit PowerPC instructions into an `Opcode`. Operand fields
//! are pulled out of the raw word by the accessors below when a handler
//! runs, so a decoded instruction is just `(Opcode, u32)`.

// Field accessors

#[inline(always)]
pub fn primary(inst: u32) -> u32 {
    inst >> 26
}

/// rD / rS / frD / BO
#[inline(always)]
pub fn rd(inst: u32) -> usize {
    ((inst >> 21) & 0x1F) as usize
}

/// rA / BI
#[inline(always)]
pub fn ra(inst: u32) -> usize {
    ((inst >> 16) & 0x1F) as usize
}

/// rB / SH
#[inline(always)]
pub fn rb(inst: u32) -> usize {
    ((inst >> 11) & 0x1F) as usize
}

/// frC of A-form FP instructions / MB
#[inline(always)]
pub fn rc_field(inst: u32) -> usize {
    ((inst >> 6) & 0x1F) as usize
}

#[inline(always)]
pub fn me(inst: u32) -> u32 {
    (inst >> 1) & 0x1F
}

#[inline(always)]
pub fn mb(inst: u32) -> u32 {
    (inst >> 6) & 0x1F
}

#[inline(always)]
pub fn sh(inst: u32) -> u32 {
    (inst >> 11) & 0x1F
}

/// Record bit
#[inline(always)]
pub fn rc(inst: u32) -> bool {
    inst & 1 != 0
}

/// Overflow-enable bit of XO-form arithmetic
#[inline(always)]
pub fn oe(inst: u32) -> bool {
    inst & 0x400 != 0
}

#[inline(always)]
pub fn simm(inst: u32) -> u32 {
    inst as u16 as i16 as i32 as u32
}

#[inline(always)]
pub fn uimm(inst: u32) -> u32 {
    inst & 0xFFFF
}

#[inline(always)]
pub fn xo10(inst: u32) -> u32 {
    (inst >> 1) & 0x3FF
}

#[inline(always)]
pub fn xo9(inst: u32) -> u32 {
    (inst >> 1) & 0x1FF
}

#[inline(always)]
pub fn xo5(inst: u32) -> u32 {
    (inst >> 1) & 0x1F
}

#[inline(always)]
pub fn crfd(inst: u32) -> usize {
    ((inst >> 23) & 7) as usize
}

#[inline(always)]
pub fn crfs(inst: u32) -> usize {
    ((inst >> 18) & 7) as usize
}

#[inline(always)]
pub fn crm(inst: u32) -> u32 {
    (inst >> 12) & 0xFF
}

/// SPR number with its two halves swapped back
#[inline(always)]
pub fn spr(inst: u32) -> u32 {
    ((inst >> 16) & 0x1F) | (((inst >> 11) & 0x1F) << 5)
}

/// Sign-extended branch displacement of `bc`
#[inline(always)]
pub fn bd(inst: u32) -> u32 {
    (inst & 0xFFFC) as u16 as i16 as i32 as u32
}

/// Sign-extended branch displacement of `b`
#[inline(always)]
pub fn li(inst: u32) -> u32 {
    (((inst & 0x03FF_FFFC) << 6) as i32 >> 6) as u32
}

#[inline(always)]
pub fn aa(inst: u32) -> bool {
    inst & 2 != 0
}

#[inline(always)]
pub fn lk(inst: u32) -> bool {
    inst & 1 != 0
}

// Primary opcodes
pub const OP_TWI: u32 = 3;
pub const OP_MULLI: u32 = 7;
pub const OP_SUBFIC: u32 = 8;
pub const OP_CMPLI: u32 = 10;
pub const OP_CMPI: u32 = 11;
pub const OP_ADDIC: u32 = 12;
pub const OP_ADDIC_RC: u32 = 13;
pub const OP_ADDI: u32 = 14;
pub const OP_ADDIS: u32 = 15;
pub const OP_BC: u32 = 16;
pub const OP_SC: u32 = 17;
pub const OP_B: u32 = 18;
pub const OP_XL: u32 = 19;
pub const OP_RLWIMI: u32 = 20;
pub const OP_RLWINM: u32 = 21;
pub const OP_RLWNM: u32 = 23;
pub const OP_ORI: u32 = 24;
pub const OP_ORIS: u32 = 25;
pub const OP_XORI: u32 = 26;
pub const OP_XORIS: u32 = 27;
pub const OP_ANDI_RC: u32 = 28;
pub const OP_ANDIS_RC: u32 = 29;
pub const OP_X: u32 = 31;
pub const OP_LWZ: u32 = 32;
pub const OP_LWZU: u32 = 33;
pub const OP_LBZ: u32 = 34;
pub const OP_LBZU: u32 = 35;
pub const OP_STW: u32 = 36;
pub const OP_STWU: u32 = 37;
pub const OP_STB: u32 = 38;
pub const OP_STBU: u32 = 39;
pub const OP_LHZ: u32 = 40;
pub const OP_LHZU: u32 = 41;
pub const OP_LHA: u32 = 42;
pub const OP_LHAU: u32 = 43;
pub const OP_STH: u32 = 44;
pub const OP_STHU: u32 = 45;
pub const OP_LMW: u32 = 46;
pub const OP_STMW: u32 = 47;
pub const OP_LFS: u32 = 48;
pub const OP_LFD: u32 = 50;
pub const OP_STFS: u32 = 52;
pub const OP_STFD: u32 = 54;
pub const OP_FP_SINGLE: u32 = 59;
pub const OP_FP: u32 = 63;

// Extended opcodes of primary 19
pub const XL_MCRF: u32 = 0;
pub const XL_BCLR: u32 = 16;
pub const XL_CRNOR: u32 = 33;
pub const XL_RFI: u32 = 50;
pub const XL_CRANDC: u32 = 129;
pub const XL_ISYNC: u32 = 150;
pub const XL_CRXOR: u32 = 193;
pub const XL_CRNAND: u32 = 225;
pub const XL_CRAND: u32 = 257;
pub const XL_CREQV: u32 = 289;
pub const XL_CRORC: u32 = 417;
pub const XL_CROR: u32 = 449;
pub const XL_BCCTR: u32 = 528;

// Extended opcodes of primary 31 (10-bit)
pub const X_CMP: u32 = 0;
pub const X_TW: u32 = 4;
pub const X_MFCR: u32 = 19;
pub const X_LWZX: u32 = 23;
pub const X_SLW: u32 = 24;
pub const X_CNTLZW: u32 = 26;
pub const X_AND: u32 = 28;
pub const X_CMPL: u32 = 32;
pub const X_DCBST: u32 = 54;
pub const X_LWZUX: u32 = 55;
pub const X_ANDC: u32 = 60;
pub const X_MFMSR: u32 = 83;
pub const X_DCBF: u32 = 86;
pub const X_LBZX: u32 = 87;
pub const X_LBZUX: u32 = 119;
pub const X_NOR: u32 = 124;
pub const X_MTCRF: u32 = 144;
pub const X_MTMSR: u32 = 146;
pub const X_STWX: u32 = 151;
pub const X_STWUX: u32 = 183;
pub const X_STBX: u32 = 215;
pub const X_STBUX: u32 = 247;
pub const X_LHZX: u32 = 279;
pub const X_EQV: u32 = 284;
pub const X_TLBIE: u32 = 306;
pub const X_LHZUX: u32 = 311;
pub const X_XOR: u32 = 316;
pub const X_MFSPR: u32 = 339;
pub const X_LHAX: u32 = 343;
pub const X_TLBIA: u32 = 370;
pub const X_LHAUX: u32 = 375;
pub const X_STHX: u32 = 407;
pub const X_ORC: u32 = 412;
pub const X_STHUX: u32 = 439;
pub const X_OR: u32 = 444;
pub const X_MTSPR: u32 = 467;
pub const X_NAND: u32 = 476;
pub const X_SRW: u32 = 536;
pub const X_SYNC: u32 = 598;
pub const X_SRAW: u32 = 792;
pub const X_SRAWI: u32 = 824;
pub const X_EIEIO: u32 = 854;
pub const X_EXTSH: u32 = 922;
pub const X_EXTSB: u32 = 954;
pub const X_ICBI: u32 = 982;
pub const X_DCBZ: u32 = 1014;

// XO-form arithmetic of primary 31 (9-bit, OE excluded)
pub const XO_SUBFC: u32 = 8;
pub const XO_ADDC: u32 = 10;
pub const XO_MULHWU: u32 = 11;
pub const XO_SUBF: u32 = 40;
pub const XO_MULHW: u32 = 75;
pub const XO_NEG: u32 = 104;
pub const XO_SUBFE: u32 = 136;
pub const XO_ADDE: u32 = 138;
pub const XO_SUBFZE: u32 = 200;
pub const XO_ADDZE: u32 = 202;
pub const XO_SUBFME: u32 = 232;
pub const XO_ADDME: u32 = 234;
pub const XO_MULLW: u32 = 235;
pub const XO_ADD: u32 = 266;
pub const XO_DIVWU: u32 = 459;
pub const XO_DIVW: u32 = 491;

// FP A-form (5-bit) and X-form (10-bit) extended opcodes
pub const FA_FDIV: u32 = 18;
pub const FA_FSUB: u32 = 20;
pub const FA_FADD: u32 = 21;
pub const FA_FMUL: u32 = 25;
pub const FX_FCMPU: u32 = 0;
pub const FX_FNEG: u32 = 40;
pub const FX_FMR: u32 = 72;
pub const FX_FABS: u32 = 264;

/// Rough grouping used by the code emitters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Integer,
    Branch,
    LoadStore,
    System,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Immediate arithmetic
    Twi, Mulli, Subfic, Cmpli, Cmpi, Addic, AddicRc, Addi, Addis,
    // Branch / system
    Bc, Sc, B, Bclr, Bcctr, Rfi, Isync,
    // CR logical
    Mcrf, Crand, Crandc, Creqv, Crnand, Crnor, Cror, Crorc, Crxor,
    // Rotate / immediate logical
    Rlwimi, Rlwinm, Rlwnm, Ori, Oris, Xori, Xoris, AndiRc, AndisRc,
    // XO arithmetic
    Add, Addc, Adde, Addze, Addme, Subf, Subfc, Subfe, Subfze, Subfme,
    Neg, Mullw, Mulhw, Mulhwu, Divw, Divwu,
    // X-form logical / shift
    And, Andc, Or, Orc, Xor, Nor, Nand, Eqv, Slw, Srw, Sraw, Srawi,
    Cntlzw, Extsb, Extsh, Cmp, Cmpl, Tw,
    // Loads / stores
    Lwz, Lwzu, Lwzx, Lwzux, Lbz, Lbzu, Lbzx, Lbzux, Lhz, Lhzu, Lhzx, Lhzux,
    Lha, Lhau, Lhax, Lhaux, Stw, Stwu, Stwx, Stwux, Stb, Stbu, Stbx, Stbux,
    Sth, Sthu, Sthx, Sthux, Lmw, Stmw,
    // Register moves
    Mfcr, Mtcrf, Mfmsr, Mtmsr, Mfspr, Mtspr,
    // Cache / ATC maintenance
    Tlbie, Tlbia, Icbi, Dcbf, Dcbst, Dcbz, Sync, Eieio,
    // Floating point
    Lfs, Lfd, Stfs, Stfd, Fadd, Fsub, Fmul, Fdiv, Fadds, Fsubs, Fmuls, Fdivs,
    Fmr, Fneg, Fabs, Fcmpu,
}

/// Decode a raw instruction; `None` for anything not implemented
pub fn decode(inst: u32) -> Option<Opcode> {
    use Opcode::*;
    let op = match primary(inst) {
        OP_TWI => Twi,
        OP_MULLI => Mulli,
        OP_SUBFIC => Subfic,
        OP_CMPLI => Cmpli,
        OP_CMPI => Cmpi,
        OP_ADDIC => Addic,
        OP_ADDIC_RC => AddicRc,
        OP_ADDI => Addi,
        OP_ADDIS => Addis,
        OP_BC => Bc,
        OP_SC => Sc,
        OP_B => B,
        OP_XL => return decode_xl(inst),
        OP_RLWIMI => Rlwimi,
        OP_RLWINM => Rlwinm,
        OP_RLWNM => Rlwnm,
        OP_ORI => Ori,
        OP_ORIS => Oris,
        OP_XORI => Xori,
        OP_XORIS => Xoris,
        OP_ANDI_RC => AndiRc,
        OP_ANDIS_RC => AndisRc,
        OP_X => return decode_x(inst),
        OP_LWZ => Lwz,
        OP_LWZU => Lwzu,
        OP_LBZ => Lbz,
        OP_LBZU => Lbzu,
        OP_STW => Stw,
        OP_STWU => Stwu,
        OP_STB => Stb,
        OP_STBU => Stbu,
        OP_LHZ => Lhz,
        OP_LHZU => Lhzu,
        OP_LHA => Lha,
        OP_LHAU => Lhau,
        OP_STH => Sth,
        OP_STHU => Sthu,
        OP_LMW => Lmw,
        OP_STMW => Stmw,
        OP_LFS => Lfs,
        OP_LFD => Lfd,
        OP_STFS => Stfs,
        OP_STFD => Stfd,
        OP_FP_SINGLE => match xo5(inst) {
            FA_FADD => Fadds,
            FA_FSUB => Fsubs,
            FA_FMUL => Fmuls,
            FA_FDIV => Fdivs,
            _ => return None,
        },
        OP_FP => return decode_fp(inst),
        _ => return None,
    };
    Some(op)
}

fn decode_xl(inst: u32) -> Option<Opcode> {
    use Opcode::*;
    Some(match xo10(inst) {
        XL_MCRF => Mcrf,
        XL_BCLR => Bclr,
        XL_CRNOR => Crnor,
        XL_RFI => Rfi,
        XL_CRANDC => Crandc,
        XL_ISYNC => Isync,
        XL_CRXOR => Crxor,
        XL_CRNAND => Crnand,
        XL_CRAND => Crand,
        XL_CREQV => Creqv,
        XL_CRORC => Crorc,
        XL_CROR => Cror,
        XL_BCCTR => Bcctr,
        _ => return None,
    })
}

fn decode_x(inst: u32) -> Option<Opcode> {
    use Opcode::*;
    let arith = match xo9(inst) {
        XO_SUBFC => Some(Subfc),
        XO_ADDC => Some(Addc),
        XO_MULHWU if !oe(inst) => Some(Mulhwu),
        XO_SUBF => Some(Subf),
        XO_MULHW if !oe(inst) => Some(Mulhw),
        XO_NEG => Some(Neg),
        XO_SUBFE => Some(Subfe),
        XO_ADDE => Some(Adde),
        XO_SUBFZE => Some(Subfze),
        XO_ADDZE => Some(Addze),
        XO_SUBFME => Some(Subfme),
        XO_ADDME => Some(Addme),
        XO_MULLW => Some(Mullw),
        XO_ADD => Some(Add),
        XO_DIVWU => Some(Divwu),
        XO_DIVW => Some(Divw),
        _ => None,
    };
    if arith.is_some() {
        return arith;
    }
    Some(match xo10(inst) {
        X_CMP => Cmp,
        X_TW => Tw,
        X_MFCR => Mfcr,
        X_LWZX => Lwzx,
        X_SLW => Slw,
        X_CNTLZW => Cntlzw,
        X_AND => And,
        X_CMPL => Cmpl,
        X_DCBST => Dcbst,
        X_LWZUX => Lwzux,
        X_ANDC => Andc,
        X_MFMSR => Mfmsr,
        X_DCBF => Dcbf,
        X_LBZX => Lbzx,
        X_LBZUX => Lbzux,
        X_NOR => Nor,
        X_MTCRF => Mtcrf,
        X_MTMSR => Mtmsr,
        X_STWX => Stwx,
        X_STWUX => Stwux,
        X_STBX => Stbx,
        X_STBUX => Stbux,
        X_LHZX => Lhzx,
        X_EQV => Eqv,
        X_TLBIE => Tlbie,
        X_LHZUX => Lhzux,
        X_XOR => Xor,
        X_MFSPR => Mfspr,
        X_LHAX => Lhax,
        X_TLBIA => Tlbia,
        X_LHAUX => Lhaux,
        X_STHX => Sthx,
        X_ORC => Orc,
        X_STHUX => Sthux,
        X_OR => Or,
        X_MTSPR => Mtspr,
        X_NAND => Nand,
        X_SRW => Srw,
        X_SYNC => Sync,
        X_SRAW => Sraw,
        X_SRAWI => Srawi,
        X_EIEIO => Eieio,
        X_EXTSH => Extsh,
        X_EXTSB => Extsb,
        X_ICBI => Icbi,
        X_DCBZ => Dcbz,
        _ => return None,
    })
}

fn decode_fp(inst: u32) -> Option<Opcode> {
    use Opcode::*;
    match xo5(inst) {
        FA_FADD => return Some(Fadd),
        FA_FSUB => return Some(Fsub),
        FA_FMUL => return Some(Fmul),
        FA_FDIV => return Some(Fdiv),
        _ => {}
    }
    Some(match xo10(inst) {
        FX_FCMPU => Fcmpu,
        FX_FNEG => Fneg,
        FX_FMR => Fmr,
        FX_FABS => Fabs,
        _ => return None,
    })
}

/// SPRs whose writes change translation, exception routing or the
/// interrupt state; `mtspr` to them ends a block
pub fn is_context_spr(spr: u32) -> bool {
    !matches!(spr, 1 | 8 | 9 | 256 | 272..=275)
}

impl Opcode {
    pub fn class(self) -> OpClass {
        use Opcode::*;
        match self {
            Bc | B | Bclr | Bcctr => OpClass::Branch,
            Sc | Rfi | Isync | Twi | Tw | Mfmsr | Mtmsr | Mfspr | Mtspr | Tlbie | Tlbia | Icbi
            | Dcbf | Dcbst | Sync | Eieio => OpClass::System,
            Lwz | Lwzu | Lwzx | Lwzux | Lbz | Lbzu | Lbzx | Lbzux | Lhz | Lhzu | Lhzx | Lhzux
            | Lha | Lhau | Lhax | Lhaux | Stw | Stwu | Stwx | Stwux | Stb | Stbu | Stbx | Stbux
            | Sth | Sthu | Sthx | Sthux | Lmw | Stmw | Dcbz => OpClass::LoadStore,
            Lfs | Lfd | Stfs | Stfd | Fadd | Fsub | Fmul | Fdiv | Fadds | Fsubs | Fmuls | Fdivs
            | Fmr | Fneg | Fabs | Fcmpu => OpClass::Float,
            _ => OpClass::Integer,
        }
    }

    /// Control transfers and context-synchronizing instructions end a block
    pub fn ends_block(self, inst: u32) -> bool {
        use Opcode::*;
        match self {
            B | Bc | Bclr | Bcctr | Sc | Rfi | Isync | Mtmsr | Tlbie | Tlbia | Icbi => true,
            Mtspr => is_context_spr(spr(inst)),
            _ => false,
        }
    }

    /// Stores may hit a watched code page
    pub fn is_store(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Stw | Stwu | Stwx | Stwux | Stb | Stbu | Stbx | Stbux | Sth | Sthu | Sthx | Sthux | Stmw
                | Stfs | Stfd | Dcbz
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_forms() {
        assert_eq!(decode(0x3860_0001), Some(Opcode::Addi)); // li r3,1
        assert_eq!(decode(0x7C64_2A14), Some(Opcode::Add)); // add r3,r4,r5
        assert_eq!(decode(0x7C64_2E14), Some(Opcode::Add)); // addo r3,r4,r5
        assert_eq!(decode(0x4E80_0020), Some(Opcode::Bclr)); // blr
        assert_eq!(decode(0x7C08_02A6), Some(Opcode::Mfspr)); // mflr r0
        assert_eq!(decode(0xFC20_1090), Some(Opcode::Fmr));
        assert_eq!(decode(0x0000_0000), None);
    }

    #[test]
    fn test_field_helpers() {
        assert_eq!(simm(0x3860_FFFF), 0xFFFF_FFFF);
        assert_eq!(spr(0x7C08_02A6), 8);
        assert_eq!(li(0x4BFF_FFFC), (-4i32) as u32);
        assert_eq!(bd(0x4082_FFF8), (-8i32) as u32);
    }

    #[test]
    fn test_block_terminators() {
        assert!(Opcode::B.ends_block(0x4800_0008));
        assert!(!Opcode::Add.ends_block(0));
        // mtctr does not end a block, mtspr EVPR does
        assert!(!Opcode::Mtspr.ends_block(0x7C69_03A6));
        assert!(Opcode::Mtspr.ends_block(0x7C76_F3A6));
    }
}
