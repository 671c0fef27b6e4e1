//! Integer helpers shared by the interpreter and the code emitters

use super::regs::*;

/// `a + b + carry_in`, returning (result, carry out, signed overflow)
#[inline(always)]
pub fn add_with_carry(a: u32, b: u32, carry_in: bool) -> (u32, bool, bool) {
    let sum = a as u64 + b as u64 + carry_in as u64;
    let res = sum as u32;
    let ov = ((a ^ res) & (b ^ res)) >> 31 != 0;
    (res, sum > 0xFFFF_FFFF, ov)
}

/// CR field value for a signed comparison
#[inline(always)]
pub fn compare_signed(a: u32, b: u32, so: bool) -> u32 {
    let (a, b) = (a as i32, b as i32);
    let c = if a < b {
        CR_LT
    } else if a > b {
        CR_GT
    } else {
        CR_EQ
    };
    c | if so { CR_SO } else { 0 }
}

#[inline(always)]
pub fn compare_unsigned(a: u32, b: u32, so: bool) -> u32 {
    let c = if a < b {
        CR_LT
    } else if a > b {
        CR_GT
    } else {
        CR_EQ
    };
    c | if so { CR_SO } else { 0 }
}

/// Record form: CR0 from the result compared against zero
#[inline(always)]
pub fn record(regs: &mut RegisterFile, value: u32) {
    let so = regs.xer_so();
    regs.set_crf(0, compare_signed(value, 0, so));
}

/// Mask with bits `mb..=me` set (big-endian numbering, may wrap)
#[inline(always)]
pub fn rotate_mask(mb: u32, me: u32) -> u32 {
    let begin = u32::MAX >> mb;
    let end = u32::MAX << (31 - me);
    if mb <= me {
        begin & end
    } else {
        begin | end
    }
}

#[inline(always)]
pub fn slw(value: u32, amount: u32) -> u32 {
    let n = amount & 0x3F;
    if n > 31 {
        0
    } else {
        value << n
    }
}

#[inline(always)]
pub fn srw(value: u32, amount: u32) -> u32 {
    let n = amount & 0x3F;
    if n > 31 {
        0
    } else {
        value >> n
    }
}

/// Algebraic right shift, returning (result, CA)
#[inline(always)]
pub fn sraw(value: u32, amount: u32) -> (u32, bool) {
    let n = amount & 0x3F;
    let negative = (value as i32) < 0;
    if n > 31 {
        return (if negative { u32::MAX } else { 0 }, negative);
    }
    let res = ((value as i32) >> n) as u32;
    let lost = n != 0 && value & ((1u32 << n) - 1) != 0;
    (res, negative && lost)
}

/// Signed divide, returning (quotient, overflow). The quotient of an
/// invalid division is architecturally undefined; sign-fill is used.
#[inline(always)]
pub fn divw(a: u32, b: u32) -> (u32, bool) {
    if b == 0 || (a == 0x8000_0000 && b == u32::MAX) {
        (if (a as i32) < 0 { u32::MAX } else { 0 }, true)
    } else {
        (((a as i32) / (b as i32)) as u32, false)
    }
}

#[inline(always)]
pub fn divwu(a: u32, b: u32) -> (u32, bool) {
    if b == 0 {
        (0, true)
    } else {
        (a / b, false)
    }
}

/// Low word of the product and whether it overflowed 32 signed bits
#[inline(always)]
pub fn mullw(a: u32, b: u32) -> (u32, bool) {
    let prod = (a as i32 as i64) * (b as i32 as i64);
    (prod as u32, prod != prod as i32 as i64)
}

#[inline(always)]
pub fn mulhw(a: u32, b: u32) -> u32 {
    (((a as i32 as i64) * (b as i32 as i64)) >> 32) as u32
}

#[inline(always)]
pub fn mulhwu(a: u32, b: u32) -> u32 {
    (((a as u64) * (b as u64)) >> 32) as u32
}

/// Evaluate BO/BI, decrementing CTR when BO asks for it
#[inline(always)]
pub fn branch_taken(regs: &mut RegisterFile, bo: u32, bi: usize, use_ctr: bool) -> bool {
    let ctr_ok = if use_ctr && bo & 0x04 == 0 {
        regs.ctr = regs.ctr.wrapping_sub(1);
        (regs.ctr != 0) != (bo & 0x02 != 0)
    } else {
        true
    };
    let cond_ok = bo & 0x10 != 0 || regs.cr_bit(bi) == (bo & 0x08 != 0);
    ctr_ok && cond_ok
}

/// TO field of tw/twi
#[inline(always)]
pub fn trap_condition(to: u32, a: u32, b: u32) -> bool {
    let (sa, sb) = (a as i32, b as i32);
    (to & 0x10 != 0 && sa < sb)
        || (to & 0x08 != 0 && sa > sb)
        || (to & 0x04 != 0 && a == b)
        || (to & 0x02 != 0 && a < b)
        || (to & 0x01 != 0 && a > b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_carry_and_overflow() {
        assert_eq!(add_with_carry(0xFFFF_FFFF, 1, false), (0, true, false));
        assert_eq!(add_with_carry(0x7FFF_FFFF, 1, false), (0x8000_0000, false, true));
        assert_eq!(add_with_carry(1, 1, true), (3, false, false));
    }

    #[test]
    fn test_rotate_mask() {
        assert_eq!(rotate_mask(0, 31), 0xFFFF_FFFF);
        assert_eq!(rotate_mask(24, 31), 0x0000_00FF);
        assert_eq!(rotate_mask(30, 1), 0xC000_0003);
    }

    #[test]
    fn test_sraw_carry() {
        assert_eq!(sraw(0xFFFF_FFF1, 4), (0xFFFF_FFFF, true));
        assert_eq!(sraw(0xFFFF_FFF0, 4), (0xFFFF_FFFF, false));
        assert_eq!(sraw(0x10, 40), (0, false));
    }

    #[test]
    fn test_divide_edge_cases() {
        assert_eq!(divw(0x8000_0000, u32::MAX), (u32::MAX, true));
        assert_eq!(divw(7, 0), (0, true));
        assert_eq!(divw((-7i32) as u32, 2), ((-3i32) as u32, false));
        assert_eq!(divwu(7, 0), (0, true));
    }

    #[test]
    fn test_bdnz() {
        let mut regs = RegisterFile::new();
        regs.ctr = 2;
        // bdnz: BO = 16
        assert!(branch_taken(&mut regs, 16, 0, true));
        assert!(!branch_taken(&mut regs, 16, 0, true));
        assert_eq!(regs.ctr, 0);
    }
}
