//! Condition-flag arithmetic shared by the execute routines.

use crate::state::Registers;

/// `op2 + op1` with all four flags.
pub(crate) fn add(regs: &mut Registers, op1: u16, op2: u16) -> u16 {
    let (op1, op2) = (u32::from(op1), u32::from(op2));
    let op3 = op2 + op1;
    set_arith(regs, op2, op3, !(op1 ^ op2));
    truncate(op3)
}

/// `op2 - op1` with all four flags. Carry means "no borrow".
pub(crate) fn sub(regs: &mut Registers, op1: u16, op2: u16) -> u16 {
    let (op1, op2) = (u32::from(op1), u32::from(op2));
    let op3 = op2 + (0xFFFF ^ op1) + 1;
    set_arith(regs, op2, op3, op1 ^ op2);
    truncate(op3)
}

/// Sets sign and zero from a 16-bit result and returns it.
pub(crate) fn sign_zero(regs: &mut Registers, res: u16) -> u16 {
    regs.s = res & 0x8000 != 0;
    regs.z = res == 0;
    res
}

fn set_arith(regs: &mut Registers, op2: u32, op3: u32, ovf_mask: u32) {
    regs.s = op3 & 0x8000 != 0;
    regs.c = op3 & 0x1_0000 != 0;
    regs.o = (op2 ^ op3) & ovf_mask & 0x8000 != 0;
    regs.z = truncate(op3) == 0;
}

#[allow(clippy::cast_possible_truncation)]
const fn truncate(value: u32) -> u16 {
    value as u16
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{add, sign_zero, sub};
    use crate::state::{Registers, StatusFlags};

    #[rstest]
    #[case(0x0001, 0x0001, 0x0002, StatusFlags::empty())]
    #[case(0xFFFF, 0x0001, 0x0000, StatusFlags::Z.union(StatusFlags::C))]
    #[case(0x7FFF, 0x0001, 0x8000, StatusFlags::S.union(StatusFlags::O))]
    #[case(0x8000, 0x8000, 0x0000, StatusFlags::Z.union(StatusFlags::C).union(StatusFlags::O))]
    fn add_sets_all_flags(
        #[case] a: u16,
        #[case] b: u16,
        #[case] expected: u16,
        #[case] flags: StatusFlags,
    ) {
        let mut regs = Registers::default();
        assert_eq!(add(&mut regs, a, b), expected);
        assert_eq!(regs.flags(), flags);
    }

    #[rstest]
    // 5 - 3: no borrow, so carry is set.
    #[case(0x0003, 0x0005, 0x0002, StatusFlags::C)]
    #[case(0x0005, 0x0005, 0x0000, StatusFlags::Z.union(StatusFlags::C))]
    #[case(0x0005, 0x0003, 0xFFFE, StatusFlags::S)]
    #[case(0x0001, 0x8000, 0x7FFF, StatusFlags::C.union(StatusFlags::O))]
    fn sub_computes_second_minus_first(
        #[case] op1: u16,
        #[case] op2: u16,
        #[case] expected: u16,
        #[case] flags: StatusFlags,
    ) {
        let mut regs = Registers::default();
        assert_eq!(sub(&mut regs, op1, op2), expected);
        assert_eq!(regs.flags(), flags);
    }

    #[test]
    fn negating_zero_sets_carry() {
        let mut regs = Registers::default();
        assert_eq!(sub(&mut regs, 0, 0), 0);
        assert_eq!(regs.flags(), StatusFlags::Z | StatusFlags::C);
    }

    #[test]
    fn sign_zero_leaves_carry_and_overflow() {
        let mut regs = Registers::default();
        regs.set_flags(StatusFlags::C | StatusFlags::O);
        sign_zero(&mut regs, 0x8001);
        assert_eq!(regs.flags(), StatusFlags::S | StatusFlags::C | StatusFlags::O);
    }
}
