//! Instruction disassembly for the CP-1610.
//!
//! Rows are produced from a peek function so the same code serves the
//! CPU's memoized per-address text and host-side listings.

use std::fmt;

use crate::decoder::{
    Condition, DecodedInstruction, Decoder, Handler, ImpliedOp, PcRoute, RotateOp, TwoOp,
    UnaryOp,
};
use crate::execute::{EXT_OPCODE_COUNT, EXT_TABLE};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single disassembled instruction row.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DisassemblyRow {
    /// The starting address of this instruction.
    pub addr_start: u16,
    /// Storage units occupied (1 to 3).
    pub len: u16,
    /// Raw words; entries past `len` are zero.
    pub words: [u16; 3],
    /// The instruction mnemonic (e.g. "MVII", "JSR", "B").
    pub mnemonic: String,
    /// The formatted operands (e.g. "#$0042, R0").
    pub operands: String,
    /// Whether this is an illegal or undriven encoding.
    pub is_illegal: bool,
}

impl DisassemblyRow {
    /// Whether this row is the `SDBD` prefix.
    #[must_use]
    pub fn is_sdbd(&self) -> bool {
        self.mnemonic == "SDBD"
    }
}

impl fmt::Display for DisassemblyRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:04X}:", self.addr_start)?;
        for slot in 0..3 {
            if slot < usize::from(self.len) {
                write!(f, " {:04X}", self.words[slot])?;
            } else {
                f.write_str("     ")?;
            }
        }
        write!(f, "  {:<7}", self.mnemonic)?;
        if !self.operands.is_empty() {
            write!(f, " {}", self.operands)?;
        }
        Ok(())
    }
}

/// Disassembles the instruction at `pc`.
///
/// `peek` reads memory without side effects. `prev_is_sdbd` says whether
/// the word before `pc` is an `SDBD` prefix, which lengthens immediate
/// instructions.
pub fn disassemble_one(
    pc: u16,
    peek: impl Fn(u16) -> u16,
    prev_is_sdbd: bool,
    extended_isa: bool,
) -> DisassemblyRow {
    let word0 = peek(pc);
    let len = Decoder::length(word0, prev_is_sdbd);
    let mut words = [0u16; 3];
    for (offset, word) in (0..len).zip(words.iter_mut()) {
        *word = peek(pc.wrapping_add(offset));
    }

    let (handler, decoded) = Decoder::new(extended_isa).decode(pc, words, prev_is_sdbd);
    let (mnemonic, operands, is_illegal) = match format_instruction(handler, &decoded) {
        Some((mnemonic, operands)) => (mnemonic, operands, false),
        None => (".word".to_string(), format!("${word0:04X}"), true),
    };

    DisassemblyRow {
        addr_start: pc,
        len,
        words,
        mnemonic,
        operands,
        is_illegal,
    }
}

/// Disassembles `count` consecutive instructions starting at `start`,
/// carrying `SDBD` prefixes from one row to the next.
pub fn disassemble_window(
    start: u16,
    count: usize,
    peek: impl Fn(u16) -> u16,
    extended_isa: bool,
) -> Vec<DisassemblyRow> {
    let mut rows = Vec::with_capacity(count);
    let mut pc = start;
    let mut prev_is_sdbd = crate::decoder::is_sdbd(peek(start.wrapping_sub(1)));

    for _ in 0..count {
        let row = disassemble_one(pc, &peek, prev_is_sdbd, extended_isa);
        prev_is_sdbd = row.is_sdbd();
        pc = pc.wrapping_add(row.len);
        rows.push(row);
    }

    rows
}

fn reg(r: u8) -> String {
    format!("R{}", r & 7)
}

fn format_instruction(handler: Handler, d: &DecodedInstruction) -> Option<(String, String)> {
    let plain = |m: &str| Some((m.to_string(), String::new()));
    match handler {
        Handler::Decode
        | Handler::DecodeBreakpoint
        | Handler::Breakpoint
        | Handler::Invalid
        | Handler::Unmapped => None,
        Handler::Implied(op) => plain(match op {
            ImpliedOp::Hlt => "HLT",
            ImpliedOp::Sdbd => "SDBD",
            ImpliedOp::Eis => "EIS",
            ImpliedOp::Dis => "DIS",
            ImpliedOp::Tci => "TCI",
            ImpliedOp::Clrc => "CLRC",
            ImpliedOp::Setc => "SETC",
        }),
        Handler::Nop => plain("NOP"),
        Handler::Sin => plain("SIN"),
        Handler::Jump => {
            let suffix = match d.imm1 {
                0 => "",
                1 => "E",
                2 => "D",
                _ => return None,
            };
            let target = format!("${:04X}", d.imm0);
            if d.reg0 == 7 {
                Some((format!("J{suffix}"), target))
            } else {
                Some((format!("JSR{suffix}"), format!("{}, {target}", reg(d.reg0))))
            }
        }
        Handler::Unary(op) => {
            let name = match op {
                UnaryOp::Incr => "INCR",
                UnaryOp::Decr => "DECR",
                UnaryOp::Comr => "COMR",
                UnaryOp::Negr => "NEGR",
                UnaryOp::Adcr => "ADCR",
                UnaryOp::Rswd => "RSWD",
            };
            Some((name.to_string(), reg(d.reg0)))
        }
        Handler::Gswd => Some(("GSWD".to_string(), reg(d.reg0))),
        Handler::Rotate { op, by_two } => {
            let name = match op {
                RotateOp::Swap => "SWAP",
                RotateOp::Sll => "SLL",
                RotateOp::Rlc => "RLC",
                RotateOp::Sllc => "SLLC",
                RotateOp::Slr => "SLR",
                RotateOp::Sar => "SAR",
                RotateOp::Rrc => "RRC",
                RotateOp::Sarc => "SARC",
            };
            let operands = if by_two {
                format!("{}, 2", reg(d.reg0))
            } else {
                reg(d.reg0)
            };
            Some((name.to_string(), operands))
        }
        Handler::Test => Some(("TSTR".to_string(), reg(d.reg0))),
        Handler::Register {
            op: TwoOp::Move,
            route: PcRoute::ToPc,
        } => Some(("JR".to_string(), reg(d.reg0))),
        Handler::Register { op, .. } => Some((
            format!("{}R", op_name(op)),
            format!("{}, {}", reg(d.reg0), reg(d.reg1)),
        )),
        Handler::Branch(cond) => Some(format_branch(cond, d)),
        Handler::Direct(op) => {
            let addr = format!("${:04X}", d.imm0);
            let operands = if op == TwoOp::Store {
                format!("{}, {addr}", reg(d.reg0))
            } else {
                format!("{addr}, {}", reg(d.reg0))
            };
            Some((op_name(op).to_string(), operands))
        }
        Handler::Indirect { op, .. } => {
            let pointer = reg(d.reg0);
            let operands = if op == TwoOp::Store {
                format!("{}, {pointer}", reg(d.reg1))
            } else {
                format!("{pointer}, {}", reg(d.reg1))
            };
            Some((format!("{}@", op_name(op)), operands))
        }
        Handler::Immediate { op, dbd } => {
            let value = if dbd { d.imm1 } else { d.imm0 };
            let operands = if op == TwoOp::Store {
                format!("{}, #${value:04X}", reg(d.reg0))
            } else {
                format!("#${value:04X}, {}", reg(d.reg0))
            };
            Some((format!("{}I", op_name(op)), operands))
        }
        Handler::Extended => format_extended(d),
    }
}

const fn op_name(op: TwoOp) -> &'static str {
    match op {
        TwoOp::Store => "MVO",
        TwoOp::Move => "MVI",
        TwoOp::Add => "ADD",
        TwoOp::Sub => "SUB",
        TwoOp::Cmp => "CMP",
        TwoOp::And => "AND",
        TwoOp::Xor => "XOR",
    }
}

fn format_branch(cond: Condition, d: &DecodedInstruction) -> (String, String) {
    let name = match cond {
        Condition::Always => "B",
        Condition::Carry => "BC",
        Condition::Overflow => "BOV",
        Condition::Plus => "BPL",
        Condition::Equal => "BEQ",
        Condition::Less => "BLT",
        Condition::LessOrEqual => "BLE",
        Condition::UnequalSignCarry => "BUSC",
        Condition::Never => "NOPP",
        Condition::NoCarry => "BNC",
        Condition::NoOverflow => "BNOV",
        Condition::Minus => "BMI",
        Condition::NotEqual => "BNEQ",
        Condition::GreaterOrEqual => "BGE",
        Condition::Greater => "BGT",
        Condition::EqualSignCarry => "BESC",
        Condition::External => "BEXT",
    };
    let target = format!("${:04X}", d.imm0);
    let operands = if cond == Condition::External {
        format!("{target}, {}", d.imm1)
    } else {
        target
    };
    (name.to_string(), operands)
}

fn format_extended(d: &DecodedInstruction) -> Option<(String, String)> {
    let opcode = usize::from(d.imm0 >> 8);
    let amode = d.amode;
    let s2type = (amode >> 1) & 3;
    if amode >= 0x20 || amode < 2 || opcode >= EXT_OPCODE_COUNT || s2type == 0 {
        return None;
    }
    let name = EXT_TABLE[opcode].names[usize::from(amode & 1)];
    let src1 = if (amode >> 3) & 1 != 0 {
        format!("X{}", d.reg0 & 15)
    } else {
        reg(d.reg0)
    };
    let src2 = if s2type == 1 {
        format!("X{}", d.reg1 & 15)
    } else {
        format!("#${:04X}", d.imm1)
    };
    Some((
        name.to_string(),
        format!("X{}, {src1}, {src2}", d.xreg0 & 15),
    ))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{disassemble_one, disassemble_window};

    fn flat(program: &[u16], at: u16) -> impl Fn(u16) -> u16 + '_ {
        move |addr| {
            addr.checked_sub(at)
                .and_then(|i| program.get(usize::from(i)).copied())
                .unwrap_or(0xFFFF)
        }
    }

    #[rstest]
    #[case(&[0x0000], "HLT", "")]
    #[case(&[0x0034], "NOP", "")]
    #[case(&[0x000B], "INCR", "R3")]
    #[case(&[0x0045], "SWAP", "R1, 2")]
    #[case(&[0x0092], "TSTR", "R2")]
    #[case(&[0x00C1], "ADDR", "R0, R1")]
    #[case(&[0x00B7], "JR", "R6")]
    #[case(&[0x02B8, 0x0042], "MVII", "#$0042, R0")]
    #[case(&[0x0240, 0x0100], "MVO", "R0, $0100")]
    #[case(&[0x0281, 0x0100], "MVI", "$0100, R1")]
    #[case(&[0x02A1], "MVI@", "R4, R1")]
    #[case(&[0x0260], "MVO@", "R0, R4")]
    #[case(&[0x0220, 0x0003], "B", "$0FFE")]
    #[case(&[0x0215, 0x0000], "BEXT", "$1002, 5")]
    #[case(&[0x0004, 0x0111, 0x0234], "JSRE", "R5, $1234")]
    #[case(&[0x0004, 0x0300, 0x0000], "J", "$0000")]
    fn formats_mnemonics(#[case] program: &[u16], #[case] mnemonic: &str, #[case] operands: &str) {
        let row = disassemble_one(0x1000, flat(program, 0x1000), false, false);
        assert_eq!(row.mnemonic, mnemonic);
        assert_eq!(row.operands, operands);
        assert_eq!(usize::from(row.len), program.len());
        assert!(!row.is_illegal);
    }

    #[test]
    fn sdbd_prefix_widens_the_immediate() {
        let program = [0x0001, 0x02B8, 0x0034, 0x0012];
        let rows = disassemble_window(0x1000, 2, flat(&program, 0x1000), false);
        assert_eq!(rows[0].mnemonic, "SDBD");
        assert_eq!(rows[1].len, 3);
        assert_eq!(rows[1].operands, "#$1234, R0");
    }

    #[test]
    fn undriven_and_invalid_words_are_flagged() {
        let row = disassemble_one(0x1000, |_| 0xFFFF, false, false);
        assert!(row.is_illegal);
        assert_eq!(row.operands, "$FFFF");

        // Interrupt-mode field 3 has no jump form.
        let bad = disassemble_one(0x1000, flat(&[0x0004, 0x0303, 0x0000], 0x1000), false, false);
        assert!(bad.is_illegal);
        assert_eq!(bad.mnemonic, ".word");
        assert_eq!(bad.len, 3);
    }

    #[test]
    fn extended_ops_use_their_table_names() {
        // ADD3 X2, R1, X3: opcode 0 in the high byte of the second word.
        let program = [0x0A79, 0x0032];
        let row = disassemble_one(0x1000, flat(&program, 0x1000), false, true);
        assert_eq!(row.mnemonic, "ADD3");
        assert_eq!(row.operands, "X2, R1, X3");

        let plain = disassemble_one(0x1000, flat(&program, 0x1000), false, false);
        assert_eq!(plain.mnemonic, "MVOI");
    }

    #[test]
    fn rows_render_address_words_and_text() {
        let row = disassemble_one(0x1000, flat(&[0x02B8, 0x0042], 0x1000), false, false);
        let expected = format!("$1000: 02B8 0042{}  MVII    #$0042, R0", " ".repeat(5));
        assert_eq!(row.to_string(), expected);
    }
}
