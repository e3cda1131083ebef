//! Instruction decoder for the CP-1610.
//!
//! Decoding turns one to three raw words into a [`DecodedInstruction`]
//! with canonical operand fields plus a [`Handler`] naming the execute
//! routine. The pair is what the CPU memoizes per address.

#![allow(clippy::cast_possible_truncation)]

use crate::encoding::{format_of, InstrFormat, SDBD_WORD};

/// Operation field of the two-operand formats (`op` = 1..=7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TwoOp {
    /// `MVO`: register to memory.
    Store,
    /// `MVI`/`MOVR`.
    Move,
    /// `ADD`.
    Add,
    /// `SUB`.
    Sub,
    /// `CMP`.
    Cmp,
    /// `AND`.
    And,
    /// `XOR`.
    Xor,
}

impl TwoOp {
    /// Decodes the three-bit operation field. Zero belongs to other formats.
    #[must_use]
    pub const fn from_u3(bits: u16) -> Option<Self> {
        match bits {
            1 => Some(Self::Store),
            2 => Some(Self::Move),
            3 => Some(Self::Add),
            4 => Some(Self::Sub),
            5 => Some(Self::Cmp),
            6 => Some(Self::And),
            7 => Some(Self::Xor),
            _ => None,
        }
    }
}

/// Implied single-word control instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(missing_docs)]
pub enum ImpliedOp {
    Hlt,
    Sdbd,
    Eis,
    Dis,
    Tci,
    Clrc,
    Setc,
}

/// Single-register operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(missing_docs)]
pub enum UnaryOp {
    Incr,
    Decr,
    Comr,
    Negr,
    Adcr,
    Rswd,
}

/// Shift, rotate and byte-swap kinds, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(missing_docs)]
pub enum RotateOp {
    Swap,
    Sll,
    Rlc,
    Sllc,
    Slr,
    Sar,
    Rrc,
    Sarc,
}

impl RotateOp {
    /// Every kind in encoding order.
    pub const ALL: [Self; 8] = [
        Self::Swap,
        Self::Sll,
        Self::Rlc,
        Self::Sllc,
        Self::Slr,
        Self::Sar,
        Self::Rrc,
        Self::Sarc,
    ];
}

/// Branch conditions. Bit 3 of the encoding negates bits 2..0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(missing_docs)]
pub enum Condition {
    Always,
    Carry,
    Overflow,
    Plus,
    Equal,
    Less,
    LessOrEqual,
    UnequalSignCarry,
    Never,
    NoCarry,
    NoOverflow,
    Minus,
    NotEqual,
    GreaterOrEqual,
    Greater,
    EqualSignCarry,
    /// `BEXT`: taken when the external condition lines equal `imm1`.
    External,
}

impl Condition {
    /// The sixteen flag conditions in encoding order.
    pub const FLAG_CONDITIONS: [Self; 16] = [
        Self::Always,
        Self::Carry,
        Self::Overflow,
        Self::Plus,
        Self::Equal,
        Self::Less,
        Self::LessOrEqual,
        Self::UnequalSignCarry,
        Self::Never,
        Self::NoCarry,
        Self::NoOverflow,
        Self::Minus,
        Self::NotEqual,
        Self::GreaterOrEqual,
        Self::Greater,
        Self::EqualSignCarry,
    ];

    /// Decodes the five-bit condition field.
    #[must_use]
    pub const fn from_u5(bits: u16) -> Self {
        if bits & 0x10 != 0 {
            Self::External
        } else {
            Self::FLAG_CONDITIONS[(bits & 0xF) as usize]
        }
    }

    /// Evaluates a flag condition. `External` never holds here; the
    /// executor compares it against the external lines instead.
    #[must_use]
    pub const fn holds(self, s: bool, z: bool, o: bool, c: bool) -> bool {
        match self {
            Self::Always => true,
            Self::Carry => c,
            Self::Overflow => o,
            Self::Plus => !s,
            Self::Equal => z,
            Self::Less => s ^ o,
            Self::LessOrEqual => z || (s ^ o),
            Self::UnequalSignCarry => s ^ c,
            Self::Never | Self::External => false,
            Self::NoCarry => !c,
            Self::NoOverflow => !o,
            Self::Minus => s,
            Self::NotEqual => !z,
            Self::GreaterOrEqual => !(s ^ o),
            Self::Greater => !(z || (s ^ o)),
            Self::EqualSignCarry => !(s ^ c),
        }
    }
}

/// How a register-to-register op involves the program counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum PcRoute {
    /// Neither operand is `R7`.
    None,
    /// `R7` is the source.
    FromPc,
    /// `R7` is the destination only.
    ToPc,
}

/// Indirect addressing behavior selected by the address register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum IndirectMode {
    /// `R1..R3`: the pointer is left alone.
    Plain,
    /// `R4`, `R5`: the pointer advances after each access.
    PostIncrement,
    /// `R6` reads: pre-decrement pop. Stores through `R6` push with
    /// post-increment instead.
    Stack,
}

/// The execute handle cached per address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Handler {
    /// Not decoded yet, or not cacheable.
    #[default]
    Decode,
    /// Breakpoint at the current PC: decode and run once before trapping.
    DecodeBreakpoint,
    /// Breakpoint trap.
    Breakpoint,
    /// No valid execute routine.
    Invalid,
    /// Implied control instruction.
    Implied(ImpliedOp),
    /// `J`/`JSR`; links when `reg0 != 7`.
    Jump,
    /// Single-register op.
    Unary(UnaryOp),
    /// `GSWD`.
    Gswd,
    /// `NOP`.
    Nop,
    /// `SIN`: version query and host-call trap.
    Sin,
    /// Shift/rotate/swap.
    Rotate {
        /// Kind.
        op: RotateOp,
        /// Shift by two rather than one.
        by_two: bool,
    },
    /// Register-to-register op.
    Register {
        /// Operation.
        op: TwoOp,
        /// Program-counter involvement.
        route: PcRoute,
    },
    /// `TSTR`: `MOVR` of a register onto itself.
    Test,
    /// Conditional branch.
    Branch(Condition),
    /// Direct-addressed op.
    Direct(TwoOp),
    /// Indirect-addressed op.
    Indirect {
        /// Operation.
        op: TwoOp,
        /// Pointer behavior.
        mode: IndirectMode,
        /// Decoded after an `SDBD` prefix.
        dbd: bool,
    },
    /// Immediate op.
    Immediate {
        /// Operation.
        op: TwoOp,
        /// Decoded after an `SDBD` prefix.
        dbd: bool,
    },
    /// The all-ones word of undriven memory.
    Unmapped,
    /// Extended-arithmetic operation.
    Extended,
}

impl Handler {
    /// Whether this handle is a breakpoint trap of either kind.
    #[must_use]
    pub const fn is_breakpoint(self) -> bool {
        matches!(self, Self::Breakpoint | Self::DecodeBreakpoint)
    }
}

/// Canonical decoded operands.
///
/// Field meaning depends on the handler: `imm0` is the target of jumps and
/// branches, the address of direct ops and the plain immediate of
/// immediate ops; `imm1` is the double-byte immediate, the interrupt mode
/// of jumps, or the `BEXT` lines to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DecodedInstruction {
    /// Address of the first word.
    pub address: u16,
    /// Storage units occupied.
    pub len: u16,
    /// First word as fetched.
    pub word0: u16,
    /// First immediate.
    pub imm0: u16,
    /// Second immediate.
    pub imm1: u16,
    /// First register field (source, address register, or sole operand).
    pub reg0: u8,
    /// Second register field (destination or data register).
    pub reg1: u8,
    /// Extended register index.
    pub xreg0: u8,
    /// Addressing-mode tag: atomic-store kind, extended address mode, or
    /// extended opcode modifiers depending on the format.
    pub amode: u8,
}

/// Stateless decoder; the only configuration is whether the extended
/// ISA is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decoder {
    extended_isa: bool,
}

const fn bits(word: u16, lo: u32, width: u32) -> u16 {
    (word >> lo) & ((1 << width) - 1)
}

impl Decoder {
    /// Creates a decoder.
    #[must_use]
    pub const fn new(extended_isa: bool) -> Self {
        Self { extended_isa }
    }

    /// Storage units the instruction starting with `word0` occupies.
    #[must_use]
    pub const fn length(word0: u16, prev_is_sdbd: bool) -> u16 {
        format_of(word0).length(prev_is_sdbd)
    }

    /// Decodes the instruction at `address`.
    ///
    /// `words` holds the fetched words; only the first
    /// [`Decoder::length`] are meaningful. `prev_is_sdbd` is whether the
    /// instruction follows an `SDBD` prefix.
    #[must_use]
    pub fn decode(
        self,
        address: u16,
        words: [u16; 3],
        prev_is_sdbd: bool,
    ) -> (Handler, DecodedInstruction) {
        let w = words[0];
        let format = format_of(w);
        let mut d = DecodedInstruction {
            address,
            len: format.length(prev_is_sdbd),
            word0: w,
            ..DecodedInstruction::default()
        };

        let handler = match format {
            InstrFormat::Impl1OpA => Handler::Implied(match bits(w, 0, 2) {
                0 => ImpliedOp::Hlt,
                1 => ImpliedOp::Sdbd,
                2 => ImpliedOp::Eis,
                _ => ImpliedOp::Dis,
            }),
            InstrFormat::Impl1OpB => match bits(w, 0, 2) {
                1 => Handler::Implied(ImpliedOp::Tci),
                2 => Handler::Implied(ImpliedOp::Clrc),
                3 => Handler::Implied(ImpliedOp::Setc),
                _ => Handler::Invalid,
            },
            InstrFormat::Jump => {
                let (w1, w2) = (words[1], words[2]);
                d.imm0 = (bits(w1, 2, 6) << 10) | bits(w2, 0, 10);
                d.imm1 = bits(w1, 0, 2);
                d.reg0 = bits(w1, 8, 2) as u8 + 4;
                Handler::Jump
            }
            InstrFormat::Reg1Op => {
                d.reg0 = bits(w, 0, 3) as u8;
                match bits(w, 3, 3) {
                    1 => Handler::Unary(UnaryOp::Incr),
                    2 => Handler::Unary(UnaryOp::Decr),
                    3 => Handler::Unary(UnaryOp::Comr),
                    4 => Handler::Unary(UnaryOp::Negr),
                    5 => Handler::Unary(UnaryOp::Adcr),
                    7 => Handler::Unary(UnaryOp::Rswd),
                    _ => Handler::Invalid,
                }
            }
            InstrFormat::Gswd => {
                d.reg0 = bits(w, 0, 2) as u8;
                Handler::Gswd
            }
            InstrFormat::NopSin => {
                d.imm0 = bits(w, 0, 1);
                if bits(w, 1, 1) == 1 {
                    Handler::Sin
                } else {
                    Handler::Nop
                }
            }
            InstrFormat::Rot1Op => {
                d.reg0 = bits(w, 0, 2) as u8;
                let op = bits(w, 2, 4);
                Handler::Rotate {
                    op: RotateOp::ALL[(op >> 1) as usize],
                    by_two: op & 1 != 0,
                }
            }
            InstrFormat::Reg2Op => {
                let src = bits(w, 3, 3) as u8;
                let dst = bits(w, 0, 3) as u8;
                d.reg0 = src;
                d.reg1 = dst;
                match TwoOp::from_u3(bits(w, 6, 3)) {
                    Some(TwoOp::Move) if src == dst && src != 7 => Handler::Test,
                    Some(op) if op != TwoOp::Store => Handler::Register {
                        op,
                        route: if src == 7 {
                            PcRoute::FromPc
                        } else if dst == 7 {
                            PcRoute::ToPc
                        } else {
                            PcRoute::None
                        },
                    },
                    _ => Handler::Invalid,
                }
            }
            InstrFormat::CondBr => {
                let cond = bits(w, 0, 5);
                let disp = if bits(w, 5, 1) == 1 { !words[1] } else { words[1] };
                d.imm0 = disp.wrapping_add(address).wrapping_add(2);
                d.imm1 = cond & 0xF;
                Handler::Branch(Condition::from_u5(cond))
            }
            InstrFormat::Dir2Op => {
                d.reg0 = bits(w, 0, 3) as u8;
                d.imm0 = words[1];
                d.imm1 = bits(w, 6, 3);
                d.xreg0 = bits(w, 10, 3) as u8;
                d.amode = bits(w, 13, 2) as u8;
                TwoOp::from_u3(d.imm1).map_or(Handler::Invalid, Handler::Direct)
            }
            InstrFormat::Ind2Op => Self::decode_indirect(&mut d, prev_is_sdbd),
            InstrFormat::Imm2Op => self.decode_immediate(&mut d, words, prev_is_sdbd),
        };

        (handler, d)
    }

    fn decode_indirect(d: &mut DecodedInstruction, prev_is_sdbd: bool) -> Handler {
        let w = d.word0;
        d.reg1 = bits(w, 0, 3) as u8;
        d.reg0 = bits(w, 3, 3) as u8;
        let ext = bits(w, 10, 6) as u8;
        let Some(op) = TwoOp::from_u3(bits(w, 6, 3)) else {
            return Handler::Invalid;
        };
        if op == TwoOp::Store && ext <= 3 {
            d.amode = ext;
        }
        let mode = match d.reg0 {
            4 | 5 => IndirectMode::PostIncrement,
            6 if op == TwoOp::Store => IndirectMode::PostIncrement,
            6 => IndirectMode::Stack,
            _ => IndirectMode::Plain,
        };
        Handler::Indirect {
            op,
            mode,
            dbd: prev_is_sdbd,
        }
    }

    fn decode_immediate(
        self,
        d: &mut DecodedInstruction,
        words: [u16; 3],
        prev_is_sdbd: bool,
    ) -> Handler {
        let w = d.word0;
        let in_the_weeds = w == 0xFFFF;
        let op_bits = bits(w, 6, 3);
        let ext = bits(w, 10, 6) as u8;
        d.reg0 = bits(w, 0, 3) as u8;
        d.imm0 = words[1];
        d.imm1 = ((words[2] & 0xFF) << 8) | (d.imm0 & 0xFF);

        if in_the_weeds {
            d.amode = 1;
            return Handler::Unmapped;
        }

        if self.extended_isa && op_bits == 1 && ext > 0 {
            d.amode = ext;
            d.reg1 = bits(d.imm0, 4, 4) as u8;
            d.imm1 = bits(d.imm0, 4, 4) ^ if ext & 2 != 0 { 0xFFFF } else { 0 };
            d.xreg0 = bits(d.imm0, 0, 4) as u8;
            if ext & 0x18 == 0x18 {
                d.reg0 |= 8;
            }
            return Handler::Extended;
        }

        TwoOp::from_u3(op_bits).map_or(Handler::Invalid, |op| Handler::Immediate {
            op,
            dbd: prev_is_sdbd,
        })
    }
}

/// Whether `word` is the `SDBD` prefix.
#[must_use]
pub const fn is_sdbd(word: u16) -> bool {
    word == SDBD_WORD
}
