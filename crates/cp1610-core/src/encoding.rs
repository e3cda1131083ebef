#![allow(clippy::cast_possible_truncation, clippy::cast_lossless)]

/// Instruction formats, selected by the low ten bits of the first word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstrFormat {
    /// `HLT`, `SDBD`, `EIS`, `DIS`.
    Impl1OpA = 0,
    /// `TCI`, `CLRC`, `SETC`.
    Impl1OpB = 1,
    /// Three-word absolute jumps (`J`, `JSR`, with interrupt-mode forms).
    Jump = 2,
    /// `INCR`, `DECR`, `COMR`, `NEGR`, `ADCR`, `RSWD`.
    Reg1Op = 3,
    /// `GSWD`.
    Gswd = 4,
    /// `NOP` and `SIN`.
    NopSin = 5,
    /// Rotates, shifts and `SWAP`, each by one or two.
    Rot1Op = 6,
    /// Register-to-register two-operand ops.
    Reg2Op = 7,
    /// Relative conditional branches and `BEXT`.
    CondBr = 8,
    /// Direct-addressed two-operand ops.
    Dir2Op = 9,
    /// Register-indirect two-operand ops.
    Ind2Op = 10,
    /// Immediate two-operand ops.
    Imm2Op = 11,
}

impl InstrFormat {
    /// Every format in table order.
    pub const ALL: [Self; 12] = [
        Self::Impl1OpA,
        Self::Impl1OpB,
        Self::Jump,
        Self::Reg1Op,
        Self::Gswd,
        Self::NopSin,
        Self::Rot1Op,
        Self::Reg2Op,
        Self::CondBr,
        Self::Dir2Op,
        Self::Ind2Op,
        Self::Imm2Op,
    ];

    /// Storage units occupied without any `SDBD` prefix.
    #[must_use]
    pub const fn base_length(self) -> u16 {
        match self {
            Self::Jump => 3,
            Self::CondBr | Self::Dir2Op | Self::Imm2Op => 2,
            _ => 1,
        }
    }

    /// Storage units occupied, accounting for a preceding `SDBD`.
    ///
    /// Only immediate-operand instructions grow: the prefix makes them
    /// fetch their operand as two bytes.
    #[must_use]
    pub const fn length(self, after_sdbd: bool) -> u16 {
        self.base_length() + (after_sdbd && matches!(self, Self::Imm2Op)) as u16
    }

    const fn classify(low: u16) -> Self {
        match low {
            0x000..=0x003 => Self::Impl1OpA,
            0x004 => Self::Jump,
            0x005..=0x007 => Self::Impl1OpB,
            0x008..=0x02F | 0x038..=0x03F => Self::Reg1Op,
            0x030..=0x033 => Self::Gswd,
            0x034..=0x037 => Self::NopSin,
            0x040..=0x07F => Self::Rot1Op,
            0x080..=0x1FF => Self::Reg2Op,
            0x200..=0x23F => Self::CondBr,
            _ => match low & 0x38 {
                0x00 => Self::Dir2Op,
                0x38 => Self::Imm2Op,
                _ => Self::Ind2Op,
            },
        }
    }
}

/// Number of entries in the format table.
pub const FORMAT_TABLE_LEN: usize = 1024;

/// Format of every possible low-ten-bit opcode pattern.
pub const FORMAT_TABLE: [InstrFormat; FORMAT_TABLE_LEN] = build_format_table();

const fn build_format_table() -> [InstrFormat; FORMAT_TABLE_LEN] {
    let mut table = [InstrFormat::Impl1OpA; FORMAT_TABLE_LEN];
    let mut i = 0;
    while i < FORMAT_TABLE_LEN {
        table[i] = InstrFormat::classify(i as u16);
        i += 1;
    }
    table
}

/// The raw word of the `SDBD` prefix.
pub const SDBD_WORD: u16 = 0x0001;

/// Looks up the format of an instruction word. Bits above the tenth are
/// ignored, as on the real part.
#[must_use]
pub const fn format_of(word: u16) -> InstrFormat {
    FORMAT_TABLE[(word & 0x03FF) as usize]
}
