use bitflags::bitflags;
use rand_chacha::rand_core::RngCore;

/// Number of architecturally visible general-purpose registers (`R0..R7`).
pub const GENERAL_REGISTER_COUNT: usize = 8;
/// Number of extended registers used by the wide-arithmetic extension.
pub const EXTENDED_REGISTER_COUNT: usize = 16;

/// Architecturally visible general-purpose register identifier.
///
/// `R6` doubles as the stack pointer and `R7` as the program counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum GeneralRegister {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
}

impl GeneralRegister {
    /// Ordered list of all architectural general-purpose registers.
    pub const ALL: [Self; GENERAL_REGISTER_COUNT] = [
        Self::R0,
        Self::R1,
        Self::R2,
        Self::R3,
        Self::R4,
        Self::R5,
        Self::R6,
        Self::R7,
    ];

    /// Stack pointer alias.
    pub const SP: Self = Self::R6;
    /// Program counter alias.
    pub const PC: Self = Self::R7;

    /// Returns the array index for this register (`0..=7`).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Decodes a 3-bit register field into an architectural register.
    #[must_use]
    pub const fn from_u3(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::R0),
            1 => Some(Self::R1),
            2 => Some(Self::R2),
            3 => Some(Self::R3),
            4 => Some(Self::R4),
            5 => Some(Self::R5),
            6 => Some(Self::R6),
            7 => Some(Self::R7),
            _ => None,
        }
    }
}

bitflags! {
    /// Condition flags, laid out as `GSWD` places them in the low byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: u16 {
        /// Sign.
        const S = 0x80;
        /// Zero.
        const Z = 0x40;
        /// Overflow.
        const O = 0x20;
        /// Carry.
        const C = 0x10;
    }
}

bitflags! {
    /// Interrupt acknowledgement gates for the instruction just executed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IntrGate: u8 {
        /// Interrupts were enabled when the instruction started.
        const ENABLE = 1;
        /// The instruction is interruptible.
        const INSTR = 2;
    }
}

/// Full architectural register state of the CP-1610.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Registers {
    pub(crate) r: [u16; GENERAL_REGISTER_COUNT],
    pub(crate) xr: [u16; EXTENDED_REGISTER_COUNT],
    pub(crate) s: bool,
    pub(crate) z: bool,
    pub(crate) o: bool,
    pub(crate) c: bool,
    pub(crate) i: bool,
    /// `SDBD` countdown: set to 2, halved after every instruction.
    pub(crate) d: u8,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) intr: IntrGate,
}

impl Registers {
    /// Reads a general-purpose register.
    #[must_use]
    pub const fn gpr(&self, reg: GeneralRegister) -> u16 {
        self.r[reg.index()]
    }

    /// Writes a general-purpose register.
    pub const fn set_gpr(&mut self, reg: GeneralRegister, value: u16) {
        self.r[reg.index()] = value;
    }

    /// Reads the program counter (`R7`).
    #[must_use]
    pub const fn pc(&self) -> u16 {
        self.r[7]
    }

    /// Writes the program counter (`R7`).
    pub const fn set_pc(&mut self, value: u16) {
        self.r[7] = value;
    }

    /// Reads the stack pointer (`R6`).
    #[must_use]
    pub const fn sp(&self) -> u16 {
        self.r[6]
    }

    /// Reads an extended register. `index` is taken modulo 16.
    #[must_use]
    pub const fn xr(&self, index: usize) -> u16 {
        self.xr[index % EXTENDED_REGISTER_COUNT]
    }

    /// Writes an extended register. `index` is taken modulo 16.
    pub const fn set_xr(&mut self, index: usize, value: u16) {
        self.xr[index % EXTENDED_REGISTER_COUNT] = value;
    }

    /// Current condition flags.
    #[must_use]
    pub fn flags(&self) -> StatusFlags {
        let mut flags = StatusFlags::empty();
        flags.set(StatusFlags::S, self.s);
        flags.set(StatusFlags::Z, self.z);
        flags.set(StatusFlags::O, self.o);
        flags.set(StatusFlags::C, self.c);
        flags
    }

    /// Replaces the condition flags.
    pub const fn set_flags(&mut self, flags: StatusFlags) {
        self.s = flags.contains(StatusFlags::S);
        self.z = flags.contains(StatusFlags::Z);
        self.o = flags.contains(StatusFlags::O);
        self.c = flags.contains(StatusFlags::C);
    }

    /// Whether interrupts are enabled (`EIS`/`DIS`).
    #[must_use]
    pub const fn interrupts_enabled(&self) -> bool {
        self.i
    }

    /// Enables or disables interrupts.
    pub const fn set_interrupts_enabled(&mut self, enabled: bool) {
        self.i = enabled;
    }

    /// Whether an `SDBD` prefix is still in effect for the next instruction.
    #[must_use]
    pub const fn double_byte_pending(&self) -> bool {
        self.d != 0
    }

    /// Acknowledgement gates left by the last instruction.
    #[must_use]
    pub const fn intr_gate(&self) -> IntrGate {
        self.intr
    }

    /// The status word as `GSWD` writes it: flags in bits 7..4, mirrored
    /// into bits 15..12.
    #[must_use]
    pub fn status_word(&self) -> u16 {
        let bits = self.flags().bits();
        bits | (bits << 8)
    }

    /// Loads flags from a status word as `RSWD` reads it.
    pub fn load_status_word(&mut self, word: u16) {
        self.set_flags(StatusFlags::from_bits_truncate(word));
    }

    /// Fills `R0..R6`, the flags, `I` and `D` with garbage, modelling an
    /// uninitialized power-up.
    #[allow(clippy::cast_possible_truncation)]
    pub fn randomize(&mut self, rng: &mut impl RngCore) {
        for reg in &mut self.r[..7] {
            *reg = (rng.next_u32() & 0xFFFF) as u16;
        }
        let bits = rng.next_u32();
        self.s = bits & 1 != 0;
        self.c = bits & 2 != 0;
        self.o = bits & 4 != 0;
        self.z = bits & 8 != 0;
        self.i = bits & 16 != 0;
        self.d = u8::from(bits & 32 != 0);
    }
}
