/// Instruction and sequencing forms with fixed cycle costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleCostKind {
    /// `HLT`, `SDBD`, `EIS`, `DIS`, `TCI`, `CLRC`, `SETC`.
    ImpliedControl,
    /// `J`/`JSR` and their interrupt-mode forms.
    Jump,
    /// `INCR`, `DECR`, `COMR`, `NEGR`, `ADCR`.
    RegisterUnary,
    /// `GSWD` and `RSWD`.
    StatusWord,
    /// `NOP` and `SIN`.
    NopSin,
    /// Shift, rotate or `SWAP` by one.
    ShiftByOne,
    /// Shift, rotate or `SWAP` by two.
    ShiftByTwo,
    /// Register-to-register two-operand op.
    RegisterToRegister,
    /// Register-to-register op that writes the program counter.
    RegisterToPc,
    /// Conditional branch, not taken.
    BranchNotTaken,
    /// Conditional branch, taken.
    BranchTaken,
    /// Direct-addressed read.
    DirectRead,
    /// Direct-addressed `MVO`.
    DirectStore,
    /// Immediate read.
    ImmediateRead,
    /// Immediate `MVO`.
    ImmediateStore,
    /// Indirect read through `R1..R5`.
    IndirectRead,
    /// Indirect `MVO`.
    IndirectStore,
    /// Indirect read through the stack pointer.
    StackRead,
    /// Extra cycles for a second operand fetch after `SDBD`.
    DoubleByteExtra,
    /// Extra cycles for a second direct-mode fetch after `SDBD`.
    DoubleByteDirectExtra,
    /// Extra cycle when the named register is `R6` or `R7`.
    HighRegisterPenalty,
    /// Extended-arithmetic operation.
    ExtendedIsa,
    /// Undecodable word, executed as a no-op.
    Invalid,
    /// Reset sequence after the first power-up.
    Reset,
    /// Dead cycles between interrupt acknowledge and the stack push.
    InterruptAcknowledge,
    /// Dead cycles while vectoring to the interrupt address.
    InterruptVector,
}

/// Single source-of-truth cycle-cost table.
pub const CYCLE_COST_TABLE: &[(CycleCostKind, u16)] = &[
    (CycleCostKind::ImpliedControl, 4),
    (CycleCostKind::Jump, 13),
    (CycleCostKind::RegisterUnary, 6),
    (CycleCostKind::StatusWord, 6),
    (CycleCostKind::NopSin, 6),
    (CycleCostKind::ShiftByOne, 6),
    (CycleCostKind::ShiftByTwo, 8),
    (CycleCostKind::RegisterToRegister, 6),
    (CycleCostKind::RegisterToPc, 7),
    (CycleCostKind::BranchNotTaken, 7),
    (CycleCostKind::BranchTaken, 9),
    (CycleCostKind::DirectRead, 10),
    (CycleCostKind::DirectStore, 11),
    (CycleCostKind::ImmediateRead, 8),
    (CycleCostKind::ImmediateStore, 9),
    (CycleCostKind::IndirectRead, 8),
    (CycleCostKind::IndirectStore, 9),
    (CycleCostKind::StackRead, 11),
    (CycleCostKind::DoubleByteExtra, 2),
    (CycleCostKind::DoubleByteDirectExtra, 3),
    (CycleCostKind::HighRegisterPenalty, 1),
    (CycleCostKind::ExtendedIsa, 9),
    (CycleCostKind::Invalid, 1),
    (CycleCostKind::Reset, 5),
    (CycleCostKind::InterruptAcknowledge, 2),
    (CycleCostKind::InterruptVector, 10),
];

/// Looks up the cycle cost for a cycle-cost kind.
#[must_use]
pub fn cycle_cost(kind: CycleCostKind) -> Option<u16> {
    CYCLE_COST_TABLE
        .iter()
        .find_map(|(entry_kind, cycles)| (*entry_kind == kind).then_some(*cycles))
}

/// Cost of `kind` widened for cycle arithmetic. Every kind is in the table.
pub(crate) fn cycles(kind: CycleCostKind) -> u32 {
    cycle_cost(kind).map_or(0, u32::from)
}

/// Penalty for naming `R6` or `R7` as the operand register.
pub(crate) fn high_register_penalty(reg: u8) -> u32 {
    if reg >= 6 {
        cycles(CycleCostKind::HighRegisterPenalty)
    } else {
        0
    }
}
