//! Public host-facing API contracts for embedding the CPU core.

use crate::state::Registers;

/// Default address the CPU jumps to on reset.
pub const DEFAULT_RESET_VECTOR: u16 = 0x1000;

/// Default address the CPU vectors to on an acknowledged interrupt.
pub const DEFAULT_INTERRUPT_VECTOR: u16 = 0x1004;

/// Core version reported to guests by the `SIN` version query, major in
/// the high byte.
pub const CORE_VERSION: u16 = 0x0100;

/// Top-level immutable configuration for a CPU instance.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CpuConfig {
    /// Program counter loaded on reset.
    pub reset_vector: u16,
    /// Program counter loaded when an interrupt is taken.
    pub interrupt_vector: u16,
    /// Enables extended addressing and extended arithmetic opcodes.
    pub extended_isa: bool,
    /// Seed for power-up register randomization. `None` leaves the
    /// registers zeroed.
    pub randomize_seed: Option<u64>,
    /// Instructions per run before stopping at a boundary. Zero disables
    /// single-stepping.
    pub step_count: u32,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            reset_vector: DEFAULT_RESET_VECTOR,
            interrupt_vector: DEFAULT_INTERRUPT_VECTOR,
            extended_isa: false,
            randomize_seed: None,
            step_count: 0,
        }
    }
}

/// Word-wide memory access used by the execute routines.
///
/// The CPU drives this through the bus; tests and tools may back it with
/// a flat image.
pub trait MemoryPort {
    /// Reads a word with side effects.
    fn read(&mut self, addr: u16) -> u16;

    /// Writes a word.
    fn write(&mut self, addr: u16, data: u16);

    /// Reads a word without side effects.
    fn peek(&self, addr: u16) -> u16;
}

/// Why a hook call carries a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum BreakpointKind {
    /// A persistent breakpoint.
    Breakpoint,
    /// A one-shot tracepoint, cleared as it fired.
    Tracepoint,
}

/// What the hook sees after each instruction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookEvent {
    /// Program counter after the step.
    pub pc: u16,
    /// CPU clock after the step.
    pub now: u64,
    /// Cycles charged to the step, or `None` when it suspended.
    pub cycles: Option<u32>,
    /// The breakpoint that suspended the step, if any.
    pub breakpoint: Option<BreakpointKind>,
}

/// Hook verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HookAction {
    /// Keep running.
    #[default]
    Continue,
    /// Return from the current tick at this boundary.
    Suspend,
}

/// Per-instruction callback installed by debuggers and single-steppers.
pub trait InstructionHook {
    /// Called at each instruction boundary reached by a tick.
    fn on_instruction(&mut self, event: &HookEvent, regs: &Registers) -> HookAction;
}

impl<F> InstructionHook for F
where
    F: FnMut(&HookEvent, &Registers) -> HookAction,
{
    fn on_instruction(&mut self, event: &HookEvent, regs: &Registers) -> HookAction {
        self(event, regs)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CpuConfig, HookAction, HookEvent, InstructionHook, DEFAULT_INTERRUPT_VECTOR,
        DEFAULT_RESET_VECTOR,
    };
    use crate::state::Registers;

    #[test]
    fn default_config_boots_at_standard_vectors() {
        let config = CpuConfig::default();

        assert_eq!(config.reset_vector, DEFAULT_RESET_VECTOR);
        assert_eq!(config.interrupt_vector, DEFAULT_INTERRUPT_VECTOR);
        assert!(!config.extended_isa);
        assert!(config.randomize_seed.is_none());
        assert_eq!(config.step_count, 0);
    }

    #[test]
    fn closures_act_as_hooks() {
        let mut seen = Vec::new();
        let mut hook = |event: &HookEvent, _: &Registers| {
            seen.push(event.pc);
            if event.pc == 2 {
                HookAction::Suspend
            } else {
                HookAction::Continue
            }
        };
        let regs = Registers::default();
        let mut event = HookEvent {
            pc: 1,
            now: 0,
            cycles: Some(6),
            breakpoint: None,
        };
        assert_eq!(hook.on_instruction(&event, &regs), HookAction::Continue);
        event.pc = 2;
        assert_eq!(hook.on_instruction(&event, &regs), HookAction::Suspend);
        assert_eq!(seen, [1, 2]);
    }
}
