//! Cycle-accurate CP-1610 CPU core and peripheral bus.

/// Host-facing configuration, hooks and the CPU's memory view.
pub mod api;
pub use api::{
    BreakpointKind, CpuConfig, HookAction, HookEvent, InstructionHook, MemoryPort, CORE_VERSION,
    DEFAULT_INTERRUPT_VECTOR, DEFAULT_RESET_VECTOR,
};

/// Peripheral bus: address decode, request queue and scheduling.
pub mod bus;
pub use bus::{
    Bus, BusConfig, BusRequest, CacheSnoop, Capabilities, Device, DeviceId, ReqQueue,
    RequestKind, RequestState, TickResult, MAX_DECODE_BITS, MAX_PERIPH_BIN, REQ_Q_DEPTH,
    REQ_Q_HISTORY, SNOOP_WINDOW,
};

/// The CPU device with its decode cache and breakpoints.
pub mod cpu;
pub use cpu::{BreakpointFlags, Cpu, CpuCounters, CACHE_PAGE_SHIFT};

/// Instruction decode into cached handles.
pub mod decoder;
pub use decoder::{DecodedInstruction, Decoder, Handler};

/// Human-readable instruction listings.
pub mod disasm;
pub use disasm::{disassemble_one, disassemble_window, DisassemblyRow};

/// Instruction format classification.
pub mod encoding;
pub use encoding::{format_of, InstrFormat, SDBD_WORD};

/// Instruction semantics.
pub mod execute;
pub use execute::ExecuteOutcome;

/// Error types and guest anomaly taxonomy.
pub mod fault;
pub use fault::{Anomaly, BusError, FaultClass, RequestError, SnapshotError, TrapError};

/// RAM, ROM and page-switched memory devices.
pub mod memory;
pub use memory::{Memory, MemoryKind, PagedMemory, PAGE_WINDOW};

/// Named-field snapshot registry.
pub mod snapshot;
pub use snapshot::{Field, FieldFlags, FieldValue, Radix, SnapshotRegistry, SnapshotVersion};

/// Architectural register state.
pub mod state;
pub use state::{GeneralRegister, IntrGate, Registers, StatusFlags};

/// Instruction cycle costs.
pub mod timing;
pub use timing::{cycle_cost, CycleCostKind, CYCLE_COST_TABLE};

/// Host-call trap dispatch.
pub mod trap;
pub use trap::{HostCall, TrapOutcome, TrapTable, BAD_CALL_RESULT, PING_CALL, TRAP_SIGNATURE};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
