//! Execute routines for decoded CP-1610 instructions.
//!
//! [`execute`] applies one decoded instruction to the register file and
//! memory. Every routine advances the program counter itself, clears the
//! interrupt gate when the instruction is non-interruptible and returns
//! the cycles it consumed. Breakpoint and decode handles never arrive here;
//! the CPU resolves them before dispatch.

#![allow(
    clippy::pedantic,
    clippy::nursery,
    clippy::similar_names,
    unknown_lints,
    missing_docs
)]

mod ext;
mod flags;
mod helpers;

pub(crate) use ext::{ExtKind, EXT_OPCODE_COUNT, EXT_TABLE};

use tracing::{debug, warn};

use crate::api::{MemoryPort, CORE_VERSION};
use crate::decoder::{
    Condition, DecodedInstruction, Handler, ImpliedOp, IndirectMode, PcRoute, RotateOp, TwoOp,
    UnaryOp,
};
use crate::fault::Anomaly;
use crate::state::{IntrGate, Registers};
use crate::timing::{cycles, high_register_penalty, CycleCostKind};
use crate::trap::{TrapTable, TRAP_SIGNATURE};

use ext::{div32s, div32u, PV_ADDR};
use helpers::{atomic_data, ext_addr_read, ext_addr_write};

/// `R0` and `R1` values that turn `SIN` into a version query.
const VERSION_QUERY: (u16, u16) = (0x656D, 0x753F);

/// Outcome of executing a single instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// Instruction retired.
    Retired {
        /// Cycles consumed.
        cycles: u32,
    },
    /// Instruction retired and the run loop should return to its host.
    Suspended {
        /// Cycles consumed.
        cycles: u32,
    },
}

impl ExecuteOutcome {
    /// Cycles consumed by the instruction.
    #[must_use]
    pub const fn cycles(self) -> u32 {
        match self {
            Self::Retired { cycles } | Self::Suspended { cycles } => cycles,
        }
    }
}

/// Bumps the counter for `anomaly` and logs it: a warning the first time
/// each code is seen, debug noise after that.
pub(crate) fn record_anomaly(anomalies: &mut [u64; Anomaly::COUNT], anomaly: Anomaly, pc: u16) {
    let slot = &mut anomalies[anomaly.index()];
    *slot += 1;
    if *slot == 1 {
        warn!(pc = %format_args!("{pc:04X}"), code = anomaly.as_u8(), "{anomaly}");
    } else {
        debug!(pc = %format_args!("{pc:04X}"), code = anomaly.as_u8(), count = *slot, "{anomaly}");
    }
}

/// Everything an execute routine may touch.
pub struct ExecContext<'a> {
    /// Architectural registers.
    pub regs: &'a mut Registers,
    /// Data memory as seen by the CPU.
    pub mem: &'a mut dyn MemoryPort,
    /// Host calls reachable through `SIN`.
    pub traps: &'a mut TrapTable,
    /// Extended addressing and arithmetic are live.
    pub extended_isa: bool,
    /// A per-instruction hook is installed; `HLT` and unmapped fetches
    /// suspend instead of spinning.
    pub has_hook: bool,
    /// External condition lines sampled by `BEXT`.
    pub ext_lines: u8,
    /// Per-code anomaly counters.
    pub anomalies: &'a mut [u64; Anomaly::COUNT],
}

impl ExecContext<'_> {
    /// Counts an anomaly.
    pub fn note(&mut self, anomaly: Anomaly, pc: u16) {
        record_anomaly(self.anomalies, anomaly, pc);
    }

    fn reg(&self, index: u8) -> u16 {
        self.regs.r[usize::from(index & 7)]
    }

    fn set_reg(&mut self, index: u8, value: u16) {
        self.regs.r[usize::from(index & 7)] = value;
    }

    fn advance(&mut self, words: u16) {
        self.regs.r[7] = self.regs.r[7].wrapping_add(words);
    }

    fn block_interrupts(&mut self) {
        self.regs.intr = IntrGate::empty();
    }

    const fn suspend_or_retire(&self, cycles: u32) -> ExecuteOutcome {
        if self.has_hook {
            ExecuteOutcome::Suspended { cycles }
        } else {
            ExecuteOutcome::Retired { cycles }
        }
    }
}

/// Executes `instr` through the routine named by `handler`.
pub fn execute(
    handler: Handler,
    instr: &DecodedInstruction,
    ctx: &mut ExecContext<'_>,
) -> ExecuteOutcome {
    match handler {
        Handler::Decode | Handler::DecodeBreakpoint | Handler::Breakpoint | Handler::Invalid => {
            invalid(instr, ctx)
        }
        Handler::Implied(op) => implied(op, instr, ctx),
        Handler::Jump => jump(instr, ctx),
        Handler::Unary(op) => unary(op, instr, ctx),
        Handler::Gswd => {
            ctx.advance(1);
            let word = ctx.regs.status_word();
            ctx.set_reg(instr.reg0, word);
            ctx.block_interrupts();
            ExecuteOutcome::Retired {
                cycles: cycles(CycleCostKind::StatusWord),
            }
        }
        Handler::Nop => {
            ctx.advance(1);
            ExecuteOutcome::Retired {
                cycles: cycles(CycleCostKind::NopSin),
            }
        }
        Handler::Sin => sin(instr, ctx),
        Handler::Rotate { op, by_two } => rotate(op, by_two, instr, ctx),
        Handler::Register { op, route } => register(op, route, instr, ctx),
        Handler::Test => {
            ctx.advance(1);
            let value = ctx.reg(instr.reg0);
            flags::sign_zero(ctx.regs, value);
            ExecuteOutcome::Retired {
                cycles: cycles(CycleCostKind::RegisterToRegister)
                    + high_register_penalty(instr.reg1),
            }
        }
        Handler::Branch(cond) => branch(cond, instr, ctx),
        Handler::Direct(op) => direct(op, instr, ctx),
        Handler::Indirect { op, mode, dbd } => indirect(op, mode, dbd, instr, ctx),
        Handler::Immediate { op, dbd } => immediate(op, dbd, instr, ctx),
        Handler::Unmapped => unmapped(instr, ctx),
        Handler::Extended => extended(instr, ctx),
    }
}

/// Shared arithmetic of the two-operand forms: `dst op src`. Returns the
/// value to store, or `None` for `CMP`. `Move` sets no flags here; the
/// register form adds S/Z itself.
fn alu(regs: &mut Registers, op: TwoOp, src: u16, dst: u16) -> Option<u16> {
    match op {
        TwoOp::Move => Some(src),
        TwoOp::Add => Some(flags::add(regs, src, dst)),
        TwoOp::Sub => Some(flags::sub(regs, src, dst)),
        TwoOp::Cmp => {
            flags::sub(regs, src, dst);
            None
        }
        TwoOp::And => Some(flags::sign_zero(regs, src & dst)),
        TwoOp::Xor => Some(flags::sign_zero(regs, src ^ dst)),
        TwoOp::Store => None,
    }
}

fn invalid(instr: &DecodedInstruction, ctx: &mut ExecContext<'_>) -> ExecuteOutcome {
    ctx.note(Anomaly::InvalidOpcode, instr.address);
    ctx.advance(1);
    ExecuteOutcome::Retired {
        cycles: cycles(CycleCostKind::Invalid),
    }
}

fn implied(op: ImpliedOp, instr: &DecodedInstruction, ctx: &mut ExecContext<'_>) -> ExecuteOutcome {
    let cost = cycles(CycleCostKind::ImpliedControl);
    ctx.block_interrupts();
    match op {
        ImpliedOp::Hlt => {
            // PC stays put so the CPU spins on the HLT.
            ctx.note(Anomaly::Halted, instr.address);
            return ctx.suspend_or_retire(cost);
        }
        ImpliedOp::Sdbd => ctx.regs.d = 2,
        ImpliedOp::Eis => ctx.regs.i = true,
        ImpliedOp::Dis => ctx.regs.i = false,
        ImpliedOp::Tci => {}
        ImpliedOp::Clrc => ctx.regs.c = false,
        ImpliedOp::Setc => ctx.regs.c = true,
    }
    ctx.advance(1);
    ExecuteOutcome::Retired { cycles: cost }
}

fn jump(instr: &DecodedInstruction, ctx: &mut ExecContext<'_>) -> ExecuteOutcome {
    if instr.imm1 != 0 {
        let enable = instr.imm1 & 1 != 0;
        ctx.regs.i = enable;
        ctx.regs.intr = if enable {
            IntrGate::ENABLE | IntrGate::INSTR
        } else {
            IntrGate::empty()
        };
    }
    if instr.reg0 != 7 {
        let link = ctx.regs.pc().wrapping_add(3);
        ctx.set_reg(instr.reg0, link);
    }
    ctx.regs.set_pc(instr.imm0);
    ExecuteOutcome::Retired {
        cycles: cycles(CycleCostKind::Jump),
    }
}

fn unary(op: UnaryOp, instr: &DecodedInstruction, ctx: &mut ExecContext<'_>) -> ExecuteOutcome {
    ctx.advance(1);
    let value = ctx.reg(instr.reg0);
    let regs = &mut *ctx.regs;
    let result = match op {
        UnaryOp::Incr => flags::sign_zero(regs, value.wrapping_add(1)),
        UnaryOp::Decr => flags::sign_zero(regs, value.wrapping_sub(1)),
        UnaryOp::Comr => flags::sign_zero(regs, !value),
        UnaryOp::Negr => flags::sub(regs, value, 0),
        UnaryOp::Adcr => {
            let carry = u16::from(regs.c);
            flags::add(regs, value, carry)
        }
        UnaryOp::Rswd => {
            regs.load_status_word(value);
            regs.intr = IntrGate::empty();
            return ExecuteOutcome::Retired {
                cycles: cycles(CycleCostKind::RegisterUnary),
            };
        }
    };
    ctx.set_reg(instr.reg0, result);
    ExecuteOutcome::Retired {
        cycles: cycles(CycleCostKind::RegisterUnary) + high_register_penalty(instr.reg0),
    }
}

fn sin(instr: &DecodedInstruction, ctx: &mut ExecContext<'_>) -> ExecuteOutcome {
    ctx.advance(1);
    if (ctx.regs.r[0], ctx.regs.r[1]) == VERSION_QUERY {
        ctx.regs.r[0] = TRAP_SIGNATURE;
        ctx.regs.r[1] = CORE_VERSION;
        ctx.regs.c = false;
    } else if let Err(err) = ctx.traps.dispatch(ctx.regs, ctx.mem) {
        ctx.note(err.anomaly(), instr.address);
    }
    ExecuteOutcome::Retired {
        cycles: cycles(CycleCostKind::NopSin),
    }
}

fn rotate(
    op: RotateOp,
    by_two: bool,
    instr: &DecodedInstruction,
    ctx: &mut ExecContext<'_>,
) -> ExecuteOutcome {
    ctx.advance(1);
    let r0 = ctx.reg(instr.reg0);
    let regs = &mut *ctx.regs;
    let c = u16::from(regs.c);
    let o = u16::from(regs.o);
    let arith2 = ((r0 as i16) >> 2) as u16;
    let arith1 = ((r0 as i16) >> 1) as u16;

    let r1 = if by_two {
        match op {
            RotateOp::Swap => {
                let b = r0 & 0xFF;
                regs.s = b & 0x80 != 0;
                b | (b << 8)
            }
            RotateOp::Sll => {
                regs.s = r0 & 0x2000 != 0;
                r0 << 2
            }
            RotateOp::Rlc | RotateOp::Sllc => {
                regs.s = r0 & 0x2000 != 0;
                regs.c = r0 & 0x8000 != 0;
                regs.o = r0 & 0x4000 != 0;
                if op == RotateOp::Rlc {
                    (r0 << 2) | (c << 1) | o
                } else {
                    r0 << 2
                }
            }
            RotateOp::Slr => {
                regs.s = r0 & 0x200 != 0;
                r0 >> 2
            }
            RotateOp::Sar => {
                regs.s = r0 & 0x200 != 0;
                arith2
            }
            RotateOp::Rrc => {
                regs.s = r0 & 0x200 != 0;
                regs.c = r0 & 1 != 0;
                regs.o = r0 & 2 != 0;
                (r0 >> 2) | (c << 14) | (o << 15)
            }
            RotateOp::Sarc => {
                regs.s = r0 & 0x200 != 0;
                regs.c = r0 & 1 != 0;
                regs.o = r0 & 2 != 0;
                arith2
            }
        }
    } else {
        match op {
            RotateOp::Swap => {
                regs.s = r0 & 0x8000 != 0;
                r0.swap_bytes()
            }
            RotateOp::Sll => {
                regs.s = r0 & 0x4000 != 0;
                r0 << 1
            }
            RotateOp::Rlc | RotateOp::Sllc => {
                regs.s = r0 & 0x4000 != 0;
                regs.c = r0 & 0x8000 != 0;
                if op == RotateOp::Rlc {
                    (r0 << 1) | c
                } else {
                    r0 << 1
                }
            }
            RotateOp::Slr => {
                regs.s = r0 & 0x100 != 0;
                r0 >> 1
            }
            RotateOp::Sar => {
                regs.s = r0 & 0x100 != 0;
                arith1
            }
            RotateOp::Rrc => {
                regs.s = r0 & 0x100 != 0;
                regs.c = r0 & 1 != 0;
                (r0 >> 1) | (c << 15)
            }
            RotateOp::Sarc => {
                regs.s = r0 & 0x100 != 0;
                regs.c = r0 & 1 != 0;
                arith1
            }
        }
    };
    regs.z = r1 == 0;

    ctx.set_reg(instr.reg0, r1);
    ctx.block_interrupts();
    ExecuteOutcome::Retired {
        cycles: cycles(if by_two {
            CycleCostKind::ShiftByTwo
        } else {
            CycleCostKind::ShiftByOne
        }),
    }
}

fn register(
    op: TwoOp,
    route: PcRoute,
    instr: &DecodedInstruction,
    ctx: &mut ExecContext<'_>,
) -> ExecuteOutcome {
    let next = ctx.regs.pc().wrapping_add(1);
    match route {
        PcRoute::None | PcRoute::FromPc => {
            let src = if route == PcRoute::FromPc {
                next
            } else {
                ctx.reg(instr.reg0)
            };
            let dst = ctx.reg(instr.reg1);
            ctx.regs.set_pc(next);
            let result = alu(ctx.regs, op, src, dst);
            if op == TwoOp::Move {
                flags::sign_zero(ctx.regs, src);
            }
            if let Some(value) = result {
                ctx.set_reg(instr.reg1, value);
            }
            ExecuteOutcome::Retired {
                cycles: cycles(CycleCostKind::RegisterToRegister)
                    + high_register_penalty(instr.reg1),
            }
        }
        PcRoute::ToPc => {
            let src = ctx.reg(instr.reg0);
            let result = alu(ctx.regs, op, src, next);
            if op == TwoOp::Move {
                flags::sign_zero(ctx.regs, src);
            }
            ctx.regs.set_pc(result.unwrap_or(next));
            ExecuteOutcome::Retired {
                cycles: cycles(CycleCostKind::RegisterToPc),
            }
        }
    }
}

fn branch(cond: Condition, instr: &DecodedInstruction, ctx: &mut ExecContext<'_>) -> ExecuteOutcome {
    ctx.advance(2);
    let regs = &*ctx.regs;
    let taken = match cond {
        Condition::External => u16::from(ctx.ext_lines) == instr.imm1,
        _ => cond.holds(regs.s, regs.z, regs.o, regs.c),
    };
    if taken {
        ctx.regs.set_pc(instr.imm0);
        ExecuteOutcome::Retired {
            cycles: cycles(CycleCostKind::BranchTaken),
        }
    } else {
        ExecuteOutcome::Retired {
            cycles: cycles(CycleCostKind::BranchNotTaken),
        }
    }
}

fn direct(op: TwoOp, instr: &DecodedInstruction, ctx: &mut ExecContext<'_>) -> ExecuteOutcome {
    ctx.advance(2);
    if op == TwoOp::Store {
        let data = ctx.reg(instr.reg0);
        ext_addr_write(ctx, instr, data);
        ctx.block_interrupts();
        return ExecuteOutcome::Retired {
            cycles: cycles(CycleCostKind::DirectStore),
        };
    }

    let mut cost = cycles(CycleCostKind::DirectRead) + high_register_penalty(instr.reg0);
    let mut value = ext_addr_read(ctx, instr);
    if ctx.regs.d != 0 {
        let pc = ctx.regs.pc();
        let high = ctx.mem.read(pc);
        ctx.advance(1);
        value = (value & 0xFF) | ((high & 0xFF) << 8);
        cost += cycles(CycleCostKind::DoubleByteDirectExtra);
    }
    let dst = ctx.reg(instr.reg0);
    if let Some(result) = alu(ctx.regs, op, value, dst) {
        ctx.set_reg(instr.reg0, result);
    }
    ExecuteOutcome::Retired { cycles: cost }
}

fn immediate(
    op: TwoOp,
    dbd: bool,
    instr: &DecodedInstruction,
    ctx: &mut ExecContext<'_>,
) -> ExecuteOutcome {
    let double = dbd && ctx.regs.d != 0;
    if op == TwoOp::Store {
        let addr = ctx.regs.pc().wrapping_add(1);
        ctx.regs.set_pc(addr);
        if double {
            ctx.note(Anomaly::PrefixedStore, instr.address);
        }
        let data = ctx.reg(instr.reg0);
        ctx.regs.set_pc(addr.wrapping_add(1));
        ctx.mem.write(addr, data);
        ctx.block_interrupts();
        return ExecuteOutcome::Retired {
            cycles: cycles(CycleCostKind::ImmediateStore),
        };
    }

    ctx.advance(if double { 3 } else { 2 });
    let (value, extra) = if double {
        (instr.imm1, cycles(CycleCostKind::DoubleByteExtra))
    } else {
        (instr.imm0, 0)
    };
    let dst = ctx.reg(instr.reg0);
    if let Some(result) = alu(ctx.regs, op, value, dst) {
        ctx.set_reg(instr.reg0, result);
    }
    ExecuteOutcome::Retired {
        cycles: cycles(CycleCostKind::ImmediateRead) + extra + high_register_penalty(instr.reg0),
    }
}

fn unmapped(instr: &DecodedInstruction, ctx: &mut ExecContext<'_>) -> ExecuteOutcome {
    ctx.advance(2);
    let dst = ctx.reg(instr.reg0);
    let result = flags::sign_zero(ctx.regs, instr.imm0 ^ dst);
    ctx.set_reg(instr.reg0, result);
    ctx.note(Anomaly::UnmappedFetch, instr.address);
    ctx.suspend_or_retire(
        cycles(CycleCostKind::ImmediateRead) + high_register_penalty(instr.reg0),
    )
}

fn indirect(
    op: TwoOp,
    mode: IndirectMode,
    dbd: bool,
    instr: &DecodedInstruction,
    ctx: &mut ExecContext<'_>,
) -> ExecuteOutcome {
    let penalty = high_register_penalty(instr.reg0);
    let double = dbd && ctx.regs.d != 0;
    let addr = ctx.reg(instr.reg0);

    if op == TwoOp::Store {
        ctx.advance(1);
        if double {
            ctx.note(Anomaly::PrefixedStore, instr.address);
        }
        let data = ctx.reg(instr.reg1);
        let data = atomic_data(ctx, instr.amode, addr, data);
        ctx.mem.write(addr, data);
        if mode != IndirectMode::Plain {
            ctx.set_reg(instr.reg0, addr.wrapping_add(1));
        }
        ctx.block_interrupts();
        return ExecuteOutcome::Retired {
            cycles: cycles(CycleCostKind::IndirectStore),
        };
    }

    let read_cost = cycles(CycleCostKind::IndirectRead)
        + if double {
            cycles(CycleCostKind::DoubleByteExtra)
        } else {
            0
        }
        + penalty;

    match mode {
        IndirectMode::Plain => {
            ctx.advance(1);
            let dst = ctx.reg(instr.reg1);
            let mut value = ctx.mem.read(addr);
            if double {
                value = (value & 0xFF) | (ctx.mem.read(addr) << 8);
            }
            if let Some(result) = alu(ctx.regs, op, value, dst) {
                ctx.set_reg(instr.reg1, result);
            }
            ExecuteOutcome::Retired { cycles: read_cost }
        }
        IndirectMode::PostIncrement if dbd => {
            ctx.advance(1);
            if double && instr.reg0 == instr.reg1 {
                debug!(pc = instr.address, "double-byte read through its own pointer");
            }
            let dst = ctx.reg(instr.reg1);
            let mut ptr = addr;
            let mut value = ctx.mem.read(ptr);
            ptr = ptr.wrapping_add(1);
            if double {
                value = (value & 0xFF) | (ctx.mem.read(ptr) << 8);
                ptr = ptr.wrapping_add(1);
            }
            if op == TwoOp::Move {
                ctx.set_reg(instr.reg0, ptr);
                ctx.set_reg(instr.reg1, value);
            } else {
                if let Some(result) = alu(ctx.regs, op, value, dst) {
                    ctx.set_reg(instr.reg1, result);
                }
                ctx.set_reg(instr.reg0, ptr);
            }
            ExecuteOutcome::Retired { cycles: read_cost }
        }
        IndirectMode::PostIncrement => {
            ctx.set_reg(instr.reg0, addr.wrapping_add(1));
            ctx.advance(1);
            let dst = ctx.reg(instr.reg1);
            let value = ctx.mem.read(addr);
            if let Some(result) = alu(ctx.regs, op, value, dst) {
                ctx.set_reg(instr.reg1, result);
            }
            ExecuteOutcome::Retired { cycles: read_cost }
        }
        IndirectMode::Stack => {
            let top = addr.wrapping_sub(1);
            ctx.advance(1);
            let value = ctx.mem.read(top);
            ctx.set_reg(instr.reg0, top);
            let dst = ctx.reg(instr.reg1);
            if let Some(result) = alu(ctx.regs, op, value, dst) {
                ctx.set_reg(instr.reg1, result);
            }
            ExecuteOutcome::Retired {
                cycles: cycles(CycleCostKind::StackRead) + penalty,
            }
        }
    }
}

fn extended(instr: &DecodedInstruction, ctx: &mut ExecContext<'_>) -> ExecuteOutcome {
    ctx.advance(1);
    ctx.block_interrupts();
    let retired = ExecuteOutcome::Retired {
        cycles: cycles(CycleCostKind::ExtendedIsa),
    };

    let opcode = usize::from(instr.imm0 >> 8);
    let amode = instr.amode;
    let s_bit = usize::from(amode & 1);
    let s1_is_xreg = (amode >> 3) & 1 != 0;
    let s2type = (amode >> 1) & 3;
    if amode >= 0x20 || amode < 2 || opcode >= EXT_OPCODE_COUNT || s2type == 0 {
        ctx.advance(1);
        return retired;
    }

    let xlo = usize::from(instr.xreg0 & 15);
    let xhi = (xlo + 1) & 15;
    let mut dl = ctx.regs.xr[xlo];
    let mut dh = ctx.regs.xr[xhi];
    ctx.mem.write(PV_ADDR, dl);

    let mut src1 = if s1_is_xreg {
        ctx.regs.xr[usize::from(instr.reg0 & 15)]
    } else {
        ctx.regs.r[usize::from(instr.reg0 & 7)]
    };
    let mut src2 = if s2type == 1 {
        ctx.regs.xr[usize::from(instr.reg1 & 15)]
    } else {
        instr.imm1
    };

    match EXT_TABLE[opcode].kind {
        ExtKind::Div32 { .. } if s_bit != 0 => {}
        ExtKind::Div32 { signed } => {
            let (lo, hi) = if s1_is_xreg {
                (src1, ctx.regs.xr[(usize::from(instr.reg0) + 1) & 15])
            } else {
                (0, src1)
            };
            if signed {
                div32s(lo, hi, src2, &mut dl, &mut dh);
            } else {
                div32u(lo, hi, src2, &mut dl, &mut dh);
            }
        }
        ExtKind::Pair(fns) => {
            if s_bit != 0 {
                std::mem::swap(&mut src1, &mut src2);
            }
            fns[s_bit](src1, src2, &mut dl, &mut dh);
        }
    }

    ctx.regs.xr[xlo] = dl;
    ctx.regs.xr[xhi] = dh;
    ctx.advance(1);
    retired
}
