//! Operand-address helpers shared by the direct and indirect routines.

use super::ExecContext;
use crate::decoder::DecodedInstruction;

/// Fetches the operand of a direct-mode read, applying extended
/// addressing when it is enabled and the instruction asks for it.
///
/// `amode` bit 0 selects the post-indexed address over the bare base;
/// bit 1 writes the computed address back to the extended register.
/// With `amode == 0` the instruction is a register-relative form that
/// produces the address itself as the operand.
pub(super) fn ext_addr_read(ctx: &mut ExecContext<'_>, instr: &DecodedInstruction) -> u16 {
    let x = usize::from(instr.xreg0);
    if !ctx.extended_isa || (instr.amode == 0 && x == 0) {
        return ctx.mem.read(instr.imm0);
    }

    let base = ctx.regs.xr(x);
    let addr = base.wrapping_add(instr.imm0);

    if instr.amode == 0 {
        if instr.reg0 == 7 && instr.imm1 == 2 {
            // MVI into PC: relative jump when the base is live.
            let pc = ctx.regs.pc();
            return if base == 0 {
                pc
            } else {
                pc.wrapping_add(instr.imm0).wrapping_sub(1)
            };
        }
        if instr.reg0 == 7 && instr.imm1 == 7 {
            // XOR into PC: decrement-and-branch on the extended register.
            let pc = ctx.regs.pc();
            let dest = pc.wrapping_sub(1).wrapping_add(instr.imm0);
            let count = base.wrapping_sub(1);
            ctx.regs.set_xr(x, count);
            return if count == 0 { 0 } else { pc ^ dest };
        }
        return addr;
    }

    if instr.amode & 2 != 0 {
        ctx.regs.set_xr(x, addr);
    }
    ctx.mem.read(if instr.amode & 1 != 0 { addr } else { base })
}

/// Stores the data of a direct-mode `MVO`, applying extended addressing
/// when it is enabled. With `amode == 0` the data plus the displacement
/// lands in the extended register instead of memory.
pub(super) fn ext_addr_write(ctx: &mut ExecContext<'_>, instr: &DecodedInstruction, data: u16) {
    let x = usize::from(instr.xreg0);
    if !ctx.extended_isa || (instr.amode == 0 && x == 0) {
        ctx.mem.write(instr.imm0, data);
        return;
    }

    let base = ctx.regs.xr(x);
    let addr = base.wrapping_add(instr.imm0);

    if instr.amode == 0 {
        ctx.regs.set_xr(x, data.wrapping_add(instr.imm0));
        return;
    }

    if instr.amode & 2 != 0 {
        ctx.regs.set_xr(x, addr);
    }
    ctx.mem
        .write(if instr.amode & 1 != 0 { addr } else { base }, data);
}

/// Combines store data with the current memory contents for the atomic
/// read-modify-write forms of indirect `MVO`.
pub(super) fn atomic_data(ctx: &mut ExecContext<'_>, amode: u8, addr: u16, data: u16) -> u16 {
    match amode {
        1 => data.wrapping_add(ctx.mem.read(addr)),
        2 => data & ctx.mem.read(addr),
        3 => data | ctx.mem.read(addr),
        _ => data,
    }
}
