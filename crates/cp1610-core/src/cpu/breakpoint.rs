//! Breakpoints, implemented by swapping the cached execute handle.
//!
//! An armed address holds [`Handler::Breakpoint`] in the decode cache.
//! When the CPU reaches it the trap fires, the handle becomes
//! [`Handler::DecodeBreakpoint`] so the instruction underneath runs on
//! resume, and that run re-arms the trap.

use bitflags::bitflags;
use tracing::debug;

use super::Cpu;
use crate::api::BreakpointKind;
use crate::decoder::Handler;
use crate::execute::ExecuteOutcome;

bitflags! {
    /// Per-address breakpoint flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BreakpointFlags: u8 {
        /// Fires every time.
        const PERSISTENT = 1 << 0;
        /// Fires once, then disarms (a tracepoint).
        const ONCE = 1 << 1;
    }
}

impl Cpu {
    /// Arms `flags` at `addr`, returning whether a breakpoint was already
    /// armed there.
    ///
    /// Arming the address the CPU is about to execute lets that
    /// instruction run first, so resuming from a breakpoint never
    /// re-triggers it.
    pub fn set_breakpoint(&mut self, addr: u16, flags: BreakpointFlags) -> bool {
        let slot = usize::from(addr);
        let was_armed = self.handles[slot].is_breakpoint();
        self.breakpoints[slot] |= flags;
        if !was_armed && !self.breakpoints[slot].is_empty() {
            self.handles[slot] = if addr == self.regs.pc() {
                Handler::DecodeBreakpoint
            } else {
                Handler::Breakpoint
            };
            debug!(addr = %format_args!("{addr:04X}"), ?flags, "breakpoint armed");
        }
        was_armed
    }

    /// Removes `flags` from `addr`. Once no flags remain the address goes
    /// back to plain decode. Returns whether a breakpoint was armed.
    pub fn clear_breakpoint(&mut self, addr: u16, flags: BreakpointFlags) -> bool {
        let slot = usize::from(addr);
        if !self.handles[slot].is_breakpoint() {
            return false;
        }
        self.breakpoints[slot].remove(flags);
        if self.breakpoints[slot].is_empty() {
            self.handles[slot] = Handler::Decode;
            debug!(addr = %format_args!("{addr:04X}"), "breakpoint cleared");
        }
        true
    }

    /// Flags armed at `addr`.
    #[must_use]
    pub fn breakpoint(&self, addr: u16) -> BreakpointFlags {
        self.breakpoints[usize::from(addr)]
    }

    /// Every armed address whose flags include `flags`, ascending.
    #[must_use]
    pub fn list_breakpoints(&self, flags: BreakpointFlags) -> Vec<u16> {
        (0..=u16::MAX)
            .filter(|&addr| {
                let armed = self.breakpoints[usize::from(addr)];
                !armed.is_empty() && armed.contains(flags)
            })
            .collect()
    }

    /// The breakpoint that fired on the most recent instruction, if any.
    #[must_use]
    pub const fn hit_breakpoint(&self) -> Option<BreakpointKind> {
        self.hit
    }

    pub(super) fn trap_breakpoint(&mut self, pc: u16) -> ExecuteOutcome {
        let slot = usize::from(pc);
        let flags = &mut self.breakpoints[slot];
        let kind = if flags.contains(BreakpointFlags::ONCE) {
            BreakpointKind::Tracepoint
        } else {
            BreakpointKind::Breakpoint
        };
        flags.remove(BreakpointFlags::ONCE);
        self.handles[slot] = if flags.is_empty() {
            Handler::Decode
        } else {
            Handler::DecodeBreakpoint
        };
        self.hit = Some(kind);
        debug!(pc = %format_args!("{pc:04X}"), ?kind, "breakpoint hit");
        ExecuteOutcome::Suspended { cycles: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::BreakpointFlags;
    use crate::api::CpuConfig;
    use crate::cpu::Cpu;
    use crate::decoder::Handler;

    #[test]
    fn set_twice_clear_once_restores_plain_decode() {
        let mut cpu = Cpu::new(CpuConfig::default());
        assert!(!cpu.set_breakpoint(0x2000, BreakpointFlags::PERSISTENT));
        assert!(cpu.set_breakpoint(0x2000, BreakpointFlags::PERSISTENT));
        assert!(cpu.clear_breakpoint(0x2000, BreakpointFlags::PERSISTENT));
        assert_eq!(cpu.handles[0x2000], Handler::Decode);
        assert!(cpu.breakpoint(0x2000).is_empty());
        assert!(!cpu.clear_breakpoint(0x2000, BreakpointFlags::PERSISTENT));
    }

    #[test]
    fn arming_the_current_pc_decodes_first() {
        let mut cpu = Cpu::new(CpuConfig::default());
        cpu.registers_mut().set_pc(0x1234);
        cpu.set_breakpoint(0x1234, BreakpointFlags::ONCE);
        cpu.set_breakpoint(0x1236, BreakpointFlags::ONCE);
        assert_eq!(cpu.handles[0x1234], Handler::DecodeBreakpoint);
        assert_eq!(cpu.handles[0x1236], Handler::Breakpoint);
    }

    #[test]
    fn partial_clear_keeps_the_trap() {
        let mut cpu = Cpu::new(CpuConfig::default());
        cpu.set_breakpoint(0x3000, BreakpointFlags::PERSISTENT | BreakpointFlags::ONCE);
        cpu.clear_breakpoint(0x3000, BreakpointFlags::ONCE);
        assert_eq!(cpu.handles[0x3000], Handler::Breakpoint);
        assert_eq!(cpu.breakpoint(0x3000), BreakpointFlags::PERSISTENT);
    }

    #[test]
    fn listing_filters_on_contained_flags() {
        let mut cpu = Cpu::new(CpuConfig::default());
        cpu.set_breakpoint(0x0100, BreakpointFlags::PERSISTENT);
        cpu.set_breakpoint(0x0200, BreakpointFlags::ONCE);
        cpu.set_breakpoint(0x0300, BreakpointFlags::PERSISTENT | BreakpointFlags::ONCE);
        assert_eq!(
            cpu.list_breakpoints(BreakpointFlags::PERSISTENT),
            [0x0100, 0x0300]
        );
        assert_eq!(
            cpu.list_breakpoints(BreakpointFlags::empty()),
            [0x0100, 0x0200, 0x0300]
        );
    }
}
