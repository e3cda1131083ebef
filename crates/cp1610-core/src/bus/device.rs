//! The contract every bus-attached component implements.

use std::any::Any;

use bitflags::bitflags;

use super::Bus;

bitflags! {
    /// Which entry points a device actually implements.
    ///
    /// The bus only routes an access to a device that advertises the
    /// matching capability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Responds to normal reads.
        const READ = 1 << 0;
        /// Responds to normal writes.
        const WRITE = 1 << 1;
        /// Responds to side-effect-free debug reads.
        const PEEK = 1 << 2;
        /// Responds to forced debug writes.
        const POKE = 1 << 3;
        /// Advances with virtual time.
        const TICK = 1 << 4;
        /// Plain memory-mapped storage.
        const MEMORY = Self::READ.bits() | Self::WRITE.bits() | Self::PEEK.bits() | Self::POKE.bits();
    }
}

/// Identity of a registered device: the owning bus plus its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub(crate) bus: u32,
    pub(crate) index: usize,
}

impl DeviceId {
    /// Registration order on the owning bus.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }
}

/// Time consumed by one tick call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickResult {
    /// Cycles actually consumed. May be less than requested, even zero.
    pub consumed: u64,
    /// The device handed control to a host hook and wants the caller to
    /// return early. Counters already include `consumed`.
    pub suspended: bool,
}

impl TickResult {
    /// A normal tick that consumed `consumed` cycles.
    #[must_use]
    pub const fn advanced(consumed: u64) -> Self {
        Self {
            consumed,
            suspended: false,
        }
    }

    /// A tick that stopped early at a hook's request.
    #[must_use]
    pub const fn suspended(consumed: u64) -> Self {
        Self {
            consumed,
            suspended: true,
        }
    }
}

/// A memory-mapped and/or clocked component.
///
/// Addresses handed to `read`/`write`/`peek`/`poke` are already relative:
/// `(addr - addr_base()) & addr_mask()`. Reads from a device that does not
/// drive the bus return all-ones so wired-AND combining is unaffected.
pub trait Device: Any {
    /// Entry points this device implements.
    fn capabilities(&self) -> Capabilities;

    /// Base subtracted from bus addresses before dispatch.
    fn addr_base(&self) -> u32 {
        0
    }

    /// Mask applied to the relative address before dispatch.
    fn addr_mask(&self) -> u32 {
        u32::MAX
    }

    /// Normal read.
    fn read(&mut self, _addr: u32, _requester: Option<DeviceId>) -> u32 {
        u32::MAX
    }

    /// Normal write.
    fn write(&mut self, _addr: u32, _data: u32, _requester: Option<DeviceId>) {}

    /// Debug read with no side effects.
    fn peek(&self, _addr: u32) -> u32 {
        u32::MAX
    }

    /// Debug write that bypasses write protection.
    fn poke(&mut self, _addr: u32, _data: u32) {}

    /// Advances the device from `now` by at most `len` cycles.
    ///
    /// The device is detached from `bus` for the duration of the call, so
    /// accesses it makes through `bus` never reach itself.
    fn tick(&mut self, _bus: &mut Bus, _now: u64, len: u64) -> TickResult {
        TickResult::advanced(len)
    }

    /// Smallest step worth ticking for.
    fn min_tick(&self) -> u64 {
        1
    }

    /// Largest step the device accepts in one call.
    fn max_tick(&self) -> u64 {
        u64::MAX
    }

    /// Returns the device to its power-on state.
    fn reset(&mut self) {}

    /// Releases resources at bus teardown.
    fn destroy(&mut self) {}

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
