//! Word-wide view of the bus used while the CPU executes.

#![allow(clippy::cast_possible_truncation)]

use crate::api::MemoryPort;
use crate::bus::Bus;

/// [`MemoryPort`] over a bus. Data is truncated to 16 bits on the way in
/// and out; the CPU is not a registered requester.
pub(crate) struct BusPort<'a> {
    bus: &'a mut Bus,
}

impl<'a> BusPort<'a> {
    pub(crate) fn new(bus: &'a mut Bus) -> Self {
        Self { bus }
    }
}

impl MemoryPort for BusPort<'_> {
    fn read(&mut self, addr: u16) -> u16 {
        (self.bus.read(None, u32::from(addr)) & 0xFFFF) as u16
    }

    fn write(&mut self, addr: u16, data: u16) {
        self.bus.write(None, u32::from(addr), u32::from(data));
    }

    fn peek(&self, addr: u16) -> u16 {
        (self.bus.peek(u32::from(addr)) & 0xFFFF) as u16
    }
}
